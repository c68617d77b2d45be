//! A small homoiconic scripting runtime: programs are ordered sequences
//! of words, literals and blocks; evaluation walks the sequence with a
//! cursor, callables pull their own arguments, and streaming procedures
//! compose over single-subscriber channels.

pub mod ast;
pub mod bind;
pub mod dict;
pub mod error;
pub mod module;
pub mod natives;
pub mod parser;
pub mod stream;
pub mod vm;

pub use ast::{Code, CodeItem, Value};
pub use error::SorrelError;
pub use vm::Vm;

/// Parse, bind and run a source string in a VM that already has the
/// bootstrap dictionary loaded.
pub fn run_source(vm: &mut Vm, source: &str) -> Result<Value, SorrelError> {
    let mut code = parser::parse(source)?;
    vm.bind(&mut code);
    vm.exec(&code)
}

/// One-shot convenience: fresh VM, bootstrap, run. Streaming results are
/// drained to a plain value.
pub fn eval_source(source: &str) -> Result<Value, SorrelError> {
    let mut vm = Vm::new();
    natives::boot(&mut vm)?;
    let value = run_source(&mut vm, source)?;
    stream::collect_result(&mut vm, value)
}
