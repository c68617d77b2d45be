pub mod repl;

use sorrel_core::error::SorrelError;
use sorrel_core::module::{FsFetch, ModuleLoader};
use sorrel_core::{natives, parser, stream, Value, Vm};

/// Fresh VM with the bootstrap dictionary loaded.
pub fn create_runtime() -> Result<Vm, SorrelError> {
    let mut vm = Vm::new();
    natives::boot(&mut vm)?;
    Ok(vm)
}

/// Module loader backed by the local filesystem.
pub fn default_loader() -> ModuleLoader {
    ModuleLoader::new(FsFetch)
}

/// Parse, bind and run a source string from the given character offset,
/// draining a streaming result to a plain value.
pub fn run_at(vm: &mut Vm, source: &str, offset: usize) -> Result<Value, SorrelError> {
    let mut code = parser::parse_at(source, offset)?;
    vm.bind(&mut code);
    let value = vm.eval(&code)?;
    stream::collect_result(vm, value)
}

/// Character offset past a leading `#!` interpreter line, if any.
pub fn shebang_offset(source: &str) -> usize {
    if !source.starts_with("#!") {
        return 0;
    }
    match source.chars().position(|c| c == '\n') {
        Some(newline) => newline + 1,
        None => source.chars().count(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shebang_lines_are_skipped() {
        assert_eq!(shebang_offset("#!/usr/bin/env sorrel\nadd 1 2"), 22);
        assert_eq!(shebang_offset("add 1 2"), 0);
    }

    #[test]
    fn runtime_evaluates_scripts() {
        let mut vm = create_runtime().unwrap();
        let value = run_at(&mut vm, "#!sorrel\n1 + 2 * 3", 9).unwrap();
        assert_eq!(value, Value::Int(9));
    }
}
