use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::ast::{CodeItem, ProcValue, Value, WordKind};
use crate::dict::DictRef;
use crate::error::SorrelError;
use crate::stream::Publisher;
use crate::vm::Vm;

/// Heap-allocated activation record for streaming procedures: one frame
/// per instantiation, addressed by fixed slot index.
pub type FrameRef = Arc<Mutex<Vec<Value>>>;

/// Holder for the current input item of a reactive procedure body.
pub type InputCellRef = Arc<Mutex<Option<Value>>>;

/// A resolved storage location attached to a `Word`/`Path` head. `get`
/// reports explicit absence as `None`; `set` may reject read-only
/// locations.
#[derive(Clone)]
pub enum Binding {
    /// Shared dictionary slot, looked up by symbol at access time.
    Dict(DictRef),
    /// Slot at a fixed offset from the top of the VM value stack
    /// (negative; re-based per call by the closure calling convention).
    StackRel(isize),
    /// Slot in a per-instantiation heap frame.
    Frame(FrameRef, usize),
    /// Read-only view of the current input item (`in`).
    Input(InputCellRef),
    /// `out`: evaluates to a proc writing its argument to the channel.
    Emit(Publisher),
    /// `done`: evaluates to a proc terminating the channel.
    Close(Publisher),
}

impl Binding {
    pub fn get(&self, vm: &Vm, sym: &str) -> Result<Option<Value>, SorrelError> {
        match self {
            Binding::Dict(dict) => Ok(dict.read().unwrap().get(sym)),
            Binding::StackRel(offset) => {
                let index = stack_index(vm.stack.len(), *offset, sym)?;
                Ok(vm.stack.get(index).cloned())
            }
            Binding::Frame(frame, slot) => {
                Ok(frame.lock().unwrap().get(*slot).cloned())
            }
            Binding::Input(cell) => Ok(cell.lock().unwrap().clone()),
            Binding::Emit(publisher) => {
                let publisher = publisher.clone();
                Ok(Some(Value::Proc(ProcValue::new(Arc::new(
                    move |vm: &mut Vm, cursor: &mut crate::vm::Cursor<'_>| {
                        let value = cursor.next(vm)?;
                        publisher.write(vm, value.clone())?;
                        Ok(value)
                    },
                )))))
            }
            Binding::Close(publisher) => {
                let publisher = publisher.clone();
                Ok(Some(Value::Proc(ProcValue::new(Arc::new(
                    move |vm: &mut Vm, cursor: &mut crate::vm::Cursor<'_>| {
                        let value = cursor.next(vm)?;
                        publisher.done(vm, value.clone())?;
                        Ok(value)
                    },
                )))))
            }
        }
    }

    pub fn set(&self, vm: &mut Vm, sym: &str, value: Value) -> Result<(), SorrelError> {
        match self {
            Binding::Dict(dict) => {
                dict.write().unwrap().set(sym, value);
                Ok(())
            }
            Binding::StackRel(offset) => {
                let index = stack_index(vm.stack.len(), *offset, sym)?;
                match vm.stack.get_mut(index) {
                    Some(slot) => {
                        *slot = value;
                        Ok(())
                    }
                    None => Err(SorrelError::runtime(format!(
                        "stack slot out of range for {}",
                        sym
                    ))),
                }
            }
            Binding::Frame(frame, slot) => {
                let mut guard = frame.lock().unwrap();
                match guard.get_mut(*slot) {
                    Some(cell) => {
                        *cell = value;
                        Ok(())
                    }
                    None => Err(SorrelError::runtime(format!(
                        "frame slot out of range for {}",
                        sym
                    ))),
                }
            }
            Binding::Input(_) | Binding::Emit(_) | Binding::Close(_) => {
                Err(SorrelError::read_only(sym))
            }
        }
    }
}

fn stack_index(len: usize, offset: isize, sym: &str) -> Result<usize, SorrelError> {
    let index = len as isize + offset;
    if index < 0 {
        return Err(SorrelError::runtime(format!(
            "stack underflow resolving {}",
            sym
        )));
    }
    Ok(index as usize)
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Binding::Dict(_) => write!(f, "Dict"),
            Binding::StackRel(offset) => write!(f, "StackRel({})", offset),
            Binding::Frame(_, slot) => write!(f, "Frame({})", slot),
            Binding::Input(_) => write!(f, "Input"),
            Binding::Emit(_) => write!(f, "Emit"),
            Binding::Close(_) => write!(f, "Close"),
        }
    }
}

/// One scope in the resolution chain: maps a symbol to a storage-slot
/// descriptor, or declines.
pub trait Resolver {
    fn resolve(&self, sym: &str) -> Option<Binding>;
}

/// Walk `code` attaching bindings. Unresolved symbols are left unattached
/// (executing them later is an unbound-word error); nested sequences are
/// bound with the same resolver, so lexical shadowing is expressed by the
/// resolver itself, not by the walk.
pub fn bind(code: &mut [CodeItem], resolver: &dyn Resolver) {
    for item in code.iter_mut() {
        match item {
            CodeItem::Word(word) => {
                if let Some(binding) = resolver.resolve(&word.sym) {
                    word.binding = Some(binding);
                }
            }
            CodeItem::Path(path) => {
                if let Some(binding) = resolver.resolve(path.head()) {
                    path.binding = Some(binding);
                }
            }
            CodeItem::Block(code) | CodeItem::Brackets(code) => bind(code, resolver),
            CodeItem::Const(_) | CodeItem::Refinement(_) => {}
        }
    }
}

/// Resolves every symbol against one shared dictionary; the global scope
/// factory.
pub struct DictResolver {
    dict: DictRef,
}

impl DictResolver {
    pub fn new(dict: DictRef) -> Self {
        Self { dict }
    }
}

impl Resolver for DictResolver {
    fn resolve(&self, _sym: &str) -> Option<Binding> {
        Some(Binding::Dict(self.dict.clone()))
    }
}

/// Resolves only the symbols that appear as set-words anywhere in a code
/// tree, against a private dictionary. Captures a module's public exports.
pub struct SetWordsResolver {
    dict: DictRef,
    symbols: HashSet<String>,
}

impl SetWordsResolver {
    pub fn collect(code: &[CodeItem], dict: DictRef) -> Self {
        let mut symbols = HashSet::new();
        collect_set_words(code, &mut symbols);
        Self { dict, symbols }
    }
}

impl Resolver for SetWordsResolver {
    fn resolve(&self, sym: &str) -> Option<Binding> {
        self.symbols
            .contains(sym)
            .then(|| Binding::Dict(self.dict.clone()))
    }
}

/// Resolves only the symbols a dictionary already contains; used to link
/// loader-provided capabilities into a module body.
pub struct DictWordsResolver {
    dict: DictRef,
}

impl DictWordsResolver {
    pub fn new(dict: DictRef) -> Self {
        Self { dict }
    }
}

impl Resolver for DictWordsResolver {
    fn resolve(&self, sym: &str) -> Option<Binding> {
        self.dict
            .read()
            .unwrap()
            .contains(sym)
            .then(|| Binding::Dict(self.dict.clone()))
    }
}

/// Resolves from an explicit symbol→binding table; building block for
/// closure and procedure scopes.
pub struct SlotResolver {
    slots: Vec<(String, Binding)>,
}

impl SlotResolver {
    pub fn new(slots: Vec<(String, Binding)>) -> Self {
        Self { slots }
    }
}

impl Resolver for SlotResolver {
    fn resolve(&self, sym: &str) -> Option<Binding> {
        self.slots
            .iter()
            .find(|(name, _)| name == sym)
            .map(|(_, binding)| binding.clone())
    }
}

/// Chain of responsibility: the first scope that resolves wins.
pub struct ResolverChain {
    links: Vec<Box<dyn Resolver>>,
}

impl ResolverChain {
    pub fn new(links: Vec<Box<dyn Resolver>>) -> Self {
        Self { links }
    }
}

impl Resolver for ResolverChain {
    fn resolve(&self, sym: &str) -> Option<Binding> {
        self.links.iter().find_map(|link| link.resolve(sym))
    }
}

/// Collect every symbol appearing as a set-word, recursing through nested
/// blocks and bracket groups.
pub fn collect_set_words(code: &[CodeItem], out: &mut HashSet<String>) {
    for item in code {
        match item {
            CodeItem::Word(word) if word.kind == WordKind::Set => {
                out.insert(word.sym.clone());
            }
            CodeItem::Block(code) | CodeItem::Brackets(code) => collect_set_words(code, out),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dict::{self, Dict};
    use crate::parser::parse;

    #[test]
    fn set_words_are_collected_recursively() {
        let code = parse("a: 1 [b: 2 (c: 3)] d").unwrap();
        let mut syms = HashSet::new();
        collect_set_words(&code, &mut syms);
        assert!(syms.contains("a"));
        assert!(syms.contains("b"));
        assert!(syms.contains("c"));
        assert!(!syms.contains("d"));
    }

    #[test]
    fn set_words_resolver_declines_other_symbols() {
        let code = parse("a: 1 print a").unwrap();
        let dict = dict::new_ref(Dict::new());
        let resolver = SetWordsResolver::collect(&code, dict);
        assert!(resolver.resolve("a").is_some());
        assert!(resolver.resolve("print").is_none());
    }

    #[test]
    fn chain_prefers_earlier_links() {
        let inner = dict::new_ref(Dict::new());
        inner.write().unwrap().set("x", Value::Int(1));
        let outer = dict::new_ref(Dict::new());
        outer.write().unwrap().set("x", Value::Int(2));
        outer.write().unwrap().set("y", Value::Int(3));
        let chain = ResolverChain::new(vec![
            Box::new(DictWordsResolver::new(inner.clone())),
            Box::new(DictWordsResolver::new(outer.clone())),
        ]);
        let vm = Vm::new();
        let x = chain.resolve("x").unwrap().get(&vm, "x").unwrap();
        assert_eq!(x, Some(Value::Int(1)));
        let y = chain.resolve("y").unwrap().get(&vm, "y").unwrap();
        assert_eq!(y, Some(Value::Int(3)));
    }

    #[test]
    fn unresolved_words_stay_unattached() {
        let mut code = parse("a: 1 b").unwrap();
        let dict = dict::new_ref(Dict::new());
        let resolver = SetWordsResolver::collect(&code, dict);
        bind(&mut code, &resolver);
        match (&code[0], &code[2]) {
            (CodeItem::Word(a), CodeItem::Word(b)) => {
                assert!(a.binding.is_some());
                assert!(b.binding.is_none());
            }
            other => panic!("unexpected shape: {:?}", other),
        }
    }
}
