use crate::ast::{CodeItem, PathExpr, Value, Word, WordKind};
use crate::bind::{bind, DictResolver};
use crate::dict::{self, Dict, DictRef};
use crate::error::{format_error, SorrelError};

/// Execution engine state. One value stack shared by every closure call,
/// a global dictionary and the last-result register consumed by infix
/// operators.
pub struct Vm {
    pub dictionary: DictRef,
    pub stack: Vec<Value>,
    pub result: Value,
}

impl Vm {
    pub fn new() -> Self {
        Self {
            dictionary: dict::new_ref(Dict::new()),
            stack: Vec::new(),
            result: Value::None,
        }
    }

    /// Attach global-dictionary bindings to every word in the tree.
    pub fn bind(&self, code: &mut [CodeItem]) {
        bind(code, &DictResolver::new(self.dictionary.clone()));
    }

    /// Run a code sequence to its end, returning the last statement's
    /// value. Used for nested evaluation (brackets, control-flow bodies).
    pub fn eval(&mut self, code: &[CodeItem]) -> Result<Value, SorrelError> {
        Cursor::new(code).exec(self)
    }

    /// Top-level entry point: like `eval`, but failures are reported on
    /// stderr before propagating.
    pub fn exec(&mut self, code: &[CodeItem]) -> Result<Value, SorrelError> {
        match self.eval(code) {
            Ok(value) => Ok(value),
            Err(err) => {
                eprintln!("{}", format_error(&err));
                Err(err)
            }
        }
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

/// Program cursor over a code sequence. Callables pull their arguments
/// through the caller's cursor, so consuming an item and evaluating it
/// are the same motion.
pub struct Cursor<'a> {
    code: &'a [CodeItem],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(code: &'a [CodeItem]) -> Self {
        Self { code, pos: 0 }
    }

    pub fn has_next(&self) -> bool {
        self.pos < self.code.len()
    }

    fn fetch(&mut self) -> Option<CodeItem> {
        let item = self.code.get(self.pos).cloned();
        if item.is_some() {
            self.pos += 1;
        }
        item
    }

    fn peek_infix(&self) -> bool {
        matches!(self.code.get(self.pos), Some(CodeItem::Word(w)) if w.infix)
    }

    /// Evaluate exactly one expression, without the trailing infix
    /// continuation. Infix operators use this to pull their right operand
    /// so that `1 + 2 * 3` associates strictly left to right.
    pub fn next_no_infix(&mut self, vm: &mut Vm) -> Result<Value, SorrelError> {
        let item = self
            .fetch()
            .ok_or_else(|| SorrelError::runtime("unexpected end of code"))?;
        let value = exec_item(vm, self, &item)?;
        // Streaming results begin running as soon as they are produced;
        // the caller keeps the handle for composition.
        if let Value::Suspend(handle) = &value {
            handle.start(vm);
        }
        vm.result = value.clone();
        Ok(value)
    }

    /// Evaluate one full expression: one step, then as long as the
    /// following item is an infix operator, keep extending the
    /// expression with it.
    pub fn next(&mut self, vm: &mut Vm) -> Result<Value, SorrelError> {
        let mut value = self.next_no_infix(vm)?;
        while self.peek_infix() {
            value = self.next_no_infix(vm)?;
        }
        Ok(value)
    }

    /// Run every statement, returning the final value (`none` for empty
    /// code).
    pub fn exec(&mut self, vm: &mut Vm) -> Result<Value, SorrelError> {
        let mut result = Value::None;
        while self.has_next() {
            result = self.next(vm)?;
        }
        Ok(result)
    }
}

fn exec_item(
    vm: &mut Vm,
    cursor: &mut Cursor<'_>,
    item: &CodeItem,
) -> Result<Value, SorrelError> {
    match item {
        CodeItem::Const(value) => Ok(value.clone()),
        CodeItem::Block(code) => Ok(Value::Block(code.clone())),
        CodeItem::Brackets(code) => vm.eval(code),
        CodeItem::Refinement(id) => Ok(Value::Refinement(id.clone())),
        CodeItem::Word(word) => exec_word(vm, cursor, word),
        CodeItem::Path(path) => exec_path(vm, cursor, path),
    }
}

fn exec_word(vm: &mut Vm, cursor: &mut Cursor<'_>, word: &Word) -> Result<Value, SorrelError> {
    match word.kind {
        WordKind::Set => {
            let binding = word
                .binding
                .clone()
                .ok_or_else(|| SorrelError::unbound(&word.sym))?;
            let value = cursor.next(vm)?;
            binding.set(vm, &word.sym, value.clone())?;
            Ok(value)
        }
        WordKind::Norm => {
            let binding = word
                .binding
                .clone()
                .ok_or_else(|| SorrelError::unbound(&word.sym))?;
            let value = binding
                .get(vm, &word.sym)?
                .ok_or_else(|| SorrelError::nothing_to_read(&word.sym))?;
            dispatch(vm, cursor, value)
        }
        WordKind::Get => {
            let binding = word
                .binding
                .clone()
                .ok_or_else(|| SorrelError::unbound(&word.sym))?;
            Ok(binding.get(vm, &word.sym)?.unwrap_or(Value::None))
        }
        WordKind::Quote => Err(SorrelError::runtime(format!(
            "quoted words are not supported: '{}",
            word.sym
        ))),
    }
}

fn exec_path(
    vm: &mut Vm,
    cursor: &mut Cursor<'_>,
    path: &PathExpr,
) -> Result<Value, SorrelError> {
    let binding = path
        .binding
        .clone()
        .ok_or_else(|| SorrelError::unbound(path.head()))?;

    if path.kind == WordKind::Set {
        return set_path(vm, cursor, path, &binding);
    }

    let mut value = binding
        .get(vm, path.head())?
        .ok_or_else(|| SorrelError::nothing_to_read(path.display()))?;
    for segment in &path.segments[1..] {
        value = path_field(&value, segment, path)?;
    }
    match path.kind {
        WordKind::Get => Ok(value),
        _ => dispatch(vm, cursor, value),
    }
}

/// One traversal step: dictionary field, list index, or dispatch-table
/// alternate selection.
fn path_field(value: &Value, segment: &str, path: &PathExpr) -> Result<Value, SorrelError> {
    match value {
        Value::Dict(dict) => dict
            .read()
            .unwrap()
            .get(segment)
            .ok_or_else(|| SorrelError::nothing_to_read(path.display())),
        Value::List(items) => {
            let index: usize = segment
                .parse()
                .map_err(|_| SorrelError::nothing_to_read(path.display()))?;
            items
                .get(index)
                .cloned()
                .ok_or_else(|| SorrelError::nothing_to_read(path.display()))
        }
        Value::Proc(proc) => {
            let variant = proc
                .variant(segment)
                .ok_or_else(|| SorrelError::UnknownRefinement(segment.to_string()))?;
            Ok(Value::Proc(crate::ast::ProcValue::new(variant.clone())))
        }
        other => Err(SorrelError::type_mismatch(
            "dict, list or proc",
            other.type_name(),
        )),
    }
}

/// `a/b/c: value` — traverse to the next-to-last field and assign into
/// the final dictionary key.
fn set_path(
    vm: &mut Vm,
    cursor: &mut Cursor<'_>,
    path: &PathExpr,
    binding: &crate::bind::Binding,
) -> Result<Value, SorrelError> {
    let assigned = cursor.next(vm)?;
    let mut value = binding
        .get(vm, path.head())?
        .ok_or_else(|| SorrelError::nothing_to_read(path.display()))?;
    let (last, middle) = path.segments[1..]
        .split_last()
        .ok_or_else(|| SorrelError::runtime("path with a single segment"))?;
    for segment in middle {
        value = path_field(&value, segment, path)?;
    }
    match value {
        Value::Dict(dict) => {
            dict.write().unwrap().set(last, assigned.clone());
            Ok(assigned)
        }
        other => Err(SorrelError::type_mismatch("dict", other.type_name())),
    }
}

/// Value-shape dispatch: host bridges pull their declared argument count,
/// dispatch tables run their default variant with the caller's cursor,
/// everything else is already the answer.
fn dispatch(vm: &mut Vm, cursor: &mut Cursor<'_>, value: Value) -> Result<Value, SorrelError> {
    match value {
        Value::Native(native) => {
            let mut args = Vec::with_capacity(native.arity);
            for _ in 0..native.arity {
                args.push(cursor.next(vm)?);
            }
            native.call(vm, args)
        }
        Value::Proc(proc) => {
            let variant = proc.default.clone();
            variant(vm, cursor)
        }
        other => Ok(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::NativeFn;
    use crate::parser::parse;

    fn vm_with_add() -> Vm {
        let vm = Vm::new();
        let add = NativeFn::new("add", 2, |_vm, args| {
            Ok(Value::Int(args[0].as_int()? + args[1].as_int()?))
        });
        vm.dictionary
            .write()
            .unwrap()
            .set("add", Value::Native(add));
        vm
    }

    fn run(vm: &mut Vm, source: &str) -> Result<Value, SorrelError> {
        let mut code = parse(source).unwrap();
        vm.bind(&mut code);
        vm.eval(&code)
    }

    #[test]
    fn natives_pull_their_arity() {
        let mut vm = vm_with_add();
        assert_eq!(run(&mut vm, "add 10 20").unwrap(), Value::Int(30));
        assert_eq!(run(&mut vm, "add add 1 2 3").unwrap(), Value::Int(6));
    }

    #[test]
    fn set_words_assign_and_return() {
        let mut vm = vm_with_add();
        assert_eq!(run(&mut vm, "x: add 1 2").unwrap(), Value::Int(3));
        assert_eq!(run(&mut vm, "x").unwrap(), Value::Int(3));
    }

    #[test]
    fn get_word_fetches_without_invoking() {
        let mut vm = vm_with_add();
        let fetched = run(&mut vm, ":add").unwrap();
        assert!(matches!(fetched, Value::Native(_)));
    }

    #[test]
    fn unbound_word_is_an_error() {
        let mut vm = Vm::new();
        let mut code = parse("mystery").unwrap();
        // No binding attached at all.
        let err = vm.eval(&code).unwrap_err();
        assert_eq!(err, SorrelError::unbound("mystery"));
        // Bound to the dictionary but never assigned.
        vm.bind(&mut code);
        let err = vm.eval(&code).unwrap_err();
        assert_eq!(err, SorrelError::nothing_to_read("mystery"));
    }

    #[test]
    fn brackets_evaluate_inline() {
        let mut vm = vm_with_add();
        assert_eq!(run(&mut vm, "add (add 1 2) 4").unwrap(), Value::Int(7));
    }

    #[test]
    fn blocks_stay_unevaluated() {
        let mut vm = vm_with_add();
        let value = run(&mut vm, "[add 1 2]").unwrap();
        match value {
            Value::Block(code) => assert_eq!(code.len(), 3),
            other => panic!("expected block, got {:?}", other),
        }
    }

    #[test]
    fn dict_paths_read_fields() {
        let mut vm = vm_with_add();
        let inner = crate::dict::new_ref(Dict::new());
        inner.write().unwrap().set("data", Value::Int(41));
        vm.dictionary
            .write()
            .unwrap()
            .set("core", Value::Dict(inner));
        assert_eq!(run(&mut vm, "add 1 core/data").unwrap(), Value::Int(42));
        assert!(matches!(
            run(&mut vm, "core/missing"),
            Err(SorrelError::NothingToRead(_))
        ));
    }

    #[test]
    fn list_paths_index_numerically() {
        let mut vm = Vm::new();
        let items: im::Vector<Value> =
            vec![Value::Int(5), Value::Int(6)].into_iter().collect();
        vm.dictionary
            .write()
            .unwrap()
            .set("xs", Value::List(items));
        assert_eq!(run(&mut vm, "xs/1").unwrap(), Value::Int(6));
        assert!(run(&mut vm, "xs/7").is_err());
    }
}
