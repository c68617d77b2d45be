use std::fmt;
use std::sync::Arc;

use im::Vector;

use crate::bind::Binding;
use crate::dict::DictRef;
use crate::error::SorrelError;
use crate::stream::SuspendHandle;
use crate::vm::{Cursor, Vm};

/// Characters whose presence at the start of a `Norm` word mark it as an
/// infix operator for the engine's left-to-right continuation rule.
pub const INFIX_CHARS: &str = "+-|*>=";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WordKind {
    /// Evaluate: fetch the bound value and dispatch it.
    Norm,
    /// Fetch without invoking.
    Get,
    /// Assign the next evaluated value.
    Set,
    /// Reserved literal-word form.
    Quote,
}

pub type Code = Vec<CodeItem>;

/// One node of a parsed program. Items are produced unbound by the parser;
/// the binder attaches at most one `Binding` per `Word`/`Path`.
#[derive(Clone, Debug, PartialEq)]
pub enum CodeItem {
    Word(Word),
    Path(PathExpr),
    Const(Value),
    Block(Code),
    Brackets(Code),
    Refinement(String),
}

#[derive(Clone, Debug)]
pub struct Word {
    pub kind: WordKind,
    pub sym: String,
    pub infix: bool,
    pub binding: Option<Binding>,
}

impl Word {
    pub fn new(kind: WordKind, sym: impl Into<String>) -> Self {
        let sym = sym.into();
        let infix = kind == WordKind::Norm
            && sym.chars().next().is_some_and(|c| INFIX_CHARS.contains(c));
        Self {
            kind,
            sym,
            infix,
            binding: None,
        }
    }
}

// Structural equality ignores attached bindings.
impl PartialEq for Word {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.sym == other.sym
    }
}

#[derive(Clone, Debug)]
pub struct PathExpr {
    pub kind: WordKind,
    pub segments: Vec<String>,
    pub binding: Option<Binding>,
}

impl PathExpr {
    pub fn new(kind: WordKind, segments: Vec<String>) -> Self {
        Self {
            kind,
            segments,
            binding: None,
        }
    }

    pub fn head(&self) -> &str {
        &self.segments[0]
    }

    pub fn display(&self) -> String {
        self.segments.join("/")
    }
}

impl PartialEq for PathExpr {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.segments == other.segments
    }
}

/// Host bridge function: applied to a vector of already-evaluated values.
/// The `native` boot construct wraps these into cursor-driven dispatch
/// tables; `arity` is how many values direct word dispatch pulls.
pub struct NativeFn {
    pub name: String,
    pub arity: usize,
    func: Box<dyn Fn(&mut Vm, Vec<Value>) -> Result<Value, SorrelError> + Send + Sync>,
}

impl NativeFn {
    pub fn new<F>(name: impl Into<String>, arity: usize, func: F) -> Arc<Self>
    where
        F: Fn(&mut Vm, Vec<Value>) -> Result<Value, SorrelError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            name: name.into(),
            arity,
            func: Box::new(func),
        })
    }

    pub fn call(&self, vm: &mut Vm, args: Vec<Value>) -> Result<Value, SorrelError> {
        (self.func)(vm, args)
    }
}

impl fmt::Debug for NativeFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeFn({}/{})", self.name, self.arity)
    }
}

/// A dispatch-table variant: pulls its own arguments from the caller's
/// cursor and produces a value.
pub type Variant =
    Arc<dyn Fn(&mut Vm, &mut Cursor<'_>) -> Result<Value, SorrelError> + Send + Sync>;

/// Callable value with a `default` variant and zero or more alternates
/// keyed by refinement identifier. The caller chooses the alternate via a
/// path (`name/alt`); at most one alternate executes per call.
#[derive(Clone)]
pub struct ProcValue {
    pub default: Variant,
    variants: Vec<(String, Variant)>,
}

impl ProcValue {
    pub fn new(default: Variant) -> Self {
        Self {
            default,
            variants: Vec::new(),
        }
    }

    pub fn with_variant(mut self, name: impl Into<String>, variant: Variant) -> Self {
        self.variants.push((name.into(), variant));
        self
    }

    pub fn variant(&self, name: &str) -> Option<&Variant> {
        self.variants
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }
}

impl fmt::Debug for ProcValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.variants.iter().map(|(n, _)| n.as_str()).collect();
        write!(f, "ProcValue {{ variants: {:?} }}", names)
    }
}

#[derive(Clone, Debug)]
pub enum Value {
    /// Explicit absence; also the null marker forwarded through pipes.
    None,
    Int(i64),
    Str(String),
    Bool(bool),
    /// Unevaluated code as data.
    Block(Code),
    List(Vector<Value>),
    Dict(DictRef),
    Refinement(String),
    Native(Arc<NativeFn>),
    Proc(ProcValue),
    Suspend(SuspendHandle),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "none",
            Value::Int(_) => "integer",
            Value::Str(_) => "string",
            Value::Bool(_) => "logic",
            Value::Block(_) => "block",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
            Value::Refinement(_) => "refinement",
            Value::Native(_) => "native",
            Value::Proc(_) => "proc",
            Value::Suspend(_) => "suspend",
        }
    }

    pub fn is_truthy(&self) -> bool {
        !matches!(
            self,
            Value::None | Value::Bool(false) | Value::Int(0)
        ) && !matches!(self, Value::Str(s) if s.is_empty())
    }

    pub fn as_int(&self) -> Result<i64, SorrelError> {
        match self {
            Value::Int(n) => Ok(*n),
            other => Err(SorrelError::type_mismatch("integer", other.type_name())),
        }
    }

    pub fn as_str(&self) -> Result<&str, SorrelError> {
        match self {
            Value::Str(s) => Ok(s),
            other => Err(SorrelError::type_mismatch("string", other.type_name())),
        }
    }

    pub fn as_block(&self) -> Result<&Code, SorrelError> {
        match self {
            Value::Block(code) => Ok(code),
            other => Err(SorrelError::type_mismatch("block", other.type_name())),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Block(a), Value::Block(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Refinement(a), Value::Refinement(b)) => a == b,
            (Value::Dict(a), Value::Dict(b)) => Arc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => Arc::ptr_eq(a, b),
            (Value::Proc(a), Value::Proc(b)) => Arc::ptr_eq(&a.default, &b.default),
            (Value::Suspend(a), Value::Suspend(b)) => a.same_handle(b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "none"),
            Value::Int(n) => write!(f, "{}", n),
            Value::Str(s) => write!(f, "{}", s),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Block(code) => {
                write!(f, "[")?;
                for (i, item) in code.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Dict(dict) => {
                let guard = dict.read().unwrap();
                write!(f, "#[")?;
                for (i, (k, v)) in guard.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "]")
            }
            Value::Refinement(id) => write!(f, "/{}", id),
            Value::Native(n) => write!(f, "native:{}", n.name),
            Value::Proc(_) => write!(f, "proc"),
            Value::Suspend(_) => write!(f, "suspend"),
        }
    }
}

impl fmt::Display for CodeItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodeItem::Word(w) => match w.kind {
                WordKind::Norm => write!(f, "{}", w.sym),
                WordKind::Get => write!(f, ":{}", w.sym),
                WordKind::Set => write!(f, "{}:", w.sym),
                WordKind::Quote => write!(f, "'{}", w.sym),
            },
            CodeItem::Path(p) => match p.kind {
                WordKind::Get => write!(f, ":{}", p.display()),
                _ => write!(f, "{}", p.display()),
            },
            CodeItem::Const(Value::Str(s)) => write!(f, "\"{}\"", s),
            CodeItem::Const(v) => write!(f, "{}", v),
            CodeItem::Block(code) => write!(f, "{}", Value::Block(code.clone())),
            CodeItem::Brackets(code) => {
                write!(f, "(")?;
                for (i, item) in code.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, ")")
            }
            CodeItem::Refinement(id) => write!(f, "/{}", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infix_flag_requires_norm_kind() {
        assert!(Word::new(WordKind::Norm, "+").infix);
        assert!(Word::new(WordKind::Norm, ">").infix);
        assert!(Word::new(WordKind::Norm, "|").infix);
        assert!(!Word::new(WordKind::Set, "+").infix);
        assert!(!Word::new(WordKind::Get, "=").infix);
        assert!(!Word::new(WordKind::Norm, "add").infix);
    }

    #[test]
    fn truthiness_follows_host_conventions() {
        assert!(!Value::None.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(!Value::Str(String::new()).is_truthy());
        assert!(Value::Int(-1).is_truthy());
        assert!(Value::Str("x".into()).is_truthy());
        assert!(Value::Block(vec![]).is_truthy());
    }
}
