use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;

use crate::ast::{Code, CodeItem, NativeFn, ProcValue, Value, Variant, WordKind};
use crate::bind::{bind, Binding, FrameRef, InputCellRef, SlotResolver};
use crate::dict::{self, Dict};
use crate::error::SorrelError;
use crate::parser::parse;
use crate::stream::{
    collect_result, pipe, Completion, Publisher, ResumeFn, Subscriber, SuspendHandle,
};
use crate::vm::{Cursor, Vm};

/// Bootstrap program: wires the host bridges under `core` into the global
/// dictionary and defines the streaming conveniences on top of them.
const BOOT_SOURCE: &str = r#"
add: native [a b] :core/add
sub: native [a b] :core/sub
mul: native [a b] :core/mul
gt: native [a b] :core/gt
eq: native [a b] :core/eq
+: native-infix [a b] :core/add
-: native-infix [a b] :core/sub
*: native-infix [a b] :core/mul
>: native-infix [a b] :core/gt
=: native-infix [a b] :core/eq
|: native-infix [left right] :core/pipe
fn: native [params body] :core/fn
proc: native [params body] :core/proc
either: native [cond then else] :core/either
loop: native [count body] :core/loop
do: native [code] :core/do
throw: native [reason] :core/throw
print: native [value] :core/print
split: native [text sep] :core/split
pipe: native [left right] :core/pipe
write: proc [value /out] [out value]
passthrough: proc [/in /out] [out in]
"#;

static BOOT: Lazy<Code> = Lazy::new(|| {
    parse(BOOT_SOURCE).expect("bootstrap program parses")
});

/// Install the host bridges and run the bootstrap program against the
/// VM's global dictionary.
pub fn boot(vm: &mut Vm) -> Result<(), SorrelError> {
    register_core(vm);
    let mut code = BOOT.clone();
    vm.bind(&mut code);
    vm.eval(&code)?;
    Ok(())
}

fn register_core(vm: &Vm) {
    let core = dict::new_ref(Dict::new());
    {
        let mut c = core.write().unwrap();
        c.set("add", Value::Native(NativeFn::new("add", 2, native_add)));
        c.set("sub", Value::Native(NativeFn::new("sub", 2, native_sub)));
        c.set("mul", Value::Native(NativeFn::new("mul", 2, native_mul)));
        c.set("gt", Value::Native(NativeFn::new("gt", 2, native_gt)));
        c.set("eq", Value::Native(NativeFn::new("eq", 2, native_eq)));
        c.set(
            "either",
            Value::Native(NativeFn::new("either", 3, native_either)),
        );
        c.set("loop", Value::Native(NativeFn::new("loop", 2, native_loop)));
        c.set("do", Value::Native(NativeFn::new("do", 1, native_do)));
        c.set(
            "throw",
            Value::Native(NativeFn::new("throw", 1, native_throw)),
        );
        c.set(
            "print",
            Value::Native(NativeFn::new("print", 1, native_print)),
        );
        c.set(
            "split",
            Value::Native(NativeFn::new("split", 2, native_split)),
        );
        c.set("pipe", Value::Native(NativeFn::new("pipe", 2, native_pipe)));
        c.set("fn", Value::Native(NativeFn::new("fn", 2, native_fn)));
        c.set("proc", Value::Native(NativeFn::new("proc", 2, native_proc)));
    }
    let mut dict = vm.dictionary.write().unwrap();
    dict.set("core", Value::Dict(core));
    dict.set(
        "native",
        Value::Proc(ProcValue::new(Arc::new(construct_native))),
    );
    dict.set(
        "native-infix",
        Value::Proc(ProcValue::new(Arc::new(construct_native_infix))),
    );
}

// --- host arithmetic and comparison -------------------------------------

fn native_add(_vm: &mut Vm, args: Vec<Value>) -> Result<Value, SorrelError> {
    match (&args[0], &args[1]) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a + b)),
        (Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{}{}", a, b))),
        (a, b) => Err(SorrelError::type_mismatch(
            "two integers or two strings",
            format!("{} and {}", a.type_name(), b.type_name()),
        )),
    }
}

fn native_sub(_vm: &mut Vm, args: Vec<Value>) -> Result<Value, SorrelError> {
    Ok(Value::Int(args[0].as_int()? - args[1].as_int()?))
}

fn native_mul(_vm: &mut Vm, args: Vec<Value>) -> Result<Value, SorrelError> {
    Ok(Value::Int(args[0].as_int()? * args[1].as_int()?))
}

fn native_gt(_vm: &mut Vm, args: Vec<Value>) -> Result<Value, SorrelError> {
    Ok(Value::Bool(args[0].as_int()? > args[1].as_int()?))
}

fn native_eq(_vm: &mut Vm, args: Vec<Value>) -> Result<Value, SorrelError> {
    Ok(Value::Bool(args[0] == args[1]))
}

// --- control flow --------------------------------------------------------

fn native_either(vm: &mut Vm, args: Vec<Value>) -> Result<Value, SorrelError> {
    let branch = if args[0].is_truthy() { &args[1] } else { &args[2] };
    vm.eval(branch.as_block()?)
}

fn native_loop(vm: &mut Vm, args: Vec<Value>) -> Result<Value, SorrelError> {
    let count = args[0].as_int()?;
    let body = args[1].as_block()?;
    let mut result = Value::None;
    for _ in 0..count {
        result = vm.eval(body)?;
    }
    Ok(result)
}

fn native_do(vm: &mut Vm, mut args: Vec<Value>) -> Result<Value, SorrelError> {
    match args.remove(0) {
        Value::Block(code) => vm.eval(&code),
        Value::Str(source) => {
            let mut code = parse(&source)?;
            vm.bind(&mut code);
            vm.eval(&code)
        }
        other => Ok(other),
    }
}

fn native_throw(_vm: &mut Vm, mut args: Vec<Value>) -> Result<Value, SorrelError> {
    Err(SorrelError::thrown(args.remove(0).to_string()))
}

fn native_print(vm: &mut Vm, mut args: Vec<Value>) -> Result<Value, SorrelError> {
    let value = collect_result(vm, args.remove(0))?;
    println!("{}", value);
    Ok(value)
}

fn native_split(_vm: &mut Vm, args: Vec<Value>) -> Result<Value, SorrelError> {
    let text = args[0].as_str()?;
    let sep = args[1].as_str()?;
    let pieces = text
        .split(sep)
        .map(|piece| Value::Str(piece.to_string()))
        .collect();
    Ok(Value::List(pieces))
}

fn native_pipe(vm: &mut Vm, mut args: Vec<Value>) -> Result<Value, SorrelError> {
    let right = args.remove(1);
    let left = args.remove(0);
    let (Value::Suspend(left), Value::Suspend(right)) = (left, right) else {
        return Err(SorrelError::type_mismatch("suspend", "other"));
    };
    Ok(Value::Suspend(pipe(vm, left, right)?))
}

// --- `native` / `native-infix` constructors ------------------------------

fn host_bridge(value: Value) -> Result<Arc<NativeFn>, SorrelError> {
    match value {
        Value::Native(native) => Ok(native),
        other => Err(SorrelError::type_mismatch("native", other.type_name())),
    }
}

fn param_count(params: &Value) -> Result<usize, SorrelError> {
    Ok(params
        .as_block()?
        .iter()
        .filter(|item| matches!(item, CodeItem::Word(_)))
        .count())
}

/// `native [params] :core/host` wires a host bridge under a word; direct
/// word dispatch pulls one evaluated argument per declared parameter.
fn construct_native(vm: &mut Vm, cursor: &mut Cursor<'_>) -> Result<Value, SorrelError> {
    let params = cursor.next(vm)?;
    let arity = param_count(&params)?;
    let host = host_bridge(cursor.next(vm)?)?;
    let name = host.name.clone();
    Ok(Value::Native(NativeFn::new(name, arity, move |vm, args| {
        host.call(vm, args)
    })))
}

/// `native-infix [a b] :core/host`: the resulting operator takes its left
/// operand from the last-result register and pulls one non-infix step for
/// the right, giving strict left-to-right evaluation.
fn construct_native_infix(vm: &mut Vm, cursor: &mut Cursor<'_>) -> Result<Value, SorrelError> {
    let _params = cursor.next(vm)?;
    let host = host_bridge(cursor.next(vm)?)?;
    Ok(Value::Proc(ProcValue::new(Arc::new(
        move |vm: &mut Vm, cursor: &mut Cursor<'_>| {
            let lhs = vm.result.clone();
            let rhs = cursor.next_no_infix(vm)?;
            host.call(vm, vec![lhs, rhs])
        },
    ))))
}

// --- `fn`: stack closures -------------------------------------------------

struct FnParams {
    defaults: Vec<String>,
    locals: Vec<String>,
    alternates: Vec<(String, Vec<String>)>,
}

fn partition_fn_params(code: &[CodeItem]) -> Result<FnParams, SorrelError> {
    #[derive(Clone, Copy)]
    enum Target {
        Defaults,
        Locals,
        Alternate(usize),
    }
    let mut params = FnParams {
        defaults: Vec::new(),
        locals: Vec::new(),
        alternates: Vec::new(),
    };
    let mut target = Target::Defaults;
    for item in code {
        match item {
            CodeItem::Word(word) if word.kind == WordKind::Norm => {
                let name = word.sym.clone();
                match target {
                    Target::Defaults => params.defaults.push(name),
                    Target::Locals => params.locals.push(name),
                    Target::Alternate(k) => params.alternates[k].1.push(name),
                }
            }
            CodeItem::Refinement(id) if id == "local" => target = Target::Locals,
            CodeItem::Refinement(id) => {
                params.alternates.push((id.clone(), Vec::new()));
                target = Target::Alternate(params.alternates.len() - 1);
            }
            other => {
                return Err(SorrelError::runtime(format!(
                    "unexpected item in parameter list: {}",
                    other
                )))
            }
        }
    }
    Ok(params)
}

/// Push one activation region on the shared stack, run the body, and
/// drop the region on every exit path. Layout from the base upwards:
/// alternate arguments (when an alternate was chosen), default
/// arguments, locals, then one chosen-flag per alternate.
fn run_fn_body(
    vm: &mut Vm,
    body: &[CodeItem],
    alt_args: Vec<Value>,
    defaults: Vec<Value>,
    locals: usize,
    alternates: usize,
    chosen: Option<usize>,
) -> Result<Value, SorrelError> {
    let base = vm.stack.len();
    vm.stack.extend(alt_args);
    vm.stack.extend(defaults);
    vm.stack
        .extend(std::iter::repeat(Value::None).take(locals));
    for k in 0..alternates {
        vm.stack.push(Value::Bool(chosen == Some(k)));
    }
    let outcome = vm.eval(body);
    vm.stack.truncate(base);
    outcome
}

/// Construct a closure over the shared value stack. Parameter words in
/// the body are rebound to stack-relative slots at construction; the
/// offsets re-base against the stack top on every call.
fn native_fn(_vm: &mut Vm, args: Vec<Value>) -> Result<Value, SorrelError> {
    let params = partition_fn_params(args[0].as_block()?)?;
    let body = args[1].as_block()?.clone();

    let d = params.defaults.len();
    let l = params.locals.len();
    let a = params.alternates.len();
    let stack_size = (d + l + a) as isize;

    let mut slots: Vec<(String, Binding)> = Vec::new();
    for (i, name) in params.defaults.iter().enumerate() {
        slots.push((name.clone(), Binding::StackRel(i as isize - stack_size)));
    }
    for (i, name) in params.locals.iter().enumerate() {
        slots.push((
            name.clone(),
            Binding::StackRel((i + d) as isize - stack_size),
        ));
    }
    for (k, (flag, alt_params)) in params.alternates.iter().enumerate() {
        slots.push((
            flag.clone(),
            Binding::StackRel((k + d + l) as isize - stack_size),
        ));
        let len = alt_params.len() as isize;
        for (j, name) in alt_params.iter().enumerate() {
            slots.push((
                name.clone(),
                Binding::StackRel(j as isize - stack_size - len),
            ));
        }
    }

    let mut body = body;
    bind(&mut body, &SlotResolver::new(slots));
    let body = Arc::new(body);

    let default: Variant = {
        let body = body.clone();
        Arc::new(move |vm: &mut Vm, cursor: &mut Cursor<'_>| {
            let mut defaults = Vec::with_capacity(d);
            for _ in 0..d {
                defaults.push(cursor.next(vm)?);
            }
            run_fn_body(vm, &body, Vec::new(), defaults, l, a, None)
        })
    };
    let mut proc = ProcValue::new(default);
    for (k, (flag, alt_params)) in params.alternates.iter().enumerate() {
        let body = body.clone();
        let alt_len = alt_params.len();
        let variant: Variant = Arc::new(move |vm: &mut Vm, cursor: &mut Cursor<'_>| {
            let mut defaults = Vec::with_capacity(d);
            for _ in 0..d {
                defaults.push(cursor.next(vm)?);
            }
            let mut alt_args = Vec::with_capacity(alt_len);
            for _ in 0..alt_len {
                alt_args.push(cursor.next(vm)?);
            }
            run_fn_body(vm, &body, alt_args, defaults, l, a, Some(k))
        });
        proc = proc.with_variant(flag.clone(), variant);
    }
    Ok(Value::Proc(proc))
}

// --- `proc`: streaming procedures ----------------------------------------

struct ProcParams {
    defaults: Vec<String>,
    locals: Vec<String>,
    has_in: bool,
}

fn partition_proc_params(code: &[CodeItem]) -> Result<ProcParams, SorrelError> {
    let mut params = ProcParams {
        defaults: Vec::new(),
        locals: Vec::new(),
        has_in: false,
    };
    let mut in_locals = false;
    for item in code {
        match item {
            CodeItem::Word(word) if word.kind == WordKind::Norm => {
                let name = word.sym.clone();
                if in_locals {
                    params.locals.push(name);
                } else {
                    params.defaults.push(name);
                }
            }
            CodeItem::Refinement(id) => match id.as_str() {
                "in" => params.has_in = true,
                "out" => {}
                "local" => in_locals = true,
                other => return Err(SorrelError::UnknownRefinement(other.to_string())),
            },
            other => {
                return Err(SorrelError::runtime(format!(
                    "unexpected item in parameter list: {}",
                    other
                )))
            }
        }
    }
    Ok(params)
}

/// Runs a reactive body once per input value; completes the downstream
/// channel and the procedure's completion when the upstream finishes.
struct BodySubscriber {
    cell: InputCellRef,
    body: Arc<Code>,
    out: Publisher,
    completion: Completion,
}

impl Subscriber for BodySubscriber {
    fn on_next(&self, vm: &mut Vm, value: Value) -> Result<(), SorrelError> {
        *self.cell.lock().unwrap() = Some(value);
        match vm.eval(&self.body) {
            Ok(_) => Ok(()),
            Err(err) => {
                self.completion.resolve(Err(err.clone()));
                Err(err)
            }
        }
    }

    fn on_complete(&self, vm: &mut Vm, result: Value) -> Result<(), SorrelError> {
        self.out.done(vm, result.clone())?;
        self.completion.resolve(Ok(result));
        Ok(())
    }
}

/// Construct a streaming procedure. Calling the resulting value pulls
/// its default arguments, instantiates a heap frame plus channels, and
/// returns a suspend handle; the body does not run until the handle is
/// started.
fn native_proc(_vm: &mut Vm, args: Vec<Value>) -> Result<Value, SorrelError> {
    let params = Arc::new(partition_proc_params(args[0].as_block()?)?);
    let template = Arc::new(args[1].as_block()?.clone());

    let default: Variant = Arc::new(move |vm: &mut Vm, cursor: &mut Cursor<'_>| {
        let mut defaults = Vec::with_capacity(params.defaults.len());
        for _ in 0..params.defaults.len() {
            defaults.push(cursor.next(vm)?);
        }
        Ok(Value::Suspend(instantiate_proc(
            &params, &template, defaults,
        )))
    });
    Ok(Value::Proc(ProcValue::new(default)))
}

fn instantiate_proc(
    params: &ProcParams,
    template: &Arc<Code>,
    defaults: Vec<Value>,
) -> SuspendHandle {
    let mut frame_values = defaults;
    frame_values.extend(std::iter::repeat(Value::None).take(params.locals.len()));
    let frame: FrameRef = Arc::new(Mutex::new(frame_values));

    let out = Publisher::new();
    let cell: InputCellRef = Arc::new(Mutex::new(None));
    let input = params.has_in.then(Publisher::new);

    let mut slots: Vec<(String, Binding)> = vec![
        ("in".to_string(), Binding::Input(cell.clone())),
        ("out".to_string(), Binding::Emit(out.clone())),
        ("done".to_string(), Binding::Close(out.clone())),
    ];
    for (i, name) in params
        .defaults
        .iter()
        .chain(params.locals.iter())
        .enumerate()
    {
        slots.push((name.clone(), Binding::Frame(frame.clone(), i)));
    }

    let mut body = (**template).clone();
    bind(&mut body, &SlotResolver::new(slots));
    let body = Arc::new(body);

    let resume: ResumeFn = match input.clone() {
        Some(input_channel) => {
            let out = out.clone();
            Box::new(move |vm: &mut Vm, completion: &Completion| {
                input_channel.subscribe(
                    vm,
                    Arc::new(BodySubscriber {
                        cell,
                        body,
                        out,
                        completion: completion.clone(),
                    }),
                )
            })
        }
        None => {
            let out = out.clone();
            Box::new(move |vm: &mut Vm, completion: &Completion| {
                let result = vm.eval(&body)?;
                out.done(vm, result.clone())?;
                completion.resolve(Ok(result));
                Ok(())
            })
        }
    };

    SuspendHandle::new(out, input, resume)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fn_params_partition_into_groups() {
        let code = parse("x y /local t /double z /triple").unwrap();
        let params = partition_fn_params(&code).unwrap();
        assert_eq!(params.defaults, vec!["x", "y"]);
        assert_eq!(params.locals, vec!["t"]);
        assert_eq!(params.alternates.len(), 2);
        assert_eq!(params.alternates[0].0, "double");
        assert_eq!(params.alternates[0].1, vec!["z"]);
        assert_eq!(params.alternates[1].0, "triple");
        assert!(params.alternates[1].1.is_empty());
    }

    #[test]
    fn proc_params_reject_unknown_refinements() {
        let code = parse("value /out /limit").unwrap();
        assert!(matches!(
            partition_proc_params(&code),
            Err(SorrelError::UnknownRefinement(id)) if id == "limit"
        ));
    }

    #[test]
    fn boot_installs_the_primitives() {
        let mut vm = Vm::new();
        boot(&mut vm).unwrap();
        let dict = vm.dictionary.read().unwrap();
        for word in ["add", "+", "fn", "proc", "either", "loop", "write"] {
            assert!(dict.contains(word), "missing {}", word);
        }
    }
}
