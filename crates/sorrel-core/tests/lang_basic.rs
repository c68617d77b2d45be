use sorrel_core::ast::Value;
use sorrel_core::error::SorrelError;
use sorrel_core::eval_source;

#[test]
fn prefix_arithmetic() {
    assert_eq!(eval_source("add 10 20").expect("add"), Value::Int(30));
    assert_eq!(eval_source("add add 1 2 3").expect("nested add"), Value::Int(6));
    assert_eq!(eval_source("sub 10 4").expect("sub"), Value::Int(6));
    assert_eq!(eval_source("mul 6 7").expect("mul"), Value::Int(42));
}

#[test]
fn infix_is_strictly_left_to_right() {
    assert_eq!(eval_source("1 + 2 * 3").expect("no precedence"), Value::Int(9));
    assert_eq!(eval_source("1 + (2 * 3)").expect("grouped"), Value::Int(7));
    assert_eq!(eval_source("10 - 3 - 2").expect("left assoc"), Value::Int(5));
}

#[test]
fn add_concatenates_strings() {
    assert_eq!(
        eval_source("add \"foo\" \"bar\"").expect("concat"),
        Value::Str("foobar".into())
    );
    assert_eq!(
        eval_source("\"a\" + \"b\"").expect("infix concat"),
        Value::Str("ab".into())
    );
    assert!(matches!(
        eval_source("add 1 \"x\""),
        Err(SorrelError::TypeMismatch { .. })
    ));
}

#[test]
fn comparison_and_equality() {
    assert_eq!(eval_source("gt 2 1").expect("gt"), Value::Bool(true));
    assert_eq!(eval_source("gt 1 2").expect("gt"), Value::Bool(false));
    assert_eq!(eval_source("3 > 2").expect("infix gt"), Value::Bool(true));
    assert_eq!(eval_source("eq 3 3").expect("eq"), Value::Bool(true));
    assert_eq!(
        eval_source("eq \"a\" \"b\"").expect("eq strings"),
        Value::Bool(false)
    );
}

#[test]
fn either_follows_truthiness() {
    assert_eq!(
        eval_source("either gt 2 1 [5] [6]").expect("either"),
        Value::Int(5)
    );
    assert_eq!(eval_source("either 0 [1] [2]").expect("zero"), Value::Int(2));
    assert_eq!(
        eval_source("either \"\" [1] [2]").expect("empty string"),
        Value::Int(2)
    );
    assert_eq!(
        eval_source("either \"x\" [1] [2]").expect("non-empty"),
        Value::Int(1)
    );
}

#[test]
fn closures_take_stack_arguments() {
    assert_eq!(
        eval_source("f: fn [n] [add n 10] f 5").expect("call"),
        Value::Int(15)
    );
    assert_eq!(
        eval_source("double: fn [x] [x * 2] double double 5").expect("nested"),
        Value::Int(20)
    );
}

#[test]
fn closures_recurse() {
    let src = "
      fact: fn [n] [either gt n 1 [n * (fact n - 1)] [1]]
      fact 5
    ";
    assert_eq!(eval_source(src).expect("fact"), Value::Int(120));
}

#[test]
fn locals_live_on_the_stack() {
    let src = "
      addup: fn [n /local t] [t: n + 10 t]
      addup 5
    ";
    assert_eq!(eval_source(src).expect("local"), Value::Int(15));
}

#[test]
fn local_shadowing_leaves_outer_binding_unchanged() {
    let src = "
      x: 1
      f: fn [n /local x] [x: n + 10 x]
      f 5
    ";
    assert_eq!(eval_source(src).expect("call"), Value::Int(15));
    assert_eq!(
        eval_source(&format!("{} x", src)).expect("outer x"),
        Value::Int(1)
    );
}

#[test]
fn loop_repeats_and_returns_last_value() {
    let src = "
      total: 0
      i: 0
      loop 100 [i: i + 1 total: total + i]
      total
    ";
    assert_eq!(eval_source(src).expect("sum"), Value::Int(5050));
    assert_eq!(eval_source("loop 0 [1]").expect("empty loop"), Value::None);
}

#[test]
fn iterative_fibonacci() {
    let src = "
      fib: fn [n /local a b t] [
        a: 0 b: 1
        loop n [t: b b: a + b a: t]
        a
      ]
      fib 20
    ";
    assert_eq!(eval_source(src).expect("fib"), Value::Int(6765));
}

#[test]
fn alternates_select_by_path() {
    let src = "
      scale: fn [x /double /triple] [
        either double [x * 2] [either triple [x * 3] [x]]
      ]
    ";
    assert_eq!(
        eval_source(&format!("{} scale 7", src)).expect("default"),
        Value::Int(7)
    );
    assert_eq!(
        eval_source(&format!("{} scale/double 20", src)).expect("double"),
        Value::Int(40)
    );
    assert_eq!(
        eval_source(&format!("{} scale/triple 7", src)).expect("triple"),
        Value::Int(21)
    );
}

#[test]
fn alternates_take_their_own_arguments() {
    let src = "
      pad: fn [s /with c] [either with [add add c s c] [s]]
    ";
    assert_eq!(
        eval_source(&format!("{} pad \"x\"", src)).expect("default"),
        Value::Str("x".into())
    );
    assert_eq!(
        eval_source(&format!("{} pad/with \"x\" \"-\"", src)).expect("with"),
        Value::Str("-x-".into())
    );
}

#[test]
fn unknown_alternate_is_an_error() {
    assert!(matches!(
        eval_source("f: fn [x] [x] f/loud 1"),
        Err(SorrelError::UnknownRefinement(id)) if id == "loud"
    ));
}

#[test]
fn do_evaluates_blocks_and_strings() {
    assert_eq!(eval_source("do [add 4 6]").expect("block"), Value::Int(10));
    assert_eq!(
        eval_source("do \"add 4 6\"").expect("string"),
        Value::Int(10)
    );
    assert_eq!(eval_source("do 7").expect("plain value"), Value::Int(7));
}

#[test]
fn blocks_are_data_until_done() {
    let value = eval_source("[add 4 6]").expect("block literal");
    assert!(matches!(value, Value::Block(code) if code.len() == 3));
}

#[test]
fn throw_raises() {
    assert!(matches!(
        eval_source("throw \"boom\""),
        Err(SorrelError::Thrown(msg)) if msg == "boom"
    ));
}

#[test]
fn split_produces_an_indexable_list() {
    let value = eval_source("split \"a,b,c\" \",\"").expect("split");
    match &value {
        Value::List(items) => {
            assert_eq!(items.len(), 3);
            assert_eq!(items[0], Value::Str("a".into()));
        }
        other => panic!("expected list, got {:?}", other),
    }
    assert_eq!(
        eval_source("parts: split \"a,b,c\" \",\" parts/1").expect("index"),
        Value::Str("b".into())
    );
}

#[test]
fn reading_an_unassigned_word_fails() {
    assert!(matches!(
        eval_source("mystery"),
        Err(SorrelError::NothingToRead(sym)) if sym == "mystery"
    ));
    assert!(matches!(
        eval_source("addup: fn [n /local t] [t: n + 10 t] addup 5 t"),
        Err(SorrelError::NothingToRead(sym)) if sym == "t"
    ));
}

#[test]
fn get_words_fetch_without_invoking() {
    let value = eval_source(":add").expect("get word");
    assert!(matches!(value, Value::Native(_)));
    assert_eq!(eval_source(":missing").expect("absent get"), Value::None);
}

#[test]
fn set_words_return_the_assigned_value() {
    assert_eq!(eval_source("x: 1 + 2").expect("set"), Value::Int(3));
}

#[test]
fn binding_twice_is_idempotent() {
    use sorrel_core::{natives, parser, Vm};
    let mut vm = Vm::new();
    natives::boot(&mut vm).expect("boot");
    let mut code = parser::parse("x: add 1 2 x").expect("parse");
    vm.bind(&mut code);
    vm.bind(&mut code);
    assert_eq!(vm.eval(&code).expect("eval"), Value::Int(3));
}
