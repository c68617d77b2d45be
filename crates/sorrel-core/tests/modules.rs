use sorrel_core::ast::Value;
use sorrel_core::dict::{self, Dict};
use sorrel_core::error::SorrelError;
use sorrel_core::module::{MemoryFetch, ModuleLoader};
use sorrel_core::{natives, Vm};

fn booted_vm() -> Vm {
    let mut vm = Vm::new();
    natives::boot(&mut vm).expect("boot");
    vm
}

fn loader_with(modules: &[(&str, &str)]) -> ModuleLoader {
    let mut fetch = MemoryFetch::new();
    for (location, text) in modules {
        fetch.insert(*location, *text);
    }
    ModuleLoader::new(fetch)
}

fn export(value: &Value, key: &str) -> Value {
    match value {
        Value::Dict(dict) => dict.read().unwrap().get(key).expect("export present"),
        other => panic!("expected dict, got {:?}", other),
    }
}

#[test]
fn imports_capture_set_words_as_exports() {
    let loader = loader_with(&[(
        "lib/util.srl",
        r#"
        module [Name: "util"] [
            double: fn [x] [x * 2]
            answer: double 21
        ]
        "#,
    )]);
    let mut vm = booted_vm();
    let exports = loader
        .import(&mut vm, "util", "lib/util.srl", None)
        .expect("import");
    assert_eq!(export(&exports, "answer"), Value::Int(42));
    // Module locals never leak into the global dictionary.
    assert!(vm.dictionary.read().unwrap().get("answer").is_none());
    assert!(vm.dictionary.read().unwrap().get("util").is_some());
}

#[test]
fn requirements_load_depth_first_and_relative_to_the_parent() {
    let loader = loader_with(&[
        (
            "lib/main.srl",
            r#"
            module [
                Name: "main"
                Require: [util: "util.srl"]
            ] [
                answer: util/double 21
            ]
            "#,
        ),
        (
            "lib/util.srl",
            r#"
            module [Name: "util"] [
                double: fn [x] [x * 2]
            ]
            "#,
        ),
    ]);
    let mut vm = booted_vm();
    let exports = loader
        .import(&mut vm, "main", "lib/main.srl", None)
        .expect("import");
    assert_eq!(export(&exports, "answer"), Value::Int(42));
    assert!(vm.dictionary.read().unwrap().get("util").is_some());
}

#[test]
fn reimporting_returns_the_registered_module() {
    let loader = loader_with(&[(
        "m.srl",
        r#"module [Name: "m"] [x: 1]"#,
    )]);
    let mut vm = booted_vm();
    let first = loader.import(&mut vm, "m", "m.srl", None).expect("first");
    let second = loader.import(&mut vm, "m", "m.srl", None).expect("second");
    assert_eq!(first, second);
}

#[test]
fn host_implementations_link_under_impl() {
    let mut loader = loader_with(&[(
        "sys.srl",
        r#"
        module [
            Name: "sys"
            Impl-Native: "sys"
        ] [
            version: Impl/version
        ]
        "#,
    )]);
    loader.register_impl("sys", |_vm| {
        let dict = dict::new_ref(Dict::new());
        dict.write()
            .unwrap()
            .set("version", Value::Str("1.0".into()));
        Ok(Value::Dict(dict))
    });
    let mut vm = booted_vm();
    let exports = loader.import(&mut vm, "sys", "sys.srl", None).expect("import");
    assert_eq!(export(&exports, "version"), Value::Str("1.0".into()));
}

#[test]
fn missing_host_implementation_is_malformed() {
    let loader = loader_with(&[(
        "sys.srl",
        r#"module [Impl-Native: "nowhere"] [x: 1]"#,
    )]);
    let mut vm = booted_vm();
    assert!(matches!(
        loader.import(&mut vm, "sys", "sys.srl", None),
        Err(SorrelError::MalformedModule(_))
    ));
}

#[test]
fn module_shape_is_enforced() {
    let loader = loader_with(&[
        ("short.srl", r#"module [Name: "short"]"#),
        ("wrong.srl", r#"package [Name: "wrong"] [x: 1]"#),
    ]);
    let mut vm = booted_vm();
    assert!(matches!(
        loader.import(&mut vm, "short", "short.srl", None),
        Err(SorrelError::MalformedModule(_))
    ));
    assert!(matches!(
        loader.import(&mut vm, "wrong", "wrong.srl", None),
        Err(SorrelError::MalformedModule(_))
    ));
}

#[test]
fn unsupported_schemes_are_rejected() {
    let loader = loader_with(&[]);
    let mut vm = booted_vm();
    assert!(matches!(
        loader.import(&mut vm, "web", "https://example.com/mod.srl", None),
        Err(SorrelError::UnsupportedProtocol(scheme)) if scheme == "https"
    ));
}

#[test]
fn malformed_require_pairs_are_rejected() {
    let loader = loader_with(&[(
        "m.srl",
        r#"module [Require: [just-a-word]] [x: 1]"#,
    )]);
    let mut vm = booted_vm();
    assert!(matches!(
        loader.import(&mut vm, "m", "m.srl", None),
        Err(SorrelError::MalformedModule(_))
    ));
}
