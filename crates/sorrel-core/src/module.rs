use std::collections::HashMap;

use crate::ast::{Code, CodeItem, Value, WordKind};
use crate::bind::{bind, DictWordsResolver, SetWordsResolver};
use crate::dict::{self, Dict};
use crate::error::SorrelError;
use crate::parser::parse;
use crate::vm::Vm;

/// Source text of a module together with the resolved location child
/// references are resolved against.
pub struct FetchedModule {
    pub location: String,
    pub text: String,
}

/// All module I/O goes through this seam; the loader itself never touches
/// the filesystem directly.
pub trait ModuleFetch {
    fn fetch(&self, reference: &str, base: Option<&str>) -> Result<FetchedModule, SorrelError>;
}

/// Resolve a reference to a concrete location. Scheme-qualified references
/// accept `file://` only; schemeless references resolve against the
/// directory of `base` with `.`/`..` segments collapsed.
pub fn resolve_reference(reference: &str, base: Option<&str>) -> Result<String, SorrelError> {
    if let Some((scheme, rest)) = reference.split_once("://") {
        if scheme != "file" {
            return Err(SorrelError::UnsupportedProtocol(scheme.to_string()));
        }
        return Ok(rest.to_string());
    }
    match base {
        Some(base) if !reference.starts_with('/') => {
            let dir = match base.rfind('/') {
                Some(i) => &base[..i],
                None => "",
            };
            Ok(normalize_path(&format!("{}/{}", dir, reference)))
        }
        _ => Ok(reference.to_string()),
    }
}

fn normalize_path(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => match parts.last() {
                Some(&"..") | None => parts.push(".."),
                Some(_) => {
                    parts.pop();
                }
            },
            segment => parts.push(segment),
        }
    }
    let joined = parts.join("/");
    if absolute {
        format!("/{}", joined)
    } else {
        joined
    }
}

/// Fetches modules from the local filesystem.
pub struct FsFetch;

impl ModuleFetch for FsFetch {
    fn fetch(&self, reference: &str, base: Option<&str>) -> Result<FetchedModule, SorrelError> {
        let location = resolve_reference(reference, base)?;
        let text = std::fs::read_to_string(&location).map_err(|err| {
            SorrelError::runtime(format!("cannot read module {}: {}", location, err))
        })?;
        Ok(FetchedModule { location, text })
    }
}

/// In-memory module store for tests and embedding.
#[derive(Default)]
pub struct MemoryFetch {
    modules: HashMap<String, String>,
}

impl MemoryFetch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, location: impl Into<String>, text: impl Into<String>) {
        self.modules.insert(location.into(), text.into());
    }
}

impl ModuleFetch for MemoryFetch {
    fn fetch(&self, reference: &str, base: Option<&str>) -> Result<FetchedModule, SorrelError> {
        let location = resolve_reference(reference, base)?;
        match self.modules.get(&location) {
            Some(text) => Ok(FetchedModule {
                location,
                text: text.clone(),
            }),
            None => Err(SorrelError::runtime(format!(
                "module not found: {}",
                location
            ))),
        }
    }
}

pub type ImplFactory = Box<dyn Fn(&mut Vm) -> Result<Value, SorrelError> + Send + Sync>;

/// Loads `module [meta] [body]` sources: evaluates the metadata block,
/// imports requirements depth-first, links registered host
/// implementations, then evaluates the body with its set-words captured
/// as the module's exports.
pub struct ModuleLoader {
    fetch: Box<dyn ModuleFetch>,
    impls: HashMap<String, ImplFactory>,
}

impl ModuleLoader {
    pub fn new(fetch: impl ModuleFetch + 'static) -> Self {
        Self {
            fetch: Box::new(fetch),
            impls: HashMap::new(),
        }
    }

    /// Register a host implementation factory under the key modules name
    /// in their `Impl-Native` metadata field.
    pub fn register_impl<F>(&mut self, key: impl Into<String>, factory: F)
    where
        F: Fn(&mut Vm) -> Result<Value, SorrelError> + Send + Sync + 'static,
    {
        self.impls.insert(key.into(), Box::new(factory));
    }

    /// Import a module and register its export dictionary under `id` in
    /// the VM's global dictionary. Importing an already-registered id
    /// returns the existing exports without refetching.
    pub fn import(
        &self,
        vm: &mut Vm,
        id: &str,
        reference: &str,
        base: Option<&str>,
    ) -> Result<Value, SorrelError> {
        if let Some(existing) = vm.dictionary.read().unwrap().get(id) {
            return Ok(existing);
        }

        let fetched = self.fetch.fetch(reference, base)?;
        let mut code = parse(&fetched.text)?;
        vm.bind(&mut code);
        let (mut meta, mut body) = split_module(code)?;

        // Metadata: set-words captured into a private dictionary.
        let meta_dict = dict::new_ref(Dict::new());
        let meta_capture = SetWordsResolver::collect(&meta, meta_dict.clone());
        bind(&mut meta, &meta_capture);
        vm.eval(&meta)?;
        eprintln!("loading module {} from {}", id, fetched.location);

        // Requirements, depth-first in declaration order.
        if let Some(requires) = meta_dict.read().unwrap().get("Require") {
            let requires = requires.as_block()?;
            let mut items = requires.iter();
            while let Some(item) = items.next() {
                let (sym, url) = match (item, items.next()) {
                    (CodeItem::Word(w), Some(CodeItem::Const(Value::Str(url))))
                        if w.kind == WordKind::Set =>
                    {
                        (&w.sym, url)
                    }
                    _ => {
                        return Err(SorrelError::MalformedModule(
                            "Require expects name: \"reference\" pairs".to_string(),
                        ))
                    }
                };
                self.import(vm, sym, url, Some(&fetched.location))?;
            }
        }

        // Host implementation hook.
        let caps = dict::new_ref(Dict::new());
        if let Some(key) = meta_dict.read().unwrap().get("Impl-Native") {
            let key = key.as_str()?.to_string();
            let factory = self.impls.get(&key).ok_or_else(|| {
                SorrelError::MalformedModule(format!(
                    "no host implementation registered for {}",
                    key
                ))
            })?;
            let value = factory(vm)?;
            caps.write().unwrap().set("Impl", value);
        }

        // Body: loader capabilities first, then export capture on top.
        let exports = dict::new_ref(Dict::new());
        bind(&mut body, &DictWordsResolver::new(caps));
        let export_capture = SetWordsResolver::collect(&body, exports.clone());
        bind(&mut body, &export_capture);
        vm.eval(&body)?;

        let value = Value::Dict(exports);
        vm.dictionary.write().unwrap().set(id, value.clone());
        Ok(value)
    }
}

fn split_module(code: Code) -> Result<(Code, Code), SorrelError> {
    let malformed = || {
        SorrelError::MalformedModule(
            "expected exactly `module [meta] [body]`".to_string(),
        )
    };
    if code.len() != 3 {
        return Err(malformed());
    }
    let mut items = code.into_iter();
    match items.next() {
        Some(CodeItem::Word(w)) if w.kind == WordKind::Norm && w.sym == "module" => {}
        _ => return Err(malformed()),
    }
    let meta = match items.next() {
        Some(CodeItem::Block(code)) => code,
        _ => return Err(malformed()),
    };
    let body = match items.next() {
        Some(CodeItem::Block(code)) => code,
        _ => return Err(malformed()),
    };
    Ok((meta, body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_references_resolve_against_base_directory() {
        let resolved =
            resolve_reference("util.srl", Some("lib/app/main.srl")).unwrap();
        assert_eq!(resolved, "lib/app/util.srl");
        let resolved =
            resolve_reference("../shared/util.srl", Some("lib/app/main.srl")).unwrap();
        assert_eq!(resolved, "lib/shared/util.srl");
    }

    #[test]
    fn file_scheme_strips_to_a_path() {
        let resolved = resolve_reference("file:///opt/mod.srl", None).unwrap();
        assert_eq!(resolved, "/opt/mod.srl");
    }

    #[test]
    fn other_schemes_are_unsupported() {
        assert!(matches!(
            resolve_reference("https://example.com/mod.srl", None),
            Err(SorrelError::UnsupportedProtocol(scheme)) if scheme == "https"
        ));
    }

    #[test]
    fn module_shape_is_checked() {
        let code = parse("module [Name: \"m\"]").unwrap();
        assert!(matches!(
            split_module(code),
            Err(SorrelError::MalformedModule(_))
        ));
        let code = parse("package [Name: \"m\"] [x: 1]").unwrap();
        assert!(matches!(
            split_module(code),
            Err(SorrelError::MalformedModule(_))
        ));
    }
}
