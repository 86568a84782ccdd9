//! Hook registry
//!
//! Hooks are referenced by path in a facet declaration. The interpreter
//! resolves them here; emitted code calls the path directly. Async hook
//! references are run synchronously by the interpreter.

use super::value::{Record, Value};
use crate::error::MappingError;
use std::collections::HashMap;
use std::sync::Arc;

/// `(source, target)` hook; the target is the facet being populated
pub type HookFn = Arc<dyn Fn(&Value, &mut Record) -> Result<(), String> + Send + Sync>;

#[derive(Clone, Default)]
pub struct HookRegistry {
    hooks: HashMap<String, HookFn>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, path: impl Into<String>, hook: F) -> &mut Self
    where
        F: Fn(&Value, &mut Record) -> Result<(), String> + Send + Sync + 'static,
    {
        self.hooks.insert(path.into(), Arc::new(hook));
        self
    }

    pub fn contains(&self, path: &str) -> bool {
        self.hooks.contains_key(path)
    }

    pub fn invoke(&self, path: &str, source: &Value, target: &Value) -> Result<(), MappingError> {
        let hook = self.hooks.get(path).ok_or_else(|| MappingError::MissingHook {
            hook: path.to_string(),
        })?;
        let Value::Object(obj) = target else {
            return Err(MappingError::Hook {
                hook: path.to_string(),
                message: format!("target is {}, not an object", target.kind()),
            });
        };
        let mut record = obj.borrow_mut();
        hook(source, &mut record).map_err(|message| MappingError::Hook {
            hook: path.to_string(),
            message,
        })
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.hooks.keys().collect();
        names.sort();
        f.debug_struct("HookRegistry").field("hooks", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invoke_and_missing() {
        let mut registry = HookRegistry::new();
        registry.register("hooks::shout", |source, target| {
            if let Value::String(name) = source.get("name") {
                target.set("name", Value::String(name.to_uppercase()));
            }
            Ok(())
        });

        let source = Value::object("Person", [("name", Value::string("ada"))]);
        let target = Value::object("PersonDto", [("name", Value::string("ada"))]);
        registry.invoke("hooks::shout", &source, &target).unwrap();
        assert_eq!(target.get("name"), Value::string("ADA"));

        let err = registry.invoke("hooks::nope", &source, &target).unwrap_err();
        assert_eq!(
            err,
            MappingError::MissingHook {
                hook: "hooks::nope".into()
            }
        );
    }
}
