//! Registry of template functions and lifecycle hooks.
//!
//! The registry is built once per run and is read-only afterwards, so it
//! can be shared across concurrently running cases behind an `Arc`.

use crate::error::{Error, HookError, Result};
use crate::model::{Environment, RenderedRequest, ResponseRecord, Scope};
use anyhow::anyhow;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Pure template function: positional arguments in, value out.
pub type TemplateFn = Arc<dyn Fn(&[Value]) -> anyhow::Result<Value> + Send + Sync>;

/// Runs before dispatch with the rendered request.
pub type SetupHookFn = Arc<
    dyn Fn(&mut RenderedRequest, &Scope, &Environment) -> std::result::Result<Option<Scope>, HookError>
        + Send
        + Sync,
>;

/// Runs after dispatch with the captured response.
pub type TeardownHookFn = Arc<
    dyn Fn(&mut ResponseRecord, &Scope, &Environment) -> std::result::Result<Option<Scope>, HookError>
        + Send
        + Sync,
>;

/// Number of positional arguments a template function accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    Range { min: usize, max: usize },
}

impl Arity {
    pub fn accepts(&self, count: usize) -> bool {
        match *self {
            Arity::Exact(n) => count == n,
            Arity::Range { min, max } => (min..=max).contains(&count),
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "{n}"),
            Arity::Range { min, max } => write!(f, "{min} to {max}"),
        }
    }
}

#[derive(Clone)]
pub enum Callable {
    Function { arity: Arity, call: TemplateFn },
    Setup(SetupHookFn),
    Teardown(TeardownHookFn),
}

impl Callable {
    pub fn kind(&self) -> &'static str {
        match self {
            Callable::Function { .. } => "function",
            Callable::Setup(_) => "setup hook",
            Callable::Teardown(_) => "teardown hook",
        }
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callable::Function { arity, .. } => {
                f.debug_struct("Function").field("arity", arity).finish()
            }
            Callable::Setup(_) => f.write_str("Setup"),
            Callable::Teardown(_) => f.write_str("Teardown"),
        }
    }
}

/// Immutable name → callable mapping.
#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    entries: HashMap<String, Callable>,
}

impl FunctionRegistry {
    pub fn builder() -> FunctionRegistryBuilder {
        FunctionRegistryBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<&Callable> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Invoke a template function with already evaluated arguments.
    pub fn call_function(&self, name: &str, args: &[Value]) -> Result<Value> {
        match self.entries.get(name) {
            Some(Callable::Function { arity, call }) => {
                if !arity.accepts(args.len()) {
                    return Err(Error::hook(
                        name,
                        anyhow!("expected {arity} argument(s), got {}", args.len()),
                    ));
                }
                call(args).map_err(|e| Error::hook(name, e))
            }
            _ => Err(Error::UnknownFunction(name.to_string())),
        }
    }

    pub fn setup_hook(&self, name: &str) -> Option<&SetupHookFn> {
        match self.entries.get(name) {
            Some(Callable::Setup(hook)) => Some(hook),
            _ => None,
        }
    }

    pub fn teardown_hook(&self, name: &str) -> Option<&TeardownHookFn> {
        match self.entries.get(name) {
            Some(Callable::Teardown(hook)) => Some(hook),
            _ => None,
        }
    }
}

#[derive(Default)]
pub struct FunctionRegistryBuilder {
    entries: HashMap<String, Callable>,
}

impl FunctionRegistryBuilder {
    pub fn function<F>(&mut self, name: &str, arity: Arity, call: F) -> &mut Self
    where
        F: Fn(&[Value]) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.entries.insert(
            name.to_string(),
            Callable::Function {
                arity,
                call: Arc::new(call),
            },
        );
        self
    }

    pub fn setup_hook<F>(&mut self, name: &str, hook: F) -> &mut Self
    where
        F: Fn(&mut RenderedRequest, &Scope, &Environment) -> std::result::Result<Option<Scope>, HookError>
            + Send
            + Sync
            + 'static,
    {
        self.entries
            .insert(name.to_string(), Callable::Setup(Arc::new(hook)));
        self
    }

    pub fn teardown_hook<F>(&mut self, name: &str, hook: F) -> &mut Self
    where
        F: Fn(&mut ResponseRecord, &Scope, &Environment) -> std::result::Result<Option<Scope>, HookError>
            + Send
            + Sync
            + 'static,
    {
        self.entries
            .insert(name.to_string(), Callable::Teardown(Arc::new(hook)));
        self
    }

    pub fn build(self) -> FunctionRegistry {
        FunctionRegistry {
            entries: self.entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> FunctionRegistry {
        let mut builder = FunctionRegistry::builder();
        builder
            .function("double", Arity::Exact(1), |args| {
                let n = args[0].as_i64().ok_or_else(|| anyhow!("not an integer"))?;
                Ok(json!(n * 2))
            })
            .function("pad", Arity::Range { min: 1, max: 2 }, |args| {
                Ok(args[0].clone())
            })
            .setup_hook("noop_setup", |_req, _scope, _env| Ok(None));
        builder.build()
    }

    #[test]
    fn test_call_function() {
        let registry = registry();
        assert_eq!(registry.call_function("double", &[json!(21)]).unwrap(), json!(42));
    }

    #[test]
    fn test_arity_mismatch_is_hook_execution() {
        let registry = registry();
        let err = registry.call_function("double", &[]).unwrap_err();
        assert!(matches!(err, Error::HookExecution { .. }));
        assert!(err.to_string().contains("expected 1 argument(s), got 0"));
        assert!(registry.call_function("pad", &[json!(1), json!(2)]).is_ok());
        assert!(registry.call_function("pad", &[]).is_err());
    }

    #[test]
    fn test_function_error_wraps_cause() {
        let registry = registry();
        let err = registry.call_function("double", &[json!("x")]).unwrap_err();
        match err {
            Error::HookExecution { name, source } => {
                assert_eq!(name, "double");
                assert_eq!(source.to_string(), "not an integer");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_and_hook_names_are_not_functions() {
        let registry = registry();
        assert!(matches!(
            registry.call_function("nope", &[]),
            Err(Error::UnknownFunction(_))
        ));
        assert!(matches!(
            registry.call_function("noop_setup", &[]),
            Err(Error::UnknownFunction(_))
        ));
        assert!(registry.setup_hook("noop_setup").is_some());
        assert!(registry.teardown_hook("noop_setup").is_none());
    }

    #[test]
    fn test_names_sorted() {
        assert_eq!(registry().names(), vec!["double", "noop_setup", "pad"]);
    }
}
