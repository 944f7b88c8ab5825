//! The function registry the daemon consumes to dispatch probe invocations. Owned by the
//! embedding host, not the core — the core only ever calls [`FunctionRegistry::call`] with a
//! command name and its string arguments, mirroring `self.functions[cmd](*args)` in the source
//! the task runtime was distilled from.

use crate::errors::ProbeError;
use crate::value::Value;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

/// One named agent function. Implementors model an RPC dispatch table entry; the core never
/// inspects what a probe actually does.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn call(&self, args: &[String]) -> Result<Value, ProbeError>;
}

/// Resolves a probe by name and invokes it. Implemented by [`InMemoryFunctionRegistry`] for local
/// use and by the host agent in a real deployment.
#[async_trait]
pub trait FunctionRegistry: Send + Sync {
    async fn call(&self, name: &str, args: &[String]) -> Result<Value, ProbeError>;

    fn contains(&self, name: &str) -> bool;
}

/// A concurrent, in-process registry of named [`Probe`]s. Used by `src/bin/main.rs`'s demo
/// registry and by tests.
#[derive(Default, Clone)]
pub struct InMemoryFunctionRegistry {
    probes: Arc<DashMap<String, Arc<dyn Probe>>>,
}

impl InMemoryFunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: impl Into<String>, probe: Arc<dyn Probe>) {
        self.probes.insert(name.into(), probe);
    }
}

#[async_trait]
impl FunctionRegistry for InMemoryFunctionRegistry {
    async fn call(&self, name: &str, args: &[String]) -> Result<Value, ProbeError> {
        let probe = self
            .probes
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ProbeError::NotFound(name.to_owned()))?;
        probe
            .call(args)
            .await
            .map_err(|e| ProbeError::Failed(name.to_owned(), e.to_string()))
    }

    fn contains(&self, name: &str) -> bool {
        self.probes.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl Probe for Echo {
        async fn call(&self, args: &[String]) -> Result<Value, ProbeError> {
            Ok(Value::str(args.join(" ")))
        }
    }

    #[tokio::test]
    async fn registers_and_calls_a_probe() {
        let registry = InMemoryFunctionRegistry::new();
        registry.register("test.echo", Arc::new(Echo));
        assert!(registry.contains("test.echo"));
        let result = registry
            .call("test.echo", &["a".to_owned(), "b".to_owned()])
            .await
            .unwrap();
        assert_eq!(result, Value::str("a b"));
    }

    #[tokio::test]
    async fn unknown_command_errors() {
        let registry = InMemoryFunctionRegistry::new();
        let err = registry.call("nope", &[]).await.unwrap_err();
        assert!(matches!(err, ProbeError::NotFound(_)));
    }
}
