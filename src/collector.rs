//! C5 — the collector trait and its in-process registry. Discovery is a static, named registry
//! (`CollectorRegistry`) populated by the caller before the daemon starts, not the dynamic
//! `collector_dirs` module-scanning the source does — that mechanism is inherently tied to a
//! dynamically-typed host language (REDESIGN FLAGS).

use crate::errors::CollectorError;
use crate::value::Value;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// A pluggable sink for one iteration's final `(host, cmd, result)`. Grounded in the `(host, cmd,
/// result)` trait shape of the reference mongo-style collector the source ships, not the
/// `{id, jid, return}` returner shape (see the Open Question decision in DESIGN.md).
#[async_trait]
pub trait Collector: Send + Sync {
    async fn collect(&self, host: &str, cmd: &str, result: &Value) -> Result<(), CollectorError>;
}

/// Discards every result. The default when no collector is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCollector;

#[async_trait]
impl Collector for NullCollector {
    async fn collect(&self, _host: &str, _cmd: &str, _result: &Value) -> Result<(), CollectorError> {
        Ok(())
    }
}

/// Writes every result to the tracing log at debug level. Useful for local development without a
/// document database behind it.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingCollector;

#[async_trait]
impl Collector for LoggingCollector {
    async fn collect(&self, host: &str, cmd: &str, result: &Value) -> Result<(), CollectorError> {
        debug!(host, cmd, %result, "collected result");
        Ok(())
    }
}

/// Named, concurrent registry of collector implementations, resolved once per task at compile
/// time from `monitor.collector` in config.
#[derive(Clone, Default)]
pub struct CollectorRegistry {
    collectors: Arc<DashMap<String, Arc<dyn Collector>>>,
}

impl CollectorRegistry {
    pub fn new() -> Self {
        let registry = Self::default();
        registry.register("null", Arc::new(NullCollector));
        registry.register("log", Arc::new(LoggingCollector));
        registry
    }

    pub fn register(&self, name: impl Into<String>, collector: Arc<dyn Collector>) {
        self.collectors.insert(name.into(), collector);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Collector>> {
        self.collectors.get(name).map(|entry| entry.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_collector_discards_everything() {
        let c = NullCollector;
        c.collect("h", "cmd", &Value::Int(1)).await.unwrap();
    }

    #[test]
    fn registry_resolves_built_ins_by_name() {
        let registry = CollectorRegistry::new();
        assert!(registry.get("null").is_some());
        assert!(registry.get("log").is_some());
        assert!(registry.get("mongo").is_none());
    }

    #[test]
    fn registry_accepts_custom_collectors() {
        #[derive(Debug)]
        struct Custom;
        #[async_trait]
        impl Collector for Custom {
            async fn collect(&self, _: &str, _: &str, _: &Value) -> Result<(), CollectorError> {
                Ok(())
            }
        }
        let registry = CollectorRegistry::new();
        registry.register("custom", Arc::new(Custom));
        assert!(registry.get("custom").is_some());
    }
}
