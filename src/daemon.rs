//! C6 — the daemon supervisor. Loads the compiled task list, constructs one [`MonitorTask`] per
//! entry, and starts each in its own `tokio::spawn`ed task sharing one [`CancellationToken`].
//! Grounded in `monitor.py`'s `Monitor.start` (one thread per task) combined with the teacher's
//! construction ergonomics.

use crate::collector::CollectorRegistry;
use crate::compiler::{compile_catalog, CatalogDocument};
use crate::config::MonitorConfig;
use crate::errors::ConfigError;
use crate::plan::TaskContext;
use crate::registry::FunctionRegistry;
use crate::task::MonitorTask;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Owns the function registry and collector registry for the lifetime of the process, and builds
/// + runs the task fleet from a loaded catalog and config.
pub struct Daemon {
    registry: Arc<dyn FunctionRegistry>,
    collectors: CollectorRegistry,
}

impl Daemon {
    pub fn new(registry: Arc<dyn FunctionRegistry>, collectors: CollectorRegistry) -> Self {
        Self { registry, collectors }
    }

    /// Compiles `catalog` against the configured default interval, logs and drops entries that
    /// fail to compile, and runs every resulting task to completion (i.e. until `cancellation`
    /// fires). Fatal only when the catalog is missing or empty after compilation.
    pub async fn run(
        &self,
        catalog: CatalogDocument,
        config: &MonitorConfig,
        cancellation: CancellationToken,
    ) -> Result<(), ConfigError> {
        let (compiled, skipped) = compile_catalog(&catalog, self.registry.as_ref(), config.default_interval);
        for (idx, err) in &skipped {
            warn!(entry = idx, error = %err, "catalog entry skipped at compile time");
        }
        if compiled.is_empty() {
            warn!("no task compiled successfully, nothing to run");
            return Err(ConfigError::EmptyCatalog);
        }

        let collector = self.collectors.get(&config.collector);
        let mut handles = Vec::with_capacity(compiled.len());
        for task in compiled {
            let context = TaskContext::new(self.registry.clone(), config.id.clone(), collector.clone());
            let monitor_task = MonitorTask::from_compiled(task, context, cancellation.clone());
            handles.push(tokio::spawn(monitor_task.run()));
        }

        for handle in handles {
            let _ = handle.await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ProbeError;
    use crate::registry::{InMemoryFunctionRegistry, Probe};
    use crate::value::Value;
    use async_trait::async_trait;

    struct Ping;
    #[async_trait]
    impl Probe for Ping {
        async fn call(&self, _args: &[String]) -> Result<Value, ProbeError> {
            Ok(Value::Bool(true))
        }
    }

    #[tokio::test]
    async fn empty_catalog_after_compilation_is_fatal() {
        let registry = InMemoryFunctionRegistry::new();
        let daemon = Daemon::new(Arc::new(registry), CollectorRegistry::new());
        let catalog: CatalogDocument = serde_yaml::from_str("monitor:\n  - run: unknown.cmd\n").unwrap();
        let config = MonitorConfig::default();
        let err = daemon.run(catalog, &config, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ConfigError::EmptyCatalog));
    }

    #[tokio::test]
    async fn runs_tasks_and_stops_on_cancellation() {
        let registry = InMemoryFunctionRegistry::new();
        registry.register("test.ping", Arc::new(Ping));
        let daemon = Daemon::new(Arc::new(registry), CollectorRegistry::new());
        let catalog: CatalogDocument =
            serde_yaml::from_str("monitor:\n  - run: test.ping\n    every:\n      second: 0\n").unwrap();
        let mut config = MonitorConfig::default();
        config.collector = "null".to_owned();
        let token = CancellationToken::new();
        let token_clone = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(30)).await;
            token_clone.cancel();
        });
        daemon.run(catalog, &config, token).await.unwrap();
    }
}
