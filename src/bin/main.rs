//! CLI entry point. Reads a catalog/config path from the first positional argument or
//! `$PROBEMON_CONFIG`, initializes structured logging, wires up a small in-process demo function
//! registry, and runs the daemon supervisor until Ctrl-C.

use probemon::collector::CollectorRegistry;
use probemon::config;
use probemon::errors::ProbeError;
use probemon::registry::{InMemoryFunctionRegistry, Probe};
use probemon::value::Value;
use std::collections::BTreeMap;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

struct Ping;
#[async_trait::async_trait]
impl Probe for Ping {
    async fn call(&self, _args: &[String]) -> Result<Value, ProbeError> {
        Ok(Value::Bool(true))
    }
}

struct DiskUsage;
#[async_trait::async_trait]
impl Probe for DiskUsage {
    async fn call(&self, _args: &[String]) -> Result<Value, ProbeError> {
        let mut root = BTreeMap::new();
        root.insert("available".to_owned(), Value::Int(42));
        root.insert("total".to_owned(), Value::Int(100));
        let mut filesystems = BTreeMap::new();
        filesystems.insert("/".to_owned(), Value::Map(root));
        Ok(Value::Map(filesystems))
    }
}

struct AlertSend;
#[async_trait::async_trait]
impl Probe for AlertSend {
    async fn call(&self, args: &[String]) -> Result<Value, ProbeError> {
        tracing::info!(message = %args.join(" "), "alert.send");
        Ok(Value::None)
    }
}

fn demo_registry() -> InMemoryFunctionRegistry {
    let registry = InMemoryFunctionRegistry::new();
    registry.register("test.ping", Arc::new(Ping));
    registry.register("disk.usage", Arc::new(DiskUsage));
    registry.register("alert.send", Arc::new(AlertSend));
    registry
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli_path = std::env::args().nth(1);
    let path = config::resolve_config_path(cli_path.as_deref());

    let catalog = match config::load_catalog(&path) {
        Ok(c) => c,
        Err(err) => {
            tracing::error!(path = %path, error = %err, "failed to load catalog");
            return ExitCode::FAILURE;
        }
    };

    let monitor_config = match config::read_yaml_file(&path)
        .and_then(|yaml| config::merge_monitor_config(serde_json::json!({}), yaml))
    {
        Ok(c) => c,
        Err(err) => {
            tracing::error!(path = %path, error = %err, "failed to load config");
            return ExitCode::FAILURE;
        }
    };

    let registry: Arc<dyn probemon::registry::FunctionRegistry> = Arc::new(demo_registry());
    let daemon = probemon::daemon::Daemon::new(registry, CollectorRegistry::new());

    let cancellation = CancellationToken::new();
    let shutdown = cancellation.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
        shutdown.cancel();
    });

    match daemon.run(catalog, &monitor_config, cancellation).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "daemon exited with error");
            ExitCode::FAILURE
        }
    }
}
