//! C7 — a thin authenticated request/reply alert client. Grounded in `client.py`'s
//! `AlertClient.alert`: build the envelope, send it, decrypt the reply, return the payload. The
//! concrete ZeroMQ/AES transport is host-agent-specific and out of scope here (§1/REDESIGN
//! FLAGS); this crate expresses it as the [`AlertTransport`] trait plus a reference in-memory
//! transport for tests and local development.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The decrypted payload sent to the alert master.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertPayload {
    pub cmd: String,
    pub host: String,
    pub severity: String,
    #[serde(rename = "SEVERITY")]
    pub severity_upper: String,
    pub category: String,
    pub msg: String,
}

impl AlertPayload {
    pub fn new(host: impl Into<String>, severity: impl Into<String>, category: impl Into<String>, msg: impl Into<String>) -> Self {
        let severity = severity.into();
        let severity_upper = severity.to_ascii_uppercase();
        Self {
            cmd: "_alert".to_owned(),
            host: host.into(),
            severity: severity.to_ascii_lowercase(),
            severity_upper,
            category: category.into(),
            msg: msg.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum AlertError {
    #[error("alert transport failed: {0}")]
    Transport(String),

    #[error("alert envelope could not be serialized: {0}")]
    Envelope(String),
}

/// A single authenticated round trip to the alert master. Implementations own the actual
/// transport and crypto stack; the core never inspects them.
#[async_trait]
pub trait AlertTransport: Send + Sync {
    async fn send(&self, payload: &AlertPayload) -> Result<serde_json::Value, AlertError>;
}

/// Serializes and sends one alert, returning the transport's decrypted response payload.
pub struct AlertClient<T: AlertTransport> {
    transport: T,
}

impl<T: AlertTransport> AlertClient<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub async fn alert(
        &self,
        host: impl Into<String>,
        severity: impl Into<String>,
        category: impl Into<String>,
        msg: impl Into<String>,
    ) -> Result<serde_json::Value, AlertError> {
        let payload = AlertPayload::new(host, severity, category, msg);
        self.transport.send(&payload).await
    }
}

/// Reference in-memory transport used by tests and local development: echoes the payload back
/// wrapped in `{"enc": "aes", "load": <payload>}`, without any actual encryption.
#[derive(Default)]
pub struct InMemoryAlertTransport;

#[async_trait]
impl AlertTransport for InMemoryAlertTransport {
    async fn send(&self, payload: &AlertPayload) -> Result<serde_json::Value, AlertError> {
        let load = serde_json::to_value(payload).map_err(|e| AlertError::Envelope(e.to_string()))?;
        Ok(serde_json::json!({ "enc": "aes", "load": load }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn alert_round_trips_through_the_in_memory_transport() {
        let client = AlertClient::new(InMemoryAlertTransport);
        let reply = client.alert("node1", "warning", "disk", "disk usage high").await.unwrap();
        assert_eq!(reply["enc"], "aes");
        assert_eq!(reply["load"]["SEVERITY"], "WARNING");
        assert_eq!(reply["load"]["severity"], "warning");
        assert_eq!(reply["load"]["cmd"], "_alert");
    }

    #[tokio::test]
    async fn mixed_case_severity_is_normalized_both_ways() {
        let client = AlertClient::new(InMemoryAlertTransport);
        let reply = client.alert("node1", "Warning", "disk", "disk usage high").await.unwrap();
        assert_eq!(reply["load"]["severity"], "warning");
        assert_eq!(reply["load"]["SEVERITY"], "WARNING");
    }
}
