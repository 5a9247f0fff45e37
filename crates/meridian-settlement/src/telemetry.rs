//! Best-effort claim telemetry.
//!
//! Every event goes through [`Telemetry::emit_or_drop`]: a failing sink is
//! logged and skipped and never changes the outcome of the operation that
//! produced the event.

use std::sync::Arc;

use meridian_core::{ChainKind, MessageId};
use serde::Serialize;
use tokio::sync::broadcast;

/// Telemetry sink errors.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("no telemetry subscribers")]
    NoSubscribers,

    #[error("telemetry sink rejected event: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TelemetryEvent {
    #[serde(rename_all = "camelCase")]
    ClaimSent {
        peer_id: String,
        chain: ChainKind,
        message_id: MessageId,
        amount: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Fields describing the claim are absent when the payload did not parse.
    #[serde(rename_all = "camelCase")]
    ClaimReceived {
        peer_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        chain: Option<ChainKind>,
        #[serde(skip_serializing_if = "Option::is_none")]
        message_id: Option<MessageId>,
        #[serde(skip_serializing_if = "Option::is_none")]
        channel_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        amount: Option<String>,
        verified: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl TelemetryEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ClaimSent { .. } => "CLAIM_SENT",
            Self::ClaimReceived { .. } => "CLAIM_RECEIVED",
        }
    }
}

/// Destination for telemetry events.
pub trait TelemetrySink: Send + Sync {
    fn emit(&self, event: &TelemetryEvent) -> Result<(), TelemetryError>;
}

/// Fan-out over zero or more sinks.
#[derive(Clone, Default)]
pub struct Telemetry {
    sinks: Vec<Arc<dyn TelemetrySink>>,
}

impl Telemetry {
    /// Telemetry with no sinks; every event is dropped.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn emit_or_drop(&self, event: TelemetryEvent) {
        for sink in &self.sinks {
            if let Err(e) = sink.emit(&event) {
                tracing::debug!(event = event.name(), error = %e, "Telemetry event dropped");
            }
        }
    }
}

impl std::fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Telemetry").field("sinks", &self.sinks.len()).finish()
    }
}

/// Logs events under the `meridian::telemetry` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn emit(&self, event: &TelemetryEvent) -> Result<(), TelemetryError> {
        let payload = serde_json::to_string(event).map_err(|e| TelemetryError::Rejected(e.to_string()))?;
        tracing::info!(target: "meridian::telemetry", event = event.name(), payload = %payload);
        Ok(())
    }
}

/// Publishes events to in-process subscribers (dashboards, tests).
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<TelemetryEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TelemetryEvent> {
        self.tx.subscribe()
    }
}

impl TelemetrySink for BroadcastSink {
    fn emit(&self, event: &TelemetryEvent) -> Result<(), TelemetryError> {
        self.tx
            .send(event.clone())
            .map(|_| ())
            .map_err(|_| TelemetryError::NoSubscribers)
    }
}
