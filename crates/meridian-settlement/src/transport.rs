//! Claim delivery with bounded retry.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use meridian_core::{ClaimMessage, Claim, MessageId, SettlementConfig};
use serde::Serialize;

use crate::peer::PeerHandle;
use crate::store::{ClaimStore, InsertOutcome, SentClaimRecord};
use crate::telemetry::{Telemetry, TelemetryEvent};

/// Attempt bound and exponential backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Backoff after failed attempt `attempt` (1-based): `base * 2^(attempt-1)`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl From<&SettlementConfig> for RetryPolicy {
    fn from(config: &SettlementConfig) -> Self {
        Self {
            max_attempts: config.retry_max_attempts.max(1),
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
        }
    }
}

/// Result of one `send` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendOutcome {
    pub success: bool,
    pub message_id: MessageId,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Sends signed claims to peers.
pub struct ClaimTransport {
    node_id: String,
    store: Arc<dyn ClaimStore>,
    telemetry: Telemetry,
    retry: RetryPolicy,
    protocol_name: String,
    content_type: u8,
    /// Millisecond stamp of the last message; stamps strictly increase so
    /// ids without a nonce stay unique.
    last_millis: AtomicI64,
}

impl ClaimTransport {
    pub fn new(
        node_id: impl Into<String>,
        store: Arc<dyn ClaimStore>,
        telemetry: Telemetry,
        config: &SettlementConfig,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            store,
            telemetry,
            retry: RetryPolicy::from(config),
            protocol_name: config.protocol_name.clone(),
            content_type: config.content_type,
            last_millis: AtomicI64::new(0),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Deliver `claim` to `peer_id`. Delivery problems never surface as
    /// errors; they are reported in the outcome.
    pub async fn send(&self, peer_id: &str, handle: &dyn PeerHandle, claim: &Claim) -> SendOutcome {
        let timestamp = self.next_timestamp();
        let message_id = MessageId::for_claim(claim, timestamp);
        let message = ClaimMessage::new(message_id.clone(), self.node_id.clone(), claim.clone(), timestamp);

        let error = match message.to_bytes() {
            Ok(bytes) => self.deliver(peer_id, handle, &message_id, bytes).await.err(),
            Err(e) => Some(format!("failed to serialize claim message: {}", e)),
        };
        let success = error.is_none();

        if success {
            tracing::info!(
                peer_id = %peer_id,
                chain = %claim.chain(),
                message_id = %message_id,
                amount = %claim.amount(),
                "Claim delivered"
            );
        } else {
            tracing::error!(
                peer_id = %peer_id,
                chain = %claim.chain(),
                message_id = %message_id,
                error = error.as_deref().unwrap_or_default(),
                "Claim delivery failed"
            );
        }

        self.persist(SentClaimRecord {
            message_id: message_id.clone(),
            peer_id: peer_id.to_string(),
            chain: claim.chain(),
            channel_id: claim.channel_id().to_string(),
            claim: claim.clone(),
            success,
            error: error.clone(),
            timestamp_ms: timestamp.timestamp_millis(),
        });
        self.telemetry.emit_or_drop(TelemetryEvent::ClaimSent {
            peer_id: peer_id.to_string(),
            chain: claim.chain(),
            message_id: message_id.clone(),
            amount: claim.amount().to_string(),
            success,
            error: error.clone(),
        });

        SendOutcome {
            success,
            message_id,
            timestamp,
            error,
        }
    }

    fn next_timestamp(&self) -> DateTime<Utc> {
        let now = Utc::now().timestamp_millis();
        let previous = self
            .last_millis
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(now.max(last + 1)))
            .unwrap_or(now);
        DateTime::from_timestamp_millis(now.max(previous + 1)).unwrap_or_else(Utc::now)
    }

    /// Attempt delivery up to `max_attempts` times with the same bytes,
    /// backing off after every failed attempt.
    async fn deliver(
        &self,
        peer_id: &str,
        handle: &dyn PeerHandle,
        message_id: &MessageId,
        bytes: Vec<u8>,
    ) -> Result<(), String> {
        let mut last_error = String::from("no delivery attempt made");
        for attempt in 1..=self.retry.max_attempts {
            match handle
                .send_protocol_data(&self.protocol_name, self.content_type, bytes.clone())
                .await
            {
                Ok(()) => return Ok(()),
                Err(e) => {
                    let delay = self.retry.delay_after(attempt);
                    tracing::warn!(
                        peer_id = %peer_id,
                        message_id = %message_id,
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        backoff_ms = delay.as_millis() as u64,
                        error = %e,
                        "Claim delivery attempt failed"
                    );
                    last_error = e.to_string();
                    tokio::time::sleep(delay).await;
                }
            }
        }
        Err(last_error)
    }

    fn persist(&self, record: SentClaimRecord) {
        match self.store.insert_sent(&record) {
            Ok(InsertOutcome::Inserted) => {}
            Ok(InsertOutcome::Duplicate) => {
                tracing::warn!(message_id = %record.message_id, "Duplicate sent claim record ignored");
            }
            Err(e) => {
                tracing::error!(message_id = %record.message_id, error = %e, "Failed to persist sent claim");
            }
        }
    }
}
