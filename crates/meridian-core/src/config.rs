use serde::{Deserialize, Serialize};

use crate::message::{CLAIM_CONTENT_TYPE_JSON, CLAIM_PROTOCOL_NAME};
use crate::types::ChainKind;

/// Settlement subsystem tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementConfig {
    /// Settle delay used when opening a channel without an explicit one.
    #[serde(default = "default_settle_delay_secs")]
    pub default_settle_delay_secs: u64,
    /// Interval of the channel cache auto-refresh task.
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    /// Whether adapters start their auto-refresh task on node start.
    #[serde(default = "default_true")]
    pub auto_refresh: bool,
    /// Claim delivery attempts per send.
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,
    /// Backoff after the first failed attempt; doubles after each further one.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Protocol name claims travel under.
    #[serde(default = "default_protocol_name")]
    pub protocol_name: String,
    /// Content type tag of claim payloads.
    #[serde(default = "default_content_type")]
    pub content_type: u8,
    #[serde(default = "default_true")]
    pub evm_enabled: bool,
    #[serde(default = "default_true")]
    pub xrp_enabled: bool,
    #[serde(default = "default_true")]
    pub aptos_enabled: bool,
}

fn default_settle_delay_secs() -> u64 {
    86_400
}
fn default_refresh_interval_secs() -> u64 {
    30
}
fn default_true() -> bool {
    true
}
fn default_retry_max_attempts() -> u32 {
    3
}
fn default_retry_base_delay_ms() -> u64 {
    1_000
}
fn default_protocol_name() -> String {
    CLAIM_PROTOCOL_NAME.into()
}
fn default_content_type() -> u8 {
    CLAIM_CONTENT_TYPE_JSON
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            default_settle_delay_secs: default_settle_delay_secs(),
            refresh_interval_secs: default_refresh_interval_secs(),
            auto_refresh: true,
            retry_max_attempts: default_retry_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            protocol_name: default_protocol_name(),
            content_type: default_content_type(),
            evm_enabled: true,
            xrp_enabled: true,
            aptos_enabled: true,
        }
    }
}

impl SettlementConfig {
    /// Whether the given rail is enabled.
    pub fn rail_enabled(&self, chain: ChainKind) -> bool {
        match chain {
            ChainKind::Evm => self.evm_enabled,
            ChainKind::Xrp => self.xrp_enabled,
            ChainKind::Aptos => self.aptos_enabled,
        }
    }
}
