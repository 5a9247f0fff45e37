use meridian_core::ChainKind;

use super::{ChannelAdapter, Rail};
use crate::chain::TransactionResult;

/// Aptos: one channel per owner account, so the channel id is the owner
/// address. Claims carry both a cumulative amount and a nonce.
pub struct AptosRail;

impl Rail for AptosRail {
    const CHAIN: ChainKind = ChainKind::Aptos;
    const REQUIRES_DESTINATION_KEY: bool = true;
    const SINGLE_CHANNEL_PER_OWNER: bool = true;

    fn channel_id_from_open(owner: &str, _result: &TransactionResult) -> String {
        owner.to_string()
    }
}

pub type AptosChannelAdapter = ChannelAdapter<AptosRail>;
