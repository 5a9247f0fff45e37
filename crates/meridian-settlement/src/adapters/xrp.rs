use meridian_core::ChainKind;

use super::{ChannelAdapter, Rail};
use crate::chain::TransactionResult;

/// XRP Ledger: channels are identified by the (uppercase hex) hash of the
/// `PaymentChannelCreate` transaction. Claims carry a cumulative amount only.
pub struct XrpRail;

impl Rail for XrpRail {
    const CHAIN: ChainKind = ChainKind::Xrp;
    const REQUIRES_DESTINATION_KEY: bool = false;
    const SINGLE_CHANNEL_PER_OWNER: bool = false;

    fn channel_id_from_open(_owner: &str, result: &TransactionResult) -> String {
        result.hash.clone()
    }
}

pub type XrpChannelAdapter = ChannelAdapter<XrpRail>;
