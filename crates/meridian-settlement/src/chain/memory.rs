//! Local devnet chain.
//!
//! Implements the `payment_channel` module in process for any rail. Several
//! clients created with [`InMemoryChain::as_account`] share one ledger state,
//! so a channel owner and its destination can both transact against it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use meridian_core::address::{normalize_address, normalize_channel_id, normalize_evm_address};
use meridian_core::amount::parse_amount;
use meridian_core::{ChainKind, Channel, Claim, CoreError};
use meridian_crypto::PublicKey;
use serde_json::Value;

use super::functions;
use super::{ChainClient, ChainError, TransactionPayload, TransactionResult};

#[derive(Debug, Default)]
struct ChainState {
    /// Channels by canonical id, including finalized ones.
    channels: HashMap<String, Channel>,
    /// Native balances by canonical address.
    balances: HashMap<String, u128>,
    tx_count: u64,
}

/// In-process [`ChainClient`] for one account.
#[derive(Debug, Clone)]
pub struct InMemoryChain {
    chain: ChainKind,
    address: String,
    connected: Arc<AtomicBool>,
    state: Arc<Mutex<ChainState>>,
}

/// Abort code of a failed entry function.
type Abort = String;

fn abort(code: &str, detail: impl std::fmt::Display) -> Abort {
    format!("ABORTED: {} ({})", code, detail)
}

impl InMemoryChain {
    /// Create a fresh chain with `address` funded with `funding` base units.
    pub fn new(chain: ChainKind, address: &str, funding: u128) -> Result<Self, CoreError> {
        let address = normalize_address(chain, address)?;
        let mut state = ChainState::default();
        state.balances.insert(address.clone(), funding);
        Ok(Self {
            chain,
            address,
            connected: Arc::new(AtomicBool::new(true)),
            state: Arc::new(Mutex::new(state)),
        })
    }

    /// A client for another account on the same chain state. Adds `funding`
    /// to that account's balance.
    pub fn as_account(&self, address: &str, funding: u128) -> Result<Self, CoreError> {
        let address = normalize_address(self.chain, address)?;
        if let Ok(mut state) = self.state.lock() {
            *state.balances.entry(address.clone()).or_insert(0) += funding;
        }
        Ok(Self {
            chain: self.chain,
            address,
            connected: Arc::new(AtomicBool::new(true)),
            state: Arc::clone(&self.state),
        })
    }

    /// Channel record by id, including finalized channels.
    pub fn channel(&self, channel_id: &str) -> Option<Channel> {
        let id = normalize_channel_id(self.chain, channel_id).ok()?;
        self.state.lock().ok()?.channels.get(&id).cloned()
    }

    /// Number of transactions submitted so far, failed ones included.
    pub fn transaction_count(&self) -> u64 {
        self.state.lock().map(|s| s.tx_count).unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, ChainState>, ChainError> {
        self.state
            .lock()
            .map_err(|_| ChainError::Rpc("chain state lock poisoned".into()))
    }

    fn ensure_connected(&self) -> Result<(), ChainError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ChainError::NotConnected)
        }
    }

    fn transaction_hash(&self, state: &ChainState, payload: &TransactionPayload) -> String {
        let digest = blake3::hash(
            format!(
                "{}:{}:{}:{}",
                self.chain, self.address, payload.function, state.tx_count
            )
            .as_bytes(),
        );
        match self.chain {
            ChainKind::Xrp => hex::encode_upper(digest.as_bytes()),
            ChainKind::Evm | ChainKind::Aptos => format!("0x{}", digest.to_hex()),
        }
    }

    fn execute(&self, state: &mut ChainState, hash: &str, payload: &TransactionPayload) -> Result<(), Abort> {
        let args = &payload.args;
        match payload.function.as_str() {
            functions::OPEN_CHANNEL => self.open_channel(state, hash, args),
            functions::DEPOSIT => self.deposit(state, args),
            functions::CLAIM => self.claim(state, args),
            functions::REQUEST_CLOSE => self.request_close(state, args),
            functions::FINALIZE_CLOSE => self.finalize_close(state, args),
            other => Err(abort("E_UNKNOWN_FUNCTION", other)),
        }
    }

    fn open_channel(&self, state: &mut ChainState, hash: &str, args: &[Value]) -> Result<(), Abort> {
        let destination = normalize_address(self.chain, arg_str(args, 0)?)
            .map_err(|e| abort("E_INVALID_ADDRESS", e))?;
        let destination_public_key = args.get(1).and_then(Value::as_str).map(str::to_string);
        let amount = arg_amount(args, 2)?;
        let settle_delay_secs = args
            .get(3)
            .and_then(Value::as_u64)
            .ok_or_else(|| abort("E_INVALID_ARGUMENT", "settle delay"))?;
        if amount == 0 {
            return Err(abort("E_ZERO_AMOUNT", "initial deposit must be positive"));
        }

        let channel_id = match self.chain {
            ChainKind::Aptos => self.address.clone(),
            ChainKind::Evm | ChainKind::Xrp => {
                normalize_channel_id(self.chain, hash).map_err(|e| abort("E_INVALID_ARGUMENT", e))?
            }
        };
        // A reopened channel to the same destination continues its
        // predecessor's claim sequence, so earlier claims stay stale.
        let (claimed, nonce) = match state.channels.get(&channel_id) {
            Some(existing) if !existing.finalized => return Err(abort("E_CHANNEL_EXISTS", &channel_id)),
            Some(existing) if existing.destination == destination => (existing.claimed, existing.nonce),
            _ => (0, 0),
        };
        debit(state, &self.address, amount)?;
        state.channels.insert(
            channel_id.clone(),
            Channel {
                channel_id,
                chain: self.chain,
                owner: self.address.clone(),
                destination,
                destination_public_key,
                deposited: claimed + amount,
                claimed,
                nonce,
                settle_delay_secs,
                close_requested_at: 0,
                finalized: false,
            },
        );
        Ok(())
    }

    fn deposit(&self, state: &mut ChainState, args: &[Value]) -> Result<(), Abort> {
        let channel_id = self.arg_channel_id(args, 0)?;
        let amount = arg_amount(args, 1)?;
        if amount == 0 {
            return Err(abort("E_ZERO_AMOUNT", "deposit must be positive"));
        }
        let channel = live_channel(state, &channel_id)?;
        if channel.owner != self.address {
            return Err(abort("E_NOT_OWNER", &self.address));
        }
        if channel.close_requested_at > 0 {
            return Err(abort("E_CHANNEL_CLOSING", &channel_id));
        }
        debit(state, &self.address, amount)?;
        if let Some(channel) = state.channels.get_mut(&channel_id) {
            channel.deposited += amount;
        }
        Ok(())
    }

    fn claim(&self, state: &mut ChainState, args: &[Value]) -> Result<(), Abort> {
        let raw = args.first().cloned().ok_or_else(|| abort("E_INVALID_ARGUMENT", "claim"))?;
        let claim: Claim = serde_json::from_value(raw).map_err(|e| abort("E_INVALID_CLAIM", e))?;
        if claim.chain() != self.chain {
            return Err(abort("E_INVALID_CLAIM", format!("{} claim on {}", claim.chain(), self.chain)));
        }
        let channel_id = normalize_channel_id(self.chain, claim.channel_id())
            .map_err(|e| abort("E_INVALID_CLAIM", e))?;
        let channel = live_channel(state, &channel_id)?.clone();
        if channel.destination != self.address {
            return Err(abort("E_NOT_DESTINATION", &self.address));
        }
        meridian_crypto::verify_claim(&claim).map_err(|e| abort("E_INVALID_SIGNATURE", e))?;
        if claim_signer_address(&claim).as_deref() != Some(channel.owner.as_str()) {
            return Err(abort("E_WRONG_SIGNER", &channel.owner));
        }

        let amount = claim.amount();
        let fresh = match &claim {
            Claim::Evm(c) => c.nonce > channel.nonce && amount >= channel.claimed,
            Claim::Xrp(_) => amount > channel.claimed,
            Claim::Aptos(c) => c.nonce > channel.nonce && amount > channel.claimed,
        };
        if !fresh {
            return Err(abort("E_STALE_CLAIM", format!("amount {} nonce {:?}", amount, claim.nonce())));
        }
        if amount > channel.deposited {
            return Err(abort("E_EXCEEDS_DEPOSIT", format!("{} > {}", amount, channel.deposited)));
        }

        let payout = amount - channel.claimed;
        *state.balances.entry(channel.destination.clone()).or_insert(0) += payout;
        if let Some(stored) = state.channels.get_mut(&channel_id) {
            stored.claimed = amount;
            stored.nonce = claim.nonce().unwrap_or(stored.nonce);
        }
        Ok(())
    }

    fn request_close(&self, state: &mut ChainState, args: &[Value]) -> Result<(), Abort> {
        let channel_id = self.arg_channel_id(args, 0)?;
        let channel = live_channel(state, &channel_id)?;
        if channel.owner != self.address && channel.destination != self.address {
            return Err(abort("E_NOT_PARTICIPANT", &self.address));
        }
        if channel.close_requested_at > 0 {
            return Ok(());
        }
        let now = unix_now();
        if let Some(channel) = state.channels.get_mut(&channel_id) {
            channel.close_requested_at = now;
        }
        Ok(())
    }

    fn finalize_close(&self, state: &mut ChainState, args: &[Value]) -> Result<(), Abort> {
        let channel_id = self.arg_channel_id(args, 0)?;
        let channel = live_channel(state, &channel_id)?.clone();
        if channel.owner != self.address && channel.destination != self.address {
            return Err(abort("E_NOT_PARTICIPANT", &self.address));
        }
        let finalizable_at = channel
            .finalizable_at()
            .ok_or_else(|| abort("E_CLOSE_NOT_REQUESTED", &channel_id))?;
        if unix_now() < finalizable_at {
            return Err(abort("E_SETTLE_DELAY_NOT_ELAPSED", finalizable_at));
        }
        *state.balances.entry(channel.owner.clone()).or_insert(0) += channel.remaining();
        if let Some(stored) = state.channels.get_mut(&channel_id) {
            stored.finalized = true;
        }
        Ok(())
    }

    fn arg_channel_id(&self, args: &[Value], index: usize) -> Result<String, Abort> {
        normalize_channel_id(self.chain, arg_str(args, index)?).map_err(|e| abort("E_INVALID_ARGUMENT", e))
    }
}

fn unix_now() -> u64 {
    // Clamped so that 0 keeps meaning "no close requested".
    (Utc::now().timestamp() as u64).max(1)
}

fn arg_str(args: &[Value], index: usize) -> Result<&str, Abort> {
    args.get(index)
        .and_then(Value::as_str)
        .ok_or_else(|| abort("E_INVALID_ARGUMENT", format!("argument {} must be a string", index)))
}

fn arg_amount(args: &[Value], index: usize) -> Result<u128, Abort> {
    parse_amount(arg_str(args, index)?).map_err(|e| abort("E_INVALID_ARGUMENT", e))
}

fn live_channel<'a>(state: &'a ChainState, channel_id: &str) -> Result<&'a Channel, Abort> {
    match state.channels.get(channel_id) {
        Some(channel) if !channel.finalized => Ok(channel),
        _ => Err(abort("E_CHANNEL_NOT_FOUND", channel_id)),
    }
}

fn debit(state: &mut ChainState, address: &str, amount: u128) -> Result<(), Abort> {
    let balance = state.balances.entry(address.to_string()).or_insert(0);
    if *balance < amount {
        return Err(abort("E_INSUFFICIENT_BALANCE", format!("{} < {}", balance, amount)));
    }
    *balance -= amount;
    Ok(())
}

/// Account that signed `claim`, in canonical form.
fn claim_signer_address(claim: &Claim) -> Option<String> {
    match claim {
        Claim::Xrp(c) => PublicKey::from_hex(&c.public_key).ok().map(|pk| pk.xrp_address()),
        Claim::Aptos(c) => PublicKey::from_hex(&c.public_key).ok().map(|pk| pk.aptos_address()),
        Claim::Evm(c) => normalize_evm_address(&c.signer_address).ok(),
    }
}

#[async_trait]
impl ChainClient for InMemoryChain {
    fn chain(&self) -> ChainKind {
        self.chain
    }

    async fn connect(&self) -> Result<(), ChainError> {
        self.connected.store(true, Ordering::SeqCst);
        tracing::debug!(chain = %self.chain, address = %self.address, "In-memory chain client connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ChainError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn submit_transaction(&self, payload: TransactionPayload) -> Result<TransactionResult, ChainError> {
        self.ensure_connected()?;
        let mut state = self.lock()?;
        let hash = self.transaction_hash(&state, &payload);
        state.tx_count += 1;

        let outcome = self.execute(&mut state, &hash, &payload);
        let (success, vm_status) = match outcome {
            Ok(()) => (true, "Executed successfully".to_string()),
            Err(status) => (false, status),
        };
        tracing::debug!(
            chain = %self.chain,
            function = %payload.function,
            hash = %hash,
            success,
            vm_status = %vm_status,
            "Transaction executed"
        );
        Ok(TransactionResult { success, hash, vm_status })
    }

    async fn view(&self, function: &str, args: Vec<Value>) -> Result<Vec<Value>, ChainError> {
        self.ensure_connected()?;
        if function != functions::GET_CHANNEL {
            return Err(ChainError::Rpc(format!("unknown view function {}", function)));
        }
        let raw_id = args
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| ChainError::Rpc("get_channel expects a channel id".into()))?;
        let channel_id = normalize_channel_id(self.chain, raw_id)
            .map_err(|e| ChainError::Rpc(e.to_string()))?;

        let state = self.lock()?;
        match state.channels.get(&channel_id) {
            Some(channel) if !channel.finalized => {
                let value = serde_json::to_value(channel)
                    .map_err(|e| ChainError::InvalidResponse(e.to_string()))?;
                Ok(vec![value])
            }
            _ => Err(ChainError::ResourceNotFound(channel_id)),
        }
    }

    fn address(&self) -> String {
        self.address.clone()
    }

    async fn balance(&self, address: &str) -> Result<u128, ChainError> {
        self.ensure_connected()?;
        let address = normalize_address(self.chain, address)
            .map_err(|e| ChainError::Rpc(e.to_string()))?;
        Ok(self.lock()?.balances.get(&address).copied().unwrap_or(0))
    }
}
