//! RocksDB-backed claim log for the Meridian node.

use anyhow::Result;
use meridian_core::{ChainKind, MessageId};
use meridian_settlement::store::latest_verified;
use meridian_settlement::{ClaimStore, InsertOutcome, ReceivedClaimRecord, SentClaimRecord, StoreError};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, DB};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::Mutex;

/// Column family names.
const CF_SENT: &str = "sent_claims";
const CF_RECEIVED: &str = "received_claims";
const CF_SENT_BY_PEER: &str = "sent_by_peer";
const CF_RECEIVED_BY_CHANNEL: &str = "received_by_channel";

const SEP: char = '\0';

/// Claim store persisted in RocksDB.
///
/// Records live in `sent_claims` and `received_claims` keyed by message id.
/// The two index families map `(peer, timestamp, id)` and
/// `(peer, chain, channel, timestamp, id)` back to message ids so scans come
/// out oldest first.
pub struct RocksClaimStore {
    db: DB,
    write_lock: Mutex<()>,
}

impl RocksClaimStore {
    /// Open or create the claim database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)?;

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_SENT, Options::default()),
            ColumnFamilyDescriptor::new(CF_RECEIVED, Options::default()),
            ColumnFamilyDescriptor::new(CF_SENT_BY_PEER, Options::default()),
            ColumnFamilyDescriptor::new(CF_RECEIVED_BY_CHANNEL, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&opts, path, cf_descriptors)?;
        tracing::info!(path = %path.display(), "Opened claim store");

        Ok(Self {
            db,
            write_lock: Mutex::new(()),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Backend(format!("column family '{}' not found", name)))
    }

    /// Write `record` plus its index entry unless `id` is already present.
    fn insert_once<T: Serialize>(
        &self,
        records_cf: &str,
        index_cf: &str,
        id: &str,
        index_key: String,
        record: &T,
    ) -> Result<InsertOutcome, StoreError> {
        let value = serde_json::to_vec(record)?;
        let records = self.cf(records_cf)?;
        let index = self.cf(index_cf)?;

        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| StoreError::Backend("claim store write lock poisoned".into()))?;
        if self.db.get_cf(&records, id.as_bytes()).map_err(backend)?.is_some() {
            return Ok(InsertOutcome::Duplicate);
        }

        let mut batch = WriteBatch::default();
        batch.put_cf(&records, id.as_bytes(), &value);
        batch.put_cf(&index, index_key.as_bytes(), id.as_bytes());
        self.db.write(batch).map_err(backend)?;
        Ok(InsertOutcome::Inserted)
    }

    fn get<T: DeserializeOwned>(&self, records_cf: &str, id: &str) -> Result<Option<T>, StoreError> {
        let records = self.cf(records_cf)?;
        match self.db.get_cf(&records, id.as_bytes()).map_err(backend)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Resolve every index entry under `prefix` to its record.
    fn scan<T: DeserializeOwned>(&self, records_cf: &str, index_cf: &str, prefix: &str) -> Result<Vec<T>, StoreError> {
        let records = self.cf(records_cf)?;
        let index = self.cf(index_cf)?;

        let mut out = Vec::new();
        let iter = self
            .db
            .iterator_cf(&index, IteratorMode::From(prefix.as_bytes(), Direction::Forward));
        for item in iter {
            let (key, id) = item.map_err(backend)?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            match self.db.get_cf(&records, &id).map_err(backend)? {
                Some(bytes) => out.push(serde_json::from_slice(&bytes)?),
                None => {
                    tracing::warn!(
                        index = index_cf,
                        message_id = %String::from_utf8_lossy(&id),
                        "Index entry without record"
                    );
                }
            }
        }
        Ok(out)
    }
}

fn backend(e: rocksdb::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn timestamp_key(ts: i64) -> String {
    format!("{:020}", ts.max(0))
}

fn peer_prefix(peer_id: &str) -> String {
    format!("{peer_id}{SEP}")
}

fn channel_prefix(peer_id: &str, chain: ChainKind, channel_id: &str) -> String {
    format!("{peer_id}{SEP}{chain}{SEP}{channel_id}{SEP}")
}

impl ClaimStore for RocksClaimStore {
    fn insert_sent(&self, record: &SentClaimRecord) -> Result<InsertOutcome, StoreError> {
        let id = record.message_id.as_str();
        let index_key = format!(
            "{}{}{SEP}{}",
            peer_prefix(&record.peer_id),
            timestamp_key(record.timestamp_ms),
            id
        );
        self.insert_once(CF_SENT, CF_SENT_BY_PEER, id, index_key, record)
    }

    fn insert_received(&self, record: &ReceivedClaimRecord) -> Result<InsertOutcome, StoreError> {
        let id = record.message_id.as_str();
        let index_key = format!(
            "{}{}{SEP}{}",
            channel_prefix(&record.peer_id, record.chain, &record.channel_id),
            timestamp_key(record.timestamp_ms),
            id
        );
        self.insert_once(CF_RECEIVED, CF_RECEIVED_BY_CHANNEL, id, index_key, record)
    }

    fn received_by_id(&self, message_id: &MessageId) -> Result<Option<ReceivedClaimRecord>, StoreError> {
        self.get(CF_RECEIVED, message_id.as_str())
    }

    fn latest_verified_received(
        &self,
        peer_id: &str,
        chain: ChainKind,
        channel_id: &str,
    ) -> Result<Option<ReceivedClaimRecord>, StoreError> {
        let records = self.received_for_channel(peer_id, chain, channel_id)?;
        Ok(latest_verified(records.iter()))
    }

    fn sent_for_peer(&self, peer_id: &str) -> Result<Vec<SentClaimRecord>, StoreError> {
        self.scan(CF_SENT, CF_SENT_BY_PEER, &peer_prefix(peer_id))
    }

    fn received_for_channel(
        &self,
        peer_id: &str,
        chain: ChainKind,
        channel_id: &str,
    ) -> Result<Vec<ReceivedClaimRecord>, StoreError> {
        self.scan(
            CF_RECEIVED,
            CF_RECEIVED_BY_CHANNEL,
            &channel_prefix(peer_id, chain, channel_id),
        )
    }
}
