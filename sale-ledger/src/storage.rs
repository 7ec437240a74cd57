//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `state` - Ledger snapshot (key: namespace)
//! - `events` - Append-only change records (key: namespace || sequence)
//!
//! Every key starts with the 32-byte namespace derived from
//! [`LEDGER_NAMESPACE_TAG`] and the configured namespace label, so several
//! ledgers (or unrelated subsystems) can share one database without aliasing.

use crate::{
    error::{Error, Result},
    state::SaleState,
    types::{EventRecord, Hash},
    Config,
};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch,
    WriteOptions, DB,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Fixed tag every namespace is derived from
pub const LEDGER_NAMESPACE_TAG: &[u8] = b"token-sale.ledger.v1";

/// Column family names
const CF_STATE: &str = "state";
const CF_EVENTS: &str = "events";

/// Derive the storage namespace for a label
pub fn namespace_key(label: &str) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(LEDGER_NAMESPACE_TAG);
    hasher.update([0u8]);
    hasher.update(label.as_bytes());
    hasher.finalize().into()
}

/// Persisted ledger snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Ledger state
    pub state: SaleState,
    /// Sequence number the next event will receive
    pub next_sequence: u64,
}

/// Durable home for the snapshot and event log, as the actor sees it
pub trait LedgerStore: Send + Sync {
    /// Write the snapshot and new events in one atomic step
    fn commit(&self, snapshot: &Snapshot, events: &[EventRecord]) -> Result<()>;

    /// Events with `sequence >= from`, at most `limit` of them, in order
    fn events_since(&self, from: u64, limit: usize) -> Result<Vec<EventRecord>>;
}

/// Storage wrapper for RocksDB
pub struct Storage {
    db: DB,
    namespace: Hash,
    sync_writes: bool,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("path", &self.db.path())
            .field("namespace", &hex::encode(self.namespace))
            .finish()
    }
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        // Create directory if not exists
        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_STATE, Self::cf_options_state()),
            ColumnFamilyDescriptor::new(CF_EVENTS, Self::cf_options_events()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;
        let namespace = namespace_key(&config.namespace);

        tracing::info!(
            path = ?path,
            namespace = %hex::encode(namespace),
            "Opened RocksDB"
        );

        Ok(Self {
            db,
            namespace,
            sync_writes: config.rocksdb.sync_writes,
        })
    }

    // Column family options

    fn cf_options_state() -> Options {
        let mut opts = Options::default();
        // Snapshot is rewritten on every commit, favour speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_events() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts.set_bottommost_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    /// Namespace this storage reads and writes under
    pub fn namespace(&self) -> Hash {
        self.namespace
    }

    // Snapshot operations

    /// Load the persisted snapshot, if the ledger was ever committed
    pub fn load_snapshot(&self) -> Result<Option<Snapshot>> {
        let cf = self.cf_handle(CF_STATE)?;
        match self.db.get_cf(cf, self.namespace)? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Write the snapshot and new events in one atomic batch
    pub fn commit(&self, snapshot: &Snapshot, events: &[EventRecord]) -> Result<()> {
        let mut batch = WriteBatch::default();

        let cf_state = self.cf_handle(CF_STATE)?;
        batch.put_cf(cf_state, self.namespace, bincode::serialize(snapshot)?);

        let cf_events = self.cf_handle(CF_EVENTS)?;
        for record in events {
            batch.put_cf(
                cf_events,
                self.event_key(record.sequence),
                bincode::serialize(record)?,
            );
        }

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.sync_writes);
        self.db.write_opt(batch, &write_opts)?;

        tracing::debug!(
            next_sequence = snapshot.next_sequence,
            events = events.len(),
            "Ledger committed"
        );

        Ok(())
    }

    // Event operations

    /// Get event by sequence number
    pub fn get_event(&self, sequence: u64) -> Result<Option<EventRecord>> {
        let cf = self.cf_handle(CF_EVENTS)?;
        match self.db.get_cf(cf, self.event_key(sequence))? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Events with `sequence >= from`, at most `limit` of them, in order
    pub fn events_since(&self, from: u64, limit: usize) -> Result<Vec<EventRecord>> {
        let cf = self.cf_handle(CF_EVENTS)?;
        let start = self.event_key(from);
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(start.as_slice(), Direction::Forward));

        let mut events = Vec::new();
        for item in iter {
            if events.len() >= limit {
                break;
            }
            let (key, value) = item?;
            if !key.starts_with(&self.namespace) {
                break;
            }
            events.push(bincode::deserialize(&value)?);
        }

        Ok(events)
    }

    fn event_key(&self, sequence: u64) -> Vec<u8> {
        let mut key = Vec::with_capacity(40);
        key.extend_from_slice(&self.namespace);
        key.extend_from_slice(&sequence.to_be_bytes());
        key
    }
}

impl LedgerStore for Storage {
    fn commit(&self, snapshot: &Snapshot, events: &[EventRecord]) -> Result<()> {
        Storage::commit(self, snapshot, events)
    }

    fn events_since(&self, from: u64, limit: usize) -> Result<Vec<EventRecord>> {
        Storage::events_since(self, from, limit)
    }
}
