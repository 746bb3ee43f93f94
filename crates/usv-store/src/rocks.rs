// crates/usv-store/src/rocks.rs
//
// RocksDB-backed persistent storage for protocol state records.
//
// Key format (written by usv-economics::snapshot):
//   - `state:meta`                -> block height, administrator, addresses
//   - `state:{component}`         -> JSON-serialized component state
//   - `state:barter:{address}`    -> JSON-serialized barter depository
//
// All records of one commit go through a single `WriteBatch`, so a crash
// never leaves a half-applied transaction on disk.

use async_trait::async_trait;
use rocksdb::{DBWithThreadMode, MultiThreaded, Options, WriteBatch};

use usv_core::error::UsvError;
use usv_core::traits::{StateRecord, StateStore};

/// RocksDB wrapper implementing the `StateStore` trait.
#[derive(Debug)]
pub struct RocksStore {
    db: DBWithThreadMode<MultiThreaded>,
}

impl RocksStore {
    /// Open a RocksDB database at the given filesystem path.
    ///
    /// Creates the database directory if it does not exist.
    pub fn open(path: &str) -> Result<Self, UsvError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);

        let db = DBWithThreadMode::<MultiThreaded>::open(&opts, path)
            .map_err(|e| UsvError::Storage(format!("Failed to open RocksDB at {}: {}", path, e)))?;

        Ok(Self { db })
    }

    /// Get raw bytes from RocksDB, mapping errors to UsvError::Storage.
    fn get_raw(&self, key: &[u8]) -> Result<Option<Vec<u8>>, UsvError> {
        self.db
            .get(key)
            .map_err(|e| UsvError::Storage(format!("RocksDB get failed: {}", e)))
    }

    /// Write all records in one batch.
    pub fn put_records_sync(&self, records: &[StateRecord]) -> Result<(), UsvError> {
        let mut batch = WriteBatch::default();
        for record in records {
            batch.put(record.key.as_bytes(), &record.value);
        }
        self.db
            .write(batch)
            .map_err(|e| UsvError::Storage(format!("RocksDB batch write failed: {}", e)))
    }

    /// Collect every record under `prefix`.
    pub fn scan_prefix_sync(&self, prefix: &str) -> Result<Vec<StateRecord>, UsvError> {
        let prefix_bytes = prefix.as_bytes();
        let mut records = Vec::new();

        for item in self.db.prefix_iterator(prefix_bytes) {
            let (key, value) = item
                .map_err(|e| UsvError::Storage(format!("RocksDB iteration error: {}", e)))?;

            // No prefix extractor is configured, so the iterator runs past the prefix.
            if !key.starts_with(prefix_bytes) {
                break;
            }

            let key = String::from_utf8(key.to_vec())
                .map_err(|e| UsvError::Storage(format!("Non UTF-8 key in state store: {}", e)))?;
            records.push(StateRecord {
                key,
                value: value.to_vec(),
            });
        }

        Ok(records)
    }
}

#[async_trait]
impl StateStore for RocksStore {
    async fn put_records(&self, records: &[StateRecord]) -> Result<(), UsvError> {
        self.put_records_sync(records)
    }

    async fn get_record(&self, key: &str) -> Result<Option<Vec<u8>>, UsvError> {
        self.get_raw(key.as_bytes())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<StateRecord>, UsvError> {
        self.scan_prefix_sync(prefix)
    }
}
