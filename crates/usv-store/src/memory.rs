// crates/usv-store/src/memory.rs
//
// In-memory state store implementing the `StateStore` trait.
//
// Used by tests and by the daemon's `--ephemeral` mode. Records live in a
// BTreeMap so prefix scans come back in key order, matching RocksDB.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;

use usv_core::error::UsvError;
use usv_core::traits::{StateRecord, StateStore};

/// Volatile key/value store with the same semantics as `RocksStore`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> UsvError {
    UsvError::Storage("MemoryStore lock poisoned".to_string())
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn put_records(&self, records: &[StateRecord]) -> Result<(), UsvError> {
        // One write guard for the whole batch keeps the commit atomic.
        let mut guard = self.records.write().map_err(|_| poisoned())?;
        for record in records {
            guard.insert(record.key.clone(), record.value.clone());
        }
        Ok(())
    }

    async fn get_record(&self, key: &str) -> Result<Option<Vec<u8>>, UsvError> {
        let guard = self.records.read().map_err(|_| poisoned())?;
        Ok(guard.get(key).cloned())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<StateRecord>, UsvError> {
        let guard = self.records.read().map_err(|_| poisoned())?;
        Ok(guard
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| StateRecord {
                key: key.clone(),
                value: value.clone(),
            })
            .collect())
    }
}
