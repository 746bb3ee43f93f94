// crates/usv-economics/src/snapshot.rs
//
// Persistence of `ProtocolState` through a `StateStore`.
//
// Layout (JSON values):
//   state:meta               -> SnapshotMeta (format version, block, addresses)
//   state:assets             -> AssetBank
//   state:treasury           -> Treasury (liquidity valuations are not persisted)
//   state:rebasing           -> StakedUsv
//   state:staking            -> StakingCoordinator
//   state:distributor        -> Distributor
//   state:barter:{address}   -> BarterDepository
//
// A snapshot is written in a single atomic batch.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::protocol::{ProtocolAddresses, ProtocolState};
use usv_core::error::UsvError;
use usv_core::traits::{StateRecord, StateStore};

/// Current snapshot layout version.
pub const SNAPSHOT_VERSION: u32 = 1;

pub const META_KEY: &str = "state:meta";
const ASSETS_KEY: &str = "state:assets";
const TREASURY_KEY: &str = "state:treasury";
const REBASING_KEY: &str = "state:rebasing";
const STAKING_KEY: &str = "state:staking";
const DISTRIBUTOR_KEY: &str = "state:distributor";
const BARTER_PREFIX: &str = "state:barter:";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SnapshotMeta {
    version: u32,
    block: u64,
    addresses: ProtocolAddresses,
}

fn record<T: Serialize>(key: String, value: &T) -> Result<StateRecord, UsvError> {
    Ok(StateRecord {
        key,
        value: serde_json::to_vec(value)?,
    })
}

/// Split `state` into store records.
pub fn to_records(state: &ProtocolState) -> Result<Vec<StateRecord>, UsvError> {
    let meta = SnapshotMeta {
        version: SNAPSHOT_VERSION,
        block: state.block,
        addresses: state.addresses.clone(),
    };
    let mut records = vec![
        record(META_KEY.to_string(), &meta)?,
        record(ASSETS_KEY.to_string(), &state.assets)?,
        record(TREASURY_KEY.to_string(), &state.treasury)?,
        record(REBASING_KEY.to_string(), &state.rebasing)?,
        record(STAKING_KEY.to_string(), &state.staking)?,
        record(DISTRIBUTOR_KEY.to_string(), &state.distributor)?,
    ];
    for (address, barter) in &state.barters {
        records.push(record(format!("{}{}", BARTER_PREFIX, address.to_hex()), barter)?);
    }
    Ok(records)
}

fn required<T: DeserializeOwned>(records: &BTreeMap<&str, &[u8]>, key: &str) -> Result<T, UsvError> {
    let bytes = records
        .get(key)
        .ok_or_else(|| UsvError::NotFound(format!("snapshot record {}", key)))?;
    Ok(serde_json::from_slice(bytes)?)
}

/// Rebuild state from store records.
///
/// Returns `Ok(None)` when no snapshot metadata is present.
pub fn from_records(records: &[StateRecord]) -> Result<Option<ProtocolState>, UsvError> {
    let by_key: BTreeMap<&str, &[u8]> = records
        .iter()
        .map(|r| (r.key.as_str(), r.value.as_slice()))
        .collect();
    if !by_key.contains_key(META_KEY) {
        return Ok(None);
    }

    let meta: SnapshotMeta = required(&by_key, META_KEY)?;
    if meta.version != SNAPSHOT_VERSION {
        return Err(UsvError::Serialization(format!(
            "unsupported snapshot version {} (expected {})",
            meta.version, SNAPSHOT_VERSION
        )));
    }

    let mut barters = BTreeMap::new();
    for (key, bytes) in &by_key {
        if !key.starts_with(BARTER_PREFIX) {
            continue;
        }
        let barter: crate::barter::BarterDepository = serde_json::from_slice(bytes)?;
        barters.insert(barter.address(), barter);
    }

    Ok(Some(ProtocolState {
        block: meta.block,
        addresses: meta.addresses,
        assets: required(&by_key, ASSETS_KEY)?,
        treasury: required(&by_key, TREASURY_KEY)?,
        rebasing: required(&by_key, REBASING_KEY)?,
        staking: required(&by_key, STAKING_KEY)?,
        distributor: required(&by_key, DISTRIBUTOR_KEY)?,
        barters,
    }))
}

/// Persist `state` atomically.
pub async fn save(store: &dyn StateStore, state: &ProtocolState) -> Result<(), UsvError> {
    let records = to_records(state)?;
    store.put_records(&records).await?;
    tracing::debug!(block = state.block, records = records.len(), "Snapshot saved");
    Ok(())
}

/// Load the persisted state, if any.
///
/// Liquidity valuations must be re-attached with `Protocol::rebind_valuation`.
pub async fn load(store: &dyn StateStore) -> Result<Option<ProtocolState>, UsvError> {
    let records = store.scan_prefix("state:").await?;
    let state = from_records(&records)?;
    if let Some(state) = &state {
        tracing::info!(block = state.block, barters = state.barters.len(), "Snapshot loaded");
    }
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{asset_address, GenesisConfig, Protocol};
    use usv_store::MemoryStore;

    #[test]
    fn test_records_rebuild_state() {
        let mut protocol = Protocol::genesis(&GenesisConfig::default()).unwrap();
        let admin = protocol.addresses().admin;
        let dai = asset_address("DAI");
        protocol.mint_asset(&admin, &dai, &admin, 1_000).unwrap();
        protocol.advance_blocks(42);

        let records = to_records(protocol.state()).unwrap();
        let state = from_records(&records).unwrap().unwrap();
        let restored = Protocol::from_state(state);
        assert_eq!(restored.block(), 42);
        assert_eq!(restored.balance_of(&dai, &admin), 1_000);
        assert_eq!(restored.index(), protocol.index());
        assert!(restored.is_granted(crate::permissions::Capability::ReserveToken, &dai));
    }

    #[test]
    fn test_missing_meta_is_empty() {
        assert!(from_records(&[]).unwrap().is_none());
    }

    #[test]
    fn test_missing_component_fails() {
        let protocol = Protocol::genesis(&GenesisConfig::default()).unwrap();
        let records: Vec<StateRecord> = to_records(protocol.state())
            .unwrap()
            .into_iter()
            .filter(|r| r.key != TREASURY_KEY)
            .collect();
        assert!(matches!(from_records(&records), Err(UsvError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_save_and_load_through_store() {
        let store = MemoryStore::new();
        assert!(load(&store).await.unwrap().is_none());

        let protocol = Protocol::genesis(&GenesisConfig::default()).unwrap();
        save(&store, protocol.state()).await.unwrap();
        let loaded = load(&store).await.unwrap().unwrap();
        assert_eq!(loaded.addresses, protocol.state().addresses);
        assert_eq!(loaded.block, 0);
    }
}
