// crates/usv-daemon/tests/persistence.rs
//
// Persistence integration tests for the USV daemon.
//
// Drives the protocol through deposits, staking and an epoch rollover,
// saves it to RocksDB, reopens the database and checks the restored state.
//
// These tests use the public APIs of the underlying library crates directly
// (usv-economics, usv-store, usv-core) since the daemon is a binary crate
// with no lib.rs.

use uuid::Uuid;

use usv_core::traits::StateStore;
use usv_economics::{
    asset_address, snapshot, Capability, GenesisConfig, LiquidityPoolConfig, Protocol,
};
use usv_store::RocksStore;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const DAI_UNIT: u128 = 1_000_000_000_000_000_000;
const ONE: u128 = 1_000_000_000;

/// Create a temporary directory path using UUID to avoid conflicts.
fn temp_db_path(label: &str) -> String {
    let dir = std::env::temp_dir();
    let path = dir.join(format!("usv_test_{}_{}", label, Uuid::now_v7()));
    path.to_string_lossy().to_string()
}

fn pool() -> LiquidityPoolConfig {
    LiquidityPoolConfig {
        symbol: "USV-DAI".to_string(),
        usv_reserve: 100,
        paired_reserve: 100,
        paired_decimals: 18,
        lp_supply: 1,
    }
}

/// 100 DAI of reserves for 50 USV, 10 USV staked, first epoch rolled over.
fn active_protocol() -> Protocol {
    let config = GenesisConfig {
        liquidity_pools: vec![pool()],
        ..GenesisConfig::default()
    };
    let mut protocol = Protocol::genesis(&config).unwrap();
    let a = protocol.addresses().clone();
    let dai = asset_address("DAI");

    protocol
        .queue(&a.admin, Capability::ReserveDepositor, &a.admin)
        .unwrap();
    protocol
        .toggle(&a.admin, Capability::ReserveDepositor, &a.admin, None)
        .unwrap();
    protocol
        .mint_asset(&a.admin, &dai, &a.admin, 100 * DAI_UNIT)
        .unwrap();
    protocol
        .approve(&a.admin, &dai, &a.treasury, 100 * DAI_UNIT)
        .unwrap();
    protocol
        .deposit(&a.admin, &dai, 100 * DAI_UNIT, 50 * ONE)
        .unwrap();
    protocol.approve(&a.admin, &a.usv, &a.staking, 10 * ONE).unwrap();
    protocol.stake_and_claim(&a.admin, 10 * ONE, &a.admin).unwrap();
    protocol.set_block(2_200).unwrap();
    assert!(protocol.rebase().unwrap());
    protocol
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_state_survives_reopen() {
    let path = temp_db_path("reopen");
    let original = active_protocol();
    let a = original.addresses().clone();

    {
        let store = RocksStore::open(&path).unwrap();
        snapshot::save(&store, original.state()).await.unwrap();
    }

    let store = RocksStore::open(&path).unwrap();
    let state = snapshot::load(&store).await.unwrap().unwrap();
    let restored = Protocol::from_state(state);

    assert_eq!(restored.block(), 2_200);
    assert_eq!(restored.epoch(), original.epoch());
    assert_eq!(restored.index(), original.index());
    assert_eq!(restored.total_reserves(), original.total_reserves());
    assert_eq!(
        restored.balance_of(&a.susv, &a.admin),
        original.balance_of(&a.susv, &a.admin)
    );
    assert_eq!(restored.rebases(), original.rebases());
    assert_eq!(restored.contract_balance(), original.contract_balance());

    let _ = std::fs::remove_dir_all(&path);
}

#[tokio::test]
async fn test_restored_protocol_keeps_running() {
    let path = temp_db_path("resume");
    let original = active_protocol();
    let a = original.addresses().clone();
    {
        let store = RocksStore::open(&path).unwrap();
        snapshot::save(&store, original.state()).await.unwrap();
    }

    let store = RocksStore::open(&path).unwrap();
    let mut restored = Protocol::from_state(snapshot::load(&store).await.unwrap().unwrap());
    let lp = asset_address("USV-DAI");
    assert!(restored.value_of(&lp, DAI_UNIT).is_err());
    assert_eq!(restored.rebind_pools(&[pool()]), 1);
    assert_eq!(restored.value_of(&lp, DAI_UNIT).unwrap(), 200 * ONE);

    let mut continued = original.clone();
    for protocol in [&mut restored, &mut continued] {
        protocol.set_block(4_400).unwrap();
        assert!(protocol.rebase().unwrap());
    }
    assert_eq!(restored.index(), continued.index());
    assert_eq!(
        restored.balance_of(&a.susv, &a.admin),
        continued.balance_of(&a.susv, &a.admin)
    );

    // A second save overwrites every component in place.
    snapshot::save(&store, restored.state()).await.unwrap();
    let again = snapshot::load(&store).await.unwrap().unwrap();
    assert_eq!(again.block, 4_400);
    assert_eq!(store.scan_prefix("state:").await.unwrap().len(), 6);

    let _ = std::fs::remove_dir_all(&path);
}

#[tokio::test]
async fn test_empty_database_has_no_state() {
    let path = temp_db_path("empty");
    let store = RocksStore::open(&path).unwrap();
    assert!(snapshot::load(&store).await.unwrap().is_none());
    let _ = std::fs::remove_dir_all(&path);
}
