// crates/usv-daemon/src/shared.rs
//
// DaemonSharedState: the protocol and its store, shared across daemon tasks.
//
// Every protocol call is serialized through the one RwLock, so a rollover
// and any other call never interleave.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::RwLock;

use usv_core::error::UsvError;
use usv_core::traits::StateStore;
use usv_economics::{snapshot, Protocol};

#[derive(Clone)]
pub struct DaemonSharedState {
    pub protocol: Arc<RwLock<Protocol>>,
    pub store: Arc<dyn StateStore>,
    /// Daemon start time for uptime reporting.
    pub start_time: Instant,
}

impl DaemonSharedState {
    pub fn new(protocol: Protocol, store: Arc<dyn StateStore>) -> Self {
        Self {
            protocol: Arc::new(RwLock::new(protocol)),
            store,
            start_time: Instant::now(),
        }
    }

    /// Persist the current protocol state. Returns the block saved.
    ///
    /// The state is cloned under the read lock and written after releasing it.
    pub async fn persist(&self) -> Result<u64, UsvError> {
        let state = self.protocol.read().await.state().clone();
        snapshot::save(self.store.as_ref(), &state).await?;
        Ok(state.block)
    }
}
