// crates/usv-daemon/src/epoch_events.rs
//
// Events broadcast from the epoch scheduler to daemon tasks.
//
// The EpochScheduler publishes on a tokio broadcast channel; the event
// logger in main.rs and tests subscribe.

/// Events emitted by the epoch scheduler during block progression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EpochEvent {
    /// A staking epoch rolled over: sUSV rebased and rewards distributed.
    EpochAdvanced {
        /// The new epoch number.
        epoch: u64,
        /// Block height at which the rollover ran.
        block: u64,
        /// sUSV index after the rebase.
        index: u128,
        /// Profit queued for the next rebase.
        next_distribution: u128,
    },
    /// Protocol state was written to the store.
    SnapshotSaved {
        block: u64,
    },
}
