// crates/usv-daemon/src/scheduler.rs
//
// Epoch scheduler for the USV daemon.
//
// Simulates block progression at a configurable interval. Each block it
// advances the protocol's height and pokes the staking rebase, which rolls
// the epoch over once its end block is reached. State is persisted after
// every rollover and at least every `snapshot_interval_blocks` blocks.

use std::time::Duration;

use tokio::sync::broadcast;

use usv_core::error::UsvError;

use crate::epoch_events::EpochEvent;
use crate::shared::DaemonSharedState;

/// Scheduler that drives block progression and epoch rollovers.
pub struct EpochScheduler {
    shared: DaemonSharedState,
    block_interval: Duration,
    snapshot_interval_blocks: u64,
    last_snapshot_block: u64,
    events: broadcast::Sender<EpochEvent>,
}

impl EpochScheduler {
    pub fn new(
        shared: DaemonSharedState,
        block_interval: Duration,
        snapshot_interval_blocks: u64,
        events: broadcast::Sender<EpochEvent>,
    ) -> Self {
        Self {
            shared,
            block_interval,
            snapshot_interval_blocks,
            last_snapshot_block: 0,
            events,
        }
    }

    /// Run until ctrl-c, then write a final snapshot.
    pub async fn run(&mut self) -> Result<(), UsvError> {
        tracing::info!(
            block_interval_ms = self.block_interval.as_millis() as u64,
            snapshot_interval_blocks = self.snapshot_interval_blocks,
            "Epoch scheduler started"
        );

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Epoch scheduler received shutdown signal");
                    break;
                }
                _ = tokio::time::sleep(self.block_interval) => {
                    self.advance_block().await?;
                }
            }
        }

        self.snapshot().await
    }

    /// Advance one block, roll the epoch over if due, and persist when needed.
    ///
    /// A failed rollover is logged and retried on the next block; store
    /// failures are returned.
    pub async fn advance_block(&mut self) -> Result<(), UsvError> {
        let rollover = {
            let mut protocol = self.shared.protocol.write().await;
            let block = protocol.advance_blocks(1);
            match protocol.rebase() {
                Ok(true) => {
                    let epoch = protocol.epoch();
                    Some(EpochEvent::EpochAdvanced {
                        epoch: epoch.number,
                        block,
                        index: protocol.index(),
                        next_distribution: epoch.distribute,
                    })
                }
                Ok(false) => {
                    tracing::trace!(block, "Block advanced");
                    None
                }
                Err(e) => {
                    tracing::error!(block, error = %e, "Epoch rollover failed");
                    None
                }
            }
        };

        let block = self.shared.protocol.read().await.block();
        if let Some(event) = rollover {
            tracing::info!(?event, "=== EPOCH BOUNDARY ===");
            // No subscribers is fine.
            let _ = self.events.send(event);
            self.snapshot().await?;
        } else if block.saturating_sub(self.last_snapshot_block) >= self.snapshot_interval_blocks {
            self.snapshot().await?;
        }
        Ok(())
    }

    async fn snapshot(&mut self) -> Result<(), UsvError> {
        let block = self.shared.persist().await?;
        self.last_snapshot_block = block;
        let _ = self.events.send(EpochEvent::SnapshotSaved { block });
        Ok(())
    }
}
