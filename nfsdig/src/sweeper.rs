use std::time::Duration;

use anyhow::Result;
use log::{debug, info, warn};

use crate::lifecycle::{PeriodicTask, ShutdownSignal, run_periodic};
use crate::state::{FlowTable, SharedFlowTable, monotonic_now};
use crate::telemetry;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub scanned: usize,
    pub evicted: usize,
    pub errors: usize,
}

/// Deletes every record older than `ttl` at time `now`.
///
/// A record is expired once `now - timestamp > ttl`. Read and delete
/// failures are counted and skipped.
pub fn sweep_once(table: &mut dyn FlowTable, now: Duration, ttl: Duration) -> SweepStats {
    let expire_before = now.saturating_sub(ttl).as_nanos() as u64;
    let mut stats = SweepStats::default();

    for entry in table.entries() {
        let (key, record) = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("[xdp] Flow table iteration error: {:#}", e);
                stats.errors += 1;
                continue;
            }
        };
        stats.scanned += 1;

        if record.timestamp >= expire_before {
            continue;
        }
        match table.remove(key) {
            Ok(true) => stats.evicted += 1,
            Ok(false) => debug!("[xdp] Flow {} vanished before eviction", key),
            Err(e) => {
                warn!("[xdp] Failed to evict flow {}: {:#}", key, e);
                stats.errors += 1;
            }
        }
    }
    stats
}

/// Periodically evicts stale flows until shutdown.
pub struct EvictionSweeper {
    table: SharedFlowTable,
    ttl: Duration,
    interval: Duration,
}

impl EvictionSweeper {
    pub fn new(table: SharedFlowTable, ttl: Duration, interval: Duration) -> Self {
        Self {
            table,
            ttl,
            interval,
        }
    }

    pub fn sweep(&self) -> Result<SweepStats> {
        let now = monotonic_now()?;
        let mut table = self
            .table
            .lock()
            .map_err(|_| anyhow::anyhow!("flow table lock poisoned"))?;
        Ok(sweep_once(&mut *table, now, self.ttl))
    }

    pub async fn run(self, shutdown: ShutdownSignal) {
        info!(
            "[xdp] Evicting flows older than {:?} every {:?}",
            self.ttl, self.interval
        );
        run_periodic(self.interval, shutdown, self).await;
        debug!("[xdp] Sweeper stopped");
    }
}

impl PeriodicTask for EvictionSweeper {
    fn on_tick(&mut self) {
        match self.sweep() {
            Ok(stats) => {
                if stats.evicted > 0 {
                    info!(
                        "[xdp] Evicted {} of {} flows",
                        stats.evicted, stats.scanned
                    );
                }
                telemetry::record_flows_evicted(stats.evicted as u64);
            }
            Err(e) => warn!("[xdp] Sweep failed: {:#}", e),
        }
    }
}
