use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

/// Counters shared by every runner and the scheduler of one run.
#[derive(Debug, Default)]
pub struct RunStats {
    // Runner side
    pub writes_acknowledged: AtomicU64,
    pub writes_failed: AtomicU64,
    pub writes_abandoned: AtomicU64,

    // Scheduler side
    pub partitions: AtomicU64,
    pub heals: AtomicU64,
    pub restarts: AtomicU64,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_acknowledged(&self) {
        self.writes_acknowledged.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.writes_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_abandoned(&self) {
        self.writes_abandoned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_partition(&self) {
        self.partitions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_heal(&self) {
        self.heals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_restart(&self) {
        self.restarts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            writes_acknowledged: self.writes_acknowledged.load(Ordering::Relaxed),
            writes_failed: self.writes_failed.load(Ordering::Relaxed),
            writes_abandoned: self.writes_abandoned.load(Ordering::Relaxed),
            partitions: self.partitions.load(Ordering::Relaxed),
            heals: self.heals.load(Ordering::Relaxed),
            restarts: self.restarts.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`RunStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub writes_acknowledged: u64,
    pub writes_failed: u64,
    pub writes_abandoned: u64,
    pub partitions: u64,
    pub heals: u64,
    pub restarts: u64,
}

impl StatsSnapshot {
    /// Writes the runners attempted to deliver.
    pub fn writes_issued(&self) -> u64 {
        self.writes_acknowledged + self.writes_failed
    }
}

/// Shared handle to run statistics.
pub type SharedStats = Arc<RunStats>;

pub fn create_stats() -> SharedStats {
    Arc::new(RunStats::new())
}
