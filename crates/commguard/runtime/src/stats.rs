// Dotlanth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Monitor profiling counters

use metrics::gauge;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct MonitorStats {
    pub field_reads: AtomicU64,
    pub field_comm_reads: AtomicU64,
    pub array_reads: AtomicU64,
    pub array_comm_reads: AtomicU64,
    pub lock_acquires: AtomicU64,
    pub lock_comm_acquires: AtomicU64,
    /// Full context comparisons that missed the writer memo
    pub slow_paths: AtomicU64,
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub violations: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub field_reads: u64,
    pub field_comm_reads: u64,
    pub array_reads: u64,
    pub array_comm_reads: u64,
    pub lock_acquires: u64,
    pub lock_comm_acquires: u64,
    pub slow_paths: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub violations: u64,
    pub distinct_stacks: u64,
    pub threads: u64,
}

impl MonitorStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            field_reads: self.field_reads.load(Ordering::Relaxed),
            field_comm_reads: self.field_comm_reads.load(Ordering::Relaxed),
            array_reads: self.array_reads.load(Ordering::Relaxed),
            array_comm_reads: self.array_comm_reads.load(Ordering::Relaxed),
            lock_acquires: self.lock_acquires.load(Ordering::Relaxed),
            lock_comm_acquires: self.lock_comm_acquires.load(Ordering::Relaxed),
            slow_paths: self.slow_paths.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            violations: self.violations.load(Ordering::Relaxed),
            distinct_stacks: 0,
            threads: 0,
        }
    }
}

impl StatsSnapshot {
    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 { 0.0 } else { self.cache_hits as f64 / total as f64 }
    }

    /// Publish to the installed `metrics` recorder
    pub fn publish(&self) {
        gauge!("commguard_field_reads", self.field_reads as f64);
        gauge!("commguard_field_comm_reads", self.field_comm_reads as f64);
        gauge!("commguard_array_reads", self.array_reads as f64);
        gauge!("commguard_array_comm_reads", self.array_comm_reads as f64);
        gauge!("commguard_lock_acquires", self.lock_acquires as f64);
        gauge!("commguard_lock_comm_acquires", self.lock_comm_acquires as f64);
        gauge!("commguard_slow_paths", self.slow_paths as f64);
        gauge!("commguard_cache_hit_rate", self.cache_hit_rate());
        gauge!("commguard_violations", self.violations as f64);
        gauge!("commguard_distinct_stacks", self.distinct_stacks as f64);
        gauge!("commguard_threads", self.threads as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reads_counters() {
        let stats = MonitorStats::new();
        MonitorStats::bump(&stats.field_reads);
        MonitorStats::bump(&stats.field_reads);
        MonitorStats::bump(&stats.cache_hits);
        MonitorStats::bump(&stats.cache_misses);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.field_reads, 2);
        assert_eq!(snapshot.cache_hit_rate(), 0.5);
        assert_eq!(StatsSnapshot::default().cache_hit_rate(), 0.0);

        // No recorder installed: publishing is a no-op.
        snapshot.publish();
    }
}
