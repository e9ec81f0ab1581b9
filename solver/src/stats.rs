//! Per-worker statistics. Counters are plain atomics written with relaxed
//! ordering by their owning worker and sampled by the supervisor; nothing on
//! the hot path synchronizes through them.

use std::fmt::{Display, Error, Formatter};
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};

#[derive(Default)]
pub struct WorkerStats {
    pub conflicts: AtomicU64,
    pub decisions: AtomicU64,
    pub propagations: AtomicU64,
    pub restarts: AtomicU64,
    pub reduces: AtomicU64,

    /// Allocation counts by tier (never decremented).
    pub alloc_private: AtomicU64,
    pub alloc_shared: AtomicU64,
    pub alloc_permanent: AtomicU64,

    /// Currently watched learnt clauses by tier.
    pub live_private: AtomicI64,
    pub live_shared: AtomicI64,
    pub two_watched: AtomicI64,
    pub one_watched: AtomicI64,

    pub imported_clauses: AtomicU64,
    pub imported_units: AtomicU64,
    pub exported: AtomicU64,
    pub promoted: AtomicU64,
    pub dropped_shares: AtomicU64,

    pub vivifications: AtomicU64,
    pub failed_vivifications: AtomicU64,
    pub vivify_shrunk_lits: AtomicU64,
    pub vivify_propagations: AtomicU64,

    /// Median candidate LBD recorded by the last reduce (vivification bar).
    pub median_lbd: AtomicU32,
}

impl WorkerStats {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
    pub fn inc(counter: &AtomicI64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
    pub fn dec(counter: &AtomicI64) {
        let before = counter.fetch_sub(1, Ordering::Relaxed);
        debug_assert!(before > 0);
    }
    pub fn live(counter: &AtomicI64) -> i64 {
        counter.load(Ordering::Relaxed)
    }

    /// Fraction of all propagations spent inside vivification.
    pub fn vivify_spend(&self) -> f64 {
        let total = self.propagations.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            self.vivify_propagations.load(Ordering::Relaxed) as f64 / total as f64
        }
    }

    /// Crude payoff estimate of vivification: literals removed per clause
    /// visited, scaled into the same unit as `vivify_spend`.
    pub fn vivify_impact(&self) -> f64 {
        let tried = self.vivifications.load(Ordering::Relaxed) + self.failed_vivifications.load(Ordering::Relaxed);
        if tried == 0 {
            1.0
        } else {
            self.vivifications.load(Ordering::Relaxed) as f64 / tried as f64
        }
    }
}

/// Aggregate of all worker counters at one sampling instant.
#[derive(Default, Clone, Copy, Debug)]
pub struct GlobalSnapshot {
    pub workers: usize,
    pub conflicts: u64,
    pub min_conflicts: u64,
    pub decisions: u64,
    pub propagations: u64,
    pub restarts: u64,
    pub reduces: u64,
    pub alloc_private: u64,
    pub alloc_shared: u64,
    pub alloc_permanent: u64,
    pub live_private: i64,
    pub live_shared: i64,
    pub imported_clauses: u64,
    pub imported_units: u64,
    pub exported: u64,
    pub promoted: u64,
    pub dropped_shares: u64,
    pub vivifications: u64,
    pub vivify_shrunk_lits: u64,
}

impl GlobalSnapshot {
    pub fn collect(stats: &[WorkerStats]) -> GlobalSnapshot {
        let mut g = GlobalSnapshot {
            workers: stats.len(),
            min_conflicts: u64::MAX,
            ..Default::default()
        };
        for s in stats {
            let c = WorkerStats::get(&s.conflicts);
            g.conflicts += c;
            g.min_conflicts = g.min_conflicts.min(c);
            g.decisions += WorkerStats::get(&s.decisions);
            g.propagations += WorkerStats::get(&s.propagations);
            g.restarts += WorkerStats::get(&s.restarts);
            g.reduces += WorkerStats::get(&s.reduces);
            g.alloc_private += WorkerStats::get(&s.alloc_private);
            g.alloc_shared += WorkerStats::get(&s.alloc_shared);
            g.alloc_permanent += WorkerStats::get(&s.alloc_permanent);
            g.live_private += WorkerStats::live(&s.live_private);
            g.live_shared += WorkerStats::live(&s.live_shared);
            g.imported_clauses += WorkerStats::get(&s.imported_clauses);
            g.imported_units += WorkerStats::get(&s.imported_units);
            g.exported += WorkerStats::get(&s.exported);
            g.promoted += WorkerStats::get(&s.promoted);
            g.dropped_shares += WorkerStats::get(&s.dropped_shares);
            g.vivifications += WorkerStats::get(&s.vivifications);
            g.vivify_shrunk_lits += WorkerStats::get(&s.vivify_shrunk_lits);
        }
        if g.workers == 0 {
            g.min_conflicts = 0;
        }
        g
    }

    /// Population estimate driving complete-vivification re-arming: permanent
    /// clauses plus the average per-worker watched shared/private load.
    pub fn relevant_clauses(&self) -> u64 {
        let n = self.workers.max(1) as u64;
        let watched = (self.live_shared.max(0) + self.live_private.max(0)) as u64;
        self.alloc_permanent + watched / n
    }
}

impl Display for GlobalSnapshot {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        writeln!(f, "conflicts           : {}", self.conflicts)?;
        writeln!(f, "decisions           : {}", self.decisions)?;
        writeln!(f, "propagations        : {}", self.propagations)?;
        writeln!(f, "restarts            : {}", self.restarts)?;
        writeln!(f, "reduces             : {}", self.reduces)?;
        writeln!(
            f,
            "learnt (priv/sh/perm): {} / {} / {}",
            self.alloc_private, self.alloc_shared, self.alloc_permanent
        )?;
        writeln!(
            f,
            "exchange            : {} exported, {} imported, {} units, {} promoted, {} dropped",
            self.exported, self.imported_clauses, self.imported_units, self.promoted, self.dropped_shares
        )?;
        write!(
            f,
            "vivification        : {} clauses, {} literals removed",
            self.vivifications, self.vivify_shrunk_lits
        )
    }
}
