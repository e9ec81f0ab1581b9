//! Shared coordination between workers: the arena, the exchange rings, tier
//! policy, the winner-takes-all result handshake and the complete
//! vivification machinery.

use crate::arena::{CRef, ClauseArena, ClauseKind, Header};
use crate::config::{Params, TierParams};
use crate::core::Lit;
use crate::exchange::{ChunkPool, ReferenceSharer, WorkerId};
use crate::stats::{GlobalSnapshot, WorkerStats};
use crate::{OutOfMemory, SolveStatus};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Barrier, Mutex};

const NO_WINNER: usize = usize::MAX;

/// Result published by the winning worker.
#[derive(Clone)]
pub struct Outcome {
    pub winner: WorkerId,
    pub status: SolveStatus,
    pub model: Option<Vec<Option<bool>>>,
}

/// The process-wide clause database shared by all workers.
pub struct ClauseDb {
    pub arena: ClauseArena,
    pub sharer: ReferenceSharer,
    pub tiers: TierParams,
    pub stats: Box<[WorkerStats]>,

    finished: AtomicUsize,
    abort: AtomicBool,
    running: AtomicUsize,
    outcome: Mutex<Option<Outcome>>,

    /// Barrier for the synchronous startup vivification rounds.
    pub start_barrier: Barrier,
    startup_target: u32,
    startup_done: AtomicU32,
    startup_progress: AtomicU32,

    /// 0 = idle, 1 = armed by the supervisor, 2 = pass in progress.
    vivify_phase: AtomicU32,
    pub vivify_pool: ChunkPool<CRef>,
    relevant_target: AtomicU64,
}

impl ClauseDb {
    pub fn new(params: &Params) -> ClauseDb {
        let n = params.num_workers;
        ClauseDb {
            arena: ClauseArena::new(params.arena, n),
            sharer: ReferenceSharer::new(n, params.exchange),
            tiers: params.tiers,
            stats: (0..n).map(|_| WorkerStats::default()).collect(),
            finished: AtomicUsize::new(NO_WINNER),
            abort: AtomicBool::new(false),
            running: AtomicUsize::new(0),
            outcome: Mutex::new(None),
            start_barrier: Barrier::new(n),
            startup_target: params.startup_vivifications,
            startup_done: AtomicU32::new(0),
            startup_progress: AtomicU32::new(1),
            vivify_phase: AtomicU32::new(0),
            vivify_pool: ChunkPool::new(),
            relevant_target: AtomicU64::new(0),
        }
    }

    pub fn num_workers(&self) -> usize {
        self.stats.len()
    }

    // ------------------------------------------------------------------
    // termination & winner handshake

    pub fn job_finished(&self) -> bool {
        self.abort.load(Ordering::Relaxed) || self.finished.load(Ordering::Relaxed) != NO_WINNER
    }

    /// Supervisor-side abort on resource exhaustion; the final result becomes
    /// `Unknown` unless a winner already published.
    pub fn set_abort(&self) {
        self.abort.store(true, Ordering::SeqCst);
    }

    pub fn aborted(&self) -> bool {
        self.abort.load(Ordering::Relaxed)
    }

    /// Publishes a result; only the first caller wins.
    pub fn found_solution(
        &self,
        worker: WorkerId,
        status: SolveStatus,
        model: Option<Vec<Option<bool>>>,
        msg: &str,
    ) -> bool {
        debug_assert_ne!(status, SolveStatus::Unknown);
        let won = self
            .finished
            .compare_exchange(NO_WINNER, worker, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if won {
            *self.outcome.lock().unwrap() = Some(Outcome {
                winner: worker,
                status,
                model,
            });
            tracing::info!(worker, ?status, "{msg}");
        }
        won
    }

    /// Final verdict; call after all workers stopped.
    pub fn result(&self) -> (SolveStatus, Option<Outcome>) {
        match self.outcome.lock().unwrap().clone() {
            Some(outcome) => (outcome.status, Some(outcome)),
            None => (SolveStatus::Unknown, None),
        }
    }

    pub fn worker_started(&self) {
        self.running.fetch_add(1, Ordering::SeqCst);
    }
    pub fn worker_stopped(&self) {
        self.running.fetch_sub(1, Ordering::SeqCst);
    }
    pub fn num_running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------
    // startup vivification rounds

    /// True while another synchronous startup round should run. All workers
    /// evaluate this between barrier waves and agree on the answer.
    pub fn startup_round_pending(&self) -> bool {
        self.startup_done.load(Ordering::SeqCst) < self.startup_target
            && self.startup_progress.load(Ordering::SeqCst) > 0
    }

    /// Called by worker 0 after refilling the pool for a startup round.
    pub fn startup_round_started(&self) {
        self.startup_done.fetch_add(1, Ordering::SeqCst);
        self.startup_progress.store(0, Ordering::SeqCst);
    }

    pub fn startup_add_progress(&self, vivified: u32) {
        self.startup_progress.fetch_add(vivified, Ordering::SeqCst);
    }

    // ------------------------------------------------------------------
    // complete vivification

    /// Initializes the re-arm threshold (twice the initial clause count).
    pub fn set_relevant_target(&self, target: u64) {
        self.relevant_target.store(target, Ordering::Relaxed);
    }

    /// Supervisor hook: arms a complete pass when the relevant clause
    /// population doubled since the last one.
    pub fn maybe_arm_complete_vivify(&self, snap: &GlobalSnapshot) {
        if !self.tiers.use_complete_vivify || self.vivify_phase.load(Ordering::SeqCst) != 0 {
            return;
        }
        let relevant = snap.relevant_clauses();
        if relevant > self.relevant_target.load(Ordering::Relaxed) {
            self.relevant_target.store(2 * relevant, Ordering::Relaxed);
            if self
                .vivify_phase
                .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                tracing::info!("arming complete vivification pass");
            }
        }
    }

    /// The next reducing worker claims the collection of its watched clauses.
    pub fn should_collect_crefs(&self) -> bool {
        self.vivify_phase
            .compare_exchange(1, 2, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn complete_vivify_in_progress(&self) -> bool {
        self.vivify_phase.load(Ordering::SeqCst) == 2
    }

    /// Called by the worker that drained the last chunk.
    pub fn complete_vivify_finished(&self) {
        let _ = self
            .vivify_phase
            .compare_exchange(2, 0, Ordering::SeqCst, Ordering::SeqCst);
    }

    // ------------------------------------------------------------------
    // clause admission

    /// Chooses the tier of a freshly learnt clause. A clause without any
    /// reuse yet only reaches the shared tier when the reuse threshold is
    /// zero; otherwise it starts private and is promoted on use.
    pub fn learnt_header(&self, lbd: u32, size: usize) -> Header {
        if self.tiers.is_permanent(lbd, size) {
            Header::new(ClauseKind::Permanent, lbd, size as u32)
        } else if self.tiers.is_shared(lbd, size, 0) {
            Header::new(ClauseKind::Shared, lbd, size as u32)
        } else {
            Header::new(ClauseKind::Private, lbd, size as u32)
        }
    }

    /// Allocates a clause of the given tier in the worker's bucket, counting
    /// it and (for counted tiers, when `share` is set) publishing the handle
    /// to the peer rings.
    pub fn add_clause(
        &self,
        worker: WorkerId,
        ts: &mut crate::arena::AllocState,
        lits: &[Lit],
        header: Header,
        share: bool,
    ) -> Result<CRef, OutOfMemory> {
        let cref = self.arena.alloc(ts, lits, header)?;
        let stats = &self.stats[worker];
        match header.kind() {
            ClauseKind::Private => WorkerStats::bump(&stats.alloc_private),
            ClauseKind::Shared => WorkerStats::bump(&stats.alloc_shared),
            ClauseKind::Permanent => WorkerStats::bump(&stats.alloc_permanent),
        }
        if share && header.kind().is_counted() {
            let dropped = self.sharer.publish_cref(&self.arena, worker, cref);
            WorkerStats::add(&stats.dropped_shares, dropped as u64);
        }
        Ok(cref)
    }

    /// Publishes a learnt unit literal.
    pub fn add_unit(&self, worker: WorkerId, unit: Lit) {
        self.sharer.publish_unit(worker, unit);
    }

    /// Settles clause handles still queued for workers that already exited
    /// (a worker may publish after a peer drained its rings for the last
    /// time). Must only run once all workers stopped.
    pub fn settle_rings(&self) {
        debug_assert_eq!(self.num_running(), 0);
        let mut buf = Vec::new();
        for reader in 0..self.num_workers() {
            buf.clear();
            self.sharer.drain_crefs(reader, &mut buf);
            for &cref in &buf {
                self.arena.remove_clause(cref);
            }
        }
    }
}
