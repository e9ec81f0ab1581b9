//! One CDCL worker: private watch index and assignment over the shared
//! clause database.

use crate::arena::{AllocState, CRef, ClauseKind};
use crate::assign::Assignment;
use crate::collections::bqueue::BoundedQueue;
use crate::config::SearchParams;
use crate::core::{Lit, Var};
use crate::db::ClauseDb;
use crate::exchange::WorkerId;
use crate::stats::WorkerStats;
use crate::watch::{BinaryWatchLists, OneWatchLists, Reason, TwoWatchLists, WatchSlot};
use crate::{OutOfMemory, SolveStatus};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use smallvec::SmallVec;
use std::sync::Arc;

mod analyze;
mod import;
mod reduce;
mod vivify;

/// Initial state handed to every worker by the supervisor.
pub struct WorkerSeed {
    pub num_vars: usize,
    /// Permanent clauses already allocated in the arena.
    pub initial: Arc<Vec<CRef>>,
    /// Root-level facts from preprocessing.
    pub roots: Arc<Vec<Lit>>,
}

pub struct Worker {
    pub(crate) id: WorkerId,
    pub(crate) db: Arc<ClauseDb>,
    pub(crate) params: SearchParams,

    pub(crate) assign: Assignment,
    pub(crate) bin: BinaryWatchLists,
    pub(crate) two: TwoWatchLists,
    pub(crate) one: OneWatchLists,
    pub(crate) alloc: AllocState,

    // learnt two-watched clauses currently attached, by tier
    pub(crate) n_private: i64,
    pub(crate) n_shared: i64,

    // import buffers and vivification candidates
    pub(crate) cref_buf: Vec<CRef>,
    pub(crate) unit_buf: Vec<Lit>,
    pub(crate) to_vivify: Vec<CRef>,

    // analysis temporaries
    pub(crate) seen: Vec<bool>,
    pub(crate) analyze_toclear: Vec<Lit>,
    pub(crate) analyze_stack: Vec<Lit>,
    pub(crate) learnt: Vec<Lit>,
    pub(crate) used_in_conflict: Vec<Reason>,
    pub(crate) stamp: Vec<u32>,
    pub(crate) stamp_counter: u32,

    // restart state
    pub(crate) lbd_queue: BoundedQueue,
    pub(crate) trail_queue: BoundedQueue,
    pub(crate) sum_lbd: f64,
    pub(crate) conflicts: u64,
    pub(crate) conflicts_at_restart: u64,
    pub(crate) curr_restarts: u64,

    // reduce budget
    pub(crate) conflicts_before_reduce: u64,
    pub(crate) restart_factor: u64,
    pub(crate) last_reduce_conflicts: u64,
    pub(crate) median_lbd: u32,

    pub(crate) var_decay: f64,
    pub(crate) rng: SmallRng,
    /// Set once this worker published (or observed) a final verdict.
    pub(crate) done: bool,
}

/// Luby sequence value for restart run `x` with base `y`.
fn luby(y: f64, mut x: u64) -> f64 {
    let (mut size, mut seq) = (1u64, 0i32);
    while size < x + 1 {
        seq += 1;
        size = 2 * size + 1;
    }
    while size - 1 != x {
        size = (size - 1) >> 1;
        seq -= 1;
        x %= size;
    }
    y.powi(seq)
}

impl Worker {
    pub fn new(db: Arc<ClauseDb>, id: WorkerId, params: SearchParams, seed: &WorkerSeed) -> Worker {
        let num_lits = 2 * seed.num_vars;
        let mut w = Worker {
            id,
            params: params.clone(),
            assign: Assignment::new(seed.num_vars),
            bin: BinaryWatchLists::new(num_lits),
            two: TwoWatchLists::new(num_lits),
            one: OneWatchLists::new(num_lits),
            alloc: AllocState::new(),
            n_private: 0,
            n_shared: 0,
            cref_buf: Vec::new(),
            unit_buf: Vec::new(),
            to_vivify: Vec::new(),
            seen: vec![false; seed.num_vars],
            analyze_toclear: Vec::new(),
            analyze_stack: Vec::new(),
            learnt: Vec::new(),
            used_in_conflict: Vec::new(),
            stamp: vec![0; seed.num_vars + 1],
            stamp_counter: 0,
            lbd_queue: BoundedQueue::new(params.lbd_queue_len),
            trail_queue: BoundedQueue::new(params.trail_queue_len),
            sum_lbd: 0.0,
            conflicts: 0,
            conflicts_at_restart: 0,
            curr_restarts: 0,
            conflicts_before_reduce: params.first_reduce,
            restart_factor: 1,
            last_reduce_conflicts: 0,
            median_lbd: 0,
            var_decay: params.var_decay,
            rng: SmallRng::seed_from_u64(params.seed),
            done: false,
            db,
        };
        for &l in seed.roots.iter() {
            if w.assign.value_lit(l).is_none() {
                w.assign.enqueue(l, Reason::Unit);
            }
        }
        for &cref in seed.initial.iter() {
            w.attach_initial(cref);
        }
        w
    }

    fn attach_initial(&mut self, cref: CRef) {
        let view = self.db.arena.clause(cref);
        let lits: SmallVec<[Lit; 8]> = view.collect_lits();
        if lits.len() == 2 {
            let assign = &self.assign;
            let (_, conflict) = self.bin.attach(
                cref,
                [lits[0], lits[1]],
                |l| assign.value_lit(l),
                |l| assign.level_lit(l),
            );
            debug_assert!(!conflict, "preprocessing leaves no falsified clause");
        } else {
            self.two.attach_first(cref, &lits, view.lbd());
        }
    }

    pub(crate) fn stat(&self) -> &WorkerStats {
        &self.db.stats[self.id]
    }

    // ------------------------------------------------------------------
    // result publication

    pub(crate) fn found_unsat(&mut self, msg: &str) {
        if !self.done {
            self.done = true;
            self.db.found_solution(self.id, SolveStatus::Unsat, None, msg);
        }
    }

    fn found_sat(&mut self) {
        if !self.done {
            self.done = true;
            let model = self.assign.model();
            self.db
                .found_solution(self.id, SolveStatus::Sat, Some(model), "model found");
        }
    }

    // ------------------------------------------------------------------
    // propagation

    /// Propagates all enqueued facts over the three watcher tiers in fixed
    /// order. Returns the slot of a falsified clause on conflict.
    pub(crate) fn propagate(&mut self) -> Option<Reason> {
        let mut conflict = None;
        while conflict.is_none() {
            let Some(p) = self.assign.next_pending() else {
                break;
            };
            WorkerStats::bump(&self.stat().propagations);
            conflict = self.propagate_binary(p);
            if conflict.is_none() {
                conflict = self.propagate_two(p);
            }
            if conflict.is_none() {
                conflict = self.propagate_one(p);
            }
        }
        conflict
    }

    fn propagate_binary(&mut self, p: Lit) -> Option<Reason> {
        let pi = p.code();
        for pos in 0..self.bin.list(pi).len() {
            let w = self.bin.list(pi)[pos];
            match self.assign.value_lit(w.blocker) {
                Some(true) => {}
                None => {
                    self.assign.enqueue(w.blocker, Reason::Binary(WatchSlot::new(pi, pos)));
                }
                Some(false) => {
                    self.assign.skip_pending();
                    return Some(Reason::Binary(WatchSlot::new(pi, pos)));
                }
            }
        }
        None
    }

    /// Copies the entry at `i` down to `j`, repairing the sibling pointer.
    fn keep_two(&mut self, pi: usize, i: usize, j: usize) {
        if i != j {
            let w = self.two.list(pi)[i];
            let peer = self.two.peer_slot_of(&w);
            self.two.list_mut(pi)[j] = w;
            self.two.watcher_mut(peer).peer_pos = j as u32;
        }
    }

    fn propagate_two(&mut self, p: Lit) -> Option<Reason> {
        let pi = p.code();
        let end = self.two.list(pi).len();
        let mut conflict = None;
        let mut i = 0;
        let mut j = 0;
        while i < end {
            if conflict.is_some() {
                // conflict found: keep the remaining watches untouched
                self.keep_two(pi, i, j);
                i += 1;
                j += 1;
                continue;
            }
            let w = self.two.list(pi)[i];
            if self.assign.is_true(w.blocker) {
                self.keep_two(pi, i, j);
                i += 1;
                j += 1;
                continue;
            }
            // look for a non-false literal to move this watch to
            let replacement = {
                let view = self.db.arena.clause(w.cref);
                let mut found = None;
                for k in 0..view.size() {
                    let l = view.lit(k);
                    if l != w.blocker && l != !p && self.assign.value_lit(l) != Some(false) {
                        found = Some(l);
                        break;
                    }
                }
                found
            };
            match replacement {
                Some(l) => {
                    self.two.move_watcher(pi, i, l);
                    i += 1;
                }
                None => {
                    // clause is unit on the blocker, or falsified
                    self.keep_two(pi, i, j);
                    let slot = WatchSlot::new(pi, j);
                    i += 1;
                    j += 1;
                    match self.assign.value_lit(w.blocker) {
                        None => self.assign.enqueue(w.blocker, Reason::Two(slot)),
                        Some(false) => {
                            self.assign.skip_pending();
                            conflict = Some(Reason::Two(slot));
                        }
                        Some(true) => unreachable!("blocker was checked above"),
                    }
                }
            }
        }
        self.two.list_mut(pi).truncate(j);
        conflict
    }

    fn propagate_one(&mut self, p: Lit) -> Option<Reason> {
        let pi = p.code();
        let mut i = 0;
        while i < self.one.list(pi).len() {
            let w = self.one.list(pi)[i];
            if self.assign.is_true(w.blocker) {
                i += 1;
                continue;
            }
            let moved = {
                let view = self.db.arena.clause(w.cref);
                let mut found = None;
                for k in 0..view.size() {
                    let l = view.lit(k);
                    if l != !p && self.assign.value_lit(l) != Some(false) {
                        found = Some((l, view.lit(if k == 0 { 1 } else { 0 })));
                        break;
                    }
                }
                found
            };
            match moved {
                Some((l, blocker)) => {
                    // re-watch the first non-false literal; no second watcher
                    self.one
                        .list_mut((!l).code())
                        .push(crate::watch::OneWatcher { cref: w.cref, blocker });
                    self.one.list_mut(pi).swap_remove(i);
                }
                None => {
                    // every literal is false: the lazy watcher fires
                    self.assign.skip_pending();
                    return Some(Reason::One(WatchSlot::new(pi, i)));
                }
            }
        }
        None
    }

    // ------------------------------------------------------------------
    // decisions & restarts

    fn decide(&mut self) -> Option<Lit> {
        let v = if self.params.random_var_freq > 0.0
            && self.assign.num_vars() > 0
            && self.rng.random::<f64>() < self.params.random_var_freq
        {
            let r = Var::new(self.rng.random_range(0..self.assign.num_vars() as u32));
            if self.assign.value(r).is_none() {
                Some(r)
            } else {
                self.assign.pick_branch_var()
            }
        } else {
            self.assign.pick_branch_var()
        }?;
        let phase = if self.params.rnd_pol {
            self.rng.random::<bool>()
        } else {
            self.assign.saved_phase(v)
        };
        Some(Lit::new(v, phase))
    }

    fn restart_pending(&self) -> bool {
        if self.done {
            return false;
        }
        if self.params.luby {
            let budget = luby(self.params.restart_inc, self.curr_restarts) * self.params.restart_first as f64;
            (self.conflicts - self.conflicts_at_restart) as f64 >= budget
        } else {
            self.conflicts > 0
                && self.lbd_queue.full()
                && self.lbd_queue.average() * self.params.k > self.sum_lbd / self.conflicts as f64
        }
    }

    fn restart(&mut self) {
        self.assign.cancel_until(0);
        self.lbd_queue.clear();
        self.curr_restarts += 1;
        self.conflicts_at_restart = self.conflicts;
        WorkerStats::bump(&self.stat().restarts);
    }

    // ------------------------------------------------------------------
    // the search loop

    /// Runs the worker until a verdict is published or the job is aborted.
    pub fn run(&mut self) {
        self.db.worker_started();
        if let Err(OutOfMemory) = self.solve() {
            tracing::warn!(worker = self.id, "arena exhausted, aborting");
            self.db.set_abort();
        }
        self.release();
        self.db.worker_stopped();
    }

    fn solve(&mut self) -> Result<(), OutOfMemory> {
        self.startup_vivification();
        self.search()
    }

    fn search(&mut self) -> Result<(), OutOfMemory> {
        while !self.db.job_finished() && !self.done {
            match self.propagate() {
                Some(conflict) => {
                    self.conflicts += 1;
                    WorkerStats::bump(&self.stat().conflicts);
                    if self.assign.decision_level() == 0 {
                        self.found_unsat("conflict at root level");
                        break;
                    }
                    self.handle_conflict(conflict)?;
                    self.maybe_early_import();
                }
                None => {
                    if self.restart_pending() {
                        self.restart();
                        continue;
                    }
                    if self.assign.decision_level() == 0 {
                        self.root_maintenance()?;
                        if self.done || self.db.job_finished() {
                            break;
                        }
                        if self.assign.has_pending_propagation() {
                            continue;
                        }
                    }
                    match self.decide() {
                        Some(l) => {
                            WorkerStats::bump(&self.stat().decisions);
                            self.assign.new_decision_level();
                            self.assign.enqueue(l, Reason::Unit);
                        }
                        None => {
                            self.found_sat();
                            break;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Analysis, learning and backjumping for one conflict.
    fn handle_conflict(&mut self, conflict: Reason) -> Result<(), OutOfMemory> {
        self.trail_queue.push(self.assign.trail_len() as u64);
        // blocking restart: the trail is growing too fast to give up on it
        if self.conflicts > self.params.blocking_restart_floor
            && self.lbd_queue.full()
            && self.trail_queue.full()
            && (self.assign.trail_len() as f64) > self.params.r * self.trail_queue.average()
        {
            self.lbd_queue.clear();
        }

        let (backjump, lbd) = self.analyze(conflict);
        self.lbd_queue.push(lbd as u64);
        self.sum_lbd += lbd as f64;

        // promotion / LBD side effects of the clauses met during analysis
        // (slot-preserving, so recorded reasons stay valid)
        self.apply_conflict_side_effects()?;

        self.assign.cancel_until(backjump);
        self.learn_current(lbd)?;

        // activity decays, with the Glucose ramp on the variable side
        if self.conflicts % 5000 == 0 && self.var_decay < self.params.max_var_decay {
            self.var_decay += 0.01;
        }
        self.assign.var_decay(self.var_decay);
        Ok(())
    }

    /// Installs the learnt clause held in `self.learnt` and asserts its first
    /// literal.
    fn learn_current(&mut self, lbd: u32) -> Result<(), OutOfMemory> {
        debug_assert!(!self.learnt.is_empty());
        if self.learnt.len() == 1 {
            debug_assert_eq!(self.assign.decision_level(), 0);
            self.assign.enqueue(self.learnt[0], Reason::Unit);
            if self.db.tiers.sharing_enabled {
                self.db.add_unit(self.id, self.learnt[0]);
                WorkerStats::bump(&self.stat().exported);
            }
            return Ok(());
        }
        let header = self.db.learnt_header(lbd, self.learnt.len());
        let share = header.kind().is_counted();
        let learnt = std::mem::take(&mut self.learnt);
        let cref = self.db.add_clause(self.id, &mut self.alloc, &learnt, header, share)?;
        if share {
            WorkerStats::bump(&self.stat().exported);
        }
        let reason = if learnt.len() == 2 {
            let assign = &self.assign;
            let (slot, conflict) = self.bin.attach(
                cref,
                [learnt[0], learnt[1]],
                |l| assign.value_lit(l),
                |l| assign.level_lit(l),
            );
            debug_assert!(!conflict);
            Reason::Binary(slot)
        } else {
            let slot = self.two.attach_first(cref, &learnt, lbd);
            match header.kind() {
                ClauseKind::Private => self.n_private += 1,
                ClauseKind::Shared => self.n_shared += 1,
                ClauseKind::Permanent => {}
            }
            Reason::Two(slot)
        };
        self.assign.enqueue(learnt[0], reason);
        self.learnt = learnt;
        Ok(())
    }

    fn maybe_early_import(&mut self) {
        let tiers = &self.db.tiers;
        if tiers.use_early_import
            && self.conflicts & tiers.import_conflict_mask == 0
            && self.db.sharer.pending_crefs(self.id) > tiers.import_conflict_mask as usize
        {
            self.import_crefs();
            self.import_units();
        }
    }

    /// Level-0 maintenance: complete-vivification duty, periodic reduce with
    /// clause improvement, and the import of foreign clauses and units.
    fn root_maintenance(&mut self) -> Result<(), OutOfMemory> {
        debug_assert_eq!(self.assign.decision_level(), 0);
        self.drain_complete_vivify()?;
        if !self.done && self.should_reduce() {
            self.improve_clauses()?;
            self.reduce()?;
            WorkerStats::bump(&self.stat().reduces);
            self.set_budget_until_next_reduce();
        }
        if !self.done {
            self.import_crefs();
            self.import_units();
        }
        self.publish_live_stats();
        Ok(())
    }

    fn should_reduce(&self) -> bool {
        self.conflicts >= self.restart_factor * self.conflicts_before_reduce
    }

    fn set_budget_until_next_reduce(&mut self) {
        self.last_reduce_conflicts = self.conflicts;
        self.restart_factor = self.conflicts / self.conflicts_before_reduce + 1;
        self.conflicts_before_reduce += self.params.inc_reduce;
    }

    fn publish_live_stats(&self) {
        let s = self.stat();
        s.live_private.store(self.n_private, std::sync::atomic::Ordering::Relaxed);
        s.live_shared.store(self.n_shared, std::sync::atomic::Ordering::Relaxed);
        s.two_watched
            .store(self.two.num_attached() as i64, std::sync::atomic::Ordering::Relaxed);
        s.one_watched
            .store(self.one.num_attached() as i64, std::sync::atomic::Ordering::Relaxed);
        s.median_lbd.store(self.median_lbd, std::sync::atomic::Ordering::Relaxed);
    }

    // ------------------------------------------------------------------
    // exit

    /// Releases every reference this worker holds so the arena can be fully
    /// reclaimed: drains the rings once, dereferences all watched handles and
    /// gives back the current buckets.
    fn release(&mut self) {
        self.assign.cancel_until(0);
        self.db.arena.collect_garbage(&mut self.alloc);

        // settle foreign handles still queued for us
        self.cref_buf.clear();
        self.db.sharer.drain_crefs(self.id, &mut self.cref_buf);
        let crefs = std::mem::take(&mut self.cref_buf);
        for cref in crefs {
            self.db.arena.remove_clause(cref);
        }

        for cref in self.two.header_crefs() {
            self.db.arena.remove_clause(cref);
        }
        let mut seen_binary: Vec<CRef> = Vec::new();
        for i in 0..self.bin.num_lists() {
            for pos in 0..self.bin.list(i).len() {
                let w = self.bin.list(i)[pos];
                // each binary clause appears on two lists; release it once
                if w.blocker.code() < i {
                    seen_binary.push(w.cref);
                }
            }
        }
        for cref in seen_binary {
            self.db.arena.remove_clause(cref);
        }
        for i in 0..self.one.num_lists() {
            for pos in 0..self.one.list(i).len() {
                let cref = self.one.list(i)[pos].cref;
                self.db.arena.remove_clause(cref);
            }
        }
        self.db.arena.release_alloc_state(&mut self.alloc);
    }
}
