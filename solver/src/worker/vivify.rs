//! Clause vivification: probing that the negated prefix of a clause
//! propagates a contradiction (or a tail implication) and replacing the
//! clause by the strictly-shorter derived one.

use crate::arena::{CRef, ClauseKind, Header};
use crate::core::Lit;
use crate::stats::WorkerStats;
use crate::watch::{Reason, WatchSlot};
use crate::worker::Worker;
use crate::OutOfMemory;

enum VivifyOutcome {
    /// A strictly shorter entailed clause, with its LBD bound.
    Shrunk(Vec<Lit>, u32),
    SatisfiedAtRoot,
    Unchanged,
}

impl Worker {
    /// Flags a two-watched clause for vivification unless it was already
    /// vivified (the bit is cleared again on LBD improvement).
    pub(crate) fn mark_to_vivify(&mut self, header_slot: WatchSlot, enforce: bool) {
        let cref = self.two.cref(header_slot);
        let view = self.db.arena.clause(cref);
        if view.is_vivified() && !enforce {
            return;
        }
        let lbd = self.two.watcher(header_slot).lbd();
        let eligible = view.kind() == ClauseKind::Permanent
            || (lbd <= self.db.tiers.max_vivify_lbd
                && (view.size() as u32).saturating_sub(1) > lbd
                && !view.kind().is_private());
        if eligible {
            self.db.arena.set_vivified(cref);
            self.to_vivify.push(cref);
        }
    }

    /// Vivifies all queued candidates plus the best own learnt clauses,
    /// within the propagation budget. Runs at level 0 before a reduce.
    pub(crate) fn improve_clauses(&mut self) -> Result<(), OutOfMemory> {
        if self.db.tiers.use_private_vivify {
            self.collect_vivification_candidates();
        }
        let refs = std::mem::take(&mut self.to_vivify);
        self.vivify_refs(&refs)?;
        Ok(())
    }

    /// Picks the best half of this worker's own unvivified learnt clauses as
    /// additional candidates.
    fn collect_vivification_candidates(&mut self) {
        let mut num_relevant = 0usize;
        let mut cands: Vec<WatchSlot> = Vec::new();
        for i in 0..self.two.num_lists() {
            for pos in 0..self.two.list(i).len() {
                let w = self.two.list(i)[pos];
                if !w.is_header() {
                    continue;
                }
                let view = self.db.arena.clause(w.cref);
                if view.lbd() > 0 && !w.is_imported() {
                    num_relevant += 1;
                }
                if !w.is_imported()
                    && !view.is_replaced()
                    && !view.is_vivified()
                    && view.lbd() > 0
                    && !self.db.arena.should_be_removed(w.cref)
                    && w.lbd() <= self.db.tiers.max_vivify_lbd
                {
                    cands.push(WatchSlot::new(i, pos));
                }
            }
        }
        cands.sort_by(|&x, &y| {
            let (wx, wy) = (self.two.watcher(x), self.two.watcher(y));
            wy.lbd()
                .cmp(&wx.lbd())
                .then(wx.activity().cmp(&wy.activity()))
                .then_with(|| {
                    let sx = self.db.arena.clause(wx.cref).size();
                    let sy = self.db.arena.clause(wy.cref).size();
                    sy.cmp(&sx)
                })
        });
        let limit = (cands.len() / 2).saturating_sub(num_relevant);
        for &slot in &cands[(limit + 1).min(cands.len())..] {
            let cref = self.two.cref(slot);
            if !self.db.arena.clause(cref).is_vivified() {
                self.to_vivify.push(cref);
            }
        }
    }

    /// Vivifies a batch of clause handles, stopping early when the job ends
    /// or the propagation spend outruns the measured payoff.
    pub(crate) fn vivify_refs(&mut self, refs: &[CRef]) -> Result<u32, OutOfMemory> {
        let props_start = WorkerStats::get(&self.stat().propagations);
        let mut shrunk = 0;
        for &cref in refs {
            if self.done || self.db.job_finished() {
                break;
            }
            let view = self.db.arena.clause(cref);
            if view.size() == 0 || view.lit(0) == Lit::UNDEF {
                continue; // released while queued
            }
            let permanent = view.kind() == ClauseKind::Permanent;
            self.db.arena.set_vivified(cref);
            if !self.db.arena.should_be_removed(cref)
                && !self.db.arena.should_be_replaced(cref)
                && !view.is_replaced()
                && !view.is_private_deleted()
            {
                self.import_units();
                if self.done {
                    break;
                }
                shrunk += self.vivify_clause(cref)?;
            }
            let props_now = WorkerStats::get(&self.stat().propagations).max(1);
            let spent = (props_now - props_start) as f64 / props_now as f64;
            if !permanent && self.stat().vivify_impact() + self.db.tiers.vivify_spend_tolerance < spent {
                break;
            }
        }
        let props_end = WorkerStats::get(&self.stat().propagations);
        WorkerStats::add(&self.stat().vivify_propagations, props_end - props_start);
        Ok(shrunk)
    }

    fn vivify_clause(&mut self, cref: CRef) -> Result<u32, OutOfMemory> {
        let (old_size, old_lbd) = {
            let view = self.db.arena.clause(cref);
            (view.size(), view.lbd())
        };
        match self.vivify_core(cref) {
            VivifyOutcome::Shrunk(lits, lbd) => {
                debug_assert!(lits.len() < old_size);
                let lbd = if old_lbd > 0 { lbd.min(old_lbd) } else { old_lbd };
                if self.replace_clause(cref, &lits, lbd)? {
                    if lits.len() == 1 {
                        match self.assign.value_lit(lits[0]) {
                            None => self.assign.enqueue(lits[0], Reason::Unit),
                            Some(true) => {}
                            Some(false) => self.found_unsat("vivified unit contradicts root"),
                        }
                    }
                    WorkerStats::bump(&self.stat().vivifications);
                    WorkerStats::add(&self.stat().vivify_shrunk_lits, (old_size - lits.len()) as u64);
                    Ok(1)
                } else {
                    Ok(0)
                }
            }
            VivifyOutcome::SatisfiedAtRoot => {
                // logically useless from here on, drop it globally
                self.db.arena.mark_deleted_chain(cref);
                Ok(0)
            }
            VivifyOutcome::Unchanged => {
                WorkerStats::bump(&self.stat().failed_vivifications);
                Ok(0)
            }
        }
    }

    /// Assumes the negation of each still-undefined literal in turn,
    /// harvesting either a conflict-derived subclause, an implied-literal
    /// subclause, or plain falsified-literal removals.
    fn vivify_core(&mut self, cref: CRef) -> VivifyOutcome {
        debug_assert_eq!(self.assign.decision_level(), 0);
        if self.assign.has_pending_propagation() && self.propagate().is_some() {
            self.found_unsat("conflict at root level");
            return VivifyOutcome::Unchanged;
        }
        if self.done {
            return VivifyOutcome::Unchanged;
        }
        let (out, size) = {
            let view = self.db.arena.clause(cref);
            let mut o = Vec::with_capacity(view.size());
            for l in view.lits() {
                match self.assign.value_lit(l) {
                    None => o.push(l),
                    Some(true) => return VivifyOutcome::SatisfiedAtRoot,
                    Some(false) => {}
                }
            }
            (o, view.size())
        };
        if out.is_empty() {
            self.found_unsat("clause falsified at root");
            return VivifyOutcome::Unchanged;
        }

        let mut derived: Option<Vec<Lit>> = None;
        let mut delete_idx: Vec<usize> = Vec::new();
        let mut i = 0;
        while i < out.len() {
            let l = out[i];
            match self.assign.value_lit(l) {
                None => {
                    self.assign.new_decision_level();
                    self.assign.enqueue(!l, Reason::Unit);
                    if let Some(conflict) = self.propagate() {
                        if self.db.tiers.use_backtrack_vivify {
                            match self.vivify_conflict_subclause(conflict, cref) {
                                Some(sub) => derived = Some(sub),
                                None => {
                                    // the clause fed its own conflict: only
                                    // drop the trailing falsified literals
                                    for k in i + 1..out.len() {
                                        if self.assign.is_false(out[k]) {
                                            delete_idx.push(k);
                                        }
                                    }
                                }
                            }
                        } else {
                            for k in i + 1..out.len() {
                                delete_idx.push(k);
                            }
                        }
                        break;
                    }
                    i += 1;
                }
                Some(true) => {
                    if i + 1 < out.len() {
                        derived = Some(self.vivify_true_subclause(&out, i));
                        break;
                    }
                    i += 1;
                }
                Some(false) => {
                    delete_idx.push(i);
                    i += 1;
                }
            }
        }
        self.assign.cancel_until(0);

        let final_lits: Vec<Lit> = match derived {
            Some(d) if d.len() <= out.len() - delete_idx.len() => d,
            _ => {
                let mut res = Vec::with_capacity(out.len());
                let mut di = 0;
                for (k, &l) in out.iter().enumerate() {
                    if di < delete_idx.len() && delete_idx[di] == k {
                        di += 1;
                    } else {
                        res.push(l);
                    }
                }
                res
            }
        };
        if final_lits.is_empty() {
            self.found_unsat("empty clause after vivification");
            return VivifyOutcome::Unchanged;
        }
        if final_lits.len() < size {
            let lbd = (final_lits.len() - 1) as u32;
            VivifyOutcome::Shrunk(final_lits, lbd)
        } else {
            VivifyOutcome::Unchanged
        }
    }

    /// Extracts the subset of the vivified clause whose negated literals fed
    /// the conflict. Returns `None` when the clause under vivification
    /// itself participated in the derivation (the result would not be an
    /// independent strengthening, so the caller must not replace from it).
    fn vivify_conflict_subclause(&mut self, conflict: Reason, viv: CRef) -> Option<Vec<Lit>> {
        let root = self.assign.root_len();
        let mut participated = self.reason_cref(conflict) == viv;
        let lits = self.reason_lits(conflict);
        for &q in &lits {
            if self.assign.level_lit(q) > 0 {
                self.seen[q.var().index()] = true;
            }
        }
        let mut out = Vec::new();
        for idx in (root..self.assign.trail_len()).rev() {
            let x = self.assign.trail()[idx];
            if !self.seen[x.var().index()] {
                continue;
            }
            self.seen[x.var().index()] = false;
            match self.assign.reason(x.var()) {
                Reason::Unit => out.push(!x),
                r => {
                    if self.reason_cref(r) == viv {
                        participated = true;
                    }
                    let rl = self.reason_lits(r);
                    for &q in &rl {
                        if q.var() != x.var() && self.assign.level_lit(q) > 0 {
                            self.seen[q.var().index()] = true;
                        }
                    }
                }
            }
        }
        debug_assert!(!out.is_empty());
        if participated {
            None
        } else {
            Some(out)
        }
    }

    /// A literal of the clause became true under the assumed prefix: backjump
    /// to the lowest level where one is true and extract the implication
    /// clause `{p} ∪ {assumptions feeding p}`.
    fn vivify_true_subclause(&mut self, out: &[Lit], true_idx: usize) -> Vec<Lit> {
        let mut p = out[true_idx];
        for &l in &out[true_idx + 1..] {
            if self.assign.value_lit(l) == Some(true) && self.assign.level_lit(l) < self.assign.level_lit(p) {
                p = l;
            }
        }
        self.assign.cancel_until(self.assign.level_lit(p).max(0) as usize);
        debug_assert!(self.assign.is_true(p));
        let mut res = vec![p];
        if self.assign.level_lit(p) == 0 {
            return res;
        }
        let root = self.assign.root_len();
        self.seen[p.var().index()] = true;
        for idx in (root..self.assign.trail_len()).rev() {
            let x = self.assign.trail()[idx];
            if !self.seen[x.var().index()] {
                continue;
            }
            self.seen[x.var().index()] = false;
            match self.assign.reason(x.var()) {
                Reason::Unit => {
                    if x != p {
                        res.push(!x);
                    }
                }
                r => {
                    let rl = self.reason_lits(r);
                    for &q in &rl {
                        if q.var() != x.var() && self.assign.level_lit(q) > 0 {
                            self.seen[q.var().index()] = true;
                        }
                    }
                }
            }
        }
        res
    }

    /// Replaces a watched clause by a strictly-shorter entailed one,
    /// preserving (or raising) its tier. Returns false when the clause is no
    /// longer ours to replace (chain moved, tombstoned, not watched).
    pub(crate) fn replace_clause(&mut self, cref: CRef, new_lits: &[Lit], lbd: u32) -> Result<bool, OutOfMemory> {
        let view = self.db.arena.clause(cref);
        let old_lits = view.collect_lits();
        let old_kind = view.kind();
        let Some(slot) = self.two.find(&old_lits, cref) else {
            return Ok(false);
        };
        let header_slot = self.two.header_slot(slot);
        let old_meta = self.two.watcher(header_slot);

        if new_lits.len() == 1 {
            self.detach_accounted(slot, old_kind);
            self.db.arena.release_later(&mut self.alloc, cref, CRef::UNDEF);
            return Ok(true);
        }

        let tiers = &self.db.tiers;
        let kind = if tiers.is_permanent(lbd, new_lits.len()) || old_kind == ClauseKind::Permanent {
            ClauseKind::Permanent
        } else if tiers.is_shared(lbd, new_lits.len(), tiers.share_reuse) || old_kind == ClauseKind::Shared {
            ClauseKind::Shared
        } else {
            ClauseKind::Private
        };
        let mut header = Header::new(kind, lbd, new_lits.len() as u32);
        if view.is_vivified() {
            header = header.vivified();
        }

        let (replaced, target) = if old_kind.is_counted() {
            debug_assert!(kind.is_counted());
            let (ok, tail) = self.db.arena.splice_replacement(
                &mut self.alloc,
                cref,
                new_lits,
                header,
                |ar, c| ar.clause(c).size() > new_lits.len(),
            )?;
            if ok {
                match kind {
                    ClauseKind::Shared => WorkerStats::bump(&self.stat().alloc_shared),
                    ClauseKind::Permanent => WorkerStats::bump(&self.stat().alloc_permanent),
                    ClauseKind::Private => unreachable!(),
                }
            }
            (ok, tail)
        } else if kind.is_counted() {
            // a private clause graduating on replacement
            let fresh = self.db.add_clause(self.id, &mut self.alloc, new_lits, header, true)?;
            self.db.arena.release_later(&mut self.alloc, cref, CRef::UNDEF);
            WorkerStats::bump(&self.stat().exported);
            (true, fresh)
        } else {
            if view.is_private_deleted() {
                return Ok(false);
            }
            self.db.arena.shrink_private(cref, new_lits, header);
            (true, cref)
        };

        if target != cref || replaced {
            // swing the watcher pair onto the surviving clause
            self.detach_accounted(slot, old_kind);
            self.attach_accounted(target, old_meta.lbd().min(lbd), old_meta.activity(), old_meta.is_imported());
        }
        Ok(replaced)
    }

    fn detach_accounted(&mut self, slot: WatchSlot, old_kind: ClauseKind) {
        match old_kind {
            ClauseKind::Private => self.n_private -= 1,
            ClauseKind::Shared => self.n_shared -= 1,
            ClauseKind::Permanent => {}
        }
        self.two.detach(slot);
    }

    /// Attaches `target` under the current (root) assignment, routing
    /// binaries to the binary lists. A falsified attach at the root is UNSAT.
    fn attach_accounted(&mut self, target: CRef, wlbd: u32, activity: u16, imported: bool) {
        let tview = self.db.arena.clause(target);
        let tlits = tview.collect_lits();
        if tlits.len() == 2 {
            let assign = &self.assign;
            let (_, conflict) = self.bin.attach(
                target,
                [tlits[0], tlits[1]],
                |l| assign.value_lit(l),
                |l| assign.level_lit(l),
            );
            if conflict && self.assign.decision_level() == 0 {
                self.found_unsat("replacement clause falsified at root");
            }
            return;
        }
        let assign = &self.assign;
        let (slot, conflict) = self.two.attach(
            target,
            &tlits,
            wlbd,
            activity,
            |l| assign.value_lit(l),
            |l| assign.level_lit(l),
        );
        if imported {
            self.two.watcher_mut(slot).set_imported();
        }
        match tview.kind() {
            ClauseKind::Private => self.n_private += 1,
            ClauseKind::Shared => self.n_shared += 1,
            ClauseKind::Permanent => {}
        }
        if conflict && self.assign.decision_level() == 0 {
            self.found_unsat("replacement clause falsified at root");
        }
    }

    // ------------------------------------------------------------------
    // complete vivification passes

    /// Worker-side duty of a running complete pass: drain chunks until the
    /// pool is empty; the worker finishing the last chunk closes the pass.
    pub(crate) fn drain_complete_vivify(&mut self) -> Result<(), OutOfMemory> {
        if self.db.complete_vivify_in_progress() && !self.db.vivify_pool.is_empty() {
            self.drain_vivify_pool(false)?;
        }
        Ok(())
    }

    fn drain_vivify_pool(&mut self, enforce: bool) -> Result<u32, OutOfMemory> {
        let mut count = 0;
        loop {
            let chunk = self.db.vivify_pool.take_chunk();
            if chunk.is_empty() {
                break;
            }
            let res = if !self.done && !self.db.job_finished() {
                self.vivify_refs(&chunk)
            } else {
                Ok(0)
            };
            // always settle the chunk so the pool cannot wedge
            let last = self.db.vivify_pool.notify_processed(chunk.len());
            if last && !enforce {
                self.db.complete_vivify_finished();
            }
            count += res?;
            if last {
                break;
            }
        }
        Ok(count)
    }

    /// Synchronous startup rounds: worker 0 publishes every attached clause,
    /// all workers vivify disjoint chunks, then clean up and import between
    /// two barrier waves.
    pub(crate) fn startup_vivification(&mut self) {
        while self.db.startup_round_pending() {
            self.db.start_barrier.wait();
            if self.id == 0 {
                self.db.vivify_pool.write_lock();
                for cref in self.two.header_crefs() {
                    if !self.db.arena.should_be_removed(cref) {
                        self.db.vivify_pool.push(cref);
                    }
                }
                self.db.vivify_pool.publish();
                self.db.startup_round_started();
            }
            self.db.start_barrier.wait();
            let vivified = match self.drain_vivify_pool(true) {
                Ok(n) => n,
                Err(OutOfMemory) => {
                    self.db.set_abort();
                    0
                }
            };
            self.db.startup_add_progress(vivified);
            self.db.start_barrier.wait();
            if !self.done {
                self.clean_binary_watched();
                self.remove_marked_two(false);
                self.db.arena.collect_garbage(&mut self.alloc);
                self.import_crefs();
                self.import_units();
            }
        }
    }
}
