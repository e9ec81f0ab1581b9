//! Conflict analysis: first-UIP resolution, clause minimization and the
//! deferred side effects (activity, LBD updates, tier promotion) for clauses
//! that participated in the conflict.

use crate::arena::{CRef, ClauseKind};
use crate::core::Lit;
use crate::stats::WorkerStats;
use crate::watch::{Reason, WatchSlot};
use crate::worker::Worker;
use crate::OutOfMemory;
use smallvec::{smallvec, SmallVec};

impl Worker {
    pub(crate) fn reason_cref(&self, r: Reason) -> CRef {
        match r {
            Reason::Unit => unreachable!("decisions have no clause"),
            Reason::Binary(s) => self.bin.watcher(s).cref,
            Reason::Two(s) => self.two.cref(s),
            Reason::One(s) => self.one.cref(s),
        }
    }

    /// Literals of the clause behind a reason slot. Binary clauses are
    /// reconstructed from the watcher itself, without touching the arena.
    pub(crate) fn reason_lits(&self, r: Reason) -> SmallVec<[Lit; 8]> {
        match r {
            Reason::Unit => unreachable!("decisions have no clause"),
            Reason::Binary(s) => {
                let w = self.bin.watcher(s);
                smallvec![w.blocker, s.watched_lit()]
            }
            Reason::Two(s) => self.db.arena.clause(self.two.cref(s)).collect_lits(),
            Reason::One(s) => self.db.arena.clause(self.one.cref(s)).collect_lits(),
        }
    }

    /// Number of distinct decision levels among `lits`.
    pub(crate) fn compute_lbd_of(&mut self, lits: &[Lit]) -> u32 {
        self.next_stamp();
        let flag = self.stamp_counter;
        let mut lbd = 0;
        for &l in lits {
            let lvl = self.assign.level_lit(l);
            debug_assert!(lvl >= 0);
            if self.stamp[lvl as usize] != flag {
                self.stamp[lvl as usize] = flag;
                lbd += 1;
            }
        }
        lbd
    }

    fn next_stamp(&mut self) {
        if self.stamp_counter == u32::MAX {
            self.stamp.fill(0);
            self.stamp_counter = 0;
        }
        self.stamp_counter += 1;
    }

    /// First-UIP conflict analysis. Fills `self.learnt` (UIP negated at
    /// position 0, highest remaining level at position 1) and returns the
    /// backjump level and the LBD of the learnt clause.
    pub(crate) fn analyze(&mut self, conflict: Reason) -> (usize, u32) {
        self.learnt.clear();
        self.learnt.push(Lit::UNDEF); // placeholder for the asserting literal
        self.used_in_conflict.clear();

        let current = self.assign.decision_level() as i32;
        let mut path_c: u32 = 0;
        let mut p = Lit::UNDEF;
        let mut index = self.assign.trail_len();
        let mut reason = conflict;
        loop {
            self.note_used(reason);
            let lits = self.reason_lits(reason);
            for &q in &lits {
                if q == p {
                    continue;
                }
                let v = q.var();
                let lvl = self.assign.level(v);
                if !self.seen[v.index()] && lvl > 0 {
                    self.seen[v.index()] = true;
                    self.assign.var_bump(v);
                    if lvl >= current {
                        path_c += 1;
                    } else {
                        self.learnt.push(q);
                    }
                }
            }
            // next marked literal on the trail
            while !self.seen[self.assign.trail()[index - 1].var().index()] {
                index -= 1;
            }
            index -= 1;
            p = self.assign.trail()[index];
            self.seen[p.var().index()] = false;
            path_c -= 1;
            if path_c == 0 {
                break;
            }
            reason = self.assign.reason(p.var());
            debug_assert!(reason.is_propagated());
        }
        self.learnt[0] = !p;

        self.analyze_toclear.clear();
        let (toclear, learnt) = (&mut self.analyze_toclear, &self.learnt);
        toclear.extend_from_slice(&learnt[1..]);

        let mut learnt = std::mem::take(&mut self.learnt);
        match self.params.ccmin_mode {
            2 => self.minimize_deep(&mut learnt),
            1 => self.minimize_basic(&mut learnt),
            _ => {}
        }
        if learnt.len() > 1 && learnt.len() <= self.params.min_size_minimize {
            let lbd = self.compute_lbd_of(&learnt);
            if lbd <= self.params.min_lbd_minimize {
                self.minimize_binary(&mut learnt);
            }
        }
        for i in 0..self.analyze_toclear.len() {
            let v = self.analyze_toclear[i].var();
            self.seen[v.index()] = false;
        }
        self.analyze_toclear.clear();

        let backjump = if learnt.len() == 1 {
            0
        } else {
            let mut max_i = 1;
            for i in 2..learnt.len() {
                if self.assign.level_lit(learnt[i]) > self.assign.level_lit(learnt[max_i]) {
                    max_i = i;
                }
            }
            learnt.swap(1, max_i);
            self.assign.level_lit(learnt[1]) as usize
        };
        let lbd = self.compute_lbd_of(&learnt);
        self.learnt = learnt;
        (backjump, lbd)
    }

    fn note_used(&mut self, r: Reason) {
        match r {
            Reason::Two(_) | Reason::One(_) => self.used_in_conflict.push(r),
            _ => {}
        }
    }

    /// Basic self-subsumption: a literal is dropped when its whole reason is
    /// already subsumed by the learnt clause (or root facts).
    fn minimize_basic(&mut self, learnt: &mut Vec<Lit>) {
        let mut j = 1;
        for i in 1..learnt.len() {
            let v = learnt[i].var();
            let keep = match self.assign.reason(v) {
                Reason::Unit => true,
                r => {
                    let lits = self.reason_lits(r);
                    lits.iter()
                        .any(|&q| q.var() != v && !self.seen[q.var().index()] && self.assign.level(q.var()) > 0)
                }
            };
            if keep {
                learnt[j] = learnt[i];
                j += 1;
            }
        }
        learnt.truncate(j);
    }

    /// Deep minimization: reachability through reasons, pruned by the
    /// abstract-level bitmap.
    fn minimize_deep(&mut self, learnt: &mut Vec<Lit>) {
        let mut abstract_levels = 0u32;
        for &l in &learnt[1..] {
            abstract_levels |= self.assign.abstract_level(l.var());
        }
        let mut j = 1;
        for i in 1..learnt.len() {
            let l = learnt[i];
            let keep = self.assign.reason(l.var()) == Reason::Unit || !self.lit_redundant(l, abstract_levels);
            if keep {
                learnt[j] = l;
                j += 1;
            }
        }
        learnt.truncate(j);
    }

    /// True when `p`'s reasons resolve entirely into already-seen literals
    /// and root facts.
    fn lit_redundant(&mut self, p: Lit, abstract_levels: u32) -> bool {
        self.analyze_stack.clear();
        self.analyze_stack.push(p);
        let top = self.analyze_toclear.len();
        while let Some(q) = self.analyze_stack.pop() {
            let r = self.assign.reason(q.var());
            debug_assert!(r.is_propagated());
            let lits = self.reason_lits(r);
            for &l in &lits {
                let v = l.var();
                if v == q.var() || self.seen[v.index()] || self.assign.level(v) == 0 {
                    continue;
                }
                if self.assign.reason(v).is_propagated() && self.assign.abstract_level(v) & abstract_levels != 0 {
                    self.seen[v.index()] = true;
                    self.analyze_stack.push(l);
                    self.analyze_toclear.push(l);
                } else {
                    // dead end: undo the speculative marks
                    for k in top..self.analyze_toclear.len() {
                        let x = self.analyze_toclear[k].var();
                        self.seen[x.index()] = false;
                    }
                    self.analyze_toclear.truncate(top);
                    return false;
                }
            }
        }
        true
    }

    /// Binary self-subsumption of the asserting literal: a learnt literal
    /// `¬x` is dropped when a binary clause `(learnt[0] ∨ x)` holds with `x`
    /// currently true.
    fn minimize_binary(&mut self, learnt: &mut Vec<Lit>) {
        self.next_stamp();
        let flag = self.stamp_counter;
        for &l in &learnt[1..] {
            self.stamp[l.var().index()] = flag;
        }
        let mut removed = 0;
        let list = (!learnt[0]).code();
        for pos in 0..self.bin.list(list).len() {
            let imp = self.bin.list(list)[pos].blocker;
            if self.stamp[imp.var().index()] == flag && self.assign.is_true(imp) {
                self.stamp[imp.var().index()] = flag - 1;
                removed += 1;
            }
        }
        if removed > 0 {
            let mut j = 1;
            for i in 1..learnt.len() {
                if self.stamp[learnt[i].var().index()] == flag {
                    learnt[j] = learnt[i];
                    j += 1;
                }
            }
            debug_assert_eq!(learnt.len() - j, removed);
            learnt.truncate(j);
        }
    }

    // ------------------------------------------------------------------
    // conflict participation side effects

    /// Applies the deferred effects for every clause met during analysis:
    /// one-watched promotion, activity bump, dynamic LBD update and tier
    /// promotion. Everything here is slot-preserving. Must run before the
    /// backjump (LBD recomputation needs the conflict-time levels).
    pub(crate) fn apply_conflict_side_effects(&mut self) -> Result<(), OutOfMemory> {
        let used = std::mem::take(&mut self.used_in_conflict);
        for &r in &used {
            let slot = match r {
                Reason::Two(s) => self.two.header_slot(s),
                Reason::One(s) => self.promote_one_watched(s),
                Reason::Unit | Reason::Binary(_) => unreachable!(),
            };
            self.clause_used(slot)?;
        }
        self.used_in_conflict = used;
        self.used_in_conflict.clear();
        Ok(())
    }

    /// Moves a one-watched clause to the two-watched tier after it fired.
    /// The second watch is the highest-level other literal.
    fn promote_one_watched(&mut self, slot: WatchSlot) -> WatchSlot {
        let w = self.one.watcher(slot);
        let view = self.db.arena.clause(w.cref);
        let watched = slot.watched_lit();
        debug_assert!(view.contains(watched));
        let mut second = None;
        let mut max_level = -1;
        for l in view.lits() {
            debug_assert!(self.assign.is_false(l));
            if l != watched && self.assign.level_lit(l) > max_level {
                max_level = self.assign.level_lit(l);
                second = Some(l);
            }
        }
        let lbd = view.lbd();
        let two_slot = self.two.plain_attach(w.cref, watched, second.expect("clause has >2 literals"), lbd, 0);
        self.two.watcher_mut(two_slot).set_imported();
        self.one.detach(slot);
        self.n_shared += 1;
        WorkerStats::bump(&self.stat().promoted);
        two_slot
    }

    /// `notify clause used in conflict`: bump activity, re-derive the LBD
    /// (improvements re-arm vivification), and try to move the clause to a
    /// higher tier.
    fn clause_used(&mut self, header_slot: WatchSlot) -> Result<(), OutOfMemory> {
        let cref = self.two.cref(header_slot);
        let (kind, size, clause_lbd, lits) = {
            let view = self.db.arena.clause(cref);
            (view.kind(), view.size(), view.lbd(), view.collect_lits())
        };
        let mut should_vivify = false;
        if clause_lbd > 2 {
            self.two.watcher_mut(header_slot).bump_activity();
            let new_lbd = self.compute_lbd_of(&lits);
            let current = self.two.watcher(header_slot).lbd();
            if new_lbd < current {
                self.two.watcher_mut(header_slot).set_lbd(new_lbd);
                self.db.arena.clear_vivified(cref);
                should_vivify = self.db.tiers.use_lbd_improve_vivify
                    && new_lbd <= self.median_lbd
                    && (new_lbd as usize) < size;
            }
        }
        if kind != ClauseKind::Permanent {
            let exported = self.try_share(header_slot)?;
            should_vivify |= exported && self.db.tiers.use_export_vivify;
        }
        if should_vivify {
            self.mark_to_vivify(header_slot, false);
        }
        Ok(())
    }

    /// Promotes the clause to the tier its current LBD/size/reuse warrant,
    /// swinging the local watcher in place. Shared predecessors are marked
    /// deleted first; losing that race skips the promotion.
    pub(crate) fn try_share(&mut self, header_slot: WatchSlot) -> Result<bool, OutOfMemory> {
        let cref = self.two.cref(header_slot);
        let view = self.db.arena.clause(cref);
        let header = self.two.watcher(header_slot);
        let lbd = header.lbd();
        let size = view.size();
        debug_assert!(size > 2);
        let tiers = &self.db.tiers;
        let target = if tiers.is_permanent(lbd, size) {
            ClauseKind::Permanent
        } else if view.kind() == ClauseKind::Shared || tiers.is_shared(lbd, size, header.activity()) {
            ClauseKind::Shared
        } else {
            ClauseKind::Private
        };
        if target == view.kind() {
            return Ok(false);
        }
        match (view.kind(), target) {
            (ClauseKind::Private, _) => {
                let lits = view.collect_lits();
                let new_header = view.header().retiered(target, lbd);
                let fresh = self.db.add_clause(self.id, &mut self.alloc, &lits, new_header, true)?;
                self.two.change_cref(header_slot, fresh);
                self.db.arena.release_later(&mut self.alloc, cref, CRef::UNDEF);
                self.n_private -= 1;
                if target == ClauseKind::Shared {
                    self.n_shared += 1;
                }
                WorkerStats::bump(&self.stat().exported);
                Ok(true)
            }
            (ClauseKind::Shared, ClauseKind::Permanent) => {
                if !self.db.arena.mark_deleted_chain(cref) {
                    // someone else already replaced or deleted it
                    return Ok(false);
                }
                let lits = view.collect_lits();
                let new_header = view.header().retiered(ClauseKind::Permanent, lbd);
                let fresh = self.db.add_clause(self.id, &mut self.alloc, &lits, new_header, true)?;
                self.two.change_cref(header_slot, fresh);
                self.db.arena.release_later(&mut self.alloc, cref, CRef::UNDEF);
                self.n_shared -= 1;
                WorkerStats::bump(&self.stat().promoted);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
