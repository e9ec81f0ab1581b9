//! Adoption of foreign clauses and units published by peer workers.

use crate::arena::{ClauseKind, CRef};
use crate::core::Lit;
use crate::stats::WorkerStats;
use crate::watch::Reason;
use crate::worker::Worker;

impl Worker {
    /// Drains the peer unit rings and asserts the literals at level 0.
    /// A unit contradicting a root fact makes the formula unsatisfiable.
    pub(crate) fn import_units(&mut self) {
        self.unit_buf.clear();
        let mut units = std::mem::take(&mut self.unit_buf);
        self.db.sharer.drain_units(self.id, &mut units);
        for &l in &units {
            if self.done {
                break;
            }
            let val = self.assign.value_lit(l);
            if val.is_none() || self.assign.level_lit(l) > 0 {
                if self.assign.decision_level() > 0 {
                    self.assign.cancel_until(0);
                }
                match self.assign.value_lit(l) {
                    None => {
                        self.assign.enqueue(l, Reason::Unit);
                        WorkerStats::bump(&self.stat().imported_units);
                    }
                    Some(true) => {}
                    Some(false) => self.found_unsat("conflict through unit import"),
                }
            } else if val == Some(false) {
                self.found_unsat("conflict through unit import");
            }
        }
        units.clear();
        self.unit_buf = units;
    }

    /// Drains the peer clause rings and installs the handles in this worker's
    /// watch index. Clauses whose chain already ended in a tombstone are
    /// dropped (settling this worker's reference).
    pub(crate) fn import_crefs(&mut self) {
        if self.db.sharer.pending_crefs(self.id) == 0 {
            return;
        }
        self.cref_buf.clear();
        let mut crefs = std::mem::take(&mut self.cref_buf);
        self.db.sharer.drain_crefs(self.id, &mut crefs);
        for &cref in &crefs {
            if self.done {
                // no longer adopting, but the reference must still be settled
                self.db.arena.remove_clause(cref);
                continue;
            }
            self.import_one(cref);
        }
        crefs.clear();
        self.cref_buf = crefs;
    }

    fn import_one(&mut self, incoming: CRef) {
        if self.db.arena.should_be_removed(incoming) {
            self.db.arena.remove_clause(incoming);
            return;
        }
        let mut cref = incoming;
        if self.db.arena.should_be_replaced(cref) {
            cref = self.db.arena.switch_to_replacement(&mut self.alloc, cref);
        }
        let (lits, clause_lbd, permanent) = {
            let view = self.db.arena.clause(cref);
            debug_assert!(view.kind().is_counted());
            (view.collect_lits(), view.lbd(), view.kind() == ClauseKind::Permanent)
        };
        debug_assert!(self.two.find(&lits, cref).is_none(), "cref already installed");

        if self.db.tiers.is_one_watched(clause_lbd, lits.len(), permanent) {
            let assign = &self.assign;
            if self.one.attach(cref, &lits, |l| assign.value_lit(l)) {
                WorkerStats::bump(&self.stat().imported_clauses);
                return;
            }
            // every literal is false already; fall through to the two-watched
            // conflict handling
            WorkerStats::bump(&self.stat().promoted);
        }

        if lits.len() == 2 {
            self.import_binary(cref, [lits[0], lits[1]]);
        } else {
            self.import_long(cref, &lits, clause_lbd, permanent);
        }
        if !self.done {
            WorkerStats::bump(&self.stat().imported_clauses);
        }
    }

    fn import_binary(&mut self, cref: CRef, lits: [Lit; 2]) {
        let assign = &self.assign;
        let (slot, conflict) = self.bin.attach(
            cref,
            lits,
            |l| assign.value_lit(l),
            |l| assign.level_lit(l),
        );
        if !conflict {
            return;
        }
        let [a, b] = lits;
        let (lo, hi) = if self.assign.level_lit(a) < self.assign.level_lit(b) {
            (a, b)
        } else {
            (b, a)
        };
        let lo_level = self.assign.level_lit(lo) as usize;
        let hi_level = self.assign.level_lit(hi) as usize;
        if hi_level == 0 {
            self.found_unsat("conflict through clause import");
        } else if lo_level == hi_level {
            self.assign.cancel_until(lo_level - 1);
        } else {
            // unassign the higher side and propagate it from the clause
            self.assign.cancel_until(lo_level);
            debug_assert!(self.assign.is_false(lo));
            debug_assert!(self.assign.value_lit(hi).is_none());
            self.assign.enqueue(hi, Reason::Binary(slot));
        }
    }

    fn import_long(&mut self, cref: CRef, lits: &[Lit], clause_lbd: u32, permanent: bool) {
        // non-permanent imports carry a pessimistic LBD snapshot (their size)
        let wlbd = if permanent { clause_lbd } else { lits.len() as u32 };
        let assign = &self.assign;
        let (slot, conflict) = self.two.attach(
            cref,
            lits,
            wlbd,
            0,
            |l| assign.value_lit(l),
            |l| assign.level_lit(l),
        );
        let header_slot = self.two.header_slot(slot);
        self.two.watcher_mut(header_slot).set_imported();
        if !conflict {
            if !permanent {
                self.n_shared += 1;
            }
            return;
        }
        // the freshly pushed pair is at the end of its lists; detaching it
        // immediately cannot move any other entry
        self.two.detach(slot);

        // highest and second-highest (distinct) decision levels of the clause
        let mut a = lits[0];
        let mut b = None;
        for &l in &lits[1..] {
            debug_assert!(self.assign.is_false(l));
            if self.assign.level_lit(l) > self.assign.level_lit(a) {
                b = Some(a);
                a = l;
            } else if self.assign.level_lit(l) != self.assign.level_lit(a)
                && b.is_none_or(|x| self.assign.level_lit(l) > self.assign.level_lit(x))
            {
                b = Some(l);
            }
        }
        let a_level = self.assign.level_lit(a) as usize;
        if a_level == 0 {
            self.found_unsat("conflict through clause import");
            self.db.arena.remove_clause(cref);
            return;
        }
        self.assign.cancel_until(a_level - 1);
        debug_assert!(self.assign.value_lit(a).is_none());
        match b {
            Some(b) => {
                // keep one watcher on the falsified literal: the clause is
                // picked up lazily when the search returns to its levels
                debug_assert!(self.assign.is_false(b) || self.assign.value_lit(b).is_none());
                let new_slot = self.two.plain_attach(cref, a, b, wlbd, 0);
                self.two.watcher_mut(new_slot).set_imported();
            }
            None => {
                // every literal sat at the same level; reattach cleanly
                let assign = &self.assign;
                let (new_slot, confl) = self.two.attach(
                    cref,
                    lits,
                    wlbd,
                    0,
                    |l| assign.value_lit(l),
                    |l| assign.level_lit(l),
                );
                debug_assert!(!confl);
                let hs = self.two.header_slot(new_slot);
                self.two.watcher_mut(hs).set_imported();
            }
        }
        if !permanent {
            self.n_shared += 1;
        }
    }
}
