//! Periodic eviction of the worst-scoring learnt clauses, plus the level-0
//! cleanups that go with it: satisfied binaries, replacement-chain switches
//! and deferred releases.

use crate::arena::ClauseKind;
use crate::core::Lit;
use crate::watch::WatchSlot;
use crate::worker::Worker;
use crate::OutOfMemory;

impl Worker {
    /// Reduce pass, at decision level 0: clean binaries, evict two-watched
    /// and one-watched clauses, then run the deferred releases.
    pub(crate) fn reduce(&mut self) -> Result<(), OutOfMemory> {
        debug_assert_eq!(self.assign.decision_level(), 0);
        self.clean_binary_watched();
        let kept = self.reduce_two_watched();
        self.reduce_one_watched(kept);
        self.db.arena.collect_garbage(&mut self.alloc);
        Ok(())
    }

    /// Drops binaries satisfied at the root. Each clause sits on two lists;
    /// the release happens on the copy with the smaller blocker code only.
    pub(crate) fn clean_binary_watched(&mut self) {
        debug_assert_eq!(self.assign.decision_level(), 0);
        for i in 0..self.bin.num_lists() {
            let watched = !Lit::from_code(i as u32);
            let watched_true = self.assign.is_true(watched);
            let mut j = 0;
            let mut k = 0;
            let len = self.bin.list(i).len();
            while j < len {
                let w = self.bin.list(i)[j];
                if watched_true || self.assign.is_true(w.blocker) {
                    if w.blocker.code() < i {
                        self.db.arena.remove_clause(w.cref);
                    }
                } else {
                    if k != j {
                        self.bin.list_mut(i)[k] = w;
                    }
                    k += 1;
                }
                j += 1;
            }
            self.bin.list_mut(i).truncate(k);
        }
    }

    /// Collects deletable two-watched headers, scores them worst-first and
    /// marks roughly the worst half for removal. Returns the number of kept
    /// candidates (used to budget the one-watched eviction).
    fn reduce_two_watched(&mut self) -> usize {
        let mut refs: Vec<WatchSlot> = Vec::new();
        for i in 0..self.two.num_lists() {
            for pos in 0..self.two.list(i).len() {
                let w = self.two.list(i)[pos];
                if !w.is_header() || w.is_removed() {
                    continue;
                }
                if self.db.arena.should_be_removed(w.cref) || self.db.arena.should_be_replaced(w.cref) {
                    continue;
                }
                if self.db.arena.clause(w.cref).kind() == ClauseKind::Permanent {
                    continue;
                }
                let candidate = if self.params.chanseok {
                    w.lbd() > 2 && (w.activity() > 0 || w.lbd() > 4)
                } else {
                    w.lbd() > 2
                };
                if candidate {
                    refs.push(WatchSlot::new(i, pos));
                }
            }
        }
        if self.params.chanseok {
            refs.sort_by_key(|&s| self.two.watcher(s).activity());
        } else {
            refs.sort_by(|&x, &y| {
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
        }
        if !refs.is_empty() {
            let mid = self.two.watcher(refs[refs.len() / 2]).lbd();
            self.median_lbd = mid.min(self.db.tiers.max_vivify_lbd);
        }
        let since_reduce = (self.conflicts - self.last_reduce_conflicts) / 2;
        let limit = refs.len().min((since_reduce as usize).max(refs.len() / 2));
        for &s in &refs[..limit] {
            self.two.watcher_mut(s).mark_removed();
        }
        let kept = refs.len() - limit;
        drop(refs);

        // a pending complete-vivification pass collects the surviving
        // permanent clauses while we compact anyway
        let mut collect = false;
        if self.db.should_collect_crefs() {
            if self.db.vivify_pool.try_write_lock() {
                collect = true;
            } else {
                self.db.complete_vivify_finished();
            }
        }
        self.remove_marked_two(collect);
        if collect {
            self.db.vivify_pool.publish();
        }
        kept
    }

    /// Compacts every two-watched list: marked or globally deleted clauses
    /// are released, chains that moved are re-watched on their tail, and
    /// survivors get their activity decayed.
    pub(crate) fn remove_marked_two(&mut self, collect: bool) {
        for i in 0..self.two.num_lists() {
            let mut j = 0;
            let mut k = 0;
            while j < self.two.list(i).len() {
                let w = self.two.list(i)[j];
                let header = self.two.header(WatchSlot::new(i, j));
                let (kind, privately_replaced) = {
                    let view = self.db.arena.clause(w.cref);
                    (view.kind(), view.kind().is_private() && view.is_replaced())
                };
                if header.is_removed() || privately_replaced || self.db.arena.should_be_removed(w.cref) {
                    match kind {
                        ClauseKind::Private => self.n_private -= 1,
                        ClauseKind::Shared => self.n_shared -= 1,
                        ClauseKind::Permanent => {}
                    }
                    self.db.arena.remove_clause(w.cref);
                    let peer = self.two.peer_slot_of(&w);
                    self.two.delete_entry(peer.list as usize, peer.pos as usize);
                    j += 1;
                    continue;
                }
                if self.db.arena.should_be_replaced(w.cref) {
                    self.switch_watched_replacement(i, j, &header);
                    j += 1;
                    continue;
                }
                // keep, repairing the sibling pointer of the moved entry
                self.keep_two(i, j, k);
                if w.is_header() {
                    let slot = WatchSlot::new(i, k);
                    let entry = self.two.watcher_mut(slot);
                    entry.halve_activity();
                    entry.set_protected(false);
                    if collect && kind == ClauseKind::Permanent {
                        self.db.vivify_pool.push(w.cref);
                    }
                }
                k += 1;
                j += 1;
            }
            self.two.list_mut(i).truncate(k);
        }
    }

    /// Re-watches a two-watched clause whose chain gained a strictly-shorter
    /// replacement. At level 0 a falsified replacement proves UNSAT.
    fn switch_watched_replacement(&mut self, list: usize, pos: usize, header: &crate::watch::Watcher) {
        let w = self.two.list(list)[pos];
        let was_shared = self.db.arena.clause(w.cref).kind() == ClauseKind::Shared;
        let tail = self.db.arena.switch_to_replacement(&mut self.alloc, w.cref);
        let tview = self.db.arena.clause(tail);
        let tlits = tview.collect_lits();
        let peer = self.two.peer_slot_of(&w);
        self.two.delete_entry(peer.list as usize, peer.pos as usize);
        if tlits.len() == 2 {
            if was_shared {
                self.n_shared -= 1;
            }
            let assign = &self.assign;
            let (_, conflict) = self.bin.attach(
                tail,
                [tlits[0], tlits[1]],
                |l| assign.value_lit(l),
                |l| assign.level_lit(l),
            );
            if conflict && self.assign.decision_level() == 0 {
                self.found_unsat("replacement clause falsified at root");
            }
        } else {
            let wlbd = if tview.kind() == ClauseKind::Permanent {
                tview.lbd()
            } else {
                header.lbd()
            };
            if was_shared && tview.kind() == ClauseKind::Permanent {
                self.n_shared -= 1;
            }
            let assign = &self.assign;
            let (slot, conflict) = self.two.attach(
                tail,
                &tlits,
                wlbd,
                header.activity(),
                |l| assign.value_lit(l),
                |l| assign.level_lit(l),
            );
            if header.is_imported() {
                self.two.watcher_mut(slot).set_imported();
            }
            if conflict && self.assign.decision_level() == 0 {
                self.found_unsat("replacement clause falsified at root");
            }
        }
    }

    fn reduce_one_watched(&mut self, kept_two: usize) {
        let mut refs: Vec<(WatchSlot, crate::arena::CRef)> = Vec::new();
        for i in 0..self.one.num_lists() {
            for pos in 0..self.one.list(i).len() {
                let w = self.one.list(i)[pos];
                if w.is_removed() {
                    continue;
                }
                let slot = WatchSlot::new(i, pos);
                if self.db.arena.should_be_removed(w.cref) {
                    self.one.watcher_mut(slot).mark_removed();
                } else if !self.db.arena.should_be_replaced(w.cref) {
                    refs.push((slot, w.cref));
                }
            }
        }
        refs.sort_by(|&(_, a), &(_, b)| {
            let (va, vb) = (self.db.arena.clause(a), self.db.arena.clause(b));
            vb.size().cmp(&va.size()).then(vb.lbd().cmp(&va.lbd()))
        });
        let population = self.one.num_attached();
        let budget = if population > 2 * (kept_two + 100) {
            population - 2 * kept_two
        } else {
            population / 2
        };
        let limit = budget.min(refs.len());
        for &(slot, _) in &refs[..limit] {
            self.one.watcher_mut(slot).mark_removed();
        }
        drop(refs);
        self.remove_marked_one();
    }

    fn remove_marked_one(&mut self) {
        for i in 0..self.one.num_lists() {
            let mut j = 0;
            while j < self.one.list(i).len() {
                let w = self.one.list(i)[j];
                if w.is_removed() || self.db.arena.should_be_removed(w.cref) {
                    self.db.arena.remove_clause(w.cref);
                    self.one.list_mut(i).swap_remove(j);
                    continue;
                }
                if self.db.arena.should_be_replaced(w.cref) {
                    let tail = self.db.arena.switch_to_replacement(&mut self.alloc, w.cref);
                    let tview = self.db.arena.clause(tail);
                    let tlits = tview.collect_lits();
                    self.one.list_mut(i).swap_remove(j);
                    if tlits.len() == 2 {
                        let assign = &self.assign;
                        let (_, conflict) = self.bin.attach(
                            tail,
                            [tlits[0], tlits[1]],
                            |l| assign.value_lit(l),
                            |l| assign.level_lit(l),
                        );
                        if conflict && self.assign.decision_level() == 0 {
                            self.found_unsat("replacement clause falsified at root");
                        }
                    } else {
                        let assign = &self.assign;
                        let attached = self.one.attach(tail, &tlits, |l| assign.value_lit(l));
                        if !attached {
                            // every literal false at the root
                            self.found_unsat("replacement clause falsified at root");
                            self.db.arena.remove_clause(tail);
                        }
                    }
                    continue;
                }
                j += 1;
            }
        }
    }
}
