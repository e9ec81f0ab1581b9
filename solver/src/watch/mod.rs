//! Per-worker watch index: binary, two-watched and one-watched lists.
//!
//! A two-watched clause contributes a header/peer entry pair on the lists of
//! the complements of its two watched literals. Each entry stores the *other*
//! watched literal as its blocker plus the sibling's position, so either side
//! resolves its sibling in O(1). All clause metadata kept by the index (LBD
//! snapshot, activity, imported/protected/removed flags) lives on the header
//! entry.
//!
//! Slot stability: positions referenced by a recorded reason are only changed
//! by propagation of the same literal (impossible while the implied literal
//! stays assigned) and by level-0 maintenance (where no above-root reasons
//! exist). Every hot-path clause replacement goes through the slot-preserving
//! [`TwoWatchLists::change_cref`].

use crate::arena::CRef;
use crate::core::Lit;

/// Position of a watcher entry: `(list index, entry index)`.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct WatchSlot {
    pub list: u32,
    pub pos: u32,
}

impl WatchSlot {
    pub fn new(list: usize, pos: usize) -> WatchSlot {
        WatchSlot {
            list: list as u32,
            pos: pos as u32,
        }
    }
    /// The literal whose lists this slot lives on watches the complement.
    pub fn watched_lit(self) -> Lit {
        !Lit::from_code(self.list)
    }
}

/// Antecedent recorded for an assigned variable; `Unit` covers decisions and
/// root-level facts.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub enum Reason {
    #[default]
    Unit,
    Binary(WatchSlot),
    Two(WatchSlot),
    One(WatchSlot),
}

impl Reason {
    pub fn is_propagated(self) -> bool {
        self != Reason::Unit
    }
}

// ---------------------------------------------------------------------------
// binary

/// Entry of a binary list: the clause and its other literal.
#[derive(Copy, Clone, Debug)]
pub struct BinaryWatcher {
    pub blocker: Lit,
    pub cref: CRef,
}

pub struct BinaryWatchLists {
    lists: Vec<Vec<BinaryWatcher>>,
}

impl BinaryWatchLists {
    pub fn new(num_lits: usize) -> BinaryWatchLists {
        BinaryWatchLists {
            lists: (0..num_lits).map(|_| Vec::new()).collect(),
        }
    }

    pub fn num_lists(&self) -> usize {
        self.lists.len()
    }
    pub fn list(&self, idx: usize) -> &[BinaryWatcher] {
        &self.lists[idx]
    }
    pub fn list_mut(&mut self, idx: usize) -> &mut Vec<BinaryWatcher> {
        &mut self.lists[idx]
    }
    pub fn watcher(&self, slot: WatchSlot) -> BinaryWatcher {
        self.lists[slot.list as usize][slot.pos as usize]
    }

    /// Attaches a binary clause. Returns the slot usable as a reason and
    /// whether the clause is conflicting under the current assignment (then
    /// the slot names the entry on the higher-level side).
    pub fn attach(
        &mut self,
        cref: CRef,
        lits: [Lit; 2],
        value: impl Fn(Lit) -> Option<bool>,
        level: impl Fn(Lit) -> i32,
    ) -> (WatchSlot, bool) {
        let [a, b] = lits;
        self.lists[(!a).code()].push(BinaryWatcher { blocker: b, cref });
        self.lists[(!b).code()].push(BinaryWatcher { blocker: a, cref });
        let mut slot = WatchSlot::new((!a).code(), self.lists[(!a).code()].len() - 1);
        let conflict = value(a) == Some(false) && value(b) == Some(false);
        if conflict {
            let hi = if level(a) > level(b) { a } else { b };
            slot = WatchSlot::new((!hi).code(), self.lists[(!hi).code()].len() - 1);
        }
        (slot, conflict)
    }
}

// ---------------------------------------------------------------------------
// two-watched

const FLAG_REMOVED: u8 = 1;
const FLAG_PROTECTED: u8 = 2;
const FLAG_IMPORTED: u8 = 4;

/// LBD snapshot value marking the peer (non-header) entry.
const NO_LBD: u16 = u16::MAX;
/// Largest LBD snapshot stored on a header.
pub const WATCHER_LBD_MAX: u16 = u16::MAX - 1;

/// One entry of a two-watched pair.
#[derive(Copy, Clone, Debug)]
pub struct Watcher {
    pub cref: CRef,
    /// The other watched literal of the clause.
    pub blocker: Lit,
    /// Position of the sibling in the list of `!blocker`.
    pub peer_pos: u32,
    lbd: u16,
    activity: u16,
    flags: u8,
}

impl Watcher {
    fn header(cref: CRef, blocker: Lit, peer_pos: usize, lbd: u32, activity: u16) -> Watcher {
        Watcher {
            cref,
            blocker,
            peer_pos: peer_pos as u32,
            lbd: (lbd.min(WATCHER_LBD_MAX as u32)) as u16,
            activity,
            flags: 0,
        }
    }
    fn peer(cref: CRef, blocker: Lit, peer_pos: usize) -> Watcher {
        Watcher {
            cref,
            blocker,
            peer_pos: peer_pos as u32,
            lbd: NO_LBD,
            activity: 0,
            flags: 0,
        }
    }

    pub fn is_header(&self) -> bool {
        self.lbd != NO_LBD
    }
    pub fn lbd(&self) -> u32 {
        debug_assert!(self.is_header());
        self.lbd as u32
    }
    pub fn set_lbd(&mut self, lbd: u32) {
        debug_assert!(self.is_header());
        self.lbd = lbd.min(WATCHER_LBD_MAX as u32) as u16;
    }
    pub fn activity(&self) -> u16 {
        debug_assert!(self.is_header());
        self.activity
    }
    pub fn bump_activity(&mut self) {
        debug_assert!(self.is_header());
        self.activity = self.activity.saturating_add(1);
    }
    pub fn halve_activity(&mut self) {
        debug_assert!(self.is_header());
        self.activity /= 2;
    }
    pub fn is_removed(&self) -> bool {
        self.flags & FLAG_REMOVED != 0
    }
    pub fn mark_removed(&mut self) {
        self.flags |= FLAG_REMOVED;
    }
    pub fn is_protected(&self) -> bool {
        self.flags & FLAG_PROTECTED != 0
    }
    pub fn set_protected(&mut self, protected: bool) {
        if protected {
            self.flags |= FLAG_PROTECTED;
        } else {
            self.flags &= !FLAG_PROTECTED;
        }
    }
    pub fn is_imported(&self) -> bool {
        self.flags & FLAG_IMPORTED != 0
    }
    pub fn set_imported(&mut self) {
        self.flags |= FLAG_IMPORTED;
    }
}

pub struct TwoWatchLists {
    lists: Vec<Vec<Watcher>>,
}

impl TwoWatchLists {
    pub fn new(num_lits: usize) -> TwoWatchLists {
        TwoWatchLists {
            lists: (0..num_lits).map(|_| Vec::new()).collect(),
        }
    }

    pub fn num_lists(&self) -> usize {
        self.lists.len()
    }
    pub fn list(&self, idx: usize) -> &[Watcher] {
        &self.lists[idx]
    }
    pub fn list_mut(&mut self, idx: usize) -> &mut Vec<Watcher> {
        &mut self.lists[idx]
    }
    pub fn watcher(&self, slot: WatchSlot) -> Watcher {
        self.lists[slot.list as usize][slot.pos as usize]
    }
    pub fn watcher_mut(&mut self, slot: WatchSlot) -> &mut Watcher {
        &mut self.lists[slot.list as usize][slot.pos as usize]
    }

    pub fn peer_slot_of(&self, w: &Watcher) -> WatchSlot {
        WatchSlot {
            list: (!w.blocker).code() as u32,
            pos: w.peer_pos,
        }
    }

    /// Slot of the header entry of the pair containing `slot`.
    pub fn header_slot(&self, slot: WatchSlot) -> WatchSlot {
        let w = self.watcher(slot);
        if w.is_header() {
            slot
        } else {
            self.peer_slot_of(&w)
        }
    }

    pub fn header(&self, slot: WatchSlot) -> Watcher {
        self.watcher(self.header_slot(slot))
    }
    pub fn header_mut(&mut self, slot: WatchSlot) -> &mut Watcher {
        let hs = self.header_slot(slot);
        self.watcher_mut(hs)
    }

    pub fn cref(&self, slot: WatchSlot) -> CRef {
        self.watcher(slot).cref
    }

    /// Pushes a header/peer pair watching `l1`/`l2`. The caller guarantees
    /// both are literals of the clause.
    pub fn plain_attach(&mut self, cref: CRef, l1: Lit, l2: Lit, lbd: u32, activity: u16) -> WatchSlot {
        debug_assert_ne!(l1, l2);
        let li1 = (!l1).code();
        let li2 = (!l2).code();
        let pos1 = self.lists[li1].len();
        let pos2 = self.lists[li2].len();
        self.lists[li1].push(Watcher::header(cref, l2, pos2, lbd, activity));
        self.lists[li2].push(Watcher::peer(cref, l1, pos1));
        WatchSlot::new(li1, pos1)
    }

    /// Watches the first two literals of the clause (fresh learnt clauses,
    /// where position 0 is the asserting literal).
    pub fn attach_first(&mut self, cref: CRef, lits: &[Lit], lbd: u32) -> WatchSlot {
        self.plain_attach(cref, lits[0], lits[1], lbd, 0)
    }

    /// Attaches a clause under an arbitrary assignment, selecting the two
    /// best-watchable literals (true before undefined before highest-level
    /// false). Returns the header slot and whether the clause is conflicting,
    /// in which case the watches are the two highest-level falsified
    /// literals.
    pub fn attach(
        &mut self,
        cref: CRef,
        lits: &[Lit],
        lbd: u32,
        activity: u16,
        value: impl Fn(Lit) -> Option<bool>,
        level: impl Fn(Lit) -> i32,
    ) -> (WatchSlot, bool) {
        debug_assert!(lits.len() >= 2);
        let mut w1 = lits[0];
        let mut w2 = lits[1];
        if value(w1) == Some(false) || value(w2) == Some(false) {
            // prefer: lowest-level true, then undefined, then highest-level false
            let better = |a: Lit, b: Lit| match value(a) {
                Some(true) => value(b) == Some(true) && level(a) > level(b),
                Some(false) => value(b) != Some(false) || level(a) < level(b),
                None => value(b) == Some(true),
            };
            for &l in &lits[1..] {
                if better(w1, l) {
                    w2 = w1;
                    w1 = l;
                } else if better(w2, l) && l != w1 {
                    w2 = l;
                }
                if value(w2) != Some(false) {
                    break;
                }
            }
        }
        debug_assert_ne!(w1, w2);
        let slot = self.plain_attach(cref, w1, w2, lbd, activity);
        let conflict = value(w1) == Some(false);
        debug_assert!(!conflict || value(w2) == Some(false));
        (slot, conflict)
    }

    /// Moves the watch at `(list, pos)` to the literal `to` (which must be a
    /// literal of the clause). The stale entry remains in the source list and
    /// is dropped by the caller's compaction.
    pub fn move_watcher(&mut self, list: usize, pos: usize, to: Lit) {
        let w = self.lists[list][pos];
        let target = (!to).code();
        debug_assert_ne!(target, list);
        let new_pos = self.lists[target].len();
        self.lists[target].push(w);
        let peer = self.peer_slot_of(&w);
        let peer = &mut self.lists[peer.list as usize][peer.pos as usize];
        peer.blocker = to;
        peer.peer_pos = new_pos as u32;
    }

    /// Swings both entries of the pair to a new clause with the same literal
    /// set. Positions (and thus recorded reasons) are preserved.
    pub fn change_cref(&mut self, slot: WatchSlot, cref: CRef) {
        let w = self.watcher(slot);
        debug_assert_ne!(w.cref, cref);
        let peer = self.peer_slot_of(&w);
        self.watcher_mut(slot).cref = cref;
        self.watcher_mut(peer).cref = cref;
    }

    /// Removes one entry by swap-remove, repairing the sibling pointer of the
    /// entry that fills the hole.
    fn delete_single(&mut self, list: usize, pos: usize) {
        self.lists[list].swap_remove(pos);
        if pos < self.lists[list].len() {
            let moved = self.lists[list][pos];
            let peer = self.peer_slot_of(&moved);
            self.lists[peer.list as usize][peer.pos as usize].peer_pos = pos as u32;
        }
    }

    /// Removes a single entry (the caller deals with its sibling).
    pub fn delete_entry(&mut self, list: usize, pos: usize) {
        self.delete_single(list, pos);
    }

    /// Detaches the pair containing `slot`. Only safe at level 0 or for
    /// clauses that cannot be a recorded reason.
    pub fn detach(&mut self, slot: WatchSlot) {
        let w = self.watcher(slot);
        let peer = self.peer_slot_of(&w);
        debug_assert_eq!(self.watcher(peer).cref, w.cref);
        self.delete_single(peer.list as usize, peer.pos as usize);
        self.delete_single(slot.list as usize, slot.pos as usize);
    }

    /// Locates the pair watching `cref` by scanning the lists of its
    /// literals. Returns the slot of either entry.
    pub fn find(&self, lits: &[Lit], cref: CRef) -> Option<WatchSlot> {
        for &l in lits {
            let list = (!l).code();
            for (pos, w) in self.lists[list].iter().enumerate() {
                if w.cref == cref {
                    return Some(WatchSlot::new(list, pos));
                }
            }
        }
        None
    }

    /// CRefs of all header entries (one per attached clause).
    pub fn header_crefs(&self) -> Vec<CRef> {
        let mut out = Vec::new();
        for list in &self.lists {
            for w in list {
                if w.is_header() {
                    out.push(w.cref);
                }
            }
        }
        out
    }

    pub fn num_attached(&self) -> usize {
        self.lists.iter().map(|l| l.len()).sum::<usize>() / 2
    }

    /// Watch-symmetry check: the sibling of the sibling is the entry itself,
    /// exactly one of the pair is a header, and blockers cross-reference the
    /// watched literals.
    #[cfg(debug_assertions)]
    pub fn assert_consistent(&self) {
        for (li, list) in self.lists.iter().enumerate() {
            for (pos, w) in list.iter().enumerate() {
                let peer_slot = self.peer_slot_of(w);
                let peer = self.watcher(peer_slot);
                assert_eq!(peer.cref, w.cref);
                assert_eq!(self.peer_slot_of(&peer), WatchSlot::new(li, pos));
                assert_eq!(peer.blocker, WatchSlot::new(li, pos).watched_lit());
                assert_ne!(peer.is_header(), w.is_header());
            }
        }
    }
}

// ---------------------------------------------------------------------------
// one-watched

/// Single watcher for "suspected useless" imported clauses: conflicts are
/// discovered lazily, the clause never propagates.
#[derive(Copy, Clone, Debug)]
pub struct OneWatcher {
    pub cref: CRef,
    pub blocker: Lit,
}

impl OneWatcher {
    pub fn is_removed(&self) -> bool {
        self.blocker == Lit::UNDEF
    }
    pub fn mark_removed(&mut self) {
        self.blocker = Lit::UNDEF;
    }
}

pub struct OneWatchLists {
    lists: Vec<Vec<OneWatcher>>,
}

impl OneWatchLists {
    pub fn new(num_lits: usize) -> OneWatchLists {
        OneWatchLists {
            lists: (0..num_lits).map(|_| Vec::new()).collect(),
        }
    }

    pub fn num_lists(&self) -> usize {
        self.lists.len()
    }
    pub fn list(&self, idx: usize) -> &[OneWatcher] {
        &self.lists[idx]
    }
    pub fn list_mut(&mut self, idx: usize) -> &mut Vec<OneWatcher> {
        &mut self.lists[idx]
    }
    pub fn watcher(&self, slot: WatchSlot) -> OneWatcher {
        self.lists[slot.list as usize][slot.pos as usize]
    }
    pub fn watcher_mut(&mut self, slot: WatchSlot) -> &mut OneWatcher {
        &mut self.lists[slot.list as usize][slot.pos as usize]
    }
    pub fn cref(&self, slot: WatchSlot) -> CRef {
        self.watcher(slot).cref
    }

    /// Watches the first non-false literal; false when every literal is
    /// already falsified (the caller must fall back to a full attach).
    pub fn attach(&mut self, cref: CRef, lits: &[Lit], value: impl Fn(Lit) -> Option<bool>) -> bool {
        debug_assert!(lits.len() > 2);
        for (i, &l) in lits.iter().enumerate() {
            if value(l) != Some(false) {
                let blocker = lits[if i + 1 < lits.len() { i + 1 } else { 0 }];
                self.lists[(!l).code()].push(OneWatcher { cref, blocker });
                return true;
            }
        }
        false
    }

    pub fn detach(&mut self, slot: WatchSlot) {
        self.lists[slot.list as usize].swap_remove(slot.pos as usize);
    }

    pub fn num_attached(&self) -> usize {
        self.lists.iter().map(|l| l.len()).sum()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::core::Var;

    fn l(x: i32) -> Lit {
        Lit::new(Var::new(x.unsigned_abs() - 1), x > 0)
    }

    #[test]
    fn attach_detach_roundtrip() {
        let mut two = TwoWatchLists::new(20);
        let c1 = CRef::from_raw(100);
        let c2 = CRef::from_raw(200);
        let s1 = two.plain_attach(c1, l(1), l(2), 3, 0);
        let s2 = two.plain_attach(c2, l(1), l(3), 2, 0);
        #[cfg(debug_assertions)]
        two.assert_consistent();
        assert_eq!(two.num_attached(), 2);
        assert_eq!(two.header(s1).cref, c1);
        assert_eq!(two.header(s2).lbd(), 2);

        // detaching c1 swaps c2's header into its slot and repairs pointers
        two.detach(s1);
        #[cfg(debug_assertions)]
        two.assert_consistent();
        assert_eq!(two.num_attached(), 1);
        let found = two.find(&[l(1), l(3)], c2).expect("c2 still attached");
        assert_eq!(two.header(found).cref, c2);
        two.detach(two.header_slot(found));
        assert_eq!(two.num_attached(), 0);
    }

    #[test]
    fn move_watcher_updates_sibling() {
        let mut two = TwoWatchLists::new(20);
        let c = CRef::from_raw(7);
        let slot = two.plain_attach(c, l(1), l(2), 1, 0);
        // move the watch from 1 to 4: entry appended on list of !4
        two.move_watcher(slot.list as usize, slot.pos as usize, l(4));
        let stale = two.watcher(slot);
        assert_eq!(stale.blocker, l(2), "stale source entry is left behind");
        let moved_list = (!l(4)).code();
        assert_eq!(two.list(moved_list).len(), 1);
        let moved = two.list(moved_list)[0];
        assert_eq!(moved.blocker, l(2));
        // the sibling (watching 2) now names the new watched literal
        let peer_of_moved = two.watcher(two.peer_slot_of(&moved));
        assert_eq!(peer_of_moved.blocker, l(4));
        assert_eq!(peer_of_moved.peer_pos, 0);
    }

    #[test]
    fn smart_attach_picks_unfalsified_watches() {
        let mut two = TwoWatchLists::new(20);
        // 1 and 2 false at levels 1 and 2, 3 unassigned
        let value = |lit: Lit| match lit.var().index() {
            0 | 1 => Some(!lit.is_positive()),
            _ => None,
        };
        let level = |lit: Lit| lit.var().index() as i32 + 1;
        let (slot, conflict) = two.attach(CRef::from_raw(9), &[l(1), l(2), l(3)], 2, 0, value, level);
        assert!(!conflict);
        let header = two.header(slot);
        let watched = two.header_slot(slot).watched_lit();
        // the undefined literal 3 must be among the watches
        assert!(watched == l(3) || header.blocker == l(3));
    }
}
