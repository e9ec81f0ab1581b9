//! The shared clause arena: fixed-size buckets of 32-bit words, lock-free
//! bump allocation, reference-counted release and whole-bucket reclamation.
//!
//! Clause records never move once allocated; shrinking a clause installs a
//! strictly-shorter replacement and links it through the predecessor's atomic
//! state word, so a `CRef` held by any worker stays resolvable until the last
//! holder dereferences it.

use crate::core::Lit;
use crate::OutOfMemory;
use smallvec::SmallVec;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

pub use clause::{ClauseKind, CRef, Header, SharedState, StateSnapshot, HEADER_LBD_MAX, HEADER_SIZE_MAX};

use clause::{header_clear_flag, header_set_flag, FLAG_REPLACED_BIT, FLAG_VIVIFIED_BIT, STATE_WORDS};

mod bucket;
mod clause;

pub use bucket::Bucket;

/// Sizing of the arena.
#[derive(Copy, Clone, Debug)]
pub struct ArenaConfig {
    /// Bytes per bucket (unit of reclamation).
    pub bucket_bytes: usize,
    /// Total byte budget for clause storage.
    pub total_bytes: usize,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        ArenaConfig {
            bucket_bytes: 256 * 1024,
            total_bytes: 256 * 1024 * 1024,
        }
    }
}

/// Per-worker allocation state: the current bucket per clause tier and the
/// deferred-release list (clauses and chain segments whose dereference is
/// postponed to the next level-0 collection point).
#[derive(Default)]
pub struct AllocState {
    private_bucket: Option<u32>,
    counted_bucket: Option<u32>,
    delete_refs: Vec<(CRef, CRef)>,
}

impl AllocState {
    pub fn new() -> AllocState {
        Default::default()
    }

    fn slot(&mut self, kind: ClauseKind) -> &mut Option<u32> {
        if kind.is_private() {
            &mut self.private_bucket
        } else {
            &mut self.counted_bucket
        }
    }

    pub fn pending_releases(&self) -> usize {
        self.delete_refs.len()
    }
}

/// Read-only view of a clause record. The header is a snapshot taken at view
/// creation; flag re-reads go through the arena.
pub struct ClauseView<'a> {
    words: &'a [AtomicU32],
    base: usize,
    header: Header,
}

impl<'a> ClauseView<'a> {
    pub fn header(&self) -> Header {
        self.header
    }
    pub fn kind(&self) -> ClauseKind {
        self.header.kind()
    }
    pub fn size(&self) -> usize {
        self.header.size() as usize
    }
    pub fn lbd(&self) -> u32 {
        self.header.lbd()
    }
    pub fn is_replaced(&self) -> bool {
        self.header.is_replaced()
    }
    pub fn is_vivified(&self) -> bool {
        self.header.is_vivified()
    }
    pub fn is_private_deleted(&self) -> bool {
        self.header.is_private_deleted()
    }

    pub fn lit(&self, i: usize) -> Lit {
        debug_assert!(i < self.size());
        Lit::from_code(self.words[self.base + 1 + i].load(Ordering::Relaxed))
    }

    pub fn lits(&self) -> impl Iterator<Item = Lit> + '_ {
        (0..self.size()).map(|i| self.lit(i))
    }

    pub fn collect_lits(&self) -> SmallVec<[Lit; 8]> {
        self.lits().collect()
    }

    pub fn contains(&self, lit: Lit) -> bool {
        self.lits().any(|l| l == lit)
    }
}

/// The process-wide clause store.
pub struct ClauseArena {
    buckets: Box<[Bucket]>,
    words_per_bucket: u32,
    num_workers: u32,
    free: Mutex<Vec<u32>>,
    free_len: AtomicUsize,
}

impl ClauseArena {
    pub fn new(config: ArenaConfig, num_workers: usize) -> ClauseArena {
        let words_per_bucket = (config.bucket_bytes / 4).max(64) as u32;
        let num_buckets = (config.total_bytes / (words_per_bucket as usize * 4)).max(2);
        let mut buckets = Vec::with_capacity(num_buckets);
        buckets.resize_with(num_buckets, || Bucket::with_capacity(words_per_bucket));
        // every bucket starts on the free stack
        let free: Vec<u32> = (0..num_buckets as u32).rev().collect();
        ClauseArena {
            buckets: buckets.into_boxed_slice(),
            words_per_bucket,
            num_workers: num_workers as u32,
            free_len: AtomicUsize::new(free.len()),
            free: Mutex::new(free),
        }
    }

    pub fn num_workers(&self) -> u32 {
        self.num_workers
    }

    pub fn num_buckets(&self) -> usize {
        self.buckets.len()
    }

    pub fn num_free_buckets(&self) -> usize {
        self.free_len.load(Ordering::Relaxed)
    }

    pub fn used_bytes(&self) -> usize {
        (self.num_buckets() - self.num_free_buckets()) * self.words_per_bucket as usize * 4
    }

    fn locate(&self, cref: CRef) -> (&Bucket, usize) {
        debug_assert!(cref.is_valid());
        let bucket = cref.raw() / self.words_per_bucket;
        let local = cref.raw() % self.words_per_bucket;
        (&self.buckets[bucket as usize], local as usize)
    }

    fn bucket_id(&self, cref: CRef) -> u32 {
        cref.raw() / self.words_per_bucket
    }

    /// O(1) clause view from the arena base.
    pub fn clause(&self, cref: CRef) -> ClauseView<'_> {
        let (bucket, base) = self.locate(cref);
        let header = Header::from_raw(bucket.words()[base].load(Ordering::Relaxed));
        ClauseView {
            words: bucket.words(),
            base,
            header,
        }
    }

    /// View of the atomic reference/replacement word of a counted clause.
    pub fn shared_state(&self, cref: CRef) -> SharedState<'_> {
        let (bucket, base) = self.locate(cref);
        debug_assert!(base >= STATE_WORDS as usize);
        debug_assert!(!Header::from_raw(bucket.words()[base].load(Ordering::Relaxed))
            .kind()
            .is_private());
        let slot = &bucket.words()[base - STATE_WORDS as usize];
        let ptr = slot as *const AtomicU32 as *const AtomicU64;
        debug_assert_eq!(ptr as usize % 8, 0, "state word must be 8-byte aligned");
        // SAFETY: the two words below the header were reserved at allocation
        // time for exclusive use as one 64-bit atomic, the address is 8-byte
        // aligned by construction (alignment pad), and no other code path
        // accesses these words while the clause is live.
        SharedState(unsafe { &*ptr })
    }

    // ------------------------------------------------------------------
    // allocation & release

    /// Allocates a clause record in the caller's current bucket for the
    /// header's tier, acquiring a fresh bucket when the bump fails. Counted
    /// clauses get their state word initialized to
    /// `(refs = num_workers, replacement = UNDEF)`.
    pub fn alloc(&self, ts: &mut AllocState, lits: &[Lit], header: Header) -> Result<CRef, OutOfMemory> {
        debug_assert_eq!(lits.len(), header.size() as usize);
        debug_assert!(!lits.is_empty());
        if header.request_words() > self.words_per_bucket {
            tracing::error!("clause of {} literals does not fit a bucket", lits.len());
            return Err(OutOfMemory);
        }
        if let Some(bucket) = *ts.slot(header.kind()) {
            if let Some(cref) = self.insert_into_bucket(bucket, lits, header) {
                return Ok(cref);
            }
            // retire the slack of the exhausted bucket
            if self.buckets[bucket as usize].waste_rest() {
                self.push_free(bucket);
            }
        }
        let fresh = self.pop_free()?;
        *ts.slot(header.kind()) = Some(fresh);
        let cref = self
            .insert_into_bucket(fresh, lits, header)
            .expect("fresh bucket must fit a checked request");
        Ok(cref)
    }

    fn insert_into_bucket(&self, bucket_id: u32, lits: &[Lit], header: Header) -> Option<CRef> {
        let bucket = &self.buckets[bucket_id as usize];
        let request = header.request_words();
        let start = bucket.alloc(request)?;
        let base = if header.kind().is_private() {
            start
        } else {
            // place the 64-bit state word on an 8-byte boundary
            let addr = bucket.words().as_ptr() as usize + start as usize * 4;
            let state = if addr % 8 == 0 { start } else { start + 1 };
            let base = state + STATE_WORDS;
            // the state words and the (used or unused) pad word are accounted
            // now; release later wastes exactly header + literals
            let closed = bucket.add_wasted(request - header.payload_words());
            debug_assert!(!closed);
            self.state_at(bucket, state).initialize(self.num_workers);
            base
        };
        let words = bucket.words();
        words[base as usize].store(header.raw(), Ordering::Relaxed);
        for (i, &l) in lits.iter().enumerate() {
            words[base as usize + 1 + i].store(l.raw(), Ordering::Relaxed);
        }
        Some(CRef::from_raw(bucket_id * self.words_per_bucket + base))
    }

    fn state_at<'a>(&self, bucket: &'a Bucket, word: u32) -> SharedState<'a> {
        let slot = &bucket.words()[word as usize];
        let ptr = slot as *const AtomicU32 as *const AtomicU64;
        debug_assert_eq!(ptr as usize % 8, 0);
        // SAFETY: same contract as `shared_state`.
        SharedState(unsafe { &*ptr })
    }

    fn pop_free(&self) -> Result<u32, OutOfMemory> {
        let popped = self.free.lock().unwrap().pop();
        match popped {
            Some(id) => {
                self.free_len.fetch_sub(1, Ordering::Relaxed);
                self.buckets[id as usize].reset();
                Ok(id)
            }
            None => {
                tracing::error!("no free buckets left");
                Err(OutOfMemory)
            }
        }
    }

    fn push_free(&self, bucket_id: u32) {
        self.free.lock().unwrap().push(bucket_id);
        self.free_len.fetch_add(1, Ordering::Relaxed);
    }

    /// Releases the payload of one record: writes the dead marker over the
    /// first literal and wastes `header + size` words. For counted clauses
    /// this drops one reference first and only releases on the last one.
    /// Returns the header when the payload was actually freed.
    pub fn release_one(&self, cref: CRef) -> Option<Header> {
        let (header, base, bucket_id) = {
            let view = self.clause(cref);
            (view.header, view.base, self.bucket_id(cref))
        };
        if header.kind().is_counted() {
            let change = self.shared_state(cref).dereference();
            if !change.is_dereferenced() {
                return None;
            }
        }
        let bucket = &self.buckets[bucket_id as usize];
        debug_assert_ne!(
            Lit::from_code(bucket.words()[base + 1].load(Ordering::Relaxed)),
            Lit::UNDEF,
            "double release"
        );
        bucket.words()[base + 1].store(Lit::UNDEF.raw(), Ordering::Relaxed);
        if bucket.add_wasted(header.payload_words()) {
            self.push_free(bucket_id);
        }
        Some(header)
    }

    /// Drops the caller's reference on `cref`; for counted clauses this walks
    /// the chain from `cref` to its end, dereferencing every node.
    /// Returns the number of payloads actually freed.
    pub fn remove_clause(&self, cref: CRef) -> usize {
        if self.clause(cref).kind().is_private() {
            usize::from(self.release_one(cref).is_some())
        } else {
            self.remove_chain(cref, CRef::UNDEF)
        }
    }

    fn remove_chain(&self, start: CRef, end: CRef) -> usize {
        debug_assert!(!self.clause(start).kind().is_private());
        let mut freed = 0;
        let mut cur = start;
        while cur.is_valid() && cur != end {
            let next = self.shared_state(cur).replacement();
            freed += usize::from(self.release_one(cur).is_some());
            cur = next;
        }
        freed
    }

    /// Defers the release of `start` (exclusive of `end` when given) to the
    /// next collection point. With no `end` the whole chain is also marked
    /// for global deletion.
    pub fn release_later(&self, ts: &mut AllocState, start: CRef, end: CRef) {
        debug_assert!(self.clause(start).kind().is_private() || self.shared_state(start).refs() > 0);
        if !end.is_valid() {
            self.mark_deleted_chain(start);
        }
        ts.delete_refs.push((start, end));
    }

    /// Processes the deferred-release list. Returns freed payload count.
    pub fn collect_garbage(&self, ts: &mut AllocState) -> usize {
        let mut freed = 0;
        let mut dels = std::mem::take(&mut ts.delete_refs);
        for (start, end) in dels.drain(..) {
            if self.clause(start).kind().is_private() {
                debug_assert_eq!(end, CRef::UNDEF);
                freed += usize::from(self.release_one(start).is_some());
            } else {
                freed += self.remove_chain(start, end);
            }
        }
        ts.delete_refs = dels;
        freed
    }

    /// Gives back the worker's current buckets on exit so a fully-released
    /// arena ends up with every bucket on the free stack.
    pub fn release_alloc_state(&self, ts: &mut AllocState) {
        debug_assert!(ts.delete_refs.is_empty());
        for slot in [ts.private_bucket.take(), ts.counted_bucket.take()] {
            if let Some(id) = slot {
                if self.buckets[id as usize].waste_rest() {
                    self.push_free(id);
                }
            }
        }
    }

    /// Shrinks a private clause in place: the freed literal words are wasted
    /// and the header rewritten. The `CRef` stays valid.
    pub fn shrink_private(&self, cref: CRef, lits: &[Lit], header: Header) {
        let (bucket, base) = self.locate(cref);
        let old = Header::from_raw(bucket.words()[base].load(Ordering::Relaxed));
        debug_assert!(old.kind().is_private() && header.kind().is_private());
        debug_assert!(lits.len() < old.size() as usize);
        debug_assert_eq!(lits.len(), header.size() as usize);
        let closed = bucket.add_wasted(old.size() - header.size());
        debug_assert!(!closed, "the shrunk payload still occupies the bucket");
        let words = bucket.words();
        words[base].store(header.raw(), Ordering::Relaxed);
        for (i, &l) in lits.iter().enumerate() {
            words[base + 1 + i].store(l.raw(), Ordering::Relaxed);
        }
    }

    // ------------------------------------------------------------------
    // header flags

    pub fn set_replaced(&self, cref: CRef) {
        let (bucket, base) = self.locate(cref);
        header_set_flag(&bucket.words()[base], FLAG_REPLACED_BIT);
    }
    pub fn set_vivified(&self, cref: CRef) {
        let (bucket, base) = self.locate(cref);
        header_set_flag(&bucket.words()[base], FLAG_VIVIFIED_BIT);
    }
    pub fn clear_vivified(&self, cref: CRef) {
        let (bucket, base) = self.locate(cref);
        header_clear_flag(&bucket.words()[base], FLAG_VIVIFIED_BIT);
    }
    /// Marks a private clause for deletion (the owner will drop it at the
    /// next compaction of its watch lists).
    pub fn set_private_deleted(&self, cref: CRef) {
        let (bucket, base) = self.locate(cref);
        let word = &bucket.words()[base];
        let header = Header::from_raw(word.load(Ordering::Relaxed));
        debug_assert!(header.kind().is_private());
        word.store(header.with_private_tombstone().raw(), Ordering::Relaxed);
    }

    // ------------------------------------------------------------------
    // replacement chains

    /// Last valid node of the replacement chain starting at `cref`
    /// (`cref` itself while live).
    pub fn peek_last_valid(&self, cref: CRef) -> CRef {
        debug_assert!(!self.clause(cref).kind().is_private());
        let mut res = cref;
        let mut next = self.shared_state(res).replacement();
        while next.is_valid() {
            res = next;
            next = self.shared_state(res).replacement();
        }
        res
    }

    /// True when a strictly-shorter live replacement exists down the chain.
    pub fn should_be_replaced(&self, cref: CRef) -> bool {
        let view = self.clause(cref);
        if view.kind().is_private() {
            return false;
        }
        let last = self.peek_last_valid(cref);
        debug_assert!(last == cref || self.clause(last).size() < view.size());
        last != cref
    }

    /// True when the clause (or the end of its chain) is marked deleted.
    pub fn should_be_removed(&self, cref: CRef) -> bool {
        let view = self.clause(cref);
        if view.kind().is_private() {
            return view.is_private_deleted();
        }
        let mut cur = cref;
        while cur.is_valid() {
            cur = self.shared_state(cur).replacement();
        }
        cur == CRef::DEL
    }

    /// Walks the chain and ensures its end is `DEL`. Returns true when this
    /// call performed a successful `UNDEF -> DEL` transition.
    pub fn mark_deleted_chain(&self, cref: CRef) -> bool {
        let view = self.clause(cref);
        if view.kind().is_private() {
            self.set_private_deleted(cref);
            return true;
        }
        let mut res = false;
        let mut cur = cref;
        while cur.is_valid() {
            let state = self.shared_state(cur);
            let mut next = state.replacement();
            if next == CRef::UNDEF {
                res = state.mark_deleted();
                next = state.replacement();
            }
            cur = next;
        }
        debug_assert_eq!(cur, CRef::DEL);
        res
    }

    /// Resolves the live tail of a moved chain and defers the release of the
    /// traversed prefix. Requires `should_be_replaced(cref)`.
    pub fn switch_to_replacement(&self, ts: &mut AllocState, cref: CRef) -> CRef {
        let res = self.peek_last_valid(cref);
        debug_assert_ne!(res, cref);
        debug_assert!(self.clause(res).size() < self.clause(cref).size());
        self.release_later(ts, cref, res);
        res
    }

    /// Splices a strictly-shorter clause behind `prev` (or behind the first
    /// chain node accepted by `checker`). Returns `(spliced, tail)` where
    /// `tail` is the node the caller should now watch. On a lost race the
    /// speculative allocation is retracted. The traversed prefix is deferred
    /// for release when the watched node changed.
    pub fn splice_replacement(
        &self,
        ts: &mut AllocState,
        prev: CRef,
        lits: &[Lit],
        header: Header,
        checker: impl Fn(&ClauseArena, CRef) -> bool,
    ) -> Result<(bool, CRef), OutOfMemory> {
        debug_assert!(header.kind().is_counted());
        let mut spliced = false;
        let mut cur = prev;
        let mut fresh = CRef::UNDEF;
        while cur.is_valid() {
            let succ = self.shared_state(cur).replacement();
            if succ == CRef::UNDEF && checker(self, cur) {
                debug_assert!(lits.len() < self.clause(cur).size());
                if fresh == CRef::UNDEF {
                    fresh = self.alloc(ts, lits, header)?;
                }
                let observed = self.shared_state(cur).mark_reallocated(fresh);
                if !observed.is_reallocated() && !observed.should_be_deleted() {
                    self.shared_state(fresh).correct_realloc(self.num_workers, observed);
                    self.set_replaced(cur);
                    cur = fresh;
                    spliced = true;
                    break;
                }
                // lost the race, re-inspect the node
                continue;
            } else if succ.is_valid() {
                cur = succ;
            } else {
                break;
            }
        }
        if fresh.is_valid() && !spliced {
            // retract the speculative allocation
            self.shared_state(fresh).initialize(1);
            let released = self.release_one(fresh);
            debug_assert!(released.is_some());
        }
        if cur != prev {
            self.release_later(ts, prev, cur);
        }
        Ok((spliced, cur))
    }

    // ------------------------------------------------------------------
    // audit

    /// End-of-run audit: with every worker's references released, all buckets
    /// must be back on the free stack.
    pub fn audit(&self) -> ArenaAudit {
        ArenaAudit {
            total_buckets: self.num_buckets(),
            free_buckets: self.num_free_buckets(),
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub struct ArenaAudit {
    pub total_buckets: usize,
    pub free_buckets: usize,
}

impl ArenaAudit {
    pub fn leak_free(&self) -> bool {
        self.free_buckets == self.total_buckets
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::core::Var;

    fn lits(xs: &[i32]) -> Vec<Lit> {
        xs.iter()
            .map(|&x| {
                let v = Var::new(x.unsigned_abs() - 1);
                Lit::new(v, x > 0)
            })
            .collect()
    }

    fn tiny_arena(workers: usize) -> ClauseArena {
        ClauseArena::new(
            ArenaConfig {
                bucket_bytes: 1024,
                total_bytes: 8 * 1024,
            },
            workers,
        )
    }

    #[test]
    fn alloc_and_read_back() {
        let arena = tiny_arena(2);
        let mut ts = AllocState::new();
        let c = lits(&[1, -2, 3]);
        let cref = arena
            .alloc(&mut ts, &c, Header::new(ClauseKind::Private, 2, 3))
            .unwrap();
        let view = arena.clause(cref);
        assert_eq!(view.size(), 3);
        assert_eq!(view.kind(), ClauseKind::Private);
        assert_eq!(view.lbd(), 2);
        assert_eq!(view.collect_lits().as_slice(), c.as_slice());
    }

    #[test]
    fn counted_clause_lifecycle() {
        let arena = tiny_arena(2);
        let mut ts = AllocState::new();
        let c = lits(&[1, 2, 3, 4]);
        let cref = arena
            .alloc(&mut ts, &c, Header::new(ClauseKind::Shared, 3, 4))
            .unwrap();
        assert_eq!(arena.shared_state(cref).refs(), 2);
        assert!(arena.release_one(cref).is_none(), "one holder remains");
        assert!(arena.release_one(cref).is_some(), "last dereference frees");
        let view = arena.clause(cref);
        assert_eq!(view.lit(0), Lit::UNDEF, "dead marker written");
    }

    #[test]
    fn buckets_are_reclaimed_when_fully_wasted() {
        let arena = ClauseArena::new(
            ArenaConfig {
                bucket_bytes: 256, // 64 words
                total_bytes: 1024,
            },
            1,
        );
        let free_at_start = arena.num_free_buckets();
        let mut ts = AllocState::new();
        let mut refs = Vec::new();
        // private payload of 11 words each; 5 fit a 64-word bucket
        for _ in 0..12 {
            let c = lits(&[1, -2, 3, -4, 5, -6, 7, -8, 9, -10]);
            refs.push(
                arena
                    .alloc(&mut ts, &c, Header::new(ClauseKind::Private, 5, 10))
                    .unwrap(),
            );
        }
        assert!(arena.num_free_buckets() < free_at_start);
        for cref in refs {
            assert!(arena.release_one(cref).is_some());
        }
        arena.release_alloc_state(&mut ts);
        assert!(arena.audit().leak_free());
    }

    #[test]
    fn chain_splice_and_switch() {
        let arena = tiny_arena(2);
        let mut ts1 = AllocState::new();
        let mut ts2 = AllocState::new();
        let long = lits(&[1, 2, 3, 4, 5]);
        let a = arena
            .alloc(&mut ts1, &long, Header::new(ClauseKind::Shared, 4, 5))
            .unwrap();
        let short = lits(&[1, 2, 3]);
        let (spliced, tail) = arena
            .splice_replacement(&mut ts1, a, &short, Header::new(ClauseKind::Shared, 2, 3), |ar, c| {
                ar.clause(c).size() > 3
            })
            .unwrap();
        assert!(spliced);
        assert_ne!(tail, a);
        assert!(arena.should_be_replaced(a));
        assert!(!arena.should_be_removed(a));
        assert_eq!(arena.peek_last_valid(a), tail);
        assert!(arena.clause(a).is_replaced());

        // second holder tries to splice behind `a` but the chain has moved:
        // it ends up watching the tail and retracts nothing
        let (again, same_tail) = arena
            .splice_replacement(&mut ts2, a, &lits(&[1, 2]), Header::new(ClauseKind::Shared, 1, 2), |_, c| c == a)
            .unwrap();
        assert!(!again);
        assert_eq!(same_tail, tail);

        // deferred prefix releases drain both holders' references on `a`
        arena.collect_garbage(&mut ts1);
        arena.collect_garbage(&mut ts2);
        assert_eq!(arena.clause(a).lit(0), Lit::UNDEF, "predecessor freed");
        // both holders drop the tail
        assert_eq!(arena.remove_clause(tail), 0);
        assert_eq!(arena.remove_clause(tail), 1);
        arena.release_alloc_state(&mut ts1);
        arena.release_alloc_state(&mut ts2);
        assert!(arena.audit().leak_free());
    }

    #[test]
    fn deleted_chain_is_observed() {
        let arena = tiny_arena(2);
        let mut ts = AllocState::new();
        let c = lits(&[1, 2, 3]);
        let cref = arena
            .alloc(&mut ts, &c, Header::new(ClauseKind::Shared, 2, 3))
            .unwrap();
        assert!(arena.mark_deleted_chain(cref));
        assert!(arena.should_be_removed(cref));
        assert!(!arena.mark_deleted_chain(cref), "second mark loses");
    }
}
