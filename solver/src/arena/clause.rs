use std::fmt::{Debug, Display, Error, Formatter};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// A 32-bit word offset into the clause arena, addressing the header word of a
/// clause. Two sentinels exist: [`CRef::UNDEF`] (no clause) and [`CRef::DEL`]
/// (deletion tombstone, reachable through replacement chains).
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct CRef(pub(crate) u32);

impl CRef {
    pub const UNDEF: CRef = CRef(u32::MAX);
    pub const DEL: CRef = CRef(u32::MAX - 1);

    pub fn is_valid(self) -> bool {
        self != CRef::UNDEF && self != CRef::DEL
    }
    pub fn raw(self) -> u32 {
        self.0
    }
    pub fn from_raw(raw: u32) -> CRef {
        CRef(raw)
    }
}

impl Default for CRef {
    fn default() -> Self {
        CRef::UNDEF
    }
}

impl Display for CRef {
    fn fmt(&self, f: &mut Formatter) -> Result<(), Error> {
        match *self {
            CRef::UNDEF => write!(f, "cref-undef"),
            CRef::DEL => write!(f, "cref-del"),
            CRef(x) => write!(f, "cref:{x}"),
        }
    }
}
impl Debug for CRef {
    fn fmt(&self, f: &mut Formatter) -> Result<(), Error> {
        write!(f, "{self}")
    }
}

/// Storage tier of a clause.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ClauseKind {
    /// Owned by exactly one worker's watch index, never referenced by peers.
    Private,
    /// Deletable learnt clause observable by several workers.
    Shared,
    /// Non-deletable clause (initial, or learnt above the quality bar).
    Permanent,
}

impl ClauseKind {
    pub fn is_private(self) -> bool {
        self == ClauseKind::Private
    }
    /// Carries the atomic reference/replacement word.
    pub fn is_counted(self) -> bool {
        !self.is_private()
    }
    fn from_bits(bits: u32) -> ClauseKind {
        match bits {
            0 => ClauseKind::Private,
            1 => ClauseKind::Shared,
            _ => ClauseKind::Permanent,
        }
    }
    fn bits(self) -> u32 {
        match self {
            ClauseKind::Private => 0,
            ClauseKind::Shared => 1,
            ClauseKind::Permanent => 2,
        }
    }
}

const KIND_BITS: u32 = 2;
const FLAG_REPLACED: u32 = 1 << 2;
const FLAG_VIVIFIED: u32 = 1 << 3;
const LBD_SHIFT: u32 = 4;
const LBD_BITS: u32 = 5;
const SIZE_SHIFT: u32 = LBD_SHIFT + LBD_BITS;
const SIZE_BITS: u32 = 23;

/// Largest LBD value stored in a header; larger values saturate.
pub const HEADER_LBD_MAX: u32 = (1 << LBD_BITS) - 2;
/// `lbd == LBD_TOMBSTONE` encodes "private clause, marked for deletion".
const LBD_TOMBSTONE: u32 = (1 << LBD_BITS) - 1;
/// Largest clause size representable in a header.
pub const HEADER_SIZE_MAX: u32 = (1 << SIZE_BITS) - 1;

/// Packed 32-bit clause header: `{kind:2, replaced:1, vivified:1, lbd:5, size:23}`.
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct Header(u32);

impl Header {
    pub fn new(kind: ClauseKind, lbd: u32, size: u32) -> Header {
        debug_assert!(size <= HEADER_SIZE_MAX);
        let lbd = lbd.min(HEADER_LBD_MAX);
        Header(kind.bits() | (lbd << LBD_SHIFT) | (size << SIZE_SHIFT))
    }

    /// Header for the same literals at a (possibly) different tier, keeping
    /// the vivified bit and dropping the replaced bit.
    pub fn retiered(self, kind: ClauseKind, lbd: u32) -> Header {
        let mut h = Header::new(kind, lbd, self.size());
        if self.is_vivified() {
            h.0 |= FLAG_VIVIFIED;
        }
        h
    }

    /// Same header with the vivified bit set.
    pub fn vivified(self) -> Header {
        Header(self.0 | FLAG_VIVIFIED)
    }

    pub fn from_raw(raw: u32) -> Header {
        Header(raw)
    }
    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn kind(self) -> ClauseKind {
        ClauseKind::from_bits(self.0 & ((1 << KIND_BITS) - 1))
    }
    pub fn size(self) -> u32 {
        self.0 >> SIZE_SHIFT
    }
    pub fn lbd(self) -> u32 {
        (self.0 >> LBD_SHIFT) & ((1 << LBD_BITS) - 1)
    }
    pub fn is_replaced(self) -> bool {
        self.0 & FLAG_REPLACED != 0
    }
    pub fn is_vivified(self) -> bool {
        self.0 & FLAG_VIVIFIED != 0
    }
    pub fn is_private_deleted(self) -> bool {
        self.kind().is_private() && self.lbd() == LBD_TOMBSTONE
    }

    pub(crate) fn with_private_tombstone(self) -> Header {
        debug_assert!(self.kind().is_private());
        let cleared = self.0 & !(((1 << LBD_BITS) - 1) << LBD_SHIFT);
        Header(cleared | (LBD_TOMBSTONE << LBD_SHIFT))
    }

    /// Number of arena words occupied by the released payload (header + lits).
    pub fn payload_words(self) -> u32 {
        1 + self.size()
    }

    /// Number of arena words to request at allocation time. For counted
    /// clauses this includes the two state words and the maximal alignment
    /// pad, so the request can never underestimate actual consumption.
    pub fn request_words(self) -> u32 {
        if self.kind().is_private() {
            self.payload_words()
        } else {
            self.payload_words() + STATE_WORDS + 1
        }
    }
}

impl Debug for Header {
    fn fmt(&self, f: &mut Formatter) -> Result<(), Error> {
        write!(
            f,
            "Header({:?}, lbd={}, size={}{}{})",
            self.kind(),
            self.lbd(),
            self.size(),
            if self.is_replaced() { ", replaced" } else { "" },
            if self.is_vivified() { ", vivified" } else { "" },
        )
    }
}

pub(crate) const FLAG_REPLACED_BIT: u32 = FLAG_REPLACED;
pub(crate) const FLAG_VIVIFIED_BIT: u32 = FLAG_VIVIFIED;

/// Words occupied by the atomic state preceding a shared/permanent clause.
pub(crate) const STATE_WORDS: u32 = 2;

/// Snapshot of the 64-bit state word of a counted clause: outstanding
/// references in the low half, replacement `CRef` in the high half.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct StateSnapshot {
    pub refs: u32,
    pub replacement: CRef,
}

impl StateSnapshot {
    fn unpack(word: u64) -> StateSnapshot {
        StateSnapshot {
            refs: word as u32,
            replacement: CRef((word >> 32) as u32),
        }
    }
    fn pack(self) -> u64 {
        self.refs as u64 | ((self.replacement.0 as u64) << 32)
    }

    /// A strictly-shorter equivalent has been installed.
    pub fn is_reallocated(self) -> bool {
        self.replacement.is_valid()
    }
    pub fn should_be_deleted(self) -> bool {
        self.replacement == CRef::DEL
    }
    /// No worker references the payload anymore; it can be released.
    pub fn is_dereferenced(self) -> bool {
        self.refs == 0
    }
}

/// View of the atomic state word of a shared or permanent clause.
///
/// All transitions are single CAS (or fetch-add) operations on the packed
/// 64-bit word. Once `replacement` leaves `UNDEF` it never returns to it.
pub struct SharedState<'a>(pub(crate) &'a AtomicU64);

impl SharedState<'_> {
    pub fn initialize(&self, refs: u32) {
        self.0.store(
            StateSnapshot {
                refs,
                replacement: CRef::UNDEF,
            }
            .pack(),
            Ordering::SeqCst,
        );
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot::unpack(self.0.load(Ordering::SeqCst))
    }

    pub fn refs(&self) -> u32 {
        self.snapshot().refs
    }

    pub fn replacement(&self) -> CRef {
        self.snapshot().replacement
    }

    /// Tries to splice `replacement` into the chain. Succeeds iff the current
    /// replacement is still `UNDEF`; returns the previously observed state
    /// (so `is_reallocated()` on the result signals the lost race).
    pub fn mark_reallocated(&self, replacement: CRef) -> StateSnapshot {
        debug_assert!(replacement.is_valid());
        let mut observed = self.snapshot();
        while !observed.is_reallocated() && observed.replacement != CRef::DEL {
            let desired = StateSnapshot {
                refs: observed.refs,
                replacement,
            };
            match self
                .0
                .compare_exchange_weak(observed.pack(), desired.pack(), Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return observed,
                Err(actual) => observed = StateSnapshot::unpack(actual),
            }
        }
        observed
    }

    /// Marks the clause for global deletion. Returns true iff this call
    /// performed the `UNDEF -> DEL` transition.
    pub fn mark_deleted(&self) -> bool {
        let mut observed = self.snapshot();
        while observed.replacement == CRef::UNDEF {
            let desired = StateSnapshot {
                refs: observed.refs,
                replacement: CRef::DEL,
            };
            match self
                .0
                .compare_exchange_weak(observed.pack(), desired.pack(), Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return true,
                Err(actual) => observed = StateSnapshot::unpack(actual),
            }
        }
        false
    }

    /// Drops one reference; returns the state after the decrement. When it
    /// reports `is_dereferenced()` the caller must release the payload.
    pub fn dereference(&self) -> StateSnapshot {
        let prev = StateSnapshot::unpack(self.0.fetch_sub(1, Ordering::SeqCst));
        debug_assert!(prev.refs > 0);
        StateSnapshot {
            refs: prev.refs - 1,
            replacement: prev.replacement,
        }
    }

    pub fn reference_additional(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    /// After winning a `mark_reallocated` race on the predecessor, aligns the
    /// successor's count so both hold the same number of outstanding
    /// references: the successor was initialized with `num_workers` but only
    /// `observed.refs` holders remain to migrate.
    pub fn correct_realloc(&self, num_workers: u32, observed: StateSnapshot) {
        debug_assert!(num_workers >= observed.refs);
        let surplus = (num_workers - observed.refs) as u64;
        let prev = StateSnapshot::unpack(self.0.fetch_sub(surplus, Ordering::SeqCst));
        debug_assert!(prev.refs as u64 > surplus);
    }
}

/// Atomic flag updates on a clause header word. Flag sets use `fetch_or` so a
/// concurrent `replaced`/`vivified` write can never be lost.
pub(crate) fn header_set_flag(word: &AtomicU32, flag: u32) {
    word.fetch_or(flag, Ordering::SeqCst);
}
pub(crate) fn header_clear_flag(word: &AtomicU32, flag: u32) {
    word.fetch_and(!flag, Ordering::SeqCst);
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let h = Header::new(ClauseKind::Shared, 7, 12345);
        assert_eq!(h.kind(), ClauseKind::Shared);
        assert_eq!(h.lbd(), 7);
        assert_eq!(h.size(), 12345);
        assert!(!h.is_replaced());
        assert!(!h.is_vivified());
        assert_eq!(h.request_words(), 1 + 12345 + 3);

        let p = Header::new(ClauseKind::Private, 99, 4);
        assert_eq!(p.lbd(), HEADER_LBD_MAX, "lbd saturates");
        assert!(!p.is_private_deleted());
        assert!(p.with_private_tombstone().is_private_deleted());
        assert_eq!(p.request_words(), 5);
    }

    #[test]
    fn state_transitions() {
        let word = AtomicU64::new(0);
        let state = SharedState(&word);
        state.initialize(4);
        assert_eq!(state.refs(), 4);
        assert_eq!(state.replacement(), CRef::UNDEF);

        // splice a replacement; a second attempt must observe the first
        let observed = state.mark_reallocated(CRef::from_raw(17));
        assert!(!observed.is_reallocated());
        let second = state.mark_reallocated(CRef::from_raw(99));
        assert!(second.is_reallocated());
        assert_eq!(state.replacement(), CRef::from_raw(17));

        // deletion cannot overwrite a committed replacement
        assert!(!state.mark_deleted());

        let mut last = state.snapshot();
        while !last.is_dereferenced() {
            last = state.dereference();
        }
        assert_eq!(last.refs, 0);
        assert_eq!(last.replacement, CRef::from_raw(17));
    }

    #[test]
    fn delete_wins_once() {
        let word = AtomicU64::new(0);
        let state = SharedState(&word);
        state.initialize(2);
        assert!(state.mark_deleted());
        assert!(!state.mark_deleted());
        assert!(state.snapshot().should_be_deleted());
        let observed = state.mark_reallocated(CRef::from_raw(5));
        assert_eq!(observed.replacement, CRef::DEL);
        assert_eq!(state.replacement(), CRef::DEL);
    }

    #[test]
    fn correct_realloc_balances_counts() {
        // predecessor observed with 3 of 4 workers still holding it
        let word = AtomicU64::new(0);
        let succ = SharedState(&word);
        succ.initialize(4);
        succ.correct_realloc(
            4,
            StateSnapshot {
                refs: 3,
                replacement: CRef::UNDEF,
            },
        );
        assert_eq!(succ.refs(), 3);
    }
}
