use crate::arena::{CRef, ClauseArena};
use crate::core::Lit;
use crate::exchange::WorkerId;
use std::sync::Mutex;

/// Single-producer / many-reader ring buffer. The producer appends under the
/// mutex; readers drain everything since their cursor under the same mutex.
/// On overflow the oldest entry is overwritten; a reader that had not reached
/// it yet is reported so the producer can settle on its behalf.
pub struct LockRing<T> {
    inner: Mutex<RingInner<T>>,
}

struct RingInner<T> {
    buf: Box<[T]>,
    /// Total number of entries ever pushed; entry `i` lives at `i % capacity`.
    head: u64,
    /// Per-reader count of consumed entries. Maintained `>= head - capacity`.
    cursors: Box<[u64]>,
}

impl<T: Copy + Default> LockRing<T> {
    pub fn new(capacity: usize, num_readers: usize, producer: WorkerId) -> LockRing<T> {
        assert!(capacity > 0);
        let inner = RingInner {
            buf: vec![T::default(); capacity].into_boxed_slice(),
            head: 0,
            cursors: vec![0; num_readers].into_boxed_slice(),
        };
        debug_assert!(producer < num_readers);
        LockRing {
            inner: Mutex::new(inner),
        }
    }

    /// Appends `value`. When this overwrites an entry some readers had not
    /// consumed, returns that entry together with the number of readers that
    /// missed it (their cursors are advanced past it).
    pub fn push(&self, producer: WorkerId, value: T) -> Option<(T, u32)> {
        let mut g = self.inner.lock().unwrap();
        let cap = g.buf.len() as u64;
        let mut dropped = None;
        if g.head >= cap {
            let evicted = g.head - cap;
            let mut missed = 0;
            for c in g.cursors.iter_mut() {
                if *c <= evicted {
                    debug_assert_eq!(*c, evicted);
                    *c = evicted + 1;
                    missed += 1;
                }
            }
            if missed > 0 {
                dropped = Some((g.buf[(evicted % cap) as usize], missed));
            }
        }
        let head = g.head;
        let slot = (head % cap) as usize;
        g.buf[slot] = value;
        g.head = head + 1;
        // the producer observes its own entries implicitly
        g.cursors[producer] = head + 1;
        dropped
    }

    /// Appends all entries since `reader`'s cursor to `out` and advances the
    /// cursor.
    pub fn drain(&self, reader: WorkerId, out: &mut Vec<T>) {
        let mut g = self.inner.lock().unwrap();
        let head = g.head;
        let start = g.cursors[reader];
        debug_assert!(start + g.buf.len() as u64 >= head);
        let cap = g.buf.len() as u64;
        for i in start..head {
            out.push(g.buf[(i % cap) as usize]);
        }
        g.cursors[reader] = head;
    }

    /// Entries `reader` has not consumed yet.
    pub fn num_new(&self, reader: WorkerId) -> usize {
        let g = self.inner.lock().unwrap();
        (g.head - g.cursors[reader]) as usize
    }
}

/// Exchange parameters: ring capacities per producing worker.
#[derive(Copy, Clone, Debug)]
pub struct ExchangeParams {
    pub cref_capacity: usize,
    pub unit_capacity: usize,
}

impl Default for ExchangeParams {
    fn default() -> Self {
        ExchangeParams {
            cref_capacity: 2048,
            unit_capacity: 512,
        }
    }
}

struct WorkerRings {
    crefs: LockRing<CRef>,
    units: LockRing<Lit>,
}

/// One pair of rings per worker: learnt clause handles and unit literals.
pub struct ReferenceSharer {
    rings: Vec<WorkerRings>,
}

impl ReferenceSharer {
    pub fn new(num_workers: usize, params: ExchangeParams) -> ReferenceSharer {
        let rings = (0..num_workers)
            .map(|producer| WorkerRings {
                crefs: LockRing::new(params.cref_capacity, num_workers, producer),
                units: LockRing::new(params.unit_capacity, num_workers, producer),
            })
            .collect();
        ReferenceSharer { rings }
    }

    pub fn num_workers(&self) -> usize {
        self.rings.len()
    }

    /// Publishes a learnt clause handle. If the ring overflowed past readers
    /// that never saw an older entry, the producer dereferences that clause
    /// on their behalf so reference counts stay exact. Returns the number of
    /// dropped (reader, entry) pairs.
    pub fn publish_cref(&self, arena: &ClauseArena, producer: WorkerId, cref: CRef) -> usize {
        match self.rings[producer].crefs.push(producer, cref) {
            Some((victim, missed)) => {
                for _ in 0..missed {
                    arena.remove_clause(victim);
                }
                missed as usize
            }
            None => 0,
        }
    }

    /// Publishes a unit literal (overflow silently drops the oldest).
    pub fn publish_unit(&self, producer: WorkerId, unit: Lit) {
        let _ = self.rings[producer].units.push(producer, unit);
    }

    /// Drains every peer ring of clause handles into `out`.
    pub fn drain_crefs(&self, reader: WorkerId, out: &mut Vec<CRef>) {
        for (producer, rings) in self.rings.iter().enumerate() {
            if producer != reader {
                rings.crefs.drain(reader, out);
            }
        }
    }

    /// Drains every peer ring of units into `out`.
    pub fn drain_units(&self, reader: WorkerId, out: &mut Vec<Lit>) {
        for (producer, rings) in self.rings.iter().enumerate() {
            if producer != reader {
                rings.units.drain(reader, out);
            }
        }
    }

    /// Clause handles queued for `reader` across all peers.
    pub fn pending_crefs(&self, reader: WorkerId) -> usize {
        self.rings
            .iter()
            .enumerate()
            .filter(|&(producer, _)| producer != reader)
            .map(|(_, r)| r.crefs.num_new(reader))
            .sum()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn drain_sees_everything_once() {
        let ring: LockRing<u32> = LockRing::new(8, 3, 0);
        for v in 0..5 {
            assert!(ring.push(0, v).is_none());
        }
        let mut out = Vec::new();
        ring.drain(1, &mut out);
        assert_eq!(out, vec![0, 1, 2, 3, 4]);
        out.clear();
        ring.drain(1, &mut out);
        assert!(out.is_empty());
        assert_eq!(ring.num_new(2), 5);
        assert_eq!(ring.num_new(0), 0, "producer consumes its own entries");
    }

    #[test]
    fn overflow_reports_missed_readers() {
        let ring: LockRing<u32> = LockRing::new(4, 2, 0);
        for v in 0..4 {
            assert!(ring.push(0, v).is_none());
        }
        // entry 0 is overwritten, reader 1 never saw it
        assert_eq!(ring.push(0, 100), Some((0, 1)));
        let mut out = Vec::new();
        ring.drain(1, &mut out);
        assert_eq!(out, vec![1, 2, 3, 100]);
        // reader is caught up, further pushes drop nothing
        assert!(ring.push(0, 101).is_none());
    }
}
