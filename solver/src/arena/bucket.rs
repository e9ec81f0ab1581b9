use std::sync::atomic::{AtomicU32, Ordering};

/// One fixed-size slab of 32-bit words. Allocation bump-increments `cursor`
/// with a CAS; released words only accumulate in `wasted`. A bucket is
/// reclaimed as a whole once `wasted == capacity`; individual clauses never
/// move.
pub struct Bucket {
    cursor: AtomicU32,
    wasted: AtomicU32,
    words: Box<[AtomicU32]>,
}

impl Bucket {
    pub fn with_capacity(words: u32) -> Bucket {
        let mut mem = Vec::with_capacity(words as usize);
        mem.resize_with(words as usize, || AtomicU32::new(0));
        Bucket {
            cursor: AtomicU32::new(0),
            wasted: AtomicU32::new(0),
            words: mem.into_boxed_slice(),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.words.len() as u32
    }

    pub fn words(&self) -> &[AtomicU32] {
        &self.words
    }

    pub fn num_wasted(&self) -> u32 {
        self.wasted.load(Ordering::Relaxed)
    }

    pub fn is_full(&self) -> bool {
        self.cursor.load(Ordering::Relaxed) >= self.capacity()
    }

    /// Bump-allocates `n` words, returning the starting word offset, or
    /// `None` when the remaining slack is too small.
    pub fn alloc(&self, n: u32) -> Option<u32> {
        let mut cur = self.cursor.load(Ordering::Relaxed);
        loop {
            if cur + n > self.capacity() {
                return None;
            }
            match self
                .cursor
                .compare_exchange_weak(cur, cur + n, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return Some(cur),
                Err(actual) => cur = actual,
            }
        }
    }

    /// Accounts `n` released words; true when the bucket just became
    /// completely wasted (and must return to the free stack).
    #[must_use]
    pub fn add_wasted(&self, n: u32) -> bool {
        let before = self.wasted.fetch_add(n, Ordering::AcqRel);
        debug_assert!(before + n <= self.capacity());
        n > 0 && before + n == self.capacity()
    }

    /// Retires the unallocated tail of the bucket: pushes `cursor` to the
    /// capacity and wastes the slack. True when this made the bucket
    /// completely wasted.
    #[must_use]
    pub fn waste_rest(&self) -> bool {
        let mut cur = self.cursor.load(Ordering::Relaxed);
        while cur < self.capacity() {
            match self
                .cursor
                .compare_exchange_weak(cur, self.capacity(), Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return self.add_wasted(self.capacity() - cur),
                Err(actual) => cur = actual,
            }
        }
        false
    }

    /// Prepares a bucket popped from the free stack for reuse.
    pub fn reset(&self) {
        self.cursor.store(0, Ordering::Relaxed);
        self.wasted.store(0, Ordering::Relaxed);
        for w in self.words.iter() {
            w.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bump_and_reclaim() {
        let b = Bucket::with_capacity(16);
        assert_eq!(b.alloc(10), Some(0));
        assert_eq!(b.alloc(4), Some(10));
        assert_eq!(b.alloc(4), None, "only 2 words left");
        assert!(!b.add_wasted(10));
        assert!(!b.waste_rest(), "2 slack words are not enough to close it");
        assert_eq!(b.num_wasted(), 12);
        assert!(b.is_full());
        assert!(b.add_wasted(4), "releasing the second clause closes it");
        assert_eq!(b.num_wasted(), 16);

        b.reset();
        assert!(!b.is_full());
        assert_eq!(b.alloc(16), Some(0));
        assert!(b.add_wasted(16));
    }
}
