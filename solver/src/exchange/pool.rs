use std::sync::atomic::{AtomicIsize, AtomicUsize, Ordering};
use std::sync::Mutex;

const CHUNK: isize = 50;
const WRITE_LOCKED: isize = -1;

/// Single-writer, many-reader chunked work pool.
///
/// One worker fills the pool under the write lock; afterwards all workers
/// grab disjoint chunks with `take_chunk` and report completion with
/// `notify_processed`. A new write lock can only be taken once everything
/// distributed has been processed.
pub struct ChunkPool<T> {
    /// Next index to hand out, or `WRITE_LOCKED`.
    distributed: AtomicIsize,
    to_process: AtomicUsize,
    processed: AtomicUsize,
    items: Mutex<Vec<T>>,
}

impl<T: Copy> ChunkPool<T> {
    pub fn new() -> ChunkPool<T> {
        ChunkPool {
            distributed: AtomicIsize::new(0),
            to_process: AtomicUsize::new(0),
            processed: AtomicUsize::new(0),
            items: Mutex::new(Vec::new()),
        }
    }

    /// Tries to become the writer. Succeeds only when no distribution is in
    /// progress; clears the previous content.
    pub fn try_write_lock(&self) -> bool {
        if self.processed.load(Ordering::Acquire) != self.to_process.load(Ordering::Acquire) {
            return false;
        }
        let locked = self
            .distributed
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                (cur != WRITE_LOCKED).then_some(WRITE_LOCKED)
            })
            .is_ok();
        if locked {
            self.to_process.store(0, Ordering::Release);
            self.items.lock().unwrap().clear();
        }
        locked
    }

    /// Spins until the write lock is obtained.
    pub fn write_lock(&self) {
        while !self.try_write_lock() {
            std::hint::spin_loop();
        }
    }

    /// Adds an item; the caller must hold the write lock.
    pub fn push(&self, item: T) {
        debug_assert_eq!(self.distributed.load(Ordering::Relaxed), WRITE_LOCKED);
        self.items.lock().unwrap().push(item);
    }

    /// Releases the write lock and makes the content available to readers.
    pub fn publish(&self) {
        debug_assert_eq!(self.distributed.load(Ordering::Relaxed), WRITE_LOCKED);
        let len = self.items.lock().unwrap().len();
        self.processed.store(0, Ordering::Release);
        self.to_process.store(len, Ordering::Release);
        self.distributed.store(0, Ordering::Release);
    }

    /// Empties the pool (waits for any distribution to finish).
    pub fn clear(&self) {
        self.write_lock();
        self.publish();
    }

    pub fn len(&self) -> usize {
        self.to_process.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Grabs the next chunk of at most 50 items; empty when exhausted or a
    /// writer holds the lock.
    pub fn take_chunk(&self) -> Vec<T> {
        let to_process = self.to_process.load(Ordering::Acquire);
        let start = self
            .distributed
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                (cur >= 0 && (cur as usize) < to_process).then_some(cur + CHUNK)
            });
        match start {
            Ok(start) => {
                let start = start as usize;
                let end = (start + CHUNK as usize).min(to_process);
                self.items.lock().unwrap()[start..end].to_vec()
            }
            Err(_) => Vec::new(),
        }
    }

    /// Records `n` processed items; true when the caller finished the last
    /// outstanding chunk of the pass.
    pub fn notify_processed(&self, n: usize) -> bool {
        if n == 0 {
            return false;
        }
        let before = self.processed.fetch_add(n, Ordering::AcqRel);
        debug_assert!(before + n <= self.to_process.load(Ordering::Acquire));
        before + n == self.to_process.load(Ordering::Acquire)
    }
}

impl<T: Copy> Default for ChunkPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn distributes_disjoint_chunks() {
        let pool: ChunkPool<usize> = ChunkPool::new();
        assert!(pool.try_write_lock());
        for i in 0..120 {
            pool.push(i);
        }
        pool.publish();
        assert_eq!(pool.len(), 120);

        let mut seen = Vec::new();
        let mut last = false;
        loop {
            let chunk = pool.take_chunk();
            if chunk.is_empty() {
                break;
            }
            last = pool.notify_processed(chunk.len());
            seen.extend(chunk);
        }
        assert!(last, "the final chunk reports completion");
        seen.sort_unstable();
        assert_eq!(seen, (0..120).collect::<Vec<_>>());
        assert!(pool.try_write_lock(), "pool is reusable after completion");
        pool.publish();
    }

    #[test]
    fn write_lock_waits_for_processing() {
        let pool: ChunkPool<usize> = ChunkPool::new();
        assert!(pool.try_write_lock());
        pool.push(1);
        pool.publish();
        let chunk = pool.take_chunk();
        assert_eq!(chunk, vec![1]);
        assert!(!pool.try_write_lock(), "chunk still outstanding");
        assert!(pool.notify_processed(1));
        assert!(pool.try_write_lock());
        pool.publish();
    }
}
