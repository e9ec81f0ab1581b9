/// Fixed-capacity ring keeping a running sum of the last `capacity` samples.
///
/// The queue only reports an average once it has filled up, which is what the
/// LBD/trail windows of the restart policy expect.
#[derive(Clone)]
pub struct BoundedQueue {
    buf: Vec<u64>,
    next: usize,
    filled: bool,
    sum: u64,
}

impl BoundedQueue {
    pub fn new(capacity: usize) -> BoundedQueue {
        assert!(capacity > 0);
        BoundedQueue {
            buf: vec![0; capacity],
            next: 0,
            filled: false,
            sum: 0,
        }
    }

    pub fn push(&mut self, value: u64) {
        self.sum += value;
        self.sum -= self.buf[self.next];
        self.buf[self.next] = value;
        self.next += 1;
        if self.next == self.buf.len() {
            self.next = 0;
            self.filled = true;
        }
    }

    /// True once `capacity` samples have been seen since the last clear.
    pub fn full(&self) -> bool {
        self.filled
    }

    pub fn average(&self) -> f64 {
        debug_assert!(self.filled);
        self.sum as f64 / self.buf.len() as f64
    }

    /// Forgets all samples but keeps the capacity.
    pub fn clear(&mut self) {
        self.buf.fill(0);
        self.next = 0;
        self.filled = false;
        self.sum = 0;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rolling_average() {
        let mut q = BoundedQueue::new(4);
        for v in [1, 2, 3] {
            q.push(v);
            assert!(!q.full());
        }
        q.push(6);
        assert!(q.full());
        assert_eq!(q.average(), 3.0);
        q.push(9); // replaces 1
        assert_eq!(q.average(), 5.0);
        q.clear();
        assert!(!q.full());
    }
}
