use crate::core::Var;

const NOT_IN_HEAP: u32 = u32::MAX;

/// Max-heap of variables ordered by activity, with an index for O(log n)
/// priority updates of enqueued elements.
#[derive(Clone, Default)]
pub struct ActivityHeap {
    heap: Vec<Var>,
    /// Position of each declared variable in `heap`, or `NOT_IN_HEAP`.
    index: Vec<u32>,
    activity: Vec<f64>,
}

fn parent(i: usize) -> usize {
    debug_assert!(i > 0);
    (i - 1) >> 1
}
#[inline]
fn left(i: usize) -> usize {
    (i << 1) + 1
}

impl ActivityHeap {
    pub fn new() -> ActivityHeap {
        Default::default()
    }

    /// Registers a new variable with the given initial activity.
    /// The variable is not enqueued.
    pub fn declare(&mut self, v: Var, activity: f64) {
        debug_assert_eq!(v.index(), self.index.len());
        self.index.push(NOT_IN_HEAP);
        self.activity.push(activity);
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn contains(&self, v: Var) -> bool {
        self.index[v.index()] != NOT_IN_HEAP
    }

    pub fn activity(&self, v: Var) -> f64 {
        self.activity[v.index()]
    }

    pub fn insert(&mut self, v: Var) {
        if !self.contains(v) {
            let pos = self.heap.len();
            self.heap.push(v);
            self.index[v.index()] = pos as u32;
            self.sift_up(pos);
        }
    }

    /// Removes and returns the variable with the highest activity.
    pub fn pop(&mut self) -> Option<Var> {
        let top = *self.heap.first()?;
        self.index[top.index()] = NOT_IN_HEAP;
        let last = self.heap.pop().unwrap();
        if !self.heap.is_empty() {
            self.heap[0] = last;
            self.index[last.index()] = 0;
            self.sift_down(0);
        }
        Some(top)
    }

    /// Scales the activity of `v` by adding `inc`, restoring heap order if the
    /// variable is enqueued. Returns the new activity for rescale checks.
    pub fn bump(&mut self, v: Var, inc: f64) -> f64 {
        self.activity[v.index()] += inc;
        let pos = self.index[v.index()];
        if pos != NOT_IN_HEAP {
            self.sift_up(pos as usize);
        }
        self.activity[v.index()]
    }

    /// Multiplies every activity by `factor` (used on rescale). Relative order
    /// is unchanged so heap positions stay valid.
    pub fn scale_all(&mut self, factor: f64) {
        for a in &mut self.activity {
            *a *= factor;
        }
    }

    fn greater(&self, a: Var, b: Var) -> bool {
        self.activity[a.index()] > self.activity[b.index()]
    }

    fn place(&mut self, v: Var, pos: usize) {
        self.heap[pos] = v;
        self.index[v.index()] = pos as u32;
    }

    fn sift_up(&mut self, mut pos: usize) {
        let v = self.heap[pos];
        while pos > 0 {
            let p = parent(pos);
            if self.greater(v, self.heap[p]) {
                let moved = self.heap[p];
                self.place(moved, pos);
                pos = p;
            } else {
                break;
            }
        }
        self.place(v, pos);
    }

    fn sift_down(&mut self, mut pos: usize) {
        let v = self.heap[pos];
        let len = self.heap.len();
        loop {
            let mut child = left(pos);
            if child >= len {
                break;
            }
            if child + 1 < len && self.greater(self.heap[child + 1], self.heap[child]) {
                child += 1;
            }
            if self.greater(self.heap[child], v) {
                let moved = self.heap[child];
                self.place(moved, pos);
                pos = child;
            } else {
                break;
            }
        }
        self.place(v, pos);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::prelude::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn pops_in_activity_order() {
        let mut rng = StdRng::seed_from_u64(79837224973);
        let mut heap = ActivityHeap::new();
        let n = 200;
        for i in 0..n {
            let act = rng.random_range(-100..100) as f64;
            heap.declare(Var::new(i), act);
        }
        for i in 0..n {
            heap.insert(Var::new(i));
        }
        let mut prev = f64::INFINITY;
        let mut popped = 0;
        while let Some(v) = heap.pop() {
            let act = heap.activity(v);
            assert!(act <= prev);
            prev = act;
            popped += 1;
        }
        assert_eq!(popped, n);
        assert!(heap.is_empty());
    }

    #[test]
    fn bump_reorders() {
        let mut heap = ActivityHeap::new();
        for i in 0..10 {
            heap.declare(Var::new(i), i as f64);
            heap.insert(Var::new(i));
        }
        heap.bump(Var::new(0), 100.0);
        assert_eq!(heap.pop(), Some(Var::new(0)));
        assert_eq!(heap.pop(), Some(Var::new(9)));
    }
}
