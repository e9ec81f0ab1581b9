//! Literal assignment state of one worker: trail, decision levels, reasons,
//! saved phases and the variable activity order.

use crate::collections::heap::ActivityHeap;
use crate::core::{Lit, Var};
use crate::watch::Reason;

pub struct Assignment {
    values: Vec<Option<bool>>,
    /// Decision level per variable, -1 while unassigned.
    levels: Vec<i32>,
    reasons: Vec<Reason>,
    saved_phase: Vec<bool>,
    trail: Vec<Lit>,
    /// `trail_lim[k]` is the trail index where decision level k+1 begins.
    trail_lim: Vec<usize>,
    qhead: usize,
    pub heap: ActivityHeap,
    var_inc: f64,
}

impl Assignment {
    pub fn new(num_vars: usize) -> Assignment {
        let mut heap = ActivityHeap::new();
        for v in 0..num_vars {
            heap.declare(Var::new(v as u32), 0.0);
        }
        let mut a = Assignment {
            values: vec![None; num_vars],
            levels: vec![-1; num_vars],
            reasons: vec![Reason::Unit; num_vars],
            saved_phase: vec![false; num_vars],
            trail: Vec::with_capacity(num_vars),
            trail_lim: Vec::new(),
            qhead: 0,
            heap,
            var_inc: 1.0,
        };
        for v in 0..num_vars {
            a.heap.insert(Var::new(v as u32));
        }
        a
    }

    pub fn num_vars(&self) -> usize {
        self.values.len()
    }
    pub fn num_assigned(&self) -> usize {
        self.trail.len()
    }
    pub fn all_assigned(&self) -> bool {
        self.trail.len() == self.values.len()
    }

    pub fn value(&self, v: Var) -> Option<bool> {
        self.values[v.index()]
    }
    pub fn value_lit(&self, l: Lit) -> Option<bool> {
        self.values[l.var().index()].map(|b| b == l.is_positive())
    }
    pub fn is_true(&self, l: Lit) -> bool {
        self.value_lit(l) == Some(true)
    }
    pub fn is_false(&self, l: Lit) -> bool {
        self.value_lit(l) == Some(false)
    }

    pub fn level(&self, v: Var) -> i32 {
        self.levels[v.index()]
    }
    pub fn level_lit(&self, l: Lit) -> i32 {
        self.levels[l.var().index()]
    }
    pub fn reason(&self, v: Var) -> Reason {
        self.reasons[v.index()]
    }

    /// Abstraction of the decision level of `v` as a 32-bit mask (used by
    /// deep conflict-clause minimization).
    pub fn abstract_level(&self, v: Var) -> u32 {
        1 << (self.levels[v.index()] & 31)
    }

    pub fn decision_level(&self) -> usize {
        self.trail_lim.len()
    }
    pub fn new_decision_level(&mut self) {
        self.trail_lim.push(self.trail.len());
    }
    /// The decision literal that opened `level` (1-based).
    pub fn decision_of(&self, level: usize) -> Lit {
        debug_assert!(level >= 1 && level <= self.trail_lim.len());
        self.trail[self.trail_lim[level - 1]]
    }

    pub fn trail(&self) -> &[Lit] {
        &self.trail
    }
    pub fn trail_len(&self) -> usize {
        self.trail.len()
    }
    pub fn root_len(&self) -> usize {
        if self.trail_lim.is_empty() {
            self.trail.len()
        } else {
            self.trail_lim[0]
        }
    }

    pub fn has_pending_propagation(&self) -> bool {
        self.qhead < self.trail.len()
    }
    pub fn next_pending(&mut self) -> Option<Lit> {
        let l = *self.trail.get(self.qhead)?;
        self.qhead += 1;
        Some(l)
    }
    /// Stops the current propagation round (set on conflict).
    pub fn skip_pending(&mut self) {
        self.qhead = self.trail.len();
    }

    /// Puts `l` on the trail as true at the current decision level.
    /// The caller must have checked that `l` is unassigned.
    pub fn enqueue(&mut self, l: Lit, reason: Reason) {
        debug_assert_eq!(self.value_lit(l), None);
        let v = l.var();
        self.values[v.index()] = Some(l.is_positive());
        self.levels[v.index()] = self.decision_level() as i32;
        self.reasons[v.index()] = reason;
        self.trail.push(l);
    }

    /// Undoes all assignments above `level`, saving phases and refilling the
    /// activity heap.
    pub fn cancel_until(&mut self, level: usize) {
        if self.decision_level() <= level {
            return;
        }
        let keep = self.trail_lim[level];
        for i in (keep..self.trail.len()).rev() {
            let l = self.trail[i];
            let v = l.var();
            self.saved_phase[v.index()] = l.is_positive();
            self.values[v.index()] = None;
            self.levels[v.index()] = -1;
            self.reasons[v.index()] = Reason::Unit;
            self.heap.insert(v);
        }
        self.trail.truncate(keep);
        self.trail_lim.truncate(level);
        self.qhead = keep.min(self.qhead);
    }

    pub fn saved_phase(&self, v: Var) -> bool {
        self.saved_phase[v.index()]
    }
    pub fn set_saved_phase(&mut self, v: Var, phase: bool) {
        self.saved_phase[v.index()] = phase;
    }

    /// Highest-activity unassigned variable, or `None` when all are assigned.
    pub fn pick_branch_var(&mut self) -> Option<Var> {
        while let Some(v) = self.heap.pop() {
            if self.value(v).is_none() {
                return Some(v);
            }
        }
        None
    }

    pub fn var_bump(&mut self, v: Var) {
        if self.heap.bump(v, self.var_inc) > 1e100 {
            self.heap.scale_all(1e-100);
            self.var_inc *= 1e-100;
        }
    }
    pub fn var_decay(&mut self, decay: f64) {
        self.var_inc /= decay;
    }

    /// Extracts the model once every variable is assigned.
    pub fn model(&self) -> Vec<Option<bool>> {
        debug_assert!(self.all_assigned());
        self.values.clone()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn l(x: i32) -> Lit {
        Lit::new(Var::new(x.unsigned_abs() - 1), x > 0)
    }

    #[test]
    fn enqueue_and_backtrack() {
        let mut a = Assignment::new(4);
        a.enqueue(l(1), Reason::Unit); // root fact
        a.new_decision_level();
        a.enqueue(l(-2), Reason::Unit);
        a.enqueue(l(3), Reason::Unit);
        assert_eq!(a.decision_level(), 1);
        assert_eq!(a.level_lit(l(3)), 1);
        assert_eq!(a.level_lit(l(1)), 0);
        assert_eq!(a.value_lit(l(-2)), Some(true));
        assert_eq!(a.value_lit(l(2)), Some(false));
        assert_eq!(a.decision_of(1), l(-2));

        a.cancel_until(0);
        assert_eq!(a.decision_level(), 0);
        assert_eq!(a.value(l(2).var()), None);
        assert_eq!(a.level(l(2).var()), -1);
        assert!(!a.saved_phase(l(2).var()), "phase of -2 saved as false");
        assert!(a.saved_phase(l(3).var()));
        assert_eq!(a.value_lit(l(1)), Some(true), "root fact survives");
        assert_eq!(a.num_assigned(), 1);
    }
}
