//! The preprocessing seam. The solver core consumes its output as read-only:
//! a simplified list of initial clauses, a variable count and the root-level
//! assignments. A real variable-elimination preprocessor can be swapped in
//! behind the same interface; this one performs the baseline rewrites
//! (tautology and duplicate removal, root-unit propagation to fixpoint).

use crate::core::{Lit, Var};
use itertools::Itertools;

pub struct Preprocessor {
    num_vars: usize,
    clauses: Vec<Vec<Lit>>,
    values: Vec<Option<bool>>,
    root: Vec<Lit>,
    unsat: bool,
}

/// Read-only input handed to the solver core.
pub struct SimplifiedProblem {
    pub num_vars: usize,
    /// Initial clauses, each with at least two literals.
    pub clauses: Vec<Vec<Lit>>,
    /// Root-level facts in assignment order.
    pub root_assignments: Vec<Lit>,
    pub unsat: bool,
}

impl Preprocessor {
    pub fn new() -> Preprocessor {
        Preprocessor {
            num_vars: 0,
            clauses: Vec::new(),
            values: Vec::new(),
            root: Vec::new(),
            unsat: false,
        }
    }

    pub fn new_var(&mut self) -> Var {
        let v = Var::new(self.num_vars as u32);
        self.num_vars += 1;
        self.values.push(None);
        v
    }

    pub fn num_vars(&self) -> usize {
        self.num_vars
    }

    fn value(&self, l: Lit) -> Option<bool> {
        self.values[l.var().index()].map(|b| b == l.is_positive())
    }

    fn assign_root(&mut self, l: Lit) -> bool {
        match self.value(l) {
            Some(true) => true,
            Some(false) => {
                self.unsat = true;
                false
            }
            None => {
                self.values[l.var().index()] = Some(l.is_positive());
                self.root.push(l);
                true
            }
        }
    }

    /// Adds a clause; false when the formula became trivially unsatisfiable.
    pub fn add_clause(&mut self, lits: &[Lit]) -> bool {
        if self.unsat {
            return false;
        }
        debug_assert!(lits.iter().all(|l| l.var().index() < self.num_vars));
        let mut c: Vec<Lit> = lits.iter().copied().sorted().dedup().collect();
        if c.iter().tuple_windows().any(|(&a, &b)| a == !b) {
            return true; // tautology
        }
        if c.iter().any(|&l| self.value(l) == Some(true)) {
            return true;
        }
        c.retain(|&l| self.value(l) != Some(false));
        match c.len() {
            0 => {
                self.unsat = true;
                false
            }
            1 => self.assign_root(c[0]),
            _ => {
                self.clauses.push(c);
                true
            }
        }
    }

    /// Propagates the root assignments through the clause list to fixpoint.
    /// Returns false when a conflict was found.
    pub fn simplify(&mut self) -> bool {
        while !self.unsat {
            let mut changed = false;
            let mut kept = Vec::with_capacity(self.clauses.len());
            let clauses = std::mem::take(&mut self.clauses);
            for mut c in clauses {
                if c.iter().any(|&l| self.value(l) == Some(true)) {
                    changed = true;
                    continue;
                }
                let before = c.len();
                c.retain(|&l| self.value(l) != Some(false));
                changed |= c.len() != before;
                match c.len() {
                    0 => {
                        self.unsat = true;
                        break;
                    }
                    1 => {
                        self.assign_root(c[0]);
                        changed = true;
                    }
                    _ => kept.push(c),
                }
            }
            self.clauses = kept;
            if !changed {
                break;
            }
        }
        !self.unsat
    }

    /// Variable elimination hook; delegated to an external preprocessor, so
    /// this implementation only reports the current status.
    pub fn eliminate(&mut self, _turn_off: bool) -> bool {
        !self.unsat
    }

    pub fn finish(mut self) -> SimplifiedProblem {
        if !self.unsat {
            self.simplify();
        }
        SimplifiedProblem {
            num_vars: self.num_vars,
            clauses: self.clauses,
            root_assignments: self.root,
            unsat: self.unsat,
        }
    }
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn lit(p: &Preprocessor, x: i32) -> Lit {
        debug_assert!(x != 0 && x.unsigned_abs() as usize <= p.num_vars());
        Lit::new(Var::new(x.unsigned_abs() - 1), x > 0)
    }

    #[test]
    fn unit_propagation_to_fixpoint() {
        let mut p = Preprocessor::new();
        for _ in 0..3 {
            p.new_var();
        }
        let (a, b, c) = (lit(&p, 1), lit(&p, 2), lit(&p, 3));
        assert!(p.add_clause(&[a]));
        assert!(p.add_clause(&[!a, b]));
        assert!(p.add_clause(&[!b, c, a]));
        let out = p.finish();
        assert!(!out.unsat);
        assert!(out.clauses.is_empty(), "everything satisfied by units");
        assert_eq!(out.root_assignments, vec![a, b]);
    }

    #[test]
    fn trivial_conflict() {
        let mut p = Preprocessor::new();
        p.new_var();
        let a = lit(&p, 1);
        assert!(p.add_clause(&[a]));
        assert!(!p.add_clause(&[!a]));
        assert!(p.finish().unsat);
    }

    #[test]
    fn tautologies_and_duplicates() {
        let mut p = Preprocessor::new();
        for _ in 0..2 {
            p.new_var();
        }
        let (a, b) = (lit(&p, 1), lit(&p, 2));
        assert!(p.add_clause(&[a, !a, b]));
        assert!(p.add_clause(&[a, a, b]));
        let out = p.finish();
        assert_eq!(out.clauses, vec![vec![a, b]]);
    }
}
