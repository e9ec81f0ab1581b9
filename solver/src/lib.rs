//! A parallel CDCL SAT solver built around a shared clause database.
//!
//! Worker threads run independent CDCL searches over private watch indexes
//! while allocating, learning, sharing and reclaiming clauses in one shared,
//! bucketed arena. Learnt clauses above a quality threshold are published
//! through per-worker exchange rings and adopted lazily by peers; the clause
//! lifetime is governed by a per-clause atomic reference/replacement word.
//!
//! The main entry point is [`supervisor::Supervisor`], which owns the shared
//! database, spawns the workers and assembles the final result:
//!
//! ```
//! use resin::supervisor::Supervisor;
//! use resin::core::Lit;
//! use resin::config::Params;
//!
//! let mut solver = Supervisor::new(Params::default());
//! let a = solver.new_var();
//! let b = solver.new_var();
//! solver.add_clause(&[Lit::pos(a), Lit::pos(b)]);
//! solver.add_clause(&[Lit::neg(a)]);
//! let status = solver.solve();
//! assert!(status.is_sat());
//! ```

pub mod arena;
pub mod assign;
pub mod collections;
pub mod config;
pub mod core;
pub mod db;
pub mod exchange;
pub mod preprocess;
pub mod stats;
pub mod supervisor;
pub mod watch;
pub mod worker;

/// Outcome of a solving run.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum SolveStatus {
    Sat,
    Unsat,
    /// Resource limit reached or aborted before a verdict.
    Unknown,
}

impl SolveStatus {
    pub fn is_sat(self) -> bool {
        self == SolveStatus::Sat
    }
    pub fn is_unsat(self) -> bool {
        self == SolveStatus::Unsat
    }
}

/// The arena ran out of free buckets (or the initial reservation failed).
/// Fatal: the supervisor reports [`SolveStatus::Unknown`].
#[derive(Copy, Clone, Debug)]
pub struct OutOfMemory;

impl std::fmt::Display for OutOfMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "clause arena exhausted")
    }
}

impl std::error::Error for OutOfMemory {}
