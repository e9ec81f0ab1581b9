//! The supervisor owns the shared database, loads the preprocessed problem
//! into the arena, spawns the workers and watches resources until a verdict
//! is published.

use crate::arena::{AllocState, ArenaAudit, ClauseKind, Header};
use crate::config::{diversify, Params};
use crate::core::{Lit, Var};
use crate::db::ClauseDb;
use crate::preprocess::Preprocessor;
use crate::stats::{GlobalSnapshot, WorkerStats};
use crate::worker::{Worker, WorkerSeed};
use crate::SolveStatus;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct Supervisor {
    params: Params,
    pre: Preprocessor,
    status: Option<SolveStatus>,
    model: Vec<Option<bool>>,
    db: Option<Arc<ClauseDb>>,
}

impl Supervisor {
    pub fn new(params: Params) -> Supervisor {
        Supervisor {
            params,
            pre: Preprocessor::new(),
            status: None,
            model: Vec::new(),
            db: None,
        }
    }

    pub fn new_var(&mut self) -> Var {
        self.pre.new_var()
    }

    pub fn num_vars(&self) -> usize {
        self.pre.num_vars()
    }

    /// Adds an initial clause; false when the formula became trivially
    /// unsatisfiable.
    pub fn add_clause(&mut self, lits: &[Lit]) -> bool {
        self.pre.add_clause(lits)
    }

    /// Runs the preprocessor's simplification; false on a root conflict.
    pub fn simplify(&mut self) -> bool {
        self.pre.simplify()
    }

    /// Variable elimination hook (delegated to the external preprocessor).
    pub fn eliminate(&mut self, turn_off: bool) -> bool {
        self.pre.eliminate(turn_off)
    }

    /// Solves the loaded formula. The solver is transient: a second call
    /// returns the cached verdict.
    pub fn solve(&mut self) -> SolveStatus {
        if let Some(status) = self.status {
            return status;
        }
        let status = self.solve_once();
        self.status = Some(status);
        status
    }

    fn solve_once(&mut self) -> SolveStatus {
        let params = self.params.clone().normalized();
        let problem = std::mem::take(&mut self.pre).finish();
        if problem.unsat {
            return SolveStatus::Unsat;
        }
        tracing::info!(
            workers = params.num_workers,
            vars = problem.num_vars,
            clauses = problem.clauses.len(),
            "starting search"
        );

        let db = Arc::new(ClauseDb::new(&params));
        let mut master = AllocState::new();
        let mut initial = Vec::with_capacity(problem.clauses.len());
        for c in &problem.clauses {
            let header = Header::new(ClauseKind::Permanent, 0, c.len() as u32);
            match db.arena.alloc(&mut master, c, header) {
                Ok(cref) => initial.push(cref),
                Err(e) => {
                    tracing::error!("{e} while loading initial clauses");
                    return SolveStatus::Unknown;
                }
            }
        }
        WorkerStats::add(&db.stats[0].alloc_permanent, initial.len() as u64);
        db.set_relevant_target(2 * initial.len().max(1) as u64);

        let seed = WorkerSeed {
            num_vars: problem.num_vars,
            initial: Arc::new(initial),
            roots: Arc::new(problem.root_assignments),
        };
        let deadline = params.time_limit.map(|d| Instant::now() + d);

        std::thread::scope(|scope| {
            for id in 0..params.num_workers {
                let db = db.clone();
                let search = diversify(&params.search, id, params.num_workers);
                let seed = &seed;
                scope.spawn(move || {
                    let mut worker = Worker::new(db, id, search, seed);
                    worker.run();
                });
            }
            self.watch(&db, deadline);
        });

        db.settle_rings();
        db.arena.release_alloc_state(&mut master);
        let (status, outcome) = db.result();
        if let Some(outcome) = outcome {
            if let Some(model) = outcome.model {
                self.model = model;
            }
        }
        self.db = Some(db);
        status
    }

    /// Sampling loop of the supervisor thread: resource limits, periodic
    /// progress lines and the arming of complete vivification passes.
    fn watch(&self, db: &ClauseDb, deadline: Option<Instant>) {
        let start = Instant::now();
        let mut next_progress = self.params.progress_interval.map(|i| start + i);
        let mut next_sample = start + Duration::from_secs(1);
        while !db.job_finished() {
            let now = Instant::now();
            if let Some(dl) = deadline {
                if now >= dl {
                    tracing::info!("time limit reached, aborting");
                    db.set_abort();
                    break;
                }
            }
            if let Some(t) = next_progress {
                if now >= t {
                    let snap = GlobalSnapshot::collect(&db.stats);
                    for line in format!("{snap}").lines() {
                        println!("c {line}");
                    }
                    println!(
                        "c memory              : {:.1} MiB arena, {} free buckets",
                        db.arena.used_bytes() as f64 / (1024.0 * 1024.0),
                        db.arena.num_free_buckets()
                    );
                    next_progress = Some(t + self.params.progress_interval.unwrap());
                }
            }
            if now >= next_sample {
                let snap = GlobalSnapshot::collect(&db.stats);
                if snap.min_conflicts > 0 {
                    db.maybe_arm_complete_vivify(&snap);
                }
                next_sample = now + Duration::from_secs(1);
            }
            std::thread::sleep(Duration::from_micros(200));
        }
    }

    /// The model found by the winning worker; meaningful after a `Sat`
    /// verdict.
    pub fn model(&self) -> &[Option<bool>] {
        &self.model
    }

    pub fn status(&self) -> Option<SolveStatus> {
        self.status
    }

    /// End-of-run arena audit (every worker released its references on exit,
    /// so all buckets must be back on the free stack).
    pub fn arena_audit(&self) -> Option<ArenaAudit> {
        self.db.as_ref().map(|db| db.arena.audit())
    }

    pub fn stats_snapshot(&self) -> Option<GlobalSnapshot> {
        self.db.as_ref().map(|db| GlobalSnapshot::collect(&db.stats))
    }

    pub fn print_stats(&self) {
        if let Some(snap) = self.stats_snapshot() {
            for line in format!("{snap}").lines() {
                println!("c {line}");
            }
        }
    }
}
