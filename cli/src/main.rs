use anyhow::{Context, Result};
use resin::arena::ArenaConfig;
use resin::config::Params;
use resin::core::{Lit, Var};
use resin::supervisor::Supervisor;
use resin::SolveStatus;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::time::Duration;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(name = "resin", about = "Parallel CDCL SAT solver with a shared clause database")]
struct Opt {
    /// DIMACS CNF input file
    file: PathBuf,

    /// Number of solver threads
    #[structopt(long, short = "t", default_value = "4")]
    threads: usize,

    /// Clause arena budget in MiB
    #[structopt(long, default_value = "256")]
    mem_limit: usize,

    /// Wall-clock limit in seconds
    #[structopt(long)]
    time_limit: Option<u64>,

    /// Arena bucket size in KiB
    #[structopt(long, default_value = "256")]
    bucket_kib: usize,

    /// LBD bound of the permanent tier
    #[structopt(long, default_value = "2")]
    perm_lbd: u32,

    /// Size bound of the permanent tier
    #[structopt(long, default_value = "8")]
    perm_size: u32,

    /// LBD bound of the shared tier
    #[structopt(long, default_value = "6")]
    share_lbd: u32,

    /// Size bound of the shared tier
    #[structopt(long, default_value = "30")]
    share_size: u32,

    /// Conflict reuses before a clause is shared
    #[structopt(long, default_value = "2")]
    share_reuse: u16,

    /// Use Luby restarts instead of the LBD-driven policy
    #[structopt(long)]
    luby: bool,

    /// Suppress the model (v lines) on SAT
    #[structopt(long)]
    no_model: bool,

    /// Verbosity: -v for progress lines, -vv for solver logging
    #[structopt(short, parse(from_occurrences))]
    verbose: u8,
}

fn params_from(opt: &Opt) -> Params {
    let mut params = Params::default();
    params.num_workers = opt.threads;
    params.arena = ArenaConfig {
        bucket_bytes: opt.bucket_kib * 1024,
        total_bytes: opt.mem_limit * 1024 * 1024,
    };
    params.tiers.perm_lbd = opt.perm_lbd;
    params.tiers.perm_size = opt.perm_size;
    params.tiers.share_lbd = opt.share_lbd;
    params.tiers.share_size = opt.share_size;
    params.tiers.share_reuse = opt.share_reuse;
    params.search.luby = opt.luby;
    params.time_limit = opt.time_limit.map(Duration::from_secs);
    if opt.verbose > 0 {
        params.progress_interval = Some(Duration::from_secs(5));
    }
    params
}

fn run(opt: &Opt) -> Result<SolveStatus> {
    let file = File::open(&opt.file).with_context(|| format!("could not open {}", opt.file.display()))?;
    let cnf = varisat_dimacs::DimacsParser::parse(BufReader::new(file)).context("could not parse DIMACS input")?;
    println!(
        "c parsed {} variables, {} clauses",
        cnf.var_count(),
        cnf.len()
    );

    let mut solver = Supervisor::new(params_from(opt));
    for _ in 0..cnf.var_count() {
        solver.new_var();
    }
    let mut lits = Vec::new();
    let mut consistent = true;
    for clause in cnf.iter() {
        lits.clear();
        for &l in clause {
            let var = Var::new(l.var().index() as u32);
            lits.push(Lit::new(var, l.is_positive()));
        }
        if !solver.add_clause(&lits) {
            consistent = false;
            break;
        }
    }

    let status = if consistent { solver.solve() } else { SolveStatus::Unsat };
    if opt.verbose > 0 {
        solver.print_stats();
    }
    match status {
        SolveStatus::Sat => {
            println!("s SATISFIABLE");
            if !opt.no_model {
                print_model(solver.model());
            }
        }
        SolveStatus::Unsat => println!("s UNSATISFIABLE"),
        SolveStatus::Unknown => println!("s UNKNOWN"),
    }
    Ok(status)
}

fn print_model(model: &[Option<bool>]) {
    let mut line = String::from("v");
    for (i, value) in model.iter().enumerate() {
        let lit = match value {
            Some(false) => -((i + 1) as i64),
            _ => (i + 1) as i64,
        };
        line.push_str(&format!(" {lit}"));
        if line.len() > 72 {
            println!("{line}");
            line = String::from("v");
        }
    }
    line.push_str(" 0");
    println!("{line}");
}

fn main() {
    let opt = Opt::from_args();
    let level = match opt.verbose {
        0 => tracing_subscriber::filter::LevelFilter::WARN,
        1 => tracing_subscriber::filter::LevelFilter::INFO,
        _ => tracing_subscriber::filter::LevelFilter::DEBUG,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    match run(&opt) {
        Ok(SolveStatus::Sat) => std::process::exit(10),
        Ok(SolveStatus::Unsat) => std::process::exit(20),
        Ok(SolveStatus::Unknown) => std::process::exit(0),
        Err(err) => {
            eprintln!("Error: {err:#}");
            std::process::exit(1);
        }
    }
}
