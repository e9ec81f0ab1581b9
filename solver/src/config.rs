//! Solver parameters. The common knobs are plain struct fields set by the
//! caller (or CLI); rarely-touched ones can additionally be overridden from
//! the environment.

use crate::arena::ArenaConfig;
use crate::exchange::ring::ExchangeParams;
use env_param::EnvParam;
use std::time::Duration;

static MAX_VIVIFY_LBD: EnvParam<u32> = EnvParam::new("RESIN_MAX_VIVIFY_LBD", "14");
static VIVIFY_SPEND_TOLERANCE: EnvParam<f64> = EnvParam::new("RESIN_VIVIFY_SPEND_TOLERANCE", "0.15");
static STARTUP_VIVIFICATIONS: EnvParam<u32> = EnvParam::new("RESIN_STARTUP_VIVIFICATIONS", "1");
static IMPORT_CONFLICT_MASK: EnvParam<u64> = EnvParam::new("RESIN_IMPORT_CONFLICT_MASK", "63");

/// Clause tier thresholds and sharing policy: permanent / shared / private
/// classification plus one-watched import eligibility.
#[derive(Copy, Clone, Debug)]
pub struct TierParams {
    pub perm_lbd: u32,
    pub perm_size: u32,
    pub share_lbd: u32,
    pub share_size: u32,
    /// Local reuse count (header activity) before a clause is shared.
    pub share_reuse: u16,
    /// Imported clauses with a larger LBD go to the one-watched list.
    pub one_watch_lbd: u32,
    pub use_one_watched: bool,
    /// Learnt clauses are only tiered up when sharing makes sense; disabled
    /// in single-worker mode.
    pub sharing_enabled: bool,
    pub use_early_import: bool,
    pub import_conflict_mask: u64,

    pub max_vivify_lbd: u32,
    pub use_lbd_improve_vivify: bool,
    pub use_export_vivify: bool,
    pub use_private_vivify: bool,
    pub use_backtrack_vivify: bool,
    pub use_complete_vivify: bool,
    pub vivify_spend_tolerance: f64,
}

impl Default for TierParams {
    fn default() -> Self {
        TierParams {
            perm_lbd: 2,
            perm_size: 8,
            share_lbd: 6,
            share_size: 30,
            share_reuse: 2,
            one_watch_lbd: 4,
            use_one_watched: true,
            sharing_enabled: true,
            use_early_import: true,
            import_conflict_mask: IMPORT_CONFLICT_MASK.get(),
            max_vivify_lbd: MAX_VIVIFY_LBD.get(),
            use_lbd_improve_vivify: true,
            use_export_vivify: true,
            use_private_vivify: true,
            use_backtrack_vivify: true,
            use_complete_vivify: true,
            vivify_spend_tolerance: VIVIFY_SPEND_TOLERANCE.get(),
        }
    }
}

impl TierParams {
    /// Non-deletable tier: learnt binaries and very low LBD clauses.
    pub fn is_permanent(&self, lbd: u32, size: usize) -> bool {
        self.sharing_enabled && (size == 2 || (lbd <= self.perm_lbd && size <= self.perm_size as usize))
    }

    pub fn is_shared(&self, lbd: u32, size: usize, reuse: u16) -> bool {
        self.sharing_enabled && lbd <= self.share_lbd && size <= self.share_size as usize && reuse >= self.share_reuse
    }

    /// Imported clauses suspected useless get a single watcher.
    pub fn is_one_watched(&self, lbd: u32, size: usize, permanent: bool) -> bool {
        self.use_one_watched && !permanent && size > 2 && lbd > self.one_watch_lbd
    }
}

/// Per-worker search behaviour; the base values are diversified by worker id.
#[derive(Clone, Debug)]
pub struct SearchParams {
    pub var_decay: f64,
    pub max_var_decay: f64,
    pub random_var_freq: f64,
    pub rnd_pol: bool,
    /// 0 = none, 1 = basic, 2 = deep conflict clause minimization.
    pub ccmin_mode: u8,
    pub min_size_minimize: usize,
    pub min_lbd_minimize: u32,

    // Glucose restarts
    pub k: f64,
    pub r: f64,
    pub lbd_queue_len: usize,
    pub trail_queue_len: usize,
    pub blocking_restart_floor: u64,
    // Luby alternative
    pub luby: bool,
    pub restart_first: u64,
    pub restart_inc: f64,

    pub chanseok: bool,
    pub first_reduce: u64,
    pub inc_reduce: u64,

    pub seed: u64,
}

impl Default for SearchParams {
    fn default() -> Self {
        SearchParams {
            var_decay: 0.8,
            max_var_decay: 0.95,
            random_var_freq: 0.0,
            rnd_pol: false,
            ccmin_mode: 2,
            min_size_minimize: 30,
            min_lbd_minimize: 6,
            k: 0.8,
            r: 1.4,
            lbd_queue_len: 50,
            trail_queue_len: 5000,
            blocking_restart_floor: 10000,
            luby: false,
            restart_first: 100,
            restart_inc: 2.0,
            chanseok: false,
            first_reduce: 2000,
            inc_reduce: 300,
            seed: 91648253,
        }
    }
}

/// Diversifies the base search parameters for worker `id` of `n` so the
/// portfolio does not search in lockstep.
pub fn diversify(base: &SearchParams, id: usize, n: usize) -> SearchParams {
    let mut p = base.clone();
    match id % 8 {
        1 => {
            p.chanseok = true;
            p.var_decay = 0.94;
            p.max_var_decay = 0.96;
        }
        2 => {
            p.luby = true;
            p.var_decay = 0.90;
            p.max_var_decay = 0.97;
        }
        3 => {
            p.chanseok = true;
            p.var_decay = 0.85;
            p.max_var_decay = 0.93;
        }
        4 => {
            p.luby = true;
            p.var_decay = 0.94;
            p.max_var_decay = 0.96;
        }
        5 => {
            p.chanseok = true;
            p.var_decay = 0.93;
            p.max_var_decay = 0.96;
        }
        6 => {
            p.chanseok = true;
            p.luby = true;
            p.var_decay = 0.85;
            p.max_var_decay = 0.94;
        }
        _ => {}
    }
    p.var_decay = (p.var_decay + 0.005 * (id % 8) as f64).min(p.max_var_decay);
    let factor = 0.25 + 1.75 * (id + 1) as f64 / n as f64;
    p.first_reduce = (p.first_reduce as f64 * factor) as u64 + 50 * id as u64;
    p.inc_reduce = (p.inc_reduce as f64 * factor) as u64;
    p.seed = base.seed.wrapping_add(id as u64).wrapping_mul(0x9e3779b97f4a7c15);
    p
}

/// Top-level solver configuration.
#[derive(Clone, Debug)]
pub struct Params {
    pub num_workers: usize,
    pub arena: ArenaConfig,
    pub exchange: ExchangeParams,
    pub tiers: TierParams,
    pub search: SearchParams,
    pub time_limit: Option<Duration>,
    pub startup_vivifications: u32,
    /// Seconds between `c ` progress lines; `None` disables them.
    pub progress_interval: Option<Duration>,
}

impl Default for Params {
    fn default() -> Self {
        Params {
            num_workers: 4,
            arena: ArenaConfig::default(),
            exchange: ExchangeParams::default(),
            tiers: TierParams::default(),
            search: SearchParams::default(),
            time_limit: None,
            startup_vivifications: STARTUP_VIVIFICATIONS.get(),
            progress_interval: None,
        }
    }
}

impl Params {
    /// Single-worker runs disable the shared/permanent tiering of learnt
    /// clauses and all import machinery.
    pub fn normalized(mut self) -> Params {
        self.num_workers = self.num_workers.max(1);
        if self.num_workers == 1 {
            self.tiers.sharing_enabled = false;
            self.tiers.use_one_watched = false;
            self.tiers.use_early_import = false;
        }
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tier_classification() {
        let t = TierParams::default();
        assert!(t.is_permanent(5, 2), "learnt binaries are permanent");
        assert!(t.is_permanent(2, 8));
        assert!(!t.is_permanent(3, 9));
        assert!(t.is_shared(6, 30, 2));
        assert!(!t.is_shared(6, 30, 1), "needs local reuse first");
        assert!(t.is_one_watched(5, 3, false));
        assert!(!t.is_one_watched(5, 3, true), "permanent is always two-watched");

        let single = Params {
            num_workers: 1,
            ..Params::default()
        }
        .normalized();
        assert!(!single.tiers.is_permanent(1, 2));
        assert!(!single.tiers.is_shared(1, 3, 100));
    }
}
