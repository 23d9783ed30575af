//! Check orchestration: attempt budgets with growing timeouts, seed and
//! assertion-order randomization, racing workers, and the incremental /
//! reset backends behind one surface.
//!
//! Z3 contexts are not `Send`, so every racing worker builds its own context
//! and re-lowers the shared immutable query; workers communicate over a
//! first-to-finish channel and losers are abandoned to their timeouts.

use std::sync::mpsc;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use z3::ast::Bool;
use z3::{Config, Context, Params, SatResult, Solver};

use crate::config::SymEnvironment;
use crate::solver::lowering::{LowerFlags, Lowerer};
use crate::symbolic::error::{ERR_SOLVER_UNKNOWN, ERR_UNTRACKED};
use crate::symbolic::state::{FailCode, Pos, Pred, TrackedConstraint};

#[derive(Debug, Clone)]
pub enum CheckVerdict {
    Sat,
    Unsat(Vec<FailCode>),
    Unknown(String),
}

impl CheckVerdict {
    pub fn is_definitive(&self) -> bool {
        !matches!(self, CheckVerdict::Unknown(_))
    }
}

#[derive(Debug, Clone)]
pub struct SolverBudget {
    pub timeout_base_ms: u64,
    pub timeout_mult: u64,
    pub timeout_max_ms: u64,
    pub max_tries: u32,
    pub randomize: bool,
    pub workers: usize,
    pub track_codes: bool,
    pub track_all: bool,
    pub log_attempts: bool,
    pub log_to_stderr: bool,
}

impl SolverBudget {
    pub fn from_env(env: &SymEnvironment) -> Self {
        SolverBudget {
            timeout_base_ms: env.solver_timeout_seconds * 1000,
            timeout_mult: env.solver_increasing_timeout_multiplier,
            timeout_max_ms: env.solver_increasing_timeout_max * 1000,
            max_tries: env.max_solver_tries,
            randomize: !env.disable_z3_randomization,
            workers: env.effective_solver_workers(),
            track_codes: !env.disable_error_code_tracking_with_z3,
            track_all: env.all_z3_assertions_are_tracked_assertions,
            log_attempts: env.log_solving_attempts || env.log_progress,
            log_to_stderr: env.log_solving_attempts_to_stderr,
        }
    }
}

/// One solver instance over a lowered query, reusable for model iteration.
pub struct Session<'ctx> {
    pub ctx: &'ctx Context,
    pub solver: Solver<'ctx>,
    pub lowerer: Lowerer<'ctx>,
    /// Tracker index -> failure attribution.
    track_map: Vec<(String, Pos)>,
}

impl<'ctx> Session<'ctx> {
    pub fn build(
        ctx: &'ctx Context,
        trail: &[TrackedConstraint],
        extra: &[Pred],
        flags: &LowerFlags,
        budget: &SolverBudget,
        timeout_ms: u64,
        seed: u64,
    ) -> Self {
        let solver = Solver::new(ctx);
        let mut params = Params::new(ctx);
        if timeout_ms > 0 {
            params.set_u32("timeout", timeout_ms.min(u32::MAX as u64) as u32);
        }
        params.set_u32("random_seed", (seed & 0xffff_ffff) as u32);
        solver.set_params(&params);

        let mut lowerer = Lowerer::new(ctx, flags.clone());
        let mut track_map = Vec::with_capacity(trail.len());
        let mut order: Vec<usize> = (0..trail.len()).collect();
        if budget.randomize {
            order.shuffle(&mut StdRng::seed_from_u64(seed));
        }
        for &idx in &order {
            let tc = &trail[idx];
            let formula = lowerer.pred(&tc.pred);
            for axiom in lowerer.drain_aux() {
                solver.assert(&axiom);
            }
            if budget.track_codes {
                let slot = track_map.len();
                track_map.push((tc.code.clone(), tc.pos));
                let tracker = Bool::new_const(ctx, format!("t{slot}"));
                solver.assert_and_track(&formula, &tracker);
            } else {
                solver.assert(&formula);
            }
        }
        for p in extra {
            let formula = lowerer.pred(p);
            for axiom in lowerer.drain_aux() {
                solver.assert(&axiom);
            }
            solver.assert(&formula);
        }
        Session {
            ctx,
            solver,
            lowerer,
            track_map,
        }
    }

    pub fn check(&self) -> CheckVerdict {
        match self.solver.check() {
            SatResult::Sat => CheckVerdict::Sat,
            SatResult::Unsat => CheckVerdict::Unsat(self.core_codes()),
            SatResult::Unknown => CheckVerdict::Unknown(
                self.solver
                    .get_reason_unknown()
                    .unwrap_or_else(|| "unknown".to_string()),
            ),
        }
    }

    fn core_codes(&self) -> Vec<FailCode> {
        let mut codes: Vec<FailCode> = Vec::new();
        for tracker in self.solver.get_unsat_core() {
            let name = tracker.to_string();
            if let Some(slot) = name.strip_prefix('t').and_then(|s| s.parse::<usize>().ok()) {
                if let Some((code, pos)) = self.track_map.get(slot) {
                    let fc = FailCode {
                        code: code.clone(),
                        pos: *pos,
                    };
                    if !codes.contains(&fc) {
                        codes.push(fc);
                    }
                }
            }
        }
        if codes.is_empty() {
            codes.push(FailCode {
                code: ERR_UNTRACKED.to_string(),
                pos: Pos::End,
            });
        }
        codes
    }
}

/// The engine-facing SMT surface. Reset mode builds a fresh session per
/// check (optionally raced across workers); incremental mode keeps one
/// solver whose push/pop frames mirror branch depth.
pub struct Backend<'ctx> {
    pub flags: LowerFlags,
    pub budget: SolverBudget,
    exit_on_unknown: bool,
    inc: Option<IncState<'ctx>>,
}

struct IncState<'ctx> {
    ctx: &'ctx Context,
    solver: Solver<'ctx>,
    lowerer: Lowerer<'ctx>,
    asserted: usize,
    frames: Vec<usize>,
    track_map: Vec<(String, Pos)>,
}

#[derive(Debug, Clone)]
pub enum CheckOutcome {
    Sat,
    Unsat(Vec<FailCode>),
    /// Budget exhausted; carries the degradation failure code.
    Unknown(FailCode),
}

impl<'ctx> Backend<'ctx> {
    /// `z3_ctx` must be provided when (and only when) incremental mode is
    /// selected: the caller owns the context that outlives the analysis.
    pub fn new(env: &SymEnvironment, z3_ctx: Option<&'ctx Context>) -> Self {
        let flags = LowerFlags::from_env(env);
        let budget = SolverBudget::from_env(env);
        let inc = if env.use_z3_incremental_mode {
            let ctx = z3_ctx.expect("incremental mode needs a long-lived z3 context");
            Some(IncState {
                ctx,
                solver: Solver::new(ctx),
                lowerer: Lowerer::new(ctx, flags.clone()),
                asserted: 0,
                frames: Vec::new(),
                track_map: Vec::new(),
            })
        } else {
            None
        };
        Backend {
            flags,
            budget,
            exit_on_unknown: env.exit_on_solver_result_unknown,
            inc,
        }
    }

    pub fn exit_on_unknown(&self) -> bool {
        self.exit_on_unknown
    }

    pub fn push_frame(&mut self, trail: &[TrackedConstraint]) {
        if let Some(inc) = &mut self.inc {
            inc.sync(trail, &self.budget);
            inc.solver.push();
            inc.frames.push(inc.asserted);
        }
    }

    pub fn pop_frame(&mut self) {
        if let Some(inc) = &mut self.inc {
            inc.solver.pop(1);
            if let Some(asserted) = inc.frames.pop() {
                inc.asserted = asserted;
                inc.track_map.truncate(asserted);
            }
            // The Rust-side caches may refer to constants whose defining
            // axioms lived in the popped frame; re-created cells re-assert
            // the same formulas, so a fresh lowerer restores soundness.
            inc.lowerer = Lowerer::new(inc.ctx, self.flags.clone());
        }
    }

    /// Satisfiability of the path constraints plus `extra`, under the
    /// retry/timeout/racing policy.
    pub fn check(&mut self, trail: &[TrackedConstraint], extra: &[Pred]) -> CheckOutcome {
        let mut timeout = self.budget.timeout_base_ms;
        let mut seed_rng = StdRng::seed_from_u64(0xb557);
        for attempt in 0..self.budget.max_tries {
            let seed = if self.budget.randomize {
                seed_rng.gen()
            } else {
                42
            };
            if self.budget.log_attempts {
                let line = format!(
                    "solving attempt {attempt}: timeout={timeout}ms seed={seed} constraints={}",
                    trail.len()
                );
                if self.budget.log_to_stderr {
                    eprintln!("{line}");
                } else {
                    tracing::info!("{line}");
                }
            }
            let verdict = if let Some(inc) = &mut self.inc {
                inc.check_once(trail, extra, &self.budget, timeout, seed)
            } else {
                self.race_reset_check(trail, extra, timeout, seed)
            };
            match verdict {
                CheckVerdict::Sat => return CheckOutcome::Sat,
                CheckVerdict::Unsat(codes) => return CheckOutcome::Unsat(codes),
                CheckVerdict::Unknown(reason) => {
                    tracing::warn!("solver returned unknown: {reason}");
                }
            }
            timeout = if timeout == 0 {
                0
            } else {
                (timeout.saturating_mul(self.budget.timeout_mult)).min(self.budget.timeout_max_ms)
            };
        }
        CheckOutcome::Unknown(FailCode {
            code: ERR_SOLVER_UNKNOWN.to_string(),
            pos: Pos::End,
        })
    }

    fn race_reset_check(
        &self,
        trail: &[TrackedConstraint],
        extra: &[Pred],
        timeout: u64,
        seed: u64,
    ) -> CheckVerdict {
        let workers = self.budget.workers.max(1);
        if workers == 1 {
            let cfg = Config::new();
            let ctx = Context::new(&cfg);
            let session =
                Session::build(&ctx, trail, extra, &self.flags, &self.budget, timeout, seed);
            return session.check();
        }
        let trail: Arc<Vec<TrackedConstraint>> = Arc::new(trail.to_vec());
        let extra: Arc<Vec<Pred>> = Arc::new(extra.to_vec());
        let (tx, rx) = mpsc::channel();
        for w in 0..workers {
            let trail = Arc::clone(&trail);
            let extra = Arc::clone(&extra);
            let tx = tx.clone();
            let flags = self.flags.clone();
            let budget = self.budget.clone();
            let worker_seed = seed.wrapping_add(w as u64).wrapping_mul(0x9e37_79b9);
            std::thread::spawn(move || {
                let cfg = Config::new();
                let ctx = Context::new(&cfg);
                let session = Session::build(
                    &ctx,
                    &trail,
                    &extra,
                    &flags,
                    &budget,
                    timeout,
                    worker_seed,
                );
                let _ = tx.send(session.check());
            });
        }
        drop(tx);
        let mut last = CheckVerdict::Unknown("no worker responded".to_string());
        while let Ok(verdict) = rx.recv() {
            if verdict.is_definitive() {
                return verdict;
            }
            last = verdict;
        }
        last
    }

    /// Run `f` against a fresh session of the given query. Used for
    /// model-value extraction and sample enumeration; enumeration always
    /// works on a private session, in both backend modes.
    pub fn with_session<T>(
        &self,
        trail: &[TrackedConstraint],
        extra: &[Pred],
        f: impl for<'a> FnOnce(&mut Session<'a>) -> T,
    ) -> T {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);
        let mut session = Session::build(
            &ctx,
            trail,
            extra,
            &self.flags,
            &self.budget,
            self.budget.timeout_base_ms,
            42,
        );
        f(&mut session)
    }
}

impl<'ctx> IncState<'ctx> {
    fn sync(&mut self, trail: &[TrackedConstraint], budget: &SolverBudget) {
        while self.asserted < trail.len() {
            let tc = &trail[self.asserted];
            let formula = self.lowerer.pred(&tc.pred);
            for axiom in self.lowerer.drain_aux() {
                self.solver.assert(&axiom);
            }
            if budget.track_codes {
                let slot = self.track_map.len();
                self.track_map.push((tc.code.clone(), tc.pos));
                let tracker = Bool::new_const(self.ctx, format!("t{slot}"));
                self.solver.assert_and_track(&formula, &tracker);
            } else {
                self.solver.assert(&formula);
            }
            self.asserted += 1;
        }
    }

    fn check_once(
        &mut self,
        trail: &[TrackedConstraint],
        extra: &[Pred],
        budget: &SolverBudget,
        timeout: u64,
        seed: u64,
    ) -> CheckVerdict {
        self.sync(trail, budget);
        let mut params = Params::new(self.ctx);
        if timeout > 0 {
            params.set_u32("timeout", timeout.min(u32::MAX as u64) as u32);
        }
        params.set_u32("random_seed", (seed & 0xffff_ffff) as u32);
        self.solver.set_params(&params);

        self.solver.push();
        for p in extra {
            let formula = self.lowerer.pred(p);
            for axiom in self.lowerer.drain_aux() {
                self.solver.assert(&axiom);
            }
            self.solver.assert(&formula);
        }
        let verdict = match self.solver.check() {
            SatResult::Sat => CheckVerdict::Sat,
            SatResult::Unsat => {
                let mut codes: Vec<FailCode> = Vec::new();
                for tracker in self.solver.get_unsat_core() {
                    let name = tracker.to_string();
                    if let Some(slot) =
                        name.strip_prefix('t').and_then(|s| s.parse::<usize>().ok())
                    {
                        if let Some((code, pos)) = self.track_map.get(slot) {
                            let fc = FailCode {
                                code: code.clone(),
                                pos: *pos,
                            };
                            if !codes.contains(&fc) {
                                codes.push(fc);
                            }
                        }
                    }
                }
                if codes.is_empty() {
                    codes.push(FailCode {
                        code: ERR_UNTRACKED.to_string(),
                        pos: Pos::End,
                    });
                }
                CheckVerdict::Unsat(codes)
            }
            SatResult::Unknown => CheckVerdict::Unknown(
                self.solver
                    .get_reason_unknown()
                    .unwrap_or_else(|| "unknown".to_string()),
            ),
        };
        self.solver.pop(1);
        verdict
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbolic::state::Pred;
    use crate::symbolic::value::SymValue;

    fn env() -> SymEnvironment {
        let mut env = SymEnvironment::default();
        env.z3_enabled = true;
        env.use_parallel_solving = false;
        env.solver_timeout_seconds = 0;
        env
    }

    fn tracked(code: &str, pred: Pred) -> TrackedConstraint {
        TrackedConstraint {
            code: code.to_string(),
            pos: Pos::End,
            pred,
        }
    }

    #[test]
    fn feasible_trail_is_sat() {
        let mut backend = Backend::new(&env(), None);
        let w = SymValue::witness(0);
        let trail = vec![tracked("check_verify", Pred::IsTrue(w))];
        match backend.check(&trail, &[]) {
            CheckOutcome::Sat => {}
            other => panic!("expected sat, got {other:?}"),
        }
    }

    #[test]
    fn contradiction_yields_the_tracked_code() {
        let mut backend = Backend::new(&env(), None);
        let w = SymValue::witness(0);
        let trail = vec![
            tracked("check_verify", Pred::IsTrue(w.clone())),
            tracked("check_equalverify", Pred::IsFalse(w)),
        ];
        match backend.check(&trail, &[]) {
            CheckOutcome::Unsat(codes) => {
                let names: Vec<&str> = codes.iter().map(|c| c.code.as_str()).collect();
                assert!(names.contains(&"check_verify") || names.contains(&"check_equalverify"));
            }
            other => panic!("expected unsat, got {other:?}"),
        }
    }

    #[test]
    fn untracked_mode_reports_generic_code() {
        let mut e = env();
        e.disable_error_code_tracking_with_z3 = true;
        let mut backend = Backend::new(&e, None);
        let w = SymValue::witness(0);
        let trail = vec![
            tracked("check_verify", Pred::IsTrue(w.clone())),
            tracked("check_equalverify", Pred::IsFalse(w)),
        ];
        match backend.check(&trail, &[]) {
            CheckOutcome::Unsat(codes) => {
                assert_eq!(codes[0].code, ERR_UNTRACKED);
            }
            other => panic!("expected unsat, got {other:?}"),
        }
    }

    #[test]
    fn extra_predicates_probe_without_polluting_the_trail() {
        let mut backend = Backend::new(&env(), None);
        let w = SymValue::witness(0);
        let trail = vec![tracked("check_verify", Pred::IsTrue(w.clone()))];
        match backend.check(&trail, &[Pred::IsFalse(w.clone())]) {
            CheckOutcome::Unsat(_) => {}
            other => panic!("expected unsat, got {other:?}"),
        }
        match backend.check(&trail, &[]) {
            CheckOutcome::Sat => {}
            other => panic!("expected sat, got {other:?}"),
        }
    }

    #[test]
    fn incremental_mode_mirrors_frames() {
        let mut e = env();
        e.use_z3_incremental_mode = true;
        let cfg = Config::new();
        let ctx = Context::new(&cfg);
        let mut backend = Backend::new(&e, Some(&ctx));
        let w = SymValue::witness(0);
        let mut trail = vec![tracked("check_verify", Pred::IsTrue(w.clone()))];
        backend.push_frame(&trail);
        trail.push(tracked("check_equalverify", Pred::IsFalse(w.clone())));
        match backend.check(&trail, &[]) {
            CheckOutcome::Unsat(_) => {}
            other => panic!("expected unsat, got {other:?}"),
        }
        backend.pop_frame();
        let trail = vec![tracked("check_verify", Pred::IsTrue(w))];
        match backend.check(&trail, &[]) {
            CheckOutcome::Sat => {}
            other => panic!("expected sat, got {other:?}"),
        }
    }
}
