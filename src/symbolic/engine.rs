//! The path explorer: depth-first traversal of the branch tree, per-branch
//! context cloning, dynamic stack access sampling, user assertion
//! application, finalization, and the post-passes that mark always-true
//! enforcements and lift shared ones.

use z3::{Config, Context};

use crate::assertions::{eval_static, AssertTarget, AssertionSpec};
use crate::config::SymEnvironment;
use crate::error::{BsstError, Result};
use crate::plugins::PluginTable;
use crate::script::parser::{matches_fragment, ScriptInfo};
use crate::script::token::{ScriptToken, TokenKind};
use crate::solver::model;
use crate::solver::runner::{Backend, CheckOutcome};
use crate::symbolic::error::*;
use crate::symbolic::opcodes::{dispatch, BranchDecision, DynAccess, Mutation, StepEffect};
use crate::symbolic::state::{
    lift_enforcements, BranchLabel, Branchpoint, ExecContext, FailCode, Failure, ModelSample,
    ModelValueReport, Pred, TrackedConstraint,
};
use crate::symbolic::value::{OpPos, Pos, SymValue, ValueRef};

/// Run the symbolic execution of a parsed script and return the completed
/// path tree, ready for the reporter.
pub fn symex_script(
    env: &SymEnvironment,
    script: &ScriptInfo,
    plugins: &mut PluginTable,
) -> Result<Branchpoint> {
    if env.z3_enabled && env.use_z3_incremental_mode {
        let cfg = Config::new();
        let z3_ctx = Context::new(&cfg);
        let backend = Backend::new(env, Some(&z3_ctx));
        Engine::new(env, script, Some(backend), plugins).run()
    } else if env.z3_enabled {
        let backend = Backend::new(env, None);
        Engine::new(env, script, Some(backend), plugins).run()
    } else {
        Engine::new(env, script, None, plugins).run()
    }
}

struct Engine<'e, 'ctx> {
    env: &'e SymEnvironment,
    script: &'e ScriptInfo,
    backend: Option<Backend<'ctx>>,
    plugins: &'e mut PluginTable,
    fatal: Option<String>,
}

impl<'e, 'ctx> Engine<'e, 'ctx> {
    fn new(
        env: &'e SymEnvironment,
        script: &'e ScriptInfo,
        backend: Option<Backend<'ctx>>,
        plugins: &'e mut PluginTable,
    ) -> Self {
        Engine {
            env,
            script,
            backend,
            plugins,
            fatal: None,
        }
    }

    fn run(mut self) -> Result<Branchpoint> {
        let mut root = Branchpoint::default();
        let mut ctx = ExecContext::new();

        // Plugin comments reach their hook before execution starts.
        for (line, _name, payload) in &self.script.plugin_comments {
            if let Some(hook) = self.plugins.plugin_comment.as_mut() {
                hook(&mut ctx, *line, payload);
            }
        }

        // Global assumptions attach before anything executes; no prior
        // feasibility check runs for them.
        for spec in &self.script.assumptions {
            let AssertTarget::Placeholder(name) = &spec.target else {
                continue;
            };
            let target = SymValue::placeholder(name.clone());
            ctx.constrain(
                spec.failure_code(),
                Pos::Op(OpPos {
                    pc: 0,
                    line: spec.line,
                }),
                Pred::User {
                    target,
                    spec: std::sync::Arc::new(spec.clone()),
                    negate: false,
                },
            );
        }

        self.exec_path(ctx, &mut root);
        if let Some(reason) = self.fatal.take() {
            return Err(BsstError::Solver(reason));
        }

        self.resolve_always_true_marks(&mut root);
        lift_all(&mut root);
        Ok(root)
    }

    fn exec_path(&mut self, mut ctx: ExecContext, bp: &mut Branchpoint) {
        if self.fatal.is_some() {
            bp.context = Some(ctx);
            return;
        }
        loop {
            if ctx.is_failed() {
                break;
            }
            if ctx.pc >= self.script.tokens.len() {
                break;
            }
            let tok = self.script.tokens[ctx.pc].clone();
            let at = OpPos {
                pc: tok.pc,
                line: tok.line,
            };
            ctx.line = tok.line;

            let is_cond_op = matches!(
                tok.kind,
                TokenKind::Op(
                    crate::script::opcode::OpCode::If
                        | crate::script::opcode::OpCode::NotIf
                        | crate::script::opcode::OpCode::Else
                        | crate::script::opcode::OpCode::EndIf
                )
            );
            if !ctx.executing() && !is_cond_op {
                ctx.pc += 1;
                continue;
            }

            if let Some(hook) = self.plugins.pre_opcode.as_mut() {
                hook(&mut ctx, &tok);
            }

            let pre = ctx.clone();
            let effect = match &tok.kind {
                TokenKind::Data(bytes) => {
                    let tag = self.env.tag_data_with_position.then_some(at);
                    let v = SymValue::literal_at(bytes.clone(), tag);
                    if let Some(hook) = self.plugins.pushdata.as_mut() {
                        hook(&mut ctx, &v);
                    }
                    ctx.push_produced(v, at);
                    StepEffect::Done
                }
                TokenKind::Placeholder(name) => {
                    let v = SymValue::placeholder(name.clone());
                    ctx.push_produced(v, at);
                    StepEffect::Done
                }
                TokenKind::Op(op) => dispatch(&mut ctx, self.env, &tok, *op, at),
            };

            self.dump_point_of_interest(&ctx, &tok);

            match effect {
                StepEffect::Done => {
                    if let Some(hook) = self.plugins.post_opcode.as_mut() {
                        hook(&mut ctx, &tok);
                    }
                    self.apply_comments(&mut ctx, at);
                    if ctx.is_failed() {
                        break;
                    }
                    if self.env.do_progressive_z3_checks {
                        self.prune_if_infeasible(&mut ctx, Pos::Op(at));
                        if ctx.is_failed() {
                            break;
                        }
                    }
                    ctx.pc += 1;
                }
                StepEffect::Failed => break,
                StepEffect::Branch(decisions) => {
                    self.fork(ctx, bp, decisions, at);
                    return;
                }
                StepEffect::Dynamic(dyn_access) => {
                    self.dynamic_fork(pre, bp, dyn_access, at);
                    return;
                }
            }
        }
        self.finalize(ctx, bp);
    }

    /// Branch into the given decisions, checking each child's feasibility.
    fn fork(
        &mut self,
        base: ExecContext,
        bp: &mut Branchpoint,
        decisions: Vec<BranchDecision>,
        at: OpPos,
    ) {
        for decision in decisions {
            let mut child = base.clone();
            match decision.mutation {
                Mutation::None => {}
                Mutation::CondFrame(executing) => {
                    child.cond_stack.push(crate::symbolic::state::CondFrame {
                        executing,
                        seen_else: false,
                    });
                }
                Mutation::PushValues(values) => {
                    for v in values {
                        child.push_produced(v, at);
                    }
                }
            }
            child.branch_trail.push(decision.label.clone());
            if let Some((code, pred)) = decision.constraint {
                child.constrain(code, Pos::Op(at), pred);
            }
            child.pc = at.pc + 1;

            let mut child_bp = Branchpoint {
                label: Some(decision.label),
                ..Branchpoint::default()
            };

            if self.branch_is_failure_trap(&child) {
                child.fail(Failure::single("immediately_failed_branch", Pos::Op(at)));
                self.finalize(child, &mut child_bp);
                bp.children.push(child_bp);
                continue;
            }

            self.descend(child, &mut child_bp, at, Some(at));
            bp.children.push(child_bp);
        }
    }

    /// Run a child path inside its own solver frame, pruning when the
    /// branch predicate is infeasible. Comments bound to the forking opcode
    /// apply inside the frame, so their adopted assertions rewind with it.
    fn descend(
        &mut self,
        mut child: ExecContext,
        child_bp: &mut Branchpoint,
        at: OpPos,
        comments_at: Option<OpPos>,
    ) {
        if self.backend.is_none() {
            if let Some(comment_pos) = comments_at {
                self.apply_comments(&mut child, comment_pos);
            }
            self.exec_path(child, child_bp);
            return;
        }
        if let Some(backend) = &mut self.backend {
            backend.push_frame(&child.constraints);
        }
        if let Some(comment_pos) = comments_at {
            self.apply_comments(&mut child, comment_pos);
            if child.is_failed() {
                self.finalize(child, child_bp);
                if let Some(backend) = &mut self.backend {
                    backend.pop_frame();
                }
                return;
            }
        }
        let backend = self.backend.as_mut().expect("checked above");
        let outcome = backend.check(&child.constraints, &[]);
        match outcome {
            CheckOutcome::Sat => self.exec_path(child, child_bp),
            CheckOutcome::Unsat(codes) => {
                child.fail(Failure {
                    pos: Pos::Op(at),
                    codes: attribute_branch_codes(codes, at),
                });
                self.finalize(child, child_bp);
            }
            CheckOutcome::Unknown(code) => {
                if self
                    .backend
                    .as_ref()
                    .map(|b| b.exit_on_unknown())
                    .unwrap_or(false)
                {
                    self.fatal = Some("solver returned unknown for a branch check".to_string());
                    child.fail(Failure {
                        pos: Pos::Op(at),
                        codes: vec![code],
                    });
                    self.finalize(child, child_bp);
                } else {
                    child.add_warning(
                        Pos::Op(at),
                        "solver result unknown; branch assumed feasible",
                    );
                    self.exec_path(child, child_bp);
                }
            }
        }
        if let Some(backend) = &mut self.backend {
            backend.pop_frame();
        }
    }

    /// Dynamic stack access: sample feasible values of the index, fork one
    /// child per sample re-executing the same opcode with the value pinned.
    fn dynamic_fork(
        &mut self,
        pre: ExecContext,
        bp: &mut Branchpoint,
        dyn_access: DynAccess,
        at: OpPos,
    ) {
        let Some(backend) = &self.backend else {
            let mut ctx = pre;
            ctx.fail(Failure::single(MSG_DYNAMIC_WITHOUT_SOLVER, Pos::Op(at)));
            self.finalize(ctx, bp);
            return;
        };

        let max = self.env.max_samples_for_dynamic_stack_access;
        let hi = dyn_access
            .max_value
            .unwrap_or(i64::MAX)
            .min(dyn_access.role.sample_bound());
        let range = Pred::NumInRange(dyn_access.index.clone(), 0, hi);
        let mut samples = backend.with_session(&pre.constraints, &[range], |session| {
            model::probe_values_ascending(session, &dyn_access.index, hi, max + 1)
        });
        let overflow = samples.len() > max;
        if overflow {
            samples.truncate(max);
        }

        if samples.is_empty() {
            let mut ctx = pre;
            ctx.fail(Failure::single(
                op_invalid_code(dyn_access.op),
                Pos::Op(at),
            ));
            self.finalize(ctx, bp);
            return;
        }

        let index_display = self.index_display(&pre, &dyn_access.index);
        let op_label = dyn_access.op.name().to_string();
        let next_after_last = samples.last().copied().unwrap_or(0) + 1;

        for value in samples {
            let mut child = pre.clone();
            child.pins.insert(dyn_access.index.structural_id(), value);
            let choice = match dyn_access.role.count_name() {
                Some(counter) => format!("{counter} = {value}"),
                None => value.to_string(),
            };
            let label = BranchLabel {
                op: op_label.clone(),
                arg: dyn_access.role.count_name().is_none().then(|| index_display.clone()),
                pos: at,
                choice,
                cond_str: format!("{index_display} = {value}"),
            };
            child.branch_trail.push(label.clone());
            child.constrain(
                ERR_BRANCH_CONDITION_INVALID,
                Pos::Op(at),
                Pred::NumEq(dyn_access.index.clone(), value),
            );
            // Re-execute the same opcode; the pin makes it static.
            let mut child_bp = Branchpoint {
                label: Some(label),
                ..Branchpoint::default()
            };
            self.descend(child, &mut child_bp, at, None);
            bp.children.push(child_bp);
        }

        if overflow && self.env.is_incomplete_script {
            let mut unexplored = pre.clone();
            unexplored.unexplored = true;
            let choice = match dyn_access.role.count_name() {
                Some(counter) => format!("{counter} = {next_after_last}, ..."),
                None => format!("{next_after_last}, ..."),
            };
            let label = BranchLabel {
                op: op_label,
                arg: dyn_access
                    .role
                    .count_name()
                    .is_none()
                    .then(|| index_display.clone()),
                pos: at,
                choice,
                cond_str: format!("{index_display} = {next_after_last}, ..."),
            };
            unexplored.branch_trail.push(label.clone());
            bp.children.push(Branchpoint::leaf(Some(label), unexplored));
        } else if overflow {
            tracing::warn!(
                "dynamic stack access at {at} truncated to {max} samples; further values remain feasible"
            );
        }
    }

    fn index_display(&self, ctx: &ExecContext, index: &ValueRef) -> String {
        let rctx = crate::symbolic::value::RenderCtx::new(&self.script.aliases, &ctx.ref_names);
        index.render(&rctx)
    }

    /// Data-reference bindings and user assertions attached to this pc.
    fn apply_comments(&mut self, ctx: &mut ExecContext, at: OpPos) {
        if let Some(names) = self.script.refs_at.get(&at.pc) {
            for name in names.clone() {
                let top = ctx.peek(0, at);
                ctx.bind_ref(&name, &top);
            }
        }
        let Some(specs) = self.script.asserts_at.get(&at.pc) else {
            return;
        };
        for spec in specs.clone() {
            if ctx.is_failed() {
                return;
            }
            self.apply_assertion(ctx, &spec, at);
        }
    }

    fn apply_assertion(&mut self, ctx: &mut ExecContext, spec: &AssertionSpec, at: OpPos) {
        let target = match &spec.target {
            AssertTarget::Top => ctx.peek(0, at),
            AssertTarget::Wit(i) => SymValue::witness(*i),
            AssertTarget::Placeholder(name) => SymValue::placeholder(name.clone()),
            AssertTarget::Ref(name) => match ctx.data_refs.get(name) {
                Some(v) => v.clone(),
                None => {
                    ctx.fail(Failure::single(
                        assertion_failed_code(spec.line),
                        Pos::Op(at),
                    ));
                    return;
                }
            },
        };
        ctx.mark_used(&target);

        // First probe: can the target violate the constraint under the
        // current assertions? A static target is decided directly.
        if let Some(bytes) = target.as_bytes() {
            match eval_static(spec, bytes) {
                Some(true) => {}
                Some(false) | None => {
                    ctx.fail(Failure::single(
                        assertion_failed_code(spec.line),
                        Pos::Op(at),
                    ));
                    return;
                }
            }
        } else if let Some(backend) = &mut self.backend {
            let violated = Pred::User {
                target: target.clone(),
                spec: std::sync::Arc::new(spec.clone()),
                negate: true,
            };
            match backend.check(&ctx.constraints, &[violated]) {
                CheckOutcome::Sat => {
                    ctx.fail(Failure::single(
                        assertion_failed_code(spec.line),
                        Pos::Op(at),
                    ));
                    return;
                }
                CheckOutcome::Unsat(_) => {}
                CheckOutcome::Unknown(_) => {
                    ctx.add_warning(
                        Pos::Op(at),
                        format!(
                            "solver could not decide assertion at line {}; adopting it",
                            spec.line
                        ),
                    );
                }
            }
        }

        // Adopt: downstream contradictions surface as check_assertion codes.
        ctx.constrain(
            spec.failure_code(),
            Pos::Op(at),
            Pred::User {
                target,
                spec: std::sync::Arc::new(spec.clone()),
                negate: false,
            },
        );
    }

    fn prune_if_infeasible(&mut self, ctx: &mut ExecContext, pos: Pos) {
        let Some(backend) = &mut self.backend else {
            return;
        };
        match backend.check(&ctx.constraints, &[]) {
            CheckOutcome::Sat => {}
            CheckOutcome::Unsat(codes) => {
                ctx.fail(Failure { pos, codes });
            }
            CheckOutcome::Unknown(_) => {
                if backend.exit_on_unknown() {
                    self.fatal = Some("solver returned unknown during progressive check".into());
                }
            }
        }
    }

    fn branch_is_failure_trap(&self, child: &ExecContext) -> bool {
        let Some(fragment) = &self.env.skip_immediately_failed_branches_on else {
            return false;
        };
        child.executing() && matches_fragment(self.script, child.pc, fragment)
    }

    fn dump_point_of_interest(&self, ctx: &ExecContext, tok: &ScriptToken) {
        let interested = self.env.points_of_interest.iter().any(|p| {
            p == "*" || p.parse::<usize>().map(|pc| pc == tok.pc).unwrap_or(false)
        });
        if interested {
            let stack: Vec<String> = ctx.stack.iter().map(|v| v.canonical()).collect();
            let altstack: Vec<String> = ctx.altstack.iter().map(|v| v.canonical()).collect();
            tracing::info!(
                pc = tok.pc,
                line = tok.line,
                token = %tok.text,
                stack = ?stack,
                altstack = ?altstack,
                "point of interest"
            );
        }
    }

    /// Seal the path at script end: conditional balance, cleanstack, the
    /// terminal enforcement, the final feasibility check, model values.
    fn finalize(&mut self, mut ctx: ExecContext, bp: &mut Branchpoint) {
        if ctx.unexplored {
            bp.context = Some(ctx);
            return;
        }
        if !ctx.is_failed() && !ctx.cond_stack.is_empty() {
            ctx.fail(Failure::single(
                ERR_UNBALANCED_CONDITIONAL,
                Pos::Op(OpPos {
                    pc: self.script.tokens.len(),
                    line: ctx.line,
                }),
            ));
        }
        if !ctx.is_failed() {
            if let Some(hook) = self.plugins.pre_finalize.as_mut() {
                hook(&mut ctx);
            }
        }
        if !ctx.is_failed() && !self.env.is_incomplete_script {
            let at = OpPos {
                pc: self.script.tokens.len(),
                line: ctx.line,
            };
            let top = ctx.peek(0, at);
            if self.env.effective_cleanstack() && ctx.stack.len() != 1 {
                ctx.fail(Failure::single(ERR_CLEANSTACK, Pos::End));
            } else {
                ctx.mark_used(&top);
                match top.static_bool() {
                    Some(false) => {
                        ctx.fail(Failure::single(ERR_FINAL_VERIFY, Pos::End));
                    }
                    _ => {
                        ctx.add_enforcement(SymValue::bool_of(&top), Pos::End);
                        ctx.constrain(ERR_FINAL_VERIFY, Pos::End, Pred::IsTrue(top));
                        let idx = ctx.constraints.len() - 1;
                        if let Some(e) = ctx.enforcements.last_mut() {
                            e.track_idx = Some(idx);
                        }
                        ctx.constrain(
                            ERR_FINAL_VERIFY,
                            Pos::End,
                            Pred::TotalWitnesses {
                                count: ctx.witness_count as i64,
                                exact: self.env.effective_cleanstack(),
                            },
                        );
                    }
                }
            }
        } else if !ctx.is_failed() {
            ctx.constrain(
                ERR_FINAL_VERIFY,
                Pos::End,
                Pred::TotalWitnesses {
                    count: ctx.witness_count as i64,
                    exact: false,
                },
            );
        }

        if !ctx.is_failed() {
            if let Some(backend) = &mut self.backend {
                match backend.check(&ctx.constraints, &[]) {
                    CheckOutcome::Sat => {}
                    CheckOutcome::Unsat(codes) => {
                        ctx.fail(Failure {
                            pos: Pos::End,
                            codes,
                        });
                    }
                    CheckOutcome::Unknown(code) => {
                        if backend.exit_on_unknown() {
                            self.fatal =
                                Some("solver returned unknown at finalization".to_string());
                        } else {
                            ctx.add_warning(
                                Pos::End,
                                format!("{}; path assumed satisfiable", code.code),
                            );
                        }
                    }
                }
            }
        }

        if ctx.is_failed() {
            if let Some(failure) = ctx.failure.clone() {
                if let Some(hook) = self.plugins.script_failure.as_mut() {
                    hook(&mut ctx, &failure);
                }
            }
        } else {
            self.probe_always_true(&mut ctx);
            self.collect_model_values(&mut ctx);
            if let Some(hook) = self.plugins.post_finalize.as_mut() {
                hook(&mut ctx);
            }
        }
        bp.context = Some(ctx);
    }

    /// Raw per-path tautology probes; the cross-path pass later decides
    /// between the `<*>` and `{*}` renderings.
    fn probe_always_true(&mut self, ctx: &mut ExecContext) {
        if !self.env.check_always_true_enforcements
            && !self.env.mark_path_local_always_true_enforcements
        {
            return;
        }
        let Some(backend) = &self.backend else {
            return;
        };
        let enforcements = ctx.enforcements.clone();
        for (i, e) in enforcements.iter().enumerate() {
            let trail: Vec<TrackedConstraint> = ctx
                .constraints
                .iter()
                .enumerate()
                .filter(|(idx, _)| Some(*idx) != e.track_idx)
                .map(|(_, tc)| tc.clone())
                .collect();
            let negated = Pred::IsFalse(e.cond.clone());
            let implied = backend.with_session(&trail, &[negated], |session| {
                matches!(session.check(), crate::solver::runner::CheckVerdict::Unsat(_))
            });
            if implied {
                ctx.enforcements[i].always_true = true;
            }
        }
    }

    /// Model values for witnesses, placeholders, references and the final
    /// stack, honouring the `produce-model-values-for` globs.
    fn collect_model_values(&mut self, ctx: &mut ExecContext) {
        if !self.env.produce_model_values {
            return;
        }
        let Some(backend) = &self.backend else {
            return;
        };
        let mut targets: Vec<(String, ValueRef)> = Vec::new();
        for i in 0..ctx.witness_count {
            targets.push((format!("wit{i}"), SymValue::witness(i)));
        }
        for tok in &self.script.tokens {
            if let TokenKind::Placeholder(name) = &tok.kind {
                let entry = (format!("${name}"), SymValue::placeholder(name.clone()));
                if !targets.iter().any(|(n, _)| *n == entry.0) {
                    targets.push(entry);
                }
            }
        }
        for (name, v) in &ctx.data_refs {
            targets.push((format!("&{name}"), v.clone()));
        }
        for (i, v) in ctx.stack.iter().enumerate() {
            if !v.is_static() {
                targets.push((format!("stack:{i}"), v.clone()));
            }
        }

        let env = self.env;
        let reports = backend.with_session(&ctx.constraints, &[], |session| {
            let mut out = Vec::new();
            for (name, value) in targets {
                let is_stack = name.starts_with("stack:");
                let samples_wanted = if env.produce_model_values_for.is_empty() {
                    1
                } else {
                    match env
                        .produce_model_values_for
                        .iter()
                        .find(|g| g.matches(&name))
                    {
                        Some(glob) => glob.samples.max(1),
                        None if is_stack => 1,
                        None => continue,
                    }
                };
                let samples = if model::prefers_numeric(session, &value) {
                    model::enumerate_nums(session, &value, samples_wanted)
                        .into_iter()
                        .map(ModelSample::Num)
                        .collect()
                } else {
                    model::enumerate_bytes(session, &value, samples_wanted)
                };
                let sizes = if env.report_model_value_sizes || is_stack {
                    let mut sizes = model::enumerate_sizes(session, &value, 7);
                    sizes.sort_unstable();
                    Some(sizes)
                } else {
                    None
                };
                let mut samples = samples;
                if env.sort_model_values {
                    samples.sort_by_key(|s| s.to_string());
                }
                out.push(ModelValueReport {
                    name,
                    samples,
                    sizes,
                });
            }
            out
        });
        ctx.model_values = reports;
    }

    /// Cross-path resolution of the always-true markers: `<*>` when the
    /// enforcement is implied in every valid path carrying it, `{*}` when
    /// only some of them imply it.
    fn resolve_always_true_marks(&self, root: &mut Branchpoint) {
        use std::collections::HashMap;
        let mut totals: HashMap<(String, Pos), (usize, usize)> = HashMap::new();
        root.walk(&mut |bp, _| {
            if let Some(ctx) = &bp.context {
                if ctx.is_failed() || ctx.unexplored {
                    return;
                }
                for e in &ctx.enforcements {
                    let entry = totals.entry(e.key()).or_insert((0, 0));
                    entry.1 += 1;
                    if e.always_true {
                        entry.0 += 1;
                    }
                }
            }
        });
        let check_global = self.env.check_always_true_enforcements;
        let mark_local = self.env.mark_path_local_always_true_enforcements;
        walk_contexts_mut(root, &mut |ctx| {
            for e in &mut ctx.enforcements {
                if !e.always_true {
                    continue;
                }
                let (true_count, total) = totals[&e.key()];
                let everywhere = true_count == total;
                e.always_true = everywhere && check_global;
                e.local_always_true = !everywhere && mark_local;
            }
        });
    }
}

fn walk_contexts_mut(bp: &mut Branchpoint, f: &mut impl FnMut(&mut ExecContext)) {
    if let Some(ctx) = &mut bp.context {
        f(ctx);
    }
    for child in &mut bp.children {
        walk_contexts_mut(child, f);
    }
}

fn lift_all(bp: &mut Branchpoint) {
    for child in &mut bp.children {
        lift_all(child);
    }
    lift_enforcements(bp);
}

/// Branch infeasibility reported at the decision position gets the branch
/// condition code unless the core names something more specific.
fn attribute_branch_codes(codes: Vec<FailCode>, at: OpPos) -> Vec<FailCode> {
    if codes.iter().any(|c| c.code == ERR_UNTRACKED) {
        vec![FailCode {
            code: ERR_BRANCH_CONDITION_INVALID.to_string(),
            pos: Pos::Op(at),
        }]
    } else {
        codes
    }
}

