//! Per-path execution state and the branch tree. A context is the unit
//! forked on branches: each live path exclusively owns its context, and no
//! solver handles live inside it, so forking is a plain clone.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use crate::assertions::AssertionSpec;
use crate::symbolic::value::{ptr_key, SymValue, ValueRef};

pub use crate::symbolic::value::{OpPos, Pos};

/// A predicate handed to the solver. Kept symbolic (no Z3 types) so that
/// contexts clone freely and racing workers can re-lower the same query.
#[derive(Debug, Clone)]
pub enum Pred {
    /// `CastToBool(value)` holds.
    IsTrue(ValueRef),
    IsFalse(ValueRef),
    /// The script-number view of the value equals the constant.
    NumEq(ValueRef, i64),
    /// Inclusive numeric range on the script-number view.
    NumInRange(ValueRef, i64, i64),
    SizeEq(ValueRef, i64),
    SizeLe(ValueRef, i64),
    SizesEqual(ValueRef, ValueRef),
    /// The value decodes as a script-number (length bound).
    ValidScriptnum(ValueRef),
    /// The value's encoding is the minimal one for its number.
    MinimalEncoding(ValueRef),
    /// The 64-bit view of an arithmetic result stays in int64 range.
    Int64InBounds(ValueRef),
    Int64OutOfBounds(ValueRef),
    /// NULLFAIL: a false signature-check result forces an empty signature.
    NullfailImplies { result: ValueRef, sig: ValueRef },
    /// MINIMALIF: the branch condition is exactly empty or `0x01`.
    MinimalIf(ValueRef),
    /// CLTV: argument and transaction locktime are on the same side of the
    /// locktime threshold.
    LocktimeTypeMatch(ValueRef),
    /// CLTV: argument does not exceed the transaction locktime.
    LocktimeInEffect(ValueRef),
    /// CLTV: the spending input's nSequence is not final.
    SequenceNotFinal,
    /// CSV: argument and masked nSequence agree on the type bit.
    NSequenceTypeMatch(ValueRef),
    /// CSV: masked argument does not exceed the masked nSequence.
    NSequenceInEffect(ValueRef),
    /// CSV: transaction version is at least 2.
    TxVersionAtLeast2,
    /// Explicit amounts stay within the money range.
    MoneyRange(ValueRef),
    /// Relates the total-witness model variable to the count a path
    /// materialized: `exact` at clean finalization, a lower bound otherwise.
    TotalWitnesses { count: i64, exact: bool },
    /// A user assertion/assumption applied to a target value.
    User {
        target: ValueRef,
        spec: Arc<AssertionSpec>,
        negate: bool,
    },
}

impl Pred {
    pub fn negated(&self) -> Option<Pred> {
        match self {
            Pred::IsTrue(v) => Some(Pred::IsFalse(v.clone())),
            Pred::IsFalse(v) => Some(Pred::IsTrue(v.clone())),
            Pred::Int64InBounds(v) => Some(Pred::Int64OutOfBounds(v.clone())),
            Pred::Int64OutOfBounds(v) => Some(Pred::Int64InBounds(v.clone())),
            Pred::User { target, spec, negate } => Some(Pred::User {
                target: target.clone(),
                spec: spec.clone(),
                negate: !negate,
            }),
            _ => None,
        }
    }
}

/// A named constraint on the path predicate. The code becomes the reported
/// error kind if the constraint turns up in an unsat core.
#[derive(Debug, Clone)]
pub struct TrackedConstraint {
    pub code: String,
    pub pos: Pos,
    pub pred: Pred,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailCode {
    pub code: String,
    pub pos: Pos,
}

impl std::fmt::Display for FailCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} @ {}", self.code, self.pos)
    }
}

#[derive(Debug, Clone)]
pub struct Failure {
    pub pos: Pos,
    pub codes: Vec<FailCode>,
}

impl Failure {
    pub fn single(code: impl Into<String>, pos: Pos) -> Self {
        Failure {
            pos,
            codes: vec![FailCode {
                code: code.into(),
                pos,
            }],
        }
    }
}

#[derive(Debug, Clone)]
pub struct Enforcement {
    pub cond: ValueRef,
    pub pos: Pos,
    pub always_true: bool,
    pub local_always_true: bool,
    /// Index of the constraint this enforcement published, for probes that
    /// must exclude the enforcement itself.
    pub track_idx: Option<usize>,
}

impl Enforcement {
    /// Lifting identity: same predicate rendering at the same position.
    pub fn key(&self) -> (String, Pos) {
        (self.cond.canonical(), self.pos)
    }
}

#[derive(Debug, Clone)]
pub struct Warning {
    pub pos: Pos,
    pub text: String,
}

/// How a fork edge is labelled. Two render styles exist; the report format
/// version selects between them.
#[derive(Debug, Clone)]
pub struct BranchLabel {
    pub op: String,
    pub arg: Option<String>,
    pub pos: OpPos,
    pub choice: String,
    pub cond_str: String,
}

impl BranchLabel {
    /// `PICK wit0 @ 0:L1 : 0`
    pub fn render_v1(&self) -> String {
        match &self.arg {
            Some(arg) => format!("{} {} @ {} : {}", self.op, arg, self.pos, self.choice),
            None => format!("{} @ {} : {}", self.op, self.pos, self.choice),
        }
    }

    /// `When wit0 = 0 :: [PICK @ 0:L1]`
    pub fn render_v2(&self) -> String {
        format!("When {} :: [{} @ {}]", self.cond_str, self.op, self.pos)
    }
}

/// One still-open conditional block on the path.
#[derive(Debug, Clone, Copy)]
pub struct CondFrame {
    pub executing: bool,
    pub seen_else: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSample {
    Num(i64),
    Bytes(Vec<u8>),
}

impl std::fmt::Display for ModelSample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelSample::Num(n) => write!(f, "{n}"),
            ModelSample::Bytes(b) if b.is_empty() => f.write_str("''"),
            ModelSample::Bytes(b) => {
                if b.len() <= 5 && crate::symbolic::scriptnum::is_minimal_scriptnum(b) {
                    if let Ok(n) = crate::symbolic::scriptnum::decode_scriptnum(b, true, 5) {
                        return write!(f, "{n}");
                    }
                }
                let hex: String = b.iter().map(|x| format!("{x:02x}")).collect();
                write!(f, "x('{hex}')")
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModelValueReport {
    pub name: String,
    pub samples: Vec<ModelSample>,
    pub sizes: Option<Vec<i64>>,
}

#[derive(Debug, Clone, Default)]
pub struct ExecContext {
    pub stack: Vec<ValueRef>,
    pub altstack: Vec<ValueRef>,
    pub pc: usize,
    pub line: u32,

    pub enforcements: Vec<Enforcement>,
    pub warnings: Vec<Warning>,
    pub failure: Option<Failure>,

    /// Number of distinct witness indices materialized so far.
    pub witness_count: usize,

    /// Values produced (pushes, witness materializations) not yet observed
    /// by any constraint or operator.
    pub produced: Vec<(OpPos, ValueRef)>,
    used_marks: HashSet<usize>,

    pub data_refs: BTreeMap<String, ValueRef>,
    /// Node-instance key to reference name, for display.
    pub ref_names: BTreeMap<usize, String>,

    pub branch_trail: Vec<BranchLabel>,
    /// Accumulated path constraints, in assertion order. This is the reset
    /// backend's re-assert set; the incremental backend mirrors it with
    /// solver frames.
    pub constraints: Vec<TrackedConstraint>,

    /// Sampled concrete values pinned by dynamic stack access.
    pub pins: HashMap<u64, i64>,

    /// Statically-determined signature-check outcomes enforced on this path,
    /// keyed by (sig, pubkey) structural ids.
    pub sig_facts: HashMap<(u64, u64), bool>,
    /// Signature bodies enforced true, keyed by (body hash, pubkey id), with
    /// the full signature id as value.
    pub sig_true_bodies: HashMap<(u64, u64), u64>,

    pub cond_stack: Vec<CondFrame>,

    pub model_values: Vec<ModelValueReport>,
    /// Terminal "was not explored" marker for dynamic-access overflow paths.
    pub unexplored: bool,
    /// Snapshot of the stacks at failure time, for the failure report.
    pub failure_stack: Option<(Vec<ValueRef>, Vec<ValueRef>)>,
}

impl ExecContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn executing(&self) -> bool {
        self.cond_stack.iter().all(|f| f.executing)
    }

    /// Pop the top value, materializing a fresh witness when the stack is
    /// exhausted. Witness indices grow with depth of first use.
    pub fn pop(&mut self, at: OpPos) -> ValueRef {
        self.need_depth(1, at);
        self.stack.pop().expect("depth ensured")
    }

    pub fn push(&mut self, v: ValueRef) {
        self.stack.push(v);
    }

    pub fn push_produced(&mut self, v: ValueRef, at: OpPos) {
        self.produced.push((at, v.clone()));
        self.stack.push(v);
    }

    /// Make sure at least `n` items exist, inserting fresh witnesses at the
    /// bottom (deeper untouched stack positions are later witnesses).
    pub fn need_depth(&mut self, n: usize, at: OpPos) {
        while self.stack.len() < n {
            let w = SymValue::witness(self.witness_count);
            self.witness_count += 1;
            self.produced.push((at, w.clone()));
            self.stack.insert(0, w);
        }
    }

    pub fn peek(&mut self, depth_from_top: usize, at: OpPos) -> ValueRef {
        self.need_depth(depth_from_top + 1, at);
        self.stack[self.stack.len() - 1 - depth_from_top].clone()
    }

    pub fn mark_used(&mut self, v: &ValueRef) {
        self.used_marks.insert(ptr_key(v));
    }

    pub fn is_used(&self, v: &ValueRef) -> bool {
        self.used_marks.contains(&ptr_key(v))
    }

    /// Values produced on this path that nothing ever observed.
    pub fn unused(&self) -> Vec<(OpPos, ValueRef)> {
        self.produced
            .iter()
            .filter(|(_, v)| !self.is_used(v))
            .cloned()
            .collect()
    }

    pub fn add_enforcement(&mut self, cond: ValueRef, pos: Pos) {
        self.mark_used(&cond);
        self.enforcements.push(Enforcement {
            cond,
            pos,
            always_true: false,
            local_always_true: false,
            track_idx: None,
        });
    }

    pub fn add_warning(&mut self, pos: Pos, text: impl Into<String>) {
        self.warnings.push(Warning {
            pos,
            text: text.into(),
        });
    }

    pub fn constrain(&mut self, code: impl Into<String>, pos: Pos, pred: Pred) {
        self.constraints.push(TrackedConstraint {
            code: code.into(),
            pos,
            pred,
        });
    }

    /// Seal the path with a failure. The first failure wins; the stacks are
    /// snapshotted for the report.
    pub fn fail(&mut self, failure: Failure) {
        if self.failure.is_none() {
            self.failure_stack = Some((self.stack.clone(), self.altstack.clone()));
            self.failure = Some(failure);
        }
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    /// Static value of a script-number view, honouring dynamic-access pins.
    pub fn static_num(&self, v: &ValueRef, require_minimal: bool, max_size: usize) -> Option<i64> {
        v.as_scriptnum(require_minimal, max_size)
            .or_else(|| self.pins.get(&v.structural_id()).copied())
    }

    /// Bind a data-reference name to a value, adding apostrophes while the
    /// name is taken by a different value.
    pub fn bind_ref(&mut self, name: &str, v: &ValueRef) -> String {
        let mut chosen = name.to_string();
        while let Some(existing) = self.data_refs.get(&chosen) {
            if existing == v {
                break;
            }
            chosen.push('\'');
        }
        self.data_refs.insert(chosen.clone(), v.clone());
        self.ref_names.insert(ptr_key(v), chosen.clone());
        self.mark_used(v);
        chosen
    }
}

/// A node of the path tree: a branch decision, or the root. Leaves carry the
/// finalized context; inner nodes accumulate lifted enforcements.
#[derive(Debug, Default)]
pub struct Branchpoint {
    pub label: Option<BranchLabel>,
    pub children: Vec<Branchpoint>,
    pub context: Option<ExecContext>,
    pub lifted: Vec<Enforcement>,
}

impl Branchpoint {
    pub fn leaf(label: Option<BranchLabel>, context: ExecContext) -> Self {
        Branchpoint {
            label,
            children: Vec::new(),
            context: Some(context),
            lifted: Vec::new(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.context.is_some()
    }

    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Branchpoint, &[&'a BranchLabel])) {
        fn inner<'a>(
            bp: &'a Branchpoint,
            trail: &mut Vec<&'a BranchLabel>,
            f: &mut impl FnMut(&'a Branchpoint, &[&'a BranchLabel]),
        ) {
            if let Some(label) = &bp.label {
                trail.push(label);
            }
            f(bp, trail);
            for child in &bp.children {
                inner(child, trail, f);
            }
            if bp.label.is_some() {
                trail.pop();
            }
        }
        inner(self, &mut Vec::new(), f);
    }

    /// All leaf contexts in depth-first order, with their label trails.
    pub fn leaves(&self) -> Vec<(&ExecContext, Vec<&BranchLabel>)> {
        let mut out = Vec::new();
        self.walk(&mut |bp, trail| {
            if let Some(ctx) = &bp.context {
                out.push((ctx, trail.to_vec()));
            }
        });
        out
    }
}

/// Intersect the children's enforcement sets and lift the common part to the
/// parent. Marking flags must agree for an enforcement to lift; this keeps a
/// path-local always-true enforcement in its own path while a sibling shows
/// the unmarked one.
pub fn lift_enforcements(bp: &mut Branchpoint) {
    if bp.is_leaf() || bp.children.is_empty() {
        return;
    }
    let child_sets: Vec<Vec<(String, Pos, bool, bool)>> = bp
        .children
        .iter()
        .map(|c| {
            enforcement_view(c)
                .iter()
                .map(|e| (e.cond.canonical(), e.pos, e.always_true, e.local_always_true))
                .collect()
        })
        .collect();
    // Failed or unexplored children carry no enforcements and block lifting.
    let any_empty_failed = bp.children.iter().any(|c| {
        c.context
            .as_ref()
            .map(|ctx| ctx.is_failed() || ctx.unexplored)
            .unwrap_or(false)
    });
    if any_empty_failed {
        return;
    }
    let Some(first) = child_sets.first() else {
        return;
    };
    let mut common: Vec<(String, Pos, bool, bool)> = first.clone();
    for set in &child_sets[1..] {
        common.retain(|item| set.contains(item));
    }
    if common.is_empty() {
        return;
    }
    // Move the common enforcements out of every child, preserve order from
    // the first child.
    let mut lifted: Vec<Enforcement> = Vec::new();
    for item in &common {
        if let Some(e) = find_enforcement(&bp.children[0], item) {
            lifted.push(e);
        }
    }
    for child in &mut bp.children {
        remove_enforcements(child, &common);
    }
    bp.lifted.extend(lifted);
}

fn enforcement_view(bp: &Branchpoint) -> Vec<Enforcement> {
    if let Some(ctx) = &bp.context {
        ctx.enforcements.clone()
    } else {
        bp.lifted.clone()
    }
}

fn find_enforcement(bp: &Branchpoint, key: &(String, Pos, bool, bool)) -> Option<Enforcement> {
    enforcement_view(bp)
        .into_iter()
        .find(|e| e.cond.canonical() == key.0 && e.pos == key.1)
}

fn remove_enforcements(bp: &mut Branchpoint, keys: &[(String, Pos, bool, bool)]) {
    let matches = |e: &Enforcement| {
        keys.iter()
            .any(|k| e.cond.canonical() == k.0 && e.pos == k.1 && e.always_true == k.2 && e.local_always_true == k.3)
    };
    if let Some(ctx) = &mut bp.context {
        ctx.enforcements.retain(|e| !matches(e));
    } else {
        bp.lifted.retain(|e| !matches(e));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbolic::value::SymValue;

    fn pos(pc: usize) -> OpPos {
        OpPos { pc, line: 1 }
    }

    #[test]
    fn witnesses_materialize_from_the_bottom() {
        let mut ctx = ExecContext::new();
        ctx.push(SymValue::number(1));
        ctx.need_depth(2, pos(5));
        assert_eq!(ctx.stack.len(), 2);
        assert_eq!(ctx.stack[0].witness_index(), Some(0));
        assert_eq!(ctx.witness_count, 1);
        // Deeper need produces the next index further down.
        ctx.need_depth(3, pos(6));
        assert_eq!(ctx.stack[0].witness_index(), Some(1));
    }

    #[test]
    fn pop_materializes_in_order() {
        let mut ctx = ExecContext::new();
        let a = ctx.pop(pos(0));
        let b = ctx.pop(pos(0));
        assert_eq!(a.witness_index(), Some(0));
        assert_eq!(b.witness_index(), Some(1));
    }

    #[test]
    fn unused_tracking_ignores_stack_motion() {
        let mut ctx = ExecContext::new();
        let v = SymValue::number(10);
        ctx.push_produced(v.clone(), pos(0));
        assert_eq!(ctx.unused().len(), 1);
        ctx.mark_used(&v);
        assert!(ctx.unused().is_empty());
    }

    #[test]
    fn ref_binding_disambiguates_with_apostrophe() {
        let mut ctx = ExecContext::new();
        let a = SymValue::number(1);
        let b = SymValue::number(2);
        assert_eq!(ctx.bind_ref("a", &a), "a");
        assert_eq!(ctx.bind_ref("a", &b), "a'");
        // Re-binding the same value keeps the name.
        assert_eq!(ctx.bind_ref("a", &a), "a");
    }

    #[test]
    fn label_render_styles() {
        let label = BranchLabel {
            op: "PICK".to_string(),
            arg: Some("wit0".to_string()),
            pos: pos(0),
            choice: "0".to_string(),
            cond_str: "wit0 = 0".to_string(),
        };
        assert_eq!(label.render_v1(), "PICK wit0 @ 0:L1 : 0");
        assert_eq!(label.render_v2(), "When wit0 = 0 :: [PICK @ 0:L1]");
    }

    #[test]
    fn lifting_moves_common_enforcements_up() {
        let shared = SymValue::bool_of(&SymValue::witness(3));
        let mut left = ExecContext::new();
        left.add_enforcement(shared.clone(), Pos::Op(pos(2)));
        left.add_enforcement(SymValue::bool_of(&SymValue::witness(4)), Pos::Op(pos(3)));
        let mut right = ExecContext::new();
        right.add_enforcement(shared.clone(), Pos::Op(pos(2)));

        let mut bp = Branchpoint::default();
        bp.children.push(Branchpoint::leaf(None, left));
        bp.children.push(Branchpoint::leaf(None, right));
        lift_enforcements(&mut bp);

        assert_eq!(bp.lifted.len(), 1);
        assert_eq!(bp.lifted[0].cond.canonical(), "BOOL(wit3)");
        let left_ctx = bp.children[0].context.as_ref().unwrap();
        assert_eq!(left_ctx.enforcements.len(), 1);
        let right_ctx = bp.children[1].context.as_ref().unwrap();
        assert!(right_ctx.enforcements.is_empty());

        // Idempotence: re-lifting changes nothing.
        lift_enforcements(&mut bp);
        assert_eq!(bp.lifted.len(), 1);
    }

    #[test]
    fn differing_marks_block_lifting() {
        let shared = SymValue::bool_of(&SymValue::witness(3));
        let mut left = ExecContext::new();
        left.add_enforcement(shared.clone(), Pos::Op(pos(2)));
        left.enforcements[0].local_always_true = true;
        let mut right = ExecContext::new();
        right.add_enforcement(shared.clone(), Pos::Op(pos(2)));

        let mut bp = Branchpoint::default();
        bp.children.push(Branchpoint::leaf(None, left));
        bp.children.push(Branchpoint::leaf(None, right));
        lift_enforcements(&mut bp);
        assert!(bp.lifted.is_empty());
    }
}
