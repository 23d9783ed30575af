//! Per-opcode transfer functions. Each handler mutates the context (stack
//! effect, published constraints) and returns a [`StepEffect`] telling the
//! engine whether to continue, fork, sample a dynamic stack access, or stop.

pub mod arithmetic;
pub mod control;
pub mod crypto;
pub mod introspect;
pub mod stack;

use crate::config::SymEnvironment;
use crate::script::opcode::OpCode;
use crate::script::token::ScriptToken;
use crate::symbolic::state::{BranchLabel, ExecContext, Pred};
use crate::symbolic::value::{OpPos, OpTag, SymValue, ValueRef};

/// What happens to the path after one opcode.
#[derive(Debug)]
pub enum StepEffect {
    Done,
    /// Fork into the given decisions; the engine clones the context per
    /// decision, applies the mutation, asserts the predicate and recurses.
    Branch(Vec<BranchDecision>),
    /// An opcode whose stack reach depends on a symbolic value; the engine
    /// samples feasible assignments and re-executes with each pin.
    Dynamic(DynAccess),
    /// The context has been sealed with a failure.
    Failed,
}

#[derive(Debug)]
pub struct BranchDecision {
    pub label: BranchLabel,
    /// Constraint published on the child (tracked under the given code).
    pub constraint: Option<(String, Pred)>,
    pub mutation: Mutation,
}

#[derive(Debug)]
pub enum Mutation {
    None,
    /// Push a conditional frame (IF/NOTIF).
    CondFrame(bool),
    /// Push the given values, deepest first (IFDUP true-arm, 64-bit
    /// arithmetic results plus success flags).
    PushValues(Vec<ValueRef>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DynRole {
    PickIndex,
    RollIndex,
    MultisigNumKeys,
    MultisigNumSigs,
}

impl DynRole {
    /// The label fragment for count-style roles (`num_keys = 2`), or `None`
    /// for plain index roles.
    pub fn count_name(self) -> Option<&'static str> {
        match self {
            DynRole::MultisigNumKeys => Some("num_keys"),
            DynRole::MultisigNumSigs => Some("num_signatures"),
            _ => None,
        }
    }

    /// Upper bound used when enumerating samples.
    pub fn sample_bound(self) -> i64 {
        match self {
            DynRole::PickIndex | DynRole::RollIndex => {
                crate::symbolic::scriptnum::MAX_STACK_SIZE as i64 - 1
            }
            DynRole::MultisigNumKeys | DynRole::MultisigNumSigs => {
                crate::symbolic::scriptnum::MAX_PUBKEYS_PER_MULTISIG
            }
        }
    }
}

/// A dynamic stack access discovered by a handler: the opcode must be
/// re-executed once per sampled value of `index`.
#[derive(Debug)]
pub struct DynAccess {
    pub op: OpCode,
    pub index: ValueRef,
    pub role: DynRole,
    /// Extra upper bound from current state, e.g. `num_sigs <= num_keys`.
    pub max_value: Option<i64>,
}

/// Dispatch one opcode. The caller has already checked that the context is
/// executing (not inside a skipped conditional arm).
pub fn dispatch(
    ctx: &mut ExecContext,
    env: &SymEnvironment,
    _tok: &ScriptToken,
    op: OpCode,
    at: OpPos,
) -> StepEffect {
    use OpCode::*;
    match op {
        Nop => StepEffect::Done,
        If | NotIf | Else | EndIf | IfDup | Verify | Return | CheckLockTimeVerify
        | CheckSequenceVerify => control::handle_control(ctx, env, op, at),
        ToAltStack | FromAltStack | Drop2 | Dup2 | Dup3 | Over2 | Rot2 | Swap2 | Depth | Drop
        | Dup | Nip | Over | Pick | Roll | Rot | Swap | Tuck => {
            stack::handle_stack(ctx, env, op, at)
        }
        Cat | Substr | Left | Right | Size | Invert | And | Or | Xor | Equal | EqualVerify
        | LShift | RShift | Add1 | Sub1 | Negate | Abs | Not | NotEqual0 | Add | Sub | BoolAnd
        | BoolOr | NumEqual | NumEqualVerify | NumNotEqual | LessThan | GreaterThan
        | LessThanOrEqual | GreaterThanOrEqual | Min | Max | Within | Add64 | Sub64 | Mul64
        | Div64 | Neg64 | LessThan64 | LessThanOrEqual64 | GreaterThan64
        | GreaterThanOrEqual64 | ScriptNumToLe64 | Le64ToScriptNum | Le32ToLe64 => {
            arithmetic::handle_arithmetic(ctx, env, op, at)
        }
        Ripemd160 | Sha1 | Sha256 | Hash160 | Hash256 | CheckSig | CheckSigVerify
        | CheckMultisig | CheckMultisigVerify | CheckSigAdd | CheckSigFromStack
        | CheckSigFromStackVerify | Sha256Initialize | Sha256Update | Sha256Finalize => {
            crypto::handle_crypto(ctx, env, op, at)
        }
        InspectInputOutpoint | InspectInputAsset | InspectInputValue
        | InspectInputScriptPubKey | InspectInputSequence | InspectInputIssuance
        | InspectOutputAsset | InspectOutputValue | InspectOutputNonce
        | InspectOutputScriptPubKey | InspectVersion | InspectLockTime | InspectNumInputs
        | InspectNumOutputs | PushCurrentInputIndex | TxWeight => {
            introspect::handle_introspect(ctx, env, op, at)
        }
    }
}

/// Build an operator node, marking the operands as observed for the
/// unused-value tracker.
pub fn op_value(
    ctx: &mut ExecContext,
    env: &SymEnvironment,
    tag: OpTag,
    args: Vec<ValueRef>,
) -> ValueRef {
    for a in &args {
        ctx.mark_used(a);
    }
    SymValue::op(tag, args, env.use_deterministic_arguments_order)
}

/// Publish a VERIFY-class enforcement: `BOOL(cond)` must hold for the path
/// to remain valid. A statically false condition seals the path at once;
/// a statically true one publishes nothing.
pub fn enforce_true(
    ctx: &mut ExecContext,
    code: String,
    pos: crate::symbolic::value::Pos,
    cond: &ValueRef,
) -> bool {
    ctx.mark_used(cond);
    match cond.static_bool() {
        Some(true) => true,
        Some(false) => {
            ctx.fail(crate::symbolic::state::Failure::single(code, pos));
            false
        }
        None => {
            ctx.add_enforcement(SymValue::bool_of(cond), pos);
            ctx.constrain(code, pos, Pred::IsTrue(cond.clone()));
            let idx = ctx.constraints.len() - 1;
            if let Some(e) = ctx.enforcements.last_mut() {
                e.track_idx = Some(idx);
            }
            crypto::track_sig_enforcement(ctx, cond, pos);
            !ctx.is_failed()
        }
    }
}
