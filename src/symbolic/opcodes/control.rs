//! Flow control: conditionals, VERIFY, RETURN, and the timelock
//! verifications. Conditionals with a statically known condition take their
//! arm without forking; symbolic conditions fork the context.

use crate::config::{SigVersion, SymEnvironment};
use crate::script::opcode::OpCode;
use crate::symbolic::error::*;
use crate::symbolic::opcodes::{enforce_true, op_value, BranchDecision, Mutation, StepEffect};
use crate::symbolic::scriptnum::SEQUENCE_LOCKTIME_DISABLE_FLAG;
use crate::symbolic::state::{BranchLabel, CondFrame, ExecContext, Failure, Pred};
use crate::symbolic::value::{OpPos, OpTag, Pos, SymValue, ValueRef};

pub fn handle_control(
    ctx: &mut ExecContext,
    env: &SymEnvironment,
    op: OpCode,
    at: OpPos,
) -> StepEffect {
    use OpCode::*;
    match op {
        If | NotIf => handle_if(ctx, env, op, at),
        Else => {
            let Some(frame) = ctx.cond_stack.last_mut() else {
                ctx.fail(Failure::single(ERR_UNBALANCED_CONDITIONAL, Pos::Op(at)));
                return StepEffect::Failed;
            };
            if frame.seen_else {
                ctx.fail(Failure::single(ERR_UNBALANCED_CONDITIONAL, Pos::Op(at)));
                return StepEffect::Failed;
            }
            frame.seen_else = true;
            frame.executing = !frame.executing;
            StepEffect::Done
        }
        EndIf => {
            if ctx.cond_stack.pop().is_none() {
                ctx.fail(Failure::single(ERR_UNBALANCED_CONDITIONAL, Pos::Op(at)));
                return StepEffect::Failed;
            }
            StepEffect::Done
        }
        IfDup => handle_ifdup(ctx, env, at),
        Verify => {
            let cond = ctx.pop(at);
            if enforce_true(ctx, ERR_VERIFY.to_string(), Pos::Op(at), &cond) {
                StepEffect::Done
            } else {
                StepEffect::Failed
            }
        }
        Return => {
            ctx.fail(Failure::single(ERR_RETURN, Pos::Op(at)));
            StepEffect::Failed
        }
        CheckLockTimeVerify => handle_cltv(ctx, env, at),
        CheckSequenceVerify => handle_csv(ctx, env, at),
        _ => unreachable!("not a control opcode: {op}"),
    }
}

/// IF / NOTIF inside a skipped arm only maintain nesting; an executing one
/// pops the condition and either takes the statically known arm or forks.
fn handle_if(ctx: &mut ExecContext, env: &SymEnvironment, op: OpCode, at: OpPos) -> StepEffect {
    if !ctx.executing() {
        ctx.cond_stack.push(CondFrame {
            executing: false,
            seen_else: false,
        });
        return StepEffect::Done;
    }
    let cond = ctx.pop(at);
    ctx.mark_used(&cond);
    let invert = op == OpCode::NotIf;

    if let Some(b) = cond.static_bool() {
        if minimalif_applies(env) {
            if let Some(bytes) = cond.as_bytes() {
                if !(bytes.is_empty() || bytes == [0x01]) {
                    ctx.fail(Failure::single(ERR_MINIMALIF, Pos::Op(at)));
                    return StepEffect::Failed;
                }
            }
        }
        ctx.cond_stack.push(CondFrame {
            executing: b != invert,
            seen_else: false,
        });
        return StepEffect::Done;
    }

    if minimalif_applies(env) {
        ctx.constrain(ERR_MINIMALIF, Pos::Op(at), Pred::MinimalIf(cond.clone()));
    }

    let bool_str = SymValue::bool_of(&cond).canonical();
    let (true_pred, false_pred) = if invert {
        (Pred::IsFalse(cond.clone()), Pred::IsTrue(cond.clone()))
    } else {
        (Pred::IsTrue(cond.clone()), Pred::IsFalse(cond.clone()))
    };
    let (true_cond_str, false_cond_str) = if invert {
        (format!("not {bool_str}"), bool_str.clone())
    } else {
        (bool_str.clone(), format!("not {bool_str}"))
    };
    StepEffect::Branch(vec![
        BranchDecision {
            label: BranchLabel {
                op: op.name().to_string(),
                arg: None,
                pos: at,
                choice: "True".to_string(),
                cond_str: true_cond_str,
            },
            constraint: Some((ERR_BRANCH_CONDITION_INVALID.to_string(), true_pred)),
            mutation: Mutation::CondFrame(true),
        },
        BranchDecision {
            label: BranchLabel {
                op: op.name().to_string(),
                arg: None,
                pos: at,
                choice: "False".to_string(),
                cond_str: false_cond_str,
            },
            constraint: Some((ERR_BRANCH_CONDITION_INVALID.to_string(), false_pred)),
            mutation: Mutation::CondFrame(false),
        },
    ])
}

fn minimalif_applies(env: &SymEnvironment) -> bool {
    env.minimalif_flag && env.sigversion != SigVersion::Base
}

fn handle_ifdup(ctx: &mut ExecContext, env: &SymEnvironment, at: OpPos) -> StepEffect {
    let top = ctx.peek(0, at);
    ctx.mark_used(&top);
    if let Some(b) = top.static_bool() {
        if b {
            ctx.push(top);
        }
        return StepEffect::Done;
    }
    let bool_str = SymValue::bool_of(&top).canonical();
    StepEffect::Branch(vec![
        BranchDecision {
            label: BranchLabel {
                op: "IFDUP".to_string(),
                arg: None,
                pos: at,
                choice: "True".to_string(),
                cond_str: bool_str.clone(),
            },
            constraint: Some((
                ERR_BRANCH_CONDITION_INVALID.to_string(),
                Pred::IsTrue(top.clone()),
            )),
            mutation: Mutation::PushValues(vec![top.clone()]),
        },
        BranchDecision {
            label: BranchLabel {
                op: "IFDUP".to_string(),
                arg: None,
                pos: at,
                choice: "False".to_string(),
                cond_str: format!("not {bool_str}"),
            },
            constraint: Some((
                ERR_BRANCH_CONDITION_INVALID.to_string(),
                Pred::IsFalse(top),
            )),
            mutation: Mutation::None,
        },
    ])
}

/// CLTV peeks its argument (BIP65 leaves it on the stack) and publishes the
/// locktime constraints against the transaction model.
fn handle_cltv(ctx: &mut ExecContext, env: &SymEnvironment, at: OpPos) -> StepEffect {
    let arg = ctx.peek(0, at);
    ctx.mark_used(&arg);
    // CLTV accepts up to 5-byte numbers.
    if let Some(bytes) = arg.as_bytes() {
        match crate::symbolic::scriptnum::decode_scriptnum(bytes, false, 5) {
            Ok(n) if n < 0 => {
                ctx.fail(Failure::single(ERR_NEGATIVE_ARGUMENT, Pos::Op(at)));
                return StepEffect::Failed;
            }
            Ok(_) => {}
            Err(_) => {
                ctx.fail(Failure::single(ERR_SCRIPTNUM_LENGTH, Pos::Op(at)));
                return StepEffect::Failed;
            }
        }
    } else {
        ctx.constrain(
            ERR_NEGATIVE_ARGUMENT,
            Pos::Op(at),
            Pred::NumInRange(arg.clone(), 0, (1i64 << 39) - 1),
        );
    }
    let node = op_value(
        ctx,
        env,
        OpTag::Op(OpCode::CheckLockTimeVerify),
        vec![arg.clone()],
    );
    ctx.add_enforcement(node, Pos::Op(at));
    ctx.constrain(
        ERR_LOCKTIME_TYPE_MISMATCH,
        Pos::Op(at),
        Pred::LocktimeTypeMatch(arg.clone()),
    );
    ctx.constrain(
        ERR_LOCKTIME_IN_EFFECT,
        Pos::Op(at),
        Pred::LocktimeInEffect(arg.clone()),
    );
    ctx.constrain(
        ERR_CLTV_NSEQUENCE_FINAL,
        Pos::Op(at),
        Pred::SequenceNotFinal,
    );
    StepEffect::Done
}

fn handle_csv(ctx: &mut ExecContext, env: &SymEnvironment, at: OpPos) -> StepEffect {
    let arg = ctx.peek(0, at);
    ctx.mark_used(&arg);
    if let Some(bytes) = arg.as_bytes() {
        match crate::symbolic::scriptnum::decode_scriptnum(bytes, false, 5) {
            Ok(n) if n < 0 => {
                ctx.fail(Failure::single(ERR_NEGATIVE_ARGUMENT, Pos::Op(at)));
                return StepEffect::Failed;
            }
            Ok(n) if n & SEQUENCE_LOCKTIME_DISABLE_FLAG != 0 => {
                // Disabled relative locktime: behaves as a NOP.
                return StepEffect::Done;
            }
            Ok(_) => {}
            Err(_) => {
                ctx.fail(Failure::single(ERR_SCRIPTNUM_LENGTH, Pos::Op(at)));
                return StepEffect::Failed;
            }
        }
    } else {
        ctx.constrain(
            ERR_NEGATIVE_ARGUMENT,
            Pos::Op(at),
            Pred::NumInRange(arg.clone(), 0, (1i64 << 39) - 1),
        );
    }
    let node = op_value(
        ctx,
        env,
        OpTag::Op(OpCode::CheckSequenceVerify),
        vec![arg.clone()],
    );
    ctx.add_enforcement(node, Pos::Op(at));
    ctx.constrain(
        ERR_BAD_TX_VERSION,
        Pos::Op(at),
        Pred::TxVersionAtLeast2,
    );
    ctx.constrain(
        ERR_NSEQUENCE_TYPE_MISMATCH,
        Pos::Op(at),
        Pred::NSequenceTypeMatch(arg.clone()),
    );
    ctx.constrain(
        ERR_NSEQUENCE_IN_EFFECT,
        Pos::Op(at),
        Pred::NSequenceInEffect(arg),
    );
    StepEffect::Done
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at() -> OpPos {
        OpPos { pc: 0, line: 1 }
    }

    fn run(ctx: &mut ExecContext, op: OpCode) -> StepEffect {
        handle_control(ctx, &SymEnvironment::default(), op, at())
    }

    #[test]
    fn static_if_takes_one_arm_without_forking() {
        let mut ctx = ExecContext::new();
        ctx.push(SymValue::number(1));
        match run(&mut ctx, OpCode::If) {
            StepEffect::Done => {}
            other => panic!("expected Done, got {other:?}"),
        }
        assert!(ctx.executing());
        assert!(ctx.cond_stack[0].executing);

        let mut ctx = ExecContext::new();
        ctx.push(SymValue::number(0));
        run(&mut ctx, OpCode::If);
        assert!(!ctx.executing());
    }

    #[test]
    fn symbolic_if_forks_two_arms() {
        let mut ctx = ExecContext::new();
        match run(&mut ctx, OpCode::If) {
            StepEffect::Branch(decisions) => {
                assert_eq!(decisions.len(), 2);
                assert_eq!(decisions[0].label.cond_str, "BOOL(wit0)");
                assert_eq!(decisions[1].label.cond_str, "not BOOL(wit0)");
                assert_eq!(decisions[0].label.render_v2(), "When BOOL(wit0) :: [IF @ 0:L1]");
            }
            other => panic!("expected fork, got {other:?}"),
        }
    }

    #[test]
    fn notif_swaps_the_predicates() {
        let mut ctx = ExecContext::new();
        match run(&mut ctx, OpCode::NotIf) {
            StepEffect::Branch(decisions) => {
                assert!(matches!(
                    decisions[0].constraint.as_ref().unwrap().1,
                    Pred::IsFalse(_)
                ));
            }
            other => panic!("expected fork, got {other:?}"),
        }
    }

    #[test]
    fn else_toggles_and_endif_pops() {
        let mut ctx = ExecContext::new();
        ctx.push(SymValue::number(0));
        run(&mut ctx, OpCode::If);
        assert!(!ctx.executing());
        run(&mut ctx, OpCode::Else);
        assert!(ctx.executing());
        run(&mut ctx, OpCode::EndIf);
        assert!(ctx.cond_stack.is_empty());
    }

    #[test]
    fn unbalanced_else_fails() {
        let mut ctx = ExecContext::new();
        match run(&mut ctx, OpCode::Else) {
            StepEffect::Failed => {}
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn verify_on_static_false_fails() {
        let mut ctx = ExecContext::new();
        ctx.push(SymValue::number(0));
        match run(&mut ctx, OpCode::Verify) {
            StepEffect::Failed => {}
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(ctx.failure.as_ref().unwrap().codes[0].code, ERR_VERIFY);
    }

    #[test]
    fn verify_on_symbolic_publishes_enforcement() {
        let mut ctx = ExecContext::new();
        run(&mut ctx, OpCode::Verify);
        assert_eq!(ctx.enforcements.len(), 1);
        assert_eq!(ctx.enforcements[0].cond.canonical(), "BOOL(wit0)");
    }

    #[test]
    fn ifdup_static_true_duplicates() {
        let mut ctx = ExecContext::new();
        ctx.push(SymValue::number(5));
        run(&mut ctx, OpCode::IfDup);
        assert_eq!(ctx.stack.len(), 2);

        let mut ctx = ExecContext::new();
        ctx.push(SymValue::number(0));
        run(&mut ctx, OpCode::IfDup);
        assert_eq!(ctx.stack.len(), 1);
    }

    #[test]
    fn csv_with_disable_flag_is_a_nop() {
        let mut ctx = ExecContext::new();
        ctx.push(SymValue::number(SEQUENCE_LOCKTIME_DISABLE_FLAG));
        run(&mut ctx, OpCode::CheckSequenceVerify);
        assert!(ctx.enforcements.is_empty());
        assert!(ctx.constraints.is_empty());
    }

    #[test]
    fn cltv_publishes_model_constraints() {
        let mut ctx = ExecContext::new();
        ctx.push(SymValue::number(500_000_000));
        run(&mut ctx, OpCode::CheckLockTimeVerify);
        assert_eq!(ctx.enforcements.len(), 1);
        assert_eq!(
            ctx.enforcements[0].cond.canonical(),
            "CHECKLOCKTIMEVERIFY(500000000)"
        );
        assert_eq!(ctx.constraints.len(), 3);
    }
}
