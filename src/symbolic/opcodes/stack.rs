//! Stack shuffling. Static permutations materialize missing witnesses and
//! rearrange; `PICK`/`ROLL` with a symbolic index escalate to the dynamic
//! stack access machinery.

use crate::config::SymEnvironment;
use crate::script::opcode::OpCode;
use crate::symbolic::error::op_invalid_code;
use crate::symbolic::opcodes::{DynAccess, DynRole, StepEffect};
use crate::symbolic::state::{ExecContext, Failure};
use crate::symbolic::value::{OpPos, OpTag, Pos, SymValue};

pub fn handle_stack(
    ctx: &mut ExecContext,
    env: &SymEnvironment,
    op: OpCode,
    at: OpPos,
) -> StepEffect {
    use OpCode::*;
    match op {
        ToAltStack => {
            let v = ctx.pop(at);
            ctx.altstack.push(v);
        }
        FromAltStack => match ctx.altstack.pop() {
            Some(v) => ctx.push(v),
            None => {
                ctx.fail(Failure::single(op_invalid_code(op), Pos::Op(at)));
                return StepEffect::Failed;
            }
        },
        Drop => {
            ctx.pop(at);
        }
        Drop2 => {
            ctx.pop(at);
            ctx.pop(at);
        }
        Dup => {
            let v = ctx.peek(0, at);
            ctx.push(v);
        }
        Dup2 => {
            let b = ctx.peek(0, at);
            let a = ctx.peek(1, at);
            ctx.push(a);
            ctx.push(b);
        }
        Dup3 => {
            let c = ctx.peek(0, at);
            let b = ctx.peek(1, at);
            let a = ctx.peek(2, at);
            ctx.push(a);
            ctx.push(b);
            ctx.push(c);
        }
        Over => {
            let v = ctx.peek(1, at);
            ctx.push(v);
        }
        Over2 => {
            let b = ctx.peek(3, at);
            let a = ctx.peek(2, at);
            // peek(3) ensured depth 4: a is the third from top.
            ctx.push(b);
            ctx.push(a);
        }
        Nip => {
            ctx.need_depth(2, at);
            let len = ctx.stack.len();
            ctx.stack.remove(len - 2);
        }
        Tuck => {
            ctx.need_depth(2, at);
            let top = ctx.peek(0, at);
            let len = ctx.stack.len();
            ctx.stack.insert(len - 2, top);
        }
        Swap => {
            ctx.need_depth(2, at);
            let len = ctx.stack.len();
            ctx.stack.swap(len - 1, len - 2);
        }
        Swap2 => {
            ctx.need_depth(4, at);
            let len = ctx.stack.len();
            ctx.stack.swap(len - 1, len - 3);
            ctx.stack.swap(len - 2, len - 4);
        }
        Rot => {
            ctx.need_depth(3, at);
            let len = ctx.stack.len();
            let v = ctx.stack.remove(len - 3);
            ctx.stack.push(v);
        }
        Rot2 => {
            ctx.need_depth(6, at);
            let len = ctx.stack.len();
            let a = ctx.stack.remove(len - 6);
            let b = ctx.stack.remove(len - 6);
            ctx.stack.push(a);
            ctx.stack.push(b);
        }
        Depth => {
            // True depth is the yet-unknown total witness count plus the net
            // effect of everything executed so far.
            let offset = ctx.stack.len() as i64 - ctx.witness_count as i64;
            let node = SymValue::op(
                OpTag::TxField("DEPTH"),
                vec![SymValue::number(offset)],
                env.use_deterministic_arguments_order,
            );
            ctx.push_produced(node, at);
        }
        Pick | Roll => {
            let index = ctx.pop(at);
            ctx.mark_used(&index);
            let max_size = crate::symbolic::scriptnum::MAX_SCRIPTNUM_SIZE;
            match ctx.static_num(&index, env.minimaldata_flag_strict, max_size) {
                Some(n) if n < 0 => {
                    ctx.fail(Failure::single(op_invalid_code(op), Pos::Op(at)));
                    return StepEffect::Failed;
                }
                Some(n) => {
                    let n = n as usize;
                    ctx.need_depth(n + 1, at);
                    let pos_from_bottom = ctx.stack.len() - 1 - n;
                    let v = if op == Pick {
                        ctx.stack[pos_from_bottom].clone()
                    } else {
                        ctx.stack.remove(pos_from_bottom)
                    };
                    ctx.push(v);
                }
                None => {
                    return StepEffect::Dynamic(DynAccess {
                        op,
                        index,
                        role: if op == Pick {
                            DynRole::PickIndex
                        } else {
                            DynRole::RollIndex
                        },
                        max_value: None,
                    });
                }
            }
        }
        _ => unreachable!("not a stack opcode: {op}"),
    }
    StepEffect::Done
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbolic::opcodes::StepEffect;

    fn at() -> OpPos {
        OpPos { pc: 0, line: 1 }
    }

    fn run(ctx: &mut ExecContext, op: OpCode) -> StepEffect {
        handle_stack(ctx, &SymEnvironment::default(), op, at())
    }

    #[test]
    fn swap_materializes_a_witness_under_the_stack() {
        let mut ctx = ExecContext::new();
        ctx.push(SymValue::number(1));
        run(&mut ctx, OpCode::Swap);
        assert_eq!(ctx.stack[1].witness_index(), Some(0));
        assert_eq!(ctx.stack[0].canonical(), "1");
    }

    #[test]
    fn static_pick_duplicates_depth_n() {
        let mut ctx = ExecContext::new();
        ctx.push(SymValue::number(7));
        ctx.push(SymValue::number(9));
        ctx.push(SymValue::number(1)); // index
        run(&mut ctx, OpCode::Pick);
        assert_eq!(ctx.stack.len(), 3);
        assert_eq!(ctx.stack[2].canonical(), "7");
    }

    #[test]
    fn static_roll_moves_depth_n() {
        let mut ctx = ExecContext::new();
        ctx.push(SymValue::number(7));
        ctx.push(SymValue::number(9));
        ctx.push(SymValue::number(1)); // index
        run(&mut ctx, OpCode::Roll);
        assert_eq!(ctx.stack.len(), 2);
        assert_eq!(ctx.stack[0].canonical(), "9");
        assert_eq!(ctx.stack[1].canonical(), "7");
    }

    #[test]
    fn symbolic_pick_requests_dynamic_access() {
        let mut ctx = ExecContext::new();
        let effect = run(&mut ctx, OpCode::Pick);
        match effect {
            StepEffect::Dynamic(dyn_access) => {
                assert_eq!(dyn_access.index.witness_index(), Some(0));
                assert_eq!(dyn_access.role, DynRole::PickIndex);
            }
            other => panic!("expected dynamic access, got {other:?}"),
        }
    }

    #[test]
    fn pinned_pick_behaves_statically() {
        let mut ctx = ExecContext::new();
        let idx = SymValue::witness(0);
        ctx.witness_count = 1;
        ctx.pins.insert(idx.structural_id(), 1);
        ctx.push(idx);
        match run(&mut ctx, OpCode::Pick) {
            StepEffect::Done => {}
            other => panic!("expected Done, got {other:?}"),
        }
        // Index popped, depth 2 materialized, top duplicates depth 1.
        assert_eq!(ctx.stack.len(), 3);
        assert_eq!(ctx.stack[2], ctx.stack[0]);
    }

    #[test]
    fn fromaltstack_on_empty_altstack_fails() {
        let mut ctx = ExecContext::new();
        match run(&mut ctx, OpCode::FromAltStack) {
            StepEffect::Failed => {}
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(ctx.is_failed());
    }

    #[test]
    fn rot_rotates_third_to_top() {
        let mut ctx = ExecContext::new();
        for n in [1, 2, 3] {
            ctx.push(SymValue::number(n));
        }
        run(&mut ctx, OpCode::Rot);
        let tops: Vec<String> = ctx.stack.iter().map(|v| v.canonical()).collect();
        assert_eq!(tops, vec!["2", "3", "1"]);
    }
}
