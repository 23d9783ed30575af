//! Pure arithmetic, comparison, splice and bitwise transfer functions,
//! including the Elements 64-bit family. Static operands fold to literal
//! results; symbolic operands build operator nodes and publish the numeric
//! well-formedness constraints the rule set demands.

use num_bigint::BigUint;

use crate::config::SymEnvironment;
use crate::script::opcode::OpCode;
use crate::symbolic::error::*;
use crate::symbolic::opcodes::{enforce_true, op_value, BranchDecision, Mutation, StepEffect};
use crate::symbolic::scriptnum::{
    is_minimal_scriptnum, MAX_SCRIPTNUM_SIZE, MAX_SCRIPT_ELEMENT_SIZE,
};
use crate::symbolic::state::{BranchLabel, ExecContext, Failure, Pred};
use crate::symbolic::value::{OpPos, OpTag, Pos, SymValue, ValueRef};

pub enum NumRead {
    Static(i64),
    Symbolic,
    Failed,
}

/// Read a value as a script-number operand, publishing encoding constraints
/// for symbolic values and honouring the minimaldata flags for static ones.
pub fn read_num(ctx: &mut ExecContext, env: &SymEnvironment, v: &ValueRef, at: OpPos) -> NumRead {
    ctx.mark_used(v);
    if let Some(bytes) = v.as_bytes() {
        match crate::symbolic::scriptnum::decode_scriptnum(bytes, false, MAX_SCRIPTNUM_SIZE) {
            Err(_) => {
                ctx.fail(Failure::single(ERR_SCRIPTNUM_LENGTH, Pos::Op(at)));
                NumRead::Failed
            }
            Ok(n) => {
                if !is_minimal_scriptnum(bytes) {
                    if env.minimaldata_flag_strict {
                        ctx.fail(Failure::single(ERR_SCRIPTNUM_MINIMAL, Pos::Op(at)));
                        return NumRead::Failed;
                    }
                    if env.minimaldata_flag {
                        ctx.add_warning(
                            Pos::Op(at),
                            format!("non-minimal script-number encoding: {}", v.canonical()),
                        );
                    }
                }
                NumRead::Static(n)
            }
        }
    } else if let Some(n) = ctx.pins.get(&v.structural_id()) {
        NumRead::Static(*n)
    } else {
        ctx.constrain(
            ERR_SCRIPTNUM_LENGTH,
            Pos::Op(at),
            Pred::ValidScriptnum(v.clone()),
        );
        if env.effective_minimaldata() {
            ctx.constrain(
                ERR_SCRIPTNUM_MINIMAL,
                Pos::Op(at),
                Pred::MinimalEncoding(v.clone()),
            );
        }
        NumRead::Symbolic
    }
}

/// Read a value as an LE64 operand: exactly eight bytes.
pub fn read_le64(ctx: &mut ExecContext, v: &ValueRef, at: OpPos) -> NumRead {
    ctx.mark_used(v);
    if let Some(bytes) = v.as_bytes() {
        match crate::symbolic::scriptnum::decode_le64(bytes) {
            Some(n) => NumRead::Static(n),
            None => {
                ctx.fail(Failure::single(ERR_LE64_WRONG_SIZE, Pos::Op(at)));
                NumRead::Failed
            }
        }
    } else {
        ctx.constrain(ERR_LE64_WRONG_SIZE, Pos::Op(at), Pred::SizeEq(v.clone(), 8));
        NumRead::Symbolic
    }
}

fn bool_num(v: bool) -> ValueRef {
    if v {
        SymValue::number(1)
    } else {
        SymValue::number(0)
    }
}

pub fn handle_arithmetic(
    ctx: &mut ExecContext,
    env: &SymEnvironment,
    op: OpCode,
    at: OpPos,
) -> StepEffect {
    use OpCode::*;
    match op {
        Add1 | Sub1 | Negate | Abs | Not | NotEqual0 => unary_num(ctx, env, op, at),
        Add | Sub | BoolAnd | BoolOr | NumEqual | NumNotEqual | LessThan | GreaterThan
        | LessThanOrEqual | GreaterThanOrEqual | Min | Max => binary_num(ctx, env, op, at),
        NumEqualVerify => {
            let effect = binary_num(ctx, env, NumEqual, at);
            if !matches!(effect, StepEffect::Done) {
                return effect;
            }
            verify_top(ctx, op, at)
        }
        Within => within(ctx, env, at),
        Size => {
            let v = ctx.peek(0, at);
            ctx.mark_used(&v);
            let size = match v.as_bytes() {
                Some(b) => SymValue::number(b.len() as i64),
                None => op_value(ctx, env, OpTag::Op(Size), vec![v]),
            };
            ctx.push_produced(size, at);
            StepEffect::Done
        }
        Equal => equal(ctx, env, at),
        EqualVerify => {
            let effect = equal(ctx, env, at);
            if !matches!(effect, StepEffect::Done) {
                return effect;
            }
            verify_top(ctx, op, at)
        }
        Cat => cat(ctx, env, at),
        Substr | Left | Right => substr_family(ctx, env, op, at),
        Invert | And | Or | Xor => bitwise(ctx, env, op, at),
        LShift | RShift => shift(ctx, env, op, at),
        Add64 | Sub64 | Mul64 | Div64 | Neg64 => le64_arith(ctx, env, op, at),
        LessThan64 | LessThanOrEqual64 | GreaterThan64 | GreaterThanOrEqual64 => {
            le64_compare(ctx, env, op, at)
        }
        ScriptNumToLe64 | Le64ToScriptNum | Le32ToLe64 => le64_convert(ctx, env, op, at),
        _ => unreachable!("not an arithmetic opcode: {op}"),
    }
}

fn verify_top(ctx: &mut ExecContext, op: OpCode, at: OpPos) -> StepEffect {
    let cond = ctx.pop(at);
    if enforce_true(ctx, op_check_code(op), Pos::Op(at), &cond) {
        StepEffect::Done
    } else {
        StepEffect::Failed
    }
}

fn unary_num(ctx: &mut ExecContext, env: &SymEnvironment, op: OpCode, at: OpPos) -> StepEffect {
    use OpCode::*;
    let a = ctx.pop(at);
    match read_num(ctx, env, &a, at) {
        NumRead::Failed => StepEffect::Failed,
        NumRead::Static(n) => {
            let result = match op {
                Add1 => SymValue::number(n + 1),
                Sub1 => SymValue::number(n - 1),
                Negate => SymValue::number(-n),
                Abs => SymValue::number(n.abs()),
                Not => bool_num(n == 0),
                NotEqual0 => bool_num(n != 0),
                _ => unreachable!(),
            };
            ctx.push_produced(result, at);
            StepEffect::Done
        }
        NumRead::Symbolic => {
            let node = op_value(ctx, env, OpTag::Op(op), vec![a]);
            ctx.push_produced(node, at);
            StepEffect::Done
        }
    }
}

fn binary_num(ctx: &mut ExecContext, env: &SymEnvironment, op: OpCode, at: OpPos) -> StepEffect {
    use OpCode::*;
    let b = ctx.pop(at);
    let a = ctx.pop(at);
    let ra = read_num(ctx, env, &a, at);
    if matches!(ra, NumRead::Failed) {
        return StepEffect::Failed;
    }
    let rb = read_num(ctx, env, &b, at);
    if matches!(rb, NumRead::Failed) {
        return StepEffect::Failed;
    }
    let result = match (ra, rb) {
        (NumRead::Static(x), NumRead::Static(y)) => match op {
            Add => SymValue::number(x + y),
            Sub => SymValue::number(x - y),
            BoolAnd => bool_num(x != 0 && y != 0),
            BoolOr => bool_num(x != 0 || y != 0),
            NumEqual => bool_num(x == y),
            NumNotEqual => bool_num(x != y),
            LessThan => bool_num(x < y),
            GreaterThan => bool_num(x > y),
            LessThanOrEqual => bool_num(x <= y),
            GreaterThanOrEqual => bool_num(x >= y),
            Min => SymValue::number(x.min(y)),
            Max => SymValue::number(x.max(y)),
            _ => unreachable!(),
        },
        _ => op_value(ctx, env, OpTag::Op(op), vec![a, b]),
    };
    ctx.push_produced(result, at);
    StepEffect::Done
}

fn within(ctx: &mut ExecContext, env: &SymEnvironment, at: OpPos) -> StepEffect {
    let max = ctx.pop(at);
    let min = ctx.pop(at);
    let x = ctx.pop(at);
    let mut statics = Vec::new();
    for v in [&x, &min, &max] {
        match read_num(ctx, env, v, at) {
            NumRead::Failed => return StepEffect::Failed,
            NumRead::Static(n) => statics.push(Some(n)),
            NumRead::Symbolic => statics.push(None),
        }
    }
    let result = match (statics[0], statics[1], statics[2]) {
        (Some(v), Some(lo), Some(hi)) => bool_num(v >= lo && v < hi),
        _ => op_value(ctx, env, OpTag::Op(OpCode::Within), vec![x, min, max]),
    };
    ctx.push_produced(result, at);
    StepEffect::Done
}

fn equal(ctx: &mut ExecContext, env: &SymEnvironment, at: OpPos) -> StepEffect {
    let b = ctx.pop(at);
    let a = ctx.pop(at);
    ctx.mark_used(&a);
    ctx.mark_used(&b);
    let result = match (a.as_bytes(), b.as_bytes()) {
        (Some(ab), Some(bb)) => bool_num(ab == bb),
        _ if a == b => bool_num(true),
        _ => op_value(ctx, env, OpTag::Op(OpCode::Equal), vec![a, b]),
    };
    ctx.push_produced(result, at);
    StepEffect::Done
}

fn cat(ctx: &mut ExecContext, env: &SymEnvironment, at: OpPos) -> StepEffect {
    let b = ctx.pop(at);
    let a = ctx.pop(at);
    ctx.mark_used(&a);
    ctx.mark_used(&b);
    match (a.as_bytes(), b.as_bytes()) {
        (Some(ab), Some(bb)) => {
            if ab.len() + bb.len() > MAX_SCRIPT_ELEMENT_SIZE {
                ctx.fail(Failure::single(ERR_DATA_TOO_LONG, Pos::Op(at)));
                return StepEffect::Failed;
            }
            let mut out = ab.to_vec();
            out.extend_from_slice(bb);
            ctx.push_produced(SymValue::literal(out), at);
        }
        _ => {
            let node = op_value(ctx, env, OpTag::Op(OpCode::Cat), vec![a, b]);
            ctx.constrain(
                ERR_DATA_TOO_LONG,
                Pos::Op(at),
                Pred::SizeLe(node.clone(), MAX_SCRIPT_ELEMENT_SIZE as i64),
            );
            ctx.push_produced(node, at);
        }
    }
    StepEffect::Done
}

fn substr_family(
    ctx: &mut ExecContext,
    env: &SymEnvironment,
    op: OpCode,
    at: OpPos,
) -> StepEffect {
    use OpCode::*;
    let (begin, size) = match op {
        Substr => {
            let size = ctx.pop(at);
            let begin = ctx.pop(at);
            (Some(begin), size)
        }
        Left | Right => (None, ctx.pop(at)),
        _ => unreachable!(),
    };
    let data = ctx.pop(at);
    ctx.mark_used(&data);

    let size_n = match read_num(ctx, env, &size, at) {
        NumRead::Static(n) if n >= 0 => Some(n as usize),
        NumRead::Static(_) => {
            ctx.fail(Failure::single(ERR_NEGATIVE_ARGUMENT, Pos::Op(at)));
            return StepEffect::Failed;
        }
        NumRead::Failed => return StepEffect::Failed,
        NumRead::Symbolic => None,
    };
    let begin_n = match &begin {
        None => Some(0usize),
        Some(b) => match read_num(ctx, env, b, at) {
            NumRead::Static(n) if n >= 0 => Some(n as usize),
            NumRead::Static(_) => {
                ctx.fail(Failure::single(ERR_NEGATIVE_ARGUMENT, Pos::Op(at)));
                return StepEffect::Failed;
            }
            NumRead::Failed => return StepEffect::Failed,
            NumRead::Symbolic => None,
        },
    };

    if let (Some(bytes), Some(n), Some(b0)) = (data.as_bytes(), size_n, begin_n) {
        let (lo, hi) = match op {
            Substr => (b0, b0 + n),
            Left => (0, n),
            Right => {
                if n > bytes.len() {
                    ctx.fail(Failure::single(op_invalid_code(op), Pos::Op(at)));
                    return StepEffect::Failed;
                }
                (n, bytes.len())
            }
            _ => unreachable!(),
        };
        if hi > bytes.len() || lo > hi {
            ctx.fail(Failure::single(op_invalid_code(op), Pos::Op(at)));
            return StepEffect::Failed;
        }
        ctx.push_produced(SymValue::literal(bytes[lo..hi].to_vec()), at);
        return StepEffect::Done;
    }

    let mut args = vec![data];
    if let Some(b) = begin {
        args.push(b);
    }
    args.push(size);
    let node = op_value(ctx, env, OpTag::Op(op), args);
    ctx.push_produced(node, at);
    StepEffect::Done
}

fn bitwise(ctx: &mut ExecContext, env: &SymEnvironment, op: OpCode, at: OpPos) -> StepEffect {
    use OpCode::*;
    if op == Invert {
        let a = ctx.pop(at);
        ctx.mark_used(&a);
        match a.as_bytes() {
            Some(bytes) => {
                let out: Vec<u8> = bytes.iter().map(|b| !b).collect();
                ctx.push_produced(SymValue::literal(out), at);
            }
            None => {
                let node = op_value(ctx, env, OpTag::Op(op), vec![a]);
                ctx.push_produced(node, at);
            }
        }
        return StepEffect::Done;
    }
    let b = ctx.pop(at);
    let a = ctx.pop(at);
    ctx.mark_used(&a);
    ctx.mark_used(&b);
    match (a.as_bytes(), b.as_bytes()) {
        (Some(ab), Some(bb)) => {
            if ab.len() != bb.len() {
                ctx.fail(Failure::single(ERR_LENGTH_MISMATCH, Pos::Op(at)));
                return StepEffect::Failed;
            }
            let out: Vec<u8> = ab
                .iter()
                .zip(bb.iter())
                .map(|(x, y)| match op {
                    And => x & y,
                    Or => x | y,
                    Xor => x ^ y,
                    _ => unreachable!(),
                })
                .collect();
            ctx.push_produced(SymValue::literal(out), at);
        }
        _ => {
            let node = op_value(ctx, env, OpTag::Op(op), vec![a.clone(), b.clone()]);
            ctx.constrain(ERR_LENGTH_MISMATCH, Pos::Op(at), Pred::SizesEqual(a, b));
            ctx.push_produced(node, at);
        }
    }
    StepEffect::Done
}

fn shift(ctx: &mut ExecContext, env: &SymEnvironment, op: OpCode, at: OpPos) -> StepEffect {
    let n = ctx.pop(at);
    let data = ctx.pop(at);
    ctx.mark_used(&data);
    let shift_n = match read_num(ctx, env, &n, at) {
        NumRead::Static(v) if v >= 0 => Some(v as u64),
        NumRead::Static(_) => {
            ctx.fail(Failure::single(ERR_NEGATIVE_ARGUMENT, Pos::Op(at)));
            return StepEffect::Failed;
        }
        NumRead::Failed => return StepEffect::Failed,
        NumRead::Symbolic => None,
    };
    if let (Some(bytes), Some(k)) = (data.as_bytes(), shift_n) {
        // Shifts act on the little-endian integer reading of the bytes; the
        // result drops leading zero bytes.
        let blob = BigUint::from_bytes_le(bytes);
        let shifted = match op {
            OpCode::LShift => blob << k as usize,
            OpCode::RShift => blob >> k as usize,
            _ => unreachable!(),
        };
        let out = if shifted == BigUint::from(0u8) {
            Vec::new()
        } else {
            shifted.to_bytes_le()
        };
        if out.len() > MAX_SCRIPT_ELEMENT_SIZE {
            ctx.fail(Failure::single(ERR_DATA_TOO_LONG, Pos::Op(at)));
            return StepEffect::Failed;
        }
        ctx.push_produced(SymValue::literal(out), at);
        return StepEffect::Done;
    }
    let node = op_value(ctx, env, OpTag::Op(op), vec![data, n]);
    ctx.push_produced(node, at);
    StepEffect::Done
}

/// The Elements 64-bit operations push their result plus a success flag and
/// fork: one arm inside the int64 range, one arm overflowing (which pushes
/// only the false flag).
fn le64_arith(ctx: &mut ExecContext, env: &SymEnvironment, op: OpCode, at: OpPos) -> StepEffect {
    use OpCode::*;
    let (b, a) = if op == Neg64 {
        (None, ctx.pop(at))
    } else {
        let b = ctx.pop(at);
        (Some(b), ctx.pop(at))
    };
    let ra = match read_le64(ctx, &a, at) {
        NumRead::Failed => return StepEffect::Failed,
        other => other,
    };
    let rb = match &b {
        None => None,
        Some(bv) => match read_le64(ctx, bv, at) {
            NumRead::Failed => return StepEffect::Failed,
            other => Some(other),
        },
    };

    // Fully static: fold, treating overflow as invalid arguments.
    if let (NumRead::Static(x), None | Some(NumRead::Static(_))) = (&ra, &rb) {
        let y = match &rb {
            Some(NumRead::Static(y)) => Some(*y),
            _ => None,
        };
        let outcome = match (op, y) {
            (Add64, Some(y)) => x.checked_add(y).map(|r| vec![r]),
            (Sub64, Some(y)) => x.checked_sub(y).map(|r| vec![r]),
            (Mul64, Some(y)) => x.checked_mul(y).map(|r| vec![r]),
            (Div64, Some(y)) => {
                if y == 0 {
                    None
                } else {
                    let q = x.div_euclid(y);
                    let r = x.rem_euclid(y);
                    Some(vec![r, q])
                }
            }
            (Neg64, None) => x.checked_neg().map(|r| vec![r]),
            _ => unreachable!(),
        };
        return match outcome {
            Some(results) => {
                for r in results {
                    ctx.push_produced(SymValue::le64(r), at);
                }
                ctx.push_produced(SymValue::number(1), at);
                StepEffect::Done
            }
            None => {
                ctx.fail(Failure::single(ERR_INVALID_ARGUMENTS, Pos::Op(at)));
                StepEffect::Failed
            }
        };
    }

    let mut args = vec![a.clone()];
    if let Some(bv) = &b {
        args.push(bv.clone());
    }
    let result = op_value(ctx, env, OpTag::Op(op), args.clone());
    let rendered = result.canonical();
    let mut ok_pushes = vec![result.clone()];
    if op == Div64 {
        // Remainder below quotient; both are projections of the same node.
        let rem = op_value(ctx, env, OpTag::TxField("REM64"), args);
        ok_pushes.insert(0, rem);
    }
    ok_pushes.push(SymValue::number(1));

    let decisions = vec![
        BranchDecision {
            label: BranchLabel {
                op: op.name().to_string(),
                arg: None,
                pos: at,
                choice: "True".to_string(),
                cond_str: format!("{rendered} in int64 range"),
            },
            constraint: Some((
                ERR_INT64_OUT_OF_BOUNDS.to_string(),
                Pred::Int64InBounds(result.clone()),
            )),
            mutation: Mutation::PushValues(ok_pushes),
        },
        BranchDecision {
            label: BranchLabel {
                op: op.name().to_string(),
                arg: None,
                pos: at,
                choice: "False".to_string(),
                cond_str: format!("not {rendered} in int64 range"),
            },
            constraint: Some((
                ERR_INT64_OUT_OF_BOUNDS.to_string(),
                Pred::Int64OutOfBounds(result),
            )),
            mutation: Mutation::PushValues(vec![SymValue::number(0)]),
        },
    ];
    StepEffect::Branch(decisions)
}

fn le64_compare(ctx: &mut ExecContext, env: &SymEnvironment, op: OpCode, at: OpPos) -> StepEffect {
    use OpCode::*;
    let b = ctx.pop(at);
    let a = ctx.pop(at);
    let ra = read_le64(ctx, &a, at);
    if matches!(ra, NumRead::Failed) {
        return StepEffect::Failed;
    }
    let rb = read_le64(ctx, &b, at);
    if matches!(rb, NumRead::Failed) {
        return StepEffect::Failed;
    }
    let result = match (ra, rb) {
        (NumRead::Static(x), NumRead::Static(y)) => bool_num(match op {
            LessThan64 => x < y,
            LessThanOrEqual64 => x <= y,
            GreaterThan64 => x > y,
            GreaterThanOrEqual64 => x >= y,
            _ => unreachable!(),
        }),
        _ => op_value(ctx, env, OpTag::Op(op), vec![a, b]),
    };
    ctx.push_produced(result, at);
    StepEffect::Done
}

fn le64_convert(ctx: &mut ExecContext, env: &SymEnvironment, op: OpCode, at: OpPos) -> StepEffect {
    use OpCode::*;
    let a = ctx.pop(at);
    match op {
        ScriptNumToLe64 => match read_num(ctx, env, &a, at) {
            NumRead::Failed => StepEffect::Failed,
            NumRead::Static(n) => {
                ctx.push_produced(SymValue::le64(n), at);
                StepEffect::Done
            }
            NumRead::Symbolic => {
                let node = op_value(ctx, env, OpTag::Op(op), vec![a]);
                ctx.push_produced(node, at);
                StepEffect::Done
            }
        },
        Le64ToScriptNum => match read_le64(ctx, &a, at) {
            NumRead::Failed => StepEffect::Failed,
            NumRead::Static(n) => {
                if n.abs() > i32::MAX as i64 {
                    ctx.fail(Failure::single(ERR_INVALID_ARGUMENTS, Pos::Op(at)));
                    return StepEffect::Failed;
                }
                ctx.push_produced(SymValue::number(n), at);
                StepEffect::Done
            }
            NumRead::Symbolic => {
                let node = op_value(ctx, env, OpTag::Op(op), vec![a]);
                ctx.constrain(
                    ERR_INT64_OUT_OF_BOUNDS,
                    Pos::Op(at),
                    Pred::NumInRange(node.clone(), -(i32::MAX as i64), i32::MAX as i64),
                );
                ctx.push_produced(node, at);
                StepEffect::Done
            }
        },
        Le32ToLe64 => {
            ctx.mark_used(&a);
            match a.as_bytes() {
                Some(bytes) => match crate::symbolic::scriptnum::decode_le32(bytes) {
                    Some(v) => {
                        ctx.push_produced(SymValue::le64(v as i64), at);
                        StepEffect::Done
                    }
                    None => {
                        ctx.fail(Failure::single(ERR_LE64_WRONG_SIZE, Pos::Op(at)));
                        StepEffect::Failed
                    }
                },
                None => {
                    ctx.constrain(
                        ERR_LE64_WRONG_SIZE,
                        Pos::Op(at),
                        Pred::SizeEq(a.clone(), 4),
                    );
                    let node = op_value(ctx, env, OpTag::Op(op), vec![a]);
                    ctx.push_produced(node, at);
                    StepEffect::Done
                }
            }
        }
        _ => unreachable!(),
    }
}
