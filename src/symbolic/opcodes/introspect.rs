//! Elements transaction introspection. Every pushed item is an opaque model
//! variable of the transaction environment: a named `TxVar` when the index
//! is statically known (`INPUT_1_SEQUENCE`), or an operator node over the
//! symbolic index (`INPUT_SEQUENCE(wit0)`). Field-specific axioms (sizes,
//! prefix domains, money range) are attached by the SMT lowering.

use crate::config::SymEnvironment;
use crate::script::opcode::OpCode;
use crate::symbolic::error::*;
use crate::symbolic::opcodes::{op_value, StepEffect};
use crate::symbolic::state::{ExecContext, Failure, Pred};
use crate::symbolic::value::{OpPos, OpTag, Pos, SymValue, ValueRef};

/// Field name sets pushed by one introspection opcode, deepest first.
fn input_fields(op: OpCode) -> &'static [&'static str] {
    use OpCode::*;
    match op {
        InspectInputOutpoint => &["OUTPOINT_HASH", "OUTPOINT_PREVOUT_N", "OUTPOINT_FLAG"],
        InspectInputAsset => &["ASSET", "ASSET_PREFIX"],
        InspectInputValue => &["VALUE", "VALUE_PREFIX"],
        InspectInputScriptPubKey => &["SPK_WITPROG", "SPK_WITVER"],
        InspectInputSequence => &["SEQUENCE"],
        InspectInputIssuance => &[
            "ISSUANCE_INFLATIONKEYS",
            "ISSUANCE_INFLATIONKEYS_PREFIX",
            "ISSUANCE_AMOUNT",
            "ISSUANCE_AMOUNT_PREFIX",
            "ISSUANCE_ASSETENTROPY",
            "ISSUANCE_ASSETBLINDINGNONCE",
        ],
        InspectOutputAsset => &["ASSET", "ASSET_PREFIX"],
        InspectOutputValue => &["VALUE", "VALUE_PREFIX"],
        InspectOutputNonce => &["NONCE"],
        InspectOutputScriptPubKey => &["SPK_WITPROG", "SPK_WITVER"],
        _ => &[],
    }
}

/// Display tag for a field addressed by a symbolic index.
fn dynamic_field_tag(output: bool, field: &str) -> &'static str {
    match (output, field) {
        (false, "OUTPOINT_HASH") => "INPUT_OUTPOINT_HASH",
        (false, "OUTPOINT_PREVOUT_N") => "INPUT_OUTPOINT_PREVOUT_N",
        (false, "OUTPOINT_FLAG") => "INPUT_OUTPOINT_FLAG",
        (false, "ASSET") => "INPUT_ASSET",
        (false, "ASSET_PREFIX") => "INPUT_ASSET_PREFIX",
        (false, "VALUE") => "INPUT_VALUE",
        (false, "VALUE_PREFIX") => "INPUT_VALUE_PREFIX",
        (false, "SPK_WITPROG") => "INPUT_SPK_WITPROG",
        (false, "SPK_WITVER") => "INPUT_SPK_WITVER",
        (false, "SEQUENCE") => "INPUT_SEQUENCE",
        (false, "ISSUANCE_INFLATIONKEYS") => "INPUT_ISSUANCE_INFLATIONKEYS",
        (false, "ISSUANCE_INFLATIONKEYS_PREFIX") => "INPUT_ISSUANCE_INFLATIONKEYS_PREFIX",
        (false, "ISSUANCE_AMOUNT") => "INPUT_ISSUANCE_AMOUNT",
        (false, "ISSUANCE_AMOUNT_PREFIX") => "INPUT_ISSUANCE_AMOUNT_PREFIX",
        (false, "ISSUANCE_ASSETENTROPY") => "INPUT_ISSUANCE_ASSETENTROPY",
        (false, "ISSUANCE_ASSETBLINDINGNONCE") => "INPUT_ISSUANCE_ASSETBLINDINGNONCE",
        (true, "ASSET") => "OUTPUT_ASSET",
        (true, "ASSET_PREFIX") => "OUTPUT_ASSET_PREFIX",
        (true, "VALUE") => "OUTPUT_VALUE",
        (true, "VALUE_PREFIX") => "OUTPUT_VALUE_PREFIX",
        (true, "NONCE") => "OUTPUT_NONCE",
        (true, "SPK_WITPROG") => "OUTPUT_SPK_WITPROG",
        (true, "SPK_WITVER") => "OUTPUT_SPK_WITVER",
        _ => "TX_FIELD",
    }
}

fn is_output_op(op: OpCode) -> bool {
    use OpCode::*;
    matches!(
        op,
        InspectOutputAsset | InspectOutputValue | InspectOutputNonce | InspectOutputScriptPubKey
    )
}

pub fn handle_introspect(
    ctx: &mut ExecContext,
    env: &SymEnvironment,
    op: OpCode,
    at: OpPos,
) -> StepEffect {
    use OpCode::*;
    match op {
        InspectVersion => {
            ctx.push_produced(SymValue::tx_var("TX_VERSION"), at);
            StepEffect::Done
        }
        InspectLockTime => {
            ctx.push_produced(SymValue::tx_var("TX_LOCKTIME"), at);
            StepEffect::Done
        }
        InspectNumInputs => {
            ctx.push_produced(SymValue::tx_var("NUM_INPUTS"), at);
            StepEffect::Done
        }
        InspectNumOutputs => {
            ctx.push_produced(SymValue::tx_var("NUM_OUTPUTS"), at);
            StepEffect::Done
        }
        PushCurrentInputIndex => {
            ctx.push_produced(SymValue::tx_var("CURRENT_INPUT_INDEX"), at);
            StepEffect::Done
        }
        TxWeight => {
            ctx.push_produced(SymValue::tx_var("TX_WEIGHT"), at);
            StepEffect::Done
        }
        _ => indexed_inspect(ctx, env, op, at),
    }
}

fn indexed_inspect(
    ctx: &mut ExecContext,
    env: &SymEnvironment,
    op: OpCode,
    at: OpPos,
) -> StepEffect {
    let idx = ctx.pop(at);
    ctx.mark_used(&idx);
    let output = is_output_op(op);
    let (kind, counter, max_static) = if output {
        ("OUTPUT", "NUM_OUTPUTS", env.max_num_outputs)
    } else {
        ("INPUT", "NUM_INPUTS", env.max_num_inputs)
    };

    let max_size = crate::symbolic::scriptnum::MAX_SCRIPTNUM_SIZE;
    let static_idx = ctx.static_num(&idx, env.minimaldata_flag_strict, max_size);
    match static_idx {
        Some(i) if i < 0 => {
            ctx.fail(Failure::single(ERR_NEGATIVE_ARGUMENT, Pos::Op(at)));
            return StepEffect::Failed;
        }
        Some(i) if i as u64 >= max_static => {
            ctx.fail(Failure::single(ERR_ARGUMENT_ABOVE_BOUNDS, Pos::Op(at)));
            return StepEffect::Failed;
        }
        Some(_) => {}
        None => {
            let zero = SymValue::number(0);
            let ge0 = op_value(
                ctx,
                env,
                OpTag::Op(OpCode::GreaterThanOrEqual),
                vec![idx.clone(), zero],
            );
            ctx.constrain(ERR_NEGATIVE_ARGUMENT, Pos::Op(at), Pred::IsTrue(ge0));
        }
    }
    // The index must address an existing input/output even when static: the
    // transaction model decides how many exist.
    let counter_var = SymValue::tx_var(counter);
    let in_bounds = op_value(
        ctx,
        env,
        OpTag::Op(OpCode::LessThan),
        vec![idx.clone(), counter_var],
    );
    ctx.constrain(ERR_ARGUMENT_ABOVE_BOUNDS, Pos::Op(at), Pred::IsTrue(in_bounds));

    let mut money_targets: Vec<ValueRef> = Vec::new();
    for field in input_fields(op) {
        let value = match static_idx {
            Some(i) => SymValue::tx_var(format!("{kind}_{i}_{field}")),
            None => {
                let tag = dynamic_field_tag(output, field);
                op_value(ctx, env, OpTag::TxField(tag), vec![idx.clone()])
            }
        };
        if field.ends_with("VALUE") || field.ends_with("AMOUNT") {
            money_targets.push(value.clone());
        }
        ctx.push_produced(value, at);
    }
    for target in money_targets {
        ctx.constrain(
            ERR_OUT_OF_MONEY_RANGE,
            Pos::Op(at),
            Pred::MoneyRange(target),
        );
    }
    StepEffect::Done
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at() -> OpPos {
        OpPos { pc: 0, line: 1 }
    }

    fn env() -> SymEnvironment {
        let mut env = SymEnvironment::default();
        env.is_elements = true;
        env.sigversion = crate::config::SigVersion::Tapscript;
        env
    }

    #[test]
    fn static_index_names_the_model_variable() {
        let mut ctx = ExecContext::new();
        ctx.push(SymValue::number(1));
        handle_introspect(&mut ctx, &env(), OpCode::InspectOutputValue, at());
        assert_eq!(ctx.stack.len(), 2);
        assert_eq!(ctx.stack[0].canonical(), "OUTPUT_1_VALUE");
        assert_eq!(ctx.stack[1].canonical(), "OUTPUT_1_VALUE_PREFIX");
    }

    #[test]
    fn symbolic_index_builds_field_nodes() {
        let mut ctx = ExecContext::new();
        handle_introspect(&mut ctx, &env(), OpCode::InspectOutputValue, at());
        assert_eq!(ctx.stack[0].canonical(), "OUTPUT_VALUE(wit0)");
        assert_eq!(ctx.stack[1].canonical(), "OUTPUT_VALUE_PREFIX(wit0)");
    }

    #[test]
    fn out_of_range_static_index_fails() {
        let mut ctx = ExecContext::new();
        ctx.push(SymValue::number(500));
        match handle_introspect(&mut ctx, &env(), OpCode::InspectInputSequence, at()) {
            StepEffect::Failed => {}
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn outpoint_pushes_flag_on_top() {
        let mut ctx = ExecContext::new();
        ctx.push(SymValue::number(0));
        handle_introspect(&mut ctx, &env(), OpCode::InspectInputOutpoint, at());
        assert_eq!(ctx.stack.len(), 3);
        assert_eq!(ctx.stack[2].canonical(), "INPUT_0_OUTPOINT_FLAG");
    }

    #[test]
    fn no_arg_inspections_push_named_vars() {
        let mut ctx = ExecContext::new();
        handle_introspect(&mut ctx, &env(), OpCode::TxWeight, at());
        assert_eq!(ctx.stack[0].canonical(), "TX_WEIGHT");
    }
}
