//! Cryptographic transfer functions. Hashes become uninterpreted-function
//! nodes (never computed concretely); statically known signatures and public
//! keys are validated for encoding per the active flags. Signature-check
//! results with statically known arguments feed a per-path fact table so
//! contradictory enforcements are caught without a solver.

use crate::config::{SigVersion, SymEnvironment};
use crate::script::opcode::OpCode;
use crate::symbolic::error::*;
use crate::symbolic::opcodes::{op_value, DynAccess, DynRole, StepEffect};
use crate::symbolic::scriptnum::MAX_PUBKEYS_PER_MULTISIG;
use crate::symbolic::state::{ExecContext, Failure, Pred};
use crate::symbolic::value::{OpPos, OpTag, Pos, SymValue, ValueRef};

pub fn handle_crypto(
    ctx: &mut ExecContext,
    env: &SymEnvironment,
    op: OpCode,
    at: OpPos,
) -> StepEffect {
    use OpCode::*;
    match op {
        Ripemd160 | Sha1 | Sha256 | Hash160 | Hash256 => {
            let v = ctx.pop(at);
            let node = op_value(ctx, env, OpTag::Op(op), vec![v]);
            ctx.push_produced(node, at);
            StepEffect::Done
        }
        Sha256Initialize => {
            let v = ctx.pop(at);
            let node = op_value(ctx, env, OpTag::Op(op), vec![v]);
            ctx.push_produced(node, at);
            StepEffect::Done
        }
        Sha256Update | Sha256Finalize => {
            let data = ctx.pop(at);
            let hash_ctx = ctx.pop(at);
            let node = op_value(ctx, env, OpTag::Op(op), vec![hash_ctx, data]);
            ctx.push_produced(node, at);
            StepEffect::Done
        }
        CheckSig => checksig(ctx, env, at),
        CheckSigVerify => {
            let effect = checksig(ctx, env, at);
            if !matches!(effect, StepEffect::Done) {
                return effect;
            }
            verify_top(ctx, op, at)
        }
        CheckSigAdd => checksigadd(ctx, env, at),
        CheckSigFromStack => checksigfromstack(ctx, env, at),
        CheckSigFromStackVerify => {
            let effect = checksigfromstack(ctx, env, at);
            if !matches!(effect, StepEffect::Done) {
                return effect;
            }
            verify_top(ctx, op, at)
        }
        CheckMultisig => checkmultisig(ctx, env, at),
        CheckMultisigVerify => {
            let effect = checkmultisig(ctx, env, at);
            if !matches!(effect, StepEffect::Done) {
                return effect;
            }
            verify_top(ctx, op, at)
        }
        _ => unreachable!("not a crypto opcode: {op}"),
    }
}

fn verify_top(ctx: &mut ExecContext, op: OpCode, at: OpPos) -> StepEffect {
    let cond = ctx.pop(at);
    if crate::symbolic::opcodes::enforce_true(ctx, op_check_code(op), Pos::Op(at), &cond) {
        StepEffect::Done
    } else {
        StepEffect::Failed
    }
}

fn checksig(ctx: &mut ExecContext, env: &SymEnvironment, at: OpPos) -> StepEffect {
    let pubkey = ctx.pop(at);
    let sig = ctx.pop(at);
    ctx.mark_used(&pubkey);
    ctx.mark_used(&sig);
    if !validate_static_pubkey(ctx, env, &pubkey, at) || !validate_static_sig(ctx, env, &sig, at) {
        return StepEffect::Failed;
    }
    let result = if sig.as_bytes().map(|b| b.is_empty()) == Some(true) {
        SymValue::number(0)
    } else {
        let node = op_value(ctx, env, OpTag::Op(OpCode::CheckSig), vec![sig.clone(), pubkey]);
        if env.nullfail_flag {
            ctx.constrain(
                ERR_NULLFAIL,
                Pos::Op(at),
                Pred::NullfailImplies {
                    result: node.clone(),
                    sig,
                },
            );
        }
        node
    };
    ctx.push_produced(result, at);
    StepEffect::Done
}

fn checksigadd(ctx: &mut ExecContext, env: &SymEnvironment, at: OpPos) -> StepEffect {
    let pubkey = ctx.pop(at);
    let n = ctx.pop(at);
    let sig = ctx.pop(at);
    ctx.mark_used(&pubkey);
    ctx.mark_used(&sig);
    match crate::symbolic::opcodes::arithmetic::read_num(ctx, env, &n, at) {
        crate::symbolic::opcodes::arithmetic::NumRead::Failed => return StepEffect::Failed,
        _ => {}
    }
    if !validate_static_pubkey(ctx, env, &pubkey, at) || !validate_static_sig(ctx, env, &sig, at) {
        return StepEffect::Failed;
    }
    let node = op_value(
        ctx,
        env,
        OpTag::Op(OpCode::CheckSigAdd),
        vec![sig, n, pubkey],
    );
    ctx.push_produced(node, at);
    StepEffect::Done
}

fn checksigfromstack(ctx: &mut ExecContext, env: &SymEnvironment, at: OpPos) -> StepEffect {
    let pubkey = ctx.pop(at);
    let msg = ctx.pop(at);
    let sig = ctx.pop(at);
    ctx.mark_used(&pubkey);
    ctx.mark_used(&msg);
    ctx.mark_used(&sig);
    if !validate_static_pubkey(ctx, env, &pubkey, at) || !validate_static_sig_raw(ctx, env, &sig, at)
    {
        return StepEffect::Failed;
    }
    let result = if sig.as_bytes().map(|b| b.is_empty()) == Some(true) {
        SymValue::number(0)
    } else {
        let node = op_value(
            ctx,
            env,
            OpTag::Op(OpCode::CheckSigFromStack),
            vec![sig.clone(), msg, pubkey],
        );
        if env.nullfail_flag {
            ctx.constrain(
                ERR_NULLFAIL,
                Pos::Op(at),
                Pred::NullfailImplies {
                    result: node.clone(),
                    sig,
                },
            );
        }
        node
    };
    ctx.push_produced(result, at);
    StepEffect::Done
}

fn checkmultisig(ctx: &mut ExecContext, env: &SymEnvironment, at: OpPos) -> StepEffect {
    let num_keys_v = ctx.pop(at);
    ctx.mark_used(&num_keys_v);
    let max_size = crate::symbolic::scriptnum::MAX_SCRIPTNUM_SIZE;
    let Some(num_keys) = ctx.static_num(&num_keys_v, env.minimaldata_flag_strict, max_size) else {
        return StepEffect::Dynamic(DynAccess {
            op: OpCode::CheckMultisig,
            index: num_keys_v,
            role: DynRole::MultisigNumKeys,
            max_value: Some(MAX_PUBKEYS_PER_MULTISIG),
        });
    };
    if !(0..=MAX_PUBKEYS_PER_MULTISIG).contains(&num_keys) {
        ctx.fail(Failure::single(
            op_invalid_code(OpCode::CheckMultisig),
            Pos::Op(at),
        ));
        return StepEffect::Failed;
    }
    let mut keys = Vec::with_capacity(num_keys as usize);
    for _ in 0..num_keys {
        let key = ctx.pop(at);
        ctx.mark_used(&key);
        if !validate_static_pubkey(ctx, env, &key, at) {
            return StepEffect::Failed;
        }
        keys.push(key);
    }
    let num_sigs_v = ctx.pop(at);
    ctx.mark_used(&num_sigs_v);
    let Some(num_sigs) = ctx.static_num(&num_sigs_v, env.minimaldata_flag_strict, max_size) else {
        return StepEffect::Dynamic(DynAccess {
            op: OpCode::CheckMultisig,
            index: num_sigs_v,
            role: DynRole::MultisigNumSigs,
            max_value: Some(num_keys),
        });
    };
    if !(0..=num_keys).contains(&num_sigs) {
        ctx.fail(Failure::single(
            op_invalid_code(OpCode::CheckMultisig),
            Pos::Op(at),
        ));
        return StepEffect::Failed;
    }
    let mut sigs = Vec::with_capacity(num_sigs as usize);
    for _ in 0..num_sigs {
        let sig = ctx.pop(at);
        ctx.mark_used(&sig);
        if !validate_static_sig(ctx, env, &sig, at) {
            return StepEffect::Failed;
        }
        sigs.push(sig);
    }
    // The consensus bug byte: popped, and required empty under NULLDUMMY.
    let dummy = ctx.pop(at);
    ctx.mark_used(&dummy);
    if env.nulldummy_flag {
        match dummy.as_bytes() {
            Some(b) if !b.is_empty() => {
                ctx.fail(Failure::single(ERR_BUGBYTE, Pos::Op(at)));
                return StepEffect::Failed;
            }
            Some(_) => {}
            None => {
                ctx.constrain(ERR_BUGBYTE, Pos::Op(at), Pred::SizeEq(dummy.clone(), 0));
            }
        }
    }

    let mut args = vec![num_keys_v];
    args.extend(keys);
    args.push(num_sigs_v);
    args.extend(sigs);
    let result = op_value(ctx, env, OpTag::Op(OpCode::CheckMultisig), args);
    if num_sigs == 0 {
        // Zero required signatures: the check trivially succeeds.
        ctx.constrain(
            op_check_code(OpCode::CheckMultisig),
            Pos::Op(at),
            Pred::NumEq(result.clone(), 1),
        );
    }
    ctx.push_produced(result, at);
    StepEffect::Done
}

/// Record a statically-determined signature-check outcome that just became
/// enforced; detects contradictions between same-path sibling checks.
/// Called from the VERIFY-class enforcement path.
pub fn track_sig_enforcement(ctx: &mut ExecContext, cond: &ValueRef, pos: Pos) {
    let (node, outcome) = match cond.op_tag() {
        Some(OpTag::Op(OpCode::Not)) => match cond.op_args().first() {
            Some(inner) => (inner.clone(), false),
            None => return,
        },
        Some(OpTag::Bool) => match cond.op_args().first() {
            Some(inner) => (inner.clone(), true),
            None => return,
        },
        _ => (cond.clone(), true),
    };
    let (node, outcome) = match node.op_tag() {
        Some(OpTag::Op(OpCode::Not)) => match node.op_args().first() {
            Some(inner) => (inner.clone(), !outcome),
            None => return,
        },
        _ => (node, outcome),
    };
    let is_sig_check = matches!(
        node.op_tag(),
        Some(OpTag::Op(
            OpCode::CheckSig | OpCode::CheckSigVerify | OpCode::CheckSigFromStack
                | OpCode::CheckSigFromStackVerify
        ))
    );
    if !is_sig_check {
        return;
    }
    let args = node.op_args();
    let (Some(sig), Some(pubkey)) = (args.first(), args.last()) else {
        return;
    };
    if !sig.is_static() || !pubkey.is_static() {
        return;
    }
    let key = (sig.structural_id(), pubkey.structural_id());
    if let Some(prev) = ctx.sig_facts.get(&key) {
        if *prev != outcome {
            ctx.fail(Failure::single(ERR_KNOWN_ARGS_DIFFERENT_RESULT, pos));
            return;
        }
    }
    ctx.sig_facts.insert(key, outcome);

    // A signature body verifying as true under two different hashtype bytes
    // would mean one signature covers two distinct messages.
    if outcome {
        if let Some(bytes) = sig.as_bytes() {
            if bytes.len() > 1 {
                let body = &bytes[..bytes.len() - 1];
                let mut hasher = std::collections::hash_map::DefaultHasher::new();
                use std::hash::{Hash, Hasher};
                body.hash(&mut hasher);
                let body_key = (hasher.finish(), pubkey.structural_id());
                if let Some(prev_full) = ctx.sig_true_bodies.get(&body_key) {
                    if *prev_full != sig.structural_id() {
                        ctx.fail(Failure::single(ERR_KNOWN_RESULT_DIFFERENT_ARGS, pos));
                        return;
                    }
                }
                ctx.sig_true_bodies.insert(body_key, sig.structural_id());
            }
        }
    }
}

fn validate_static_pubkey(
    ctx: &mut ExecContext,
    env: &SymEnvironment,
    pubkey: &ValueRef,
    at: OpPos,
) -> bool {
    let Some(bytes) = pubkey.as_bytes() else {
        return true;
    };
    let ok = match env.sigversion {
        SigVersion::Tapscript => {
            if bytes.len() == 32 {
                true
            } else {
                // Unknown pubkey type: upgradeable unless discouraged.
                !env.discourage_upgradeable_pubkey_type_flag
            }
        }
        SigVersion::WitnessV0 if env.witness_pubkeytype_flag => {
            bytes.len() == 33 && matches!(bytes[0], 0x02 | 0x03)
        }
        _ => {
            if env.strictenc_flag {
                matches!(
                    (bytes.len(), bytes.first()),
                    (33, Some(0x02 | 0x03)) | (65, Some(0x04))
                )
            } else {
                true
            }
        }
    };
    if !ok {
        ctx.fail(Failure::single(ERR_PUBKEY_ENCODING, Pos::Op(at)));
    }
    ok
}

/// Validate a statically known signature with an appended hashtype byte
/// (CHECKSIG-family). Empty signatures are valid encodings that fail the
/// check.
fn validate_static_sig(
    ctx: &mut ExecContext,
    env: &SymEnvironment,
    sig: &ValueRef,
    at: OpPos,
) -> bool {
    let Some(bytes) = sig.as_bytes() else {
        return true;
    };
    if bytes.is_empty() {
        return true;
    }
    if env.sigversion == SigVersion::Tapscript {
        return match bytes.len() {
            64 => true,
            65 => {
                if bytes[64] == 0x01 {
                    ctx.fail(Failure::single(ERR_SIG_EXPLICIT_SIGHASH_ALL, Pos::Op(at)));
                    false
                } else if matches!(bytes[64], 0x02 | 0x03 | 0x81 | 0x82 | 0x83) {
                    true
                } else {
                    ctx.fail(Failure::single(ERR_SIG_BAD_HASHTYPE, Pos::Op(at)));
                    false
                }
            }
            _ => {
                ctx.fail(Failure::single(ERR_SIG_LENGTH, Pos::Op(at)));
                false
            }
        };
    }
    if bytes.len() < 2 {
        ctx.fail(Failure::single(ERR_SIG_LENGTH, Pos::Op(at)));
        return false;
    }
    let hashtype = bytes[bytes.len() - 1];
    if env.strictenc_flag && !matches!(hashtype & 0x7f, 0x01 | 0x02 | 0x03) {
        ctx.fail(Failure::single(ERR_SIG_BAD_HASHTYPE, Pos::Op(at)));
        return false;
    }
    validate_der(ctx, env, &bytes[..bytes.len() - 1], at)
}

/// Raw (no hashtype byte) signature as used by CHECKSIGFROMSTACK.
fn validate_static_sig_raw(
    ctx: &mut ExecContext,
    env: &SymEnvironment,
    sig: &ValueRef,
    at: OpPos,
) -> bool {
    let Some(bytes) = sig.as_bytes() else {
        return true;
    };
    if bytes.is_empty() {
        return true;
    }
    if env.sigversion == SigVersion::Tapscript {
        if bytes.len() != 64 {
            ctx.fail(Failure::single(ERR_SIG_LENGTH, Pos::Op(at)));
            return false;
        }
        return true;
    }
    validate_der(ctx, env, bytes, at)
}

/// DER structure check plus LOW_S, matching the encoding-only scope of the
/// analysis (no curve math).
fn validate_der(ctx: &mut ExecContext, env: &SymEnvironment, der: &[u8], at: OpPos) -> bool {
    // secp256k1 group order halved, big-endian.
    const HALF_ORDER: [u8; 32] = [
        0x7f, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
        0xff, 0x5d, 0x57, 0x6e, 0x73, 0x57, 0xa4, 0x50, 0x1d, 0xdf, 0xe9, 0x2f, 0x46, 0x68, 0x1b,
        0x20, 0xa0,
    ];
    if der.len() < 8 || der.len() > 72 {
        ctx.fail(Failure::single(ERR_SIG_LENGTH, Pos::Op(at)));
        return false;
    }
    let bad = |ctx: &mut ExecContext| {
        ctx.fail(Failure::single(ERR_SIG_ENCODING, Pos::Op(at)));
        false
    };
    if der[0] != 0x30 || der[1] as usize != der.len() - 2 {
        return bad(ctx);
    }
    if der[2] != 0x02 {
        return bad(ctx);
    }
    let rlen = der[3] as usize;
    if rlen == 0 || 4 + rlen + 2 > der.len() {
        return bad(ctx);
    }
    let s_off = 4 + rlen;
    if der[s_off] != 0x02 {
        return bad(ctx);
    }
    let slen = der[s_off + 1] as usize;
    if slen == 0 || s_off + 2 + slen != der.len() {
        return bad(ctx);
    }
    let r = &der[4..4 + rlen];
    let s = &der[s_off + 2..];
    // No negative or padded integers.
    if r[0] & 0x80 != 0 || s[0] & 0x80 != 0 {
        return bad(ctx);
    }
    if rlen > 1 && r[0] == 0 && r[1] & 0x80 == 0 {
        return bad(ctx);
    }
    if slen > 1 && s[0] == 0 && s[1] & 0x80 == 0 {
        return bad(ctx);
    }
    if env.low_s_flag {
        let high = if s.len() > 32 {
            true
        } else {
            let mut padded = [0u8; 32];
            padded[32 - s.len()..].copy_from_slice(s);
            padded > HALF_ORDER
        };
        if high {
            ctx.fail(Failure::single(ERR_SIG_LOW_S, Pos::Op(at)));
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at() -> OpPos {
        OpPos { pc: 0, line: 1 }
    }

    fn tap_env() -> SymEnvironment {
        let mut env = SymEnvironment::default();
        env.is_elements = true;
        env.sigversion = SigVersion::Tapscript;
        env
    }

    #[test]
    fn hash_builds_a_node() {
        let mut ctx = ExecContext::new();
        handle_crypto(&mut ctx, &SymEnvironment::default(), OpCode::Sha256, at());
        assert_eq!(ctx.stack[0].canonical(), "SHA256(wit0)");
    }

    #[test]
    fn checksig_on_empty_sig_is_statically_false() {
        let mut ctx = ExecContext::new();
        ctx.push(SymValue::literal(vec![]));
        ctx.push(SymValue::literal(vec![0x02; 33]));
        handle_crypto(&mut ctx, &SymEnvironment::default(), OpCode::CheckSig, at());
        assert_eq!(ctx.stack[0].canonical(), "0");
    }

    #[test]
    fn symbolic_checksig_publishes_nullfail() {
        let mut ctx = ExecContext::new();
        handle_crypto(&mut ctx, &SymEnvironment::default(), OpCode::CheckSig, at());
        assert_eq!(ctx.stack[0].canonical(), "CHECKSIG(wit1, wit0)");
        assert!(ctx
            .constraints
            .iter()
            .any(|c| c.code == ERR_NULLFAIL));
    }

    #[test]
    fn bad_static_pubkey_fails_under_strictenc() {
        let mut ctx = ExecContext::new();
        ctx.push(SymValue::witness(9));
        ctx.push(SymValue::literal(vec![0x05; 33]));
        match handle_crypto(&mut ctx, &SymEnvironment::default(), OpCode::CheckSig, at()) {
            StepEffect::Failed => {}
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(
            ctx.failure.as_ref().unwrap().codes[0].code,
            ERR_PUBKEY_ENCODING
        );
    }

    #[test]
    fn tapscript_sig_with_explicit_sighash_all_fails() {
        let mut ctx = ExecContext::new();
        let mut sig = vec![0xab; 64];
        sig.push(0x01);
        ctx.push(SymValue::literal(sig));
        ctx.push(SymValue::literal(vec![0x11; 32]));
        match handle_crypto(&mut ctx, &tap_env(), OpCode::CheckSig, at()) {
            StepEffect::Failed => {}
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(
            ctx.failure.as_ref().unwrap().codes[0].code,
            ERR_SIG_EXPLICIT_SIGHASH_ALL
        );
    }

    #[test]
    fn multisig_with_zero_sigs_is_pinned_true() {
        let mut ctx = ExecContext::new();
        // dummy, num_sigs=0, num_keys=0 from the top down.
        ctx.push(SymValue::literal(vec![]));
        ctx.push(SymValue::number(0));
        ctx.push(SymValue::number(0));
        handle_crypto(&mut ctx, &SymEnvironment::default(), OpCode::CheckMultisig, at());
        assert_eq!(ctx.stack.len(), 1);
        assert_eq!(ctx.stack[0].canonical(), "CHECKMULTISIG(0, 0)");
        assert!(ctx
            .constraints
            .iter()
            .any(|c| matches!(&c.pred, Pred::NumEq(_, 1))));
    }

    #[test]
    fn multisig_symbolic_key_count_requests_sampling() {
        let mut ctx = ExecContext::new();
        match handle_crypto(&mut ctx, &SymEnvironment::default(), OpCode::CheckMultisig, at()) {
            StepEffect::Dynamic(d) => {
                assert_eq!(d.role, DynRole::MultisigNumKeys);
            }
            other => panic!("expected dynamic access, got {other:?}"),
        }
    }

    #[test]
    fn conflicting_static_sig_facts_fail_the_path() {
        let mut ctx = ExecContext::new();
        let sig = SymValue::literal(vec![0x30, 0x01, 0x02]);
        let pubkey = SymValue::literal(vec![0x02; 33]);
        let node = SymValue::op(
            OpTag::Op(OpCode::CheckSig),
            vec![sig.clone(), pubkey.clone()],
            false,
        );
        track_sig_enforcement(&mut ctx, &node, Pos::Op(at()));
        assert!(!ctx.is_failed());
        let negated = SymValue::op(OpTag::Op(OpCode::Not), vec![node], false);
        track_sig_enforcement(&mut ctx, &negated, Pos::Op(at()));
        assert!(ctx.is_failed());
        assert_eq!(
            ctx.failure.as_ref().unwrap().codes[0].code,
            ERR_KNOWN_ARGS_DIFFERENT_RESULT
        );
    }
}
