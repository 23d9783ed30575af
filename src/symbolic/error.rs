//! Script-failure codes. These are data, not `Err` values: a failing
//! transfer function seals its own path and the analysis continues with the
//! siblings.

use crate::script::opcode::OpCode;

pub const ERR_BRANCH_CONDITION_INVALID: &str = "check_branch_condition_invalid";
pub const ERR_FINAL_VERIFY: &str = "check_final_verify";
pub const ERR_CLEANSTACK: &str = "check_cleanstack";
pub const ERR_VERIFY: &str = "check_verify";
pub const ERR_INVALID_ARGUMENTS: &str = "check_invalid_arguments";
pub const ERR_DATA_TOO_LONG: &str = "check_data_too_long";
pub const ERR_SCRIPTNUM_MINIMAL: &str = "check_scriptnum_minimal_encoding";
pub const ERR_SCRIPTNUM_LENGTH: &str = "check_scriptnum_encoding_exceeds_datalen";
pub const ERR_INT64_OUT_OF_BOUNDS: &str = "check_int64_out_of_bounds";
pub const ERR_LE64_WRONG_SIZE: &str = "check_le64_wrong_size";
pub const ERR_NEGATIVE_ARGUMENT: &str = "check_negative_argument";
pub const ERR_ARGUMENT_ABOVE_BOUNDS: &str = "check_argument_above_bounds";
pub const ERR_LENGTH_MISMATCH: &str = "check_length_mismatch";
pub const ERR_MINIMALIF: &str = "check_minimalif";
pub const ERR_NULLFAIL: &str = "check_nullfail";
pub const ERR_BUGBYTE: &str = "check_checkmultisig_bugbyte_zero";
pub const ERR_SIG_ENCODING: &str = "check_invalid_signature_encoding";
pub const ERR_SIG_LENGTH: &str = "check_invalid_signature_length";
pub const ERR_SIG_LOW_S: &str = "check_signature_low_s";
pub const ERR_SIG_BAD_HASHTYPE: &str = "check_signature_bad_hashtype";
pub const ERR_SIG_EXPLICIT_SIGHASH_ALL: &str = "check_signature_explicit_sighash_all";
pub const ERR_PUBKEY_ENCODING: &str = "check_invalid_pubkey_encoding";
pub const ERR_KNOWN_ARGS_DIFFERENT_RESULT: &str = "check_known_args_different_result";
pub const ERR_KNOWN_RESULT_DIFFERENT_ARGS: &str = "check_known_result_different_args";
pub const ERR_LOCKTIME_TYPE_MISMATCH: &str = "check_locktime_type_mismatch";
pub const ERR_LOCKTIME_IN_EFFECT: &str = "check_locktime_timelock_in_effect";
pub const ERR_CLTV_NSEQUENCE_FINAL: &str = "check_cltv_nsequence_final";
pub const ERR_NSEQUENCE_TYPE_MISMATCH: &str = "check_nsequence_type_mismatch";
pub const ERR_NSEQUENCE_IN_EFFECT: &str = "check_nsequence_timelock_in_effect";
pub const ERR_BAD_TX_VERSION: &str = "check_bad_tx_version";
pub const ERR_OUT_OF_MONEY_RANGE: &str = "check_out_of_money_range";
pub const ERR_RETURN: &str = "check_return";
pub const ERR_UNBALANCED_CONDITIONAL: &str = "check_unbalanced_conditional";
pub const ERR_UNTRACKED: &str = "untracked_constraint_check_failed";
pub const ERR_SOLVER_UNKNOWN: &str = "solver_result_unknown";
pub const WARN_NO_SIG_CHECK: &str = "warn_possible_success_without_sig_check";

/// Generic per-opcode precondition code: `check_<opcode>_invalid`.
pub fn op_invalid_code(op: OpCode) -> String {
    format!("check_{}_invalid", op.name().to_ascii_lowercase())
}

/// Code for a failed VERIFY-class enforcement of the given opcode, e.g.
/// `check_equalverify`.
pub fn op_check_code(op: OpCode) -> String {
    format!("check_{}", op.name().to_ascii_lowercase())
}

pub fn assertion_failed_code(line: u32) -> String {
    format!("assertion_failed_at_line_{line}")
}

/// Message for dynamic stack access attempted without a solver.
pub const MSG_DYNAMIC_WITHOUT_SOLVER: &str =
    "cannot analyze dynamic stack access without solver";
