//! Plugin hooks: a record of optional callbacks registered during a single
//! init phase. The engine invokes them at well-defined points and knows only
//! their contract, not their origin.

use crate::config::SymEnvironment;
use crate::script::opcode::OpCode;
use crate::script::token::ScriptToken;
use crate::symbolic::error::WARN_NO_SIG_CHECK;
use crate::symbolic::state::{Branchpoint, ExecContext, Failure};
use crate::symbolic::value::{OpTag, Pos, SymValue, ValueRef};

type CtxHook = Box<dyn FnMut(&mut ExecContext)>;
type TokenHook = Box<dyn FnMut(&mut ExecContext, &ScriptToken)>;

#[derive(Default)]
pub struct PluginTable {
    pub parse_input_file: Option<Box<dyn FnMut(&SymEnvironment, String) -> String>>,
    pub plugin_settings: Option<Box<dyn FnMut(&SymEnvironment, &str, &str)>>,
    pub plugin_comment: Option<Box<dyn FnMut(&mut ExecContext, u32, &str)>>,
    pub script_failure: Option<Box<dyn FnMut(&mut ExecContext, &Failure)>>,
    pub report_start: Option<Box<dyn FnMut(&Branchpoint)>>,
    pub report_end: Option<Box<dyn FnMut(&Branchpoint)>>,
    pub pushdata: Option<Box<dyn FnMut(&mut ExecContext, &ValueRef)>>,
    pub pre_opcode: Option<TokenHook>,
    pub post_opcode: Option<TokenHook>,
    pub pre_finalize: Option<CtxHook>,
    pub post_finalize: Option<CtxHook>,
}

impl PluginTable {
    /// Install the bundled plugins requested by name. Returns false for an
    /// unknown plugin name.
    pub fn install_builtin(&mut self, name: &str) -> bool {
        match name {
            "checksig_track" => {
                install_checksig_track(self);
                true
            }
            _ => false,
        }
    }

    pub fn install_all(&mut self, env: &SymEnvironment) -> Result<(), String> {
        for name in env.plugins.iter().chain(env.op_plugins.iter()) {
            if !self.install_builtin(name) {
                return Err(format!("unknown plugin `{name}`"));
            }
        }
        Ok(())
    }
}

fn value_contains_sig_check(v: &ValueRef) -> bool {
    if matches!(
        v.op_tag(),
        Some(OpTag::Op(
            OpCode::CheckSig
                | OpCode::CheckSigVerify
                | OpCode::CheckSigAdd
                | OpCode::CheckSigFromStack
                | OpCode::CheckSigFromStackVerify
                | OpCode::CheckMultisig
                | OpCode::CheckMultisigVerify
        ))
    ) {
        return true;
    }
    v.op_args().iter().any(value_contains_sig_check)
}

/// The signature-tracking plugin: warn when a path can succeed without any
/// signature check being enforced.
fn install_checksig_track(table: &mut PluginTable) {
    table.pre_finalize = Some(Box::new(move |ctx: &mut ExecContext| {
        if ctx.is_failed() {
            return;
        }
        let enforced = ctx
            .enforcements
            .iter()
            .any(|e| value_contains_sig_check(&e.cond));
        let multisig_fact = ctx
            .stack
            .iter()
            .chain(ctx.altstack.iter())
            .any(value_contains_sig_check);
        if !enforced && !multisig_fact {
            ctx.add_warning(Pos::End, WARN_NO_SIG_CHECK);
        }
    }));
}

/// Helper for plugin tests and the example plugin: push a constant value as
/// if a custom opcode produced it.
pub fn push_custom_value(ctx: &mut ExecContext, bytes: Vec<u8>) {
    ctx.push(SymValue::literal(bytes));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbolic::value::{OpPos, SymValue};

    #[test]
    fn checksig_track_warns_on_sigless_path() {
        let mut table = PluginTable::default();
        assert!(table.install_builtin("checksig_track"));
        let mut ctx = ExecContext::new();
        ctx.add_enforcement(
            SymValue::bool_of(&SymValue::witness(0)),
            Pos::Op(OpPos { pc: 0, line: 1 }),
        );
        (table.pre_finalize.as_mut().unwrap())(&mut ctx);
        assert!(ctx.warnings.iter().any(|w| w.text == WARN_NO_SIG_CHECK));
    }

    #[test]
    fn checksig_track_is_quiet_when_a_check_is_enforced() {
        let mut table = PluginTable::default();
        table.install_builtin("checksig_track");
        let mut ctx = ExecContext::new();
        let node = SymValue::op(
            OpTag::Op(OpCode::CheckSig),
            vec![SymValue::witness(0), SymValue::witness(1)],
            true,
        );
        ctx.add_enforcement(SymValue::bool_of(&node), Pos::Op(OpPos { pc: 2, line: 1 }));
        (table.pre_finalize.as_mut().unwrap())(&mut ctx);
        assert!(ctx.warnings.is_empty());
    }

    #[test]
    fn unknown_plugin_is_rejected() {
        let mut table = PluginTable::default();
        assert!(!table.install_builtin("nope"));
    }
}
