//! End-to-end path exploration without the solver: static folding, branch
//! shapes, witness numbering, enforcement composition, unused values.

use bsst::analyze_source;
use bsst::config::{SigVersion, SymEnvironment};
use bsst::symbolic::state::{Branchpoint, ExecContext};

fn env() -> SymEnvironment {
    let mut env = SymEnvironment::default();
    env.z3_enabled = false;
    env.produce_model_values = false;
    env.use_parallel_solving = false;
    env
}

fn valid_contexts(root: &Branchpoint) -> Vec<&ExecContext> {
    root.leaves()
        .into_iter()
        .filter(|(ctx, _)| !ctx.is_failed() && !ctx.unexplored)
        .map(|(ctx, _)| ctx)
        .collect()
}

fn failed_codes(root: &Branchpoint) -> Vec<String> {
    let mut out = Vec::new();
    for (ctx, _) in root.leaves() {
        if let Some(failure) = &ctx.failure {
            for code in &failure.codes {
                out.push(code.code.clone());
            }
        }
    }
    out
}

#[test]
fn name_aliases_flow_into_the_terminal_enforcement() {
    let src = "\
// bsst-name-alias(wit0): a1
// bsst-name-alias(wit2): a2
ADD ADD";
    let (script, root) = analyze_source(&env(), src).unwrap();
    let valid = valid_contexts(&root);
    assert_eq!(valid.len(), 1);
    let ctx = valid[0];
    assert_eq!(ctx.witness_count, 3);
    assert_eq!(ctx.enforcements.len(), 1);
    assert_eq!(
        ctx.enforcements[0].cond.canonical(),
        "BOOL(ADD(ADD(wit0, wit1), wit2))"
    );
    let refs = std::collections::BTreeMap::new();
    let rctx = bsst::symbolic::value::RenderCtx::new(&script.aliases, &refs);
    assert_eq!(
        ctx.enforcements[0].cond.render(&rctx),
        "BOOL(ADD(ADD(a1<wit0>, wit1), a2<wit2>))"
    );
    assert_eq!(format!("{}", ctx.enforcements[0].pos), "END");
}

#[test]
fn if_else_fork_explores_both_arms() {
    let (_, root) = analyze_source(&env(), "if 1 else 2 endif swap drop").unwrap();
    let valid = valid_contexts(&root);
    assert_eq!(valid.len(), 2);

    // Both paths leave one item and report the swapped-in witness as unused.
    for ctx in &valid {
        assert_eq!(ctx.stack.len(), 1);
        let unused = ctx.unused();
        assert_eq!(unused.len(), 1);
        assert_eq!(unused[0].1.canonical(), "wit1");
        assert_eq!(unused[0].0.pc, 5);
        assert_eq!(unused[0].0.line, 1);
    }
    assert_eq!(valid[0].enforcements[0].cond.canonical(), "1");
    assert_eq!(valid[1].enforcements[0].cond.canonical(), "BOOL(2)");
    for ctx in valid {
        assert_eq!(format!("{}", ctx.enforcements[0].pos), "END");
    }
}

#[test]
fn statically_false_verify_seals_only_its_path() {
    let (_, root) = analyze_source(&env(), "IF 0 VERIFY ELSE 1 ENDIF").unwrap();
    let valid = valid_contexts(&root);
    assert_eq!(valid.len(), 1);
    assert!(failed_codes(&root).contains(&"check_verify".to_string()));
}

#[test]
fn equalverify_publishes_an_enforcement_with_position() {
    let (_, root) = analyze_source(&env(), "EQUALVERIFY DROP").unwrap();
    let valid = valid_contexts(&root);
    assert_eq!(valid.len(), 1);
    let e = &valid[0].enforcements[0];
    assert_eq!(e.cond.canonical(), "EQUAL(wit0, wit1)");
    assert_eq!(format!("{}", e.pos), "0:L1");
}

#[test]
fn static_arithmetic_folds_through_the_whole_path() {
    let (_, root) = analyze_source(&env(), "10 5 DUP ADD SUB 1 ADD").unwrap();
    let valid = valid_contexts(&root);
    assert_eq!(valid.len(), 1);
    let ctx = valid[0];
    assert_eq!(ctx.witness_count, 0);
    assert_eq!(ctx.stack.len(), 1);
    assert_eq!(ctx.stack[0].canonical(), "1");
}

#[test]
fn depth_pushes_a_symbolic_total() {
    let (_, root) = analyze_source(&env(), "1 DEPTH DEPTH 3 EQUALVERIFY 2 EQUALVERIFY ADD").unwrap();
    let valid = valid_contexts(&root);
    assert_eq!(valid.len(), 1);
    let ctx = valid[0];
    // The final ADD consumed the pushed 1 and one fresh witness.
    assert_eq!(ctx.witness_count, 1);
    assert_eq!(ctx.stack[0].canonical(), "ADD(1, wit0)");
}

#[test]
fn altstack_round_trip_preserves_values() {
    let (_, root) = analyze_source(&env(), "TOALTSTACK 1 FROMALTSTACK EQUALVERIFY").unwrap();
    let valid = valid_contexts(&root);
    assert_eq!(valid.len(), 1);
    let e = &valid[0].enforcements[0];
    assert_eq!(e.cond.canonical(), "EQUAL(1, wit0)");
}

#[test]
fn fromaltstack_on_empty_altstack_fails_the_path() {
    let (_, root) = analyze_source(&env(), "FROMALTSTACK").unwrap();
    assert!(valid_contexts(&root).is_empty());
    assert!(failed_codes(&root).contains(&"check_fromaltstack_invalid".to_string()));
}

#[test]
fn unbalanced_conditionals_fail() {
    let (_, root) = analyze_source(&env(), "IF 1").unwrap();
    assert!(failed_codes(&root).contains(&"check_unbalanced_conditional".to_string()));
    let (_, root) = analyze_source(&env(), "1 ENDIF").unwrap();
    assert!(failed_codes(&root).contains(&"check_unbalanced_conditional".to_string()));
}

#[test]
fn cleanstack_rejects_leftover_items() {
    let (_, root) = analyze_source(&env(), "1 1").unwrap();
    assert!(failed_codes(&root).contains(&"check_cleanstack".to_string()));

    let mut relaxed = env();
    relaxed.is_incomplete_script = true;
    let (_, root) = analyze_source(&relaxed, "1 1").unwrap();
    assert_eq!(valid_contexts(&root).len(), 1);
}

#[test]
fn dynamic_access_without_solver_fails() {
    let mut e = env();
    e.is_incomplete_script = true;
    let (_, root) = analyze_source(&e, "pick").unwrap();
    assert!(valid_contexts(&root).is_empty());
    assert!(failed_codes(&root)
        .contains(&"cannot analyze dynamic stack access without solver".to_string()));
}

#[test]
fn data_references_bind_and_disambiguate() {
    let src = "IF 1 ELSE 2 ENDIF // =>result\nDROP 1";
    let (script, root) = analyze_source(&env(), src).unwrap();
    let valid = valid_contexts(&root);
    assert_eq!(valid.len(), 2);
    for ctx in &valid {
        assert_eq!(ctx.data_refs.len(), 1);
        assert!(ctx.data_refs.contains_key("result"));
    }
    let report = bsst::report::render_report(&env(), &script, &root);
    assert!(report.contains("&result = 1"));
    assert!(report.contains("&result' = 2"));
}

#[test]
fn return_opcode_always_fails() {
    let (_, root) = analyze_source(&env(), "RETURN").unwrap();
    assert!(valid_contexts(&root).is_empty());
    assert!(failed_codes(&root).contains(&"check_return".to_string()));
}

#[test]
fn elements_le64_static_flow() {
    let mut e = env();
    e.is_elements = true;
    e.sigversion = SigVersion::Tapscript;
    let (_, root) = analyze_source(
        &e,
        "le64(20) le64(1) ADD64 VERIFY le64(3) DIV64 VERIFY SWAP DROP le64(7) EQUAL",
    )
    .unwrap();
    let valid = valid_contexts(&root);
    assert_eq!(valid.len(), 1);
    assert_eq!(valid[0].witness_count, 0);
    assert_eq!(valid[0].stack[0].canonical(), "1");
}

#[test]
fn static_le64_overflow_is_rejected() {
    let mut e = env();
    e.is_elements = true;
    e.sigversion = SigVersion::Tapscript;
    let (_, root) = analyze_source(&e, "le64(1) x('FFFFFFFFFFFFFF7F') ADD64 VERIFY").unwrap();
    assert!(valid_contexts(&root).is_empty());
    assert!(failed_codes(&root).contains(&"check_invalid_arguments".to_string()));
}

#[test]
fn known_args_conflicting_checksig_results_fail_statically() {
    // Same static (sig, pubkey) enforced true then false on one path.
    // The signature is a minimal valid DER encoding (r = 1, s = 1) plus a
    // SIGHASH_ALL byte.
    let sig = "0x300602010102010101";
    let pubkey = "0x020202020202020202020202020202020202020202020202020202020202020202";
    let src = format!(
        "{sig} DUP TOALTSTACK {pubkey} CHECKSIGVERIFY FROMALTSTACK {pubkey} CHECKSIG NOT VERIFY"
    );
    let (_, root) = analyze_source(&env(), &src).unwrap();
    assert!(failed_codes(&root).contains(&"check_known_args_different_result".to_string()));
}
