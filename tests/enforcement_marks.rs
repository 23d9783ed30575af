//! Enforcement lifting and the always-true markers: `<*>` for enforcements
//! implied in every valid path that carries them, `{*}` for path-local ones.

use bsst::analyze_source;
use bsst::config::SymEnvironment;
use bsst::report::render_report;

fn zenv() -> SymEnvironment {
    let mut env = SymEnvironment::default();
    env.z3_enabled = true;
    env.use_parallel_solving = false;
    env.solver_timeout_seconds = 0;
    env.produce_model_values = false;
    env
}

#[test]
fn branch_local_enforcements_marked_always_true() {
    let src = "IF 2DUP EQUALVERIFY 1 EQUALVERIFY 1 EQUALVERIFY ELSE EQUALVERIFY ENDIF";
    let (script, root) = analyze_source(&zenv(), src).unwrap();
    let report = render_report(&zenv(), &script, &root);
    assert!(
        report.contains(
            "When BOOL(wit0) :: [IF @ 0:L1]\n\
             ------------------------------\n\
             \n\
             \x20       <*> EQUAL(wit1, wit2) @ 2:L1\n\
             \x20       <*> EQUAL(1, wit1) @ 4:L1\n\
             \x20       <*> EQUAL(1, wit2) @ 6:L1\n\n"
        ),
        "report was:\n{report}"
    );
}

#[test]
fn shared_position_with_divergent_implication_gets_the_local_marker() {
    let src = "IF 2DUP 1 EQUALVERIFY 1 EQUALVERIFY ENDIF EQUALVERIFY";
    let (script, root) = analyze_source(&zenv(), src).unwrap();
    let report = render_report(&zenv(), &script, &root);
    assert!(
        report.contains(
            "When BOOL(wit0) :: [IF @ 0:L1]\n\
             ------------------------------\n\
             \n\
             \x20       <*> EQUAL(1, wit1) @ 3:L1\n\
             \x20       <*> EQUAL(1, wit2) @ 5:L1\n\
             \x20       {*} EQUAL(wit1, wit2) @ 7:L1\n\n"
        ),
        "report was:\n{report}"
    );
    // The sibling path keeps its unmarked copy: no lifting happened.
    assert!(report.contains("When not BOOL(wit0) :: [IF @ 0:L1]"));
}

#[test]
fn identical_enforcements_lift_to_all_valid_paths() {
    // Both arms end with the same pushed result, so the terminal
    // enforcement is shared and lifts to the root.
    let src = "IF 1 ELSE 2 ENDIF DROP 1";
    let (script, root) = analyze_source(&zenv(), src).unwrap();
    assert_eq!(root.lifted.len(), 1);
    assert_eq!(root.lifted[0].cond.canonical(), "1");
    let leaf_enforcements: usize = root
        .leaves()
        .iter()
        .map(|(ctx, _)| ctx.enforcements.len())
        .sum();
    assert_eq!(leaf_enforcements, 0);
    let report = render_report(&zenv(), &script, &root);
    assert!(report.contains("All valid paths:"), "report was:\n{report}");
}

#[test]
fn equal_sha256_hashes_imply_equal_preimages() {
    let mut env = zenv();
    let src = "2DUP SHA256 SWAP SHA256 EQUALVERIFY EQUAL NOT";
    let (_, root) = analyze_source(&env, src).unwrap();
    let valid = root
        .leaves()
        .into_iter()
        .filter(|(ctx, _)| !ctx.is_failed())
        .count();
    assert_eq!(valid, 0);

    // 160-bit hashes are not collision-free unless assumed so.
    let src160 = "2DUP HASH160 SWAP HASH160 EQUALVERIFY EQUAL NOT";
    let (_, root) = analyze_source(&env, src160).unwrap();
    let valid = root
        .leaves()
        .into_iter()
        .filter(|(ctx, _)| !ctx.is_failed())
        .count();
    assert_eq!(valid, 1);

    env.assume_no_160bit_hash_collisions = true;
    let (_, root) = analyze_source(&env, src160).unwrap();
    let valid = root
        .leaves()
        .into_iter()
        .filter(|(ctx, _)| !ctx.is_failed())
        .count();
    assert_eq!(valid, 0);
}

#[test]
fn hidden_always_true_enforcements_disappear_from_the_report() {
    let mut env = zenv();
    env.hide_always_true_enforcements = true;
    let src = "IF 2DUP EQUALVERIFY 1 EQUALVERIFY 1 EQUALVERIFY ELSE EQUALVERIFY ENDIF";
    let (script, root) = analyze_source(&env, src).unwrap();
    let report = render_report(&env, &script, &root);
    assert!(!report.contains("<*>"), "report was:\n{report}");
}
