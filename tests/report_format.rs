//! Report composition: section order, witness usage, model values with
//! sizes, and the failure section's stack snapshots.

use bsst::analyze_source;
use bsst::config::{ModelValueGlob, SymEnvironment};
use bsst::report::render_report;

fn base_env() -> SymEnvironment {
    let mut env = SymEnvironment::default();
    env.z3_enabled = false;
    env.produce_model_values = false;
    env.use_parallel_solving = false;
    env
}

fn z3_env() -> SymEnvironment {
    let mut env = SymEnvironment::default();
    env.z3_enabled = true;
    env.use_parallel_solving = false;
    env.solver_timeout_seconds = 0;
    env
}

#[test]
fn sections_appear_in_order() {
    let env = base_env();
    let (script, root) = analyze_source(&env, "if 1 else 2 endif swap drop").unwrap();
    let report = render_report(&env, &script, &root);

    let decoded = report.find("Decoded script:").expect("decoded section");
    let valid = report.find("Valid paths:").expect("valid paths section");
    let enforced = report
        .find("Enforced constraints per path:")
        .expect("enforcements section");
    let unused = report.find("Unused values:").expect("unused section");
    let witness = report
        .find("Witness usage and stack contents:")
        .expect("witness section");
    assert!(decoded < valid && valid < enforced && enforced < unused && unused < witness);

    // Underlines match the header lengths.
    assert!(report.contains("Valid paths:\n============\n"));
    assert!(report.contains("Decoded script:\n===============\n"));
}

#[test]
fn unused_values_shared_by_all_paths_render_once() {
    let env = base_env();
    let (script, root) = analyze_source(&env, "if 1 else 2 endif swap drop").unwrap();
    let report = render_report(&env, &script, &root);
    let section = report
        .split("Unused values:")
        .nth(1)
        .expect("unused section");
    assert!(section.contains("All valid paths:"));
    assert!(section.contains("        wit1 from 5:L1"));
}

#[test]
fn decoded_script_lists_positions_and_source_tokens() {
    let env = base_env();
    let (script, root) = analyze_source(&env, "DUP 0x0102 EQUALVERIFY\n1").unwrap();
    let report = render_report(&env, &script, &root);
    assert!(report.contains("  0:L1: DUP"));
    assert!(report.contains("  1:L1: 0x0102"));
    assert!(report.contains("  2:L1: EQUALVERIFY"));
    assert!(report.contains("  3:L2: 1"));
}

#[test]
fn failures_render_codes_and_stack_snapshots() {
    let env = base_env();
    let (script, root) = analyze_source(&env, "0 VERIFY").unwrap();
    let report = render_report(&env, &script, &root);
    let section = report
        .split("Failures per path:")
        .nth(1)
        .expect("failures section");
    assert!(section.contains("check_verify @ 1:L1"));
    assert!(section.contains("stack: ["));
}

#[test]
fn within_band_model_values_with_sizes() {
    let mut env = z3_env();
    env.produce_model_values_for = vec![ModelValueGlob::parse("wit*:3").unwrap()];
    env.report_model_value_sizes = true;
    env.sort_model_values = true;

    let (script, root) = analyze_source(&env, "1 3 within").unwrap();
    let valid: Vec<_> = root
        .leaves()
        .into_iter()
        .filter(|(ctx, _)| !ctx.is_failed())
        .collect();
    assert_eq!(valid.len(), 1);
    let ctx = valid[0].0;
    assert_eq!(ctx.enforcements.len(), 1);
    assert_eq!(ctx.enforcements[0].cond.canonical(), "WITHIN(wit0, 1, 3)");

    let m = ctx
        .model_values
        .iter()
        .find(|m| m.name == "wit0")
        .expect("wit0 model values");
    let rendered: Vec<String> = m.samples.iter().map(|s| s.to_string()).collect();
    assert_eq!(rendered, vec!["1", "2"]);
    assert_eq!(m.sizes.as_deref(), Some(&[1][..]));

    let report = render_report(&env, &script, &root);
    assert!(report.contains("Witness usage and model values:"));
    assert!(report.contains("Witnesses used: 1"));
    assert!(
        report.contains("        wit0 = {1, 2} ; size = 1"),
        "report was:\n{report}"
    );
}

#[test]
fn terminal_add_chain_reports_size_spread() {
    let env = z3_env();
    let (_, root) = analyze_source(&env, "ADD ADD").unwrap();
    let valid: Vec<_> = root
        .leaves()
        .into_iter()
        .filter(|(ctx, _)| !ctx.is_failed())
        .collect();
    assert_eq!(valid.len(), 1);
    let ctx = valid[0].0;
    assert_eq!(ctx.witness_count, 3);
    let stack_report = ctx
        .model_values
        .iter()
        .find(|m| m.name == "stack:0")
        .expect("stack model values");
    let sizes = stack_report.sizes.as_ref().expect("sizes for stack entry");
    assert_eq!(sizes.as_slice(), &[0, 1, 2, 3, 4, 5]);
}

#[test]
fn positions_can_be_dropped_from_enforcements() {
    let mut env = base_env();
    env.tag_enforcements_with_position = false;
    let (script, root) = analyze_source(&env, "EQUALVERIFY DROP").unwrap();
    let report = render_report(&env, &script, &root);
    assert!(report.contains("        EQUAL(wit0, wit1)\n"));
    assert!(!report.contains("EQUAL(wit0, wit1) @"));
}
