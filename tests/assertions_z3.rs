//! User assertions and assumptions with the solver: the adopt-if-implied
//! rule, failure line attribution, and placeholder-driven model values.

use bsst::analyze_source;
use bsst::config::SymEnvironment;
use bsst::symbolic::state::{Branchpoint, ModelSample};

fn zenv() -> SymEnvironment {
    let mut env = SymEnvironment::default();
    env.z3_enabled = true;
    env.use_parallel_solving = false;
    env.solver_timeout_seconds = 0;
    env.is_incomplete_script = true;
    env.is_elements = true;
    env
}

fn failure_codes(root: &Branchpoint) -> Vec<String> {
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

fn valid_count(root: &Branchpoint) -> usize {
    root.leaves()
        .iter()
        .filter(|(ctx, _)| !ctx.is_failed() && !ctx.unexplored)
        .count()
}

#[test]
fn assumption_values_surface_as_model_values() {
    let mut env = zenv();
    env.produce_model_values_for =
        vec![bsst::config::ModelValueGlob::parse("$a:4").unwrap()];
    let src = "// bsst-assume($a): 1 2 3\n$a";
    let (_, root) = analyze_source(&env, src).unwrap();
    assert_eq!(valid_count(&root), 1);
    let leaves = root.leaves();
    let (ctx, _) = leaves
        .iter()
        .find(|(ctx, _)| !ctx.is_failed())
        .expect("valid path");
    let m = ctx
        .model_values
        .iter()
        .find(|m| m.name == "$a")
        .expect("placeholder samples");
    let mut nums: Vec<i64> = m
        .samples
        .iter()
        .map(|s| match s {
            ModelSample::Num(n) => *n,
            other => panic!("expected numeric samples, got {other}"),
        })
        .collect();
    nums.sort_unstable();
    assert_eq!(nums, vec![1, 2, 3]);
}

#[test]
fn implied_assertion_is_adopted() {
    // BOOL(wit0) is enforced, so a nonzero-size assertion on it must hold.
    let src = "DUP VERIFY\n// bsst-assert-size: >0";
    let (_, root) = analyze_source(&zenv(), src).unwrap();
    assert_eq!(valid_count(&root), 1);
    assert!(failure_codes(&root).is_empty());
}

#[test]
fn non_implied_assertion_fails_at_its_line() {
    let src = "DUP VERIFY\n// bsst-assert: >=5";
    let (_, root) = analyze_source(&zenv(), src).unwrap();
    assert_eq!(valid_count(&root), 0);
    assert!(failure_codes(&root).contains(&"assertion_failed_at_line_2".to_string()));
}

#[test]
fn static_target_assertion_checks_without_solver() {
    let mut env = zenv();
    env.z3_enabled = false;
    let src = "1\n// bsst-assert: 2";
    let (_, root) = analyze_source(&env, src).unwrap();
    assert!(failure_codes(&root).contains(&"assertion_failed_at_line_2".to_string()));

    let src = "1\n// bsst-assert: 1 2";
    let (_, root) = analyze_source(&env, src).unwrap();
    assert_eq!(valid_count(&root), 1);
}

#[test]
fn conflicting_assumptions_fail_with_assumption_codes() {
    let src = "// bsst-assume($a): 1\n// bsst-assume($a): 2\n$a";
    let (_, root) = analyze_source(&zenv(), src).unwrap();
    assert_eq!(valid_count(&root), 0);
    let codes = failure_codes(&root);
    assert!(
        codes.contains(&"check_assumption_at_line_1".to_string())
            || codes.contains(&"check_assumption_at_line_2".to_string()),
        "got {codes:?}"
    );
}

#[test]
fn size_assumption_propagates_through_cat() {
    let src = "\
$a // =>a
// bsst-assume-size($a): 1
DUP x('01') CAT
// bsst-assert-size: 2";
    let (_, root) = analyze_source(&zenv(), src).unwrap();
    assert_eq!(valid_count(&root), 1);
    assert!(failure_codes(&root).is_empty());
}

#[test]
fn assertion_on_a_named_reference() {
    let src = "\
1 // =>one
DUP
// bsst-assert(&one): 1";
    let (_, root) = analyze_source(&zenv(), src).unwrap();
    assert_eq!(valid_count(&root), 1);

    let src = "\
1 // =>one
DUP
// bsst-assert(&one): 2";
    let (_, root) = analyze_source(&zenv(), src).unwrap();
    assert!(failure_codes(&root).contains(&"assertion_failed_at_line_3".to_string()));
}

#[test]
fn range_assumption_bounds_the_samples() {
    let mut env = zenv();
    env.produce_model_values_for =
        vec![bsst::config::ModelValueGlob::parse("$a:6").unwrap()];
    let src = "// bsst-assume($a): -1..2\n$a";
    let (_, root) = analyze_source(&env, src).unwrap();
    let leaves = root.leaves();
    let (ctx, _) = leaves
        .iter()
        .find(|(ctx, _)| !ctx.is_failed())
        .expect("valid path");
    let m = ctx
        .model_values
        .iter()
        .find(|m| m.name == "$a")
        .expect("placeholder samples");
    let mut nums: Vec<i64> = m
        .samples
        .iter()
        .filter_map(|s| match s {
            ModelSample::Num(n) => Some(*n),
            _ => None,
        })
        .collect();
    nums.sort_unstable();
    assert_eq!(nums, vec![-1, 0, 1, 2]);
}

#[test]
fn le64_and_scriptnum_terms_do_not_mix_across_comments() {
    let src = "// bsst-assume($a): 100 101\n// bsst-assume($a): le64(100)\n$a";
    assert!(analyze_source(&zenv(), src).is_err());
}
