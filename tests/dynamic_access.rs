//! Solver-backed dynamic stack access: PICK/ROLL fanout over sampled index
//! values, CHECKMULTISIG fanout over sampled counts, placeholder-driven
//! indices, and the unexplored terminal path.

use bsst::analyze_source;
use bsst::config::SymEnvironment;
use bsst::symbolic::state::{Branchpoint, ExecContext, ModelSample};

fn zenv() -> SymEnvironment {
    let mut env = SymEnvironment::default();
    env.z3_enabled = true;
    env.use_parallel_solving = false;
    env.solver_timeout_seconds = 0;
    env.is_incomplete_script = true;
    env.max_samples_for_dynamic_stack_access = 2;
    env
}

fn leaves_of(root: &Branchpoint) -> Vec<(&ExecContext, Vec<String>)> {
    root.leaves()
        .into_iter()
        .map(|(ctx, trail)| {
            let labels = trail
                .iter()
                .map(|l| {
                    if l.choice == "True" || l.choice == "False" {
                        l.render_v2()
                    } else {
                        l.render_v1()
                    }
                })
                .collect();
            (ctx, labels)
        })
        .collect()
}

#[test]
fn pick_with_symbolic_index_fans_out_and_truncates() {
    let (_, root) = analyze_source(&zenv(), "pick").unwrap();
    let leaves = leaves_of(&root);
    assert_eq!(leaves.len(), 3);

    let (ctx0, labels0) = &leaves[0];
    assert_eq!(labels0, &vec!["PICK wit0 @ 0:L1 : 0".to_string()]);
    assert!(!ctx0.is_failed() && !ctx0.unexplored);
    assert_eq!(ctx0.witness_count, 2);

    let (ctx1, labels1) = &leaves[1];
    assert_eq!(labels1, &vec!["PICK wit0 @ 0:L1 : 1".to_string()]);
    assert_eq!(ctx1.witness_count, 3);

    let (ctx2, labels2) = &leaves[2];
    assert!(ctx2.unexplored);
    assert_eq!(labels2, &vec!["PICK wit0 @ 0:L1 : 2, ...".to_string()]);
}

#[test]
fn pick_paths_pin_the_index_in_model_values() {
    let (_, root) = analyze_source(&zenv(), "pick").unwrap();
    let leaves = leaves_of(&root);
    let (ctx0, _) = &leaves[0];
    let wit0 = ctx0
        .model_values
        .iter()
        .find(|m| m.name == "wit0")
        .expect("wit0 model value");
    assert_eq!(wit0.samples, vec![ModelSample::Num(0)]);

    let (ctx1, _) = &leaves[1];
    let wit0 = ctx1
        .model_values
        .iter()
        .find(|m| m.name == "wit0")
        .expect("wit0 model value");
    assert_eq!(wit0.samples, vec![ModelSample::Num(1)]);
}

#[test]
fn roll_with_symbolic_index_removes_the_picked_slot() {
    let (_, root) = analyze_source(&zenv(), "roll").unwrap();
    let leaves = leaves_of(&root);
    assert_eq!(leaves.len(), 3);
    let (ctx1, labels1) = &leaves[1];
    assert_eq!(labels1, &vec!["ROLL wit0 @ 0:L1 : 1".to_string()]);
    // Depth-1 roll: wit2 moved above wit1.
    let rendered: Vec<String> = ctx1.stack.iter().map(|v| v.canonical()).collect();
    assert_eq!(rendered, vec!["wit1", "wit2"]);
}

#[test]
fn checkmultisig_fans_out_over_both_counts() {
    let (_, root) = analyze_source(&zenv(), "checkmultisig").unwrap();
    let leaves = leaves_of(&root);
    assert_eq!(leaves.len(), 4);

    let (ctx, labels) = &leaves[0];
    assert_eq!(
        labels,
        &vec![
            "CHECKMULTISIG @ 0:L1 : num_keys = 0".to_string(),
            "CHECKMULTISIG @ 0:L1 : num_signatures = 0".to_string(),
        ]
    );
    assert_eq!(ctx.witness_count, 3);
    assert_eq!(ctx.stack[0].canonical(), "CHECKMULTISIG(wit0, wit1)");

    let (ctx, labels) = &leaves[1];
    assert_eq!(labels[1], "CHECKMULTISIG @ 0:L1 : num_signatures = 0");
    assert_eq!(labels[0], "CHECKMULTISIG @ 0:L1 : num_keys = 1");
    assert_eq!(ctx.witness_count, 4);
    assert_eq!(ctx.stack[0].canonical(), "CHECKMULTISIG(wit0, wit1, wit2)");

    let (ctx, labels) = &leaves[2];
    assert_eq!(labels[1], "CHECKMULTISIG @ 0:L1 : num_signatures = 1");
    assert_eq!(ctx.witness_count, 5);
    assert_eq!(
        ctx.stack[0].canonical(),
        "CHECKMULTISIG(wit0, wit1, wit2, wit3)"
    );

    let (ctx, labels) = &leaves[3];
    assert!(ctx.unexplored);
    assert_eq!(labels[0], "CHECKMULTISIG @ 0:L1 : num_keys = 2, ...");
}

#[test]
fn placeholder_assumption_drives_the_pick_fanout() {
    let mut env = zenv();
    env.minimaldata_flag = false;
    env.max_samples_for_dynamic_stack_access = 3;
    let src = "// bsst-assume($a): 0x0000 0x0100\n$a pick";
    let (_, root) = analyze_source(&env, src).unwrap();
    let leaves = leaves_of(&root);
    // Only the two assumed encodings are feasible: no unexplored tail.
    assert_eq!(leaves.len(), 2);
    let (ctx0, labels0) = &leaves[0];
    assert!(labels0[0].ends_with(": 0"));
    assert!(!ctx0.is_failed());
    // Index 0 duplicates the top: both entries are the same witness.
    assert_eq!(ctx0.stack.len(), 2);
    assert_eq!(ctx0.stack[0].canonical(), "wit0");
    assert_eq!(ctx0.stack[1].canonical(), "wit0");

    let (ctx1, labels1) = &leaves[1];
    assert!(labels1[0].ends_with(": 1"));
    // Depth-1 pick reaches below the top witness.
    assert_eq!(ctx1.stack.len(), 3);
    assert_eq!(ctx1.stack[2].canonical(), "wit1");
}

#[test]
fn infeasible_pinned_branch_is_pruned() {
    // The index is enforced to equal 1, so only that sample survives.
    let mut env = zenv();
    env.max_samples_for_dynamic_stack_access = 3;
    let src = "DUP 1 NUMEQUALVERIFY PICK";
    let (_, root) = analyze_source(&env, src).unwrap();
    let leaves = leaves_of(&root);
    let valid: Vec<_> = leaves
        .iter()
        .filter(|(ctx, _)| !ctx.is_failed() && !ctx.unexplored)
        .collect();
    assert_eq!(valid.len(), 1);
    assert!(valid[0].1.last().unwrap().ends_with(": 1"));
}
