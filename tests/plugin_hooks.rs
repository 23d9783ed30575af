//! Plugin hook dispatch: callbacks fire at the documented points, see the
//! live context, and may mutate it.

use std::cell::RefCell;
use std::rc::Rc;

use bsst::config::SymEnvironment;
use bsst::plugins::PluginTable;
use bsst::script::parser::parse_script;
use bsst::symbolic::engine::symex_script;
use bsst::symbolic::error::WARN_NO_SIG_CHECK;

fn env() -> SymEnvironment {
    let mut env = SymEnvironment::default();
    env.z3_enabled = false;
    env.produce_model_values = false;
    env.use_parallel_solving = false;
    env
}

#[derive(Default)]
struct Counters {
    pre_opcode: usize,
    post_opcode: usize,
    pushdata: usize,
    pre_finalize: usize,
    post_finalize: usize,
    failures: usize,
    comments: Vec<String>,
}

fn counting_table(counters: Rc<RefCell<Counters>>) -> PluginTable {
    let mut table = PluginTable::default();
    let c = counters.clone();
    table.pre_opcode = Some(Box::new(move |_, _| c.borrow_mut().pre_opcode += 1));
    let c = counters.clone();
    table.post_opcode = Some(Box::new(move |_, _| c.borrow_mut().post_opcode += 1));
    let c = counters.clone();
    table.pushdata = Some(Box::new(move |_, _| c.borrow_mut().pushdata += 1));
    let c = counters.clone();
    table.pre_finalize = Some(Box::new(move |_| c.borrow_mut().pre_finalize += 1));
    let c = counters.clone();
    table.post_finalize = Some(Box::new(move |_| c.borrow_mut().post_finalize += 1));
    let c = counters.clone();
    table.script_failure = Some(Box::new(move |_, _| c.borrow_mut().failures += 1));
    let c = counters;
    table.plugin_comment = Some(Box::new(move |_, _, payload| {
        c.borrow_mut().comments.push(payload.to_string())
    }));
    table
}

#[test]
fn hooks_fire_once_per_executed_opcode_and_leaf() {
    let env = env();
    let script = parse_script(&env, "1 DUP DROP").unwrap();
    let counters = Rc::new(RefCell::new(Counters::default()));
    let mut table = counting_table(counters.clone());
    symex_script(&env, &script, &mut table).unwrap();

    let c = counters.borrow();
    assert_eq!(c.pre_opcode, 3);
    assert_eq!(c.post_opcode, 3);
    assert_eq!(c.pushdata, 1);
    assert_eq!(c.pre_finalize, 1);
    assert_eq!(c.post_finalize, 1);
    assert_eq!(c.failures, 0);
}

#[test]
fn branching_runs_finalize_hooks_per_path() {
    let env = env();
    let script = parse_script(&env, "IF 1 ELSE 1 ENDIF").unwrap();
    let counters = Rc::new(RefCell::new(Counters::default()));
    let mut table = counting_table(counters.clone());
    symex_script(&env, &script, &mut table).unwrap();
    assert_eq!(counters.borrow().pre_finalize, 2);
    assert_eq!(counters.borrow().post_finalize, 2);
}

#[test]
fn script_failure_hook_sees_sealed_paths() {
    let env = env();
    let script = parse_script(&env, "0 VERIFY").unwrap();
    let counters = Rc::new(RefCell::new(Counters::default()));
    let mut table = counting_table(counters.clone());
    symex_script(&env, &script, &mut table).unwrap();
    assert_eq!(counters.borrow().failures, 1);
}

#[test]
fn plugin_comments_reach_their_hook() {
    let env = env();
    let script = parse_script(&env, "// bsst-plugin(example): tune=3\n1").unwrap();
    let counters = Rc::new(RefCell::new(Counters::default()));
    let mut table = counting_table(counters.clone());
    symex_script(&env, &script, &mut table).unwrap();
    assert_eq!(counters.borrow().comments, vec!["tune=3".to_string()]);
}

#[test]
fn hooks_may_mutate_the_live_context() {
    let env = env();
    // A pre-opcode hook that stages an extra item turns DROP 1 into a
    // valid single-item script.
    let script = parse_script(&env, "DROP").unwrap();
    let mut table = PluginTable::default();
    table.pre_opcode = Some(Box::new(|ctx, _tok| {
        bsst::plugins::push_custom_value(ctx, vec![0x07]);
    }));
    let root = symex_script(&env, &script, &mut table).unwrap();
    let leaves = root.leaves();
    assert_eq!(leaves.len(), 1);
    let ctx = leaves[0].0;
    assert!(!ctx.is_failed());
    assert_eq!(ctx.witness_count, 1);
}

#[test]
fn checksig_track_plugin_warns_end_to_end() {
    let mut env = env();
    env.plugins = vec!["checksig_track".to_string()];
    let report = bsst::analyze_to_report(&env, "DUP DROP").unwrap();
    assert!(report.contains(WARN_NO_SIG_CHECK));

    let quiet = bsst::analyze_to_report(&env, "CHECKSIGVERIFY 1").unwrap();
    assert!(!quiet.contains(WARN_NO_SIG_CHECK));
}
