//! Report composition: a pure function of the completed path tree and the
//! settings. Sections render in a fixed order; content shared by every
//! valid path lifts into an "All valid paths" block.

use std::collections::BTreeMap;

use crate::config::SymEnvironment;
use crate::script::parser::ScriptInfo;
use crate::symbolic::state::{BranchLabel, Branchpoint, Enforcement, ExecContext};
use crate::symbolic::value::RenderCtx;

pub fn render_report(env: &SymEnvironment, script: &ScriptInfo, root: &Branchpoint) -> String {
    let mut out = String::new();
    let leaves = root.leaves();
    let ref_maps = resolve_ref_conflicts(&leaves);

    decoded_script(&mut out, script);
    unexplored_note(&mut out, &leaves);
    valid_paths(&mut out, &leaves);
    enforcements_section(env, &mut out, script, root, &leaves, &ref_maps);
    unused_values(&mut out, script, &leaves, &ref_maps);
    witness_usage(env, &mut out, script, &leaves, &ref_maps);
    warnings_section(&mut out, &leaves);
    failures_section(&mut out, script, &leaves, &ref_maps);
    data_references(&mut out, script, &leaves, &ref_maps);
    out
}

type Leaf<'a> = (&'a ExecContext, Vec<&'a BranchLabel>);

fn section(out: &mut String, title: &str) {
    if !out.is_empty() {
        out.push('\n');
    }
    out.push_str(title);
    out.push('\n');
    out.push_str(&"=".repeat(title.len()));
    out.push_str("\n\n");
}

fn label_render(label: &BranchLabel) -> String {
    // Conditional forks read best in the "When <cond> :: [OP @ pos]" form;
    // dynamic-access fanout keeps the compact value-listing form.
    if label.choice == "True" || label.choice == "False" {
        label.render_v2()
    } else {
        label.render_v1()
    }
}

fn path_header(out: &mut String, trail: &[&BranchLabel]) {
    let lines: Vec<String> = if trail.is_empty() {
        vec!["[Root]".to_string()]
    } else {
        trail.iter().map(|l| label_render(l)).collect()
    };
    let width = lines.iter().map(|l| l.len()).max().unwrap_or(0);
    for line in &lines {
        out.push_str(line);
        out.push('\n');
    }
    out.push_str(&"-".repeat(width));
    out.push('\n');
}

fn decoded_script(out: &mut String, script: &ScriptInfo) {
    section(out, "Decoded script:");
    for tok in &script.tokens {
        out.push_str(&format!("  {}:L{}: {}\n", tok.pc, tok.line, tok.text));
    }
}

fn unexplored_note(out: &mut String, leaves: &[Leaf<'_>]) {
    let unexplored: Vec<&Leaf<'_>> = leaves.iter().filter(|(ctx, _)| ctx.unexplored).collect();
    if unexplored.is_empty() {
        return;
    }
    section(out, "Note: unexplored paths:");
    for (_, trail) in unexplored.iter().map(|l| (&l.0, &l.1)) {
        for label in trail.iter() {
            out.push_str(&format!("  {}\n", label_render(label)));
        }
    }
}

fn valid_leaves<'a, 'b>(leaves: &'b [Leaf<'a>]) -> Vec<&'b Leaf<'a>> {
    leaves
        .iter()
        .filter(|(ctx, _)| !ctx.is_failed() && !ctx.unexplored)
        .collect()
}

fn valid_paths(out: &mut String, leaves: &[Leaf<'_>]) {
    section(out, "Valid paths:");
    for (_, trail) in valid_leaves(leaves).iter().map(|l| (&l.0, &l.1)) {
        let lines: Vec<String> = if trail.is_empty() {
            vec!["[Root]".to_string()]
        } else {
            trail.iter().map(|l| label_render(l)).collect()
        };
        for line in lines {
            out.push_str(&line);
            out.push('\n');
        }
        out.push('\n');
    }
}

fn enforcement_line(
    env: &SymEnvironment,
    e: &Enforcement,
    rctx: &RenderCtx<'_>,
) -> Option<String> {
    if env.hide_always_true_enforcements && e.always_true {
        return None;
    }
    let marker = if e.always_true {
        "<*> "
    } else if e.local_always_true {
        "{*} "
    } else {
        ""
    };
    let cond = e.cond.render(rctx);
    if env.tag_enforcements_with_position {
        Some(format!("        {marker}{cond} @ {}", e.pos))
    } else {
        Some(format!("        {marker}{cond}"))
    }
}

fn enforcements_section(
    env: &SymEnvironment,
    out: &mut String,
    script: &ScriptInfo,
    root: &Branchpoint,
    leaves: &[Leaf<'_>],
    ref_maps: &[BTreeMap<usize, String>],
) {
    section(out, "Enforced constraints per path:");

    // Root-level lifted enforcements, and a single valid path, render under
    // the shared header.
    let valid = valid_leaves(leaves);
    let single_leaf_root = valid.len() == 1 && valid[0].1.is_empty();
    let mut all_lines: Vec<String> = Vec::new();
    {
        let empty = BTreeMap::new();
        let rctx = RenderCtx::new(&script.aliases, &empty);
        for e in &root.lifted {
            if let Some(line) = enforcement_line(env, e, &rctx) {
                all_lines.push(line);
            }
        }
    }
    if single_leaf_root {
        let rctx = RenderCtx::new(&script.aliases, &ref_maps[leaf_index(leaves, valid[0])]);
        for e in &valid[0].0.enforcements {
            if let Some(line) = enforcement_line(env, e, &rctx) {
                all_lines.push(line);
            }
        }
    }
    if !all_lines.is_empty() {
        let header = "All valid paths:";
        out.push_str(header);
        out.push('\n');
        out.push_str(&"-".repeat(header.len()));
        out.push('\n');
        out.push('\n');
        for line in all_lines {
            out.push_str(&line);
            out.push('\n');
        }
        out.push('\n');
    }
    if single_leaf_root {
        return;
    }

    // Inner lifted groups and per-leaf remainders, in traversal order.
    render_enforcement_tree(env, out, script, root, leaves, ref_maps, &mut Vec::new());
}

fn render_enforcement_tree<'a>(
    env: &SymEnvironment,
    out: &mut String,
    script: &ScriptInfo,
    bp: &'a Branchpoint,
    leaves: &[Leaf<'_>],
    ref_maps: &[BTreeMap<usize, String>],
    trail: &mut Vec<&'a BranchLabel>,
) {
    if let Some(label) = &bp.label {
        trail.push(label);
        let mut lines = Vec::new();
        if let Some(ctx) = &bp.context {
            if !ctx.is_failed() && !ctx.unexplored {
                let idx = leaves
                    .iter()
                    .position(|(c, _)| std::ptr::eq(*c, ctx))
                    .unwrap_or(0);
                let rctx = RenderCtx::new(&script.aliases, &ref_maps[idx]);
                for e in &ctx.enforcements {
                    if let Some(line) = enforcement_line(env, e, &rctx) {
                        lines.push(line);
                    }
                }
            }
        } else {
            let empty = BTreeMap::new();
            let rctx = RenderCtx::new(&script.aliases, &empty);
            for e in &bp.lifted {
                if let Some(line) = enforcement_line(env, e, &rctx) {
                    lines.push(line);
                }
            }
        }
        if !lines.is_empty() {
            path_header(out, trail);
            out.push('\n');
            for line in lines {
                out.push_str(&line);
                out.push('\n');
            }
            out.push('\n');
        }
    }
    for child in &bp.children {
        render_enforcement_tree(env, out, script, child, leaves, ref_maps, trail);
    }
    if bp.label.is_some() {
        trail.pop();
    }
}

fn leaf_index(leaves: &[Leaf<'_>], leaf: &Leaf<'_>) -> usize {
    leaves
        .iter()
        .position(|(c, _)| std::ptr::eq(*c, leaf.0))
        .unwrap_or(0)
}

fn unused_values(
    out: &mut String,
    script: &ScriptInfo,
    leaves: &[Leaf<'_>],
    ref_maps: &[BTreeMap<usize, String>],
) {
    let valid = valid_leaves(leaves);
    let mut per_leaf: Vec<(usize, Vec<String>)> = Vec::new();
    for leaf in &valid {
        let idx = leaf_index(leaves, leaf);
        let rctx = RenderCtx::new(&script.aliases, &ref_maps[idx]);
        let lines: Vec<String> = leaf
            .0
            .unused()
            .iter()
            .map(|(pos, v)| format!("        {} from {}", v.render(&rctx), pos))
            .collect();
        per_leaf.push((idx, lines));
    }
    if per_leaf.iter().all(|(_, l)| l.is_empty()) {
        return;
    }
    section(out, "Unused values:");
    let first = &per_leaf[0].1;
    if per_leaf.iter().all(|(_, l)| l == first) {
        let header = "All valid paths:";
        out.push_str(header);
        out.push('\n');
        out.push_str(&"-".repeat(header.len()));
        out.push('\n');
        for line in first {
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
        return;
    }
    for (leaf, (_, lines)) in valid.iter().zip(&per_leaf) {
        if lines.is_empty() {
            continue;
        }
        path_header(out, &leaf.1);
        for line in lines {
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
    }
}

fn witness_usage(
    env: &SymEnvironment,
    out: &mut String,
    script: &ScriptInfo,
    leaves: &[Leaf<'_>],
    ref_maps: &[BTreeMap<usize, String>],
) {
    let title = if env.produce_model_values && env.z3_enabled {
        "Witness usage and model values:"
    } else {
        "Witness usage and stack contents:"
    };
    section(out, title);
    for leaf in valid_leaves(leaves) {
        let (ctx, trail) = (&leaf.0, &leaf.1);
        let idx = leaf_index(leaves, leaf);
        let rctx = RenderCtx::new(&script.aliases, &ref_maps[idx]);
        path_header(out, trail);
        out.push_str(&format!("Witnesses used: {}\n", ctx.witness_count));

        let named: Vec<_> = ctx
            .model_values
            .iter()
            .filter(|m| !m.name.starts_with("stack:"))
            .collect();
        if !named.is_empty() {
            out.push_str("Model values:\n");
            for m in named {
                let rendered: Vec<String> =
                    m.samples.iter().map(|s| s.to_string()).collect();
                let value_part = match rendered.len() {
                    0 => "<none>".to_string(),
                    1 => rendered[0].clone(),
                    _ => format!("{{{}}}", rendered.join(", ")),
                };
                out.push_str(&format!("        {} = {value_part}", m.name));
                if let Some(sizes) = &m.sizes {
                    let list: Vec<String> = sizes.iter().map(|s| s.to_string()).collect();
                    if list.len() == 1 {
                        out.push_str(&format!(" ; size = {}", list[0]));
                    } else {
                        out.push_str(&format!(" ; sizes {{{}}}", list.join(", ")));
                    }
                }
                out.push('\n');
            }
        }

        out.push_str("Stack:\n");
        for (i, v) in ctx.stack.iter().enumerate().rev() {
            let mut line = format!("        {}", v.render(&rctx));
            if let Some(m) = ctx
                .model_values
                .iter()
                .find(|m| m.name == format!("stack:{i}"))
            {
                if let Some(first) = m.samples.first() {
                    line.push_str(&format!(" : {first}"));
                }
                if let Some(sizes) = &m.sizes {
                    if sizes.len() > 1 {
                        let list: Vec<String> = sizes.iter().map(|s| s.to_string()).collect();
                        line.push_str(&format!(" ; sizes {{{}}}", list.join(", ")));
                    }
                }
            }
            out.push_str(&line);
            out.push('\n');
        }
        if !ctx.altstack.is_empty() {
            out.push_str("Altstack:\n");
            for v in ctx.altstack.iter().rev() {
                out.push_str(&format!("        {}\n", v.render(&rctx)));
            }
        }
        out.push('\n');
    }
}

fn warnings_section(out: &mut String, leaves: &[Leaf<'_>]) {
    let with_warnings: Vec<_> = leaves
        .iter()
        .filter(|(ctx, _)| !ctx.warnings.is_empty() && !ctx.unexplored)
        .collect();
    if with_warnings.is_empty() {
        return;
    }
    section(out, "Warnings per path:");
    for (ctx, trail) in with_warnings.iter().map(|l| (&l.0, &l.1)) {
        path_header(out, trail);
        for w in &ctx.warnings {
            out.push_str(&format!("        {} @ {}\n", w.text, w.pos));
        }
        out.push('\n');
    }
}

fn failures_section(
    out: &mut String,
    script: &ScriptInfo,
    leaves: &[Leaf<'_>],
    ref_maps: &[BTreeMap<usize, String>],
) {
    let failed: Vec<_> = leaves
        .iter()
        .filter(|(ctx, _)| ctx.is_failed() || ctx.unexplored)
        .collect();
    if failed.is_empty() {
        return;
    }
    section(out, "Failures per path:");
    for leaf in failed {
        let (ctx, trail) = (&leaf.0, &leaf.1);
        let idx = leaf_index(leaves, leaf);
        let rctx = RenderCtx::new(&script.aliases, &ref_maps[idx]);
        path_header(out, trail);
        if ctx.unexplored {
            out.push_str("        The path was not explored\n\n");
            continue;
        }
        if let Some(failure) = &ctx.failure {
            for code in &failure.codes {
                out.push_str(&format!("        {code}\n"));
            }
        }
        let (stack, altstack) = match &ctx.failure_stack {
            Some((s, a)) => (s, a),
            None => (&ctx.stack, &ctx.altstack),
        };
        let stack_strs: Vec<String> = stack.iter().rev().map(|v| v.render(&rctx)).collect();
        out.push_str(&format!("        stack: [{}]\n", stack_strs.join(", ")));
        if !altstack.is_empty() {
            let alt_strs: Vec<String> =
                altstack.iter().rev().map(|v| v.render(&rctx)).collect();
            out.push_str(&format!("        altstack: [{}]\n", alt_strs.join(", ")));
        }
        out.push('\n');
    }
}

fn data_references(
    out: &mut String,
    script: &ScriptInfo,
    leaves: &[Leaf<'_>],
    ref_maps: &[BTreeMap<usize, String>],
) {
    let valid = valid_leaves(leaves);
    let empty = BTreeMap::new();
    let mut per_leaf: Vec<Vec<String>> = Vec::new();
    for leaf in &valid {
        let idx = leaf_index(leaves, leaf);
        let rctx = RenderCtx::new(&script.aliases, &empty);
        let mut lines = Vec::new();
        for (v_key, name) in &ref_maps[idx] {
            // Find the bound value by instance key for display.
            if let Some((_, value)) = leaf
                .0
                .data_refs
                .iter()
                .find(|(_, v)| crate::symbolic::value::ptr_key(v) == *v_key)
            {
                lines.push(format!("        &{name} = {}", value.render(&rctx)));
            }
        }
        lines.sort();
        per_leaf.push(lines);
    }
    if per_leaf.iter().all(|l| l.is_empty()) {
        return;
    }
    section(out, "Data references:");
    let first = &per_leaf[0];
    if per_leaf.iter().all(|l| l == first) {
        let header = "All valid paths:";
        out.push_str(header);
        out.push('\n');
        out.push_str(&"-".repeat(header.len()));
        out.push('\n');
        for line in first {
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
        return;
    }
    for (leaf, lines) in valid.iter().zip(&per_leaf) {
        if lines.is_empty() {
            continue;
        }
        path_header(out, &leaf.1);
        for line in lines {
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
    }
}

/// Cross-path data-reference naming: the first path to bind a name keeps it;
/// a later path binding the same name to a different value gets apostrophes.
fn resolve_ref_conflicts(leaves: &[Leaf<'_>]) -> Vec<BTreeMap<usize, String>> {
    let mut global: BTreeMap<String, String> = BTreeMap::new();
    let mut maps = Vec::with_capacity(leaves.len());
    for (ctx, _) in leaves {
        let mut map: BTreeMap<usize, String> = BTreeMap::new();
        for (name, value) in &ctx.data_refs {
            let canonical = value.canonical();
            let mut chosen = name.clone();
            loop {
                match global.get(&chosen) {
                    Some(existing) if *existing != canonical => chosen.push('\''),
                    _ => break,
                }
            }
            global.insert(chosen.clone(), canonical);
            map.insert(crate::symbolic::value::ptr_key(value), chosen);
        }
        maps.push(map);
    }
    maps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbolic::state::{ExecContext, Pos};
    use crate::symbolic::value::{OpPos, SymValue};

    #[test]
    fn section_headers_are_underlined_to_length() {
        let mut out = String::new();
        section(&mut out, "Valid paths:");
        assert!(out.contains("Valid paths:\n============\n"));
    }

    #[test]
    fn path_header_underlines_to_longest_line() {
        let label = BranchLabel {
            op: "IF".to_string(),
            arg: None,
            pos: OpPos { pc: 0, line: 1 },
            choice: "True".to_string(),
            cond_str: "BOOL(wit0)".to_string(),
        };
        let mut out = String::new();
        path_header(&mut out, &[&label]);
        assert_eq!(
            out,
            "When BOOL(wit0) :: [IF @ 0:L1]\n------------------------------\n"
        );
    }

    #[test]
    fn dynamic_labels_use_the_compact_form() {
        let label = BranchLabel {
            op: "PICK".to_string(),
            arg: Some("wit0".to_string()),
            pos: OpPos { pc: 0, line: 1 },
            choice: "0".to_string(),
            cond_str: "wit0 = 0".to_string(),
        };
        assert_eq!(label_render(&label), "PICK wit0 @ 0:L1 : 0");
    }

    #[test]
    fn ref_conflicts_get_apostrophes() {
        let mut a = ExecContext::new();
        let va = SymValue::number(1);
        a.bind_ref("x", &va);
        let mut b = ExecContext::new();
        let vb = SymValue::number(2);
        b.bind_ref("x", &vb);
        let binding_a = (&a, vec![]);
        let binding_b = (&b, vec![]);
        let leaves: Vec<Leaf<'_>> = vec![
            (binding_a.0, binding_a.1),
            (binding_b.0, binding_b.1),
        ];
        let maps = resolve_ref_conflicts(&leaves);
        let name_a: Vec<&String> = maps[0].values().collect();
        let name_b: Vec<&String> = maps[1].values().collect();
        assert_eq!(name_a, vec!["x"]);
        assert_eq!(name_b, vec!["x'"]);
    }

    #[test]
    fn enforcement_marker_rendering() {
        let env = SymEnvironment::default();
        let aliases = BTreeMap::new();
        let empty = BTreeMap::new();
        let rctx = RenderCtx::new(&aliases, &empty);
        let mut e = crate::symbolic::state::Enforcement {
            cond: SymValue::bool_of(&SymValue::witness(0)),
            pos: Pos::End,
            always_true: true,
            local_always_true: false,
            track_idx: None,
        };
        assert_eq!(
            enforcement_line(&env, &e, &rctx).unwrap(),
            "        <*> BOOL(wit0) @ END"
        );
        e.always_true = false;
        e.local_always_true = true;
        assert_eq!(
            enforcement_line(&env, &e, &rctx).unwrap(),
            "        {*} BOOL(wit0) @ END"
        );
    }
}
