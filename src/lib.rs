//! B'SST: a symbolic tracer for the Bitcoin/Elements script family.
//!
//! Given a textual script, the engine enumerates every feasible control-flow
//! path, symbolically executes each opcode against a model stack and
//! alt-stack, prunes infeasible paths through the Z3 backend, and composes a
//! structured report per path: enforced constraints, warnings, failures,
//! witness usage, model values, unused values and data-reference bindings.

pub mod assertions;
pub mod config;
pub mod error;
pub mod plugins;
pub mod report;
pub mod runtime;
pub mod script;
pub mod solver;
pub mod symbolic;

use crate::config::SymEnvironment;
use crate::error::Result;
use crate::plugins::PluginTable;
use crate::script::parser::{parse_script, ScriptInfo};
use crate::symbolic::state::Branchpoint;

fn build_plugin_table(env: &SymEnvironment) -> Result<PluginTable> {
    let mut table = PluginTable::default();
    table
        .install_all(env)
        .map_err(crate::error::BsstError::Config)?;
    if let Some(hook) = table.plugin_settings.as_mut() {
        for raw in &env.plugin_args {
            let (name, payload) = raw.split_once(':').unwrap_or((raw.as_str(), ""));
            hook(env, name, payload);
        }
    }
    Ok(table)
}

fn analyze_with_plugins(
    env: &SymEnvironment,
    source: &str,
    table: &mut PluginTable,
) -> Result<(ScriptInfo, Branchpoint)> {
    env.validate()?;
    let source = match table.parse_input_file.as_mut() {
        Some(hook) => {
            let raw = env
                .plugin_raw_input
                .clone()
                .unwrap_or_else(|| source.to_string());
            hook(env, raw)
        }
        None => source.to_string(),
    };
    let script = parse_script(env, &source)?;
    let root = symbolic::engine::symex_script(env, &script, table)?;
    Ok((script, root))
}

/// Parse and symbolically execute a script source, returning the parsed
/// script and the completed path tree.
pub fn analyze_source(
    env: &SymEnvironment,
    source: &str,
) -> Result<(ScriptInfo, Branchpoint)> {
    let mut table = build_plugin_table(env)?;
    analyze_with_plugins(env, source, &mut table)
}

/// Full pipeline: analysis plus report rendering, with the report hooks
/// invoked around composition.
pub fn analyze_to_report(env: &SymEnvironment, source: &str) -> Result<String> {
    let mut table = build_plugin_table(env)?;
    let (script, root) = analyze_with_plugins(env, source, &mut table)?;
    if let Some(hook) = table.report_start.as_mut() {
        hook(&root);
    }
    let text = report::render_report(env, &script, &root);
    if let Some(hook) = table.report_end.as_mut() {
        hook(&root);
    }
    Ok(text)
}
