//! CLI surface. Every flag maps one-to-one onto a `SymEnvironment` field;
//! boolean flags take explicit values (`--z3-enabled=true`) so that defaults
//! can be overridden in both directions.

use clap::Parser;

use crate::config::{ModelValueGlob, SigVersion, SymEnvironment};
use crate::error::{BsstError, Result};

#[derive(Debug, Parser)]
#[command(
    name = "bsst",
    version,
    about = "Symbolic tracer for Bitcoin/Elements script"
)]
pub struct Cli {
    /// Script source path; `-` means stdin.
    #[arg(long, default_value = "-")]
    pub input_file: String,

    #[arg(long, default_value_t = false, action = clap::ArgAction::Set)]
    pub z3_enabled: bool,
    #[arg(long, default_value_t = false, action = clap::ArgAction::Set)]
    pub is_elements: bool,
    /// One of: base, witness_v0, tapscript.
    #[arg(long, default_value = "base")]
    pub sigversion: String,
    #[arg(long, default_value_t = false, action = clap::ArgAction::Set)]
    pub is_incomplete_script: bool,
    #[arg(long, default_value_t = false, action = clap::ArgAction::Set)]
    pub is_miner: bool,

    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub minimaldata_flag: bool,
    #[arg(long, default_value_t = false, action = clap::ArgAction::Set)]
    pub minimaldata_flag_strict: bool,
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub minimalif_flag: bool,
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub strictenc_flag: bool,
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub low_s_flag: bool,
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub nullfail_flag: bool,
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub nulldummy_flag: bool,
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub cleanstack_flag: bool,
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub witness_pubkeytype_flag: bool,
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub discourage_upgradeable_pubkey_type_flag: bool,

    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub produce_model_values: bool,
    /// Glob over value names with optional sample count, e.g. `wit*:3`.
    #[arg(long, value_delimiter = ',')]
    pub produce_model_values_for: Vec<String>,
    #[arg(long, default_value_t = false, action = clap::ArgAction::Set)]
    pub report_model_value_sizes: bool,
    #[arg(long, default_value_t = false, action = clap::ArgAction::Set)]
    pub sort_model_values: bool,

    #[arg(long, default_value_t = 3)]
    pub max_samples_for_dynamic_stack_access: usize,
    /// Program counters to dump state at; `*` means all opcodes.
    #[arg(long, value_delimiter = ',')]
    pub points_of_interest: Vec<String>,

    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub check_always_true_enforcements: bool,
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub mark_path_local_always_true_enforcements: bool,
    #[arg(long, default_value_t = false, action = clap::ArgAction::Set)]
    pub hide_always_true_enforcements: bool,

    #[arg(long, default_value_t = 5)]
    pub solver_timeout_seconds: u64,
    #[arg(long, default_value_t = 3)]
    pub solver_increasing_timeout_multiplier: u64,
    #[arg(long, default_value_t = 3600)]
    pub solver_increasing_timeout_max: u64,
    #[arg(long, default_value_t = 6)]
    pub max_solver_tries: u32,
    #[arg(long, default_value_t = false, action = clap::ArgAction::Set)]
    pub exit_on_solver_result_unknown: bool,

    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub use_parallel_solving: bool,
    /// 0 selects the CPU count.
    #[arg(long, default_value_t = 0)]
    pub parallel_solving_num_processes: usize,

    #[arg(long, default_value_t = false, action = clap::ArgAction::Set)]
    pub use_z3_incremental_mode: bool,
    #[arg(long, default_value_t = false, action = clap::ArgAction::Set)]
    pub disable_z3_randomization: bool,
    #[arg(long, default_value_t = false, action = clap::ArgAction::Set)]
    pub do_progressive_z3_checks: bool,
    #[arg(long, default_value_t = false, action = clap::ArgAction::Set)]
    pub all_z3_assertions_are_tracked_assertions: bool,
    #[arg(long, default_value_t = false, action = clap::ArgAction::Set)]
    pub disable_error_code_tracking_with_z3: bool,
    #[arg(long, default_value_t = false, action = clap::ArgAction::Set)]
    pub z3_debug: bool,

    #[arg(long, default_value_t = false, action = clap::ArgAction::Set)]
    pub tag_data_with_position: bool,
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub tag_enforcements_with_position: bool,
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub use_deterministic_arguments_order: bool,

    /// Treat a script fragment as a failure trap for branch skipping.
    #[arg(long)]
    pub skip_immediately_failed_branches_on: Option<String>,
    #[arg(long, default_value_t = false, action = clap::ArgAction::Set)]
    pub assume_no_160bit_hash_collisions: bool,

    #[arg(long, default_value = "//")]
    pub comment_marker: String,
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub restrict_data_reference_names: bool,

    #[arg(long, default_value_t = 1_000_000)]
    pub max_tx_size: u64,
    #[arg(long, default_value_t = 24)]
    pub max_num_inputs: u64,
    #[arg(long, default_value_t = 24)]
    pub max_num_outputs: u64,

    #[arg(long, value_delimiter = ',')]
    pub explicitly_enabled_opcodes: Vec<String>,
    /// Bundled plugin names to activate.
    #[arg(long, value_delimiter = ',')]
    pub plugins: Vec<String>,
    /// Plugins that contribute custom opcodes; same registry as --plugins.
    #[arg(long, value_delimiter = ',')]
    pub op_plugins: Vec<String>,
    /// Raw input handed to a parse_input_file plugin instead of script text.
    #[arg(long)]
    pub plugin_raw_input: Option<String>,
    /// Per-plugin argument passthrough, `<name>:<value>`.
    #[arg(long = "bsst-plugin", value_delimiter = ',')]
    pub plugin_args: Vec<String>,

    #[arg(long, default_value_t = false, action = clap::ArgAction::Set)]
    pub log_progress: bool,
    #[arg(long, default_value_t = false, action = clap::ArgAction::Set)]
    pub log_solving_attempts: bool,
    #[arg(long, default_value_t = false, action = clap::ArgAction::Set)]
    pub log_solving_attempts_to_stderr: bool,
}

impl Cli {
    pub fn into_env(self) -> Result<SymEnvironment> {
        let sigversion = SigVersion::parse(&self.sigversion).ok_or_else(|| {
            BsstError::Config(format!(
                "sigversion must be base, witness_v0 or tapscript, got `{}`",
                self.sigversion
            ))
        })?;
        let mut globs = Vec::with_capacity(self.produce_model_values_for.len());
        for raw in &self.produce_model_values_for {
            globs.push(ModelValueGlob::parse(raw)?);
        }
        let env = SymEnvironment {
            input_file: self.input_file,
            z3_enabled: self.z3_enabled,
            is_elements: self.is_elements,
            sigversion,
            is_incomplete_script: self.is_incomplete_script,
            is_miner: self.is_miner,
            minimaldata_flag: self.minimaldata_flag,
            minimaldata_flag_strict: self.minimaldata_flag_strict,
            minimalif_flag: self.minimalif_flag,
            strictenc_flag: self.strictenc_flag,
            low_s_flag: self.low_s_flag,
            nullfail_flag: self.nullfail_flag,
            nulldummy_flag: self.nulldummy_flag,
            cleanstack_flag: self.cleanstack_flag,
            witness_pubkeytype_flag: self.witness_pubkeytype_flag,
            discourage_upgradeable_pubkey_type_flag: self.discourage_upgradeable_pubkey_type_flag,
            produce_model_values: self.produce_model_values,
            produce_model_values_for: globs,
            report_model_value_sizes: self.report_model_value_sizes,
            sort_model_values: self.sort_model_values,
            max_samples_for_dynamic_stack_access: self.max_samples_for_dynamic_stack_access,
            points_of_interest: self.points_of_interest,
            check_always_true_enforcements: self.check_always_true_enforcements,
            mark_path_local_always_true_enforcements: self
                .mark_path_local_always_true_enforcements,
            hide_always_true_enforcements: self.hide_always_true_enforcements,
            solver_timeout_seconds: self.solver_timeout_seconds,
            solver_increasing_timeout_multiplier: self.solver_increasing_timeout_multiplier,
            solver_increasing_timeout_max: self.solver_increasing_timeout_max,
            max_solver_tries: self.max_solver_tries,
            exit_on_solver_result_unknown: self.exit_on_solver_result_unknown,
            use_parallel_solving: self.use_parallel_solving,
            parallel_solving_num_processes: self.parallel_solving_num_processes,
            use_z3_incremental_mode: self.use_z3_incremental_mode,
            disable_z3_randomization: self.disable_z3_randomization,
            do_progressive_z3_checks: self.do_progressive_z3_checks,
            all_z3_assertions_are_tracked_assertions: self
                .all_z3_assertions_are_tracked_assertions,
            disable_error_code_tracking_with_z3: self.disable_error_code_tracking_with_z3,
            z3_debug: self.z3_debug,
            tag_data_with_position: self.tag_data_with_position,
            tag_enforcements_with_position: self.tag_enforcements_with_position,
            use_deterministic_arguments_order: self.use_deterministic_arguments_order,
            skip_immediately_failed_branches_on: self.skip_immediately_failed_branches_on,
            assume_no_160bit_hash_collisions: self.assume_no_160bit_hash_collisions,
            comment_marker: self.comment_marker,
            restrict_data_reference_names: self.restrict_data_reference_names,
            max_tx_size: self.max_tx_size,
            max_num_inputs: self.max_num_inputs,
            max_num_outputs: self.max_num_outputs,
            explicitly_enabled_opcodes: self.explicitly_enabled_opcodes,
            plugins: self.plugins,
            op_plugins: self.op_plugins,
            plugin_raw_input: self.plugin_raw_input,
            plugin_args: self.plugin_args,
            log_progress: self.log_progress,
            log_solving_attempts: self.log_solving_attempts,
            log_solving_attempts_to_stderr: self.log_solving_attempts_to_stderr,
        };
        env.validate()?;
        Ok(env)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_environment_defaults() {
        let cli = Cli::parse_from(["bsst"]);
        let env = cli.into_env().unwrap();
        let defaults = SymEnvironment::default();
        assert_eq!(env.z3_enabled, defaults.z3_enabled);
        assert_eq!(env.minimaldata_flag, defaults.minimaldata_flag);
        assert_eq!(env.cleanstack_flag, defaults.cleanstack_flag);
        assert_eq!(env.max_solver_tries, defaults.max_solver_tries);
        assert_eq!(env.comment_marker, defaults.comment_marker);
    }

    #[test]
    fn explicit_boolean_values_parse() {
        let cli = Cli::parse_from([
            "bsst",
            "--z3-enabled=true",
            "--is-incomplete-script=true",
            "--max-samples-for-dynamic-stack-access=2",
        ]);
        let env = cli.into_env().unwrap();
        assert!(env.z3_enabled);
        assert!(env.is_incomplete_script);
        assert_eq!(env.max_samples_for_dynamic_stack_access, 2);
        assert!(!env.effective_cleanstack());
    }

    #[test]
    fn sigversion_and_globs_parse() {
        let cli = Cli::parse_from([
            "bsst",
            "--sigversion=tapscript",
            "--is-elements=true",
            "--produce-model-values-for=wit*:3",
        ]);
        let env = cli.into_env().unwrap();
        assert_eq!(env.sigversion, SigVersion::Tapscript);
        assert_eq!(env.produce_model_values_for.len(), 1);
        assert_eq!(env.produce_model_values_for[0].samples, 3);
    }

    #[test]
    fn bad_sigversion_is_rejected() {
        let cli = Cli::parse_from(["bsst", "--sigversion=v2"]);
        assert!(cli.into_env().is_err());
    }
}
