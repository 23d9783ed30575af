use crate::error::{BsstError, Result};

/// Script rule set selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigVersion {
    Base,
    WitnessV0,
    Tapscript,
}

impl SigVersion {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Base => "base",
            Self::WitnessV0 => "witness_v0",
            Self::Tapscript => "tapscript",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "base" => Some(Self::Base),
            "witness_v0" => Some(Self::WitnessV0),
            "tapscript" => Some(Self::Tapscript),
            _ => None,
        }
    }
}

/// A `--produce-model-values-for` entry: a glob over value names with an
/// optional sample count, e.g. `wit*:3`.
#[derive(Debug, Clone)]
pub struct ModelValueGlob {
    pub pattern: String,
    pub samples: usize,
}

impl ModelValueGlob {
    pub fn parse(raw: &str) -> Result<Self> {
        let (pattern, samples) = match raw.rsplit_once(':') {
            Some((pat, n)) if n.chars().all(|c| c.is_ascii_digit()) && !n.is_empty() => {
                let n: usize = n
                    .parse()
                    .map_err(|_| BsstError::Config(format!("bad sample count in `{raw}`")))?;
                (pat.to_string(), n)
            }
            _ => (raw.to_string(), 1),
        };
        if pattern.is_empty() {
            return Err(BsstError::Config(format!(
                "empty pattern in model-value glob `{raw}`"
            )));
        }
        Ok(Self { pattern, samples })
    }

    /// Glob match with `*` as the only wildcard.
    pub fn matches(&self, name: &str) -> bool {
        glob_match(&self.pattern, name)
    }
}

pub fn glob_match(pattern: &str, name: &str) -> bool {
    fn inner(p: &[u8], n: &[u8]) -> bool {
        match (p.first(), n.first()) {
            (None, None) => true,
            (Some(b'*'), _) => {
                inner(&p[1..], n) || (!n.is_empty() && inner(p, &n[1..]))
            }
            (Some(pc), Some(nc)) if pc == nc => inner(&p[1..], &n[1..]),
            _ => false,
        }
    }
    inner(pattern.as_bytes(), name.as_bytes())
}

/// The complete, immutable settings object consumed by the engine. One
/// instance is built from the CLI (or by tests) and shared for the whole
/// analysis.
#[derive(Debug, Clone)]
pub struct SymEnvironment {
    pub input_file: String,

    pub z3_enabled: bool,
    pub is_elements: bool,
    pub sigversion: SigVersion,
    pub is_incomplete_script: bool,
    pub is_miner: bool,

    pub minimaldata_flag: bool,
    pub minimaldata_flag_strict: bool,
    pub minimalif_flag: bool,
    pub strictenc_flag: bool,
    pub low_s_flag: bool,
    pub nullfail_flag: bool,
    pub nulldummy_flag: bool,
    pub cleanstack_flag: bool,
    pub witness_pubkeytype_flag: bool,
    pub discourage_upgradeable_pubkey_type_flag: bool,

    pub produce_model_values: bool,
    pub produce_model_values_for: Vec<ModelValueGlob>,
    pub report_model_value_sizes: bool,
    pub sort_model_values: bool,

    pub max_samples_for_dynamic_stack_access: usize,
    pub points_of_interest: Vec<String>,

    pub check_always_true_enforcements: bool,
    pub mark_path_local_always_true_enforcements: bool,
    pub hide_always_true_enforcements: bool,

    pub solver_timeout_seconds: u64,
    pub solver_increasing_timeout_multiplier: u64,
    pub solver_increasing_timeout_max: u64,
    pub max_solver_tries: u32,
    pub exit_on_solver_result_unknown: bool,

    pub use_parallel_solving: bool,
    pub parallel_solving_num_processes: usize,

    pub use_z3_incremental_mode: bool,
    pub disable_z3_randomization: bool,
    pub do_progressive_z3_checks: bool,
    pub all_z3_assertions_are_tracked_assertions: bool,
    pub disable_error_code_tracking_with_z3: bool,
    pub z3_debug: bool,

    pub tag_data_with_position: bool,
    pub tag_enforcements_with_position: bool,
    pub use_deterministic_arguments_order: bool,

    pub skip_immediately_failed_branches_on: Option<String>,
    pub assume_no_160bit_hash_collisions: bool,

    pub comment_marker: String,
    pub restrict_data_reference_names: bool,

    pub max_tx_size: u64,
    pub max_num_inputs: u64,
    pub max_num_outputs: u64,

    pub explicitly_enabled_opcodes: Vec<String>,
    pub plugins: Vec<String>,
    pub op_plugins: Vec<String>,
    pub plugin_raw_input: Option<String>,
    /// `--bsst-plugin <name>:<value>` passthrough arguments.
    pub plugin_args: Vec<String>,

    pub log_progress: bool,
    pub log_solving_attempts: bool,
    pub log_solving_attempts_to_stderr: bool,
}

impl Default for SymEnvironment {
    fn default() -> Self {
        Self {
            input_file: "-".to_string(),
            z3_enabled: false,
            is_elements: false,
            sigversion: SigVersion::Base,
            is_incomplete_script: false,
            is_miner: false,
            minimaldata_flag: true,
            minimaldata_flag_strict: false,
            minimalif_flag: true,
            strictenc_flag: true,
            low_s_flag: true,
            nullfail_flag: true,
            nulldummy_flag: true,
            cleanstack_flag: true,
            witness_pubkeytype_flag: true,
            discourage_upgradeable_pubkey_type_flag: true,
            produce_model_values: true,
            produce_model_values_for: Vec::new(),
            report_model_value_sizes: false,
            sort_model_values: false,
            max_samples_for_dynamic_stack_access: 3,
            points_of_interest: Vec::new(),
            check_always_true_enforcements: true,
            mark_path_local_always_true_enforcements: true,
            hide_always_true_enforcements: false,
            solver_timeout_seconds: 5,
            solver_increasing_timeout_multiplier: 3,
            solver_increasing_timeout_max: 3600,
            max_solver_tries: 6,
            exit_on_solver_result_unknown: false,
            use_parallel_solving: true,
            parallel_solving_num_processes: 0,
            use_z3_incremental_mode: false,
            disable_z3_randomization: false,
            do_progressive_z3_checks: false,
            all_z3_assertions_are_tracked_assertions: false,
            disable_error_code_tracking_with_z3: false,
            z3_debug: false,
            tag_data_with_position: false,
            tag_enforcements_with_position: true,
            use_deterministic_arguments_order: true,
            skip_immediately_failed_branches_on: None,
            assume_no_160bit_hash_collisions: false,
            comment_marker: "//".to_string(),
            restrict_data_reference_names: true,
            max_tx_size: 1_000_000,
            max_num_inputs: 24,
            max_num_outputs: 24,
            explicitly_enabled_opcodes: Vec::new(),
            plugins: Vec::new(),
            op_plugins: Vec::new(),
            plugin_raw_input: None,
            plugin_args: Vec::new(),
            log_progress: false,
            log_solving_attempts: false,
            log_solving_attempts_to_stderr: false,
        }
    }
}

impl SymEnvironment {
    /// Effective cleanstack rule: an incomplete script never checks the
    /// final stack shape.
    pub fn effective_cleanstack(&self) -> bool {
        self.cleanstack_flag && !self.is_incomplete_script
    }

    /// `minimaldata-flag-strict` implies the base flag.
    pub fn effective_minimaldata(&self) -> bool {
        self.minimaldata_flag || self.minimaldata_flag_strict
    }

    pub fn is_tapscript(&self) -> bool {
        self.sigversion == SigVersion::Tapscript
    }

    /// Number of racing workers for one SMT check.
    pub fn effective_solver_workers(&self) -> usize {
        if !self.use_parallel_solving || self.use_z3_incremental_mode {
            return 1;
        }
        if self.parallel_solving_num_processes > 0 {
            self.parallel_solving_num_processes
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.comment_marker.is_empty() {
            return Err(BsstError::Config("comment marker must not be empty".into()));
        }
        if self.max_samples_for_dynamic_stack_access == 0 {
            return Err(BsstError::Config(
                "max-samples-for-dynamic-stack-access must be positive".into(),
            ));
        }
        if self.solver_increasing_timeout_multiplier == 0 {
            return Err(BsstError::Config(
                "solver-increasing-timeout-multiplier must be positive".into(),
            ));
        }
        if self.max_solver_tries == 0 {
            return Err(BsstError::Config("max-solver-tries must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_matching() {
        assert!(glob_match("wit*", "wit0"));
        assert!(glob_match("*", "anything"));
        assert!(glob_match("wit0", "wit0"));
        assert!(!glob_match("wit*", "a1"));
        assert!(glob_match("*VALUE*", "OUTPUT_1_VALUE"));
    }

    #[test]
    fn model_value_glob_parses_sample_count() {
        let g = ModelValueGlob::parse("wit*:3").unwrap();
        assert_eq!(g.pattern, "wit*");
        assert_eq!(g.samples, 3);
        let g = ModelValueGlob::parse("&data").unwrap();
        assert_eq!(g.pattern, "&data");
        assert_eq!(g.samples, 1);
    }

    #[test]
    fn incomplete_script_disables_cleanstack() {
        let mut env = SymEnvironment::default();
        env.is_incomplete_script = true;
        assert!(!env.effective_cleanstack());
        env.is_incomplete_script = false;
        assert!(env.effective_cleanstack());
    }
}
