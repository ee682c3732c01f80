//! Declarative test-instance model.
//!
//! An instance names a tool, an argv template with textual placeholders, the
//! seeds to run, a fault model, and the stop conditions that decide
//! pass/fail. Placeholder substitution is position-independent textual
//! replacement, so composite and sweep cases compose by ordinary string
//! substitution without a per-tool schema.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::CAMPAIGN_NAME;
use crate::taxonomy::{FaultModel, Tags, Tier, Tool, group_for_name};

/// Replaced by the run directory for this `(instance, seed)`.
pub const PLACEHOLDER_RUN_DIR: &str = "<RUN_DIR>";
/// Replaced by the decimal seed.
pub const PLACEHOLDER_SEED: &str = "<SEED>";
/// Replaced by the discovered database root from a prior composite step.
pub const PLACEHOLDER_DB_DIR: &str = "<DB_DIR>";
/// Replaced by the previous step's database root.
pub const PLACEHOLDER_PREV_DB_DIR: &str = "<PREV_DB_DIR>";

/// Stop-condition bundle evaluated after every run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopCondition {
    /// Nonzero exit fails the run (stress with a fault model is exempt when
    /// final verification holds).
    pub require_termination: bool,
    /// The tool-specific success marker must appear in `output.log`.
    pub require_final_verification_pass: bool,
    /// The external oracle must report a consistent database.
    pub require_oracle_check_consistency_ok: bool,
    /// Whether failure fingerprints are persisted to the ledger.
    pub dedupe_by_fingerprint: bool,
}

impl Default for StopCondition {
    fn default() -> Self {
        Self {
            require_termination: true,
            require_final_verification_pass: false,
            require_oracle_check_consistency_ok: false,
            dedupe_by_fingerprint: true,
        }
    }
}

/// A named test configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    /// Unique dotted-path name, e.g. `stress.read.corruption.1in7`.
    pub name: String,
    pub tier: Tier,
    pub tool: Tool,
    pub requires_oracle: bool,
    pub fault_model: FaultModel,
    /// Argv template; placeholders are substituted textually per token.
    pub args: Vec<String>,
    /// Applied on top of the inherited environment.
    pub env: BTreeMap<String, String>,
    /// Nonempty, duplicate-free; each seed produces an independent run.
    pub seeds: Vec<u64>,
    pub stop: StopCondition,
}

impl Instance {
    /// Minimal constructor with the common defaults.
    #[must_use]
    pub fn new(name: impl Into<String>, tier: Tier, tool: Tool) -> Self {
        Self {
            name: name.into(),
            tier,
            tool,
            requires_oracle: false,
            fault_model: FaultModel::none(),
            args: Vec::new(),
            env: BTreeMap::new(),
            seeds: vec![1],
            stop: StopCondition::default(),
        }
    }

    /// Resolve the binary to invoke.
    ///
    /// `Golden` resolves to the host test-framework driver with arguments
    /// passed verbatim; every other tool joins its binary name onto
    /// `bin_dir`.
    #[must_use]
    pub fn resolve_binary(&self, bin_dir: &Path) -> PathBuf {
        match self.tool {
            Tool::Golden => PathBuf::from(self.tool.binary_name()),
            _ => bin_dir.join(self.tool.binary_name()),
        }
    }

    /// Derive the fixed-schema tag record for this instance.
    #[must_use]
    pub fn tags(&self) -> Tags {
        let kind = if self.name.starts_with("status.") {
            "status".to_owned()
        } else {
            self.tool.token().to_owned()
        };
        Tags {
            campaign: CAMPAIGN_NAME.to_owned(),
            tier: self.tier.token().to_owned(),
            tool: self.tool.token().to_owned(),
            kind,
            oracle_required: self.requires_oracle.to_string(),
            group: group_for_name(&self.name),
            fault_kind: self.fault_model.kind.token().to_owned(),
            fault_scope: self.fault_model.scope.token().to_owned(),
        }
    }

    /// Validate instance-local invariants, returning all diagnostics.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut diagnostics = Vec::new();
        if self.name.is_empty() {
            diagnostics.push("instance name must be non-empty".to_owned());
        }
        if self.seeds.is_empty() {
            diagnostics.push(format!("instance {}: seeds must be non-empty", self.name));
        }
        let mut seen = std::collections::BTreeSet::new();
        for seed in &self.seeds {
            if !seen.insert(seed) {
                diagnostics.push(format!("instance {}: duplicate seed {seed}", self.name));
            }
        }
        diagnostics
    }
}

/// Values available for placeholder substitution.
#[derive(Debug, Clone, Default)]
pub struct Substitution {
    pub run_dir: String,
    pub seed: u64,
    /// Empty outside composite mode.
    pub db_dir: String,
    /// Empty outside composite mode.
    pub prev_db_dir: String,
    /// Sweep parameter values, keyed by parameter name (lowercase).
    pub params: BTreeMap<String, String>,
}

impl Substitution {
    /// Substitute every placeholder across `args`.
    ///
    /// Substitution is textual and idempotent: tokens without placeholders
    /// pass through untouched, and substituted values are never re-scanned.
    #[must_use]
    pub fn apply(&self, args: &[String]) -> Vec<String> {
        args.iter().map(|arg| self.apply_one(arg)).collect()
    }

    fn apply_one(&self, arg: &str) -> String {
        let out = arg
            .replace(PLACEHOLDER_RUN_DIR, &self.run_dir)
            .replace(PLACEHOLDER_SEED, &self.seed.to_string())
            .replace(PLACEHOLDER_DB_DIR, &self.db_dir)
            .replace(PLACEHOLDER_PREV_DB_DIR, &self.prev_db_dir);
        apply_params(&out, &self.params)
    }
}

/// Substitute only sweep parameters, leaving the runtime placeholders
/// (`<RUN_DIR>`, `<SEED>`, `<DB_DIR>`, `<PREV_DB_DIR>`) for the runner.
#[must_use]
pub fn substitute_params(args: &[String], params: &BTreeMap<String, String>) -> Vec<String> {
    args.iter().map(|arg| apply_params(arg, params)).collect()
}

fn apply_params(arg: &str, params: &BTreeMap<String, String>) -> String {
    let mut out = arg.to_owned();
    for (param, value) in params {
        let placeholder = format!("<{}>", param.to_uppercase());
        out = out.replace(&placeholder, value);
    }
    out
}
