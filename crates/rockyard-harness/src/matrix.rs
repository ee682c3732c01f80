//! Instance registries: tier matrices, groups, sweeps, and composites.
//!
//! The canonical matrix is built in code, validated before a campaign
//! starts, and selected from by name prefix. Sweeps expand a base instance
//! into concrete siblings (`base/<case_id>`); composites chain steps with a
//! gating policy.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::SYNTHETIC_FAIL_ENV;
use crate::instance::{Instance, StopCondition, substitute_params};
use crate::taxonomy::{FaultErrorType, FaultKind, FaultModel, FaultScope, Tier, Tool};

/// How a composite's pass verdict derives from its steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatingPolicy {
    /// Passed ⇔ every step passed.
    AllSteps,
    /// Passed ⇔ the last step passed; earlier failures are recorded in
    /// artifacts but do not fail the composite.
    LastStep,
}

/// One step of a composite instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositeStep {
    pub instance: Instance,
    /// Receive `<DB_DIR>`/`<PREV_DB_DIR>` resolved from the previous step's
    /// run directory.
    pub discover_db_path: bool,
}

/// An ordered multi-step instance with a gating policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositeInstance {
    pub name: String,
    pub steps: Vec<CompositeStep>,
    pub gating_policy: GatingPolicy,
}

impl CompositeInstance {
    /// Fold per-step verdicts into the composite verdict.
    #[must_use]
    pub fn passed(&self, step_passed: &[bool]) -> bool {
        match self.gating_policy {
            GatingPolicy::AllSteps => step_passed.iter().all(|passed| *passed),
            GatingPolicy::LastStep => step_passed.last().copied().unwrap_or(false),
        }
    }
}

/// A concrete sweep case: an optional explicit id plus parameter values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepCase {
    pub id: Option<String>,
    pub values: BTreeMap<String, String>,
}

impl SweepCase {
    /// Explicit id, or one derived from `param_value` pairs.
    ///
    /// Derived ids sanitize `+` to `_plus_` and spaces to `_` so they stay
    /// filesystem- and filter-safe.
    #[must_use]
    pub fn case_id(&self) -> String {
        if let Some(id) = &self.id {
            return id.clone();
        }
        self.values
            .iter()
            .map(|(param, value)| format!("{param}_{}", sanitize_case_value(value)))
            .collect::<Vec<_>>()
            .join("_")
    }
}

/// Sanitize a parameter value for use inside a case id.
#[must_use]
pub fn sanitize_case_value(value: &str) -> String {
    value.replace('+', "_plus_").replace(' ', "_")
}

/// A base instance swept over parameter values.
///
/// Cases come either from the Cartesian product of `params` or from the
/// explicit `cases` list; explicit cases win when both are set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepInstance {
    pub base: Instance,
    pub params: BTreeMap<String, Vec<String>>,
    pub cases: Vec<SweepCase>,
}

impl SweepInstance {
    /// Expand into concrete sibling instances named `base/<case_id>`.
    #[must_use]
    pub fn expand(&self) -> Vec<Instance> {
        let cases = if self.cases.is_empty() {
            cartesian_cases(&self.params)
        } else {
            self.cases.clone()
        };

        cases
            .into_iter()
            .map(|case| {
                let mut concrete = self.base.clone();
                concrete.name = format!("{}/{}", self.base.name, case.case_id());
                concrete.args = substitute_params(&self.base.args, &case.values);
                concrete
            })
            .collect()
    }
}

fn cartesian_cases(params: &BTreeMap<String, Vec<String>>) -> Vec<SweepCase> {
    let mut cases = vec![SweepCase {
        id: None,
        values: BTreeMap::new(),
    }];
    for (param, values) in params {
        let mut next = Vec::with_capacity(cases.len() * values.len());
        for case in &cases {
            for value in values {
                let mut widened = case.clone();
                widened.values.insert(param.clone(), value.clone());
                next.push(widened);
            }
        }
        cases = next;
    }
    cases
}

// ---------------------------------------------------------------------------
// Matrix
// ---------------------------------------------------------------------------

/// Registries of instances per tier plus the status registry.
#[derive(Debug, Clone, Default)]
pub struct Matrix {
    instances: Vec<Instance>,
    status_instances: Vec<Instance>,
}

impl Matrix {
    #[must_use]
    pub fn new(instances: Vec<Instance>, status_instances: Vec<Instance>) -> Self {
        Self {
            instances,
            status_instances,
        }
    }

    /// The built-in campaign matrix.
    ///
    /// Registers the deterministic synthetic-failure instance when
    /// `ROCKYARDKV_SYNTHETIC_FAIL` is set in the environment.
    #[must_use]
    pub fn canonical() -> Self {
        let mut matrix = build_canonical_matrix();
        if std::env::var(SYNTHETIC_FAIL_ENV).is_ok() {
            matrix.status_instances.push(synthetic_fail_instance());
        }
        matrix
    }

    /// Union of the tier's matrix plus all status instances of that tier.
    #[must_use]
    pub fn instances_for_tier(&self, tier: Tier) -> Vec<Instance> {
        let mut selected: Vec<Instance> = self
            .instances
            .iter()
            .filter(|instance| instance.tier == tier)
            .cloned()
            .collect();
        selected.extend(
            self.status_instances
                .iter()
                .filter(|instance| instance.tier == tier)
                .cloned(),
        );
        selected
    }

    /// Select a tier's instances by name prefix; an empty prefix selects the
    /// entire tier.
    #[must_use]
    pub fn run_group(&self, tier: Tier, prefix: &str) -> Vec<Instance> {
        self.instances_for_tier(tier)
            .into_iter()
            .filter(|instance| prefix.is_empty() || instance.name.starts_with(prefix))
            .collect()
    }

    /// Validate matrix-wide invariants, returning all diagnostics.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut diagnostics = Vec::new();
        for tier in [Tier::Quick, Tier::Nightly] {
            let mut seen = std::collections::BTreeSet::new();
            for instance in self.instances_for_tier(tier) {
                diagnostics.extend(instance.validate());
                if !seen.insert(instance.name.clone()) {
                    diagnostics.push(format!(
                        "tier {tier}: duplicate instance name {}",
                        instance.name
                    ));
                }
            }
        }
        diagnostics
    }
}

fn stress_instance(
    name: &str,
    tier: Tier,
    fault_model: FaultModel,
    seeds: Vec<u64>,
) -> Instance {
    let mut instance = Instance::new(name, tier, Tool::Stress);
    instance.fault_model = fault_model;
    instance.seeds = seeds;
    instance.args = vec![
        "-db=<RUN_DIR>/db".to_owned(),
        "-seed=<SEED>".to_owned(),
        "-duration=30".to_owned(),
        "-threads=16".to_owned(),
        "-keys=100000".to_owned(),
        format!("-fault={fault_model}"),
    ];
    instance.stop = StopCondition {
        require_termination: true,
        require_final_verification_pass: true,
        require_oracle_check_consistency_ok: false,
        dedupe_by_fingerprint: true,
    };
    instance
}

fn build_canonical_matrix() -> Matrix {
    let mut instances = Vec::new();

    instances.push(stress_instance(
        "stress.basic",
        Tier::Quick,
        FaultModel::none(),
        vec![1, 2],
    ));
    instances.push(stress_instance(
        "stress.read.corruption.1in7",
        Tier::Quick,
        FaultModel {
            kind: FaultKind::Read,
            error_type: FaultErrorType::Corruption,
            one_in: 7,
            scope: FaultScope::Worker,
        },
        vec![1],
    ));
    instances.push(stress_instance(
        "stress.sync.status.1in250",
        Tier::Nightly,
        FaultModel {
            kind: FaultKind::Sync,
            error_type: FaultErrorType::Status,
            one_in: 250,
            scope: FaultScope::Flusher,
        },
        vec![1, 2, 3],
    ));

    let mut crash = Instance::new("crash.recovery.basic", Tier::Nightly, Tool::Crash);
    crash.fault_model = FaultModel {
        kind: FaultKind::Crash,
        error_type: FaultErrorType::Status,
        one_in: 1000,
        scope: FaultScope::Global,
    };
    crash.args = vec![
        "-db=<RUN_DIR>/db".to_owned(),
        "-seed=<SEED>".to_owned(),
        "-reopen=10".to_owned(),
    ];
    crash.stop = StopCondition {
        require_termination: true,
        require_final_verification_pass: true,
        require_oracle_check_consistency_ok: false,
        dedupe_by_fingerprint: true,
    };
    instances.push(crash);

    let mut adversarial = Instance::new("adversarial.sst.blockfuzz", Tier::Nightly, Tool::Adversarial);
    adversarial.fault_model = FaultModel {
        kind: FaultKind::Corrupt,
        error_type: FaultErrorType::Corruption,
        one_in: 1,
        scope: FaultScope::Global,
    };
    adversarial.args = vec![
        "-db=<RUN_DIR>/db".to_owned(),
        "-seed=<SEED>".to_owned(),
    ];
    instances.push(adversarial);

    let mut status_instances = Vec::new();

    let mut wal_sync = Instance::new("status.durability.wal_sync", Tier::Quick, Tool::Crash);
    wal_sync.requires_oracle = true;
    wal_sync.fault_model = FaultModel {
        kind: FaultKind::Sync,
        error_type: FaultErrorType::Status,
        one_in: 50,
        scope: FaultScope::Flusher,
    };
    wal_sync.args = vec![
        "-db=<RUN_DIR>/db".to_owned(),
        "-seed=<SEED>".to_owned(),
        "-sync_every=1".to_owned(),
    ];
    wal_sync.stop = StopCondition {
        require_termination: true,
        require_final_verification_pass: true,
        require_oracle_check_consistency_ok: true,
        dedupe_by_fingerprint: true,
    };
    status_instances.push(wal_sync);

    let mut sst_format = Instance::new("status.format.sst_footer", Tier::Quick, Tool::SstDump);
    sst_format.requires_oracle = true;
    sst_format.args = vec!["--file=<RUN_DIR>/db/000001.sst".to_owned()];
    status_instances.push(sst_format);

    Matrix::new(instances, status_instances)
}

/// The deterministic synthetic-failure instance.
///
/// Exits nonzero with a stable log line so ledger and minimizer wiring can
/// be validated without the KV engine.
#[must_use]
pub fn synthetic_fail_instance() -> Instance {
    let mut instance = Instance::new("status.synthetic.fail", Tier::Quick, Tool::Stress);
    instance.args = vec![
        "-db=<RUN_DIR>/db".to_owned(),
        "-seed=<SEED>".to_owned(),
        "-synthetic_fail=1".to_owned(),
    ];
    instance
        .env
        .insert(SYNTHETIC_FAIL_ENV.to_owned(), "1".to_owned());
    instance.stop = StopCondition {
        require_termination: true,
        require_final_verification_pass: false,
        require_oracle_check_consistency_ok: false,
        dedupe_by_fingerprint: true,
    };
    instance
}

/// Sweep cases for the disable-WAL fault-fs minimize matrix.
///
/// This registry is the authoritative one; a file-local variant with
/// differently formatted parameter values existed upstream and was not
/// carried.
#[must_use]
pub fn disable_wal_faultfs_minimize_cases() -> SweepInstance {
    let mut base = stress_instance(
        "stress.disable_wal.faultfs_minimize",
        Tier::Nightly,
        FaultModel {
            kind: FaultKind::Sync,
            error_type: FaultErrorType::Status,
            one_in: 250,
            scope: FaultScope::Flusher,
        },
        vec![1],
    );
    base.args.push("-disable_wal=1".to_owned());
    base.args
        .push("-sync_fault_one_in=<SYNC_FAULT_ONE_IN>".to_owned());

    SweepInstance {
        base,
        params: BTreeMap::from([(
            "sync_fault_one_in".to_owned(),
            vec!["50".to_owned(), "250".to_owned(), "1000".to_owned()],
        )]),
        cases: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_selection_includes_matching_status_instances() {
        let matrix = build_canonical_matrix();
        let quick = matrix.instances_for_tier(Tier::Quick);
        assert!(quick.iter().any(|i| i.name == "stress.basic"));
        assert!(quick.iter().any(|i| i.name == "status.durability.wal_sync"));
        assert!(quick.iter().all(|i| i.tier == Tier::Quick));
    }

    #[test]
    fn run_group_selects_by_prefix_and_empty_selects_all() {
        let matrix = build_canonical_matrix();
        let stress = matrix.run_group(Tier::Quick, "stress.");
        assert!(!stress.is_empty());
        assert!(stress.iter().all(|i| i.name.starts_with("stress.")));

        let all = matrix.run_group(Tier::Quick, "");
        assert_eq!(all.len(), matrix.instances_for_tier(Tier::Quick).len());
    }

    #[test]
    fn canonical_matrix_validates_clean() {
        let matrix = build_canonical_matrix();
        assert!(matrix.validate().is_empty(), "{:?}", matrix.validate());
    }

    #[test]
    fn sweep_expands_cartesian_product_with_derived_ids() {
        let sweep = disable_wal_faultfs_minimize_cases();
        let expanded = sweep.expand();
        assert_eq!(expanded.len(), 3);
        assert_eq!(
            expanded[0].name,
            "stress.disable_wal.faultfs_minimize/sync_fault_one_in_50"
        );
        assert!(
            expanded[0]
                .args
                .contains(&"-sync_fault_one_in=50".to_owned()),
            "sweep value must be substituted into args"
        );
    }

    #[test]
    fn sweep_expansion_preserves_runtime_placeholders() {
        let sweep = disable_wal_faultfs_minimize_cases();
        let expanded = sweep.expand();
        assert!(
            expanded[0].args.contains(&"-db=<RUN_DIR>/db".to_owned()),
            "runtime placeholders must survive expansion: {:?}",
            expanded[0].args
        );
        assert!(expanded[0].args.contains(&"-seed=<SEED>".to_owned()));
    }

    #[test]
    fn sweep_case_ids_sanitize_values() {
        assert_eq!(sanitize_case_value("1e+6"), "1e_plus_6");
        assert_eq!(sanitize_case_value("two words"), "two_words");

        let case = SweepCase {
            id: None,
            values: BTreeMap::from([("rate".to_owned(), "1e+6".to_owned())]),
        };
        assert_eq!(case.case_id(), "rate_1e_plus_6");
    }

    #[test]
    fn explicit_cases_win_over_params() {
        let mut sweep = disable_wal_faultfs_minimize_cases();
        sweep.cases = vec![SweepCase {
            id: Some("only".to_owned()),
            values: BTreeMap::from([("sync_fault_one_in".to_owned(), "7".to_owned())]),
        }];
        let expanded = sweep.expand();
        assert_eq!(expanded.len(), 1);
        assert!(expanded[0].name.ends_with("/only"));
    }

    #[test]
    fn composite_gating_policies_differ_on_early_failure() {
        let composite = CompositeInstance {
            name: "crash.then.verify".to_owned(),
            steps: vec![
                CompositeStep {
                    instance: Instance::new("a", Tier::Quick, Tool::Crash),
                    discover_db_path: false,
                },
                CompositeStep {
                    instance: Instance::new("b", Tier::Quick, Tool::Stress),
                    discover_db_path: true,
                },
            ],
            gating_policy: GatingPolicy::AllSteps,
        };
        assert!(!composite.passed(&[false, true]));

        let lenient = CompositeInstance {
            gating_policy: GatingPolicy::LastStep,
            ..composite
        };
        assert!(lenient.passed(&[false, true]));
        assert!(!lenient.passed(&[true, false]));
    }
}
