//! Versioned on-disk artifact records.
//!
//! Stable JSON schemas for `run.json`, `summary.json`, `governance.json`,
//! and `recheck.json`, plus their writers. Field additions are minor schema
//! bumps; semantic changes (pass/fail interpretation, fingerprint formula)
//! are major bumps.
//!
//! # Run-directory layout
//!
//! ```text
//! <run_root>/
//!   <instance_name>/seed_<seed>/
//!     run.json
//!     output.log
//!     duplicate_of.txt?          — present iff is_duplicate
//!     oracle/ldb_checkconsistency.{stdout.txt,stderr.txt,exitcode}
//!     trace/ops.bin?  trace/truncated.txt?
//!     replay.sh?
//!     recheck.json?  recheck_oracle/{stdout,stderr}?
//!   summary.json
//!   governance.json
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

use crate::SCHEMA_VERSION;
use crate::minimize::MinimizeResult;
use crate::skip::SkipRecord;
use crate::taxonomy::Tags;
use rockyard_error::Result;
use rockyard_faultfs::host;

pub const RUN_ARTIFACT_NAME: &str = "run.json";
pub const SUMMARY_NAME: &str = "summary.json";
pub const GOVERNANCE_NAME: &str = "governance.json";
pub const RECHECK_NAME: &str = "recheck.json";
pub const OUTPUT_LOG_NAME: &str = "output.log";
pub const DUPLICATE_MARKER_NAME: &str = "duplicate_of.txt";
pub const REPLAY_SCRIPT_NAME: &str = "replay.sh";
pub const ORACLE_DIR_NAME: &str = "oracle";
pub const RECHECK_ORACLE_DIR_NAME: &str = "recheck_oracle";

/// Per-run artifact persisted as `run.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunArtifact {
    pub schema_version: String,
    pub instance: String,
    pub seed: u64,
    pub binary_path: String,
    /// Unix milliseconds.
    pub start_time: u64,
    /// Unix milliseconds.
    pub end_time: u64,
    pub duration_ms: u64,
    pub exit_code: i64,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_duplicate: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oracle_exit_code: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oracle_output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_bytes_written: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_truncated: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replay_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimized: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimized_result: Option<MinimizeResult>,
    pub tags: Tags,
}

/// Campaign-level aggregate persisted as `summary.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignSummary {
    pub schema_version: String,
    pub tier: String,
    pub total_runs: u64,
    pub passed_runs: u64,
    pub failed_runs: u64,
    pub skipped_runs: u64,
    pub all_passed: bool,
    pub new_failures: u64,
    pub known_failures: u64,
    pub duplicates: u64,
    pub unquarantined: u64,
    pub oracle_required: u64,
    pub oracle_gated: u64,
    pub skipped: Vec<SkipRecord>,
}

impl CampaignSummary {
    /// Empty summary for a tier.
    #[must_use]
    pub fn new(tier: &str) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_owned(),
            tier: tier.to_owned(),
            total_runs: 0,
            passed_runs: 0,
            failed_runs: 0,
            skipped_runs: 0,
            all_passed: true,
            new_failures: 0,
            known_failures: 0,
            duplicates: 0,
            unquarantined: 0,
            oracle_required: 0,
            oracle_gated: 0,
            skipped: Vec::new(),
        }
    }
}

/// Actionable governance report persisted as `governance.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernanceReport {
    pub schema_version: String,
    pub new_failures: u64,
    pub known_failures: u64,
    pub duplicates: u64,
    pub unquarantined: u64,
    pub skipped: Vec<SkipRecord>,
    pub next_steps: String,
}

impl GovernanceReport {
    /// Derive the report, including the next-steps narrative, from a
    /// summary built out of in-memory run results.
    #[must_use]
    pub fn derive(summary: &CampaignSummary) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_owned(),
            new_failures: summary.new_failures,
            known_failures: summary.known_failures,
            duplicates: summary.duplicates,
            unquarantined: summary.unquarantined,
            skipped: summary.skipped.clone(),
            next_steps: render_next_steps(summary),
        }
    }
}

fn render_next_steps(summary: &CampaignSummary) -> String {
    let mut lines = Vec::new();
    if summary.unquarantined > 0 {
        lines.push(format!(
            "URGENT: {} unquarantined duplicate failure(s); quarantine or fix before the next campaign",
            summary.unquarantined
        ));
    }
    if summary.new_failures > 0 {
        lines.push(format!(
            "triage {} new failure(s) and file issues",
            summary.new_failures
        ));
    }
    if summary.known_failures > 0 {
        lines.push(format!(
            "{} known quarantined failure(s) recurred; check their issues for progress",
            summary.known_failures
        ));
    }
    if !summary.skipped.is_empty() {
        lines.push(format!(
            "{} instance(s) skipped by policy; revisit the skip set",
            summary.skipped.len()
        ));
    }
    if lines.is_empty() {
        lines.push("campaign clean; no action required".to_owned());
    }
    lines.join("; ")
}

// ---------------------------------------------------------------------------
// Recheck records
// ---------------------------------------------------------------------------

/// Outcome of re-running the oracle during recheck.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OracleRecheck {
    Skipped {
        skipped: bool,
        reason: String,
    },
    Performed {
        performed: bool,
        ok: bool,
        exit_code: i64,
        stdout_path: String,
        stderr_path: String,
        summary: String,
    },
}

/// Outcome of re-scanning the log for the verification marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerRecheck {
    pub passed: bool,
    pub reason: String,
}

/// Final recheck verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyResult {
    pub passed: bool,
    pub reason: String,
    /// `false` whenever a required oracle did not actually run and succeed.
    pub verified: bool,
}

/// Per-run recheck record persisted as `recheck.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecheckRecord {
    pub schema_version: String,
    pub instance: String,
    pub seed: u64,
    pub fingerprint: String,
    pub oracle_recheck: OracleRecheck,
    pub marker_recheck: MarkerRecheck,
    pub policy_result: PolicyResult,
}

// ---------------------------------------------------------------------------
// Writers
// ---------------------------------------------------------------------------

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    host::write(path, bytes)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = host::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

pub fn write_run_artifact(run_dir: &Path, artifact: &RunArtifact) -> Result<()> {
    write_json(&run_dir.join(RUN_ARTIFACT_NAME), artifact)
}

pub fn read_run_artifact(run_dir: &Path) -> Result<RunArtifact> {
    read_json(&run_dir.join(RUN_ARTIFACT_NAME))
}

pub fn write_summary(run_root: &Path, summary: &CampaignSummary) -> Result<()> {
    write_json(&run_root.join(SUMMARY_NAME), summary)
}

pub fn write_governance(run_root: &Path, report: &GovernanceReport) -> Result<()> {
    write_json(&run_root.join(GOVERNANCE_NAME), report)
}

pub fn write_recheck(run_dir: &Path, record: &RecheckRecord) -> Result<()> {
    write_json(&run_dir.join(RECHECK_NAME), record)
}

/// Write the duplicate marker next to `run.json`.
pub fn write_duplicate_marker(run_dir: &Path, fingerprint: &str) -> Result<()> {
    host::write(
        &run_dir.join(DUPLICATE_MARKER_NAME),
        format!("{fingerprint}\n"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::Instance;
    use crate::taxonomy::{Tier, Tool};

    fn sample_artifact() -> RunArtifact {
        let instance = Instance::new("stress.basic", Tier::Quick, Tool::Stress);
        RunArtifact {
            schema_version: SCHEMA_VERSION.to_owned(),
            instance: instance.name.clone(),
            seed: 1,
            binary_path: "/bins/rockyard_stress".to_owned(),
            start_time: 1_000,
            end_time: 2_000,
            duration_ms: 1_000,
            exit_code: 0,
            passed: true,
            failure: None,
            failure_kind: None,
            fingerprint: None,
            is_duplicate: None,
            oracle_exit_code: None,
            oracle_output: None,
            trace_path: None,
            trace_bytes_written: None,
            trace_truncated: None,
            replay_command: None,
            minimized: None,
            minimized_result: None,
            tags: instance.tags(),
        }
    }

    #[test]
    fn run_artifact_roundtrips_with_schema_version() {
        let dir = tempfile::tempdir().expect("tempdir");
        let artifact = sample_artifact();
        write_run_artifact(dir.path(), &artifact).expect("write");

        let parsed = read_run_artifact(dir.path()).expect("read");
        assert_eq!(parsed, artifact);
        assert_eq!(parsed.schema_version, SCHEMA_VERSION);
        assert!(!parsed.schema_version.is_empty());
    }

    #[test]
    fn passing_artifact_omits_failure_fields() {
        let json = serde_json::to_string(&sample_artifact()).expect("serialize");
        assert!(!json.contains("failure_kind"));
        assert!(!json.contains("fingerprint"));
        assert!(!json.contains("minimized"));
    }

    #[test]
    fn next_steps_is_urgent_only_with_unquarantined() {
        let mut summary = CampaignSummary::new("quick");
        assert_eq!(
            GovernanceReport::derive(&summary).next_steps,
            "campaign clean; no action required"
        );

        summary.unquarantined = 2;
        summary.duplicates = 2;
        let report = GovernanceReport::derive(&summary);
        assert!(report.next_steps.starts_with("URGENT"));

        summary.unquarantined = 0;
        summary.duplicates = 0;
        summary.new_failures = 1;
        let report = GovernanceReport::derive(&summary);
        assert!(!report.next_steps.contains("URGENT"));
        assert!(report.next_steps.contains("1 new failure"));
        assert!(!report.next_steps.contains("known"));
    }

    #[test]
    fn oracle_recheck_serializes_flat_variants() {
        let skipped = OracleRecheck::Skipped {
            skipped: true,
            reason: "oracle not required".to_owned(),
        };
        let json = serde_json::to_string(&skipped).expect("serialize");
        assert!(json.contains("\"skipped\":true"));

        let performed = OracleRecheck::Performed {
            performed: true,
            ok: true,
            exit_code: 0,
            stdout_path: "recheck_oracle/stdout".to_owned(),
            stderr_path: "recheck_oracle/stderr".to_owned(),
            summary: "consistency ok".to_owned(),
        };
        let json = serde_json::to_string(&performed).expect("serialize");
        assert!(json.contains("\"performed\":true"));
    }
}
