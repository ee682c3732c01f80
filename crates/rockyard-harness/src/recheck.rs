//! Rechecker: re-evaluate a past run root against current policy.
//!
//! Walks the run root for every directory containing `run.json`, re-derives
//! the intended stop condition, re-runs the oracle when still required,
//! re-scans the log for the verification marker, and recomputes the
//! fingerprint. The contract that matters: a run is `verified` only when a
//! required oracle actually ran and succeeded during the recheck. A skipped
//! oracle never upgrades to verified.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::artifact::{
    self, MarkerRecheck, OracleRecheck, PolicyResult, RECHECK_ORACLE_DIR_NAME, RUN_ARTIFACT_NAME,
    RecheckRecord, RunArtifact,
};
use crate::instance::StopCondition;
use crate::ledger;
use crate::oracle::Oracle;
use crate::runner::{VERIFICATION_REASON, discover_db_path, verification_marker_passed};
use crate::taxonomy::Tool;
use rockyard_error::Result;
use rockyard_faultfs::host;

/// Recheck configuration: explicit stop-condition overrides by instance
/// name; everything else re-derives from the artifact.
#[derive(Debug, Clone, Default)]
pub struct RecheckConfig {
    pub stop_overrides: BTreeMap<String, StopCondition>,
}

/// Recheck every run under `run_root`, writing `recheck.json` next to each
/// `run.json` and returning the records in walk order.
pub fn recheck_run_root(
    run_root: &Path,
    oracle: Option<&Oracle>,
    config: &RecheckConfig,
) -> Result<Vec<RecheckRecord>> {
    let mut run_dirs = Vec::new();
    collect_run_dirs(run_root, &mut run_dirs)?;
    run_dirs.sort();

    let mut records = Vec::with_capacity(run_dirs.len());
    for run_dir in run_dirs {
        match recheck_one(&run_dir, oracle, config) {
            Ok(record) => {
                if let Err(error) = artifact::write_recheck(&run_dir, &record) {
                    warn!(run_dir = %run_dir.display(), %error, "recheck write failed");
                }
                records.push(record);
            }
            Err(error) => {
                warn!(run_dir = %run_dir.display(), %error, "recheck failed, skipping run dir");
            }
        }
    }
    info!(count = records.len(), root = %run_root.display(), "recheck complete");
    Ok(records)
}

fn collect_run_dirs(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    if dir.join(RUN_ARTIFACT_NAME).is_file() {
        out.push(dir.to_path_buf());
    }
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_run_dirs(&path, out)?;
        }
    }
    Ok(())
}

fn recheck_one(
    run_dir: &Path,
    oracle: Option<&Oracle>,
    config: &RecheckConfig,
) -> Result<RecheckRecord> {
    let artifact = artifact::read_run_artifact(run_dir)?;
    let stop = config
        .stop_overrides
        .get(&artifact.instance)
        .copied()
        .unwrap_or_else(|| derive_stop(&artifact));

    let tool = Tool::from_token(&artifact.tags.tool);
    let log_path = run_dir.join(artifact::OUTPUT_LOG_NAME);
    let marker_ok = tool.is_some_and(|tool| verification_marker_passed(tool, &log_path));
    let marker_recheck = MarkerRecheck {
        passed: marker_ok,
        reason: if marker_ok {
            "verification marker present".to_owned()
        } else {
            VERIFICATION_REASON.to_owned()
        },
    };

    let oracle_recheck = recheck_oracle(run_dir, oracle, stop);
    let (oracle_performed, oracle_ok) = match &oracle_recheck {
        OracleRecheck::Performed { ok, .. } => (true, *ok),
        OracleRecheck::Skipped { .. } => (false, false),
    };

    let fingerprint = ledger::fingerprint(
        &artifact.instance,
        artifact.seed,
        artifact.failure_kind.as_deref().unwrap_or(""),
        artifact.failure.as_deref().unwrap_or(""),
        &ledger::log_tail(&log_path),
    );

    let fault_active = artifact.tags.fault_kind != "none";
    let termination_exempt = tool == Some(Tool::Stress) && fault_active && marker_ok;
    let termination_ok =
        !stop.require_termination || artifact.exit_code == 0 || termination_exempt;
    let marker_req_ok = !stop.require_final_verification_pass || marker_ok;
    // A performed-and-failed oracle fails the policy; a skipped oracle only
    // costs the verified flag.
    let oracle_req_ok =
        !stop.require_oracle_check_consistency_ok || !oracle_performed || oracle_ok;
    let passed = termination_ok && marker_req_ok && oracle_req_ok;

    let reason = if !termination_ok {
        format!("exited with code {}", artifact.exit_code)
    } else if !marker_req_ok {
        VERIFICATION_REASON.to_owned()
    } else if !oracle_req_ok {
        "oracle checkconsistency failed during recheck".to_owned()
    } else {
        "all stop conditions hold under current policy".to_owned()
    };

    let oracle_verified =
        !stop.require_oracle_check_consistency_ok || (oracle_performed && oracle_ok);
    let policy_result = PolicyResult {
        passed,
        reason,
        verified: passed && oracle_verified,
    };

    Ok(RecheckRecord {
        schema_version: crate::SCHEMA_VERSION.to_owned(),
        instance: artifact.instance,
        seed: artifact.seed,
        fingerprint,
        oracle_recheck,
        marker_recheck,
        policy_result,
    })
}

/// Re-derive the intended stop condition from the persisted artifact.
fn derive_stop(artifact: &RunArtifact) -> StopCondition {
    let tool = Tool::from_token(&artifact.tags.tool);
    StopCondition {
        require_termination: true,
        require_final_verification_pass: matches!(tool, Some(Tool::Stress | Tool::Crash)),
        require_oracle_check_consistency_ok: artifact.tags.oracle_required == "true",
        dedupe_by_fingerprint: true,
    }
}

fn recheck_oracle(run_dir: &Path, oracle: Option<&Oracle>, stop: StopCondition) -> OracleRecheck {
    if !stop.require_oracle_check_consistency_ok {
        return OracleRecheck::Skipped {
            skipped: true,
            reason: "oracle not required".to_owned(),
        };
    }
    let Some(oracle) = oracle.filter(|oracle| oracle.available()) else {
        return OracleRecheck::Skipped {
            skipped: true,
            reason: "oracle unavailable".to_owned(),
        };
    };
    let Some(db_path) = discover_db_path(run_dir) else {
        return OracleRecheck::Skipped {
            skipped: true,
            reason: "database path not found under run dir".to_owned(),
        };
    };
    match oracle.check_consistency(&db_path) {
        Ok(outcome) => {
            let oracle_dir = run_dir.join(RECHECK_ORACLE_DIR_NAME);
            let stdout_path = oracle_dir.join("stdout");
            let stderr_path = oracle_dir.join("stderr");
            if let Err(error) = host::create_dir_all(&oracle_dir)
                .and_then(|()| host::write(&stdout_path, &outcome.stdout))
                .and_then(|()| host::write(&stderr_path, &outcome.stderr))
            {
                warn!(%error, "recheck oracle artifact write failed");
            }
            let summary = if outcome.ok() {
                "consistency ok".to_owned()
            } else {
                format!("consistency check failed with exit code {}", outcome.exit_code)
            };
            OracleRecheck::Performed {
                performed: true,
                ok: outcome.ok(),
                exit_code: outcome.exit_code,
                stdout_path: stdout_path.display().to_string(),
                stderr_path: stderr_path.display().to_string(),
                summary,
            }
        }
        Err(error) => OracleRecheck::Skipped {
            skipped: true,
            reason: format!("oracle invocation failed: {error}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::Instance;
    use crate::taxonomy::{Tier, Tool};

    fn passing_artifact(instance: &Instance, oracle_required: bool) -> RunArtifact {
        let mut instance = instance.clone();
        instance.requires_oracle = oracle_required;
        RunArtifact {
            schema_version: crate::SCHEMA_VERSION.to_owned(),
            instance: instance.name.clone(),
            seed: 1,
            binary_path: "/bins/rockyard_crash".to_owned(),
            start_time: 1,
            end_time: 2,
            duration_ms: 1,
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
    fn skipped_oracle_never_upgrades_to_verified() {
        let dir = tempfile::tempdir().expect("tempdir");
        let run_dir = dir.path().join("status.durability.wal_sync/seed_1");
        std::fs::create_dir_all(&run_dir).expect("mkdir");
        std::fs::write(run_dir.join("output.log"), "Final verification passed\n")
            .expect("write");

        let instance = Instance::new("status.durability.wal_sync", Tier::Quick, Tool::Crash);
        artifact::write_run_artifact(&run_dir, &passing_artifact(&instance, true))
            .expect("write artifact");

        let records =
            recheck_run_root(dir.path(), None, &RecheckConfig::default()).expect("recheck");
        assert_eq!(records.len(), 1);
        let record = &records[0];

        assert!(matches!(
            record.oracle_recheck,
            OracleRecheck::Skipped { .. }
        ));
        assert!(record.policy_result.passed, "marker still holds");
        assert!(
            !record.policy_result.verified,
            "skipped oracle must not verify an oracle-required run"
        );
        assert!(run_dir.join("recheck.json").is_file());
    }

    #[test]
    fn non_oracle_run_verifies_when_marker_holds() {
        let dir = tempfile::tempdir().expect("tempdir");
        let run_dir = dir.path().join("crash.recovery.basic/seed_1");
        std::fs::create_dir_all(&run_dir).expect("mkdir");
        std::fs::write(run_dir.join("output.log"), "Final verification passed\n")
            .expect("write");

        let instance = Instance::new("crash.recovery.basic", Tier::Nightly, Tool::Crash);
        artifact::write_run_artifact(&run_dir, &passing_artifact(&instance, false))
            .expect("write artifact");

        let records =
            recheck_run_root(dir.path(), None, &RecheckConfig::default()).expect("recheck");
        let record = &records[0];
        assert!(record.marker_recheck.passed);
        assert!(record.policy_result.passed);
        assert!(record.policy_result.verified);
    }

    #[test]
    fn missing_marker_fails_recheck_policy() {
        let dir = tempfile::tempdir().expect("tempdir");
        let run_dir = dir.path().join("crash.recovery.basic/seed_2");
        std::fs::create_dir_all(&run_dir).expect("mkdir");
        std::fs::write(run_dir.join("output.log"), "crashed mid-run\n").expect("write");

        let mut artifact_record = passing_artifact(
            &Instance::new("crash.recovery.basic", Tier::Nightly, Tool::Crash),
            false,
        );
        artifact_record.exit_code = 0;
        artifact::write_run_artifact(&run_dir, &artifact_record).expect("write artifact");

        let records =
            recheck_run_root(dir.path(), None, &RecheckConfig::default()).expect("recheck");
        let record = &records[0];
        assert!(!record.marker_recheck.passed);
        assert!(!record.policy_result.passed);
        assert!(!record.policy_result.verified);
        assert_eq!(record.marker_recheck.reason, VERIFICATION_REASON);
    }

    #[test]
    fn fingerprint_recomputes_from_artifact_fields() {
        let dir = tempfile::tempdir().expect("tempdir");
        let run_dir = dir.path().join("stress.basic/seed_3");
        std::fs::create_dir_all(&run_dir).expect("mkdir");
        std::fs::write(
            run_dir.join("output.log"),
            "Running final verification\nscan done, 0 failures\n",
        )
        .expect("write");

        let mut artifact_record = passing_artifact(
            &Instance::new("stress.basic", Tier::Quick, Tool::Stress),
            false,
        );
        artifact_record.seed = 3;
        artifact::write_run_artifact(&run_dir, &artifact_record).expect("write artifact");

        let records =
            recheck_run_root(dir.path(), None, &RecheckConfig::default()).expect("recheck");
        let record = &records[0];
        assert_eq!(record.fingerprint.len(), 16);
        let expected = ledger::fingerprint(
            "stress.basic",
            3,
            "",
            "",
            &ledger::log_tail(&run_dir.join("output.log")),
        );
        assert_eq!(record.fingerprint, expected);
    }
}
