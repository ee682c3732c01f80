//! End-to-end campaign runner tests against fake tool binaries.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rockyard_harness::artifact::{self, DUPLICATE_MARKER_NAME};
use rockyard_harness::instance::{Instance, StopCondition};
use rockyard_harness::ledger::{FailureLedger, QUARANTINE_ALLOWED};
use rockyard_harness::matrix::{
    CompositeInstance, CompositeStep, GatingPolicy, synthetic_fail_instance,
};
use rockyard_harness::minimize::MinimizeConfig;
use rockyard_harness::oracle::Oracle;
use rockyard_harness::runner::{CampaignConfig, Runner};
use rockyard_harness::skip::{SkipPolicy, SkipPolicySet};
use rockyard_harness::taxonomy::{
    FaultErrorType, FaultKind, FaultModel, FaultScope, Tier, Tool,
};
use rockyard_harness::{RockyardError, SCHEMA_VERSION};

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    let mut permissions = std::fs::metadata(&path).expect("stat").permissions();
    permissions.set_mode(0o755);
    std::fs::set_permissions(&path, permissions).expect("chmod");
    path
}

fn workspace() -> (tempfile::TempDir, PathBuf, PathBuf) {
    init_tracing();
    let dir = tempfile::tempdir().expect("tempdir");
    let bin_dir = dir.path().join("bins");
    let run_root = dir.path().join("runs");
    std::fs::create_dir_all(&bin_dir).expect("mkdir");
    (dir, bin_dir, run_root)
}

fn stress_with_fault(name: &str, seeds: Vec<u64>) -> Instance {
    let mut instance = Instance::new(name, Tier::Quick, Tool::Stress);
    instance.fault_model = FaultModel {
        kind: FaultKind::Sync,
        error_type: FaultErrorType::Status,
        one_in: 250,
        scope: FaultScope::Flusher,
    };
    instance.seeds = seeds;
    instance.args = vec!["-db=<RUN_DIR>/db".to_owned(), "-seed=<SEED>".to_owned()];
    instance.stop = StopCondition {
        require_termination: true,
        require_final_verification_pass: true,
        require_oracle_check_consistency_ok: false,
        dedupe_by_fingerprint: true,
    };
    instance
}

#[test]
fn passing_campaign_writes_versioned_artifacts() {
    let (_dir, bin_dir, run_root) = workspace();
    write_script(
        &bin_dir,
        "rockyard_stress",
        "echo 'Running final verification'\necho 'scan done, 0 failures'\nexit 0",
    );

    let instance = stress_with_fault("stress.basic", vec![1, 2]);
    let config = CampaignConfig::new(Tier::Quick, &bin_dir, &run_root);
    let mut runner = Runner::new(config, None);
    let summary = runner.run_instances(&[instance]).expect("campaign");

    assert_eq!(summary.total_runs, 2);
    assert_eq!(summary.passed_runs, 2);
    assert_eq!(summary.failed_runs, 0);
    assert!(summary.all_passed);
    assert_eq!(summary.total_runs, summary.passed_runs + summary.failed_runs);

    let run_dir = run_root.join("stress.basic/seed_1");
    let artifact = artifact::read_run_artifact(&run_dir).expect("run.json");
    assert_eq!(artifact.schema_version, SCHEMA_VERSION);
    assert!(artifact.passed);
    assert_eq!(artifact.exit_code, 0);
    assert!(artifact.failure.is_none());
    assert!(run_dir.join("output.log").is_file());
    assert!(run_root.join("summary.json").is_file());
    assert!(run_root.join("governance.json").is_file());
}

#[test]
fn stress_with_fault_tolerates_nonzero_exit_when_marker_holds() {
    let (_dir, bin_dir, run_root) = workspace();
    write_script(
        &bin_dir,
        "rockyard_stress",
        "echo 'Running final verification'\necho 'scan done, 0 failures'\nexit 2",
    );

    let instance = stress_with_fault("stress.sync.status.1in250", vec![1]);
    let mut runner = Runner::new(CampaignConfig::new(Tier::Quick, &bin_dir, &run_root), None);
    let summary = runner.run_instances(&[instance]).expect("campaign");

    assert_eq!(summary.passed_runs, 1, "fault-model stress may exit nonzero");
    let artifact =
        artifact::read_run_artifact(&run_root.join("stress.sync.status.1in250/seed_1"))
            .expect("run.json");
    assert!(artifact.passed);
    assert_eq!(artifact.exit_code, 2);
}

#[test]
fn missing_marker_fails_with_verification_reason() {
    let (_dir, bin_dir, run_root) = workspace();
    write_script(&bin_dir, "rockyard_stress", "echo 'no verification here'\nexit 2");

    let instance = stress_with_fault("stress.sync.status.1in250", vec![1]);
    let mut runner = Runner::new(CampaignConfig::new(Tier::Quick, &bin_dir, &run_root), None);
    let summary = runner.run_instances(&[instance]).expect("campaign");

    assert_eq!(summary.failed_runs, 1);
    assert_eq!(summary.new_failures, 1);
    let artifact =
        artifact::read_run_artifact(&run_root.join("stress.sync.status.1in250/seed_1"))
            .expect("run.json");
    assert!(!artifact.passed);
    assert_eq!(
        artifact.failure.as_deref(),
        Some("final verification not observed as passed in output log")
    );
    assert_eq!(artifact.failure_kind.as_deref(), Some("verification_failure"));
}

#[test]
fn oracle_gate_fails_before_any_run_directory_exists() {
    let (_dir, bin_dir, run_root) = workspace();
    write_script(&bin_dir, "rockyard_crash", "exit 0");

    let mut instance = Instance::new("status.durability.wal_sync", Tier::Quick, Tool::Crash);
    instance.requires_oracle = true;
    instance.args = vec!["-db=<RUN_DIR>/db".to_owned()];

    let mut runner = Runner::new(CampaignConfig::new(Tier::Quick, &bin_dir, &run_root), None);
    let error = runner.run_instances(&[instance]).expect_err("must gate");
    assert!(matches!(error, RockyardError::GateFailed(_)));

    assert!(
        !run_root.join("status.durability.wal_sync").exists(),
        "gate must fire before the instance directory is created"
    );
    assert!(!run_root.join("summary.json").exists());
}

#[test]
fn seeds_discriminate_fingerprints_and_reruns_deduplicate() {
    let (dir, bin_dir, run_root) = workspace();
    write_script(&bin_dir, "rockyard_stress", "echo 'verification failed'\nexit 2");
    let ledger_path = dir.path().join("ledger.json");

    let instance = stress_with_fault("stress.flaky", vec![1, 2]);
    let mut config = CampaignConfig::new(Tier::Quick, &bin_dir, &run_root);
    config.ledger_path = Some(ledger_path.clone());
    let mut runner = Runner::new(config, None);
    let summary = runner.run_instances(&[instance.clone()]).expect("campaign");

    // Same reason, different seeds: both first sightings.
    assert_eq!(summary.new_failures, 2);
    assert_eq!(summary.duplicates, 0);
    assert_eq!(summary.unquarantined, 0, "new failures are never unquarantined");

    // Same seeds again: both known fingerprints, now unquarantined duplicates.
    let run_root_2 = dir.path().join("runs2");
    let mut config = CampaignConfig::new(Tier::Quick, &bin_dir, &run_root_2);
    config.ledger_path = Some(ledger_path);
    let mut runner = Runner::new(config, None);
    let summary = runner.run_instances(&[instance]).expect("campaign");

    assert_eq!(summary.new_failures, 0);
    assert_eq!(summary.duplicates, 2);
    assert_eq!(summary.unquarantined, 2);
    let run_dir = run_root_2.join("stress.flaky/seed_1");
    assert!(run_dir.join(DUPLICATE_MARKER_NAME).is_file());
}

#[test]
fn quarantined_fingerprint_classifies_as_known_failure() {
    let (dir, bin_dir, run_root) = workspace();
    write_script(&bin_dir, "rockyard_stress", "echo 'verification failed'\nexit 2");
    let ledger_path = dir.path().join("ledger.json");

    let instance = stress_with_fault("stress.flaky", vec![7]);
    let mut config = CampaignConfig::new(Tier::Quick, &bin_dir, &run_root);
    config.ledger_path = Some(ledger_path.clone());
    let mut runner = Runner::new(config, None);
    runner.run_instances(&[instance.clone()]).expect("campaign");

    // Operator quarantines the fingerprint recorded by the first campaign.
    let artifact = artifact::read_run_artifact(&run_root.join("stress.flaky/seed_7"))
        .expect("run.json");
    let fingerprint = artifact.fingerprint.expect("fingerprint");
    {
        let mut ledger = FailureLedger::load(&ledger_path);
        ledger.quarantine(&fingerprint, QUARANTINE_ALLOWED, Some("GH-1".to_owned()));
    }

    let run_root_2 = dir.path().join("runs2");
    let mut config = CampaignConfig::new(Tier::Quick, &bin_dir, &run_root_2);
    config.ledger_path = Some(ledger_path);
    let mut runner = Runner::new(config, None);
    let summary = runner.run_instances(&[instance]).expect("campaign");

    assert_eq!(summary.known_failures, 1);
    assert_eq!(summary.unquarantined, 0, "quarantined recurrence is allowed");
    let artifact = artifact::read_run_artifact(&run_root_2.join("stress.flaky/seed_7"))
        .expect("run.json");
    assert_eq!(artifact.is_duplicate, Some(true));
    assert_eq!(artifact.fingerprint.as_deref(), Some(fingerprint.as_str()));
}

#[test]
fn timeout_kills_child_and_classifies_as_timeout() {
    let (_dir, bin_dir, run_root) = workspace();
    write_script(&bin_dir, "rockyard_stress", "sleep 30\nexit 0");

    let instance = stress_with_fault("stress.slow", vec![1]);
    let mut config = CampaignConfig::new(Tier::Quick, &bin_dir, &run_root);
    config.per_instance_timeout = Some(Duration::from_millis(300));
    let mut runner = Runner::new(config, None);
    let summary = runner.run_instances(&[instance]).expect("campaign");

    assert_eq!(summary.failed_runs, 1);
    let artifact = artifact::read_run_artifact(&run_root.join("stress.slow/seed_1"))
        .expect("run.json");
    assert_eq!(artifact.exit_code, -1);
    assert_eq!(artifact.failure.as_deref(), Some("timeout"));
    assert_eq!(artifact.failure_kind.as_deref(), Some("timeout"));
}

#[test]
fn spawn_failure_is_a_synthetic_exit_error() {
    let (_dir, bin_dir, run_root) = workspace();
    // No binary written: fork/exec fails.
    let instance = stress_with_fault("stress.missing", vec![1]);
    let mut runner = Runner::new(CampaignConfig::new(Tier::Quick, &bin_dir, &run_root), None);
    let summary = runner.run_instances(&[instance]).expect("campaign");

    assert_eq!(summary.failed_runs, 1);
    let artifact = artifact::read_run_artifact(&run_root.join("stress.missing/seed_1"))
        .expect("run.json");
    assert_eq!(artifact.exit_code, -1);
    assert_eq!(artifact.failure_kind.as_deref(), Some("exit_error"));
}

#[test]
fn skip_policies_exclude_runs_from_pass_fail_accounting() {
    let (_dir, bin_dir, run_root) = workspace();
    write_script(
        &bin_dir,
        "rockyard_stress",
        "echo 'Running final verification'\necho 'scan done, 0 failures'\nexit 0",
    );

    let healthy = stress_with_fault("stress.basic", vec![1]);
    let paused = stress_with_fault("stress.paused.noise", vec![1, 2, 3]);

    let mut config = CampaignConfig::new(Tier::Quick, &bin_dir, &run_root);
    config.skip_policies = SkipPolicySet::new(vec![SkipPolicy {
        group: Some("stress.paused".to_owned()),
        reason: "paused pending triage".to_owned(),
        issue_id: Some("GH-77".to_owned()),
        ..SkipPolicy::default()
    }])
    .expect("valid policies");

    let mut runner = Runner::new(config, None);
    let summary = runner.run_instances(&[healthy, paused]).expect("campaign");

    assert_eq!(summary.total_runs, 1);
    assert_eq!(summary.skipped_runs, 3);
    assert_eq!(summary.skipped.len(), 1);
    assert_eq!(summary.skipped[0].instance_name, "stress.paused.noise");
    assert_eq!(summary.total_runs, summary.passed_runs + summary.failed_runs);
    assert!(summary.all_passed, "skips never fail a campaign");
    assert!(
        !run_root.join("stress.paused.noise").exists(),
        "skipped instances spawn nothing"
    );
}

#[test]
fn fail_fast_stops_after_first_failure() {
    let (_dir, bin_dir, run_root) = workspace();
    write_script(&bin_dir, "rockyard_stress", "exit 2");

    let instance = stress_with_fault("stress.flaky", vec![1, 2, 3]);
    let mut config = CampaignConfig::new(Tier::Quick, &bin_dir, &run_root);
    config.fail_fast = true;
    let mut runner = Runner::new(config, None);
    let summary = runner.run_instances(&[instance]).expect("campaign");

    assert_eq!(summary.total_runs, 1);
    assert_eq!(summary.failed_runs, 1);
}

#[test]
fn cancelled_campaign_flushes_summary_and_errors() {
    let (_dir, bin_dir, run_root) = workspace();
    write_script(&bin_dir, "rockyard_stress", "exit 0");

    let instance = stress_with_fault("stress.basic", vec![1]);
    let mut runner = Runner::new(CampaignConfig::new(Tier::Quick, &bin_dir, &run_root), None);
    runner.cancellation_token().cancel();

    let error = runner.run_instances(&[instance]).expect_err("cancelled");
    assert!(matches!(error, RockyardError::Cancelled));
    assert!(
        run_root.join("summary.json").is_file(),
        "cancellation still flushes the summary"
    );
}

#[test]
fn oracle_stop_condition_runs_checkconsistency_and_captures_output() {
    let (dir, bin_dir, run_root) = workspace();
    // Engine writes a CURRENT-bearing db directory.
    write_script(
        &bin_dir,
        "rockyard_crash",
        "mkdir -p \"${1#-db=}\"\n\
         touch \"${1#-db=}/CURRENT\"\n\
         echo 'Final verification passed'\nexit 0",
    );
    let oracle_root = dir.path().join("rocksdb");
    std::fs::create_dir_all(&oracle_root).expect("mkdir");
    write_script(&oracle_root, "ldb", "echo 'OK'\nexit 0");
    write_script(&oracle_root, "sst_dump", "exit 0");

    let mut instance = Instance::new("status.durability.wal_sync", Tier::Quick, Tool::Crash);
    instance.requires_oracle = true;
    instance.args = vec!["-db=<RUN_DIR>/db".to_owned(), "-seed=<SEED>".to_owned()];
    instance.stop = StopCondition {
        require_termination: true,
        require_final_verification_pass: true,
        require_oracle_check_consistency_ok: true,
        dedupe_by_fingerprint: true,
    };

    let mut runner = Runner::new(
        CampaignConfig::new(Tier::Quick, &bin_dir, &run_root),
        Some(Oracle::new(&oracle_root)),
    );
    let summary = runner.run_instances(&[instance]).expect("campaign");

    assert_eq!(summary.passed_runs, 1);
    assert_eq!(summary.oracle_required, 1);
    assert_eq!(summary.oracle_gated, 1);

    let run_dir = run_root.join("status.durability.wal_sync/seed_1");
    let artifact = artifact::read_run_artifact(&run_dir).expect("run.json");
    assert_eq!(artifact.oracle_exit_code, Some(0));
    assert!(run_dir.join("oracle/ldb_checkconsistency.stdout.txt").is_file());
    assert!(run_dir.join("oracle/ldb_checkconsistency.exitcode").is_file());
}

#[test]
fn failing_oracle_classifies_as_oracle_failure() {
    let (dir, bin_dir, run_root) = workspace();
    write_script(
        &bin_dir,
        "rockyard_crash",
        "mkdir -p \"${1#-db=}\"\ntouch \"${1#-db=}/CURRENT\"\n\
         echo 'Final verification passed'\nexit 0",
    );
    let oracle_root = dir.path().join("rocksdb");
    std::fs::create_dir_all(&oracle_root).expect("mkdir");
    write_script(&oracle_root, "ldb", "echo 'mismatch' >&2\nexit 1");
    write_script(&oracle_root, "sst_dump", "exit 0");

    let mut instance = Instance::new("status.durability.wal_sync", Tier::Quick, Tool::Crash);
    instance.requires_oracle = true;
    instance.args = vec!["-db=<RUN_DIR>/db".to_owned()];
    instance.stop.require_oracle_check_consistency_ok = true;

    let mut runner = Runner::new(
        CampaignConfig::new(Tier::Quick, &bin_dir, &run_root),
        Some(Oracle::new(&oracle_root)),
    );
    let summary = runner.run_instances(&[instance]).expect("campaign");

    assert_eq!(summary.failed_runs, 1);
    let artifact =
        artifact::read_run_artifact(&run_root.join("status.durability.wal_sync/seed_1"))
            .expect("run.json");
    assert_eq!(artifact.failure_kind.as_deref(), Some("oracle_failure"));
    assert_eq!(artifact.oracle_exit_code, Some(1));
}

#[test]
fn synthetic_fail_instance_validates_ledger_wiring_without_engine() {
    let (_dir, bin_dir, run_root) = workspace();
    write_script(
        &bin_dir,
        "rockyard_stress",
        "if [ \"$ROCKYARDKV_SYNTHETIC_FAIL\" = \"1\" ]; then\n\
         echo 'synthetic failure injected'\nexit 3\nfi\nexit 0",
    );

    let instance = synthetic_fail_instance();
    let mut runner = Runner::new(CampaignConfig::new(Tier::Quick, &bin_dir, &run_root), None);
    let summary = runner.run_instances(&[instance]).expect("campaign");

    assert_eq!(summary.failed_runs, 1);
    assert_eq!(summary.new_failures, 1);
    let artifact =
        artifact::read_run_artifact(&run_root.join("status.synthetic.fail/seed_1"))
            .expect("run.json");
    assert_eq!(artifact.exit_code, 3);
    assert_eq!(artifact.failure_kind.as_deref(), Some("exit_error"));
    assert_eq!(artifact.tags.kind, "status");
}

#[test]
fn minimizer_reduces_all_dimensions_to_floors() {
    let (_dir, bin_dir, run_root) = workspace();
    // Deterministic failure at every parameter setting.
    write_script(&bin_dir, "rockyard_stress", "echo 'boom'\nexit 3");

    let mut instance = stress_with_fault("stress.shrink", vec![1]);
    instance.args = vec![
        "-db=<RUN_DIR>/db".to_owned(),
        "-seed=<SEED>".to_owned(),
        "-duration=40".to_owned(),
        "-threads=16".to_owned(),
        "-keys=4000".to_owned(),
    ];
    instance.stop.require_final_verification_pass = false;

    let mut config = CampaignConfig::new(Tier::Quick, &bin_dir, &run_root);
    config.minimize = MinimizeConfig {
        enabled: true,
        ..MinimizeConfig::default()
    };
    let mut runner = Runner::new(config, None);
    let summary = runner.run_instances(&[instance]).expect("campaign");
    assert_eq!(summary.failed_runs, 1);

    let run_dir = run_root.join("stress.shrink/seed_1");
    let artifact = artifact::read_run_artifact(&run_dir).expect("run.json");
    assert_eq!(artifact.minimized, Some(true));
    let result = artifact.minimized_result.expect("minimize result");

    assert!(result.final_args.contains(&"-duration=5".to_owned()));
    assert!(result.final_args.contains(&"-threads=4".to_owned()));
    assert!(result.final_args.contains(&"-keys=500".to_owned()));
    assert!(result.attempts > 0);
    assert!(result.steps.iter().all(|step| step.reproduced));
    assert!(
        run_dir.join("_minimize/attempt001").is_dir(),
        "reproduction runs use the _minimize suffix"
    );
    // Reproduction runs never write run.json artifacts.
    assert!(!run_dir.join("_minimize/attempt001/run.json").exists());
}

#[test]
fn composite_threads_discovered_db_dir_between_steps() {
    let (_dir, bin_dir, run_root) = workspace();
    write_script(
        &bin_dir,
        "rockyard_crash",
        "mkdir -p \"${1#-db=}\"\ntouch \"${1#-db=}/CURRENT\"\n\
         echo 'Final verification passed'\nexit 0",
    );
    write_script(
        &bin_dir,
        "rockyard_stress",
        "restore=\"${1#-restore=}\"\n\
         [ -n \"$restore\" ] || exit 9\n\
         [ -f \"$restore/CURRENT\" ] || exit 9\nexit 0",
    );

    let mut first = Instance::new("crash.prepare", Tier::Quick, Tool::Crash);
    first.args = vec!["-db=<RUN_DIR>/db".to_owned()];
    first.stop.require_final_verification_pass = true;

    let mut second = Instance::new("stress.restore", Tier::Quick, Tool::Stress);
    second.args = vec!["-restore=<DB_DIR>".to_owned()];

    let composite = CompositeInstance {
        name: "crash.then.restore".to_owned(),
        steps: vec![
            CompositeStep {
                instance: first,
                discover_db_path: false,
            },
            CompositeStep {
                instance: second,
                discover_db_path: true,
            },
        ],
        gating_policy: GatingPolicy::AllSteps,
    };

    let mut runner = Runner::new(CampaignConfig::new(Tier::Quick, &bin_dir, &run_root), None);
    let (results, passed) = runner.run_composite(&composite, 1).expect("composite");

    assert_eq!(results.len(), 2);
    assert!(results[0].passed);
    assert!(
        results[1].passed,
        "second step must see the discovered CURRENT-bearing db: {:?}",
        results[1].failure_reason
    );
    assert!(passed);
    assert!(
        run_root
            .join("crash.then.restore/seed_1/step0_crash.prepare/run.json")
            .is_file()
    );
    assert!(
        run_root
            .join("crash.then.restore/seed_1/step1_stress.restore/run.json")
            .is_file()
    );
}

#[test]
fn duplicate_failures_are_not_minimized() {
    let (dir, bin_dir, run_root) = workspace();
    write_script(&bin_dir, "rockyard_stress", "echo 'boom'\nexit 3");
    let ledger_path = dir.path().join("ledger.json");

    let mut instance = stress_with_fault("stress.shrink", vec![1]);
    instance.args = vec!["-seed=<SEED>".to_owned(), "-duration=40".to_owned()];
    instance.stop.require_final_verification_pass = false;

    let mut config = CampaignConfig::new(Tier::Quick, &bin_dir, &run_root);
    config.ledger_path = Some(ledger_path.clone());
    config.minimize = MinimizeConfig {
        enabled: true,
        ..MinimizeConfig::default()
    };
    let mut runner = Runner::new(config, None);
    runner.run_instances(&[instance.clone()]).expect("campaign");

    let run_root_2 = dir.path().join("runs2");
    let mut config = CampaignConfig::new(Tier::Quick, &bin_dir, &run_root_2);
    config.ledger_path = Some(ledger_path);
    config.minimize = MinimizeConfig {
        enabled: true,
        ..MinimizeConfig::default()
    };
    let mut runner = Runner::new(config, None);
    runner.run_instances(&[instance]).expect("campaign");

    let artifact = artifact::read_run_artifact(&run_root_2.join("stress.shrink/seed_1"))
        .expect("run.json");
    assert_eq!(artifact.is_duplicate, Some(true));
    assert!(artifact.minimized.is_none(), "duplicates skip minimization");
}
