//! Campaign runner: subprocess execution, stop conditions, failure
//! classification, and artifact emission.
//!
//! Execution is single-threaded with one subprocess in flight at a time;
//! concurrency within a run belongs to the invoked binary. Isolation comes
//! from a fresh run directory per `(instance, seed)`. A single cancellation
//! source (interrupt handler → token → subprocess kill → cleanup)
//! propagates through every suspension point.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::artifact::{
    self, CampaignSummary, GovernanceReport, ORACLE_DIR_NAME, OUTPUT_LOG_NAME, RunArtifact,
};
use crate::filter::Filter;
use crate::instance::{Instance, Substitution};
use crate::ledger::{self, FailureClass, FailureLedger};
use crate::matrix::CompositeInstance;
use crate::minimize::{self, MinimizeConfig, MinimizeResult};
use crate::oracle::{Oracle, OracleOutcome, gate_check};
use crate::skip::SkipPolicySet;
use crate::taxonomy::{Tier, Tool};
use crate::trace;
use rockyard_error::{Result, RockyardError};
use rockyard_faultfs::host;
use rockyard_faultfs::trace::TraceSummary;

/// Poll interval for the subprocess wait loop.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Failure reason for a run killed by its deadline.
pub const TIMEOUT_REASON: &str = "timeout";
/// Failure reason for a run aborted by campaign cancellation.
pub const CANCELLED_REASON: &str = "cancelled";
/// Failure reason when the verification marker is absent.
pub const VERIFICATION_REASON: &str = "final verification not observed as passed in output log";

// ---------------------------------------------------------------------------
// Failure kinds
// ---------------------------------------------------------------------------

/// Closed failure-kind taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    Killed,
    Terminated,
    OracleFailure,
    VerificationFailure,
    Corruption,
    ExitError,
}

impl FailureKind {
    #[must_use]
    pub fn token(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Killed => "killed",
            Self::Terminated => "terminated",
            Self::OracleFailure => "oracle_failure",
            Self::VerificationFailure => "verification_failure",
            Self::Corruption => "corruption",
            Self::ExitError => "exit_error",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Order-sensitive failure-kind classification; first match wins.
///
/// A synthetic `-1` exit classifies as timeout only when the reason says
/// so; any other `-1` (fork/exec error, cancellation) is an exit error.
#[must_use]
pub fn classify_failure_kind(exit_code: i64, reason: &str) -> FailureKind {
    let lower = reason.to_lowercase();
    if exit_code == -1 && reason == TIMEOUT_REASON {
        return FailureKind::Timeout;
    }
    if exit_code == -1 {
        return FailureKind::ExitError;
    }
    if exit_code == 128 + i64::from(libc::SIGKILL) {
        return FailureKind::Killed;
    }
    if exit_code == 128 + i64::from(libc::SIGTERM) {
        return FailureKind::Terminated;
    }
    if lower.contains("oracle") || lower.contains("consistency") {
        return FailureKind::OracleFailure;
    }
    if lower.contains("verification") {
        return FailureKind::VerificationFailure;
    }
    if lower.contains("corruption") {
        return FailureKind::Corruption;
    }
    if lower.contains("timeout") {
        return FailureKind::Timeout;
    }
    FailureKind::ExitError
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Shared cancellation flag polled at every suspension point.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Trip this token on SIGINT/SIGTERM.
    pub fn install_interrupt_handler(&self) -> Result<()> {
        let token = self.clone();
        ctrlc::set_handler(move || {
            warn!("interrupt received, cancelling campaign");
            token.cancel();
        })
        .map_err(|error| RockyardError::internal(format!("interrupt handler: {error}")))
    }
}

// ---------------------------------------------------------------------------
// Campaign configuration and run results
// ---------------------------------------------------------------------------

/// Campaign-level configuration.
#[derive(Debug, Clone)]
pub struct CampaignConfig {
    pub tier: Tier,
    /// Directory holding the tool binaries.
    pub bin_dir: PathBuf,
    /// Root directory for run artifacts.
    pub run_root: PathBuf,
    /// `None` behaves like the match-all filter.
    pub filter: Option<Filter>,
    pub skip_policies: SkipPolicySet,
    /// Ledger file; `None` keeps the ledger in memory.
    pub ledger_path: Option<PathBuf>,
    /// Explicit per-instance timeout; the effective timeout is the smaller
    /// of this and the tier default, bounded by the remaining global budget.
    pub per_instance_timeout: Option<Duration>,
    /// Global campaign deadline; defaults to the tier budget.
    pub global_timeout: Option<Duration>,
    pub fail_fast: bool,
    /// Fail the campaign when unquarantined duplicates remain.
    pub require_quarantine: bool,
    pub minimize: MinimizeConfig,
}

impl CampaignConfig {
    #[must_use]
    pub fn new(tier: Tier, bin_dir: impl Into<PathBuf>, run_root: impl Into<PathBuf>) -> Self {
        Self {
            tier,
            bin_dir: bin_dir.into(),
            run_root: run_root.into(),
            filter: None,
            skip_policies: SkipPolicySet::default(),
            ledger_path: None,
            per_instance_timeout: None,
            global_timeout: None,
            fail_fast: false,
            require_quarantine: false,
            minimize: MinimizeConfig::default(),
        }
    }
}

/// In-memory outcome of one `(instance, seed)` run.
///
/// Created when the runner starts the run, mutated only by the runner
/// thread driving it, and closed (written to disk) before the runner moves
/// on.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub instance: Instance,
    pub seed: u64,
    pub run_dir: PathBuf,
    pub binary_path: PathBuf,
    pub args: Vec<String>,
    /// Unix milliseconds.
    pub start_time: u64,
    /// Unix milliseconds.
    pub end_time: u64,
    pub exit_code: i64,
    pub passed: bool,
    pub failure_reason: String,
    pub failure_kind: Option<FailureKind>,
    pub fingerprint: String,
    pub is_duplicate: bool,
    pub failure_class: Option<FailureClass>,
    pub quarantine_policy: String,
    pub oracle_result: Option<OracleOutcome>,
    pub trace_result: Option<TraceSummary>,
    pub minimize_result: Option<MinimizeResult>,
}

impl RunResult {
    /// Whether this failure blocks the campaign (not quarantined).
    #[must_use]
    pub fn blocks_campaign(&self) -> bool {
        !self.passed && self.failure_class != Some(FailureClass::KnownFailure)
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Drives a campaign over a set of instances.
pub struct Runner {
    config: CampaignConfig,
    oracle: Option<Oracle>,
    ledger: FailureLedger,
    cancel: CancellationToken,
    results: Vec<RunResult>,
}

impl Runner {
    #[must_use]
    pub fn new(config: CampaignConfig, oracle: Option<Oracle>) -> Self {
        let ledger = match &config.ledger_path {
            Some(path) => FailureLedger::load(path),
            None => FailureLedger::in_memory(),
        };
        Self {
            config,
            oracle,
            ledger,
            cancel: CancellationToken::new(),
            results: Vec::new(),
        }
    }

    /// Results of the last `run_instances` call, in dispatch order.
    #[must_use]
    pub fn results(&self) -> &[RunResult] {
        &self.results
    }

    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    #[must_use]
    pub fn ledger(&self) -> &FailureLedger {
        &self.ledger
    }

    #[must_use]
    pub fn minimize_config(&self) -> &MinimizeConfig {
        &self.config.minimize
    }

    #[must_use]
    pub fn ledger_mut(&mut self) -> &mut FailureLedger {
        &mut self.ledger
    }

    /// Run a campaign over `instances` in declared order.
    ///
    /// Returns the summary on completion (including failed campaigns), or
    /// an error on gate failure or cancellation. Gate failures happen
    /// before any per-instance directory or summary exists.
    pub fn run_instances(&mut self, instances: &[Instance]) -> Result<CampaignSummary> {
        let mut summary = CampaignSummary::new(self.config.tier.token());
        self.results.clear();

        // matrix → filter → skip → gate, all before the first subprocess.
        let mut runnable = Vec::new();
        for instance in instances {
            let tags = instance.tags();
            if let Some(filter) = &self.config.filter {
                if !filter.matches(&tags) {
                    debug!(instance = %instance.name, "filtered out");
                    continue;
                }
            }
            if let Some(record) = self.config.skip_policies.match_instance(&instance.name, &tags)
            {
                info!(instance = %instance.name, reason = %record.reason, "skipped by policy");
                summary.skipped_runs += instance.seeds.len() as u64;
                summary.skipped.push(record);
                continue;
            }
            runnable.push(instance);
        }
        for &instance in &runnable {
            gate_check(self.oracle.as_ref(), instance)?;
        }

        host::create_dir_all(&self.config.run_root)?;
        let campaign_start = Instant::now();
        let global_timeout = self
            .config
            .global_timeout
            .unwrap_or_else(|| self.config.tier.campaign_timeout());

        'campaign: for instance in runnable {
            for &seed in &instance.seeds {
                if self.cancel.is_cancelled() {
                    self.flush_summary(&mut summary);
                    return Err(RockyardError::Cancelled);
                }
                let elapsed = campaign_start.elapsed();
                if elapsed >= global_timeout {
                    warn!("global campaign timeout reached, stopping dispatch");
                    break 'campaign;
                }
                let timeout = self.effective_timeout(instance, global_timeout - elapsed);
                let run_dir = self
                    .config
                    .run_root
                    .join(&instance.name)
                    .join(format!("seed_{seed}"));

                let mut result = self.execute_run(instance, seed, &run_dir, timeout);

                if minimize::eligible(&result, &self.config.minimize) {
                    let minimized = minimize::minimize(self, &result);
                    result.minimize_result = Some(minimized);
                }

                if let Err(error) = self.write_run_artifacts(&result) {
                    warn!(instance = %instance.name, seed, %error, "artifact write failed");
                }

                Self::account(&mut summary, &result);
                let failed = !result.passed;
                let cancelled = result.failure_reason == CANCELLED_REASON;
                self.results.push(result);

                if cancelled {
                    self.flush_summary(&mut summary);
                    return Err(RockyardError::Cancelled);
                }
                if self.config.fail_fast && failed {
                    info!(instance = %instance.name, seed, "fail-fast stop");
                    break 'campaign;
                }
            }
        }

        self.flush_summary(&mut summary);
        Ok(summary)
    }

    /// Whether the finished campaign must exit non-zero.
    #[must_use]
    pub fn campaign_failed(&self, summary: &CampaignSummary) -> bool {
        if self.results.iter().any(RunResult::blocks_campaign) {
            return true;
        }
        self.config.require_quarantine && summary.unquarantined > 0
    }

    fn effective_timeout(&self, instance: &Instance, remaining: Duration) -> Duration {
        let tier_default = instance.tier.instance_timeout();
        let configured = self
            .config
            .per_instance_timeout
            .map_or(tier_default, |explicit| explicit.min(tier_default));
        configured.min(remaining)
    }

    fn account(summary: &mut CampaignSummary, result: &RunResult) {
        summary.total_runs += 1;
        if result.passed {
            summary.passed_runs += 1;
        } else {
            summary.failed_runs += 1;
        }
        if result.instance.requires_oracle {
            summary.oracle_required += 1;
        }
        if result.oracle_result.is_some() {
            summary.oracle_gated += 1;
        }
        match result.failure_class {
            Some(FailureClass::NewFailure) => summary.new_failures += 1,
            Some(FailureClass::Duplicate) => {
                summary.duplicates += 1;
                summary.unquarantined += 1;
            }
            Some(FailureClass::KnownFailure) => summary.known_failures += 1,
            None => {}
        }
    }

    fn flush_summary(&self, summary: &mut CampaignSummary) {
        summary.all_passed = summary.failed_runs == 0;
        if let Err(error) = artifact::write_summary(&self.config.run_root, summary) {
            warn!(%error, "summary write failed");
        }
        let governance = GovernanceReport::derive(summary);
        if let Err(error) = artifact::write_governance(&self.config.run_root, &governance) {
            warn!(%error, "governance write failed");
        }
    }

    /// Run a composite instance: steps in order, each in its own directory
    /// under the composite's seed directory, threading the discovered
    /// database root into steps that ask for it.
    ///
    /// Returns the per-step results and the gated composite verdict.
    pub fn run_composite(
        &mut self,
        composite: &CompositeInstance,
        seed: u64,
    ) -> Result<(Vec<RunResult>, bool)> {
        for step in &composite.steps {
            gate_check(self.oracle.as_ref(), &step.instance)?;
        }

        let seed_dir = self
            .config
            .run_root
            .join(&composite.name)
            .join(format!("seed_{seed}"));
        let mut results: Vec<RunResult> = Vec::with_capacity(composite.steps.len());

        for (index, step) in composite.steps.iter().enumerate() {
            if self.cancel.is_cancelled() {
                return Err(RockyardError::Cancelled);
            }
            let db_dir = if step.discover_db_path {
                results
                    .last()
                    .and_then(|previous| discover_db_path(&previous.run_dir))
            } else {
                None
            };
            let run_dir = seed_dir.join(format!("step{index}_{}", step.instance.name));
            let timeout = self.effective_timeout(&step.instance, step.instance.tier.campaign_timeout());
            let result =
                self.execute_run_with_db(&step.instance, seed, &run_dir, timeout, db_dir.as_deref());
            if let Err(error) = self.write_run_artifacts(&result) {
                warn!(step = %step.instance.name, seed, %error, "artifact write failed");
            }
            results.push(result);
        }

        let verdicts: Vec<bool> = results.iter().map(|result| result.passed).collect();
        let passed = composite.passed(&verdicts);
        info!(composite = %composite.name, seed, passed, "composite finished");
        Ok((results, passed))
    }

    /// Execute one run end to end: spawn, wait, evaluate stop conditions,
    /// classify, and fingerprint. Artifacts are not written here.
    pub(crate) fn execute_run(
        &mut self,
        instance: &Instance,
        seed: u64,
        run_dir: &Path,
        timeout: Duration,
    ) -> RunResult {
        self.execute_run_with_db(instance, seed, run_dir, timeout, None)
    }

    fn execute_run_with_db(
        &mut self,
        instance: &Instance,
        seed: u64,
        run_dir: &Path,
        timeout: Duration,
        db_dir: Option<&Path>,
    ) -> RunResult {
        let binary_path = instance.resolve_binary(&self.config.bin_dir);
        let discovered = db_dir.map(|path| path.display().to_string()).unwrap_or_default();
        let substitution = Substitution {
            run_dir: run_dir.display().to_string(),
            seed,
            db_dir: discovered.clone(),
            prev_db_dir: discovered,
            ..Substitution::default()
        };
        let args = substitution.apply(&instance.args);

        let mut result = RunResult {
            instance: instance.clone(),
            seed,
            run_dir: run_dir.to_path_buf(),
            binary_path: binary_path.clone(),
            args: args.clone(),
            start_time: unix_ms(),
            end_time: 0,
            exit_code: 0,
            passed: false,
            failure_reason: String::new(),
            failure_kind: None,
            fingerprint: String::new(),
            is_duplicate: false,
            failure_class: None,
            quarantine_policy: String::new(),
            oracle_result: None,
            trace_result: None,
            minimize_result: None,
        };

        info!(instance = %instance.name, seed, binary = %binary_path.display(), "run started");
        if let Err(error) = host::create_dir_all(run_dir) {
            result.failure_reason = format!("run dir creation failed: {error}");
            result.exit_code = -1;
            self.finish_failure(&mut result);
            return result;
        }

        match self.spawn_and_wait(&binary_path, &args, &instance.env, run_dir, timeout) {
            ChildOutcome::Exited(exit_code) => {
                result.exit_code = exit_code;
                let (passed, reason, oracle_result) =
                    self.evaluate_stop(instance, exit_code, run_dir);
                result.passed = passed;
                result.failure_reason = reason;
                result.oracle_result = oracle_result;
            }
            ChildOutcome::TimedOut => {
                result.exit_code = -1;
                result.failure_reason = TIMEOUT_REASON.to_owned();
            }
            ChildOutcome::Cancelled => {
                result.exit_code = -1;
                result.failure_reason = CANCELLED_REASON.to_owned();
            }
            ChildOutcome::SpawnError(message) => {
                result.exit_code = -1;
                result.failure_reason = message;
            }
        }

        result.trace_result = trace::collect_trace_result(run_dir);
        if !result.passed {
            self.finish_failure(&mut result);
        }
        result.end_time = unix_ms();
        info!(
            instance = %instance.name,
            seed,
            passed = result.passed,
            exit_code = result.exit_code,
            "run finished"
        );
        result
    }

    /// Compute failure kind, fingerprint, and ledger classification.
    ///
    /// Fingerprint recording happens before artifact writes so
    /// `is_duplicate` reflects the ledger state including this failure.
    fn finish_failure(&mut self, result: &mut RunResult) {
        let kind = classify_failure_kind(result.exit_code, &result.failure_reason);
        result.failure_kind = Some(kind);
        let tail = ledger::log_tail(&result.run_dir.join(OUTPUT_LOG_NAME));
        result.fingerprint = ledger::fingerprint(
            &result.instance.name,
            result.seed,
            kind.token(),
            &result.failure_reason,
            &tail,
        );
        let class = self.ledger.classify(
            &result.fingerprint,
            &result.instance.name,
            result.instance.stop.dedupe_by_fingerprint,
        );
        result.failure_class = Some(class);
        result.is_duplicate = class != FailureClass::NewFailure;
        result.quarantine_policy = self
            .ledger
            .get(&result.fingerprint)
            .map(|entry| entry.quarantine.clone())
            .unwrap_or_default();
    }

    fn spawn_and_wait(
        &self,
        binary: &Path,
        args: &[String],
        env: &BTreeMap<String, String>,
        run_dir: &Path,
        timeout: Duration,
    ) -> ChildOutcome {
        let log_path = run_dir.join(OUTPUT_LOG_NAME);
        let log_file = match std::fs::File::create(&log_path) {
            Ok(file) => file,
            Err(error) => return ChildOutcome::SpawnError(format!("output log: {error}")),
        };
        let log_clone = match log_file.try_clone() {
            Ok(clone) => clone,
            Err(error) => return ChildOutcome::SpawnError(format!("output log: {error}")),
        };

        let mut child = match Command::new(binary)
            .args(args)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(log_file)
            .stderr(log_clone)
            .spawn()
        {
            Ok(child) => child,
            Err(error) => return ChildOutcome::SpawnError(error.to_string()),
        };

        let deadline = Instant::now() + timeout;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return ChildOutcome::Exited(exit_code_of(status)),
                Ok(None) => {}
                Err(error) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return ChildOutcome::SpawnError(error.to_string());
                }
            }
            if self.cancel.is_cancelled() {
                let _ = child.kill();
                let _ = child.wait();
                return ChildOutcome::Cancelled;
            }
            if Instant::now() >= deadline {
                warn!(binary = %binary.display(), "per-run deadline exceeded, killing child");
                let _ = child.kill();
                let _ = child.wait();
                return ChildOutcome::TimedOut;
            }
            std::thread::sleep(WAIT_POLL_INTERVAL);
        }
    }

    /// Evaluate the stop-condition bundle for a terminated child.
    fn evaluate_stop(
        &self,
        instance: &Instance,
        exit_code: i64,
        run_dir: &Path,
    ) -> (bool, String, Option<OracleOutcome>) {
        let log_path = run_dir.join(OUTPUT_LOG_NAME);
        let marker_ok = verification_marker_passed(instance.tool, &log_path);

        if instance.stop.require_termination && exit_code != 0 {
            // Stress under fault injection may die nonzero as long as final
            // verification observed a clean state.
            let exempt = instance.tool == Tool::Stress && !instance.fault_model.is_none();
            if !(exempt && marker_ok) {
                let reason = if exempt {
                    VERIFICATION_REASON.to_owned()
                } else {
                    format!("exited with code {exit_code}")
                };
                return (false, reason, None);
            }
        }

        if instance.stop.require_final_verification_pass && !marker_ok {
            return (false, VERIFICATION_REASON.to_owned(), None);
        }

        if instance.stop.require_oracle_check_consistency_ok {
            let Some(db_path) = discover_db_path(run_dir) else {
                return (
                    false,
                    "oracle consistency check required but no database found under run dir"
                        .to_owned(),
                    None,
                );
            };
            let Some(oracle) = self.oracle.as_ref() else {
                return (false, "oracle consistency check required but oracle not configured".to_owned(), None);
            };
            match oracle.check_consistency(&db_path) {
                Ok(outcome) => {
                    if let Err(error) = write_oracle_artifacts(run_dir, &outcome) {
                        warn!(%error, "oracle artifact write failed");
                    }
                    if !outcome.ok() {
                        let reason = format!(
                            "oracle checkconsistency failed with exit code {}",
                            outcome.exit_code
                        );
                        return (false, reason, Some(outcome));
                    }
                    return (true, String::new(), Some(outcome));
                }
                Err(error) => {
                    return (false, format!("oracle invocation failed: {error}"), None);
                }
            }
        }

        (true, String::new(), None)
    }

    fn write_run_artifacts(&self, result: &RunResult) -> Result<()> {
        let artifact = run_artifact_from(result);
        artifact::write_run_artifact(&result.run_dir, &artifact)?;
        if result.is_duplicate && !result.fingerprint.is_empty() {
            artifact::write_duplicate_marker(&result.run_dir, &result.fingerprint)?;
        }
        if result.trace_result.is_some() {
            trace::write_replay_script(&result.run_dir, &result.binary_path, &result.args)?;
        }
        Ok(())
    }
}

enum ChildOutcome {
    Exited(i64),
    TimedOut,
    Cancelled,
    SpawnError(String),
}

/// Map an exit status to the campaign's exit-code convention: native code
/// when available, `128 + signal` for signal deaths, `-1` otherwise.
fn exit_code_of(status: std::process::ExitStatus) -> i64 {
    use std::os::unix::process::ExitStatusExt;
    if let Some(code) = status.code() {
        return i64::from(code);
    }
    status.signal().map_or(-1, |signal| 128 + i64::from(signal))
}

/// Scan `output.log` for the tool-specific success marker.
///
/// Tools without a defined marker pass vacuously.
#[must_use]
pub fn verification_marker_passed(tool: Tool, log_path: &Path) -> bool {
    let Ok(log) = std::fs::read_to_string(log_path) else {
        return !matches!(tool, Tool::Stress | Tool::Crash);
    };
    match tool {
        Tool::Stress => log.contains("Running final verification") && log.contains(", 0 failures"),
        Tool::Crash => log.contains("Final verification passed"),
        _ => true,
    }
}

/// Probe a run directory for the database root.
///
/// Candidates are checked in order, preferring any that contains a
/// `CURRENT` file (with a `<candidate>/db/` fallback); when none does, the
/// first existing candidate wins.
#[must_use]
pub fn discover_db_path(run_dir: &Path) -> Option<PathBuf> {
    const CANDIDATES: [&str; 4] = ["db", "artifacts/db", "db_sync", "db_faultfs_disable_wal"];
    for candidate in CANDIDATES {
        let path = run_dir.join(candidate);
        if path.join("CURRENT").is_file() {
            return Some(path);
        }
        let nested = path.join("db");
        if nested.join("CURRENT").is_file() {
            return Some(nested);
        }
    }
    CANDIDATES
        .iter()
        .map(|candidate| run_dir.join(candidate))
        .find(|path| path.is_dir())
}

fn write_oracle_artifacts(run_dir: &Path, outcome: &OracleOutcome) -> Result<()> {
    let oracle_dir = run_dir.join(ORACLE_DIR_NAME);
    host::create_dir_all(&oracle_dir)?;
    host::write(
        &oracle_dir.join("ldb_checkconsistency.stdout.txt"),
        &outcome.stdout,
    )?;
    host::write(
        &oracle_dir.join("ldb_checkconsistency.stderr.txt"),
        &outcome.stderr,
    )?;
    host::write(
        &oracle_dir.join("ldb_checkconsistency.exitcode"),
        format!("{}\n", outcome.exit_code),
    )?;
    Ok(())
}

fn run_artifact_from(result: &RunResult) -> RunArtifact {
    RunArtifact {
        schema_version: crate::SCHEMA_VERSION.to_owned(),
        instance: result.instance.name.clone(),
        seed: result.seed,
        binary_path: result.binary_path.display().to_string(),
        start_time: result.start_time,
        end_time: result.end_time,
        duration_ms: result.end_time.saturating_sub(result.start_time),
        exit_code: result.exit_code,
        passed: result.passed,
        failure: (!result.failure_reason.is_empty()).then(|| result.failure_reason.clone()),
        failure_kind: result.failure_kind.map(|kind| kind.token().to_owned()),
        fingerprint: (!result.fingerprint.is_empty()).then(|| result.fingerprint.clone()),
        is_duplicate: (!result.passed).then_some(result.is_duplicate),
        oracle_exit_code: result.oracle_result.as_ref().map(|oracle| oracle.exit_code),
        oracle_output: result
            .oracle_result
            .as_ref()
            .map(|oracle| oracle.stdout.clone()),
        trace_path: result
            .trace_result
            .as_ref()
            .map(|trace| trace.path.display().to_string()),
        trace_bytes_written: result.trace_result.as_ref().map(|trace| trace.bytes_written),
        trace_truncated: result.trace_result.as_ref().map(|trace| trace.truncated),
        replay_command: result
            .trace_result
            .as_ref()
            .map(|_| trace::replay_command(&result.binary_path, &result.args)),
        minimized: result.minimize_result.as_ref().map(|_| true),
        minimized_result: result.minimize_result.clone(),
        tags: result.instance.tags(),
    }
}

fn unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
