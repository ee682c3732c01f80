//! Failure minimizer: binary-search reduction of stress parameters.
//!
//! For eligible failures the minimizer halves `-duration`, `-threads`, and
//! `-keys` toward their floors, one dimension at a time, accepting a
//! reduction only when the reproduction run fails with the same failure
//! kind. Reproduction runs live under a `_minimize/attempt<NNN>` suffix of
//! the original run directory and never persist fingerprints, so they
//! cannot pollute the ledger.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::runner::{FailureKind, RunResult, Runner};
use crate::taxonomy::Tool;

/// Per-dimension reduction floors.
pub const DURATION_FLOOR_SECS: u64 = 5;
pub const THREADS_FLOOR: u64 = 4;
pub const KEYS_FLOOR: u64 = 500;

/// Minimizer configuration.
#[derive(Debug, Clone)]
pub struct MinimizeConfig {
    pub enabled: bool,
    pub duration_floor: u64,
    pub threads_floor: u64,
    pub keys_floor: u64,
    /// Failure kinds worth minimizing.
    pub allowed_kinds: Vec<FailureKind>,
}

impl Default for MinimizeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            duration_floor: DURATION_FLOOR_SECS,
            threads_floor: THREADS_FLOOR,
            keys_floor: KEYS_FLOOR,
            allowed_kinds: vec![
                FailureKind::VerificationFailure,
                FailureKind::OracleFailure,
                FailureKind::Corruption,
                FailureKind::ExitError,
            ],
        }
    }
}

/// One accepted or rejected reduction experiment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinimizeStep {
    pub flag: String,
    pub from: u64,
    pub to: u64,
    pub reproduced: bool,
}

/// Ordered record of the minimization run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinimizeResult {
    pub steps: Vec<MinimizeStep>,
    pub final_args: Vec<String>,
    pub attempts: u64,
}

/// Whether a failed run qualifies for minimization.
#[must_use]
pub fn eligible(result: &RunResult, config: &MinimizeConfig) -> bool {
    if !config.enabled || result.passed || result.is_duplicate {
        return false;
    }
    if result.instance.tool != Tool::Stress {
        return false;
    }
    result
        .failure_kind
        .is_some_and(|kind| config.allowed_kinds.contains(&kind))
}

/// Reduce the failing run, one dimension at a time.
pub fn minimize(runner: &mut Runner, failed: &RunResult) -> MinimizeResult {
    let config = runner.minimize_config().clone();
    let Some(target_kind) = failed.failure_kind else {
        return MinimizeResult {
            steps: Vec::new(),
            final_args: failed.args.clone(),
            attempts: 0,
        };
    };
    let phases: [(&str, u64); 3] = [
        ("-duration", config.duration_floor),
        ("-threads", config.threads_floor),
        ("-keys", config.keys_floor),
    ];

    // Reduce the template argv so <RUN_DIR>/<SEED> re-substitute into each
    // attempt directory.
    let mut instance = failed.instance.clone();
    instance.stop.dedupe_by_fingerprint = false;

    let mut steps = Vec::new();
    let mut attempts: u64 = 0;

    info!(
        instance = %failed.instance.name,
        seed = failed.seed,
        kind = %target_kind,
        "minimizing failure"
    );

    for (flag, floor) in phases {
        loop {
            let Some(current) = flag_value(&instance.args, flag) else {
                debug!(flag, "flag not present in argv, skipping dimension");
                break;
            };
            if current <= floor {
                break;
            }
            let candidate = (current / 2).max(floor);
            attempts += 1;
            let attempt_dir = failed
                .run_dir
                .join("_minimize")
                .join(format!("attempt{attempts:03}"));

            let mut reduced = instance.clone();
            set_flag_value(&mut reduced.args, flag, candidate);

            let timeout = reduced.tier.instance_timeout();
            let outcome = runner.execute_run(&reduced, failed.seed, &attempt_dir, timeout);
            let reproduced = !outcome.passed && outcome.failure_kind == Some(target_kind);

            steps.push(MinimizeStep {
                flag: flag.to_owned(),
                from: current,
                to: candidate,
                reproduced,
            });

            if reproduced {
                instance = reduced;
            } else {
                debug!(flag, from = current, to = candidate, "reduction lost the failure");
                break;
            }
        }
    }

    MinimizeResult {
        final_args: instance.args,
        steps,
        attempts,
    }
}

/// Read a numeric flag from argv, handling `-flag value` and `-flag=value`.
#[must_use]
pub fn flag_value(args: &[String], flag: &str) -> Option<u64> {
    let joined_prefix = format!("{flag}=");
    for (index, arg) in args.iter().enumerate() {
        if let Some(value) = arg.strip_prefix(&joined_prefix) {
            return value.parse().ok();
        }
        if arg == flag {
            return args.get(index + 1).and_then(|value| value.parse().ok());
        }
    }
    None
}

/// Rewrite a numeric flag in place, preserving its argv style.
pub fn set_flag_value(args: &mut [String], flag: &str, value: u64) {
    let joined_prefix = format!("{flag}=");
    for index in 0..args.len() {
        if args[index].starts_with(&joined_prefix) {
            args[index] = format!("{flag}={value}");
            return;
        }
        if args[index] == flag && index + 1 < args.len() {
            args[index + 1] = value.to_string();
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_parsing_handles_both_styles() {
        let joined = vec!["-duration=30".to_owned(), "-threads=16".to_owned()];
        assert_eq!(flag_value(&joined, "-duration"), Some(30));

        let separate = vec!["-duration".to_owned(), "30".to_owned()];
        assert_eq!(flag_value(&separate, "-duration"), Some(30));

        assert_eq!(flag_value(&joined, "-keys"), None);
    }

    #[test]
    fn flag_rewrite_preserves_style() {
        let mut joined = vec!["-duration=30".to_owned()];
        set_flag_value(&mut joined, "-duration", 15);
        assert_eq!(joined, vec!["-duration=15"]);

        let mut separate = vec!["-duration".to_owned(), "30".to_owned()];
        set_flag_value(&mut separate, "-duration", 15);
        assert_eq!(separate, vec!["-duration", "15"]);
    }

    #[test]
    fn default_allowlist_excludes_timeouts() {
        let config = MinimizeConfig::default();
        assert!(!config.allowed_kinds.contains(&FailureKind::Timeout));
        assert!(!config.allowed_kinds.contains(&FailureKind::Killed));
        assert!(config.allowed_kinds.contains(&FailureKind::VerificationFailure));
    }
}
