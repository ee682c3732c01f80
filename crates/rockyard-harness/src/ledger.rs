//! Content-addressed failure ledger.
//!
//! Failures are keyed by a 16-hex fingerprint of their identifying content;
//! the ledger maps fingerprints to first-seen/count/issue/quarantine records
//! and persists them as a flat JSON list. Persistence is best-effort on
//! every mutation; a missing or corrupt ledger file yields an empty
//! in-memory ledger, never an error.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

/// How much of the end of `output.log` participates in the fingerprint.
pub const LOG_TAIL_BYTES: usize = 4096;

/// Quarantine annotation permitting a known failure to recur.
pub const QUARANTINE_ALLOWED: &str = "allowed";
/// Quarantine annotation skipping a known failure entirely.
pub const QUARANTINE_SKIP: &str = "skip";

/// Compute the failure fingerprint: the first 16 hex characters of SHA-256
/// over `instance ":" seed ":" failure_kind ":" failure_reason` followed by
/// the log tail (empty when the log is absent).
#[must_use]
pub fn fingerprint(
    instance: &str,
    seed: u64,
    failure_kind: &str,
    failure_reason: &str,
    log_tail: &[u8],
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(instance.as_bytes());
    hasher.update(b":");
    hasher.update(seed.to_string().as_bytes());
    hasher.update(b":");
    hasher.update(failure_kind.as_bytes());
    hasher.update(b":");
    hasher.update(failure_reason.as_bytes());
    hasher.update(log_tail);
    let digest = hasher.finalize();
    digest[..8].iter().map(|byte| format!("{byte:02x}")).collect()
}

/// Last [`LOG_TAIL_BYTES`] of the file at `path`, or empty when absent.
#[must_use]
pub fn log_tail(path: &Path) -> Vec<u8> {
    match std::fs::read(path) {
        Ok(bytes) => {
            let start = bytes.len().saturating_sub(LOG_TAIL_BYTES);
            bytes[start..].to_vec()
        }
        Err(_) => Vec::new(),
    }
}

/// Classification of a failed run against the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// First sighting; recorded, never counted as unquarantined.
    NewFailure,
    /// Known fingerprint without a quarantine annotation.
    Duplicate,
    /// Known fingerprint with a quarantine annotation.
    KnownFailure,
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = match self {
            Self::NewFailure => "new_failure",
            Self::Duplicate => "duplicate",
            Self::KnownFailure => "known_failure",
        };
        f.write_str(token)
    }
}

/// Persisted ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownFailure {
    pub fingerprint: String,
    pub instance: String,
    /// Unix milliseconds of the first sighting.
    pub first_seen: u64,
    pub count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_id: Option<String>,
    /// `""`, `"allowed"`, or `"skip"`.
    #[serde(default)]
    pub quarantine: String,
}

/// In-memory ledger with best-effort file persistence.
#[derive(Debug, Default)]
pub struct FailureLedger {
    path: Option<PathBuf>,
    entries: BTreeMap<String, KnownFailure>,
}

impl FailureLedger {
    /// Ledger without a backing file; mutations stay in memory.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the ledger at `path`; missing or invalid files yield an empty
    /// ledger with a warning.
    #[must_use]
    pub fn load(path: &Path) -> Self {
        let entries = match std::fs::read(path) {
            Ok(bytes) => match serde_json::from_slice::<Vec<KnownFailure>>(&bytes) {
                Ok(list) => list
                    .into_iter()
                    .map(|entry| (entry.fingerprint.clone(), entry))
                    .collect(),
                Err(error) => {
                    warn!(path = %path.display(), %error, "invalid ledger file, starting empty");
                    BTreeMap::new()
                }
            },
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(error) => {
                warn!(path = %path.display(), %error, "unreadable ledger file, starting empty");
                BTreeMap::new()
            }
        };
        Self {
            path: Some(path.to_path_buf()),
            entries,
        }
    }

    /// Record a fingerprint sighting: a new entry initializes `count = 1`
    /// and stamps `first_seen`; an existing entry increments `count`.
    pub fn record(&mut self, fingerprint: &str, instance: &str) {
        match self.entries.get_mut(fingerprint) {
            Some(entry) => entry.count += 1,
            None => {
                self.entries.insert(
                    fingerprint.to_owned(),
                    KnownFailure {
                        fingerprint: fingerprint.to_owned(),
                        instance: instance.to_owned(),
                        first_seen: unix_ms(),
                        count: 1,
                        description: None,
                        issue_id: None,
                        quarantine: String::new(),
                    },
                );
            }
        }
        self.save();
    }

    /// Annotate a fingerprint with a quarantine policy and issue id.
    pub fn quarantine(&mut self, fingerprint: &str, policy: &str, issue_id: Option<String>) {
        if let Some(entry) = self.entries.get_mut(fingerprint) {
            entry.quarantine = policy.to_owned();
            entry.issue_id = issue_id;
            self.save();
        }
    }

    #[must_use]
    pub fn get(&self, fingerprint: &str) -> Option<&KnownFailure> {
        self.entries.get(fingerprint)
    }

    /// Whether `fingerprint` carries any quarantine annotation.
    #[must_use]
    pub fn is_quarantined(&self, fingerprint: &str) -> bool {
        self.entries
            .get(fingerprint)
            .is_some_and(|entry| !entry.quarantine.is_empty())
    }

    /// Classify a failure fingerprint against the ledger.
    ///
    /// With `persist` unset (minimizer reproduction runs) classification is
    /// read-only: a miss is still `NewFailure` but nothing is recorded.
    pub fn classify(&mut self, fingerprint: &str, instance: &str, persist: bool) -> FailureClass {
        let class = match self.entries.get(fingerprint) {
            Some(entry) if !entry.quarantine.is_empty() => FailureClass::KnownFailure,
            Some(_) => FailureClass::Duplicate,
            None => FailureClass::NewFailure,
        };
        if persist {
            self.record(fingerprint, instance);
        }
        class
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn save(&self) {
        let Some(path) = &self.path else {
            return;
        };
        let list: Vec<&KnownFailure> = self.entries.values().collect();
        match serde_json::to_vec_pretty(&list) {
            Ok(bytes) => {
                if let Err(error) = std::fs::write(path, bytes) {
                    warn!(path = %path.display(), %error, "ledger save failed");
                }
            }
            Err(error) => warn!(%error, "ledger serialize failed"),
        }
    }
}

fn unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
