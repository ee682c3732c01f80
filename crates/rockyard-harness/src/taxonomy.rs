//! Closed taxonomies: tiers, tools, fault models, and the derived tag set.
//!
//! Tag keys are closed; the allowlist returned by [`all_tag_keys`] is the
//! authoritative reference for filter and skip-policy validation: unknown
//! keys are rejected there, never silently matched.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Campaign tier. Nightly dominates quick on both timeout axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Quick,
    Nightly,
}

impl Tier {
    /// Default per-instance timeout for this tier.
    #[must_use]
    pub fn instance_timeout(self) -> Duration {
        match self {
            Self::Quick => Duration::from_secs(120),
            Self::Nightly => Duration::from_secs(900),
        }
    }

    /// Global campaign timeout for this tier.
    #[must_use]
    pub fn campaign_timeout(self) -> Duration {
        match self {
            Self::Quick => Duration::from_secs(1_800),
            Self::Nightly => Duration::from_secs(21_600),
        }
    }

    #[must_use]
    pub fn token(self) -> &'static str {
        match self {
            Self::Quick => "quick",
            Self::Nightly => "nightly",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Test tool an instance invokes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tool {
    Stress,
    Crash,
    Adversarial,
    Golden,
    SstDump,
}

impl Tool {
    /// Native binary name under the campaign `bin_dir`.
    ///
    /// `Golden` is a test-framework invocation rather than a native binary;
    /// see `Instance::resolve_binary`.
    #[must_use]
    pub fn binary_name(self) -> &'static str {
        match self {
            Self::Stress => "rockyard_stress",
            Self::Crash => "rockyard_crash",
            Self::Adversarial => "rockyard_adversarial",
            Self::Golden => "cargo",
            Self::SstDump => "rockyard_sst_dump",
        }
    }

    #[must_use]
    pub fn token(self) -> &'static str {
        match self {
            Self::Stress => "stress",
            Self::Crash => "crash",
            Self::Adversarial => "adversarial",
            Self::Golden => "golden",
            Self::SstDump => "sstdump",
        }
    }

    /// Inverse of [`Tool::token`], used when re-reading artifacts.
    #[must_use]
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "stress" => Some(Self::Stress),
            "crash" => Some(Self::Crash),
            "adversarial" => Some(Self::Adversarial),
            "golden" => Some(Self::Golden),
            "sstdump" => Some(Self::SstDump),
            _ => None,
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Fault category injected into the engine run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    None,
    Read,
    Write,
    Sync,
    Crash,
    Corrupt,
}

impl FaultKind {
    #[must_use]
    pub fn token(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Read => "read",
            Self::Write => "write",
            Self::Sync => "sync",
            Self::Crash => "crash",
            Self::Corrupt => "corrupt",
        }
    }
}

/// Error surface the injected fault presents to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultErrorType {
    Status,
    Corruption,
    Truncated,
}

impl FaultErrorType {
    #[must_use]
    pub fn token(self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Corruption => "corruption",
            Self::Truncated => "truncated",
        }
    }
}

/// Which engine thread class the fault targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultScope {
    Worker,
    Flusher,
    Reopener,
    Global,
}

impl FaultScope {
    #[must_use]
    pub fn token(self) -> &'static str {
        match self {
            Self::Worker => "worker",
            Self::Flusher => "flusher",
            Self::Reopener => "reopener",
            Self::Global => "global",
        }
    }
}

/// Declarative fault model for an instance.
///
/// Stringifies to the stable slash-separated token used in fingerprints and
/// tags: `kind/error_type/1inN/scope`, or `none` for the default model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultModel {
    pub kind: FaultKind,
    pub error_type: FaultErrorType,
    pub one_in: u64,
    pub scope: FaultScope,
}

impl FaultModel {
    /// The all-default model: no fault injection.
    #[must_use]
    pub fn none() -> Self {
        Self {
            kind: FaultKind::None,
            error_type: FaultErrorType::Status,
            one_in: 0,
            scope: FaultScope::Global,
        }
    }

    #[must_use]
    pub fn is_none(&self) -> bool {
        self.kind == FaultKind::None
    }
}

impl Default for FaultModel {
    fn default() -> Self {
        Self::none()
    }
}

impl fmt::Display for FaultModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            return f.write_str("none");
        }
        write!(
            f,
            "{}/{}/1in{}/{}",
            self.kind.token(),
            self.error_type.token(),
            self.one_in,
            self.scope.token()
        )
    }
}

// ---------------------------------------------------------------------------
// Tags
// ---------------------------------------------------------------------------

/// Derived tag record with a fixed schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tags {
    pub campaign: String,
    pub tier: String,
    pub tool: String,
    pub kind: String,
    pub oracle_required: String,
    pub group: String,
    pub fault_kind: String,
    pub fault_scope: String,
}

impl Tags {
    /// Value for `key`, or the empty string for unknown keys.
    #[must_use]
    pub fn get(&self, key: &str) -> &str {
        match key {
            "campaign" => &self.campaign,
            "tier" => &self.tier,
            "tool" => &self.tool,
            "kind" => &self.kind,
            "oracle_required" => &self.oracle_required,
            "group" => &self.group,
            "fault_kind" => &self.fault_kind,
            "fault_scope" => &self.fault_scope,
            _ => "",
        }
    }
}

/// The authoritative tag-key allowlist.
#[must_use]
pub fn all_tag_keys() -> &'static [&'static str] {
    &[
        "campaign",
        "tier",
        "tool",
        "kind",
        "oracle_required",
        "group",
        "fault_kind",
        "fault_scope",
    ]
}

/// Whether `key` is a known tag key.
#[must_use]
pub fn is_tag_key(key: &str) -> bool {
    all_tag_keys().contains(&key)
}

/// Group tag for an instance name: the first two dotted segments for
/// `status.` names, otherwise the first segment.
#[must_use]
pub fn group_for_name(name: &str) -> String {
    let mut segments = name.split('.');
    let first = segments.next().unwrap_or_default();
    if first == "status" {
        match segments.next() {
            Some(second) => format!("{first}.{second}"),
            None => first.to_owned(),
        }
    } else {
        first.to_owned()
    }
}
