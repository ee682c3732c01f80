//! Campaign-style test orchestrator for the RockyardKV LSM key-value store.
//!
//! Drives many short-lived test instances (crash, stress,
//! adversarial-corruption, format checks) against the KV binaries, captures
//! reproducible evidence on every outcome, and enforces governance
//! properties: pass/fail, fingerprint deduplication, quarantine.
//!
//! # Data flow
//!
//! ```text
//! matrix → filter → skip policies → gate → runner → (minimizer?) →
//!   artifacts → summary + governance
//! ```
//!
//! The engine under test is an opaque child process; the only contracts are
//! its exit code, its merged output log, and the artifact directory the
//! runner hands it. The fault-injection filesystem lives in
//! `rockyard-faultfs` and is configured by the test binary itself before the
//! engine opens any file.

pub mod artifact;
pub mod filter;
pub mod instance;
pub mod ledger;
pub mod matrix;
pub mod minimize;
pub mod oracle;
pub mod recheck;
pub mod runner;
pub mod skip;
pub mod taxonomy;
pub mod trace;

pub use rockyard_error::{Result, RockyardError};

/// Schema version stamped on every persisted artifact
/// (`run.json`, `summary.json`, `governance.json`, `recheck.json`).
///
/// Field additions are minor bumps; semantic changes (pass/fail
/// interpretation, fingerprint formula) are major bumps.
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Campaign identifier used in tags and artifact records.
pub const CAMPAIGN_NAME: &str = "rockyardkv";

/// Environment variable that registers the deterministic synthetic-failure
/// instance used to validate ledger/minimizer wiring without the KV engine.
pub const SYNTHETIC_FAIL_ENV: &str = "ROCKYARDKV_SYNTHETIC_FAIL";
