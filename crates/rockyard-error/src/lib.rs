//! Shared error types for the RockyardKV orchestrator and fault-injection
//! filesystem.
//!
//! Every crate in the workspace propagates [`RockyardError`] through the
//! [`Result`] alias. The injected-error variants carry the path that
//! triggered them so a failing engine run can name the file in its log.

use std::path::PathBuf;

use thiserror::Error;

/// Workspace-wide result alias.
pub type Result<T, E = RockyardError> = std::result::Result<T, E>;

/// Closed set of user-visible error kinds.
#[derive(Debug, Error)]
pub enum RockyardError {
    /// Underlying host filesystem or subprocess I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Artifact serialization or parse failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Fault-injected read failure (`Read`/`Open`/`OpenRandomAccess`).
    #[error("injected_read_error: {}", path.display())]
    InjectedRead { path: PathBuf },

    /// Fault-injected write failure (`Create`/`Write`/`MkdirAll`/`Rename`).
    #[error("injected_write_error: {}", path.display())]
    InjectedWrite { path: PathBuf },

    /// Fault-injected sync failure (`Sync`).
    #[error("injected_sync_error: {}", path.display())]
    InjectedSync { path: PathBuf },

    /// Oracle was requested but no RocksDB tool root is configured.
    #[error("oracle_not_configured")]
    OracleNotConfigured,

    /// Oracle tool root is configured but a tool binary is missing.
    #[error("oracle_tool_not_found: {}", path.display())]
    OracleToolNotFound { path: PathBuf },

    /// Tag-filter expression could not be parsed.
    #[error("filter parse error: {0}")]
    FilterParse(String),

    /// Skip-policy set failed validation.
    #[error("skip policy error: {0}")]
    SkipPolicy(String),

    /// Pre-flight oracle gate refused to start the campaign.
    #[error("oracle gate failed: {0}")]
    GateFailed(String),

    /// Campaign was cancelled by an interrupt before completion.
    #[error("campaign cancelled")]
    Cancelled,

    /// Invariant violation inside the orchestrator itself.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RockyardError {
    /// Construct an [`RockyardError::Internal`] from any message.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether this error originated from fault injection.
    #[must_use]
    pub fn is_injected(&self) -> bool {
        matches!(
            self,
            Self::InjectedRead { .. } | Self::InjectedWrite { .. } | Self::InjectedSync { .. }
        )
    }
}
