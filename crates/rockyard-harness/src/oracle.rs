//! External consistency oracle.
//!
//! The oracle is an opaque subprocess contract: availability is a stat
//! probe on the tool binaries, and every invocation returns
//! `(exit_code, stdout, stderr)`. The child environment gains the
//! platform-correct dynamic-library search path pointing at the RocksDB
//! build tree.

use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::instance::Instance;
use rockyard_error::{Result, RockyardError};

/// Oracle root environment variable.
pub const ROCKSDB_PATH_ENV: &str = "ROCKSDB_PATH";
/// Explicit consistency-tool override.
pub const LDB_PATH_ENV: &str = "LDB_PATH";
/// Explicit SST-dump override.
pub const SST_DUMP_PATH_ENV: &str = "SST_DUMP_PATH";

/// Dynamic-library search-path variable for the host platform.
#[must_use]
pub fn library_path_var() -> &'static str {
    if cfg!(target_os = "macos") {
        "DYLD_LIBRARY_PATH"
    } else {
        "LD_LIBRARY_PATH"
    }
}

/// Captured result of one oracle invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleOutcome {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

impl OracleOutcome {
    #[must_use]
    pub fn ok(&self) -> bool {
        self.exit_code == 0
    }
}

/// Handle to the external verification tooling.
#[derive(Debug, Clone)]
pub struct Oracle {
    rocksdb_path: PathBuf,
    ldb_path: PathBuf,
    sst_dump_path: PathBuf,
}

impl Oracle {
    /// Oracle rooted at a RocksDB build tree; tools default to
    /// `<root>/ldb` and `<root>/sst_dump`.
    #[must_use]
    pub fn new(rocksdb_path: impl Into<PathBuf>) -> Self {
        let rocksdb_path = rocksdb_path.into();
        let ldb_path = rocksdb_path.join("ldb");
        let sst_dump_path = rocksdb_path.join("sst_dump");
        Self {
            rocksdb_path,
            ldb_path,
            sst_dump_path,
        }
    }

    /// Override the tool binaries explicitly.
    #[must_use]
    pub fn with_tools(
        rocksdb_path: impl Into<PathBuf>,
        ldb_path: impl Into<PathBuf>,
        sst_dump_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            rocksdb_path: rocksdb_path.into(),
            ldb_path: ldb_path.into(),
            sst_dump_path: sst_dump_path.into(),
        }
    }

    /// Build an oracle from `ROCKSDB_PATH` / `LDB_PATH` / `SST_DUMP_PATH`.
    ///
    /// Returns `None` when no oracle root is configured.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let root = std::env::var(ROCKSDB_PATH_ENV).ok()?;
        let mut oracle = Self::new(root);
        if let Ok(ldb) = std::env::var(LDB_PATH_ENV) {
            oracle.ldb_path = PathBuf::from(ldb);
        }
        if let Ok(sst_dump) = std::env::var(SST_DUMP_PATH_ENV) {
            oracle.sst_dump_path = PathBuf::from(sst_dump);
        }
        Some(oracle)
    }

    /// Like [`Oracle::from_env`], but a typed error when no root is set.
    pub fn require_from_env() -> Result<Self> {
        Self::from_env().ok_or(RockyardError::OracleNotConfigured)
    }

    /// Whether both tools are present and stat-able.
    #[must_use]
    pub fn available(&self) -> bool {
        self.ldb_path.is_file() && self.sst_dump_path.is_file()
    }

    /// `<ldb> --db=<db_path> checkconsistency`
    pub fn check_consistency(&self, db_path: &Path) -> Result<OracleOutcome> {
        self.run_tool(
            &self.ldb_path,
            &[format!("--db={}", db_path.display()), "checkconsistency".to_owned()],
        )
    }

    /// `<ldb> --db=<db_path> manifest_dump`
    pub fn manifest_dump(&self, db_path: &Path) -> Result<OracleOutcome> {
        self.run_tool(
            &self.ldb_path,
            &[format!("--db={}", db_path.display()), "manifest_dump".to_owned()],
        )
    }

    /// `<sst_dump> --file=<sst_path> [extra args]`
    pub fn sst_dump(&self, sst_path: &Path, extra_args: &[String]) -> Result<OracleOutcome> {
        let mut args = vec![format!("--file={}", sst_path.display())];
        args.extend_from_slice(extra_args);
        self.run_tool(&self.sst_dump_path, &args)
    }

    /// Dynamic-library search-path value for oracle children: the root,
    /// `lib/`, and `build/` subdirectories, where present, joined by the
    /// platform list separator.
    #[must_use]
    pub fn library_search_path(&self) -> String {
        let candidates = [
            self.rocksdb_path.clone(),
            self.rocksdb_path.join("lib"),
            self.rocksdb_path.join("build"),
        ];
        let parts: Vec<String> = candidates
            .iter()
            .filter(|candidate| candidate.is_dir())
            .map(|candidate| candidate.display().to_string())
            .collect();
        parts.join(":")
    }

    fn run_tool(&self, tool: &Path, args: &[String]) -> Result<OracleOutcome> {
        if !tool.is_file() {
            return Err(RockyardError::OracleToolNotFound {
                path: tool.to_path_buf(),
            });
        }
        debug!(tool = %tool.display(), ?args, "invoking oracle tool");
        let output = Command::new(tool)
            .args(args)
            .env(library_path_var(), self.library_search_path())
            .output()?;
        let outcome = OracleOutcome {
            exit_code: output.status.code().map_or(-1, i64::from),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        info!(
            tool = %tool.display(),
            exit_code = outcome.exit_code,
            "oracle tool finished"
        );
        Ok(outcome)
    }
}

/// Pre-flight gate: refuse to run an instance requiring an unavailable
/// oracle.
///
/// A gate failure is a hard campaign error raised before the run root is
/// touched beyond its own creation.
pub fn gate_check(oracle: Option<&Oracle>, instance: &Instance) -> Result<()> {
    if !instance.requires_oracle {
        return Ok(());
    }
    match oracle {
        None => Err(RockyardError::GateFailed(format!(
            "instance {} requires oracle but none is configured",
            instance.name
        ))),
        Some(oracle) if !oracle.available() => Err(RockyardError::GateFailed(format!(
            "instance {} requires oracle but tools are unavailable under {}",
            instance.name,
            oracle.rocksdb_path.display()
        ))),
        Some(_) => Ok(()),
    }
}
