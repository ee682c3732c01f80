//! Trace metadata collection and replay-script emission.
//!
//! The engine side of a test writes `trace/ops.bin` through
//! `rockyard_faultfs::trace::OpTrace`; the orchestrator only collects
//! filename and size metadata and emits a `replay.sh` with the original
//! invocation. There is no replayable trace format beyond that.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use rockyard_error::Result;
use rockyard_faultfs::host;
use rockyard_faultfs::trace::{TRACE_FILE_NAME, TRUNCATED_MARKER_NAME, TraceSummary};

use crate::artifact::REPLAY_SCRIPT_NAME;

/// Subdirectory of a run dir holding the op trace.
pub const TRACE_DIR_NAME: &str = "trace";

/// Collect trace metadata from a finished run directory, if any trace was
/// written.
#[must_use]
pub fn collect_trace_result(run_dir: &Path) -> Option<TraceSummary> {
    let trace_path = run_dir.join(TRACE_DIR_NAME).join(TRACE_FILE_NAME);
    let meta = std::fs::metadata(&trace_path).ok()?;
    let truncated = run_dir
        .join(TRACE_DIR_NAME)
        .join(TRUNCATED_MARKER_NAME)
        .is_file();
    Some(TraceSummary {
        path: trace_path,
        bytes_written: meta.len(),
        truncated,
    })
}

/// Shell command that re-runs the original invocation.
#[must_use]
pub fn replay_command(binary: &Path, args: &[String]) -> String {
    let mut parts = vec![shell_quote(&binary.display().to_string())];
    parts.extend(args.iter().map(|arg| shell_quote(arg)));
    parts.join(" ")
}

/// Write an executable `replay.sh` into the run directory.
pub fn write_replay_script(run_dir: &Path, binary: &Path, args: &[String]) -> Result<PathBuf> {
    let script_path = run_dir.join(REPLAY_SCRIPT_NAME);
    let script = format!("#!/bin/sh\nexec {}\n", replay_command(binary, args));
    host::write(&script_path, script)?;
    let mut permissions = std::fs::metadata(&script_path)?.permissions();
    permissions.set_mode(0o755);
    std::fs::set_permissions(&script_path, permissions)?;
    Ok(script_path)
}

fn shell_quote(token: &str) -> String {
    if token
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || "-_=./".contains(ch))
    {
        token.to_owned()
    } else {
        format!("'{}'", token.replace('\'', "'\\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_trace_metadata_with_truncation_marker() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(collect_trace_result(dir.path()).is_none());

        let trace_dir = dir.path().join(TRACE_DIR_NAME);
        std::fs::create_dir_all(&trace_dir).expect("mkdir");
        std::fs::write(trace_dir.join(TRACE_FILE_NAME), b"abcd").expect("write");

        let summary = collect_trace_result(dir.path()).expect("summary");
        assert_eq!(summary.bytes_written, 4);
        assert!(!summary.truncated);

        std::fs::write(trace_dir.join(TRUNCATED_MARKER_NAME), b"cap").expect("write");
        assert!(collect_trace_result(dir.path()).expect("summary").truncated);
    }

    #[test]
    fn replay_script_quotes_only_when_needed() {
        let command = replay_command(
            Path::new("/bins/rockyard_stress"),
            &["-db=/runs/db".to_owned(), "arg with space".to_owned()],
        );
        assert_eq!(command, "/bins/rockyard_stress -db=/runs/db 'arg with space'");
    }

    #[test]
    fn replay_script_is_executable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_replay_script(
            dir.path(),
            Path::new("/bins/rockyard_stress"),
            &["-seed=1".to_owned()],
        )
        .expect("write");
        let mode = std::fs::metadata(&path).expect("stat").permissions().mode();
        assert_eq!(mode & 0o111, 0o111, "replay.sh must be executable");
        let body = std::fs::read_to_string(&path).expect("read");
        assert!(body.starts_with("#!/bin/sh\n"));
        assert!(body.contains("rockyard_stress -seed=1"));
    }
}
