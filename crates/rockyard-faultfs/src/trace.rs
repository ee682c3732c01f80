//! Bounded binary op trace.
//!
//! The engine side of a test writes every filesystem operation into
//! `trace/ops.bin` as length-prefixed JSON records. The orchestrator never
//! replays the trace; it only reports filename and size metadata, so the
//! record payload stays deliberately minimal.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use rockyard_error::Result;
use serde::Serialize;

/// File name of the op trace inside a run's `trace/` directory.
pub const TRACE_FILE_NAME: &str = "ops.bin";
/// Marker dropped next to the trace when the size cap was hit.
pub const TRUNCATED_MARKER_NAME: &str = "truncated.txt";
/// Default trace size cap.
pub const DEFAULT_MAX_SIZE_BYTES: u64 = 64 * 1024 * 1024;

#[derive(Debug, Serialize)]
struct TraceRecord<'a> {
    op: &'a str,
    path: &'a str,
    len: u64,
}

/// Size and truncation metadata for a finished trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceSummary {
    pub path: PathBuf,
    pub bytes_written: u64,
    pub truncated: bool,
}

/// Append-only, size-capped op sink.
#[derive(Debug)]
pub struct OpTrace {
    dir: PathBuf,
    file: File,
    max_size_bytes: u64,
    bytes_written: u64,
    truncated: bool,
}

impl OpTrace {
    /// Create `dir` (and ancestors) and open a fresh `ops.bin` inside it.
    pub fn create(dir: &Path, max_size_bytes: u64) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let file = File::create(dir.join(TRACE_FILE_NAME))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            file,
            max_size_bytes,
            bytes_written: 0,
            truncated: false,
        })
    }

    /// Append one op record; a no-op once the size cap has been hit.
    pub fn record(&mut self, op: &str, path: &Path, len: u64) -> Result<()> {
        if self.truncated {
            return Ok(());
        }
        let payload = serde_json::to_vec(&TraceRecord {
            op,
            path: &path.to_string_lossy(),
            len,
        })?;
        let record_len = 4 + payload.len() as u64;
        if self.bytes_written + record_len > self.max_size_bytes {
            self.truncated = true;
            std::fs::write(
                self.dir.join(TRUNCATED_MARKER_NAME),
                format!("trace truncated at {} bytes\n", self.bytes_written),
            )?;
            return Ok(());
        }
        self.file.write_all(&(payload.len() as u32).to_le_bytes())?;
        self.file.write_all(&payload)?;
        self.bytes_written += record_len;
        Ok(())
    }

    /// Metadata for the artifact record.
    #[must_use]
    pub fn summary(&self) -> TraceSummary {
        TraceSummary {
            path: self.dir.join(TRACE_FILE_NAME),
            bytes_written: self.bytes_written,
            truncated: self.truncated,
        }
    }
}
