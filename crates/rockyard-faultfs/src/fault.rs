//! The fault layer: durability state tracking plus anomaly policies.
//!
//! [`FaultFs`] wraps a base [`FileSystem`] and maintains, for every path
//! opened through it, the pair of write positions that durability anomalies
//! care about:
//!
//! - `current_pos` — how far the engine has written,
//! - `synced_pos`  — how far a non-lying `Sync` has made durable.
//!
//! Renames that have happened on the medium but whose parent directory has
//! not been synced are held in an insertion-ordered pending set; a simulated
//! crash can revert them, duplicate them (double-name anomaly), or make both
//! names vanish (neither-name anomaly).
//!
//! All mutating operations serialize on one internal mutex. Reads consult
//! the injection policy under that mutex but perform their I/O outside it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rockyard_error::{Result, RockyardError};
use tracing::{debug, info, warn};

use crate::trace::OpTrace;
use crate::{
    FileLock, FileMeta, FileSystem, RandomAccessFile, SequentialFile, WritableFile, absolute,
};

/// Operations an injected error can be registered against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FaultOp {
    Create,
    Open,
    OpenRandomAccess,
    Read,
    Write,
    MkdirAll,
    Rename,
    Remove,
    Truncate,
    Sync,
    SyncDir,
}

impl FaultOp {
    /// Stable lowercase token used in op traces.
    #[must_use]
    pub fn token(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Open => "open",
            Self::OpenRandomAccess => "open_random_access",
            Self::Read => "read",
            Self::Write => "write",
            Self::MkdirAll => "mkdir_all",
            Self::Rename => "rename",
            Self::Remove => "remove",
            Self::Truncate => "truncate",
            Self::Sync => "sync",
            Self::SyncDir => "sync_dir",
        }
    }

    fn injected_error(self, path: &Path) -> RockyardError {
        let path = path.to_path_buf();
        match self {
            Self::Open | Self::OpenRandomAccess | Self::Read => {
                RockyardError::InjectedRead { path }
            }
            Self::Sync | Self::SyncDir => RockyardError::InjectedSync { path },
            _ => RockyardError::InjectedWrite { path },
        }
    }

    fn is_mutating(self) -> bool {
        !matches!(self, Self::Open | Self::OpenRandomAccess | Self::Read)
    }
}

/// A rename that has happened on the medium but is not yet durable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRename {
    pub old: PathBuf,
    pub new: PathBuf,
    /// Whether the double-name anomaly pattern matched at rename time.
    pub double_name: bool,
    /// Whether the neither-name anomaly pattern matched at rename time.
    pub neither_name: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct FileState {
    synced_pos: u64,
    current_pos: u64,
    /// Whether the parent directory has been synced since this file was
    /// created.
    dir_synced: bool,
}

#[derive(Debug, Default)]
struct Policies {
    /// Forces `injected_write_error` on every mutating op.
    inactive: bool,
    /// Registered injected errors; an empty path matches every path.
    injected: Vec<(FaultOp, PathBuf)>,
    /// Honored by [`FaultFs::simulate_crash`].
    drop_unsynced_data: bool,
    /// Honored by [`FaultFs::simulate_crash`].
    delete_unsynced_files: bool,
    /// `Sync` succeeds without advancing `synced_pos` on matching paths.
    /// `Some("")` matches every path.
    file_sync_lie: Option<String>,
    /// `SyncDir` succeeds without clearing pending renames.
    dir_sync_lie: bool,
    /// Matching renames leave both names present after a crash.
    rename_double_name: Option<String>,
    /// Matching renames leave neither name present after a crash.
    rename_neither_name: Option<String>,
}

struct Inner {
    files: BTreeMap<PathBuf, FileState>,
    pending_renames: Vec<PendingRename>,
    policies: Policies,
    open_handles: BTreeMap<PathBuf, usize>,
    trace: Option<OpTrace>,
}

impl Inner {
    fn check(&self, op: FaultOp, path: &Path) -> Result<()> {
        if self.policies.inactive && op.is_mutating() {
            return Err(RockyardError::InjectedWrite {
                path: path.to_path_buf(),
            });
        }
        let hit = self
            .policies
            .injected
            .iter()
            .any(|(injected_op, injected_path)| {
                *injected_op == op
                    && (injected_path.as_os_str().is_empty() || injected_path == path)
            });
        if hit {
            return Err(op.injected_error(path));
        }
        Ok(())
    }

    fn record_trace(&mut self, op: FaultOp, path: &Path, len: u64) {
        if let Some(trace) = self.trace.as_mut() {
            if let Err(error) = trace.record(op.token(), path, len) {
                warn!(op = op.token(), %error, "op trace write failed");
            }
        }
    }

    fn register_handle(&mut self, path: &Path) {
        *self.open_handles.entry(path.to_path_buf()).or_insert(0) += 1;
    }

    fn deregister_handle(&mut self, path: &Path) {
        if let Some(count) = self.open_handles.get_mut(path) {
            *count -= 1;
            if *count == 0 {
                self.open_handles.remove(path);
            }
        }
    }
}

fn pattern_matches(pattern: Option<&str>, path: &Path) -> bool {
    match pattern {
        None => false,
        Some("") => true,
        Some(needle) => path.to_string_lossy().contains(needle),
    }
}

/// Fault-injection filesystem wrapping a base [`FileSystem`].
///
/// Cloning is cheap and shares all state; the engine side and the
/// orchestrator side of a test hold clones of the same instance.
#[derive(Clone)]
pub struct FaultFs {
    base: Arc<dyn FileSystem>,
    inner: Arc<Mutex<Inner>>,
}

impl FaultFs {
    pub fn new(base: Arc<dyn FileSystem>) -> Self {
        Self {
            base,
            inner: Arc::new(Mutex::new(Inner {
                files: BTreeMap::new(),
                pending_renames: Vec::new(),
                policies: Policies::default(),
                open_handles: BTreeMap::new(),
                trace: None,
            })),
        }
    }

    // -- policy switches ----------------------------------------------------

    /// Force `injected_write_error` on every mutating operation.
    pub fn set_inactive(&self, inactive: bool) {
        self.inner.lock().policies.inactive = inactive;
    }

    /// Register an injected error for `op`; an empty `path` matches all.
    pub fn inject_error(&self, op: FaultOp, path: impl Into<PathBuf>) {
        self.inner.lock().policies.injected.push((op, path.into()));
    }

    /// Drop all registered injected errors.
    pub fn clear_injected_errors(&self) {
        self.inner.lock().policies.injected.clear();
    }

    pub fn set_drop_unsynced_data(&self, enabled: bool) {
        self.inner.lock().policies.drop_unsynced_data = enabled;
    }

    pub fn set_delete_unsynced_files(&self, enabled: bool) {
        self.inner.lock().policies.delete_unsynced_files = enabled;
    }

    /// `Some("")` lies to every path; `Some(pat)` lies to paths containing
    /// `pat`; `None` disables the mode.
    pub fn set_file_sync_lie_mode(&self, pattern: Option<String>) {
        self.inner.lock().policies.file_sync_lie = pattern;
    }

    pub fn set_dir_sync_lie_mode(&self, enabled: bool) {
        self.inner.lock().policies.dir_sync_lie = enabled;
    }

    pub fn set_rename_double_name_mode(&self, pattern: Option<String>) {
        self.inner.lock().policies.rename_double_name = pattern;
    }

    pub fn set_rename_neither_name_mode(&self, pattern: Option<String>) {
        self.inner.lock().policies.rename_neither_name = pattern;
    }

    /// Attach a bounded op trace; every subsequent operation is recorded.
    pub fn attach_trace(&self, trace: OpTrace) {
        self.inner.lock().trace = Some(trace);
    }

    /// Detach the op trace, returning it for summary collection.
    pub fn take_trace(&self) -> Option<OpTrace> {
        self.inner.lock().trace.take()
    }

    // -- observability ------------------------------------------------------

    /// `(synced_pos, current_pos)` for a tracked path.
    #[must_use]
    pub fn file_positions(&self, path: &Path) -> Option<(u64, u64)> {
        let path = absolute(path);
        self.inner
            .lock()
            .files
            .get(&path)
            .map(|state| (state.synced_pos, state.current_pos))
    }

    /// Snapshot of the pending-rename set in insertion order.
    #[must_use]
    pub fn pending_renames(&self) -> Vec<PendingRename> {
        self.inner.lock().pending_renames.clone()
    }

    /// Number of live handles registered against `path`.
    #[must_use]
    pub fn open_handle_count(&self, path: &Path) -> usize {
        let path = absolute(path);
        self.inner
            .lock()
            .open_handles
            .get(&path)
            .copied()
            .unwrap_or(0)
    }

    // -- crash simulation ---------------------------------------------------

    /// Truncate every tracked file back to its synced position.
    ///
    /// Idempotent and deterministic for a fixed state snapshot.
    pub fn drop_unsynced_data(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        self.drop_unsynced_locked(&mut inner)
    }

    /// Remove files whose parent directory was never synced since creation.
    pub fn delete_unsynced_files(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        self.delete_unsynced_locked(&mut inner)
    }

    /// Undo pending renames in reverse insertion order and clear the set.
    pub fn revert_unsynced_renames(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        let pending = std::mem::take(&mut inner.pending_renames);
        self.revert_locked(&mut inner, pending)
    }

    /// Simulated crash honoring the drop/delete policy switches, then
    /// reverting every pending rename.
    pub fn simulate_crash(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        info!(
            tracked_files = inner.files.len(),
            pending_renames = inner.pending_renames.len(),
            "simulating crash"
        );
        if inner.policies.drop_unsynced_data {
            self.drop_unsynced_locked(&mut inner)?;
        }
        if inner.policies.delete_unsynced_files {
            self.delete_unsynced_locked(&mut inner)?;
        }
        let pending = std::mem::take(&mut inner.pending_renames);
        self.revert_locked(&mut inner, pending)
    }

    /// Simulated crash applying rename anomalies, in order: double-name
    /// duplication for matching pending renames, neither-name deletion for
    /// matching pending renames, then ordinary drop + revert for the rest.
    pub fn simulate_crash_with_rename_anomalies(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        let pending = std::mem::take(&mut inner.pending_renames);
        let mut remainder = Vec::new();

        for rename in &pending {
            if rename.double_name {
                debug!(old = %rename.old.display(), new = %rename.new.display(),
                       "rename anomaly: double name");
                let content = read_all(self.base.as_ref(), &rename.new)?;
                write_all(self.base.as_ref(), &rename.old, &content)?;
                if let Some(state) = inner.files.get(&rename.new).copied() {
                    inner.files.insert(rename.old.clone(), state);
                }
            }
        }
        for rename in &pending {
            if rename.neither_name && !rename.double_name {
                debug!(old = %rename.old.display(), new = %rename.new.display(),
                       "rename anomaly: neither name");
                if self.base.exists(&rename.new) {
                    self.base.remove(&rename.new)?;
                }
                inner.files.remove(&rename.new);
            } else if !rename.double_name {
                remainder.push(rename.clone());
            }
        }

        self.drop_unsynced_locked(&mut inner)?;
        self.revert_locked(&mut inner, remainder)
    }

    fn drop_unsynced_locked(&self, inner: &mut Inner) -> Result<()> {
        let snapshot: Vec<(PathBuf, FileState)> = inner
            .files
            .iter()
            .map(|(path, state)| (path.clone(), *state))
            .collect();
        for (path, state) in snapshot {
            if !self.base.exists(&path) {
                continue;
            }
            let meta = self.base.stat(&path)?;
            if meta.len > state.synced_pos {
                self.base.truncate(&path, state.synced_pos)?;
            }
            if let Some(live) = inner.files.get_mut(&path) {
                live.current_pos = live.synced_pos;
            }
        }
        Ok(())
    }

    fn delete_unsynced_locked(&self, inner: &mut Inner) -> Result<()> {
        let doomed: Vec<PathBuf> = inner
            .files
            .iter()
            .filter(|(_, state)| !state.dir_synced)
            .map(|(path, _)| path.clone())
            .collect();
        for path in doomed {
            if self.base.exists(&path) {
                self.base.remove(&path)?;
            }
            inner.files.remove(&path);
            inner.pending_renames.retain(|rename| rename.new != path);
        }
        Ok(())
    }

    fn revert_locked(&self, inner: &mut Inner, pending: Vec<PendingRename>) -> Result<()> {
        for rename in pending.into_iter().rev() {
            if !self.base.exists(&rename.new) {
                continue;
            }
            if let Some(parent) = rename.old.parent() {
                self.base.mkdir_all(parent)?;
            }
            self.base.rename(&rename.new, &rename.old)?;
            if let Some(state) = inner.files.remove(&rename.new) {
                inner.files.insert(rename.old.clone(), state);
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FileSystem implementation
// ---------------------------------------------------------------------------

impl FileSystem for FaultFs {
    fn create(&self, path: &Path) -> Result<Box<dyn WritableFile>> {
        let path = absolute(path);
        let mut inner = self.inner.lock();
        inner.check(FaultOp::Create, &path)?;
        let base = self.base.create(&path)?;
        inner.files.insert(path.clone(), FileState::default());
        inner.register_handle(&path);
        inner.record_trace(FaultOp::Create, &path, 0);
        Ok(Box::new(FaultWritable {
            base,
            path,
            inner: Arc::clone(&self.inner),
        }))
    }

    fn open(&self, path: &Path) -> Result<Box<dyn SequentialFile>> {
        let path = absolute(path);
        {
            let mut inner = self.inner.lock();
            inner.check(FaultOp::Open, &path)?;
            inner.register_handle(&path);
            inner.record_trace(FaultOp::Open, &path, 0);
        }
        match self.base.open(&path) {
            Ok(base) => Ok(Box::new(FaultSequential {
                base,
                path,
                inner: Arc::clone(&self.inner),
            })),
            Err(error) => {
                self.inner.lock().deregister_handle(&path);
                Err(error)
            }
        }
    }

    fn open_random_access(&self, path: &Path) -> Result<Box<dyn RandomAccessFile>> {
        let path = absolute(path);
        {
            let mut inner = self.inner.lock();
            inner.check(FaultOp::OpenRandomAccess, &path)?;
            inner.register_handle(&path);
            inner.record_trace(FaultOp::OpenRandomAccess, &path, 0);
        }
        match self.base.open_random_access(&path) {
            Ok(base) => Ok(Box::new(FaultRandomAccess {
                base,
                path,
                inner: Arc::clone(&self.inner),
            })),
            Err(error) => {
                self.inner.lock().deregister_handle(&path);
                Err(error)
            }
        }
    }

    fn rename(&self, old: &Path, new: &Path) -> Result<()> {
        let old = absolute(old);
        let new = absolute(new);
        let mut inner = self.inner.lock();
        inner.check(FaultOp::Rename, &new)?;
        self.base.rename(&old, &new)?;
        if let Some(state) = inner.files.remove(&old) {
            inner.files.insert(new.clone(), state);
        }
        let double_name = pattern_matches(inner.policies.rename_double_name.as_deref(), &new);
        let neither_name = pattern_matches(inner.policies.rename_neither_name.as_deref(), &new);
        inner.pending_renames.retain(|rename| rename.new != new);
        inner.pending_renames.push(PendingRename {
            old,
            new: new.clone(),
            double_name,
            neither_name,
        });
        inner.record_trace(FaultOp::Rename, &new, 0);
        Ok(())
    }

    fn remove(&self, path: &Path) -> Result<()> {
        let path = absolute(path);
        let mut inner = self.inner.lock();
        inner.check(FaultOp::Remove, &path)?;
        self.base.remove(&path)?;
        inner.files.remove(&path);
        inner.pending_renames.retain(|rename| rename.new != path);
        inner.record_trace(FaultOp::Remove, &path, 0);
        Ok(())
    }

    fn truncate(&self, path: &Path, len: u64) -> Result<()> {
        let path = absolute(path);
        let mut inner = self.inner.lock();
        inner.check(FaultOp::Truncate, &path)?;
        self.base.truncate(&path, len)?;
        if let Some(state) = inner.files.get_mut(&path) {
            state.current_pos = state.current_pos.min(len);
            state.synced_pos = state.synced_pos.min(len);
        }
        inner.record_trace(FaultOp::Truncate, &path, len);
        Ok(())
    }

    fn stat(&self, path: &Path) -> Result<FileMeta> {
        self.base.stat(&absolute(path))
    }

    fn exists(&self, path: &Path) -> bool {
        self.base.exists(&absolute(path))
    }

    fn list_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        self.base.list_dir(&absolute(path))
    }

    fn mkdir_all(&self, path: &Path) -> Result<()> {
        let path = absolute(path);
        let mut inner = self.inner.lock();
        inner.check(FaultOp::MkdirAll, &path)?;
        self.base.mkdir_all(&path)?;
        inner.record_trace(FaultOp::MkdirAll, &path, 0);
        Ok(())
    }

    fn lock(&self, path: &Path) -> Result<Box<dyn FileLock>> {
        let path = absolute(path);
        self.inner.lock().check(FaultOp::Create, &path)?;
        self.base.lock(&path)
    }

    fn sync_dir(&self, path: &Path) -> Result<()> {
        let path = absolute(path);
        let mut inner = self.inner.lock();
        inner.check(FaultOp::SyncDir, &path)?;
        if inner.policies.dir_sync_lie {
            debug!(dir = %path.display(), "dir sync lie: pending renames kept");
            inner.record_trace(FaultOp::SyncDir, &path, 0);
            return Ok(());
        }
        self.base.sync_dir(&path)?;
        inner
            .pending_renames
            .retain(|rename| rename.new.parent() != Some(path.as_path()));
        let children: Vec<PathBuf> = inner
            .files
            .keys()
            .filter(|file| file.parent() == Some(path.as_path()))
            .cloned()
            .collect();
        for child in children {
            if let Some(state) = inner.files.get_mut(&child) {
                state.dir_synced = true;
            }
        }
        inner.record_trace(FaultOp::SyncDir, &path, 0);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

struct FaultWritable {
    base: Box<dyn WritableFile>,
    path: PathBuf,
    inner: Arc<Mutex<Inner>>,
}

impl WritableFile for FaultWritable {
    fn write(&mut self, data: &[u8]) -> Result<usize> {
        let mut inner = self.inner.lock();
        inner.check(FaultOp::Write, &self.path)?;
        let written = self.base.write(data)?;
        if let Some(state) = inner.files.get_mut(&self.path) {
            state.current_pos += written as u64;
        }
        inner.record_trace(FaultOp::Write, &self.path, written as u64);
        Ok(written)
    }

    fn sync(&mut self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.check(FaultOp::Sync, &self.path)?;
        if pattern_matches(inner.policies.file_sync_lie.as_deref(), &self.path) {
            debug!(path = %self.path.display(), "file sync lie: synced_pos kept");
            inner.record_trace(FaultOp::Sync, &self.path, 0);
            return Ok(());
        }
        self.base.sync()?;
        if let Some(state) = inner.files.get_mut(&self.path) {
            state.synced_pos = state.current_pos;
        }
        inner.record_trace(FaultOp::Sync, &self.path, 0);
        Ok(())
    }
}

impl Drop for FaultWritable {
    fn drop(&mut self) {
        self.inner.lock().deregister_handle(&self.path);
    }
}

struct FaultSequential {
    base: Box<dyn SequentialFile>,
    path: PathBuf,
    inner: Arc<Mutex<Inner>>,
}

impl SequentialFile for FaultSequential {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.inner.lock().check(FaultOp::Read, &self.path)?;
        self.base.read(buf)
    }
}

impl Drop for FaultSequential {
    fn drop(&mut self) {
        self.inner.lock().deregister_handle(&self.path);
    }
}

struct FaultRandomAccess {
    base: Box<dyn RandomAccessFile>,
    path: PathBuf,
    inner: Arc<Mutex<Inner>>,
}

impl RandomAccessFile for FaultRandomAccess {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        self.inner.lock().check(FaultOp::Read, &self.path)?;
        self.base.read_at(offset, buf)
    }
}

impl Drop for FaultRandomAccess {
    fn drop(&mut self) {
        self.inner.lock().deregister_handle(&self.path);
    }
}

// ---------------------------------------------------------------------------
// Content helpers used by the rename anomalies
// ---------------------------------------------------------------------------

fn read_all(fs: &dyn FileSystem, path: &Path) -> Result<Vec<u8>> {
    let mut file = fs.open(path)?;
    let mut content = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        content.extend_from_slice(&buf[..read]);
    }
    Ok(content)
}

fn write_all(fs: &dyn FileSystem, path: &Path, content: &[u8]) -> Result<()> {
    let mut file = fs.create(path)?;
    file.write(content)?;
    Ok(())
}
