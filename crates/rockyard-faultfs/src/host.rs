//! Host filesystem: the passthrough base every fault layer wraps.
//!
//! Also exposes the `host_fs`-style free helpers the harness uses for
//! artifact writes, so orchestrator I/O goes through one seam.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use rockyard_error::Result;

use crate::{
    FileLock, FileMeta, FileSystem, RandomAccessFile, SequentialFile, WritableFile, absolute,
};

/// Passthrough implementation of [`FileSystem`] over `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostFs;

impl HostFs {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

struct HostWritable {
    file: File,
}

impl WritableFile for HostWritable {
    fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.file.write_all(data)?;
        Ok(data.len())
    }

    fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

struct HostSequential {
    file: File,
}

impl SequentialFile for HostSequential {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.file.read(buf)?)
    }
}

struct HostRandomAccess {
    file: File,
}

impl RandomAccessFile for HostRandomAccess {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        Ok(self.file.read_at(buf, offset)?)
    }
}

/// Lock-file token; the file is removed when the token drops.
struct HostLock {
    path: PathBuf,
}

impl FileLock for HostLock {}

impl Drop for HostLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

impl FileSystem for HostFs {
    fn create(&self, path: &Path) -> Result<Box<dyn WritableFile>> {
        let file = File::create(absolute(path))?;
        Ok(Box::new(HostWritable { file }))
    }

    fn open(&self, path: &Path) -> Result<Box<dyn SequentialFile>> {
        let file = File::open(absolute(path))?;
        Ok(Box::new(HostSequential { file }))
    }

    fn open_random_access(&self, path: &Path) -> Result<Box<dyn RandomAccessFile>> {
        let file = File::open(absolute(path))?;
        Ok(Box::new(HostRandomAccess { file }))
    }

    fn rename(&self, old: &Path, new: &Path) -> Result<()> {
        fs::rename(absolute(old), absolute(new))?;
        Ok(())
    }

    fn remove(&self, path: &Path) -> Result<()> {
        fs::remove_file(absolute(path))?;
        Ok(())
    }

    fn truncate(&self, path: &Path, len: u64) -> Result<()> {
        let file = OpenOptions::new().write(true).open(absolute(path))?;
        file.set_len(len)?;
        Ok(())
    }

    fn stat(&self, path: &Path) -> Result<FileMeta> {
        let meta = fs::metadata(absolute(path))?;
        Ok(FileMeta {
            len: meta.len(),
            is_dir: meta.is_dir(),
        })
    }

    fn exists(&self, path: &Path) -> bool {
        absolute(path).exists()
    }

    fn list_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(absolute(path))? {
            entries.push(entry?.path());
        }
        entries.sort();
        Ok(entries)
    }

    fn mkdir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(absolute(path))?;
        Ok(())
    }

    fn lock(&self, path: &Path) -> Result<Box<dyn FileLock>> {
        let path = absolute(path);
        OpenOptions::new().write(true).create_new(true).open(&path)?;
        Ok(Box::new(HostLock { path }))
    }

    fn sync_dir(&self, path: &Path) -> Result<()> {
        let dir = File::open(absolute(path))?;
        dir.sync_all()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Free helpers used by the orchestrator for artifact I/O
// ---------------------------------------------------------------------------

pub fn read(path: &Path) -> Result<Vec<u8>> {
    Ok(fs::read(path)?)
}

pub fn read_to_string(path: &Path) -> Result<String> {
    Ok(fs::read_to_string(path)?)
}

pub fn write(path: &Path, contents: impl AsRef<[u8]>) -> Result<()> {
    fs::write(path, contents)?;
    Ok(())
}

pub fn create_dir_all(path: &Path) -> Result<()> {
    fs::create_dir_all(path)?;
    Ok(())
}

pub fn create_empty_file(path: &Path) -> Result<()> {
    File::create(path)?;
    Ok(())
}

pub fn append_line(path: &Path, line: &str) -> Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line.as_bytes())?;
    file.write_all(b"\n")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_write_sync_read_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("data.bin");
        let fs = HostFs::new();

        let mut file = fs.create(&path).expect("create");
        assert_eq!(file.write(b"abc").expect("write"), 3);
        file.sync().expect("sync");
        drop(file);

        let mut buf = [0u8; 8];
        let mut reader = fs.open(&path).expect("open");
        assert_eq!(reader.read(&mut buf).expect("read"), 3);
        assert_eq!(&buf[..3], b"abc");

        let meta = fs.stat(&path).expect("stat");
        assert_eq!(meta.len, 3);
        assert!(!meta.is_dir);
    }

    #[test]
    fn lock_is_exclusive_until_dropped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("LOCK");
        let fs = HostFs::new();

        let guard = fs.lock(&path).expect("first lock");
        assert!(fs.lock(&path).is_err(), "second lock must fail");
        drop(guard);
        assert!(fs.lock(&path).is_ok(), "lock must be retakable after drop");
    }

    #[test]
    fn helpers_cover_append_and_empty_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = dir.path().join("events.log");

        create_empty_file(&log).expect("create");
        append_line(&log, "first").expect("append");
        append_line(&log, "second").expect("append");
        assert_eq!(read_to_string(&log).expect("read"), "first\nsecond\n");
        assert_eq!(read(&log).expect("read").len(), 13);
    }

    #[test]
    fn random_access_reads_at_offset() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("blob");
        write(&path, b"0123456789").expect("write");

        let fs = HostFs::new();
        let file = fs.open_random_access(&path).expect("open");
        let mut buf = [0u8; 4];
        assert_eq!(file.read_at(3, &mut buf).expect("read_at"), 4);
        assert_eq!(&buf, b"3456");
    }
}
