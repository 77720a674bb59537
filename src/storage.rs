//! Storage abstraction over the recording data directory.
//!
//! The recorder never touches the filesystem directly. Everything goes
//! through [`Storage`], with paths relative to the data directory root,
//! so sessions and the upload queue can be tested against an in-memory
//! implementation.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// An open file being written by a recording session.
pub trait SinkFile: Send {
    /// Appends bytes at the current end of the file.
    fn append(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Overwrites bytes at an absolute offset without moving the append
    /// position. Used to patch the WAV header once the final size is known.
    fn write_at(&mut self, offset: u64, bytes: &[u8]) -> io::Result<()>;

    /// Flushes buffered data to the underlying medium.
    fn sync(&mut self) -> io::Result<()>;
}

/// Filesystem operations the recorder needs.
///
/// All paths are relative to the storage root.
pub trait Storage: Send {
    /// Creates (or truncates) a file for writing.
    fn create(&self, path: &Path) -> io::Result<Box<dyn SinkFile>>;

    fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// All files under `dir`, recursively, sorted by path.
    ///
    /// A missing directory is an empty listing, not an error.
    fn list_files(&self, dir: &Path) -> io::Result<Vec<PathBuf>>;

    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    fn file_size(&self, path: &Path) -> io::Result<u64>;

    /// Moves a file, creating missing parent directories of `to`.
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    fn remove_file(&self, path: &Path) -> io::Result<()>;

    fn exists(&self, path: &Path) -> bool;

    /// Bytes still available on the medium backing the data directory.
    fn free_space(&self) -> io::Result<u64>;
}

/// Real filesystem storage rooted at the configured data directory.
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn full(&self, path: &Path) -> PathBuf {
        self.root.join(path)
    }
}

impl Storage for FsStorage {
    fn create(&self, path: &Path) -> io::Result<Box<dyn SinkFile>> {
        let file = File::create(self.full(path))?;
        Ok(Box::new(FsSink { file }))
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(self.full(path))
    }

    fn list_files(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        let top = self.full(dir);
        if !top.exists() {
            return Ok(Vec::new());
        }

        let mut found = Vec::new();
        let mut stack = vec![top];
        while let Some(current) = stack.pop() {
            for entry in fs::read_dir(&current)? {
                let path = entry?.path();
                if path.is_dir() {
                    stack.push(path);
                } else if let Ok(rel) = path.strip_prefix(&self.root) {
                    found.push(rel.to_path_buf());
                }
            }
        }
        found.sort();
        Ok(found)
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(self.full(path))
    }

    fn file_size(&self, path: &Path) -> io::Result<u64> {
        fs::metadata(self.full(path)).map(|m| m.len())
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        let to_full = self.full(to);
        if let Some(parent) = to_full.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(self.full(from), to_full)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(self.full(path))
    }

    fn exists(&self, path: &Path) -> bool {
        self.full(path).exists()
    }

    fn free_space(&self) -> io::Result<u64> {
        let root = self
            .root
            .canonicalize()
            .unwrap_or_else(|_| self.root.clone());

        // Pick the disk with the longest mount point containing the root,
        // so /data wins over / when both are mounted.
        let disks = sysinfo::Disks::new_with_refreshed_list();
        disks
            .list()
            .iter()
            .filter(|disk| root.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .map(|disk| disk.available_space())
            .ok_or_else(|| io::Error::other("no disk found for data directory"))
    }
}

struct FsSink {
    file: File,
}

impl SinkFile for FsSink {
    fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.file.write_all(bytes)
    }

    fn write_at(&mut self, offset: u64, bytes: &[u8]) -> io::Result<()> {
        let end = self.file.seek(SeekFrom::End(0))?;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(bytes)?;
        self.file.seek(SeekFrom::Start(end))?;
        Ok(())
    }

    fn sync(&mut self) -> io::Result<()> {
        self.file.sync_data()
    }
}

/// In-memory storage for tests.
///
/// Clones share the same file map, so a test can hand one handle to the
/// recorder and keep another for inspection.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Mutex<MemoryInner>>,
}

#[derive(Default)]
struct MemoryInner {
    files: BTreeMap<PathBuf, Vec<u8>>,
    sync_counts: BTreeMap<PathBuf, u32>,
    free_space: Option<u64>,
    fail_create: bool,
    fail_create_dir: bool,
    fail_rename: bool,
    appends_before_failure: Option<u32>,
    fail_write_at: bool,
    fail_sync: bool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `create` call fails.
    pub fn with_create_failure(self) -> Self {
        self.lock().fail_create = true;
        self
    }

    /// Every `create_dir_all` call fails.
    pub fn with_create_dir_failure(self) -> Self {
        self.lock().fail_create_dir = true;
        self
    }

    /// Every `rename` call fails.
    pub fn with_rename_failure(self) -> Self {
        self.lock().fail_rename = true;
        self
    }

    /// Appends fail immediately.
    pub fn with_append_failure(self) -> Self {
        self.with_append_failure_after(0)
    }

    /// The first `n` appends succeed, then every append fails.
    pub fn with_append_failure_after(self, n: u32) -> Self {
        self.lock().appends_before_failure = Some(n);
        self
    }

    /// Every `write_at` call fails.
    pub fn with_write_at_failure(self) -> Self {
        self.lock().fail_write_at = true;
        self
    }

    /// Every `sync` call fails.
    pub fn with_sync_failure(self) -> Self {
        self.lock().fail_sync = true;
        self
    }

    /// Scripts the reported free space. Removing a file credits its
    /// size back, like deleting from a real medium.
    pub fn with_free_space(self, bytes: u64) -> Self {
        self.lock().free_space = Some(bytes);
        self
    }

    pub fn set_free_space(&self, bytes: u64) {
        self.lock().free_space = Some(bytes);
    }

    /// Seeds a file, for tests that start with recordings already on disk.
    pub fn insert_file(&self, path: impl Into<PathBuf>, bytes: Vec<u8>) {
        self.lock().files.insert(path.into(), bytes);
    }

    pub fn file(&self, path: &Path) -> Option<Vec<u8>> {
        self.lock().files.get(path).cloned()
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.lock().files.keys().cloned().collect()
    }

    /// How many times the file at `path` has been synced.
    pub fn sync_count(&self, path: &Path) -> u32 {
        self.lock().sync_counts.get(path).copied().unwrap_or(0)
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Storage for MemoryStorage {
    fn create(&self, path: &Path) -> io::Result<Box<dyn SinkFile>> {
        let mut inner = self.lock();
        if inner.fail_create {
            return Err(io::Error::other("injected create failure"));
        }
        inner.files.insert(path.to_path_buf(), Vec::new());
        Ok(Box::new(MemorySink {
            inner: Arc::clone(&self.inner),
            path: path.to_path_buf(),
        }))
    }

    fn create_dir_all(&self, _path: &Path) -> io::Result<()> {
        if self.lock().fail_create_dir {
            return Err(io::Error::other("injected create_dir failure"));
        }
        Ok(())
    }

    fn list_files(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        Ok(self
            .lock()
            .files
            .keys()
            .filter(|path| path.starts_with(dir))
            .cloned()
            .collect())
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.lock()
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such file"))
    }

    fn file_size(&self, path: &Path) -> io::Result<u64> {
        self.lock()
            .files
            .get(path)
            .map(|contents| contents.len() as u64)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such file"))
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        let mut inner = self.lock();
        if inner.fail_rename {
            return Err(io::Error::other("injected rename failure"));
        }
        let contents = inner
            .files
            .remove(from)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such file"))?;
        inner.files.insert(to.to_path_buf(), contents);
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        let mut inner = self.lock();
        let contents = inner
            .files
            .remove(path)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such file"))?;
        if let Some(free) = inner.free_space.as_mut() {
            *free += contents.len() as u64;
        }
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.lock().files.contains_key(path)
    }

    fn free_space(&self) -> io::Result<u64> {
        Ok(self.lock().free_space.unwrap_or(u64::MAX))
    }
}

struct MemorySink {
    inner: Arc<Mutex<MemoryInner>>,
    path: PathBuf,
}

impl MemorySink {
    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl SinkFile for MemorySink {
    fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut inner = self.lock();
        if let Some(remaining) = inner.appends_before_failure {
            if remaining == 0 {
                return Err(io::Error::other("injected append failure"));
            }
            inner.appends_before_failure = Some(remaining - 1);
        }
        match inner.files.get_mut(&self.path) {
            Some(contents) => {
                contents.extend_from_slice(bytes);
                Ok(())
            }
            None => Err(io::Error::new(io::ErrorKind::NotFound, "file was removed")),
        }
    }

    fn write_at(&mut self, offset: u64, bytes: &[u8]) -> io::Result<()> {
        let mut inner = self.lock();
        if inner.fail_write_at {
            return Err(io::Error::other("injected write_at failure"));
        }
        let Some(contents) = inner.files.get_mut(&self.path) else {
            return Err(io::Error::new(io::ErrorKind::NotFound, "file was removed"));
        };
        let offset = offset as usize;
        let end = offset + bytes.len();
        if contents.len() < end {
            contents.resize(end, 0);
        }
        contents[offset..end].copy_from_slice(bytes);
        Ok(())
    }

    fn sync(&mut self) -> io::Result<()> {
        let mut inner = self.lock();
        if inner.fail_sync {
            return Err(io::Error::other("injected sync failure"));
        }
        *inner.sync_counts.entry(self.path.clone()).or_insert(0) += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fs_create_append_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path());

        let mut sink = storage.create(Path::new("a.bin")).unwrap();
        sink.append(b"hello ").unwrap();
        sink.append(b"world").unwrap();
        sink.sync().unwrap();
        drop(sink);

        assert_eq!(storage.read(Path::new("a.bin")).unwrap(), b"hello world");
        assert!(storage.exists(Path::new("a.bin")));
        assert!(!storage.exists(Path::new("b.bin")));
    }

    #[test]
    fn fs_write_at_patches_without_truncating() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path());

        let mut sink = storage.create(Path::new("patched.bin")).unwrap();
        sink.append(&[0u8; 4]).unwrap();
        sink.append(b"payload").unwrap();
        sink.write_at(0, b"SIZE").unwrap();
        sink.append(b"!").unwrap();
        drop(sink);

        assert_eq!(
            storage.read(Path::new("patched.bin")).unwrap(),
            b"SIZEpayload!"
        );
    }

    #[test]
    fn fs_list_files_recurses_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path());

        storage
            .create_dir_all(Path::new("recordings/2026-08-23"))
            .unwrap();
        storage
            .create_dir_all(Path::new("recordings/2026-08-22"))
            .unwrap();
        storage
            .create(Path::new("recordings/2026-08-23/b.wav"))
            .unwrap();
        storage
            .create(Path::new("recordings/2026-08-22/a.wav"))
            .unwrap();

        let listed = storage.list_files(Path::new("recordings")).unwrap();
        assert_eq!(
            listed,
            vec![
                PathBuf::from("recordings/2026-08-22/a.wav"),
                PathBuf::from("recordings/2026-08-23/b.wav"),
            ]
        );
    }

    #[test]
    fn fs_list_files_of_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path());

        assert!(storage.list_files(Path::new("recordings")).unwrap().is_empty());
    }

    #[test]
    fn fs_rename_creates_target_parents() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path());

        storage.create_dir_all(Path::new("recordings")).unwrap();
        let mut sink = storage.create(Path::new("recordings/x.wav")).unwrap();
        sink.append(b"data").unwrap();
        drop(sink);

        storage
            .rename(
                Path::new("recordings/x.wav"),
                Path::new("uploaded/2026-08-23/x.wav"),
            )
            .unwrap();

        assert!(!storage.exists(Path::new("recordings/x.wav")));
        assert_eq!(
            storage.read(Path::new("uploaded/2026-08-23/x.wav")).unwrap(),
            b"data"
        );
    }

    #[test]
    fn file_size_matches_content() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path());
        let mut sink = storage.create(Path::new("sized.bin")).unwrap();
        sink.append(&[7u8; 123]).unwrap();
        drop(sink);
        assert_eq!(storage.file_size(Path::new("sized.bin")).unwrap(), 123);

        let memory = MemoryStorage::new();
        memory.insert_file("m.bin", vec![0u8; 45]);
        assert_eq!(memory.file_size(Path::new("m.bin")).unwrap(), 45);
        assert!(memory.file_size(Path::new("missing")).is_err());
    }

    #[test]
    fn memory_create_dir_failure_is_injected() {
        let storage = MemoryStorage::new().with_create_dir_failure();
        assert!(storage.create_dir_all(Path::new("recordings")).is_err());
    }

    #[test]
    fn fs_remove_file_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path());

        storage.create(Path::new("gone.wav")).unwrap();
        storage.remove_file(Path::new("gone.wav")).unwrap();

        assert!(!storage.exists(Path::new("gone.wav")));
    }

    #[test]
    fn memory_clones_share_files() {
        let storage = MemoryStorage::new();
        let observer = storage.clone();

        let mut sink = storage.create(Path::new("shared.wav")).unwrap();
        sink.append(b"abc").unwrap();

        assert_eq!(observer.file(Path::new("shared.wav")).unwrap(), b"abc");
    }

    #[test]
    fn memory_append_failure_is_injected() {
        let storage = MemoryStorage::new().with_append_failure();
        let mut sink = storage.create(Path::new("f.wav")).unwrap();

        assert!(sink.append(b"x").is_err());
    }

    #[test]
    fn memory_append_failure_after_allows_initial_writes() {
        let storage = MemoryStorage::new().with_append_failure_after(2);
        let mut sink = storage.create(Path::new("f.wav")).unwrap();

        assert!(sink.append(b"a").is_ok());
        assert!(sink.append(b"b").is_ok());
        assert!(sink.append(b"c").is_err());
    }

    #[test]
    fn memory_write_at_extends_and_overwrites() {
        let storage = MemoryStorage::new();
        let mut sink = storage.create(Path::new("f.bin")).unwrap();

        sink.write_at(2, b"AB").unwrap();
        assert_eq!(storage.file(Path::new("f.bin")).unwrap(), &[0, 0, b'A', b'B']);

        sink.write_at(0, b"XY").unwrap();
        assert_eq!(
            storage.file(Path::new("f.bin")).unwrap(),
            &[b'X', b'Y', b'A', b'B']
        );
    }

    #[test]
    fn memory_tracks_sync_counts() {
        let storage = MemoryStorage::new();
        let mut sink = storage.create(Path::new("f.wav")).unwrap();

        assert_eq!(storage.sync_count(Path::new("f.wav")), 0);
        sink.sync().unwrap();
        sink.sync().unwrap();
        assert_eq!(storage.sync_count(Path::new("f.wav")), 2);
    }

    #[test]
    fn memory_rename_moves_content() {
        let storage = MemoryStorage::new();
        storage.insert_file("recordings/a.wav", b"pcm".to_vec());

        storage
            .rename(Path::new("recordings/a.wav"), Path::new("uploaded/a.wav"))
            .unwrap();

        assert!(!storage.exists(Path::new("recordings/a.wav")));
        assert_eq!(storage.file(Path::new("uploaded/a.wav")).unwrap(), b"pcm");
    }

    #[test]
    fn memory_rename_of_missing_file_fails() {
        let storage = MemoryStorage::new();
        let err = storage
            .rename(Path::new("missing.wav"), Path::new("x.wav"))
            .unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn memory_list_files_filters_by_prefix() {
        let storage = MemoryStorage::new();
        storage.insert_file("recordings/2026-08-23/a.wav", Vec::new());
        storage.insert_file("recordings/2026-08-23/b.wav", Vec::new());
        storage.insert_file("uploaded/2026-08-23/c.wav", Vec::new());

        let listed = storage.list_files(Path::new("recordings")).unwrap();
        assert_eq!(
            listed,
            vec![
                PathBuf::from("recordings/2026-08-23/a.wav"),
                PathBuf::from("recordings/2026-08-23/b.wav"),
            ]
        );
    }

    #[test]
    fn memory_free_space_defaults_to_unlimited() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.free_space().unwrap(), u64::MAX);

        storage.set_free_space(4_096);
        assert_eq!(storage.free_space().unwrap(), 4_096);
    }

    #[test]
    fn memory_remove_credits_scripted_free_space() {
        let storage = MemoryStorage::new().with_free_space(10);
        storage.insert_file("uploaded/2026-08-19/REC_20260819_080000.wav", vec![0u8; 90]);

        storage
            .remove_file(Path::new("uploaded/2026-08-19/REC_20260819_080000.wav"))
            .unwrap();

        assert_eq!(storage.free_space().unwrap(), 100);
        assert!(
            storage
                .remove_file(Path::new("uploaded/2026-08-19/REC_20260819_080000.wav"))
                .is_err()
        );
    }
}
