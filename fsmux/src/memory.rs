//! In-memory provider.
//!
//! A path keyed namespace in the style of a simple VFS: every entry lives in
//! one map under its normalized path, directories included. It implements all
//! operation groups; which of them are advertised is configurable, so the
//! same store can stand in for whole-buffer only, streaming only or readonly
//! backends.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::broadcast;

use crate::capability::Capabilities;
use crate::error::ProviderError;
use crate::events::FileChange;
use crate::provider::{
    FileDeleteOptions, FileFolderCopyProvider, FileHandle, FileOpenOptions,
    FileOpenReadWriteCloseProvider, FileOverwriteOptions, FileReadWriteProvider,
    FileSystemProvider, FileWriteOptions, ProviderResult,
};
use crate::stat::{FileType, Stat};
use crate::uri::Resource;

const EVENT_CAPACITY: usize = 64;

#[derive(Clone, Debug)]
struct Entry {
    kind: FileType,
    data: Vec<u8>,
    mtime: u64,
    ctime: u64,
}

impl Entry {
    fn dir(now: u64) -> Self {
        Self { kind: FileType::DIRECTORY, data: Vec::new(), mtime: now, ctime: now }
    }

    fn file(now: u64) -> Self {
        Self { kind: FileType::FILE, data: Vec::new(), mtime: now, ctime: now }
    }

    fn stat(&self) -> Stat {
        Stat {
            file_type: self.kind,
            mtime: self.mtime,
            ctime: self.ctime,
            size: self.data.len() as u64,
        }
    }
}

pub struct InMemoryFileSystemProvider {
    entries: Mutex<HashMap<String, Entry>>, // normalized path -> entry
    handles: Mutex<HashMap<FileHandle, String>>,
    next_handle: AtomicU64,
    clock: AtomicU64,
    capabilities: AtomicU32,
    folder_copy: AtomicBool,
    max_write_len: AtomicUsize, // 0: unlimited
    changes: broadcast::Sender<Vec<FileChange>>,
    capability_changes: broadcast::Sender<Capabilities>,
}

impl Default for InMemoryFileSystemProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryFileSystemProvider {
    pub fn default_capabilities() -> Capabilities {
        Capabilities::FILE_READ_WRITE
            | Capabilities::FILE_OPEN_READ_WRITE_CLOSE
            | Capabilities::FILE_FOLDER_COPY
            | Capabilities::PATH_CASE_SENSITIVE
            | Capabilities::TRASH
    }

    pub fn new() -> Self {
        Self::with_capabilities(Self::default_capabilities())
    }

    pub fn with_capabilities(capabilities: Capabilities) -> Self {
        let now = wall_clock_ms();
        let mut entries = HashMap::new();
        entries.insert("/".to_string(), Entry::dir(now));
        let (changes, _) = broadcast::channel(EVENT_CAPACITY);
        let (capability_changes, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            entries: Mutex::new(entries),
            handles: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
            clock: AtomicU64::new(now),
            capabilities: AtomicU32::new(capabilities.bits()),
            folder_copy: AtomicBool::new(true),
            max_write_len: AtomicUsize::new(0),
            changes,
            capability_changes,
        }
    }

    /// Replaces the advertised capabilities and notifies watchers.
    pub fn set_capabilities(&self, capabilities: Capabilities) {
        self.capabilities.store(capabilities.bits(), Ordering::SeqCst);
        let _ = self.capability_changes.send(capabilities);
    }

    /// Stops supplying the native copy group regardless of what is
    /// advertised.
    pub fn disable_folder_copy(&self) {
        self.folder_copy.store(false, Ordering::SeqCst);
    }

    /// Caps the bytes accepted by a single handle `write`, to exercise
    /// partial writes. Zero removes the cap.
    pub fn set_max_write_len(&self, len: usize) {
        self.max_write_len.store(len, Ordering::SeqCst);
    }

    /// Number of currently open handles.
    pub fn open_handles(&self) -> usize {
        lock(&self.handles).len()
    }

    /// Monotonic modification time; never repeats even within one millisecond.
    fn tick(&self) -> u64 {
        let now = wall_clock_ms();
        let mut last = self.clock.load(Ordering::SeqCst);
        loop {
            let next = now.max(last + 1);
            match self.clock.compare_exchange(last, next, Ordering::SeqCst, Ordering::SeqCst) {
                Ok(_) => return next,
                Err(actual) => last = actual,
            }
        }
    }

    fn notify(&self, changes: Vec<FileChange>) {
        if !changes.is_empty() {
            let _ = self.changes.send(changes);
        }
    }

    fn check_parent(entries: &HashMap<String, Entry>, resource: &Resource) -> ProviderResult<()> {
        let parent = resource.dirname();
        match entries.get(parent.path()) {
            Some(entry) if entry.kind.is_directory() => Ok(()),
            Some(_) => Err(ProviderError::not_a_directory(format!("{parent} is not a directory"))),
            None => Err(ProviderError::not_found(format!("{parent} does not exist"))),
        }
    }

    fn handle_path(&self, fd: FileHandle) -> ProviderResult<String> {
        lock(&self.handles)
            .get(&fd)
            .cloned()
            .ok_or_else(|| ProviderError::unknown(format!("invalid file handle {fd}")))
    }
}

fn wall_clock_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn is_descendant(path: &str, ancestor: &str) -> bool {
    if ancestor == "/" {
        return path != "/";
    }
    path.strip_prefix(ancestor)
        .is_some_and(|rest| rest.starts_with('/'))
}

fn not_found(resource: &Resource) -> ProviderError {
    ProviderError::not_found(format!("{resource} does not exist"))
}

/// Paths of `root` and everything below it.
fn subtree(entries: &HashMap<String, Entry>, root: &str) -> Vec<String> {
    entries
        .keys()
        .filter(|path| path.as_str() == root || is_descendant(path, root))
        .cloned()
        .collect()
}

/// Re-keys the subtree at `from` below `to`, cloning when `keep_source`.
fn transplant(
    entries: &mut HashMap<String, Entry>,
    from: &str,
    to: &str,
    keep_source: bool,
    now: u64,
) {
    let mut moved = Vec::new();
    for path in subtree(entries, from) {
        let entry = if keep_source {
            entries.get(&path).cloned()
        } else {
            entries.remove(&path)
        };
        if let Some(mut entry) = entry {
            if keep_source {
                entry.ctime = now;
                entry.mtime = now;
            }
            let suffix = &path[from.len()..];
            let target = if from == "/" {
                format!("{to}/{}", suffix.trim_start_matches('/'))
            } else {
                format!("{to}{suffix}")
            };
            moved.push((target, entry));
        }
    }
    entries.extend(moved);
}

#[async_trait]
impl FileSystemProvider for InMemoryFileSystemProvider {
    fn capabilities(&self) -> Capabilities {
        Capabilities::from_bits_truncate(self.capabilities.load(Ordering::SeqCst))
    }

    async fn stat(&self, resource: &Resource) -> ProviderResult<Stat> {
        lock(&self.entries)
            .get(resource.path())
            .map(Entry::stat)
            .ok_or_else(|| not_found(resource))
    }

    async fn mkdir(&self, resource: &Resource) -> ProviderResult<()> {
        {
            let mut entries = lock(&self.entries);
            if entries.contains_key(resource.path()) {
                return Err(ProviderError::exists(format!("{resource} already exists")));
            }
            Self::check_parent(&entries, resource)?;
            entries.insert(resource.path().to_string(), Entry::dir(self.tick()));
        }
        self.notify(vec![FileChange::added(resource.clone())]);
        Ok(())
    }

    async fn readdir(&self, resource: &Resource) -> ProviderResult<Vec<(String, FileType)>> {
        let entries = lock(&self.entries);
        match entries.get(resource.path()) {
            None => return Err(not_found(resource)),
            Some(entry) if !entry.kind.is_directory() => {
                return Err(ProviderError::not_a_directory(format!(
                    "{resource} is not a directory"
                )));
            }
            Some(_) => {}
        }
        let dir = resource.path();
        let mut children: Vec<(String, FileType)> = entries
            .iter()
            .filter(|(path, _)| is_descendant(path, dir))
            .filter_map(|(path, entry)| {
                let rest = if dir == "/" { &path[1..] } else { &path[dir.len() + 1..] };
                (!rest.contains('/')).then(|| (rest.to_string(), entry.kind))
            })
            .collect();
        children.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(children)
    }

    async fn delete(&self, resource: &Resource, opts: FileDeleteOptions) -> ProviderResult<()> {
        if resource.is_root() {
            return Err(ProviderError::no_permissions("cannot delete the root"));
        }
        {
            let mut entries = lock(&self.entries);
            let Some(entry) = entries.get(resource.path()) else {
                return Err(not_found(resource));
            };
            let doomed = subtree(&entries, resource.path());
            if entry.kind.is_directory() && doomed.len() > 1 && !opts.recursive {
                return Err(ProviderError::unknown(format!("{resource} is not empty")));
            }
            for path in doomed {
                entries.remove(&path);
            }
        }
        self.notify(vec![FileChange::deleted(resource.clone())]);
        Ok(())
    }

    async fn rename(
        &self,
        from: &Resource,
        to: &Resource,
        opts: FileOverwriteOptions,
    ) -> ProviderResult<()> {
        {
            let mut entries = lock(&self.entries);
            if !entries.contains_key(from.path()) {
                return Err(not_found(from));
            }
            if from.path() == to.path() {
                return Ok(());
            }
            if entries.contains_key(to.path()) {
                if !opts.overwrite {
                    return Err(ProviderError::exists(format!("{to} already exists")));
                }
                for path in subtree(&entries, to.path()) {
                    entries.remove(&path);
                }
            }
            Self::check_parent(&entries, to)?;
            let now = self.tick();
            transplant(&mut entries, from.path(), to.path(), false, now);
        }
        self.notify(vec![FileChange::deleted(from.clone()), FileChange::added(to.clone())]);
        Ok(())
    }

    fn watch_changes(&self) -> Option<broadcast::Receiver<Vec<FileChange>>> {
        Some(self.changes.subscribe())
    }

    fn watch_capabilities(&self) -> Option<broadcast::Receiver<Capabilities>> {
        Some(self.capability_changes.subscribe())
    }

    fn as_read_write(&self) -> Option<&dyn FileReadWriteProvider> {
        Some(self)
    }

    fn as_open_read_write_close(&self) -> Option<&dyn FileOpenReadWriteCloseProvider> {
        Some(self)
    }

    fn as_folder_copy(&self) -> Option<&dyn FileFolderCopyProvider> {
        if self.folder_copy.load(Ordering::SeqCst) {
            Some(self)
        } else {
            None
        }
    }
}

#[async_trait]
impl FileReadWriteProvider for InMemoryFileSystemProvider {
    async fn read_file(&self, resource: &Resource) -> ProviderResult<Bytes> {
        let entries = lock(&self.entries);
        match entries.get(resource.path()) {
            None => Err(not_found(resource)),
            Some(entry) if entry.kind.is_directory() => {
                Err(ProviderError::is_a_directory(format!("{resource} is a directory")))
            }
            Some(entry) => Ok(Bytes::copy_from_slice(&entry.data)),
        }
    }

    async fn write_file(
        &self,
        resource: &Resource,
        content: Bytes,
        opts: FileWriteOptions,
    ) -> ProviderResult<()> {
        let change = {
            let mut entries = lock(&self.entries);
            let now = self.tick();
            match entries.get_mut(resource.path()) {
                Some(entry) if entry.kind.is_directory() => {
                    return Err(ProviderError::is_a_directory(format!("{resource} is a directory")));
                }
                Some(_) if !opts.overwrite => {
                    return Err(ProviderError::exists(format!("{resource} already exists")));
                }
                Some(entry) => {
                    entry.data = content.to_vec();
                    entry.mtime = now;
                    FileChange::updated(resource.clone())
                }
                None if !opts.create => return Err(not_found(resource)),
                None => {
                    Self::check_parent(&entries, resource)?;
                    let mut entry = Entry::file(now);
                    entry.data = content.to_vec();
                    entries.insert(resource.path().to_string(), entry);
                    FileChange::added(resource.clone())
                }
            }
        };
        self.notify(vec![change]);
        Ok(())
    }
}

#[async_trait]
impl FileOpenReadWriteCloseProvider for InMemoryFileSystemProvider {
    /// Opening with `create` truncates an existing file, like opening for
    /// writing.
    async fn open(&self, resource: &Resource, opts: FileOpenOptions) -> ProviderResult<FileHandle> {
        let change = {
            let mut entries = lock(&self.entries);
            match entries.get_mut(resource.path()) {
                Some(entry) if entry.kind.is_directory() => {
                    return Err(ProviderError::is_a_directory(format!("{resource} is a directory")));
                }
                Some(entry) if opts.create => {
                    entry.data.clear();
                    entry.mtime = self.tick();
                    Some(FileChange::updated(resource.clone()))
                }
                Some(_) => None,
                None if !opts.create => return Err(not_found(resource)),
                None => {
                    Self::check_parent(&entries, resource)?;
                    entries.insert(resource.path().to_string(), Entry::file(self.tick()));
                    Some(FileChange::added(resource.clone()))
                }
            }
        };
        let fd = self.next_handle.fetch_add(1, Ordering::Relaxed);
        lock(&self.handles).insert(fd, resource.path().to_string());
        self.notify(change.into_iter().collect());
        Ok(fd)
    }

    async fn close(&self, fd: FileHandle) -> ProviderResult<()> {
        lock(&self.handles)
            .remove(&fd)
            .map(|_| ())
            .ok_or_else(|| ProviderError::unknown(format!("invalid file handle {fd}")))
    }

    async fn read(&self, fd: FileHandle, pos: u64, data: &mut [u8]) -> ProviderResult<usize> {
        let path = self.handle_path(fd)?;
        let entries = lock(&self.entries);
        let entry = entries
            .get(&path)
            .ok_or_else(|| ProviderError::not_found(format!("{path} was removed")))?;
        let start = (pos as usize).min(entry.data.len());
        let n = data.len().min(entry.data.len() - start);
        data[..n].copy_from_slice(&entry.data[start..start + n]);
        Ok(n)
    }

    async fn write(&self, fd: FileHandle, pos: u64, data: &[u8]) -> ProviderResult<usize> {
        let path = self.handle_path(fd)?;
        let limit = match self.max_write_len.load(Ordering::SeqCst) {
            0 => data.len(),
            max => data.len().min(max),
        };
        let mut entries = lock(&self.entries);
        let entry = entries
            .get_mut(&path)
            .ok_or_else(|| ProviderError::not_found(format!("{path} was removed")))?;
        let start = pos as usize;
        let end = start + limit;
        if entry.data.len() < end {
            entry.data.resize(end, 0);
        }
        entry.data[start..end].copy_from_slice(&data[..limit]);
        entry.mtime = self.tick();
        Ok(limit)
    }
}

#[async_trait]
impl FileFolderCopyProvider for InMemoryFileSystemProvider {
    async fn copy(
        &self,
        from: &Resource,
        to: &Resource,
        opts: FileOverwriteOptions,
    ) -> ProviderResult<()> {
        {
            let mut entries = lock(&self.entries);
            if !entries.contains_key(from.path()) {
                return Err(not_found(from));
            }
            if entries.contains_key(to.path()) {
                if !opts.overwrite {
                    return Err(ProviderError::exists(format!("{to} already exists")));
                }
                for path in subtree(&entries, to.path()) {
                    entries.remove(&path);
                }
            }
            Self::check_parent(&entries, to)?;
            let now = self.tick();
            transplant(&mut entries, from.path(), to.path(), true, now);
        }
        self.notify(vec![FileChange::added(to.clone())]);
        Ok(())
    }
}
