//! Provider interface.
//!
//! A provider implements file operations for one URI scheme. The base trait
//! covers metadata and namespace operations; whole-buffer I/O, handle based
//! I/O and native copy are optional groups. A provider that advertises a
//! group in [`FileSystemProvider::capabilities`] must return it from the
//! matching `as_*` accessor, which registration checks.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::broadcast;

use crate::capability::Capabilities;
use crate::error::ProviderError;
use crate::events::FileChange;
use crate::stat::{FileType, Stat};
use crate::uri::Resource;

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Opaque handle returned by [`FileOpenReadWriteCloseProvider::open`].
pub type FileHandle = u64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileWriteOptions {
    pub create: bool,
    pub overwrite: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileOpenOptions {
    pub create: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FileDeleteOptions {
    pub recursive: bool,
    pub use_trash: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FileOverwriteOptions {
    pub overwrite: bool,
}

#[async_trait]
pub trait FileSystemProvider: Send + Sync {
    fn capabilities(&self) -> Capabilities;

    async fn stat(&self, resource: &Resource) -> ProviderResult<Stat>;

    async fn mkdir(&self, resource: &Resource) -> ProviderResult<()>;

    async fn readdir(&self, resource: &Resource) -> ProviderResult<Vec<(String, FileType)>>;

    async fn delete(&self, resource: &Resource, opts: FileDeleteOptions) -> ProviderResult<()>;

    async fn rename(
        &self,
        from: &Resource,
        to: &Resource,
        opts: FileOverwriteOptions,
    ) -> ProviderResult<()>;

    /// Batches of changes observed by the provider.
    fn watch_changes(&self) -> Option<broadcast::Receiver<Vec<FileChange>>> {
        None
    }

    /// New capability sets, sent whenever they change.
    fn watch_capabilities(&self) -> Option<broadcast::Receiver<Capabilities>> {
        None
    }

    fn as_read_write(&self) -> Option<&dyn FileReadWriteProvider> {
        None
    }

    fn as_open_read_write_close(&self) -> Option<&dyn FileOpenReadWriteCloseProvider> {
        None
    }

    fn as_folder_copy(&self) -> Option<&dyn FileFolderCopyProvider> {
        None
    }
}

/// Whole-buffer reads and writes.
#[async_trait]
pub trait FileReadWriteProvider: Send + Sync {
    async fn read_file(&self, resource: &Resource) -> ProviderResult<Bytes>;

    async fn write_file(
        &self,
        resource: &Resource,
        content: Bytes,
        opts: FileWriteOptions,
    ) -> ProviderResult<()>;
}

/// Handle based positional I/O. `read` and `write` may transfer fewer bytes
/// than requested and report how many they did.
#[async_trait]
pub trait FileOpenReadWriteCloseProvider: Send + Sync {
    async fn open(&self, resource: &Resource, opts: FileOpenOptions) -> ProviderResult<FileHandle>;

    async fn close(&self, fd: FileHandle) -> ProviderResult<()>;

    async fn read(&self, fd: FileHandle, pos: u64, data: &mut [u8]) -> ProviderResult<usize>;

    async fn write(&self, fd: FileHandle, pos: u64, data: &[u8]) -> ProviderResult<usize>;
}

#[async_trait]
pub trait FileFolderCopyProvider: Send + Sync {
    async fn copy(
        &self,
        from: &Resource,
        to: &Resource,
        opts: FileOverwriteOptions,
    ) -> ProviderResult<()>;
}
