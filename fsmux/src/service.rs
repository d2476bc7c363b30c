//! The file service: routes operations to the provider registered for a
//! resource's scheme.
//!
//! Writes pick a strategy from the provider's capabilities. Providers without
//! the streaming group, and buffered content on providers that also support
//! whole-buffer writes, get a single `write_file`. Everything else is
//! streamed through `open`/`write`/`close`. Both strategies run inside the
//! per-resource write queue, so writes to one resource never interleave.

use std::fmt;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, BoxStream, Stream, StreamExt};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::capability::{
    Capabilities, has_folder_copy, has_open_read_write_close, has_read_write,
};
use crate::config::FileServiceConfig;
use crate::error::{
    FileOperationError, FileOperationResult, FsError, ProviderError, ProviderErrorCode, Result,
};
use crate::etag::{ETAG_DISABLED, etag};
use crate::events::{FileChange, ProviderCapabilitiesEvent, ProviderRegistrationEvent};
use crate::provider::{
    FileDeleteOptions, FileHandle, FileOpenOptions, FileOpenReadWriteCloseProvider,
    FileOverwriteOptions, FileReadWriteProvider, FileSystemProvider, FileWriteOptions,
};
use crate::registry::{
    ActivationListenerHandle, ProviderRegistration, ProviderRegistry, WillActivateEvent,
};
use crate::stat::{FileContent, FileStat, FileStatWithMetadata, Stat};
use crate::uri::Resource;
use crate::write_queue::WriteQueue;

/// Preconditions of a write. When both fields are set and the etag is not
/// [`ETAG_DISABLED`], the write is refused if the file changed on disk since
/// the caller read it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WriteFileOptions {
    pub mtime: Option<u64>,
    pub etag: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReadFileOptions {
    /// Fails with `FILE_NOT_MODIFIED_SINCE` when the file still has this etag.
    pub etag: Option<String>,
    /// Fails with `FILE_TOO_LARGE` above this many bytes.
    pub size_limit: Option<u64>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResolveFileOptions {
    /// Descendants to resolve along with the resource.
    pub resolve_to: Vec<Resource>,
    /// Keep resolving folders that are the only child of their parent.
    pub resolve_single_child_descendants: bool,
    pub resolve_metadata: bool,
}

pub type ByteStream = BoxStream<'static, Result<Bytes, ProviderError>>;

/// Content handed to [`FileService::write_file`].
pub enum WriteContent {
    Buffer(Bytes),
    Stream(ByteStream),
}

impl WriteContent {
    pub fn stream<S>(chunks: S) -> Self
    where
        S: Stream<Item = Result<Bytes, ProviderError>> + Send + 'static,
    {
        WriteContent::Stream(chunks.boxed())
    }

    pub fn is_buffer(&self) -> bool {
        matches!(self, WriteContent::Buffer(_))
    }

    async fn into_bytes(self) -> Result<Bytes, ProviderError> {
        match self {
            WriteContent::Buffer(bytes) => Ok(bytes),
            WriteContent::Stream(mut chunks) => {
                let mut buf = BytesMut::new();
                while let Some(chunk) = chunks.next().await {
                    buf.extend_from_slice(&chunk?);
                }
                Ok(buf.freeze())
            }
        }
    }

    fn into_stream(self) -> ByteStream {
        match self {
            WriteContent::Buffer(bytes) => stream::iter([Ok(bytes)]).boxed(),
            WriteContent::Stream(chunks) => chunks,
        }
    }
}

impl fmt::Debug for WriteContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteContent::Buffer(bytes) => f.debug_tuple("Buffer").field(&bytes.len()).finish(),
            WriteContent::Stream(_) => f.write_str("Stream"),
        }
    }
}

impl From<Bytes> for WriteContent {
    fn from(bytes: Bytes) -> Self {
        WriteContent::Buffer(bytes)
    }
}

impl From<Vec<u8>> for WriteContent {
    fn from(bytes: Vec<u8>) -> Self {
        WriteContent::Buffer(bytes.into())
    }
}

impl From<&'static [u8]> for WriteContent {
    fn from(bytes: &'static [u8]) -> Self {
        WriteContent::Buffer(Bytes::from_static(bytes))
    }
}

impl From<&'static str> for WriteContent {
    fn from(text: &'static str) -> Self {
        WriteContent::Buffer(Bytes::from_static(text.as_bytes()))
    }
}

impl From<String> for WriteContent {
    fn from(text: String) -> Self {
        WriteContent::Buffer(text.into())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TransferMode {
    Move,
    Copy,
}

impl TransferMode {
    fn verb(self) -> &'static str {
        match self {
            TransferMode::Move => "move",
            TransferMode::Copy => "copy",
        }
    }
}

fn operation_error(message: impl Into<String>, result: FileOperationResult) -> FsError {
    FileOperationError::new(message, result).into()
}

/// Rewraps a failure as a tagged operation error, keeping its result code.
fn wrap(message: String, err: FsError) -> FsError {
    let result = err.result();
    operation_error(format!("{message} ({err})"), result)
}

fn same_provider(a: &Arc<dyn FileSystemProvider>, b: &Arc<dyn FileSystemProvider>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

fn metadata_of(resource: &Resource, stat: Stat) -> FileStatWithMetadata {
    FileStatWithMetadata {
        resource: resource.clone(),
        name: resource.basename().to_string(),
        file_type: stat.file_type,
        size: stat.size,
        mtime: stat.mtime,
        ctime: stat.ctime,
        etag: stat.etag(),
        children: None,
    }
}

pub struct FileService {
    config: FileServiceConfig,
    registry: Arc<ProviderRegistry>,
    write_queue: WriteQueue,
}

impl Default for FileService {
    fn default() -> Self {
        Self::new(FileServiceConfig::default())
    }
}

impl FileService {
    pub fn new(config: FileServiceConfig) -> Self {
        let registry = Arc::new(ProviderRegistry::new(&config));
        Self {
            config,
            registry,
            write_queue: WriteQueue::new(),
        }
    }

    pub fn config(&self) -> &FileServiceConfig {
        &self.config
    }

    // ---- registry ----

    pub fn register_provider(
        &self,
        scheme: &str,
        provider: Arc<dyn FileSystemProvider>,
    ) -> Result<ProviderRegistration> {
        self.registry.register(scheme, provider)
    }

    pub fn on_will_activate<F>(&self, listener: F) -> ActivationListenerHandle
    where
        F: Fn(&mut WillActivateEvent) + Send + Sync + 'static,
    {
        self.registry.on_will_activate(listener)
    }

    pub async fn activate_provider(&self, scheme: &str) {
        self.registry.activate(scheme).await
    }

    pub fn can_handle_resource(&self, resource: &Resource) -> bool {
        self.registry.contains(resource.scheme())
    }

    pub fn has_capability(&self, resource: &Resource, capability: Capabilities) -> bool {
        self.registry
            .get(resource.scheme())
            .is_some_and(|provider| provider.capabilities().contains(capability))
    }

    pub fn subscribe_file_changes(&self) -> broadcast::Receiver<Vec<FileChange>> {
        self.registry.subscribe_file_changes()
    }

    pub fn subscribe_provider_registrations(
        &self,
    ) -> broadcast::Receiver<ProviderRegistrationEvent> {
        self.registry.subscribe_registrations()
    }

    pub fn subscribe_capability_changes(&self) -> broadcast::Receiver<ProviderCapabilitiesEvent> {
        self.registry.subscribe_capability_changes()
    }

    // ---- provider lookup ----

    async fn with_provider(&self, resource: &Resource) -> Result<Arc<dyn FileSystemProvider>> {
        if !resource.is_absolute() {
            return Err(operation_error(
                format!("Unable to resolve filesystem provider with relative file path {resource}"),
                FileOperationResult::FileInvalidPath,
            ));
        }
        self.registry.activate(resource.scheme()).await;
        self.registry
            .get(resource.scheme())
            .ok_or_else(|| FsError::NoProvider(resource.to_string()))
    }

    async fn with_read_provider(&self, resource: &Resource) -> Result<Arc<dyn FileSystemProvider>> {
        let provider = self.with_provider(resource).await?;
        let caps = provider.capabilities();
        if caps.has_read_write() || caps.has_open_read_write_close() {
            return Ok(provider);
        }
        Err(FsError::Unsupported {
            scheme: resource.scheme().to_string(),
            operation: "reading",
        })
    }

    async fn with_write_provider(
        &self,
        resource: &Resource,
    ) -> Result<Arc<dyn FileSystemProvider>> {
        let provider = self.with_provider(resource).await?;
        let caps = provider.capabilities();
        if caps.has_read_write() || caps.has_open_read_write_close() {
            return Ok(provider);
        }
        Err(FsError::Unsupported {
            scheme: resource.scheme().to_string(),
            operation: "writing",
        })
    }

    fn throw_if_readonly(provider: &dyn FileSystemProvider, resource: &Resource) -> Result<()> {
        if provider.capabilities().is_readonly() {
            return Err(operation_error(
                format!("Unable to modify readonly file {resource}"),
                FileOperationResult::FilePermissionDenied,
            ));
        }
        Ok(())
    }

    // ---- resolve ----

    pub async fn resolve(
        &self,
        resource: &Resource,
        options: &ResolveFileOptions,
    ) -> Result<FileStat> {
        let provider = self.with_provider(resource).await?;
        self.do_resolve(provider.as_ref(), resource, options)
            .await
            .map_err(|err| match err.result() {
                FileOperationResult::FileNotFound => operation_error(
                    format!("Unable to resolve nonexistent file {resource}"),
                    FileOperationResult::FileNotFound,
                ),
                _ => wrap(format!("Unable to resolve file {resource}"), err),
            })
    }

    pub async fn resolve_metadata(
        &self,
        resource: &Resource,
        options: &ResolveFileOptions,
    ) -> Result<FileStatWithMetadata> {
        let options = ResolveFileOptions {
            resolve_metadata: true,
            ..options.clone()
        };
        self.resolve(resource, &options).await?.into_metadata().ok_or_else(|| {
            operation_error(
                format!("Incomplete metadata for {resource}"),
                FileOperationResult::FileOtherError,
            )
        })
    }

    async fn do_resolve(
        &self,
        provider: &dyn FileSystemProvider,
        resource: &Resource,
        options: &ResolveFileOptions,
    ) -> Result<FileStat> {
        let stat = provider.stat(resource).await?;
        to_file_stat(provider, resource.clone(), stat, None, options, resource).await
    }

    // ---- read ----

    pub async fn read_file(
        &self,
        resource: &Resource,
        options: &ReadFileOptions,
    ) -> Result<FileContent> {
        let provider = self.with_read_provider(resource).await?;
        self.do_read_file(provider.as_ref(), resource, options)
            .await
            .map_err(|err| wrap(format!("Unable to read file {resource}"), err))
    }

    async fn do_read_file(
        &self,
        provider: &dyn FileSystemProvider,
        resource: &Resource,
        options: &ReadFileOptions,
    ) -> Result<FileContent> {
        let stat = self.validate_read_file(provider, resource, options).await?;
        let value = self.read_bytes(provider, resource).await?;
        Ok(FileContent { stat, value })
    }

    async fn validate_read_file(
        &self,
        provider: &dyn FileSystemProvider,
        resource: &Resource,
        options: &ReadFileOptions,
    ) -> Result<FileStatWithMetadata> {
        let stat = provider.stat(resource).await?;
        if stat.file_type.is_directory() {
            return Err(operation_error(
                "Unable to read file that is actually a directory",
                FileOperationResult::FileIsDirectory,
            ));
        }
        let current = stat.etag();
        if let Some(expected) = options.etag.as_deref() {
            if expected != ETAG_DISABLED && expected == current {
                return Err(operation_error(
                    "File not modified since",
                    FileOperationResult::FileNotModifiedSince,
                ));
            }
        }
        if options.size_limit.is_some_and(|limit| stat.size > limit) {
            return Err(operation_error(
                "Unable to read file that is too large to open",
                FileOperationResult::FileTooLarge,
            ));
        }
        if self.config.max_in_memory_size.is_some_and(|limit| stat.size > limit) {
            return Err(operation_error(
                "Unable to read file that exceeds the memory limit",
                FileOperationResult::FileExceedsMemoryLimit,
            ));
        }
        Ok(metadata_of(resource, stat))
    }

    /// Whole-buffer read when available, handle based otherwise.
    async fn read_bytes(
        &self,
        provider: &dyn FileSystemProvider,
        resource: &Resource,
    ) -> Result<Bytes> {
        if let Some(rw) = has_read_write(provider) {
            return Ok(rw.read_file(resource).await?);
        }
        if let Some(orwc) = has_open_read_write_close(provider) {
            return Ok(self.read_buffered(orwc, resource).await?);
        }
        Err(FsError::Unsupported {
            scheme: resource.scheme().to_string(),
            operation: "reading",
        })
    }

    async fn read_buffered(
        &self,
        provider: &dyn FileOpenReadWriteCloseProvider,
        resource: &Resource,
    ) -> Result<Bytes, ProviderError> {
        let handle = provider.open(resource, FileOpenOptions { create: false }).await?;
        let read = async {
            let mut out = BytesMut::new();
            let mut chunk = vec![0u8; self.config.read_chunk_size.max(1)];
            let mut pos = 0u64;
            loop {
                let n = provider.read(handle, pos, &mut chunk).await?;
                if n == 0 {
                    break;
                }
                out.extend_from_slice(&chunk[..n]);
                pos += n as u64;
            }
            Ok::<_, ProviderError>(out.freeze())
        }
        .await;
        finish_handle(provider, handle, resource, read).await
    }

    // ---- write ----

    /// Writes `content` to `resource`, creating missing parent folders, and
    /// returns the metadata of the written file.
    pub async fn write_file(
        &self,
        resource: &Resource,
        content: impl Into<WriteContent>,
        options: Option<WriteFileOptions>,
    ) -> Result<FileStatWithMetadata> {
        let content = content.into();
        let provider = self.with_write_provider(resource).await?;
        Self::throw_if_readonly(provider.as_ref(), resource)?;

        if let Err(err) = self
            .do_write_file(provider.as_ref(), resource, content, options.as_ref())
            .await
        {
            let result = err.result();
            warn!(%resource, %result, "write failed: {err}");
            return Err(FileOperationError::new(
                format!("Unable to write file {resource} ({err})"),
                result,
            )
            .with_options(options)
            .into());
        }

        self.resolve_metadata(resource, &ResolveFileOptions::default()).await
    }

    async fn do_write_file(
        &self,
        provider: &dyn FileSystemProvider,
        resource: &Resource,
        content: WriteContent,
        options: Option<&WriteFileOptions>,
    ) -> Result<()> {
        let stat = self.validate_write_file(provider, resource, options).await?;
        if stat.is_none() {
            self.mkdirp(provider, &resource.dirname()).await?;
        }
        self.write_content(provider, resource, content).await
    }

    /// Stat of the existing file, or `None` when there is nothing at
    /// `resource` yet.
    async fn validate_write_file(
        &self,
        provider: &dyn FileSystemProvider,
        resource: &Resource,
        options: Option<&WriteFileOptions>,
    ) -> Result<Option<Stat>> {
        // any stat failure counts as "does not exist"
        let Ok(stat) = provider.stat(resource).await else {
            return Ok(None);
        };

        if stat.file_type.is_directory() {
            return Err(FileOperationError::new(
                format!("Unable to write file {resource} that is actually a directory"),
                FileOperationResult::FileIsDirectory,
            )
            .with_options(options.cloned())
            .into());
        }

        if let Some(WriteFileOptions {
            mtime: Some(expected_mtime),
            etag: Some(expected_etag),
        }) = options
        {
            if expected_etag != ETAG_DISABLED
                && *expected_mtime < stat.mtime
                && etag(Some(*expected_mtime), Some(stat.size)).as_deref()
                    != Some(expected_etag.as_str())
            {
                return Err(FileOperationError::new(
                    "File Modified Since",
                    FileOperationResult::FileModifiedSince,
                )
                .with_options(options.cloned())
                .into());
            }
        }

        Ok(Some(stat))
    }

    /// Creates `directory` and any missing ancestors. Folders that appear
    /// concurrently are tolerated.
    async fn mkdirp(&self, provider: &dyn FileSystemProvider, directory: &Resource) -> Result<()> {
        let mut directory = directory.clone();
        let mut missing: Vec<String> = Vec::new();

        while !directory.is_equal(&directory.dirname()) {
            match provider.stat(&directory).await {
                Ok(stat) if stat.file_type.is_directory() => break,
                Ok(_) => {
                    return Err(operation_error(
                        format!(
                            "Unable to create folder {directory} that already exists \
                             but is not a directory"
                        ),
                        FileOperationResult::FileNotDirectory,
                    ));
                }
                Err(err) if err.code == ProviderErrorCode::FileNotFound => {
                    missing.push(directory.basename().to_string());
                    directory = directory.dirname();
                }
                Err(err) => return Err(err.into()),
            }
        }

        for name in missing.iter().rev() {
            directory = directory.join(name);
            match provider.mkdir(&directory).await {
                Ok(()) => debug!(%directory, "created folder"),
                Err(err) if err.code == ProviderErrorCode::FileExists => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    async fn write_content(
        &self,
        provider: &dyn FileSystemProvider,
        resource: &Resource,
        content: WriteContent,
    ) -> Result<()> {
        let caps = provider.capabilities();
        let key = WriteQueue::key_for(caps, resource);
        match (has_read_write(provider), has_open_read_write_close(provider)) {
            (Some(rw), None) => self.do_write_unbuffered(rw, key, resource, content).await,
            (Some(rw), Some(_)) if content.is_buffer() => {
                self.do_write_unbuffered(rw, key, resource, content).await
            }
            (_, Some(orwc)) => self.do_write_buffered(orwc, key, resource, content).await,
            (None, None) => Err(FsError::Unsupported {
                scheme: resource.scheme().to_string(),
                operation: "writing",
            }),
        }
    }

    async fn do_write_unbuffered(
        &self,
        provider: &dyn FileReadWriteProvider,
        key: String,
        resource: &Resource,
        content: WriteContent,
    ) -> Result<()> {
        let buffer = content.into_bytes().await?;
        debug!(%resource, len = buffer.len(), "unbuffered write");
        let opts = FileWriteOptions {
            create: true,
            overwrite: true,
        };
        self.write_queue
            .queue(key, provider.write_file(resource, buffer, opts))
            .await?;
        Ok(())
    }

    async fn do_write_buffered(
        &self,
        provider: &dyn FileOpenReadWriteCloseProvider,
        key: String,
        resource: &Resource,
        content: WriteContent,
    ) -> Result<()> {
        let chunks = content.into_stream();
        debug!(%resource, "streamed write");
        self.write_queue
            .queue(key, async {
                let handle = provider.open(resource, FileOpenOptions { create: true }).await?;
                let written = write_stream(provider, handle, chunks).await;
                finish_handle(provider, handle, resource, written).await
            })
            .await?;
        Ok(())
    }

    // ---- folders, delete, move, copy ----

    pub async fn create_folder(&self, resource: &Resource) -> Result<FileStatWithMetadata> {
        let provider = self.with_provider(resource).await?;
        Self::throw_if_readonly(provider.as_ref(), resource)?;
        self.mkdirp(provider.as_ref(), resource)
            .await
            .map_err(|err| wrap(format!("Unable to create folder {resource}"), err))?;
        info!(%resource, "folder created");
        self.resolve_metadata(resource, &ResolveFileOptions::default()).await
    }

    pub async fn del(&self, resource: &Resource, options: FileDeleteOptions) -> Result<()> {
        let provider = self.with_provider(resource).await?;
        Self::throw_if_readonly(provider.as_ref(), resource)?;

        if options.use_trash && !provider.capabilities().has_trash() {
            return Err(operation_error(
                format!(
                    "Unable to delete file {resource} via trash because provider \
                     does not support it"
                ),
                FileOperationResult::FileOtherError,
            ));
        }
        let stat = provider.stat(resource).await.map_err(|_| {
            operation_error(
                format!("Unable to delete non-existing file {resource}"),
                FileOperationResult::FileNotFound,
            )
        })?;
        if !options.recursive && stat.file_type.is_directory() {
            let children = provider.readdir(resource).await?;
            if !children.is_empty() {
                return Err(operation_error(
                    format!("Unable to delete non-empty folder {resource}"),
                    FileOperationResult::FileOtherError,
                ));
            }
        }

        provider
            .delete(resource, options)
            .await
            .map_err(|err| wrap(format!("Unable to delete file {resource}"), err.into()))?;
        info!(%resource, "deleted");
        Ok(())
    }

    pub async fn move_to(
        &self,
        source: &Resource,
        target: &Resource,
        overwrite: bool,
    ) -> Result<FileStatWithMetadata> {
        let source_provider = self.with_provider(source).await?;
        Self::throw_if_readonly(source_provider.as_ref(), source)?;
        let target_provider = self.with_write_provider(target).await?;
        Self::throw_if_readonly(target_provider.as_ref(), target)?;

        self.do_move_copy(
            &source_provider,
            source,
            &target_provider,
            target,
            TransferMode::Move,
            overwrite,
        )
        .await
            .map_err(|err| wrap(format!("Unable to move '{source}' to '{target}'"), err))?;
        info!(%source, %target, "moved");
        self.resolve_metadata(target, &ResolveFileOptions::default()).await
    }

    pub async fn copy(
        &self,
        source: &Resource,
        target: &Resource,
        overwrite: bool,
    ) -> Result<FileStatWithMetadata> {
        let source_provider = self.with_read_provider(source).await?;
        let target_provider = self.with_write_provider(target).await?;
        Self::throw_if_readonly(target_provider.as_ref(), target)?;

        self.do_move_copy(
            &source_provider,
            source,
            &target_provider,
            target,
            TransferMode::Copy,
            overwrite,
        )
        .await
            .map_err(|err| wrap(format!("Unable to copy '{source}' to '{target}'"), err))?;
        info!(%source, %target, "copied");
        self.resolve_metadata(target, &ResolveFileOptions::default()).await
    }

    async fn do_move_copy(
        &self,
        source_provider: &Arc<dyn FileSystemProvider>,
        source: &Resource,
        target_provider: &Arc<dyn FileSystemProvider>,
        target: &Resource,
        mode: TransferMode,
        overwrite: bool,
    ) -> Result<()> {
        let same_provider = same_provider(source_provider, target_provider);
        let caps = source_provider.capabilities();
        // same file addressed with a different path case
        let case_change = same_provider
            && !source.is_equal(target)
            && WriteQueue::key_for(caps, source) == WriteQueue::key_for(caps, target);

        let source_stat = source_provider.stat(source).await?;

        if mode == TransferMode::Copy && case_change {
            return Err(operation_error(
                format!("Unable to copy when source '{source}' is same as target '{target}'"),
                FileOperationResult::FileOtherError,
            ));
        }
        if !case_change && source.is_equal_or_parent(target) {
            return Err(operation_error(
                format!(
                    "Unable to {} when source '{source}' is parent of target '{target}'",
                    mode.verb()
                ),
                FileOperationResult::FileOtherError,
            ));
        }

        if !case_change && target_provider.stat(target).await.is_ok() {
            if !overwrite {
                return Err(operation_error(
                    format!(
                        "Unable to {} '{source}' to '{target}' since a file already \
                         exists at destination",
                        mode.verb()
                    ),
                    FileOperationResult::FileMoveConflict,
                ));
            }
            if target.is_equal_or_parent(source) {
                return Err(operation_error(
                    format!(
                        "Unable to {} when target '{target}' is parent of source '{source}'",
                        mode.verb()
                    ),
                    FileOperationResult::FileOtherError,
                ));
            }
            target_provider
                .delete(target, FileDeleteOptions { recursive: true, use_trash: false })
                .await?;
        }

        self.mkdirp(target_provider.as_ref(), &target.dirname()).await?;

        match mode {
            TransferMode::Move if same_provider => {
                source_provider
                    .rename(source, target, FileOverwriteOptions { overwrite: true })
                    .await?;
            }
            TransferMode::Move => {
                self.copy_tree(
                    source_provider.as_ref(),
                    source,
                    source_stat,
                    target_provider.as_ref(),
                    target,
                )
                .await?;
                source_provider
                    .delete(source, FileDeleteOptions { recursive: true, use_trash: false })
                    .await?;
            }
            TransferMode::Copy => {
                let native = if same_provider {
                    has_folder_copy(source_provider.as_ref())
                } else {
                    None
                };
                match native {
                    Some(copier) => {
                        copier
                            .copy(source, target, FileOverwriteOptions { overwrite })
                            .await?
                    }
                    None => {
                        self.copy_tree(
                            source_provider.as_ref(),
                            source,
                            source_stat,
                            target_provider.as_ref(),
                            target,
                        )
                        .await?
                    }
                }
            }
        }
        Ok(())
    }

    /// Recursive content copy: folders are recreated, files go through the
    /// regular write path.
    fn copy_tree<'a>(
        &'a self,
        source_provider: &'a dyn FileSystemProvider,
        source: &'a Resource,
        source_stat: Stat,
        target_provider: &'a dyn FileSystemProvider,
        target: &'a Resource,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            if !source_stat.file_type.is_directory() {
                let content = self.read_bytes(source_provider, source).await?;
                return self
                    .write_content(target_provider, target, WriteContent::Buffer(content))
                    .await;
            }

            match target_provider.mkdir(target).await {
                Ok(()) => {}
                Err(err) if err.code == ProviderErrorCode::FileExists => {}
                Err(err) => return Err(err.into()),
            }
            for (name, _) in source_provider.readdir(source).await? {
                let child_source = source.join(&name);
                let child_target = target.join(&name);
                let child_stat = source_provider.stat(&child_source).await?;
                self.copy_tree(
                    source_provider,
                    &child_source,
                    child_stat,
                    target_provider,
                    &child_target,
                )
                .await?;
            }
            Ok(())
        }
        .boxed()
    }
}

/// Writes every chunk at increasing offsets, reissuing partial writes.
async fn write_stream(
    provider: &dyn FileOpenReadWriteCloseProvider,
    handle: FileHandle,
    mut chunks: ByteStream,
) -> Result<(), ProviderError> {
    let mut pos = 0u64;
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk?;
        if chunk.is_empty() {
            continue;
        }
        let mut written = 0usize;
        while written < chunk.len() {
            let n = provider
                .write(handle, pos + written as u64, &chunk[written..])
                .await?;
            if n == 0 {
                return Err(ProviderError::unknown(format!(
                    "provider accepted no bytes at offset {}",
                    pos + written as u64
                )));
            }
            written += n;
        }
        pos += chunk.len() as u64;
    }
    Ok(())
}

/// Closes `handle` exactly once. A close failure is reported only when the
/// work itself succeeded.
async fn finish_handle<T>(
    provider: &dyn FileOpenReadWriteCloseProvider,
    handle: FileHandle,
    resource: &Resource,
    outcome: Result<T, ProviderError>,
) -> Result<T, ProviderError> {
    let closed = provider.close(handle).await;
    match (outcome, closed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(close_err)) => Err(close_err),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(close_err)) => {
            warn!(%resource, "close failed after error: {close_err}");
            Err(err)
        }
    }
}

fn should_resolve_children(
    resource: &Resource,
    siblings: Option<usize>,
    options: &ResolveFileOptions,
    root: &Resource,
) -> bool {
    if resource.is_equal(root) {
        return true;
    }
    if options
        .resolve_to
        .iter()
        .any(|target| resource.is_equal_or_parent(target))
    {
        return true;
    }
    options.resolve_single_child_descendants && siblings == Some(1)
}

fn to_file_stat<'a>(
    provider: &'a dyn FileSystemProvider,
    resource: Resource,
    stat: Stat,
    siblings: Option<usize>,
    options: &'a ResolveFileOptions,
    root: &'a Resource,
) -> BoxFuture<'a, Result<FileStat>> {
    async move {
        let with_meta = options.resolve_metadata;
        let mut file_stat = FileStat {
            name: resource.basename().to_string(),
            file_type: stat.file_type,
            size: with_meta.then_some(stat.size),
            mtime: with_meta.then_some(stat.mtime),
            ctime: with_meta.then_some(stat.ctime),
            etag: with_meta.then(|| stat.etag()),
            children: None,
            resource,
        };

        if stat.file_type.is_directory()
            && should_resolve_children(&file_stat.resource, siblings, options, root)
        {
            let entries = provider.readdir(&file_stat.resource).await?;
            let count = entries.len();
            let mut children = Vec::with_capacity(count);
            for (name, _) in entries {
                let child = file_stat.resource.join(&name);
                match provider.stat(&child).await {
                    Ok(child_stat) => {
                        children.push(
                            to_file_stat(provider, child, child_stat, Some(count), options, root)
                                .await?,
                        );
                    }
                    Err(err) => warn!(%child, "skipping unresolvable child: {err}"),
                }
            }
            file_stat.children = Some(children);
        }
        Ok(file_stat)
    }
    .boxed()
}
