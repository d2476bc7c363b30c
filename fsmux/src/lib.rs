//! fsmux: a scheme-routed virtual file system layer.
//!
//! Providers register for a URI scheme and advertise what they can do through
//! [`Capabilities`]. The [`FileService`] resolves resources to providers,
//! activating them on demand, and runs writes through a per-resource queue
//! with dirty-write detection and automatic parent folder creation.

pub mod capability;
pub mod config;
pub mod demo;
pub mod error;
pub mod etag;
pub mod events;
pub mod memory;
pub mod provider;
pub mod registry;
pub mod service;
pub mod stat;
pub mod uri;
pub mod write_queue;

pub use capability::Capabilities;
pub use config::FileServiceConfig;
pub use error::{
    FileOperationError, FileOperationResult, FsError, ProviderError, ProviderErrorCode,
    to_file_operation_result,
};
pub use etag::{ETAG_DISABLED, etag};
pub use events::{FileChange, FileChangeType, ProviderCapabilitiesEvent, ProviderRegistrationEvent};
pub use memory::InMemoryFileSystemProvider;
pub use provider::{
    FileFolderCopyProvider, FileOpenReadWriteCloseProvider, FileReadWriteProvider,
    FileSystemProvider,
};
pub use registry::{ActivationListenerHandle, ProviderRegistration, WillActivateEvent};
pub use service::{
    FileService, ReadFileOptions, ResolveFileOptions, WriteContent, WriteFileOptions,
};
pub use stat::{FileContent, FileStat, FileStatWithMetadata, FileType, Stat};
pub use uri::Resource;
