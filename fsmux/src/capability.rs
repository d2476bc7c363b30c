use bitflags::bitflags;

use crate::provider::{
    FileFolderCopyProvider, FileOpenReadWriteCloseProvider, FileReadWriteProvider,
    FileSystemProvider,
};

bitflags! {
    /// Operation groups and traits a provider advertises.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct Capabilities: u32 {
        /// Whole-buffer `read_file`/`write_file`.
        const FILE_READ_WRITE = 1 << 1;
        /// Handle based `open`/`read`/`write`/`close`.
        const FILE_OPEN_READ_WRITE_CLOSE = 1 << 2;
        /// Native copy of files and folders.
        const FILE_FOLDER_COPY = 1 << 3;
        const PATH_CASE_SENSITIVE = 1 << 10;
        const READONLY = 1 << 11;
        const TRASH = 1 << 12;
    }
}

impl Capabilities {
    pub fn has_read_write(self) -> bool {
        self.contains(Capabilities::FILE_READ_WRITE)
    }

    pub fn has_open_read_write_close(self) -> bool {
        self.contains(Capabilities::FILE_OPEN_READ_WRITE_CLOSE)
    }

    pub fn has_folder_copy(self) -> bool {
        self.contains(Capabilities::FILE_FOLDER_COPY)
    }

    pub fn is_path_case_sensitive(self) -> bool {
        self.contains(Capabilities::PATH_CASE_SENSITIVE)
    }

    pub fn is_readonly(self) -> bool {
        self.contains(Capabilities::READONLY)
    }

    pub fn has_trash(self) -> bool {
        self.contains(Capabilities::TRASH)
    }
}

/// Narrows to the whole-buffer interface when the provider currently
/// advertises it and supplies the operations.
pub fn has_read_write(provider: &dyn FileSystemProvider) -> Option<&dyn FileReadWriteProvider> {
    if provider.capabilities().has_read_write() {
        provider.as_read_write()
    } else {
        None
    }
}

/// Narrows to the handle based streaming interface.
pub fn has_open_read_write_close(
    provider: &dyn FileSystemProvider,
) -> Option<&dyn FileOpenReadWriteCloseProvider> {
    if provider.capabilities().has_open_read_write_close() {
        provider.as_open_read_write_close()
    } else {
        None
    }
}

pub fn has_folder_copy(provider: &dyn FileSystemProvider) -> Option<&dyn FileFolderCopyProvider> {
    if provider.capabilities().has_folder_copy() {
        provider.as_folder_copy()
    } else {
        None
    }
}

/// Capability groups the provider claims without supplying the matching
/// operations.
pub fn unsupported_claims(provider: &dyn FileSystemProvider) -> Capabilities {
    let caps = provider.capabilities();
    let mut missing = Capabilities::empty();
    if caps.has_read_write() && provider.as_read_write().is_none() {
        missing |= Capabilities::FILE_READ_WRITE;
    }
    if caps.has_open_read_write_close() && provider.as_open_read_write_close().is_none() {
        missing |= Capabilities::FILE_OPEN_READ_WRITE_CLOSE;
    }
    if caps.has_folder_copy() && provider.as_folder_copy().is_none() {
        missing |= Capabilities::FILE_FOLDER_COPY;
    }
    missing
}
