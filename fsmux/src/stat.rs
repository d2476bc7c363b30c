use bitflags::bitflags;
use bytes::Bytes;

use crate::etag::etag;
use crate::uri::Resource;

bitflags! {
    /// Kind of a file system entry. A symbolic link also carries the kind of
    /// its target, e.g. `DIRECTORY | SYMBOLIC_LINK`.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct FileType: u32 {
        const UNKNOWN = 0;
        const FILE = 1;
        const DIRECTORY = 2;
        const SYMBOLIC_LINK = 64;
    }
}

impl FileType {
    pub fn is_file(self) -> bool {
        self.contains(FileType::FILE)
    }

    pub fn is_directory(self) -> bool {
        self.contains(FileType::DIRECTORY)
    }

    pub fn is_symbolic_link(self) -> bool {
        self.contains(FileType::SYMBOLIC_LINK)
    }
}

/// Minimal stat reported by providers. Times are milliseconds since the unix
/// epoch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Stat {
    pub file_type: FileType,
    pub mtime: u64,
    pub ctime: u64,
    pub size: u64,
}

impl Stat {
    pub fn etag(&self) -> String {
        etag(Some(self.mtime), Some(self.size)).unwrap_or_default()
    }
}

/// Resolved entry; metadata is present when it was requested.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileStat {
    pub resource: Resource,
    pub name: String,
    pub file_type: FileType,
    pub size: Option<u64>,
    pub mtime: Option<u64>,
    pub ctime: Option<u64>,
    pub etag: Option<String>,
    pub children: Option<Vec<FileStat>>,
}

impl FileStat {
    pub fn is_file(&self) -> bool {
        self.file_type.is_file()
    }

    pub fn is_directory(&self) -> bool {
        self.file_type.is_directory()
    }

    pub fn is_symbolic_link(&self) -> bool {
        self.file_type.is_symbolic_link()
    }

    /// Converts into the metadata flavor. Fails if this entry or any resolved
    /// child lacks a metadata field.
    pub fn into_metadata(self) -> Option<FileStatWithMetadata> {
        let children = match self.children {
            Some(children) => Some(
                children
                    .into_iter()
                    .map(FileStat::into_metadata)
                    .collect::<Option<Vec<_>>>()?,
            ),
            None => None,
        };
        Some(FileStatWithMetadata {
            resource: self.resource,
            name: self.name,
            file_type: self.file_type,
            size: self.size?,
            mtime: self.mtime?,
            ctime: self.ctime?,
            etag: self.etag?,
            children,
        })
    }
}

/// Resolved entry with every metadata field present.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileStatWithMetadata {
    pub resource: Resource,
    pub name: String,
    pub file_type: FileType,
    pub size: u64,
    pub mtime: u64,
    pub ctime: u64,
    pub etag: String,
    pub children: Option<Vec<FileStatWithMetadata>>,
}

impl FileStatWithMetadata {
    pub fn is_file(&self) -> bool {
        self.file_type.is_file()
    }

    pub fn is_directory(&self) -> bool {
        self.file_type.is_directory()
    }

    pub fn is_symbolic_link(&self) -> bool {
        self.file_type.is_symbolic_link()
    }
}

/// Content of a file together with the stat it was read at.
#[derive(Clone, Debug)]
pub struct FileContent {
    pub stat: FileStatWithMetadata,
    pub value: Bytes,
}
