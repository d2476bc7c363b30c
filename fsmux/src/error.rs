//! Error taxonomy.
//!
//! Providers fail with a [`ProviderError`] tagged by a [`ProviderErrorCode`].
//! The service reports failures as [`FsError`], and every `FsError` maps to
//! exactly one [`FileOperationResult`] through [`to_file_operation_result`].

use std::fmt;
use std::io;

use thiserror::Error;

use crate::capability::Capabilities;
use crate::service::WriteFileOptions;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProviderErrorCode {
    FileExists,
    FileNotFound,
    FileNotADirectory,
    FileIsADirectory,
    NoPermissions,
    Unavailable,
    Unknown,
}

const MARKER_SUFFIX: &str = " (FileSystemError)";

impl ProviderErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FileExists => "EntryExists",
            Self::FileNotFound => "EntryNotFound",
            Self::FileNotADirectory => "EntryNotADirectory",
            Self::FileIsADirectory => "EntryIsADirectory",
            Self::NoPermissions => "NoPermissions",
            Self::Unavailable => "Unavailable",
            Self::Unknown => "Unknown",
        }
    }

    /// Inverse of [`ProviderErrorCode::as_str`]; unrecognized names are
    /// `Unknown`.
    pub fn from_name(name: &str) -> Self {
        match name {
            "EntryExists" => Self::FileExists,
            "EntryNotFound" => Self::FileNotFound,
            "EntryNotADirectory" => Self::FileNotADirectory,
            "EntryIsADirectory" => Self::FileIsADirectory,
            "NoPermissions" => Self::NoPermissions,
            "Unavailable" => Self::Unavailable,
            _ => Self::Unknown,
        }
    }

    /// Error name of the form `"<code> (FileSystemError)"`, used when an error
    /// crosses a boundary that only preserves strings.
    pub fn marked_name(self) -> String {
        format!("{}{MARKER_SUFFIX}", self.as_str())
    }

    pub fn from_marked_name(name: &str) -> Self {
        name.strip_suffix(MARKER_SUFFIX)
            .map(Self::from_name)
            .unwrap_or(Self::Unknown)
    }
}

impl fmt::Display for ProviderErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{message} ({code})")]
pub struct ProviderError {
    pub code: ProviderErrorCode,
    pub message: String,
}

impl ProviderError {
    pub fn new(code: ProviderErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn exists(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::FileExists, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::FileNotFound, message)
    }

    pub fn not_a_directory(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::FileNotADirectory, message)
    }

    pub fn is_a_directory(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::FileIsADirectory, message)
    }

    pub fn no_permissions(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::NoPermissions, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::Unavailable, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::Unknown, message)
    }
}

impl From<io::Error> for ProviderError {
    fn from(err: io::Error) -> Self {
        ProviderError::new(io_kind_code(err.kind()), err.to_string())
    }
}

impl From<anyhow::Error> for ProviderError {
    fn from(err: anyhow::Error) -> Self {
        if let Some(provider_err) = err.downcast_ref::<ProviderError>() {
            return provider_err.clone();
        }
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            return ProviderError::new(io_kind_code(io_err.kind()), err.to_string());
        }
        ProviderError::unknown(err.to_string())
    }
}

fn io_kind_code(kind: io::ErrorKind) -> ProviderErrorCode {
    match kind {
        io::ErrorKind::NotFound => ProviderErrorCode::FileNotFound,
        io::ErrorKind::AlreadyExists => ProviderErrorCode::FileExists,
        io::ErrorKind::PermissionDenied => ProviderErrorCode::NoPermissions,
        io::ErrorKind::NotADirectory => ProviderErrorCode::FileNotADirectory,
        io::ErrorKind::IsADirectory => ProviderErrorCode::FileIsADirectory,
        _ => ProviderErrorCode::Unknown,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FileOperationResult {
    FileIsDirectory,
    FileNotFound,
    FileNotModifiedSince,
    FileModifiedSince,
    FileMoveConflict,
    FileReadOnly,
    FilePermissionDenied,
    FileTooLarge,
    FileInvalidPath,
    FileExceedsMemoryLimit,
    FileNotDirectory,
    FileOtherError,
}

impl FileOperationResult {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FileIsDirectory => "FILE_IS_DIRECTORY",
            Self::FileNotFound => "FILE_NOT_FOUND",
            Self::FileNotModifiedSince => "FILE_NOT_MODIFIED_SINCE",
            Self::FileModifiedSince => "FILE_MODIFIED_SINCE",
            Self::FileMoveConflict => "FILE_MOVE_CONFLICT",
            Self::FileReadOnly => "FILE_READ_ONLY",
            Self::FilePermissionDenied => "FILE_PERMISSION_DENIED",
            Self::FileTooLarge => "FILE_TOO_LARGE",
            Self::FileInvalidPath => "FILE_INVALID_PATH",
            Self::FileExceedsMemoryLimit => "FILE_EXCEEDS_MEMORY_LIMIT",
            Self::FileNotDirectory => "FILE_NOT_DIRECTORY",
            Self::FileOtherError => "FILE_OTHER_ERROR",
        }
    }
}

impl fmt::Display for FileOperationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ProviderErrorCode> for FileOperationResult {
    fn from(code: ProviderErrorCode) -> Self {
        match code {
            ProviderErrorCode::FileNotFound => Self::FileNotFound,
            ProviderErrorCode::FileIsADirectory => Self::FileIsDirectory,
            ProviderErrorCode::FileNotADirectory => Self::FileNotDirectory,
            ProviderErrorCode::NoPermissions => Self::FilePermissionDenied,
            ProviderErrorCode::FileExists => Self::FileMoveConflict,
            ProviderErrorCode::Unavailable | ProviderErrorCode::Unknown => Self::FileOtherError,
        }
    }
}

/// A failed file operation with its result code and, for writes, the options
/// the caller passed in.
#[derive(Clone, Debug, Error)]
#[error("{message}")]
pub struct FileOperationError {
    pub message: String,
    pub result: FileOperationResult,
    pub options: Option<WriteFileOptions>,
}

impl FileOperationError {
    pub fn new(message: impl Into<String>, result: FileOperationResult) -> Self {
        Self {
            message: message.into(),
            result,
            options: None,
        }
    }

    pub fn with_options(mut self, options: Option<WriteFileOptions>) -> Self {
        self.options = options;
        self
    }
}

#[derive(Debug, Error)]
pub enum FsError {
    #[error(transparent)]
    Operation(#[from] FileOperationError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("No file system provider found for resource {0}")]
    NoProvider(String),

    #[error("File system provider for scheme '{scheme}' does not support {operation}")]
    Unsupported {
        scheme: String,
        operation: &'static str,
    },

    #[error(
        "File system provider for scheme '{scheme}' claims {claimed:?} without implementing it"
    )]
    CapabilityMismatch {
        scheme: String,
        claimed: Capabilities,
    },

    #[error(transparent)]
    Resource(#[from] crate::uri::ResourceParseError),
}

impl FsError {
    pub fn result(&self) -> FileOperationResult {
        to_file_operation_result(self)
    }

    /// Provider error code carried by this error; anything untagged is
    /// `Unknown`.
    pub fn provider_code(&self) -> ProviderErrorCode {
        match self {
            FsError::Provider(err) => err.code,
            _ => ProviderErrorCode::Unknown,
        }
    }
}

impl From<io::Error> for FsError {
    fn from(err: io::Error) -> Self {
        FsError::Provider(err.into())
    }
}

pub fn to_file_operation_result(err: &FsError) -> FileOperationResult {
    match err {
        FsError::Operation(op) => op.result,
        FsError::Resource(_) => FileOperationResult::FileInvalidPath,
        other => other.provider_code().into(),
    }
}

pub type Result<T, E = FsError> = std::result::Result<T, E>;
