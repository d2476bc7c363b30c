//! Change notification payloads broadcast by providers and the file service.

use crate::capability::Capabilities;
use crate::uri::Resource;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FileChangeType {
    Updated,
    Added,
    Deleted,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileChange {
    pub change_type: FileChangeType,
    pub resource: Resource,
}

impl FileChange {
    pub fn added(resource: Resource) -> Self {
        Self {
            change_type: FileChangeType::Added,
            resource,
        }
    }

    pub fn updated(resource: Resource) -> Self {
        Self {
            change_type: FileChangeType::Updated,
            resource,
        }
    }

    pub fn deleted(resource: Resource) -> Self {
        Self {
            change_type: FileChangeType::Deleted,
            resource,
        }
    }
}

/// A provider was registered (`added`) or its registration was disposed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderRegistrationEvent {
    pub scheme: String,
    pub added: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderCapabilitiesEvent {
    pub scheme: String,
    pub capabilities: Capabilities,
}
