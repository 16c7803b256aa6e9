//! Attachment store seam.
//!
//! Submission code and problem test cases are opaque blobs owned by an
//! external store; the judge only ever downloads them.

use async_trait::async_trait;
use std::path::PathBuf;

use super::StagingError;
use crate::domain::Attachment;

/// Read access to attachment contents.
#[async_trait]
pub(crate) trait AttachmentStore: Send + Sync {
    /// Returns the raw bytes of an attachment.
    async fn download(&self, attachment: &Attachment) -> Result<Vec<u8>, StagingError>;
}

/// Attachments stored as `<root>/<attachment id>` files.
#[derive(Debug, Clone)]
pub(crate) struct FsAttachmentStore {
    root: PathBuf,
}

impl FsAttachmentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, attachment: &Attachment) -> PathBuf {
        self.root.join(attachment.id.to_string())
    }
}

#[async_trait]
impl AttachmentStore for FsAttachmentStore {
    async fn download(&self, attachment: &Attachment) -> Result<Vec<u8>, StagingError> {
        let path = self.path_for(attachment);
        tokio::fs::read(&path)
            .await
            .map_err(|source| StagingError::AttachmentUnreadable {
                filename: attachment.filename.clone(),
                id: attachment.id.to_string(),
                source,
            })
    }
}

/// Attachments held in memory, for tests.
#[cfg(test)]
#[derive(Debug, Default, Clone)]
pub(crate) struct MemoryAttachmentStore {
    blobs: std::sync::Arc<std::sync::Mutex<std::collections::HashMap<uuid::Uuid, Vec<u8>>>>,
}

#[cfg(test)]
impl MemoryAttachmentStore {
    pub fn insert(&self, attachment: &Attachment, bytes: impl Into<Vec<u8>>) {
        self.blobs
            .lock()
            .unwrap()
            .insert(attachment.id, bytes.into());
    }
}

#[cfg(test)]
#[async_trait]
impl AttachmentStore for MemoryAttachmentStore {
    async fn download(&self, attachment: &Attachment) -> Result<Vec<u8>, StagingError> {
        self.blobs
            .lock()
            .unwrap()
            .get(&attachment.id)
            .cloned()
            .ok_or_else(|| StagingError::AttachmentUnreadable {
                filename: attachment.filename.clone(),
                id: attachment.id.to_string(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            })
    }
}
