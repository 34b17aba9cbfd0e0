//! Archive storage for retrieved media
//!
//! Media is copied into an archive location (a storage chat) and addressed
//! afterwards by an [`ArchiveReference`], which is what the cache stores.

pub mod caption;
pub mod uploader;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::responder::AttachmentKind;

pub use caption::CaptionPolicy;
pub use uploader::{MAX_ALBUM_SIZE, StorageUploader};

/// Stable address of archived media
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArchiveReference {
    /// Archive location (storage chat) id
    pub archive_location_id: i64,
    /// Message id within the archive location
    pub message_id: i64,
}

impl fmt::Display for ArchiveReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.archive_location_id, self.message_id)
    }
}

/// Where the bytes of an upload come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadPayload {
    /// File handle the store can forward without transferring bytes
    Remote {
        /// Transport file id
        file_id: String,
    },
    /// Bytes downloaded into memory
    Buffer {
        /// File contents
        bytes: Vec<u8>,
        /// Name to upload under
        file_name: String,
        /// MIME type, when known
        mime_type: Option<String>,
    },
}

/// One file to archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadItem {
    /// Kind, which decides how the store sends it
    pub kind: AttachmentKind,
    /// Contents
    pub payload: UploadPayload,
}

/// Archive location the uploader writes into
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    /// Archive a single file
    async fn upload_media(&self, item: UploadItem, caption: &str) -> Result<ArchiveReference>;

    /// Archive files as one album; the caption goes on the first item
    ///
    /// Either every item is archived or an error is returned.
    async fn upload_album(&self, items: Vec<UploadItem>, caption: &str) -> Result<ArchiveReference>;

    /// Download archived media for redelivery
    async fn fetch_media(&self, reference: &ArchiveReference) -> Result<Vec<u8>>;

    /// Check the archive location is reachable
    async fn verify(&self) -> Result<()>;
}

/// Source of bytes for media that has no forwardable handle
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Download the file attached to `message_id`
    async fn download(&self, message_id: i64) -> Result<Vec<u8>>;
}

#[async_trait]
impl MediaSource for crate::responder::ExternalBotSession {
    async fn download(&self, message_id: i64) -> Result<Vec<u8>> {
        self.download_attachment(message_id).await
    }
}
