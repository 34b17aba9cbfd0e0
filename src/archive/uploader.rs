//! Copy a responder's reply into the archive location

use std::sync::Arc;

use super::{ArchiveReference, ArchiveStore, CaptionPolicy, MediaSource, UploadItem, UploadPayload};
use crate::responder::{AttachmentKind, Delivery, MediaItem, MediaSet};
use crate::{Error, Result};

/// Most items one album may hold
pub const MAX_ALBUM_SIZE: usize = 10;

/// Persists retrieved media into the archive store
pub struct StorageUploader {
    store: Arc<dyn ArchiveStore>,
    attribution: String,
}

impl StorageUploader {
    /// Create an uploader that signs captions with `attribution`
    #[must_use]
    pub fn new(store: Arc<dyn ArchiveStore>, attribution: impl Into<String>) -> Self {
        Self {
            store,
            attribution: attribution.into(),
        }
    }

    /// Underlying store
    #[must_use]
    pub fn store(&self) -> &Arc<dyn ArchiveStore> {
        &self.store
    }

    /// Archive `media` and return where it landed
    ///
    /// Items without a forwardable handle are downloaded from `source` first.
    /// Albums above [`MAX_ALBUM_SIZE`] lose their excess items. The reference
    /// is only returned once the whole upload succeeded.
    ///
    /// # Errors
    ///
    /// Returns `Error::Archive` for an empty set, download or store errors
    /// otherwise
    pub async fn upload(
        &self,
        media: &MediaSet,
        delivery: Delivery,
        caption: CaptionPolicy,
        source: &dyn MediaSource,
    ) -> Result<ArchiveReference> {
        let mut chosen: Vec<&MediaItem> = match delivery {
            Delivery::Album => media.items().iter().collect(),
            Delivery::Single | Delivery::PreferVideo => media.preferred().into_iter().collect(),
        };
        if chosen.is_empty() {
            return Err(Error::Archive("no media to upload".to_string()));
        }
        if chosen.len() > MAX_ALBUM_SIZE {
            tracing::warn!(
                received = chosen.len(),
                kept = MAX_ALBUM_SIZE,
                "album too large, dropping excess items"
            );
            chosen.truncate(MAX_ALBUM_SIZE);
        }

        let original_caption = chosen.iter().find_map(|item| item.caption.as_deref());
        let caption = caption.apply(original_caption, &self.attribution);

        let mut items = Vec::with_capacity(chosen.len());
        for item in &chosen {
            items.push(prepare(item, source).await?);
        }

        let reference = if items.len() == 1 {
            let item = items.remove(0);
            self.store.upload_media(item, &caption).await?
        } else {
            let count = items.len();
            let reference = self.store.upload_album(items, &caption).await?;
            tracing::info!(count, %reference, "album archived");
            reference
        };

        tracing::debug!(%reference, "media archived");
        Ok(reference)
    }
}

/// Build the upload for one item, downloading it when there is no handle
async fn prepare(item: &MediaItem, source: &dyn MediaSource) -> Result<UploadItem> {
    let attachment = &item.attachment;
    let kind = kind_for(item);

    let payload = if let Some(file_id) = &attachment.file_id {
        UploadPayload::Remote {
            file_id: file_id.clone(),
        }
    } else {
        tracing::debug!(message_id = item.message_id, "no file handle, downloading");
        let bytes = source.download(item.message_id).await?;
        if bytes.is_empty() {
            return Err(Error::Archive(format!(
                "download of message {} returned no data",
                item.message_id
            )));
        }
        UploadPayload::Buffer {
            bytes,
            file_name: attachment
                .file_name
                .clone()
                .unwrap_or_else(|| default_file_name(item.message_id, kind)),
            mime_type: attachment.mime_type.clone(),
        }
    };

    Ok(UploadItem { kind, payload })
}

/// Upload kind follows the poller's classification, so MIME-typed documents
/// are archived as what they really are
fn kind_for(item: &MediaItem) -> AttachmentKind {
    use crate::responder::MediaKind;

    match item.kind {
        MediaKind::Video => AttachmentKind::Video,
        MediaKind::Photo => AttachmentKind::Photo,
        MediaKind::Audio => AttachmentKind::Audio,
        MediaKind::Document | MediaKind::LinkPreview | MediaKind::Text => AttachmentKind::Document,
    }
}

fn default_file_name(message_id: i64, kind: AttachmentKind) -> String {
    let extension = match kind {
        AttachmentKind::Video => "mp4",
        AttachmentKind::Photo => "jpg",
        AttachmentKind::Audio => "mp3",
        AttachmentKind::Document => "bin",
    };
    format!("{message_id}.{extension}")
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::responder::{Attachment, ConversationMessage};

    #[derive(Default)]
    struct RecordingStore {
        singles: Mutex<Vec<(UploadItem, String)>>,
        albums: Mutex<Vec<(Vec<UploadItem>, String)>>,
        fail_albums: bool,
    }

    #[async_trait]
    impl ArchiveStore for RecordingStore {
        async fn upload_media(&self, item: UploadItem, caption: &str) -> Result<ArchiveReference> {
            self.singles.lock().unwrap().push((item, caption.to_string()));
            Ok(ArchiveReference {
                archive_location_id: -100,
                message_id: 500,
            })
        }

        async fn upload_album(
            &self,
            items: Vec<UploadItem>,
            caption: &str,
        ) -> Result<ArchiveReference> {
            if self.fail_albums {
                return Err(Error::Archive("item 3 rejected".to_string()));
            }
            let count = i64::try_from(items.len()).unwrap();
            self.albums.lock().unwrap().push((items, caption.to_string()));
            Ok(ArchiveReference {
                archive_location_id: -100,
                message_id: 600 + count - 1,
            })
        }

        async fn fetch_media(&self, _: &ArchiveReference) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }

        async fn verify(&self) -> Result<()> {
            Ok(())
        }
    }

    struct FixedSource(Vec<u8>);

    #[async_trait]
    impl MediaSource for FixedSource {
        async fn download(&self, _: i64) -> Result<Vec<u8>> {
            Ok(self.0.clone())
        }
    }

    fn item(id: i64, kind: AttachmentKind, file_id: Option<&str>, caption: Option<&str>) -> MediaItem {
        MediaItem::from_message(&ConversationMessage {
            id,
            text: caption.map(String::from),
            attachment: Some(Attachment {
                kind,
                file_id: file_id.map(String::from),
                mime_type: None,
                file_name: None,
            }),
            ..ConversationMessage::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn single_item_uses_handle_and_fixed_caption() {
        let store = Arc::new(RecordingStore::default());
        let uploader = StorageUploader::new(store.clone(), "📥 @ArchiveBot");
        let media = MediaSet::new(vec![item(1, AttachmentKind::Video, Some("vid"), Some("via @x"))]);

        let reference = uploader
            .upload(&media, Delivery::Single, CaptionPolicy::Fixed, &FixedSource(Vec::new()))
            .await
            .unwrap();

        assert_eq!(reference.message_id, 500);
        let singles = store.singles.lock().unwrap();
        assert_eq!(singles.len(), 1);
        assert_eq!(
            singles[0].0.payload,
            UploadPayload::Remote {
                file_id: "vid".to_string()
            }
        );
        assert_eq!(singles[0].1, "📥 @ArchiveBot");
    }

    #[tokio::test]
    async fn album_capped_at_max_size() {
        let store = Arc::new(RecordingStore::default());
        let uploader = StorageUploader::new(store.clone(), "sig");
        let items = (1..=12)
            .map(|id| item(id, AttachmentKind::Photo, Some("p"), None))
            .collect();

        let reference = uploader
            .upload(
                &MediaSet::new(items),
                Delivery::Album,
                CaptionPolicy::Fixed,
                &FixedSource(Vec::new()),
            )
            .await
            .unwrap();

        let albums = store.albums.lock().unwrap();
        assert_eq!(albums[0].0.len(), MAX_ALBUM_SIZE);
        assert_eq!(reference.message_id, 609);
    }

    #[tokio::test]
    async fn missing_handle_downloads_into_buffer() {
        let store = Arc::new(RecordingStore::default());
        let uploader = StorageUploader::new(store.clone(), "sig");
        let media = MediaSet::new(vec![item(7, AttachmentKind::Video, None, None)]);

        uploader
            .upload(&media, Delivery::Single, CaptionPolicy::Fixed, &FixedSource(vec![1, 2, 3]))
            .await
            .unwrap();

        let singles = store.singles.lock().unwrap();
        assert_eq!(
            singles[0].0.payload,
            UploadPayload::Buffer {
                bytes: vec![1, 2, 3],
                file_name: "7.mp4".to_string(),
                mime_type: None,
            }
        );
    }

    #[tokio::test]
    async fn prefer_video_picks_one_item() {
        let store = Arc::new(RecordingStore::default());
        let uploader = StorageUploader::new(store.clone(), "sig");
        let media = MediaSet::new(vec![
            item(1, AttachmentKind::Photo, Some("thumb"), None),
            item(2, AttachmentKind::Video, Some("clip"), Some("Nice\nvia @twittervid_bot")),
        ]);

        uploader
            .upload(
                &media,
                Delivery::PreferVideo,
                CaptionPolicy::RewriteProvenance,
                &FixedSource(Vec::new()),
            )
            .await
            .unwrap();

        let singles = store.singles.lock().unwrap();
        assert_eq!(singles.len(), 1);
        assert_eq!(singles[0].1, "Nice\n\nsig");
        assert!(store.albums.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn partial_album_failure_is_one_failure() {
        let store = Arc::new(RecordingStore {
            fail_albums: true,
            ..RecordingStore::default()
        });
        let uploader = StorageUploader::new(store, "sig");
        let media = MediaSet::new(vec![
            item(1, AttachmentKind::Photo, Some("a"), None),
            item(2, AttachmentKind::Photo, Some("b"), None),
        ]);

        let err = uploader
            .upload(&media, Delivery::Album, CaptionPolicy::Fixed, &FixedSource(Vec::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Archive(_)));
    }

    #[tokio::test]
    async fn empty_set_is_rejected() {
        let uploader = StorageUploader::new(Arc::new(RecordingStore::default()), "sig");
        let err = uploader
            .upload(
                &MediaSet::default(),
                Delivery::Album,
                CaptionPolicy::Fixed,
                &FixedSource(Vec::new()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Archive(_)));
    }
}
