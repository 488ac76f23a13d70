//! Media sync engine
//!
//! Per-album live media listing, the upload pipeline and deletion.
//!
//! ## Upload pipeline
//!
//! ```text
//! upload(blob, album, uploader)
//!   1. put primary blob       albums/{album}/{token}.jpg|mp4
//!   2. video only: extract + put thumbnail  albums/{album}/thumbs/{token}.jpg
//!   3. write media record     albums/{album}/media/{id}
//!   4. touch album updatedAt  (best effort)
//!   5. fan-out content-added to every other member  (best effort)
//! ```
//!
//! A blob without a record is an orphan nobody ever sees. A record only
//! becomes visible through [`MediaSyncEngine::observe`] once it is complete,
//! so consumers never see a video without its thumbnail.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::blob::{
    media_blob_path, thumbnail_blob_path, BlobStore, MediaBlob, ThumbnailExtractor,
};
use crate::config::SyncConfig;
use crate::error::{AlbumError, AlbumResult};
use crate::identity::{require_user, IdentityProvider};
use crate::live::LiveQuery;
use crate::notification::{FanOut, NotificationHub};
use crate::remote::{media_collection, Direction, Document, DocumentStore, FieldUpdate, Query, ALBUMS};
use crate::types::{
    now_millis, Album, AlbumId, BatchReport, ItemFailure, MediaId, MediaItem, MediaType,
    NotificationKind, UserId,
};

/// Bytes uploaded during one session
///
/// Constructed by whoever owns the session and shared with the engine.
#[derive(Debug, Default)]
pub struct UsageMeter {
    bytes: AtomicU64,
    uploads: AtomicU64,
}

impl UsageMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, bytes: u64) {
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
        self.uploads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_uploaded(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    pub fn uploads(&self) -> u64 {
        self.uploads.load(Ordering::Relaxed)
    }
}

/// Observable state of a bulk upload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadProgress {
    pub uploaded_count: usize,
    pub total_count: usize,
    pub failures: Vec<ItemFailure>,
    pub finished: bool,
}

impl UploadProgress {
    /// Items that succeeded or failed so far
    pub fn processed(&self) -> usize {
        self.uploaded_count + self.failures.len()
    }

    pub fn report(&self) -> BatchReport {
        BatchReport {
            total: self.total_count,
            succeeded: self.uploaded_count,
            failures: self.failures.clone(),
        }
    }
}

/// Handle to a running bulk upload
pub struct BulkUpload {
    progress: watch::Receiver<UploadProgress>,
    cancel: CancellationToken,
    task: JoinHandle<UploadProgress>,
}

impl BulkUpload {
    pub fn progress(&self) -> UploadProgress {
        self.progress.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<UploadProgress> {
        self.progress.clone()
    }

    /// Stop starting new items. Items already in flight still complete;
    /// the rest are reported as cancelled failures.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the upload to finish and return the final progress.
    pub async fn finish(self) -> AlbumResult<UploadProgress> {
        self.task
            .await
            .map_err(|e| AlbumError::Storage(format!("bulk upload task failed: {}", e)))
    }
}

/// Live media listing, uploads and deletion for albums
#[derive(Clone)]
pub struct MediaSyncEngine {
    store: Arc<dyn DocumentStore>,
    blobs: Arc<dyn BlobStore>,
    thumbnails: Arc<dyn ThumbnailExtractor>,
    identity: Arc<dyn IdentityProvider>,
    notifications: NotificationHub,
    usage: Arc<UsageMeter>,
    config: SyncConfig,
}

impl MediaSyncEngine {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        blobs: Arc<dyn BlobStore>,
        thumbnails: Arc<dyn ThumbnailExtractor>,
        identity: Arc<dyn IdentityProvider>,
        notifications: NotificationHub,
        usage: Arc<UsageMeter>,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            blobs,
            thumbnails,
            identity,
            notifications,
            usage,
            config,
        }
    }

    pub fn usage(&self) -> &UsageMeter {
        &self.usage
    }

    /// Complete media items of an album, newest first.
    pub fn observe(&self, album_id: &AlbumId) -> LiveQuery<MediaItem> {
        let query = Query::collection(media_collection(album_id))
            .order_by("createdAt", Direction::Descending);
        LiveQuery::spawn(
            self.store.as_ref(),
            query,
            format!("media:{}", album_id),
            decode_complete_item,
        )
    }

    /// Upload one photo or video into an album.
    ///
    /// # Errors
    ///
    /// - `Unauthorized` if `uploader` is not the signed-in user or not a member
    /// - `NotFound` if the album does not exist
    /// - `TransientIo` if a blob or the record could not be written
    pub async fn upload(
        &self,
        blob: MediaBlob,
        album_id: &AlbumId,
        uploader: &UserId,
    ) -> AlbumResult<MediaItem> {
        let caller = require_user(self.identity.as_ref())?;
        if &caller != uploader {
            return Err(AlbumError::Unauthorized(format!(
                "signed in as {}, not {}",
                caller, uploader
            )));
        }
        if blob.is_empty() {
            return Err(AlbumError::InvalidInput("media payload is empty".into()));
        }

        let album = self.load_album(album_id).await?;
        if !album.is_member(uploader) {
            return Err(AlbumError::Unauthorized(format!(
                "{} is not a member of {}",
                uploader, album_id
            )));
        }

        let id = MediaId::new();
        let token = id.doc_key().to_lowercase();
        let path = media_blob_path(album_id, &token, blob.media_type);
        let mut bytes = blob.len() as u64;

        self.blobs.put(blob.data.clone(), &path).await?;

        let thumb_path = match blob.media_type {
            MediaType::Image => None,
            MediaType::Video => {
                let thumb = self.thumbnails.extract(&blob.data).await?;
                let thumb_path = thumbnail_blob_path(album_id, &token);
                bytes += thumb.len() as u64;
                self.blobs.put(thumb, &thumb_path).await?;
                Some(thumb_path)
            }
        };

        let item = MediaItem {
            id,
            album_id: *album_id,
            path,
            thumb_path,
            media_type: blob.media_type,
            uploader_id: uploader.clone(),
            created_at: now_millis(),
        };
        let data = serde_json::to_value(&item)?;
        self.store
            .set(&media_collection(album_id), &id.doc_key(), data)
            .await?;
        self.usage.record(bytes);
        info!(%album_id, media_id = %id, media_type = %item.media_type, bytes, "media uploaded");

        if let Err(e) = self
            .store
            .update(
                ALBUMS,
                &album_id.doc_key(),
                vec![FieldUpdate::set("updatedAt", item.created_at)],
            )
            .await
        {
            warn!(%album_id, error = %e, "failed to touch album after upload");
        }

        let name = self.notifications.display_name(uploader).await;
        let noun = match item.media_type {
            MediaType::Image => "photo",
            MediaType::Video => "video",
        };
        let event = FanOut::new(
            NotificationKind::content_added(item.media_type),
            uploader.clone(),
            format!("New {}", noun),
            format!("{} added a {} to \"{}\"", name, noun, album.title),
        )
        .album(album.id)
        .media(id);
        self.notifications.fan_out(&event, album.members).await;

        Ok(item)
    }

    /// Upload many items, best effort.
    ///
    /// Up to `upload_concurrency` items are in flight at once. Progress is
    /// only advanced by the driving task, one completion at a time.
    pub fn bulk_upload(
        &self,
        blobs: Vec<MediaBlob>,
        album_id: &AlbumId,
        uploader: &UserId,
    ) -> BulkUpload {
        let total_count = blobs.len();
        let (tx, rx) = watch::channel(UploadProgress {
            total_count,
            ..UploadProgress::default()
        });
        let cancel = CancellationToken::new();

        let engine = self.clone();
        let album_id = *album_id;
        let uploader = uploader.clone();
        let concurrency = self.config.upload_concurrency.max(1);
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            debug!(%album_id, total_count, concurrency, "bulk upload started");

            let mut results = futures::stream::iter(blobs.into_iter().enumerate())
                .map(|(index, blob)| {
                    let engine = engine.clone();
                    let uploader = uploader.clone();
                    let token = token.clone();
                    async move {
                        if token.is_cancelled() {
                            return (index, Err(AlbumError::Cancelled));
                        }
                        (index, engine.upload(blob, &album_id, &uploader).await)
                    }
                })
                .buffer_unordered(concurrency);

            while let Some((index, result)) = results.next().await {
                match result {
                    Ok(item) => {
                        debug!(index, media_id = %item.id, "bulk item uploaded");
                        tx.send_modify(|p| p.uploaded_count += 1);
                    }
                    Err(e) => {
                        if !matches!(e, AlbumError::Cancelled) {
                            warn!(index, error = %e, "bulk item failed");
                        }
                        tx.send_modify(|p| {
                            p.failures.push(ItemFailure::new(format!("item {}", index), e))
                        });
                    }
                }
            }

            tx.send_modify(|p| p.finished = true);
            let done = tx.borrow().clone();
            info!(
                %album_id,
                uploaded = done.uploaded_count,
                failed = done.failures.len(),
                "bulk upload finished"
            );
            done
        });

        BulkUpload {
            progress: rx,
            cancel,
            task,
        }
    }

    /// Delete a media item and its blobs. Only the uploader may delete.
    ///
    /// Deleting an item that is already gone is a no-op.
    pub async fn delete_media(&self, album_id: &AlbumId, item: &MediaItem) -> AlbumResult<()> {
        let caller = require_user(self.identity.as_ref())?;
        if item.uploader_id != caller {
            return Err(AlbumError::Unauthorized(format!(
                "only the uploader can delete {}",
                item.id
            )));
        }

        let collection = media_collection(album_id);
        let stored: MediaItem = match self.store.get(&collection, &item.id.doc_key()).await? {
            Some(doc) => doc.decode()?,
            None => {
                debug!(media_id = %item.id, "media already deleted");
                return Ok(());
            }
        };
        if stored.uploader_id != caller {
            return Err(AlbumError::Unauthorized(format!(
                "only the uploader can delete {}",
                item.id
            )));
        }

        for path in stored.blob_paths() {
            self.blobs.delete(path).await?;
        }
        self.store.delete(&collection, &item.id.doc_key()).await?;
        info!(%album_id, media_id = %item.id, "media deleted");
        Ok(())
    }

    /// Download URLs for the primary blob and, for videos, the thumbnail.
    pub async fn download_urls(&self, item: &MediaItem) -> AlbumResult<(String, Option<String>)> {
        let primary = self.blobs.download_url(&item.path).await?;
        let thumb = match item.thumb_path.as_deref() {
            Some(path) => Some(self.blobs.download_url(path).await?),
            None => None,
        };
        Ok((primary, thumb))
    }

    async fn load_album(&self, album_id: &AlbumId) -> AlbumResult<Album> {
        self.store
            .get(ALBUMS, &album_id.doc_key())
            .await?
            .ok_or_else(|| AlbumError::NotFound(format!("album {}", album_id)))?
            .decode()
    }
}

fn decode_complete_item(doc: &Document) -> Option<MediaItem> {
    match doc.decode::<MediaItem>() {
        Ok(item) if item.is_complete() => Some(item),
        Ok(item) => {
            debug!(media_id = %item.id, "hiding incomplete media record");
            None
        }
        Err(e) => {
            debug!(error = %e, "skipping malformed media record");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::album::AlbumDirectory;
    use crate::blob::{MemoryBlobStore, StaticThumbnailer};
    use crate::identity::SessionIdentity;
    use crate::remote::{MemoryDocumentStore, NOTIFICATIONS};
    use crate::types::{BatchOutcome, Notification};

    struct Fixture {
        store: MemoryDocumentStore,
        blobs: MemoryBlobStore,
        identity: SessionIdentity,
        directory: AlbumDirectory,
        engine: MediaSyncEngine,
    }

    fn fixture(config: SyncConfig) -> Fixture {
        let store = MemoryDocumentStore::new();
        let blobs = MemoryBlobStore::new();
        let identity = SessionIdentity::signed_in("u1");
        let hub = NotificationHub::new(
            Arc::new(store.clone()),
            Arc::new(identity.clone()),
            config.clone(),
        );
        let directory = AlbumDirectory::new(
            Arc::new(store.clone()),
            Arc::new(identity.clone()),
            hub.clone(),
            config.clone(),
        );
        let engine = MediaSyncEngine::new(
            Arc::new(store.clone()),
            Arc::new(blobs.clone()),
            Arc::new(StaticThumbnailer::new(&b"thumb"[..])),
            Arc::new(identity.clone()),
            hub,
            Arc::new(UsageMeter::new()),
            config,
        );
        Fixture {
            store,
            blobs,
            identity,
            directory,
            engine,
        }
    }

    /// Album owned by u1 with u2 as second member; u1 signed in afterwards.
    async fn shared_album(fx: &Fixture) -> Album {
        let album = fx
            .directory
            .create_album("Trip", &UserId::from("u1"))
            .await
            .unwrap();
        fx.identity.sign_in("u2");
        let album = fx
            .directory
            .join_album(&album, &UserId::from("u2"))
            .await
            .unwrap();
        fx.identity.sign_in("u1");
        album
    }

    async fn notifications_for(store: &MemoryDocumentStore, user: &str) -> Vec<Notification> {
        store
            .query(&Query::collection(NOTIFICATIONS).where_eq("toUserId", user))
            .await
            .unwrap()
            .iter()
            .map(|d| d.decode().unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_upload_photo_is_observed_and_fanned_out() {
        let fx = fixture(SyncConfig::default());
        let album = shared_album(&fx).await;
        let u1 = UserId::from("u1");

        let mut media = fx.engine.observe(&album.id);
        media.wait_for(|s| s.is_live()).await.unwrap();

        let item = fx
            .engine
            .upload(MediaBlob::image(&b"jpeg"[..]), &album.id, &u1)
            .await
            .unwrap();
        let snap = media.wait_for(|s| s.items.len() == 1).await.unwrap();
        assert_eq!(snap.items[0].id, item.id);
        assert_eq!(snap.items[0].media_type, MediaType::Image);
        assert!(fx.blobs.contains(&item.path));

        let for_u2 = notifications_for(&fx.store, "u2").await;
        assert_eq!(for_u2.len(), 1);
        assert_eq!(for_u2[0].kind, NotificationKind::ContentAddedPhoto);
        assert_eq!(for_u2[0].media_id, Some(item.id));
        // u1 only has the member-joined entry from setup
        assert!(notifications_for(&fx.store, "u1")
            .await
            .iter()
            .all(|n| n.kind == NotificationKind::MemberJoined));
        media.dispose().await;
    }

    #[tokio::test]
    async fn test_upload_video_writes_thumbnail() {
        let fx = fixture(SyncConfig::default());
        let album = shared_album(&fx).await;

        let item = fx
            .engine
            .upload(MediaBlob::video(&b"mp4"[..]), &album.id, &UserId::from("u1"))
            .await
            .unwrap();
        assert!(item.path.ends_with(".mp4"));
        let thumb = item.thumb_path.clone().unwrap();
        assert_eq!(fx.blobs.get(&thumb).unwrap(), &b"thumb"[..]);
        assert_eq!(fx.engine.usage().bytes_uploaded(), 3 + 5);

        let (primary, thumb_url) = fx.engine.download_urls(&item).await.unwrap();
        assert!(primary.contains(&item.path));
        assert!(thumb_url.is_some());

        let for_u2 = notifications_for(&fx.store, "u2").await;
        assert_eq!(for_u2[0].kind, NotificationKind::ContentAddedVideo);
    }

    #[tokio::test]
    async fn test_incomplete_video_record_is_hidden() {
        let fx = fixture(SyncConfig::default());
        let album = shared_album(&fx).await;

        let partial = MediaItem {
            id: MediaId::new(),
            album_id: album.id,
            path: "albums/x/y.mp4".into(),
            thumb_path: None,
            media_type: MediaType::Video,
            uploader_id: UserId::from("u1"),
            created_at: now_millis(),
        };
        fx.store
            .set(
                &media_collection(&album.id),
                &partial.id.doc_key(),
                serde_json::to_value(&partial).unwrap(),
            )
            .await
            .unwrap();

        let mut media = fx.engine.observe(&album.id);
        let snap = media.wait_for(|s| s.is_live()).await.unwrap();
        assert!(snap.items.is_empty());
        media.dispose().await;
    }

    #[tokio::test]
    async fn test_upload_rules() {
        let fx = fixture(SyncConfig::default());
        let album = shared_album(&fx).await;

        // Someone else's name
        let result = fx
            .engine
            .upload(MediaBlob::image(&b"x"[..]), &album.id, &UserId::from("u2"))
            .await;
        assert!(matches!(result, Err(AlbumError::Unauthorized(_))));

        // Not a member
        fx.identity.sign_in("u3");
        let result = fx
            .engine
            .upload(MediaBlob::image(&b"x"[..]), &album.id, &UserId::from("u3"))
            .await;
        assert!(matches!(result, Err(AlbumError::Unauthorized(_))));

        fx.identity.sign_in("u1");
        let result = fx
            .engine
            .upload(MediaBlob::image(&b"x"[..]), &AlbumId::new(), &UserId::from("u1"))
            .await;
        assert!(matches!(result, Err(AlbumError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_failed_blob_put_writes_no_record() {
        let fx = fixture(SyncConfig::default());
        let album = shared_album(&fx).await;

        fx.blobs.fail_next_puts(1);
        let result = fx
            .engine
            .upload(MediaBlob::image(&b"x"[..]), &album.id, &UserId::from("u1"))
            .await;
        assert!(result.unwrap_err().is_transient());
        assert_eq!(fx.store.document_count(&media_collection(&album.id)), 0);
        assert_eq!(fx.engine.usage().uploads(), 0);
    }

    #[tokio::test]
    async fn test_upload_touches_album() {
        let fx = fixture(SyncConfig::default());
        let album = shared_album(&fx).await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        let item = fx
            .engine
            .upload(MediaBlob::image(&b"x"[..]), &album.id, &UserId::from("u1"))
            .await
            .unwrap();
        let stored = fx.directory.get_album(&album.id).await.unwrap();
        assert_eq!(stored.updated_at, item.created_at);
    }

    #[tokio::test]
    async fn test_delete_media_rules() {
        let fx = fixture(SyncConfig::default());
        let album = shared_album(&fx).await;
        let item = fx
            .engine
            .upload(MediaBlob::video(&b"mp4"[..]), &album.id, &UserId::from("u1"))
            .await
            .unwrap();

        fx.identity.sign_in("u2");
        assert!(matches!(
            fx.engine.delete_media(&album.id, &item).await,
            Err(AlbumError::Unauthorized(_))
        ));

        fx.identity.sign_in("u1");
        fx.engine.delete_media(&album.id, &item).await.unwrap();
        assert!(fx.blobs.is_empty());
        assert_eq!(fx.store.document_count(&media_collection(&album.id)), 0);

        // Second delete is a no-op
        fx.engine.delete_media(&album.id, &item).await.unwrap();
    }

    #[tokio::test]
    async fn test_bulk_upload_records_failures_and_continues() {
        let fx = fixture(SyncConfig::default());
        let album = shared_album(&fx).await;
        fx.blobs.reject_payload(&b"bad"[..]);

        let blobs = vec![
            MediaBlob::image(&b"a"[..]),
            MediaBlob::image(&b"bad"[..]),
            MediaBlob::image(&b"c"[..]),
            MediaBlob::video(&b"d"[..]),
        ];
        let upload = fx
            .engine
            .bulk_upload(blobs, &album.id, &UserId::from("u1"));
        let progress = upload.finish().await.unwrap();

        assert!(progress.finished);
        assert_eq!(progress.total_count, 4);
        assert_eq!(progress.uploaded_count, 3);
        assert_eq!(progress.failures.len(), 1);
        assert_eq!(progress.failures[0].item, "item 1");
        assert_eq!(progress.report().outcome(), BatchOutcome::Partial);
        assert_eq!(fx.store.document_count(&media_collection(&album.id)), 3);
    }

    #[tokio::test]
    async fn test_bulk_upload_progress_is_monotonic() {
        let config = SyncConfig {
            upload_concurrency: 2,
            ..SyncConfig::default()
        };
        let fx = fixture(config);
        let album = shared_album(&fx).await;

        let blobs = (0..8u8).map(|i| MediaBlob::image(vec![i + 1])).collect();
        let upload = fx
            .engine
            .bulk_upload(blobs, &album.id, &UserId::from("u1"));
        let mut rx = upload.subscribe();

        let mut last = 0;
        loop {
            let current = rx.borrow_and_update().clone();
            assert!(current.uploaded_count >= last);
            assert!(current.uploaded_count <= current.total_count);
            last = current.uploaded_count;
            if current.finished {
                break;
            }
            if rx.changed().await.is_err() {
                break;
            }
        }

        let done = upload.finish().await.unwrap();
        assert_eq!(done.uploaded_count, 8);
        assert_eq!(done.processed(), done.total_count);
    }

    #[tokio::test]
    async fn test_cancelled_bulk_upload_accounts_for_every_item() {
        let fx = fixture(SyncConfig::default());
        let album = shared_album(&fx).await;

        let blobs = (0..5u8).map(|i| MediaBlob::image(vec![i + 1])).collect();
        let upload = fx
            .engine
            .bulk_upload(blobs, &album.id, &UserId::from("u1"));
        upload.cancel();

        let done = upload.finish().await.unwrap();
        assert_eq!(done.uploaded_count + done.failures.len(), 5);
        assert_eq!(done.uploaded_count, 0);
        assert!(done.failures.iter().all(|f| f.error.contains("cancelled")));
        assert_eq!(done.report().outcome(), BatchOutcome::Failed);
    }
}
