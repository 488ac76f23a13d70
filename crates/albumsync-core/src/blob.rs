//! Blob storage contract for media bytes
//!
//! Media payloads live in a path-addressed blob store, separate from the
//! document records that reference them. Paths are derived from the album id
//! plus a fresh token so concurrent uploads never collide:
//!
//! ```text
//! albums/{albumId}/{token}.jpg|mp4     primary payload
//! albums/{albumId}/thumbs/{token}.jpg  video thumbnail
//! ```
//!
//! Frame extraction for video thumbnails is delegated to a
//! [`ThumbnailExtractor`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::{AlbumError, AlbumResult};
use crate::types::{AlbumId, MediaType};

/// Bytes picked by the user plus their media kind
#[derive(Debug, Clone, PartialEq)]
pub struct MediaBlob {
    pub data: Bytes,
    pub media_type: MediaType,
}

impl MediaBlob {
    pub fn image(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            media_type: MediaType::Image,
        }
    }

    pub fn video(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            media_type: MediaType::Video,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Path of the primary blob for an upload token
pub fn media_blob_path(album_id: &AlbumId, token: &str, media_type: MediaType) -> String {
    format!(
        "albums/{}/{}.{}",
        album_id.doc_key(),
        token,
        media_type.extension()
    )
}

/// Path of the thumbnail blob for an upload token
pub fn thumbnail_blob_path(album_id: &AlbumId, token: &str) -> String {
    format!("albums/{}/thumbs/{}.jpg", album_id.doc_key(), token)
}

/// Path-addressed binary storage
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, data: Bytes, path: &str) -> AlbumResult<()>;

    async fn download_url(&self, path: &str) -> AlbumResult<String>;

    /// Remove a blob; removing a missing blob is not an error
    async fn delete(&self, path: &str) -> AlbumResult<()>;
}

/// Derives a still image from video bytes
#[async_trait]
pub trait ThumbnailExtractor: Send + Sync {
    async fn extract(&self, video: &Bytes) -> AlbumResult<Bytes>;
}

/// Thumbnailer that always returns the same image.
///
/// Used when no frame extractor is wired in (tests, CLI demo).
#[derive(Debug, Clone)]
pub struct StaticThumbnailer {
    image: Bytes,
}

impl StaticThumbnailer {
    pub fn new(image: impl Into<Bytes>) -> Self {
        Self {
            image: image.into(),
        }
    }
}

#[async_trait]
impl ThumbnailExtractor for StaticThumbnailer {
    async fn extract(&self, video: &Bytes) -> AlbumResult<Bytes> {
        if video.is_empty() {
            return Err(AlbumError::InvalidInput("video payload is empty".into()));
        }
        Ok(self.image.clone())
    }
}

#[derive(Default)]
struct BlobInner {
    blobs: HashMap<String, Bytes>,
    rejected_payloads: HashSet<Bytes>,
    failing_puts: usize,
}

/// In-process blob store.
///
/// Clones share the same contents.
#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    inner: Arc<Mutex<BlobInner>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` puts fail with `TransientIo`.
    pub fn fail_next_puts(&self, count: usize) {
        self.inner.lock().failing_puts = count;
    }

    /// Reject every put whose bytes equal `payload`.
    pub fn reject_payload(&self, payload: impl Into<Bytes>) {
        self.inner.lock().rejected_payloads.insert(payload.into());
    }

    pub fn contains(&self, path: &str) -> bool {
        self.inner.lock().blobs.contains_key(path)
    }

    pub fn get(&self, path: &str) -> Option<Bytes> {
        self.inner.lock().blobs.get(path).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, data: Bytes, path: &str) -> AlbumResult<()> {
        let mut inner = self.inner.lock();
        if inner.failing_puts > 0 {
            inner.failing_puts -= 1;
            return Err(AlbumError::TransientIo(format!("upload of {} failed", path)));
        }
        if inner.rejected_payloads.contains(&data) {
            return Err(AlbumError::TransientIo(format!("upload of {} rejected", path)));
        }
        trace!(path, bytes = data.len(), "blob stored");
        inner.blobs.insert(path.to_string(), data);
        Ok(())
    }

    async fn download_url(&self, path: &str) -> AlbumResult<String> {
        if !self.inner.lock().blobs.contains_key(path) {
            return Err(AlbumError::NotFound(format!("blob {}", path)));
        }
        Ok(format!("memory://{}", path))
    }

    async fn delete(&self, path: &str) -> AlbumResult<()> {
        if self.inner.lock().blobs.remove(path).is_some() {
            debug!(path, "blob deleted");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_are_scoped_to_album() {
        let album = AlbumId::new();
        let path = media_blob_path(&album, "tok", MediaType::Video);
        assert_eq!(path, format!("albums/{}/tok.mp4", album.doc_key()));
        let thumb = thumbnail_blob_path(&album, "tok");
        assert_eq!(thumb, format!("albums/{}/thumbs/tok.jpg", album.doc_key()));
    }

    #[tokio::test]
    async fn test_put_url_delete() {
        let store = MemoryBlobStore::new();
        store.put(Bytes::from_static(b"abc"), "a/b.jpg").await.unwrap();
        assert!(store.contains("a/b.jpg"));
        assert_eq!(
            store.download_url("a/b.jpg").await.unwrap(),
            "memory://a/b.jpg"
        );

        store.delete("a/b.jpg").await.unwrap();
        store.delete("a/b.jpg").await.unwrap();
        assert!(matches!(
            store.download_url("a/b.jpg").await,
            Err(AlbumError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let store = MemoryBlobStore::new();
        store.fail_next_puts(1);
        assert!(store.put(Bytes::from_static(b"x"), "p").await.is_err());
        assert!(store.put(Bytes::from_static(b"x"), "p").await.is_ok());

        store.reject_payload(Bytes::from_static(b"bad"));
        assert!(store.put(Bytes::from_static(b"bad"), "q").await.is_err());
        assert!(!store.contains("q"));
    }

    #[tokio::test]
    async fn test_static_thumbnailer_rejects_empty_video() {
        let thumbs = StaticThumbnailer::new(Bytes::from_static(b"thumb"));
        assert!(thumbs.extract(&Bytes::new()).await.is_err());
        assert_eq!(
            thumbs.extract(&Bytes::from_static(b"video")).await.unwrap(),
            Bytes::from_static(b"thumb")
        );
    }
}
