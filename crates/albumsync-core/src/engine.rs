//! AlbumSync - the entry point wiring every component together
//!
//! AlbumSync owns:
//! - the local favorites database under the data directory
//! - one NotificationHub shared by the directory and the media engine
//! - the session's UsageMeter
//!
//! # Example
//!
//! ```ignore
//! use albumsync_core::{AlbumSync, MemoryBlobStore, MemoryDocumentStore, SessionIdentity};
//!
//! let identity = SessionIdentity::signed_in("u1");
//! let sync = AlbumSync::builder("~/.albumsync/data")
//!     .store(MemoryDocumentStore::new())
//!     .blobs(MemoryBlobStore::new())
//!     .identity(identity)
//!     .build()?;
//!
//! let album = sync.directory().create_album("Trip", &"u1".into()).await?;
//! let overlay = sync.open_album(&album.id)?;
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use crate::album::{AlbumDirectory, InviteLookup};
use crate::blob::{BlobStore, MemoryBlobStore, StaticThumbnailer, ThumbnailExtractor};
use crate::config::SyncConfig;
use crate::error::AlbumResult;
use crate::identity::{require_user, IdentityProvider, SessionIdentity};
use crate::media::{MediaSyncEngine, UsageMeter};
use crate::notification::NotificationHub;
use crate::overlay::{AlbumSession, OverlayHandle};
use crate::remote::{DocumentStore, MemoryDocumentStore};
use crate::storage::Storage;
use crate::types::AlbumId;

/// File name of the favorites database inside the data directory
pub const DATABASE_FILE: &str = "albumsync.redb";

/// Placeholder thumbnail used when no extractor is wired in
const PLACEHOLDER_THUMBNAIL: &[u8] = b"\xFF\xD8\xFF\xD9";

/// Main entry point for the album sync core
pub struct AlbumSync {
    data_dir: PathBuf,
    storage: Storage,
    identity: Arc<dyn IdentityProvider>,
    notifications: NotificationHub,
    directory: AlbumDirectory,
    media: MediaSyncEngine,
    usage: Arc<UsageMeter>,
    config: SyncConfig,
}

impl AlbumSync {
    pub fn builder(data_dir: impl AsRef<Path>) -> AlbumSyncBuilder {
        AlbumSyncBuilder::new(data_dir)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn directory(&self) -> &AlbumDirectory {
        &self.directory
    }

    pub fn media(&self) -> &MediaSyncEngine {
        &self.media
    }

    pub fn notifications(&self) -> &NotificationHub {
        &self.notifications
    }

    pub fn usage(&self) -> &UsageMeter {
        &self.usage
    }

    /// New debounced invite-code lookup bound to this session.
    pub fn invite_lookup(&self) -> InviteLookup {
        InviteLookup::new(self.directory.clone())
    }

    /// Start the overlay for an album screen of the signed-in user.
    ///
    /// The returned handle must be disposed when the screen goes away.
    pub fn open_album(&self, album_id: &AlbumId) -> AlbumResult<OverlayHandle> {
        let user = require_user(self.identity.as_ref())?;
        let session = AlbumSession::open(self.storage.clone(), user, *album_id)?;
        Ok(OverlayHandle::spawn(session, self.media.clone(), &self.config))
    }
}

/// Builder for [`AlbumSync`]
///
/// Collaborators not supplied fall back to the in-memory implementations.
pub struct AlbumSyncBuilder {
    data_dir: PathBuf,
    store: Option<Arc<dyn DocumentStore>>,
    blobs: Option<Arc<dyn BlobStore>>,
    thumbnails: Option<Arc<dyn ThumbnailExtractor>>,
    identity: Option<Arc<dyn IdentityProvider>>,
    config: SyncConfig,
}

impl AlbumSyncBuilder {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            store: None,
            blobs: None,
            thumbnails: None,
            identity: None,
            config: SyncConfig::default(),
        }
    }

    pub fn store(mut self, store: impl DocumentStore + 'static) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    pub fn blobs(mut self, blobs: impl BlobStore + 'static) -> Self {
        self.blobs = Some(Arc::new(blobs));
        self
    }

    pub fn thumbnails(mut self, thumbnails: impl ThumbnailExtractor + 'static) -> Self {
        self.thumbnails = Some(Arc::new(thumbnails));
        self
    }

    pub fn identity(mut self, identity: impl IdentityProvider + 'static) -> Self {
        self.identity = Some(Arc::new(identity));
        self
    }

    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Open the favorites database and wire every component.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` if the configuration is invalid
    /// - `Io`/`Database` if the data directory or database cannot be opened
    pub fn build(self) -> AlbumResult<AlbumSync> {
        self.config.validate()?;
        std::fs::create_dir_all(&self.data_dir)?;
        let storage = Storage::new(self.data_dir.join(DATABASE_FILE))?;

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryDocumentStore::new()));
        let blobs = self
            .blobs
            .unwrap_or_else(|| Arc::new(MemoryBlobStore::new()));
        let thumbnails = self
            .thumbnails
            .unwrap_or_else(|| Arc::new(StaticThumbnailer::new(PLACEHOLDER_THUMBNAIL)));
        let identity = self
            .identity
            .unwrap_or_else(|| Arc::new(SessionIdentity::signed_out()));
        let usage = Arc::new(UsageMeter::new());

        let notifications =
            NotificationHub::new(store.clone(), identity.clone(), self.config.clone());
        let directory = AlbumDirectory::new(
            store.clone(),
            identity.clone(),
            notifications.clone(),
            self.config.clone(),
        );
        let media = MediaSyncEngine::new(
            store,
            blobs,
            thumbnails,
            identity.clone(),
            notifications.clone(),
            usage.clone(),
            self.config.clone(),
        );

        info!(data_dir = ?self.data_dir, "album sync initialized");
        Ok(AlbumSync {
            data_dir: self.data_dir,
            storage,
            identity,
            notifications,
            directory,
            media,
            usage,
            config: self.config,
        })
    }
}

impl std::fmt::Debug for AlbumSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlbumSync")
            .field("data_dir", &self.data_dir)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
