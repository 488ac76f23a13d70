//! Album Sync Core Library
//!
//! Shared photo/video albums: invite-code membership, live media and
//! notification feeds, and on-device reconciliation of favorites and
//! selection against continuously arriving snapshots.
//!
//! ## Overview
//!
//! Users create albums, invite others with a six-character code, upload
//! photos and videos, and are notified when membership or content changes.
//! The remote document store, blob store and identity provider are
//! collaborators behind traits; in-memory implementations are included.
//!
//! ```text
//! UI action ──► AlbumDirectory / MediaSyncEngine ──► DocumentStore
//!                        │                               │
//!                        └─► NotificationHub (fan-out)    │ live listeners
//!                                                        ▼
//!               OverlayHandle ◄── LiveQuery snapshots ◄──┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use albumsync_core::{AlbumSync, MediaBlob, SessionIdentity, UserId};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let me = UserId::from("u1");
//!     let sync = AlbumSync::builder("~/.albumsync/data")
//!         .identity(SessionIdentity::signed_in(me.clone()))
//!         .build()?;
//!
//!     let album = sync.directory().create_album("Trip", &me).await?;
//!     println!("invite code: {}", album.invite_code);
//!
//!     sync.media()
//!         .upload(MediaBlob::image(std::fs::read("beach.jpg")?), &album.id, &me)
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod album;
pub mod blob;
pub mod config;
pub mod engine;
pub mod error;
pub mod identity;
pub mod invite;
pub mod live;
pub mod logging;
pub mod media;
pub mod notification;
pub mod overlay;
pub mod remote;
pub mod storage;
pub mod types;

// Re-exports
pub use album::{AlbumDirectory, InviteLookup, LookupState};
pub use blob::{BlobStore, MediaBlob, MemoryBlobStore, StaticThumbnailer, ThumbnailExtractor};
pub use config::SyncConfig;
pub use engine::{AlbumSync, AlbumSyncBuilder};
pub use error::{AlbumError, AlbumResult};
pub use identity::{IdentityProvider, SessionIdentity};
pub use live::{LiveQuery, Snapshot, SnapshotState};
pub use media::{BulkUpload, MediaSyncEngine, UploadProgress, UsageMeter};
pub use notification::{FanOut, NotificationFeed, NotificationHub};
pub use overlay::{AlbumSession, MediaFilter, OverlayHandle, Selection, ViewState};
pub use remote::{DocumentStore, MemoryDocumentStore};
pub use storage::{FavoriteSet, Storage};
pub use types::*;
