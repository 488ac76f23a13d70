//! Core types for the album sync core
//!
//! Records mirror the documents kept in the remote store. Field names are
//! camelCase on the wire so queries can filter on `members`, `updatedAt`,
//! `toUserId` and friends.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Current wall-clock time as Unix milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

macro_rules! ulid_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Ulid);

        impl $name {
            /// Create a new id with the current timestamp
            pub fn new() -> Self {
                Self(Ulid::new())
            }

            /// Get the underlying ULID
            pub fn as_ulid(&self) -> &Ulid {
                &self.0
            }

            /// Parse from string representation
            pub fn from_string(s: &str) -> Result<Self, ulid::DecodeError> {
                Ok(Self(Ulid::from_string(s)?))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}_{}", $prefix, self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = ulid::DecodeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let raw = s.strip_prefix(concat!($prefix, "_")).unwrap_or(s);
                Self::from_string(raw)
            }
        }
    };
}

ulid_id!(
    /// Unique identifier for a shared album
    AlbumId,
    "album"
);
ulid_id!(
    /// Unique identifier for a media item inside an album
    ///
    /// ULIDs sort by creation time, which keeps blob paths roughly ordered.
    MediaId,
    "media"
);
ulid_id!(
    /// Unique identifier for a notification record
    NotificationId,
    "notif"
);

impl AlbumId {
    /// Key used for the document in the remote store
    pub fn doc_key(&self) -> String {
        self.0.to_string()
    }
}

impl MediaId {
    /// Key used for the document in the remote store
    pub fn doc_key(&self) -> String {
        self.0.to_string()
    }
}

impl NotificationId {
    /// Key used for the document in the remote store
    pub fn doc_key(&self) -> String {
        self.0.to_string()
    }
}

/// Opaque user id supplied by the identity provider
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A shared album
///
/// `members` behaves as a set: no duplicates, never empty, always contains
/// the owner. It only grows through this crate's operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Album {
    pub id: AlbumId,
    pub title: String,
    pub owner_id: UserId,
    pub members: Vec<UserId>,
    /// Six uppercase alphanumeric characters, unique among active albums
    pub invite_code: String,
    /// Unix milliseconds
    pub created_at: i64,
    /// Unix milliseconds
    pub updated_at: i64,
}

impl Album {
    /// Create a new album owned (and solely joined) by `owner_id`
    pub fn new(title: impl Into<String>, owner_id: UserId, invite_code: String) -> Self {
        let now = now_millis();
        Self {
            id: AlbumId::new(),
            title: title.into(),
            members: vec![owner_id.clone()],
            owner_id,
            invite_code,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_member(&self, user: &UserId) -> bool {
        self.members.contains(user)
    }

    pub fn is_owner(&self, user: &UserId) -> bool {
        &self.owner_id == user
    }
}

/// Kind of media stored in an album
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Video,
}

impl MediaType {
    /// File extension used for the primary blob
    pub fn extension(&self) -> &'static str {
        match self {
            MediaType::Image => "jpg",
            MediaType::Video => "mp4",
        }
    }
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaType::Image => write!(f, "image"),
            MediaType::Video => write!(f, "video"),
        }
    }
}

/// A photo or video inside an album
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaItem {
    pub id: MediaId,
    pub album_id: AlbumId,
    /// Blob key of the primary payload
    pub path: String,
    /// Blob key of the thumbnail; required for videos
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumb_path: Option<String>,
    #[serde(rename = "type")]
    pub media_type: MediaType,
    pub uploader_id: UserId,
    /// Unix milliseconds
    pub created_at: i64,
}

impl MediaItem {
    /// A record is only surfaced once every required field is present.
    pub fn is_complete(&self) -> bool {
        if self.path.is_empty() {
            return false;
        }
        match self.media_type {
            MediaType::Image => true,
            MediaType::Video => self.thumb_path.as_deref().is_some_and(|p| !p.is_empty()),
        }
    }

    /// Every blob key this record references
    pub fn blob_paths(&self) -> Vec<&str> {
        let mut paths = vec![self.path.as_str()];
        if let Some(thumb) = self.thumb_path.as_deref() {
            paths.push(thumb);
        }
        paths
    }
}

/// Notification kinds produced by fan-out writers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationKind {
    ContentAddedPhoto,
    ContentAddedVideo,
    MemberJoined,
    AlbumInvite,
    AlbumUpdated,
    OwnershipTransferred,
}

impl NotificationKind {
    /// Content-added variant for an uploaded media type
    pub fn content_added(media_type: MediaType) -> Self {
        match media_type {
            MediaType::Image => NotificationKind::ContentAddedPhoto,
            MediaType::Video => NotificationKind::ContentAddedVideo,
        }
    }
}

/// A notification addressed to exactly one recipient
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: NotificationId,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub from_user_id: UserId,
    pub to_user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album_id: Option<AlbumId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_id: Option<MediaId>,
    #[serde(default)]
    pub is_read: bool,
    /// Unix milliseconds
    pub created_at: i64,
}

/// Caller-side payload for `NotificationHub::create`
///
/// `is_read` and `created_at` are accepted for convenience but always
/// overwritten on create.
#[derive(Debug, Clone, PartialEq)]
pub struct NewNotification {
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub from_user_id: UserId,
    pub to_user_id: UserId,
    pub album_id: Option<AlbumId>,
    pub media_id: Option<MediaId>,
    pub is_read: bool,
    pub created_at: Option<i64>,
}

impl NewNotification {
    pub fn new(
        kind: NotificationKind,
        from: UserId,
        to: UserId,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            title: title.into(),
            message: message.into(),
            from_user_id: from,
            to_user_id: to,
            album_id: None,
            media_id: None,
            is_read: false,
            created_at: None,
        }
    }
}

/// One failed item inside a batch operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    /// Human-readable item reference (media id, file index, ...)
    pub item: String,
    pub error: String,
}

impl ItemFailure {
    pub fn new(item: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self {
            item: item.into(),
            error: error.to_string(),
        }
    }
}

/// Aggregate outcome of a batch operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Every item succeeded (also used for empty batches)
    Complete,
    /// Some items failed
    Partial,
    /// Every item failed
    Failed,
}

/// Counts and failures collected by a best-effort batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub total: usize,
    pub succeeded: usize,
    pub failures: Vec<ItemFailure>,
}

impl BatchReport {
    pub fn outcome(&self) -> BatchOutcome {
        if self.failures.is_empty() {
            BatchOutcome::Complete
        } else if self.succeeded == 0 {
            BatchOutcome::Failed
        } else {
            BatchOutcome::Partial
        }
    }
}
