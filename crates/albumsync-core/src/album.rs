//! Album directory: creation, invite codes and membership admission
//!
//! ## Joining
//!
//! ```text
//! findByInviteCode(code) ──► Album
//!        │
//! joinAlbum(album, uid)
//!        ├── re-read album, AlreadyMember if uid ∈ members
//!        ├── members ∪= {uid}      (ArrayUnion, no lost updates)
//!        ├── updatedAt = now
//!        └── fan-out member-joined to the pre-existing members
//! ```
//!
//! Membership only ever grows through this module.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::{AlbumError, AlbumResult};
use crate::identity::{require_user, IdentityProvider};
use crate::invite::{generate_invite_code, normalize_invite_code};
use crate::live::LiveQuery;
use crate::notification::{FanOut, NotificationHub};
use crate::remote::{Direction, Document, DocumentStore, FieldUpdate, Query, ALBUMS};
use crate::types::{now_millis, Album, AlbumId, NotificationKind, UserId};

/// Source of candidate invite codes
pub type CodeSource = Arc<dyn Fn() -> String + Send + Sync>;

/// Album creation, lookup and membership
#[derive(Clone)]
pub struct AlbumDirectory {
    store: Arc<dyn DocumentStore>,
    identity: Arc<dyn IdentityProvider>,
    notifications: NotificationHub,
    config: SyncConfig,
    codes: CodeSource,
}

impl AlbumDirectory {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        identity: Arc<dyn IdentityProvider>,
        notifications: NotificationHub,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            identity,
            notifications,
            config,
            codes: Arc::new(generate_invite_code),
        }
    }

    /// Replace the random invite code generator.
    pub fn with_code_source(mut self, codes: CodeSource) -> Self {
        self.codes = codes;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Creation and lookup
    // ═══════════════════════════════════════════════════════════════════════

    /// Create an album owned by `owner` with a fresh unique invite code.
    ///
    /// # Errors
    ///
    /// `ResourceExhausted` when every generated code collided with an
    /// existing album.
    pub async fn create_album(&self, title: &str, owner: &UserId) -> AlbumResult<Album> {
        self.require_caller(owner)?;
        let title = title.trim();
        if title.is_empty() {
            return Err(AlbumError::InvalidInput("album title is empty".into()));
        }

        let attempts = self.config.invite_code_max_attempts;
        for attempt in 1..=attempts {
            let code = (self.codes)();
            // Check then write: the store has no create-if-absent, so two
            // devices racing on the same fresh code can still both succeed.
            if self.code_in_use(&code).await? {
                debug!(attempt, "invite code collision, regenerating");
                continue;
            }

            let album = Album::new(title, owner.clone(), code);
            let data = serde_json::to_value(&album)?;
            self.store.set(ALBUMS, &album.id.doc_key(), data).await?;
            info!(album_id = %album.id, owner = %owner, "album created");
            return Ok(album);
        }

        warn!(attempts, "no free invite code found");
        Err(AlbumError::ResourceExhausted(format!(
            "no unused invite code after {} attempts",
            attempts
        )))
    }

    /// Fetch a single album.
    pub async fn get_album(&self, album_id: &AlbumId) -> AlbumResult<Album> {
        let doc = self
            .store
            .get(ALBUMS, &album_id.doc_key())
            .await?
            .ok_or_else(|| AlbumError::NotFound(format!("album {}", album_id)))?;
        doc.decode()
    }

    /// Resolve an invite code typed by a user.
    ///
    /// Input is normalized first, so `"ab c-123"` finds `ABC123`.
    pub async fn find_by_invite_code(&self, input: &str) -> AlbumResult<Album> {
        let code = normalize_invite_code(input)?;
        let query = Query::collection(ALBUMS)
            .where_eq("inviteCode", code.as_str())
            .limit(1);

        let docs = self.store.query(&query).await?;
        match docs.first() {
            Some(doc) => doc.decode(),
            None => Err(AlbumError::NotFound(format!("invite code {}", code))),
        }
    }

    /// Albums `user` belongs to, most recently updated first.
    pub fn observe_my_albums(&self, user: &UserId) -> LiveQuery<Album> {
        let query = Query::collection(ALBUMS)
            .where_array_contains("members", user.as_str())
            .order_by("updatedAt", Direction::Descending)
            .limit(self.config.album_page_size);

        LiveQuery::spawn(
            self.store.as_ref(),
            query,
            format!("albums:{}", user),
            decode_album,
        )
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Membership
    // ═══════════════════════════════════════════════════════════════════════

    /// Add `user` to the album and tell the existing members.
    ///
    /// The album is re-read before the write, so a stale `album` argument
    /// never hides an existing membership.
    ///
    /// # Errors
    ///
    /// - `AlreadyMember` if `user` already belongs to the album
    /// - `NotFound` if the album is gone
    /// - `Unauthorized` if `user` is not the signed-in user
    pub async fn join_album(&self, album: &Album, user: &UserId) -> AlbumResult<Album> {
        self.require_caller(user)?;
        let mut current = self.get_album(&album.id).await?;

        if current.is_member(user) {
            return Err(AlbumError::AlreadyMember {
                album: current.id.to_string(),
                user: user.to_string(),
            });
        }

        let updated_at = now_millis();
        self.store
            .update(
                ALBUMS,
                &current.id.doc_key(),
                vec![
                    FieldUpdate::ArrayUnion("members".into(), vec![Value::from(user.as_str())]),
                    FieldUpdate::set("updatedAt", updated_at),
                ],
            )
            .await?;
        info!(album_id = %current.id, user = %user, "member joined");

        let existing = current.members.clone();
        current.members.push(user.clone());
        current.updated_at = updated_at;

        let name = self.notifications.display_name(user).await;
        let event = FanOut::new(
            NotificationKind::MemberJoined,
            user.clone(),
            "New member",
            format!("{} joined \"{}\"", name, current.title),
        )
        .album(current.id);
        self.notifications.fan_out(&event, existing).await;

        Ok(current)
    }

    /// Change an album's title. Any member may rename.
    pub async fn rename_album(&self, album_id: &AlbumId, title: &str) -> AlbumResult<Album> {
        let caller = require_user(self.identity.as_ref())?;
        let title = title.trim();
        if title.is_empty() {
            return Err(AlbumError::InvalidInput("album title is empty".into()));
        }

        let mut album = self.get_album(album_id).await?;
        if !album.is_member(&caller) {
            return Err(AlbumError::Unauthorized(format!(
                "{} is not a member of {}",
                caller, album_id
            )));
        }

        let updated_at = now_millis();
        self.store
            .update(
                ALBUMS,
                &album_id.doc_key(),
                vec![
                    FieldUpdate::set("title", title),
                    FieldUpdate::set("updatedAt", updated_at),
                ],
            )
            .await?;

        let previous = std::mem::replace(&mut album.title, title.to_string());
        album.updated_at = updated_at;
        debug!(%album_id, from = %previous, to = %album.title, "album renamed");

        let name = self.notifications.display_name(&caller).await;
        let event = FanOut::new(
            NotificationKind::AlbumUpdated,
            caller,
            "Album updated",
            format!("{} renamed \"{}\" to \"{}\"", name, previous, album.title),
        )
        .album(album.id);
        self.notifications
            .fan_out(&event, album.members.iter().cloned())
            .await;

        Ok(album)
    }

    /// Hand the album over to another member. Only the owner may do this.
    ///
    /// Membership is unchanged; the previous owner stays a member.
    pub async fn transfer_ownership(
        &self,
        album_id: &AlbumId,
        new_owner: &UserId,
    ) -> AlbumResult<Album> {
        let caller = require_user(self.identity.as_ref())?;
        let mut album = self.get_album(album_id).await?;

        if !album.is_owner(&caller) {
            return Err(AlbumError::Unauthorized(format!(
                "only the owner can transfer {}",
                album_id
            )));
        }
        if !album.is_member(new_owner) {
            return Err(AlbumError::NotFound(format!(
                "{} is not a member of {}",
                new_owner, album_id
            )));
        }
        if new_owner == &caller {
            return Ok(album);
        }

        let updated_at = now_millis();
        self.store
            .update(
                ALBUMS,
                &album_id.doc_key(),
                vec![
                    FieldUpdate::set("ownerId", new_owner.as_str()),
                    FieldUpdate::set("updatedAt", updated_at),
                ],
            )
            .await?;
        album.owner_id = new_owner.clone();
        album.updated_at = updated_at;
        info!(%album_id, owner = %new_owner, "ownership transferred");

        let name = self.notifications.display_name(&caller).await;
        let event = FanOut::new(
            NotificationKind::OwnershipTransferred,
            caller,
            "You are now the owner",
            format!("{} made you the owner of \"{}\"", name, album.title),
        )
        .album(album.id);
        self.notifications
            .fan_out(&event, [new_owner.clone()])
            .await;

        Ok(album)
    }

    /// Send an album-invite notification carrying the invite code.
    ///
    /// Only members can invite; inviting an existing member is `AlreadyMember`.
    pub async fn send_invite(&self, album_id: &AlbumId, to: &UserId) -> AlbumResult<()> {
        let caller = require_user(self.identity.as_ref())?;
        let album = self.get_album(album_id).await?;

        if !album.is_member(&caller) {
            return Err(AlbumError::Unauthorized(format!(
                "{} is not a member of {}",
                caller, album_id
            )));
        }
        if album.is_member(to) {
            return Err(AlbumError::AlreadyMember {
                album: album.id.to_string(),
                user: to.to_string(),
            });
        }

        let name = self.notifications.display_name(&caller).await;
        let event = FanOut::new(
            NotificationKind::AlbumInvite,
            caller,
            "Album invite",
            format!(
                "{} invited you to \"{}\" (code {})",
                name, album.title, album.invite_code
            ),
        )
        .album(album.id);

        self.notifications
            .create(event.addressed_to(to.clone()))
            .await?;
        Ok(())
    }

    async fn code_in_use(&self, code: &str) -> AlbumResult<bool> {
        let query = Query::collection(ALBUMS).where_eq("inviteCode", code).limit(1);
        Ok(!self.store.query(&query).await?.is_empty())
    }

    fn require_caller(&self, user: &UserId) -> AlbumResult<()> {
        let caller = require_user(self.identity.as_ref())?;
        if &caller != user {
            return Err(AlbumError::Unauthorized(format!(
                "signed in as {}, not {}",
                caller, user
            )));
        }
        Ok(())
    }
}

fn decode_album(doc: &Document) -> Option<Album> {
    match doc.decode::<Album>() {
        Ok(album) => Some(album),
        Err(e) => {
            debug!(error = %e, "skipping malformed album");
            None
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Incremental invite lookup
// ═══════════════════════════════════════════════════════════════════════════

/// Result of the latest invite-code lookup
#[derive(Debug, Clone, PartialEq)]
pub enum LookupState {
    /// No input
    Idle,
    /// Input cannot be a code (wrong length after normalization)
    Invalid,
    /// Waiting for the debounce period or the store
    Searching { code: String },
    Found(Album),
    NotFound { code: String },
    Failed { code: String, error: String },
}

/// Debounced lookup driven by text input, last request wins.
///
/// Every call to [`InviteLookup::input`] cancels the lookup before it, and a
/// lookup only publishes while it is still the newest one.
pub struct InviteLookup {
    directory: AlbumDirectory,
    debounce: Duration,
    state: Arc<watch::Sender<LookupState>>,
    generation: Arc<AtomicU64>,
    inflight: Mutex<Option<CancellationToken>>,
}

impl InviteLookup {
    pub fn new(directory: AlbumDirectory) -> Self {
        let debounce = directory.config().invite_lookup_debounce();
        let (state, _) = watch::channel(LookupState::Idle);
        Self {
            directory,
            debounce,
            state: Arc::new(state),
            generation: Arc::new(AtomicU64::new(0)),
            inflight: Mutex::new(None),
        }
    }

    pub fn state(&self) -> LookupState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<LookupState> {
        self.state.subscribe()
    }

    /// Feed the current contents of the code field.
    pub fn input(&self, text: &str) {
        let token = CancellationToken::new();
        if let Some(previous) = self.inflight.lock().replace(token.clone()) {
            previous.cancel();
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        if text.trim().is_empty() {
            self.state.send_replace(LookupState::Idle);
            return;
        }
        let code = match normalize_invite_code(text) {
            Ok(code) => code,
            Err(_) => {
                self.state.send_replace(LookupState::Invalid);
                return;
            }
        };
        self.state
            .send_replace(LookupState::Searching { code: code.clone() });

        let directory = self.directory.clone();
        let state = self.state.clone();
        let latest = self.generation.clone();
        let debounce = self.debounce;

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(debounce) => {}
            }

            let result = tokio::select! {
                _ = token.cancelled() => return,
                result = directory.find_by_invite_code(&code) => result,
            };

            let next = match result {
                Ok(album) => LookupState::Found(album),
                Err(AlbumError::NotFound(_)) => LookupState::NotFound { code },
                Err(e) => LookupState::Failed {
                    code,
                    error: e.to_string(),
                },
            };

            // Checked under the channel lock so a newer input always wins
            state.send_if_modified(|current| {
                if latest.load(Ordering::SeqCst) != generation {
                    return false;
                }
                *current = next;
                true
            });
        });
    }

    /// Cancel any lookup and return to `Idle`.
    pub fn clear(&self) {
        self.input("");
    }
}

impl Drop for InviteLookup {
    fn drop(&mut self) {
        if let Some(token) = self.inflight.lock().take() {
            token.cancel();
        }
    }
}
