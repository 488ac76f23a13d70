//! Notification hub
//!
//! Every notification record belongs to exactly one recipient. Mutating
//! actions elsewhere in the crate (joins, uploads, renames) call
//! [`NotificationHub::fan_out`], which writes one record per recipient.
//!
//! The unread badge is never a separately maintained counter: it is computed
//! from whatever snapshot the user's live feed currently holds.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::{AlbumError, AlbumResult};
use crate::identity::{require_user, IdentityProvider};
use crate::live::{LiveQuery, Snapshot};
use crate::remote::{
    BatchWrite, Direction, Document, DocumentStore, FieldUpdate, Query, NOTIFICATIONS, USERS,
};
use crate::types::{
    now_millis, AlbumId, BatchReport, ItemFailure, MediaId, NewNotification, Notification,
    NotificationId, NotificationKind, UserId,
};

/// Count unread entries in a snapshot
pub fn unread_count(snapshot: &Snapshot<Notification>) -> usize {
    snapshot.items.iter().filter(|n| !n.is_read).count()
}

/// Live, ordered notification list for one user
pub struct NotificationFeed {
    user: UserId,
    query: LiveQuery<Notification>,
}

impl NotificationFeed {
    pub fn user(&self) -> &UserId {
        &self.user
    }

    pub fn latest(&self) -> Snapshot<Notification> {
        self.query.latest()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.query.items()
    }

    /// Unread entries in the snapshot currently held
    pub fn unread_count(&self) -> usize {
        unread_count(&self.query.latest())
    }

    pub async fn changed(&mut self) -> AlbumResult<Snapshot<Notification>> {
        self.query.changed().await
    }

    pub async fn wait_for(
        &mut self,
        predicate: impl FnMut(&Snapshot<Notification>) -> bool,
    ) -> AlbumResult<Snapshot<Notification>> {
        self.query.wait_for(predicate).await
    }

    pub async fn dispose(self) {
        self.query.dispose().await;
    }
}

/// One event to be delivered to several recipients
#[derive(Debug, Clone)]
pub struct FanOut {
    pub kind: NotificationKind,
    pub from: UserId,
    pub title: String,
    pub message: String,
    pub album_id: Option<AlbumId>,
    pub media_id: Option<MediaId>,
}

impl FanOut {
    pub fn new(
        kind: NotificationKind,
        from: UserId,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            from,
            title: title.into(),
            message: message.into(),
            album_id: None,
            media_id: None,
        }
    }

    pub fn album(mut self, album_id: AlbumId) -> Self {
        self.album_id = Some(album_id);
        self
    }

    pub fn media(mut self, media_id: MediaId) -> Self {
        self.media_id = Some(media_id);
        self
    }

    /// The record this event becomes for one recipient
    pub fn addressed_to(&self, to: UserId) -> NewNotification {
        NewNotification {
            kind: self.kind,
            title: self.title.clone(),
            message: self.message.clone(),
            from_user_id: self.from.clone(),
            to_user_id: to,
            album_id: self.album_id,
            media_id: self.media_id,
            is_read: false,
            created_at: None,
        }
    }
}

/// Per-user notification listing, read-state mutation and fan-out writer
#[derive(Clone)]
pub struct NotificationHub {
    store: Arc<dyn DocumentStore>,
    identity: Arc<dyn IdentityProvider>,
    config: SyncConfig,
}

impl NotificationHub {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        identity: Arc<dyn IdentityProvider>,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            identity,
            config,
        }
    }

    /// Subscribe to the most recent notifications addressed to `user`.
    pub fn observe(&self, user: &UserId) -> NotificationFeed {
        let query = Query::collection(NOTIFICATIONS)
            .where_eq("toUserId", user.as_str())
            .order_by("createdAt", Direction::Descending)
            .limit(self.config.notification_page_size);

        let label = format!("notifications:{}", user);
        let query = LiveQuery::spawn(self.store.as_ref(), query, label, decode_notification);
        NotificationFeed {
            user: user.clone(),
            query,
        }
    }

    /// Write a single notification record.
    ///
    /// `is_read` and `created_at` from the caller are ignored.
    pub async fn create(&self, new: NewNotification) -> AlbumResult<NotificationId> {
        if new.to_user_id.as_str().is_empty() {
            return Err(AlbumError::InvalidInput("notification has no recipient".into()));
        }

        let record = Notification {
            id: NotificationId::new(),
            kind: new.kind,
            title: new.title,
            message: new.message,
            from_user_id: new.from_user_id,
            to_user_id: new.to_user_id,
            album_id: new.album_id,
            media_id: new.media_id,
            is_read: false,
            created_at: now_millis(),
        };

        let data = serde_json::to_value(&record)?;
        self.store
            .set(NOTIFICATIONS, &record.id.doc_key(), data)
            .await?;
        debug!(id = %record.id, to = %record.to_user_id, kind = ?record.kind, "notification created");
        Ok(record.id)
    }

    /// Write one record per recipient, skipping the sender.
    ///
    /// Best effort: failures are collected, remaining recipients still get
    /// their record.
    pub async fn fan_out(
        &self,
        event: &FanOut,
        recipients: impl IntoIterator<Item = UserId>,
    ) -> BatchReport {
        let mut report = BatchReport::default();

        for to in recipients {
            if to == event.from {
                continue;
            }
            report.total += 1;
            let recipient = to.to_string();
            match self.create(event.addressed_to(to)).await {
                Ok(_) => report.succeeded += 1,
                Err(e) => {
                    warn!(to = %recipient, kind = ?event.kind, error = %e, "fan-out write failed");
                    report.failures.push(ItemFailure::new(recipient, e));
                }
            }
        }

        debug!(
            kind = ?event.kind,
            delivered = report.succeeded,
            failed = report.failures.len(),
            "fan-out finished"
        );
        report
    }

    /// Mark one notification read. Marking twice is fine.
    pub async fn mark_as_read(&self, id: &NotificationId) -> AlbumResult<()> {
        let notification = self.load_owned(id).await?;
        if notification.is_read {
            return Ok(());
        }
        self.store
            .update(
                NOTIFICATIONS,
                &id.doc_key(),
                vec![FieldUpdate::set("isRead", true)],
            )
            .await
    }

    /// Mark every unread notification that existed when the call started.
    ///
    /// All updates go out in one batch: either every one of them lands or
    /// the call fails and nothing changed. Returns how many were marked.
    pub async fn mark_all_as_read(&self, user: &UserId) -> AlbumResult<usize> {
        let caller = require_user(self.identity.as_ref())?;
        if &caller != user {
            return Err(AlbumError::Unauthorized(format!(
                "{} cannot change notifications of {}",
                caller, user
            )));
        }

        // Millisecond cutoff: a notification created in the same
        // millisecond as this call is marked too.
        let started_at = now_millis();
        let query = Query::collection(NOTIFICATIONS)
            .where_eq("toUserId", user.as_str())
            .where_eq("isRead", false);

        let writes: Vec<BatchWrite> = self
            .store
            .query(&query)
            .await?
            .iter()
            .filter_map(decode_notification)
            .filter(|n| n.created_at <= started_at)
            .map(|n| BatchWrite::Update {
                collection: NOTIFICATIONS.to_string(),
                id: n.id.doc_key(),
                fields: vec![FieldUpdate::set("isRead", true)],
            })
            .collect();

        let count = writes.len();
        if count == 0 {
            return Ok(0);
        }

        self.store.commit(writes).await?;
        info!(user = %user, count, "marked all notifications as read");
        Ok(count)
    }

    /// Remove a notification. Removing a missing one is fine.
    pub async fn delete_notification(&self, id: &NotificationId) -> AlbumResult<()> {
        match self.load_owned(id).await {
            Ok(_) => {}
            Err(AlbumError::NotFound(_)) => return Ok(()),
            Err(e) => return Err(e),
        }
        self.store.delete(NOTIFICATIONS, &id.doc_key()).await?;
        debug!(%id, "notification deleted");
        Ok(())
    }

    /// Display name from `users/{id}`, or the raw id when unavailable
    pub async fn display_name(&self, user: &UserId) -> String {
        match self.store.get(USERS, user.as_str()).await {
            Ok(Some(doc)) => doc
                .data
                .get("displayName")
                .and_then(Value::as_str)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| user.to_string()),
            Ok(None) => user.to_string(),
            Err(e) => {
                debug!(%user, error = %e, "display name lookup failed");
                user.to_string()
            }
        }
    }

    /// Store a display name for a user profile
    pub async fn set_display_name(&self, user: &UserId, name: &str) -> AlbumResult<()> {
        self.store
            .set(USERS, user.as_str(), json!({ "displayName": name }))
            .await
    }

    /// Load a notification and check the session user is its recipient.
    async fn load_owned(&self, id: &NotificationId) -> AlbumResult<Notification> {
        let caller = require_user(self.identity.as_ref())?;
        let doc = self
            .store
            .get(NOTIFICATIONS, &id.doc_key())
            .await?
            .ok_or_else(|| AlbumError::NotFound(format!("notification {}", id)))?;
        let notification: Notification = doc.decode()?;

        if notification.to_user_id != caller {
            return Err(AlbumError::Unauthorized(format!(
                "notification {} is addressed to someone else",
                id
            )));
        }
        Ok(notification)
    }
}

fn decode_notification(doc: &Document) -> Option<Notification> {
    match doc.decode::<Notification>() {
        Ok(n) => Some(n),
        Err(e) => {
            debug!(error = %e, "skipping malformed notification");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::SessionIdentity;
    use crate::remote::MemoryDocumentStore;

    fn hub_for(user: &str) -> (NotificationHub, MemoryDocumentStore, SessionIdentity) {
        let store = MemoryDocumentStore::new();
        let identity = SessionIdentity::signed_in(user);
        let hub = NotificationHub::new(
            Arc::new(store.clone()),
            Arc::new(identity.clone()),
            SyncConfig::default(),
        );
        (hub, store, identity)
    }

    fn note(from: &str, to: &str) -> NewNotification {
        NewNotification::new(
            NotificationKind::MemberJoined,
            UserId::from(from),
            UserId::from(to),
            "New member",
            "someone joined",
        )
    }

    #[tokio::test]
    async fn test_create_forces_unread_and_timestamp() {
        let (hub, store, _) = hub_for("u1");
        let mut new = note("u2", "u1");
        new.is_read = true;
        new.created_at = Some(0);

        let id = hub.create(new).await.unwrap();
        let doc = store.get(NOTIFICATIONS, &id.doc_key()).await.unwrap().unwrap();
        let stored: Notification = doc.decode().unwrap();
        assert!(!stored.is_read);
        assert!(stored.created_at > 0);
        assert_eq!(stored.kind, NotificationKind::MemberJoined);
    }

    #[tokio::test]
    async fn test_fan_out_writes_one_record_per_recipient_and_skips_sender() {
        let (hub, store, _) = hub_for("u1");
        let event = FanOut::new(NotificationKind::AlbumUpdated, UserId::from("u1"), "t", "m");

        let report = hub
            .fan_out(&event, ["u1", "u2", "u3"].map(UserId::from))
            .await;
        assert_eq!(report.total, 2);
        assert_eq!(report.succeeded, 2);
        assert_eq!(store.document_count(NOTIFICATIONS), 2);
    }

    #[tokio::test]
    async fn test_fan_out_continues_past_failures() {
        let (hub, store, _) = hub_for("u1");
        let event = FanOut::new(NotificationKind::AlbumUpdated, UserId::from("u1"), "t", "m");

        store.fail_next_writes(1);
        let report = hub.fan_out(&event, ["u2", "u3"].map(UserId::from)).await;
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(store.document_count(NOTIFICATIONS), 1);
    }

    #[tokio::test]
    async fn test_mark_as_read_is_idempotent_and_owner_only() {
        let (hub, store, identity) = hub_for("u1");
        let id = hub.create(note("u2", "u1")).await.unwrap();

        hub.mark_as_read(&id).await.unwrap();
        hub.mark_as_read(&id).await.unwrap();
        let stored: Notification = store
            .get(NOTIFICATIONS, &id.doc_key())
            .await
            .unwrap()
            .unwrap()
            .decode()
            .unwrap();
        assert!(stored.is_read);
        assert_eq!(stored.title, "New member");

        identity.sign_in("u3");
        assert!(matches!(
            hub.mark_as_read(&id).await,
            Err(AlbumError::Unauthorized(_))
        ));
        assert!(matches!(
            hub.mark_as_read(&NotificationId::new()).await,
            Err(AlbumError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_mark_all_as_read_clears_unread_count() {
        let (hub, _store, _) = hub_for("u1");
        for _ in 0..3 {
            hub.create(note("u2", "u1")).await.unwrap();
        }
        hub.create(note("u1", "u2")).await.unwrap();

        let mut feed = hub.observe(&UserId::from("u1"));
        feed.wait_for(|s| s.items.len() == 3).await.unwrap();
        assert_eq!(feed.unread_count(), 3);

        let marked = hub.mark_all_as_read(&UserId::from("u1")).await.unwrap();
        assert_eq!(marked, 3);

        let snap = feed.wait_for(|s| unread_count(s) == 0).await.unwrap();
        assert_eq!(snap.items.len(), 3);
        assert_eq!(hub.mark_all_as_read(&UserId::from("u1")).await.unwrap(), 0);
        feed.dispose().await;
    }

    #[tokio::test]
    async fn test_mark_all_as_read_failure_changes_nothing() {
        let (hub, store, _) = hub_for("u1");
        hub.create(note("u2", "u1")).await.unwrap();
        hub.create(note("u3", "u1")).await.unwrap();

        store.fail_next_writes(1);
        let result = hub.mark_all_as_read(&UserId::from("u1")).await;
        assert!(matches!(result, Err(AlbumError::TransientIo(_))));

        let unread = store
            .query(&Query::collection(NOTIFICATIONS).where_eq("isRead", false))
            .await
            .unwrap();
        assert_eq!(unread.len(), 2);
    }

    #[tokio::test]
    async fn test_mark_all_as_read_for_someone_else_is_unauthorized() {
        let (hub, _, _) = hub_for("u1");
        assert!(matches!(
            hub.mark_all_as_read(&UserId::from("u2")).await,
            Err(AlbumError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_notification_is_idempotent() {
        let (hub, store, _) = hub_for("u1");
        let id = hub.create(note("u2", "u1")).await.unwrap();
        hub.delete_notification(&id).await.unwrap();
        hub.delete_notification(&id).await.unwrap();
        assert_eq!(store.document_count(NOTIFICATIONS), 0);
    }

    #[tokio::test]
    async fn test_feed_is_newest_first_and_limited() {
        let store = MemoryDocumentStore::new();
        let config = SyncConfig {
            notification_page_size: 2,
            ..SyncConfig::default()
        };
        let hub = NotificationHub::new(
            Arc::new(store.clone()),
            Arc::new(SessionIdentity::signed_in("u1")),
            config,
        );

        for (i, ts) in [10i64, 30, 20].iter().enumerate() {
            let record = Notification {
                id: NotificationId::new(),
                kind: NotificationKind::AlbumInvite,
                title: format!("n{}", i),
                message: String::new(),
                from_user_id: UserId::from("u2"),
                to_user_id: UserId::from("u1"),
                album_id: None,
                media_id: None,
                is_read: false,
                created_at: *ts,
            };
            store
                .set(
                    NOTIFICATIONS,
                    &record.id.doc_key(),
                    serde_json::to_value(&record).unwrap(),
                )
                .await
                .unwrap();
        }

        let mut feed = hub.observe(&UserId::from("u1"));
        let snap = feed.wait_for(|s| s.is_live()).await.unwrap();
        let stamps: Vec<i64> = snap.items.iter().map(|n| n.created_at).collect();
        assert_eq!(stamps, vec![30, 20]);
        feed.dispose().await;
    }

    #[tokio::test]
    async fn test_display_name_falls_back_to_id() {
        let (hub, _, _) = hub_for("u1");
        assert_eq!(hub.display_name(&UserId::from("u9")).await, "u9");
        hub.set_display_name(&UserId::from("u9"), "Nia").await.unwrap();
        assert_eq!(hub.display_name(&UserId::from("u9")).await, "Nia");
    }
}
