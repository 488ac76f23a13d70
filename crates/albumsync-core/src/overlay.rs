//! Client state overlay for one album-viewing session
//!
//! Reconciles state that only exists on this device (favorites, selection,
//! transient flags) with the media snapshots pushed by the sync engine.
//!
//! Two layers:
//!
//! - [`AlbumSession`]: plain state machine, every method synchronous
//! - [`OverlayHandle`]: runs one session inside a single task. Snapshots,
//!   user commands and completion of background work are all applied by
//!   that task, so session state is never mutated from two places at once.
//!
//! ## Selection
//!
//! ```text
//!            enter_selection
//!     OFF ─────────────────────► ON
//!      ▲                          │
//!      └──────────────────────────┘
//!       cancel_selection, or selection
//!       went from non-empty to empty
//! ```
//!
//! Every applied snapshot prunes selected ids that are no longer present.

use std::collections::BTreeSet;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::blob::MediaBlob;
use crate::config::SyncConfig;
use crate::error::{AlbumError, AlbumResult};
use crate::live::{LiveQuery, Snapshot};
use crate::media::{MediaSyncEngine, UploadProgress};
use crate::storage::{FavoriteSet, Storage};
use crate::types::{AlbumId, BatchReport, ItemFailure, MediaId, MediaItem, MediaType, UserId};

/// Which items of the album are displayed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MediaFilter {
    #[default]
    All,
    Photos,
    Videos,
    Favorites,
}

/// Multi-select state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub selecting: bool,
    pub ids: BTreeSet<MediaId>,
}

impl Selection {
    /// Drop ids not matching `keep`. Leaves selection mode if that emptied
    /// a non-empty selection.
    fn retain(&mut self, keep: impl Fn(&MediaId) -> bool) {
        let had_any = !self.ids.is_empty();
        self.ids.retain(|id| keep(id));
        if had_any && self.ids.is_empty() {
            self.selecting = false;
        }
    }
}

/// Everything the album screen renders
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewState {
    pub filter: MediaFilter,
    /// Latest snapshot after filtering, newest first
    pub items: Vec<MediaItem>,
    pub favorites: FavoriteSet,
    pub selection: Selection,
    pub uploading: bool,
    /// One inline, non-fatal message
    pub notice: Option<String>,
    /// Items are the last known ones because the store is unreachable
    pub stale: bool,
    /// Bumped every time the filtered list is recomputed
    pub recomputes: u64,
}

/// Session-scoped overlay state for one (user, album)
pub struct AlbumSession {
    user: UserId,
    album_id: AlbumId,
    storage: Storage,
    snapshot: Vec<MediaItem>,
    favorites: FavoriteSet,
    filter: MediaFilter,
    selection: Selection,
    uploads_in_flight: usize,
    notice: Option<String>,
    stale: bool,
    visible: Vec<MediaItem>,
    recomputes: u64,
}

impl AlbumSession {
    /// Open a session, loading the persisted favorites for (user, album).
    pub fn open(storage: Storage, user: UserId, album_id: AlbumId) -> AlbumResult<Self> {
        let favorites = storage.load_favorites(&user, &album_id)?;
        debug!(%user, %album_id, favorites = favorites.len(), "album session opened");
        Ok(Self {
            user,
            album_id,
            storage,
            snapshot: Vec::new(),
            favorites,
            filter: MediaFilter::All,
            selection: Selection::default(),
            uploads_in_flight: 0,
            notice: None,
            stale: false,
            visible: Vec::new(),
            recomputes: 0,
        })
    }

    pub fn user(&self) -> &UserId {
        &self.user
    }

    pub fn album_id(&self) -> &AlbumId {
        &self.album_id
    }

    pub fn visible(&self) -> &[MediaItem] {
        &self.visible
    }

    pub fn favorites(&self) -> &FavoriteSet {
        &self.favorites
    }

    pub fn is_favorite(&self, id: &MediaId) -> bool {
        self.favorites.contains(id)
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn filter(&self) -> MediaFilter {
        self.filter
    }

    pub fn view_state(&self) -> ViewState {
        ViewState {
            filter: self.filter,
            items: self.visible.clone(),
            favorites: self.favorites.clone(),
            selection: self.selection.clone(),
            uploading: self.uploads_in_flight > 0,
            notice: self.notice.clone(),
            stale: self.stale,
            recomputes: self.recomputes,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Snapshots and filtering
    // ═══════════════════════════════════════════════════════════════════════

    /// Reconcile with a new media snapshot.
    pub fn apply_snapshot(&mut self, snapshot: Snapshot<MediaItem>) {
        self.stale = snapshot.is_stale();
        self.snapshot = snapshot.items;

        let present: BTreeSet<MediaId> = self.snapshot.iter().map(|i| i.id).collect();
        let before = self.selection.ids.len();
        self.selection.retain(|id| present.contains(id));
        if self.selection.ids.len() != before {
            debug!(
                pruned = before - self.selection.ids.len(),
                "selection pruned by snapshot"
            );
        }
        self.recompute();
    }

    pub fn set_filter(&mut self, filter: MediaFilter) {
        if self.filter != filter {
            self.filter = filter;
            self.recompute();
        }
    }

    fn recompute(&mut self) {
        let filter = self.filter;
        let favorites = &self.favorites;
        self.visible = self
            .snapshot
            .iter()
            .filter(|item| match filter {
                MediaFilter::All => true,
                MediaFilter::Photos => item.media_type == MediaType::Image,
                MediaFilter::Videos => item.media_type == MediaType::Video,
                MediaFilter::Favorites => favorites.contains(&item.id),
            })
            .cloned()
            .collect();
        self.recomputes += 1;
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Favorites
    // ═══════════════════════════════════════════════════════════════════════

    /// Persist `next` and adopt it; on failure nothing changes.
    fn commit_favorites(&mut self, next: FavoriteSet) -> AlbumResult<()> {
        if next == self.favorites {
            return Ok(());
        }
        self.storage
            .save_favorites(&self.user, &self.album_id, &next)?;
        self.favorites = next;
        self.recompute();
        Ok(())
    }

    /// Flip one item. Returns whether it is now a favorite.
    pub fn toggle_favorite(&mut self, id: MediaId) -> AlbumResult<bool> {
        let mut next = self.favorites.clone();
        let now_favorite = if next.remove(&id) {
            false
        } else {
            next.insert(id);
            true
        };
        self.commit_favorites(next)?;
        Ok(now_favorite)
    }

    pub fn add_favorites(&mut self, ids: &[MediaId]) -> AlbumResult<()> {
        let mut next = self.favorites.clone();
        next.extend(ids.iter().copied());
        self.commit_favorites(next)
    }

    pub fn remove_favorites(&mut self, ids: &[MediaId]) -> AlbumResult<()> {
        let mut next = self.favorites.clone();
        for id in ids {
            next.remove(id);
        }
        self.commit_favorites(next)
    }

    /// Toggle each id, persisting and recomputing once.
    pub fn bulk_favorite_toggle(&mut self, ids: &[MediaId]) -> AlbumResult<()> {
        let mut next = self.favorites.clone();
        for id in ids {
            if !next.remove(id) {
                next.insert(*id);
            }
        }
        self.commit_favorites(next)
    }

    /// Remove each id, persisting and recomputing once.
    pub fn bulk_favorite_remove(&mut self, ids: &[MediaId]) -> AlbumResult<()> {
        self.remove_favorites(ids)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Selection
    // ═══════════════════════════════════════════════════════════════════════

    pub fn enter_selection(&mut self) {
        self.selection.selecting = true;
    }

    pub fn cancel_selection(&mut self) {
        self.selection = Selection::default();
    }

    /// Flip selection of an item present in the current snapshot.
    ///
    /// Ignored outside selection mode or for unknown ids. Returns whether the
    /// item is selected afterwards.
    pub fn toggle_selected(&mut self, id: MediaId) -> bool {
        if !self.selection.selecting || !self.snapshot.iter().any(|i| i.id == id) {
            return false;
        }
        if self.selection.ids.contains(&id) {
            self.selection.retain(|selected| selected != &id);
            false
        } else {
            self.selection.ids.insert(id);
            true
        }
    }

    /// Select every currently displayed item.
    pub fn select_all_visible(&mut self) {
        if !self.selection.selecting {
            return;
        }
        self.selection
            .ids
            .extend(self.visible.iter().map(|item| item.id));
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Bulk delete
    // ═══════════════════════════════════════════════════════════════════════

    /// Items among `ids` this user may delete. Others are left out silently.
    pub fn plan_bulk_delete(&self, ids: &[MediaId]) -> Vec<MediaItem> {
        let wanted: BTreeSet<&MediaId> = ids.iter().collect();
        self.snapshot
            .iter()
            .filter(|item| wanted.contains(&item.id) && item.uploader_id == self.user)
            .cloned()
            .collect()
    }

    /// Apply the result of a bulk delete.
    pub fn complete_bulk_delete(&mut self, deleted: &[MediaId], report: &BatchReport) {
        let gone: BTreeSet<&MediaId> = deleted.iter().collect();
        self.selection.retain(|id| !gone.contains(id));

        if !report.failures.is_empty() {
            self.notice = Some(format!(
                "Could not delete {} of {} items",
                report.failures.len(),
                report.total
            ));
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Transient flags
    // ═══════════════════════════════════════════════════════════════════════

    pub fn begin_upload(&mut self) {
        self.uploads_in_flight += 1;
    }

    pub fn finish_upload(&mut self, progress: &UploadProgress) {
        self.uploads_in_flight = self.uploads_in_flight.saturating_sub(1);
        if !progress.failures.is_empty() {
            self.notice = Some(format!(
                "{} of {} uploads failed",
                progress.failures.len(),
                progress.total_count
            ));
        }
    }

    pub fn is_uploading(&self) -> bool {
        self.uploads_in_flight > 0
    }

    pub fn dismiss_notice(&mut self) {
        self.notice = None;
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Single-task actor
// ═══════════════════════════════════════════════════════════════════════════

enum Command {
    SetFilter(MediaFilter, oneshot::Sender<()>),
    ToggleFavorite(MediaId, oneshot::Sender<AlbumResult<bool>>),
    AddFavorites(Vec<MediaId>, oneshot::Sender<AlbumResult<()>>),
    RemoveFavorites(Vec<MediaId>, oneshot::Sender<AlbumResult<()>>),
    BulkFavoriteToggle(Vec<MediaId>, oneshot::Sender<AlbumResult<()>>),
    EnterSelection(oneshot::Sender<()>),
    CancelSelection(oneshot::Sender<()>),
    ToggleSelected(MediaId, oneshot::Sender<bool>),
    SelectAllVisible(oneshot::Sender<()>),
    DismissNotice(oneshot::Sender<()>),
    BulkDelete(Vec<MediaId>, oneshot::Sender<BatchReport>),
    BulkDeleteDone {
        deleted: Vec<MediaId>,
        report: BatchReport,
        reply: oneshot::Sender<BatchReport>,
    },
    Upload(
        Vec<MediaBlob>,
        oneshot::Sender<watch::Receiver<UploadProgress>>,
    ),
    UploadDone(UploadProgress),
}

struct OverlayActor {
    session: AlbumSession,
    engine: MediaSyncEngine,
    view: watch::Sender<ViewState>,
    commands: mpsc::WeakSender<Command>,
}

impl OverlayActor {
    async fn run(
        mut self,
        mut media: LiveQuery<MediaItem>,
        mut inbox: mpsc::Receiver<Command>,
        cancel: CancellationToken,
    ) {
        self.session.apply_snapshot(media.latest());
        self.publish();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                snapshot = media.changed() => match snapshot {
                    Ok(snapshot) => {
                        self.session.apply_snapshot(snapshot);
                        self.publish();
                    }
                    Err(_) => {
                        warn!(album_id = %self.session.album_id(), "media feed ended");
                        break;
                    }
                },
                command = inbox.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
            }
        }

        media.dispose().await;
        debug!(album_id = %self.session.album_id(), "overlay stopped");
    }

    fn publish(&self) {
        self.view.send_replace(self.session.view_state());
    }

    /// Publish the new view first so a caller awaiting the reply sees it.
    fn reply<T>(&self, reply: oneshot::Sender<T>, value: T) {
        self.publish();
        let _ = reply.send(value);
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::SetFilter(filter, reply) => {
                self.session.set_filter(filter);
                self.reply(reply, ());
            }
            Command::ToggleFavorite(id, reply) => {
                let result = self.session.toggle_favorite(id);
                self.reply(reply, result);
            }
            Command::AddFavorites(ids, reply) => {
                let result = self.session.add_favorites(&ids);
                self.reply(reply, result);
            }
            Command::RemoveFavorites(ids, reply) => {
                let result = self.session.bulk_favorite_remove(&ids);
                self.reply(reply, result);
            }
            Command::BulkFavoriteToggle(ids, reply) => {
                let result = self.session.bulk_favorite_toggle(&ids);
                self.reply(reply, result);
            }
            Command::EnterSelection(reply) => {
                self.session.enter_selection();
                self.reply(reply, ());
            }
            Command::CancelSelection(reply) => {
                self.session.cancel_selection();
                self.reply(reply, ());
            }
            Command::ToggleSelected(id, reply) => {
                let selected = self.session.toggle_selected(id);
                self.reply(reply, selected);
            }
            Command::SelectAllVisible(reply) => {
                self.session.select_all_visible();
                self.reply(reply, ());
            }
            Command::DismissNotice(reply) => {
                self.session.dismiss_notice();
                self.reply(reply, ());
            }
            Command::BulkDelete(ids, reply) => self.start_bulk_delete(ids, reply),
            Command::BulkDeleteDone {
                deleted,
                report,
                reply,
            } => {
                self.session.complete_bulk_delete(&deleted, &report);
                self.reply(reply, report);
            }
            Command::Upload(blobs, reply) => self.start_upload(blobs, reply),
            Command::UploadDone(progress) => {
                self.session.finish_upload(&progress);
                self.publish();
            }
        }
    }

    fn start_bulk_delete(&mut self, ids: Vec<MediaId>, reply: oneshot::Sender<BatchReport>) {
        let plan = self.session.plan_bulk_delete(&ids);
        let skipped = ids.len() - plan.len();
        if plan.is_empty() {
            self.reply(reply, BatchReport::default());
            return;
        }
        let Some(commands) = self.commands.upgrade() else {
            return;
        };

        info!(count = plan.len(), skipped, "bulk delete started");
        let engine = self.engine.clone();
        let album_id = *self.session.album_id();

        tokio::spawn(async move {
            let mut report = BatchReport {
                total: plan.len(),
                ..BatchReport::default()
            };
            let mut deleted = Vec::with_capacity(plan.len());

            for item in &plan {
                match engine.delete_media(&album_id, item).await {
                    Ok(()) => {
                        report.succeeded += 1;
                        deleted.push(item.id);
                    }
                    Err(e) => {
                        warn!(media_id = %item.id, error = %e, "bulk delete item failed");
                        report.failures.push(ItemFailure::new(item.id.to_string(), e));
                    }
                }
            }

            let done = Command::BulkDeleteDone {
                deleted,
                report,
                reply,
            };
            if commands.send(done).await.is_err() {
                debug!("overlay gone before bulk delete finished");
            }
        });
    }

    fn start_upload(
        &mut self,
        blobs: Vec<MediaBlob>,
        reply: oneshot::Sender<watch::Receiver<UploadProgress>>,
    ) {
        let Some(commands) = self.commands.upgrade() else {
            return;
        };

        let upload = self
            .engine
            .bulk_upload(blobs, self.session.album_id(), self.session.user());
        let progress = upload.subscribe();
        self.session.begin_upload();

        tokio::spawn(async move {
            let done = match upload.finish().await {
                Ok(progress) => progress,
                Err(e) => {
                    warn!(error = %e, "upload task failed");
                    UploadProgress {
                        finished: true,
                        ..UploadProgress::default()
                    }
                }
            };
            let _ = commands.send(Command::UploadDone(done)).await;
        });

        self.reply(reply, progress);
    }
}

/// Handle to a running overlay
///
/// Call [`OverlayHandle::dispose`] when the album screen goes away; it stops
/// the task and releases the media subscription.
pub struct OverlayHandle {
    commands: mpsc::Sender<Command>,
    view: watch::Receiver<ViewState>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl OverlayHandle {
    /// Start the overlay task for `session`, subscribed to the album's media.
    pub fn spawn(session: AlbumSession, engine: MediaSyncEngine, config: &SyncConfig) -> Self {
        let (commands, inbox) = mpsc::channel(config.event_channel_capacity);
        let (view_tx, view) = watch::channel(session.view_state());
        let cancel = CancellationToken::new();
        let media = engine.observe(session.album_id());

        let actor = OverlayActor {
            session,
            engine,
            view: view_tx,
            commands: commands.downgrade(),
        };
        let task = tokio::spawn(actor.run(media, inbox, cancel.clone()));

        Self {
            commands,
            view,
            cancel,
            task: Some(task),
        }
    }

    pub fn view(&self) -> ViewState {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ViewState> {
        self.view.clone()
    }

    /// Wait until the published view satisfies `predicate`.
    pub async fn wait_for(
        &mut self,
        predicate: impl FnMut(&ViewState) -> bool,
    ) -> AlbumResult<ViewState> {
        let view = self
            .view
            .wait_for(predicate)
            .await
            .map_err(|_| AlbumError::Cancelled)?;
        Ok((*view).clone())
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> AlbumResult<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| AlbumError::Cancelled)?;
        rx.await.map_err(|_| AlbumError::Cancelled)
    }

    pub async fn set_filter(&self, filter: MediaFilter) -> AlbumResult<()> {
        self.request(|reply| Command::SetFilter(filter, reply)).await
    }

    pub async fn toggle_favorite(&self, id: MediaId) -> AlbumResult<bool> {
        self.request(|reply| Command::ToggleFavorite(id, reply))
            .await?
    }

    pub async fn add_favorites(&self, ids: Vec<MediaId>) -> AlbumResult<()> {
        self.request(|reply| Command::AddFavorites(ids, reply))
            .await?
    }

    pub async fn remove_favorites(&self, ids: Vec<MediaId>) -> AlbumResult<()> {
        self.request(|reply| Command::RemoveFavorites(ids, reply))
            .await?
    }

    pub async fn bulk_favorite_toggle(&self, ids: Vec<MediaId>) -> AlbumResult<()> {
        self.request(|reply| Command::BulkFavoriteToggle(ids, reply))
            .await?
    }

    pub async fn enter_selection(&self) -> AlbumResult<()> {
        self.request(Command::EnterSelection).await
    }

    pub async fn cancel_selection(&self) -> AlbumResult<()> {
        self.request(Command::CancelSelection).await
    }

    pub async fn toggle_selected(&self, id: MediaId) -> AlbumResult<bool> {
        self.request(|reply| Command::ToggleSelected(id, reply))
            .await
    }

    pub async fn select_all_visible(&self) -> AlbumResult<()> {
        self.request(Command::SelectAllVisible).await
    }

    pub async fn dismiss_notice(&self) -> AlbumResult<()> {
        self.request(Command::DismissNotice).await
    }

    /// Delete the given items the user uploaded; others are skipped.
    ///
    /// Resolves once every delete has been attempted and the selection has
    /// been updated.
    pub async fn bulk_delete(&self, ids: Vec<MediaId>) -> AlbumResult<BatchReport> {
        self.request(|reply| Command::BulkDelete(ids, reply)).await
    }

    /// Start a bulk upload into the album and return its progress feed.
    pub async fn upload(&self, blobs: Vec<MediaBlob>) -> AlbumResult<watch::Receiver<UploadProgress>> {
        self.request(|reply| Command::Upload(blobs, reply)).await
    }

    /// Stop the overlay and release the media subscription.
    pub async fn dispose(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "overlay task failed");
            }
        }
    }
}

impl Drop for OverlayHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live::SnapshotState;
    use crate::types::now_millis;
    use tempfile::TempDir;

    fn create_test_storage() -> (Storage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let storage = Storage::new(temp_dir.path().join("overlay.redb")).unwrap();
        (storage, temp_dir)
    }

    fn item(media_type: MediaType, uploader: &str) -> MediaItem {
        MediaItem {
            id: MediaId::new(),
            album_id: AlbumId::new(),
            path: "albums/a/x".into(),
            thumb_path: Some("albums/a/thumbs/x.jpg".into()),
            media_type,
            uploader_id: UserId::from(uploader),
            created_at: now_millis(),
        }
    }

    fn live(items: Vec<MediaItem>) -> Snapshot<MediaItem> {
        Snapshot {
            items,
            state: SnapshotState::Live,
            revision: 1,
        }
    }

    fn session() -> (AlbumSession, TempDir) {
        let (storage, temp) = create_test_storage();
        let session = AlbumSession::open(storage, UserId::from("u1"), AlbumId::new()).unwrap();
        (session, temp)
    }

    #[test]
    fn test_filters() {
        let (mut s, _temp) = session();
        let photo = item(MediaType::Image, "u1");
        let video = item(MediaType::Video, "u2");
        s.apply_snapshot(live(vec![photo.clone(), video.clone()]));

        assert_eq!(s.visible().len(), 2);
        s.set_filter(MediaFilter::Photos);
        assert_eq!(s.visible(), &[photo.clone()]);
        s.set_filter(MediaFilter::Videos);
        assert_eq!(s.visible(), &[video.clone()]);

        s.set_filter(MediaFilter::Favorites);
        assert!(s.visible().is_empty());
        s.toggle_favorite(video.id).unwrap();
        assert_eq!(s.visible(), &[video]);
    }

    #[test]
    fn test_toggle_favorite_twice_restores_state() {
        let (mut s, _temp) = session();
        let id = MediaId::new();
        assert!(s.toggle_favorite(id).unwrap());
        assert!(!s.toggle_favorite(id).unwrap());
        assert!(s.favorites().is_empty());
    }

    #[test]
    fn test_favorites_survive_session_reopen() {
        let (storage, _temp) = create_test_storage();
        let user = UserId::from("u1");
        let album = AlbumId::new();
        let ids = [MediaId::new(), MediaId::new()];

        {
            let mut s = AlbumSession::open(storage.clone(), user.clone(), album).unwrap();
            s.add_favorites(&ids).unwrap();
        }
        let reopened = AlbumSession::open(storage, user, album).unwrap();
        assert_eq!(reopened.favorites().len(), 2);
        assert!(ids.iter().all(|id| reopened.is_favorite(id)));
    }

    #[test]
    fn test_bulk_favorite_ops_recompute_once() {
        let (mut s, _temp) = session();
        let items: Vec<MediaItem> = (0..4).map(|_| item(MediaType::Image, "u1")).collect();
        let ids: Vec<MediaId> = items.iter().map(|i| i.id).collect();
        s.apply_snapshot(live(items));

        let before = s.view_state().recomputes;
        s.bulk_favorite_toggle(&ids).unwrap();
        assert_eq!(s.view_state().recomputes, before + 1);
        assert_eq!(s.favorites().len(), 4);

        s.bulk_favorite_toggle(&ids[..2]).unwrap();
        assert_eq!(s.favorites().len(), 2);

        let before = s.view_state().recomputes;
        s.bulk_favorite_remove(&ids).unwrap();
        assert_eq!(s.view_state().recomputes, before + 1);
        assert!(s.favorites().is_empty());
    }

    #[test]
    fn test_snapshot_prunes_selection() {
        let (mut s, _temp) = session();
        let items: Vec<MediaItem> = (0..3).map(|_| item(MediaType::Image, "u1")).collect();
        s.apply_snapshot(live(items.clone()));

        s.enter_selection();
        for i in &items {
            assert!(s.toggle_selected(i.id));
        }
        assert_eq!(s.selection().ids.len(), 3);

        s.apply_snapshot(live(items[1..].to_vec()));
        assert_eq!(s.selection().ids.len(), 2);
        assert!(s.selection().selecting);

        s.apply_snapshot(live(vec![]));
        assert!(s.selection().ids.is_empty());
        assert!(!s.selection().selecting);
    }

    #[test]
    fn test_selection_rules() {
        let (mut s, _temp) = session();
        let a = item(MediaType::Image, "u1");
        s.apply_snapshot(live(vec![a.clone()]));

        // Outside selection mode nothing is selected
        assert!(!s.toggle_selected(a.id));

        // Entering with nothing selected stays on
        s.enter_selection();
        s.apply_snapshot(live(vec![a.clone()]));
        assert!(s.selection().selecting);

        // Unknown ids are ignored
        assert!(!s.toggle_selected(MediaId::new()));

        assert!(s.toggle_selected(a.id));
        assert!(!s.toggle_selected(a.id));
        assert!(!s.selection().selecting);

        s.enter_selection();
        s.select_all_visible();
        assert_eq!(s.selection().ids.len(), 1);
        s.cancel_selection();
        assert_eq!(s.selection(), &Selection::default());
    }

    #[test]
    fn test_stale_snapshot_keeps_items() {
        let (mut s, _temp) = session();
        let a = item(MediaType::Image, "u1");
        s.apply_snapshot(live(vec![a.clone()]));
        s.apply_snapshot(Snapshot {
            items: vec![a],
            state: SnapshotState::Stale {
                error: "offline".into(),
            },
            revision: 2,
        });
        let view = s.view_state();
        assert!(view.stale);
        assert_eq!(view.items.len(), 1);
    }

    #[test]
    fn test_plan_bulk_delete_keeps_own_items_only() {
        let (mut s, _temp) = session();
        let mine = item(MediaType::Image, "u1");
        let theirs = item(MediaType::Image, "u2");
        s.apply_snapshot(live(vec![mine.clone(), theirs.clone()]));

        let plan = s.plan_bulk_delete(&[mine.id, theirs.id, MediaId::new()]);
        assert_eq!(plan, vec![mine]);
    }

    #[test]
    fn test_complete_bulk_delete_updates_selection_and_notice() {
        let (mut s, _temp) = session();
        let a = item(MediaType::Image, "u1");
        let b = item(MediaType::Image, "u1");
        s.apply_snapshot(live(vec![a.clone(), b.clone()]));
        s.enter_selection();
        s.toggle_selected(a.id);
        s.toggle_selected(b.id);

        let report = BatchReport {
            total: 2,
            succeeded: 1,
            failures: vec![ItemFailure::new(b.id.to_string(), "offline")],
        };
        s.complete_bulk_delete(&[a.id], &report);
        assert_eq!(s.selection().ids.len(), 1);
        assert!(s.selection().selecting);
        assert_eq!(
            s.view_state().notice.as_deref(),
            Some("Could not delete 1 of 2 items")
        );

        s.complete_bulk_delete(&[b.id], &BatchReport::default());
        assert!(!s.selection().selecting);
    }

    #[test]
    fn test_uploading_flag_counts_uploads() {
        let (mut s, _temp) = session();
        s.begin_upload();
        s.begin_upload();
        s.finish_upload(&UploadProgress::default());
        assert!(s.is_uploading());
        s.finish_upload(&UploadProgress {
            uploaded_count: 1,
            total_count: 2,
            failures: vec![ItemFailure::new("item 1", "boom")],
            finished: true,
        });
        assert!(!s.is_uploading());
        assert_eq!(s.view_state().notice.as_deref(), Some("1 of 2 uploads failed"));
        s.dismiss_notice();
        assert!(s.view_state().notice.is_none());
    }
}
