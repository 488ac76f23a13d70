//! Live queries: push-based store listeners bridged into ordered snapshots
//!
//! A [`LiveQuery`] owns one store listener and a background task that turns
//! every delivered result set into a typed [`Snapshot`], published through a
//! `tokio::sync::watch` channel. Consumers only ever see complete, ordered
//! lists, never diffs.
//!
//! ## Lifetime
//!
//! ```text
//! view becomes active  ──► LiveQuery::spawn   (listener registered)
//!        │                      │
//!        │              snapshots pushed by the store
//!        ▼                      ▼
//! view torn down       ──► LiveQuery::dispose (task stopped, listener removed)
//! ```
//!
//! `dispose` is the expected way to release the subscription. Dropping a
//! live query still cancels its task, but the listener is then released
//! asynchronously.
//!
//! ## Failures
//!
//! A transient store error never ends the subscription. The last known items
//! are kept (or an empty list if nothing arrived yet) and the snapshot is
//! marked [`SnapshotState::Stale`] until the next good delivery.

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{AlbumError, AlbumResult};
use crate::remote::{Document, DocumentStore, Query, QueryListener};

/// Freshness of a snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotState {
    /// Nothing delivered yet
    Pending,
    /// Matches the store as of the last delivery
    Live,
    /// The store reported an error; items are the last known ones
    Stale { error: String },
}

/// Full ordered result set of a live query
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<T> {
    pub items: Vec<T>,
    pub state: SnapshotState,
    /// Bumped on every delivery, good or bad
    pub revision: u64,
}

impl<T> Snapshot<T> {
    fn pending() -> Self {
        Self {
            items: Vec::new(),
            state: SnapshotState::Pending,
            revision: 0,
        }
    }

    pub fn is_live(&self) -> bool {
        self.state == SnapshotState::Live
    }

    pub fn is_stale(&self) -> bool {
        matches!(self.state, SnapshotState::Stale { .. })
    }
}

/// Cancellable producer of ordered snapshots
pub struct LiveQuery<T> {
    label: String,
    rx: watch::Receiver<Snapshot<T>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl<T> LiveQuery<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Register `query` with the store and start publishing snapshots.
    ///
    /// `decode` maps each document to a record; documents it rejects are
    /// left out of the snapshot. Ordering is the store's.
    pub fn spawn<F>(
        store: &dyn DocumentStore,
        query: Query,
        label: impl Into<String>,
        decode: F,
    ) -> Self
    where
        F: Fn(&Document) -> Option<T> + Send + 'static,
    {
        let label = label.into();
        let listener = store.listen(query);
        let (tx, rx) = watch::channel(Snapshot::pending());
        let cancel = CancellationToken::new();

        debug!(query = %label, "live query started");
        let task = tokio::spawn(Self::pump(
            label.clone(),
            listener,
            tx,
            cancel.clone(),
            decode,
        ));

        Self {
            label,
            rx,
            cancel,
            task: Some(task),
        }
    }

    async fn pump<F>(
        label: String,
        listener: QueryListener,
        tx: watch::Sender<Snapshot<T>>,
        cancel: CancellationToken,
        decode: F,
    ) where
        F: Fn(&Document) -> Option<T>,
    {
        let QueryListener {
            mut snapshots,
            registration,
        } = listener;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                next = snapshots.recv() => match next {
                    Some(Ok(docs)) => {
                        let items: Vec<T> = docs.iter().filter_map(&decode).collect();
                        debug!(query = %label, count = items.len(), "snapshot delivered");
                        tx.send_modify(|snap| {
                            snap.items = items;
                            snap.state = SnapshotState::Live;
                            snap.revision += 1;
                        });
                    }
                    Some(Err(e)) => {
                        warn!(query = %label, error = %e, "live query degraded to last known snapshot");
                        tx.send_modify(|snap| {
                            snap.state = SnapshotState::Stale { error: e.to_string() };
                            snap.revision += 1;
                        });
                    }
                    None => {
                        debug!(query = %label, "store closed listener");
                        break;
                    }
                },
            }
        }

        registration.remove();
        debug!(query = %label, "live query stopped");
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Latest published snapshot
    pub fn latest(&self) -> Snapshot<T> {
        (*self.rx.borrow()).clone()
    }

    /// Items of the latest snapshot
    pub fn items(&self) -> Vec<T> {
        self.rx.borrow().items.clone()
    }

    /// Extra receiver for consumers that select over several sources
    pub fn subscribe(&self) -> watch::Receiver<Snapshot<T>> {
        self.rx.clone()
    }

    /// Wait for the next delivery.
    ///
    /// # Errors
    ///
    /// `AlbumError::Cancelled` once the producer has stopped.
    pub async fn changed(&mut self) -> AlbumResult<Snapshot<T>> {
        self.rx.changed().await.map_err(|_| AlbumError::Cancelled)?;
        Ok((*self.rx.borrow_and_update()).clone())
    }

    /// Wait until a snapshot satisfies `predicate` (checks the current one first).
    pub async fn wait_for(
        &mut self,
        predicate: impl FnMut(&Snapshot<T>) -> bool,
    ) -> AlbumResult<Snapshot<T>> {
        let snap = self
            .rx
            .wait_for(predicate)
            .await
            .map_err(|_| AlbumError::Cancelled)?;
        Ok((*snap).clone())
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop the producer and release the store listener.
    pub async fn dispose(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(query = %self.label, error = %e, "live query task failed");
            }
        }
    }
}

impl<T> Drop for LiveQuery<T> {
    fn drop(&mut self) {
        if self.task.is_some() {
            debug!(query = %self.label, "live query dropped without dispose");
        }
        self.cancel.cancel();
    }
}
