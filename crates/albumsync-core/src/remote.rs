//! Remote document store contract
//!
//! The album core never talks to a concrete backend. It consumes a document
//! store that offers:
//!
//! - point reads, writes, partial updates and deletes
//! - equality / array-contains filters with order-by + limit
//! - all-or-nothing batches
//! - a live form of any query that re-delivers the *full* matching result
//!   set whenever it changes
//!
//! ## Collections
//!
//! ```text
//! albums/{albumId}
//! albums/{albumId}/media/{mediaId}
//! notifications/{notificationId}
//! users/{userId}
//! ```
//!
//! [`MemoryDocumentStore`] is a complete in-process implementation used by the
//! tests and the CLI demo. It supports fault injection so transient failures
//! can be exercised deterministically.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::error::{AlbumError, AlbumResult};
use crate::types::AlbumId;

/// Top-level collection of albums
pub const ALBUMS: &str = "albums";
/// Top-level collection of notifications
pub const NOTIFICATIONS: &str = "notifications";
/// Top-level collection of user profiles
pub const USERS: &str = "users";

/// Sub-collection holding an album's media records
pub fn media_collection(album_id: &AlbumId) -> String {
    format!("{}/{}/media", ALBUMS, album_id.doc_key())
}

/// A document as returned by the store
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub data: Value,
}

impl Document {
    /// Decode the document body into a record type.
    pub fn decode<T: DeserializeOwned>(&self) -> AlbumResult<T> {
        serde_json::from_value(self.data.clone()).map_err(|e| {
            AlbumError::Serialization(format!("document {}: {}", self.id, e))
        })
    }
}

/// Query filter
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// `field == value`
    Eq { field: String, value: Value },
    /// `value ∈ field` where `field` is an array
    ArrayContains { field: String, value: Value },
}

impl Filter {
    fn matches(&self, data: &Value) -> bool {
        match self {
            Filter::Eq { field, value } => data.get(field) == Some(value),
            Filter::ArrayContains { field, value } => data
                .get(field)
                .and_then(Value::as_array)
                .is_some_and(|items| items.contains(value)),
        }
    }
}

/// Sort direction for `order_by`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// A filtered, ordered, limited query over one collection
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<Filter>,
    pub order_by: Option<(String, Direction)>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn collection(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            filters: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Eq {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn where_array_contains(
        mut self,
        field: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.filters.push(Filter::ArrayContains {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some((field.into(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether a document body satisfies every filter
    pub fn matches(&self, data: &Value) -> bool {
        self.filters.iter().all(|f| f.matches(data))
    }

    /// Evaluate the query against an unordered document set.
    pub fn evaluate(&self, docs: impl IntoIterator<Item = Document>) -> Vec<Document> {
        let mut hits: Vec<Document> = docs.into_iter().filter(|d| self.matches(&d.data)).collect();

        if let Some((field, direction)) = &self.order_by {
            hits.sort_by(|a, b| {
                let ord = compare_values(
                    a.data.get(field).unwrap_or(&Value::Null),
                    b.data.get(field).unwrap_or(&Value::Null),
                );
                match direction {
                    Direction::Ascending => ord,
                    Direction::Descending => ord.reverse(),
                }
            });
        }

        if let Some(limit) = self.limit {
            hits.truncate(limit);
        }
        hits
    }
}

/// Total order over JSON scalars used by `order_by`.
///
/// Null sorts first, then booleans, numbers and strings. Arrays and objects
/// compare equal to each other.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) | Value::Object(_) => 4,
        }
    }

    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => x
                .as_f64()
                .unwrap_or(0.0)
                .partial_cmp(&y.as_f64().unwrap_or(0.0))
                .unwrap_or(Ordering::Equal),
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

/// Partial update of a single field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldUpdate {
    /// Overwrite a top-level field
    Set(String, Value),
    /// Atomically add elements to an array field, skipping ones already present
    ArrayUnion(String, Vec<Value>),
}

impl FieldUpdate {
    pub fn set(field: impl Into<String>, value: impl Into<Value>) -> Self {
        FieldUpdate::Set(field.into(), value.into())
    }
}

/// One write inside an all-or-nothing batch
#[derive(Debug, Clone, PartialEq)]
pub enum BatchWrite {
    Set {
        collection: String,
        id: String,
        data: Value,
    },
    /// Fails the whole batch if the document does not exist
    Update {
        collection: String,
        id: String,
        fields: Vec<FieldUpdate>,
    },
    Delete {
        collection: String,
        id: String,
    },
}

/// Handle that removes a live listener from the store.
///
/// Call [`ListenerRegistration::remove`] when the consuming view goes away.
/// Dropping the handle removes the listener as well.
pub struct ListenerRegistration {
    remove: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl ListenerRegistration {
    pub fn new(remove: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            remove: Some(Box::new(remove)),
        }
    }

    pub fn remove(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl Drop for ListenerRegistration {
    fn drop(&mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl std::fmt::Debug for ListenerRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistration")
            .field("active", &self.remove.is_some())
            .finish()
    }
}

/// Full result set delivered by a live query, or the failure that prevented it
pub type SnapshotResult = AlbumResult<Vec<Document>>;

/// Receiving end of a live query
#[derive(Debug)]
pub struct QueryListener {
    /// Every change re-delivers the complete matching result set
    pub snapshots: mpsc::UnboundedReceiver<SnapshotResult>,
    pub registration: ListenerRegistration,
}

/// Remote document store consumed by the album core
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> AlbumResult<Option<Document>>;

    /// Create or overwrite a document
    async fn set(&self, collection: &str, id: &str, data: Value) -> AlbumResult<()>;

    /// Apply field updates; `NotFound` if the document does not exist
    async fn update(&self, collection: &str, id: &str, fields: Vec<FieldUpdate>)
        -> AlbumResult<()>;

    /// Remove a document; removing a missing document is not an error
    async fn delete(&self, collection: &str, id: &str) -> AlbumResult<()>;

    async fn query(&self, query: &Query) -> AlbumResult<Vec<Document>>;

    /// Apply every write or none of them
    async fn commit(&self, writes: Vec<BatchWrite>) -> AlbumResult<()>;

    /// Subscribe to a query. The current result set is delivered right away.
    fn listen(&self, query: Query) -> QueryListener;
}

// ═══════════════════════════════════════════════════════════════════════
// In-memory implementation
// ═══════════════════════════════════════════════════════════════════════

type Collection = BTreeMap<String, Value>;

struct ListenerEntry {
    id: u64,
    query: Query,
    tx: mpsc::UnboundedSender<SnapshotResult>,
    last: Option<Vec<Document>>,
}

#[derive(Default)]
struct MemoryInner {
    collections: HashMap<String, Collection>,
    listeners: Vec<ListenerEntry>,
    next_listener_id: u64,
    offline: bool,
    failing_writes: usize,
    write_count: u64,
}

impl MemoryInner {
    fn check_online(&self) -> AlbumResult<()> {
        if self.offline {
            return Err(AlbumError::TransientIo("remote store unreachable".into()));
        }
        Ok(())
    }

    fn check_write(&mut self) -> AlbumResult<()> {
        self.check_online()?;
        if self.failing_writes > 0 {
            self.failing_writes -= 1;
            return Err(AlbumError::TransientIo("injected write failure".into()));
        }
        Ok(())
    }

    fn run_query(&self, query: &Query) -> Vec<Document> {
        let docs = self
            .collections
            .get(&query.collection)
            .into_iter()
            .flat_map(|c| c.iter())
            .map(|(id, data)| Document {
                id: id.clone(),
                data: data.clone(),
            });
        query.evaluate(docs)
    }

    /// Push fresh snapshots to every listener whose result set changed.
    fn notify(&mut self) {
        let mut results = Vec::with_capacity(self.listeners.len());
        for listener in &self.listeners {
            results.push(self.run_query(&listener.query));
        }

        self.listeners
            .iter_mut()
            .zip(results)
            .for_each(|(listener, docs)| {
                if listener.last.as_ref() == Some(&docs) {
                    return;
                }
                listener.last = Some(docs.clone());
                // A closed receiver is pruned below
                let _ = listener.tx.send(Ok(docs));
            });
        self.listeners.retain(|l| !l.tx.is_closed());
    }
}

fn apply_fields(doc: &mut Value, fields: &[FieldUpdate]) -> AlbumResult<()> {
    let obj = doc
        .as_object_mut()
        .ok_or_else(|| AlbumError::Serialization("document body is not an object".into()))?;

    for update in fields {
        match update {
            FieldUpdate::Set(field, value) => {
                obj.insert(field.clone(), value.clone());
            }
            FieldUpdate::ArrayUnion(field, values) => {
                let entry = obj
                    .entry(field.clone())
                    .or_insert_with(|| Value::Array(Vec::new()));
                let items = entry.as_array_mut().ok_or_else(|| {
                    AlbumError::Serialization(format!("field {} is not an array", field))
                })?;
                for value in values {
                    if !items.contains(value) {
                        items.push(value.clone());
                    }
                }
            }
        }
    }
    Ok(())
}

fn apply_write(collections: &mut HashMap<String, Collection>, write: &BatchWrite) -> AlbumResult<()> {
    match write {
        BatchWrite::Set {
            collection,
            id,
            data,
        } => {
            collections
                .entry(collection.clone())
                .or_default()
                .insert(id.clone(), data.clone());
        }
        BatchWrite::Update {
            collection,
            id,
            fields,
        } => {
            let doc = collections
                .get_mut(collection)
                .and_then(|c| c.get_mut(id))
                .ok_or_else(|| AlbumError::NotFound(format!("{}/{}", collection, id)))?;
            apply_fields(doc, fields)?;
        }
        BatchWrite::Delete { collection, id } => {
            if let Some(c) = collections.get_mut(collection) {
                c.remove(id);
            }
        }
    }
    Ok(())
}

/// In-process document store with live listeners.
///
/// Cloning shares the same underlying data, so several services (and the
/// test body) can observe the same "remote" state.
#[derive(Clone, Default)]
pub struct MemoryDocumentStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate losing (or regaining) connectivity.
    ///
    /// Going offline pushes an error to every listener; coming back online
    /// re-delivers current snapshots.
    pub fn set_offline(&self, offline: bool) {
        let mut inner = self.inner.lock();
        inner.offline = offline;
        if offline {
            debug!("memory store going offline");
            for listener in &mut inner.listeners {
                listener.last = None;
                let _ = listener
                    .tx
                    .send(Err(AlbumError::TransientIo("remote store unreachable".into())));
            }
        } else {
            debug!("memory store back online");
            inner.notify();
        }
    }

    /// Make the next `count` write calls fail with `TransientIo`.
    pub fn fail_next_writes(&self, count: usize) {
        self.inner.lock().failing_writes = count;
    }

    /// Number of live listeners still registered
    pub fn listener_count(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.listeners.retain(|l| !l.tx.is_closed());
        inner.listeners.len()
    }

    /// Number of documents in a collection
    pub fn document_count(&self, collection: &str) -> usize {
        self.inner
            .lock()
            .collections
            .get(collection)
            .map_or(0, |c| c.len())
    }

    /// Successful writes so far
    pub fn write_count(&self) -> u64 {
        self.inner.lock().write_count
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, collection: &str, id: &str) -> AlbumResult<Option<Document>> {
        let inner = self.inner.lock();
        inner.check_online()?;
        Ok(inner
            .collections
            .get(collection)
            .and_then(|c| c.get(id))
            .map(|data| Document {
                id: id.to_string(),
                data: data.clone(),
            }))
    }

    async fn set(&self, collection: &str, id: &str, data: Value) -> AlbumResult<()> {
        let mut inner = self.inner.lock();
        inner.check_write()?;
        trace!(collection, id, "set document");
        inner
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), data);
        inner.write_count += 1;
        inner.notify();
        Ok(())
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        fields: Vec<FieldUpdate>,
    ) -> AlbumResult<()> {
        let mut inner = self.inner.lock();
        inner.check_write()?;
        trace!(collection, id, fields = fields.len(), "update document");
        let doc = inner
            .collections
            .get_mut(collection)
            .and_then(|c| c.get_mut(id))
            .ok_or_else(|| AlbumError::NotFound(format!("{}/{}", collection, id)))?;
        apply_fields(doc, &fields)?;
        inner.write_count += 1;
        inner.notify();
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> AlbumResult<()> {
        let mut inner = self.inner.lock();
        inner.check_write()?;
        trace!(collection, id, "delete document");
        let removed = inner
            .collections
            .get_mut(collection)
            .and_then(|c| c.remove(id))
            .is_some();
        if removed {
            inner.write_count += 1;
            inner.notify();
        }
        Ok(())
    }

    async fn query(&self, query: &Query) -> AlbumResult<Vec<Document>> {
        let inner = self.inner.lock();
        inner.check_online()?;
        Ok(inner.run_query(query))
    }

    async fn commit(&self, writes: Vec<BatchWrite>) -> AlbumResult<()> {
        let mut inner = self.inner.lock();
        inner.check_write()?;

        // Stage on a copy so a failing write leaves nothing behind
        let mut staged = inner.collections.clone();
        for write in &writes {
            apply_write(&mut staged, write)?;
        }
        inner.collections = staged;
        inner.write_count += 1;
        debug!(writes = writes.len(), "committed batch");
        inner.notify();
        Ok(())
    }

    fn listen(&self, query: Query) -> QueryListener {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock();

        let id = inner.next_listener_id;
        inner.next_listener_id += 1;

        let last = if inner.offline {
            let _ = tx.send(Err(AlbumError::TransientIo("remote store unreachable".into())));
            None
        } else {
            let docs = inner.run_query(&query);
            let _ = tx.send(Ok(docs.clone()));
            Some(docs)
        };

        debug!(listener = id, collection = %query.collection, "listener registered");
        inner.listeners.push(ListenerEntry {
            id,
            query,
            tx,
            last,
        });

        let weak = Arc::downgrade(&self.inner);
        let registration = ListenerRegistration::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.lock().listeners.retain(|l| l.id != id);
                debug!(listener = id, "listener removed");
            }
        });

        QueryListener {
            snapshots: rx,
            registration,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ids(docs: &[Document]) -> Vec<&str> {
        docs.iter().map(|d| d.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = MemoryDocumentStore::new();
        store.set("things", "a", json!({"n": 1})).await.unwrap();

        let doc = store.get("things", "a").await.unwrap().unwrap();
        assert_eq!(doc.data["n"], 1);

        store.delete("things", "a").await.unwrap();
        assert!(store.get("things", "a").await.unwrap().is_none());
        // Deleting again is fine
        store.delete("things", "a").await.unwrap();
    }

    #[tokio::test]
    async fn test_query_filters_order_limit() {
        let store = MemoryDocumentStore::new();
        store
            .set("albums", "a", json!({"members": ["u1"], "updatedAt": 10}))
            .await
            .unwrap();
        store
            .set("albums", "b", json!({"members": ["u1", "u2"], "updatedAt": 30}))
            .await
            .unwrap();
        store
            .set("albums", "c", json!({"members": ["u2"], "updatedAt": 20}))
            .await
            .unwrap();

        let q = Query::collection("albums")
            .where_array_contains("members", "u1")
            .order_by("updatedAt", Direction::Descending);
        assert_eq!(ids(&store.query(&q).await.unwrap()), vec!["b", "a"]);

        let q = Query::collection("albums")
            .order_by("updatedAt", Direction::Ascending)
            .limit(2);
        assert_eq!(ids(&store.query(&q).await.unwrap()), vec!["a", "c"]);

        let q = Query::collection("albums").where_eq("updatedAt", 20);
        assert_eq!(ids(&store.query(&q).await.unwrap()), vec!["c"]);
    }

    #[tokio::test]
    async fn test_update_missing_document_is_not_found() {
        let store = MemoryDocumentStore::new();
        let result = store
            .update("things", "nope", vec![FieldUpdate::set("x", 1)])
            .await;
        assert!(matches!(result, Err(AlbumError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_array_union_skips_existing() {
        let store = MemoryDocumentStore::new();
        store
            .set("albums", "a", json!({"members": ["u1"]}))
            .await
            .unwrap();
        store
            .update(
                "albums",
                "a",
                vec![FieldUpdate::ArrayUnion(
                    "members".into(),
                    vec![json!("u1"), json!("u2")],
                )],
            )
            .await
            .unwrap();
        let doc = store.get("albums", "a").await.unwrap().unwrap();
        assert_eq!(doc.data["members"], json!(["u1", "u2"]));
    }

    #[tokio::test]
    async fn test_batch_is_all_or_nothing() {
        let store = MemoryDocumentStore::new();
        store.set("n", "a", json!({"isRead": false})).await.unwrap();

        let result = store
            .commit(vec![
                BatchWrite::Update {
                    collection: "n".into(),
                    id: "a".into(),
                    fields: vec![FieldUpdate::set("isRead", true)],
                },
                BatchWrite::Update {
                    collection: "n".into(),
                    id: "missing".into(),
                    fields: vec![FieldUpdate::set("isRead", true)],
                },
            ])
            .await;
        assert!(result.is_err());

        let doc = store.get("n", "a").await.unwrap().unwrap();
        assert_eq!(doc.data["isRead"], false);
    }

    #[tokio::test]
    async fn test_listener_receives_initial_and_changed_snapshots() {
        let store = MemoryDocumentStore::new();
        store.set("n", "a", json!({"to": "u1"})).await.unwrap();

        let mut listener = store.listen(Query::collection("n").where_eq("to", "u1"));
        let first = listener.snapshots.recv().await.unwrap().unwrap();
        assert_eq!(ids(&first), vec!["a"]);

        // Unrelated write does not re-deliver
        store.set("n", "b", json!({"to": "u2"})).await.unwrap();
        store.set("n", "c", json!({"to": "u1"})).await.unwrap();
        let second = listener.snapshots.recv().await.unwrap().unwrap();
        assert_eq!(ids(&second), vec!["a", "c"]);
        assert!(listener.snapshots.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_removing_registration_drops_listener() {
        let store = MemoryDocumentStore::new();
        let listener = store.listen(Query::collection("n"));
        assert_eq!(store.listener_count(), 1);
        listener.registration.remove();
        assert_eq!(store.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_offline_and_injected_failures() {
        let store = MemoryDocumentStore::new();
        store.fail_next_writes(1);
        let result = store.set("n", "a", json!({})).await;
        assert!(matches!(result, Err(AlbumError::TransientIo(_))));
        store.set("n", "a", json!({})).await.unwrap();

        let mut listener = store.listen(Query::collection("n"));
        let _ = listener.snapshots.recv().await;

        store.set_offline(true);
        assert!(listener.snapshots.recv().await.unwrap().is_err());
        assert!(store.get("n", "a").await.is_err());

        store.set_offline(false);
        let docs = listener.snapshots.recv().await.unwrap().unwrap();
        assert_eq!(docs.len(), 1);
    }

    #[test]
    fn test_compare_values_orders_numbers_numerically() {
        assert_eq!(compare_values(&json!(9), &json!(10)), Ordering::Less);
        assert_eq!(compare_values(&json!("b"), &json!("a")), Ordering::Greater);
        assert_eq!(compare_values(&Value::Null, &json!(0)), Ordering::Less);
    }
}
