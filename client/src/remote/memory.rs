//! In-process remote: document store, blob storage and procedures.
//!
//! Behaves like the hosted services closely enough to run the sync reconciler
//! end-to-end in tests. It can be taken offline, in which case every call
//! fails with [`RemoteError::Offline`].

use super::{
    BatchOp, BlobStore, ChangeBatch, Filter, ProcedureGateway, ProcedureResponse, RemoteChange,
    RemoteError, RemoteResult, RemoteStore,
};
use async_trait::async_trait;
use catalog_engine::SyncCursor;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

type Handler = Arc<dyn Fn(Value) -> ProcedureResponse + Send + Sync>;

#[derive(Debug, Clone)]
struct Entry {
    stamp: u64,
    document: Value,
}

#[derive(Default)]
struct State {
    collections: HashMap<String, BTreeMap<String, Entry>>,
    blobs: BTreeMap<String, (Vec<u8>, String)>,
    procedures: HashMap<String, Handler>,
    calls: Vec<(String, Value)>,
    last_stamp: u64,
}

impl State {
    fn write(&mut self, collection: &str, id: &str, mut document: Value) {
        if let Value::Object(fields) = &mut document {
            fields.insert("id".into(), Value::String(id.to_string()));
        }
        self.last_stamp += 1;
        let stamp = self.last_stamp;
        self.collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), Entry { stamp, document });
    }

    fn merge(&mut self, collection: &str, id: &str, fields: Map<String, Value>) -> RemoteResult<()> {
        let mut document = self
            .collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|entry| entry.document.clone())
            .ok_or_else(|| RemoteError::NotFound(format!("{collection}/{id}")))?;
        if let Value::Object(existing) = &mut document {
            existing.extend(fields);
        }
        self.write(collection, id, document);
        Ok(())
    }

    fn remove(&mut self, collection: &str, id: &str) {
        if let Some(docs) = self.collections.get_mut(collection) {
            docs.remove(id);
        }
    }
}

/// Remote services held in memory.
pub struct MemoryRemote {
    state: Mutex<State>,
    online: AtomicBool,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            online: AtomicBool::new(true),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Write a document directly, as another device would.
    pub fn put_document(&self, collection: &str, id: &str, document: Value) {
        self.lock().write(collection, id, document);
    }

    /// Remove a document directly, as another device would.
    pub fn remove_document(&self, collection: &str, id: &str) {
        self.lock().remove(collection, id);
    }

    pub fn document(&self, collection: &str, id: &str) -> Option<Value> {
        self.lock()
            .collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|entry| entry.document.clone())
    }

    /// Every document of `collection`, by id.
    pub fn documents(&self, collection: &str) -> Vec<Value> {
        self.lock()
            .collections
            .get(collection)
            .map(|docs| docs.values().map(|e| e.document.clone()).collect())
            .unwrap_or_default()
    }

    /// Stored bytes and content type of the blob at `path`.
    pub fn blob(&self, path: &str) -> Option<(Vec<u8>, String)> {
        self.lock().blobs.get(path).cloned()
    }

    pub fn register_procedure<F>(&self, name: &str, handler: F)
    where
        F: Fn(Value) -> ProcedureResponse + Send + Sync + 'static,
    {
        self.lock()
            .procedures
            .insert(name.to_string(), Arc::new(handler));
    }

    /// Procedure calls received so far, in order.
    pub fn procedure_calls(&self) -> Vec<(String, Value)> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn connect(&self) -> RemoteResult<MutexGuard<'_, State>> {
        if self.is_online() {
            Ok(self.lock())
        } else {
            Err(RemoteError::Offline)
        }
    }
}

impl std::fmt::Debug for MemoryRemote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRemote")
            .field("online", &self.is_online())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn create(&self, collection: &str, document: Value) -> RemoteResult<String> {
        let id = uuid::Uuid::new_v4().to_string();
        self.connect()?.write(collection, &id, document);
        Ok(id)
    }

    async fn get(&self, collection: &str, id: &str) -> RemoteResult<Option<Value>> {
        let state = self.connect()?;
        Ok(state
            .collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|entry| entry.document.clone()))
    }

    async fn set(&self, collection: &str, id: &str, document: Value) -> RemoteResult<()> {
        self.connect()?.write(collection, id, document);
        Ok(())
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> RemoteResult<()> {
        self.connect()?.merge(collection, id, fields)
    }

    async fn delete(&self, collection: &str, id: &str) -> RemoteResult<()> {
        self.connect()?.remove(collection, id);
        Ok(())
    }

    async fn query(&self, collection: &str, filters: &[Filter]) -> RemoteResult<Vec<Value>> {
        let state = self.connect()?;
        Ok(state
            .collections
            .get(collection)
            .map(|docs| {
                docs.values()
                    .filter(|e| filters.iter().all(|f| f.matches(&e.document)))
                    .map(|e| e.document.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn changes_since(
        &self,
        collection: &str,
        cursor: &SyncCursor,
        limit: usize,
    ) -> RemoteResult<ChangeBatch> {
        let state = self.connect()?;
        let mut changes: Vec<RemoteChange> = state
            .collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, entry)| RemoteChange {
                        stamp: entry.stamp,
                        id: id.clone(),
                        document: entry.document.clone(),
                    })
                    .filter(|change| change.cursor() > *cursor)
                    .collect()
            })
            .unwrap_or_default();
        changes.sort_by(|a, b| a.stamp.cmp(&b.stamp).then_with(|| a.id.cmp(&b.id)));

        let has_more = changes.len() > limit;
        changes.truncate(limit);
        Ok(ChangeBatch { changes, has_more })
    }

    async fn batch_write(&self, ops: Vec<BatchOp>) -> RemoteResult<()> {
        let mut state = self.connect()?;
        // Staged on a copy so a failing op leaves nothing behind.
        let mut staged = State {
            collections: state.collections.clone(),
            last_stamp: state.last_stamp,
            ..State::default()
        };
        for op in ops {
            match op {
                BatchOp::Set {
                    collection,
                    id,
                    document,
                } => staged.write(&collection, &id, document),
                BatchOp::Update {
                    collection,
                    id,
                    fields,
                } => staged.merge(&collection, &id, fields)?,
                BatchOp::Delete { collection, id } => staged.remove(&collection, &id),
            }
        }
        state.collections = staged.collections;
        state.last_stamp = staged.last_stamp;
        Ok(())
    }
}

#[async_trait]
impl BlobStore for MemoryRemote {
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> RemoteResult<String> {
        self.connect()?
            .blobs
            .insert(path.to_string(), (bytes, content_type.to_string()));
        Ok(format!("memory://blobs/{path}"))
    }

    async fn delete(&self, path: &str) -> RemoteResult<()> {
        self.connect()?.blobs.remove(path);
        Ok(())
    }
}

#[async_trait]
impl ProcedureGateway for MemoryRemote {
    async fn call(&self, name: &str, payload: Value) -> RemoteResult<ProcedureResponse> {
        let handler = {
            let mut state = self.connect()?;
            state.calls.push((name.to_string(), payload.clone()));
            state.procedures.get(name).cloned()
        };
        match handler {
            Some(handler) => Ok(handler(payload)),
            None => Err(RemoteError::NotFound(format!("procedure {name}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn change_history_pages_in_stamp_order() {
        let remote = MemoryRemote::new();
        remote.put_document("products", "b", json!({"name": "B"}));
        remote.put_document("products", "a", json!({"name": "A"}));
        remote.put_document("products", "c", json!({"name": "C"}));

        let first = remote
            .changes_since("products", &SyncCursor::origin(), 2)
            .await
            .unwrap();
        let ids: Vec<_> = first.changes.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert!(first.has_more);

        let cursor = first.changes[1].cursor();
        let rest = remote.changes_since("products", &cursor, 2).await.unwrap();
        assert_eq!(rest.changes.len(), 1);
        assert_eq!(rest.changes[0].document["id"], "c");
        assert!(!rest.has_more);

        // Rewriting moves a document to the end of the history.
        remote.put_document("products", "b", json!({"name": "B2"}));
        let again = remote.changes_since("products", &cursor, 10).await.unwrap();
        let ids: Vec<_> = again.changes.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b"]);
    }

    #[tokio::test]
    async fn offline_fails_everything() {
        let remote = MemoryRemote::new();
        remote.set_online(false);

        assert_eq!(
            remote.set("products", "p1", json!({})).await,
            Err(RemoteError::Offline)
        );
        assert_eq!(
            BlobStore::delete(&remote, "products/o/1_a.png").await,
            Err(RemoteError::Offline)
        );

        remote.set_online(true);
        assert!(remote.set("products", "p1", json!({})).await.is_ok());
    }

    #[tokio::test]
    async fn batch_is_all_or_nothing() {
        let remote = MemoryRemote::new();
        remote.put_document("tables", "t1", json!({"status": "free"}));

        let failed = remote
            .batch_write(vec![
                BatchOp::Set {
                    collection: "orders".into(),
                    id: "o1".into(),
                    document: json!({"tableId": "t1"}),
                },
                BatchOp::Update {
                    collection: "tables".into(),
                    id: "missing".into(),
                    fields: Map::new(),
                },
            ])
            .await;
        assert!(matches!(failed, Err(RemoteError::NotFound(_))));
        assert!(remote.document("orders", "o1").is_none());

        let mut fields = Map::new();
        fields.insert("status".into(), json!("occupied"));
        remote
            .batch_write(vec![
                BatchOp::Set {
                    collection: "orders".into(),
                    id: "o1".into(),
                    document: json!({"tableId": "t1"}),
                },
                BatchOp::Update {
                    collection: "tables".into(),
                    id: "t1".into(),
                    fields,
                },
            ])
            .await
            .unwrap();
        assert_eq!(remote.document("tables", "t1").unwrap()["status"], "occupied");
        assert!(remote.document("orders", "o1").is_some());
    }

    #[tokio::test]
    async fn procedures_are_recorded() {
        let remote = MemoryRemote::new();
        remote.register_procedure("createOrder", |_| ProcedureResponse::ok(json!({"sequence": 7})));

        let response = remote.call("createOrder", json!({"lines": []})).await.unwrap();
        assert!(response.success);
        assert_eq!(response.data["sequence"], 7);
        assert!(matches!(
            remote.call("unknown", json!({})).await,
            Err(RemoteError::NotFound(_))
        ));
        assert_eq!(remote.procedure_calls().len(), 2);
    }
}
