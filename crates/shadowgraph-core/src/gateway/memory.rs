// ── In-memory store ──
//
// A `StoreGateway` over plain maps. Used by the test suites and by the
// daemon's dry-run mode, which seeds it from a JSON snapshot. Read
// failures can be injected to exercise the retry path.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use super::StoreGateway;
use crate::error::CoreError;
use crate::model::{FqName, ObjectId, ResourceType};

#[derive(Default)]
struct MemoryInner {
    objects: HashMap<ResourceType, BTreeMap<ObjectId, Value>>,
    names: HashMap<ResourceType, HashMap<String, ObjectId>>,
}

/// In-memory [`StoreGateway`].
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
    read_failures: AtomicUsize,
    reads: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a snapshot shaped like
    /// `{"virtual_network": [{...}, ...], "route_target": [...]}`.
    pub fn from_seed(seed: &Value) -> Result<Self, CoreError> {
        let store = Self::new();
        let Some(kinds) = seed.as_object() else {
            return Err(CoreError::MalformedPayload {
                kind: "seed".into(),
                id: "-".into(),
                reason: "expected an object keyed by resource type".into(),
            });
        };

        for (kind, objects) in kinds {
            let kind = ResourceType::from(kind.replace('-', "_"));
            for payload in objects.as_array().into_iter().flatten() {
                store.put(&kind, payload.clone())?;
            }
        }
        Ok(store)
    }

    /// Insert or replace an object. Its identity is the payload's `uuid`,
    /// or the joined `fq_name` when no UUID is present.
    pub fn put(&self, kind: &ResourceType, payload: Value) -> Result<ObjectId, CoreError> {
        let fq_name: FqName = payload
            .get("fq_name")
            .and_then(Value::as_array)
            .map(|parts| parts.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        if fq_name.is_empty() {
            return Err(CoreError::MalformedPayload {
                kind: kind.to_string(),
                id: "-".into(),
                reason: "missing fq_name".into(),
            });
        }

        let id = payload
            .get("uuid")
            .and_then(Value::as_str)
            .map_or_else(|| fq_name.as_id(), ObjectId::from);

        let mut inner = self.inner.write();
        inner
            .names
            .entry(kind.clone())
            .or_default()
            .insert(fq_name.to_string(), id.clone());
        inner
            .objects
            .entry(kind.clone())
            .or_default()
            .insert(id.clone(), payload);
        Ok(id)
    }

    /// Remove an object, returning its last body.
    pub fn remove(&self, kind: &ResourceType, id: &ObjectId) -> Option<Value> {
        let mut inner = self.inner.write();
        let removed = inner.objects.get_mut(kind)?.remove(id)?;
        if let Some(names) = inner.names.get_mut(kind) {
            names.retain(|_, v| v != id);
        }
        Some(removed)
    }

    /// Current body of an object, bypassing failure injection.
    pub fn get(&self, kind: &ResourceType, id: &ObjectId) -> Option<Value> {
        self.inner.read().objects.get(kind)?.get(id).cloned()
    }

    /// Make the next `count` reads fail with a transient error.
    pub fn inject_read_failures(&self, count: usize) {
        self.read_failures.store(count, Ordering::SeqCst);
    }

    /// Number of `read` calls served so far, failed ones included.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> bool {
        self.read_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn canonical_id(inner: &MemoryInner, kind: &ResourceType, id: &ObjectId) -> Option<ObjectId> {
        let objects = inner.objects.get(kind)?;
        if objects.contains_key(id) {
            return Some(id.clone());
        }
        let name = id.as_name()?;
        inner.names.get(kind)?.get(name).cloned()
    }
}

#[async_trait]
impl StoreGateway for MemoryStore {
    async fn read(&self, kind: &ResourceType, id: &ObjectId) -> Result<Option<Value>, CoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.take_failure() {
            return Err(CoreError::ConnectionFailed {
                url: "memory://".into(),
                reason: "injected read failure".into(),
            });
        }

        let inner = self.inner.read();
        let Some(id) = Self::canonical_id(&inner, kind, id) else {
            return Ok(None);
        };
        Ok(inner.objects.get(kind).and_then(|m| m.get(&id)).cloned())
    }

    async fn list(&self, kind: &ResourceType) -> Result<Vec<(FqName, ObjectId)>, CoreError> {
        let inner = self.inner.read();
        let Some(objects) = inner.objects.get(kind) else {
            return Ok(Vec::new());
        };
        Ok(objects
            .iter()
            .map(|(id, payload)| {
                let fq_name: FqName = payload
                    .get("fq_name")
                    .and_then(Value::as_array)
                    .map(|parts| parts.iter().filter_map(Value::as_str).collect())
                    .unwrap_or_default();
                (fq_name, id.clone())
            })
            .collect())
    }

    async fn resolve(
        &self,
        kind: &ResourceType,
        fq_name: &FqName,
    ) -> Result<Option<ObjectId>, CoreError> {
        let inner = self.inner.read();
        Ok(inner
            .names
            .get(kind)
            .and_then(|names| names.get(&fq_name.to_string()))
            .cloned())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vn() -> ResourceType {
        ResourceType::from("virtual_network")
    }

    #[tokio::test]
    async fn put_then_read_by_uuid_and_name() {
        let store = MemoryStore::new();
        let id = store
            .put(
                &vn(),
                json!({
                    "uuid": "8a0b6fd4-8f8b-4b9f-a4f3-4b9b2f0c1d2e",
                    "fq_name": ["default-domain", "admin", "vn-blue"]
                }),
            )
            .unwrap();
        assert!(id.as_uuid().is_some());

        assert!(store.read(&vn(), &id).await.unwrap().is_some());
        let by_name = ObjectId::Name("default-domain:admin:vn-blue".into());
        assert!(store.read(&vn(), &by_name).await.unwrap().is_some());

        let fq: FqName = ["default-domain", "admin", "vn-blue"].into_iter().collect();
        assert_eq!(store.resolve(&vn(), &fq).await.unwrap(), Some(id));
    }

    #[tokio::test]
    async fn injected_failures_are_transient_and_counted() {
        let store = MemoryStore::new();
        let id = store
            .put(&vn(), json!({"fq_name": ["default-domain", "admin", "vn-red"]}))
            .unwrap();
        store.inject_read_failures(1);

        let err = store.read(&vn(), &id).await.unwrap_err();
        assert!(err.is_transient());
        assert!(store.read(&vn(), &id).await.unwrap().is_some());
        assert_eq!(store.reads(), 2);
    }

    #[tokio::test]
    async fn remove_forgets_name() {
        let store = MemoryStore::new();
        let id = store
            .put(&vn(), json!({"fq_name": ["default-domain", "admin", "vn-red"]}))
            .unwrap();
        assert!(store.remove(&vn(), &id).is_some());

        let fq: FqName = ["default-domain", "admin", "vn-red"].into_iter().collect();
        assert!(store.resolve(&vn(), &fq).await.unwrap().is_none());
        assert!(store.list(&vn()).await.unwrap().is_empty());
    }

    #[test]
    fn seed_requires_fq_names() {
        let err = MemoryStore::from_seed(&json!({"project": [{"uuid": "x"}]})).err();
        assert!(matches!(err, Some(CoreError::MalformedPayload { .. })));
    }

    #[tokio::test]
    async fn seed_normalizes_dashed_types() {
        let store = MemoryStore::from_seed(&json!({
            "route-target": [{"fq_name": ["target:64512:1"]}]
        }))
        .unwrap();
        let listed = store.list(&"route_target".into()).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].0.to_string(), "target:64512:1");
    }
}
