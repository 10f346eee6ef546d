// ── Per-type object table ──
//
// Primary storage keyed by cache identity, plus secondary indexes so an
// object can be found by store UUID or by joined FQ name regardless of
// which of the two its type is indexed by.

use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::model::{CachedObject, ObjectId};

#[derive(Default)]
pub(crate) struct ObjectTable {
    /// Primary storage: cache identity -> object.
    objects: HashMap<ObjectId, Arc<CachedObject>>,

    /// Secondary index: joined FQ name -> cache identity.
    by_name: HashMap<String, ObjectId>,

    /// Secondary index: store UUID -> cache identity.
    by_uuid: HashMap<Uuid, ObjectId>,
}

impl ObjectTable {
    /// Insert a new object, replacing any previous one with the same id.
    pub(crate) fn insert(&mut self, object: CachedObject) {
        let id = object.key.id.clone();
        if let Some(previous) = self.objects.get(&id).cloned() {
            self.unindex(&previous);
        }
        self.by_name.insert(object.fq_name.to_string(), id.clone());
        if let Some(uuid) = object.uuid {
            self.by_uuid.insert(uuid, id.clone());
        }
        self.objects.insert(id, Arc::new(object));
    }

    /// Remove an object by cache identity.
    pub(crate) fn remove(&mut self, id: &ObjectId) -> Option<Arc<CachedObject>> {
        let removed = self.objects.remove(id)?;
        self.unindex(&removed);
        Some(removed)
    }

    /// Map any identity form (cache id, UUID, joined name) to the cache id.
    pub(crate) fn canonical(&self, id: &ObjectId) -> Option<&ObjectId> {
        if let Some((key, _)) = self.objects.get_key_value(id) {
            return Some(key);
        }
        match id {
            ObjectId::Uuid(uuid) => self.by_uuid.get(uuid),
            ObjectId::Name(name) => self.by_name.get(name),
        }
    }

    pub(crate) fn get(&self, id: &ObjectId) -> Option<&Arc<CachedObject>> {
        let id = self.canonical(id)?;
        self.objects.get(id)
    }

    pub(crate) fn contains(&self, id: &ObjectId) -> bool {
        self.objects.contains_key(id)
    }

    /// Copy-on-write access by cache identity. Readers holding an `Arc`
    /// from [`get`](Self::get) keep seeing the old version.
    pub(crate) fn get_mut(&mut self, id: &ObjectId) -> Option<&mut CachedObject> {
        self.objects.get_mut(id).map(Arc::make_mut)
    }

    /// Refresh secondary indexes after an object's name or UUID changed.
    pub(crate) fn reindex(&mut self, id: &ObjectId, old_name: &str, old_uuid: Option<Uuid>) {
        if self.by_name.get(old_name) == Some(id) {
            self.by_name.remove(old_name);
        }
        if let Some(uuid) = old_uuid {
            if self.by_uuid.get(&uuid) == Some(id) {
                self.by_uuid.remove(&uuid);
            }
        }
        if let Some(object) = self.objects.get(id) {
            self.by_name.insert(object.fq_name.to_string(), id.clone());
            if let Some(uuid) = object.uuid {
                self.by_uuid.insert(uuid, id.clone());
            }
        }
    }

    pub(crate) fn values(&self) -> impl Iterator<Item = &Arc<CachedObject>> {
        self.objects.values()
    }

    pub(crate) fn ids(&self) -> impl Iterator<Item = &ObjectId> {
        self.objects.keys()
    }

    pub(crate) fn len(&self) -> usize {
        self.objects.len()
    }

    pub(crate) fn clear(&mut self) {
        self.objects.clear();
        self.by_name.clear();
        self.by_uuid.clear();
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn unindex(&mut self, object: &CachedObject) {
        let id = &object.key.id;
        let name = object.fq_name.to_string();
        if self.by_name.get(&name) == Some(id) {
            self.by_name.remove(&name);
        }
        if let Some(uuid) = object.uuid {
            if self.by_uuid.get(&uuid) == Some(id) {
                self.by_uuid.remove(&uuid);
            }
        }
    }
}
