// ── Resource registry ──
//
// Startup-time table of every resource type the engine knows about: its
// schema (indexing, parent, references) and the gateway that serves it.
// Unknown types and dangling schema references fail here, at build time,
// never in the middle of reconciliation.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::error::CoreError;
use crate::gateway::StoreGateway;
use crate::model::{FqName, ObjectId, ResourceType};

// ── Schema ──────────────────────────────────────────────────────────

/// How many peers one reference slot may hold.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Cardinality {
    Single,
    #[default]
    Multiple,
}

/// Which identity a resource type is cached under.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Indexing {
    #[default]
    Uuid,
    FqName,
}

/// One declared forward reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefSpec {
    pub name: String,
    pub target: ResourceType,
    pub cardinality: Cardinality,
}

/// Schema metadata for one resource type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceSchema {
    kind: ResourceType,
    indexing: Indexing,
    parent: Option<ResourceType>,
    refs: Vec<RefSpec>,
}

impl ResourceSchema {
    pub fn new(kind: impl Into<ResourceType>) -> Self {
        Self {
            kind: kind.into(),
            indexing: Indexing::default(),
            parent: None,
            refs: Vec::new(),
        }
    }

    pub fn indexed_by(mut self, indexing: Indexing) -> Self {
        self.indexing = indexing;
        self
    }

    pub fn parent(mut self, parent: impl Into<ResourceType>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn reference(
        mut self,
        name: impl Into<String>,
        target: impl Into<ResourceType>,
        cardinality: Cardinality,
    ) -> Self {
        self.refs.push(RefSpec {
            name: name.into(),
            target: target.into(),
            cardinality,
        });
        self
    }

    pub fn single_ref(self, name: impl Into<String>, target: impl Into<ResourceType>) -> Self {
        self.reference(name, target, Cardinality::Single)
    }

    pub fn multi_ref(self, name: impl Into<String>, target: impl Into<ResourceType>) -> Self {
        self.reference(name, target, Cardinality::Multiple)
    }

    pub fn kind(&self) -> &ResourceType {
        &self.kind
    }

    pub fn indexing(&self) -> Indexing {
        self.indexing
    }

    pub fn parent_type(&self) -> Option<&ResourceType> {
        self.parent.as_ref()
    }

    pub fn refs(&self) -> &[RefSpec] {
        &self.refs
    }

    pub fn ref_spec(&self, name: &str) -> Option<&RefSpec> {
        self.refs.iter().find(|spec| spec.name == name)
    }
}

// ── Registry ────────────────────────────────────────────────────────

struct RegistryEntry {
    schema: ResourceSchema,
    store: Arc<dyn StoreGateway>,
}

/// `ResourceType -> {schema, gateway}`, immutable after [`RegistryBuilder::build`].
pub struct ResourceRegistry {
    entries: BTreeMap<ResourceType, RegistryEntry>,
}

impl fmt::Debug for ResourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceRegistry")
            .field("kinds", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ResourceRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn contains(&self, kind: &ResourceType) -> bool {
        self.entries.contains_key(kind)
    }

    pub fn schema(&self, kind: &ResourceType) -> Option<&ResourceSchema> {
        self.entries.get(kind).map(|e| &e.schema)
    }

    /// Like [`schema`](Self::schema), but an unknown type is an error.
    pub fn require(&self, kind: &ResourceType) -> Result<&ResourceSchema, CoreError> {
        self.schema(kind)
            .ok_or_else(|| CoreError::UnknownResourceType {
                kind: kind.to_string(),
            })
    }

    /// Gateway serving `kind`.
    pub fn store(&self, kind: &ResourceType) -> Result<&Arc<dyn StoreGateway>, CoreError> {
        self.entries
            .get(kind)
            .map(|e| &e.store)
            .ok_or_else(|| CoreError::UnknownResourceType {
                kind: kind.to_string(),
            })
    }

    /// Registered types in stable (sorted) order.
    pub fn kinds(&self) -> impl Iterator<Item = &ResourceType> {
        self.entries.keys()
    }

    pub fn schemas(&self) -> impl Iterator<Item = &ResourceSchema> {
        self.entries.values().map(|e| &e.schema)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cache identity for an object of `kind`.
    ///
    /// Name-indexed types use the joined FQ name; UUID-indexed types need
    /// the UUID, and yield `None` without one (the caller must resolve the
    /// name through the gateway first).
    pub fn cache_id(&self, kind: &ResourceType, uuid: Option<&Uuid>, fq_name: &FqName) -> Option<ObjectId> {
        let indexing = self.schema(kind).map_or(Indexing::Uuid, ResourceSchema::indexing);
        if indexing == Indexing::FqName && !fq_name.is_empty() {
            return Some(fq_name.as_id());
        }
        uuid.copied().map(ObjectId::Uuid)
    }
}

// ── Builder ─────────────────────────────────────────────────────────

/// Collects schemas and gateways, then validates them as a whole.
#[derive(Default)]
pub struct RegistryBuilder {
    entries: Vec<RegistryEntry>,
}

impl RegistryBuilder {
    pub fn register(mut self, schema: ResourceSchema, store: Arc<dyn StoreGateway>) -> Self {
        self.entries.push(RegistryEntry { schema, store });
        self
    }

    /// Register several schemas served by the same gateway.
    pub fn register_all(
        mut self,
        schemas: impl IntoIterator<Item = ResourceSchema>,
        store: &Arc<dyn StoreGateway>,
    ) -> Self {
        for schema in schemas {
            self.entries.push(RegistryEntry {
                schema,
                store: Arc::clone(store),
            });
        }
        self
    }

    pub fn build(self) -> Result<ResourceRegistry, CoreError> {
        let mut entries = BTreeMap::new();
        for entry in self.entries {
            let kind = entry.schema.kind.clone();
            if entries.insert(kind.clone(), entry).is_some() {
                return Err(CoreError::Registration {
                    message: format!("resource type {kind} registered twice"),
                });
            }
        }

        for entry in entries.values() {
            let schema = &entry.schema;
            if let Some(parent) = &schema.parent {
                if !entries.contains_key(parent) {
                    return Err(CoreError::Registration {
                        message: format!("{} declares unknown parent type {parent}", schema.kind),
                    });
                }
            }

            let mut seen = std::collections::BTreeSet::new();
            for spec in &schema.refs {
                if !seen.insert(spec.name.as_str()) {
                    return Err(CoreError::Registration {
                        message: format!("{} declares reference {} twice", schema.kind, spec.name),
                    });
                }
                if !entries.contains_key(&spec.target) {
                    return Err(CoreError::Registration {
                        message: format!(
                            "{}.{} points at unknown type {}",
                            schema.kind, spec.name, spec.target
                        ),
                    });
                }
            }
        }

        Ok(ResourceRegistry { entries })
    }
}
