// ── Payload parsing ──
//
// Turns an opaque store body into an `ObjectDocument`: the object's own
// identity plus every outgoing edge already expressed as cache keys. All
// gateway I/O (FQ-name resolution of peers) happens here, before the graph
// is touched, so a failed load never leaves a half-applied update behind.
//
// Store bodies follow the config API layout:
//
//   {
//     "uuid": "...",
//     "fq_name": ["default-domain", "admin", "vn-blue"],
//     "parent_type": "project", "parent_uuid": "...",
//     "route_target_refs": [{"to": ["target:64512:1"], "uuid": "...", "attr": null}]
//   }

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::CoreError;
use crate::model::{FqName, ObjectId, ObjectKey, ResourceType};
use crate::registry::{Cardinality, ResourceRegistry};

/// A parsed store body, ready to be applied to the graph.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectDocument {
    pub key: ObjectKey,
    pub uuid: Option<Uuid>,
    pub fq_name: FqName,
    pub payload: Value,
    /// Reference name -> peers, for every reference the schema declares.
    pub refs: BTreeMap<String, Vec<ObjectKey>>,
    pub parent: Option<ObjectKey>,
}

/// Parse `payload` as an object of `kind`, resolving peer names through
/// the registry's gateways. An unresolvable peer drops only that edge.
pub async fn parse_document(
    registry: &ResourceRegistry,
    kind: &ResourceType,
    payload: Value,
) -> Result<ObjectDocument, CoreError> {
    let schema = registry.require(kind)?;
    let Some(body) = payload.as_object() else {
        return Err(malformed(kind, "-", "body is not a JSON object"));
    };

    let fq_name = fq_name_field(body.get("fq_name"));
    if fq_name.is_empty() {
        return Err(malformed(kind, "-", "missing fq_name"));
    }
    let uuid = uuid_field(body.get("uuid"));

    let Some(id) = registry.cache_id(kind, uuid.as_ref(), &fq_name) else {
        return Err(malformed(kind, &fq_name.to_string(), "missing uuid"));
    };
    let key = ObjectKey::new(kind.clone(), id);

    // ── Parent ──
    let parent_kind = body
        .get("parent_type")
        .and_then(Value::as_str)
        .map(|t| ResourceType::from(t.replace('-', "_")))
        .or_else(|| schema.parent_type().cloned());

    let parent = match parent_kind {
        Some(parent_kind) if registry.contains(&parent_kind) => {
            let parent_uuid = uuid_field(body.get("parent_uuid"));
            let parent_fq = fq_name.parent().unwrap_or_default();
            resolve_peer(registry, &key, &parent_kind, parent_uuid, parent_fq)
                .await
                .map(|id| ObjectKey::new(parent_kind, id))
        }
        Some(parent_kind) => {
            debug!(key = %key, parent = %parent_kind, "parent type not tracked");
            None
        }
        None => None,
    };

    // ── References ──
    let mut refs = BTreeMap::new();
    for spec in schema.refs() {
        let field = format!("{}_refs", spec.name);
        let entries: Vec<&Map<String, Value>> = body
            .get(&field)
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_object).collect())
            .unwrap_or_default();

        if spec.cardinality == Cardinality::Single && entries.len() > 1 {
            warn!(
                key = %key,
                reference = %spec.name,
                count = entries.len(),
                "single-valued reference carries several peers, keeping the first"
            );
        }
        let limit = match spec.cardinality {
            Cardinality::Single => 1,
            Cardinality::Multiple => usize::MAX,
        };

        let mut peers = Vec::new();
        for entry in entries.into_iter().take(limit) {
            let peer_uuid = uuid_field(entry.get("uuid"));
            let peer_fq = fq_name_field(entry.get("to"));
            if let Some(id) =
                resolve_peer(registry, &key, &spec.target, peer_uuid, peer_fq).await
            {
                peers.push(ObjectKey::new(spec.target.clone(), id));
            }
        }
        refs.insert(spec.name.clone(), peers);
    }

    Ok(ObjectDocument {
        key,
        uuid,
        fq_name,
        payload,
        refs,
        parent,
    })
}

/// Cache identity of a peer, asking the peer type's gateway when the body
/// only names it. Failures are logged and yield `None`.
async fn resolve_peer(
    registry: &ResourceRegistry,
    owner: &ObjectKey,
    kind: &ResourceType,
    uuid: Option<Uuid>,
    fq_name: FqName,
) -> Option<ObjectId> {
    if let Some(id) = registry.cache_id(kind, uuid.as_ref(), &fq_name) {
        return Some(id);
    }
    if fq_name.is_empty() {
        warn!(key = %owner, peer_type = %kind, "edge has neither uuid nor fq_name, skipping");
        return None;
    }

    let store = registry.store(kind).ok()?;
    match store.resolve(kind, &fq_name).await {
        Ok(Some(id)) => Some(id),
        Ok(None) => {
            warn!(key = %owner, peer_type = %kind, peer = %fq_name, "peer name not found, skipping edge");
            None
        }
        Err(e) => {
            warn!(key = %owner, peer_type = %kind, peer = %fq_name, error = %e, "peer name resolution failed, skipping edge");
            None
        }
    }
}

fn fq_name_field(value: Option<&Value>) -> FqName {
    value
        .and_then(Value::as_array)
        .map(|parts| parts.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

fn uuid_field(value: Option<&Value>) -> Option<Uuid> {
    value
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
}

fn malformed(kind: &ResourceType, id: &str, reason: &str) -> CoreError {
    CoreError::MalformedPayload {
        kind: kind.to_string(),
        id: id.to_owned(),
        reason: reason.to_owned(),
    }
}
