// ── Core identity types ──
//
// ResourceType, ObjectId and FqName form the foundation of every cached
// object. UUID-indexed and name-indexed resource types share one `ObjectId`
// so callers never branch on the indexing scheme.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

// ── ResourceType ────────────────────────────────────────────────────

/// Name of a schema kind (`virtual_network`, `route_target`, ...).
///
/// Cheap to clone; every cached object and every edge carries one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceType(Arc<str>);

impl ResourceType {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ResourceType {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl AsRef<str> for ResourceType {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ── ObjectId ────────────────────────────────────────────────────────

/// Cache key of one object within its resource type.
///
/// Either the store-assigned UUID, or for name-indexed types the canonical
/// colon-joined fully-qualified name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ObjectId {
    Uuid(Uuid),
    Name(String),
}

impl ObjectId {
    pub fn as_uuid(&self) -> Option<&Uuid> {
        match self {
            Self::Uuid(u) => Some(u),
            Self::Name(_) => None,
        }
    }

    pub fn as_name(&self) -> Option<&str> {
        match self {
            Self::Name(s) => Some(s),
            Self::Uuid(_) => None,
        }
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uuid(u) => write!(f, "{u}"),
            Self::Name(s) => f.write_str(s),
        }
    }
}

impl FromStr for ObjectId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s.to_owned()))
    }
}

impl From<Uuid> for ObjectId {
    fn from(u: Uuid) -> Self {
        Self::Uuid(u)
    }
}

impl From<String> for ObjectId {
    fn from(s: String) -> Self {
        match Uuid::parse_str(&s) {
            Ok(u) => Self::Uuid(u),
            Err(_) => Self::Name(s),
        }
    }
}

impl From<&str> for ObjectId {
    fn from(s: &str) -> Self {
        Self::from(s.to_owned())
    }
}

// ── FqName ──────────────────────────────────────────────────────────

/// Hierarchical fully-qualified name, e.g.
/// `["default-domain", "admin", "vn-blue"]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FqName(Vec<String>);

impl FqName {
    pub fn new(parts: Vec<String>) -> Self {
        Self(parts)
    }

    pub fn parts(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The last component, i.e. the object's own name.
    pub fn leaf(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    /// Name of the parent, if this name has more than one component.
    pub fn parent(&self) -> Option<FqName> {
        match self.0.split_last() {
            Some((_, rest)) if !rest.is_empty() => Some(Self(rest.to_vec())),
            _ => None,
        }
    }

    /// Identity of this object when its type is name-indexed.
    pub fn as_id(&self) -> ObjectId {
        ObjectId::Name(self.to_string())
    }
}

impl fmt::Display for FqName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(":"))
    }
}

impl<S: Into<String>> FromIterator<S> for FqName {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl From<Vec<String>> for FqName {
    fn from(parts: Vec<String>) -> Self {
        Self(parts)
    }
}

// ── ObjectKey ───────────────────────────────────────────────────────

/// Globally unique address of a cached object: `(type, identity)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub kind: ResourceType,
    pub id: ObjectId,
}

impl ObjectKey {
    pub fn new(kind: impl Into<ResourceType>, id: impl Into<ObjectId>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn object_id_from_uuid_string() {
        let id = ObjectId::from("550e8400-e29b-41d4-a716-446655440000");
        assert!(id.as_uuid().is_some());
    }

    #[test]
    fn object_id_from_name() {
        let id = ObjectId::from("target:64512:8000001");
        assert_eq!(id.as_name(), Some("target:64512:8000001"));
    }

    #[test]
    fn object_id_parses_via_from_str() {
        let id: ObjectId = "default-domain:admin:vn-blue".parse().unwrap();
        assert!(id.as_name().is_some());
    }

    #[test]
    fn fq_name_joins_with_colons() {
        let name: FqName = ["default-domain", "admin", "vn-blue"].into_iter().collect();
        assert_eq!(name.to_string(), "default-domain:admin:vn-blue");
        assert_eq!(
            name.as_id(),
            ObjectId::Name("default-domain:admin:vn-blue".into())
        );
        assert_eq!(name.leaf(), Some("vn-blue"));
    }

    #[test]
    fn fq_name_parent_drops_leaf() {
        let name: FqName = ["default-domain", "admin", "vn-blue"].into_iter().collect();
        let parent = name.parent().unwrap();
        assert_eq!(parent.to_string(), "default-domain:admin");

        let root: FqName = ["default-domain"].into_iter().collect();
        assert!(root.parent().is_none());
    }

    #[test]
    fn object_key_display() {
        let key = ObjectKey::new("route_target", "target:64512:1");
        assert_eq!(key.to_string(), "route_target/target:64512:1");
    }

    #[test]
    fn resource_type_serializes_as_plain_string() {
        let kind = ResourceType::from("virtual_network");
        assert_eq!(
            serde_json::to_string(&kind).unwrap(),
            "\"virtual_network\""
        );
    }
}
