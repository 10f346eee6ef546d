// ── Change events ──
//
// Validated form of a bus notification. Raw wire messages are loose; the
// conversion here is the single place that decides what is malformed.

use serde::{Deserialize, Serialize};
use shadowgraph_api::RawChangeEvent;
use strum::{Display, EnumString};

use super::identity::{FqName, ObjectId, ResourceType};
use crate::error::CoreError;

/// What happened to the object.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
#[strum(serialize_all = "SCREAMING-KEBAB-CASE")]
pub enum Operation {
    Create,
    Update,
    /// Reference-only update performed on the object's behalf by the store.
    UpdateImplicit,
    Delete,
}

/// One change notification, ready for the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeEvent {
    pub resource_type: ResourceType,
    pub operation: Operation,
    /// Store UUID when the publisher sent one, else the colon-joined FQ name.
    pub identity: ObjectId,
    pub fq_name: FqName,
    /// Correlates all notifications caused by one API request.
    pub correlation_id: Option<String>,
}

impl ChangeEvent {
    pub fn new(
        resource_type: impl Into<ResourceType>,
        operation: Operation,
        identity: impl Into<ObjectId>,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            operation,
            identity: identity.into(),
            fq_name: FqName::default(),
            correlation_id: None,
        }
    }

    #[must_use]
    pub fn with_fq_name(mut self, fq_name: FqName) -> Self {
        self.fq_name = fq_name;
        self
    }

    #[must_use]
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }
}

impl TryFrom<RawChangeEvent> for ChangeEvent {
    type Error = CoreError;

    fn try_from(raw: RawChangeEvent) -> Result<Self, Self::Error> {
        let oper = raw.oper.ok_or_else(|| CoreError::MalformedEvent {
            reason: "missing 'oper'".into(),
        })?;
        let operation: Operation = oper.parse().map_err(|_| CoreError::MalformedEvent {
            reason: format!("unknown operation '{oper}'"),
        })?;

        let resource_type = raw
            .resource_type
            .filter(|t| !t.is_empty())
            .map(|t| ResourceType::from(t.replace('-', "_")))
            .ok_or_else(|| CoreError::MalformedEvent {
                reason: "missing 'type'".into(),
            })?;

        let fq_name = FqName::new(raw.fq_name.unwrap_or_default());

        let identity = match raw.uuid.filter(|u| !u.is_empty()) {
            Some(uuid) => ObjectId::from(uuid),
            None if !fq_name.is_empty() => fq_name.as_id(),
            None => {
                return Err(CoreError::MalformedEvent {
                    reason: format!("{resource_type} event carries neither uuid nor fq_name"),
                });
            }
        };

        Ok(Self {
            resource_type,
            operation,
            identity,
            fq_name,
            correlation_id: raw.request_id,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn raw(json: &str) -> RawChangeEvent {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn operation_wire_names() {
        assert_eq!(
            "UPDATE-IMPLICIT".parse::<Operation>().unwrap(),
            Operation::UpdateImplicit
        );
        assert_eq!(Operation::Create.to_string(), "CREATE");
        assert_eq!(
            serde_json::to_string(&Operation::UpdateImplicit).unwrap(),
            "\"UPDATE-IMPLICIT\""
        );
    }

    #[test]
    fn converts_full_notification() {
        let event = ChangeEvent::try_from(raw(
            r#"{"oper": "UPDATE", "type": "virtual-network",
                "uuid": "8a0b6fd4-8f8b-4b9f-a4f3-4b9b2f0c1d2e",
                "fq_name": ["default-domain", "admin", "vn-blue"],
                "request_id": "req-1"}"#,
        ))
        .unwrap();

        assert_eq!(event.operation, Operation::Update);
        assert_eq!(event.resource_type.as_str(), "virtual_network");
        assert!(event.identity.as_uuid().is_some());
        assert_eq!(event.fq_name.to_string(), "default-domain:admin:vn-blue");
        assert_eq!(event.correlation_id.as_deref(), Some("req-1"));
    }

    #[test]
    fn falls_back_to_fq_name_identity() {
        let event = ChangeEvent::try_from(raw(
            r#"{"oper": "DELETE", "type": "route_target", "fq_name": ["target:64512:1"]}"#,
        ))
        .unwrap();

        assert_eq!(event.identity, ObjectId::Name("target:64512:1".into()));
    }

    #[test]
    fn rejects_missing_identity() {
        let err = ChangeEvent::try_from(raw(r#"{"oper": "CREATE", "type": "project"}"#))
            .unwrap_err();
        assert!(matches!(err, CoreError::MalformedEvent { .. }));
    }

    #[test]
    fn rejects_unknown_operation() {
        let err = ChangeEvent::try_from(raw(
            r#"{"oper": "RENAME", "type": "project", "uuid": "x"}"#,
        ))
        .unwrap_err();
        assert!(err.to_string().contains("RENAME"));
    }

    #[test]
    fn rejects_missing_type() {
        let err = ChangeEvent::try_from(raw(r#"{"oper": "CREATE", "uuid": "x"}"#)).unwrap_err();
        assert!(matches!(err, CoreError::MalformedEvent { .. }));
    }
}
