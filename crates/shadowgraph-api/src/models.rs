// Wire types shared by the config-store client and the change feed.
//
// These mirror the JSON the config API and the notification bus emit.
// They are intentionally loose (everything optional) -- validation
// happens in `shadowgraph-core` when raw messages become domain events.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One change notification as published on the bus.
///
/// Field names follow the bus encoding (`oper`, `type`, `request_id`).
/// Unknown fields are kept in `extra` so nothing the publisher sends is
/// silently dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawChangeEvent {
    /// `CREATE`, `UPDATE`, `UPDATE-IMPLICIT` or `DELETE`.
    #[serde(default)]
    pub oper: Option<String>,

    /// Resource type, e.g. `virtual_network`.
    #[serde(rename = "type", default)]
    pub resource_type: Option<String>,

    #[serde(default)]
    pub uuid: Option<String>,

    #[serde(default)]
    pub fq_name: Option<Vec<String>>,

    /// Correlates all notifications caused by one API request.
    #[serde(default, alias = "request-id")]
    pub request_id: Option<String>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Summary entry returned by a collection listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRef {
    pub uuid: Uuid,
    pub fq_name: Vec<String>,
    #[serde(default)]
    pub href: Option<String>,
}

/// Response body of `POST /fqname-to-id`.
#[derive(Debug, Deserialize)]
pub(crate) struct FqNameToIdResponse {
    pub uuid: Uuid,
}

/// Request body of `POST /fqname-to-id`.
#[derive(Debug, Serialize)]
pub(crate) struct FqNameToIdRequest<'a> {
    #[serde(rename = "type")]
    pub resource_type: &'a str,
    pub fq_name: &'a [String],
}
