// ── Persistent store gateway ──
//
// The read-only contract the engine needs from the configuration store,
// plus its implementation over the REST `ConfigClient`. The in-memory
// implementation in `memory` backs tests and dry runs.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use serde_json::Value;
use shadowgraph_api::ConfigClient;

use crate::error::CoreError;
use crate::model::{FqName, ObjectId, ResourceType};

/// Read access to the persistent configuration store.
///
/// "Not found" is `Ok(None)`; `Err` is reserved for real failures, which
/// the coordinator classifies with [`CoreError::is_transient`].
#[async_trait]
pub trait StoreGateway: Send + Sync {
    /// Read one object body by store identity.
    async fn read(&self, kind: &ResourceType, id: &ObjectId) -> Result<Option<Value>, CoreError>;

    /// Enumerate every object of one type.
    async fn list(&self, kind: &ResourceType) -> Result<Vec<(FqName, ObjectId)>, CoreError>;

    /// Map a fully-qualified name to the store identity.
    async fn resolve(
        &self,
        kind: &ResourceType,
        fq_name: &FqName,
    ) -> Result<Option<ObjectId>, CoreError>;
}

// ── REST adapter ─────────────────────────────────────────────────────

#[async_trait]
impl StoreGateway for ConfigClient {
    async fn read(&self, kind: &ResourceType, id: &ObjectId) -> Result<Option<Value>, CoreError> {
        match id {
            ObjectId::Uuid(uuid) => Ok(self.read_object(kind.as_str(), uuid).await?),
            // The REST API only reads by UUID; go through name resolution.
            ObjectId::Name(name) => {
                for fq_name in name_candidates(name) {
                    if let Some(ObjectId::Uuid(uuid)) = self.resolve(kind, &fq_name).await? {
                        return Ok(self.read_object(kind.as_str(), &uuid).await?);
                    }
                }
                Ok(None)
            }
        }
    }

    async fn list(&self, kind: &ResourceType) -> Result<Vec<(FqName, ObjectId)>, CoreError> {
        let items = self.list_objects(kind.as_str()).await?;
        Ok(items
            .into_iter()
            .map(|item| (FqName::new(item.fq_name), ObjectId::Uuid(item.uuid)))
            .collect())
    }

    async fn resolve(
        &self,
        kind: &ResourceType,
        fq_name: &FqName,
    ) -> Result<Option<ObjectId>, CoreError> {
        let uuid = self.fq_name_to_id(kind.as_str(), fq_name.parts()).await?;
        Ok(uuid.map(ObjectId::Uuid))
    }
}

/// FQ names a joined cache name may stand for. Components can contain
/// `:` themselves (`target:64512:1`), so the split form is tried first and
/// the whole name as a single component second.
fn name_candidates(name: &str) -> Vec<FqName> {
    let split: FqName = name.split(':').collect();
    if split.parts().len() > 1 {
        vec![split, FqName::new(vec![name.to_owned()])]
    } else {
        vec![split]
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;
    use shadowgraph_api::TransportConfig;
    use url::Url;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    const RT_UUID: &str = "77777777-0000-4000-8000-000000000077";

    #[test]
    fn joined_names_try_the_split_form_first() {
        let candidates = name_candidates("default-domain:admin:blue");
        assert_eq!(candidates[0].parts(), ["default-domain", "admin", "blue"]);
        assert_eq!(candidates[1].parts(), ["default-domain:admin:blue"]);
        assert_eq!(name_candidates("blue").len(), 1);
    }

    #[tokio::test]
    async fn name_with_colons_in_one_component_is_found() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/fqname-to-id"))
            .and(body_json(json!({ "type": "route-target", "fq_name": ["target:64512:1"] })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "uuid": RT_UUID })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/route-target/{RT_UUID}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "route-target": { "uuid": RT_UUID, "fq_name": ["target:64512:1"] }
            })))
            .mount(&server)
            .await;

        let client = ConfigClient::new(Url::parse(&server.uri()).unwrap(), &TransportConfig::default()).unwrap();
        let body = client
            .read(&ResourceType::from("route_target"), &ObjectId::Name("target:64512:1".into()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(body["uuid"], RT_UUID);
    }
}
