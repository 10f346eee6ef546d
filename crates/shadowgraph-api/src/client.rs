// Config store HTTP client
//
// Wraps `reqwest::Client` with the config API's URL layout and response
// envelopes. Resource types use underscores internally and dashes on the
// wire (`virtual_network` -> `/virtual-network/{uuid}`).

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::error::Error;
use crate::models::{FqNameToIdRequest, FqNameToIdResponse, ObjectRef};
use crate::transport::TransportConfig;

/// Raw HTTP client for the configuration store's REST API.
///
/// Every read is a plain GET; "not found" is surfaced as `Ok(None)` so
/// callers can branch on absence without inspecting error variants.
pub struct ConfigClient {
    http: reqwest::Client,
    base_url: Url,
}

impl ConfigClient {
    /// Create a client from a `TransportConfig`.
    pub fn new(base_url: Url, transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self::with_client(http, base_url))
    }

    /// Create a client with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: Url) -> Self {
        Self { http, base_url }
    }

    /// The config API base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── Endpoints ────────────────────────────────────────────────────

    /// Read one object. Returns the object body with the type envelope
    /// (`{"virtual-network": {...}}`) stripped.
    pub async fn read_object(&self, resource: &str, uuid: &Uuid) -> Result<Option<Value>, Error> {
        let url = self.url(&format!("{}/{uuid}", wire_name(resource)))?;
        let Some(body) = self.get_json::<Value>(url).await? else {
            return Ok(None);
        };
        Ok(Some(unwrap_envelope(resource, body)))
    }

    /// List every object of one type.
    pub async fn list_objects(&self, resource: &str) -> Result<Vec<ObjectRef>, Error> {
        let collection = format!("{}s", wire_name(resource));
        let url = self.url(&collection)?;
        let Some(mut body) = self.get_json::<Value>(url).await? else {
            return Ok(Vec::new());
        };
        let items = body
            .get_mut(&collection)
            .map(Value::take)
            .unwrap_or_else(|| Value::Array(Vec::new()));
        serde_json::from_value(items).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body: body.to_string(),
        })
    }

    /// Resolve a fully-qualified name to the object's UUID.
    pub async fn fq_name_to_id(
        &self,
        resource: &str,
        fq_name: &[String],
    ) -> Result<Option<Uuid>, Error> {
        let url = self.url("fqname-to-id")?;
        let wire = wire_name(resource);
        let request = FqNameToIdRequest {
            resource_type: &wire,
            fq_name,
        };
        debug!("POST {url}");
        let resp = self
            .http
            .post(url)
            .json(&request)
            .send()
            .await
            .map_err(Error::Transport)?;
        let Some(body) = Self::parse_response::<FqNameToIdResponse>(resp).await? else {
            return Ok(None);
        };
        Ok(Some(body.uuid))
    }

    // ── Request helpers ──────────────────────────────────────────────

    fn url(&self, path: &str) -> Result<Url, Error> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{base}/{path}"))?)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<Option<T>, Error> {
        debug!("GET {url}");
        let resp = self.http.get(url).send().await.map_err(Error::Transport)?;
        Self::parse_response(resp).await
    }

    /// Map 404 to `None`, any other non-success status to [`Error::Http`],
    /// and decode the body otherwise.
    async fn parse_response<T: DeserializeOwned>(
        resp: reqwest::Response,
    ) -> Result<Option<T>, Error> {
        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = resp.text().await.map_err(Error::Transport)?;
        if !status.is_success() {
            return Err(Error::Http {
                status: status.as_u16(),
                message: body,
            });
        }
        serde_json::from_str(&body)
            .map(Some)
            .map_err(|e| Error::Deserialization {
                message: e.to_string(),
                body,
            })
    }
}

/// `virtual_network` -> `virtual-network`.
fn wire_name(resource: &str) -> String {
    resource.replace('_', "-")
}

/// Strip the single-key type envelope if present.
fn unwrap_envelope(resource: &str, body: Value) -> Value {
    let Value::Object(mut map) = body else {
        return body;
    };
    let dashed = wire_name(resource);
    if let Some(inner) = map.remove(&dashed).or_else(|| map.remove(resource)) {
        return inner;
    }
    Value::Object(map)
}
