//! Configuration for the shadowgraph daemon.
//!
//! TOML file plus `SHADOWGRAPH_`-prefixed environment, merged with figment,
//! and translation into `shadowgraph_core` / `shadowgraph_api` types: the
//! resource registry, the reaction map, coordinator tuning and transport
//! settings.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use shadowgraph_api::{ReconnectConfig, TlsMode, TransportConfig};
use shadowgraph_core::{
    Cardinality, CoordinatorConfig, CoreError, Indexing, ReactionMap, ReactionRule,
    ResourceRegistry, ResourceSchema, StoreGateway,
};

const ENV_PREFIX: &str = "SHADOWGRAPH_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub feed: FeedConfig,

    #[serde(default)]
    pub coordinator: CoordinatorSection,

    /// Tracked resource types.
    #[serde(default)]
    pub resources: Vec<ResourceDecl>,

    /// Reaction rules between tracked types.
    #[serde(default)]
    pub reactions: Vec<ReactionRule>,
}

/// Config store REST endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_url")]
    pub url: String,

    /// Auth token (plaintext; prefer `token_env`).
    pub token: Option<String>,

    /// Environment variable holding the auth token.
    pub token_env: Option<String>,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    #[serde(default)]
    pub insecure: bool,

    /// Path to a custom CA certificate.
    pub ca_cert: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: default_store_url(),
            token: None,
            token_env: None,
            timeout: default_timeout(),
            insecure: false,
            ca_cert: None,
        }
    }
}

/// Change-notification feed.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FeedConfig {
    #[serde(default = "default_feed_url")]
    pub url: String,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,

    /// Give up after this many consecutive failed reconnects. The
    /// coordinator then fails and `run` exits with the coordinator code.
    #[serde(default = "default_max_retries")]
    pub max_retries: Option<u32>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: default_feed_url(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_secs: default_max_delay_secs(),
            max_retries: default_max_retries(),
        }
    }
}

/// Reconciliation tuning.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CoordinatorSection {
    #[serde(default = "default_partitions")]
    pub partitions: usize,

    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,

    /// 0 disables the cascade budget.
    #[serde(default = "default_max_cascade_events")]
    pub max_cascade_events: u32,

    #[serde(default = "default_cascade_window_secs")]
    pub cascade_window_secs: u64,

    #[serde(default = "default_true")]
    pub recompute_on_sync: bool,

    /// Records kept in the in-memory trace buffer.
    #[serde(default = "default_trace_buffer")]
    pub trace_buffer: usize,
}

impl Default for CoordinatorSection {
    fn default() -> Self {
        Self {
            partitions: default_partitions(),
            queue_depth: default_queue_depth(),
            max_cascade_events: default_max_cascade_events(),
            cascade_window_secs: default_cascade_window_secs(),
            recompute_on_sync: true,
            trace_buffer: default_trace_buffer(),
        }
    }
}

/// One tracked resource type.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ResourceDecl {
    pub name: String,

    #[serde(default)]
    pub indexing: Indexing,

    pub parent: Option<String>,

    #[serde(default)]
    pub refs: Vec<RefDecl>,
}

/// One forward reference of a resource type.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RefDecl {
    pub name: String,
    pub target: String,
    #[serde(default)]
    pub cardinality: Cardinality,
}

fn default_store_url() -> String {
    "http://127.0.0.1:8082".into()
}
fn default_feed_url() -> String {
    "ws://127.0.0.1:8082/watch".into()
}
fn default_timeout() -> u64 {
    30
}
fn default_initial_delay_ms() -> u64 {
    1000
}
fn default_max_delay_secs() -> u64 {
    30
}
#[allow(clippy::unnecessary_wraps)]
fn default_max_retries() -> Option<u32> {
    Some(10)
}
fn default_partitions() -> usize {
    4
}
fn default_queue_depth() -> usize {
    256
}
fn default_max_cascade_events() -> u32 {
    1000
}
fn default_cascade_window_secs() -> u64 {
    60
}
fn default_trace_buffer() -> usize {
    256
}
fn default_true() -> bool {
    true
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the default config file path via platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("io", "shadowgraph", "shadowgraph").map_or_else(
        || PathBuf::from("shadowgraph.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

// ── Config loading ──────────────────────────────────────────────────

/// Layered figment: defaults, then the TOML file, then environment.
///
/// Nested keys use a double underscore: `SHADOWGRAPH_STORE__URL`.
pub fn figment(path: &Path) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

/// Load and validate the configuration. `None` uses [`config_path`].
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.map_or_else(config_path, Path::to_path_buf);
    let config: Config = figment(&path).extract()?;
    config.validate()?;
    Ok(config)
}

impl Config {
    /// Structural checks that need no registry.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.store_url()?;
        self.feed_url()?;
        if self.coordinator.partitions == 0 {
            return Err(validation("coordinator.partitions", "must be at least 1"));
        }
        if self.coordinator.queue_depth == 0 {
            return Err(validation("coordinator.queue_depth", "must be at least 1"));
        }
        if self.feed.initial_delay_ms == 0 {
            return Err(validation("feed.initial_delay_ms", "must be positive"));
        }
        Ok(())
    }

    pub fn store_url(&self) -> Result<Url, ConfigError> {
        self.store
            .url
            .parse()
            .map_err(|e| validation("store.url", &format!("{e}: {}", self.store.url)))
    }

    pub fn feed_url(&self) -> Result<Url, ConfigError> {
        let url: Url = self
            .feed
            .url
            .parse()
            .map_err(|e| validation("feed.url", &format!("{e}: {}", self.feed.url)))?;
        match url.scheme() {
            "ws" | "wss" => Ok(url),
            other => Err(validation(
                "feed.url",
                &format!("expected ws:// or wss://, got {other}://"),
            )),
        }
    }

    /// Auth token: `token_env` first, then the plaintext `token`.
    pub fn auth_token(&self) -> Option<SecretString> {
        if let Some(ref env_name) = self.store.token_env {
            if let Ok(val) = std::env::var(env_name) {
                return Some(SecretString::from(val));
            }
        }
        self.store.token.clone().map(SecretString::from)
    }

    pub fn transport_config(&self) -> TransportConfig {
        let tls = if self.store.insecure {
            TlsMode::DangerAcceptInvalid
        } else if let Some(ref ca_path) = self.store.ca_cert {
            TlsMode::CustomCa(ca_path.clone())
        } else {
            TlsMode::System
        };

        TransportConfig {
            tls,
            timeout: Duration::from_secs(self.store.timeout),
            auth_token: self.auth_token(),
        }
    }

    pub fn reconnect_config(&self) -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: Duration::from_millis(self.feed.initial_delay_ms),
            max_delay: Duration::from_secs(self.feed.max_delay_secs),
            max_retries: self.feed.max_retries,
        }
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        let section = &self.coordinator;
        CoordinatorConfig {
            partitions: section.partitions,
            queue_depth: section.queue_depth,
            max_cascade_events: section.max_cascade_events,
            cascade_window: Duration::from_secs(section.cascade_window_secs),
            recompute_on_sync: section.recompute_on_sync,
        }
    }

    /// Resource schemas in declaration order.
    pub fn schemas(&self) -> Vec<ResourceSchema> {
        self.resources
            .iter()
            .map(|decl| {
                let mut schema = ResourceSchema::new(decl.name.as_str()).indexed_by(decl.indexing);
                if let Some(ref parent) = decl.parent {
                    schema = schema.parent(parent.as_str());
                }
                decl.refs.iter().fold(schema, |schema, r| {
                    schema.reference(r.name.as_str(), r.target.as_str(), r.cardinality)
                })
            })
            .collect()
    }

    /// Registry with every declared type served by `store`.
    pub fn build_registry(
        &self,
        store: &Arc<dyn StoreGateway>,
    ) -> Result<ResourceRegistry, ConfigError> {
        if self.resources.is_empty() {
            return Err(validation("resources", "no resource types declared"));
        }
        Ok(ResourceRegistry::builder()
            .register_all(self.schemas(), store)
            .build()?)
    }

    pub fn build_reactions(&self, registry: &ResourceRegistry) -> Result<ReactionMap, ConfigError> {
        Ok(ReactionMap::build(self.reactions.iter().cloned(), registry)?)
    }

    /// Serialize back to TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

fn validation(field: &str, reason: &str) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use figment::Jail;
    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;
    use shadowgraph_core::{Direction, Edge, MemoryStore, ResourceType};

    use super::*;

    const SAMPLE: &str = r#"
        [store]
        url = "https://config.lab:8082"
        token_env = "LAB_TOKEN"
        timeout = 10

        [coordinator]
        partitions = 2
        max_cascade_events = 50

        [[resources]]
        name = "project"

        [[resources]]
        name = "route_target"
        indexing = "fq_name"

        [[resources]]
        name = "virtual_network"
        parent = "project"
        refs = [
            { name = "route_target", target = "route_target" },
            { name = "network_ipam", target = "project", cardinality = "single" },
        ]

        [[reactions]]
        source = "virtual_network"
        target = "route_target"
        reference = "route_target"
        direction = "downstream"

        [[reactions]]
        source = "route_target"
        target = "virtual_network"
        direction = "upstream"
    "#;

    fn memory() -> Arc<dyn StoreGateway> {
        Arc::new(MemoryStore::new())
    }

    #[test]
    fn loads_file_over_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file("shadowgraph.toml", SAMPLE)?;
            let config = load_config(Some(Path::new("shadowgraph.toml"))).unwrap();

            assert_eq!(config.store.url, "https://config.lab:8082");
            assert_eq!(config.store.timeout, 10);
            assert_eq!(config.feed, FeedConfig::default());
            assert_eq!(config.reconnect_config().max_retries, Some(10));
            assert_eq!(config.coordinator.partitions, 2);
            assert_eq!(config.coordinator.queue_depth, 256);
            assert_eq!(config.resources.len(), 3);
            assert_eq!(config.reactions[1].direction, Direction::Upstream);
            assert!(config.reactions[1].reference.is_none());
            Ok(())
        });
    }

    #[test]
    fn environment_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file("shadowgraph.toml", SAMPLE)?;
            jail.set_env("SHADOWGRAPH_STORE__URL", "http://override:9000");
            jail.set_env("SHADOWGRAPH_COORDINATOR__QUEUE_DEPTH", "8");
            let config = load_config(Some(Path::new("shadowgraph.toml"))).unwrap();

            assert_eq!(config.store.url, "http://override:9000");
            assert_eq!(config.coordinator.queue_depth, 8);
            Ok(())
        });
    }

    #[test]
    fn token_env_wins_over_plaintext() {
        Jail::expect_with(|jail| {
            jail.set_env("LAB_TOKEN", "from-env");
            let mut config = Config::default();
            config.store.token = Some("plaintext".into());
            assert_eq!(config.auth_token().unwrap().expose_secret(), "plaintext");

            config.store.token_env = Some("LAB_TOKEN".into());
            assert_eq!(config.auth_token().unwrap().expose_secret(), "from-env");
            Ok(())
        });
    }

    #[test]
    fn missing_file_yields_defaults() {
        Jail::expect_with(|_| {
            let config = load_config(Some(Path::new("absent.toml"))).unwrap();
            assert_eq!(config, Config::default());
            Ok(())
        });
    }

    #[test]
    fn rejects_non_websocket_feed() {
        let mut config = Config::default();
        config.feed.url = "http://127.0.0.1:8082/watch".into();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "feed.url"));
    }

    #[test]
    fn rejects_zero_partitions() {
        let mut config = Config::default();
        config.coordinator.partitions = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn translates_into_registry_and_reactions() {
        let config: Config = Figment::from(Toml::string(SAMPLE)).extract().unwrap();
        let registry = config.build_registry(&memory()).unwrap();
        assert_eq!(registry.len(), 3);

        let vn = registry.schema(&"virtual_network".into()).unwrap();
        assert_eq!(vn.parent_type(), Some(&ResourceType::from("project")));
        assert_eq!(
            vn.ref_spec("network_ipam").unwrap().cardinality,
            Cardinality::Single
        );

        let reactions = config.build_reactions(&registry).unwrap();
        assert_eq!(reactions.len(), 2);
        assert_eq!(
            reactions.rules_for(&"route_target".into())[0].edge,
            Edge::Backward("route_target".into())
        );
    }

    #[test]
    fn unknown_reaction_type_fails_translation() {
        let mut config: Config = Figment::from(Toml::string(SAMPLE)).extract().unwrap();
        config.reactions.push(ReactionRule::parent("bgp_router", "project"));
        let registry = config.build_registry(&memory()).unwrap();
        let err = config.build_reactions(&registry).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Core(CoreError::UnknownResourceType { .. })
        ));
    }

    #[test]
    fn empty_resource_list_is_rejected() {
        let err = Config::default().build_registry(&memory()).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { .. }));
    }

    #[test]
    fn coordinator_section_translates() {
        let config: Config = Figment::from(Toml::string(SAMPLE)).extract().unwrap();
        let tuned = config.coordinator_config();
        assert_eq!(tuned.partitions, 2);
        assert_eq!(tuned.max_cascade_events, 50);
        assert_eq!(tuned.cascade_window, Duration::from_secs(60));
        assert!(tuned.recompute_on_sync);
        assert!(matches!(config.transport_config().tls, TlsMode::System));
    }

    #[test]
    fn round_trips_through_toml() {
        let config: Config = Figment::from(Toml::string(SAMPLE)).extract().unwrap();
        let text = config.to_toml().unwrap();
        let back: Config = Figment::from(Toml::string(&text)).extract().unwrap();
        assert_eq!(back, config);
    }
}
