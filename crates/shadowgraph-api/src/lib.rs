// shadowgraph-api: Async clients for the config store REST API and its change feed

pub mod client;
pub mod error;
pub mod feed;
pub mod models;
pub mod transport;

pub use client::ConfigClient;
pub use error::Error;
pub use feed::{FeedHandle, FeedStatus, ReconnectConfig};
pub use models::{ObjectRef, RawChangeEvent};
pub use transport::{TlsMode, TransportConfig};
