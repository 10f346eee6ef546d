// ── Core error types ──
//
// Errors surfaced by the reaction engine. Transport-layer failures from
// `shadowgraph-api` are translated into a handful of variants here so the
// coordinator can classify them (retry-worthy or not) without knowing
// anything about HTTP or WebSockets.
//
// "Not found" is deliberately absent: absence is an `Option::None` on every
// internal path, never an error.

use thiserror::Error;

use crate::model::ObjectKey;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Store / bus errors ───────────────────────────────────────────
    #[error("Cannot reach config store at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Config store request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Config store error: {message}")]
    Api {
        message: String,
        /// HTTP status code (if applicable).
        status: Option<u16>,
    },

    // ── Schema errors ────────────────────────────────────────────────
    #[error("Unknown resource type: {kind}")]
    UnknownResourceType { kind: String },

    #[error("Resource type {kind} has no reference named {reference}")]
    UnknownReference { kind: String, reference: String },

    #[error("Registration failed: {message}")]
    Registration { message: String },

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Malformed change event: {reason}")]
    MalformedEvent { reason: String },

    #[error("Malformed payload for {kind} {id}: {reason}")]
    MalformedPayload {
        kind: String,
        id: String,
        reason: String,
    },

    #[error("Object not cached: {key}")]
    NotCached { key: ObjectKey },

    // ── Reconciliation errors ────────────────────────────────────────
    #[error("Recomputation of {key} failed: {message}")]
    Recompute { key: ObjectKey, message: String },

    #[error("Coordinator is waiting for the initial resync")]
    NotReady,

    #[error("Coordinator failed: {reason}")]
    Failed { reason: String },

    #[error("Event queue closed")]
    QueueClosed,

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Whether the failure is a store/bus hiccup that warrants retrying the
    /// whole notification.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ConnectionFailed { .. } | Self::Timeout { .. } => true,
            Self::Api {
                status: Some(status),
                ..
            } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<shadowgraph_api::Error> for CoreError {
    fn from(err: shadowgraph_api::Error) -> Self {
        match err {
            shadowgraph_api::Error::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::Timeout { timeout_secs: 0 }
                } else if e.is_connect() {
                    CoreError::ConnectionFailed {
                        url: e
                            .url()
                            .map(ToString::to_string)
                            .unwrap_or_else(|| "<unknown>".into()),
                        reason: e.to_string(),
                    }
                } else {
                    CoreError::Api {
                        message: e.to_string(),
                        status: e.status().map(|s| s.as_u16()),
                    }
                }
            }
            shadowgraph_api::Error::Timeout { timeout_secs } => CoreError::Timeout { timeout_secs },
            shadowgraph_api::Error::Tls(msg) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("TLS error: {msg}"),
            },
            shadowgraph_api::Error::Http { status, message } => CoreError::Api {
                message,
                status: Some(status),
            },
            shadowgraph_api::Error::WebSocketConnect(reason) => CoreError::ConnectionFailed {
                url: String::new(),
                reason,
            },
            shadowgraph_api::Error::WebSocketClosed { code, reason } => {
                CoreError::ConnectionFailed {
                    url: String::new(),
                    reason: format!("WebSocket closed (code {code}): {reason}"),
                }
            }
            shadowgraph_api::Error::Deserialization { message, .. } => CoreError::Api {
                message: format!("undecodable response: {message}"),
                status: None,
            },
            shadowgraph_api::Error::InvalidUrl(e) => {
                CoreError::Internal(format!("invalid URL: {e}"))
            }
            shadowgraph_api::Error::InvalidHeader(msg) => {
                CoreError::Internal(format!("invalid header: {msg}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_from_store_are_transient() {
        let err = CoreError::from(shadowgraph_api::Error::Http {
            status: 502,
            message: "bad gateway".into(),
        });
        assert!(err.is_transient());
    }

    #[test]
    fn client_errors_from_store_are_permanent() {
        let err = CoreError::from(shadowgraph_api::Error::Http {
            status: 400,
            message: "bad request".into(),
        });
        assert!(!err.is_transient());
    }

    #[test]
    fn feed_disconnects_are_transient() {
        let err = CoreError::from(shadowgraph_api::Error::WebSocketClosed {
            code: 1011,
            reason: "server restart".into(),
        });
        assert!(err.is_transient());
    }

    #[test]
    fn schema_errors_are_permanent() {
        let err = CoreError::UnknownResourceType {
            kind: "bogus".into(),
        };
        assert!(!err.is_transient());
        assert!(!CoreError::NotReady.is_transient());
    }
}
