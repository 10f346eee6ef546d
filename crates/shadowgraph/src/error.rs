//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with help text
//! and the exit codes a process supervisor keys on.

use miette::Diagnostic;
use thiserror::Error;

use shadowgraph_config::ConfigError;
use shadowgraph_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const CONFIG: i32 = 3;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
    /// The coordinator entered its terminal failed state.
    pub const COORDINATOR_FAILED: i32 = 10;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────

    #[error("Could not reach the config store at {url}")]
    #[diagnostic(
        code(shadowgraph::connection_failed),
        help(
            "Check that the store is running and accessible.\n\
             Reason: {reason}"
        )
    )]
    ConnectionFailed { url: String, reason: String },

    #[error("Config store request timed out after {seconds}s")]
    #[diagnostic(
        code(shadowgraph::timeout),
        help("Raise [store].timeout or check store responsiveness.")
    )]
    Timeout { seconds: u64 },

    #[error("Config store error: {message}")]
    #[diagnostic(code(shadowgraph::store))]
    Store { message: String },

    // ── Engine ───────────────────────────────────────────────────────

    #[error("Coordinator failed: {reason}")]
    #[diagnostic(
        code(shadowgraph::coordinator_failed),
        help(
            "A notification failed twice with a transient store error.\n\
             The cache may be stale; restart the daemon to resync."
        )
    )]
    CoordinatorFailed { reason: String },

    #[error("Invalid resource schema: {message}")]
    #[diagnostic(
        code(shadowgraph::schema),
        help("Check the [[resources]] and [[reactions]] tables in your config.")
    )]
    Schema { message: String },

    #[error("{message}")]
    #[diagnostic(code(shadowgraph::engine))]
    Engine { message: String },

    // ── Configuration / input ────────────────────────────────────────

    #[error(transparent)]
    #[diagnostic(
        code(shadowgraph::config),
        help("Print the effective configuration with: shadowgraph config")
    )]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    #[diagnostic(code(shadowgraph::json), help("Check the JSON file contents and try again."))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::CoordinatorFailed { .. } => exit_code::COORDINATOR_FAILED,
            Self::Config(_) | Self::Schema { .. } => exit_code::CONFIG,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { url, reason } => CliError::ConnectionFailed { url, reason },

            CoreError::Timeout { timeout_secs } => CliError::Timeout {
                seconds: timeout_secs,
            },

            CoreError::Api { message, .. } => CliError::Store { message },

            CoreError::Failed { reason } => CliError::CoordinatorFailed { reason },

            err @ (CoreError::UnknownResourceType { .. }
            | CoreError::UnknownReference { .. }
            | CoreError::Registration { .. }) => CliError::Schema {
                message: err.to_string(),
            },

            other => CliError::Engine {
                message: other.to_string(),
            },
        }
    }
}

impl From<shadowgraph_api::Error> for CliError {
    fn from(err: shadowgraph_api::Error) -> Self {
        CoreError::from(err).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_state_has_its_own_exit_code() {
        let err = CliError::from(CoreError::Failed {
            reason: "store unreachable".into(),
        });
        assert_eq!(err.exit_code(), exit_code::COORDINATOR_FAILED);
    }

    #[test]
    fn schema_errors_are_config_errors() {
        let err = CliError::from(CoreError::UnknownResourceType {
            kind: "bgp_router".into(),
        });
        assert!(matches!(err, CliError::Schema { .. }));
        assert_eq!(err.exit_code(), exit_code::CONFIG);
    }

    #[test]
    fn transport_errors_keep_their_class() {
        let err = CliError::from(CoreError::ConnectionFailed {
            url: "http://store:8082".into(),
            reason: "refused".into(),
        });
        assert_eq!(err.exit_code(), exit_code::CONNECTION);
        assert_eq!(
            CliError::from(CoreError::NotReady).exit_code(),
            exit_code::GENERAL
        );
    }
}
