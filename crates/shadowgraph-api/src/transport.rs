// Shared transport configuration for building reqwest::Client instances.
//
// The config-store client and the change feed share TLS, timeout and
// auth-token settings through this module.

use std::path::PathBuf;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};

use crate::error::Error;

/// Header carrying the API token on every request and on the WebSocket upgrade.
pub const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";

/// TLS verification mode.
#[derive(Debug, Clone, Default)]
pub enum TlsMode {
    /// Use the system certificate store.
    #[default]
    System,
    /// Use a custom CA certificate from the given PEM file.
    CustomCa(PathBuf),
    /// Accept any certificate (lab deployments with self-signed certs).
    DangerAcceptInvalid,
}

/// Shared transport configuration for building HTTP clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub tls: TlsMode,
    pub timeout: Duration,
    pub auth_token: Option<SecretString>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tls: TlsMode::System,
            timeout: Duration::from_secs(30),
            auth_token: None,
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` from this config.
    ///
    /// The auth token, when present, is installed as a default header so
    /// individual requests never have to think about it.
    pub fn build_client(&self) -> Result<reqwest::Client, Error> {
        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(concat!("shadowgraph/", env!("CARGO_PKG_VERSION")))
            .default_headers(self.default_headers()?);

        match &self.tls {
            TlsMode::System => {}
            TlsMode::CustomCa(path) => {
                let cert_pem = std::fs::read(path)
                    .map_err(|e| Error::Tls(format!("failed to read CA cert: {e}")))?;
                let cert = reqwest::Certificate::from_pem(&cert_pem)
                    .map_err(|e| Error::Tls(format!("invalid CA cert: {e}")))?;
                builder = builder.add_root_certificate(cert);
            }
            TlsMode::DangerAcceptInvalid => {
                builder = builder.danger_accept_invalid_certs(true);
            }
        }

        builder
            .build()
            .map_err(|e| Error::Tls(format!("failed to build HTTP client: {e}")))
    }

    fn default_headers(&self) -> Result<HeaderMap, Error> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &self.auth_token {
            let mut value = HeaderValue::from_str(token.expose_secret())
                .map_err(|e| Error::InvalidHeader(e.to_string()))?;
            value.set_sensitive(true);
            headers.insert(AUTH_TOKEN_HEADER, value);
        }
        Ok(headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_becomes_sensitive_header() {
        let config = TransportConfig {
            auth_token: Some(SecretString::from("s3cret".to_string())),
            ..TransportConfig::default()
        };
        let headers = config.default_headers().expect("valid token");
        let value = headers.get(AUTH_TOKEN_HEADER).expect("header present");
        assert!(value.is_sensitive());
        assert_eq!(value.to_str().ok(), Some("s3cret"));
    }

    #[test]
    fn no_token_means_no_header() {
        let headers = TransportConfig::default()
            .default_headers()
            .expect("empty headers");
        assert!(headers.is_empty());
    }

    #[test]
    fn control_characters_are_rejected() {
        let config = TransportConfig {
            auth_token: Some(SecretString::from("bad\ntoken".to_string())),
            ..TransportConfig::default()
        };
        assert!(matches!(
            config.default_headers(),
            Err(Error::InvalidHeader(_))
        ));
    }
}
