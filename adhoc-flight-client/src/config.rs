//! Connection settings for a Flight session.

use std::fmt::Debug;
use std::path::PathBuf;

use crate::error::{FlightClientError, Result};

/// How the server certificate is validated
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TlsOptions {
    #[default]
    Plaintext,

    /// TLS, trusting the CA certificates found in a PEM bundle
    TrustStore { path: PathBuf },

    /// TLS without validating the server certificate
    Unverified,
}

impl TlsOptions {
    pub fn is_encrypted(&self) -> bool {
        !matches!(self, TlsOptions::Plaintext)
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub credentials: Credentials,
    pub tls: TlsOptions,

    /// Client properties sent with the handshake and every later call
    pub properties: Vec<(String, String)>,
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, port: u16, credentials: Credentials) -> Self {
        Self {
            host: host.into(),
            port,
            credentials,
            tls: TlsOptions::Plaintext,
            properties: vec![],
        }
    }

    pub fn with_tls(mut self, tls: TlsOptions) -> Self {
        self.tls = tls;
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.push((key.into(), value.into()));
        self
    }

    /// The URI handed to tonic; TLS is layered by our own connector
    pub(crate) fn uri(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Parse a `key=value` client property
pub fn parse_property(property: &str) -> Result<(String, String)> {
    match property.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_lowercase(), value.trim().to_string()))
        }
        _ => Err(FlightClientError::InvalidArgument(format!(
            "Property must be key=value, got {property:?}"
        ))),
    }
}
