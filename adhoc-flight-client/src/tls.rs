//! Channel construction.
//!
//! Plaintext channels are opened by tonic directly. Encrypted channels use a
//! rustls connector so that both a PEM trust store and disabled server
//! verification can be expressed.

use std::error::Error;
use std::path::Path;
use std::sync::Arc;

use hyper_util::rt::TokioIo;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tonic::transport::{Channel, Endpoint, Uri};
use tracing::debug;

use crate::config::{ConnectionConfig, TlsOptions};
use crate::error::{FlightClientError, Result};

/// Open a channel to the server described by `config`
pub(crate) async fn connect_channel(config: &ConnectionConfig) -> Result<Channel> {
    let endpoint = Endpoint::from_shared(config.uri())
        .map_err(|e| FlightClientError::Auth(error_chain(&e)))?;

    let tls_config = match &config.tls {
        TlsOptions::Plaintext => {
            debug!(uri = %config.uri(), "connecting without encryption");
            return endpoint
                .connect()
                .await
                .map_err(|e| FlightClientError::Auth(error_chain(&e)));
        }
        TlsOptions::TrustStore { path } => trusted_config(path).await?,
        TlsOptions::Unverified => unverified_config()?,
    };

    debug!(uri = %config.uri(), tls = ?config.tls, "connecting with encryption");

    let connector = TlsConnector::from(Arc::new(tls_config));
    let server_name =
        ServerName::try_from(config.host.clone()).map_err(FlightClientError::auth)?;
    let address = format!("{}:{}", config.host, config.port);

    endpoint
        .connect_with_connector(tower::service_fn(move |_: Uri| {
            let connector = connector.clone();
            let server_name = server_name.clone();
            let address = address.clone();

            async move {
                let tcp = TcpStream::connect(address).await?;
                let tls = connector.connect(server_name, tcp).await?;

                Ok::<_, std::io::Error>(TokioIo::new(tls))
            }
        }))
        .await
        .map_err(|e| FlightClientError::Auth(error_chain(&e)))
}

/// tonic's transport errors only say "transport error", the cause is in the source chain
pub(crate) fn error_chain(error: &dyn Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();

    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }

    message
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn with_alpn(mut config: ClientConfig) -> ClientConfig {
    config.alpn_protocols = vec![b"h2".to_vec()];
    config
}

/// Trust only the CA certificates in the PEM bundle at `path`
pub(crate) async fn trusted_config(path: &Path) -> Result<ClientConfig> {
    let pem = tokio::fs::read(path).await.map_err(|e| {
        FlightClientError::Auth(format!("Unable to read trust store {}: {e}", path.display()))
    })?;

    let mut roots = RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut pem.as_slice()) {
        let cert = cert.map_err(|e| {
            FlightClientError::Auth(format!("Invalid trust store {}: {e}", path.display()))
        })?;
        roots.add(cert).map_err(FlightClientError::auth)?;
    }

    if roots.is_empty() {
        return Err(FlightClientError::Auth(format!(
            "No certificates found in trust store {}",
            path.display()
        )));
    }

    let config = ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .map_err(FlightClientError::auth)?
        .with_root_certificates(roots)
        .with_no_client_auth();

    Ok(with_alpn(config))
}

pub(crate) fn unverified_config() -> Result<ClientConfig> {
    let provider = provider();
    let config = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(FlightClientError::auth)?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert(provider)))
        .with_no_client_auth();

    Ok(with_alpn(config))
}

/// Accepts any server certificate, still checking handshake signatures
#[derive(Debug)]
struct AcceptAnyServerCert(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
