//! Mutual TLS between the Helm client and Tiller
//!
//! Key, certificate and CA attributes are path-or-contents values. A value
//! equal to its literal default counts as absent; with neither key nor
//! certificate there is no TLS at all.

use std::io::Cursor;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore};
use tracing::{debug, warn};

use crate::content::get_content;
use crate::error::{ProviderError, Result};
use crate::settings::{
    DEFAULT_CA_CERTIFICATE, DEFAULT_CLIENT_CERTIFICATE, DEFAULT_CLIENT_KEY, Settings,
};

/// Client TLS material
pub struct TlsConfig {
    pub certificates: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    pub insecure_skip_verify: bool,
    /// Explicit trust roots; `None` falls back to the system roots
    pub root_pool: Option<RootCertStore>,
    pem: TlsPem,
}

/// PEM text as supplied, for handing to the helm binary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPem {
    pub cert: String,
    pub key: String,
    pub ca: Option<String>,
}

impl std::fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConfig")
            .field("certificates", &self.certificates.len())
            .field("insecure_skip_verify", &self.insecure_skip_verify)
            .field("root_pool", &self.root_pool.as_ref().map(RootCertStore::len))
            .finish_non_exhaustive()
    }
}

impl TlsConfig {
    /// Assemble TLS from the provider settings, `None` when not configured
    pub fn from_settings(settings: &Settings) -> Result<Option<Self>> {
        let key = get_content(&settings.client_key, DEFAULT_CLIENT_KEY)?;
        let cert = get_content(&settings.client_certificate, DEFAULT_CLIENT_CERTIFICATE)?;
        let ca = get_content(&settings.ca_certificate, DEFAULT_CA_CERTIFICATE)?;
        Self::from_pem(key, cert, ca, settings.insecure)
    }

    /// Assemble TLS from resolved PEM contents
    pub fn from_pem(
        key: Option<String>,
        cert: Option<String>,
        ca: Option<String>,
        insecure: bool,
    ) -> Result<Option<Self>> {
        if key.is_none() && cert.is_none() {
            return Ok(None);
        }
        let key = key.unwrap_or_default();
        let cert = cert.unwrap_or_default();

        let (certificates, private_key) = parse_key_pair(&cert, &key)
            .map_err(|e| ProviderError::tls(format!("could not read x509 key pair: {}", e)))?;

        let root_pool = match &ca {
            Some(ca) if !insecure => Some(parse_root_pool(ca)?),
            _ => None,
        };

        debug!(
            insecure,
            has_ca = root_pool.is_some(),
            "assembled tiller TLS configuration"
        );

        Ok(Some(Self {
            certificates,
            key: private_key,
            insecure_skip_verify: insecure,
            root_pool,
            pem: TlsPem { cert, key, ca },
        }))
    }

    pub fn pem(&self) -> &TlsPem {
        &self.pem
    }

    /// Build a rustls client configuration presenting the client certificate
    pub fn client_config(&self) -> Result<ClientConfig> {
        let builder = config_builder()?;
        let builder = if self.insecure_skip_verify {
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(NoCertificateVerification))
        } else {
            let roots = self.root_pool.clone().unwrap_or_else(native_roots);
            builder.with_root_certificates(roots)
        };

        builder
            .with_client_auth_cert(self.certificates.clone(), self.key.clone_key())
            .map_err(|e| ProviderError::tls(format!("could not read x509 key pair: {}", e)))
    }
}

/// Client configuration trusting only the roots in `ca`, without a client
/// certificate
pub fn ca_client_config(ca: &str) -> Result<ClientConfig> {
    let roots = parse_root_pool(ca)?;
    debug!(roots = roots.len(), "assembled server-only TLS configuration");
    Ok(config_builder()?
        .with_root_certificates(roots)
        .with_no_client_auth())
}

fn config_builder() -> Result<rustls::ConfigBuilder<ClientConfig, rustls::WantsVerifier>> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| ProviderError::tls(e.to_string()))
}

fn parse_key_pair(
    cert: &str,
    key: &str,
) -> std::result::Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), String> {
    let certs = rustls_pemfile::certs(&mut Cursor::new(cert.as_bytes()))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| e.to_string())?;
    if certs.is_empty() {
        return Err("failed to find any PEM data in certificate input".to_string());
    }

    let key = rustls_pemfile::private_key(&mut Cursor::new(key.as_bytes()))
        .map_err(|e| e.to_string())?
        .ok_or_else(|| "failed to find any PEM data in key input".to_string())?;

    rustls::crypto::ring::sign::any_supported_type(&key).map_err(|e| e.to_string())?;

    Ok((certs, key))
}

fn parse_root_pool(ca: &str) -> Result<RootCertStore> {
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut Cursor::new(ca.as_bytes()))
        .filter_map(|c| c.ok())
        .collect();

    let mut pool = RootCertStore::empty();
    let (added, _ignored) = pool.add_parsable_certificates(certs);
    if added == 0 {
        return Err(ProviderError::tls("failed to parse ca_certificate"));
    }
    Ok(pool)
}

fn native_roots() -> RootCertStore {
    let mut store = RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();
    for err in &native.errors {
        warn!(error = %err, "failed to load a system root certificate");
    }
    store.add_parsable_certificates(native.certs);
    store
}

/// Accepts any server certificate; used when `insecure` is set
#[derive(Debug)]
struct NoCertificateVerification;

impl rustls::client::danger::ServerCertVerifier for NoCertificateVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
