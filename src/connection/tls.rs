//! TLS configuration for encrypted MariaDB sessions.
//!
//! The server greeting always travels in clear; when TLS is wanted the client
//! answers with an SSL request and upgrades the same socket before sending any
//! credentials.

use crate::{Error, Result};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{CertificateError, ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use rustls_pemfile::Item;
use std::fs;
use std::sync::Arc;

/// SSL/TLS connection mode (`sslMode` option).
///
/// Controls whether and how TLS is negotiated with the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SslMode {
    /// No TLS (plaintext connection)
    #[default]
    Disable,
    /// TLS required, server certificate is not verified
    Trust,
    /// TLS required, server certificate must be signed by a trusted CA
    VerifyCa,
    /// TLS required, server certificate must be signed by a trusted CA and hostname must match
    VerifyFull,
}

impl SslMode {
    /// Whether this mode requires certificate verification (CA or full)
    pub fn requires_verification(&self) -> bool {
        matches!(self, Self::VerifyCa | Self::VerifyFull)
    }

    /// Whether TLS is used at all
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::Disable)
    }
}

impl std::fmt::Display for SslMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disable => write!(f, "disable"),
            Self::Trust => write!(f, "trust"),
            Self::VerifyCa => write!(f, "verify-ca"),
            Self::VerifyFull => write!(f, "verify-full"),
        }
    }
}

impl std::str::FromStr for SslMode {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "disable" => Ok(Self::Disable),
            "trust" => Ok(Self::Trust),
            "verify-ca" => Ok(Self::VerifyCa),
            "verify-full" => Ok(Self::VerifyFull),
            _ => Err(Error::Config(format!(
                "invalid sslMode '{}': expected disable, trust, verify-ca, or verify-full",
                s
            ))),
        }
    }
}

/// TLS configuration for encrypted sessions.
///
/// # Examples
///
/// ```ignore
/// use mariadb_wire::connection::TlsConfig;
///
/// // With system root certificates (production)
/// let tls = TlsConfig::builder().build()?;
///
/// // With the server's CA, inline or as a path
/// let tls = TlsConfig::builder()
///     .server_cert("/etc/mysql/ca.pem")
///     .build()?;
/// ```
#[derive(Clone)]
pub struct TlsConfig {
    /// CA certificate (PEM path or inline PEM)
    server_cert: Option<String>,
    /// Whether to verify hostname matches certificate
    verify_hostname: bool,
    /// Whether to accept invalid certificates (development only)
    danger_accept_invalid_certs: bool,
    /// Compiled rustls ClientConfig
    client_config: Arc<ClientConfig>,
}

impl TlsConfig {
    /// Create a new TLS configuration builder.
    pub fn builder() -> TlsConfigBuilder {
        TlsConfigBuilder::default()
    }

    /// Configuration matching an [`SslMode`]; `None` for [`SslMode::Disable`].
    pub fn for_mode(mode: SslMode, server_cert: Option<&str>) -> Result<Option<Self>> {
        let builder = match mode {
            SslMode::Disable => return Ok(None),
            SslMode::Trust => TlsConfig::builder().danger_accept_invalid_certs(true),
            SslMode::VerifyCa => TlsConfig::builder().verify_hostname(false),
            SslMode::VerifyFull => TlsConfig::builder().verify_hostname(true),
        };
        let builder = match server_cert {
            Some(cert) => builder.server_cert(cert),
            None => builder,
        };
        builder.build().map(Some)
    }

    /// Get the rustls ClientConfig for this TLS configuration.
    pub fn client_config(&self) -> Arc<ClientConfig> {
        self.client_config.clone()
    }

    /// Check if hostname verification is enabled.
    pub fn verify_hostname(&self) -> bool {
        self.verify_hostname
    }

    /// Check if invalid certificates are accepted (development only).
    pub fn danger_accept_invalid_certs(&self) -> bool {
        self.danger_accept_invalid_certs
    }
}

impl std::fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConfig")
            .field("server_cert", &self.server_cert.as_ref().map(|_| "<cert>"))
            .field("verify_hostname", &self.verify_hostname)
            .field(
                "danger_accept_invalid_certs",
                &self.danger_accept_invalid_certs,
            )
            .field("client_config", &"<ClientConfig>")
            .finish()
    }
}

/// Builder for TLS configuration.
pub struct TlsConfigBuilder {
    server_cert: Option<String>,
    verify_hostname: bool,
    danger_accept_invalid_certs: bool,
}

impl Default for TlsConfigBuilder {
    fn default() -> Self {
        Self {
            server_cert: None,
            verify_hostname: true,
            danger_accept_invalid_certs: false,
        }
    }
}

impl TlsConfigBuilder {
    /// Trust anchor for the server certificate: a PEM file path, or PEM text
    /// starting with `-----BEGIN`.
    ///
    /// If not set, system root certificates will be used.
    pub fn server_cert(mut self, cert: impl Into<String>) -> Self {
        self.server_cert = Some(cert.into());
        self
    }

    /// Enable or disable hostname verification (default: enabled).
    pub fn verify_hostname(mut self, verify: bool) -> Self {
        self.verify_hostname = verify;
        self
    }

    /// ⚠️ **DANGER**: Accept any server certificate.
    ///
    /// The session is encrypted but not authenticated; anyone on the path can
    /// impersonate the server.
    pub fn danger_accept_invalid_certs(mut self, accept: bool) -> Self {
        self.danger_accept_invalid_certs = accept;
        self
    }

    /// Build the TLS configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the CA certificate cannot be read or parsed, or if
    /// no root certificates are available at all.
    pub fn build(self) -> Result<TlsConfig> {
        let client_config = if self.danger_accept_invalid_certs {
            tracing::warn!("server certificate verification disabled (sslMode=trust)");
            ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyCert))
                .with_no_client_auth()
        } else {
            let root_store = match &self.server_cert {
                Some(cert) => load_custom_ca(cert)?,
                None => system_roots()?,
            };
            if self.verify_hostname {
                ClientConfig::builder()
                    .with_root_certificates(root_store)
                    .with_no_client_auth()
            } else {
                let inner = WebPkiServerVerifier::builder(Arc::new(root_store))
                    .build()
                    .map_err(|e| Error::Config(format!("invalid root certificates: {}", e)))?;
                ClientConfig::builder()
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(CaOnlyVerifier { inner }))
                    .with_no_client_auth()
            }
        };

        Ok(TlsConfig {
            server_cert: self.server_cert,
            verify_hostname: self.verify_hostname,
            danger_accept_invalid_certs: self.danger_accept_invalid_certs,
            client_config: Arc::new(client_config),
        })
    }
}

fn system_roots() -> Result<RootCertStore> {
    let result = rustls_native_certs::load_native_certs();
    let mut store = RootCertStore::empty();
    for cert in result.certs {
        let _ = store.add_parsable_certificates(std::iter::once(cert));
    }
    if store.is_empty() {
        if !result.errors.is_empty() {
            tracing::debug!(errors = result.errors.len(), "native root store unavailable");
        }
        store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }
    Ok(store)
}

/// Load CA certificates from a PEM file or inline PEM text.
fn load_custom_ca(cert: &str) -> Result<RootCertStore> {
    let data = if cert.trim_start().starts_with("-----BEGIN") {
        cert.as_bytes().to_vec()
    } else {
        fs::read(cert).map_err(|e| {
            Error::Config(format!("Failed to read CA certificate file '{}': {}", cert, e))
        })?
    };

    let mut reader = std::io::Cursor::new(&data);
    let mut root_store = RootCertStore::empty();
    let mut found_certs = 0;

    loop {
        match rustls_pemfile::read_one(&mut reader) {
            Ok(Some(Item::X509Certificate(cert))) => {
                let _ = root_store.add_parsable_certificates(std::iter::once(cert));
                found_certs += 1;
            }
            Ok(Some(_)) => {}
            Ok(None) => break,
            Err(_) => {
                return Err(Error::Config("Failed to parse CA certificate".to_string()));
            }
        }
    }

    if found_certs == 0 {
        return Err(Error::Config("No valid certificates found in serverSslCert".to_string()));
    }

    Ok(root_store)
}

/// Accepts any certificate (`sslMode=trust`)
#[derive(Debug)]
struct AcceptAnyCert;

impl ServerCertVerifier for AcceptAnyCert {
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
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}

/// Chain validation without the hostname check (`sslMode=verify-ca`)
#[derive(Debug)]
struct CaOnlyVerifier {
    inner: Arc<WebPkiServerVerifier>,
}

impl ServerCertVerifier for CaOnlyVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        match self
            .inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
        {
            Err(rustls::Error::InvalidCertificate(CertificateError::NotValidForName)) => {
                Ok(ServerCertVerified::assertion())
            }
            other => other,
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// Parse server name from hostname for TLS SNI (Server Name Indication).
///
/// # Errors
///
/// Returns an error if the hostname is invalid.
pub fn parse_server_name(hostname: &str) -> Result<&str> {
    let hostname = hostname.trim_end_matches('.');
    // Bracketed IPv6 literals lose their brackets
    let hostname = hostname
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(hostname);

    if hostname.is_empty() || hostname.len() > 253 {
        return Err(Error::Config(format!(
            "Invalid hostname for TLS: '{}'",
            hostname
        )));
    }

    if !hostname
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '.' || c == ':')
    {
        return Err(Error::Config(format!(
            "Invalid hostname for TLS: '{}'",
            hostname
        )));
    }

    Ok(hostname)
}
