//! TLS support for the LDAPS listener
//!
//! Loads the server certificate and key from PEM files and generates
//! self-signed certificates for development.

use rustls::crypto::ring::default_provider;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use strandgate_core::config::LdapsListenerConfig;
use strandgate_core::{Error, Result};
use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream;
use tracing::{debug, info, warn};

/// Install the ring crypto provider unless one is already installed
fn ensure_crypto_provider() {
    let _ = CryptoProvider::install_default(default_provider());
}

/// TLS acceptor for the LDAPS listener
#[derive(Clone)]
pub struct TlsAcceptor {
    acceptor: tokio_rustls::TlsAcceptor,
}

impl TlsAcceptor {
    /// Create a TLS acceptor from the LDAPS listener configuration
    pub fn from_config(config: &LdapsListenerConfig) -> Result<Self> {
        Self::from_pem_files(&config.cert_file, &config.key_file)
    }

    pub fn from_pem_files(cert_file: &Path, key_file: &Path) -> Result<Self> {
        ensure_crypto_provider();

        let certs = load_certs(cert_file)?;
        info!("Loaded {} certificate(s)", certs.len());

        let key = load_private_key(key_file)?;
        info!("Loaded private key");

        let server_config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| Error::Tls(format!("TLS config error: {}", e)))?;

        Ok(Self {
            acceptor: tokio_rustls::TlsAcceptor::from(Arc::new(server_config)),
        })
    }

    /// Run the server side of the TLS handshake
    pub async fn accept(&self, stream: TcpStream) -> Result<TlsStream<TcpStream>> {
        debug!("accepting TLS connection");
        self.acceptor
            .accept(stream)
            .await
            .map_err(|e| Error::Tls(format!("TLS handshake failed: {}", e)))
    }
}

/// Load certificates from PEM file
fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path).map_err(|e| {
        Error::Tls(format!("Failed to open certificate file {:?}: {}", path, e))
    })?;
    let mut reader = BufReader::new(file);

    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Tls(format!("Failed to parse certificates: {}", e)))?;

    if certs.is_empty() {
        return Err(Error::Tls(format!("No certificates found in {:?}", path)));
    }

    Ok(certs)
}

/// Load private key from PEM file
fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path)
        .map_err(|e| Error::Tls(format!("Failed to open key file {:?}: {}", path, e)))?;
    let mut reader = BufReader::new(file);

    loop {
        match rustls_pemfile::read_one(&mut reader) {
            Ok(Some(rustls_pemfile::Item::Pkcs1Key(key))) => {
                return Ok(PrivateKeyDer::Pkcs1(key));
            }
            Ok(Some(rustls_pemfile::Item::Pkcs8Key(key))) => {
                return Ok(PrivateKeyDer::Pkcs8(key));
            }
            Ok(Some(rustls_pemfile::Item::Sec1Key(key))) => {
                return Ok(PrivateKeyDer::Sec1(key));
            }
            Ok(None) => break,
            // Skip certificates bundled in the same file
            Ok(Some(_)) => continue,
            Err(e) => {
                return Err(Error::Tls(format!("Failed to parse private key: {}", e)));
            }
        }
    }

    Err(Error::Tls(format!("No private key found in {:?}", path)))
}

/// Generate a self-signed certificate for development.
///
/// The certificate is valid for `localhost`, `127.0.0.1` and `::1`. The key
/// file is written with mode 0600 on Unix.
pub fn generate_self_signed_cert(
    output_cert: &Path,
    output_key: &Path,
    days_valid: u32,
) -> Result<()> {
    use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};

    let mut params = CertificateParams::new(vec![
        "localhost".to_string(),
        "127.0.0.1".to_string(),
        "::1".to_string(),
    ])
    .map_err(|e| Error::Tls(format!("Invalid certificate parameters: {}", e)))?;

    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, "Strandgate Development");
    dn.push(DnType::OrganizationName, "Strandgate");
    params.distinguished_name = dn;

    params.not_before = time::OffsetDateTime::now_utc();
    params.not_after = params.not_before + time::Duration::days(days_valid as i64);

    let key_pair = KeyPair::generate()
        .map_err(|e| Error::Tls(format!("Failed to generate key pair: {}", e)))?;
    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| Error::Tls(format!("Failed to generate certificate: {}", e)))?;

    for path in [output_cert, output_key] {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
    }

    std::fs::write(output_cert, cert.pem()).map_err(|e| {
        Error::Tls(format!("Failed to write certificate file {:?}: {}", output_cert, e))
    })?;
    std::fs::write(output_key, key_pair.serialize_pem())
        .map_err(|e| Error::Tls(format!("Failed to write key file {:?}: {}", output_key, e)))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(output_key, std::fs::Permissions::from_mode(0o600))?;
    }

    info!(
        cert = ?output_cert,
        key = ?output_key,
        days_valid,
        "generated self-signed certificate"
    );
    warn!("Self-signed certificates are for development only");

    Ok(())
}
