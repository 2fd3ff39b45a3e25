//! Transport security for the configuration service.
//!
//! A stock management daemon only accepts TLS on its port, and checks the
//! client against the host certificate issued by the engine CA. Plain TCP is
//! kept for daemons configured with `ssl = false`.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::error::BootstrapError;

/// CA bundle that signed the daemon certificate.
pub const DEFAULT_CA_FILE: &str = "/etc/pki/vdsm/certs/cacert.pem";

/// Host certificate presented to the daemon.
pub const DEFAULT_CERT_FILE: &str = "/etc/pki/vdsm/certs/vdsmcert.pem";

/// Key of the host certificate.
pub const DEFAULT_KEY_FILE: &str = "/etc/pki/vdsm/keys/vdsmkey.pem";

/// Certificate locations for a TLS session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsSettings {
    pub ca_file: PathBuf,
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
}

impl Default for TlsSettings {
    fn default() -> Self {
        Self {
            ca_file: PathBuf::from(DEFAULT_CA_FILE),
            cert_file: Some(PathBuf::from(DEFAULT_CERT_FILE)),
            key_file: Some(PathBuf::from(DEFAULT_KEY_FILE)),
        }
    }
}

/// How bytes reach the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    Plain,
    Tls(TlsSettings),
}

impl Default for Transport {
    fn default() -> Self {
        Transport::Tls(TlsSettings::default())
    }
}

impl Transport {
    /// URL scheme for HTTP-based APIs.
    pub fn scheme(&self) -> &'static str {
        match self {
            Transport::Plain => "http",
            Transport::Tls(_) => "https",
        }
    }
}

impl TlsSettings {
    /// CA settings only, without a client certificate.
    pub fn with_ca(ca_file: impl Into<PathBuf>) -> Self {
        Self {
            ca_file: ca_file.into(),
            cert_file: None,
            key_file: None,
        }
    }

    /// Client certificate and key paths, if both are set.
    fn client_identity(&self) -> Result<Option<(&Path, &Path)>, BootstrapError> {
        match (&self.cert_file, &self.key_file) {
            (Some(cert), Some(key)) => Ok(Some((cert.as_path(), key.as_path()))),
            (None, None) => Ok(None),
            _ => Err(BootstrapError::Tls(
                "client certificate and key must be given together".to_string(),
            )),
        }
    }

    /// Build a rustls client configuration from the PEM files.
    pub fn client_config(&self) -> Result<ClientConfig, BootstrapError> {
        let mut roots = RootCertStore::empty();
        for cert in load_certs(&self.ca_file)? {
            roots
                .add(cert)
                .map_err(|e| BootstrapError::Tls(format!("bad CA certificate: {}", e)))?;
        }

        let builder = ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .map_err(|e| BootstrapError::Tls(e.to_string()))?
        .with_root_certificates(roots);

        match self.client_identity()? {
            Some((cert, key)) => builder
                .with_client_auth_cert(load_certs(cert)?, load_key(key)?)
                .map_err(|e| BootstrapError::Tls(format!("bad client certificate: {}", e))),
            None => Ok(builder.with_no_client_auth()),
        }
    }

    /// The CA bundle as PEM bytes.
    pub fn ca_pem(&self) -> Result<Vec<u8>, BootstrapError> {
        read_pem(&self.ca_file)
    }

    /// Client certificate followed by its key, as one PEM blob.
    pub fn identity_pem(&self) -> Result<Option<Vec<u8>>, BootstrapError> {
        let Some((cert, key)) = self.client_identity()? else {
            return Ok(None);
        };
        let mut pem = read_pem(cert)?;
        pem.push(b'\n');
        pem.extend(read_pem(key)?);
        Ok(Some(pem))
    }
}

/// Client end of a TLS session with one service host.
pub struct TlsClient {
    connector: TlsConnector,
    server_name: ServerName<'static>,
}

impl TlsClient {
    /// Load certificates for `host`. Nothing touches the network yet.
    pub fn new(settings: &TlsSettings, host: &str) -> Result<Self, BootstrapError> {
        let config = settings.client_config()?;
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| BootstrapError::Tls(format!("invalid server name {:?}: {}", host, e)))?;
        Ok(Self {
            connector: TlsConnector::from(Arc::new(config)),
            server_name,
        })
    }

    /// Run the handshake over an established TCP stream.
    pub async fn handshake(&self, stream: TcpStream) -> Result<TlsStream<TcpStream>, BootstrapError> {
        self.connector
            .connect(self.server_name.clone(), stream)
            .await
            .map_err(|e| BootstrapError::unavailable("TLS handshake failed", e))
    }
}

fn open(path: &Path) -> Result<BufReader<File>, BootstrapError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| BootstrapError::Tls(format!("cannot open {}: {}", path.display(), e)))
}

fn read_pem(path: &Path) -> Result<Vec<u8>, BootstrapError> {
    std::fs::read(path)
        .map_err(|e| BootstrapError::Tls(format!("cannot read {}: {}", path.display(), e)))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, BootstrapError> {
    let certs = rustls_pemfile::certs(&mut open(path)?)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| BootstrapError::Tls(format!("invalid PEM in {}: {}", path.display(), e)))?;
    if certs.is_empty() {
        return Err(BootstrapError::Tls(format!(
            "no certificate found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, BootstrapError> {
    rustls_pemfile::private_key(&mut open(path)?)
        .map_err(|e| BootstrapError::Tls(format!("invalid PEM in {}: {}", path.display(), e)))?
        .ok_or_else(|| BootstrapError::Tls(format!("no private key found in {}", path.display())))
}
