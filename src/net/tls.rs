//! Secure-channel factory and TLS handshake stage.
//!
//! # Responsibilities
//! - Define the pluggable secure-channel factory contract
//! - Ship a rustls-backed factory that loads PEM certificate/key files
//! - Surface factory construction errors before any bind attempt is made
//!
//! # Design Decisions
//! - The handshake stage is instantiated per connection: it holds
//!   per-connection cryptographic state and must never be shared
//! - Certificate rotation and TLS parameter policy stay with the embedding
//!   worker; this module only loads what the configuration names

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_rustls::TlsAcceptor;

use crate::config::TlsConfig;
use crate::net::buffer::BufferAllocator;
use crate::net::pipeline::BoxedIo;

/// Failure to construct the secure-channel factory or complete a handshake.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("failed to read TLS material from '{path}'")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no certificate found in '{0}'")]
    NoCertificate(String),
    #[error("no private key found in '{0}'")]
    NoPrivateKey(String),
    #[error("invalid TLS configuration")]
    Rustls(#[from] rustls::Error),
    #[error("TLS handshake failed")]
    Handshake(#[source] std::io::Error),
}

/// Produces a fresh per-connection handshake stage.
///
/// Construction of the factory itself may fail (bad certificate material);
/// that failure is fatal to server initialization.
pub trait SecureChannelFactory: Send + Sync {
    fn handshake_stage(&self, allocator: Arc<dyn BufferAllocator>) -> Box<dyn HandshakeStage>;
}

/// One connection's handshake. Consumes the raw I/O and yields the secured
/// channel the protocol stages run over.
#[async_trait]
pub trait HandshakeStage: Send {
    async fn handshake(self: Box<Self>, io: BoxedIo) -> Result<BoxedIo, TlsError>;
}

/// rustls-backed secure-channel factory loading PEM files from disk.
pub struct RustlsChannelFactory {
    acceptor: TlsAcceptor,
}

impl RustlsChannelFactory {
    /// Build the factory from configured certificate and key paths.
    pub fn from_config(config: &TlsConfig) -> Result<Self, TlsError> {
        let certs = load_certs(&config.cert_path)?;
        let key = load_key(&config.key_path)?;

        let server_config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)?;

        Ok(Self {
            acceptor: TlsAcceptor::from(Arc::new(server_config)),
        })
    }
}

impl SecureChannelFactory for RustlsChannelFactory {
    fn handshake_stage(&self, _allocator: Arc<dyn BufferAllocator>) -> Box<dyn HandshakeStage> {
        Box::new(RustlsHandshake {
            acceptor: self.acceptor.clone(),
        })
    }
}

struct RustlsHandshake {
    acceptor: TlsAcceptor,
}

#[async_trait]
impl HandshakeStage for RustlsHandshake {
    async fn handshake(self: Box<Self>, io: BoxedIo) -> Result<BoxedIo, TlsError> {
        let stream = self.acceptor.accept(io).await.map_err(TlsError::Handshake)?;
        Ok(Box::new(stream))
    }
}

fn load_certs(
    path: &str,
) -> Result<Vec<rustls::pki_types::CertificateDer<'static>>, TlsError> {
    let file = File::open(path).map_err(|source| TlsError::Io {
        path: path.to_string(),
        source,
    })?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Io {
            path: path.to_string(),
            source,
        })?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificate(path.to_string()));
    }
    Ok(certs)
}

fn load_key(path: &str) -> Result<rustls::pki_types::PrivateKeyDer<'static>, TlsError> {
    let file = File::open(path).map_err(|source| TlsError::Io {
        path: path.to_string(),
        source,
    })?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|source| TlsError::Io {
            path: path.to_string(),
            source,
        })?
        .ok_or_else(|| TlsError::NoPrivateKey(path.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_cert_file_fails_construction() {
        let config = TlsConfig {
            cert_path: "/nonexistent/cert.pem".into(),
            key_path: "/nonexistent/key.pem".into(),
        };
        assert!(matches!(
            RustlsChannelFactory::from_config(&config),
            Err(TlsError::Io { .. })
        ));
    }

    #[test]
    fn garbage_pem_fails_construction() {
        let dir = tempfile::tempdir().unwrap();
        let cert_path = dir.path().join("cert.pem");
        let key_path = dir.path().join("key.pem");
        let mut cert = File::create(&cert_path).unwrap();
        writeln!(cert, "this is not a certificate").unwrap();
        let mut key = File::create(&key_path).unwrap();
        writeln!(key, "this is not a key").unwrap();

        let config = TlsConfig {
            cert_path: cert_path.to_string_lossy().into_owned(),
            key_path: key_path.to_string_lossy().into_owned(),
        };
        assert!(RustlsChannelFactory::from_config(&config).is_err());
    }

    #[test]
    fn valid_self_signed_material_constructs() {
        let signed = rcgen::generate_simple_self_signed(vec!["localhost".into()]).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let cert_path = dir.path().join("cert.pem");
        let key_path = dir.path().join("key.pem");
        std::fs::write(&cert_path, signed.cert.pem()).unwrap();
        std::fs::write(&key_path, signed.key_pair.serialize_pem()).unwrap();

        let config = TlsConfig {
            cert_path: cert_path.to_string_lossy().into_owned(),
            key_path: key_path.to_string_lossy().into_owned(),
        };
        assert!(RustlsChannelFactory::from_config(&config).is_ok());
    }
}
