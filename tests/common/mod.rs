//! Shared utilities for shuffle server integration tests.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use shuffle_server::{
    BoxedIo, ConnectionStage, DataPlaneProtocol, PooledBufferAllocator, ServerConfig, StageFlow,
    TlsConfig,
};
use shuffle_server::net::connection::ConnectionContext;

/// Config bound to loopback with the given candidate port spec.
pub fn server_config(ports: &str) -> ServerConfig {
    let mut config = ServerConfig::default();
    config.bind_address = "127.0.0.1".to_string();
    config.port_range = ports.parse().unwrap();
    config.worker_threads = 2;
    config
}

pub fn test_allocator() -> Arc<PooledBufferAllocator> {
    Arc::new(PooledBufferAllocator::default())
}

/// A loopback port that was free at the time of the call.
#[allow(dead_code)]
pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Occupy a loopback port for the lifetime of the returned listener.
#[allow(dead_code)]
pub fn occupy_port() -> (std::net::TcpListener, u16) {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

/// Echoes one newline-terminated message back to the peer, then closes.
pub struct EchoStage;

#[async_trait]
impl ConnectionStage for EchoStage {
    fn name(&self) -> &str {
        "echo"
    }

    async fn run(&self, mut io: BoxedIo, ctx: &ConnectionContext) -> std::io::Result<StageFlow> {
        let allocator = ctx.allocator();
        let mut buf = allocator.acquire(4096);
        loop {
            let n = io.read_buf(&mut buf).await?;
            if n == 0 || buf.contains(&b'\n') {
                break;
            }
        }
        io.write_all(&buf).await?;
        io.shutdown().await?;
        allocator.recycle(buf);
        Ok(StageFlow::Complete)
    }
}

pub struct EchoProtocol;

impl DataPlaneProtocol for EchoProtocol {
    fn server_stages(&self) -> Vec<Arc<dyn ConnectionStage>> {
        vec![Arc::new(EchoStage)]
    }
}

/// Write a self-signed certificate and key into `dir`, returning the TLS
/// config pointing at them plus the certificate for client-side trust.
#[allow(dead_code)]
pub fn self_signed_tls(dir: &Path) -> (TlsConfig, rustls::pki_types::CertificateDer<'static>) {
    let signed = rcgen::generate_simple_self_signed(vec!["localhost".into()]).unwrap();
    let cert_path = dir.join("cert.pem");
    let key_path = dir.join("key.pem");
    std::fs::write(&cert_path, signed.cert.pem()).unwrap();
    std::fs::write(&key_path, signed.key_pair.serialize_pem()).unwrap();

    let config = TlsConfig {
        cert_path: cert_path.to_string_lossy().into_owned(),
        key_path: key_path.to_string_lossy().into_owned(),
    };
    (config, signed.cert.der().clone())
}
