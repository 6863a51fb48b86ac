//! Secure-channel tests: the rustls factory loads real certificate material
//! and every accepted connection handshakes before protocol stages run.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use shuffle_server::{RustlsChannelFactory, SecureChannelFactory, ShuffleServer};

mod common;

use common::{self_signed_tls, server_config, test_allocator, EchoProtocol};

fn tls_echo_roundtrip(
    port: u16,
    trusted: rustls::pki_types::CertificateDer<'static>,
    message: &[u8],
) -> Vec<u8> {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    runtime.block_on(async move {
        let mut roots = rustls::RootCertStore::empty();
        roots.add(trusted).unwrap();
        let client_config = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        let connector = tokio_rustls::TlsConnector::from(Arc::new(client_config));

        let tcp = tokio::net::TcpStream::connect(("127.0.0.1", port))
            .await
            .unwrap();
        let server_name = rustls::pki_types::ServerName::try_from("localhost").unwrap();
        let mut tls = connector.connect(server_name, tcp).await.unwrap();

        tls.write_all(message).await.unwrap();
        let mut echoed = Vec::new();
        tls.read_to_end(&mut echoed).await.unwrap();
        echoed
    })
}

#[test]
fn config_driven_tls_echoes_through_the_handshake() {
    let dir = tempfile::tempdir().unwrap();
    let (tls_config, trusted) = self_signed_tls(dir.path());

    let mut config = server_config("0");
    config.tls = Some(tls_config);

    let mut server = ShuffleServer::new(config);
    let port = server.init(&EchoProtocol, test_allocator()).unwrap();

    assert_eq!(
        tls_echo_roundtrip(port, trusted, b"secret payload\n"),
        b"secret payload\n"
    );
    server.shutdown();
}

#[test]
fn injected_factory_overrides_config() {
    let dir = tempfile::tempdir().unwrap();
    let (tls_config, trusted) = self_signed_tls(dir.path());
    let factory = Arc::new(RustlsChannelFactory::from_config(&tls_config).unwrap());

    // no tls in the config; the injected factory alone secures the listener
    let mut server = ShuffleServer::new(server_config("0"));
    server.set_secure_channel_factory(factory as Arc<dyn SecureChannelFactory>);
    let port = server.init(&EchoProtocol, test_allocator()).unwrap();

    assert_eq!(tls_echo_roundtrip(port, trusted, b"hi\n"), b"hi\n");
    server.shutdown();
}

#[test]
fn plaintext_client_cannot_use_a_secure_listener() {
    let dir = tempfile::tempdir().unwrap();
    let (tls_config, _trusted) = self_signed_tls(dir.path());

    let mut config = server_config("0");
    config.tls = Some(tls_config);

    let mut server = ShuffleServer::new(config);
    let port = server.init(&EchoProtocol, test_allocator()).unwrap();

    // a raw TCP peer never completes the handshake; it may see a TLS alert
    // but never the echoed plaintext
    use std::io::{Read, Write};
    let message = b"not a client hello\n";
    let mut stream = std::net::TcpStream::connect(("127.0.0.1", port)).unwrap();
    stream.write_all(message).unwrap();
    let mut reply = Vec::new();
    let _ = stream.read_to_end(&mut reply);
    assert!(!reply
        .windows(message.len())
        .any(|window| window == message));

    server.shutdown();
}
