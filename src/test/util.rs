use std::{
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
        LazyLock,
    },
    time::Duration,
};

use rustls::{crypto::ring, server::WebPkiClientVerifier, RootCertStore, ServerConfig};
use tempfile::TempDir;
use tokio::{io::AsyncWriteExt, net::TcpListener};
use tokio_rustls::TlsAcceptor;

use crate::{
    certs::{CertificateGenerator, CertificateRequest, Format, GeneratedCertificates},
    runtime::{load_certificates, load_private_key},
    server::find_mongod,
};

static TRACING: LazyLock<()> = LazyLock::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
});

/// Install a fmt subscriber filtered by `RUST_LOG`. Safe to call from every test.
pub(crate) fn init_tracing() {
    LazyLock::force(&TRACING);
}

/// Log a message on stderr that won't be captured by `cargo test`.  Panics if the write fails.
pub(crate) fn log_uncaptured<S: AsRef<str>>(text: S) {
    use std::io::Write;

    let mut stderr = std::io::stderr();
    let mut sinks = vec![&mut stderr as &mut dyn Write];
    let mut other;
    let other_path = std::env::var("LOG_UNCAPTURED").unwrap_or("/dev/tty".to_string());
    if let Ok(f) = std::fs::OpenOptions::new().append(true).open(other_path) {
        other = f;
        sinks.push(&mut other);
    }

    for sink in sinks {
        sink.write_all(text.as_ref().as_bytes()).unwrap();
        sink.write_all(b"\n").unwrap();
    }
}

/// Whether a `mongod` binary can be located; logs why a test is skipped if not.
pub(crate) fn mongod_available(test_name: &str) -> bool {
    match find_mongod(None) {
        Ok(_) => true,
        Err(e) => {
            log_uncaptured(format!("skipping {test_name}: {e}"));
            false
        }
    }
}

/// Generates a PEM chain with a client certificate named `name` into a fresh temp dir.
pub(crate) fn generate_certificates(name: &str) -> (TempDir, GeneratedCertificates) {
    let dir = tempfile::Builder::new().prefix("mongo").tempdir().unwrap();
    let request = CertificateRequest::builder()
        .name(name)
        .client_certificate(true)
        .format(Format::Pem)
        .build();
    let generated = CertificateGenerator::new(dir.path(), false)
        .generate(&request)
        .unwrap();
    (dir, generated)
}

pub(crate) fn read(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap()
}

/// A TLS server on `127.0.0.1` presenting the generated server certificate. It writes one byte to
/// every connection that completes a handshake, then holds the connection open for a few seconds.
pub(crate) struct TlsTestServer {
    port: u16,
    handshakes_with_client_certificate: Arc<AtomicUsize>,
}

impl TlsTestServer {
    /// When `require_client_certificate` is set, clients must present a certificate issued by the
    /// generated CA.
    pub(crate) async fn start(
        generated: &GeneratedCertificates,
        require_client_certificate: bool,
    ) -> Self {
        let provider = Arc::new(ring::default_provider());
        let builder = ServerConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()
            .unwrap();
        let builder = if require_client_certificate {
            let mut roots = RootCertStore::empty();
            for cert in load_certificates(&generated.server_ca).unwrap() {
                roots.add(cert).unwrap();
            }
            let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider)
                .build()
                .unwrap();
            builder.with_client_cert_verifier(verifier)
        } else {
            builder.with_no_client_auth()
        };
        let config = builder
            .with_single_cert(
                load_certificates(&generated.cert).unwrap(),
                load_private_key(&generated.key).unwrap(),
            )
            .unwrap();
        let acceptor = TlsAcceptor::from(Arc::new(config));

        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handshakes_with_client_certificate = Arc::new(AtomicUsize::new(0));
        let counter = handshakes_with_client_certificate.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let acceptor = acceptor.clone();
                let counter = counter.clone();
                tokio::spawn(async move {
                    let Ok(mut stream) = acceptor.accept(stream).await else {
                        return;
                    };
                    if stream
                        .get_ref()
                        .1
                        .peer_certificates()
                        .is_some_and(|certs| !certs.is_empty())
                    {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }
                    let _ = stream.write_all(b"x").await;
                    let _ = stream.flush().await;
                    tokio::time::sleep(Duration::from_secs(5)).await;
                });
            }
        });

        Self {
            port,
            handshakes_with_client_certificate,
        }
    }

    pub(crate) fn port(&self) -> u16 {
        self.port
    }

    /// Completed handshakes in which the client presented a certificate.
    pub(crate) fn handshakes_with_client_certificate(&self) -> usize {
        self.handshakes_with_client_certificate
            .load(Ordering::SeqCst)
    }
}
