use std::{path::Path, sync::Arc};

use rustls::{
    client::{
        danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
        ClientConfig,
    },
    crypto::{ring, CryptoProvider},
    pki_types::{pem::PemObject, CertificateDer, PrivateKeyDer, ServerName, UnixTime},
    DigitallySignedStruct,
    Error as TlsError,
    RootCertStore,
    SignatureScheme,
};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::{
    error::{Error, Result},
    tls::TlsConfiguration,
};

pub(crate) type TlsStream = tokio_rustls::client::TlsStream<TcpStream>;

pub(crate) async fn tls_connect(
    host: &str,
    tcp_stream: TcpStream,
    cfg: Arc<ClientConfig>,
) -> Result<TlsStream> {
    let name = ServerName::try_from(host.to_string()).map_err(|e| {
        Error::invalid_argument(format!("{host:?} is not a valid TLS server name: {e}"))
    })?;

    let conn = TlsConnector::from(cfg).connect(name, tcp_stream).await?;
    Ok(conn)
}

/// Reads every PEM-encoded certificate in `path`.
pub(crate) fn load_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    if !path.exists() {
        return Err(Error::invalid_tls_config(format!(
            "Certificate file {} does not exist",
            path.display()
        )));
    }
    let certs = CertificateDer::pem_file_iter(path)
        .and_then(|iter| iter.collect::<std::result::Result<Vec<_>, _>>())
        .map_err(|error| {
            Error::invalid_tls_config(format!(
                "Unable to parse PEM-encoded certificate from {}: {}",
                path.display(),
                error
            ))
        })?;
    if certs.is_empty() {
        return Err(Error::invalid_tls_config(format!(
            "No PEM-encoded certificates in {}",
            path.display()
        )));
    }
    Ok(certs)
}

/// Reads the single PEM-encoded private key in `path`.
pub(crate) fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    if !path.exists() {
        return Err(Error::invalid_tls_config(format!(
            "Key file {} does not exist",
            path.display()
        )));
    }
    let mut keys = PrivateKeyDer::pem_file_iter(path)
        .and_then(|iter| iter.collect::<std::result::Result<Vec<_>, _>>())
        .map_err(|error| {
            Error::invalid_tls_config(format!(
                "Unable to parse PEM-encoded private key from {}: {}",
                path.display(),
                error
            ))
        })?;
    match keys.len() {
        1 => Ok(keys.remove(0)),
        0 => Err(Error::invalid_tls_config(format!(
            "No PEM-encoded keys in {}",
            path.display()
        ))),
        n => Err(Error::invalid_tls_config(format!(
            "Expected one PEM-encoded key in {}, found {}",
            path.display(),
            n
        ))),
    }
}

/// Converts a [`TlsConfiguration`] into a `rustls::ClientConfig`.
pub(crate) fn make_rustls_config(cfg: &TlsConfiguration) -> Result<ClientConfig> {
    let provider = Arc::new(ring::default_provider());
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|error| Error::invalid_tls_config(error.to_string()))?;

    let builder = if cfg.trust_all {
        // nosemgrep: rustls-dangerous
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoCertVerifier { provider }))
    } else {
        let trust_store = cfg.trust_store.as_ref().ok_or_else(|| {
            Error::invalid_tls_config(format!(
                "TLS configuration {} has neither a trust store nor trust-all",
                cfg.name()
            ))
        })?;
        let mut store = RootCertStore::empty();
        for path in &trust_store.certs {
            for cert in load_certificates(path)? {
                store.add(cert).map_err(|error| {
                    Error::invalid_tls_config(format!(
                        "Unable to add root certificate from {}: {}",
                        path.display(),
                        error
                    ))
                })?;
            }
        }
        builder.with_root_certificates(store)
    };

    let config = match cfg.key_store.as_ref().and_then(|ks| ks.entries.first()) {
        Some(entry) => {
            let certs = load_certificates(&entry.cert)?;
            let key = load_private_key(&entry.key)?;
            builder
                .with_client_auth_cert(certs, key)
                .map_err(|error| Error::invalid_tls_config(error.to_string()))?
        }
        None => builder.with_no_client_auth(),
    };

    Ok(config)
}

#[derive(Debug)]
struct NoCertVerifier {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for NoCertVerifier {
    fn verify_server_cert(
        &self,
        _: &CertificateDer<'_>,
        _: &[CertificateDer<'_>],
        _: &ServerName<'_>,
        _: &[u8],
        _: UnixTime,
    ) -> std::result::Result<ServerCertVerified, TlsError> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, TlsError> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, TlsError> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
