use std::path::PathBuf;

use pretty_assertions::assert_eq;

use crate::{
    certs::GeneratedCertificates,
    config::Properties,
    error::ErrorKind,
    runtime::load_certificates,
    test::{
        generate_certificates,
        init_tracing,
        util::{read, TlsTestServer},
    },
    tls::{
        PemKeyStore,
        PemTrustStore,
        TlsConfiguration,
        TlsRegistry,
        DEFAULT_CONFIGURATION_NAME,
    },
};

fn registry(entries: &[(&str, &str)]) -> crate::error::Result<TlsRegistry> {
    TlsRegistry::from_properties(&entries.iter().copied().collect::<Properties>())
}

/// The "mongo" configuration trusting the client CA and presenting the client certificate.
fn mongo_configuration(generated: &GeneratedCertificates) -> TlsConfiguration {
    let client = generated.client.as_ref().unwrap();
    let properties: Properties = [
        (
            "tls.mongo.trust-store.pem.certs",
            generated.client_ca.display().to_string(),
        ),
        (
            "tls.mongo.key-store.pem.0.cert",
            client.cert.display().to_string(),
        ),
        (
            "tls.mongo.key-store.pem.0.key",
            client.key.display().to_string(),
        ),
    ]
    .into_iter()
    .collect();
    TlsRegistry::from_properties(&properties)
        .unwrap()
        .get("mongo")
        .unwrap()
        .clone()
}

#[test]
fn parses_named_configuration() {
    let registry = registry(&[
        ("tls.mongo.trust-store.pem.certs", "/certs/ca.crt"),
        ("tls.mongo.key-store.pem.0.cert", "/certs/client.crt"),
        ("tls.mongo.key-store.pem.0.key", "/certs/client.key"),
        ("mongodb.tls-configuration-name", "mongo"),
    ])
    .unwrap();

    assert_eq!(registry.names().collect::<Vec<_>>(), vec!["mongo"]);
    assert!(registry.default_configuration().is_none());

    let mongo = registry.get("mongo").unwrap();
    assert_eq!(mongo.name(), "mongo");
    assert!(!mongo.trust_all);
    assert_eq!(
        mongo.trust_store.as_ref().unwrap().certs,
        vec![PathBuf::from("/certs/ca.crt")]
    );
    let entries = &mongo.key_store.as_ref().unwrap().entries;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].alias, "0");
    assert_eq!(entries[0].cert, PathBuf::from("/certs/client.crt"));
    assert_eq!(entries[0].key, PathBuf::from("/certs/client.key"));
}

#[test]
fn unnamed_keys_configure_default() {
    let registry = registry(&[
        ("tls.trust-store.pem.certs", "/a.crt, /b.crt,"),
        ("tls.trust-all", "TRUE"),
    ])
    .unwrap();

    let default = registry.default_configuration().unwrap();
    assert_eq!(default.name(), DEFAULT_CONFIGURATION_NAME);
    assert!(default.trust_all);
    assert_eq!(
        default.trust_store.as_ref().unwrap().certs,
        vec![PathBuf::from("/a.crt"), PathBuf::from("/b.crt")]
    );
    assert!(default.key_store.is_none());
}

#[test]
fn key_store_entries_ordered_by_alias() {
    let registry = registry(&[
        ("tls.x.key-store.pem.10.cert", "/10.crt"),
        ("tls.x.key-store.pem.10.key", "/10.key"),
        ("tls.x.key-store.pem.2.cert", "/2.crt"),
        ("tls.x.key-store.pem.2.key", "/2.key"),
        ("tls.x.key-store.pem.named.cert", "/named.crt"),
        ("tls.x.key-store.pem.named.key", "/named.key"),
    ])
    .unwrap();

    let key_store = registry.get("x").unwrap().key_store.as_ref().unwrap();
    let aliases: Vec<&str> = key_store
        .entries
        .iter()
        .map(|e| e.alias.as_str())
        .collect();
    assert_eq!(aliases, vec!["2", "10", "named"]);
}

#[test]
fn rejects_incomplete_or_unknown_keys() {
    for entries in [
        &[("tls.mongo.key-store.pem.0.cert", "/client.crt")][..],
        &[("tls.mongo.key-store.pem.0.key", "/client.key")][..],
        &[("tls.mongo.key-store.pkcs12.path", "/client.p12")][..],
        &[("tls.mongo.trust-store.jks.path", "/ca.jks")][..],
        &[("tls.mongo.unknown", "x")][..],
        &[("tls..trust-all", "true")][..],
        &[("tls.mongo.trust-all", "maybe")][..],
    ] {
        let error = registry(entries).unwrap_err();
        assert!(
            matches!(*error.kind, ErrorKind::InvalidConfig { .. }),
            "{entries:?}: {error}"
        );
    }
}

#[test]
fn validate_reports_missing_files() {
    let (dir, generated) = generate_certificates("validate");
    let mut configuration = mongo_configuration(&generated);
    configuration.validate().unwrap();

    configuration.trust_store = Some(PemTrustStore {
        certs: vec![dir.path().join("missing.crt")],
    });
    let error = configuration.validate().unwrap_err();
    assert!(matches!(*error.kind, ErrorKind::InvalidTlsConfig { .. }));
    assert!(error.to_string().starts_with("Invalid TLS configuration: "));
    assert!(error.to_string().contains("missing.crt"));

    configuration.trust_store = Some(PemTrustStore { certs: Vec::new() });
    assert!(configuration.validate().is_err());
}

#[test]
fn validate_rejects_certificate_as_key() {
    let (_dir, generated) = generate_certificates("swapped");
    let mut configuration = mongo_configuration(&generated);
    let mut key_store: PemKeyStore = configuration.key_store.take().unwrap();
    key_store.entries[0].key = key_store.entries[0].cert.clone();
    configuration.key_store = Some(key_store);

    let error = configuration.validate().unwrap_err();
    assert!(matches!(*error.kind, ErrorKind::InvalidTlsConfig { .. }));
}

#[test]
fn driver_options_use_single_trust_file_directly() {
    let (_dir, generated) = generate_certificates("options");
    let configuration = mongo_configuration(&generated);
    let scratch = tempfile::tempdir().unwrap();

    let options = configuration.to_tls_options(scratch.path()).unwrap();

    assert_eq!(options.ca_file_path, Some(generated.client_ca.clone()));
    assert_eq!(options.allow_invalid_certificates, None);

    let cert_key = options.cert_key_file_path.unwrap();
    assert_eq!(cert_key, scratch.path().join("mongo-certkey.pem"));
    let client = generated.client.as_ref().unwrap();
    assert_eq!(
        read(&cert_key),
        format!("{}{}", read(&client.cert), read(&client.key))
    );
}

#[test]
fn driver_options_bundle_several_trust_files() {
    let (_dir, first) = generate_certificates("first");
    let (_other, second) = generate_certificates("second");
    let mut configuration = TlsConfiguration::new("bundle");
    configuration.trust_store = Some(PemTrustStore {
        certs: vec![first.client_ca.clone(), second.client_ca.clone()],
    });
    configuration.trust_all = true;
    let scratch = tempfile::tempdir().unwrap();

    let options = configuration.to_tls_options(scratch.path()).unwrap();

    let bundle = options.ca_file_path.unwrap();
    assert_eq!(bundle, scratch.path().join("bundle-ca.pem"));
    assert_eq!(
        read(&bundle),
        format!("{}{}", read(&first.client_ca), read(&second.client_ca))
    );
    assert_eq!(load_certificates(&bundle).unwrap().len(), 2);
    assert_eq!(options.cert_key_file_path, None);
    assert_eq!(options.allow_invalid_certificates, Some(true));
}

#[test]
fn rustls_config_requires_trust() {
    let configuration = TlsConfiguration::new("empty");
    let error = configuration.rustls_client_config().unwrap_err();
    assert!(matches!(*error.kind, ErrorKind::InvalidTlsConfig { .. }));

    let mut trust_all = TlsConfiguration::new("trust-all");
    trust_all.trust_all = true;
    trust_all.rustls_client_config().unwrap();
}

#[tokio::test]
async fn handshake_succeeds_with_client_certificate() {
    init_tracing();
    let (_dir, generated) = generate_certificates("handshake");
    let server = TlsTestServer::start(&generated, true).await;

    mongo_configuration(&generated)
        .probe("127.0.0.1", server.port())
        .await
        .unwrap();
    assert_eq!(server.handshakes_with_client_certificate(), 1);
}

#[tokio::test]
async fn handshake_fails_without_client_certificate() {
    let (_dir, generated) = generate_certificates("handshake-anonymous");
    let server = TlsTestServer::start(&generated, true).await;

    let mut configuration = mongo_configuration(&generated);
    configuration.key_store = None;

    let error = configuration
        .probe("127.0.0.1", server.port())
        .await
        .unwrap_err();
    assert!(matches!(*error.kind, ErrorKind::InvalidTlsConfig { .. }));
}

#[tokio::test]
async fn handshake_fails_with_untrusted_server() {
    let (_dir, generated) = generate_certificates("handshake-server");
    let (_other, unrelated) = generate_certificates("handshake-other");
    let server = TlsTestServer::start(&generated, true).await;

    let error = mongo_configuration(&unrelated)
        .probe("127.0.0.1", server.port())
        .await
        .unwrap_err();
    assert!(matches!(*error.kind, ErrorKind::InvalidTlsConfig { .. }));
}

#[tokio::test]
async fn trust_all_accepts_unknown_server_certificate() {
    let (_dir, generated) = generate_certificates("trust-all-server");
    let server = TlsTestServer::start(&generated, false).await;

    let mut trust_all = TlsConfiguration::new("trust-all");
    trust_all.trust_all = true;
    trust_all.probe("127.0.0.1", server.port()).await.unwrap();

    // The same server is rejected once its issuer has to be trusted.
    let (_other, unrelated) = generate_certificates("trust-all-other");
    let mut verifying = TlsConfiguration::new("verifying");
    verifying.trust_store = Some(PemTrustStore {
        certs: vec![unrelated.client_ca.clone()],
    });
    let error = verifying
        .probe("127.0.0.1", server.port())
        .await
        .unwrap_err();
    assert!(matches!(*error.kind, ErrorKind::InvalidTlsConfig { .. }));
}
