//! Named TLS configurations built from configuration keys.
//!
//! Each configuration has an optional PEM trust store (the CAs used to verify the server), an
//! optional PEM key store (certificate/key pairs presented to the server) and a `trust-all` switch.
//! Keys take the form
//!
//! ```text
//! tls.<name>.trust-store.pem.certs=<path>[,<path>...]
//! tls.<name>.key-store.pem.<alias>.cert=<path>
//! tls.<name>.key-store.pem.<alias>.key=<path>
//! tls.<name>.trust-all=true|false
//! ```
//!
//! Omitting `<name>` (e.g. `tls.trust-store.pem.certs`) configures the default configuration,
//! which is also reachable under the name [`DEFAULT_CONFIGURATION_NAME`].

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use mongodb::options::TlsOptions;
use tokio::{io::AsyncReadExt, net::TcpStream};

use crate::{
    certs::concat_files,
    config::Properties,
    error::{Error, Result},
    runtime::{self, load_certificates, load_private_key},
    trace::{TracingRepresentation, TLS_TRACING_EVENT_TARGET},
};

/// The name under which the unnamed configuration is registered.
pub const DEFAULT_CONFIGURATION_NAME: &str = "default";

const PREFIX: &str = "tls.";
const TRUST_STORE: &str = "trust-store";
const KEY_STORE: &str = "key-store";
const TRUST_ALL: &str = "trust-all";

/// How long [`TlsConfiguration::probe`] waits for the server to reject the client after the
/// handshake before treating the connection as accepted.
const PROBE_REJECTION_WINDOW: Duration = Duration::from_millis(500);

/// PEM certificates trusted when verifying the server.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct PemTrustStore {
    /// Certificate files, in configuration order.
    pub certs: Vec<PathBuf>,
}

/// One certificate/key pair of a key store.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub struct PemKeyCertEntry {
    /// The alias the pair was configured under.
    pub alias: String,

    /// Certificate (chain) file.
    pub cert: PathBuf,

    /// Private key file.
    pub key: PathBuf,
}

/// PEM certificate/key pairs presented to the server.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct PemKeyStore {
    /// Entries ordered by alias, numerically where aliases are numbers.
    pub entries: Vec<PemKeyCertEntry>,
}

/// A named TLS configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub struct TlsConfiguration {
    name: String,

    /// CAs used to verify the server.
    pub trust_store: Option<PemTrustStore>,

    /// Certificates presented to the server.
    pub key_store: Option<PemKeyStore>,

    /// Accept any server certificate. For testing only.
    pub trust_all: bool,
}

impl TlsConfiguration {
    /// Creates an empty configuration called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            trust_store: None,
            key_store: None,
            trust_all: false,
        }
    }

    /// The configuration's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Checks that every referenced file exists and holds the expected PEM material.
    pub fn validate(&self) -> Result<()> {
        if let Some(ref trust_store) = self.trust_store {
            if trust_store.certs.is_empty() {
                return Err(Error::invalid_tls_config(format!(
                    "Trust store of TLS configuration {} lists no certificates",
                    self.name
                )));
            }
            for path in &trust_store.certs {
                load_certificates(path)?;
            }
        }
        if let Some(ref key_store) = self.key_store {
            for entry in &key_store.entries {
                load_certificates(&entry.cert)?;
                load_private_key(&entry.key)?;
            }
        }
        Ok(())
    }

    /// Converts this configuration into driver TLS options. Files that need combining are written
    /// into `scratch_dir`:
    ///
    /// * several trust-store files are concatenated into `<name>-ca.pem`,
    /// * the first key-store entry is written certificate-then-key into `<name>-certkey.pem`.
    pub fn to_tls_options(&self, scratch_dir: &Path) -> Result<TlsOptions> {
        self.validate()?;

        let mut options = TlsOptions::default();

        if let Some(ref trust_store) = self.trust_store {
            options.ca_file_path = match trust_store.certs.as_slice() {
                [single] => Some(single.clone()),
                many => {
                    let bundle = scratch_dir.join(format!("{}-ca.pem", self.name));
                    concat_files(&bundle, many)?;
                    Some(bundle)
                }
            };
        }

        if let Some(entry) = self.key_store.as_ref().and_then(|ks| ks.entries.first()) {
            let bundle = scratch_dir.join(format!("{}-certkey.pem", self.name));
            concat_files(&bundle, &[&entry.cert, &entry.key])?;
            options.cert_key_file_path = Some(bundle);
        }

        if self.trust_all {
            options.allow_invalid_certificates = Some(true);
        }

        tracing::debug!(
            target: TLS_TRACING_EVENT_TARGET,
            configuration = self.name.as_str(),
            caFile = options.ca_file_path.as_deref().map(|p| p.tracing_representation()),
            certKeyFile = options
                .cert_key_file_path
                .as_deref()
                .map(|p| p.tracing_representation()),
            trustAll = self.trust_all,
            "Resolved driver TLS options",
        );

        Ok(options)
    }

    /// Builds a `rustls` client configuration from the same material.
    pub fn rustls_client_config(&self) -> Result<rustls::ClientConfig> {
        runtime::make_rustls_config(self)
    }

    /// Connects to `host:port` and performs a TLS handshake with this configuration.
    ///
    /// Success means the server presented a certificate this configuration trusts and did not
    /// reject the client certificate within a short window after the handshake.
    pub async fn probe(&self, host: &str, port: u16) -> Result<()> {
        let config = Arc::new(self.rustls_client_config()?);
        let tcp_stream = TcpStream::connect((host, port)).await?;
        let mut stream = runtime::tls_connect(host, tcp_stream, config)
            .await
            .map_err(|e| self.probe_error(host, port, e))?;

        // TLS 1.3 servers verify the client certificate after the client finishes the handshake,
        // so a rejection only shows up on the first read.
        let mut buf = [0u8; 1];
        match tokio::time::timeout(PROBE_REJECTION_WINDOW, stream.read(&mut buf)).await {
            Err(_) | Ok(Ok(1..)) => {}
            Ok(Ok(0)) => {
                return Err(self.probe_error(host, port, "connection closed by server"));
            }
            Ok(Err(e)) => return Err(self.probe_error(host, port, e)),
        }

        tracing::debug!(
            target: TLS_TRACING_EVENT_TARGET,
            configuration = self.name.as_str(),
            serverHost = host,
            serverPort = port,
            "TLS handshake succeeded",
        );
        Ok(())
    }

    fn probe_error(&self, host: &str, port: u16, cause: impl std::fmt::Display) -> Error {
        Error::invalid_tls_config(format!(
            "TLS handshake with {host}:{port} using configuration {} failed: {cause}",
            self.name
        ))
    }
}

/// The set of TLS configurations, by name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TlsRegistry {
    configurations: BTreeMap<String, TlsConfiguration>,
}

impl TlsRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the registry from every `tls.*` key.
    pub fn from_properties(properties: &Properties) -> Result<Self> {
        let mut builders: BTreeMap<String, ConfigurationBuilder> = BTreeMap::new();

        for (key, value) in properties.keys_with_prefix(PREFIX) {
            let segments: Vec<&str> = key[PREFIX.len()..].split('.').collect();
            let (name, rest) = match segments.split_first() {
                Some((first, _)) if [TRUST_STORE, KEY_STORE, TRUST_ALL].contains(first) => {
                    (DEFAULT_CONFIGURATION_NAME, segments.as_slice())
                }
                Some((first, rest)) if !first.is_empty() => (*first, rest),
                _ => return Err(unsupported_key(key)),
            };
            let builder = builders.entry(name.to_string()).or_default();

            match rest {
                [TRUST_STORE, "pem", "certs"] => {
                    builder.trust_certs = Some(
                        value
                            .split(',')
                            .map(str::trim)
                            .filter(|s| !s.is_empty())
                            .map(PathBuf::from)
                            .collect(),
                    );
                }
                [KEY_STORE, "pem", alias, part @ ("cert" | "key")] if !alias.is_empty() => {
                    let slot = builder.key_entries.entry(alias.to_string()).or_default();
                    let path = Some(PathBuf::from(value));
                    if *part == "cert" {
                        slot.0 = path;
                    } else {
                        slot.1 = path;
                    }
                }
                [TRUST_ALL] => {
                    builder.trust_all = properties.get_bool(key)?.unwrap_or(false);
                }
                _ => return Err(unsupported_key(key)),
            }
        }

        let mut registry = Self::new();
        for (name, builder) in builders {
            registry.register(builder.build(name)?);
        }
        Ok(registry)
    }

    /// Adds or replaces a configuration.
    pub fn register(&mut self, configuration: TlsConfiguration) {
        self.configurations
            .insert(configuration.name.clone(), configuration);
    }

    /// The configuration registered as `name`.
    pub fn get(&self, name: &str) -> Option<&TlsConfiguration> {
        self.configurations.get(name)
    }

    /// The default configuration, if one was configured.
    pub fn default_configuration(&self) -> Option<&TlsConfiguration> {
        self.get(DEFAULT_CONFIGURATION_NAME)
    }

    /// Names of every registered configuration.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.configurations.keys().map(String::as_str)
    }
}

#[derive(Default)]
struct ConfigurationBuilder {
    trust_certs: Option<Vec<PathBuf>>,
    key_entries: BTreeMap<String, (Option<PathBuf>, Option<PathBuf>)>,
    trust_all: bool,
}

impl ConfigurationBuilder {
    fn build(self, name: String) -> Result<TlsConfiguration> {
        let mut entries = Vec::with_capacity(self.key_entries.len());
        for (alias, (cert, key)) in self.key_entries {
            match (cert, key) {
                (Some(cert), Some(key)) => entries.push(PemKeyCertEntry { alias, cert, key }),
                (cert, _) => {
                    let missing = if cert.is_none() { "cert" } else { "key" };
                    return Err(Error::invalid_config(format!(
                        "key store entry {alias} of TLS configuration {name} has no {missing}"
                    )));
                }
            }
        }
        entries.sort_by(|a, b| alias_order(&a.alias).cmp(&alias_order(&b.alias)));

        Ok(TlsConfiguration {
            trust_store: self.trust_certs.map(|certs| PemTrustStore { certs }),
            key_store: (!entries.is_empty()).then_some(PemKeyStore { entries }),
            trust_all: self.trust_all,
            name,
        })
    }
}

fn alias_order(alias: &str) -> (u64, &str) {
    (alias.parse().unwrap_or(u64::MAX), alias)
}

fn unsupported_key(key: &str) -> Error {
    Error::invalid_config(format!("unsupported TLS configuration key {key}"))
}
