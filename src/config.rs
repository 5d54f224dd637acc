//! Key/value configuration with overrides, and the client settings read from it.
//!
//! Keys follow the `application.properties` convention:
//!
//! ```text
//! mongodb.connection-string=mongodb://127.0.0.1:27018
//! mongodb.tls-configuration-name=mongo
//! tls.mongo.trust-store.pem.certs=/tmp/mongo/mongo-cert-client-ca.crt
//! tls.mongo.key-store.pem.0.cert=/tmp/mongo/mongo-cert-client.crt
//! tls.mongo.key-store.pem.0.key=/tmp/mongo/mongo-cert-client.key
//! ```

use std::{collections::BTreeMap, path::Path, time::Duration};

use crate::error::{Error, Result};

const CONNECTION_STRING: &str = "mongodb.connection-string";
const TLS: &str = "mongodb.tls";
const TLS_CONFIGURATION_NAME: &str = "mongodb.tls-configuration-name";
const APPLICATION_NAME: &str = "mongodb.application-name";
const SERVER_SELECTION_TIMEOUT_MS: &str = "mongodb.server-selection-timeout-ms";
const CONNECT_TIMEOUT_MS: &str = "mongodb.connect-timeout-ms";

/// An ordered set of configuration keys and their values.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Properties {
    values: BTreeMap<String, String>,
}

impl Properties {
    /// Creates an empty set of properties.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `key=value` (or `key: value`) lines. Blank lines and lines starting with `#` or `!`
    /// are ignored; later definitions of a key replace earlier ones.
    pub fn parse(input: &str) -> Result<Self> {
        let mut properties = Self::new();
        for (index, line) in input.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            let Some(split) = line.find(['=', ':']) else {
                return Err(Error::invalid_config(format!(
                    "line {}: expected `key=value`, got {:?}",
                    index + 1,
                    line
                )));
            };
            let key = line[..split].trim();
            if key.is_empty() {
                return Err(Error::invalid_config(format!(
                    "line {}: missing key before {:?}",
                    index + 1,
                    &line[split..split + 1]
                )));
            }
            properties.override_key(key, line[split + 1..].trim());
        }
        Ok(properties)
    }

    /// Reads and parses a properties file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| Error::io_at(path, e))?;
        Self::parse(&contents)
    }

    /// Sets `key` to `value`, replacing any existing value.
    pub fn override_key(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Applies every entry of `other` on top of these properties.
    pub fn merge(&mut self, other: Properties) -> &mut Self {
        self.values.extend(other.values);
        self
    }

    /// The raw value of `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// The value of `key` as a boolean (`true` or `false`, case-insensitive).
    pub fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        self.get(key)
            .map(|value| {
                if value.eq_ignore_ascii_case("true") {
                    Ok(true)
                } else if value.eq_ignore_ascii_case("false") {
                    Ok(false)
                } else {
                    Err(Error::invalid_config(format!(
                        "{key} must be `true` or `false`, got {value:?}"
                    )))
                }
            })
            .transpose()
    }

    /// The value of `key` as an unsigned integer.
    pub fn get_u64(&self, key: &str) -> Result<Option<u64>> {
        self.get(key)
            .map(|value| {
                value.parse::<u64>().map_err(|_| {
                    Error::invalid_config(format!(
                        "{key} must be a non-negative integer, got {value:?}"
                    ))
                })
            })
            .transpose()
    }

    /// All `(key, value)` pairs whose key starts with `prefix`, in key order.
    pub fn keys_with_prefix<'a>(
        &'a self,
        prefix: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        self.values
            .range::<str, _>((std::ops::Bound::Included(prefix), std::ops::Bound::Unbounded))
            .take_while(move |(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// The number of keys set.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no keys are set.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for Properties
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut properties = Self::new();
        for (key, value) in iter {
            properties.override_key(key, value);
        }
        properties
    }
}

/// Settings used to produce MongoDB clients.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub struct MongoClientConfig {
    /// The connection string clients are created from.
    pub connection_string: String,

    /// Whether TLS is enabled. Naming a TLS configuration enables TLS implicitly.
    pub tls: bool,

    /// The TLS configuration to use; the default configuration is used when unset.
    pub tls_configuration_name: Option<String>,

    /// Application name reported to the server.
    pub application_name: Option<String>,

    /// Overrides the driver's server selection timeout.
    pub server_selection_timeout: Option<Duration>,

    /// Overrides the driver's connect timeout.
    pub connect_timeout: Option<Duration>,
}

impl MongoClientConfig {
    /// Creates a configuration for `connection_string` with nothing else set.
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            tls: false,
            tls_configuration_name: None,
            application_name: None,
            server_selection_timeout: None,
            connect_timeout: None,
        }
    }

    /// Reads the `mongodb.*` keys.
    pub fn from_properties(properties: &Properties) -> Result<Self> {
        let connection_string = properties
            .get(CONNECTION_STRING)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::invalid_config(format!("{CONNECTION_STRING} is required")))?;

        let tls_configuration_name = properties
            .get(TLS_CONFIGURATION_NAME)
            .filter(|s| !s.is_empty())
            .map(String::from);
        let tls = match (properties.get_bool(TLS)?, &tls_configuration_name) {
            (Some(false), Some(name)) => {
                return Err(Error::invalid_config(format!(
                    "{TLS}=false conflicts with {TLS_CONFIGURATION_NAME}={name}"
                )))
            }
            (Some(tls), _) => tls,
            (None, name) => name.is_some(),
        };

        Ok(Self {
            connection_string: connection_string.to_string(),
            tls,
            tls_configuration_name,
            application_name: properties.get(APPLICATION_NAME).map(String::from),
            server_selection_timeout: properties
                .get_u64(SERVER_SELECTION_TIMEOUT_MS)?
                .map(Duration::from_millis),
            connect_timeout: properties
                .get_u64(CONNECT_TIMEOUT_MS)?
                .map(Duration::from_millis),
        })
    }
}
