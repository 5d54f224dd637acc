use std::path::Path;

use crate::error::{Error, Result};

/// Options that [`Mongod::start`](super::Mongod::start) sets itself.
const RESERVED: [&str; 4] = ["--port", "--bind_ip", "--dbpath", "--logpath"];

/// Extra command-line arguments for `mongod`, kept in insertion order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MongodArguments {
    args: Vec<(String, Option<String>)>,
}

impl MongodArguments {
    /// Creates an empty argument list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `--flag value`. Setting a flag again replaces its value in place.
    pub fn put_arg(mut self, flag: impl Into<String>, value: impl Into<String>) -> Self {
        self.put(flag.into(), Some(value.into()));
        self
    }

    /// Sets a flag that takes no value, e.g. `--ipv6`.
    pub fn put_flag(mut self, flag: impl Into<String>) -> Self {
        self.put(flag.into(), None);
        self
    }

    /// Requires TLS on every connection, presenting `cert_key_file` (certificate followed by its
    /// key) and verifying client certificates against `ca_file`.
    pub fn require_tls(self, cert_key_file: &Path, ca_file: &Path) -> Self {
        self.put_arg("--tlsCertificateKeyFile", cert_key_file.display().to_string())
            .put_arg("--tlsMode", "requireTLS")
            .put_arg("--tlsCAFile", ca_file.display().to_string())
    }

    /// Whether `flag` is set.
    pub fn contains(&self, flag: &str) -> bool {
        self.args.iter().any(|(f, _)| f == flag)
    }

    /// The value of `flag`, if it is set and takes a value.
    pub fn value_of(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .find(|(f, _)| f == flag)
            .and_then(|(_, v)| v.as_deref())
    }

    /// The arguments as they are passed to the process.
    pub fn to_args(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.args.len() * 2);
        for (flag, value) in &self.args {
            out.push(flag.clone());
            if let Some(value) = value {
                out.push(value.clone());
            }
        }
        out
    }

    pub(crate) fn uses_tls(&self) -> bool {
        self.args.iter().any(|(f, _)| f.starts_with("--tls"))
    }

    pub(crate) fn check_reserved(&self) -> Result<()> {
        for (flag, _) in &self.args {
            if !flag.starts_with("--") {
                return Err(Error::invalid_argument(format!(
                    "mongod argument {flag:?} must start with `--`"
                )));
            }
            if RESERVED.contains(&flag.as_str()) {
                return Err(Error::invalid_argument(format!(
                    "{flag} is managed by the embedded server options and cannot be passed as \
                     an extra argument"
                )));
            }
        }
        Ok(())
    }

    fn put(&mut self, flag: String, value: Option<String>) {
        match self.args.iter_mut().find(|(f, _)| *f == flag) {
            Some(slot) => slot.1 = value,
            None => self.args.push((flag, value)),
        }
    }
}
