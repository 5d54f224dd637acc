//! Contains the `Error` and `Result` types that `mongodb-tls-harness` uses.

use std::{path::Path, sync::Arc};

use thiserror::Error;

/// The result type for all methods that can return an error in this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// An error that can occur while preparing certificates, TLS configurations, an embedded server
/// or clients. The inner [`ErrorKind`] is boxed to keep `Result`s small.
#[derive(Clone, Debug, Error)]
#[error("{kind}")]
#[non_exhaustive]
pub struct Error {
    /// The type of error that occurred.
    pub kind: Box<ErrorKind>,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind) -> Self {
        Self {
            kind: Box::new(kind),
        }
    }

    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        ErrorKind::InvalidArgument {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn invalid_config(message: impl Into<String>) -> Self {
        ErrorKind::InvalidConfig {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn invalid_tls_config(message: impl Into<String>) -> Self {
        ErrorKind::InvalidTlsConfig {
            message: message.into(),
        }
        .into()
    }

    /// Wraps an I/O error with the path that was being accessed.
    pub(crate) fn io_at(path: &Path, error: std::io::Error) -> Self {
        let message = format!("{}: {}", path.display(), error);
        ErrorKind::Io(Arc::new(std::io::Error::new(error.kind(), message))).into()
    }

    /// Whether this error was caused by using a client after it was closed.
    pub fn is_shutdown(&self) -> bool {
        matches!(self.kind.as_ref(), ErrorKind::Shutdown)
    }

    /// Whether this error was caused by the embedded server failing to come up.
    pub fn is_server_startup_error(&self) -> bool {
        matches!(self.kind.as_ref(), ErrorKind::ServerStartup { .. })
    }

    /// Whether this error indicates that no `mongod` binary could be located.
    pub fn is_mongod_not_found(&self) -> bool {
        matches!(self.kind.as_ref(), ErrorKind::MongodNotFound { .. })
    }
}

impl<E> From<E> for Error
where
    ErrorKind: From<E>,
{
    fn from(err: E) -> Self {
        Error::new(err.into())
    }
}

impl From<std::io::Error> for ErrorKind {
    fn from(err: std::io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl From<rcgen::Error> for ErrorKind {
    fn from(err: rcgen::Error) -> Self {
        Self::CertificateGeneration {
            message: err.to_string(),
        }
    }
}

impl From<mongodb::error::Error> for ErrorKind {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Driver(err)
    }
}

/// The types of errors that can occur.
#[allow(missing_docs)]
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum ErrorKind {
    /// An invalid argument was provided.
    #[error("An invalid argument was provided: {message}")]
    #[non_exhaustive]
    InvalidArgument { message: String },

    /// A configuration key was missing or held a value that could not be interpreted.
    #[error("Invalid configuration: {message}")]
    #[non_exhaustive]
    InvalidConfig { message: String },

    /// A TLS configuration referenced missing or unusable material, or a handshake failed.
    #[error("Invalid TLS configuration: {message}")]
    #[non_exhaustive]
    InvalidTlsConfig { message: String },

    /// Creating or signing a certificate failed.
    #[error("Certificate generation failed: {message}")]
    #[non_exhaustive]
    CertificateGeneration { message: String },

    /// Wrapper around [`std::io::Error`].
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    /// No `mongod` binary could be located.
    #[error("Unable to locate a mongod binary: {message}")]
    #[non_exhaustive]
    MongodNotFound { message: String },

    /// The located `mongod` does not support the requested configuration.
    #[error("The server does not support the requested configuration: {message}")]
    #[non_exhaustive]
    IncompatibleServer { message: String },

    /// The embedded server exited or did not accept connections in time.
    #[error("{message}")]
    #[non_exhaustive]
    ServerStartup { message: String },

    /// An error reported by the MongoDB driver.
    #[error("Driver error: {0}")]
    Driver(mongodb::error::Error),

    /// A client was used after [`Clients::close`](crate::Clients::close).
    #[error("Client has been shut down")]
    Shutdown,
}
