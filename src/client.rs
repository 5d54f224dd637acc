//! Production of synchronous and reactive MongoDB clients from configuration.

use std::path::Path;

use mongodb::{
    options::{ClientOptions, Tls, TlsOptions},
    sync::Client as SyncClient,
    Client,
};
use tempfile::TempDir;

use crate::{
    config::MongoClientConfig,
    error::{Error, ErrorKind, Result},
    tls::TlsRegistry,
    trace::{TracingRepresentation, CLIENT_TRACING_EVENT_TARGET},
};

/// Creates clients sharing one set of resolved [`ClientOptions`].
///
/// TLS material that has to be combined for the driver is written to a scratch directory owned by
/// the producer, so the producer must outlive any client created from it.
#[derive(Debug)]
pub struct ClientProducer {
    config: MongoClientConfig,
    options: ClientOptions,
    scratch_dir: Option<TempDir>,
}

impl ClientProducer {
    /// Resolves `config` against `registry`.
    ///
    /// When TLS is enabled, the configuration named by
    /// [`tls_configuration_name`](MongoClientConfig::tls_configuration_name) is used, falling back
    /// to the registry's default configuration and then to the driver's defaults.
    pub async fn new(config: MongoClientConfig, registry: &TlsRegistry) -> Result<Self> {
        let mut options = ClientOptions::parse(config.connection_string.as_str()).await?;

        if let Some(ref app_name) = config.application_name {
            options.app_name = Some(app_name.clone());
        }
        if let Some(timeout) = config.server_selection_timeout {
            options.server_selection_timeout = Some(timeout);
        }
        if let Some(timeout) = config.connect_timeout {
            options.connect_timeout = Some(timeout);
        }

        let mut scratch_dir = None;
        if config.tls {
            let configuration = match config.tls_configuration_name {
                Some(ref name) => Some(registry.get(name).ok_or_else(|| {
                    let known: Vec<&str> = registry.names().collect();
                    Error::invalid_config(format!(
                        "no TLS configuration named {name} (configured: {known:?})"
                    ))
                })?),
                None => registry.default_configuration(),
            };

            let tls_options = match configuration {
                Some(configuration) => {
                    let dir = tempfile::Builder::new().prefix("mongo-tls").tempdir()?;
                    let tls_options = configuration.to_tls_options(dir.path())?;
                    scratch_dir = Some(dir);
                    tls_options
                }
                None => TlsOptions::default(),
            };
            options.tls = Some(Tls::Enabled(tls_options));
        }

        tracing::debug!(
            target: CLIENT_TRACING_EVENT_TARGET,
            hosts = options
                .hosts
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(","),
            tls = config.tls,
            tlsConfigurationName = config.tls_configuration_name.as_deref(),
            scratchDir = scratch_dir.as_ref().map(|d| d.path().tracing_representation()),
            "Resolved client options",
        );

        Ok(Self {
            config,
            options,
            scratch_dir,
        })
    }

    /// The configuration this producer was created from.
    pub fn config(&self) -> &MongoClientConfig {
        &self.config
    }

    /// The resolved driver options.
    pub fn client_options(&self) -> &ClientOptions {
        &self.options
    }

    /// Where combined TLS files were written, if any.
    pub fn scratch_dir(&self) -> Option<&Path> {
        self.scratch_dir.as_ref().map(TempDir::path)
    }

    /// Creates a synchronous client.
    pub fn client(&self) -> Result<SyncClient> {
        Ok(SyncClient::with_options(self.options.clone())?)
    }

    /// Creates an async ("reactive") client.
    pub fn reactive_client(&self) -> Result<Client> {
        Ok(Client::with_options(self.options.clone())?)
    }
}

/// A synchronous and a reactive client obtained from one [`ClientProducer`].
#[derive(Debug)]
pub struct Clients {
    client: Option<SyncClient>,
    reactive_client: Option<Client>,
}

impl Clients {
    /// Creates both clients. Must be called within a tokio runtime context.
    pub fn inject(producer: &ClientProducer) -> Result<Self> {
        Ok(Self {
            client: Some(producer.client()?),
            reactive_client: Some(producer.reactive_client()?),
        })
    }

    /// The synchronous client.
    pub fn client(&self) -> Result<&SyncClient> {
        self.client.as_ref().ok_or_else(|| ErrorKind::Shutdown.into())
    }

    /// The reactive client.
    pub fn reactive_client(&self) -> Result<&Client> {
        self.reactive_client
            .as_ref()
            .ok_or_else(|| ErrorKind::Shutdown.into())
    }

    /// Whether [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.client.is_none() && self.reactive_client.is_none()
    }

    /// Shuts down the synchronous client, then the reactive client. Clients already released are
    /// skipped, so calling this again does nothing.
    ///
    /// This blocks the current thread. Call it from a thread that has entered a multi-threaded
    /// tokio runtime (see [`Runtime::enter`](tokio::runtime::Runtime::enter)) but is not polling a
    /// future; use [`close_async`](Self::close_async) from async code.
    pub fn close(&mut self) {
        if let Some(client) = self.client.take() {
            client.shutdown().run();
            tracing::debug!(target: CLIENT_TRACING_EVENT_TARGET, "Closed synchronous client");
        }
        if let Some(reactive_client) = self.reactive_client.take() {
            reactive_client.shutdown().run();
            tracing::debug!(target: CLIENT_TRACING_EVENT_TARGET, "Closed reactive client");
        }
    }

    /// The async counterpart of [`close`](Self::close), with the same ordering.
    pub async fn close_async(&mut self) {
        if let Some(client) = self.client.take() {
            client.shutdown().await;
            tracing::debug!(target: CLIENT_TRACING_EVENT_TARGET, "Closed synchronous client");
        }
        if let Some(reactive_client) = self.reactive_client.take() {
            reactive_client.shutdown().await;
            tracing::debug!(target: CLIENT_TRACING_EVENT_TARGET, "Closed reactive client");
        }
    }
}
