//! An embedded `mongod` started and stopped within the current process's lifetime.

mod arguments;

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use semver::Version;
use tempfile::TempDir;
use tokio::{net::TcpStream, time::Instant};
use typed_builder::TypedBuilder;

pub use self::arguments::MongodArguments;
use crate::{
    error::{Error, ErrorKind, Result},
    runtime::{process, Process},
    trace::{TracingRepresentation, SERVER_TRACING_EVENT_TARGET},
};

/// Environment variable consulted for the `mongod` path when none is configured.
pub const MONGOD_BINARY_ENV: &str = "MONGOD_BINARY";

const DEFAULT_BIND_IP: &str = "127.0.0.1";
const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(30);
const POLL_INTERVAL: Duration = Duration::from_millis(100);
const LOG_TAIL_LINES: usize = 20;

/// First server version supporting the `--tls*` options.
const MIN_TLS_VERSION: Version = Version::new(4, 2, 0);

/// Options for starting an embedded `mongod`.
#[derive(Clone, Debug, Default, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct MongodOptions {
    /// Path of the `mongod` binary. See [`find_mongod`] for the lookup used when unset.
    #[builder(setter(strip_option))]
    pub binary: Option<PathBuf>,

    /// Port to listen on. A free port is chosen when unset.
    #[builder(setter(strip_option))]
    pub port: Option<u16>,

    /// Value of `--bind_ip`. The default is `127.0.0.1`; the first entry of a comma-separated
    /// list is the host clients connect to.
    #[builder(setter(strip_option))]
    pub bind_ip: Option<String>,

    /// Data directory. A temporary directory, removed when the process handle is dropped, is
    /// used when unset.
    #[builder(setter(strip_option))]
    pub db_path: Option<PathBuf>,

    /// How long to wait for the server to accept connections. The default is 30 seconds.
    #[builder(setter(strip_option))]
    pub startup_timeout: Option<Duration>,

    /// Additional command-line arguments.
    pub arguments: MongodArguments,
}

/// Locates a `mongod` binary: `explicit` if given, else the [`MONGOD_BINARY_ENV`] environment
/// variable, else `mongod` on `PATH`.
pub fn find_mongod(explicit: Option<&Path>) -> Result<PathBuf> {
    let not_found = |message: String| Error::from(ErrorKind::MongodNotFound { message });

    if let Some(path) = explicit {
        return if path.is_file() {
            Ok(path.to_path_buf())
        } else {
            Err(not_found(format!("{} is not a file", path.display())))
        };
    }

    if let Some(path) = std::env::var_os(MONGOD_BINARY_ENV).filter(|p| !p.is_empty()) {
        let path = PathBuf::from(path);
        return if path.is_file() {
            Ok(path)
        } else {
            Err(not_found(format!(
                "{MONGOD_BINARY_ENV}={} is not a file",
                path.display()
            )))
        };
    }

    which::which("mongod").map_err(|e| not_found(format!("mongod not found on PATH: {e}")))
}

/// Runs `mongod --version` and returns the reported server version.
pub async fn mongod_version(binary: &Path) -> Result<Version> {
    let output = process::output(binary, ["--version"]).await?;
    parse_version_output(&output).ok_or_else(|| {
        ErrorKind::IncompatibleServer {
            message: format!(
                "could not determine the version of {} from {:?}",
                binary.display(),
                output.lines().next().unwrap_or_default()
            ),
        }
        .into()
    })
}

pub(crate) fn parse_version_output(output: &str) -> Option<Version> {
    output.lines().find_map(|line| {
        let version = line.trim().strip_prefix("db version v")?;
        let mut version = Version::parse(version.trim()).ok()?;
        version.pre = semver::Prerelease::EMPTY;
        Some(version)
    })
}

/// Starts embedded `mongod` processes.
#[derive(Clone, Copy, Debug)]
#[non_exhaustive]
pub struct Mongod;

impl Mongod {
    /// Spawns `mongod` with `options` and waits until it accepts TCP connections.
    pub async fn start(options: MongodOptions) -> Result<MongodProcess> {
        options.arguments.check_reserved()?;

        let binary = find_mongod(options.binary.as_deref())?;
        let version = mongod_version(&binary).await?;
        if options.arguments.uses_tls() && version < MIN_TLS_VERSION {
            return Err(ErrorKind::IncompatibleServer {
                message: format!(
                    "mongod {version} does not support the --tls* options (requires \
                     {MIN_TLS_VERSION} or newer)"
                ),
            }
            .into());
        }

        let bind_ip = options
            .bind_ip
            .unwrap_or_else(|| DEFAULT_BIND_IP.to_string());
        let host = bind_ip
            .split(',')
            .map(str::trim)
            .find(|s| !s.is_empty())
            .ok_or_else(|| Error::invalid_argument("bind_ip must name at least one address"))?
            .to_string();
        let port = match options.port {
            Some(port) => port,
            None => free_port(&host)?,
        };

        let (db_path, temp_dir) = match options.db_path {
            Some(path) => {
                std::fs::create_dir_all(&path).map_err(|e| Error::io_at(&path, e))?;
                (path, None)
            }
            None => {
                let dir = tempfile::Builder::new().prefix("mongod").tempdir()?;
                (dir.path().to_path_buf(), Some(dir))
            }
        };
        let log_path = db_path.join("mongod.log");

        let mut args: Vec<String> = vec![
            "--port".into(),
            port.to_string(),
            "--bind_ip".into(),
            bind_ip,
            "--dbpath".into(),
            db_path.display().to_string(),
            "--logpath".into(),
            log_path.display().to_string(),
        ];
        args.extend(options.arguments.to_args());

        let process = Process::spawn(&binary, &args, &db_path.join("mongod.out"))?;

        tracing::info!(
            target: SERVER_TRACING_EVENT_TARGET,
            binary = binary.tracing_representation(),
            serverVersion = version.to_string(),
            serverHost = host.as_str(),
            serverPort = port,
            pid = process.id(),
            args = args.join(" "),
            "Started mongod",
        );

        let mut mongod = MongodProcess {
            process,
            host,
            port,
            db_path,
            log_path,
            version,
            _temp_dir: temp_dir,
        };
        if let Err(error) = mongod
            .wait_until_ready(options.startup_timeout.unwrap_or(DEFAULT_STARTUP_TIMEOUT))
            .await
        {
            tracing::warn!(
                target: SERVER_TRACING_EVENT_TARGET,
                serverHost = mongod.host.as_str(),
                serverPort = mongod.port,
                failure = error.tracing_representation(),
                "mongod failed to start",
            );
            return Err(error);
        }
        Ok(mongod)
    }
}

/// A running embedded `mongod`. Dropping the handle kills the process.
#[derive(Debug)]
pub struct MongodProcess {
    process: Process,
    host: String,
    port: u16,
    db_path: PathBuf,
    log_path: PathBuf,
    version: Version,
    _temp_dir: Option<TempDir>,
}

impl MongodProcess {
    /// The host clients should connect to.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The port the server listens on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// A connection string for a direct connection to this server.
    pub fn connection_string(&self) -> String {
        format!("mongodb://{}/?directConnection=true", self.address())
    }

    /// The server's data directory.
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// The server's log file.
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// The operating system process id, if the process has not been reaped.
    pub fn pid(&self) -> Option<u32> {
        self.process.id()
    }

    /// The version reported by `mongod --version`.
    pub fn version(&self) -> &Version {
        &self.version
    }

    /// Kills the server and waits for it to exit.
    pub async fn stop(mut self) -> Result<()> {
        if self.process.try_wait()?.is_none() {
            self.process.kill()?;
        }
        let status = self.process.wait().await?;
        tracing::info!(
            target: SERVER_TRACING_EVENT_TARGET,
            serverHost = self.host.as_str(),
            serverPort = self.port,
            status = status.to_string(),
            "Stopped mongod",
        );
        Ok(())
    }

    async fn wait_until_ready(&mut self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = self.process.try_wait()? {
                return Err(self.startup_error(format!(
                    "mongod exited with {status} before accepting connections"
                )));
            }
            match TcpStream::connect((self.host.as_str(), self.port)).await {
                Ok(_) => {
                    tracing::debug!(
                        target: SERVER_TRACING_EVENT_TARGET,
                        serverHost = self.host.as_str(),
                        serverPort = self.port,
                        "mongod is accepting connections",
                    );
                    return Ok(());
                }
                Err(e) if Instant::now() >= deadline => {
                    return Err(self.startup_error(format!(
                        "mongod did not accept connections on {} within {:?}: {}",
                        self.address(),
                        timeout,
                        e
                    )));
                }
                Err(_) => tokio::time::sleep(POLL_INTERVAL).await,
            }
        }
    }

    fn startup_error(&self, message: String) -> Error {
        let tail = [self.log_path.as_path(), self.process.output_path()]
            .into_iter()
            .find_map(|path| log_tail(path, LOG_TAIL_LINES))
            .unwrap_or_else(|| "<no output>".to_string());
        ErrorKind::ServerStartup {
            message: format!("{message}\n{tail}"),
        }
        .into()
    }
}

fn free_port(host: &str) -> Result<u16> {
    let listener = std::net::TcpListener::bind((host, 0))?;
    Ok(listener.local_addr()?.port())
}

fn log_tail(path: &Path, lines: usize) -> Option<String> {
    let contents = std::fs::read_to_string(path).ok()?;
    if contents.trim().is_empty() {
        return None;
    }
    let all: Vec<&str> = contents.lines().collect();
    Some(all[all.len().saturating_sub(lines)..].join("\n"))
}
