//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use argon2::password_hash::PasswordHash;
use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "evex";
const ENV_PREFIX: &str = "EVEX";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3003;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 10;
const DEFAULT_CLIENT_DIR: &str = "client";
const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_USERS_DIR: &str = ".";
const DEFAULT_SAVE_DELAY_MS: u64 = 500;
const MIN_SAVE_DELAY_MS: u64 = 30;
const DEFAULT_FAST_WINDOW_MS: u64 = 120;
const DEFAULT_ACCESS_LOG_MIN_STATUS: u16 = 400;

/// Command-line arguments for the evex binary.
#[derive(Debug, Parser)]
#[command(name = "evex", version, about = "Evex content server")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "EVEX_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP server.
    Serve(Box<ServeArgs>),
    /// Print an argon2id PHC hash for use as `auth.red33m_password_hash`.
    #[command(name = "hash-password")]
    HashPassword(HashPasswordArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Clone)]
pub struct HashPasswordArgs {
    /// Password to hash. Read from standard input when omitted.
    #[arg(value_name = "PASSWORD")]
    pub password: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the directory holding the built client (`index.html`, `assets/`).
    #[arg(long = "client-dir", value_name = "PATH")]
    pub client_dir: Option<PathBuf>,

    /// Override the directory holding site data (`versions.json`, content folders).
    #[arg(long = "data-dir", value_name = "PATH")]
    pub data_dir: Option<PathBuf>,

    /// Override the directory holding `users.txt`.
    #[arg(long = "users-directory", value_name = "PATH")]
    pub users_directory: Option<PathBuf>,

    /// Override the users snapshot delay in milliseconds.
    #[arg(long = "users-save-delay-ms", value_name = "MILLIS")]
    pub users_save_delay_ms: Option<u64>,

    /// Override the file cache fast window in milliseconds.
    #[arg(long = "cache-fast-window-ms", value_name = "MILLIS")]
    pub cache_fast_window_ms: Option<u64>,

    /// Override the access log file path.
    #[arg(long = "access-log-path", value_name = "PATH")]
    pub access_log_path: Option<PathBuf>,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub content: ContentSettings,
    pub users: UsersSettings,
    pub cache: CacheSettings,
    pub auth: AuthSettings,
    pub access_log: AccessLogSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct ContentSettings {
    pub client_dir: PathBuf,
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct UsersSettings {
    pub directory: PathBuf,
    pub save_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub fast_window: Duration,
}

#[derive(Debug, Clone)]
pub struct AuthSettings {
    /// argon2 PHC string; redeeming is disabled when absent.
    pub red33m_password_hash: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AccessLogSettings {
    pub path: Option<PathBuf>,
    pub min_status: u16,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::HashPassword(_)) => {}
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    content: RawContentSettings,
    users: RawUsersSettings,
    cache: RawCacheSettings,
    auth: RawAuthSettings,
    access_log: RawAccessLogSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(dir) = overrides.client_dir.as_ref() {
            self.content.client_dir = Some(dir.clone());
        }
        if let Some(dir) = overrides.data_dir.as_ref() {
            self.content.data_dir = Some(dir.clone());
        }
        if let Some(dir) = overrides.users_directory.as_ref() {
            self.users.directory = Some(dir.clone());
        }
        if let Some(delay) = overrides.users_save_delay_ms {
            self.users.save_delay_ms = Some(delay);
        }
        if let Some(window) = overrides.cache_fast_window_ms {
            self.cache.fast_window_ms = Some(window);
        }
        if let Some(path) = overrides.access_log_path.as_ref() {
            self.access_log.path = Some(path.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            content,
            users,
            cache,
            auth,
            access_log,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            content: build_content_settings(content)?,
            users: build_users_settings(users)?,
            cache: build_cache_settings(cache)?,
            auth: build_auth_settings(auth)?,
            access_log: build_access_log_settings(access_log)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr =
        parse_socket_addr(&host, port).map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_content_settings(content: RawContentSettings) -> Result<ContentSettings, LoadError> {
    let client_dir = non_empty_path(
        content.client_dir,
        DEFAULT_CLIENT_DIR,
        "content.client_dir",
    )?;
    let data_dir = non_empty_path(content.data_dir, DEFAULT_DATA_DIR, "content.data_dir")?;

    Ok(ContentSettings {
        client_dir,
        data_dir,
    })
}

fn build_users_settings(users: RawUsersSettings) -> Result<UsersSettings, LoadError> {
    let directory = non_empty_path(users.directory, DEFAULT_USERS_DIR, "users.directory")?;

    let delay_ms = users.save_delay_ms.unwrap_or(DEFAULT_SAVE_DELAY_MS);
    if delay_ms < MIN_SAVE_DELAY_MS {
        return Err(LoadError::invalid(
            "users.save_delay_ms",
            format!("must be at least {MIN_SAVE_DELAY_MS}"),
        ));
    }

    Ok(UsersSettings {
        directory,
        save_delay: Duration::from_millis(delay_ms),
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let window_ms = cache.fast_window_ms.unwrap_or(DEFAULT_FAST_WINDOW_MS);
    if window_ms == 0 {
        return Err(LoadError::invalid(
            "cache.fast_window_ms",
            "must be greater than zero",
        ));
    }

    Ok(CacheSettings {
        fast_window: Duration::from_millis(window_ms),
    })
}

fn build_auth_settings(auth: RawAuthSettings) -> Result<AuthSettings, LoadError> {
    let hash = auth.red33m_password_hash.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    if let Some(hash) = hash.as_deref() {
        PasswordHash::new(hash).map_err(|err| {
            LoadError::invalid(
                "auth.red33m_password_hash",
                format!("not a valid PHC string: {err}"),
            )
        })?;
    }

    Ok(AuthSettings {
        red33m_password_hash: hash,
    })
}

fn build_access_log_settings(
    access_log: RawAccessLogSettings,
) -> Result<AccessLogSettings, LoadError> {
    let path = access_log
        .path
        .filter(|path| !path.as_os_str().is_empty());

    let min_status = access_log
        .min_status
        .unwrap_or(DEFAULT_ACCESS_LOG_MIN_STATUS);
    if min_status > 599 {
        return Err(LoadError::invalid(
            "access_log.min_status",
            "must be a status code between 0 and 599",
        ));
    }

    Ok(AccessLogSettings { path, min_status })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawContentSettings {
    client_dir: Option<PathBuf>,
    data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawUsersSettings {
    directory: Option<PathBuf>,
    save_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    fast_window_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawAuthSettings {
    red33m_password_hash: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawAccessLogSettings {
    path: Option<PathBuf>,
    min_status: Option<u16>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_empty_path(
    value: Option<PathBuf>,
    default: &str,
    key: &'static str,
) -> Result<PathBuf, LoadError> {
    let path = value.unwrap_or_else(|| PathBuf::from(default));
    if path.as_os_str().is_empty() {
        return Err(LoadError::invalid(key, "path must not be empty"));
    }
    Ok(path)
}
