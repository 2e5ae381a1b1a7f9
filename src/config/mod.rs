//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    net::SocketAddr,
    num::NonZeroU32,
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

#[cfg(test)]
mod tests;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "voltgate";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_STORE_HOST: &str = "127.0.0.1";
const DEFAULT_STORE_PORT: u16 = 6379;
const DEFAULT_STORE_DB: u8 = 0;
const DEFAULT_STORE_NAMESPACE: &str = "voltgate";
const DEFAULT_CACHE_MEMORY_LIMIT: u32 = 1000;
const DEFAULT_CACHE_TTL_SECS: u64 = 300;
const DEFAULT_REVALIDATION_QUEUE_DEPTH: u32 = 64;
const DEFAULT_BREAKER_FAILURE_THRESHOLD: u32 = 5;
const DEFAULT_BREAKER_RECOVERY_SECS: u64 = 30;
const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 100;
const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 5_000;
const DEFAULT_RETRY_BACKOFF_MULTIPLIER: f64 = 2.0;
const DEFAULT_SESSION_TTL_SECS: u64 = 86_400;
const DEFAULT_LOGIN_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_LOGIN_WINDOW_SECS: u64 = 900;
const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 60;
const DEFAULT_RATE_LIMIT_MAX_REQUESTS: u64 = 120;

/// Command-line arguments for the Voltgate binary.
#[derive(Debug, Parser)]
#[command(name = "voltgate", version, about = "Voltgate operations backend")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "VOLTGATE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the Voltgate HTTP service.
    Serve(Box<ServeArgs>),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
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

    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,

    /// Override the database pool size.
    #[arg(long = "database-max-connections", value_name = "COUNT")]
    pub database_max_connections: Option<u32>,

    /// Override the key-value store host.
    #[arg(long = "store-host", value_name = "HOST")]
    pub store_host: Option<String>,

    /// Override the key-value store port.
    #[arg(long = "store-port", value_name = "PORT")]
    pub store_port: Option<u16>,

    /// Override the key-value store password.
    #[arg(long = "store-password", value_name = "PASSWORD")]
    pub store_password: Option<String>,

    /// Override the key-value store database index.
    #[arg(long = "store-db", value_name = "INDEX")]
    pub store_db: Option<u8>,

    /// Override the memory-cache entry limit.
    #[arg(long = "cache-memory-limit", value_name = "COUNT")]
    pub cache_memory_limit: Option<u32>,

    /// Override the session TTL.
    #[arg(long = "session-ttl-seconds", value_name = "SECONDS")]
    pub session_ttl_seconds: Option<u64>,

    /// Override the rate limit window size.
    #[arg(long = "rate-limit-window-seconds", value_name = "SECONDS")]
    pub rate_limit_window_seconds: Option<u64>,

    /// Override the rate limit request ceiling.
    #[arg(long = "rate-limit-max-requests", value_name = "COUNT")]
    pub rate_limit_max_requests: Option<u64>,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub store: StoreSettings,
    pub cache: CacheSettings,
    pub breaker: BreakerSettings,
    pub retry: RetrySettings,
    pub sessions: SessionSettings,
    pub rate_limit: RateLimitSettings,
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
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub db: u8,
    /// Top-level key namespace partitioning this deployment's keys.
    pub namespace: String,
}

impl StoreSettings {
    pub fn connection_url(&self) -> String {
        match self.password.as_deref() {
            Some(password) => format!(
                "redis://:{password}@{}:{}/{}",
                self.host, self.port, self.db
            ),
            None => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub memory_limit: NonZeroU32,
    pub default_ttl: Duration,
    pub revalidation_queue_depth: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct BreakerSettings {
    pub failure_threshold: NonZeroU32,
    pub recovery_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct RetrySettings {
    pub max_attempts: NonZeroU32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub ttl: Duration,
    pub login_max_attempts: NonZeroU32,
    pub login_window: Duration,
}

#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    pub window: Duration,
    pub max_requests: NonZeroU32,
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

/// Parse CLI arguments and load settings in one step.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let cli = CliArgs::parse();
    let settings = load(&cli)?;
    Ok((cli, settings))
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("VOLTGATE").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    store: RawStoreSettings,
    cache: RawCacheSettings,
    breaker: RawBreakerSettings,
    retry: RawRetrySettings,
    sessions: RawSessionSettings,
    rate_limit: RawRateLimitSettings,
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
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStoreSettings {
    host: Option<String>,
    port: Option<u16>,
    password: Option<String>,
    db: Option<u8>,
    namespace: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    memory_limit: Option<u32>,
    default_ttl_seconds: Option<u64>,
    revalidation_queue_depth: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawBreakerSettings {
    failure_threshold: Option<u32>,
    recovery_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRetrySettings {
    max_attempts: Option<u32>,
    base_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
    backoff_multiplier: Option<f64>,
    jitter: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSessionSettings {
    ttl_seconds: Option<u64>,
    login_max_attempts: Option<u32>,
    login_window_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRateLimitSettings {
    window_seconds: Option<u64>,
    max_requests: Option<u64>,
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
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(max) = overrides.database_max_connections {
            self.database.max_connections = Some(max);
        }
        if let Some(host) = overrides.store_host.as_ref() {
            self.store.host = Some(host.clone());
        }
        if let Some(port) = overrides.store_port {
            self.store.port = Some(port);
        }
        if let Some(password) = overrides.store_password.as_ref() {
            self.store.password = Some(password.clone());
        }
        if let Some(db) = overrides.store_db {
            self.store.db = Some(db);
        }
        if let Some(limit) = overrides.cache_memory_limit {
            self.cache.memory_limit = Some(limit);
        }
        if let Some(ttl) = overrides.session_ttl_seconds {
            self.sessions.ttl_seconds = Some(ttl);
        }
        if let Some(window) = overrides.rate_limit_window_seconds {
            self.rate_limit.window_seconds = Some(window);
        }
        if let Some(max) = overrides.rate_limit_max_requests {
            self.rate_limit.max_requests = Some(max);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            database,
            store,
            cache,
            breaker,
            retry,
            sessions,
            rate_limit,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            store: build_store_settings(store),
            cache: build_cache_settings(cache)?,
            breaker: build_breaker_settings(breaker)?,
            retry: build_retry_settings(retry)?,
            sessions: build_session_settings(sessions)?,
            rate_limit: build_rate_limit_settings(rate_limit)?,
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

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level.as_deref() {
        None => LevelFilter::INFO,
        Some(raw) => LevelFilter::from_str(raw).map_err(|_| {
            LoadError::invalid(
                "logging.level",
                format!("`{raw}` is not one of trace|debug|info|warn|error"),
            )
        })?,
    };
    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };
    Ok(LoggingSettings { level, format })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let max_connections = non_zero_u32(
        "database.max_connections",
        database.max_connections.unwrap_or(DEFAULT_DB_MAX_CONNECTIONS),
    )?;
    Ok(DatabaseSettings {
        url: database.url,
        max_connections,
    })
}

fn build_store_settings(store: RawStoreSettings) -> StoreSettings {
    StoreSettings {
        host: store.host.unwrap_or_else(|| DEFAULT_STORE_HOST.to_string()),
        port: store.port.unwrap_or(DEFAULT_STORE_PORT),
        password: store.password,
        db: store.db.unwrap_or(DEFAULT_STORE_DB),
        namespace: store
            .namespace
            .unwrap_or_else(|| DEFAULT_STORE_NAMESPACE.to_string()),
    }
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let memory_limit = non_zero_u32(
        "cache.memory_limit",
        cache.memory_limit.unwrap_or(DEFAULT_CACHE_MEMORY_LIMIT),
    )?;
    let ttl_secs = cache.default_ttl_seconds.unwrap_or(DEFAULT_CACHE_TTL_SECS);
    if ttl_secs == 0 {
        return Err(LoadError::invalid(
            "cache.default_ttl_seconds",
            "TTL must be greater than zero",
        ));
    }
    let revalidation_queue_depth = non_zero_u32(
        "cache.revalidation_queue_depth",
        cache
            .revalidation_queue_depth
            .unwrap_or(DEFAULT_REVALIDATION_QUEUE_DEPTH),
    )?;
    Ok(CacheSettings {
        memory_limit,
        default_ttl: Duration::from_secs(ttl_secs),
        revalidation_queue_depth,
    })
}

fn build_breaker_settings(breaker: RawBreakerSettings) -> Result<BreakerSettings, LoadError> {
    let failure_threshold = non_zero_u32(
        "breaker.failure_threshold",
        breaker
            .failure_threshold
            .unwrap_or(DEFAULT_BREAKER_FAILURE_THRESHOLD),
    )?;
    let recovery_secs = breaker
        .recovery_timeout_seconds
        .unwrap_or(DEFAULT_BREAKER_RECOVERY_SECS);
    if recovery_secs == 0 {
        return Err(LoadError::invalid(
            "breaker.recovery_timeout_seconds",
            "recovery timeout must be greater than zero",
        ));
    }
    Ok(BreakerSettings {
        failure_threshold,
        recovery_timeout: Duration::from_secs(recovery_secs),
    })
}

fn build_retry_settings(retry: RawRetrySettings) -> Result<RetrySettings, LoadError> {
    let max_attempts = non_zero_u32(
        "retry.max_attempts",
        retry.max_attempts.unwrap_or(DEFAULT_RETRY_MAX_ATTEMPTS),
    )?;
    let base_delay = Duration::from_millis(
        retry.base_delay_ms.unwrap_or(DEFAULT_RETRY_BASE_DELAY_MS),
    );
    let max_delay =
        Duration::from_millis(retry.max_delay_ms.unwrap_or(DEFAULT_RETRY_MAX_DELAY_MS));
    if max_delay < base_delay {
        return Err(LoadError::invalid(
            "retry.max_delay_ms",
            "maximum delay must not be below the base delay",
        ));
    }
    let backoff_multiplier = retry
        .backoff_multiplier
        .unwrap_or(DEFAULT_RETRY_BACKOFF_MULTIPLIER);
    if backoff_multiplier < 1.0 {
        return Err(LoadError::invalid(
            "retry.backoff_multiplier",
            "multiplier must be at least 1.0",
        ));
    }
    Ok(RetrySettings {
        max_attempts,
        base_delay,
        max_delay,
        backoff_multiplier,
        jitter: retry.jitter.unwrap_or(true),
    })
}

fn build_session_settings(sessions: RawSessionSettings) -> Result<SessionSettings, LoadError> {
    let ttl_secs = sessions.ttl_seconds.unwrap_or(DEFAULT_SESSION_TTL_SECS);
    if ttl_secs == 0 {
        return Err(LoadError::invalid(
            "sessions.ttl_seconds",
            "session TTL must be greater than zero",
        ));
    }
    let login_max_attempts = non_zero_u32(
        "sessions.login_max_attempts",
        sessions
            .login_max_attempts
            .unwrap_or(DEFAULT_LOGIN_MAX_ATTEMPTS),
    )?;
    let window_secs = sessions
        .login_window_seconds
        .unwrap_or(DEFAULT_LOGIN_WINDOW_SECS);
    if window_secs == 0 {
        return Err(LoadError::invalid(
            "sessions.login_window_seconds",
            "lockout window must be greater than zero",
        ));
    }
    Ok(SessionSettings {
        ttl: Duration::from_secs(ttl_secs),
        login_max_attempts,
        login_window: Duration::from_secs(window_secs),
    })
}

fn build_rate_limit_settings(
    rate_limit: RawRateLimitSettings,
) -> Result<RateLimitSettings, LoadError> {
    let window_secs = rate_limit
        .window_seconds
        .unwrap_or(DEFAULT_RATE_LIMIT_WINDOW_SECS);
    if window_secs == 0 {
        return Err(LoadError::invalid(
            "rate_limit.window_seconds",
            "window must be greater than zero",
        ));
    }
    let max_requests = rate_limit
        .max_requests
        .unwrap_or(DEFAULT_RATE_LIMIT_MAX_REQUESTS);
    let max_requests = u32::try_from(max_requests)
        .ok()
        .and_then(NonZeroU32::new)
        .ok_or_else(|| {
            LoadError::invalid(
                "rate_limit.max_requests",
                "ceiling must be between 1 and 4294967295",
            )
        })?;
    Ok(RateLimitSettings {
        window: Duration::from_secs(window_secs),
        max_requests,
    })
}

fn non_zero_u32(key: &'static str, value: u32) -> Result<NonZeroU32, LoadError> {
    NonZeroU32::new(value)
        .ok_or_else(|| LoadError::invalid(key, "value must be greater than zero"))
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    format!("{host}:{port}")
        .parse()
        .map_err(|err| format!("`{host}:{port}` is not a valid socket address: {err}"))
}
