//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

mod cli;

pub use cli::{CliArgs, Command, GatewayArgs, ServeArgs, ServeOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "visitor";
const DEFAULT_HOST: &str = "127.0.0.1";
/// Port the render gateway listens on when nothing else is configured.
pub const DEFAULT_GATEWAY_PORT: u16 = 2137;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 10;
const DEFAULT_SSR_URL: &str = "http://127.0.0.1:2137";
const DEFAULT_SSR_BUNDLE: &str = "bootstrap/ssr/ssr.mjs";
const DEFAULT_ENVIRONMENT: &str = "production";
const PRODUCTION_ENVIRONMENT: &str = "production";
const DEFAULT_MANIFEST_PATH: &str = "public/build/manifest.json";
const DEFAULT_ROOT_ID: &str = "app";
const DEFAULT_LANG: &str = "en";
const DEFAULT_DISK_CACHE_DIR: &str = "storage/visitor";

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub ssr: SsrSettings,
    pub app: AppSettings,
    pub cache: CacheSettings,
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

/// Server-side rendering switch and render gateway location.
#[derive(Debug, Clone)]
pub struct SsrSettings {
    pub enabled: bool,
    pub url: Url,
    pub bundle: PathBuf,
    pub request_timeout: Option<Duration>,
}

/// Settings describing the host application.
#[derive(Debug, Clone)]
pub struct AppSettings {
    pub environment: String,
    pub manifest: PathBuf,
    pub root_id: String,
    pub lang: String,
    pub entry_scripts: Vec<String>,
}

impl AppSettings {
    pub fn is_production(&self) -> bool {
        self.environment == PRODUCTION_ENVIRONMENT
    }
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub data: CacheNamespaceSettings,
    pub rendered: CacheNamespaceSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheDriver {
    Memory,
    Disk,
}

#[derive(Debug, Clone)]
pub struct CacheNamespaceSettings {
    pub driver: CacheDriver,
    /// Maximum in-memory entries; `None` keeps every entry.
    pub capacity: Option<usize>,
    pub directory: PathBuf,
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

    builder = builder.add_source(Environment::with_prefix("VISITOR").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Stop(args)) | Some(Command::Health(args)) => {
            raw.apply_gateway_override(args)
        }
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
    ssr: RawSsrSettings,
    app: RawAppSettings,
    cache: RawCacheSettings,
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
    }

    fn apply_gateway_override(&mut self, overrides: &GatewayArgs) {
        if let Some(url) = overrides.ssr_url.as_ref() {
            self.ssr.url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            ssr,
            app,
            cache,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            ssr: build_ssr_settings(ssr)?,
            app: build_app_settings(app)?,
            cache: build_cache_settings(cache)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = server.port.unwrap_or(DEFAULT_GATEWAY_PORT);
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

fn build_ssr_settings(ssr: RawSsrSettings) -> Result<SsrSettings, LoadError> {
    let raw_url = ssr.url.unwrap_or_else(|| DEFAULT_SSR_URL.to_string());
    let url = Url::parse(raw_url.trim())
        .map_err(|err| LoadError::invalid("ssr.url", format!("invalid url `{raw_url}`: {err}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(LoadError::invalid(
            "ssr.url",
            format!("unsupported scheme `{}`", url.scheme()),
        ));
    }

    let bundle = ssr
        .bundle
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SSR_BUNDLE));
    if bundle.as_os_str().is_empty() {
        return Err(LoadError::invalid("ssr.bundle", "path must not be empty"));
    }

    let request_timeout = match ssr.request_timeout_seconds {
        Some(0) => {
            return Err(LoadError::invalid(
                "ssr.request_timeout_seconds",
                "must be greater than zero",
            ));
        }
        Some(seconds) => Some(Duration::from_secs(seconds)),
        None => None,
    };

    Ok(SsrSettings {
        enabled: ssr.enabled.unwrap_or(false),
        url,
        bundle,
        request_timeout,
    })
}

fn build_app_settings(app: RawAppSettings) -> Result<AppSettings, LoadError> {
    let environment = non_empty(app.environment).unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string());
    let root_id = non_empty(app.root_id).unwrap_or_else(|| DEFAULT_ROOT_ID.to_string());
    if root_id.chars().any(char::is_whitespace) {
        return Err(LoadError::invalid(
            "app.root_id",
            "element id must not contain whitespace",
        ));
    }

    Ok(AppSettings {
        environment,
        manifest: app
            .manifest
            .unwrap_or_else(|| PathBuf::from(DEFAULT_MANIFEST_PATH)),
        root_id,
        lang: non_empty(app.lang).unwrap_or_else(|| DEFAULT_LANG.to_string()),
        entry_scripts: app.entry_scripts.unwrap_or_default(),
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    Ok(CacheSettings {
        data: build_namespace_settings(cache.data, "cache.data.driver", "data")?,
        rendered: build_namespace_settings(cache.rendered, "cache.rendered.driver", "rendered")?,
    })
}

fn build_namespace_settings(
    raw: RawCacheNamespaceSettings,
    driver_key: &'static str,
    default_subdir: &str,
) -> Result<CacheNamespaceSettings, LoadError> {
    let driver = match non_empty(raw.driver).as_deref() {
        None | Some("memory") => CacheDriver::Memory,
        Some("disk") => CacheDriver::Disk,
        Some(other) => {
            return Err(LoadError::invalid(
                driver_key,
                format!("unknown driver `{other}` (expected `memory` or `disk`)"),
            ));
        }
    };

    let capacity = raw.capacity.filter(|value| *value > 0);
    let directory = raw
        .directory
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DISK_CACHE_DIR).join(default_subdir));

    Ok(CacheNamespaceSettings {
        driver,
        capacity,
        directory,
    })
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
struct RawSsrSettings {
    enabled: Option<bool>,
    url: Option<String>,
    bundle: Option<PathBuf>,
    request_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawAppSettings {
    environment: Option<String>,
    manifest: Option<PathBuf>,
    root_id: Option<String>,
    lang: Option<String>,
    entry_scripts: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    data: RawCacheNamespaceSettings,
    rendered: RawCacheNamespaceSettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheNamespaceSettings {
    driver: Option<String>,
    capacity: Option<usize>,
    directory: Option<PathBuf>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}
