//! Configuration loading
//!
//! Bootstrap configuration comes from a single TOML file. Resolution order for
//! the file itself:
//! 1. Command-line argument (highest priority)
//! 2. `RAF_CONFIG` environment variable
//! 3. `~/.config/raf-gateway/config.toml`, then `/etc/raf-gateway/config.toml`
//! 4. Built-in defaults (a missing file is not fatal)
//!
//! Every key inside the file is optional; missing keys take the defaults below.

use crate::{Error, Result};
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "RAF_CONFIG";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub routine: RoutineConfig,
    pub cache: CacheConfig,
    pub staging: StagingConfig,
    pub logging: LoggingConfig,
}

/// HTTP listener settings
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Largest accepted request body in bytes
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

/// Staging database connection settings
///
/// Host, database name, credentials, port and encoding are all carried in
/// the URL.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

/// External scoring routine settings
#[derive(Debug, Clone, Deserialize)]
pub struct RoutineConfig {
    /// SQL run against the staged tables; `?1` is bound to the payment year
    #[serde(default)]
    pub statement: String,

    /// Upper bound on one invocation; 0 disables the limit
    #[serde(default = "default_routine_timeout_secs")]
    pub timeout_secs: u64,
}

/// What to drop from the cache after a failed computation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InvalidationPolicy {
    /// Discard every memoized entry
    #[default]
    ClearAll,
    /// Discard only the failing request's entry
    KeyOnly,
}

/// Memoization cache settings
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,

    /// Entry lifetime; 0 disables expiry
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,

    #[serde(default)]
    pub invalidation: InvalidationPolicy,
}

/// Batch staging settings
#[derive(Debug, Clone, Deserialize)]
pub struct StagingConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_max_body_bytes() -> usize {
    64 * 1024 * 1024
}

fn default_database_url() -> String {
    "sqlite://raf_staging.db?mode=rwc".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_routine_timeout_secs() -> u64 {
    30
}

fn default_cache_capacity() -> usize {
    128
}

fn default_cache_ttl_secs() -> u64 {
    3600
}

fn default_batch_size() -> usize {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl Default for RoutineConfig {
    fn default() -> Self {
        Self {
            statement: String::new(),
            timeout_secs: default_routine_timeout_secs(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
            ttl_secs: default_cache_ttl_secs(),
            invalidation: InvalidationPolicy::default(),
        }
    }
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl ServerConfig {
    /// Listen address from `bind` (an IPv4 or IPv6 literal) and `port`
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self.bind.trim().parse().map_err(|_| {
            Error::Config(format!("server.bind is not an IP address: {}", self.bind))
        })?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

impl DatabaseConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl RoutineConfig {
    pub fn timeout(&self) -> Option<Duration> {
        crate::time::secs_to_duration(self.timeout_secs)
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Option<Duration> {
        crate::time::secs_to_duration(self.ttl_secs)
    }
}

impl TomlConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))
    }

    /// Load configuration from an explicit file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Cannot read config file {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Resolve and load configuration, falling back to defaults when no file exists.
    ///
    /// An explicitly named file (CLI or env) must exist and parse; a missing
    /// platform default file only produces a warning.
    pub fn load(cli_arg: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit_config_path(cli_arg) {
            info!("Loading configuration from {}", path.display());
            return Self::from_file(&path);
        }

        match platform_config_path() {
            Some(path) => {
                info!("Loading configuration from {}", path.display());
                Self::from_file(&path)
            }
            None => {
                warn!("No configuration file found, using built-in defaults");
                Ok(Self::default())
            }
        }
    }

    /// Reject settings the gateway cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.cache.capacity == 0 {
            return Err(Error::Config("cache.capacity must be at least 1".to_string()));
        }
        if self.staging.batch_size == 0 {
            return Err(Error::Config(
                "staging.batch_size must be at least 1".to_string(),
            ));
        }
        if self.routine.statement.trim().is_empty() {
            return Err(Error::Config(
                "routine.statement must be set to the scoring routine call".to_string(),
            ));
        }
        self.server.socket_addr()?;
        if self.server.max_body_bytes == 0 {
            return Err(Error::Config(
                "server.max_body_bytes must be at least 1".to_string(),
            ));
        }
        if self.database.max_connections == 0 {
            return Err(Error::Config(
                "database.max_connections must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Config file named on the command line or in `RAF_CONFIG`
pub fn explicit_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    std::env::var(CONFIG_ENV_VAR)
        .ok()
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

/// First existing platform config file, user before system
fn platform_config_path() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("raf-gateway").join("config.toml"));
    let system_config = PathBuf::from("/etc/raf-gateway/config.toml");

    user_config
        .into_iter()
        .chain(std::iter::once(system_config))
        .find(|p| p.exists())
}
