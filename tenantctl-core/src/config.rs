use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::ConfigError;
use crate::model::DataModel;

/// Environment variable names recognised by [`ManagerConfig::with_env_overrides`].
pub const ENV_MAX_CACHED_CONNECTIONS: &str = "MAX_CACHED_CONNECTIONS";
pub const ENV_CONNECTION_IDLE_TIMEOUT: &str = "CONNECTION_IDLE_TIMEOUT";
pub const ENV_CLEANUP_INTERVAL: &str = "CLEANUP_INTERVAL";

const DEFAULT_MAX_CACHED_CONNECTIONS: usize = 100;
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 30 * 60;
const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 5 * 60;

/// Load environment variables from .env files in multiple locations
///
/// Priority order (highest to lowest):
/// 1. Environment variables already set
/// 2. Current directory .env
/// 3. ~/.tenantctl/.env
pub fn load_dotenv() -> Result<()> {
    let mut loaded_from = Vec::new();

    if let Ok(path) = dotenvy::dotenv() {
        loaded_from.push(format!("current directory ({})", path.display()));
        debug!("Loaded .env from current directory: {}", path.display());
    }

    if let Some(env_file) = config_dir().map(|dir| dir.join(".env")) {
        if env_file.exists() {
            // dotenvy never overwrites variables that are already set
            match dotenvy::from_path(&env_file) {
                Ok(_) => {
                    loaded_from.push(format!("~/.tenantctl/.env ({})", env_file.display()));
                }
                Err(e) => {
                    debug!("Failed to load ~/.tenantctl/.env: {}", e);
                }
            }
        }
    }

    if loaded_from.is_empty() {
        debug!("No .env files found (current dir or ~/.tenantctl)");
    } else {
        info!("Loaded environment from: {}", loaded_from.join(", "));
    }

    Ok(())
}

/// Get the tenantctl config directory path (~/.tenantctl)
pub fn config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".tenantctl"))
}

/// Path of the user-level config file (~/.tenantctl/config.toml)
pub fn global_config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Path of the project-level config file (./tenantctl.toml)
pub fn local_config_path() -> PathBuf {
    PathBuf::from("tenantctl.toml")
}

// ============================================================================
// Runtime manager limits
// ============================================================================

/// Limits that govern the connection cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Upper bound on cached tenant connections; LRU entries are evicted past it.
    pub max_cached_connections: usize,
    /// Cached connections unused for longer than this are closed by the sweeper.
    pub idle_timeout: Duration,
    /// Period of the idle sweep.
    pub cleanup_interval: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_cached_connections: DEFAULT_MAX_CACHED_CONNECTIONS,
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
            cleanup_interval: Duration::from_secs(DEFAULT_CLEANUP_INTERVAL_SECS),
        }
    }
}

impl ManagerConfig {
    /// Overlay `MAX_CACHED_CONNECTIONS`, `CONNECTION_IDLE_TIMEOUT` and
    /// `CLEANUP_INTERVAL` (durations in milliseconds) from `lookup`.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> std::result::Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_MAX_CACHED_CONNECTIONS) {
            self.max_cached_connections = parse_number(ENV_MAX_CACHED_CONNECTIONS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_CONNECTION_IDLE_TIMEOUT) {
            self.idle_timeout =
                Duration::from_millis(parse_number(ENV_CONNECTION_IDLE_TIMEOUT, &raw)?);
        }
        if let Some(raw) = lookup(ENV_CLEANUP_INTERVAL) {
            self.cleanup_interval = Duration::from_millis(parse_number(ENV_CLEANUP_INTERVAL, &raw)?);
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.max_cached_connections == 0 {
            return Err(ConfigError::invalid(
                "max_cached_connections",
                "must be at least 1",
            ));
        }
        if self.idle_timeout.is_zero() {
            return Err(ConfigError::invalid("idle_timeout", "must be non-zero"));
        }
        if self.cleanup_interval.is_zero() {
            return Err(ConfigError::invalid("cleanup_interval", "must be non-zero"));
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> std::result::Result<T, ConfigError> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| ConfigError::invalid(key, format!("'{}' is not a non-negative integer", raw)))
}

// ============================================================================
// TOML Configuration
// ============================================================================

/// File-level configuration (`~/.tenantctl/config.toml`, `./tenantctl.toml`)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TenantctlConfig {
    #[serde(default)]
    pub manager: ManagerSection,

    #[serde(default)]
    pub database: DatabaseSection,

    #[serde(default)]
    pub model: ModelSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerSection {
    #[serde(default = "default_max_cached_connections")]
    pub max_cached_connections: usize,

    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

impl Default for ManagerSection {
    fn default() -> Self {
        Self {
            max_cached_connections: default_max_cached_connections(),
            idle_timeout_secs: default_idle_timeout_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSection {
    /// Administrative connection string; `DATABASE_URL` takes precedence
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Schema holding the shared `stores` registry table
    #[serde(default = "default_registry_schema")]
    pub registry_schema: String,

    /// Pool size of each tenant connection
    #[serde(default = "default_max_connections_per_tenant")]
    pub max_connections_per_tenant: u32,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            url: None,
            registry_schema: default_registry_schema(),
            max_connections_per_tenant: default_max_connections_per_tenant(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ModelSection {
    /// Tables whose indexes are managed; indexes on any other table are
    /// never dropped
    #[serde(default)]
    pub tables: Vec<String>,

    /// Index names declared by the current data model, in addition to the
    /// ones contributed by registered entities
    #[serde(default)]
    pub indexes: Vec<String>,
}

// Default value functions for serde
fn default_max_cached_connections() -> usize {
    DEFAULT_MAX_CACHED_CONNECTIONS
}

fn default_idle_timeout_secs() -> u64 {
    DEFAULT_IDLE_TIMEOUT_SECS
}

fn default_cleanup_interval_secs() -> u64 {
    DEFAULT_CLEANUP_INTERVAL_SECS
}

fn default_registry_schema() -> String {
    "public".to_string()
}

fn default_max_connections_per_tenant() -> u32 {
    5
}

/// Read one config file as a raw table, rejecting values that do not fit
/// [`TenantctlConfig`].
fn read_layer(path: &Path) -> std::result::Result<toml::Table, ConfigError> {
    let parse_error = |source: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    };

    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let table: toml::Table = toml::from_str(&contents).map_err(parse_error)?;
    toml::Value::Table(table.clone())
        .try_into::<TenantctlConfig>()
        .map_err(parse_error)?;
    Ok(table)
}

/// Deep-merge `overlay` into `base`: tables merge per key, arrays are
/// unioned, any other overlay value replaces the base value.
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        let merged = match (base.remove(&key), value) {
            (Some(toml::Value::Table(mut inner)), toml::Value::Table(over)) => {
                merge_tables(&mut inner, over);
                toml::Value::Table(inner)
            }
            (Some(toml::Value::Array(mut items)), toml::Value::Array(over)) => {
                for item in over {
                    if !items.contains(&item) {
                        items.push(item);
                    }
                }
                toml::Value::Array(items)
            }
            (_, value) => value,
        };
        base.insert(key, merged);
    }
}

impl TenantctlConfig {
    /// Load config from TOML files
    ///
    /// Priority order (highest to lowest):
    /// 1. ./tenantctl.toml (project-specific)
    /// 2. ~/.tenantctl/config.toml (user defaults)
    /// 3. Built-in defaults
    ///
    /// Files are merged key by key, so a local file only overrides the keys
    /// it sets. Unreadable or malformed files are logged and skipped.
    pub fn load() -> Self {
        Self::load_layers(global_config_path().as_deref(), &local_config_path())
    }

    /// Merge the global and local files (either may be missing) over the defaults.
    pub fn load_layers(global: Option<&Path>, local: &Path) -> Self {
        let mut merged = toml::Table::new();

        for path in global.into_iter().chain(std::iter::once(local)) {
            if !path.exists() {
                continue;
            }
            match read_layer(path) {
                Ok(layer) => {
                    debug!("Loaded config layer from {}", path.display());
                    merge_tables(&mut merged, layer);
                }
                Err(e) => warn!("{}", e),
            }
        }

        match toml::Value::Table(merged).try_into() {
            Ok(config) => config,
            Err(e) => {
                warn!("Merged config is invalid, using defaults: {}", e);
                Self::default()
            }
        }
    }

    /// Parse a single TOML file.
    pub fn from_file(path: &Path) -> std::result::Result<Self, ConfigError> {
        let layer = read_layer(path)?;
        toml::Value::Table(layer)
            .try_into()
            .map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Manager limits from the file, overlaid with the process environment.
    pub fn manager_config(&self) -> std::result::Result<ManagerConfig, ConfigError> {
        self.manager_config_with(|key| std::env::var(key).ok())
    }

    pub fn manager_config_with<F>(&self, lookup: F) -> std::result::Result<ManagerConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        ManagerConfig {
            max_cached_connections: self.manager.max_cached_connections,
            idle_timeout: Duration::from_secs(self.manager.idle_timeout_secs),
            cleanup_interval: Duration::from_secs(self.manager.cleanup_interval_secs),
        }
        .with_env_overrides(lookup)
    }

    /// Administrative database URL: explicit value, then `DATABASE_URL`, then the file.
    pub fn database_url(&self, explicit: Option<&str>) -> Result<String> {
        explicit
            .map(str::to_string)
            .or_else(|| std::env::var("DATABASE_URL").ok())
            .or_else(|| self.database.url.clone())
            .context("DATABASE_URL not set. Set via --database-url, DATABASE_URL env, or [database].url")
    }

    /// The data model described by `[model]`.
    pub fn data_model(&self) -> DataModel {
        DataModel::new()
            .with_tables(self.model.tables.iter().cloned())
            .with_indexes(self.model.indexes.iter().cloned())
    }
}
