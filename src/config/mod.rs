//! Configuration management.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Hard ceiling on the per-request row limit; callers asking for more are
/// clamped, never rejected.
pub const MAX_LIMIT: u64 = 2000;

/// Main configuration for the query engine and server.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory containing one `SQLite` file per logical database.
    pub data_dir: PathBuf,
    /// Address the HTTP server binds to.
    pub listen: String,
    /// Idle lifespan after which a cached connection is closed.
    pub connection_lifespan: Duration,
    /// Interval between idle-connection sweeps.
    pub sweep_interval: Duration,
    /// Time-to-live for result-cache entries.
    pub cache_ttl: Duration,
    /// Maximum number of result-cache entries before LRU eviction.
    pub cache_max_entries: usize,
    /// Prepared-statement cache capacity per connection.
    pub statement_cache_capacity: usize,
    /// Deadline applied to each HTTP request.
    pub request_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            listen: "127.0.0.1:8080".to_string(),
            connection_lifespan: Duration::from_secs(30 * 60),
            sweep_interval: Duration::from_secs(60),
            cache_ttl: Duration::from_secs(5 * 60),
            cache_max_entries: 256,
            statement_cache_capacity: 64,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    /// Data directory.
    pub data_dir: Option<String>,
    /// Listen address.
    pub listen: Option<String>,
    /// Connection idle lifespan, in seconds.
    pub connection_lifespan_secs: Option<u64>,
    /// Sweep interval, in seconds.
    pub sweep_interval_secs: Option<u64>,
    /// Cache section.
    pub cache: Option<ConfigFileCache>,
}

/// Cache section in the config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileCache {
    /// Result-cache TTL, in seconds.
    pub ttl_secs: Option<u64>,
    /// Maximum result-cache entries.
    pub max_entries: Option<usize>,
    /// Prepared-statement cache capacity.
    pub statement_capacity: Option<usize>,
}

impl EngineConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &std::path::Path) -> crate::Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| crate::Error::Internal {
            operation: "read_config_file".to_string(),
            cause: e.to_string(),
        })?;

        let file: ConfigFile = toml::from_str(&contents).map_err(|e| crate::Error::Internal {
            operation: "parse_config_file".to_string(),
            cause: e.to_string(),
        })?;

        Ok(Self::from_config_file(file))
    }

    /// Loads configuration from the default location.
    ///
    /// Checks the platform config dir (`~/.config/tabserve/config.toml` on
    /// Linux) and falls back to defaults when no file is found. Environment
    /// variables are applied on top in either case.
    #[must_use]
    pub fn load_default() -> Self {
        let from_file = directories::BaseDirs::new()
            .map(|dirs| dirs.config_dir().join("tabserve").join("config.toml"))
            .filter(|p| p.exists())
            .and_then(|p| Self::load_from_file(&p).ok());

        from_file.unwrap_or_default().with_env_overrides()
    }

    /// Converts a `ConfigFile` to `EngineConfig`.
    fn from_config_file(file: ConfigFile) -> Self {
        let mut config = Self::default();

        if let Some(data_dir) = file.data_dir {
            config.data_dir = PathBuf::from(data_dir);
        }
        if let Some(listen) = file.listen {
            config.listen = listen;
        }
        if let Some(secs) = file.connection_lifespan_secs {
            config.connection_lifespan = Duration::from_secs(secs);
        }
        if let Some(secs) = file.sweep_interval_secs {
            config.sweep_interval = Duration::from_secs(secs);
        }
        if let Some(cache) = file.cache {
            if let Some(secs) = cache.ttl_secs {
                config.cache_ttl = Duration::from_secs(secs);
            }
            if let Some(max) = cache.max_entries {
                config.cache_max_entries = max;
            }
            if let Some(cap) = cache.statement_capacity {
                config.statement_cache_capacity = cap;
            }
        }

        config
    }

    /// Applies `TABSERVE_*` environment variable overrides.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(dir) = std::env::var("TABSERVE_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Ok(listen) = std::env::var("TABSERVE_LISTEN") {
            self.listen = listen;
        }
        if let Some(secs) = env_u64("TABSERVE_CACHE_TTL_SECS") {
            self.cache_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("TABSERVE_CONNECTION_LIFESPAN_SECS") {
            self.connection_lifespan = Duration::from_secs(secs);
        }
        self
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.connection_lifespan, Duration::from_secs(1800));
        assert_eq!(config.cache_ttl, Duration::from_secs(300));
        assert_eq!(config.cache_max_entries, 256);
    }

    #[test]
    fn test_from_toml() {
        let file: ConfigFile = toml::from_str(
            r#"
            data_dir = "/srv/tables"
            listen = "0.0.0.0:9000"
            connection_lifespan_secs = 600

            [cache]
            ttl_secs = 60
            max_entries = 16
            "#,
        )
        .unwrap();
        let config = EngineConfig::from_config_file(file);
        assert_eq!(config.data_dir, PathBuf::from("/srv/tables"));
        assert_eq!(config.listen, "0.0.0.0:9000");
        assert_eq!(config.connection_lifespan, Duration::from_secs(600));
        assert_eq!(config.cache_ttl, Duration::from_secs(60));
        assert_eq!(config.cache_max_entries, 16);
        // Unset keys keep their defaults.
        assert_eq!(config.statement_cache_capacity, 64);
    }
}
