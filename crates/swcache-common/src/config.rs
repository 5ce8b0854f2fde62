//! Worker configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable naming a JSON config file.
pub const CONFIG_ENV_VAR: &str = "SWCACHE_CONFIG";

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Precache worker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Prefix of the cache name; the registration scope is appended
    pub cache_name_prefix: String,

    /// Query parameter carrying the content hash in cache keys
    pub hash_param_name: String,

    /// Query parameter names matching any of these patterns are stripped
    /// before routing
    pub ignore_url_parameters_matching: Vec<String>,

    /// Index file tried for URLs ending in `/`
    pub directory_index: Option<String>,

    /// URL (relative to the worker location) served for unmatched navigations
    pub navigate_fallback: Option<String>,

    /// Navigations whose path matches this pattern never use the fallback
    pub navigate_fallback_denylist: Option<String>,

    /// URLs matching this pattern are already versioned and keep their URL
    /// as cache key
    pub dont_cache_bust_urls_matching: Option<String>,

    /// Channel segment of the notification callback path
    pub notify_channel: String,

    /// HTTP client settings
    pub http: HttpConfig,
}

/// HTTP client settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// User agent string
    pub user_agent: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Maximum redirects followed
    pub max_redirects: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            cache_name_prefix: "sw-precache-v2".to_string(),
            hash_param_name: "_sw-precache".to_string(),
            ignore_url_parameters_matching: vec!["^utm_".to_string()],
            directory_index: Some("index.html".to_string()),
            navigate_fallback: Some("/".to_string()),
            navigate_fallback_denylist: Some(
                r"static|api|local|service_worker\.js|manifest\.json".to_string(),
            ),
            dont_cache_bust_urls_matching: None,
            notify_channel: "html5".to_string(),
            http: HttpConfig::default(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("swcache/{}", env!("CARGO_PKG_VERSION")),
            timeout_secs: 30,
            max_redirects: 20,
        }
    }
}

impl WorkerConfig {
    /// Parse a config from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Load the file named by `SWCACHE_CONFIG`, or the defaults when unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) => Self::from_file(PathBuf::from(path)),
            None => Ok(Self::default()),
        }
    }

    /// Check values that would otherwise produce malformed cache keys or
    /// callback URLs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hash_param_name.is_empty() {
            return Err(ConfigError::Invalid {
                field: "hash_param_name",
                reason: "must not be empty".to_string(),
            });
        }
        if self.notify_channel.is_empty() || self.notify_channel.contains('/') {
            return Err(ConfigError::Invalid {
                field: "notify_channel",
                reason: format!("`{}` is not a path segment", self.notify_channel),
            });
        }
        if matches!(self.directory_index.as_deref(), Some(index) if index.contains('/')) {
            return Err(ConfigError::Invalid {
                field: "directory_index",
                reason: "must be a file name".to_string(),
            });
        }
        Ok(())
    }

    /// Name of the cache for a registration scope.
    pub fn cache_name(&self, scope: Option<&str>) -> String {
        format!("{}--{}", self.cache_name_prefix, scope.unwrap_or(""))
    }
}
