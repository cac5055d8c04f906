//! Configuration management.
//!
//! Process settings come from a TOML file with `TAWERET_*` environment
//! overrides. Per-schedule retention policies live in the cluster and are
//! parsed by [`retention`].

mod retention;

pub use retention::{MaxAge, RetentionConfig, ensure_unique_names};

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "TAWERET_CONFIG_PATH";

/// Default evaluation interval, matching a `*/10 * * * *` schedule.
pub const DEFAULT_EVALUATION_INTERVAL_SECS: u64 = 600;

/// Default namespace searched for retention configmaps.
pub const DEFAULT_CONFIG_NAMESPACE: &str = "kanister";

/// Default configmap key holding a retention document.
pub const DEFAULT_CONFIG_KEY: &str = "backup-config.yaml";

/// Main configuration for taweret.
#[derive(Debug, Clone)]
pub struct TaweretConfig {
    /// Seconds between evaluation cycles.
    pub evaluation_interval_secs: u64,
    /// Namespace holding retention configmaps.
    pub config_namespace: String,
    /// Configmap key holding a retention document.
    pub config_key: String,
    /// Cluster API connection settings.
    pub cluster: ClusterConfig,
    /// Deletion protocol settings.
    pub deletion: DeletionConfig,
    /// Metrics exporter settings.
    pub metrics: MetricsSettings,
    /// Logging settings.
    pub logging: LoggingSettings,
}

/// Cluster API connection settings.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// API server base URL. Defaults to the in-cluster service address.
    pub api_server: Option<String>,
    /// Service-account token file.
    pub token_path: PathBuf,
    /// Cluster CA certificate.
    pub ca_cert_path: PathBuf,
    /// Request timeout in milliseconds (0 disables).
    pub timeout_ms: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            api_server: None,
            token_path: PathBuf::from("/var/run/secrets/kubernetes.io/serviceaccount/token"),
            ca_cert_path: PathBuf::from("/var/run/secrets/kubernetes.io/serviceaccount/ca.crt"),
            timeout_ms: 30_000,
        }
    }
}

/// Deletion protocol settings.
#[derive(Debug, Clone)]
pub struct DeletionConfig {
    /// Prefix of deletion request names.
    pub name_prefix: String,
    /// First delay between status polls.
    pub initial_poll_ms: u64,
    /// Upper bound on a single poll delay.
    pub max_poll_ms: u64,
    /// Growth factor between consecutive delays.
    pub backoff_multiplier: u32,
    /// Total time to wait for a request before giving up.
    pub max_wait_secs: u64,
}

impl Default for DeletionConfig {
    fn default() -> Self {
        Self {
            name_prefix: crate::models::DEFAULT_DELETION_PREFIX.to_string(),
            initial_poll_ms: 5_000,
            max_poll_ms: 60_000,
            backoff_multiplier: 2,
            max_wait_secs: 3_600,
        }
    }
}

impl DeletionConfig {
    /// Converts to the poll settings used by the deletion protocol.
    #[must_use]
    pub fn poll_config(&self) -> crate::retention::PollConfig {
        crate::retention::PollConfig {
            initial_delay: Duration::from_millis(self.initial_poll_ms),
            max_delay: Duration::from_millis(self.max_poll_ms.max(self.initial_poll_ms)),
            multiplier: self.backoff_multiplier.max(1),
            max_wait: Duration::from_secs(self.max_wait_secs),
        }
    }
}

/// Metrics exporter settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSettings {
    /// Whether to install the Prometheus exporter.
    pub enabled: bool,
    /// Port of the `/metrics` listener.
    pub port: u16,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 2112,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Default)]
pub struct LoggingSettings {
    /// `pretty` or `json`.
    pub format: Option<String>,
    /// `EnvFilter` directive, e.g. `taweret=debug`.
    pub filter: Option<String>,
    /// Optional log file.
    pub file: Option<PathBuf>,
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// Evaluation interval in seconds.
    pub evaluation_interval_secs: Option<u64>,
    /// Namespace holding retention configmaps.
    pub config_namespace: Option<String>,
    /// Configmap key holding a retention document.
    pub config_key: Option<String>,
    /// Cluster section.
    pub cluster: Option<ConfigFileCluster>,
    /// Deletion section.
    pub deletion: Option<ConfigFileDeletion>,
    /// Metrics section.
    pub metrics: Option<ConfigFileMetrics>,
    /// Logging section.
    pub logging: Option<ConfigFileLogging>,
}

/// Cluster section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileCluster {
    /// API server URL.
    pub api_server: Option<String>,
    /// Token file.
    pub token_path: Option<String>,
    /// CA certificate file.
    pub ca_cert_path: Option<String>,
    /// Request timeout.
    pub timeout_ms: Option<u64>,
}

/// Deletion section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileDeletion {
    /// Request name prefix.
    pub name_prefix: Option<String>,
    /// First poll delay.
    pub initial_poll_ms: Option<u64>,
    /// Maximum poll delay.
    pub max_poll_ms: Option<u64>,
    /// Backoff multiplier.
    pub backoff_multiplier: Option<u32>,
    /// Maximum total wait.
    pub max_wait_secs: Option<u64>,
}

/// Metrics section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileMetrics {
    /// Whether metrics are enabled.
    pub enabled: Option<bool>,
    /// Listener port.
    pub port: Option<u16>,
}

/// Logging section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileLogging {
    /// Log format.
    pub format: Option<String>,
    /// Filter directive.
    pub filter: Option<String>,
    /// Log file path.
    pub file: Option<String>,
}

impl Default for TaweretConfig {
    fn default() -> Self {
        Self {
            evaluation_interval_secs: DEFAULT_EVALUATION_INTERVAL_SECS,
            config_namespace: DEFAULT_CONFIG_NAMESPACE.to_string(),
            config_key: DEFAULT_CONFIG_KEY.to_string(),
            cluster: ClusterConfig::default(),
            deletion: DeletionConfig::default(),
            metrics: MetricsSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl TaweretConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Interval between evaluation cycles.
    #[must_use]
    pub const fn evaluation_interval(&self) -> Duration {
        Duration::from_secs(self.evaluation_interval_secs)
    }

    /// Loads configuration from a file path, then applies env overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::OperationFailed {
            operation: "read_config_file".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;

        Self::parse_toml(&contents).map(Self::with_env_overrides)
    }

    /// Parses TOML config text without env overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a valid config file.
    pub fn parse_toml(contents: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(contents).map_err(|e| Error::OperationFailed {
            operation: "parse_config_file".to_string(),
            cause: e.to_string(),
        })?;

        Ok(Self::from_config_file(file))
    }

    /// Loads configuration from the default location.
    ///
    /// Checks `TAWERET_CONFIG_PATH`, then the platform config dir
    /// (`~/.config/taweret/config.toml` on Linux), then `/etc/taweret/config.toml`.
    /// Falls back to defaults if none exists.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed.
    pub fn load_default() -> Result<Self> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            if !path.trim().is_empty() {
                return Self::load_from_file(Path::new(&path));
            }
        }

        let mut candidates = Vec::new();
        if let Some(base_dirs) = directories::BaseDirs::new() {
            candidates.push(base_dirs.config_dir().join("taweret").join("config.toml"));
        }
        candidates.push(PathBuf::from("/etc/taweret/config.toml"));

        for path in candidates {
            if path.exists() {
                return Self::load_from_file(&path);
            }
        }

        Ok(Self::default().with_env_overrides())
    }

    /// Converts a `ConfigFile` to `TaweretConfig`.
    fn from_config_file(file: ConfigFile) -> Self {
        let mut config = Self::default();

        if let Some(v) = file.evaluation_interval_secs {
            config.evaluation_interval_secs = v;
        }
        if let Some(v) = file.config_namespace {
            config.config_namespace = v;
        }
        if let Some(v) = file.config_key {
            config.config_key = v;
        }
        if let Some(cluster) = file.cluster {
            config.cluster.api_server = cluster.api_server.or(config.cluster.api_server);
            if let Some(v) = cluster.token_path {
                config.cluster.token_path = PathBuf::from(v);
            }
            if let Some(v) = cluster.ca_cert_path {
                config.cluster.ca_cert_path = PathBuf::from(v);
            }
            if let Some(v) = cluster.timeout_ms {
                config.cluster.timeout_ms = v;
            }
        }
        if let Some(deletion) = file.deletion {
            if let Some(v) = deletion.name_prefix {
                config.deletion.name_prefix = v;
            }
            if let Some(v) = deletion.initial_poll_ms {
                config.deletion.initial_poll_ms = v;
            }
            if let Some(v) = deletion.max_poll_ms {
                config.deletion.max_poll_ms = v;
            }
            if let Some(v) = deletion.backoff_multiplier {
                config.deletion.backoff_multiplier = v;
            }
            if let Some(v) = deletion.max_wait_secs {
                config.deletion.max_wait_secs = v;
            }
        }
        if let Some(metrics) = file.metrics {
            if let Some(v) = metrics.enabled {
                config.metrics.enabled = v;
            }
            if let Some(v) = metrics.port {
                config.metrics.port = v;
            }
        }
        if let Some(logging) = file.logging {
            config.logging.format = logging.format;
            config.logging.filter = logging.filter;
            config.logging.file = logging.file.map(PathBuf::from);
        }

        config
    }

    /// Applies `TAWERET_*` environment variable overrides.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(v) = parse_env("TAWERET_EVALUATION_INTERVAL_SECS") {
            self.evaluation_interval_secs = v;
        }
        if let Some(v) = string_env("TAWERET_CONFIG_NAMESPACE") {
            self.config_namespace = v;
        }
        if let Some(v) = string_env("TAWERET_CONFIG_KEY") {
            self.config_key = v;
        }
        if let Some(v) = string_env("TAWERET_API_SERVER") {
            self.cluster.api_server = Some(v);
        }
        if let Some(v) = parse_env("TAWERET_DELETION_MAX_WAIT_SECS") {
            self.deletion.max_wait_secs = v;
        }
        if let Some(v) = parse_env("TAWERET_DELETION_INITIAL_POLL_MS") {
            self.deletion.initial_poll_ms = v;
        }
        if let Some(v) = bool_env("TAWERET_METRICS_ENABLED") {
            self.metrics.enabled = v;
        }
        if let Some(v) = parse_env("TAWERET_METRICS_PORT") {
            self.metrics.port = v;
        }
        if let Some(v) = string_env("TAWERET_LOG_FORMAT") {
            self.logging.format = Some(v);
        }
        if let Some(v) = string_env("TAWERET_LOG_FILE") {
            self.logging.file = Some(PathBuf::from(v));
        }
        self
    }

    /// Checks values that would make the process misbehave.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] describing the first bad value.
    pub fn validate(&self) -> Result<()> {
        if self.evaluation_interval_secs == 0 {
            return Err(Error::InvalidInput(
                "evaluation_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.config_key.trim().is_empty() {
            return Err(Error::InvalidInput("config_key must not be empty".to_string()));
        }
        if self.deletion.name_prefix.is_empty() {
            return Err(Error::InvalidInput(
                "deletion.name_prefix must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn string_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    string_env(key).and_then(|value| value.parse().ok())
}

fn bool_env(key: &str) -> Option<bool> {
    string_env(key).map(|value| {
        let value = value.to_lowercase();
        value == "true" || value == "1" || value == "yes"
    })
}
