// Configuration File Support
//
// This module provides configuration file parsing for jailkeeper.
// Supports TOML format with environment variable overrides.
// The configuration file is loaded from /etc/jailkeeper/config.toml unless
// another path is given on the command line or in JAILKEEPER_CONFIG.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::jail::reconciler::DEFAULT_MAX_WORKERS;
use crate::jail::JailConfig;
use crate::logging::{LogFormat, LogLevel, LoggingConfig};

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/jailkeeper/config.toml";

/// Upper bound for the worker pool
pub const MAX_WORKERS_LIMIT: usize = 64;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Jail host configuration
    pub jail: JailConfig,

    /// Where tenant jail settings come from
    pub source: SourceConfig,

    /// Per-tenant state records
    pub state: StateConfig,

    /// Run behaviour
    pub reconcile: ReconcileConfig,

    /// Metrics configuration
    pub metrics: MetricsConfig,
}

/// Kind of tenant config source
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// JSON snapshot file written by the panel
    #[default]
    File,
    /// Exporter command printing the JSON snapshot on stdout
    Command,
}

/// Tenant config source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SourceConfig {
    pub kind: SourceKind,

    /// Snapshot file (kind = "file")
    pub path: Option<PathBuf>,

    /// Exporter argv (kind = "command")
    pub command: Vec<String>,

    /// Exporter timeout in seconds
    pub timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::File,
            path: Some(PathBuf::from("/var/lib/jailkeeper/tenants.json")),
            command: Vec::new(),
            timeout_secs: 60,
        }
    }
}

/// State store configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StateConfig {
    /// Directory holding one `<tenant_id>.json` record per tenant
    pub dir: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("/var/lib/jailkeeper/state"),
        }
    }
}

/// Reconciliation run configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Tenants reconciled concurrently
    pub max_workers: usize,

    /// Lock file guarding against concurrent runs
    pub lock_path: PathBuf,

    /// Stop dispatching new tenants after this many seconds (0 = no limit)
    pub run_timeout_secs: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            lock_path: PathBuf::from("/run/jailkeeper/reconcile.lock"),
            run_timeout_secs: 0,
        }
    }
}

impl ReconcileConfig {
    pub fn run_timeout(&self) -> Option<Duration> {
        (self.run_timeout_secs > 0).then(|| Duration::from_secs(self.run_timeout_secs))
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    /// Whether to write metrics after each run
    pub enabled: bool,

    /// Output file for the node-exporter textfile collector
    pub textfile_path: PathBuf,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            textfile_path: PathBuf::from("/var/lib/prometheus/node-exporter/jailkeeper.prom"),
        }
    }
}

impl Config {
    /// Load configuration from a specific path
    ///
    /// A missing file yields the defaults. Environment overrides are applied
    /// and the result is validated either way.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file from {:?}", path))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file from {:?}", path))?;
            tracing::debug!("Loaded configuration from {:?}", path);
            config
        } else {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            Self::default()
        };

        let config = config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Environment variables take precedence over config file values:
    /// - JAILKEEPER_LOG_LEVEL (ignored if not a known level)
    /// - JAILKEEPER_LOG_FORMAT (ignored if not plain or json)
    /// - JAILKEEPER_JAILS_BASE
    /// - JAILKEEPER_STATE_DIR
    /// - JAILKEEPER_MAX_WORKERS (ignored outside 1..=64)
    /// - JAILKEEPER_PROCESS_TIMEOUT_SECS (ignored if 0)
    /// - JAILKEEPER_TENANTS_FILE (switches the source to that file)
    fn apply_env_overrides(mut self) -> Self {
        // Logging overrides
        if let Ok(level) = std::env::var("JAILKEEPER_LOG_LEVEL") {
            if let Ok(level) = level.parse::<LogLevel>() {
                self.logging.level = level;
            }
        }
        if let Ok(format) = std::env::var("JAILKEEPER_LOG_FORMAT") {
            if let Ok(format) = format.parse::<LogFormat>() {
                self.logging.format = format;
            }
        }

        // Jail overrides
        if let Ok(base) = std::env::var("JAILKEEPER_JAILS_BASE") {
            self.jail.base_dir = PathBuf::from(base);
        }
        if let Ok(timeout) = std::env::var("JAILKEEPER_PROCESS_TIMEOUT_SECS") {
            if let Ok(timeout) = timeout.parse::<u64>() {
                if timeout > 0 {
                    self.jail.process_timeout_secs = timeout;
                }
            }
        }

        // State and source overrides
        if let Ok(dir) = std::env::var("JAILKEEPER_STATE_DIR") {
            self.state.dir = PathBuf::from(dir);
        }
        if let Ok(path) = std::env::var("JAILKEEPER_TENANTS_FILE") {
            self.source.kind = SourceKind::File;
            self.source.path = Some(PathBuf::from(path));
        }

        // Reconcile overrides
        if let Ok(workers) = std::env::var("JAILKEEPER_MAX_WORKERS") {
            if let Ok(workers) = workers.parse::<usize>() {
                if (1..=MAX_WORKERS_LIMIT).contains(&workers) {
                    self.reconcile.max_workers = workers;
                }
            }
        }

        self
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        // Validate jail configuration
        self.jail.validate()?;

        // Validate source configuration
        match self.source.kind {
            SourceKind::File => match &self.source.path {
                None => anyhow::bail!("source.path is required when source.kind = \"file\""),
                Some(path) if !path.is_absolute() => {
                    anyhow::bail!("source.path must be absolute: {:?}", path)
                }
                Some(_) => {}
            },
            SourceKind::Command => {
                if self.source.command.first().map_or(true, |p| p.is_empty()) {
                    anyhow::bail!("source.command is required when source.kind = \"command\"");
                }
            }
        }
        if self.source.timeout_secs == 0 {
            anyhow::bail!("source.timeout_secs must be > 0");
        }

        // Validate state and run configuration
        if !self.state.dir.is_absolute() {
            anyhow::bail!("state.dir must be absolute: {:?}", self.state.dir);
        }
        if !(1..=MAX_WORKERS_LIMIT).contains(&self.reconcile.max_workers) {
            anyhow::bail!(
                "reconcile.max_workers must be between 1 and {}",
                MAX_WORKERS_LIMIT
            );
        }
        if !self.reconcile.lock_path.is_absolute() {
            anyhow::bail!(
                "reconcile.lock_path must be absolute: {:?}",
                self.reconcile.lock_path
            );
        }

        // Validate metrics configuration
        if self.metrics.enabled && !self.metrics.textfile_path.is_absolute() {
            anyhow::bail!(
                "metrics.textfile_path must be absolute: {:?}",
                self.metrics.textfile_path
            );
        }

        Ok(())
    }
}
