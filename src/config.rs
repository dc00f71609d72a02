use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Top-level configuration for the exporter.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Logging verbosity (trace, debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// PHD2 event server connection.
    #[serde(default)]
    pub phd2: Phd2Config,

    /// Prometheus scrape endpoint.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Guiding RMS window.
    #[serde(default)]
    pub rms: RmsConfig,
}

/// PHD2 event server connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Phd2Config {
    /// Host running PHD2. Default: "127.0.0.1".
    #[serde(default = "default_phd2_host")]
    pub host: String,

    /// Event server port. Default: 4400 (instance 1).
    #[serde(default = "default_phd2_port")]
    pub port: u16,

    /// Maximum wait for a line before a liveness tick. Default: 2s.
    #[serde(default = "default_read_timeout", with = "humantime_serde")]
    pub read_timeout: Duration,

    /// TCP connect timeout. Default: 5s.
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Pause between connection attempts. Default: 2s.
    #[serde(default = "default_reconnect_delay", with = "humantime_serde")]
    pub reconnect_delay: Duration,
}

/// Prometheus scrape endpoint configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Listen address. Default: ":9753".
    #[serde(default = "default_metrics_addr")]
    pub addr: String,

    /// Prefix of every exported metric name. Default: "phd2".
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

/// Guiding RMS configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RmsConfig {
    /// Number of guide steps per RMS window. Default: 10.
    #[serde(default = "default_rms_samples")]
    pub samples: usize,
}

/// Command-line values layered over the file. Empty or zero means "keep".
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub log_level: Option<String>,
    pub phd2_host: Option<String>,
    pub phd2_port: u16,
    pub metrics_port: u16,
    pub rms_samples: usize,
}

// --- Default value functions ---

fn default_log_level() -> String {
    "info".to_string()
}

fn default_phd2_host() -> String {
    "127.0.0.1".to_string()
}

fn default_phd2_port() -> u16 {
    4400
}

fn default_read_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_reconnect_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_metrics_addr() -> String {
    ":9753".to_string()
}

fn default_namespace() -> String {
    "phd2".to_string()
}

fn default_rms_samples() -> usize {
    crate::phd2::rms::DEFAULT_SAMPLES
}

// --- Default trait impls ---

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            phd2: Phd2Config::default(),
            metrics: MetricsConfig::default(),
            rms: RmsConfig::default(),
        }
    }
}

impl Default for Phd2Config {
    fn default() -> Self {
        Self {
            host: default_phd2_host(),
            port: default_phd2_port(),
            read_timeout: default_read_timeout(),
            connect_timeout: default_connect_timeout(),
            reconnect_delay: default_reconnect_delay(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            addr: default_metrics_addr(),
            namespace: default_namespace(),
        }
    }
}

impl Default for RmsConfig {
    fn default() -> Self {
        Self {
            samples: default_rms_samples(),
        }
    }
}

// --- Validation and loading ---

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        Self::parse(&data).with_context(|| format!("parsing config file {}", path.display()))
    }

    /// Parse and validate configuration from YAML text.
    pub fn parse(data: &str) -> Result<Self> {
        // An empty document deserializes to unit, not a map.
        let cfg: Config = if data.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml::from_str(data)?
        };

        cfg.validate()?;

        Ok(cfg)
    }

    /// Applies command-line overrides on top of the loaded values.
    pub fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(level) = overrides.log_level.as_deref().filter(|s| !s.is_empty()) {
            self.log_level = level.to_string();
        }
        if let Some(host) = overrides.phd2_host.as_deref().filter(|s| !s.is_empty()) {
            self.phd2.host = host.to_string();
        }
        if overrides.phd2_port != 0 {
            self.phd2.port = overrides.phd2_port;
        }
        if overrides.metrics_port != 0 {
            self.metrics.addr = format!(":{}", overrides.metrics_port);
        }
        if overrides.rms_samples != 0 {
            self.rms.samples = overrides.rms_samples;
        }
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        if self.phd2.host.is_empty() {
            bail!("phd2.host is required");
        }

        if self.phd2.port == 0 {
            bail!("phd2.port must be positive");
        }

        if self.phd2.read_timeout.is_zero() {
            bail!("phd2.read_timeout must be positive");
        }

        if self.phd2.connect_timeout.is_zero() {
            bail!("phd2.connect_timeout must be positive");
        }

        if self.phd2.reconnect_delay.is_zero() {
            bail!("phd2.reconnect_delay must be positive");
        }

        if self.metrics.addr.is_empty() {
            bail!("metrics.addr is required");
        }

        if self.metrics.namespace.is_empty() {
            bail!("metrics.namespace is required");
        }

        if self.rms.samples == 0 {
            bail!("rms.samples must be at least 1");
        }

        Ok(())
    }
}

impl Phd2Config {
    /// `host:port` of the event server.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl MetricsConfig {
    /// Listen address with the ":port" shorthand expanded to all interfaces.
    pub fn bind_addr(&self) -> String {
        if self.addr.starts_with(':') {
            format!("0.0.0.0{}", self.addr)
        } else {
            self.addr.clone()
        }
    }
}
