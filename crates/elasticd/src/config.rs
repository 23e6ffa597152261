//! elasticd.toml configuration.
//!
//! Every field is optional; missing ones take the defaults below. The file
//! is layered under `PROMETHEUS_HOST`/`PROMETHEUS_PORT` and then under the
//! command-line flags.
//!
//! ```toml
//! port = 8080
//! data_dir = "/var/lib/elastic"
//!
//! [controller]
//! poll_interval = "10s"
//! scale_down_cooldown = "3m"
//! workers = 1
//!
//! [prometheus]
//! url = "http://localhost:9090"
//! timeout = "500ms"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use elastic_autoscale::ControllerConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    pub port: u16,
    pub data_dir: PathBuf,
    pub controller: ControllerSection,
    pub prometheus: PrometheusSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ControllerSection {
    pub poll_interval: String,
    pub scale_down_cooldown: String,
    pub workers: usize,
    pub failure_base_delay: String,
    pub failure_max_delay: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PrometheusSection {
    pub url: String,
    pub timeout: String,
    pub metric: String,
    pub window: String,
    /// Report this rate for every workload instead of querying Prometheus.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixed_rate: Option<f64>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            data_dir: PathBuf::from("/var/lib/elastic"),
            controller: ControllerSection::default(),
            prometheus: PrometheusSection::default(),
        }
    }
}

impl Default for ControllerSection {
    fn default() -> Self {
        Self {
            poll_interval: "10s".to_string(),
            scale_down_cooldown: "3m".to_string(),
            workers: 1,
            failure_base_delay: "5s".to_string(),
            failure_max_delay: "300s".to_string(),
        }
    }
}

impl Default for PrometheusSection {
    fn default() -> Self {
        Self {
            url: "http://localhost:9090".to_string(),
            timeout: "500ms".to_string(),
            metric: elastic_autoscale::sources::DEFAULT_RATE_METRIC.to_string(),
            window: elastic_autoscale::sources::DEFAULT_RATE_WINDOW.to_string(),
            fixed_rate: None,
        }
    }
}

impl DaemonConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: DaemonConfig =
            toml::from_str(&content).with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    /// Point the Prometheus URL at `PROMETHEUS_HOST`/`PROMETHEUS_PORT` when
    /// the host is set. The port defaults to 9090.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let Some(host) = lookup("PROMETHEUS_HOST").filter(|h| !h.trim().is_empty()) else {
            return;
        };
        let port = lookup("PROMETHEUS_PORT")
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| "9090".to_string());
        self.prometheus.url = format!("http://{}:{}", host.trim(), port.trim());
    }

    /// Build the controller tunables, rejecting unparsable durations.
    pub fn controller_config(&self) -> anyhow::Result<ControllerConfig> {
        let c = &self.controller;
        if c.workers == 0 {
            bail!("controller.workers must be at least 1");
        }
        Ok(ControllerConfig {
            poll_interval: duration_field("controller.poll_interval", &c.poll_interval)?,
            scale_down_cooldown: duration_field(
                "controller.scale_down_cooldown",
                &c.scale_down_cooldown,
            )?,
            workers: c.workers,
            failure_base_delay: duration_field(
                "controller.failure_base_delay",
                &c.failure_base_delay,
            )?,
            failure_max_delay: duration_field(
                "controller.failure_max_delay",
                &c.failure_max_delay,
            )?,
        })
    }

    pub fn prometheus_timeout(&self) -> anyhow::Result<Duration> {
        duration_field("prometheus.timeout", &self.prometheus.timeout)
    }
}

fn duration_field(name: &str, value: &str) -> anyhow::Result<Duration> {
    match parse_duration(value) {
        Some(d) if !d.is_zero() => Ok(d),
        _ => bail!("{name}: invalid duration {value:?}"),
    }
}

/// Parse a duration string like "500ms", "10s", "3m", "1h". A bare number
/// is seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else if let Some(hours) = s.strip_suffix('h') {
        hours
            .parse::<u64>()
            .ok()
            .and_then(|h| h.checked_mul(3600))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
