//! Configuration file support for rceload
//!
//! Runs are described by TOML profiles so a load test can be repeated
//! exactly. Any value can be overridden from the command line with
//! `--set key.path=value`.

use anyhow::{bail, Context, Result};
use rceload_core::dispatch::{HttpConfig, SocketConfig, UdpConfig};
use rceload_core::DistributionSpec;
use rceload_protocols::{HttpMethod, HttpTarget};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level profile configuration
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct ProfileConfig {
    pub experiment: ExperimentConfig,
    pub target: TargetConfig,
    pub distribution: DistributionConfig,
    #[serde(default)]
    pub clients: ClientsConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Experiment metadata and run limits
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct ExperimentConfig {
    /// Experiment name
    pub name: String,
    /// Optional description
    #[serde(default)]
    pub description: Option<String>,
    /// Random seed for reproducibility (None = use entropy)
    #[serde(default)]
    pub seed: Option<u64>,
    /// Wall-clock cap on the run
    #[serde(with = "humantime_serde", default)]
    #[schemars(with = "Option<String>")]
    pub duration: Option<Duration>,
    /// Events each logical client sends (None = unbounded, needs `duration`)
    #[serde(default)]
    pub events_per_client: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Tcp,
    Udp,
    Http,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Tcp => "tcp",
            TransportKind::Udp => "udp",
            TransportKind::Http => "http",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum MethodConfig {
    #[default]
    Post,
    Get,
}

impl From<MethodConfig> for HttpMethod {
    fn from(method: MethodConfig) -> Self {
        match method {
            MethodConfig::Post => HttpMethod::Post,
            MethodConfig::Get => HttpMethod::Get,
        }
    }
}

/// Target service configuration
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct TargetConfig {
    /// Transport: tcp, udp, http
    #[serde(default = "default_transport")]
    pub transport: TransportKind,
    /// Server address "host:port" (tcp and udp)
    #[serde(default)]
    pub address: Option<String>,
    /// Endpoint URL (http), e.g. "http://localhost:8080/rce-loadtest/ReferenceServlet?message=Testing"
    #[serde(default)]
    pub url: Option<String>,
    /// HTTP method: post (event as body) or get (health check)
    #[serde(default)]
    pub method: MethodConfig,
    /// Token a successful HTTP response body must contain
    #[serde(default = "default_marker")]
    pub marker: String,
    /// Wait for the one-byte acknowledgement after every message (tcp only)
    #[serde(default)]
    pub acknowledge: bool,
    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    #[schemars(with = "String")]
    pub connect_timeout: Duration,
    /// Longest a single event may stay in flight
    #[serde(with = "humantime_serde", default = "default_io_timeout")]
    #[schemars(with = "String")]
    pub io_timeout: Duration,
}

fn default_transport() -> TransportKind {
    TransportKind::Tcp
}

fn default_marker() -> String {
    rceload_core::dispatch::http::DEFAULT_MARKER.to_string()
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_io_timeout() -> Duration {
    Duration::from_secs(10)
}

/// Synthetic event shape
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct DistributionConfig {
    /// Number of event classes
    pub classes: u32,
    /// Feature readings per event
    pub features: u32,
    /// Class skew in [0, 1]: 0 = uniform, 1 = every event in class 0
    pub skew: f64,
    /// Round feature readings to integers
    #[serde(default)]
    pub discrete: bool,
}

/// Logical clients and how they are spread over threads
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct ClientsConfig {
    /// Number of logical clients
    #[serde(default = "default_one")]
    pub count: usize,
    /// Poller threads for tcp/udp (http runs one thread per client)
    #[serde(default = "default_one")]
    pub threads: usize,
    /// Think time between consecutive events of one client
    #[serde(with = "humantime_serde", default)]
    #[schemars(with = "String")]
    pub pacing: Duration,
}

fn default_one() -> usize {
    1
}

impl Default for ClientsConfig {
    fn default() -> Self {
        Self { count: 1, threads: 1, pacing: Duration::ZERO }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Human,
    Json,
}

/// Output configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
pub struct OutputConfig {
    /// Report format on stdout
    #[serde(default)]
    pub format: OutputFormat,
    /// Also write JSON results to this file
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl ProfileConfig {
    /// Load profile from TOML file
    ///
    /// Validation is left to the caller so a profile can be completed with
    /// overrides first.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_file_with_overrides(path, &[])
    }

    /// Load profile from TOML file and apply `--set` style overrides
    pub fn from_file_with_overrides<P: AsRef<Path>>(path: P, overrides: &[String]) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml_with_overrides(&content, overrides)
            .with_context(|| format!("Failed to load config file: {}", path.display()))
    }

    /// Parse a profile from TOML text and apply overrides
    pub fn from_toml_with_overrides(content: &str, overrides: &[String]) -> Result<Self> {
        let mut value: toml::Value = toml::from_str(content).context("Failed to parse TOML")?;

        for override_str in overrides {
            let (key, val) = parse_key_value(override_str)
                .with_context(|| format!("Invalid override format: {}", override_str))?;

            set_toml_path(&mut value, &key, &val)
                .with_context(|| format!("Failed to apply override: {}", override_str))?;
        }

        value.try_into().context("Failed to deserialize configuration")
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.experiment.name.is_empty() {
            bail!("Experiment name cannot be empty");
        }
        if self.experiment.duration.is_some_and(|d| d.is_zero()) {
            bail!("Experiment duration must be > 0");
        }
        if self.experiment.events_per_client.is_none() && self.experiment.duration.is_none() {
            bail!("Unbounded runs (no events_per_client) need an experiment duration");
        }

        match self.target.transport {
            TransportKind::Tcp | TransportKind::Udp => match &self.target.address {
                Some(address) if !address.is_empty() => {}
                _ => bail!(
                    "Target address must be specified for {} transport",
                    self.target.transport.as_str()
                ),
            },
            TransportKind::Http => {
                let Some(url) = &self.target.url else {
                    bail!("Target url must be specified for http transport");
                };
                HttpTarget::parse(url)?;
            }
        }
        if self.target.acknowledge && self.target.transport != TransportKind::Tcp {
            bail!("acknowledge is only supported with tcp transport");
        }
        if self.target.io_timeout.is_zero() || self.target.connect_timeout.is_zero() {
            bail!("Target timeouts must be > 0");
        }

        self.distribution_spec()?;

        if self.clients.count == 0 {
            bail!("clients.count must be > 0");
        }
        if self.clients.threads == 0 {
            bail!("clients.threads must be > 0");
        }

        Ok(())
    }

    /// Validated distribution parameters
    pub fn distribution_spec(&self) -> Result<DistributionSpec> {
        let d = &self.distribution;
        let spec = DistributionSpec::new(d.classes, d.features, d.skew)?;
        Ok(spec.with_discrete(d.discrete))
    }

    /// Target address resolved once for the whole run
    pub fn resolve_address(&self) -> Result<SocketAddr> {
        let address = self
            .target
            .address
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("Target address must be specified"))?;

        address
            .to_socket_addrs()
            .with_context(|| format!("Failed to resolve target address: {address}"))?
            .next()
            .ok_or_else(|| anyhow::anyhow!("Target address {address} resolved to nothing"))
    }

    pub fn socket_config(&self) -> Result<SocketConfig> {
        let mut config = SocketConfig::new(self.resolve_address()?);
        config.pacing = self.clients.pacing;
        config.acknowledge = self.target.acknowledge;
        config.io_timeout = self.target.io_timeout;
        config.duration = self.experiment.duration;
        Ok(config)
    }

    pub fn udp_config(&self) -> Result<UdpConfig> {
        let mut config = UdpConfig::new(self.resolve_address()?);
        config.pacing = self.clients.pacing;
        config.duration = self.experiment.duration;
        Ok(config)
    }

    pub fn http_config(&self) -> Result<HttpConfig> {
        let url = self
            .target
            .url
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("Target url must be specified"))?;
        let target = HttpTarget::parse(url)?;

        let mut config = HttpConfig::new(target);
        config.method = self.target.method.into();
        config.marker = self.target.marker.clone();
        config.pacing = self.clients.pacing;
        config.connect_timeout = self.target.connect_timeout;
        config.io_timeout = self.target.io_timeout;
        config.duration = self.experiment.duration;
        Ok(config)
    }

    /// Human-readable target for logs and results
    pub fn target_display(&self) -> String {
        match self.target.transport {
            TransportKind::Http => self.target.url.clone().unwrap_or_default(),
            _ => self.target.address.clone().unwrap_or_default(),
        }
    }
}

/// Parse a "key=value" string into (key, value) tuple
fn parse_key_value(override_str: &str) -> Result<(String, String)> {
    match override_str.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => bail!("Invalid override format '{}'. Expected 'key=value'", override_str),
    }
}

/// Set a value in TOML using dot-notation path
fn set_toml_path(root: &mut toml::Value, path: &str, value_str: &str) -> Result<()> {
    let parts = parse_path(path);
    if parts.is_empty() {
        bail!("Empty path");
    }

    let last = parts.len() - 1;
    let mut current = root;
    for (i, part) in parts.iter().enumerate() {
        let is_last = i == last;

        match part {
            PathSegment::Key(key) => {
                let toml::Value::Table(table) = current else {
                    bail!("Cannot set key '{}' on non-table value", key);
                };
                if is_last {
                    table.insert(key.clone(), parse_value(value_str)?);
                    return Ok(());
                }
                // Intermediate tables are created on demand
                current = table
                    .entry(key.clone())
                    .or_insert_with(|| toml::Value::Table(Default::default()));
            }
            PathSegment::Index(idx) => {
                let toml::Value::Array(arr) = current else {
                    bail!("Cannot index non-array value");
                };
                if *idx >= arr.len() {
                    bail!("Array index {} out of bounds (length: {})", idx, arr.len());
                }
                if is_last {
                    arr[*idx] = parse_value(value_str)?;
                    return Ok(());
                }
                current = &mut arr[*idx];
            }
            PathSegment::Append => {
                if !is_last {
                    bail!("Append operation '+' can only be at the end of path");
                }
                let toml::Value::Array(arr) = current else {
                    bail!("Cannot append to non-array value");
                };
                arr.push(parse_value(value_str)?);
                return Ok(());
            }
        }
    }

    Ok(())
}

/// Path segment types
#[derive(Debug, PartialEq)]
enum PathSegment {
    Key(String),
    Index(usize),
    Append,
}

/// Split a dotted path into segments ("key", "0", "+")
fn parse_path(path: &str) -> Vec<PathSegment> {
    path.split('.')
        .filter(|part| !part.is_empty())
        .map(|part| {
            if part == "+" {
                PathSegment::Append
            } else if let Ok(idx) = part.parse::<usize>() {
                PathSegment::Index(idx)
            } else {
                PathSegment::Key(part.to_string())
            }
        })
        .collect()
}

/// Parse a string value with type inference
fn parse_value(value_str: &str) -> Result<toml::Value> {
    let trimmed = value_str.trim();

    match trimmed {
        "true" => return Ok(toml::Value::Boolean(true)),
        "false" => return Ok(toml::Value::Boolean(false)),
        _ => {}
    }

    if let Ok(int_val) = trimmed.parse::<i64>() {
        return Ok(toml::Value::Integer(int_val));
    }
    if let Ok(float_val) = trimmed.parse::<f64>() {
        return Ok(toml::Value::Float(float_val));
    }

    // Arrays and inline tables go through the TOML parser
    let bracketed = (trimmed.starts_with('[') && trimmed.ends_with(']'))
        || (trimmed.starts_with('{') && trimmed.ends_with('}'));
    if bracketed {
        let wrapped = format!("value = {}", trimmed);
        if let Ok(toml::Value::Table(mut table)) = toml::from_str::<toml::Value>(&wrapped) {
            if let Some(value) = table.remove("value") {
                return Ok(value);
            }
        }
        bail!("Failed to parse value: {}", trimmed);
    }

    let string_val = if trimmed.len() >= 2
        && ((trimmed.starts_with('"') && trimmed.ends_with('"'))
            || (trimmed.starts_with('\'') && trimmed.ends_with('\'')))
    {
        &trimmed[1..trimmed.len() - 1]
    } else {
        trimmed
    };

    Ok(toml::Value::String(string_val.to_string()))
}
