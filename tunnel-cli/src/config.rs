//! Configuration loading for tunnel-bench.
//!
//! Configuration is loaded from a TOML file (default: `tunnel-bench.toml`).
//! Every field has a default, so a partial file or no file at all is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tunnel_core::{ConstraintSchedule, DirectionConfig, LinkStep};

/// Root configuration for tunnel-bench.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Agent addresses.
    pub agents: AgentsConfig,
    /// Media relay.
    pub relay: RelaySection,
    /// Tunnel under test.
    pub tunnel: TunnelConfig,
    /// Sweep settings.
    pub sweep: SweepConfig,
    /// Artifact handoff.
    pub artifacts: ArtifactsConfig,
    /// Network and media timing.
    pub timeouts: TimeoutsConfig,
    /// Link constraint schedule, applied in order.
    #[serde(default = "default_schedule")]
    pub schedule: Vec<ScheduleEntry>,
}

/// Addresses of both agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentsConfig {
    /// Client-side agent (default: 192.168.1.33:3333).
    #[serde(default = "default_client_agent")]
    pub client: AgentAddress,
    /// Server-side agent (default: 192.168.1.47:3334).
    #[serde(default = "default_server_agent")]
    pub server: AgentAddress,
}

/// One agent's control address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentAddress {
    /// Host name or IP.
    pub host: String,
    /// Control port.
    pub port: u16,
}

/// Media relay configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelaySection {
    /// Relay host (default: 192.168.1.47).
    #[serde(default = "default_relay_host")]
    pub host: String,
    /// Relay command port (default: 8084).
    #[serde(default = "default_relay_port")]
    pub port: u16,
    /// Probe for available bandwidth (default: true).
    #[serde(default = "default_true")]
    pub probing: bool,
    /// Probing bitrate in kbps (default: 2000).
    #[serde(default = "default_probing_bitrate")]
    pub probing_bitrate: u32,
}

/// Tunnel configuration for single runs; sweeps override implementation,
/// algorithm and mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TunnelConfig {
    /// QUIC implementation (default: mvfst).
    #[serde(default = "default_implementation")]
    pub implementation: String,
    /// Congestion-control algorithm (default: newreno).
    #[serde(default = "default_congestion_control")]
    pub congestion_control: String,
    /// Datagram mode instead of streams (default: false).
    #[serde(default)]
    pub datagrams: bool,
    /// Tunnel endpoint host (default: 192.168.1.47).
    #[serde(default = "default_quic_host")]
    pub quic_host: String,
    /// Tunnel endpoint port (default: 8888).
    #[serde(default = "default_quic_port")]
    pub quic_port: u16,
    /// Transfer a side file over the tunnel during the run (default: false).
    #[serde(default)]
    pub external_file_transfer: bool,
}

/// Sweep configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Implementations never parsed or swept (default: ["quicly"]).
    #[serde(default = "default_excluded")]
    pub excluded: Vec<String>,
    /// Repetitions of the whole sweep (default: 1).
    #[serde(default = "default_repeat")]
    pub repeat: u32,
}

/// Artifact handoff configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactsConfig {
    /// Local result root (default: results).
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,
    /// Directory whose files are copied into each result directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capture_dir: Option<PathBuf>,
    /// Collection endpoint substituted for `{endpoint}`.
    #[serde(default)]
    pub endpoint: String,
    /// Delivery command run through `sh -c`; empty only deposits.
    #[serde(default)]
    pub command: String,
}

/// Timeouts and intervals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    /// Agent connect timeout in seconds (default: 10).
    #[serde(default = "default_connect_secs")]
    pub connect_secs: u64,
    /// Agent request timeout in seconds (default: 30).
    #[serde(default = "default_request_secs")]
    pub request_secs: u64,
    /// Relay round-trip timeout in seconds (default: 10).
    #[serde(default = "default_relay_secs")]
    pub relay_secs: u64,
    /// Media statistics sampling interval in milliseconds (default: 1000).
    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,
}

/// One schedule entry: a timed link step, or `boundary = true` to end a
/// sub-run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleEntry {
    /// Step duration in seconds.
    pub seconds: u64,
    /// Link bitrate in kbps.
    pub bitrate: u32,
    /// One-way delay in milliseconds.
    pub delay: u32,
    /// Loss percentage.
    pub loss: u32,
    /// Sub-run boundary marker.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub boundary: bool,
}

// Default value functions
fn default_client_agent() -> AgentAddress {
    AgentAddress {
        host: "192.168.1.33".to_string(),
        port: 3333,
    }
}

fn default_server_agent() -> AgentAddress {
    AgentAddress {
        host: "192.168.1.47".to_string(),
        port: 3334,
    }
}

fn default_relay_host() -> String {
    "192.168.1.47".to_string()
}

fn default_relay_port() -> u16 {
    8084
}

fn default_true() -> bool {
    true
}

fn default_probing_bitrate() -> u32 {
    2000
}

fn default_implementation() -> String {
    "mvfst".to_string()
}

fn default_congestion_control() -> String {
    "newreno".to_string()
}

fn default_quic_host() -> String {
    "192.168.1.47".to_string()
}

fn default_quic_port() -> u16 {
    8888
}

fn default_excluded() -> Vec<String> {
    tunnel_core::DEFAULT_EXCLUDED_IMPLEMENTATIONS
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_repeat() -> u32 {
    1
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("results")
}

fn default_connect_secs() -> u64 {
    10
}

fn default_request_secs() -> u64 {
    30
}

fn default_relay_secs() -> u64 {
    10
}

fn default_sample_interval_ms() -> u64 {
    1000
}

fn default_schedule() -> Vec<ScheduleEntry> {
    vec![ScheduleEntry {
        seconds: 30,
        bitrate: 2500,
        delay: 1,
        loss: 0,
        boundary: false,
    }]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            agents: AgentsConfig::default(),
            relay: RelaySection::default(),
            tunnel: TunnelConfig::default(),
            sweep: SweepConfig::default(),
            artifacts: ArtifactsConfig::default(),
            timeouts: TimeoutsConfig::default(),
            schedule: default_schedule(),
        }
    }
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            client: default_client_agent(),
            server: default_server_agent(),
        }
    }
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            host: default_relay_host(),
            port: default_relay_port(),
            probing: default_true(),
            probing_bitrate: default_probing_bitrate(),
        }
    }
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            implementation: default_implementation(),
            congestion_control: default_congestion_control(),
            datagrams: false,
            quic_host: default_quic_host(),
            quic_port: default_quic_port(),
            external_file_transfer: false,
        }
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            excluded: default_excluded(),
            repeat: default_repeat(),
        }
    }
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            results_dir: default_results_dir(),
            capture_dir: None,
            endpoint: String::new(),
            command: String::new(),
        }
    }
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            connect_secs: default_connect_secs(),
            request_secs: default_request_secs(),
            relay_secs: default_relay_secs(),
            sample_interval_ms: default_sample_interval_ms(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::SerializeError)
    }

    /// Reject configurations that cannot drive a run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.schedule.iter().any(|entry| !entry.boundary) {
            return Err(ConfigError::Invalid("schedule has no link steps".into()));
        }
        if self.sweep.repeat == 0 {
            return Err(ConfigError::Invalid("sweep.repeat must be at least 1".into()));
        }
        let timeouts = &self.timeouts;
        for (name, value) in [
            ("timeouts.connect_secs", timeouts.connect_secs),
            ("timeouts.request_secs", timeouts.request_secs),
            ("timeouts.relay_secs", timeouts.relay_secs),
            ("timeouts.sample_interval_ms", timeouts.sample_interval_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be greater than 0")));
            }
        }
        Ok(())
    }

    /// Schedule as constraints.
    pub fn constraint_schedule(&self) -> ConstraintSchedule {
        let mut schedule = ConstraintSchedule::new();
        for entry in &self.schedule {
            if entry.boundary {
                schedule.push_boundary();
            } else {
                schedule.push_step(LinkStep::new(entry.seconds, entry.bitrate, entry.delay, entry.loss));
            }
        }
        schedule
    }

    /// Base configuration applied to both tunnel directions.
    pub fn direction(&self) -> DirectionConfig {
        DirectionConfig {
            implementation: self.tunnel.implementation.clone(),
            congestion_control: self.tunnel.congestion_control.clone(),
            datagrams: self.tunnel.datagrams,
            rtp_port: None,
            quic_port: self.tunnel.quic_port,
            quic_host: self.tunnel.quic_host.clone(),
            external_file_transfer: self.tunnel.external_file_transfer,
        }
    }
}

impl TimeoutsConfig {
    /// Agent connect timeout.
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    /// Agent request timeout.
    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }

    /// Relay timeout.
    pub fn relay(&self) -> Duration {
        Duration::from_secs(self.relay_secs)
    }

    /// Media sampling interval.
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// Failed to render configuration.
    #[error("failed to render config: {0}")]
    SerializeError(#[source] toml::ser::Error),
    /// Configuration parsed but is unusable.
    #[error("invalid config: {0}")]
    Invalid(String),
}
