//! Directional configuration of the tunnel under test.
//!
//! The orchestrator keeps one [`ConfigurationPair`]: `outbound` feeds the
//! server agent's start command, `inbound` feeds the client agent's. A sweep
//! assigns the same implementation, algorithm and mode into both.

use tunnel_types::{StartClient, StartServer};

use crate::capabilities::{is_connectionless, DeliveryMode};
use crate::sweep::Combination;

/// Suffix appended to experiment names when a side file is transferred.
const FILE_TRANSFER_SUFFIX: &str = "_scp";

/// Transport class label for tunnel implementations that are not a raw
/// socket baseline.
const QUIC_TRANSPORT_LABEL: &str = "quic";

/// Configuration for one direction of the tunnel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectionConfig {
    /// Transport implementation under test
    pub implementation: String,
    /// Congestion-control algorithm
    pub congestion_control: String,
    /// Datagram (true) or stream (false) delivery
    pub datagrams: bool,
    /// RTP relay port, run-scoped
    pub rtp_port: Option<u16>,
    /// Tunnel port
    pub quic_port: u16,
    /// Tunnel host
    pub quic_host: String,
    /// Transfer a side file over the tunnel during the run
    pub external_file_transfer: bool,
}

impl DirectionConfig {
    /// Delivery mode of this direction.
    pub fn mode(&self) -> DeliveryMode {
        DeliveryMode::from_datagrams(self.datagrams)
    }
}

/// Inbound and outbound configuration records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationPair {
    /// Client-side (inbound) record
    pub inbound: DirectionConfig,
    /// Server-side (outbound) record
    pub outbound: DirectionConfig,
}

impl ConfigurationPair {
    /// Use the same record for both directions.
    pub fn symmetric(base: DirectionConfig) -> Self {
        Self {
            inbound: base.clone(),
            outbound: base,
        }
    }

    /// Assign a sweep combination into both directions.
    pub fn assign(&mut self, combination: &Combination) {
        for config in [&mut self.inbound, &mut self.outbound] {
            config.implementation = combination.implementation.clone();
            config.congestion_control = combination.congestion_control.clone();
            config.datagrams = combination.mode.is_datagram();
        }
    }

    /// Clear run-scoped values before a new run.
    pub fn reset_run(&mut self) {
        self.inbound.rtp_port = None;
        self.outbound.rtp_port = None;
    }

    /// Server start payload for the given relay allocation.
    pub fn start_server(&self, relay_port: u16, relay_host: &str) -> StartServer {
        let out = &self.outbound;
        StartServer {
            implementation: out.implementation.clone(),
            datagrams: out.datagrams,
            cc: out.congestion_control.clone(),
            port_out: relay_port,
            addr_out: relay_host.to_string(),
            quic_port: out.quic_port,
            quic_host: out.quic_host.clone(),
            external_file_transfer: out.external_file_transfer,
        }
    }

    /// Client start payload.
    pub fn start_client(&self) -> StartClient {
        let inb = &self.inbound;
        StartClient {
            implementation: inb.implementation.clone(),
            datagrams: inb.datagrams,
            cc: inb.congestion_control.clone(),
            quic_port: inb.quic_port,
            quic_host: inb.quic_host.clone(),
            external_file_transfer: inb.external_file_transfer,
        }
    }

    /// Experiment name for a run started at `timestamp`.
    ///
    /// `{impl}_{cc}_{dgram|stream}_{timestamp}` with spaces in the timestamp
    /// replaced by `_`, plus `_scp` when a side file is transferred.
    pub fn experiment_name(&self, timestamp: &str) -> String {
        let out = &self.outbound;
        let mut name = format!(
            "{}_{}_{}_{}",
            out.implementation,
            out.congestion_control,
            out.mode().label(),
            timestamp.trim().replace(' ', "_"),
        );
        if out.external_file_transfer {
            name.push_str(FILE_TRANSFER_SUFFIX);
        }
        name
    }

    /// Transport class label sent with the stats export.
    pub fn transport_label(&self) -> &str {
        let implementation = self.outbound.implementation.as_str();
        if implementation == "tcp" || is_connectionless(implementation) {
            implementation
        } else {
            QUIC_TRANSPORT_LABEL
        }
    }
}
