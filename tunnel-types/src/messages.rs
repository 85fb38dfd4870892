//! Typed payloads for the agent control protocol.
//!
//! These are the `data` objects carried inside [`Command`](crate::Command)
//! and [`Incoming`](crate::Incoming) envelopes.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{SessionId, TransId, WireError};

/// A request payload with a fixed command name and transaction kind.
pub trait Request: Serialize {
    /// Command name sent in the `cmd` field.
    const COMMAND: &'static str;
    /// Transaction kind sent in the `transId` field.
    const TRANS_ID: TransId;
}

/// A reply payload decoded from an incoming `data` object.
pub trait Reply: DeserializeOwned {
    /// Transaction kind this reply answers.
    const TRANS_ID: TransId;

    /// Decode the payload, reporting the request kind on failure.
    fn from_data(data: Value) -> Result<Self, WireError> {
        serde_json::from_value(data).map_err(|e| WireError::InvalidPayload {
            kind: Self::TRANS_ID.name(),
            reason: e.to_string(),
        })
    }
}

/// Start the server-side agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartServer {
    /// Transport implementation under test
    #[serde(rename = "impl")]
    pub implementation: String,
    /// Datagram (true) or stream (false) delivery
    pub datagrams: bool,
    /// Congestion-control algorithm
    pub cc: String,
    /// RTP relay port the server forwards media to
    pub port_out: u16,
    /// RTP relay address the server forwards media to
    pub addr_out: String,
    /// Tunnel listening port
    pub quic_port: u16,
    /// Tunnel listening host
    pub quic_host: String,
    /// Transfer a side file over the tunnel during the run
    pub external_file_transfer: bool,
}

impl Request for StartServer {
    const COMMAND: &'static str = "startserver";
    const TRANS_ID: TransId = TransId::Start;
}

/// Start the client-side agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartClient {
    /// Transport implementation under test
    #[serde(rename = "impl")]
    pub implementation: String,
    /// Datagram (true) or stream (false) delivery
    pub datagrams: bool,
    /// Congestion-control algorithm
    pub cc: String,
    /// Tunnel server port
    pub quic_port: u16,
    /// Tunnel server host
    pub quic_host: String,
    /// Transfer a side file over the tunnel during the run
    pub external_file_transfer: bool,
}

impl Request for StartClient {
    const COMMAND: &'static str = "startclient";
    const TRANS_ID: TransId = TransId::Start;
}

/// Stop the server-side agent session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopServer {
    /// Session id from the server's start acknowledgement
    pub id: SessionId,
}

impl Request for StopServer {
    const COMMAND: &'static str = "stopserver";
    const TRANS_ID: TransId = TransId::Stop;
}

/// Stop the client-side agent session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopClient {
    /// Session id from the client's start acknowledgement
    pub id: SessionId,
}

impl Request for StopClient {
    const COMMAND: &'static str = "stopclient";
    const TRANS_ID: TransId = TransId::Stop;
}

/// Apply a link impairment on the server side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    /// Bitrate cap in kbps
    pub bitrate: u32,
    /// Added one-way delay in milliseconds
    pub delay: u32,
    /// Packet loss in percent
    pub loss: u32,
}

impl Request for Link {
    const COMMAND: &'static str = "link";
    const TRANS_ID: TransId = TransId::Link;
}

/// Reset the link to its unimpaired default. Serializes as `{}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkReset {}

impl Request for LinkReset {
    const COMMAND: &'static str = "link";
    const TRANS_ID: TransId = TransId::Link;
}

/// Ask an agent which implementations it supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitiesQuery {
    /// Request the outbound side's implementations
    pub out_requested: bool,
    /// Request the inbound side's implementations
    pub in_requested: bool,
}

impl CapabilitiesQuery {
    /// Query for the inbound side only.
    pub fn inbound_only() -> Self {
        Self {
            out_requested: false,
            in_requested: true,
        }
    }
}

impl Request for CapabilitiesQuery {
    const COMMAND: &'static str = "capabilities";
    const TRANS_ID: TransId = TransId::Capabilities;
}

/// One second of receiver-side media statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatRecord {
    /// Sample index (seconds since the run started)
    #[serde(rename = "x")]
    pub sample_index: u32,
    /// Achieved bitrate in kbps
    #[serde(rename = "bitrate")]
    pub bitrate_kbps: u32,
    /// Link bitrate target in effect for this sample
    #[serde(rename = "link")]
    pub link_bitrate: u32,
    /// Frames per second
    pub fps: u32,
    /// Frames dropped
    #[serde(rename = "frameDropped")]
    pub frames_dropped: u32,
    /// Frames decoded
    #[serde(rename = "frameDecoded")]
    pub frames_decoded: u32,
    /// Key frames decoded
    #[serde(rename = "keyFrameDecoded")]
    pub key_frames_decoded: u32,
    /// Frames rendered
    #[serde(rename = "frameRendered")]
    pub frames_rendered: u32,
}

/// Push collected statistics to the server agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadStats {
    /// Per-second records of the run
    pub stats: Vec<StatRecord>,
}

impl Request for UploadStats {
    const COMMAND: &'static str = "uploadstats";
    const TRANS_ID: TransId = TransId::Upload;
}

/// Ask the server agent to export the run's statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetStats {
    /// Experiment name
    pub exp_name: String,
    /// Transport class label (`tcp`, `udp` or `quic`)
    pub transport: String,
    /// Where the relay service published its measurement dump
    #[serde(rename = "medooze_dump_url")]
    pub dump_url: String,
}

impl Request for GetStats {
    const COMMAND: &'static str = "getstats";
    const TRANS_ID: TransId = TransId::GetStats;
}

/// Start acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartAck {
    /// Session id to echo in the stop request
    pub id: SessionId,
}

impl Reply for StartAck {
    const TRANS_ID: TransId = TransId::Start;
}

/// One advertised implementation as sent on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityRecord {
    /// Implementation name
    #[serde(rename = "impl")]
    pub implementation: String,
    /// Supports datagram delivery
    pub datagrams: bool,
    /// Supports stream delivery
    pub streams: bool,
    /// Congestion-control algorithms
    #[serde(default)]
    pub cc: Vec<String>,
}

/// Capability query reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitiesReply {
    /// Inbound-side implementations
    pub in_impls: Vec<CapabilityRecord>,
}

impl Reply for CapabilitiesReply {
    const TRANS_ID: TransId = TransId::Capabilities;
}

/// Statistics export reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetStatsReply {
    /// Location of the exported results
    pub url: String,
}

impl Reply for GetStatsReply {
    const TRANS_ID: TransId = TransId::GetStats;
}

/// Payload of an `"error"` message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReply {
    /// Human-readable reason
    #[serde(default)]
    pub message: String,
}

impl ErrorReply {
    /// Extract the message from an error payload, tolerating odd shapes.
    pub fn message_of(data: &Value) -> String {
        match data {
            Value::Object(map) => match map.get("message") {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => data.to_string(),
            },
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}
