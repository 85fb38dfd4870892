//! Envelopes - the JSON wrappers for every control message.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::{Request, WireError};

/// Transaction kind carried in the `transId` field.
///
/// The same numbering is used for requests and their replies, so a reply is
/// matched to its request by kind alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum TransId {
    /// Agent start (reply carries a session `id`)
    Start = 0,
    /// Agent stop
    Stop = 1,
    /// Apply or reset link impairment
    Link = 2,
    /// Capability query (reply carries `in_impls`)
    Capabilities = 6,
    /// Push collected statistics
    Upload = 8,
    /// Remote statistics export (reply carries a `url`)
    GetStats = 9,
}

impl TransId {
    /// Short lowercase name used in logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            TransId::Start => "start",
            TransId::Stop => "stop",
            TransId::Link => "link",
            TransId::Capabilities => "capabilities",
            TransId::Upload => "upload",
            TransId::GetStats => "getstats",
        }
    }
}

impl TryFrom<u32> for TransId {
    type Error = WireError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(TransId::Start),
            1 => Ok(TransId::Stop),
            2 => Ok(TransId::Link),
            6 => Ok(TransId::Capabilities),
            8 => Ok(TransId::Upload),
            9 => Ok(TransId::GetStats),
            _ => Err(WireError::UnknownTransaction(value)),
        }
    }
}

impl fmt::Display for TransId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which end of the tunnel an agent controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentRole {
    /// The client-side agent (tunnel ingress).
    Client,
    /// The server-side agent (tunnel egress, owns the impaired link).
    Server,
}

impl AgentRole {
    /// Whether replies of this kind are expected from this agent.
    ///
    /// Link impairment, uploads and stats export are server-only; the
    /// capability query is client-only.
    pub fn accepts(&self, kind: TransId) -> bool {
        match self {
            AgentRole::Client => matches!(
                kind,
                TransId::Start | TransId::Stop | TransId::Capabilities
            ),
            AgentRole::Server => matches!(
                kind,
                TransId::Start
                    | TransId::Stop
                    | TransId::Link
                    | TransId::Upload
                    | TransId::GetStats
            ),
        }
    }

    /// Short lowercase name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            AgentRole::Client => "client",
            AgentRole::Server => "server",
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An outgoing command: `{ "cmd": ..., "transId": ..., "data": ... }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Command name (`startserver`, `link`, ...)
    pub cmd: String,
    /// Raw transaction id
    #[serde(rename = "transId")]
    pub trans_id: u32,
    /// Command payload
    pub data: Value,
}

impl Command {
    /// Build the envelope for a typed request.
    pub fn from_request<R: Request>(request: &R) -> Result<Self, WireError> {
        Ok(Self {
            cmd: R::COMMAND.to_string(),
            trans_id: R::TRANS_ID as u32,
            data: serde_json::to_value(request).map_err(WireError::Serialization)?,
        })
    }

    /// Get the transaction kind, if known.
    pub fn trans_id(&self) -> Result<TransId, WireError> {
        TransId::try_from(self.trans_id)
    }

    /// Serialize to JSON bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        serde_json::to_vec(self).map_err(WireError::Serialization)
    }

    /// Deserialize from JSON bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        serde_json::from_slice(bytes).map_err(WireError::Deserialization)
    }
}

/// Discriminator of an incoming message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncomingKind {
    /// Reply to a request
    Response,
    /// Agent-reported failure
    Error,
}

/// An incoming message: `{ "type": ..., "transId": ..., "data": ... }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incoming {
    /// Response or error
    #[serde(rename = "type")]
    pub kind: IncomingKind,
    /// Raw transaction id; agents may omit it on error messages
    #[serde(rename = "transId", default, skip_serializing_if = "Option::is_none")]
    pub trans_id: Option<u32>,
    /// Reply payload (absent payloads decode as `null`)
    #[serde(default)]
    pub data: Value,
}

impl Incoming {
    /// Build a response envelope.
    pub fn response(kind: TransId, data: Value) -> Self {
        Self {
            kind: IncomingKind::Response,
            trans_id: Some(kind as u32),
            data,
        }
    }

    /// Build an error envelope with a `message` payload.
    pub fn error(kind: TransId, message: &str) -> Self {
        Self {
            kind: IncomingKind::Error,
            trans_id: Some(kind as u32),
            data: serde_json::json!({ "message": message }),
        }
    }

    /// Get the transaction kind, if present and known.
    pub fn trans_id(&self) -> Result<TransId, WireError> {
        TransId::try_from(self.trans_id.ok_or(WireError::MissingTransaction)?)
    }

    /// Serialize to JSON bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        serde_json::to_vec(self).map_err(WireError::Serialization)
    }

    /// Deserialize from JSON bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        serde_json::from_slice(bytes).map_err(WireError::Deserialization)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Link, StopServer};
    use crate::SessionId;

    #[test]
    fn trans_id_numbering_matches_protocol() {
        for (val, kind) in [
            (0u32, TransId::Start),
            (1, TransId::Stop),
            (2, TransId::Link),
            (6, TransId::Capabilities),
            (8, TransId::Upload),
            (9, TransId::GetStats),
        ] {
            assert_eq!(TransId::try_from(val).unwrap(), kind);
            assert_eq!(kind as u32, val);
        }
    }

    #[test]
    fn unknown_trans_id_fails() {
        for val in [3u32, 4, 5, 7, 10, 255] {
            assert!(matches!(
                TransId::try_from(val),
                Err(WireError::UnknownTransaction(v)) if v == val
            ));
        }
    }

    #[test]
    fn roles_accept_their_own_replies() {
        assert!(AgentRole::Client.accepts(TransId::Capabilities));
        assert!(!AgentRole::Client.accepts(TransId::Link));
        assert!(!AgentRole::Client.accepts(TransId::GetStats));

        assert!(AgentRole::Server.accepts(TransId::Link));
        assert!(AgentRole::Server.accepts(TransId::Upload));
        assert!(!AgentRole::Server.accepts(TransId::Capabilities));

        for role in [AgentRole::Client, AgentRole::Server] {
            assert!(role.accepts(TransId::Start));
            assert!(role.accepts(TransId::Stop));
        }
    }

    #[test]
    fn command_envelope_field_names() {
        let cmd = Command::from_request(&StopServer {
            id: SessionId::new(42),
        })
        .unwrap();
        let json: Value = serde_json::from_slice(&cmd.to_bytes().unwrap()).unwrap();

        assert_eq!(json["cmd"], "stopserver");
        assert_eq!(json["transId"], 1);
        assert_eq!(json["data"]["id"], 42);
    }

    #[test]
    fn link_command_carries_triple() {
        let cmd = Command::from_request(&Link {
            bitrate: 1000,
            delay: 10,
            loss: 1,
        })
        .unwrap();

        assert_eq!(cmd.cmd, "link");
        assert_eq!(cmd.trans_id().unwrap(), TransId::Link);
        assert_eq!(
            cmd.data,
            serde_json::json!({ "bitrate": 1000, "delay": 10, "loss": 1 })
        );
    }

    #[test]
    fn incoming_parses_response() {
        let raw = br#"{"type":"response","transId":0,"data":{"id":42}}"#;
        let msg = Incoming::from_bytes(raw).unwrap();

        assert_eq!(msg.kind, IncomingKind::Response);
        assert_eq!(msg.trans_id().unwrap(), TransId::Start);
        assert_eq!(msg.data["id"], 42);
    }

    #[test]
    fn incoming_without_data_defaults_to_null() {
        let raw = br#"{"type":"response","transId":1}"#;
        let msg = Incoming::from_bytes(raw).unwrap();
        assert!(msg.data.is_null());
    }

    #[test]
    fn incoming_error_helper() {
        let msg = Incoming::error(TransId::Start, "boom");
        assert_eq!(msg.kind, IncomingKind::Error);
        assert_eq!(msg.data["message"], "boom");
    }

    #[test]
    fn error_without_trans_id_still_parses() {
        let raw = br#"{"type":"error","data":{"message":"encoder crashed"}}"#;
        let msg = Incoming::from_bytes(raw).unwrap();

        assert_eq!(msg.kind, IncomingKind::Error);
        assert_eq!(msg.trans_id, None);
        assert!(matches!(msg.trans_id(), Err(WireError::MissingTransaction)));
    }

    #[test]
    fn incoming_rejects_unknown_type() {
        let raw = br#"{"type":"event","transId":0,"data":{}}"#;
        assert!(matches!(
            Incoming::from_bytes(raw),
            Err(WireError::Deserialization(_))
        ));
    }
}
