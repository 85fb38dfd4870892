//! # tunnel-types
//!
//! Wire format types for the tunnel-bench agent control protocol.
//!
//! This crate provides the foundational types used across all tunnel-bench crates:
//! - [`Command`], [`Incoming`] - JSON envelopes exchanged with remote agents
//! - [`TransId`], [`AgentRole`] - Transaction kinds and which agent answers them
//! - [`Request`] and the typed payloads (`StartServer`, `Link`, `GetStats`, ...)
//! - [`SessionId`] - Agent-assigned session identifier
//! - [`WireError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod envelope;
mod error;
mod ids;
mod messages;

pub use envelope::{AgentRole, Command, Incoming, IncomingKind, TransId};
pub use error::WireError;
pub use ids::SessionId;
pub use messages::{
    CapabilitiesQuery, CapabilitiesReply, CapabilityRecord, ErrorReply, GetStats,
    GetStatsReply, Link, LinkReset, Reply, Request, StartAck, StartClient, StartServer, StatRecord,
    StopClient, StopServer, UploadStats,
};
