//! Byte transports carrying agent control frames.
//!
//! A transport moves whole frames (one JSON document each) between the
//! orchestrator and one agent or the media relay. Framing is the transport's
//! job; envelopes and correlation live in [`crate::channel`].
//!
//! `send()` and `recv()` must be usable concurrently: a channel keeps a
//! reader task parked in `recv()` while requests are sent from the driver.
//!
//! # Example
//!
//! ```ignore
//! let transport = TcpTransport::new();
//! transport.connect("192.168.1.47:3334").await?;
//! transport.send(&command.to_bytes()?).await?;
//! let reply = Incoming::from_bytes(&transport.recv().await?)?;
//! ```

mod mock;
mod tcp;

pub use mock::{Fault, MockTransport, Responder};
pub use tcp::{TcpTransport, TcpTransportConfig, MAX_MESSAGE_SIZE};

use async_trait::async_trait;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer could not be reached.
    #[error("unreachable: {0}")]
    Unreachable(String),

    /// Connecting took longer than allowed.
    #[error("connect to {0} timed out")]
    ConnectTimeout(String),

    /// No connection is open.
    #[error("not connected")]
    NotConnected,

    /// The peer closed the connection.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// A frame exceeds [`MAX_MESSAGE_SIZE`].
    #[error("frame of {size} bytes exceeds the {max} byte limit")]
    FrameTooLarge {
        /// Frame size.
        size: usize,
        /// Limit.
        max: usize,
    },

    /// Writing a frame failed.
    #[error("write failed: {0}")]
    WriteFailed(String),

    /// Reading a frame failed.
    #[error("read failed: {0}")]
    ReadFailed(String),
}

/// Frame transport to one peer.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a connection to `host:port`, replacing any open one.
    async fn connect(&self, address: &str) -> Result<(), TransportError>;

    /// Send one frame.
    async fn send(&self, data: &[u8]) -> Result<(), TransportError>;

    /// Wait for the next frame or for the connection to end.
    async fn recv(&self) -> Result<Vec<u8>, TransportError>;

    /// Whether a connection is open.
    fn is_connected(&self) -> bool;

    /// Close the connection; a parked `recv()` ends with `ConnectionClosed`.
    async fn close(&self) -> Result<(), TransportError>;
}
