//! # tunnel-client
//!
//! Agent channels and the experiment orchestrator for tunnel-bench.
//!
//! The orchestrator drives two remote agents (one per tunnel end) over
//! length-prefixed JSON control channels, impairs the link between them on a
//! schedule, and sweeps every advertised implementation, delivery mode and
//! congestion-control combination.
//!
//! ## Features
//!
//! - **Request/response correlation**: one pending request per transaction kind
//! - **Transport Abstraction**: Pluggable transport layer (tcp, mock)
//! - **Pure State Machine**: Uses tunnel-core for side-effect-free lifecycle logic
//! - **Collaborator traits**: relay, media pipeline and artifact handoff are swappable
//!
//! ## Example
//!
//! ```ignore
//! use tunnel_client::{ControlChannel, Orchestrator, TcpTransport};
//!
//! let client = ControlChannel::new(AgentRole::Client, "192.168.1.33", 3333, TcpTransport::new());
//! let server = ControlChannel::new(AgentRole::Server, "192.168.1.47", 3334, TcpTransport::new());
//! let mut orchestrator = Orchestrator::new(client, server, configuration, collaborators);
//!
//! orchestrator.connect().await?;
//! orchestrator.query_capabilities().await?;
//! let report = orchestrator.sweep(1, &schedule).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod artifacts;
pub mod channel;
pub mod media;
pub mod orchestrator;
pub mod relay;
pub mod transport;

pub use artifacts::{result_name, ArtifactCollector, ArtifactError, ArtifactLabels, ShellArtifactCollector};
pub use channel::{ChannelConfig, ChannelError, ControlChannel};
pub use media::{HeadlessMedia, MediaError, MediaPipeline, MIN_SAMPLE_INTERVAL};
pub use orchestrator::{Collaborators, Orchestrator, OrchestratorError, RunSummary};
pub use relay::{ProbeRelayClient, RelayConfig, RelayError, RelayService};
pub use transport::{
    Fault, MockTransport, Responder, TcpTransport, TcpTransportConfig, Transport, TransportError,
    MAX_MESSAGE_SIZE,
};
