//! Command/response channel to one remote agent.
//!
//! A [`ControlChannel`] wraps a [`Transport`] and correlates replies with the
//! requests awaiting them. Each transaction kind has at most one outstanding
//! request per channel; the reply resolves a one-shot completion registered
//! under that kind.
//!
//! A reader task owns the receive side. It is the only place replies are
//! routed from:
//! - `"response"` resolves the pending request of that kind, if any
//! - `"error"` fails the pending request of that kind with [`ChannelError::Remote`]
//! - a transaction id this agent never answers is fatal: every pending
//!   request fails and the reader stops

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use tunnel_types::{
    AgentRole, Command, ErrorReply, Incoming, IncomingKind, Reply, Request, SessionId, TransId,
    WireError,
};

use crate::transport::{Transport, TransportError};

/// Channel errors.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Encoding or decoding failed.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// No reply within the configured timeout.
    #[error("{kind} timed out after {after:?}")]
    Timeout {
        /// Operation that timed out.
        kind: &'static str,
        /// Configured limit.
        after: Duration,
    },

    /// A request of the same kind is already outstanding.
    #[error("a {kind} request is already pending")]
    Busy {
        /// Request kind.
        kind: &'static str,
    },

    /// The agent answered with an `"error"` message.
    #[error("agent reported {kind} error: {message}")]
    Remote {
        /// Request kind.
        kind: &'static str,
        /// Agent-provided reason.
        message: String,
    },

    /// The agent sent a transaction id it never answers.
    #[error("unexpected transaction id {trans_id} from {role} agent")]
    UnexpectedTransaction {
        /// Channel role.
        role: AgentRole,
        /// Raw transaction id.
        trans_id: u32,
    },

    /// The channel closed while a request was pending.
    #[error("channel disconnected")]
    Disconnected,

    /// The channel is not connected.
    #[error("not connected")]
    NotConnected,
}

/// Timeouts for a [`ControlChannel`].
#[derive(Debug, Clone, Copy)]
pub struct ChannelConfig {
    /// Limit for the transport connect.
    pub connect_timeout: Duration,
    /// Limit for each request/reply round trip.
    pub request_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

type Completion = oneshot::Sender<Result<Value, ChannelError>>;

/// Requests awaiting a reply, keyed by transaction kind.
#[derive(Clone, Default)]
struct PendingTable {
    slots: Arc<Mutex<HashMap<TransId, Completion>>>,
}

impl PendingTable {
    fn lock(&self) -> MutexGuard<'_, HashMap<TransId, Completion>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, kind: TransId) -> Result<oneshot::Receiver<Result<Value, ChannelError>>, ChannelError> {
        let mut slots = self.lock();
        if slots.contains_key(&kind) {
            return Err(ChannelError::Busy { kind: kind.name() });
        }
        let (tx, rx) = oneshot::channel();
        slots.insert(kind, tx);
        Ok(rx)
    }

    fn take(&self, kind: TransId) -> Option<Completion> {
        self.lock().remove(&kind)
    }

    fn fail_all(&self, error: impl Fn() -> ChannelError) {
        let drained: Vec<_> = self.lock().drain().collect();
        for (_, tx) in drained {
            let _ = tx.send(Err(error()));
        }
    }

    fn len(&self) -> usize {
        self.lock().len()
    }
}

/// What the reader does after routing a message.
enum Routing {
    Continue,
    Fatal,
}

/// Logical command/response connection to one agent.
pub struct ControlChannel<T: Transport> {
    role: AgentRole,
    host: String,
    port: u16,
    transport: Arc<T>,
    pending: PendingTable,
    session: Option<SessionId>,
    reader: Option<JoinHandle<()>>,
    config: ChannelConfig,
}

impl<T: Transport + 'static> ControlChannel<T> {
    /// Create an unconnected channel.
    pub fn new(role: AgentRole, host: impl Into<String>, port: u16, transport: T) -> Self {
        Self::with_config(role, host, port, transport, ChannelConfig::default())
    }

    /// Create an unconnected channel with custom timeouts.
    pub fn with_config(
        role: AgentRole,
        host: impl Into<String>,
        port: u16,
        transport: T,
        config: ChannelConfig,
    ) -> Self {
        Self {
            role,
            host: host.into(),
            port,
            transport: Arc::new(transport),
            pending: PendingTable::default(),
            session: None,
            reader: None,
            config,
        }
    }

    /// Which agent this channel talks to.
    pub fn role(&self) -> AgentRole {
        self.role
    }

    /// `host:port` of the agent.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// True once connected and the reader is running.
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
            && self.reader.as_ref().is_some_and(|reader| !reader.is_finished())
    }

    /// Session id from the agent's last start acknowledgement.
    pub fn session_id(&self) -> Option<SessionId> {
        self.session
    }

    /// Record the session id assigned by the agent.
    pub fn set_session_id(&mut self, session: SessionId) {
        self.session = Some(session);
    }

    /// Forget the session id once the agent confirmed the stop.
    pub fn clear_session_id(&mut self) -> Option<SessionId> {
        self.session.take()
    }

    /// Number of requests awaiting a reply.
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// Open the transport and start routing replies.
    pub async fn connect(&mut self) -> Result<(), ChannelError> {
        let address = self.address();
        let limit = self.config.connect_timeout;

        tokio::time::timeout(limit, self.transport.connect(&address))
            .await
            .map_err(|_| ChannelError::Timeout {
                kind: "connect",
                after: limit,
            })??;

        if let Some(old) = self.reader.take() {
            old.abort();
        }
        self.reader = Some(tokio::spawn(read_loop(
            self.role,
            Arc::clone(&self.transport),
            self.pending.clone(),
        )));

        tracing::info!(role = %self.role, %address, "agent channel connected");
        Ok(())
    }

    /// Close the transport. Pending requests fail with `Disconnected`.
    pub async fn disconnect(&mut self) -> Result<(), ChannelError> {
        let result = self.transport.close().await;
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.pending.fail_all(|| ChannelError::Disconnected);
        tracing::info!(role = %self.role, "agent channel disconnected");
        Ok(result?)
    }

    /// Send a command without waiting for a reply.
    pub async fn send<R: Request + Sync>(&self, request: &R) -> Result<(), ChannelError> {
        self.send_command(&Command::from_request(request)?).await
    }

    /// Send a raw `{cmd, transId, data}` command.
    pub async fn send_raw(&self, cmd: &str, kind: TransId, data: Value) -> Result<(), ChannelError> {
        self.send_command(&Command {
            cmd: cmd.to_string(),
            trans_id: kind as u32,
            data,
        })
        .await
    }

    async fn send_command(&self, command: &Command) -> Result<(), ChannelError> {
        if !self.is_connected() {
            return Err(ChannelError::NotConnected);
        }
        let bytes = command.to_bytes()?;
        tracing::debug!(role = %self.role, cmd = %command.cmd, trans_id = command.trans_id, "sending command");
        self.transport.send(&bytes).await?;
        Ok(())
    }

    /// Send a command and wait for the reply payload.
    pub async fn request_value<R: Request + Sync>(&self, request: &R) -> Result<Value, ChannelError> {
        let kind = R::TRANS_ID;
        let rx = self.pending.register(kind)?;

        if let Err(e) = self.send(request).await {
            self.pending.take(kind);
            return Err(e);
        }

        let limit = self.config.request_timeout;
        match tokio::time::timeout(limit, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ChannelError::Disconnected),
            Err(_) => {
                self.pending.take(kind);
                tracing::warn!(role = %self.role, kind = kind.name(), "request timed out");
                Err(ChannelError::Timeout {
                    kind: kind.name(),
                    after: limit,
                })
            }
        }
    }

    /// Send a command and decode the typed reply.
    pub async fn request<R, P>(&self, request: &R) -> Result<P, ChannelError>
    where
        R: Request + Sync,
        P: Reply,
    {
        let data = self.request_value(request).await?;
        Ok(P::from_data(data)?)
    }
}

impl<T: Transport> Drop for ControlChannel<T> {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

async fn read_loop<T: Transport>(role: AgentRole, transport: Arc<T>, pending: PendingTable) {
    loop {
        let bytes = match transport.recv().await {
            Ok(bytes) => bytes,
            Err(TransportError::ConnectionClosed) | Err(TransportError::NotConnected) => {
                tracing::debug!(role = %role, "agent connection closed");
                break;
            }
            Err(e) => {
                tracing::warn!(role = %role, error = %e, "agent receive failed");
                break;
            }
        };

        let incoming = match Incoming::from_bytes(&bytes) {
            Ok(incoming) => incoming,
            Err(e) => {
                tracing::warn!(role = %role, error = %e, "dropping malformed agent message");
                continue;
            }
        };

        if let Routing::Fatal = route(role, &pending, incoming) {
            return;
        }
    }

    pending.fail_all(|| ChannelError::Disconnected);
}

fn route(role: AgentRole, pending: &PendingTable, incoming: Incoming) -> Routing {
    match incoming.kind {
        IncomingKind::Error => {
            let message = ErrorReply::message_of(&incoming.data);
            match incoming.trans_id() {
                Ok(kind) => {
                    tracing::error!(role = %role, kind = kind.name(), %message, "agent reported error");
                    if let Some(tx) = pending.take(kind) {
                        let _ = tx.send(Err(ChannelError::Remote {
                            kind: kind.name(),
                            message,
                        }));
                    }
                }
                Err(_) => {
                    let trans_id = incoming.trans_id;
                    tracing::error!(role = %role, ?trans_id, %message, "agent reported error");
                }
            }
            Routing::Continue
        }
        IncomingKind::Response => route_response(role, pending, incoming),
    }
}

fn route_response(role: AgentRole, pending: &PendingTable, incoming: Incoming) -> Routing {
    let Some(trans_id) = incoming.trans_id else {
        tracing::warn!(role = %role, "dropping response without transaction id");
        return Routing::Continue;
    };

    let kind = match incoming.trans_id() {
        Ok(kind) if role.accepts(kind) => kind,
        _ => {
            tracing::error!(role = %role, trans_id, "unexpected transaction id, closing channel");
            pending.fail_all(|| ChannelError::UnexpectedTransaction { role, trans_id });
            return Routing::Fatal;
        }
    };

    match pending.take(kind) {
        Some(tx) => {
            let _ = tx.send(Ok(incoming.data));
        }
        None => {
            tracing::debug!(role = %role, kind = kind.name(), "acknowledgement without pending request");
        }
    }
    Routing::Continue
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Fault, MockTransport};
    use serde_json::json;
    use tunnel_types::{
        CapabilitiesQuery, CapabilitiesReply, Link, StartAck, StartServer,
    };

    fn start_server() -> StartServer {
        StartServer {
            implementation: "mvfst".into(),
            datagrams: false,
            cc: "newreno".into(),
            port_out: 40000,
            addr_out: "127.0.0.1".into(),
            quic_port: 8888,
            quic_host: "127.0.0.1".into(),
            external_file_transfer: false,
        }
    }

    fn reply(incoming: Incoming) -> Vec<u8> {
        incoming.to_bytes().unwrap()
    }

    fn sent_commands(transport: &MockTransport) -> Vec<Command> {
        transport
            .sent()
            .iter()
            .map(|bytes| Command::from_bytes(bytes).unwrap())
            .collect()
    }

    async fn connected(role: AgentRole, transport: MockTransport) -> ControlChannel<MockTransport> {
        let mut channel = ControlChannel::with_config(
            role,
            "127.0.0.1",
            3334,
            transport,
            ChannelConfig {
                connect_timeout: Duration::from_secs(1),
                request_timeout: Duration::from_secs(5),
            },
        );
        channel.connect().await.unwrap();
        channel
    }

    // ===== Connect / send =====

    #[tokio::test]
    async fn connect_uses_host_and_port() {
        let transport = MockTransport::new();
        let channel = connected(AgentRole::Server, transport.clone()).await;

        assert!(channel.is_connected());
        assert_eq!(transport.peer(), Some("127.0.0.1:3334".into()));
    }

    #[tokio::test]
    async fn connect_failure_is_reported() {
        let transport = MockTransport::new();
        transport.inject(Fault::Connect, "refused");
        let mut channel = ControlChannel::new(AgentRole::Client, "127.0.0.1", 3333, transport);

        let result = channel.connect().await;
        assert!(matches!(result, Err(ChannelError::Transport(TransportError::Unreachable(_)))));
        assert!(!channel.is_connected());
    }

    #[tokio::test]
    async fn send_before_connect_fails() {
        let channel = ControlChannel::new(AgentRole::Server, "h", 1, MockTransport::new());
        let result = channel.send(&Link { bitrate: 1, delay: 0, loss: 0 }).await;
        assert!(matches!(result, Err(ChannelError::NotConnected)));
    }

    #[tokio::test]
    async fn send_writes_envelope() {
        let transport = MockTransport::new();
        let channel = connected(AgentRole::Server, transport.clone()).await;

        channel
            .send(&Link {
                bitrate: 1000,
                delay: 10,
                loss: 1,
            })
            .await
            .unwrap();

        let sent = sent_commands(&transport);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].cmd, "link");
        assert_eq!(sent[0].trans_id, 2);
        assert_eq!(sent[0].data, json!({ "bitrate": 1000, "delay": 10, "loss": 1 }));
    }

    #[tokio::test]
    async fn send_raw_passes_payload_through() {
        let transport = MockTransport::new();
        let channel = connected(AgentRole::Server, transport.clone()).await;

        channel.send_raw("link", TransId::Link, json!({})).await.unwrap();
        assert_eq!(sent_commands(&transport)[0].data, json!({}));
    }

    // ===== Request / reply correlation =====

    #[tokio::test]
    async fn request_resolves_with_reply() {
        let transport = MockTransport::with_responder(|_| {
            vec![reply(Incoming::response(TransId::Start, json!({ "id": 42 })))]
        });
        let channel = connected(AgentRole::Server, transport).await;

        let ack: StartAck = channel.request(&start_server()).await.unwrap();
        assert_eq!(ack.id, SessionId::new(42));
        assert_eq!(channel.pending_requests(), 0);
    }

    #[tokio::test]
    async fn capabilities_reply_decodes() {
        let transport = MockTransport::with_responder(|_| {
            vec![reply(Incoming::response(
                TransId::Capabilities,
                json!({ "in_impls": [{ "impl": "quiche", "datagrams": true, "streams": true, "cc": ["cubic"] }] }),
            ))]
        });
        let channel = connected(AgentRole::Client, transport).await;

        let caps: CapabilitiesReply = channel
            .request(&CapabilitiesQuery::inbound_only())
            .await
            .unwrap();
        assert_eq!(caps.in_impls[0].implementation, "quiche");
    }

    #[tokio::test(start_paused = true)]
    async fn request_without_reply_times_out() {
        let transport = MockTransport::new();
        let channel = connected(AgentRole::Server, transport).await;

        let result = channel.request_value(&start_server()).await;
        assert!(matches!(result, Err(ChannelError::Timeout { kind: "start", .. })));
        assert_eq!(channel.pending_requests(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn second_request_of_same_kind_is_busy() {
        let transport = MockTransport::new();
        let channel = Arc::new(connected(AgentRole::Server, transport.clone()).await);

        let first = {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move { channel.request_value(&start_server()).await })
        };
        tokio::task::yield_now().await;
        assert_eq!(channel.pending_requests(), 1);

        let busy = channel.request_value(&start_server()).await;
        assert!(matches!(busy, Err(ChannelError::Busy { kind: "start" })));

        transport.push_reply(reply(Incoming::response(TransId::Start, json!({ "id": 1 }))));
        assert!(first.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn send_failure_releases_slot() {
        let transport = MockTransport::new();
        let channel = connected(AgentRole::Server, transport.clone()).await;
        transport.inject(Fault::Send, "broken pipe");

        let result = channel.request_value(&start_server()).await;
        assert!(matches!(result, Err(ChannelError::Transport(TransportError::WriteFailed(_)))));
        assert_eq!(channel.pending_requests(), 0);
    }

    // ===== Incoming dispatch =====

    #[tokio::test]
    async fn error_message_fails_pending_request() {
        let transport = MockTransport::with_responder(|_| {
            vec![reply(Incoming::error(TransId::Start, "port in use"))]
        });
        let channel = connected(AgentRole::Server, transport).await;

        let result = channel.request_value(&start_server()).await;
        match result {
            Err(ChannelError::Remote { kind, message }) => {
                assert_eq!(kind, "start");
                assert_eq!(message, "port in use");
            }
            other => panic!("expected remote error, got {other:?}"),
        }
        assert!(channel.is_connected());
    }

    #[tokio::test]
    async fn unexpected_transaction_is_fatal() {
        // Capabilities are only ever answered by the client agent.
        let transport = MockTransport::with_responder(|_| {
            vec![reply(Incoming::response(TransId::Capabilities, json!({})))]
        });
        let channel = connected(AgentRole::Server, transport).await;

        let result = channel.request_value(&start_server()).await;
        assert!(matches!(
            result,
            Err(ChannelError::UnexpectedTransaction {
                role: AgentRole::Server,
                trans_id: 6
            })
        ));
        tokio::task::yield_now().await;
        assert!(!channel.is_connected());
    }

    #[tokio::test]
    async fn error_for_foreign_transaction_keeps_channel_open() {
        let transport = MockTransport::with_responder(|frame| {
            let command = Command::from_bytes(frame).unwrap();
            if command.cmd == "startserver" {
                vec![reply(Incoming::response(TransId::Start, json!({ "id": 3 })))]
            } else {
                Vec::new()
            }
        });
        let channel = connected(AgentRole::Server, transport.clone()).await;

        transport.push_reply(br#"{"type":"error","transId":6,"data":{"message":"boom"}}"#.to_vec());
        transport.push_reply(br#"{"type":"error","transId":77,"data":{"message":"boom"}}"#.to_vec());
        transport.push_reply(br#"{"type":"error","data":{"message":"encoder crashed"}}"#.to_vec());
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }

        assert!(channel.is_connected());
        channel.send(&Link { bitrate: 1000, delay: 0, loss: 0 }).await.unwrap();

        let ack: StartAck = channel.request(&start_server()).await.unwrap();
        assert_eq!(ack.id.value(), 3);
        assert_eq!(sent_commands(&transport).len(), 2);
    }

    #[tokio::test]
    async fn unknown_transaction_id_is_fatal() {
        let transport = MockTransport::with_responder(|_| {
            vec![br#"{"type":"response","transId":77,"data":{}}"#.to_vec()]
        });
        let channel = connected(AgentRole::Client, transport).await;

        let result = channel
            .request_value(&CapabilitiesQuery::inbound_only())
            .await;
        assert!(matches!(
            result,
            Err(ChannelError::UnexpectedTransaction { trans_id: 77, .. })
        ));
    }

    #[tokio::test]
    async fn malformed_message_is_skipped() {
        let transport = MockTransport::with_responder(|_| {
            vec![
                b"not json".to_vec(),
                reply(Incoming::response(TransId::Start, json!({ "id": 5 }))),
            ]
        });
        let channel = connected(AgentRole::Server, transport).await;

        let ack: StartAck = channel.request(&start_server()).await.unwrap();
        assert_eq!(ack.id.value(), 5);
    }

    #[tokio::test]
    async fn bad_payload_is_wire_error() {
        let transport = MockTransport::with_responder(|_| {
            vec![reply(Incoming::response(TransId::Start, json!({ "session": 5 })))]
        });
        let channel = connected(AgentRole::Server, transport).await;

        let result: Result<StartAck, _> = channel.request(&start_server()).await;
        assert!(matches!(
            result,
            Err(ChannelError::Wire(WireError::InvalidPayload { kind: "start", .. }))
        ));
    }

    // ===== Disconnect =====

    #[tokio::test]
    async fn agent_hang_up_fails_pending_request() {
        let transport = MockTransport::new();
        let channel = Arc::new(connected(AgentRole::Server, transport.clone()).await);

        let waiter = {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move { channel.request_value(&start_server()).await })
        };
        tokio::task::yield_now().await;

        transport.hang_up();
        assert!(matches!(
            waiter.await.unwrap(),
            Err(ChannelError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn disconnect_closes_transport() {
        let transport = MockTransport::new();
        let mut channel = connected(AgentRole::Client, transport.clone()).await;

        channel.disconnect().await.unwrap();
        assert!(!channel.is_connected());
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn session_id_bookkeeping() {
        let mut channel = ControlChannel::new(AgentRole::Server, "h", 1, MockTransport::new());
        assert_eq!(channel.session_id(), None);

        channel.set_session_id(SessionId::new(42));
        assert_eq!(channel.session_id(), Some(SessionId::new(42)));
        assert_eq!(channel.clear_session_id(), Some(SessionId::new(42)));
        assert_eq!(channel.session_id(), None);
    }
}
