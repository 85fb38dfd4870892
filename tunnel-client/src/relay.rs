//! Bandwidth-probing media relay.
//!
//! The relay hands out the RTP port the server agent forwards media to,
//! answers the local media offer, and publishes the location of its
//! measurement dump once a run ends.
//!
//! [`ProbeRelayClient`] speaks the relay's JSON command protocol over two
//! transports: a short-lived one per port allocation and a session one that
//! stays open between `begin` and `end`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::transport::{Transport, TransportError};

/// Relay errors.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The relay sent something we cannot use.
    #[error("relay protocol error: {0}")]
    Protocol(String),

    /// No answer within the configured timeout.
    #[error("relay did not answer {0} in time")]
    Timeout(&'static str),

    /// `begin` was not called.
    #[error("relay session not started")]
    NotStarted,
}

/// Media relay collaborator.
#[async_trait]
pub trait RelayService: Send + Sync {
    /// Open the relay session.
    async fn begin(&mut self) -> Result<(), RelayError>;

    /// Close the relay session.
    async fn end(&mut self) -> Result<(), RelayError>;

    /// Ask the relay for an RTP port for this run.
    async fn allocate_relay_port(&mut self) -> Result<u16, RelayError>;

    /// Hand the local media offer to the relay and return its answer.
    async fn render_offer(&mut self, offer: &str) -> Result<String, RelayError>;

    /// Where the relay published its measurement dump, once known.
    fn dump_url(&self) -> Option<String>;

    /// Relay address the server agent sends media to.
    fn host(&self) -> &str;
}

/// Settings for [`ProbeRelayClient`].
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Relay host
    pub host: String,
    /// Relay command port
    pub port: u16,
    /// Probe for available bandwidth while viewing
    pub probing: bool,
    /// Probing bitrate in kbps
    pub probing_bitrate: u32,
    /// Limit for every relay round trip
    pub timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "192.168.1.47".into(),
            port: 8084,
            probing: true,
            probing_bitrate: 2000,
            timeout: Duration::from_secs(10),
        }
    }
}

impl RelayConfig {
    fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The `view` command for an offer.
    fn view_command(&self, offer: &str) -> Value {
        json!({
            "cmd": "view",
            "offer": offer,
            "probing": if self.probing { self.probing_bitrate } else { 0 },
            "constant_probing": self.probing_bitrate,
        })
    }
}

#[derive(Default)]
struct SessionState {
    answer: Option<oneshot::Sender<String>>,
    dump_url: Option<String>,
}

type SharedSession = Arc<Mutex<SessionState>>;

fn lock(state: &SharedSession) -> MutexGuard<'_, SessionState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Relay client over the relay's JSON command protocol.
pub struct ProbeRelayClient<T: Transport> {
    config: RelayConfig,
    session: Arc<T>,
    port_transport: T,
    state: SharedSession,
    reader: Option<JoinHandle<()>>,
}

impl<T: Transport + 'static> ProbeRelayClient<T> {
    /// Create a client. `session` carries `view`/answers, `port_transport`
    /// is used for one connection per port allocation.
    pub fn new(config: RelayConfig, session: T, port_transport: T) -> Self {
        Self {
            config,
            session: Arc::new(session),
            port_transport,
            state: SharedSession::default(),
            reader: None,
        }
    }

    /// Relay settings.
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    async fn query_port(&self) -> Result<u16, RelayError> {
        let transport = &self.port_transport;
        transport.connect(&self.config.address()).await?;

        let request = serde_json::to_vec(&json!({ "cmd": "port" }))
            .map_err(|e| RelayError::Protocol(e.to_string()))?;
        transport.send(&request).await?;
        let reply = transport.recv().await;
        transport.close().await.ok();

        let reply: Value =
            serde_json::from_slice(&reply?).map_err(|e| RelayError::Protocol(e.to_string()))?;
        reply
            .get("port")
            .and_then(Value::as_u64)
            .and_then(|port| u16::try_from(port).ok())
            .ok_or_else(|| RelayError::Protocol(format!("no usable port in {reply}")))
    }
}

#[async_trait]
impl<T: Transport + 'static> RelayService for ProbeRelayClient<T> {
    async fn begin(&mut self) -> Result<(), RelayError> {
        let address = self.config.address();
        tracing::debug!("relay session opening to {}", address);

        tokio::time::timeout(self.config.timeout, self.session.connect(&address))
            .await
            .map_err(|_| RelayError::Timeout("connect"))??;

        if let Some(old) = self.reader.take() {
            old.abort();
        }
        lock(&self.state).dump_url = None;
        self.reader = Some(tokio::spawn(read_session(
            Arc::clone(&self.session),
            Arc::clone(&self.state),
        )));
        Ok(())
    }

    async fn end(&mut self) -> Result<(), RelayError> {
        let result = self.session.close().await;
        if let Some(mut reader) = self.reader.take() {
            // Let the reader pick up a trailing dump url before it stops.
            if tokio::time::timeout(Duration::from_millis(200), &mut reader).await.is_err() {
                tracing::debug!("relay reader did not finish after close, aborting");
                // The parked reader holds the transport's read half.
                reader.abort();
                let _ = reader.await;
            }
        }
        lock(&self.state).answer = None;
        tracing::debug!("relay session closed");
        Ok(result?)
    }

    async fn allocate_relay_port(&mut self) -> Result<u16, RelayError> {
        let port = tokio::time::timeout(self.config.timeout, self.query_port())
            .await
            .map_err(|_| RelayError::Timeout("port"))??;
        tracing::info!("relay allocated RTP port {}", port);
        Ok(port)
    }

    async fn render_offer(&mut self, offer: &str) -> Result<String, RelayError> {
        if self.reader.is_none() {
            return Err(RelayError::NotStarted);
        }

        let (tx, rx) = oneshot::channel();
        lock(&self.state).answer = Some(tx);

        let command = serde_json::to_vec(&self.config.view_command(offer))
            .map_err(|e| RelayError::Protocol(e.to_string()))?;
        self.session.send(&command).await?;

        match tokio::time::timeout(self.config.timeout, rx).await {
            Ok(Ok(answer)) => Ok(answer),
            Ok(Err(_)) => Err(RelayError::Protocol("session closed before answer".into())),
            Err(_) => {
                lock(&self.state).answer = None;
                Err(RelayError::Timeout("view"))
            }
        }
    }

    fn dump_url(&self) -> Option<String> {
        lock(&self.state).dump_url.clone()
    }

    fn host(&self) -> &str {
        &self.config.host
    }
}

impl<T: Transport> Drop for ProbeRelayClient<T> {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

async fn read_session<T: Transport>(transport: Arc<T>, state: SharedSession) {
    while let Ok(bytes) = transport.recv().await {
        let message: Value = match serde_json::from_slice(&bytes) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("dropping malformed relay message: {}", e);
                continue;
            }
        };

        let mut session = lock(&state);
        if let Some(url) = message.get("url").and_then(Value::as_str) {
            tracing::debug!("relay dump published at {}", url);
            session.dump_url = Some(url.to_string());
        }
        if let Some(answer) = message.get("answer") {
            let answer = match answer {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            match session.answer.take() {
                Some(tx) => {
                    let _ = tx.send(answer);
                }
                None => tracing::debug!("relay answer without pending offer"),
            }
        }
    }
}
