//! Experiment orchestrator.
//!
//! Owns the two agent channels, the advertised capabilities, the
//! configuration under test and the local collaborators. Lifecycle decisions
//! come from [`RunState`]; this module performs the actions it returns and
//! feeds the outcomes back as events.
//!
//! # Example
//!
//! ```ignore
//! let mut orchestrator = Orchestrator::new(client, server, configuration, collaborators);
//! orchestrator.connect().await?;
//! orchestrator.query_capabilities().await?;
//! let report = orchestrator.sweep(3, &schedule).await?;
//! ```

use std::collections::VecDeque;
use std::path::PathBuf;

use thiserror::Error;

use tunnel_core::{
    Action, CapabilitySet, ConfigurationPair, Constraint, ConstraintSchedule, Event, RunState,
    SweepOutcome, SweepPlan, SweepReport, DEFAULT_EXCLUDED_IMPLEMENTATIONS,
};
use tunnel_types::{
    AgentRole, CapabilitiesQuery, CapabilitiesReply, GetStats, GetStatsReply, LinkReset, SessionId,
    StartAck, StopClient, StopServer, UploadStats,
};

use crate::artifacts::{ArtifactCollector, ArtifactError, ArtifactLabels};
use crate::channel::{ChannelError, ControlChannel};
use crate::media::{MediaError, MediaPipeline};
use crate::relay::{RelayError, RelayService};
use crate::transport::Transport;

/// `ctime`-style timestamp used in experiment names.
const EXPERIMENT_TIME_FORMAT: &str = "%a %b %e %H:%M:%S %Y";

/// Orchestrator errors.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// An agent channel failed.
    #[error("{role} agent: {source}")]
    Agent {
        /// Which agent.
        role: AgentRole,
        /// Channel failure.
        #[source]
        source: ChannelError,
    },

    /// Relay error.
    #[error("relay: {0}")]
    Relay(#[from] RelayError),

    /// Media pipeline error.
    #[error("media: {0}")]
    Media(#[from] MediaError),

    /// Artifact handoff error.
    #[error("artifacts: {0}")]
    Artifact(#[from] ArtifactError),

    /// Operation not allowed in the current phase.
    #[error("cannot {operation} while {phase}")]
    InvalidState {
        /// Requested operation.
        operation: &'static str,
        /// Current lifecycle phase.
        phase: &'static str,
    },
}

fn agent(role: AgentRole) -> impl Fn(ChannelError) -> OrchestratorError {
    move |source| OrchestratorError::Agent { role, source }
}

/// Local collaborators, owned by the orchestrator.
pub struct Collaborators {
    /// Bandwidth-probing media relay.
    pub relay: Box<dyn RelayService>,
    /// Local media pipeline.
    pub media: Box<dyn MediaPipeline>,
    /// Post-run artifact handoff.
    pub artifacts: Box<dyn ArtifactCollector>,
}

/// What a finished run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Experiment name sent with `getstats`.
    pub exp_name: String,
    /// Export location returned by the server agent.
    pub url: String,
    /// Local result directory.
    pub result_dir: PathBuf,
}

type StartedCallback = Box<dyn Fn(SessionId, SessionId) + Send + Sync>;
type StoppedCallback = Box<dyn Fn(&RunSummary) + Send + Sync>;

/// Drives experiments against a client agent and a server agent.
pub struct Orchestrator<T: Transport> {
    client: ControlChannel<T>,
    server: ControlChannel<T>,
    capabilities: CapabilitySet,
    configuration: ConfigurationPair,
    state: RunState,
    collaborators: Collaborators,
    excluded: Vec<String>,
    experiment: Option<String>,
    last_run: Option<RunSummary>,
    on_started: Option<StartedCallback>,
    on_stopped: Option<StoppedCallback>,
}

impl<T: Transport + 'static> Orchestrator<T> {
    /// Create an orchestrator. Channels are connected by [`connect`](Self::connect).
    pub fn new(
        client: ControlChannel<T>,
        server: ControlChannel<T>,
        configuration: ConfigurationPair,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            client,
            server,
            capabilities: CapabilitySet::new(),
            configuration,
            state: RunState::new(),
            collaborators,
            excluded: DEFAULT_EXCLUDED_IMPLEMENTATIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            experiment: None,
            last_run: None,
            on_started: None,
            on_stopped: None,
        }
    }

    /// Replace the list of implementations never parsed or swept.
    pub fn with_excluded(mut self, excluded: Vec<String>) -> Self {
        self.excluded = excluded;
        self
    }

    /// Called once both agents acknowledged startup, with (client, server)
    /// sessions.
    pub fn on_started<F>(&mut self, callback: F)
    where
        F: Fn(SessionId, SessionId) + Send + Sync + 'static,
    {
        self.on_started = Some(Box::new(callback));
    }

    /// Called once a run's artifacts were handed off.
    pub fn on_stopped<F>(&mut self, callback: F)
    where
        F: Fn(&RunSummary) + Send + Sync + 'static,
    {
        self.on_stopped = Some(Box::new(callback));
    }

    /// Current lifecycle state.
    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Whether both agents are running.
    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    /// Capabilities from the last query.
    pub fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    /// Configuration under test.
    pub fn configuration(&self) -> &ConfigurationPair {
        &self.configuration
    }

    /// Summary of the last completed run.
    pub fn last_run(&self) -> Option<&RunSummary> {
        self.last_run.as_ref()
    }

    /// Client agent channel.
    pub fn client(&self) -> &ControlChannel<T> {
        &self.client
    }

    /// Server agent channel.
    pub fn server(&self) -> &ControlChannel<T> {
        &self.server
    }

    // =========================================================================
    // Connection
    // =========================================================================

    /// Connect the client channel, then the server channel.
    pub async fn connect(&mut self) -> Result<(), OrchestratorError> {
        tracing::info!(phase = "connect", "connecting agents");
        self.client.connect().await.map_err(agent(AgentRole::Client))?;
        self.server.connect().await.map_err(agent(AgentRole::Server))?;
        Ok(())
    }

    /// Disconnect both channels.
    pub async fn disconnect(&mut self) -> Result<(), OrchestratorError> {
        tracing::info!(phase = "connect", "disconnecting agents");
        let client = self.client.disconnect().await.map_err(agent(AgentRole::Client));
        let server = self.server.disconnect().await.map_err(agent(AgentRole::Server));
        client.and(server)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Start a run: relay session and port, then server agent, then client
    /// agent, then local media.
    pub async fn start(&mut self) -> Result<(), OrchestratorError> {
        self.require_idle("start")?;

        self.configuration.reset_run();
        self.collaborators.media.take_stats();
        self.experiment = None;

        let out = &self.configuration.outbound;
        tracing::info!(
            phase = "start",
            implementation = %out.implementation,
            cc = %out.congestion_control,
            mode = %out.mode(),
            "starting run"
        );

        let relay_port = match self.open_relay().await {
            Ok(port) => port,
            Err(e) => {
                if let Err(end) = self.collaborators.relay.end().await {
                    tracing::debug!(error = %end, "relay cleanup failed");
                }
                return Err(e);
            }
        };

        self.advance(Event::StartRequested { relay_port }).await
    }

    async fn open_relay(&mut self) -> Result<u16, OrchestratorError> {
        self.collaborators.relay.begin().await?;
        Ok(self.collaborators.relay.allocate_relay_port().await?)
    }

    /// Apply the schedule until it drains or reaches a boundary, then stop.
    ///
    /// Does nothing unless a run is active. Each step's delay is a plain
    /// sleep.
    pub async fn run(&mut self, schedule: &mut ConstraintSchedule) -> Result<(), OrchestratorError> {
        if !self.state.is_running() {
            tracing::debug!(phase = "run", state = self.state.phase(), "run ignored, not running");
            return Ok(());
        }

        while let Some(constraint) = schedule.pop() {
            let step = match constraint {
                Constraint::Boundary => {
                    tracing::info!(phase = "run", remaining = schedule.len(), "sub-run boundary");
                    break;
                }
                Constraint::Step(step) => step,
            };

            tracing::info!(
                phase = "run",
                bitrate = step.bitrate,
                delay = step.delay_ms,
                loss = step.loss_percent,
                seconds = step.duration.as_secs(),
                "applying link constraint"
            );
            if let Err(e) = self.server.send(&step.link()).await {
                let err = agent(AgentRole::Server)(e);
                self.abort(&err).await;
                return Err(err);
            }
            self.collaborators.media.set_link_bitrate(step.bitrate);
            tokio::time::sleep(step.duration).await;
        }

        self.stop().await
    }

    /// Stop the run: reset link, stop collaborators, upload stats, stop both
    /// agents concurrently, export stats, hand off artifacts.
    pub async fn stop(&mut self) -> Result<(), OrchestratorError> {
        if !self.state.is_running() {
            return Err(OrchestratorError::InvalidState {
                operation: "stop",
                phase: self.state.phase(),
            });
        }
        tracing::info!(phase = "stop", "stopping run");
        self.advance(Event::StopRequested).await
    }

    /// Drive one configured combination until the schedule drains.
    pub async fn run_single(
        &mut self,
        schedule: &mut ConstraintSchedule,
    ) -> Result<(), OrchestratorError> {
        while !schedule.is_empty() {
            self.start().await?;
            self.run(schedule).await?;
        }
        Ok(())
    }

    // =========================================================================
    // Capabilities and sweep
    // =========================================================================

    /// Ask the client agent for its inbound implementations.
    pub async fn query_capabilities(&mut self) -> Result<&CapabilitySet, OrchestratorError> {
        tracing::info!(phase = "capabilities", "querying capabilities");
        let reply: CapabilitiesReply = self
            .client
            .request(&CapabilitiesQuery::inbound_only())
            .await
            .map_err(agent(AgentRole::Client))?;

        self.capabilities = CapabilitySet::from_wire(reply.in_impls, &self.excluded);
        for cap in &self.capabilities {
            tracing::debug!(
                implementation = cap.implementation(),
                datagrams = cap.supports_datagrams(),
                streams = cap.supports_streams(),
                cc = ?cap.congestion_control(),
                "capability"
            );
        }
        tracing::info!(phase = "capabilities", count = self.capabilities.len(), "capabilities received");
        Ok(&self.capabilities)
    }

    /// Run every combination of the sweep plan `repeat` times.
    ///
    /// The schedule is restored from `base` before each combination. A
    /// failed combination is aborted, recorded and skipped.
    pub async fn sweep(
        &mut self,
        repeat: u32,
        base: &ConstraintSchedule,
    ) -> Result<SweepReport, OrchestratorError> {
        self.require_idle("sweep")?;
        if self.capabilities.is_empty() {
            self.query_capabilities().await?;
        }

        let plan = SweepPlan::new(&self.capabilities, &self.excluded);
        tracing::info!(
            phase = "sweep",
            combinations = plan.len(),
            repeat,
            "sweep planned"
        );

        let mut report = SweepReport::new();
        for repetition in 0..repeat {
            for (index, combination) in plan.iter().enumerate() {
                tracing::info!(
                    phase = "sweep",
                    repetition,
                    position = index + 1,
                    total = plan.len(),
                    %combination,
                    "next combination"
                );

                self.configuration.assign(combination);
                let mut schedule = base.clone();

                let outcome = match self.run_single(&mut schedule).await {
                    Ok(()) => SweepOutcome::Completed,
                    Err(e) => {
                        tracing::error!(phase = "sweep", %combination, error = %e, "combination failed");
                        SweepOutcome::Failed {
                            reason: e.to_string(),
                        }
                    }
                };
                report.record(repetition, combination.clone(), outcome);
            }
        }

        tracing::info!(
            phase = "sweep",
            completed = report.completed(),
            failed = report.failures().count(),
            "sweep finished"
        );
        Ok(report)
    }

    // =========================================================================
    // State machine plumbing
    // =========================================================================

    fn require_idle(&self, operation: &'static str) -> Result<(), OrchestratorError> {
        if self.state.is_idle() {
            Ok(())
        } else {
            Err(OrchestratorError::InvalidState {
                operation,
                phase: self.state.phase(),
            })
        }
    }

    /// Feed an event and everything it leads to; abort on failure.
    async fn advance(&mut self, event: Event) -> Result<(), OrchestratorError> {
        match self.drive(event).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.abort(&e).await;
                Err(e)
            }
        }
    }

    async fn drive(&mut self, event: Event) -> Result<(), OrchestratorError> {
        let mut events = VecDeque::from([event]);
        while let Some(event) = events.pop_front() {
            let actions = self.transition(event);
            for action in actions {
                events.extend(self.perform(action).await?);
            }
        }
        Ok(())
    }

    fn transition(&mut self, event: Event) -> Vec<Action> {
        let previous = std::mem::take(&mut self.state);
        let from = previous.phase();
        let (next, actions) = previous.on_event(event);
        if next.phase() != from {
            tracing::debug!(from, to = next.phase(), "run state changed");
        }
        self.state = next;
        actions
    }

    /// Best-effort teardown back to Idle. Failures are logged only.
    async fn abort(&mut self, cause: &OrchestratorError) {
        tracing::warn!(phase = self.state.phase(), error = %cause, "aborting run");
        let actions = self.transition(Event::Aborted {
            reason: cause.to_string(),
        });
        for action in actions {
            if let Err(e) = self.perform(action).await {
                tracing::warn!(error = %e, "abort step failed");
            }
        }
    }

    async fn perform(&mut self, action: Action) -> Result<Vec<Event>, OrchestratorError> {
        match action {
            Action::SendStartServer { relay_port } => {
                self.configuration.outbound.rtp_port = Some(relay_port);
                let request = self
                    .configuration
                    .start_server(relay_port, self.collaborators.relay.host());
                let ack: StartAck = self
                    .server
                    .request(&request)
                    .await
                    .map_err(agent(AgentRole::Server))?;
                self.server.set_session_id(ack.id);
                tracing::info!(phase = "start", session = %ack.id, "server agent started");
                Ok(vec![Event::ServerStarted { session: ack.id }])
            }

            Action::SendStartClient => {
                let request = self.configuration.start_client();
                let ack: StartAck = self
                    .client
                    .request(&request)
                    .await
                    .map_err(agent(AgentRole::Client))?;
                self.client.set_session_id(ack.id);
                tracing::info!(phase = "start", session = %ack.id, "client agent started");
                Ok(vec![Event::ClientStarted { session: ack.id }])
            }

            Action::EmitStarted { client, server } => {
                if let Some(callback) = &self.on_started {
                    callback(client, server);
                }
                Ok(vec![])
            }

            Action::StartMedia => {
                let media = &mut self.collaborators.media;
                if let Some(offer) = media.begin().await? {
                    let answer = self.collaborators.relay.render_offer(&offer).await?;
                    media.accept_answer(&answer).await?;
                }
                Ok(vec![])
            }

            Action::ResetLink => {
                self.server
                    .send(&LinkReset {})
                    .await
                    .map_err(agent(AgentRole::Server))?;
                Ok(vec![])
            }

            Action::StopCollaborators => {
                let media = self.collaborators.media.end().await;
                let relay = self.collaborators.relay.end().await;
                media?;
                relay?;
                Ok(vec![])
            }

            Action::UploadStats => {
                let stats = self.collaborators.media.take_stats();
                tracing::info!(phase = "stop", samples = stats.len(), "uploading stats");
                self.server
                    .send(&UploadStats { stats })
                    .await
                    .map_err(agent(AgentRole::Server))?;
                Ok(vec![])
            }

            Action::StopAgents { client, server } => self.stop_agents(client, server).await,

            Action::RequestStats => {
                let timestamp = chrono::Local::now().format(EXPERIMENT_TIME_FORMAT).to_string();
                let exp_name = self.configuration.experiment_name(&timestamp);
                let request = GetStats {
                    exp_name: exp_name.clone(),
                    transport: self.configuration.transport_label().to_string(),
                    dump_url: self.collaborators.relay.dump_url().unwrap_or_default(),
                };
                let reply: GetStatsReply = self
                    .server
                    .request(&request)
                    .await
                    .map_err(agent(AgentRole::Server))?;
                tracing::info!(phase = "stop", exp = %exp_name, url = %reply.url, "stats exported");
                self.experiment = Some(exp_name);
                Ok(vec![Event::StatsReady { url: reply.url }])
            }

            Action::CollectArtifacts { url } => {
                let out = &self.configuration.outbound;
                let exp_name = self.experiment.clone().unwrap_or_default();
                let labels = ArtifactLabels {
                    exp_name: exp_name.clone(),
                    mode: out.mode().label().to_string(),
                    cc: out.congestion_control.clone(),
                    implementation: out.implementation.clone(),
                };
                let result_dir = self.collaborators.artifacts.collect(&url, &labels).await?;
                self.last_run = Some(RunSummary {
                    exp_name,
                    url,
                    result_dir,
                });
                Ok(vec![Event::ArtifactsCollected])
            }

            Action::EmitStopped => {
                tracing::info!(phase = "stop", "run stopped");
                if let (Some(callback), Some(summary)) = (&self.on_stopped, &self.last_run) {
                    callback(summary);
                }
                Ok(vec![])
            }
        }
    }

    async fn stop_agents(
        &mut self,
        client: Option<SessionId>,
        server: Option<SessionId>,
    ) -> Result<Vec<Event>, OrchestratorError> {
        let client_channel = &self.client;
        let server_channel = &self.server;

        let (client_result, server_result) = tokio::join!(
            async {
                match client {
                    Some(id) => client_channel
                        .request_value(&StopClient { id })
                        .await
                        .map(|_| true),
                    None => Ok(false),
                }
            },
            async {
                match server {
                    Some(id) => server_channel
                        .request_value(&StopServer { id })
                        .await
                        .map(|_| true),
                    None => Ok(false),
                }
            },
        );

        let mut events = Vec::new();
        let client_stopped = client_result.map_err(agent(AgentRole::Client));
        let server_stopped = server_result.map_err(agent(AgentRole::Server));

        if let Ok(true) = client_stopped {
            self.client.clear_session_id();
            tracing::info!(phase = "stop", "client agent stopped");
            events.push(Event::ClientStopped);
        }
        if let Ok(true) = server_stopped {
            self.server.clear_session_id();
            tracing::info!(phase = "stop", "server agent stopped");
            events.push(Event::ServerStopped);
        }

        match client_stopped.and(server_stopped) {
            Ok(_) => Ok(events),
            Err(e) => {
                // Record the side that did stop so an abort only retries the other.
                for event in events {
                    self.transition(event);
                }
                Err(e)
            }
        }
    }
}
