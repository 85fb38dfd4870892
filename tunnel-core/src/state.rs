//! Run lifecycle state machine for tunnel-bench.
//!
//! This module provides a pure, side-effect-free state machine for one
//! experiment run. The state machine takes events as input and produces a new
//! state plus a list of actions to execute.
//!
//! The actual I/O (agent commands, media pipeline, artifact upload) is
//! performed by tunnel-client, not by this module. In particular the client
//! start command is only ever emitted from the server-start acknowledgement,
//! which gives the causal start ordering without any barrier.

use tunnel_types::SessionId;

/// Run lifecycle state - NO I/O, just state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    /// No run in progress.
    Idle,
    /// `startserver` sent, waiting for its acknowledgement.
    AwaitingServerStart,
    /// Server started, `startclient` sent.
    AwaitingClientStart {
        /// Server agent session.
        server: SessionId,
    },
    /// Both agents running, schedule being applied.
    Running {
        /// Client agent session.
        client: SessionId,
        /// Server agent session.
        server: SessionId,
    },
    /// Stop requests in flight. `Some` marks an agent whose ack is pending.
    Stopping {
        /// Client agent session, until acknowledged.
        client: Option<SessionId>,
        /// Server agent session, until acknowledged.
        server: Option<SessionId>,
    },
    /// Both agents stopped, `getstats` sent.
    AwaitingStats,
    /// Stats exported, local artifacts being delivered.
    Uploading {
        /// Export location returned by the server agent.
        url: String,
    },
}

impl RunState {
    /// Create a new state machine in the Idle state.
    pub fn new() -> Self {
        Self::Idle
    }

    /// Process an event and return the new state plus actions to execute.
    ///
    /// This is a pure function - no side effects. The caller (tunnel-client)
    /// is responsible for executing the returned actions and feeding the
    /// resulting events back in.
    pub fn on_event(self, event: Event) -> (Self, Vec<Action>) {
        match (self, event) {
            // From Idle
            (Self::Idle, Event::StartRequested { relay_port }) => (
                Self::AwaitingServerStart,
                vec![Action::SendStartServer { relay_port }],
            ),

            // Start chain
            (Self::AwaitingServerStart, Event::ServerStarted { session }) => (
                Self::AwaitingClientStart { server: session },
                vec![Action::SendStartClient],
            ),
            (Self::AwaitingClientStart { server }, Event::ClientStarted { session }) => (
                Self::Running {
                    client: session,
                    server,
                },
                vec![
                    Action::EmitStarted {
                        client: session,
                        server,
                    },
                    Action::StartMedia,
                ],
            ),

            // From Running
            (Self::Running { client, server }, Event::StopRequested) => (
                Self::Stopping {
                    client: Some(client),
                    server: Some(server),
                },
                vec![
                    Action::ResetLink,
                    Action::StopCollaborators,
                    Action::UploadStats,
                    Action::StopAgents {
                        client: Some(client),
                        server: Some(server),
                    },
                ],
            ),

            // Stop acknowledgements arrive in any order
            (Self::Stopping { server, .. }, Event::ClientStopped) => {
                Self::after_stop_ack(None, server)
            }
            (Self::Stopping { client, .. }, Event::ServerStopped) => {
                Self::after_stop_ack(client, None)
            }

            (Self::AwaitingStats, Event::StatsReady { url }) => (
                Self::Uploading { url: url.clone() },
                vec![Action::CollectArtifacts { url }],
            ),
            (Self::Uploading { .. }, Event::ArtifactsCollected) => {
                (Self::Idle, vec![Action::EmitStopped])
            }

            // Abort from anywhere but Idle
            (Self::Idle, Event::Aborted { .. }) => (Self::Idle, vec![]),
            (state, Event::Aborted { .. }) => {
                let (client, server) = state.live_sessions();
                let mut actions = vec![Action::ResetLink, Action::StopCollaborators];
                if client.is_some() || server.is_some() {
                    actions.push(Action::StopAgents { client, server });
                }
                (Self::Idle, actions)
            }

            // Invalid transitions - stay in current state
            (state, _) => (state, vec![]),
        }
    }

    fn after_stop_ack(client: Option<SessionId>, server: Option<SessionId>) -> (Self, Vec<Action>) {
        if client.is_none() && server.is_none() {
            (Self::AwaitingStats, vec![Action::RequestStats])
        } else {
            (Self::Stopping { client, server }, vec![])
        }
    }

    /// Sessions that may still be running on the agents.
    fn live_sessions(&self) -> (Option<SessionId>, Option<SessionId>) {
        match self {
            Self::AwaitingClientStart { server } => (None, Some(*server)),
            Self::Running { client, server } => (Some(*client), Some(*server)),
            Self::Stopping { client, server } => (*client, *server),
            _ => (None, None),
        }
    }

    /// Check if a run is active (both agents started, not stopping).
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }

    /// Check if no run is in progress.
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Short phase name for logs.
    pub fn phase(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::AwaitingServerStart => "awaiting-server-start",
            Self::AwaitingClientStart { .. } => "awaiting-client-start",
            Self::Running { .. } => "running",
            Self::Stopping { .. } => "stopping",
            Self::AwaitingStats => "awaiting-stats",
            Self::Uploading { .. } => "uploading",
        }
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

/// Events that can occur in the run lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Caller requested a run; the relay allocated a port.
    StartRequested {
        /// Relay port the server agent forwards media to.
        relay_port: u16,
    },
    /// Server agent acknowledged `startserver`.
    ServerStarted {
        /// Session id from the acknowledgement.
        session: SessionId,
    },
    /// Client agent acknowledged `startclient`.
    ClientStarted {
        /// Session id from the acknowledgement.
        session: SessionId,
    },
    /// Schedule drained or a boundary was reached.
    StopRequested,
    /// Client agent acknowledged `stopclient`.
    ClientStopped,
    /// Server agent acknowledged `stopserver`.
    ServerStopped,
    /// Server agent acknowledged `getstats`.
    StatsReady {
        /// Export location.
        url: String,
    },
    /// Local artifacts delivered.
    ArtifactsCollected,
    /// The run failed and must be torn down.
    Aborted {
        /// Error message describing the failure.
        reason: String,
    },
}

/// Actions to be executed by the orchestrator.
///
/// These are instructions, not side effects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Send `startserver` with the outbound configuration.
    SendStartServer {
        /// Relay port for `port_out`.
        relay_port: u16,
    },
    /// Send `startclient` with the inbound configuration.
    SendStartClient,
    /// Notify the application that both agents are up.
    EmitStarted {
        /// Client agent session.
        client: SessionId,
        /// Server agent session.
        server: SessionId,
    },
    /// Start the local media pipeline.
    StartMedia,
    /// Send an empty `link` to drop all impairment.
    ResetLink,
    /// Stop the media pipeline and the relay service.
    StopCollaborators,
    /// Push collected statistics to the server agent.
    UploadStats,
    /// Send the stop requests concurrently.
    StopAgents {
        /// Client session to stop, if any.
        client: Option<SessionId>,
        /// Server session to stop, if any.
        server: Option<SessionId>,
    },
    /// Send `getstats`.
    RequestStats,
    /// Deposit and deliver local artifacts for the export location.
    CollectArtifacts {
        /// Export location returned by the server agent.
        url: String,
    },
    /// Notify the application that the run is over.
    EmitStopped,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running() -> RunState {
        RunState::Running {
            client: SessionId::new(7),
            server: SessionId::new(42),
        }
    }

    // ===== Start chain =====

    #[test]
    fn starts_idle() {
        assert!(RunState::new().is_idle());
    }

    #[test]
    fn start_request_sends_server_start_first() {
        let (state, actions) = RunState::Idle.on_event(Event::StartRequested { relay_port: 40000 });

        assert_eq!(state, RunState::AwaitingServerStart);
        assert_eq!(actions, vec![Action::SendStartServer { relay_port: 40000 }]);
    }

    #[test]
    fn server_ack_triggers_client_start() {
        let (state, actions) = RunState::AwaitingServerStart.on_event(Event::ServerStarted {
            session: SessionId::new(42),
        });

        assert!(matches!(state, RunState::AwaitingClientStart { server } if server.value() == 42));
        assert_eq!(actions, vec![Action::SendStartClient]);
    }

    #[test]
    fn client_ack_before_server_ack_is_ignored() {
        let (state, actions) = RunState::AwaitingServerStart.on_event(Event::ClientStarted {
            session: SessionId::new(1),
        });

        assert_eq!(state, RunState::AwaitingServerStart);
        assert!(actions.is_empty());
    }

    #[test]
    fn client_ack_starts_media() {
        let state = RunState::AwaitingClientStart {
            server: SessionId::new(42),
        };
        let (state, actions) = state.on_event(Event::ClientStarted {
            session: SessionId::new(7),
        });

        assert_eq!(state, running());
        assert!(state.is_running());
        assert!(actions.iter().any(|a| matches!(a, Action::EmitStarted { .. })));
        assert_eq!(actions.last(), Some(&Action::StartMedia));
    }

    #[test]
    fn duplicate_server_ack_while_running_is_ignored() {
        let (state, actions) = running().on_event(Event::ServerStarted {
            session: SessionId::new(99),
        });

        assert_eq!(state, running());
        assert!(actions.is_empty());
    }

    // ===== Stop chain =====

    #[test]
    fn stop_request_orders_teardown() {
        let (state, actions) = running().on_event(Event::StopRequested);

        assert!(matches!(state, RunState::Stopping { client: Some(_), server: Some(_) }));
        assert_eq!(
            actions,
            vec![
                Action::ResetLink,
                Action::StopCollaborators,
                Action::UploadStats,
                Action::StopAgents {
                    client: Some(SessionId::new(7)),
                    server: Some(SessionId::new(42)),
                },
            ]
        );
    }

    #[test]
    fn stats_requested_only_after_both_acks() {
        let (state, _) = running().on_event(Event::StopRequested);

        let (state, actions) = state.on_event(Event::ServerStopped);
        assert!(matches!(state, RunState::Stopping { client: Some(_), server: None }));
        assert!(actions.is_empty());

        let (state, actions) = state.on_event(Event::ClientStopped);
        assert_eq!(state, RunState::AwaitingStats);
        assert_eq!(actions, vec![Action::RequestStats]);
    }

    #[test]
    fn stop_acks_in_either_order() {
        let (state, _) = running().on_event(Event::StopRequested);
        let (state, _) = state.on_event(Event::ClientStopped);
        let (state, actions) = state.on_event(Event::ServerStopped);

        assert_eq!(state, RunState::AwaitingStats);
        assert_eq!(actions, vec![Action::RequestStats]);
    }

    #[test]
    fn stats_then_artifacts_then_idle() {
        let (state, actions) = RunState::AwaitingStats.on_event(Event::StatsReady {
            url: "http://agent/results/run1".into(),
        });
        assert!(matches!(state, RunState::Uploading { .. }));
        assert_eq!(
            actions,
            vec![Action::CollectArtifacts {
                url: "http://agent/results/run1".into()
            }]
        );

        let (state, actions) = state.on_event(Event::ArtifactsCollected);
        assert!(state.is_idle());
        assert_eq!(actions, vec![Action::EmitStopped]);
    }

    #[test]
    fn stop_while_idle_is_noop() {
        let (state, actions) = RunState::Idle.on_event(Event::StopRequested);
        assert!(state.is_idle());
        assert!(actions.is_empty());
    }

    // ===== Abort =====

    #[test]
    fn abort_from_running_stops_both_agents() {
        let (state, actions) = running().on_event(Event::Aborted {
            reason: "timeout".into(),
        });

        assert!(state.is_idle());
        assert!(actions.contains(&Action::ResetLink));
        assert!(actions.contains(&Action::StopAgents {
            client: Some(SessionId::new(7)),
            server: Some(SessionId::new(42)),
        }));
    }

    #[test]
    fn abort_before_client_start_stops_server_only() {
        let state = RunState::AwaitingClientStart {
            server: SessionId::new(42),
        };
        let (_, actions) = state.on_event(Event::Aborted {
            reason: "client refused".into(),
        });

        assert!(actions.contains(&Action::StopAgents {
            client: None,
            server: Some(SessionId::new(42)),
        }));
    }

    #[test]
    fn abort_before_any_ack_only_resets() {
        let (state, actions) = RunState::AwaitingServerStart.on_event(Event::Aborted {
            reason: "timeout".into(),
        });

        assert!(state.is_idle());
        assert_eq!(actions, vec![Action::ResetLink, Action::StopCollaborators]);
    }

    #[test]
    fn abort_while_idle_does_nothing() {
        let (state, actions) = RunState::Idle.on_event(Event::Aborted {
            reason: "late".into(),
        });
        assert!(state.is_idle());
        assert!(actions.is_empty());
    }

    #[test]
    fn phase_names() {
        assert_eq!(RunState::Idle.phase(), "idle");
        assert_eq!(running().phase(), "running");
        assert_eq!(RunState::AwaitingStats.phase(), "awaiting-stats");
    }
}
