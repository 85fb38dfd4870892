//! CLI command implementations.

pub mod capabilities;
pub mod init_config;
pub mod run;
pub mod sweep;

use tunnel_client::{
    ChannelConfig, Collaborators, ControlChannel, HeadlessMedia, Orchestrator, ProbeRelayClient,
    RelayConfig, ShellArtifactCollector, TcpTransport, TcpTransportConfig,
};
use tunnel_core::ConfigurationPair;
use tunnel_types::AgentRole;

use crate::config::{AgentAddress, Config};

/// Wire up an orchestrator over TCP from the loaded configuration.
pub fn build_orchestrator(config: &Config) -> Orchestrator<TcpTransport> {
    let timeouts = &config.timeouts;
    let channel_config = ChannelConfig {
        connect_timeout: timeouts.connect(),
        request_timeout: timeouts.request(),
    };
    let transport = || {
        TcpTransport::with_config(TcpTransportConfig {
            connect_timeout: timeouts.connect(),
            nodelay: true,
        })
    };
    let channel = |role: AgentRole, agent: &AgentAddress| {
        ControlChannel::with_config(role, &agent.host, agent.port, transport(), channel_config)
    };

    let relay = ProbeRelayClient::new(
        RelayConfig {
            host: config.relay.host.clone(),
            port: config.relay.port,
            probing: config.relay.probing,
            probing_bitrate: config.relay.probing_bitrate,
            timeout: timeouts.relay(),
        },
        transport(),
        transport(),
    );

    let artifacts = &config.artifacts;
    let collaborators = Collaborators {
        relay: Box::new(relay),
        media: Box::new(HeadlessMedia::with_interval(timeouts.sample_interval())),
        artifacts: Box::new(ShellArtifactCollector::new(
            artifacts.results_dir.clone(),
            artifacts.capture_dir.clone(),
            artifacts.endpoint.clone(),
            artifacts.command.clone(),
        )),
    };

    let mut orchestrator = Orchestrator::new(
        channel(AgentRole::Client, &config.agents.client),
        channel(AgentRole::Server, &config.agents.server),
        ConfigurationPair::symmetric(config.direction()),
        collaborators,
    )
    .with_excluded(config.sweep.excluded.clone());

    orchestrator.on_started(|client, server| {
        println!("  started   client session {client}, server session {server}");
    });
    orchestrator.on_stopped(|summary| {
        println!("  stopped   {} -> {}", summary.exp_name, summary.result_dir.display());
    });
    orchestrator
}
