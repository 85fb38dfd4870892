//! Run one configured combination through the whole schedule.

use anyhow::{Context, Result};

use super::build_orchestrator;
use crate::config::Config;

/// Per-invocation overrides of the `[tunnel]` section.
#[derive(Debug, Default)]
pub struct Overrides {
    /// Implementation
    pub implementation: Option<String>,
    /// Congestion-control algorithm
    pub congestion_control: Option<String>,
    /// Datagram mode
    pub datagrams: Option<bool>,
}

impl Overrides {
    fn apply(self, config: &mut Config) {
        if let Some(implementation) = self.implementation {
            config.tunnel.implementation = implementation;
        }
        if let Some(cc) = self.congestion_control {
            config.tunnel.congestion_control = cc;
        }
        if let Some(datagrams) = self.datagrams {
            config.tunnel.datagrams = datagrams;
        }
    }
}

/// Run the run command.
pub async fn run(mut config: Config, overrides: Overrides) -> Result<()> {
    overrides.apply(&mut config);
    let mut schedule = config.constraint_schedule();

    println!(
        "=== {} / {} / {} ({} sub-runs, {}s) ===",
        config.tunnel.implementation,
        config.tunnel.congestion_control,
        if config.tunnel.datagrams { "dgram" } else { "stream" },
        schedule.sub_runs(),
        schedule.total_duration().as_secs(),
    );

    let mut orchestrator = build_orchestrator(&config);
    orchestrator
        .connect()
        .await
        .context("Failed to connect to agents")?;

    let result = orchestrator.run_single(&mut schedule).await;
    if let Err(e) = orchestrator.disconnect().await {
        tracing::warn!(error = %e, "disconnect failed");
    }
    result.context("Run failed")?;

    if let Some(summary) = orchestrator.last_run() {
        println!("Results in {}", summary.result_dir.display());
    }
    Ok(())
}
