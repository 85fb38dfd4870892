//! Query and print the client agent's inbound capabilities.

use anyhow::{Context, Result};

use tunnel_core::{CapabilitySet, SweepPlan};

use super::build_orchestrator;
use crate::config::Config;

/// Run the capabilities command.
pub async fn run(config: &Config) -> Result<()> {
    let mut orchestrator = build_orchestrator(config);
    orchestrator
        .connect()
        .await
        .context("Failed to connect to agents")?;

    let result = orchestrator.query_capabilities().await.cloned();
    if let Err(e) = orchestrator.disconnect().await {
        tracing::warn!(error = %e, "disconnect failed");
    }
    let capabilities = result.context("Capability query failed")?;

    print!("{}", render(&capabilities, &config.sweep.excluded));
    Ok(())
}

fn render(capabilities: &CapabilitySet, excluded: &[String]) -> String {
    let mut out = String::from("=== inbound capabilities ===\n");
    for cap in capabilities {
        out.push_str(&format!(
            "  {:<10} dgram={:<5} stream={:<5} cc={}\n",
            cap.implementation(),
            cap.supports_datagrams(),
            cap.supports_streams(),
            cap.congestion_control().join(","),
        ));
    }
    let plan = SweepPlan::new(capabilities, excluded);
    out.push_str(&format!("\n{} combinations per sweep repetition\n", plan.len()));
    out
}
