//! Sweep every advertised combination.

use anyhow::{Context, Result};

use tunnel_core::{SweepOutcome, SweepReport};

use super::build_orchestrator;
use crate::config::Config;

/// Run the sweep command. Fails if any combination failed.
pub async fn run(config: &Config, repeat: Option<u32>) -> Result<()> {
    let repeat = repeat.unwrap_or(config.sweep.repeat);
    let schedule = config.constraint_schedule();

    let mut orchestrator = build_orchestrator(config);
    orchestrator
        .connect()
        .await
        .context("Failed to connect to agents")?;

    let result = orchestrator.sweep(repeat, &schedule).await;
    if let Err(e) = orchestrator.disconnect().await {
        tracing::warn!(error = %e, "disconnect failed");
    }
    let report = result.context("Sweep could not start")?;

    print!("{}", render(&report));
    let failed = report.failures().count();
    if failed > 0 {
        anyhow::bail!("{failed} of {} combinations failed", report.entries().len());
    }
    Ok(())
}

fn render(report: &SweepReport) -> String {
    let mut out = String::from("=== sweep report ===\n");
    for entry in report.entries() {
        let status = match &entry.outcome {
            SweepOutcome::Completed => "ok".to_string(),
            SweepOutcome::Failed { reason } => format!("FAILED: {reason}"),
        };
        out.push_str(&format!(
            "  [{}] {:<28} {}\n",
            entry.repetition + 1,
            entry.combination.to_string(),
            status
        ));
    }
    out.push_str(&format!(
        "\n{} completed, {} failed\n",
        report.completed(),
        report.failures().count()
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tunnel_core::{Combination, DeliveryMode};

    fn combination(cc: &str) -> Combination {
        Combination {
            implementation: "quiche".into(),
            mode: DeliveryMode::Datagram,
            congestion_control: cc.into(),
        }
    }

    #[test]
    fn report_lists_outcomes() {
        let mut report = SweepReport::new();
        report.record(0, combination("cubic"), SweepOutcome::Completed);
        report.record(
            0,
            combination("bbr"),
            SweepOutcome::Failed {
                reason: "server agent: timed out".into(),
            },
        );

        let text = render(&report);
        assert!(text.contains("[1] quiche/dgram/cubic"));
        assert!(text.contains("FAILED: server agent: timed out"));
        assert!(text.ends_with("1 completed, 1 failed\n"));
    }
}
