//! Write a default configuration file.

use anyhow::{Context, Result};
use std::path::Path;

use crate::config::Config;

/// Run the init-config command.
pub async fn run(path: &Path, force: bool) -> Result<()> {
    if tokio::fs::try_exists(path).await.unwrap_or(false) && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }

    let rendered = Config::default().to_toml()?;
    tokio::fs::write(path, rendered)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;

    println!("Wrote default configuration to {}", path.display());
    Ok(())
}
