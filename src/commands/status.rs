//! One-shot status command.

use anyhow::Context;
use tracing::debug;

use crate::alerts::{evaluate, Thresholds};
use crate::cli::ConfigFormat;
use crate::config::{Config, TargetSelector};
use crate::display::render_status;
use crate::resolver::{PidResolver, ProcessResolver};
use crate::sampler::Sampler;
use crate::types::Status;

/// Resolves the target, takes one sample and prints the evaluated status.
pub async fn command_status(config: &Config, format: Option<ConfigFormat>) -> anyhow::Result<()> {
    let target = config.to_target()?;

    let pid = match target.selector {
        TargetSelector::Pid(pid) => pid,
        TargetSelector::Port(port) => {
            let host = target.host.clone();
            tokio::task::spawn_blocking(move || ProcessResolver::new().resolve_by_port(&host, port))
                .await
                .context("port resolution task failed")??
        }
    };
    debug!("Sampling pid {} once", pid);

    let mut sampler = Sampler::for_target(&target);
    let snapshot = sampler
        .collect(pid)
        .await
        .with_context(|| format!("failed to sample pid {pid}"))?;
    let alerts = evaluate(&snapshot, &Thresholds::for_target(&target));
    let status = Status {
        pid,
        snapshot,
        alerts,
    };

    let output = match format {
        None => render_status(&status, target.heap_limit_bytes),
        Some(ConfigFormat::Json) => serde_json::to_string_pretty(&status)? + "\n",
        Some(ConfigFormat::Yaml) => serde_yaml::to_string(&status)?,
        Some(ConfigFormat::Toml) => toml::to_string_pretty(&status.to_record())?,
    };
    print!("{}", output);
    Ok(())
}
