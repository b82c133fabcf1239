//! Config command implementation.

use std::fs;
use std::path::PathBuf;

use anyhow::Context;

use crate::cli::ConfigFormat;
use crate::config::Config;

const DEFAULT_OUTPUT: &str = "stackpulse.yaml";

/// Writes the default configuration to `output` ("-" for stdout).
pub fn command_config(
    output: Option<PathBuf>,
    format: ConfigFormat,
    commented: bool,
) -> anyhow::Result<()> {
    let content = render_config(&Config::default(), format, commented)?;
    let output = output.unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT));

    if output.to_string_lossy() == "-" {
        print!("{}", content);
    } else {
        fs::write(&output, content)
            .with_context(|| format!("failed to write {}", output.display()))?;
        println!("Configuration written to: {}", output.display());
    }
    Ok(())
}

pub fn render_config(
    config: &Config,
    format: ConfigFormat,
    commented: bool,
) -> anyhow::Result<String> {
    Ok(match format {
        ConfigFormat::Json => serde_json::to_string_pretty(config)?,
        ConfigFormat::Toml => toml::to_string_pretty(config)?,
        ConfigFormat::Yaml => {
            let content = serde_yaml::to_string(config)?;
            if commented {
                add_config_comments(content)
            } else {
                content
            }
        }
    })
}

fn add_config_comments(yaml: String) -> String {
    let comments = r#"# stackpulse configuration
# ========================
#
# Target (exactly one of pid / port)
# ----------------------------------
# host: 127.0.0.1              # Host the service listens on
# port: 3000                   # Resolve the pid listening on this port
# pid: 1234                    # Or monitor this pid directly
#
# Sampling
# --------
# polling_ms: 100              # Tick interval, at least 1
# cpu_threshold: 70.0          # CPU warning floor in percent, (0, 100]
# heap_limit: 150MB            # Advisory heap budget shown on the dashboard
#
# V8 inspector (node --inspect)
# -----------------------------
# inspector: true              # false skips runtime metrics entirely
# inspect_port: 9229
# query_timeout_ms: 2000       # Lag, GC, handles, thread pool, heap spaces
# heap_timeout_ms: 3000        # Heap usage query
#
# HTTP exporter
# -------------
# listen: 127.0.0.1:9464       # Serve /metrics, /status and /health
#
"#;
    format!("{comments}{yaml}")
}
