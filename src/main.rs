//! stackpulse: runtime health probe for Node.js services.

use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::filter::LevelFilter;

use stackpulse::cli::{Args, Commands, LogLevel};
use stackpulse::commands::{command_config, command_status, command_watch};
use stackpulse::config::resolve_config;

fn setup_logging(level: LogLevel) {
    let filter = match level {
        LogLevel::Off => LevelFilter::OFF,
        LogLevel::Error => LevelFilter::ERROR,
        LogLevel::Warn => LevelFilter::WARN,
        LogLevel::Info => LevelFilter::INFO,
        LogLevel::Debug => LevelFilter::DEBUG,
        LogLevel::Trace => LevelFilter::TRACE,
    };

    // stdout belongs to the dashboard and JSON output.
    let result = tracing_subscriber::fmt()
        .with_max_level(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .try_init();

    if let Err(e) = result {
        eprintln!("Failed to set tracing subscriber: {e}");
    }
    debug!("Logging initialized with level: {:?}", level);
}

async fn run(args: Args) -> anyhow::Result<()> {
    match args.command {
        Commands::Watch {
            target,
            output,
            listen,
        } => {
            let config = resolve_config(args.config.as_deref(), args.no_config, &target)?;
            info!("Starting stackpulse {}", env!("CARGO_PKG_VERSION"));
            command_watch(&config, output, listen).await
        }
        Commands::Status { target, format } => {
            let config = resolve_config(args.config.as_deref(), args.no_config, &target)?;
            command_status(&config, format).await
        }
        Commands::Config {
            output,
            format,
            commented,
        } => command_config(output, format, commented),
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    setup_logging(args.log_level);

    if let Err(e) = run(args).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
