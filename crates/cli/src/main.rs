mod commands;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use combot_core::config::LoggingConfig;
use combot_core::{
    create_event_system, load_config, validate_config, CatalogStore, EventSink, LogSink,
};

use commands::Command;

/// Buffer size for the sync event channel
const EVENT_BUFFER_SIZE: usize = 256;

/// Combo catalog maintenance.
#[derive(Parser, Debug)]
#[command(name = "combot", version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, env = "COMBOT_CONFIG", default_value = "combot.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli.config)
        .with_context(|| format!("Failed to load config from {:?}", cli.config))?;
    validate_config(&config).context("Configuration validation failed")?;

    init_logging(&config.logging);
    info!("Configuration loaded from {:?}", cli.config);

    let (events, writer) =
        create_event_system(Arc::new(LogSink) as Arc<dyn EventSink>, EVENT_BUFFER_SIZE);
    let writer_handle = tokio::spawn(writer.run());

    let (store, outcome) = CatalogStore::open(&config.catalog, Some(events.clone())).await;
    if let Some(recovery) = &outcome.recovery {
        warn!(
            code = recovery.code.as_str(),
            "Catalog recovered on load: {}", recovery.detail
        );
    }

    let result = commands::execute(cli.command, &config, &store, &events).await;

    // Save even when the command failed; earlier mutations may be pending.
    let saved = store.shutdown().await.context("Failed to save catalog");

    // Drop every EventHandle holder so the writer's channel closes.
    drop(store);
    drop(events);
    let _ = writer_handle.await;

    result.and(saved)
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let (plain, json) = if config.json {
        (None, Some(tracing_subscriber::fmt::layer().json()))
    } else {
        (Some(tracing_subscriber::fmt::layer()), None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(plain)
        .with(json)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_import() {
        let cli = Cli::try_parse_from([
            "combot",
            "--config",
            "/tmp/c.toml",
            "import",
            "Midscreen",
            "5A",
            "https://www.youtube.com/playlist?list=PLabcdef1234567890",
        ])
        .unwrap();

        assert_eq!(cli.config, PathBuf::from("/tmp/c.toml"));
        match cli.command {
            Command::Import {
                category,
                starter,
                playlist,
            } => {
                assert_eq!(category, "Midscreen");
                assert_eq!(starter, "5A");
                assert!(playlist.ends_with("PLabcdef1234567890"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
