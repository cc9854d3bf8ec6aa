// SPDX-FileCopyrightText: 2026 Nearby Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Nearby - walking-distance nearby lists for map entities.
//!
//! This is the binary entry point: the long-running `serve` command and the
//! one-shot maintenance commands.

mod commands;
mod serve;
mod shutdown;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use nearby_config::NearbyConfig;
use nearby_core::{EntityType, NearbyError};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

/// Nearby - walking-distance nearby lists for map entities.
#[derive(Parser, Debug)]
#[command(name = "nearby", version, about, long_about = None)]
struct Cli {
    /// Read configuration from this file instead of the standard locations.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the scheduler and, if enabled, the trigger gateway.
    Serve,
    /// Process one batch of queued origins.
    RunBatch {
        /// Items to take from the queue (defaults to auto.items_per_batch).
        #[arg(long)]
        max_items: Option<usize>,
        /// Keep running batches until the queue drains or quota runs out.
        #[arg(long)]
        auto: bool,
    },
    /// Queue one origin for recomputation.
    Enqueue {
        entity_type: EntityType,
        id: i64,
        #[arg(long)]
        priority: Option<i32>,
    },
    /// Report that an entity changed so it and its neighbours are queued.
    Changed { entity_type: EntityType, id: i64 },
    /// Upsert entities from a JSON array file and queue what they affect.
    Import { path: PathBuf },
    /// Show queue, quota and auto processor state.
    Status,
    /// Recover items stuck in processing.
    Sweep,
    /// Return permanently failed items to the queue.
    ResetFailed,
    /// Delete finished queue rows and history past the retention window.
    Purge,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => nearby_config::load_and_validate_path(path),
        None => nearby_config::load_and_validate(),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(errors) => {
            nearby_config::render_errors(&errors);
            std::process::exit(1);
        }
    };

    init_tracing(&config.service.log_level);

    if let Err(e) = run(cli.command, config).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run(command: Commands, config: NearbyConfig) -> Result<(), NearbyError> {
    if let Commands::Serve = command {
        return serve::run_serve(config).await;
    }

    // One-shot commands never spawn the scheduler worker.
    let (engine, _scheduler) =
        commands::open_engine(Arc::new(config), CancellationToken::new()).await?;

    match command {
        Commands::Serve => Ok(()),
        Commands::RunBatch { max_items, auto } => {
            if auto {
                print_json(&commands::run_auto(&engine).await?)
            } else {
                print_json(&commands::run_batch(&engine, max_items).await?)
            }
        }
        Commands::Enqueue {
            entity_type,
            id,
            priority,
        } => print_json(&commands::enqueue(&engine, entity_type, id, priority).await?),
        Commands::Changed { entity_type, id } => {
            print_json(&commands::changed(&engine, entity_type, id).await?)
        }
        Commands::Import { path } => print_json(&commands::import(&engine, &path).await?),
        Commands::Status => print_json(&commands::status(&engine).await?),
        Commands::Sweep => print_json(&commands::sweep(&engine).await?),
        Commands::ResetFailed => print_json(&commands::reset_failed(&engine).await?),
        Commands::Purge => print_json(&commands::purge(&engine).await?),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), NearbyError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Logs go to stderr so command output on stdout stays machine-readable.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("nearby={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_entity_commands() {
        let cli = Cli::try_parse_from(["nearby", "enqueue", "charging_location", "42", "--priority", "1"])
            .unwrap();
        match cli.command {
            Commands::Enqueue {
                entity_type,
                id,
                priority,
            } => {
                assert_eq!(entity_type, EntityType::ChargingLocation);
                assert_eq!(id, 42);
                assert_eq!(priority, Some(1));
            }
            other => panic!("unexpected command: {other:?}"),
        }

        assert!(Cli::try_parse_from(["nearby", "changed", "castle", "1"]).is_err());
    }

    #[test]
    fn run_batch_flags() {
        let cli = Cli::try_parse_from(["nearby", "run-batch", "--auto"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::RunBatch {
                auto: true,
                max_items: None
            }
        ));
    }

    #[test]
    fn binary_loads_config_defaults() {
        let config = nearby_config::load_and_validate_str("").expect("default config should be valid");
        assert_eq!(config.service.name, "nearby");
    }
}
