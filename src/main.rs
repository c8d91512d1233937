// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter};

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Some(Commands::Completions { shell }) => {
            cli::print_completions(shell);
            Ok(())
        }
        Some(Commands::ShowConfig { root }) => {
            let root = root.unwrap_or_else(ozzie_config::default_root);
            let config = ozzie_config::GatewayConfig::default();
            println!("ozzie_root = {}", root.display());
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Some(Commands::ListModels) => {
            for entry in ozzie_model::catalog::all() {
                println!("{:<12} {}", entry.provider, entry.name);
            }
            Ok(())
        }
        Some(Commands::Gateway { root, bind }) => {
            let root = root.unwrap_or_else(ozzie_config::default_root);
            let config = ozzie_config::GatewayConfig {
                bind_addr: bind,
                ..Default::default()
            };
            ozzie_gateway::run(root, config).await
        }
        None => {
            eprintln!("no subcommand given; run `ozzie gateway` to start the gateway process");
            eprintln!("see `ozzie --help` for all commands");
            Ok(())
        }
    }
}

/// Initialise the global tracing subscriber.
///
/// `ozzie` is a headless gateway process (no TUI to protect), so logging
/// always goes to stderr; verbosity maps `-v`/`-vv` to debug/trace the same
/// way the CLI front-end this was split out of does.
fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}
