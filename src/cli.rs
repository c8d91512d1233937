// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "ozzie",
    about = "Gateway process for a personal AI-agent operating system",
    version,
    long_about = None,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Increase verbosity (-v = debug, -vv = trace)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the gateway: event bus, stores, tool registry, actor pool,
    /// scheduler, and the loopback WebSocket/REST listener.
    Gateway {
        /// OzzieRoot directory (default: $HOME/.ozzie)
        #[arg(long, short = 'r')]
        root: Option<PathBuf>,

        /// Address to bind the loopback listener to.
        #[arg(long, default_value = "127.0.0.1:7878")]
        bind: String,
    },

    /// Print the effective configuration and exit.
    ShowConfig {
        #[arg(long, short = 'r')]
        root: Option<PathBuf>,
    },

    /// List the models known to the built-in catalog.
    ListModels,

    /// Generate shell completion script.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

pub fn print_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "ozzie", &mut std::io::stdout());
}
