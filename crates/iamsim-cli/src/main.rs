//! iamsim CLI: the `iamsim` command.

mod cli;
mod commands;
mod support;

use clap::Parser;
use cli::{Cli, Commands};

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Replay {
            script,
            config,
            json,
        } => commands::replay::run(script, config, json),

        Commands::Config { config, json } => commands::config::run(config, json),
    }
}
