use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "iamsim",
    about = "iamsim: resource relationship and state engine",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Replay a JSONL operation script against a fresh engine
    Replay {
        /// Path to the operation script
        script: String,

        /// Path to an engine configuration TOML
        #[arg(long)]
        config: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate and print the effective configuration
    Config {
        /// Path to an engine configuration TOML
        #[arg(long)]
        config: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}
