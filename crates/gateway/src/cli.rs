use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// riskgate — risk-based authentication scoring service.
#[derive(Debug, Parser)]
#[command(name = "riskgate", version, about)]
pub struct Cli {
    /// Path to the rules configuration file.
    #[arg(long, global = true, default_value = "rules.yaml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the evaluation service (default when no subcommand is given).
    Serve,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the rules file and report any errors without serving.
    Validate,
}
