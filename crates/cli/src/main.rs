//! Tracewarden CLI
//!
//! Validate rule files and evaluate recorded spans offline.

mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt};

/// Tracewarden CLI: check trace rules and run them against span files.
#[derive(Parser, Debug)]
#[command(name = "tracewarden", version, about)]
struct Cli {
    /// Output format.
    #[arg(long, default_value = "text", global = true)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parse, compile and lint every rule in a rule file.
    Validate(commands::validate::ValidateArgs),
    /// Run a span file through one tenant session and print the violations.
    Evaluate(commands::evaluate::EvaluateArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Validate(args) => commands::validate::run(&args, cli.format),
        Command::Evaluate(args) => commands::evaluate::run(&args, cli.format).await,
    }
}
