//! PLEDGE CLI - Command-line interface
//!
//! Commands:
//! - serve: Start the classroom server
//! - variants: List the available variants
//! - simulate: Play scripted participants through an in-process engine

mod server;
mod simulate;
mod variants;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pledge")]
#[command(about = "PLEDGE repeated-choice group exercise server")]
struct Cli {
    /// Random seed for matchmaking and simulated choices
    #[arg(long, global = true)]
    seed: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the classroom server
    Serve(server::ServerArgs),
    /// List the available variants
    Variants(variants::VariantsArgs),
    /// Simulate groups of scripted participants
    Simulate(simulate::SimulateArgs),
}

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => server::run(args, cli.seed),
        Commands::Variants(args) => variants::run(args),
        Commands::Simulate(args) => simulate::run(args, cli.seed),
    }
}
