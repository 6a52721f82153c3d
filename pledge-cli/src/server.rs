//! Server command - start the classroom server
//!
//! ## Architecture (4-layer granularity)
//!
//! - Level 1: run() - orchestration
//! - Level 2: configure_server(), start_server()
//! - Level 3: (delegated to pledge-server crate)
//! - Level 4: configuration validation

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Args;

use pledge_engine::EngineConfig;
use pledge_server::{serve, ServerConfig, ServerState};

// ============================================================================
// COMMAND ARGUMENTS (Level 4 - Configuration)
// ============================================================================

#[derive(Args)]
pub struct ServerArgs {
    /// Port number to listen on
    #[arg(long, default_value = "8002")]
    pub port: u16,

    /// Directory containing the student and dashboard pages
    #[arg(long, default_value = "web")]
    pub static_dir: PathBuf,

    /// Engine configuration file (JSON: timing, variants file, seed)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Variant definitions file, overriding the config file
    #[arg(long)]
    pub variants: Option<PathBuf>,

    /// Round deadline in milliseconds, overriding the config file
    #[arg(long)]
    pub round_deadline_ms: Option<u64>,

    /// Seconds between presence and queue sweeps
    #[arg(long, default_value = "5")]
    pub sweep_secs: u64,
}

// ============================================================================
// LEVEL 1 - ORCHESTRATION
// ============================================================================

/// Run server command
///
/// This function reads like a table of contents:
/// 1. Configure server and engine
/// 2. Start server (blocking)
pub fn run(args: ServerArgs, seed: Option<u64>) -> Result<()> {
    let (config, engine_config) = configure_server(&args, seed)?;

    tracing::info!(
        "Starting PLEDGE server on port {} (round deadline {} ms)",
        config.port,
        config.timing.round_deadline_ms
    );

    start_server(config, engine_config)
}

// ============================================================================
// LEVEL 2 - PHASES
// ============================================================================

/// Configure server from command arguments
fn configure_server(args: &ServerArgs, seed: Option<u64>) -> Result<(ServerConfig, EngineConfig)> {
    validate_static_dir(&args.static_dir)?;

    let mut engine_config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if let Some(path) = &args.variants {
        engine_config.variants = Some(path.clone());
    }
    if let Some(ms) = args.round_deadline_ms {
        if ms == 0 {
            anyhow::bail!("Round deadline must be positive");
        }
        engine_config.timing.round_deadline_ms = ms;
    }
    if seed.is_some() {
        engine_config.seed = seed;
    }
    if args.sweep_secs == 0 {
        anyhow::bail!("Sweep interval must be at least one second");
    }

    let config = ServerConfig {
        port: args.port,
        static_dir: args.static_dir.to_string_lossy().to_string(),
        timing: engine_config.timing.clone(),
        sweep_interval: Duration::from_secs(args.sweep_secs),
    };
    Ok((config, engine_config))
}

/// Start the server (blocking)
fn start_server(config: ServerConfig, engine_config: EngineConfig) -> Result<()> {
    let state = Arc::new(ServerState::from_config(&engine_config)?);

    // Create tokio runtime for async server
    let runtime = tokio::runtime::Runtime::new()?;

    runtime.block_on(async { serve(config, state).await })
}

// ============================================================================
// LEVEL 3 - STEPS
// ============================================================================

/// Validate that static directory exists
fn validate_static_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        tracing::warn!(
            "Static directory does not exist: {}. Server will start but may not serve files.",
            path.display()
        );
    } else if !path.is_dir() {
        anyhow::bail!(
            "Static path exists but is not a directory: {}",
            path.display()
        );
    }

    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
