//! Example to run the PLEDGE server standalone
//!
//! Run with: cargo run -p pledge-server --example run_server

use pledge_engine::Timing;
use pledge_server::{run_server, ServerConfig};
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let config = ServerConfig {
        port: 8002,
        static_dir: "web".to_string(),
        timing: Timing::default(),
        sweep_interval: Duration::from_secs(5),
    };

    println!("Starting PLEDGE server on port {}", config.port);
    println!("Static files from: {}", config.static_dir);
    println!("Create a run with: curl -X POST localhost:{}/api/run -H 'content-type: application/json' -d '{{\"classCode\":\"demo\"}}'", config.port);

    run_server(config).await
}
