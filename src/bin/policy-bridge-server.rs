//! policy-bridge HTTP server.
//!
//! Serves the chat API for the returns assistant:
//!
//! - `GET  /api/chat/welcome`: greeting
//! - `POST /api/chat`: answer one question
//! - `GET  /health`: server status
//!
//! Build and run: `cargo run --bin policy-bridge-server -- --config policy-bridge.toml`

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use miette::{IntoDiagnostic, Result};

use policy_bridge::config::BridgeConfig;
use policy_bridge::pipeline::Assistant;

#[derive(Parser)]
#[command(name = "policy-bridge-server", version, about = "Returns-policy chat API")]
struct Args {
    /// Config file (defaults to $POLICY_BRIDGE_CONFIG, then ./policy-bridge.toml).
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = BridgeConfig::discover(args.config.as_deref())?;
    let assistant = Arc::new(Assistant::from_config(&config)?);

    tracing::info!(
        predicates = assistant.schema().len(),
        backend = assistant.kb_name(),
        "policy-bridge server initialized"
    );

    policy_bridge::server::serve(assistant, &config.server)
        .await
        .into_diagnostic()
}
