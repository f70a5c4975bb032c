use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use promptpay_client::channel::protocol::EventNames;
use promptpay_client::config::load_or_default;
use promptpay_client::lifecycle::{shutdown_signal, Shutdown};
use promptpay_client::observability::logging;
use promptpay_client::sandbox::SandboxServer;

#[derive(Parser)]
#[command(name = "sandbox-gateway")]
#[command(about = "Local stand-in for the PromptPay top-up gateway", long_about = None)]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address, overriding the config file
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_or_default(cli.config.as_deref())?;
    logging::init_logging(&config.observability);

    let bind = cli.bind.unwrap_or_else(|| config.sandbox.bind_address.clone());
    let listener = TcpListener::bind(&bind).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let server = SandboxServer::new(
        &config.sandbox,
        EventNames::from_config(&config.channel),
        shutdown.clone(),
    );

    let trigger = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        trigger.trigger();
    });

    server.run(listener).await?;
    tracing::info!("Shutdown complete");
    Ok(())
}
