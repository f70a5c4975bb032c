use std::path::PathBuf;

use clap::{Parser, Subcommand};

use promptpay_client::config::load_or_default;
use promptpay_client::gateway::{Gateway, GatewayClient, TopupResponse};
use promptpay_client::payment::{Amount, CurrentUser, RefId};

#[derive(Parser)]
#[command(name = "topup-cli")]
#[command(about = "One-shot calls against the PromptPay top-up gateway", long_about = None)]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Gateway base URL, overriding the config file
    #[arg(short, long)]
    url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Request a QR code for an amount
    Quote {
        #[arg(short, long)]
        amount: Amount,

        #[arg(long)]
        user_id: Option<String>,
    },
    /// Cancel a pending transaction
    Cancel {
        ref_id: RefId,
    },
    /// Show a user's pending transaction
    Pending {
        #[arg(long)]
        user_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let mut config = load_or_default(cli.config.as_deref())?;
    if let Some(url) = cli.url {
        config.gateway.base_url = url;
    }
    let client = GatewayClient::new(&config.gateway)?;

    execute(&client, cli.command).await
}

/// Run one command. Gateway failures are returned so the process exits
/// non-zero.
async fn execute(client: &GatewayClient, command: Commands) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Quote { amount, user_id } => {
            let user = user_id.map(CurrentUser::new);
            let request = client.request_quote(amount, user.as_ref()).await?;
            print_json(&TopupResponse::from(&request))
        }
        Commands::Cancel { ref_id } => {
            client.cancel(&ref_id).await?;
            print_json(&serde_json::json!({ "refId": ref_id, "cancelled": true }))
        }
        Commands::Pending { user_id } => {
            match client.current_transaction(&CurrentUser::new(user_id)).await? {
                Some(request) => print_json(&TopupResponse::from(&request)),
                None => {
                    println!("No pending transaction");
                    Ok(())
                }
            }
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
