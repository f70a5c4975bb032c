//! PromptPay payment status client
//!
//! Requests a PromptPay QR code from the payment gateway, follows the
//! transaction over the real-time status channel and counts down to its
//! expiry.
//!
//! # Architecture Overview
//!
//! ```text
//!   CLI ──▶ PaymentCoordinator ──▶ GatewayClient ──REST──▶ payment gateway
//!    ▲            │      ▲
//!    │            │      └──── WebSocketChannel ◀──push── payment gateway
//!    │            ▼
//!    └── PaymentView / PaymentNotice
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use promptpay_client::channel::WebSocketChannel;
use promptpay_client::config::{load_or_default, ClientConfig};
use promptpay_client::lifecycle::{shutdown_signal, Shutdown};
use promptpay_client::observability::{logging, metrics};
use promptpay_client::payment::{
    Amount, CurrentUser, FeedbackLevel, PaymentCoordinator, PaymentHandle, PaymentNotice,
    PaymentView, Start,
};
use promptpay_client::GatewayClient;

#[derive(Parser)]
#[command(name = "promptpay-client")]
#[command(about = "Pay with a PromptPay QR code and follow the transaction", long_about = None)]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Request a QR code and wait for the payment
    Pay {
        /// Amount to pay
        #[arg(short, long)]
        amount: Amount,

        /// Signed-in user id
        #[arg(short, long)]
        user_id: Option<String>,

        /// Show the user's pending transaction instead of a new one
        #[arg(long, requires = "user_id")]
        resume: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_or_default(cli.config.as_deref())?;

    logging::init_logging(&config.observability);
    tracing::info!("promptpay-client v{} starting", env!("CARGO_PKG_VERSION"));

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    match cli.command {
        Commands::Pay {
            amount,
            user_id,
            resume,
        } => pay(&config, amount, user_id.map(CurrentUser::new), resume).await,
    }
}

async fn pay(
    config: &ClientConfig,
    amount: Amount,
    user: Option<CurrentUser>,
    resume: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let gateway = GatewayClient::new(&config.gateway)?;
    let channel = WebSocketChannel::new(config.channel.clone());
    let coordinator =
        PaymentCoordinator::new(config.countdown.clone(), Arc::new(gateway), Arc::new(channel));

    let shutdown = Shutdown::new();
    let mut interrupted = shutdown.subscribe();
    let signals = shutdown.clone();
    tokio::spawn(async move {
        loop {
            shutdown_signal().await;
            signals.trigger();
        }
    });

    let start = if resume {
        Start::Resume(amount)
    } else {
        Start::Quote(amount)
    };
    let mut handle = coordinator.start(user, start);
    let mut views = handle.watch();
    let mut printer = ViewPrinter::new(config);
    let mut cancel_sent = false;

    loop {
        tokio::select! {
            notice = handle.next_notice() => {
                let Some(notice) = notice else { break };
                print_feedback(&notice);
                if matches!(notice, PaymentNotice::CloseRequested | PaymentNotice::Expired(_)) {
                    break;
                }
                if cancel_sent && matches!(notice, PaymentNotice::Failed(_)) {
                    // Cancel did not go through; leave rather than wait again.
                    break;
                }
            }
            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = views.borrow_and_update().clone();
                printer.print(&view);
            }
            _ = interrupted.recv() => {
                if cancel_sent || handle.view().request.is_none() {
                    break;
                }
                println!("Cancelling...");
                handle.cancel()?;
                cancel_sent = true;
            }
        }
    }

    printer.print(&handle.view());
    handle.dispose().await;
    shutdown.trigger();
    Ok(())
}

fn print_feedback(notice: &PaymentNotice) {
    if let Some((level, message)) = notice.feedback() {
        match level {
            FeedbackLevel::Success => println!("✔ {}", message),
            FeedbackLevel::Info => println!("ℹ {}", message),
            FeedbackLevel::Error => eprintln!("✖ {}", message),
        }
    }
}

/// Prints only what changed since the previous view.
struct ViewPrinter {
    currency: String,
    promptpay_number: Option<String>,
    shown_reference: Option<String>,
    shown_countdown: Option<String>,
    shown_error: Option<String>,
}

impl ViewPrinter {
    fn new(config: &ClientConfig) -> Self {
        Self {
            currency: config.display.currency.clone(),
            promptpay_number: config.display.promptpay_number.clone(),
            shown_reference: None,
            shown_countdown: None,
            shown_error: None,
        }
    }

    fn print(&mut self, view: &PaymentView) {
        if let Some(request) = &view.request {
            let reference = request.reference_id.to_string();
            if self.shown_reference.as_ref() != Some(&reference) {
                println!();
                println!("Scan to pay");
                println!("  QR:        {}", request.qr_image_data);
                println!(
                    "  Amount:    {:.2} {}",
                    request.amount.value(),
                    self.currency
                );
                if let Some(number) = &self.promptpay_number {
                    println!("  PromptPay: {}", number);
                }
                println!("  Reference: {}", reference);
                self.shown_reference = Some(reference);
            }
        }

        if view.countdown != self.shown_countdown {
            if let Some(countdown) = &view.countdown {
                println!("  Expires in {}", countdown);
            }
            self.shown_countdown = view.countdown.clone();
        }

        let error = view.error.as_ref().map(|e| e.to_string());
        if error != self.shown_error {
            if let Some(message) = &error {
                eprintln!("  ! {}", message);
            }
            self.shown_error = error;
        }
    }
}
