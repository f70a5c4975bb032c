//! PromptPay payment status client library

pub mod channel;
pub mod config;
pub mod gateway;
pub mod lifecycle;
pub mod observability;
pub mod payment;
pub mod resilience;
pub mod sandbox;

pub use config::schema::ClientConfig;
pub use gateway::GatewayClient;
pub use lifecycle::Shutdown;
pub use payment::{PaymentCoordinator, PaymentHandle};
