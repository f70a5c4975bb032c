//! End-to-end payment flows: coordinator, REST client and WebSocket
//! channel against a live sandbox gateway.

use std::sync::Arc;
use std::time::Duration;

use promptpay_client::channel::WebSocketChannel;
use promptpay_client::config::{ClientConfig, SandboxConfig};
use promptpay_client::payment::{
    Amount, CurrentUser, PaymentCoordinator, PaymentError, PaymentHandle, PaymentNotice,
    PaymentPhase, PaymentView, Start,
};
use promptpay_client::GatewayClient;

mod common;

const WAIT: Duration = Duration::from_secs(5);

fn coordinator(config: &ClientConfig) -> PaymentCoordinator {
    let gateway = GatewayClient::new(&config.gateway).unwrap();
    let channel = WebSocketChannel::new(config.channel.clone());
    PaymentCoordinator::new(config.countdown.clone(), Arc::new(gateway), Arc::new(channel))
}

fn amount(s: &str) -> Amount {
    s.parse().unwrap()
}

async fn awaiting(handle: &PaymentHandle) -> PaymentView {
    let mut rx = handle.watch();
    tokio::time::timeout(WAIT, async {
        loop {
            {
                let view = rx.borrow_and_update();
                if view.phase == PaymentPhase::AwaitingPayment && view.request.is_some() {
                    return (*view).clone();
                }
            }
            rx.changed().await.unwrap();
        }
    })
    .await
    .expect("no QR issued in time")
}

async fn notice(handle: &mut PaymentHandle) -> PaymentNotice {
    tokio::time::timeout(WAIT, handle.next_notice())
        .await
        .expect("timed out waiting for notice")
        .expect("notices closed")
}

#[tokio::test]
async fn test_payment_completes() {
    let sandbox = common::start_sandbox(SandboxConfig::default()).await;
    let config = sandbox.client_config();
    let mut handle = coordinator(&config).start(None, Start::Quote(amount("150")));

    let view = awaiting(&handle).await;
    let request = view.request.unwrap();
    assert_eq!(request.amount, amount("150"));
    assert!(view.seconds_remaining.unwrap() <= 955);

    let ref_id = request.reference_id.to_string();
    sandbox.wait_for_watcher(&ref_id).await;
    assert_eq!(sandbox.settle(&ref_id, "complete").await, reqwest::StatusCode::OK);

    assert_eq!(
        notice(&mut handle).await,
        PaymentNotice::Completed(request.reference_id.clone())
    );
    assert_eq!(notice(&mut handle).await, PaymentNotice::CloseRequested);
    assert_eq!(handle.view().phase, PaymentPhase::Completed);
    assert!(handle.view().request.is_none());

    handle.dispose().await;
    sandbox.stop().await;
}

#[tokio::test]
async fn test_gateway_expiry_is_pushed() {
    let sandbox = common::start_sandbox(SandboxConfig::default()).await;
    let config = sandbox.client_config();
    let mut handle = coordinator(&config).start(None, Start::Quote(amount("75")));

    let request = awaiting(&handle).await.request.unwrap();
    let ref_id = request.reference_id.to_string();
    sandbox.wait_for_watcher(&ref_id).await;
    sandbox.settle(&ref_id, "expire").await;

    assert_eq!(
        notice(&mut handle).await,
        PaymentNotice::Expired(request.reference_id.clone())
    );
    let view = handle.view();
    assert_eq!(view.phase, PaymentPhase::Expired);
    assert_eq!(view.error, Some(PaymentError::Expired));

    handle.dispose().await;
    sandbox.stop().await;
}

#[tokio::test]
async fn test_sandbox_auto_expiry_reaches_client() {
    let sandbox = common::start_sandbox(SandboxConfig {
        expire_after_secs: 1,
        ..SandboxConfig::default()
    })
    .await;
    let mut config = sandbox.client_config();
    // Keep the local countdown out of the way; the push must do the work.
    config.countdown.expire_locally = false;
    let mut handle = coordinator(&config).start(None, Start::Quote(amount("20")));

    let request = awaiting(&handle).await.request.unwrap();
    assert_eq!(
        notice(&mut handle).await,
        PaymentNotice::Expired(request.reference_id)
    );

    handle.dispose().await;
    sandbox.stop().await;
}

#[tokio::test]
async fn test_cancel_removes_transaction() {
    let sandbox = common::start_sandbox(SandboxConfig::default()).await;
    let config = sandbox.client_config();
    let mut handle = coordinator(&config).start(None, Start::Quote(amount("150")));

    let request = awaiting(&handle).await.request.unwrap();
    assert_eq!(sandbox.state.pending_count(), 1);

    handle.cancel().unwrap();
    assert_eq!(
        notice(&mut handle).await,
        PaymentNotice::Cancelled(request.reference_id.clone())
    );
    assert_eq!(notice(&mut handle).await, PaymentNotice::CloseRequested);
    assert_eq!(sandbox.state.pending_count(), 0);

    // Settling a cancelled transaction is refused by the gateway.
    let ref_id = request.reference_id.to_string();
    assert_eq!(
        sandbox.settle(&ref_id, "complete").await,
        reqwest::StatusCode::NOT_FOUND
    );

    handle.dispose().await;
    sandbox.stop().await;
}

#[tokio::test]
async fn test_resume_pending_transaction() {
    let sandbox = common::start_sandbox(SandboxConfig::default()).await;
    let config = sandbox.client_config();
    let user = CurrentUser::new("42");

    let mut first = coordinator(&config).start(Some(user.clone()), Start::Quote(amount("300")));
    let original = awaiting(&first).await.request.unwrap();
    first.dispose().await;

    let mut resumed = coordinator(&config).start(Some(user), Start::Resume(amount("150")));
    let view = awaiting(&resumed).await;
    let request = view.request.unwrap();
    assert_eq!(request.reference_id, original.reference_id);
    assert_eq!(request.amount, amount("300"));
    assert_eq!(sandbox.state.pending_count(), 1);

    resumed.dispose().await;
    sandbox.stop().await;
}

#[tokio::test]
async fn test_unreachable_channel_does_not_block_payment() {
    let sandbox = common::start_sandbox(SandboxConfig::default()).await;
    let mut config = sandbox.client_config();
    config.channel.url = "ws://127.0.0.1:9/ws".to_string();
    config.channel.connect_timeout_secs = 1;
    let mut handle = coordinator(&config).start(None, Start::Quote(amount("150")));

    let view = awaiting(&handle).await;
    assert!(view.request.is_some());

    match notice(&mut handle).await {
        PaymentNotice::Failed(err) => assert_eq!(err.to_string(), "Failed to connect to server"),
        other => panic!("unexpected notice {:?}", other),
    }
    assert_eq!(handle.view().phase, PaymentPhase::AwaitingPayment);

    handle.dispose().await;
    sandbox.stop().await;
}
