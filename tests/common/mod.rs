//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use promptpay_client::channel::protocol::EventNames;
use promptpay_client::config::{ChannelConfig, ClientConfig, SandboxConfig};
use promptpay_client::sandbox::{SandboxServer, SandboxState};
use promptpay_client::Shutdown;

/// A sandbox gateway running on an ephemeral port.
pub struct Sandbox {
    pub addr: SocketAddr,
    pub state: Arc<SandboxState>,
    pub shutdown: Shutdown,
    handle: JoinHandle<Result<(), std::io::Error>>,
}

impl Sandbox {
    pub fn http_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Client config pointing at this sandbox.
    pub fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::default();
        config.gateway.base_url = self.http_url();
        config.gateway.request_timeout_secs = 5;
        config.channel = ChannelConfig {
            url: format!("ws://{}/ws", self.addr),
            connect_timeout_secs: 5,
            reconnect_base_delay_ms: 50,
            reconnect_max_delay_ms: 200,
            ..ChannelConfig::default()
        };
        config.countdown.tick_interval_ms = 50;
        config
    }

    /// Wait until a status channel client subscribed to `ref_id`.
    pub async fn wait_for_watcher(&self, ref_id: &str) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.state.watcher_count(ref_id) == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("no client subscribed in time");
    }

    pub async fn settle(&self, ref_id: &str, action: &str) -> reqwest::StatusCode {
        reqwest::Client::new()
            .post(format!("{}/sandbox/topup/{}/{}", self.http_url(), ref_id, action))
            .send()
            .await
            .unwrap()
            .status()
    }

    pub async fn stop(self) {
        self.shutdown.trigger();
        self.handle.await.unwrap().unwrap();
    }
}

/// Start a sandbox gateway on 127.0.0.1 with an OS-assigned port.
pub async fn start_sandbox(config: SandboxConfig) -> Sandbox {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();

    let server = SandboxServer::new(&config, EventNames::default(), shutdown.clone());
    let state = server.state();
    let handle = tokio::spawn(server.run(listener));

    Sandbox {
        addr,
        state,
        shutdown,
        handle,
    }
}

/// Start a programmable HTTP backend that answers every request with the
/// status and JSON body returned by `f`.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        let mut buf = [0u8; 4096];
                        let _ = socket.read(&mut buf).await;

                        let (status, body) = f().await;
                        let status_text = match status {
                            200 => "200 OK",
                            400 => "400 Bad Request",
                            404 => "404 Not Found",
                            500 => "500 Internal Server Error",
                            503 => "503 Service Unavailable",
                            _ => "200 OK",
                        };

                        let response_str = format!(
                            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response_str.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}
