// tests/common/mod.rs
pub use axum::Router;
pub use serde_json::json;
pub use tokio::task::JoinHandle;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use reqwest::Client;
use serde_json::Value;

/// Spawn an Axum router on an ephemeral port and return (JoinHandle, SocketAddr)
pub async fn spawn_axum(router: Router) -> (JoinHandle<()>, SocketAddr) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind failed");
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.expect("server failed");
    });
    (handle, addr)
}

pub fn build_reqwest_client() -> Client {
    Client::builder()
        .timeout(std::time::Duration::from_secs(5))
        .build()
        .expect("reqwest client")
}

pub fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).expect("valid timestamp")
}

/// Refresh operation answering `{accessToken: "<prefix>-<n>", expiresIn}` after
/// `delay`, where `n` counts invocations starting at 1.
pub fn counting_refresh(
    calls: Arc<AtomicUsize>,
    prefix: &'static str,
    expires_in: i64,
    delay: Duration,
) -> impl Fn() -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync + 'static {
    move || {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
            tokio::time::sleep(delay).await;
            Ok::<Value, anyhow::Error>(json!({"accessToken": format!("{}-{}", prefix, n), "expiresIn": expires_in}))
        }
        .boxed()
    }
}

/// Yield until `calls` reaches `n`, i.e. the refresh operation has started.
pub async fn wait_for_calls(calls: &AtomicUsize, n: usize) {
    while calls.load(Ordering::SeqCst) < n {
        tokio::task::yield_now().await;
    }
}
