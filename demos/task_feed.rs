//! Follow the task service's real-time feed.
//!
//! This example:
//! 1. Logs connection open/close/error events
//! 2. Tracks task statuses and logs the changes worth a notification
//! 3. Streams every other message for a while, then shuts down
//!
//! Run against a local service:
//! ```sh
//! RUST_LOG=info cargo run --example task_feed -- ws://localhost:8000/ws
//! ```

use std::time::Duration;

use cto_realtime::tasks::{NotificationPreferences, TaskTracker};
use cto_realtime::ws::config::Config;
use cto_realtime::ws::{ConnectionEvent, ConnectionPhase};
use cto_realtime::{Client, MessageType};
use futures::StreamExt as _;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_URL: &str = "ws://localhost:8000/ws";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_URL.to_owned());
    let config = Config::builder()
        .url(url)
        .reconnect_interval(Duration::from_secs(1))
        .debug(true)
        .build();
    let client = Client::new(config);

    let _on_open = client.on_connection(ConnectionPhase::Open, |_| {
        info!(endpoint = "connection", "open");
    });
    let _on_close = client.on_connection(ConnectionPhase::Close, |event| {
        if let ConnectionEvent::Close(close) = event {
            info!(
                endpoint = "connection",
                code = ?close.code,
                reason = %close.reason,
                by_caller = close.by_caller,
                "closed"
            );
        }
    });
    let _on_error = client.on_connection(ConnectionPhase::Error, |event| {
        if let ConnectionEvent::Error { kind, message } = event {
            warn!(endpoint = "connection", kind = ?kind, error = %message);
        }
    });

    let preferences = NotificationPreferences::default() | NotificationPreferences::STARTED;
    let _tracker = TaskTracker::new().attach(&client, preferences, |change| {
        info!(
            stream = "task_status",
            task_id = %change.task_id(),
            status = %change.status(),
            "Task changed"
        );
    });

    client.connect().await?;
    info!(stats = ?client.stats());

    let mut stream = Box::pin(client.stream());
    let mut count = 0;
    while let Ok(Some(result)) = timeout(Duration::from_secs(30), stream.next()).await {
        match result {
            Ok(message) if message.kind == MessageType::TaskStatus => {}
            Ok(message) => {
                info!(stream = "messages", kind = %message.kind, data = %message.data);
                count += 1;
            }
            Err(e) => debug!(stream = "messages", error = %e),
        }
    }
    info!(stream = "messages", received = count);

    client.shutdown();
    Ok(())
}
