use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_stream::try_stream;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{oneshot, watch};

use crate::Result;
use crate::types::{Message, MessageType, new_id};
use crate::ws::config::Config;
use crate::ws::connection::{ConnectionManager, Delivery};
use crate::ws::dispatch::{
    ConnectionEvent, ConnectionPhase, Dispatcher, SubscriberCounts, Unsubscribe,
};
use crate::ws::error::WsError;
use crate::ws::lifecycle::{ConnectionState, ReadyState};

/// Real-time client for the task service.
///
/// One client owns one socket. It is a cheap handle: clone it and pass the clones to
/// whatever needs to send or listen. The socket is closed when the last clone is dropped,
/// or explicitly with [`Client::disconnect`] / [`Client::shutdown`].
///
/// # Examples
///
/// ```rust, no_run
/// use cto_realtime::{Client, MessageType};
/// use cto_realtime::ws::config::Config;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let client = Client::new(Config::new("ws://localhost:8000/ws"));
///
///     let _subscription = client.on(MessageType::TaskStatus, |message| {
///         if let Some(update) = message.as_task_status() {
///             println!("task {} is {}", update.task_id, update.status);
///         }
///     });
///
///     client.connect().await?;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    /// Configuration the client was created with
    config: Config,
    /// Handler registries shared with the connection
    dispatcher: Arc<Dispatcher>,
    /// Connection manager for the WebSocket
    connection: Arc<ConnectionManager>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.connection.disconnect();
    }
}

/// Point-in-time view of a client, for diagnostics.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct Stats {
    /// Connection state when the snapshot was taken
    pub state: ConnectionState,
    /// Browser-style view of `state`
    pub ready_state: ReadyState,
    /// Whether the socket is open
    pub is_connected: bool,
    /// Reconnect attempts since the last successful open or explicit connect
    pub reconnect_attempts: u32,
    /// Messages waiting for the socket to open
    pub queued_messages: usize,
    /// Last heartbeat sent or received
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// Messages written to the socket, heartbeats included
    pub messages_sent: u64,
    /// Messages parsed from the socket, heartbeats included
    pub messages_received: u64,
    /// Registered handlers, per registry
    pub subscribers: SubscriberCounts,
}

/// Removes the handler when dropped.
struct ScopedSubscription(Unsubscribe);

impl Drop for ScopedSubscription {
    fn drop(&mut self) {
        self.0.unsubscribe();
    }
}

impl Client {
    /// Create a client. Nothing happens on the network until [`Client::connect`] or the
    /// first [`Client::send`].
    #[must_use]
    pub fn new(config: Config) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(config.debug));
        let connection = Arc::new(ConnectionManager::new(
            config.clone(),
            Arc::clone(&dispatcher),
        ));

        Self {
            inner: Arc::new(ClientInner {
                config,
                dispatcher,
                connection,
            }),
        }
    }

    /// The configuration this client was created with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Open the socket.
    ///
    /// Returns immediately if already open, and waits for the outcome of an attempt that is
    /// already in flight instead of starting another. An explicit connect resets the
    /// reconnect attempt counter.
    ///
    /// # Errors
    ///
    /// Returns a [`Kind::Validation`](crate::error::Kind::Validation) error if the
    /// configured URL is not a `ws://` or `wss://` URL, and a
    /// [`Kind::WebSocket`](crate::error::Kind::WebSocket) error if the handshake fails or
    /// [`Client::disconnect`] is called before it completes. Either way the failure is
    /// also reported to `error` connection handlers.
    pub async fn connect(&self) -> Result<()> {
        self.inner.connection.connect().await
    }

    /// Close the socket and stop reconnecting until the next [`Client::connect`].
    ///
    /// Messages already handed to the socket are written before the close frame. Calling
    /// this more than once is harmless.
    pub fn disconnect(&self) {
        self.inner.connection.disconnect();
    }

    /// Send a message, stamping its `timestamp` and, if it has none, an `id`.
    ///
    /// While the socket is not open the message is queued (at most
    /// [`MAX_QUEUED_MESSAGES`](crate::ws::MAX_QUEUED_MESSAGES), oldest dropped first) and a
    /// reconnect is started unless one is pending or the client was disconnected.
    pub fn send(&self, message: Message) -> Delivery {
        self.inner.connection.send(message)
    }

    /// Send a message and wait for the first inbound message carrying the same
    /// `correlation_id`, using the configured request timeout.
    ///
    /// # Errors
    ///
    /// See [`Client::request_with_timeout`].
    pub async fn request(&self, kind: MessageType, data: Value) -> Result<Message> {
        self.request_with_timeout(kind, data, self.inner.config.request_timeout)
            .await
    }

    /// Send a message and wait up to `timeout` for the first inbound message carrying the
    /// same `correlation_id`.
    ///
    /// The temporary handler is removed on every path, including when the returned future
    /// is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`WsError::RequestTimeout`] if no response arrives in time, and
    /// [`WsError::ConnectionClosed`] if the client is shut down while waiting.
    pub async fn request_with_timeout(
        &self,
        kind: MessageType,
        data: Value,
        timeout: Duration,
    ) -> Result<Message> {
        let correlation_id = new_id();
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));

        let expected = correlation_id.clone();
        let subscription = ScopedSubscription(self.on_any(move |message| {
            if message.correlation_id.as_deref() == Some(expected.as_str())
                && let Some(tx) = tx.lock().unwrap_or_else(PoisonError::into_inner).take()
            {
                _ = tx.send(message.clone());
            }
        }));

        let request = Message::builder()
            .kind(kind)
            .data(data)
            .correlation_id(correlation_id.clone())
            .build();
        self.send(request);

        let outcome = tokio::time::timeout(timeout, rx).await;
        drop(subscription);

        match outcome {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_closed)) => Err(WsError::ConnectionClosed.into()),
            Err(_elapsed) => Err(WsError::RequestTimeout {
                correlation_id,
                timeout,
            }
            .into()),
        }
    }

    /// Call `handler` for every inbound message of type `kind`.
    ///
    /// Type-specific handlers run before [`Client::on_any`] handlers, each group in
    /// registration order. A panicking handler is logged and does not affect the others.
    pub fn on<F>(&self, kind: MessageType, handler: F) -> Unsubscribe
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.inner.dispatcher.on(kind, Arc::new(handler))
    }

    /// Call `handler` for every inbound message except heartbeats.
    pub fn on_any<F>(&self, handler: F) -> Unsubscribe
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.inner.dispatcher.on_any(Arc::new(handler))
    }

    /// Call `handler` whenever the socket opens, closes or reports an error.
    pub fn on_connection<F>(&self, phase: ConnectionPhase, handler: F) -> Unsubscribe
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        self.inner.dispatcher.on_connection(phase, Arc::new(handler))
    }

    /// Stream of every inbound message except heartbeats.
    ///
    /// A consumer that falls more than 1024 messages behind gets a [`WsError::Lagged`] item
    /// and continues with the oldest message still buffered.
    pub fn stream(&self) -> impl Stream<Item = Result<Message>> + use<> {
        self.filtered_stream(None)
    }

    /// Stream of inbound messages of type `kind`.
    pub fn stream_of(&self, kind: MessageType) -> impl Stream<Item = Result<Message>> + use<> {
        self.filtered_stream(Some(kind))
    }

    fn filtered_stream(
        &self,
        kind: Option<MessageType>,
    ) -> impl Stream<Item = Result<Message>> + use<> {
        let mut rx = self.inner.dispatcher.subscribe();

        try_stream! {
            loop {
                match rx.recv().await {
                    Ok(message) => {
                        if kind.is_none_or(|kind| message.kind == kind) {
                            yield message;
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("Message stream lagged, missed {n} messages");
                        Err(WsError::Lagged { count: n })?;
                    }
                    Err(RecvError::Closed) => {
                        break;
                    }
                }
            }
        }
    }

    /// Whether the socket is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    /// The browser-style ready state of the socket.
    #[must_use]
    pub fn ready_state(&self) -> ReadyState {
        self.state().ready_state()
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection.state_receiver()
    }

    /// Snapshot of the connection, queue and handler counters.
    #[must_use]
    pub fn stats(&self) -> Stats {
        let state = self.state();
        Stats {
            state,
            ready_state: state.ready_state(),
            is_connected: state.is_connected(),
            reconnect_attempts: self.inner.connection.reconnect_attempts(),
            queued_messages: self.inner.connection.queued(),
            last_heartbeat: self.inner.dispatcher.last_heartbeat(),
            messages_sent: self.inner.connection.sent(),
            messages_received: self.inner.dispatcher.received(),
            subscribers: self.inner.dispatcher.subscriber_counts(),
        }
    }

    /// Disconnect, drop every handler and discard queued messages.
    ///
    /// Pending requests fail with [`WsError::ConnectionClosed`]. The client can be
    /// connected again afterwards, with no handlers registered.
    pub fn shutdown(&self) {
        self.disconnect();
        self.inner.dispatcher.clear();
        self.inner.connection.clear_queue();

        #[cfg(feature = "tracing")]
        tracing::debug!(url = %self.inner.config.url, "Client shut down");
    }
}
