use std::future::pending;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use backoff::backoff::{Backoff as _, Constant};
use futures::stream::SplitSink;
use futures::{SinkExt as _, StreamExt as _};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{Interval, MissedTickBehavior, interval_at, sleep};
use tokio_tungstenite::tungstenite::Message as Frame;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::config::Config;
use super::dispatch::{CloseInfo, ConnectionEvent, Dispatcher};
use super::error::WsError;
use super::lifecycle::{CloseStep, ConnectStep, ConnectionState, Initiator, Lifecycle};
use super::queue::OutboundQueue;
use crate::Result;
use crate::error::{Error, Kind};
use crate::types::{Message, parse_messages};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Frame>;

/// What happened to a message handed to `send`.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Handed to the open socket
    Sent,
    /// Held in the outbound queue until the next successful connect
    Queued,
}

/// Why a session stopped.
enum SessionEnd {
    /// `disconnect` cancelled it
    Caller,
    /// The peer closed, with or without a close frame
    Peer(Option<CloseFrame>),
    /// Reading or writing failed
    Failed,
}

/// Everything that changes together when the socket opens or closes.
struct Link {
    lifecycle: Lifecycle,
    /// Feeds the session's writer while the socket is open
    writer: Option<mpsc::UnboundedSender<Message>>,
    session: Option<CancellationToken>,
    /// Pending reconnect timer
    reconnect: Option<CancellationToken>,
    /// Bumped whenever a session is started or abandoned, so stale sessions and
    /// handshakes can tell they no longer own the link
    generation: u64,
}

/// Owns the single socket of a client: connecting, reconnecting on a fixed interval,
/// keep-alive, and the outbound queue used while the socket is not open.
///
/// Lock order is `link` then `queue`. Neither lock is held across an await point or while
/// handlers run.
pub(crate) struct ConnectionManager {
    config: Config,
    dispatcher: Arc<Dispatcher>,
    link: Mutex<Link>,
    queue: Mutex<OutboundQueue>,
    state_tx: watch::Sender<ConnectionState>,
    sent: AtomicU64,
}

impl ConnectionManager {
    pub(crate) fn new(config: Config, dispatcher: Arc<Dispatcher>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Closed);
        let lifecycle = Lifecycle::new(config.max_reconnect_attempts);

        Self {
            config,
            dispatcher,
            link: Mutex::new(Link {
                lifecycle,
                writer: None,
                session: None,
                reconnect: None,
                generation: 0,
            }),
            queue: Mutex::new(OutboundQueue::new()),
            state_tx,
            sent: AtomicU64::new(0),
        }
    }

    fn link(&self) -> MutexGuard<'_, Link> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn queue(&self) -> MutexGuard<'_, OutboundQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, link: &Link) {
        self.state_tx.send_replace(link.lifecycle.state());
    }

    /// Open the socket, or wait for the attempt already in flight.
    pub(crate) async fn connect(self: &Arc<Self>) -> Result<()> {
        self.open(Initiator::Caller).await
    }

    async fn open(self: &Arc<Self>, initiator: Initiator) -> Result<()> {
        let generation = {
            let mut link = self.link();
            match initiator {
                Initiator::Caller => {
                    if let Some(timer) = link.reconnect.take() {
                        timer.cancel();
                    }
                }
                Initiator::Reconnect => link.reconnect = None,
            }

            match link.lifecycle.begin_connect(initiator) {
                ConnectStep::AlreadyOpen => return Ok(()),
                ConnectStep::Abandoned => return Err(WsError::ConnectionClosed.into()),
                ConnectStep::InFlight => None,
                ConnectStep::Begin => {
                    link.generation += 1;
                    self.publish(&link);
                    Some(link.generation)
                }
            }
        };

        let Some(generation) = generation else {
            return self.wait_for_attempt().await;
        };

        if self.dispatcher.verbose() {
            #[cfg(feature = "tracing")]
            tracing::debug!(url = %self.config.url, ?initiator, "Connecting");
        }

        let attempt = async {
            let url = Url::parse(&self.config.url)?;
            if !matches!(url.scheme(), "ws" | "wss") {
                return Err(Error::validation(format!(
                    "endpoint must use ws:// or wss://, got {}://",
                    url.scheme()
                )));
            }
            let (stream, _) = connect_async(url.as_str())
                .await
                .map_err(WsError::Connection)?;
            Ok(stream)
        }
        .await;

        match attempt {
            Ok(stream) => self.established(generation, stream),
            Err(error) => {
                self.failed(generation, &error);
                Err(error)
            }
        }
    }

    /// Resolve once the in-flight attempt has either opened or given up.
    async fn wait_for_attempt(&self) -> Result<()> {
        let mut state_rx = self.state_tx.subscribe();
        let opened = state_rx
            .wait_for(|state| *state != ConnectionState::Connecting)
            .await
            .is_ok_and(|state| state.is_connected());

        if opened {
            Ok(())
        } else {
            Err(WsError::ConnectionClosed.into())
        }
    }

    fn established(self: &Arc<Self>, generation: u64, stream: WsStream) -> Result<()> {
        let (writer, outbound) = mpsc::unbounded_channel();
        let session = CancellationToken::new();

        {
            let mut link = self.link();
            if link.generation != generation {
                // `disconnect` ran while the handshake was in flight.
                drop(link);
                tokio::spawn(async move {
                    let mut stream = stream;
                    _ = stream.close(None).await;
                });
                return Err(WsError::ConnectionClosed.into());
            }

            link.lifecycle.opened(Instant::now());
            link.writer = Some(writer.clone());
            link.session = Some(session.clone());

            // Flushing under the link lock orders every queued message ahead of any `send`
            // that observes the new writer.
            let flushed = self
                .queue()
                .flush(|message| writer.send(message).map_err(|e| e.0));
            self.publish(&link);

            if self.dispatcher.verbose() {
                #[cfg(feature = "tracing")]
                tracing::debug!(url = %self.config.url, flushed, "Connected");
            }
            #[cfg(not(feature = "tracing"))]
            let _ = flushed;
        }

        // Open handlers finish before the session reads its first frame.
        self.dispatcher.emit_connection(&ConnectionEvent::Open);
        tokio::spawn(Arc::clone(self).run_session(generation, stream, outbound, session));

        Ok(())
    }

    fn failed(self: &Arc<Self>, generation: u64, error: &Error) {
        {
            let mut link = self.link();
            if link.generation != generation {
                // `disconnect` or a newer attempt owns the link. Only the caller of this
                // attempt hears about the failure.
                return;
            }
            let step = link.lifecycle.connect_failed();
            self.after_close(&mut link, step);
            self.publish(&link);
        }

        #[cfg(feature = "tracing")]
        tracing::warn!(url = %self.config.url, %error, "Unable to connect");

        self.dispatcher.emit_connection(&ConnectionEvent::Error {
            kind: error.kind(),
            message: error.to_string(),
        });
    }

    fn after_close(self: &Arc<Self>, link: &mut Link, step: CloseStep) {
        match step {
            CloseStep::Reconnect { attempt } => self.schedule_reconnect(link, attempt),
            CloseStep::GiveUp { attempts } => {
                #[cfg(feature = "tracing")]
                tracing::warn!(attempts, "Giving up on reconnecting");
                #[cfg(not(feature = "tracing"))]
                let _ = attempts;
            }
            CloseStep::Idle => {}
        }
    }

    fn schedule_reconnect(self: &Arc<Self>, link: &mut Link, attempt: u32) {
        let delay = Constant::from(&self.config)
            .next_backoff()
            .unwrap_or(self.config.reconnect_interval);
        let timer = CancellationToken::new();
        if let Some(previous) = link.reconnect.replace(timer.clone()) {
            previous.cancel();
        }

        if self.dispatcher.verbose() {
            #[cfg(feature = "tracing")]
            tracing::debug!(attempt, ?delay, "Scheduling reconnect");
        }
        #[cfg(not(feature = "tracing"))]
        let _ = attempt;

        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                () = timer.cancelled() => {}
                () = sleep(delay) => {
                    // Failures are reported to error handlers and schedule the next attempt.
                    _ = this.open(Initiator::Reconnect).await;
                }
            }
        });
    }

    async fn run_session(
        self: Arc<Self>,
        generation: u64,
        stream: WsStream,
        mut outbound: mpsc::UnboundedReceiver<Message>,
        session: CancellationToken,
    ) {
        let (mut write, mut read) = stream.split();
        let mut keep_alive = keep_alive(self.config.heartbeat_interval);
        let mut unsent = None;

        let end = loop {
            // Reads go before writes so that a peer close is seen before anything else is
            // written to the dying socket; unwritten messages are then requeued.
            tokio::select! {
                biased;

                () = session.cancelled() => {
                    // Messages accepted before `disconnect` still go out ahead of the close.
                    while let Ok(message) = outbound.try_recv() {
                        if let Err(message) = self.write_message(&mut write, message).await {
                            unsent = Some(message);
                            break;
                        }
                    }
                    _ = write.send(Frame::Close(None)).await;
                    break SessionEnd::Caller;
                }

                frame = read.next() => match frame {
                    Some(Ok(Frame::Text(text))) => self.handle_text(text.as_bytes()),
                    Some(Ok(Frame::Close(frame))) => break SessionEnd::Peer(frame),
                    Some(Ok(_)) => {
                        // Binary frames and ping/pong are not part of the protocol.
                    }
                    Some(Err(e)) => {
                        self.dispatcher.emit_connection(&ConnectionEvent::Error {
                            kind: Kind::WebSocket,
                            message: e.to_string(),
                        });
                        break SessionEnd::Failed;
                    }
                    None => break SessionEnd::Peer(None),
                },

                Some(message) = outbound.recv() => {
                    if let Err(message) = self.write_message(&mut write, message).await {
                        unsent = Some(message);
                        break SessionEnd::Failed;
                    }
                }

                () = next_tick(keep_alive.as_mut()) => {
                    let mut heartbeat = Message::heartbeat();
                    heartbeat.stamp();
                    if self.write_message(&mut write, heartbeat).await.is_err() {
                        break SessionEnd::Failed;
                    }
                    self.dispatcher.record_heartbeat();
                }
            }
        };

        self.session_ended(generation, outbound, unsent, end);
    }

    fn handle_text(&self, bytes: &[u8]) {
        match parse_messages(bytes) {
            Ok(messages) => {
                for message in &messages {
                    self.dispatcher.dispatch(message);
                }
            }
            Err(e) => {
                if self.dispatcher.verbose() {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(error = %e, "Dropping malformed frame");
                }
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
            }
        }
    }

    /// Serialize and write one message. On failure the message is handed back.
    async fn write_message(
        &self,
        write: &mut WsSink,
        message: Message,
    ) -> std::result::Result<(), Message> {
        let text = match serde_json::to_string(&message) {
            Ok(text) => text,
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %e, kind = %message.kind, "Dropping unserializable message");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
                return Ok(());
            }
        };

        match write.send(Frame::Text(text.into())).await {
            Ok(()) => {
                self.sent.fetch_add(1, Ordering::Relaxed);
                if self.dispatcher.verbose() {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(kind = %message.kind, id = ?message.id, "Sent message");
                }
                Ok(())
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %e, kind = %message.kind, "Failed to write message");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
                Err(message)
            }
        }
    }

    fn session_ended(
        self: &Arc<Self>,
        generation: u64,
        mut outbound: mpsc::UnboundedReceiver<Message>,
        unsent: Option<Message>,
        end: SessionEnd,
    ) {
        {
            let mut link = self.link();

            // Anything handed to this session but never written goes back to the queue, ahead
            // of messages queued since.
            let mut pending: Vec<Message> = unsent.into_iter().collect();
            while let Ok(message) = outbound.try_recv() {
                pending.push(message);
            }
            if !pending.is_empty() {
                let mut queue = self.queue();
                for message in pending.into_iter().rev() {
                    queue.requeue(message);
                }
            }

            if link.generation != generation {
                // `disconnect` already reported the close.
                return;
            }

            link.writer = None;
            link.session = None;
            let step = link.lifecycle.closed();
            self.after_close(&mut link, step);
            self.publish(&link);
        }

        let (code, reason) = match end {
            SessionEnd::Peer(Some(frame)) => {
                (Some(u16::from(frame.code)), frame.reason.as_str().to_owned())
            }
            SessionEnd::Peer(None) | SessionEnd::Failed | SessionEnd::Caller => {
                (None, String::new())
            }
        };

        if self.dispatcher.verbose() {
            #[cfg(feature = "tracing")]
            tracing::debug!(?code, %reason, "Connection closed");
        }

        self.dispatcher
            .emit_connection(&ConnectionEvent::Close(CloseInfo {
                code,
                reason,
                by_caller: false,
            }));
    }

    /// Close the socket and stop reconnecting. Idempotent.
    pub(crate) fn disconnect(&self) {
        let was_open = {
            let mut link = self.link();
            if let Some(timer) = link.reconnect.take() {
                timer.cancel();
            }
            let previous = link.lifecycle.disconnect_requested();
            link.generation += 1;
            if let Some(session) = link.session.take() {
                session.cancel();
            }
            link.writer = None;
            self.publish(&link);
            previous.is_connected()
        };

        if was_open {
            if self.dispatcher.verbose() {
                #[cfg(feature = "tracing")]
                tracing::debug!(url = %self.config.url, "Disconnected");
            }
            self.dispatcher
                .emit_connection(&ConnectionEvent::Close(CloseInfo {
                    code: None,
                    reason: String::new(),
                    by_caller: true,
                }));
        }
    }

    /// Stamp and transmit `message`, or queue it until the socket opens.
    ///
    /// Queueing while closed starts a reconnect cycle unless one is pending or the caller
    /// disconnected.
    pub(crate) fn send(self: &Arc<Self>, mut message: Message) -> Delivery {
        message.stamp();

        let mut link = self.link();
        if let Some(writer) = &link.writer {
            match writer.send(message) {
                Ok(()) => return Delivery::Sent,
                Err(e) => message = e.0,
            }
        }

        let evicted = self.queue().enqueue(message);
        if evicted > 0 {
            #[cfg(feature = "tracing")]
            tracing::warn!(evicted, "Outbound queue full, dropped oldest messages");
        }

        if let Some(CloseStep::Reconnect { attempt }) = link.lifecycle.reconnect_on_send() {
            self.schedule_reconnect(&mut link, attempt);
            self.publish(&link);
        }

        Delivery::Queued
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub(crate) fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub(crate) fn reconnect_attempts(&self) -> u32 {
        self.link().lifecycle.attempts()
    }

    pub(crate) fn queued(&self) -> usize {
        self.queue().len()
    }

    pub(crate) fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub(crate) fn clear_queue(&self) {
        self.queue().clear();
    }
}

/// Keep-alive ticker; `None` when the period is zero.
fn keep_alive(period: Duration) -> Option<Interval> {
    if period.is_zero() {
        return None;
    }
    let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(ticker)
}

async fn next_tick(ticker: Option<&mut Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => pending::<()>().await,
    }
}
