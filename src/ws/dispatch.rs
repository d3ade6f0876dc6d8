//! Fan-out of inbound messages and connection events to registered handlers.

use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::error::Kind;
use crate::types::{Message, MessageType};

/// Broadcast channel capacity for message streams.
const BROADCAST_CAPACITY: usize = 1024;

/// Callback for inbound messages.
pub type Handler = Arc<dyn Fn(&Message) + Send + Sync>;

/// Callback for connection lifecycle events.
pub type ConnectionHandler = Arc<dyn Fn(&ConnectionEvent) + Send + Sync>;

/// The connection lifecycle events a handler can register for.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionPhase {
    Open,
    Close,
    Error,
}

/// Details of a closed connection.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    /// Close code sent by the peer, if any
    pub code: Option<u16>,
    /// Close reason sent by the peer; empty when none was given
    pub reason: String,
    /// Whether `disconnect` caused the close
    pub by_caller: bool,
}

/// A connection lifecycle event.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The socket opened
    Open,
    /// An open socket closed
    Close(CloseInfo),
    /// Connecting failed or the transport reported an error
    Error {
        /// Error class
        kind: Kind,
        /// Human readable description
        message: String,
    },
}

impl ConnectionEvent {
    /// The phase handlers register for to receive this event.
    #[must_use]
    pub const fn phase(&self) -> ConnectionPhase {
        match self {
            Self::Open => ConnectionPhase::Open,
            Self::Close(_) => ConnectionPhase::Close,
            Self::Error { .. } => ConnectionPhase::Error,
        }
    }
}

/// Number of registered handlers, per registry.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriberCounts {
    /// Handlers registered for a specific message type
    pub typed: usize,
    /// Handlers registered for every message type
    pub any: usize,
    /// Connection lifecycle handlers
    pub connection: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Typed(MessageType),
    Any,
    Connection(ConnectionPhase),
}

/// Token returned by every registration. Calling [`Unsubscribe::unsubscribe`] more than
/// once, or after the client is gone, does nothing.
pub struct Unsubscribe {
    registry: Weak<Dispatcher>,
    slot: Slot,
    id: u64,
}

impl Unsubscribe {
    /// Remove the handler this token was returned for.
    pub fn unsubscribe(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.slot, self.id);
        }
    }
}

impl fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("slot", &self.slot)
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Routes messages to handlers registered per type, then to handlers registered for all
/// types, then to stream subscribers.
///
/// Every dispatch works on a snapshot of the handler lists, so handlers may register or
/// remove handlers (including themselves) while being called.
pub(crate) struct Dispatcher {
    next_id: AtomicU64,
    typed: DashMap<MessageType, Vec<(u64, Handler)>>,
    any: RwLock<Vec<(u64, Handler)>>,
    lifecycle: DashMap<ConnectionPhase, Vec<(u64, ConnectionHandler)>>,
    broadcast_tx: broadcast::Sender<Message>,
    last_heartbeat: RwLock<Option<DateTime<Utc>>>,
    received: AtomicU64,
    debug: bool,
}

impl Dispatcher {
    pub(crate) fn new(debug: bool) -> Self {
        let (broadcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            next_id: AtomicU64::new(1),
            typed: DashMap::new(),
            any: RwLock::new(Vec::new()),
            lifecycle: DashMap::new(),
            broadcast_tx,
            last_heartbeat: RwLock::new(None),
            received: AtomicU64::new(0),
            debug,
        }
    }

    fn token(self: &Arc<Self>, slot: Slot, id: u64) -> Unsubscribe {
        Unsubscribe {
            registry: Arc::downgrade(self),
            slot,
            id,
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn on(self: &Arc<Self>, kind: MessageType, handler: Handler) -> Unsubscribe {
        let id = self.next_id();
        self.typed.entry(kind).or_default().push((id, handler));
        self.token(Slot::Typed(kind), id)
    }

    pub(crate) fn on_any(self: &Arc<Self>, handler: Handler) -> Unsubscribe {
        let id = self.next_id();
        self.any
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, handler));
        self.token(Slot::Any, id)
    }

    pub(crate) fn on_connection(
        self: &Arc<Self>,
        phase: ConnectionPhase,
        handler: ConnectionHandler,
    ) -> Unsubscribe {
        let id = self.next_id();
        self.lifecycle.entry(phase).or_default().push((id, handler));
        self.token(Slot::Connection(phase), id)
    }

    fn remove(&self, slot: Slot, id: u64) {
        match slot {
            Slot::Typed(kind) => {
                if let Some(mut handlers) = self.typed.get_mut(&kind) {
                    handlers.retain(|(handler_id, _)| *handler_id != id);
                }
            }
            Slot::Any => self
                .any
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|(handler_id, _)| *handler_id != id),
            Slot::Connection(phase) => {
                if let Some(mut handlers) = self.lifecycle.get_mut(&phase) {
                    handlers.retain(|(handler_id, _)| *handler_id != id);
                }
            }
        }
    }

    /// Whether lifecycle and per-message events should be logged.
    pub(crate) fn verbose(&self) -> bool {
        cfg!(feature = "tracing") && self.debug
    }

    /// Deliver an inbound message. Heartbeats only refresh the liveness timestamp.
    pub(crate) fn dispatch(&self, message: &Message) {
        self.received.fetch_add(1, Ordering::Relaxed);

        if message.is_heartbeat() {
            self.record_heartbeat();
            return;
        }

        if self.verbose() {
            #[cfg(feature = "tracing")]
            tracing::debug!(kind = %message.kind, id = ?message.id, "Dispatching message");
        }

        let typed: Vec<Handler> = self
            .typed
            .get(&message.kind)
            .map(|handlers| handlers.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();
        let any: Vec<Handler> = self
            .any
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect();

        for handler in typed.iter().chain(&any) {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(message))) {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    kind = %message.kind,
                    panic = panic_message(panic.as_ref()),
                    "Message handler panicked"
                );
                #[cfg(not(feature = "tracing"))]
                let _ = panic_message(panic.as_ref());
            }
        }

        if self.broadcast_tx.receiver_count() > 0 {
            _ = self.broadcast_tx.send(message.clone());
        }
    }

    /// Deliver a connection lifecycle event.
    pub(crate) fn emit_connection(&self, event: &ConnectionEvent) {
        let phase = event.phase();
        let handlers: Vec<ConnectionHandler> = self
            .lifecycle
            .get(&phase)
            .map(|handlers| handlers.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();

        for handler in handlers {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(event))) {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    %phase,
                    panic = panic_message(panic.as_ref()),
                    "Connection handler panicked"
                );
                #[cfg(not(feature = "tracing"))]
                let _ = panic_message(panic.as_ref());
            }
        }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<Message> {
        self.broadcast_tx.subscribe()
    }

    pub(crate) fn record_heartbeat(&self) {
        *self
            .last_heartbeat
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());
    }

    pub(crate) fn last_heartbeat(&self) -> Option<DateTime<Utc>> {
        *self
            .last_heartbeat
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub(crate) fn subscriber_counts(&self) -> SubscriberCounts {
        SubscriberCounts {
            typed: self.typed.iter().map(|entry| entry.value().len()).sum(),
            any: self.any.read().unwrap_or_else(PoisonError::into_inner).len(),
            connection: self.lifecycle.iter().map(|entry| entry.value().len()).sum(),
        }
    }

    /// Drop every registered handler.
    pub(crate) fn clear(&self) {
        self.typed.clear();
        self.any
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.lifecycle.clear();
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
