//! Core WebSocket infrastructure.
//!
//! # Architecture
//!
//! - [`connection`]: owns the socket, reconnects on a fixed interval and sends keep-alives
//! - [`dispatch`]: routes inbound messages and connection events to handlers
//! - [`lifecycle`]: the connection state machine
//! - [`queue`]: bounded buffer for messages sent while the socket is not open
//!
//! Most users only need [`Client`](crate::Client), which wires these together.

pub mod config;
pub(crate) mod connection;
pub mod dispatch;
pub mod error;
pub mod lifecycle;
pub(crate) mod queue;

pub use connection::Delivery;
pub use dispatch::{
    CloseInfo, ConnectionEvent, ConnectionHandler, ConnectionPhase, Handler, SubscriberCounts,
    Unsubscribe,
};
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use lifecycle::{ConnectionState, ReadyState};
pub use queue::MAX_QUEUED_MESSAGES;
