//! Connection state machine.
//!
//! Every transition of the connection manager goes through [`Lifecycle`], which owns the
//! state, the reconnect attempt counter and the "closed by caller" flag. It performs no I/O:
//! the caller acts on the returned step (start a socket, schedule a reconnect timer, give up).

use std::time::Instant;

/// Connection state tracking.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected, and no reconnect is pending
    Closed,
    /// Opening handshake in flight
    Connecting,
    /// Socket is open
    Open {
        /// When the connection was established
        since: Instant,
    },
    /// Waiting out the reconnect interval before the next attempt
    Reconnecting {
        /// Current reconnection attempt number
        attempt: u32,
    },
}

impl ConnectionState {
    /// Check if the connection is currently active.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Open { .. })
    }

    /// The browser-style ready state for this connection state.
    #[must_use]
    pub const fn ready_state(self) -> ReadyState {
        match self {
            Self::Connecting => ReadyState::Connecting,
            Self::Open { .. } => ReadyState::Open,
            Self::Closed | Self::Reconnecting { .. } => ReadyState::Closed,
        }
    }
}

/// Socket ready state as seen by UI collaborators.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum ReadyState {
    Connecting,
    Open,
    Closed,
}

/// Who asked for a connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Initiator {
    /// An explicit `connect()` call
    Caller,
    /// A reconnect timer firing
    Reconnect,
}

/// Outcome of asking to connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectStep {
    /// Already open; nothing to do
    AlreadyOpen,
    /// Another attempt is in flight; wait for its outcome
    InFlight,
    /// The caller disconnected while a reconnect timer was pending
    Abandoned,
    /// Open a new socket
    Begin,
}

/// Outcome of losing (or failing to establish) a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CloseStep {
    /// Schedule reconnect attempt number `attempt`
    Reconnect { attempt: u32 },
    /// The attempt budget is spent; stay closed until the caller connects again
    GiveUp { attempts: u32 },
    /// The caller closed the connection; do nothing
    Idle,
}

#[derive(Debug)]
pub(crate) struct Lifecycle {
    state: ConnectionState,
    attempts: u32,
    max_attempts: u32,
    closed_by_caller: bool,
}

impl Lifecycle {
    pub(crate) const fn new(max_attempts: u32) -> Self {
        Self {
            state: ConnectionState::Closed,
            attempts: 0,
            max_attempts,
            closed_by_caller: false,
        }
    }

    pub(crate) const fn state(&self) -> ConnectionState {
        self.state
    }

    pub(crate) const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// An explicit connect resets the attempt counter and clears the caller-closed flag.
    pub(crate) fn begin_connect(&mut self, initiator: Initiator) -> ConnectStep {
        match initiator {
            Initiator::Caller => {
                self.attempts = 0;
                self.closed_by_caller = false;
            }
            Initiator::Reconnect if self.closed_by_caller => return ConnectStep::Abandoned,
            Initiator::Reconnect => {}
        }

        match self.state {
            ConnectionState::Open { .. } => ConnectStep::AlreadyOpen,
            ConnectionState::Connecting => ConnectStep::InFlight,
            ConnectionState::Closed | ConnectionState::Reconnecting { .. } => {
                self.state = ConnectionState::Connecting;
                ConnectStep::Begin
            }
        }
    }

    pub(crate) fn opened(&mut self, since: Instant) {
        self.state = ConnectionState::Open { since };
        self.attempts = 0;
    }

    /// The handshake failed. Behaves like a close of a socket that never opened.
    pub(crate) fn connect_failed(&mut self) -> CloseStep {
        self.state = ConnectionState::Closed;
        self.evaluate_reconnect()
    }

    /// An open socket went away.
    pub(crate) fn closed(&mut self) -> CloseStep {
        self.state = ConnectionState::Closed;
        self.evaluate_reconnect()
    }

    /// Mark the connection as closed by the caller. Returns the state before the call.
    pub(crate) fn disconnect_requested(&mut self) -> ConnectionState {
        let previous = self.state;
        self.closed_by_caller = true;
        self.state = ConnectionState::Closed;
        previous
    }

    /// A message was queued while closed. Starts a reconnect cycle unless one is already
    /// pending or the caller closed the connection.
    pub(crate) fn reconnect_on_send(&mut self) -> Option<CloseStep> {
        if self.closed_by_caller || self.state != ConnectionState::Closed {
            return None;
        }
        match self.evaluate_reconnect() {
            step @ CloseStep::Reconnect { .. } => Some(step),
            CloseStep::GiveUp { .. } | CloseStep::Idle => None,
        }
    }

    fn evaluate_reconnect(&mut self) -> CloseStep {
        if self.closed_by_caller {
            return CloseStep::Idle;
        }
        if self.attempts >= self.max_attempts {
            return CloseStep::GiveUp {
                attempts: self.attempts,
            };
        }

        self.attempts += 1;
        self.state = ConnectionState::Reconnecting {
            attempt: self.attempts,
        };
        CloseStep::Reconnect {
            attempt: self.attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(lifecycle: &mut Lifecycle) {
        assert_eq!(
            lifecycle.begin_connect(Initiator::Caller),
            ConnectStep::Begin
        );
        lifecycle.opened(Instant::now());
    }

    #[test]
    fn connect_when_open_is_noop() {
        let mut lifecycle = Lifecycle::new(10);
        open(&mut lifecycle);

        assert_eq!(
            lifecycle.begin_connect(Initiator::Caller),
            ConnectStep::AlreadyOpen
        );
        assert!(lifecycle.state().is_connected());
    }

    #[test]
    fn connect_while_connecting_waits() {
        let mut lifecycle = Lifecycle::new(10);
        assert_eq!(
            lifecycle.begin_connect(Initiator::Caller),
            ConnectStep::Begin
        );

        assert_eq!(
            lifecycle.begin_connect(Initiator::Caller),
            ConnectStep::InFlight
        );
    }

    #[test]
    fn unexpected_close_counts_attempts_until_cap() {
        let mut lifecycle = Lifecycle::new(2);
        open(&mut lifecycle);

        assert_eq!(lifecycle.closed(), CloseStep::Reconnect { attempt: 1 });
        assert_eq!(
            lifecycle.state(),
            ConnectionState::Reconnecting { attempt: 1 }
        );

        assert_eq!(
            lifecycle.begin_connect(Initiator::Reconnect),
            ConnectStep::Begin
        );
        assert_eq!(lifecycle.connect_failed(), CloseStep::Reconnect { attempt: 2 });

        assert_eq!(
            lifecycle.begin_connect(Initiator::Reconnect),
            ConnectStep::Begin
        );
        assert_eq!(lifecycle.connect_failed(), CloseStep::GiveUp { attempts: 2 });
        assert_eq!(lifecycle.state(), ConnectionState::Closed);
        assert_eq!(lifecycle.attempts(), 2);
    }

    #[test]
    fn caller_connect_resets_counter() {
        let mut lifecycle = Lifecycle::new(1);
        open(&mut lifecycle);
        assert_eq!(lifecycle.closed(), CloseStep::Reconnect { attempt: 1 });
        assert_eq!(
            lifecycle.begin_connect(Initiator::Reconnect),
            ConnectStep::Begin
        );
        assert_eq!(lifecycle.connect_failed(), CloseStep::GiveUp { attempts: 1 });

        assert_eq!(
            lifecycle.begin_connect(Initiator::Caller),
            ConnectStep::Begin
        );
        assert_eq!(lifecycle.attempts(), 0);
        assert_eq!(lifecycle.connect_failed(), CloseStep::Reconnect { attempt: 1 });
    }

    #[test]
    fn successful_reconnect_resets_counter() {
        let mut lifecycle = Lifecycle::new(3);
        open(&mut lifecycle);
        assert_eq!(lifecycle.closed(), CloseStep::Reconnect { attempt: 1 });
        assert_eq!(
            lifecycle.begin_connect(Initiator::Reconnect),
            ConnectStep::Begin
        );
        lifecycle.opened(Instant::now());

        assert_eq!(lifecycle.attempts(), 0);
        assert_eq!(lifecycle.closed(), CloseStep::Reconnect { attempt: 1 });
    }

    #[test]
    fn caller_close_never_reconnects() {
        let mut lifecycle = Lifecycle::new(10);
        open(&mut lifecycle);

        let previous = lifecycle.disconnect_requested();

        assert!(previous.is_connected());
        assert_eq!(lifecycle.closed(), CloseStep::Idle);
        assert_eq!(lifecycle.reconnect_on_send(), None);
        assert_eq!(
            lifecycle.begin_connect(Initiator::Reconnect),
            ConnectStep::Abandoned
        );
    }

    #[test]
    fn send_while_closed_starts_one_cycle() {
        let mut lifecycle = Lifecycle::new(10);

        assert_eq!(
            lifecycle.reconnect_on_send(),
            Some(CloseStep::Reconnect { attempt: 1 })
        );
        // Already reconnecting: a second queued message does not start another cycle.
        assert_eq!(lifecycle.reconnect_on_send(), None);
    }

    #[test]
    fn zero_attempt_budget_gives_up_immediately() {
        let mut lifecycle = Lifecycle::new(0);
        open(&mut lifecycle);

        assert_eq!(lifecycle.closed(), CloseStep::GiveUp { attempts: 0 });
        assert_eq!(lifecycle.reconnect_on_send(), None);
    }

    #[test]
    fn ready_state_maps_reconnecting_to_closed() {
        assert_eq!(
            ConnectionState::Reconnecting { attempt: 3 }.ready_state(),
            ReadyState::Closed
        );
        assert_eq!(
            ConnectionState::Connecting.ready_state(),
            ReadyState::Connecting
        );
        assert_eq!(ReadyState::Open.to_string(), "OPEN");
    }
}
