//! Per-connection WebSocket protocol state machine (spec.md §4.6).
//!
//! Modeled on the teacher's `core::connection_fsm` / `core::order_fsm`
//! enum-based FSM idiom, but collapsed to a single enum with an explicit
//! transition function rather than a typestate-per-struct: this state
//! machine is driven by a handful of string-shaped protocol events, not
//! compile-time-distinct capabilities, so a `match` over one enum reads
//! clearer than five cooperating structs (SPEC_FULL.md §4.6).

use std::time::Instant;

/// `LIVE → ERROR` on parse failure or socket close; `ERROR → CONNECTING`
/// with exponential backoff; authenticate failure is non-retriable and
/// holds in `Error` until an operator intervenes (spec.md §4.6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticating,
    Subscribed,
    Live,
    /// `retriable = false` means an auth failure: escalate and hold, do
    /// not auto-reconnect.
    Error { retriable: bool },
}

#[derive(Debug, Clone)]
pub enum Event {
    SocketOpened,
    AuthSent,
    AuthAccepted,
    AuthRejected,
    SubscribeAccepted,
    FirstMessageReceived,
    ParseFailure,
    SocketClosed,
    BackoffElapsed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    SendAuth,
    SendSubscribe,
    ScheduleReconnect,
    EscalateToOperator,
    TriggerReconciliationSweep,
}

/// One step of the state machine: `(current, event) -> (next, actions)`.
/// Pure and synchronous so it is unit-testable without a live socket
/// (SPEC_FULL.md §4.6).
pub fn transition(state: ConnectionState, event: Event) -> (ConnectionState, Vec<Action>) {
    use ConnectionState::*;
    use Event::*;

    match (state, event) {
        (Disconnected, SocketOpened) => (Connecting, vec![]),
        (Connecting, AuthSent) => (Authenticating, vec![Action::SendAuth]),
        (Authenticating, AuthAccepted) => (Subscribed, vec![Action::SendSubscribe]),
        (Authenticating, AuthRejected) => (
            Error { retriable: false },
            vec![Action::EscalateToOperator],
        ),
        (Subscribed, SubscribeAccepted) => (Live, vec![]),
        (Subscribed, FirstMessageReceived) => (Live, vec![]),
        (Live, ParseFailure) => (
            Error { retriable: true },
            vec![Action::TriggerReconciliationSweep],
        ),
        (Live, SocketClosed) => (Error { retriable: true }, vec![]),
        (Error { retriable: true }, BackoffElapsed) => (Connecting, vec![Action::ScheduleReconnect]),
        // Any other transition is either a no-op (duplicate event) or an
        // invalid one the caller should have filtered out; stay put.
        (s, _) => (s, vec![]),
    }
}

/// Tracks wall-clock for keep-alive/reconnect scheduling alongside the
/// pure state. Kept separate from [`ConnectionState`] so the transition
/// function above stays pure and deterministic.
pub struct ConnectionClock {
    pub entered_state_at: Instant,
    pub last_message_at: Option<Instant>,
}

impl ConnectionClock {
    pub fn new() -> Self {
        Self {
            entered_state_at: Instant::now(),
            last_message_at: None,
        }
    }

    pub fn mark_message(&mut self) {
        self.last_message_at = Some(Instant::now());
    }

    pub fn enter_state(&mut self) {
        self.entered_state_at = Instant::now();
    }
}

impl Default for ConnectionClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_reaches_live() {
        let (s, _) = transition(ConnectionState::Disconnected, Event::SocketOpened);
        assert_eq!(s, ConnectionState::Connecting);
        let (s, actions) = transition(s, Event::AuthSent);
        assert_eq!(s, ConnectionState::Authenticating);
        assert_eq!(actions, vec![Action::SendAuth]);
        let (s, actions) = transition(s, Event::AuthAccepted);
        assert_eq!(s, ConnectionState::Subscribed);
        assert_eq!(actions, vec![Action::SendSubscribe]);
        let (s, _) = transition(s, Event::SubscribeAccepted);
        assert_eq!(s, ConnectionState::Live);
    }

    #[test]
    fn auth_rejection_holds_in_non_retriable_error() {
        let (s, actions) = transition(ConnectionState::Authenticating, Event::AuthRejected);
        assert_eq!(s, ConnectionState::Error { retriable: false });
        assert_eq!(actions, vec![Action::EscalateToOperator]);

        // A non-retriable error does not advance on BackoffElapsed.
        let (s2, _) = transition(s, Event::BackoffElapsed);
        assert_eq!(s2, ConnectionState::Error { retriable: false });
    }

    #[test]
    fn parse_failure_triggers_reconciliation_sweep_and_reconnect_cycle() {
        let (s, actions) = transition(ConnectionState::Live, Event::ParseFailure);
        assert_eq!(s, ConnectionState::Error { retriable: true });
        assert_eq!(actions, vec![Action::TriggerReconciliationSweep]);

        let (s, actions) = transition(s, Event::BackoffElapsed);
        assert_eq!(s, ConnectionState::Connecting);
        assert_eq!(actions, vec![Action::ScheduleReconnect]);
    }

    #[test]
    fn socket_close_from_live_is_retriable() {
        let (s, _) = transition(ConnectionState::Live, Event::SocketClosed);
        assert_eq!(s, ConnectionState::Error { retriable: true });
    }
}
