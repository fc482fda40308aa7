//! Client lifecycle as a pure state machine.
//!
//! ```text
//!  Idle --ConnectRequested--> Connecting --HandshakeSucceeded--> Connected
//!                              |   ^                               |
//!          AuthenticationRejected  RetryTimerFired     ConnectionDropped
//!                              v   |                               v
//!                            Closed <--RetriesExhausted-- Reconnecting
//! ```
//!
//! Whether a failure leads to `Reconnecting` or back to `Idle` depends on
//! whether automatic reconnection is active for the current attempt.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientState {
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientEvent {
    ConnectRequested,
    HandshakeSucceeded,
    AuthenticationRejected,
    TransportFailed,
    ConnectionDropped,
    RetryTimerFired,
    RetriesExhausted,
    CloseRequested,
}

impl ClientState {
    /// Next state for `event`, or `None` when the event does not apply.
    /// `auto_reconnect` selects `Reconnecting` over `Idle` after a failure.
    pub fn transition(self, event: ClientEvent, auto_reconnect: bool) -> Option<ClientState> {
        use ClientEvent::*;
        use ClientState::*;

        let fallback = if auto_reconnect { Reconnecting } else { Idle };
        match (self, event) {
            (Closed, _) => None,
            (_, CloseRequested) => Some(Closed),
            (Idle, ConnectRequested) => Some(Connecting),
            (Connecting, HandshakeSucceeded) => Some(Connected),
            (Connecting, AuthenticationRejected) => Some(Closed),
            (Connecting, TransportFailed) => Some(fallback),
            (Connected, ConnectionDropped) => Some(fallback),
            (Reconnecting, RetryTimerFired) => Some(Connecting),
            (Reconnecting, RetriesExhausted) => Some(Closed),
            _ => None,
        }
    }

    pub fn is_connected(self) -> bool {
        self == ClientState::Connected
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClientState::Idle => "idle",
            ClientState::Connecting => "connecting",
            ClientState::Connected => "connected",
            ClientState::Reconnecting => "reconnecting",
            ClientState::Closed => "closed",
        };
        f.write_str(name)
    }
}
