use std::fmt;

/// Lifecycle of one connection
///
/// ```text
/// Connecting -> Handshaking -> Authenticated -> Closing -> Closed
///      \             \______________________/
///       \___________________/ (to Closing)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Connecting,
    Handshaking,
    Authenticated,
    Closing,
    Closed,
}

impl ConnectionState {
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Connecting, Handshaking)
                | (Connecting, Closing)
                | (Handshaking, Authenticated)
                | (Handshaking, Closing)
                | (Authenticated, Closing)
                | (Closing, Closed)
        )
    }

    /// Only authenticated connections carry application traffic
    pub fn accepts_requests(self) -> bool {
        self == ConnectionState::Authenticated
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Closing | ConnectionState::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Handshaking => "handshaking",
            ConnectionState::Authenticated => "authenticated",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}
