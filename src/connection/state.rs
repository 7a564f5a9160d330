//! Connection lifecycle.

/// Connection state.
///
/// Moves `Open -> Closing -> Closed`, or straight from `Open` or `Closing`
/// to `Closed` when a connection is killed. Never moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Handshake done; data flows both ways.
    #[default]
    Open,
    /// A Close frame has been sent or received; only Close and Pong may
    /// still be written.
    Closing,
    /// Both workers have exited and the stream is released.
    Closed,
}

impl ConnectionState {
    /// Whether the state machine permits moving to `next`.
    #[must_use]
    #[inline]
    pub const fn can_transition_to(self, next: ConnectionState) -> bool {
        matches!(
            (self, next),
            (ConnectionState::Open, ConnectionState::Closing)
                | (ConnectionState::Open, ConnectionState::Closed)
                | (ConnectionState::Closing, ConnectionState::Closed)
        )
    }

    /// Whether application data may be queued.
    #[must_use]
    #[inline]
    pub const fn can_send(self) -> bool {
        matches!(self, ConnectionState::Open)
    }

    /// Whether the connection has reached its terminal state.
    #[must_use]
    #[inline]
    pub const fn is_closed(self) -> bool {
        matches!(self, ConnectionState::Closed)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Open => write!(f, "Open"),
            ConnectionState::Closing => write!(f, "Closing"),
            ConnectionState::Closed => write!(f, "Closed"),
        }
    }
}
