//! Connection state owned by the transport session.

use std::fmt;

use metrics::gauge;
use tokio::sync::watch;
use tracing::info;

/// Broker connection state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No connection and none in progress.
    #[default]
    Disconnected,
    /// Socket open or STOMP handshake in progress.
    Connecting,
    /// Handshake done and subscription sent.
    Connected,
    /// The last attempt or connection failed; a retry is scheduled.
    Error,
}

impl ConnectionState {
    /// The only state the presentation layer shows as online.
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Single writer of [`ConnectionState`]; readers subscribe through `watch`.
#[derive(Debug)]
pub(crate) struct StatePublisher {
    tx: watch::Sender<ConnectionState>,
}

impl StatePublisher {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(ConnectionState::Disconnected);
        Self { tx }
    }

    pub(crate) fn get(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }

    /// Publish a transition. Repeated values are not re-broadcast.
    pub(crate) fn set(&self, next: ConnectionState) {
        let previous = self.tx.send_replace(next);
        if previous != next {
            info!(from = %previous, to = %next, "connection state changed");
            gauge!("herald_transport_connected").set(if next.is_connected() { 1.0 } else { 0.0 });
        }
    }
}
