use std::time::Duration;

/// Lifecycle of the connector's connection manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Constructed, `start()` not called yet
    Disconnected,
    /// Handshake in progress
    Connecting,
    Connected,
    /// Lost or failed to open the session, next attempt after `retry_in`
    Reconnecting { retry_in: Duration },
    /// `stop()` was called; terminal
    Stopped,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, ConnectionState::Stopped)
    }
}

/// Who may use the transport of a connected session.
///
/// The idle listener may only claim the transport from `Released` or
/// `ResumingIdle`. A gateway caller moves any phase to `Interrupting`, which
/// makes a parked listener send `noidle` and step aside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HandOffPhase {
    /// Nobody is idling, the listener may claim the transport
    Released,
    /// The listener is parked in an `idle` request
    Idling,
    /// A command is waiting for the listener to leave `idle`
    Interrupting,
    /// A command holds the transport
    Executing,
    /// The command finished, the listener may idle again
    ResumingIdle,
}

impl HandOffPhase {
    pub(crate) fn idle_may_claim(self) -> bool {
        matches!(self, HandOffPhase::Released | HandOffPhase::ResumingIdle)
    }
}
