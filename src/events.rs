use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::MpdError;

/// Server subsystems the connector watches through `idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subsystem {
    /// The song database changed after an update
    Database,
    /// A database update started or finished
    Update,
    StoredPlaylist,
    /// The queue ("current playlist") changed
    Playlist,
    /// Playback started, stopped, paused or seeked
    Player,
    /// random, repeat, consume, single, crossfade, replay gain
    Options,
}

/// What the presentation layer should refresh when a subsystem changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTarget {
    Library,
    Playlists,
    Options,
    Player,
    /// The queue, and the player view since the current song index may move
    Queue,
}

impl Subsystem {
    /// Every subsystem passed to `idle`, in request order.
    pub const WATCHED: [Subsystem; 6] = [
        Subsystem::Database,
        Subsystem::Update,
        Subsystem::StoredPlaylist,
        Subsystem::Playlist,
        Subsystem::Player,
        Subsystem::Options,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Subsystem::Database => "database",
            Subsystem::Update => "update",
            Subsystem::StoredPlaylist => "stored_playlist",
            Subsystem::Playlist => "playlist",
            Subsystem::Player => "player",
            Subsystem::Options => "options",
        }
    }

    pub fn refresh_target(self) -> RefreshTarget {
        match self {
            Subsystem::Database | Subsystem::Update => RefreshTarget::Library,
            Subsystem::StoredPlaylist => RefreshTarget::Playlists,
            Subsystem::Playlist => RefreshTarget::Queue,
            Subsystem::Player => RefreshTarget::Player,
            Subsystem::Options => RefreshTarget::Options,
        }
    }
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Subsystem {
    type Err = MpdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Subsystem::WATCHED
            .into_iter()
            .find(|subsystem| subsystem.as_str() == s)
            .ok_or_else(|| MpdError::InvalidResponse(format!("Unknown subsystem: {}", s)))
    }
}

// Events raised by the connector's background loops
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectorEvent {
    Connected,
    Heartbeat,
    SubsystemChanged(Subsystem),
    Disconnected,
}

impl ConnectorEvent {
    // Get the name of the event type
    pub fn event_type(&self) -> &'static str {
        match self {
            ConnectorEvent::Connected => "connected",
            ConnectorEvent::Heartbeat => "heartbeat",
            ConnectorEvent::SubsystemChanged(_) => "subsystemChanged",
            ConnectorEvent::Disconnected => "disconnected",
        }
    }
}

/// Callbacks invoked by the connector.
///
/// All three are called from one background task, one at a time and in the
/// order the events were raised, never re-entrantly. Implementations that
/// touch UI state must post the work onto their own UI thread.
pub trait ConnectorHooks: Send + Sync + 'static {
    /// A connection has been established and the status snapshot is fresh.
    fn on_connected(&self) {}

    /// The heartbeat ticked and the status snapshot has been refreshed.
    fn on_heartbeat(&self) {}

    /// The server reported a change in `subsystem`.
    fn on_subsystem_changed(&self, _subsystem: Subsystem) {}
}

/// Hooks that ignore every event, for callers that only use `event_receiver()`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl ConnectorHooks for NoopHooks {}

/// Delivers events to the hooks sequentially, then fans them out to broadcast
/// subscribers. Stops delivering as soon as `shutdown` is cancelled.
pub(crate) async fn dispatch_events(
    hooks: Arc<dyn ConnectorHooks>,
    mut events: mpsc::UnboundedReceiver<ConnectorEvent>,
    event_sender: broadcast::Sender<ConnectorEvent>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        trace!(event = event.event_type(), "Dispatching event");
        match &event {
            ConnectorEvent::Connected => hooks.on_connected(),
            ConnectorEvent::Heartbeat => hooks.on_heartbeat(),
            ConnectorEvent::SubsystemChanged(subsystem) => hooks.on_subsystem_changed(*subsystem),
            ConnectorEvent::Disconnected => {}
        }
        let _ = event_sender.send(event);
    }
    debug!("Event dispatcher finished.");
}
