mod codec;
pub use codec::{Frame, MpdCodec};
pub mod commands;
pub use commands::{Command, CommandList};
mod error;
pub use error::{AckError, MpdError};
mod events;
pub use events::{ConnectorEvent, ConnectorHooks, NoopHooks, RefreshTarget, Subsystem};
mod gateway;
pub use gateway::SessionGuard;
mod heartbeat;
mod idle;
pub mod models;
pub use models::{LibraryEntry, PlayerState, Song, StatusSnapshot};
mod session;
pub use session::{SaveMode, Session};
mod settings;
pub use settings::ConnectorConfig;
mod state;
pub use state::ConnectionState;
mod utils;
pub use utils::mpd_parse;

use futures::future::BoxFuture;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, PoisonError,
};
use tokio::sync::{broadcast, mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use gateway::Link;

const EVENT_BUFFER_CAPACITY: usize = 100;

/// Shared pieces handed to the connection manager task
struct ConnectionManagerContext {
    connector_id: String,
    config: ConnectorConfig,
    link: Arc<RwLock<Option<Arc<Link>>>>,
    status_tx: Arc<watch::Sender<Arc<StatusSnapshot>>>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    events: mpsc::UnboundedSender<ConnectorEvent>,
    shutdown: CancellationToken,
}

/// Keeps a connection to an MPD server alive and mediates every use of it.
///
/// The connector owns a single protocol session. While connected it runs an
/// idle listener (server push notifications) and a heartbeat (periodic
/// status refresh) in the background, and hands the session to callers one
/// at a time through [`Connector::with_session`]. Lost connections are
/// re-established silently at a fixed interval until [`Connector::stop`].
///
/// # Logging
///
/// This library uses the `tracing` crate for logging. To enable logs, you'll need to
/// initialize a tracing subscriber in your application.
///
/// Example using `tracing_subscriber`:
/// ```no_run
/// use tracing::Level;
/// use tracing_subscriber::FmtSubscriber;
///
/// let subscriber = FmtSubscriber::builder()
///     .with_max_level(Level::DEBUG)
///     .finish();
///
/// tracing::subscriber::set_global_default(subscriber)
///     .expect("Failed to set tracing subscriber");
/// ```
///
/// The log levels control what information is displayed:
/// - `TRACE`: Raw protocol traffic and gateway hand-offs
/// - `DEBUG`: Commands, idle events and retry scheduling
/// - `INFO`: Connections established and lifecycle of background tasks
/// - `WARN`: Failed connection attempts and lost connections
/// - `ERROR`: Not used for recoverable conditions
pub struct Connector {
    id: String,
    config: ConnectorConfig,
    hooks: Arc<dyn ConnectorHooks>,
    // Present only while Connected
    link: Arc<RwLock<Option<Arc<Link>>>>,
    status_tx: Arc<watch::Sender<Arc<StatusSnapshot>>>,
    event_sender: broadcast::Sender<ConnectorEvent>,
    // Watch channel for observing the connection state
    connection_state_tx: Arc<watch::Sender<ConnectionState>>,
    connection_state_rx: watch::Receiver<ConnectionState>,
    started: AtomicBool,
    shutdown: CancellationToken,
    management_task: Mutex<Option<JoinHandle<()>>>,
    dispatcher_task: Mutex<Option<JoinHandle<()>>>,
}

impl Connector {
    /// Creates a stopped connector. Nothing touches the network before
    /// [`Connector::start`].
    pub fn new(config: ConnectorConfig, hooks: Arc<dyn ConnectorHooks>) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_BUFFER_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (status_tx, _) = watch::channel(Arc::new(StatusSnapshot::default()));

        Self {
            id: Uuid::new_v4().to_string(),
            config,
            hooks,
            link: Arc::new(RwLock::new(None)),
            status_tx: Arc::new(status_tx),
            event_sender: event_tx,
            connection_state_tx: Arc::new(state_tx),
            connection_state_rx: state_rx,
            started: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            management_task: Mutex::new(None),
            dispatcher_task: Mutex::new(None),
        }
    }

    /// Unique id of this connector instance, as used in log fields
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    /// Subscribe to every event delivered to the hooks, after the hooks ran.
    pub fn event_receiver(&self) -> broadcast::Receiver<ConnectorEvent> {
        self.event_sender.subscribe()
    }

    /// Get the current state of the connection manager.
    pub fn state(&self) -> ConnectionState {
        self.connection_state_rx.borrow().clone()
    }

    /// Observe connection state transitions.
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.connection_state_rx.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state_rx.borrow().is_connected()
    }

    /// Latest status snapshot; no network I/O. Empty while not connected.
    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot::clone(&self.status_tx.borrow())
    }

    /// Starts the connection manager in the background. Must be called from
    /// within a Tokio runtime. Calling it again, or after [`Connector::stop`],
    /// does nothing.
    pub fn start(&self) {
        if self.shutdown.is_cancelled() {
            warn!(connector = %self.id, "start() called on a stopped connector, ignoring.");
            return;
        }
        if self.started.swap(true, Ordering::SeqCst) {
            debug!(connector = %self.id, "Connector already started.");
            return;
        }
        info!(connector = %self.id, address = %self.config.address(), "Starting connector");

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let dispatcher = tokio::spawn(events::dispatch_events(
            self.hooks.clone(),
            events_rx,
            self.event_sender.clone(),
            self.shutdown.clone(),
        ));

        let ctx = ConnectionManagerContext {
            connector_id: self.id.clone(),
            config: self.config.clone(),
            link: self.link.clone(),
            status_tx: self.status_tx.clone(),
            state_tx: self.connection_state_tx.clone(),
            events: events_tx,
            shutdown: self.shutdown.clone(),
        };
        let manager = tokio::spawn(Self::run_connection_manager(ctx));

        *self
            .dispatcher_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(dispatcher);
        *self
            .management_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(manager);
    }

    /// Stops the connector for good: cancels every background loop and any
    /// pending retry and closes the session. Gateway calls already running
    /// see their session closed; new ones are no-ops. Returns once the
    /// connector's own tasks have finished.
    pub async fn stop(&self) -> Result<(), MpdError> {
        info!(connector = %self.id, "Stopping connector");
        self.shutdown.cancel();

        let manager = self
            .management_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let dispatcher = self
            .dispatcher_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let mut result = Ok(());
        if let Some(handle) = manager {
            debug!("Awaiting connection manager termination...");
            if let Err(e) = handle.await {
                warn!(error = %e, "Connection manager task failed");
                result = Err(MpdError::TaskJoinError(e));
            }
        }
        if let Some(handle) = dispatcher {
            if let Err(e) = handle.await {
                warn!(error = %e, "Event dispatcher task failed");
                result = result.and(Err(MpdError::TaskJoinError(e)));
            }
        }

        *self.link.write().await = None;
        self.status_tx
            .send_replace(Arc::new(StatusSnapshot::default()));
        let _ = self
            .connection_state_tx
            .send_replace(ConnectionState::Stopped);
        info!(connector = %self.id, "Connector stopped.");
        result
    }

    /// Runs `f` with exclusive access to the live session.
    ///
    /// Returns `None` without calling `f` when not connected. Otherwise the
    /// idle listener is interrupted, `f` runs alone on the session, and its
    /// result is returned. Calls are serialized: a second caller waits for
    /// the first to finish, so `f` should be short.
    ///
    /// ```no_run
    /// # async fn demo(connector: &mpd_connector::Connector) {
    /// use futures::FutureExt;
    ///
    /// let uris = vec!["album/01.flac".to_string(), "album/02.flac".to_string()];
    /// let queued = connector
    ///     .with_session(move |session| async move { session.queue_uris(true, &uris).await }.boxed())
    ///     .await;
    /// match queued {
    ///     None => println!("not connected"),
    ///     Some(Err(e)) => println!("failed: {}", e),
    ///     Some(Ok(())) => println!("queued"),
    /// }
    /// # }
    /// ```
    pub async fn with_session<T, F>(&self, f: F) -> Option<Result<T, MpdError>>
    where
        F: for<'s> FnOnce(&'s mut Session) -> BoxFuture<'s, Result<T, MpdError>>,
    {
        let mut session = self.session().await?;
        Some(f(&mut *session).await)
    }

    /// Takes the command gateway and returns a guard that derefs to the
    /// session; the idle listener resumes when the guard is dropped. `None`
    /// when not connected.
    pub async fn session(&self) -> Option<SessionGuard> {
        if self.shutdown.is_cancelled() {
            return None;
        }
        let link = self.link.read().await.clone()?;
        match link.acquire().await {
            Ok(guard) => Some(guard),
            Err(e) => {
                debug!(error = %e, "Connection closed while waiting for the gateway");
                None
            }
        }
    }

    /// Names of the stored playlists, or an empty list when not connected or
    /// when the query fails. Use [`Connector::try_playlists`] to tell these apart.
    pub async fn playlists(&self) -> Vec<String> {
        self.try_playlists().await.unwrap_or_else(|e| {
            debug!(error = %e, "Playlist query failed");
            Vec::new()
        })
    }

    /// Names of the stored playlists, with `NotConnected` or the query error
    /// on failure.
    pub async fn try_playlists(&self) -> Result<Vec<String>, MpdError> {
        match self.session().await {
            Some(mut session) => session.list_playlists().await,
            None => Err(MpdError::NotConnected),
        }
    }

    // --- Command Wrappers ---

    /// Pauses, resumes or starts playback depending on the cached state.
    pub async fn toggle_playback(&self) -> Result<(), MpdError> {
        let state = self.status().player_state();
        let mut session = self.session().await.ok_or(MpdError::NotConnected)?;
        session.toggle_playback(state).await
    }

    pub async fn toggle_random(&self) -> Result<(), MpdError> {
        let on = !self.status().random();
        let mut session = self.session().await.ok_or(MpdError::NotConnected)?;
        session.set_random(on).await
    }

    pub async fn toggle_repeat(&self) -> Result<(), MpdError> {
        let on = !self.status().repeat();
        let mut session = self.session().await.ok_or(MpdError::NotConnected)?;
        session.set_repeat(on).await
    }

    pub async fn toggle_consume(&self) -> Result<(), MpdError> {
        let on = !self.status().consume();
        let mut session = self.session().await.ok_or(MpdError::NotConnected)?;
        session.set_consume(on).await
    }

    pub async fn current_song(&self) -> Result<Option<Song>, MpdError> {
        let mut session = self.session().await.ok_or(MpdError::NotConnected)?;
        session.current_song().await
    }

    pub async fn queue(&self) -> Result<Vec<Song>, MpdError> {
        let mut session = self.session().await.ok_or(MpdError::NotConnected)?;
        session.queue().await
    }

    async fn run_connection_manager(ctx: ConnectionManagerContext) {
        info!(connector = %ctx.connector_id, "Connection manager task started.");
        loop {
            if ctx.shutdown.is_cancelled() {
                break;
            }
            let _ = ctx.state_tx.send_replace(ConnectionState::Connecting);

            // Child token: cancelled by stop() or by a failure in this period
            let closed = ctx.shutdown.child_token();
            let attempt = tokio::select! {
                biased;
                _ = ctx.shutdown.cancelled() => break,
                attempt = Session::connect(&ctx.config, closed.clone()) => attempt,
            };

            match attempt {
                Ok(session) => {
                    Self::run_connected(&ctx, session, closed).await;
                    if ctx.shutdown.is_cancelled() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, address = %ctx.config.address(), "Connection attempt failed");
                }
            }

            let retry_in = ctx.config.retry_delay();
            let _ = ctx
                .state_tx
                .send_replace(ConnectionState::Reconnecting { retry_in });
            debug!("Retrying in {:?}", retry_in);
            tokio::select! {
                biased;
                _ = ctx.shutdown.cancelled() => break,
                _ = sleep(retry_in) => {}
            }
        }

        let _ = ctx.state_tx.send_replace(ConnectionState::Stopped);
        info!(connector = %ctx.connector_id, "Connection manager task finished.");
    }

    /// Serves one Connected period; returns once it has been torn down.
    async fn run_connected(
        ctx: &ConnectionManagerContext,
        session: Session,
        closed: CancellationToken,
    ) {
        let link = Arc::new(Link::new(session, closed));

        // Status first, so on_connected observes it
        if let Ok(mut session) = link.acquire().await {
            match session.status().await {
                Ok(status) => {
                    ctx.status_tx.send_replace(Arc::new(status));
                }
                Err(e) => warn!(error = %e, "Initial status query failed"),
            }
        }
        if link.closed.is_cancelled() {
            return;
        }

        *ctx.link.write().await = Some(link.clone());
        let _ = ctx.state_tx.send_replace(ConnectionState::Connected);
        let _ = ctx.events.send(ConnectorEvent::Connected);

        let idle_task = tokio::spawn(idle::run_idle_listener(
            link.clone(),
            ctx.status_tx.clone(),
            ctx.events.clone(),
        ));
        let heartbeat_task = tokio::spawn(heartbeat::run_heartbeat(
            link.clone(),
            ctx.config.heartbeat_period(),
            ctx.status_tx.clone(),
            ctx.events.clone(),
        ));

        link.closed.cancelled().await;

        // Teardown: no new gateway users, then wind down the loops
        *ctx.link.write().await = None;
        if !ctx.shutdown.is_cancelled() {
            let _ = ctx.state_tx.send_replace(ConnectionState::Reconnecting {
                retry_in: ctx.config.retry_delay(),
            });
        }
        ctx.status_tx
            .send_replace(Arc::new(StatusSnapshot::default()));
        for task in [idle_task, heartbeat_task] {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task failed during teardown");
            }
        }
        if !ctx.shutdown.is_cancelled() {
            let _ = ctx.events.send(ConnectorEvent::Disconnected);
        }
        info!(connector = %ctx.connector_id, "Connection closed.");
    }
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("state", &*self.connection_state_rx.borrow())
            .finish()
    }
}

// Ensure the connector cleans up its background tasks on drop
impl Drop for Connector {
    fn drop(&mut self) {
        if !self.shutdown.is_cancelled() {
            debug!(connector = %self.id, "Dropping connector, signaling background tasks to stop.");
            // Don't await here as drop shouldn't block
            self.shutdown.cancel();
        }
    }
}
