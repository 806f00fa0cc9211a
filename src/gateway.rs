//! The command gateway: exclusive, serialized access to the live session.
//!
//! The idle listener and command callers share one transport. Callers take
//! a turn (one at a time), move the hand-off phase to `Interrupting` so a
//! parked listener sends `noidle` and lets go, lock the transport, and on
//! release move the phase to `ResumingIdle` so the listener may idle again.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::session::Session;
use crate::state::HandOffPhase;
use crate::MpdError;

/// Shared state of one Connected period.
pub(crate) struct Link {
    transport: Arc<Mutex<Session>>,
    // Serializes gateway callers, including the heartbeat's status refresh
    turn: Arc<Mutex<()>>,
    phase: watch::Sender<HandOffPhase>,
    /// Cancelled when the period ends, by failure or by stop
    pub(crate) closed: CancellationToken,
}

impl Link {
    pub(crate) fn new(session: Session, closed: CancellationToken) -> Self {
        let (phase, _) = watch::channel(HandOffPhase::Released);
        Self {
            transport: Arc::new(Mutex::new(session)),
            turn: Arc::new(Mutex::new(())),
            phase,
            closed,
        }
    }

    pub(crate) fn subscribe_phase(&self) -> watch::Receiver<HandOffPhase> {
        self.phase.subscribe()
    }

    /// Ends the Connected period after a transport failure.
    pub(crate) fn fail(&self, error: &MpdError) {
        if !self.closed.is_cancelled() {
            warn!(error = %error, "Connection lost");
            self.closed.cancel();
        }
    }

    /// Takes the gateway: waits for our turn, interrupts the idle listener
    /// and locks the transport. Fails with `ConnectionClosed` if the period
    /// ends while waiting.
    pub(crate) async fn acquire(self: &Arc<Self>) -> Result<SessionGuard, MpdError> {
        let turn = tokio::select! {
            biased;
            _ = self.closed.cancelled() => return Err(MpdError::ConnectionClosed),
            turn = self.turn.clone().lock_owned() => turn,
        };

        let interrupt = Interrupt::begin(self);
        let transport = tokio::select! {
            biased;
            _ = self.closed.cancelled() => return Err(MpdError::ConnectionClosed),
            transport = self.transport.clone().lock_owned() => transport,
        };
        interrupt.finish();

        self.phase.send_replace(HandOffPhase::Executing);
        trace!("Gateway acquired");
        Ok(SessionGuard {
            link: self.clone(),
            transport,
            _turn: turn,
        })
    }

    /// Locks the transport for the idle listener, which only idles when no
    /// command is waiting. Returns `None` when the listener has to wait for
    /// the current command first.
    pub(crate) async fn claim_idle(&self) -> Option<OwnedMutexGuard<Session>> {
        let transport = tokio::select! {
            biased;
            _ = self.closed.cancelled() => return None,
            transport = self.transport.clone().lock_owned() => transport,
        };
        let claimed = self.phase.send_if_modified(|phase| {
            if phase.idle_may_claim() {
                *phase = HandOffPhase::Idling;
                true
            } else {
                false
            }
        });
        claimed.then_some(transport)
    }

    /// Marks the idle wait as over. A pending interruption is left in place
    /// so the waiting command proceeds.
    pub(crate) fn release_idle(&self) {
        self.phase.send_if_modified(|phase| {
            if *phase == HandOffPhase::Idling {
                *phase = HandOffPhase::Released;
                true
            } else {
                false
            }
        });
    }
}

// Undoes the interruption if acquisition is abandoned before the transport
// was locked, so the listener does not wait for a command that never runs.
struct Interrupt<'a> {
    link: &'a Link,
    armed: bool,
}

impl<'a> Interrupt<'a> {
    fn begin(link: &'a Link) -> Self {
        let previous = link.phase.send_replace(HandOffPhase::Interrupting);
        if previous == HandOffPhase::Idling {
            debug!("Interrupting idle wait");
        }
        Self { link, armed: true }
    }

    fn finish(mut self) {
        self.armed = false;
    }
}

impl Drop for Interrupt<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.link.phase.send_replace(HandOffPhase::ResumingIdle);
        }
    }
}

/// Exclusive access to the session, held by one gateway caller.
///
/// Dropping the guard hands the transport back to the idle listener. A
/// transport failure seen while holding it ends the Connected period.
pub struct SessionGuard {
    link: Arc<Link>,
    transport: OwnedMutexGuard<Session>,
    _turn: OwnedMutexGuard<()>,
}

impl Deref for SessionGuard {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.transport
    }
}

impl DerefMut for SessionGuard {
    fn deref_mut(&mut self) -> &mut Session {
        &mut self.transport
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.transport.is_desynchronized() {
            // A dropped command future can leave its reply in the stream
            self.link.fail(&MpdError::InvalidResponse(
                "Session released with a response still pending".to_string(),
            ));
        }
        self.link.phase.send_replace(HandOffPhase::ResumingIdle);
        trace!("Gateway released");
    }
}

impl std::fmt::Debug for SessionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionGuard")
            .field("session", &*self.transport)
            .finish()
    }
}
