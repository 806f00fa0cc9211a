use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace};

use crate::events::{ConnectorEvent, Subsystem};
use crate::gateway::Link;
use crate::models::StatusSnapshot;
use crate::state::HandOffPhase;

/// Runs the idle listener for one Connected period.
///
/// Each round waits for the transport to be free, parks in `idle`, and on a
/// genuine change refreshes the status snapshot before raising one event per
/// changed subsystem. Interrupted waits with no change raise nothing. Returns
/// when the period ends; a transport failure ends the period for everyone.
pub(crate) async fn run_idle_listener(
    link: Arc<Link>,
    status_tx: Arc<watch::Sender<Arc<StatusSnapshot>>>,
    events: mpsc::UnboundedSender<ConnectorEvent>,
) {
    debug!("Idle listener started.");
    let mut phase_rx = link.subscribe_phase();

    loop {
        // Wait until no command is pending or running
        let claimable = tokio::select! {
            biased;
            _ = link.closed.cancelled() => break,
            ready = async { phase_rx.wait_for(|p| p.idle_may_claim()).await.map(|_| ()) } => ready,
        };
        if claimable.is_err() {
            break;
        }

        let Some(mut session) = link.claim_idle().await else {
            if link.closed.is_cancelled() {
                break;
            }
            // A command got in first
            continue;
        };

        let mut interrupt_rx = link.subscribe_phase();
        let interrupted = async move {
            let _ = interrupt_rx
                .wait_for(|p| *p == HandOffPhase::Interrupting)
                .await
                .map(|_| ());
        };
        let result = session.idle(&Subsystem::WATCHED, interrupted).await;
        link.release_idle();

        let changed = match result {
            Ok(changed) => changed,
            Err(e) => {
                drop(session);
                if !link.closed.is_cancelled() {
                    link.fail(&e);
                }
                break;
            }
        };
        if changed.is_empty() {
            trace!("Spurious idle wake");
            continue;
        }

        // Refresh while still holding the transport, so hooks see the new status
        let refreshed = session.status().await;
        drop(session);
        match refreshed {
            Ok(status) => {
                status_tx.send_replace(Arc::new(status));
            }
            Err(e) if e.is_transport() => {
                link.fail(&e);
                break;
            }
            Err(e) => debug!(error = %e, "Status refresh after idle failed"),
        }

        if link.closed.is_cancelled() {
            break;
        }
        for subsystem in changed {
            debug!(%subsystem, "Subsystem changed");
            if events.send(ConnectorEvent::SubsystemChanged(subsystem)).is_err() {
                break;
            }
        }
    }
    info!("Idle listener finished.");
}
