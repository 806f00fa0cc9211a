use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, trace};

use crate::events::ConnectorEvent;
use crate::gateway::Link;
use crate::models::StatusSnapshot;

/// Ticks for one Connected period: refreshes the status snapshot through the
/// gateway (elapsed time is never pushed by the server), then raises a
/// heartbeat event.
pub(crate) async fn run_heartbeat(
    link: Arc<Link>,
    period: Duration,
    status_tx: Arc<watch::Sender<Arc<StatusSnapshot>>>,
    events: mpsc::UnboundedSender<ConnectorEvent>,
) {
    debug!(?period, "Heartbeat started.");
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately and the status was just fetched
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = link.closed.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let refreshed = match link.acquire().await {
            Ok(mut session) => session.status().await,
            Err(_) => break,
        };
        match refreshed {
            Ok(status) => {
                status_tx.send_replace(Arc::new(status));
            }
            // The guard has already ended the period
            Err(e) if e.is_transport() => break,
            Err(e) => debug!(error = %e, "Heartbeat status refresh failed"),
        }

        if link.closed.is_cancelled() {
            break;
        }
        trace!("Heartbeat");
        if events.send(ConnectorEvent::Heartbeat).is_err() {
            break;
        }
    }
    debug!("Heartbeat finished.");
}
