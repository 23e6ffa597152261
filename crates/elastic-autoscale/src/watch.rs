//! Feeds store change notifications into the work queue.

use elastic_state::{PolicyEvent, StateStore};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::queue::WorkQueue;

/// Forward every policy change to `queue` until `shutdown` fires or the
/// store goes away.
///
/// When the receiver falls behind, the missed events are unknown, so every
/// stored policy is enqueued again.
pub async fn forward_events(
    store: StateStore,
    queue: WorkQueue,
    mut events: broadcast::Receiver<PolicyEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    debug!(?event, "policy changed");
                    queue.add(event.key()).await;
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "change notifications lagged, resyncing");
                    match store.list_policy_keys() {
                        Ok(keys) => {
                            for key in keys {
                                queue.add(&key).await;
                            }
                        }
                        Err(e) => warn!(error = %e, "resync after lag failed"),
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = shutdown.changed() => break,
        }
    }
    info!("event producer stopped");
}
