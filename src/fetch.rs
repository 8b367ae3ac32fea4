//! Component E: fetch coordinator.
//!
//! Issues at most one outstanding HTTP GET per issuer at a time (§4.5,
//! §8 invariant 2). A second caller that arrives while a fetch is already
//! in flight for the same issuer joins it instead of starting a new GET
//! (the recommended design from the Open Questions in §9).
//!
//! The fetch itself runs on a detached `tokio::spawn`-ed task so that it
//! outlives any single waiter: if one of several joined callers is
//! destroyed and cancels, the fetch keeps running for the others unless
//! its own cancel handle is invoked.

use crate::transport::{FetchOutcome, HostTransport};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Cancellation handle for one issuer's in-flight fetch. Invoking it stops
/// the underlying GET for every waiter currently joined to it; the
/// completion callback of whichever `AuthRequest` triggered the cancel is
/// suppressed one level up, by the authenticator's own per-request
/// cancellation check (§4.6 step 5) — this handle only tears down the HTTP
/// call itself.
#[derive(Clone)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }
}

struct InFlight {
    cancel: CancellationToken,
    notify: broadcast::Sender<FetchOutcome>,
}

/// Coordinates single-flight fetches across concurrent requests for the
/// same issuer within one worker.
pub struct FetchCoordinator {
    transport: Arc<dyn HostTransport>,
    in_flight: Arc<Mutex<HashMap<String, InFlight>>>,
}

impl FetchCoordinator {
    #[must_use]
    pub fn new(transport: Arc<dyn HostTransport>) -> Self {
        FetchCoordinator {
            transport,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Start (or join) a fetch for `issuer`. Returns a [`CancelHandle`]
    /// immediately, before the fetch completes, so the filter adapter can
    /// record it for a later `destroy` (§4.8) — and a receiver the caller
    /// awaits separately to learn the outcome.
    pub async fn start(
        &self,
        issuer: &str,
        uri: &str,
        cluster: &str,
    ) -> (CancelHandle, broadcast::Receiver<FetchOutcome>) {
        let mut guard = self.in_flight.lock().await;
        if let Some(existing) = guard.get(issuer) {
            debug!(issuer, "joining in-flight fetch");
            return (
                CancelHandle {
                    token: existing.cancel.clone(),
                },
                existing.notify.subscribe(),
            );
        }

        debug!(issuer, uri, cluster, "starting new fetch");
        let cancel = CancellationToken::new();
        let (tx, rx) = broadcast::channel(1);
        guard.insert(
            issuer.to_string(),
            InFlight {
                cancel: cancel.clone(),
                notify: tx.clone(),
            },
        );
        drop(guard);

        let transport = Arc::clone(&self.transport);
        let in_flight = Arc::clone(&self.in_flight);
        let uri = uri.to_string();
        let cluster = cluster.to_string();
        let issuer_owned = issuer.to_string();
        let cancel_for_task = cancel.clone();

        tokio::spawn(async move {
            let outcome = tokio::select! {
                biased;
                () = cancel_for_task.cancelled() => {
                    debug!(issuer = %issuer_owned, "fetch cancelled before completion");
                    in_flight.lock().await.remove(&issuer_owned);
                    return;
                }
                outcome = transport.fetch(&uri, &cluster) => outcome,
            };
            in_flight.lock().await.remove(&issuer_owned);
            // No receivers left (every waiter dropped its receiver) is a
            // normal outcome, not an error: the result is simply unwanted.
            let _ = tx.send(outcome);
        });

        (CancelHandle { token: cancel }, rx)
    }

    /// The cancel handle for an issuer's in-flight fetch, if any.
    pub async fn cancel_handle(&self, issuer: &str) -> Option<CancelHandle> {
        self.in_flight
            .lock()
            .await
            .get(issuer)
            .map(|f| CancelHandle {
                token: f.cancel.clone(),
            })
    }
}
