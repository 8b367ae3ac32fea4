//! Component G: filter adapter.
//!
//! Bridges the host's filter-chain callbacks (decode headers/data/
//! trailers, destroy) to the authenticator (F). The host proxy's own
//! callback plumbing is out of scope (§1); this only implements the
//! stop/resume discipline and cancellation contract of §4.8.
//!
//! Design Notes §9 call for collapsing the source's polymorphic callback
//! interfaces into "a single on-completion callable parameter." In async
//! Rust that collapse is `async fn decode_headers`, whose suspension is
//! the runtime's job rather than an explicit Continue/StopIteration
//! split: a host driving this adapter simply awaits (or spawns and joins)
//! the call. `destroy` remains a distinct, synchronously-callable entry
//! point so the host can cancel a suspended request from another task.

use crate::authenticator::{Authenticator, RequestContext, Verdict};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// What a host should do in response to `decode_data`/`decode_trailers`
/// while `decode_headers` may still be suspended on a key fetch (§4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamAction {
    Continue,
    StopIteration,
}

/// Result of driving `decode_headers` to completion.
#[derive(Debug, Clone)]
pub enum DecodeOutcome {
    Continue,
    LocalReply { status: u16, body: String },
}

struct Shared {
    cancel: Option<CancellationToken>,
}

/// Bridges one request's host callbacks to the authenticator.
pub struct FilterAdapter {
    authenticator: Arc<Authenticator>,
    shared: Mutex<Shared>,
}

impl FilterAdapter {
    #[must_use]
    pub fn new(authenticator: Arc<Authenticator>) -> Self {
        FilterAdapter {
            authenticator,
            shared: Mutex::new(Shared { cancel: None }),
        }
    }

    /// Starts F. Records a cancel handle before the first suspension point
    /// so a concurrent `destroy` can always find it (§4.8).
    pub async fn decode_headers(&self, ctx: &mut RequestContext, now: i64) -> DecodeOutcome {
        let cancel = CancellationToken::new();
        self.shared.lock().unwrap().cancel = Some(cancel.clone());

        let verdict = self.authenticator.authenticate(ctx, now, &cancel).await;
        self.shared.lock().unwrap().cancel = None;

        match verdict {
            Verdict::Unauthenticated | Verdict::Ok(_) => DecodeOutcome::Continue,
            Verdict::Err(err) => DecodeOutcome::LocalReply {
                status: err.http_status(),
                body: err.code().to_string(),
            },
            // Only reachable if `destroy` raced decode_headers itself;
            // there is no reply to emit for a request that no longer
            // exists from the host's perspective.
            Verdict::Aborted => DecodeOutcome::Continue,
        }
    }

    /// `decodeData`/`decodeTrailers` (§4.8): StopIteration while a fetch is
    /// outstanding, Continue otherwise.
    #[must_use]
    pub fn decode_data(&self) -> StreamAction {
        if self.shared.lock().unwrap().cancel.is_some() {
            StreamAction::StopIteration
        } else {
            StreamAction::Continue
        }
    }

    #[must_use]
    pub fn decode_trailers(&self) -> StreamAction {
        self.decode_data()
    }

    /// `destroy` (§4.8, §5 cancellation): if suspended, cancel and drop the
    /// anchor. Re-entrant: calling this twice, or after completion, is a
    /// no-op.
    pub fn destroy(&self) {
        if let Some(cancel) = self.shared.lock().unwrap().cancel.take() {
            debug!("destroying request, cancelling outstanding fetch if any");
            cancel.cancel();
        }
    }
}
