//! Component F: per-request authenticator.
//!
//! Drives the state machine of §4.6: extract → parse & precheck → key
//! acquisition (cache hit, or fetch via component E) → verify (component
//! C) → header rewrite. The only suspension point is the fetch; everything
//! else runs to completion without yielding, so a request with an inline
//! or already-cached key resolves synchronously.

use crate::cache::IssuerCache;
use crate::config::{IssuerConfig, UserinfoType};
use crate::error::{AuthError, FetchError};
use crate::fetch::FetchCoordinator;
use crate::keyset::KeySet;
use crate::token::Token;
use crate::transport::FetchOutcome;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

pub const DOWNSTREAM_HEADER: &str = "authenticated-userinfo";
const DEFAULT_QUERY_PARAM: &str = "access_token";

/// Where the candidate token text was read from, so the header-rewrite
/// step (§4.7) knows whether to strip `Authorization`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenSource {
    Authorization,
    Header(String),
    Query(String),
}

/// The host-supplied request surface F needs: header values (keys expected
/// pre-lowercased by the caller) and the raw query string. Standing in for
/// the host's native header map, which is out of scope (§1).
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub headers: HashMap<String, String>,
    pub query: Option<String>,
}

impl RequestContext {
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// A successful authentication's effect on the request (§4.7).
#[derive(Debug, Clone)]
pub struct Success {
    pub remove_header: Option<String>,
    pub downstream_header_name: String,
    pub downstream_header_value: String,
}

/// Outcome of running the state machine to completion (§4.6).
#[derive(Debug, Clone)]
pub enum Verdict {
    /// No token found: advisory passthrough, request unmodified.
    Unauthenticated,
    Ok(Success),
    Err(AuthError),
    /// Host destroyed the request while a fetch was outstanding. The
    /// caller must not invoke any completion callback for this outcome
    /// (§4.6 step 5, §8 invariant 1).
    Aborted,
}

/// Scans the standard `Authorization` header, then every configured
/// issuer's custom headers, then query parameters, in that order (§4.6
/// step 1, §6 wire carriers). First non-empty source wins.
fn extract_token(
    issuers: &[IssuerConfig],
    ctx: &RequestContext,
) -> Result<Option<(String, TokenSource)>, AuthError> {
    if let Some(value) = ctx.header("authorization") {
        return match value.strip_prefix("Bearer ") {
            Some(token) if !token.is_empty() => {
                Ok(Some((token.to_string(), TokenSource::Authorization)))
            }
            _ => Err(AuthError::BearerPrefixMissing),
        };
    }

    for issuer in issuers {
        for header_name in &issuer.jwt_headers {
            let key = header_name.to_ascii_lowercase();
            if let Some(value) = ctx.header(&key) {
                if !value.is_empty() {
                    return Ok(Some((
                        value.to_string(),
                        TokenSource::Header(header_name.clone()),
                    )));
                }
            }
        }
    }

    let mut param_names: Vec<&str> = issuers
        .iter()
        .flat_map(|i| i.jwt_params.iter().map(String::as_str))
        .collect();
    if param_names.is_empty() {
        param_names.push(DEFAULT_QUERY_PARAM);
    }
    if let Some(query) = &ctx.query {
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            if !value.is_empty() && param_names.contains(&key.as_ref()) {
                return Ok(Some((value.into_owned(), TokenSource::Query(key.into_owned()))));
            }
        }
    }

    Ok(None)
}

/// Drives the per-request authentication state machine against one
/// worker's cache and fetch coordinator.
pub struct Authenticator {
    cache: Arc<Mutex<IssuerCache>>,
    fetcher: Arc<FetchCoordinator>,
    userinfo_type: UserinfoType,
}

impl Authenticator {
    #[must_use]
    pub fn new(
        cache: Arc<Mutex<IssuerCache>>,
        fetcher: Arc<FetchCoordinator>,
        userinfo_type: UserinfoType,
    ) -> Self {
        Authenticator {
            cache,
            fetcher,
            userinfo_type,
        }
    }

    /// Runs the state machine to completion. `now` is seconds since epoch,
    /// supplied by the caller so tests can pin the clock. `cancel` is a
    /// per-request token the filter adapter cancels on `destroy`.
    #[instrument(skip(self, ctx, cancel), fields(issuer = tracing::field::Empty))]
    pub async fn authenticate(
        &self,
        ctx: &mut RequestContext,
        now: i64,
        cancel: &CancellationToken,
    ) -> Verdict {
        let issuer_configs = {
            let cache = self.cache.lock().await;
            cache.issuers().cloned().collect::<Vec<_>>()
        };

        let (raw, source) = match extract_token(&issuer_configs, ctx) {
            Ok(None) => return Verdict::Unauthenticated,
            Ok(Some(found)) => found,
            Err(err) => return Verdict::Err(err),
        };

        let token = match Token::parse(&raw) {
            Ok(token) => token,
            Err(err) => return Verdict::Err(err.into()),
        };
        tracing::Span::current().record("issuer", tracing::field::display(&token.iss));

        if token.exp <= now {
            return Verdict::Err(AuthError::Expired);
        }

        let (audiences, pubkey_state) = {
            let cache = self.cache.lock().await;
            let Some(entry) = cache.lookup(&token.iss) else {
                return Verdict::Err(AuthError::UnknownIssuer(token.iss.clone()));
            };
            let pubkey_state = if let Some(keyset) = &entry.keyset {
                if IssuerCache::expired(entry, now) {
                    PubkeyState::Stale(entry.config.pubkey_remote())
                } else {
                    PubkeyState::Cached(keyset.clone())
                }
            } else {
                PubkeyState::Stale(entry.config.pubkey_remote())
            };
            (entry.config.audiences.clone(), pubkey_state)
        };

        if !audiences.is_empty() && audiences.is_disjoint(&token.aud) {
            return Verdict::Err(AuthError::AudienceNotAllowed(token.iss.clone()));
        }

        let keyset = match pubkey_state {
            PubkeyState::Cached(keyset) => keyset,
            PubkeyState::Stale(remote) => {
                let Some((uri, cluster, format)) = remote else {
                    // inline sources are installed at construction and never
                    // go stale; reaching here means construction-time parsing
                    // somehow left no key set, which config.rs prevents.
                    return Verdict::Err(AuthError::KeyFetchFailed(
                        token.iss.clone(),
                        FetchError::EmptyBody,
                    ));
                };
                match self
                    .acquire_via_fetch(&token.iss, &uri, &cluster, format, now, cancel)
                    .await
                {
                    Ok(keyset) => keyset,
                    Err(verdict) => return verdict,
                }
            }
        };

        match crate::verify::verify(&token, &keyset) {
            Ok(()) => {}
            Err(crate::error::VerifyError::KidNotFound) => {
                return Verdict::Err(AuthError::KidNotFound(token.iss.clone()))
            }
            Err(_) => return Verdict::Err(AuthError::SignatureInvalid(token.iss.clone())),
        }

        let remove_header = match source {
            TokenSource::Authorization => Some("authorization".to_string()),
            TokenSource::Header(_) | TokenSource::Query(_) => None,
        };
        let downstream_header_value = match self.userinfo_type {
            UserinfoType::Payload => {
                serde_json::to_string(token.payload_json()).unwrap_or_default()
            }
            UserinfoType::PayloadBase64url => token.payload_b64().to_string(),
            UserinfoType::HeaderPayloadBase64url => {
                format!("{}.{}", token.header_b64(), token.payload_b64())
            }
        };

        if let Some(header) = &remove_header {
            ctx.headers.remove(header);
        }
        ctx.headers.insert(
            DOWNSTREAM_HEADER.to_string(),
            downstream_header_value.clone(),
        );

        Verdict::Ok(Success {
            remove_header,
            downstream_header_name: DOWNSTREAM_HEADER.to_string(),
            downstream_header_value,
        })
    }

    async fn acquire_via_fetch(
        &self,
        iss: &str,
        uri: &str,
        cluster: &str,
        format: crate::keyset::KeyFormat,
        now: i64,
        cancel: &CancellationToken,
    ) -> Result<KeySet, Verdict> {
        let (cancel_handle, mut rx) = self.fetcher.start(iss, uri, cluster).await;

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!(issuer = iss, "request cancelled while fetch outstanding");
                cancel_handle.cancel();
                return Err(Verdict::Aborted);
            }
            outcome = rx.recv() => outcome.unwrap_or(FetchOutcome::Failed(FetchError::Cancelled)),
        };

        let body = match outcome {
            FetchOutcome::Ok(body) => body,
            FetchOutcome::Failed(err) => {
                warn!(issuer = iss, %err, "key fetch failed");
                return Err(Verdict::Err(AuthError::KeyFetchFailed(iss.to_string(), err)));
            }
        };

        let keyset = KeySet::parse(format, &body).map_err(|err| {
            Verdict::Err(AuthError::KeyParseFailed(iss.to_string(), err))
        })?;

        self.cache.lock().await.install(iss, keyset.clone(), now);
        Ok(keyset)
    }
}

enum PubkeyState {
    Cached(KeySet),
    Stale(Option<(String, String, crate::keyset::KeyFormat)>),
}
