//! Per-request JWT authentication state machine and per-worker public-key
//! cache for an HTTP sidecar proxy filter.
//!
//! The module layout mirrors the pipeline a request flows through:
//!
//! - [`token`] (A) parses a compact JWT without verifying it.
//! - [`keyset`] (B) parses PEM/JWKS key material into a lookup table.
//! - [`verify`] (C) checks a token's signature against a key set.
//! - [`config`] loads and validates the filter's static configuration.
//! - [`cache`] (D) is the worker-local `issuer -> key set` table.
//! - [`transport`] and [`fetch`] (E) fetch and single-flight remote keys.
//! - [`authenticator`] (F) drives the per-request state machine end to end.
//! - [`filter`] (G) bridges host callbacks to the authenticator.
//!
//! [`error`] holds the error taxonomy shared across all of the above.

pub mod authenticator;
pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod filter;
pub mod keyset;
pub mod token;
pub mod transport;
pub mod verify;

pub use authenticator::{Authenticator, RequestContext, Success, Verdict};
pub use cache::IssuerCache;
pub use config::{FilterConfig, IssuerConfig};
pub use error::{AuthError, ConfigError};
pub use fetch::FetchCoordinator;
pub use filter::{DecodeOutcome, FilterAdapter, StreamAction};
pub use transport::{HostTransport, ReqwestTransport};
