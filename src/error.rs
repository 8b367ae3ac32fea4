//! Error taxonomy.
//!
//! Construction-time failures ([`ConfigError`]) and per-request failures
//! ([`AuthError`]) are kept separate: a bad config aborts filter construction
//! and never reaches a live request, while an [`AuthError`] always maps to a
//! 401 at the filter boundary (see `filter::FilterAdapter`).

use thiserror::Error;

/// Failures while building an [`crate::config::IssuerConfig`] or
/// [`crate::config::FilterConfig`] from raw configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("an issuer entry is missing a name")]
    MissingName,

    #[error("issuer \"{0}\" is missing a pubkey source")]
    MissingPubkey(String),

    #[error("issuer \"{0}\" pubkey type must be \"pem\" or \"jwks\"")]
    InvalidPubkeyType(String),

    #[error(
        "issuer \"{0}\" pubkey source must be exactly one of inline `value` or (`uri` + `cluster`)"
    )]
    AmbiguousPubkeySource(String),

    #[error("issuer \"{0}\" remote pubkey source requires both `uri` and `cluster`")]
    IncompleteRemoteSource(String),

    #[error("issuer \"{name}\" inline key material could not be parsed: {source}")]
    InlineKeySet {
        name: String,
        #[source]
        source: KeySetError,
    },

    #[error("duplicate issuer \"{0}\" in configuration")]
    DuplicateIssuer(String),

    #[error("invalid userinfo_type \"{0}\"")]
    InvalidUserinfoType(String),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Failures parsing the compact token string (component A).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("token is not three non-empty dot-separated base64url segments")]
    BadFormat,

    #[error("token segment is not valid JSON")]
    BadJson,

    #[error("token is missing a required claim: {0}")]
    MissingRequired(&'static str),

    #[error("`aud` claim must be a string or an array of strings")]
    AudTypeInvalid,
}

/// Failures parsing key material (component B).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeySetError {
    #[error("PEM key material contains trailing or malformed content")]
    MalformedPem,

    #[error("PEM key could not be parsed: {0}")]
    PemParse(String),

    #[error("JWKS is not valid JSON with a top-level `keys` array")]
    MalformedJwks,

    #[error("JWKS contains no usable keys under a supported algorithm")]
    NoUsableKeys,
}

/// Failures verifying a signature (component C).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum VerifyError {
    #[error("token declares a kid absent from the key set")]
    KidNotFound,

    #[error("no key set entries matched the token's algorithm")]
    NoMatchingKey,

    #[error("signature verification failed")]
    SignatureInvalid,

    #[error("unsupported or malformed signature encoding")]
    MalformedSignature,
}

/// Failures performing the remote key fetch (component E).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("non-200 response ({0})")]
    BadStatus(u16),

    #[error("response body was empty")]
    EmptyBody,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("fetch was cancelled")]
    Cancelled,
}

/// The per-request authentication outcome's failure half (component F/G),
/// mirroring the stable symbolic names of the error taxonomy. Every variant
/// maps to HTTP 401 at the filter boundary; [`AuthError::code`] is the
/// symbolic name carried in the local-reply body and in logs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Authorization header present but not \"Bearer \"-prefixed")]
    BearerPrefixMissing,

    #[error("token is malformed: {0}")]
    BadFormat(TokenError),

    #[error("token header or payload is not valid JSON")]
    BadJson,

    #[error("token is missing a required claim: {0}")]
    MissingClaim(&'static str),

    #[error("token expired")]
    Expired,

    #[error("issuer \"{0}\" is not registered")]
    UnknownIssuer(String),

    #[error("token audience not in the configured set for issuer \"{0}\"")]
    AudienceNotAllowed(String),

    #[error("failed to fetch signing key for issuer \"{0}\": {1}")]
    KeyFetchFailed(String, FetchError),

    #[error("failed to parse fetched key material for issuer \"{0}\": {1}")]
    KeyParseFailed(String, KeySetError),

    #[error("token kid not found in key set for issuer \"{0}\"")]
    KidNotFound(String),

    #[error("signature verification failed for issuer \"{0}\"")]
    SignatureInvalid(String),
}

impl AuthError {
    /// Stable symbolic name, matching §7 of the design. Used both as the
    /// local-reply body and as a `tracing` field; never includes user data.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::BearerPrefixMissing => "BearerPrefixMissing",
            AuthError::BadFormat(_) => "BadFormat",
            AuthError::BadJson => "BadJson",
            AuthError::MissingClaim(_) => "MissingClaim",
            AuthError::Expired => "Expired",
            AuthError::UnknownIssuer(_) => "UnknownIssuer",
            AuthError::AudienceNotAllowed(_) => "AudienceNotAllowed",
            AuthError::KeyFetchFailed(_, _) => "KeyFetchFailed",
            AuthError::KeyParseFailed(_, _) => "KeyParseFailed",
            AuthError::KidNotFound(_) => "KidNotFound",
            AuthError::SignatureInvalid(_) => "SignatureInvalid",
        }
    }

    /// All failures in this taxonomy map to the same status (§7).
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        401
    }
}

impl From<TokenError> for AuthError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::BadFormat => AuthError::BadFormat(err),
            TokenError::BadJson => AuthError::BadJson,
            TokenError::MissingRequired(claim) => AuthError::MissingClaim(claim),
            TokenError::AudTypeInvalid => AuthError::BadFormat(err),
        }
    }
}
