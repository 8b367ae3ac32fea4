//! Ambient stack: configuration (§6, §11).
//!
//! Loading is pure, synchronous, and fallible: [`FilterConfig::parse`] never
//! performs network I/O. Inline key material is parsed eagerly (so a bad
//! inline PEM/JWKS is a construction-time [`ConfigError`], matching §4.4's
//! initialization rule), but a remote pubkey source is only a URI + cluster
//! until the fetch coordinator needs it.

use crate::error::ConfigError;
use crate::keyset::{KeyFormat, KeySet};
use serde::Deserialize;
use std::collections::HashSet;

/// Where an issuer's verification key material comes from. Encodes "exactly
/// one of inline or remote" (§3 `IssuerConfig` invariant) at the type level.
#[derive(Debug, Clone)]
pub enum PubkeySource {
    Inline { format: KeyFormat, keyset: KeySet },
    Remote {
        format: KeyFormat,
        uri: String,
        cluster: String,
        cache_ttl_sec: u64,
    },
}

/// How the verified payload is rendered into the downstream header (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserinfoType {
    Payload,
    PayloadBase64url,
    HeaderPayloadBase64url,
}

impl Default for UserinfoType {
    fn default() -> Self {
        UserinfoType::PayloadBase64url
    }
}

/// One registered issuer, validated (§6 "Rejecting configuration").
#[derive(Debug, Clone)]
pub struct IssuerConfig {
    pub name: String,
    pub audiences: HashSet<String>,
    pub pubkey: PubkeySource,
    pub jwt_headers: Vec<String>,
    pub jwt_params: Vec<String>,
}

impl IssuerConfig {
    /// `(uri, cluster, format)` if this issuer's key source is remote;
    /// `None` for inline sources, which never need a fetch.
    #[must_use]
    pub fn pubkey_remote(&self) -> Option<(String, String, KeyFormat)> {
        match &self.pubkey {
            PubkeySource::Remote {
                uri,
                cluster,
                format,
                ..
            } => Some((uri.clone(), cluster.clone(), *format)),
            PubkeySource::Inline { .. } => None,
        }
    }
}

/// Raw, directly-deserializable shape of one issuer entry (§6).
#[derive(Debug, Deserialize)]
struct RawIssuer {
    name: Option<String>,
    #[serde(default)]
    audiences: Vec<String>,
    pubkey: Option<RawPubkey>,
    #[serde(default)]
    jwt_headers: Vec<String>,
    #[serde(default)]
    jwt_params: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawPubkey {
    #[serde(rename = "type")]
    kind: String,
    value: Option<String>,
    uri: Option<String>,
    cluster: Option<String>,
    #[serde(default = "default_cache_ttl")]
    pubkey_cache_expiration_sec: u64,
}

const fn default_cache_ttl() -> u64 {
    600
}

impl TryFrom<RawIssuer> for IssuerConfig {
    type Error = ConfigError;

    fn try_from(raw: RawIssuer) -> Result<Self, ConfigError> {
        let name = raw.name.ok_or(ConfigError::MissingName)?;
        let pubkey = raw
            .pubkey
            .ok_or_else(|| ConfigError::MissingPubkey(name.clone()))?;

        let format = match pubkey.kind.as_str() {
            "pem" => KeyFormat::Pem,
            "jwks" => KeyFormat::Jwks,
            other => return Err(ConfigError::InvalidPubkeyType(other.to_string())),
        };

        let has_inline = pubkey.value.is_some();
        let has_remote = pubkey.uri.is_some() || pubkey.cluster.is_some();
        if has_inline == has_remote {
            return Err(ConfigError::AmbiguousPubkeySource(name));
        }

        let source = if has_inline {
            let value = pubkey.value.expect("checked above");
            let keyset = KeySet::parse(format, value.as_bytes()).map_err(|source| {
                ConfigError::InlineKeySet {
                    name: name.clone(),
                    source,
                }
            })?;
            PubkeySource::Inline { format, keyset }
        } else {
            let (Some(uri), Some(cluster)) = (pubkey.uri, pubkey.cluster) else {
                return Err(ConfigError::IncompleteRemoteSource(name));
            };
            PubkeySource::Remote {
                format,
                uri,
                cluster,
                cache_ttl_sec: pubkey.pubkey_cache_expiration_sec,
            }
        };

        Ok(IssuerConfig {
            name,
            audiences: raw.audiences.into_iter().collect(),
            pubkey: source,
            jwt_headers: raw.jwt_headers,
            jwt_params: raw.jwt_params,
        })
    }
}

/// Top-level filter configuration (§6).
#[derive(Debug, Clone)]
pub struct FilterConfig {
    pub issuers: Vec<IssuerConfig>,
    pub userinfo_type: UserinfoType,
}

#[derive(Debug, Deserialize)]
struct RawFilterConfig {
    issuers: Vec<RawIssuer>,
    #[serde(default)]
    userinfo_type: Option<String>,
}

impl FilterConfig {
    /// Parse either JSON or YAML (§11) — the host may hand either
    /// representation, and JSON is a subset of YAML, so one parser serves
    /// both.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let raw: RawFilterConfig = serde_yaml::from_str(text)?;

        let userinfo_type = match raw.userinfo_type.as_deref() {
            None => UserinfoType::default(),
            Some("payload") => UserinfoType::Payload,
            Some("payload_base64url") => UserinfoType::PayloadBase64url,
            Some("header_payload_base64url") => UserinfoType::HeaderPayloadBase64url,
            Some(other) => return Err(ConfigError::InvalidUserinfoType(other.to_string())),
        };

        let mut seen = HashSet::new();
        let mut issuers = Vec::with_capacity(raw.issuers.len());
        for raw_issuer in raw.issuers {
            let issuer = IssuerConfig::try_from(raw_issuer)?;
            if !seen.insert(issuer.name.clone()) {
                return Err(ConfigError::DuplicateIssuer(issuer.name));
            }
            issuers.push(issuer);
        }

        Ok(FilterConfig {
            issuers,
            userinfo_type,
        })
    }
}
