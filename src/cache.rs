//! Component D: worker-local issuer cache.
//!
//! One `IssuerCache` lives per worker (§5: single-threaded cooperative, no
//! shared mutable state between workers). No locks, no atomics: a worker
//! owns its table outright.

use crate::config::{FilterConfig, IssuerConfig, PubkeySource};
use crate::error::ConfigError;
use crate::keyset::KeySet;
use std::collections::HashMap;
use tracing::debug;

/// Per-issuer runtime state within one worker (§3).
pub struct CacheEntry {
    pub config: IssuerConfig,
    pub keyset: Option<KeySet>,
    /// Unix seconds. `None` means "never expires" or "nothing cached yet".
    pub expires_at: Option<i64>,
}

impl CacheEntry {
    fn from_config(config: IssuerConfig) -> Self {
        match &config.pubkey {
            PubkeySource::Inline { keyset, .. } => {
                let keyset = keyset.clone();
                CacheEntry {
                    config,
                    keyset: Some(keyset),
                    expires_at: None,
                }
            }
            PubkeySource::Remote { .. } => CacheEntry {
                config,
                keyset: None,
                expires_at: None,
            },
        }
    }
}

/// Worker-local `issuer → CacheEntry` table (§4.4).
pub struct IssuerCache {
    entries: HashMap<String, CacheEntry>,
}

impl IssuerCache {
    /// Build a fresh cache for one worker. Inline key material is parsed
    /// eagerly by [`IssuerConfig::try_from`] during config construction, so
    /// building a cache from an already-valid [`FilterConfig`] cannot fail.
    #[must_use]
    pub fn new(config: &FilterConfig) -> Self {
        let entries = config
            .issuers
            .iter()
            .cloned()
            .map(|issuer| (issuer.name.clone(), CacheEntry::from_config(issuer)))
            .collect();
        IssuerCache { entries }
    }

    /// Build a cache directly from validated issuer configs, surfacing any
    /// [`ConfigError`] (used when issuers come from a source other than a
    /// parsed [`FilterConfig`], e.g. dynamic tests).
    pub fn try_new(issuers: Vec<IssuerConfig>) -> Result<Self, ConfigError> {
        let mut entries = HashMap::with_capacity(issuers.len());
        for issuer in issuers {
            let name = issuer.name.clone();
            if entries.insert(name.clone(), CacheEntry::from_config(issuer)).is_some() {
                return Err(ConfigError::DuplicateIssuer(name));
            }
        }
        Ok(IssuerCache { entries })
    }

    /// `lookup(iss) → CacheEntry*`, stable for the worker's lifetime (§4.4).
    #[must_use]
    pub fn lookup(&self, iss: &str) -> Option<&CacheEntry> {
        self.entries.get(iss)
    }

    #[must_use]
    pub fn lookup_mut(&mut self, iss: &str) -> Option<&mut CacheEntry> {
        self.entries.get_mut(iss)
    }

    /// All registered issuer configs, for token-extraction rules that must
    /// be consulted before the token (and thus its `iss`) is known (§4.6
    /// step 1).
    pub fn issuers(&self) -> impl Iterator<Item = &IssuerConfig> {
        self.entries.values().map(|e| &e.config)
    }

    /// `install(iss, KeySet, now)`: replaces the KeySet, sets expiry per the
    /// issuer's configured TTL (§4.4).
    pub fn install(&mut self, iss: &str, keyset: KeySet, now: i64) {
        let Some(entry) = self.entries.get_mut(iss) else {
            return;
        };
        let ttl = match &entry.config.pubkey {
            PubkeySource::Remote { cache_ttl_sec, .. } => *cache_ttl_sec,
            PubkeySource::Inline { .. } => 0,
        };
        entry.expires_at = if ttl > 0 { Some(now + ttl as i64) } else { None };
        debug!(issuer = iss, ttl, "installed key set into cache");
        entry.keyset = Some(keyset);
    }

    /// `expired(entry, now)`: true iff the entry has an expiry and `now` has
    /// reached it (§4.4).
    #[must_use]
    pub fn expired(entry: &CacheEntry, now: i64) -> bool {
        matches!(entry.expires_at, Some(expiry) if now >= expiry)
    }
}
