//! Component B: key-set parser.
//!
//! Parses either a single PEM public key or a JSON Web Key Set into a
//! [`KeySet`] that exposes a `(alg, optional kid) → key` lookup (§4.2). The
//! key material itself is kept in the minimal byte form component C's
//! [`ring`] verifiers expect, so verification never re-parses PEM/JWK.

use crate::error::KeySetError;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use p256::elliptic_curve::sec1::ToEncodedPoint as _;
use p256::pkcs8::DecodePublicKey as _;
use rsa::pkcs1::DecodeRsaPublicKey as _;
use rsa::pkcs8::DecodePublicKey as _;
use serde::Deserialize;

/// The declared format of a key blob, from config (§6 `pubkey.type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFormat {
    Pem,
    Jwks,
}

/// A signature algorithm this subsystem can verify (§1, §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Alg {
    Rs256,
    Rs384,
    Rs512,
    Es256,
}

impl Alg {
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "RS256" => Some(Alg::Rs256),
            "RS384" => Some(Alg::Rs384),
            "RS512" => Some(Alg::Rs512),
            "ES256" => Some(Alg::Es256),
            _ => None,
        }
    }

    fn family(self) -> KeyFamily {
        match self {
            Alg::Rs256 | Alg::Rs384 | Alg::Rs512 => KeyFamily::Rsa,
            Alg::Es256 => KeyFamily::EcP256,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyFamily {
    Rsa,
    EcP256,
}

/// Raw key bytes in the minimal form the verifier needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyMaterial {
    /// DER-encoded PKCS#1 `RSAPublicKey` (modulus + exponent), the exact
    /// form `ring::signature::RSA_PKCS1_*_SHA*` expects.
    Rsa(Vec<u8>),
    /// SEC1 uncompressed point (`0x04 || X || Y`), the exact form
    /// `ring::signature::ECDSA_P256_SHA256_*` expects.
    EcP256(Vec<u8>),
}

impl KeyMaterial {
    fn family(&self) -> KeyFamily {
        match self {
            KeyMaterial::Rsa(_) => KeyFamily::Rsa,
            KeyMaterial::EcP256(_) => KeyFamily::EcP256,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct KeyEntry {
    kid: Option<String>,
    /// `None` means "matches any alg in this family" (inline PEM, or a JWK
    /// whose `alg` field was absent and inferred only down to the family).
    alg: Option<Alg>,
    material: KeyMaterial,
}

/// The outcome of a key-set lookup (§4.3).
pub enum Lookup<'a> {
    Found(&'a KeyMaterial),
    KidNotFound,
    NoMatch,
}

/// Parsed signing material for one issuer (§3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySet {
    entries: Vec<KeyEntry>,
}

impl KeySet {
    /// Parse a key blob in the declared format (§4.2).
    pub fn parse(format: KeyFormat, blob: &[u8]) -> Result<Self, KeySetError> {
        match format {
            KeyFormat::Pem => parse_pem(blob),
            KeyFormat::Jwks => parse_jwks(blob),
        }
    }

    /// `(alg, optional kid) → key`, per §4.2/§4.3.
    ///
    /// If `kid` is present and at least one entry in this key set carries a
    /// `kid` at all, an exact match is required (no brute force). Otherwise
    /// every entry whose algorithm matches is tried.
    #[must_use]
    pub fn lookup(&self, alg: Alg, kid: Option<&str>) -> Lookup<'_> {
        let any_keyed = self.entries.iter().any(|e| e.kid.is_some());
        if let Some(kid) = kid {
            if any_keyed {
                return match self
                    .entries
                    .iter()
                    .find(|e| e.kid.as_deref() == Some(kid))
                {
                    Some(e) if entry_matches_alg(e, alg) => Lookup::Found(&e.material),
                    Some(_) => Lookup::NoMatch,
                    None => Lookup::KidNotFound,
                };
            }
        }
        for e in &self.entries {
            if entry_matches_alg(e, alg) {
                return Lookup::Found(&e.material);
            }
        }
        Lookup::NoMatch
    }

    #[cfg(test)]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

fn entry_matches_alg(entry: &KeyEntry, alg: Alg) -> bool {
    entry.material.family() == alg.family() && entry.alg.is_none_or(|a| a == alg)
}

fn parse_pem(blob: &[u8]) -> Result<KeySet, KeySetError> {
    let text = std::str::from_utf8(blob).map_err(|_| KeySetError::MalformedPem)?;
    let occurrences = text.matches("-----BEGIN").count();
    if occurrences != 1 {
        return Err(KeySetError::MalformedPem);
    }

    if let Ok(key) = rsa::RsaPublicKey::from_public_key_pem(text.trim())
        .or_else(|_| rsa::RsaPublicKey::from_pkcs1_pem(text.trim()))
    {
        let der = rsa_public_key_to_pkcs1_der(&key)?;
        return Ok(KeySet {
            entries: vec![KeyEntry {
                kid: None,
                alg: None,
                material: KeyMaterial::Rsa(der),
            }],
        });
    }

    if let Ok(key) = p256::PublicKey::from_public_key_pem(text.trim()) {
        let point = key.to_encoded_point(false);
        return Ok(KeySet {
            entries: vec![KeyEntry {
                kid: None,
                alg: None,
                material: KeyMaterial::EcP256(point.as_bytes().to_vec()),
            }],
        });
    }

    Err(KeySetError::PemParse(
        "not a recognized RSA or P-256 public key".to_string(),
    ))
}

fn rsa_public_key_to_pkcs1_der(key: &rsa::RsaPublicKey) -> Result<Vec<u8>, KeySetError> {
    use pkcs1::EncodeRsaPublicKey;
    key.to_pkcs1_der()
        .map(|doc| doc.as_bytes().to_vec())
        .map_err(|e| KeySetError::PemParse(e.to_string()))
}

#[derive(Debug, Deserialize)]
struct JwksDoc {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    kty: String,
    #[serde(default)]
    kid: Option<String>,
    #[serde(default)]
    alg: Option<String>,
    #[serde(default)]
    crv: Option<String>,
    #[serde(default)]
    n: Option<String>,
    #[serde(default)]
    e: Option<String>,
    #[serde(default)]
    x: Option<String>,
    #[serde(default)]
    y: Option<String>,
}

fn parse_jwks(blob: &[u8]) -> Result<KeySet, KeySetError> {
    let doc: JwksDoc = serde_json::from_slice(blob).map_err(|_| KeySetError::MalformedJwks)?;

    let mut entries = Vec::new();
    for jwk in doc.keys {
        if let Some(entry) = build_entry(&jwk) {
            entries.push(entry);
        }
    }

    if entries.is_empty() {
        return Err(KeySetError::NoUsableKeys);
    }
    Ok(KeySet { entries })
}

fn build_entry(jwk: &Jwk) -> Option<KeyEntry> {
    let declared_alg = jwk.alg.as_deref().and_then(Alg::parse);
    if jwk.alg.is_some() && declared_alg.is_none() {
        // an explicit but unsupported alg ("HS256", ...) makes the entry unusable
        return None;
    }

    match jwk.kty.as_str() {
        "RSA" => {
            let n = jwk.n.as_deref()?;
            let e = jwk.e.as_deref()?;
            let material = rsa_jwk_to_material(n, e)?;
            Some(KeyEntry {
                kid: jwk.kid.clone(),
                alg: declared_alg,
                material,
            })
        }
        "EC" => {
            if jwk.crv.as_deref() != Some("P-256") {
                return None;
            }
            let x = jwk.x.as_deref()?;
            let y = jwk.y.as_deref()?;
            let material = ec_jwk_to_material(x, y)?;
            let alg = declared_alg.or(Some(Alg::Es256));
            Some(KeyEntry {
                kid: jwk.kid.clone(),
                alg,
                material,
            })
        }
        _ => None,
    }
}

fn rsa_jwk_to_material(n: &str, e: &str) -> Option<KeyMaterial> {
    let n_bytes = URL_SAFE_NO_PAD.decode(n).ok()?;
    let e_bytes = URL_SAFE_NO_PAD.decode(e).ok()?;
    let n = rsa::BigUint::from_bytes_be(&n_bytes);
    let e = rsa::BigUint::from_bytes_be(&e_bytes);
    let key = rsa::RsaPublicKey::new(n, e).ok()?;
    let der = rsa_public_key_to_pkcs1_der(&key).ok()?;
    Some(KeyMaterial::Rsa(der))
}

fn ec_jwk_to_material(x: &str, y: &str) -> Option<KeyMaterial> {
    let x_bytes = URL_SAFE_NO_PAD.decode(x).ok()?;
    let y_bytes = URL_SAFE_NO_PAD.decode(y).ok()?;
    if x_bytes.len() != 32 || y_bytes.len() != 32 {
        return None;
    }
    let mut point = Vec::with_capacity(65);
    point.push(0x04);
    point.extend_from_slice(&x_bytes);
    point.extend_from_slice(&y_bytes);
    Some(KeyMaterial::EcP256(point))
}
