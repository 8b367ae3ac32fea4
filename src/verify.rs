//! Component C: signature verifier.
//!
//! Verifies a [`Token`]'s signature against a [`KeySet`] for the token's
//! declared algorithm (§4.3). RSA algorithms use PKCS#1 v1.5 with the
//! matching SHA-2 digest; ES256 accepts both the raw (r‖s) 64-byte
//! signature form and the DER-encoded form, since issuers disagree on which
//! one to emit.

use crate::error::VerifyError;
use crate::keyset::{Alg, KeyMaterial, KeySet, Lookup};
use crate::token::Token;
use ring::signature::{self, UnparsedPublicKey};

/// Verify `token`'s signature against `keyset`. Does not check `exp`,
/// `iss`, or `aud` — those are preconditions enforced by the authenticator
/// (§4.6 step 2) before this is ever called.
pub fn verify(token: &Token, keyset: &KeySet) -> Result<(), VerifyError> {
    let alg = Alg::parse(&token.alg).ok_or(VerifyError::NoMatchingKey)?;

    let material = match keyset.lookup(alg, token.kid.as_deref()) {
        Lookup::Found(material) => material,
        Lookup::KidNotFound => return Err(VerifyError::KidNotFound),
        Lookup::NoMatch => return Err(VerifyError::NoMatchingKey),
    };

    let message = token.signing_input();
    verify_with_material(alg, material, message.as_bytes(), token.signature())
}

fn verify_with_material(
    alg: Alg,
    material: &KeyMaterial,
    message: &[u8],
    sig: &[u8],
) -> Result<(), VerifyError> {
    match (alg, material) {
        (Alg::Rs256, KeyMaterial::Rsa(key)) => {
            verify_rsa(&signature::RSA_PKCS1_2048_8192_SHA256, key, message, sig)
        }
        (Alg::Rs384, KeyMaterial::Rsa(key)) => {
            verify_rsa(&signature::RSA_PKCS1_2048_8192_SHA384, key, message, sig)
        }
        (Alg::Rs512, KeyMaterial::Rsa(key)) => {
            verify_rsa(&signature::RSA_PKCS1_2048_8192_SHA512, key, message, sig)
        }
        (Alg::Es256, KeyMaterial::EcP256(key)) => verify_es256(key, message, sig),
        _ => Err(VerifyError::NoMatchingKey),
    }
}

fn verify_rsa(
    alg: &'static dyn signature::VerificationAlgorithm,
    key: &[u8],
    message: &[u8],
    sig: &[u8],
) -> Result<(), VerifyError> {
    UnparsedPublicKey::new(alg, key)
        .verify(message, sig)
        .map_err(|_| VerifyError::SignatureInvalid)
}

/// Accepts both the 64-byte fixed (r‖s) encoding and the variable-length
/// DER encoding (§4.3, §8 boundary behavior).
fn verify_es256(key: &[u8], message: &[u8], sig: &[u8]) -> Result<(), VerifyError> {
    let alg: &'static dyn signature::VerificationAlgorithm = if sig.len() == 64 {
        &signature::ECDSA_P256_SHA256_FIXED
    } else if sig.len() >= 8 && sig.len() <= 72 {
        &signature::ECDSA_P256_SHA256_ASN1
    } else {
        return Err(VerifyError::MalformedSignature);
    };
    UnparsedPublicKey::new(alg, key)
        .verify(message, sig)
        .map_err(|_| VerifyError::SignatureInvalid)
}
