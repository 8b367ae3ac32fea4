//! Component A: token parser.
//!
//! Decodes a compact signed token (`header.payload.signature`) without
//! performing any verification. The raw base64url segments are retained
//! alongside the parsed JSON so the original payload can be re-emitted
//! byte-for-byte (§3 `Token` invariant) and so the signing input
//! (`header_b64url + "." + payload_b64url`) can be reconstructed exactly.

use crate::error::TokenError;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde_json::Value;
use std::collections::HashSet;

/// A parsed, not-yet-verified token.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub alg: String,
    pub kid: Option<String>,
    pub iss: String,
    pub exp: i64,
    pub aud: HashSet<String>,
    header: Value,
    payload: Value,
    header_b64: String,
    payload_b64: String,
    signature: Vec<u8>,
    raw: String,
}

impl Token {
    /// Parse a compact token string per §4.1.
    pub fn parse(raw: &str) -> Result<Self, TokenError> {
        let mut parts = raw.split('.');
        let header_b64 = parts.next().filter(|s| !s.is_empty());
        let payload_b64 = parts.next().filter(|s| !s.is_empty());
        let signature_b64 = parts.next().filter(|s| !s.is_empty());
        if parts.next().is_some() {
            return Err(TokenError::BadFormat);
        }
        let (header_b64, payload_b64, signature_b64) =
            match (header_b64, payload_b64, signature_b64) {
                (Some(h), Some(p), Some(s)) => (h, p, s),
                _ => return Err(TokenError::BadFormat),
            };

        let header_bytes = URL_SAFE_NO_PAD
            .decode(header_b64)
            .map_err(|_| TokenError::BadFormat)?;
        let payload_bytes = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| TokenError::BadFormat)?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| TokenError::BadFormat)?;

        let header: Value =
            serde_json::from_slice(&header_bytes).map_err(|_| TokenError::BadJson)?;
        let payload: Value =
            serde_json::from_slice(&payload_bytes).map_err(|_| TokenError::BadJson)?;

        let alg = header
            .get("alg")
            .and_then(Value::as_str)
            .ok_or(TokenError::MissingRequired("alg"))?
            .to_string();
        let kid = header
            .get("kid")
            .and_then(Value::as_str)
            .map(str::to_string);

        let iss = payload
            .get("iss")
            .and_then(Value::as_str)
            .ok_or(TokenError::MissingRequired("iss"))?
            .to_string();
        let exp = payload
            .get("exp")
            .and_then(Value::as_i64)
            .ok_or(TokenError::MissingRequired("exp"))?;
        let aud = parse_aud(payload.get("aud"))?;

        Ok(Token {
            alg,
            kid,
            iss,
            exp,
            aud,
            header,
            payload,
            header_b64: header_b64.to_string(),
            payload_b64: payload_b64.to_string(),
            signature,
            raw: raw.to_string(),
        })
    }

    /// The ASCII concatenation `header_b64url + "." + payload_b64url`: the
    /// exact bytes the signature was computed over (§4.3).
    #[must_use]
    pub fn signing_input(&self) -> String {
        format!("{}.{}", self.header_b64, self.payload_b64)
    }

    #[must_use]
    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// The base64url payload segment, unchanged (§4.1).
    #[must_use]
    pub fn payload_b64(&self) -> &str {
        &self.payload_b64
    }

    #[must_use]
    pub fn header_b64(&self) -> &str {
        &self.header_b64
    }

    /// The decoded JSON payload, for `userinfo_type = payload`.
    #[must_use]
    pub fn payload_json(&self) -> &Value {
        &self.payload
    }

    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    #[allow(dead_code)]
    #[must_use]
    pub fn header_json(&self) -> &Value {
        &self.header
    }
}

fn parse_aud(value: Option<&Value>) -> Result<HashSet<String>, TokenError> {
    match value {
        None => Ok(HashSet::new()),
        Some(Value::String(s)) => Ok(HashSet::from([s.clone()])),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or(TokenError::AudTypeInvalid)
            })
            .collect(),
        Some(_) => Err(TokenError::AudTypeInvalid),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b64(json: &str) -> String {
        URL_SAFE_NO_PAD.encode(json.as_bytes())
    }

    fn make(header: &str, payload: &str) -> String {
        format!("{}.{}.{}", b64(header), b64(payload), b64("sig"))
    }

    #[test]
    fn parses_minimal_token() {
        let raw = make(
            r#"{"alg":"RS256","kid":"k1"}"#,
            r#"{"iss":"https://issuer.example","exp":9999999999,"aud":"a1"}"#,
        );
        let token = Token::parse(&raw).unwrap();
        assert_eq!(token.alg, "RS256");
        assert_eq!(token.kid.as_deref(), Some("k1"));
        assert_eq!(token.iss, "https://issuer.example");
        assert_eq!(token.exp, 9999999999);
        assert_eq!(token.aud, HashSet::from(["a1".to_string()]));
    }

    #[test]
    fn aud_array_is_set() {
        let raw = make(
            r#"{"alg":"RS256"}"#,
            r#"{"iss":"i","exp":1,"aud":["a","b"]}"#,
        );
        let token = Token::parse(&raw).unwrap();
        assert_eq!(
            token.aud,
            HashSet::from(["a".to_string(), "b".to_string()])
        );
    }

    #[test]
    fn aud_absent_is_empty_set() {
        let raw = make(r#"{"alg":"RS256"}"#, r#"{"iss":"i","exp":1}"#);
        let token = Token::parse(&raw).unwrap();
        assert!(token.aud.is_empty());
    }

    #[test]
    fn aud_wrong_type_errors() {
        let raw = make(r#"{"alg":"RS256"}"#, r#"{"iss":"i","exp":1,"aud":5}"#);
        assert_eq!(Token::parse(&raw), Err(TokenError::AudTypeInvalid));
    }

    #[test]
    fn wrong_segment_count_errors() {
        assert_eq!(Token::parse("a.b"), Err(TokenError::BadFormat));
        assert_eq!(Token::parse("a.b.c.d"), Err(TokenError::BadFormat));
        assert_eq!(Token::parse("a..c"), Err(TokenError::BadFormat));
    }

    #[test]
    fn non_base64url_errors() {
        assert_eq!(Token::parse("!!!.b.c"), Err(TokenError::BadFormat));
    }

    #[test]
    fn bad_json_errors() {
        let raw = format!("{}.{}.{}", b64("not json"), b64("{}"), b64("sig"));
        assert_eq!(Token::parse(&raw), Err(TokenError::BadJson));
    }

    #[test]
    fn missing_iss_errors() {
        let raw = make(r#"{"alg":"RS256"}"#, r#"{"exp":1}"#);
        assert_eq!(
            Token::parse(&raw),
            Err(TokenError::MissingRequired("iss"))
        );
    }

    #[test]
    fn missing_alg_errors() {
        let raw = make(r"{}", r#"{"iss":"i","exp":1}"#);
        assert_eq!(
            Token::parse(&raw),
            Err(TokenError::MissingRequired("alg"))
        );
    }

    #[test]
    fn signing_input_is_header_dot_payload() {
        let raw = make(r#"{"alg":"RS256"}"#, r#"{"iss":"i","exp":1}"#);
        let token = Token::parse(&raw).unwrap();
        let expected = format!(
            "{}.{}",
            b64(r#"{"alg":"RS256"}"#),
            b64(r#"{"iss":"i","exp":1}"#)
        );
        assert_eq!(token.signing_input(), expected);
    }
}
