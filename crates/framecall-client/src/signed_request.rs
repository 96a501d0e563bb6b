//! Signed requests: the startup credential exchanged during the handshake.
//!
//! A signed request is a query string of the launch parameters plus a
//! `signature` parameter. The signature is computed over the canonical query:
//!
//! ```text
//! canonical = sorted "key=value" pairs joined with '&' (signature excluded)
//! signature = base64(hex(HMAC-SHA256(secret, base64(canonical))))
//! ```
//!
//! Keys and values are percent-encoded except for the RFC 3986 unreserved set.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha2::Sha256;

/// Name of the parameter carrying the signature.
pub const SIGNATURE_PARAM: &str = "signature";

type HmacSha256 = Hmac<Sha256>;

/// Launch parameters, kept sorted by key.
pub type Params = BTreeMap<String, String>;

/// Errors from building or checking a signed request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    /// No `signature` parameter present.
    #[error("signed request has no signature")]
    Missing,

    /// The signature does not match the parameters.
    #[error("signature mismatch")]
    Mismatch,

    /// The signing secret is unusable.
    #[error("invalid signing secret")]
    InvalidSecret,

    /// The query or signature could not be decoded.
    #[error("malformed signed request: {0}")]
    Malformed(String),
}

pub type Result<T> = std::result::Result<T, SignatureError>;

/// Canonical query string of `params`, without the signature.
pub fn canonical_query(params: &Params) -> String {
    encode_query(
        params
            .iter()
            .filter(|(key, _)| key.as_str() != SIGNATURE_PARAM),
    )
}

/// Compute the signature for `params` under `secret`.
pub fn sign(params: &Params, secret: &str) -> Result<String> {
    let digest = mac_for(params, secret)?.finalize().into_bytes();
    Ok(BASE64_STANDARD.encode(hex::encode(digest)))
}

/// Build the full signed request query string, signature included.
pub fn signed_request(params: &Params, secret: &str) -> Result<String> {
    let mut signed = params.clone();
    signed.insert(SIGNATURE_PARAM.to_string(), sign(params, secret)?);
    Ok(encode_query(signed.iter()))
}

/// Check the `signature` in `params` against the rest of the parameters.
pub fn verify(params: &Params, secret: &str) -> Result<()> {
    let signature = params.get(SIGNATURE_PARAM).ok_or(SignatureError::Missing)?;
    let hex_digest = BASE64_STANDARD
        .decode(signature)
        .map_err(|e| SignatureError::Malformed(format!("signature is not base64: {e}")))?;
    let digest = hex::decode(&hex_digest)
        .map_err(|e| SignatureError::Malformed(format!("signature is not hex: {e}")))?;
    mac_for(params, secret)?
        .verify_slice(&digest)
        .map_err(|_| SignatureError::Mismatch)
}

/// Parse a query string and verify it.
pub fn verify_query(query: &str, secret: &str) -> Result<Params> {
    let params = parse_query(query)?;
    verify(&params, secret)?;
    Ok(params)
}

/// Decode a `key=value&...` query string. A key without `=` gets an empty value.
pub fn parse_query(query: &str) -> Result<Params> {
    let mut params = Params::new();
    for pair in query.split('&').filter(|pair| !pair.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        params.insert(percent_decode(key)?, percent_decode(value)?);
    }
    Ok(params)
}

fn mac_for(params: &Params, secret: &str) -> Result<HmacSha256> {
    if secret.is_empty() {
        return Err(SignatureError::InvalidSecret);
    }
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
        .map_err(|_| SignatureError::InvalidSecret)?;
    let payload = BASE64_STANDARD.encode(canonical_query(params));
    mac.update(payload.as_bytes());
    Ok(mac)
}

fn encode_query<'a>(pairs: impl Iterator<Item = (&'a String, &'a String)>) -> String {
    pairs
        .map(|(key, value)| format!("{}={}", percent_encode(key), percent_encode(value)))
        .collect::<Vec<_>>()
        .join("&")
}

fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

fn percent_decode(input: &str) -> Result<String> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let escape = bytes
                    .get(i + 1..i + 3)
                    .and_then(|hex| std::str::from_utf8(hex).ok())
                    .and_then(|hex| u8::from_str_radix(hex, 16).ok())
                    .ok_or_else(|| {
                        SignatureError::Malformed(format!("bad percent escape in '{input}'"))
                    })?;
                out.push(escape);
                i += 3;
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            byte => {
                out.push(byte);
                i += 1;
            }
        }
    }
    String::from_utf8(out)
        .map_err(|_| SignatureError::Malformed(format!("'{input}' is not valid UTF-8")))
}
