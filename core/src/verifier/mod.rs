//! Authority certificate verification: EdDSA-signed, single-use tokens that
//! authorize a purchase on a payer's behalf.
//!
//! A certificate is a JWT signed with Ed25519 (`alg: EdDSA`). Its claims
//! carry the operator that issued it, the real and tax-adjusted sat amounts,
//! and a `jti` that must never be seen twice — that last property is what
//! makes this a certificate and not just a signed amount.

mod entities;
mod token_store;

pub use entities::{CertificateClaims, CertificateError};
pub use token_store::{DashMapTokenStore, TokenStore};

use base64::Engine;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::collections::HashSet;

use crate::ids::TokenId;
use crate::units::Sats;

/// Certificate protocol identifiers this verifier understands. A token
/// claiming any other `dpyc_protocol` is rejected outright — accepting an
/// unrecognized protocol string would mean trusting claim semantics this
/// code was never written against.
const UNDERSTOOD_PROTOCOLS: &[&str] = &["dpyp-01-base-certificate"];

#[derive(Debug, Deserialize)]
struct RawClaims {
    #[serde(rename = "sub")]
    operator_id: Option<String>,
    amount_sats: Option<i64>,
    tax_paid_sats: Option<i64>,
    net_sats: Option<i64>,
    jti: Option<String>,
    dpyc_protocol: Option<String>,
    exp: i64,
}

/// Strips PEM armor and whitespace from `raw`, returning the base64 body.
/// Wraps a bare base64 key in PEM armor if it isn't already PEM.
pub fn normalize_public_key(raw: &str) -> Result<String, CertificateError> {
    let trimmed = raw.trim();
    if trimmed.starts_with("-----") {
        return Ok(trimmed.to_owned());
    }
    let body: String = trimmed.split_whitespace().collect();
    base64::engine::general_purpose::STANDARD
        .decode(&body)
        .map_err(|e| CertificateError::KeyError(format!("public key is not valid base64: {e}")))?;
    Ok(format!(
        "-----BEGIN PUBLIC KEY-----\n{body}\n-----END PUBLIC KEY-----\n"
    ))
}

/// Returns the last 8 characters of a normalized key's base64 body — enough
/// to tell two keys apart in logs without printing key material.
pub fn key_fingerprint(raw: &str) -> String {
    let body: String = raw
        .lines()
        .filter(|line| !line.starts_with("-----"))
        .collect::<String>()
        .split_whitespace()
        .collect();
    let len = body.len();
    if len <= 8 {
        body
    } else {
        body[len - 8..].to_owned()
    }
}

/// Verifies `token` against `public_key`, checks anti-replay via
/// `token_store`, and returns the parsed claims on success.
///
/// `public_key` may be a bare base64 Ed25519 public key or a full PEM block;
/// both forms are accepted, matching the Authority's own key distribution.
pub fn verify_certificate(
    token: &str,
    public_key: &str,
    token_store: &dyn TokenStore,
) -> Result<CertificateClaims, CertificateError> {
    let pem = normalize_public_key(public_key)?;
    let decoding_key = DecodingKey::from_ed_pem(pem.as_bytes())
        .map_err(|e| CertificateError::KeyError(e.to_string()))?;

    let mut validation = Validation::new(Algorithm::EdDSA);
    validation.required_spec_claims = HashSet::from(["exp".to_owned()]);

    let token_data = decode::<RawClaims>(token, &decoding_key, &validation).map_err(|e| {
        use jsonwebtoken::errors::ErrorKind;
        match e.kind() {
            ErrorKind::ExpiredSignature => CertificateError::Expired,
            ErrorKind::InvalidSignature => CertificateError::InvalidSignature,
            _ => CertificateError::Malformed(e.to_string()),
        }
    })?;
    let claims = token_data.claims;

    // The Authority's JWTs don't always carry a `sub` — treat it like the
    // original issuer does and fall back to an empty operator id rather
    // than rejecting the certificate.
    let operator_id = claims.operator_id.unwrap_or_default();
    let jti: TokenId = claims
        .jti
        .ok_or(CertificateError::MissingClaim("jti"))?
        .into();

    // Single-use consumption happens before the protocol check so that an
    // unknown-protocol certificate still burns its jti — it shouldn't be
    // replayable just because this verifier doesn't understand it.
    if !token_store.check_and_insert(&jti, claims.exp) {
        return Err(CertificateError::Replayed);
    }

    let dpyc_protocol = claims
        .dpyc_protocol
        .ok_or(CertificateError::MissingClaim("dpyc_protocol"))?;
    if !UNDERSTOOD_PROTOCOLS.contains(&dpyc_protocol.as_str()) {
        return Err(CertificateError::UnknownProtocol(dpyc_protocol));
    }

    Ok(CertificateClaims {
        operator_id,
        amount_sats: Sats(claims.amount_sats.unwrap_or(0)),
        tax_paid_sats: Sats(claims.tax_paid_sats.unwrap_or(0)),
        net_sats: Sats(claims.net_sats.unwrap_or(0)),
        jti,
        dpyc_protocol,
        exp: claims.exp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_wraps_bare_base64() {
        let bare = "AAECAwQFBgcICQoLDA0ODw==";
        let pem = normalize_public_key(bare).unwrap();
        assert!(pem.starts_with("-----BEGIN PUBLIC KEY-----"));
        assert!(pem.contains(bare));
    }

    #[test]
    fn normalize_leaves_pem_untouched() {
        let pem_in = "-----BEGIN PUBLIC KEY-----\nabc123\n-----END PUBLIC KEY-----";
        assert_eq!(normalize_public_key(pem_in).unwrap(), pem_in);
    }

    #[test]
    fn normalize_rejects_invalid_base64() {
        assert!(normalize_public_key("not base64 at all!!").is_err());
    }

    #[test]
    fn fingerprint_is_last_eight_chars_of_body() {
        let pem = "-----BEGIN PUBLIC KEY-----\nAAAAAAAAAAAAAAAAzyx9ab==\n-----END PUBLIC KEY-----";
        assert_eq!(key_fingerprint(pem), "zyx9ab==");
    }

    #[test]
    fn fingerprint_of_short_key_is_whole_body() {
        assert_eq!(key_fingerprint("abc"), "abc");
    }
}
