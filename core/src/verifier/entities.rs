use thiserror::Error;

use crate::ids::TokenId;
use crate::units::Sats;

/// Verified, replay-checked claims from an Authority certificate.
#[derive(Debug, Clone)]
pub struct CertificateClaims {
    pub operator_id: String,
    /// Gross amount the certificate authorizes.
    pub amount_sats: Sats,
    /// Tax withheld by the Authority before the operator receives it.
    pub tax_paid_sats: Sats,
    /// `amount_sats` minus `tax_paid_sats` — what the purchase should credit
    /// against, for the tax-aware purchase path.
    pub net_sats: Sats,
    pub jti: TokenId,
    pub dpyc_protocol: String,
    pub exp: i64,
}

#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("certificate has expired")]
    Expired,
    #[error("certificate signature is invalid")]
    InvalidSignature,
    #[error("certificate is malformed: {0}")]
    Malformed(String),
    #[error("certificate is missing required claim: {0}")]
    MissingClaim(&'static str),
    #[error("certificate uses an unrecognized protocol: {0}")]
    UnknownProtocol(String),
    #[error("certificate replay detected: token has already been used")]
    Replayed,
    #[error("certificate public key is invalid: {0}")]
    KeyError(String),
}
