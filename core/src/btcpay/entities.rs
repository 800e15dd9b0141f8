use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed error taxonomy for every BTCPay HTTP failure. Callers branch on
/// kind, never on the underlying status code.
#[derive(Debug, Error)]
pub enum BtcPayError {
    #[error("btcpay authentication failed: {0}")]
    Auth(String),
    #[error("btcpay resource not found: {0}")]
    NotFound(String),
    #[error("btcpay rejected the request: {0}")]
    Validation(String),
    #[error("btcpay server error ({status}): {message}")]
    Server { status: u16, message: String },
    #[error("could not reach btcpay: {0}")]
    Connection(String),
    #[error("btcpay request timed out: {0}")]
    Timeout(String),
    #[error("btcpay error ({status}): {message}")]
    Other { status: u16, message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateInvoiceRequest {
    pub amount: String,
    pub currency: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvoiceResponse {
    pub id: String,
    pub status: String,
    #[serde(default)]
    #[serde(rename = "additionalStatus")]
    pub additional_status: Option<String>,
    #[serde(default)]
    pub amount: Option<String>,
    #[serde(default)]
    #[serde(rename = "checkoutLink")]
    pub checkout_link: Option<String>,
    #[serde(default)]
    #[serde(rename = "expirationTime")]
    pub expiration_time: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatePayoutRequest {
    pub destination: String,
    pub amount: String,
    #[serde(rename = "payoutMethodId")]
    pub payout_method_id: &'static str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PayoutResponse {
    pub id: String,
    #[serde(default)]
    pub state: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreResponse {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiKeyInfoResponse {
    #[serde(default)]
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PayoutProcessorResponse {
    #[serde(rename = "processorId")]
    pub processor_id: String,
}
