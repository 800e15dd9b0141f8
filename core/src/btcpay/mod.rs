//! Typed client over BTCPay Server's v1 Greenfield HTTP API.
//!
//! Shaped after the typed-`RestClient`-over-`reqwest` pattern: a thin
//! builder around a shared [`reqwest::Client`], JSON (de)serialization via
//! `serde`, and a closed error taxonomy mapped from HTTP status codes rather
//! than leaking `reqwest::Error` to callers.

mod entities;

pub use entities::{
    ApiKeyInfoResponse, BtcPayError, InvoiceResponse, PayoutProcessorResponse, PayoutResponse,
    StoreResponse,
};

use entities::{CreateInvoiceRequest, CreatePayoutRequest};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::constants::SATS_CONVERSION_MAX_DEFAULT;
use crate::units::Sats;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const READ_TIMEOUT: Duration = Duration::from_secs(15);

/// Converts satoshis to BTCPay's 8-decimal BTC string.
///
/// Rejects negative amounts and amounts above `max_sats` (default 1 BTC) —
/// a guard against a caller accidentally passing an already-converted
/// amount or an unvalidated user input straight through to a payout call.
pub fn sats_to_btc_string(sats: Sats, max_sats: Option<Sats>) -> Result<String, BtcPayError> {
    let ceiling = max_sats.unwrap_or(Sats(SATS_CONVERSION_MAX_DEFAULT));
    if sats.0 < 0 {
        return Err(BtcPayError::Validation(format!(
            "sats must be non-negative, got {}",
            sats.0
        )));
    }
    if sats.0 > ceiling.0 {
        return Err(BtcPayError::Validation(format!(
            "sats {} exceeds conversion ceiling {}",
            sats.0, ceiling.0
        )));
    }
    Ok(format!("{:.8}", sats.0 as f64 / 1e8))
}

pub struct BtcPayClient {
    http: reqwest::Client,
    base_url: String,
    store_id: String,
    api_key: String,
}

impl BtcPayClient {
    pub fn new(host: &str, store_id: impl Into<String>, api_key: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(READ_TIMEOUT)
            .build()
            .expect("reqwest client builds with static config");
        Self {
            http,
            base_url: format!("{}/api/v1", host.trim_end_matches('/')),
            store_id: store_id.into(),
            api_key: api_key.into(),
        }
    }

    fn auth_header(&self) -> String {
        format!("token {}", self.api_key)
    }

    async fn send<T: DeserializeOwned>(&self, response: Result<Response, reqwest::Error>) -> Result<T, BtcPayError> {
        let response = response.map_err(map_transport_error)?;
        let status = response.status();
        if status.is_success() {
            response.json::<T>().await.map_err(|e| {
                BtcPayError::Other {
                    status: status.as_u16(),
                    message: format!("failed to decode btcpay response: {e}"),
                }
            })
        } else {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_owned());
            Err(map_status_error(status, message))
        }
    }

    /// `GET /health`
    pub async fn health(&self) -> Result<(), BtcPayError> {
        let url = format!("{}/health", self.base_url);
        let resp = self
            .http
            .get(url)
            .header("Authorization", self.auth_header())
            .send()
            .await
            .map_err(map_transport_error)?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(map_status_error(resp.status(), String::new()))
        }
    }

    /// `GET /stores/{id}`
    pub async fn get_store(&self) -> Result<StoreResponse, BtcPayError> {
        let url = format!("{}/stores/{}", self.base_url, self.store_id);
        let resp = self
            .http
            .get(url)
            .header("Authorization", self.auth_header())
            .send()
            .await;
        self.send(resp).await
    }

    /// `GET /api-keys/current`
    pub async fn get_api_key_info(&self) -> Result<ApiKeyInfoResponse, BtcPayError> {
        let url = format!("{}/api-keys/current", self.base_url);
        let resp = self
            .http
            .get(url)
            .header("Authorization", self.auth_header())
            .send()
            .await;
        self.send(resp).await
    }

    /// `POST /stores/{id}/invoices`
    pub async fn create_invoice(
        &self,
        amount_sats: Sats,
        metadata: Option<serde_json::Value>,
    ) -> Result<InvoiceResponse, BtcPayError> {
        let url = format!("{}/stores/{}/invoices", self.base_url, self.store_id);
        let body = CreateInvoiceRequest {
            amount: amount_sats.0.to_string(),
            currency: "SATS",
            metadata,
        };
        let resp = self
            .http
            .post(url)
            .header("Authorization", self.auth_header())
            .json(&body)
            .send()
            .await;
        self.send(resp).await
    }

    /// `GET /stores/{id}/invoices/{invoice_id}`
    pub async fn get_invoice(&self, invoice_id: &str) -> Result<InvoiceResponse, BtcPayError> {
        let url = format!(
            "{}/stores/{}/invoices/{}",
            self.base_url, self.store_id, invoice_id
        );
        let resp = self
            .http
            .get(url)
            .header("Authorization", self.auth_header())
            .send()
            .await;
        self.send(resp).await
    }

    /// `POST /stores/{id}/payouts`. Converts `amount_sats` to a BTC string
    /// internally; the payout method is fixed to Lightning.
    pub async fn create_payout(
        &self,
        destination: &str,
        amount_sats: Sats,
    ) -> Result<PayoutResponse, BtcPayError> {
        let amount = sats_to_btc_string(amount_sats, None)?;
        let url = format!("{}/stores/{}/payouts", self.base_url, self.store_id);
        let body = CreatePayoutRequest {
            destination: destination.to_owned(),
            amount,
            payout_method_id: "BTC-LN",
        };
        let resp = self
            .http
            .post(url)
            .header("Authorization", self.auth_header())
            .json(&body)
            .send()
            .await;
        self.send(resp).await
    }

    /// `GET /stores/{id}/payout-processors`
    pub async fn get_payout_processors(&self) -> Result<Vec<PayoutProcessorResponse>, BtcPayError> {
        let url = format!(
            "{}/stores/{}/payout-processors",
            self.base_url, self.store_id
        );
        let resp = self
            .http
            .get(url)
            .header("Authorization", self.auth_header())
            .send()
            .await;
        self.send(resp).await
    }
}

fn map_transport_error(err: reqwest::Error) -> BtcPayError {
    if err.is_timeout() {
        BtcPayError::Timeout(err.to_string())
    } else if err.is_connect() {
        BtcPayError::Connection(err.to_string())
    } else {
        BtcPayError::Connection(err.to_string())
    }
}

fn map_status_error(status: StatusCode, message: String) -> BtcPayError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => BtcPayError::Auth(message),
        StatusCode::NOT_FOUND => BtcPayError::NotFound(message),
        StatusCode::UNPROCESSABLE_ENTITY => BtcPayError::Validation(message),
        s if s.as_u16() >= 500 => BtcPayError::Server {
            status: s.as_u16(),
            message,
        },
        s => BtcPayError::Other {
            status: s.as_u16(),
            message,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sats_to_btc_string_matches_fixed_points() {
        assert_eq!(sats_to_btc_string(Sats(1), None).unwrap(), "0.00000001");
        assert_eq!(
            sats_to_btc_string(Sats(100_000_000), None).unwrap(),
            "1.00000000"
        );
    }

    #[test]
    fn sats_to_btc_string_rejects_negative() {
        assert!(sats_to_btc_string(Sats(-1), None).is_err());
    }

    #[test]
    fn sats_to_btc_string_rejects_above_ceiling() {
        assert!(sats_to_btc_string(Sats(100_000_001), None).is_err());
        assert!(sats_to_btc_string(Sats(100_000_000), None).is_ok());
    }

    #[test]
    fn base_url_strips_trailing_slash() {
        let client = BtcPayClient::new("https://btcpay.example.com/", "store1", "key1");
        assert_eq!(client.base_url, "https://btcpay.example.com/api/v1");
    }

    #[test]
    fn auth_header_uses_token_scheme() {
        let client = BtcPayClient::new("https://btcpay.example.com", "store1", "secret");
        assert_eq!(client.auth_header(), "token secret");
    }

    #[test]
    fn status_mapping_matches_taxonomy() {
        assert!(matches!(
            map_status_error(StatusCode::UNAUTHORIZED, String::new()),
            BtcPayError::Auth(_)
        ));
        assert!(matches!(
            map_status_error(StatusCode::FORBIDDEN, String::new()),
            BtcPayError::Auth(_)
        ));
        assert!(matches!(
            map_status_error(StatusCode::NOT_FOUND, String::new()),
            BtcPayError::NotFound(_)
        ));
        assert!(matches!(
            map_status_error(StatusCode::UNPROCESSABLE_ENTITY, String::new()),
            BtcPayError::Validation(_)
        ));
        assert!(matches!(
            map_status_error(StatusCode::INTERNAL_SERVER_ERROR, String::new()),
            BtcPayError::Server { status: 500, .. }
        ));
        assert!(matches!(
            map_status_error(StatusCode::BAD_REQUEST, String::new()),
            BtcPayError::Other { status: 400, .. }
        ));
    }
}
