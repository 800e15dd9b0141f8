//! Deployment diagnostic report: configuration completeness and BTCPay
//! connectivity. Unauthenticated — this is an operator/readiness check, not
//! a user-owned resource.

use rocket::{get, serde::json::Json, State};
use rocket_okapi::openapi;
use schemars::JsonSchema;
use serde::Serialize;
use tollbooth_core::purchase;

use crate::state::RocketState;

#[derive(Debug, Serialize, JsonSchema)]
pub(super) struct StatusResponse {
    btcpay_host_configured: bool,
    btcpay_store_configured: bool,
    btcpay_api_key_configured: bool,
    tier_config_valid: bool,
    user_tiers_valid: bool,
    btcpay_reachable: Option<bool>,
    store_name: Option<String>,
    permissions: Option<Vec<String>>,
    missing_permissions: Vec<String>,
    authority_key_configured: bool,
    authority_key_fingerprint: Option<String>,
    authority_key_valid: Option<bool>,
    royalty_enabled: bool,
    royalty_percent: f64,
    royalty_min_sats: i64,
}

impl From<purchase::StatusResult> for StatusResponse {
    fn from(r: purchase::StatusResult) -> Self {
        Self {
            btcpay_host_configured: r.btcpay_host_configured,
            btcpay_store_configured: r.btcpay_store_configured,
            btcpay_api_key_configured: r.btcpay_api_key_configured,
            tier_config_valid: r.tier_config_valid,
            user_tiers_valid: r.user_tiers_valid,
            btcpay_reachable: r.btcpay_reachable,
            store_name: r.store_name,
            permissions: r.permissions,
            missing_permissions: r.missing_permissions,
            authority_key_configured: r.authority_key_configured,
            authority_key_fingerprint: r.authority_key_fingerprint,
            authority_key_valid: r.authority_key_valid,
            royalty_enabled: r.royalty_enabled,
            royalty_percent: r.royalty_percent,
            royalty_min_sats: r.royalty_min_sats,
        }
    }
}

/// Configuration completeness and live BTCPay connectivity/permissions.
#[openapi(tag = "Status")]
#[get("/status")]
pub(super) async fn get(state: &State<RocketState>) -> Json<StatusResponse> {
    Json(purchase::status(&state.btcpay, &state.config).await.into())
}
