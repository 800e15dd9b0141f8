//! Credit purchase route: redeem a signed certificate for a pending BTCPay
//! invoice.

use rocket::{post, serde::json::Json, State};
use rocket_okapi::openapi;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tollbooth_core::purchase;

use crate::{access::UserGuard, state::RocketState};

#[derive(Debug, Deserialize, JsonSchema)]
pub(super) struct PurchaseRequest {
    /// Authority-signed, single-use certificate authorizing this purchase.
    certificate_token: String,
}

#[derive(Debug, Serialize, JsonSchema)]
pub(super) struct PurchaseResponse {
    success: bool,
    error: Option<String>,
    invoice_id: Option<String>,
    checkout_link: Option<String>,
    expires_at: Option<i64>,
    tier: Option<String>,
    multiplier: Option<i64>,
    amount_sats: Option<i64>,
    expected_credits: Option<i64>,
}

impl From<purchase::PurchaseResult> for PurchaseResponse {
    fn from(r: purchase::PurchaseResult) -> Self {
        Self {
            success: r.success,
            error: r.error,
            invoice_id: r.invoice_id,
            checkout_link: r.checkout_link,
            expires_at: r.expires_at,
            tier: r.tier,
            multiplier: r.multiplier,
            amount_sats: r.amount_sats,
            expected_credits: r.expected_credits,
        }
    }
}

/// Redeem a signed certificate for a pending credit-purchase invoice. The
/// invoice amount comes from the certificate's net sat amount, never from a
/// caller-supplied figure.
#[openapi(tag = "Purchases")]
#[post("/purchase", data = "<req>")]
pub(super) async fn post(
    state: &State<RocketState>,
    guard: UserGuard,
    req: Json<PurchaseRequest>,
) -> Json<PurchaseResponse> {
    let result = purchase::purchase_credits(
        &state.cache,
        &state.btcpay,
        state.token_store.as_ref(),
        &state.config,
        guard.user_id(),
        &req.certificate_token,
    )
    .await;
    Json(result.into())
}
