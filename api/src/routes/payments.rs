//! Invoice settlement polling: advances a pending invoice's ledger state
//! from BTCPay's view and credits the balance once it settles.

use rocket::{post, serde::json::Json, State};
use rocket_okapi::openapi;
use schemars::JsonSchema;
use serde::Serialize;
use tollbooth_core::{ids::InvoiceId, purchase};

use crate::{access::UserGuard, state::RocketState};

#[derive(Debug, Serialize, JsonSchema)]
pub(super) struct RoyaltyOutcomeModel {
    status: String,
    royalty_sats: Option<i64>,
    payout_id: Option<String>,
    error: Option<String>,
}

impl From<purchase::RoyaltyOutcome> for RoyaltyOutcomeModel {
    fn from(outcome: purchase::RoyaltyOutcome) -> Self {
        match outcome {
            purchase::RoyaltyOutcome::Skipped => Self {
                status: "skipped".to_owned(),
                royalty_sats: None,
                payout_id: None,
                error: None,
            },
            purchase::RoyaltyOutcome::Refused { royalty_sats } => Self {
                status: "refused".to_owned(),
                royalty_sats: Some(royalty_sats),
                payout_id: None,
                error: None,
            },
            purchase::RoyaltyOutcome::Failed { royalty_sats, error } => Self {
                status: "failed".to_owned(),
                royalty_sats: Some(royalty_sats),
                payout_id: None,
                error: Some(error),
            },
            purchase::RoyaltyOutcome::Paid { royalty_sats, payout_id } => Self {
                status: "paid".to_owned(),
                royalty_sats: Some(royalty_sats),
                payout_id: Some(payout_id),
                error: None,
            },
        }
    }
}

#[derive(Debug, Serialize, JsonSchema)]
pub(super) struct CheckPaymentResponse {
    success: bool,
    error: Option<String>,
    status: Option<String>,
    credits_granted: i64,
    balance_api_sats: i64,
    royalty: Option<RoyaltyOutcomeModel>,
}

impl From<purchase::CheckPaymentResult> for CheckPaymentResponse {
    fn from(r: purchase::CheckPaymentResult) -> Self {
        Self {
            success: r.success,
            error: r.error,
            status: r.status,
            credits_granted: r.credits_granted,
            balance_api_sats: r.balance_api_sats,
            royalty: r.royalty.map(RoyaltyOutcomeModel::from),
        }
    }
}

/// Poll BTCPay for an invoice's settlement status and credit the ledger if
/// it has settled since the last check.
#[openapi(tag = "Payments")]
#[post("/payments/<invoice_id>/check")]
pub(super) async fn check(
    state: &State<RocketState>,
    guard: UserGuard,
    invoice_id: String,
) -> Json<CheckPaymentResponse> {
    let invoice_id = InvoiceId::from(invoice_id);
    let result = purchase::check_payment(
        &state.cache,
        &state.btcpay,
        &state.config,
        guard.user_id(),
        &invoice_id,
    )
    .await;
    Json(result.into())
}
