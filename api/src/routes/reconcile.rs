//! Startup/maintenance sweep over a user's pending invoices.

use rocket::{post, serde::json::Json, State};
use rocket_okapi::openapi;
use schemars::JsonSchema;
use serde::Serialize;
use tollbooth_core::purchase;

use crate::{
    access::UserGuard,
    error::{self, JsonResult},
    state::RocketState,
};

#[derive(Debug, Serialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub(super) enum Error {
    /// The ledger cache or its durable store failed to answer.
    Unavailable,
}

#[derive(Debug, Serialize, JsonSchema)]
pub(super) struct ReconcileResponse {
    checked: usize,
    credited: usize,
    terminal: usize,
    skipped: usize,
}

impl From<purchase::ReconcileResult> for ReconcileResponse {
    fn from(r: purchase::ReconcileResult) -> Self {
        Self {
            checked: r.checked,
            credited: r.credited,
            terminal: r.terminal,
            skipped: r.skipped,
        }
    }
}

/// Re-polls every invoice still in `pending_invoices` and advances its
/// state. Intended for startup recovery or an operator-triggered sweep, not
/// the per-purchase hot path (that's [`super::payments::check`]).
#[openapi(tag = "Reconcile")]
#[post("/reconcile")]
pub(super) async fn post(
    state: &State<RocketState>,
    guard: UserGuard,
) -> JsonResult<ReconcileResponse, Error> {
    purchase::reconcile_pending(&state.cache, &state.btcpay, &state.config, guard.user_id())
        .await
        .map(|result| Json(result.into()))
        .map_err(|err| {
            log::error!("reconcile_pending failed for {}: {err}", guard.user_id());
            error::internal_server_error(Error::Unavailable, err.to_string())
        })
}
