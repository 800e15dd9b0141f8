//! Read-only balance and usage report.

use std::collections::HashMap;

use rocket::{get, serde::json::Json, State};
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

#[derive(Debug, Clone, Copy, Serialize, JsonSchema)]
pub(super) struct ToolUsageModel {
    calls: i64,
    api_sats: i64,
}

impl From<purchase::ToolUsageView> for ToolUsageModel {
    fn from(v: purchase::ToolUsageView) -> Self {
        Self {
            calls: v.calls,
            api_sats: v.api_sats,
        }
    }
}

#[derive(Debug, Serialize, JsonSchema)]
pub(super) struct InvoiceSummaryModel {
    settled_count: usize,
    settled_api_sats: i64,
    pending_count: usize,
}

impl From<purchase::InvoiceSummary> for InvoiceSummaryModel {
    fn from(s: purchase::InvoiceSummary) -> Self {
        Self {
            settled_count: s.settled_count,
            settled_api_sats: s.settled_api_sats,
            pending_count: s.pending_count,
        }
    }
}

#[derive(Debug, Serialize, JsonSchema)]
pub(super) struct LowBalanceAdvisoryModel {
    threshold_api_sats: i64,
    suggested_topup_sats: i64,
    message: String,
}

impl From<purchase::LowBalanceAdvisory> for LowBalanceAdvisoryModel {
    fn from(a: purchase::LowBalanceAdvisory) -> Self {
        Self {
            threshold_api_sats: a.threshold_api_sats,
            suggested_topup_sats: a.suggested_topup_sats,
            message: a.message,
        }
    }
}

#[derive(Debug, Serialize, JsonSchema)]
pub(super) struct BalanceResponse {
    balance_api_sats: i64,
    total_deposited_api_sats: i64,
    total_consumed_api_sats: i64,
    pending_count: usize,
    last_deposit_at: Option<String>,
    tier: String,
    multiplier: i64,
    today_usage: HashMap<String, ToolUsageModel>,
    invoice_summary: InvoiceSummaryModel,
    seed_balance_granted: bool,
    low_balance_advisory: Option<LowBalanceAdvisoryModel>,
}

impl From<purchase::BalanceResult> for BalanceResponse {
    fn from(r: purchase::BalanceResult) -> Self {
        Self {
            balance_api_sats: r.balance_api_sats,
            total_deposited_api_sats: r.total_deposited_api_sats,
            total_consumed_api_sats: r.total_consumed_api_sats,
            pending_count: r.pending_count,
            last_deposit_at: r.last_deposit_at,
            tier: r.tier,
            multiplier: r.multiplier,
            today_usage: r
                .today_usage
                .into_iter()
                .map(|(tool, usage)| (tool, ToolUsageModel::from(usage)))
                .collect(),
            invoice_summary: r.invoice_summary.into(),
            seed_balance_granted: r.seed_balance_granted,
            low_balance_advisory: r.low_balance_advisory.map(LowBalanceAdvisoryModel::from),
        }
    }
}

/// Current balance, today's per-tool usage, and a low-balance advisory if
/// the balance has fallen under its threshold.
#[openapi(tag = "Balance")]
#[get("/balance")]
pub(super) async fn get(
    state: &State<RocketState>,
    guard: UserGuard,
) -> JsonResult<BalanceResponse, Error> {
    purchase::check_balance(&state.cache, &state.config, guard.user_id())
        .await
        .map(|result| Json(result.into()))
        .map_err(|err| {
            log::error!("check_balance failed for {}: {err}", guard.user_id());
            error::internal_server_error(Error::Unavailable, err.to_string())
        })
}
