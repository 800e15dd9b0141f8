//! Structured results returned by every purchase/settlement operation.
//!
//! Per the propagation policy for this layer: these operations report
//! failure as `success: false` with a message, not as a raised error. Only
//! programmer-error conditions in the pure ledger helpers panic or return
//! typed errors.

use serde::Serialize;
use std::collections::HashMap;

use super::royalty::RoyaltyOutcome;

#[derive(Debug, Clone, Serialize)]
pub struct PurchaseResult {
    pub success: bool,
    pub error: Option<String>,
    pub invoice_id: Option<String>,
    pub checkout_link: Option<String>,
    pub expires_at: Option<i64>,
    pub tier: Option<String>,
    pub multiplier: Option<i64>,
    pub amount_sats: Option<i64>,
    pub expected_credits: Option<i64>,
}

impl PurchaseResult {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            invoice_id: None,
            checkout_link: None,
            expires_at: None,
            tier: None,
            multiplier: None,
            amount_sats: None,
            expected_credits: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckPaymentResult {
    pub success: bool,
    pub error: Option<String>,
    pub status: Option<String>,
    pub credits_granted: i64,
    pub balance_api_sats: i64,
    pub royalty: Option<RoyaltyOutcome>,
}

impl CheckPaymentResult {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            status: None,
            credits_granted: 0,
            balance_api_sats: 0,
            royalty: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RestoreResult {
    pub success: bool,
    pub error: Option<String>,
    pub credited: i64,
    pub source: Option<&'static str>,
    pub balance_api_sats: i64,
}

impl RestoreResult {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            credited: 0,
            source: None,
            balance_api_sats: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct ReconcileResult {
    pub checked: usize,
    pub credited: usize,
    pub terminal: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Default)]
pub struct ToolUsageView {
    pub calls: i64,
    pub api_sats: i64,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct InvoiceSummary {
    pub settled_count: usize,
    pub settled_api_sats: i64,
    pub pending_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct LowBalanceAdvisory {
    pub threshold_api_sats: i64,
    pub suggested_topup_sats: i64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BalanceResult {
    pub balance_api_sats: i64,
    pub total_deposited_api_sats: i64,
    pub total_consumed_api_sats: i64,
    pub pending_count: usize,
    pub last_deposit_at: Option<String>,
    pub tier: String,
    pub multiplier: i64,
    pub today_usage: HashMap<String, ToolUsageView>,
    pub invoice_summary: InvoiceSummary,
    pub seed_balance_granted: bool,
    pub low_balance_advisory: Option<LowBalanceAdvisory>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResult {
    pub btcpay_host_configured: bool,
    pub btcpay_store_configured: bool,
    pub btcpay_api_key_configured: bool,
    pub tier_config_valid: bool,
    pub user_tiers_valid: bool,
    pub btcpay_reachable: Option<bool>,
    pub store_name: Option<String>,
    pub permissions: Option<Vec<String>>,
    pub missing_permissions: Vec<String>,
    pub authority_key_configured: bool,
    pub authority_key_fingerprint: Option<String>,
    pub authority_key_valid: Option<bool>,
    pub royalty_enabled: bool,
    pub royalty_percent: f64,
    pub royalty_min_sats: i64,
}
