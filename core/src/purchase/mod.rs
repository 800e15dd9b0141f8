//! Purchase and settlement orchestration: the operator-facing surface of
//! the core. Coordinates the certificate verifier, the BTCPay client, the
//! ledger cache, and tier resolution into the six operations a tool host
//! actually calls.
//!
//! Every function here returns a structured result rather than a `Result`
//! error type — a rejected purchase and a provider outage are both just
//! `success: false` with a message. The one exception is `anyhow::Error`
//! bubbling up from the cache's durable-store calls, which genuinely are
//! infrastructure failures the caller cannot route around.

mod results;
mod royalty;
mod tiers;

pub use results::{
    BalanceResult, CheckPaymentResult, InvoiceSummary, LowBalanceAdvisory, PurchaseResult,
    ReconcileResult, RestoreResult, StatusResult, ToolUsageView,
};
pub use royalty::{attempt_royalty_payout, RoyaltyConfig, RoyaltyOutcome};
pub use tiers::resolve_tier;

use std::collections::HashMap;

use crate::btcpay::BtcPayClient;
use crate::cache::LedgerCache;
use crate::config::Config;
use crate::constants::{LOW_BALANCE_FLOOR_API_SATS, MAX_INVOICE_SATS};
use crate::ids::{InvoiceId, UserId};
use crate::ledger::{InvoiceStatus, SEED_BALANCE_SENTINEL, UserLedger};
use crate::store::DurableStore;
use crate::units::{ApiSats, Sats};
use crate::verifier::{verify_certificate, TokenStore};

/// Permissions every deployment needs regardless of configuration.
const REQUIRED_PERMISSIONS: &[&str] = &[
    "btcpay.store.cancreateinvoice",
    "btcpay.store.canviewinvoices",
];

/// Additional permission required only when royalty payouts are enabled.
const ROYALTY_PERMISSION: &str = "btcpay.store.cancreatenonapprovedpullpayments";

fn royalty_config(config: &Config) -> RoyaltyConfig {
    RoyaltyConfig {
        address: config.tollbooth_royalty_address.clone(),
        percent: config.tollbooth_royalty_percent,
        min_sats: Sats(config.tollbooth_royalty_min_sats),
    }
}

async fn create_pending_invoice<S: DurableStore>(
    cache: &LedgerCache<S>,
    btcpay: &BtcPayClient,
    config: &Config,
    user_id: &UserId,
    amount_sats: Sats,
    token_id: Option<&str>,
) -> PurchaseResult {
    if amount_sats.0 <= 0 || amount_sats > MAX_INVOICE_SATS {
        return PurchaseResult::failure(format!(
            "amount_sats must be in (0, {}], got {}",
            MAX_INVOICE_SATS.0, amount_sats.0
        ));
    }

    let (tier, multiplier) =
        resolve_tier(user_id, &config.btcpay_tier_config, &config.btcpay_user_tiers);

    let mut metadata = serde_json::json!({
        "user_id": user_id.as_str(),
        "purpose": "credit_purchase",
    });
    if let Some(token_id) = token_id {
        metadata["token_id"] = serde_json::Value::String(token_id.to_owned());
    }

    let invoice = match btcpay.create_invoice(amount_sats, Some(metadata)).await {
        Ok(invoice) => invoice,
        Err(err) => return PurchaseResult::failure(err.to_string()),
    };
    let invoice_id = InvoiceId::from(invoice.id.clone());

    let entry = match cache.get(user_id).await {
        Ok(entry) => entry,
        Err(err) => return PurchaseResult::failure(err.to_string()),
    };
    {
        let mut guard = entry.lock().await;
        guard.ledger.record_invoice_created(
            invoice_id.clone(),
            amount_sats,
            multiplier,
            chrono::Utc::now().to_rfc3339(),
        );
        guard.ledger.push_pending(invoice_id.clone());
        guard.mark_dirty();
    }
    if !cache.flush_user(user_id).await {
        log::warn!("failed to flush pending invoice {invoice_id} for user {user_id}");
    }

    PurchaseResult {
        success: true,
        error: None,
        invoice_id: Some(invoice_id.0),
        checkout_link: invoice.checkout_link,
        expires_at: invoice.expiration_time,
        tier: Some(tier),
        multiplier: Some(multiplier),
        amount_sats: Some(amount_sats.0),
        expected_credits: Some(amount_sats.0 * multiplier),
    }
}

/// Certified operator purchase. Requires a valid, single-use certificate
/// from the Authority; the invoice amount comes from the certificate's
/// `net_sats`, never from a caller-supplied amount.
pub async fn purchase_credits<S: DurableStore>(
    cache: &LedgerCache<S>,
    btcpay: &BtcPayClient,
    token_store: &dyn TokenStore,
    config: &Config,
    user_id: &UserId,
    certificate_token: &str,
) -> PurchaseResult {
    let Some(authority_key) = config.authority_public_key.as_deref() else {
        return PurchaseResult::failure("authority public key is not configured");
    };
    if certificate_token.is_empty() {
        return PurchaseResult::failure("certificate token is empty");
    }

    let claims = match verify_certificate(certificate_token, authority_key, token_store) {
        Ok(claims) => claims,
        Err(err) => return PurchaseResult::failure(err.to_string()),
    };

    create_pending_invoice(
        cache,
        btcpay,
        config,
        user_id,
        claims.net_sats,
        Some(claims.jti.as_str()),
    )
    .await
}

/// Authority-side purchase. Skips certificate verification — there is no
/// third party to authorize here, the Authority is buying against its own
/// BTCPay store — but is otherwise identical to [`purchase_credits`].
pub async fn purchase_tax_credits<S: DurableStore>(
    cache: &LedgerCache<S>,
    btcpay: &BtcPayClient,
    config: &Config,
    user_id: &UserId,
    amount_sats: Sats,
) -> PurchaseResult {
    create_pending_invoice(cache, btcpay, config, user_id, amount_sats, None).await
}

/// Polls BTCPay for an invoice's status and advances the ledger's invoice
/// state machine accordingly. Always returns the user's current balance.
pub async fn check_payment<S: DurableStore>(
    cache: &LedgerCache<S>,
    btcpay: &BtcPayClient,
    config: &Config,
    user_id: &UserId,
    invoice_id: &InvoiceId,
) -> CheckPaymentResult {
    let invoice = match btcpay.get_invoice(invoice_id.as_str()).await {
        Ok(invoice) => invoice,
        Err(err) => return CheckPaymentResult::failure(err.to_string()),
    };

    let entry = match cache.get(user_id).await {
        Ok(entry) => entry,
        Err(err) => return CheckPaymentResult::failure(err.to_string()),
    };

    let royalty_cfg = royalty_config(config);
    let mut settled_amount: Option<Sats> = None;
    let mut credits_granted = ApiSats::ZERO;

    {
        let mut guard = entry.lock().await;
        match invoice.status.as_str() {
            "New" | "Processing" => {}
            "Settled" => {
                if !guard.ledger.credited_invoices.contains(invoice_id) {
                    let amount = parse_amount_sats(invoice.amount.as_deref().unwrap_or("0"));
                    let (_, multiplier) = resolve_tier(
                        user_id,
                        &config.btcpay_tier_config,
                        &config.btcpay_user_tiers,
                    );
                    let credited = amount * multiplier;
                    guard.ledger.credit_deposit(credited, invoice_id);
                    guard.ledger.record_invoice_settled(
                        invoice_id,
                        credited,
                        chrono::Utc::now().to_rfc3339(),
                        &invoice.status,
                    );
                    guard.mark_dirty();
                    settled_amount = Some(amount);
                    credits_granted = credited;
                }
            }
            "Expired" => {
                guard.ledger.remove_pending(invoice_id);
                guard
                    .ledger
                    .record_invoice_terminal(invoice_id, InvoiceStatus::Expired, &invoice.status);
                guard.mark_dirty();
            }
            "Invalid" => {
                guard.ledger.remove_pending(invoice_id);
                guard
                    .ledger
                    .record_invoice_terminal(invoice_id, InvoiceStatus::Invalid, &invoice.status);
                guard.mark_dirty();
            }
            _ => {}
        }
    }

    if !cache.flush_user(user_id).await {
        if settled_amount.is_some() {
            log::error!(
                "failed to flush settlement for user {user_id} invoice {invoice_id}: credited {} api_sats may be lost on restart",
                credits_granted.0
            );
        } else {
            log::warn!("failed to flush invoice {invoice_id} update for user {user_id}");
        }
    }

    let royalty = match settled_amount {
        Some(amount) => Some(attempt_royalty_payout(btcpay, amount, &royalty_cfg).await),
        None => None,
    };

    let balance_api_sats = entry.lock().await.ledger.balance_api_sats.0;

    CheckPaymentResult {
        success: true,
        error: None,
        status: Some(invoice.status),
        credits_granted: credits_granted.0,
        balance_api_sats,
        royalty,
    }
}

/// Truncates a BTCPay `amount` string (which may be fractional) to whole
/// satoshis: parse as floating point, then truncate — never round.
fn parse_amount_sats(amount: &str) -> Sats {
    Sats(amount.parse::<f64>().unwrap_or(0.0) as i64)
}

/// Recovery path when a user paid but crediting never persisted (e.g. a
/// crash between recording the settled invoice and crediting the balance).
pub async fn restore_credits<S: DurableStore>(
    cache: &LedgerCache<S>,
    btcpay: &BtcPayClient,
    config: &Config,
    user_id: &UserId,
    invoice_id: &InvoiceId,
) -> RestoreResult {
    let entry = match cache.get(user_id).await {
        Ok(entry) => entry,
        Err(err) => return RestoreResult::failure(err.to_string()),
    };

    // Fast paths that need no network access: already credited, or a local
    // settled record with an uncredited amount.
    enum FastPath {
        AlreadyCredited,
        FromRecord(ApiSats),
        NeedsProvider,
    }
    let fast_path = {
        let guard = entry.lock().await;
        if guard.ledger.credited_invoices.contains(invoice_id) {
            FastPath::AlreadyCredited
        } else if let Some(rec) = guard.ledger.invoices.get(invoice_id) {
            if rec.status == InvoiceStatus::Settled && rec.api_sats_credited.0 > 0 {
                FastPath::FromRecord(rec.api_sats_credited)
            } else {
                FastPath::NeedsProvider
            }
        } else {
            FastPath::NeedsProvider
        }
    };

    match fast_path {
        FastPath::AlreadyCredited => {
            let balance_api_sats = entry.lock().await.ledger.balance_api_sats.0;
            RestoreResult {
                success: true,
                error: None,
                credited: 0,
                source: None,
                balance_api_sats,
            }
        }
        FastPath::FromRecord(credited) => {
            {
                let mut guard = entry.lock().await;
                guard.ledger.credit_deposit(credited, invoice_id);
                guard.mark_dirty();
            }
            if !cache.flush_user(user_id).await {
                log::error!(
                    "failed to flush restore-from-record for user {user_id} invoice {invoice_id}: {} api_sats may be lost on restart",
                    credited.0
                );
            }
            let balance_api_sats = entry.lock().await.ledger.balance_api_sats.0;
            RestoreResult {
                success: true,
                error: None,
                credited: credited.0,
                source: Some("vault_record"),
                balance_api_sats,
            }
        }
        FastPath::NeedsProvider => {
            let invoice = match btcpay.get_invoice(invoice_id.as_str()).await {
                Ok(invoice) => invoice,
                Err(err) => return RestoreResult::failure(err.to_string()),
            };
            if invoice.status != "Settled" {
                return RestoreResult::failure(format!(
                    "invoice {invoice_id} is not settled (status: {})",
                    invoice.status
                ));
            }
            let amount = parse_amount_sats(invoice.amount.as_deref().unwrap_or("0"));
            let (_, multiplier) =
                resolve_tier(user_id, &config.btcpay_tier_config, &config.btcpay_user_tiers);
            let credited = amount * multiplier;
            {
                let mut guard = entry.lock().await;
                guard.ledger.credit_deposit(credited, invoice_id);
                guard.ledger.record_invoice_settled(
                    invoice_id,
                    credited,
                    chrono::Utc::now().to_rfc3339(),
                    &invoice.status,
                );
                guard.mark_dirty();
            }
            if !cache.flush_user(user_id).await {
                log::error!(
                    "failed to flush restore-from-btcpay for user {user_id} invoice {invoice_id}: {} api_sats may be lost on restart",
                    credited.0
                );
            }
            let balance_api_sats = entry.lock().await.ledger.balance_api_sats.0;
            RestoreResult {
                success: true,
                error: None,
                credited: credited.0,
                source: Some("btcpay"),
                balance_api_sats,
            }
        }
    }
}

/// Startup-time sweep over a user's `pending_invoices`. One synchronous
/// flush after processing every id, not one per id.
pub async fn reconcile_pending<S: DurableStore>(
    cache: &LedgerCache<S>,
    btcpay: &BtcPayClient,
    config: &Config,
    user_id: &UserId,
) -> anyhow::Result<ReconcileResult> {
    let entry = cache.get(user_id).await?;
    let pending: Vec<InvoiceId> = entry.lock().await.ledger.pending_invoices.clone();

    let mut result = ReconcileResult {
        checked: pending.len(),
        ..Default::default()
    };

    for invoice_id in &pending {
        let invoice = match btcpay.get_invoice(invoice_id.as_str()).await {
            Ok(invoice) => invoice,
            Err(err) => {
                log::warn!("reconcile: skipping invoice {invoice_id} after provider error: {err}");
                result.skipped += 1;
                continue;
            }
        };

        let mut guard = entry.lock().await;
        match invoice.status.as_str() {
            "Settled" if !guard.ledger.credited_invoices.contains(invoice_id) => {
                let amount = parse_amount_sats(invoice.amount.as_deref().unwrap_or("0"));
                let (_, multiplier) =
                    resolve_tier(user_id, &config.btcpay_tier_config, &config.btcpay_user_tiers);
                let credited = amount * multiplier;
                guard.ledger.credit_deposit(credited, invoice_id);
                guard.ledger.record_invoice_settled(
                    invoice_id,
                    credited,
                    chrono::Utc::now().to_rfc3339(),
                    &invoice.status,
                );
                guard.mark_dirty();
                result.credited += 1;
            }
            "Expired" => {
                guard.ledger.remove_pending(invoice_id);
                guard
                    .ledger
                    .record_invoice_terminal(invoice_id, InvoiceStatus::Expired, &invoice.status);
                guard.mark_dirty();
                result.terminal += 1;
            }
            "Invalid" => {
                guard.ledger.remove_pending(invoice_id);
                guard
                    .ledger
                    .record_invoice_terminal(invoice_id, InvoiceStatus::Invalid, &invoice.status);
                guard.mark_dirty();
                result.terminal += 1;
            }
            _ => {
                result.skipped += 1;
            }
        }
    }

    cache.flush_user(user_id).await;
    Ok(result)
}

/// Derives a low-balance advisory, or `None` if the balance is above
/// threshold. `reference` is the most recently settled invoice's credited
/// amount, falling back to the seed balance (if granted) and then to
/// `floor`.
fn compute_low_balance_advisory(
    ledger: &UserLedger,
    balance_api_sats: ApiSats,
    seed_balance_api_sats: Option<i64>,
    floor: i64,
) -> Option<LowBalanceAdvisory> {
    let most_recent_settled = ledger
        .invoices
        .values()
        .filter(|rec| rec.status == InvoiceStatus::Settled)
        .filter(|rec| rec.settled_at.is_some())
        .max_by(|a, b| a.settled_at.cmp(&b.settled_at));

    let reference = match most_recent_settled {
        Some(rec) => rec.api_sats_credited.0,
        None => {
            let seed_granted = ledger
                .credited_invoices
                .iter()
                .any(|id| id.as_str() == SEED_BALANCE_SENTINEL);
            if seed_granted {
                seed_balance_api_sats.unwrap_or(floor)
            } else {
                floor
            }
        }
    };

    let threshold = (reference / 5).max(floor);
    if balance_api_sats.0 >= threshold {
        return None;
    }

    let suggested_topup = most_recent_settled
        .map(|rec| rec.amount_sats.0)
        .filter(|sats| *sats > 0)
        .unwrap_or(1000)
        .min(MAX_INVOICE_SATS.0);

    Some(LowBalanceAdvisory {
        threshold_api_sats: threshold,
        suggested_topup_sats: suggested_topup,
        message: format!(
            "balance is low: {} credits remaining, below threshold {}",
            balance_api_sats.0, threshold
        ),
    })
}

/// Read-only balance and usage report.
pub async fn check_balance<S: DurableStore>(
    cache: &LedgerCache<S>,
    config: &Config,
    user_id: &UserId,
) -> anyhow::Result<BalanceResult> {
    let entry = cache.get(user_id).await?;
    let guard = entry.lock().await;
    let ledger = &guard.ledger;

    let (tier, multiplier) =
        resolve_tier(user_id, &config.btcpay_tier_config, &config.btcpay_user_tiers);

    let today = chrono::Utc::now().date_naive().to_string();
    let today_usage: HashMap<String, ToolUsageView> = ledger
        .daily_log
        .get(&today)
        .map(|tools| {
            tools
                .iter()
                .map(|(tool, usage)| {
                    (
                        tool.clone(),
                        ToolUsageView {
                            calls: usage.calls,
                            api_sats: usage.api_sats.0 .0,
                        },
                    )
                })
                .collect()
        })
        .unwrap_or_default();

    let mut invoice_summary = InvoiceSummary {
        pending_count: ledger.pending_invoices.len(),
        ..Default::default()
    };
    for rec in ledger.invoices.values() {
        if rec.status == InvoiceStatus::Settled {
            invoice_summary.settled_count += 1;
            invoice_summary.settled_api_sats += rec.api_sats_credited.0;
        }
    }

    let seed_balance_granted = ledger
        .credited_invoices
        .iter()
        .any(|id| id.as_str() == SEED_BALANCE_SENTINEL);

    let low_balance_advisory = compute_low_balance_advisory(
        ledger,
        ledger.balance_api_sats,
        config.seed_balance_sats,
        LOW_BALANCE_FLOOR_API_SATS,
    );

    Ok(BalanceResult {
        balance_api_sats: ledger.balance_api_sats.0,
        total_deposited_api_sats: ledger.total_deposited_api_sats.0,
        total_consumed_api_sats: ledger.total_consumed_api_sats.0,
        pending_count: ledger.pending_invoices.len(),
        last_deposit_at: ledger.last_deposit_at.clone(),
        tier,
        multiplier,
        today_usage,
        invoice_summary,
        seed_balance_granted,
        low_balance_advisory,
    })
}

/// Diagnostic connectivity and configuration report. Never returns an
/// error — every check that can fail is downgraded to a `None`/`false`
/// field in the result.
pub async fn status(btcpay: &BtcPayClient, config: &Config) -> StatusResult {
    let tier_config_valid = serde_json::from_str::<serde_json::Value>(&config.btcpay_tier_config).is_ok();
    let user_tiers_valid = serde_json::from_str::<serde_json::Value>(&config.btcpay_user_tiers).is_ok();

    let royalty_enabled = config
        .tollbooth_royalty_address
        .as_deref()
        .map(|a| !a.is_empty())
        .unwrap_or(false);

    let (authority_key_fingerprint, authority_key_valid) = match config.authority_public_key.as_deref() {
        Some(key) => match crate::verifier::normalize_public_key(key) {
            Ok(pem) => (Some(crate::verifier::key_fingerprint(&pem)), Some(true)),
            Err(_) => (None, Some(false)),
        },
        None => (None, None),
    };

    let connection_configured = !config.btcpay_host.is_empty()
        && !config.btcpay_store_id.is_empty()
        && !config.btcpay_api_key.is_empty();

    let (btcpay_reachable, store_name, permissions, missing_permissions) = if connection_configured {
        let reachable = btcpay.health().await.is_ok();

        let store_name = match btcpay.get_store().await {
            Ok(store) => Some(store.name),
            Err(crate::btcpay::BtcPayError::Auth(_)) => Some("unauthorized".to_owned()),
            Err(_) => None,
        };

        let permissions = btcpay
            .get_api_key_info()
            .await
            .ok()
            .map(|info| info.permissions);

        let mut required: Vec<&str> = REQUIRED_PERMISSIONS.to_vec();
        if royalty_enabled {
            required.push(ROYALTY_PERMISSION);
        }
        let missing = match &permissions {
            Some(have) => required
                .into_iter()
                .filter(|perm| !have.iter().any(|p| p == perm))
                .map(str::to_owned)
                .collect(),
            None => required.into_iter().map(str::to_owned).collect(),
        };

        (Some(reachable), store_name, permissions, missing)
    } else {
        (None, None, None, Vec::new())
    };

    StatusResult {
        btcpay_host_configured: !config.btcpay_host.is_empty(),
        btcpay_store_configured: !config.btcpay_store_id.is_empty(),
        btcpay_api_key_configured: !config.btcpay_api_key.is_empty(),
        tier_config_valid,
        user_tiers_valid,
        btcpay_reachable,
        store_name,
        permissions,
        missing_permissions,
        authority_key_configured: config.authority_public_key.is_some(),
        authority_key_fingerprint,
        authority_key_valid,
        royalty_enabled,
        royalty_percent: config.tollbooth_royalty_percent,
        royalty_min_sats: config.tollbooth_royalty_min_sats,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use crate::verifier::DashMapTokenStore;
    use std::sync::Arc;
    use std::time::Duration;

    fn test_config() -> Config {
        Config {
            btcpay_host: "https://btcpay.example.com".to_owned(),
            btcpay_store_id: "store1".to_owned(),
            btcpay_api_key: "key1".to_owned(),
            btcpay_tier_config: "{}".to_owned(),
            btcpay_user_tiers: "{}".to_owned(),
            seed_balance_sats: None,
            tollbooth_royalty_address: None,
            tollbooth_royalty_percent: 0.02,
            tollbooth_royalty_min_sats: 10,
            authority_public_key: None,
            authority_url: None,
        }
    }

    fn test_cache() -> LedgerCache<InMemoryStore> {
        LedgerCache::new(
            Arc::new(InMemoryStore::new()),
            8,
            Duration::from_secs(3600),
            1,
            Duration::from_millis(1),
        )
    }

    #[tokio::test]
    async fn purchase_credits_refuses_without_authority_key() {
        let cache = test_cache();
        let btcpay = BtcPayClient::new("https://btcpay.example.com", "store1", "key1");
        let token_store = DashMapTokenStore::new();
        let config = test_config();
        let result = purchase_credits(
            &cache,
            &btcpay,
            &token_store,
            &config,
            &UserId::from("u1"),
            "sometoken",
        )
        .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("authority"));
    }

    #[tokio::test]
    async fn purchase_credits_refuses_empty_token() {
        let cache = test_cache();
        let btcpay = BtcPayClient::new("https://btcpay.example.com", "store1", "key1");
        let token_store = DashMapTokenStore::new();
        let mut config = test_config();
        config.authority_public_key = Some("AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=".to_owned());
        let result = purchase_credits(&cache, &btcpay, &token_store, &config, &UserId::from("u1"), "").await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("empty"));
    }

    #[test]
    fn low_balance_advisory_uses_floor_with_no_history() {
        let ledger = UserLedger::default();
        let advisory = compute_low_balance_advisory(&ledger, ApiSats(10), None, 100);
        let advisory = advisory.expect("balance 10 is below floor-derived threshold 100");
        assert_eq!(advisory.threshold_api_sats, 100);
        assert_eq!(advisory.suggested_topup_sats, 1000);
    }

    #[test]
    fn low_balance_advisory_none_when_balance_is_sufficient() {
        let ledger = UserLedger::default();
        assert!(compute_low_balance_advisory(&ledger, ApiSats(1000), None, 100).is_none());
    }

    #[test]
    fn low_balance_advisory_uses_last_settled_invoice_as_reference() {
        let mut ledger = UserLedger::default();
        let id = InvoiceId::from("inv-1");
        ledger.record_invoice_created(id.clone(), Sats(980), 100, "2026-01-01T00:00:00Z".into());
        ledger.record_invoice_settled(&id, ApiSats(98_000), "2026-01-01T00:05:00Z".into(), "Settled");
        // threshold = max(98000/5, 100) = 19600
        let advisory = compute_low_balance_advisory(&ledger, ApiSats(1000), None, 100)
            .expect("balance well below threshold");
        assert_eq!(advisory.threshold_api_sats, 19_600);
        assert_eq!(advisory.suggested_topup_sats, 980);
    }
}
