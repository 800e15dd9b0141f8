//! Per-user credit ledger. Pure data model — no I/O happens here. All
//! `api_sats` values are integer API credits (see [`ApiSats`]); real Bitcoin
//! amounts only ever appear inside [`InvoiceRecord::amount_sats`].
//!
//! Mutations never fail with an error type: `debit` reports insufficient
//! balance by returning `false`, and `decode` reports corrupt data by
//! returning a fresh, zeroed ledger. A metering core that raises on bad
//! input from its own durable store is a core that can be wedged by a single
//! bad write; this one can't.

use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::InvoiceId;
use crate::units::{ApiSats, Sats};

const SCHEMA_VERSION: u32 = 3;

/// Sentinel invoice id marking the one-time starter credit. Callers (not the
/// ledger itself) must check this isn't already in `credited_invoices` before
/// calling [`UserLedger::credit_deposit`] with it.
pub const SEED_BALANCE_SENTINEL: &str = "seed_balance_v1";

/// Aggregate call count and spend for a single tool, over some time window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolUsage {
    pub calls: i64,
    pub api_sats: ApiSatsValue,
}

/// `ApiSats` wrapper that (de)serializes as a bare integer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct ApiSatsValue(pub ApiSats);

impl Serialize for ApiSatsValue {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_i64(self.0 .0)
    }
}

impl<'de> Deserialize<'de> for ApiSatsValue {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        Ok(ApiSatsValue(ApiSats(i64::deserialize(d)?)))
    }
}

impl ToolUsage {
    fn add_call(&mut self, amount: ApiSats) {
        self.calls += 1;
        self.api_sats.0 += amount;
    }

    /// Undoes one call, flooring both counters at zero.
    fn remove_call(&mut self, amount: ApiSats) {
        self.calls = (self.calls - 1).max(0);
        self.api_sats.0 = ApiSats((self.api_sats.0 .0 - amount.0).max(0));
    }

    fn from_legacy_value(v: &Value) -> Self {
        let calls = v.get("calls").and_then(Value::as_i64).unwrap_or(0);
        let api_sats = v
            .get("api_sats")
            .or_else(|| v.get("sats"))
            .and_then(Value::as_i64)
            .unwrap_or(0);
        ToolUsage {
            calls,
            api_sats: ApiSatsValue(ApiSats(api_sats)),
        }
    }
}

/// Lifecycle status of a single invoice, as tracked in the ledger (distinct
/// from BTCPay's own raw status string, which is kept verbatim in
/// [`InvoiceRecord::btcpay_status`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceStatus {
    Pending,
    Settled,
    Expired,
    Invalid,
}

impl InvoiceStatus {
    fn as_str(self) -> &'static str {
        match self {
            InvoiceStatus::Pending => "Pending",
            InvoiceStatus::Settled => "Settled",
            InvoiceStatus::Expired => "Expired",
            InvoiceStatus::Invalid => "Invalid",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "Settled" => InvoiceStatus::Settled,
            "Expired" => InvoiceStatus::Expired,
            "Invalid" => InvoiceStatus::Invalid,
            _ => InvoiceStatus::Pending,
        }
    }
}

/// Append-only-in-spirit record of a single BTCPay invoice. Once written,
/// only its status and settlement fields are ever updated.
#[derive(Debug, Clone)]
pub struct InvoiceRecord {
    pub invoice_id: InvoiceId,
    /// Real BTC satoshis. Never rename to api_sats.
    pub amount_sats: Sats,
    /// Multiplied credits granted on settlement.
    pub api_sats_credited: ApiSats,
    /// Tier multiplier at creation. 0 is reserved for retroactive records
    /// whose tier is unknown.
    pub multiplier: i64,
    pub status: InvoiceStatus,
    /// ISO-8601 UTC. Empty for retroactive records.
    pub created_at: String,
    pub settled_at: Option<String>,
    pub btcpay_status: Option<String>,
}

impl InvoiceRecord {
    fn pending(invoice_id: InvoiceId, amount_sats: Sats, multiplier: i64, created_at: String) -> Self {
        Self {
            invoice_id,
            amount_sats,
            api_sats_credited: ApiSats::ZERO,
            multiplier,
            status: InvoiceStatus::Pending,
            created_at,
            settled_at: None,
            btcpay_status: Some("New".to_owned()),
        }
    }

    fn retroactive_settled(
        invoice_id: InvoiceId,
        api_sats_credited: ApiSats,
        settled_at: String,
        btcpay_status: String,
    ) -> Self {
        Self {
            invoice_id,
            amount_sats: Sats(0),
            api_sats_credited,
            multiplier: 0,
            status: InvoiceStatus::Settled,
            created_at: String::new(),
            settled_at: Some(settled_at),
            btcpay_status: Some(btcpay_status),
        }
    }

    fn to_value(&self) -> Value {
        serde_json::json!({
            "invoice_id": self.invoice_id.0,
            "amount_sats": self.amount_sats.0,
            "api_sats_credited": self.api_sats_credited.0,
            "multiplier": self.multiplier,
            "status": self.status.as_str(),
            "created_at": self.created_at,
            "settled_at": self.settled_at,
            "btcpay_status": self.btcpay_status,
        })
    }

    fn from_value(invoice_id: InvoiceId, v: &Value) -> Self {
        Self {
            invoice_id,
            amount_sats: Sats(v.get("amount_sats").and_then(Value::as_i64).unwrap_or(0)),
            api_sats_credited: ApiSats(
                v.get("api_sats_credited").and_then(Value::as_i64).unwrap_or(0),
            ),
            multiplier: v.get("multiplier").and_then(Value::as_i64).unwrap_or(1),
            status: InvoiceStatus::from_str(
                v.get("status").and_then(Value::as_str).unwrap_or("Pending"),
            ),
            created_at: v
                .get("created_at")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_owned(),
            settled_at: v
                .get("settled_at")
                .and_then(Value::as_str)
                .map(str::to_owned),
            btcpay_status: v
                .get("btcpay_status")
                .and_then(Value::as_str)
                .map(str::to_owned),
        }
    }
}

/// Per-user credit balance, deposit/consumption totals, and usage history.
///
/// Owned by exactly one [`crate::cache::LedgerCache`] entry at a time;
/// mutations only happen while that entry's per-user lock is held (see
/// `spec.md` §3, "Ownership and lifecycle").
#[derive(Debug, Clone, Default)]
pub struct UserLedger {
    pub balance_api_sats: ApiSats,
    pub total_deposited_api_sats: ApiSats,
    pub total_consumed_api_sats: ApiSats,
    pub pending_invoices: Vec<InvoiceId>,
    pub credited_invoices: Vec<InvoiceId>,
    pub last_deposit_at: Option<String>,
    pub daily_log: BTreeMap<String, HashMap<String, ToolUsage>>,
    pub history: HashMap<String, ToolUsage>,
    pub invoices: HashMap<InvoiceId, InvoiceRecord>,
}

fn today() -> String {
    Utc::now().date_naive().to_string()
}

impl UserLedger {
    // -- invoice record helpers ---------------------------------------------

    pub fn record_invoice_created(
        &mut self,
        invoice_id: InvoiceId,
        amount_sats: Sats,
        multiplier: i64,
        created_at: String,
    ) {
        self.invoices.insert(
            invoice_id.clone(),
            InvoiceRecord::pending(invoice_id, amount_sats, multiplier, created_at),
        );
    }

    pub fn record_invoice_settled(
        &mut self,
        invoice_id: &InvoiceId,
        api_sats_credited: ApiSats,
        settled_at: String,
        btcpay_status: &str,
    ) {
        if let Some(rec) = self.invoices.get_mut(invoice_id) {
            rec.status = InvoiceStatus::Settled;
            rec.api_sats_credited = api_sats_credited;
            rec.settled_at = Some(settled_at);
            rec.btcpay_status = Some(btcpay_status.to_owned());
        } else {
            self.invoices.insert(
                invoice_id.clone(),
                InvoiceRecord::retroactive_settled(
                    invoice_id.clone(),
                    api_sats_credited,
                    settled_at,
                    btcpay_status.to_owned(),
                ),
            );
        }
    }

    /// No-op if the invoice isn't already tracked — terminal records are
    /// never created retroactively, unlike settled ones.
    pub fn record_invoice_terminal(&mut self, invoice_id: &InvoiceId, status: InvoiceStatus, btcpay_status: &str) {
        if let Some(rec) = self.invoices.get_mut(invoice_id) {
            rec.status = status;
            rec.btcpay_status = Some(btcpay_status.to_owned());
        }
    }

    /// Appends `invoice_id` to `pending_invoices` unless already present.
    pub fn push_pending(&mut self, invoice_id: InvoiceId) {
        if !self.pending_invoices.contains(&invoice_id) {
            self.pending_invoices.push(invoice_id);
        }
    }

    pub fn remove_pending(&mut self, invoice_id: &InvoiceId) {
        self.pending_invoices.retain(|id| id != invoice_id);
    }

    // -- mutations ------------------------------------------------------------

    /// Deducts `api_sats` from the balance. Returns `false` (no change) if
    /// `api_sats` is negative or exceeds the current balance.
    pub fn debit(&mut self, tool: &str, api_sats: ApiSats) -> bool {
        if api_sats.is_negative() || self.balance_api_sats < api_sats {
            return false;
        }
        self.balance_api_sats -= api_sats;
        self.total_consumed_api_sats += api_sats;

        let today = today();
        self.daily_log
            .entry(today)
            .or_default()
            .entry(tool.to_owned())
            .or_default()
            .add_call(api_sats);
        self.history.entry(tool.to_owned()).or_default().add_call(api_sats);
        true
    }

    /// Unconditionally credits `api_sats` to the balance from a settled
    /// invoice (or the seed-balance sentinel). Idempotency against
    /// double-crediting is the caller's responsibility via
    /// `credited_invoices`.
    pub fn credit_deposit(&mut self, api_sats: ApiSats, invoice_id: &InvoiceId) {
        self.balance_api_sats += api_sats;
        self.total_deposited_api_sats += api_sats;
        self.last_deposit_at = Some(today());
        self.remove_pending(invoice_id);
        if !self.credited_invoices.contains(invoice_id) {
            self.credited_invoices.push(invoice_id.clone());
        }
    }

    /// Inverse of [`UserLedger::debit`]. Per-tool counters are floored at
    /// zero; `total_consumed_api_sats` is not — callers must only call this
    /// after a corresponding successful debit.
    pub fn rollback_debit(&mut self, tool: &str, api_sats: ApiSats) {
        self.balance_api_sats += api_sats;
        self.total_consumed_api_sats -= api_sats;

        let today = today();
        if let Some(day_log) = self.daily_log.get_mut(&today) {
            if let Some(usage) = day_log.get_mut(tool) {
                usage.remove_call(api_sats);
            }
        }
        if let Some(agg) = self.history.get_mut(tool) {
            agg.remove_call(api_sats);
        }
    }

    /// Deletes per-day entries older than `retention_days`. Does not fold
    /// them into `history` — they were already double-booked there at debit
    /// time, so folding would double-count lifetime usage. See `spec.md` §9.
    pub fn rotate_daily_log(&mut self, retention_days: i64) {
        let cutoff = (Utc::now().date_naive() - chrono::Duration::days(retention_days)).to_string();
        self.daily_log.retain(|day, _| *day >= cutoff);
    }

    // -- serialization --------------------------------------------------------

    pub fn encode(&self) -> String {
        let daily_log: serde_json::Map<String, Value> = self
            .daily_log
            .iter()
            .map(|(day, tools)| {
                let tools: serde_json::Map<String, Value> = tools
                    .iter()
                    .map(|(tool, usage)| {
                        (
                            tool.clone(),
                            serde_json::json!({"calls": usage.calls, "api_sats": usage.api_sats.0 .0}),
                        )
                    })
                    .collect();
                (day.clone(), Value::Object(tools))
            })
            .collect();

        let history: serde_json::Map<String, Value> = self
            .history
            .iter()
            .map(|(tool, usage)| {
                (
                    tool.clone(),
                    serde_json::json!({"calls": usage.calls, "api_sats": usage.api_sats.0 .0}),
                )
            })
            .collect();

        let invoices: serde_json::Map<String, Value> = self
            .invoices
            .iter()
            .map(|(id, rec)| (id.0.clone(), rec.to_value()))
            .collect();

        serde_json::json!({
            "v": SCHEMA_VERSION,
            "balance_api_sats": self.balance_api_sats.0,
            "total_deposited_api_sats": self.total_deposited_api_sats.0,
            "total_consumed_api_sats": self.total_consumed_api_sats.0,
            "pending_invoices": self.pending_invoices.iter().map(|i| &i.0).collect::<Vec<_>>(),
            "credited_invoices": self.credited_invoices.iter().map(|i| &i.0).collect::<Vec<_>>(),
            "last_deposit_at": self.last_deposit_at,
            "daily_log": daily_log,
            "history": history,
            "invoices": invoices,
        })
        .to_string()
    }

    /// Deserializes a ledger blob. Returns a fresh (zero) ledger — with a
    /// warning logged — on corrupt or non-object input; a durable-store
    /// write must never be able to lock a user out of the core.
    ///
    /// Accepts both current (`*_api_sats`) and legacy (`*_sats`) top-level
    /// keys, and both `api_sats` and legacy `sats` inside usage counters.
    pub fn decode(blob: &str) -> Self {
        let value: Value = match serde_json::from_str(blob) {
            Ok(v) => v,
            Err(_) => {
                log::warn!("ledger blob is corrupt JSON; returning fresh ledger");
                return Self::default();
            }
        };
        let Value::Object(obj) = value else {
            log::warn!("ledger blob is not a JSON object; returning fresh ledger");
            return Self::default();
        };

        let get_int = |new_key: &str, old_key: &str| -> i64 {
            obj.get(new_key)
                .or_else(|| obj.get(old_key))
                .and_then(Value::as_i64)
                .unwrap_or(0)
        };

        let mut daily_log = BTreeMap::new();
        if let Some(Value::Object(days)) = obj.get("daily_log") {
            for (day, tools) in days {
                if let Value::Object(tools) = tools {
                    let tools: HashMap<String, ToolUsage> = tools
                        .iter()
                        .map(|(tool, usage)| (tool.clone(), ToolUsage::from_legacy_value(usage)))
                        .collect();
                    daily_log.insert(day.clone(), tools);
                }
            }
        }

        let mut history = HashMap::new();
        if let Some(Value::Object(tools)) = obj.get("history") {
            for (tool, usage) in tools {
                history.insert(tool.clone(), ToolUsage::from_legacy_value(usage));
            }
        }

        let mut invoices = HashMap::new();
        if let Some(Value::Object(raw_invoices)) = obj.get("invoices") {
            for (iid, rec) in raw_invoices {
                let id = InvoiceId(iid.clone());
                invoices.insert(id.clone(), InvoiceRecord::from_value(id, rec));
            }
        }

        let pending_invoices = obj
            .get("pending_invoices")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(Value::as_str)
                    .map(InvoiceId::from)
                    .collect()
            })
            .unwrap_or_default();

        let credited_invoices = obj
            .get("credited_invoices")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(Value::as_str)
                    .map(InvoiceId::from)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            balance_api_sats: ApiSats(get_int("balance_api_sats", "balance_sats")),
            total_deposited_api_sats: ApiSats(get_int(
                "total_deposited_api_sats",
                "total_deposited_sats",
            )),
            total_consumed_api_sats: ApiSats(get_int(
                "total_consumed_api_sats",
                "total_consumed_sats",
            )),
            pending_invoices,
            credited_invoices,
            last_deposit_at: obj
                .get("last_deposit_at")
                .and_then(Value::as_str)
                .map(str::to_owned),
            daily_log,
            history,
            invoices,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debit_rejects_negative_and_insufficient() {
        let mut ledger = UserLedger::default();
        ledger.credit_deposit(ApiSats(100), &InvoiceId::from("inv-1"));
        assert!(!ledger.debit("read", ApiSats(-1)));
        assert!(!ledger.debit("read", ApiSats(101)));
        assert_eq!(ledger.balance_api_sats, ApiSats(100));
    }

    #[test]
    fn debit_then_rollback_is_a_no_op() {
        let mut ledger = UserLedger::default();
        ledger.credit_deposit(ApiSats(100), &InvoiceId::from("inv-1"));
        assert!(ledger.debit("read", ApiSats(10)));
        ledger.rollback_debit("read", ApiSats(10));
        assert_eq!(ledger.balance_api_sats, ApiSats(100));
        assert_eq!(ledger.total_consumed_api_sats, ApiSats(0));
        let usage = ledger.history.get("read").copied().unwrap_or_default();
        assert_eq!(usage.calls, 0);
        assert_eq!(usage.api_sats.0, ApiSats(0));
    }

    #[test]
    fn rollback_floors_counters_at_zero() {
        let mut ledger = UserLedger::default();
        ledger.rollback_debit("read", ApiSats(10));
        let usage = ledger.history.get("read");
        assert!(usage.is_none());
    }

    #[test]
    fn credit_deposit_moves_pending_to_credited() {
        let mut ledger = UserLedger::default();
        let id = InvoiceId::from("inv-1");
        ledger.push_pending(id.clone());
        ledger.credit_deposit(ApiSats(500), &id);
        assert!(ledger.pending_invoices.is_empty());
        assert_eq!(ledger.credited_invoices, vec![id.clone()]);
        ledger.credit_deposit(ApiSats(1), &id);
        assert_eq!(ledger.credited_invoices, vec![id]);
    }

    #[test]
    fn round_trips_through_encode_decode() {
        let mut ledger = UserLedger::default();
        let id = InvoiceId::from("inv-42");
        ledger.record_invoice_created(id.clone(), Sats(980), 100, "2026-01-01T00:00:00Z".into());
        ledger.push_pending(id.clone());
        ledger.credit_deposit(ApiSats(98_000), &id);
        ledger.record_invoice_settled(&id, ApiSats(98_000), "2026-01-01T00:05:00Z".into(), "Settled");
        ledger.debit("read", ApiSats(1));

        let decoded = UserLedger::decode(&ledger.encode());
        assert_eq!(decoded.balance_api_sats, ledger.balance_api_sats);
        assert_eq!(decoded.total_deposited_api_sats, ledger.total_deposited_api_sats);
        assert_eq!(decoded.total_consumed_api_sats, ledger.total_consumed_api_sats);
        assert_eq!(decoded.credited_invoices, ledger.credited_invoices);
        assert_eq!(
            decoded.invoices.get(&id).unwrap().status,
            InvoiceStatus::Settled
        );
    }

    #[test]
    fn decode_accepts_legacy_keys() {
        let legacy = serde_json::json!({
            "v": 1,
            "balance_sats": 42,
            "total_deposited_sats": 100,
            "total_consumed_sats": 58,
            "history": {"read": {"calls": 1, "sats": 1}},
        })
        .to_string();
        let decoded = UserLedger::decode(&legacy);
        assert_eq!(decoded.balance_api_sats, ApiSats(42));
        assert_eq!(decoded.total_deposited_api_sats, ApiSats(100));
        assert_eq!(decoded.history.get("read").unwrap().api_sats.0, ApiSats(1));
    }

    #[test]
    fn decode_corrupt_blob_yields_fresh_ledger() {
        let decoded = UserLedger::decode("not json{{{");
        assert_eq!(decoded.balance_api_sats, ApiSats(0));
        let decoded = UserLedger::decode("\"just a string\"");
        assert_eq!(decoded.balance_api_sats, ApiSats(0));
    }

    #[test]
    fn rotate_daily_log_does_not_touch_history() {
        let mut ledger = UserLedger::default();
        ledger.debit("read", ApiSats(0));
        ledger
            .daily_log
            .insert("2000-01-01".to_owned(), HashMap::new());
        ledger.rotate_daily_log(30);
        assert!(!ledger.daily_log.contains_key("2000-01-01"));
        assert!(ledger.history.contains_key("read"));
    }
}
