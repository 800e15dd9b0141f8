//! In-memory per-user credit ledger.
//!
//! Unlike the teacher's `balance` module, there is no query layer here —
//! a [`UserLedger`] is pure data owned by a [`crate::cache::LedgerCache`]
//! entry, loaded from and flushed to a [`crate::store::DurableStore`] as an
//! opaque JSON blob.

mod entities;

pub use entities::{
    InvoiceRecord, InvoiceStatus, ToolUsage, UserLedger, SEED_BALANCE_SENTINEL,
};
