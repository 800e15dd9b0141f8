//! Durable backing store for ledger blobs.
//!
//! Concrete backends (a Postgres table, a key-value service, whatever the
//! deployment has lying around) live outside this crate, same as the
//! teacher keeps `ln::Lightning`/`database::Database` as injected peer
//! components rather than subtypes. This module only defines the trait and
//! an in-memory double for tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::ids::UserId;

/// Durable storage for opaque ledger JSON blobs, keyed by user.
///
/// Implementations own their own consistency and retry semantics; this core
/// only calls the three methods below and treats blobs as opaque strings.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Persists `ledger_json` as the current blob for `user_id`. Returns an
    /// implementation-defined storage reference (a row id, an object key —
    /// whatever the backend tracks) for logging/debugging.
    async fn store_ledger(&self, user_id: &UserId, ledger_json: &str) -> anyhow::Result<String>;

    /// Fetches the current blob for `user_id`, or `None` if the user has
    /// never been persisted.
    async fn fetch_ledger(&self, user_id: &UserId) -> anyhow::Result<Option<String>>;

    /// Writes a point-in-time snapshot alongside the current blob, keyed by
    /// `timestamp`. Best-effort: a backend that doesn't support snapshots
    /// may return `Ok(None)` without writing anything.
    async fn snapshot_ledger(
        &self,
        user_id: &UserId,
        ledger_json: &str,
        timestamp: &str,
    ) -> anyhow::Result<Option<String>>;
}

/// The backend this workspace wires up by default. A real deployment swaps
/// this for a durable implementation without touching any caller of
/// [`DurableStore`]; nothing here depends on it being in-memory.
pub type Store = InMemoryStore;

/// In-memory `DurableStore`, used by tests and local development. Not
/// durable across process restarts — this is a test double, not a backend.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    ledgers: Mutex<HashMap<UserId, String>>,
    snapshots: Mutex<HashMap<(UserId, String), String>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DurableStore for InMemoryStore {
    async fn store_ledger(&self, user_id: &UserId, ledger_json: &str) -> anyhow::Result<String> {
        self.ledgers
            .lock()
            .expect("lock poisoned")
            .insert(user_id.clone(), ledger_json.to_owned());
        Ok(format!("memory:{user_id}"))
    }

    async fn fetch_ledger(&self, user_id: &UserId) -> anyhow::Result<Option<String>> {
        Ok(self.ledgers.lock().expect("lock poisoned").get(user_id).cloned())
    }

    async fn snapshot_ledger(
        &self,
        user_id: &UserId,
        ledger_json: &str,
        timestamp: &str,
    ) -> anyhow::Result<Option<String>> {
        let key = (user_id.clone(), timestamp.to_owned());
        self.snapshots
            .lock()
            .expect("lock poisoned")
            .insert(key, ledger_json.to_owned());
        Ok(Some(format!("memory:{user_id}:{timestamp}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_through_in_memory_store() {
        let store = InMemoryStore::new();
        let user = UserId::from("u1");
        assert!(store.fetch_ledger(&user).await.unwrap().is_none());
        store.store_ledger(&user, "{}").await.unwrap();
        assert_eq!(store.fetch_ledger(&user).await.unwrap().as_deref(), Some("{}"));
    }

    #[tokio::test]
    async fn snapshot_is_independent_of_current_blob() {
        let store = InMemoryStore::new();
        let user = UserId::from("u1");
        store.store_ledger(&user, "{\"v\":1}").await.unwrap();
        store
            .snapshot_ledger(&user, "{\"v\":1}", "2026-01-01T00:00:00Z")
            .await
            .unwrap();
        store.store_ledger(&user, "{\"v\":2}").await.unwrap();
        assert_eq!(
            store.fetch_ledger(&user).await.unwrap().as_deref(),
            Some("{\"v\":2}")
        );
    }
}
