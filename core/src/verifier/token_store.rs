use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::ids::TokenId;

/// Anti-replay store for certificate `jti`s.
///
/// Injected into [`super::verify_certificate`] rather than kept as a
/// process-global singleton, so tests and multi-tenant deployments can each
/// hold their own store.
pub trait TokenStore: Send + Sync {
    /// Records `jti` (valid until `exp`, a Unix timestamp) if it hasn't been
    /// seen before. Returns `false` if it has — the caller must treat that
    /// as a replay and reject the certificate.
    fn check_and_insert(&self, jti: &TokenId, exp: i64) -> bool;
}

/// `DashMap`-backed [`TokenStore`]. Expired entries are purged at the start
/// of every call rather than on a timer, so the store never grows past the
/// number of distinct unexpired tokens seen.
#[derive(Debug, Default)]
pub struct DashMapTokenStore {
    seen: DashMap<TokenId, i64>,
}

impl DashMapTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn purge_expired(&self, now: i64) {
        self.seen.retain(|_, exp| *exp > now);
    }
}

impl TokenStore for DashMapTokenStore {
    fn check_and_insert(&self, jti: &TokenId, exp: i64) -> bool {
        let now = chrono::Utc::now().timestamp();
        self.purge_expired(now);
        // `entry` holds the shard lock across the presence check and the
        // insert — two concurrent verifications of the same jti can't both
        // observe it absent, unlike a separate contains_key + insert.
        match self.seen.entry(jti.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(v) => {
                v.insert(exp);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_check_for_same_jti_is_replayed() {
        let store = DashMapTokenStore::new();
        let jti = TokenId::from("tok-1");
        let future = chrono::Utc::now().timestamp() + 3600;
        assert!(store.check_and_insert(&jti, future));
        assert!(!store.check_and_insert(&jti, future));
    }

    #[test]
    fn expired_entries_are_purged_on_next_check() {
        let store = DashMapTokenStore::new();
        let past = chrono::Utc::now().timestamp() - 10;
        let expired = TokenId::from("tok-expired");
        store.seen.insert(expired.clone(), past);

        let fresh = TokenId::from("tok-fresh");
        let future = chrono::Utc::now().timestamp() + 3600;
        assert!(store.check_and_insert(&fresh, future));
        assert!(!store.seen.contains_key(&expired));
    }
}
