// Pending request registry
//
// Each workflow owns two registries: submissions keyed by the submitting
// user and approvals keyed by the id of the posted approval message.
// A miss is never an error; callers treat it as "already handled or expired".

use moka::future::Cache;
use std::hash::Hash;
use std::time::Duration;
use tracing::debug;

/// In-memory keyed store of in-flight requests
///
/// Cloning yields another handle to the same entries.
#[derive(Clone)]
pub struct PendingRegistry<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    name: &'static str,
    entries: Cache<K, V>,
}

impl<K, V> std::fmt::Debug for PendingRegistry<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRegistry")
            .field("name", &self.name)
            .field("entries", &self.entries.entry_count())
            .finish()
    }
}

impl<K, V> PendingRegistry<K, V>
where
    K: Hash + Eq + Send + Sync + std::fmt::Debug + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Registry whose entries live until explicitly removed
    pub fn persistent(name: &'static str) -> Self {
        Self {
            name,
            entries: Cache::builder().build(),
        }
    }

    /// Registry whose entries silently expire `ttl` after insertion
    pub fn expiring(name: &'static str, ttl: Duration) -> Self {
        Self {
            name,
            entries: Cache::builder().time_to_live(ttl).build(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Insert or silently overwrite; the last write wins
    pub async fn put(&self, key: K, record: V) {
        debug!(registry = self.name, key = ?key, "Registering pending request");
        self.entries.insert(key, record).await;
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        self.entries.get(key).await
    }

    /// Remove and return the entry, if any
    pub async fn take(&self, key: &K) -> Option<V> {
        let taken = self.entries.remove(key).await;
        debug!(
            registry = self.name,
            key = ?key,
            found = taken.is_some(),
            "Taking pending request"
        );
        taken
    }

    /// Idempotent removal
    pub async fn delete(&self, key: &K) {
        self.entries.invalidate(key).await;
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }
}
