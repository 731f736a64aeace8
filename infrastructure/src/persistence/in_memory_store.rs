use application::{ApplicationError, KeyValueStore};
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, instrument, warn};

/// Generic storage slots kept in memory, mirroring a contract's `getData`/`setData`.
///
/// Compare-and-swap is off by default, matching stores that only offer blind writes.
#[derive(Debug, Clone)]
pub struct InMemoryKeyValueStore {
    // Key -> raw value
    slots: Arc<DashMap<String, Vec<u8>>>,
    conditional_writes: bool,
    available: Arc<AtomicBool>,
}

impl Default for InMemoryKeyValueStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryKeyValueStore {
    pub fn new() -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
            conditional_writes: false,
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// A store that also honours `compare_and_swap`.
    pub fn with_conditional_writes() -> Self {
        Self {
            conditional_writes: true,
            ..Self::new()
        }
    }

    /// Simulates the backing store going away (or coming back). Shared across clones.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn ensure_available(&self, key: &str) -> Result<(), ApplicationError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            warn!(key = %key, "In-memory store is marked unavailable");
            Err(ApplicationError::StoreUnavailable {
                key: key.to_string(),
                reason: "store is offline".to_string(),
            })
        }
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> Result<Vec<u8>, ApplicationError> {
        self.ensure_available(key)?;
        let value = self
            .slots
            .get(key)
            .map(|value_ref| value_ref.value().clone())
            .unwrap_or_default();
        debug!(bytes = value.len(), "Read slot from in-memory store");
        Ok(value)
    }

    #[instrument(skip(self, value), fields(bytes = value.len()))]
    async fn set(&self, key: &str, value: &[u8]) -> Result<(), ApplicationError> {
        self.ensure_available(key)?;
        debug!("Writing slot to in-memory store");
        self.slots.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn supports_compare_and_swap(&self) -> bool {
        self.conditional_writes
    }

    #[instrument(skip(self, expected, value), fields(bytes = value.len()))]
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &[u8],
        value: &[u8],
    ) -> Result<bool, ApplicationError> {
        if !self.conditional_writes {
            return Err(ApplicationError::Unsupported(format!(
                "compare-and-swap on key '{}'",
                key
            )));
        }
        self.ensure_available(key)?;
        // The entry guard holds the shard lock, so check and write are atomic.
        let swapped = match self.slots.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().as_slice() == expected {
                    occupied.insert(value.to_vec());
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(vacant) => {
                if expected.is_empty() {
                    vacant.insert(value.to_vec());
                    true
                } else {
                    false
                }
            }
        };
        debug!(swapped, "Compare-and-swap on in-memory store");
        Ok(swapped)
    }

    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn absent_key_reads_empty() {
        let store = InMemoryKeyValueStore::new();
        assert!(store.get("record_keys").await.unwrap().is_empty());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn set_overwrites() {
        let store = InMemoryKeyValueStore::new();
        store.set("k", b"one").await.unwrap();
        store.set("k", b"two").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), b"two".to_vec());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn compare_and_swap_is_opt_in() {
        let store = InMemoryKeyValueStore::new();
        assert!(!store.supports_compare_and_swap());
        assert!(matches!(
            store.compare_and_swap("k", b"", b"v").await,
            Err(ApplicationError::Unsupported(_))
        ));
    }

    #[tokio::test]
    async fn compare_and_swap_only_writes_on_match() {
        let store = InMemoryKeyValueStore::with_conditional_writes();
        assert!(store.compare_and_swap("k", b"", b"v1").await.unwrap());
        assert!(!store.compare_and_swap("k", b"", b"v2").await.unwrap());
        assert!(!store.compare_and_swap("k", b"stale", b"v2").await.unwrap());
        assert!(store.compare_and_swap("k", b"v1", b"v2").await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), b"v2".to_vec());
    }

    #[tokio::test]
    async fn offline_store_fails_reads_and_writes() {
        let store = InMemoryKeyValueStore::new();
        let clone = store.clone();
        store.set_available(false);
        assert!(!clone.is_available().await);
        assert!(matches!(
            clone.get("k").await,
            Err(ApplicationError::StoreUnavailable { .. })
        ));
        assert!(matches!(
            clone.set("k", b"v").await,
            Err(ApplicationError::StoreUnavailable { .. })
        ));
        store.set_available(true);
        assert!(clone.set("k", b"v").await.is_ok());
    }
}
