//! The single index key listing every record id.
//!
//! The store offers no listing and, in general, no conditional writes, so the
//! index is a JSON array kept under one key and maintained by read-modify-write.
//! Two writers that both read before either writes will lose one id (last
//! writer wins); the losing record stays in the store as an orphan. When the
//! store supports compare-and-swap the append becomes a retry loop instead and
//! no id is lost.

use crate::{ApplicationError, IndexConfig, KeyValueStore};
use domain::{RecordId, decode_index, encode_index};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Decoded view of the index value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexState {
    /// Never written, or written empty.
    Absent,
    Decoded(Vec<RecordId>),
    /// Present but unreadable.
    Corrupt(String),
}

/// The index value exactly as read, together with its decoded state.
#[derive(Debug, Clone)]
pub struct IndexSnapshot {
    raw: Vec<u8>,
    state: IndexState,
}

impl IndexSnapshot {
    fn from_raw(raw: Vec<u8>) -> Self {
        let state = if raw.is_empty() {
            IndexState::Absent
        } else {
            match decode_index(&raw) {
                Ok(ids) => IndexState::Decoded(ids),
                Err(e) => IndexState::Corrupt(e.to_string()),
            }
        };
        Self { raw, state }
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn state(&self) -> &IndexState {
        &self.state
    }

    /// Ids in insertion order. Empty for an absent or corrupt index.
    pub fn ids(&self) -> &[RecordId] {
        match &self.state {
            IndexState::Decoded(ids) => ids,
            IndexState::Absent | IndexState::Corrupt(_) => &[],
        }
    }

    pub fn is_corrupt(&self) -> bool {
        matches!(self.state, IndexState::Corrupt(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AppendOutcome {
    /// The id was written at `position` (0-based).
    Appended { position: usize },
    /// The id was already listed; nothing was written.
    AlreadyPresent,
}

pub struct IndexManager {
    store: Arc<dyn KeyValueStore>,
    index_key: String,
    config: IndexConfig,
}

impl IndexManager {
    /// `max_cas_attempts` is raised to at least one so every append is tried.
    pub fn new(store: Arc<dyn KeyValueStore>, index_key: String, config: IndexConfig) -> Self {
        Self {
            store,
            index_key,
            config: IndexConfig {
                max_cas_attempts: config.max_cas_attempts.max(1),
            },
        }
    }

    pub fn index_key(&self) -> &str {
        &self.index_key
    }

    /// Reads the index value without interpreting failures.
    #[instrument(skip(self), fields(index_key = %self.index_key))]
    pub async fn snapshot(&self) -> Result<IndexSnapshot, ApplicationError> {
        let raw = self.store.get(&self.index_key).await?;
        let snapshot = IndexSnapshot::from_raw(raw);
        debug!(bytes = snapshot.raw.len(), "Read index snapshot");
        Ok(snapshot)
    }

    /// Lists ids in insertion order. A corrupt index reads as empty.
    #[instrument(skip(self), fields(index_key = %self.index_key))]
    pub async fn list(&self) -> Result<Vec<RecordId>, ApplicationError> {
        let snapshot = self.snapshot().await?;
        match snapshot.state {
            IndexState::Absent => Ok(Vec::new()),
            IndexState::Decoded(ids) => Ok(ids),
            IndexState::Corrupt(reason) => {
                warn!(%reason, "Index value could not be decoded; listing as empty");
                Ok(Vec::new())
            }
        }
    }

    pub async fn contains(&self, id: &RecordId) -> Result<bool, ApplicationError> {
        Ok(self.list().await?.contains(id))
    }

    /// Adds `id` to the end of the index unless it is already listed.
    ///
    /// Fails with `DecodeFailure` when the current index cannot be read, rather
    /// than replacing entries it cannot see.
    #[instrument(skip(self), fields(index_key = %self.index_key, record_id = %id))]
    pub async fn append(&self, id: &RecordId) -> Result<AppendOutcome, ApplicationError> {
        if self.store.supports_compare_and_swap() {
            self.append_with_cas(id).await
        } else {
            self.append_read_modify_write(id).await
        }
    }

    async fn append_read_modify_write(
        &self,
        id: &RecordId,
    ) -> Result<AppendOutcome, ApplicationError> {
        let snapshot = self.snapshot().await?;
        let Some((ids, position)) = self.merge(&snapshot, id)? else {
            debug!("Id already indexed; skipping write");
            return Ok(AppendOutcome::AlreadyPresent);
        };
        let encoded = encode_index(&ids)?;
        self.store
            .set(&self.index_key, &encoded)
            .await
            .map_err(|e| self.write_failed(e))?;
        info!(position, "Appended id to index");
        Ok(AppendOutcome::Appended { position })
    }

    async fn append_with_cas(&self, id: &RecordId) -> Result<AppendOutcome, ApplicationError> {
        for attempt in 1..=self.config.max_cas_attempts {
            let snapshot = self.snapshot().await?;
            let Some((ids, position)) = self.merge(&snapshot, id)? else {
                debug!(attempt, "Id already indexed; skipping write");
                return Ok(AppendOutcome::AlreadyPresent);
            };
            let encoded = encode_index(&ids)?;
            let swapped = self
                .store
                .compare_and_swap(&self.index_key, snapshot.raw(), &encoded)
                .await
                .map_err(|e| self.write_failed(e))?;
            if swapped {
                info!(position, attempt, "Appended id to index (compare-and-swap)");
                return Ok(AppendOutcome::Appended { position });
            }
            debug!(attempt, "Index changed underneath us; retrying");
        }
        warn!(
            attempts = self.config.max_cas_attempts,
            "Giving up on index append after repeated conflicts"
        );
        Err(ApplicationError::IndexContention {
            attempts: self.config.max_cas_attempts,
        })
    }

    /// New id list with `id` appended, or `None` when it is already present.
    fn merge(
        &self,
        snapshot: &IndexSnapshot,
        id: &RecordId,
    ) -> Result<Option<(Vec<RecordId>, usize)>, ApplicationError> {
        if let IndexState::Corrupt(reason) = snapshot.state() {
            warn!(%reason, "Refusing to append onto an unreadable index");
            return Err(ApplicationError::DecodeFailure {
                key: self.index_key.clone(),
                reason: reason.clone(),
            });
        }
        if snapshot.ids().contains(id) {
            return Ok(None);
        }
        let mut ids = snapshot.ids().to_vec();
        ids.push(id.clone());
        let position = ids.len() - 1;
        Ok(Some((ids, position)))
    }

    fn write_failed(&self, err: ApplicationError) -> ApplicationError {
        match err {
            ApplicationError::Unsupported(_) => err,
            other => ApplicationError::IndexWriteFailed {
                index_key: self.index_key.clone(),
                reason: other.to_string(),
            },
        }
    }
}
