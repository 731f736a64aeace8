use crate::{
    AppendOutcome, ApplicationError, Clock, CreateStage, IdentityProvider, IndexManager,
    KeyValueStore, PayloadEncoder, RecordIdGenerator, StoreLayout,
};
use domain::{
    AttentionLevel, Record, RecordFields, RecordId, filter_records, sort_most_recent_first,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// How many fresh ids `create` tries before giving up on a collision.
const MAX_ID_ATTEMPTS: u32 = 4;

/// Why an indexed id did not make it into a listing.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    /// Indexed, but nothing stored under the record key (dangling reference).
    Missing,
    Undecodable(String),
    StoreUnavailable(String),
    /// The id maps onto the index key itself, so it cannot name a record.
    AliasesIndex,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct SkippedRecord {
    pub id: String,
    #[serde(flatten)]
    pub reason: SkipReason,
}

/// Result of enumerating the index: what could be read, and what could not.
#[derive(Debug, Clone, Default)]
pub struct FetchReport {
    /// Most recent first.
    pub records: Vec<Record>,
    pub skipped: Vec<SkippedRecord>,
}

/// Creates and enumerates records on top of a bare key/value store.
///
/// Payload and index live under separate keys. `create` always writes the
/// payload first and only then appends the id to the index, so a failure can
/// leave an unindexed payload (reported as `PartialSuccess`) but never an
/// index entry without a payload.
pub struct RecordRepository {
    store: Arc<dyn KeyValueStore>,
    index: Arc<IndexManager>,
    identity: Arc<dyn IdentityProvider>,
    encoder: Arc<dyn PayloadEncoder>,
    clock: Arc<dyn Clock>,
    id_generator: Arc<dyn RecordIdGenerator>,
    layout: StoreLayout,
}

impl RecordRepository {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        index: Arc<IndexManager>,
        identity: Arc<dyn IdentityProvider>,
        encoder: Arc<dyn PayloadEncoder>,
        clock: Arc<dyn Clock>,
        id_generator: Arc<dyn RecordIdGenerator>,
        layout: StoreLayout,
    ) -> Self {
        Self {
            store,
            index,
            identity,
            encoder,
            clock,
            id_generator,
            layout,
        }
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    /// Encodes `fields`, stores the record and appends its id to the index.
    ///
    /// Store calls already issued keep running to completion in the store even
    /// if this future is dropped, so an abandoned create may still show up later.
    #[instrument(skip(self, fields), fields(category = %fields.category))]
    pub async fn create(&self, fields: RecordFields) -> Result<Record, ApplicationError> {
        let mut stage = CreateStage::Idle;
        debug!(%stage, "Starting record creation");

        let owner = match self.identity.current_identity().await {
            Some(owner) if !owner.trim().is_empty() => owner,
            _ => {
                warn!("Rejecting create: no writer identity");
                return Err(ApplicationError::NotAuthenticated);
            }
        };

        stage = CreateStage::EncodingPayload;
        debug!(%stage, owner = %owner);
        let payload = self
            .encoder
            .encode(&fields)
            .map_err(|e| creation_failed(stage, e.into()))?;
        let now_millis = self.clock.now_millis();

        stage = CreateStage::WritingPayload;
        debug!(%stage);
        let id = self
            .allocate_id(now_millis)
            .await
            .map_err(|e| creation_failed(stage, e))?;
        let record = Record::new(
            id,
            payload,
            now_millis / 1000,
            owner,
            fields.category,
            AttentionLevel::from_score_input(&fields.attention_score),
        );
        let key = self.layout.record_key(record.id());
        let bytes = record
            .to_bytes()
            .map_err(|e| creation_failed(stage, e.into()))?;
        self.store.set(&key, &bytes).await.map_err(|e| {
            error!(record_id = %record.id(), "Failed to write record payload: {}", e);
            creation_failed(stage, e)
        })?;
        info!(record_id = %record.id(), key = %key, "Record payload stored");

        stage = CreateStage::AppendingIndex;
        debug!(%stage);
        if let Err(e) = self.index.append(record.id()).await {
            error!(record_id = %record.id(), "Payload stored but index append failed: {}", e);
            return Err(ApplicationError::PartialSuccess {
                record: Box::new(record),
                source: Box::new(e),
            });
        }

        stage = CreateStage::Done;
        info!(record_id = %record.id(), %stage, "Record created");
        Ok(record)
    }

    /// Re-runs only the index step for a record whose payload is already stored.
    #[instrument(skip(self), fields(record_id = %id))]
    pub async fn retry_index(&self, id: &RecordId) -> Result<AppendOutcome, ApplicationError> {
        if self.fetch_one(id).await?.is_none() {
            warn!("Cannot index a record that has no stored payload");
            return Err(ApplicationError::NotFound(id.to_string()));
        }
        let outcome = self.index.append(id).await?;
        info!(?outcome, "Index step retried");
        Ok(outcome)
    }

    /// Reads one record straight from its key, indexed or not.
    #[instrument(skip(self), fields(record_id = %id))]
    pub async fn fetch_one(&self, id: &RecordId) -> Result<Option<Record>, ApplicationError> {
        if self.layout.aliases_index(id) {
            warn!("Record id resolves to the index key; treating as absent");
            return Ok(None);
        }
        let key = self.layout.record_key(id);
        let bytes = self.store.get(&key).await?;
        if bytes.is_empty() {
            debug!("No payload stored for record");
            return Ok(None);
        }
        Record::from_bytes(id.clone(), &bytes)
            .map(Some)
            .map_err(|e| ApplicationError::DecodeFailure {
                key,
                reason: e.to_string(),
            })
    }

    /// All readable indexed records, most recent first.
    pub async fn fetch_all(&self) -> Result<Vec<Record>, ApplicationError> {
        Ok(self.fetch_all_with_report().await?.records)
    }

    /// Like `fetch_all`, also reporting every indexed id that had to be skipped.
    #[instrument(skip(self))]
    pub async fn fetch_all_with_report(&self) -> Result<FetchReport, ApplicationError> {
        let ids = self.index.list().await?;
        let mut report = FetchReport {
            records: Vec::with_capacity(ids.len()),
            skipped: Vec::new(),
        };

        for id in ids {
            let key = self.layout.record_key(&id);
            let reason = if self.layout.aliases_index(&id) {
                SkipReason::AliasesIndex
            } else {
                match self.store.get(&key).await {
                    Ok(bytes) if bytes.is_empty() => SkipReason::Missing,
                    Ok(bytes) => match Record::from_bytes(id.clone(), &bytes) {
                        Ok(record) => {
                            report.records.push(record);
                            continue;
                        }
                        Err(e) => SkipReason::Undecodable(e.to_string()),
                    },
                    Err(e) => SkipReason::StoreUnavailable(e.to_string()),
                }
            };
            warn!(record_id = %id, ?reason, "Skipping indexed record");
            report.skipped.push(SkippedRecord {
                id: id.into(),
                reason,
            });
        }

        sort_most_recent_first(&mut report.records);
        debug!(
            loaded = report.records.len(),
            skipped = report.skipped.len(),
            "Enumerated records"
        );
        Ok(report)
    }

    /// Records whose category or owner contains `term` (case-insensitive).
    #[instrument(skip(self))]
    pub async fn fetch_filtered(&self, term: &str) -> Result<Vec<Record>, ApplicationError> {
        let records = self.fetch_all().await?;
        Ok(filter_records(&records, term))
    }

    /// `<millis>-<suffix>`, regenerated while the key is already taken.
    async fn allocate_id(&self, now_millis: u64) -> Result<RecordId, ApplicationError> {
        for attempt in 1..=MAX_ID_ATTEMPTS {
            let id = RecordId::new(format!("{}-{}", now_millis, self.id_generator.suffix()));
            if !self.layout.aliases_index(&id) {
                let existing = self.store.get(&self.layout.record_key(&id)).await?;
                if existing.is_empty() {
                    return Ok(id);
                }
            }
            warn!(record_id = %id, attempt, "Generated record id already in use");
        }
        Err(ApplicationError::IdCollision(MAX_ID_ATTEMPTS))
    }
}

fn creation_failed(stage: CreateStage, source: ApplicationError) -> ApplicationError {
    ApplicationError::CreationFailed {
        stage,
        source: Box::new(source),
    }
}
