use async_trait::async_trait;
use domain::{DomainError, Record, RecordFields, RecordId};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

pub mod index_manager;
pub mod record_repository;
pub mod stats;

#[cfg(test)]
mod testing;

pub use index_manager::{AppendOutcome, IndexManager, IndexSnapshot, IndexState};
pub use record_repository::{FetchReport, RecordRepository, SkipReason, SkippedRecord};
pub use stats::StatsService;

// --- Application Errors ---
#[derive(Error, Debug)]
pub enum ApplicationError {
    #[error("No writer identity is available")]
    NotAuthenticated,
    #[error("Store unavailable for key '{key}': {reason}")]
    StoreUnavailable { key: String, reason: String },
    #[error("Failed to decode value at key '{key}': {reason}")]
    DecodeFailure { key: String, reason: String },
    #[error("Failed to write index key '{index_key}': {reason}")]
    IndexWriteFailed { index_key: String, reason: String },
    #[error("Index update lost the compare-and-swap race {attempts} times")]
    IndexContention { attempts: u32 },
    /// Nothing was made durable.
    #[error("Record creation failed while {stage}: {source}")]
    CreationFailed {
        stage: CreateStage,
        source: Box<ApplicationError>,
    },
    /// The payload is durable but the index does not reference it (orphan).
    #[error("Record '{}' was stored but not indexed: {source}", .record.id())]
    PartialSuccess {
        record: Box<Record>,
        source: Box<ApplicationError>,
    },
    #[error("Could not allocate an unused record id after {0} attempts")]
    IdCollision(u32),
    #[error("Record not found: {0}")]
    NotFound(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Unsupported store operation: {0}")]
    Unsupported(String),
    #[error("Domain validation error: {0}")]
    DomainError(#[from] DomainError), // Propagate domain errors cleanly
}

impl ApplicationError {
    /// True when a record payload reached the store even though the operation failed.
    pub fn payload_durable(&self) -> bool {
        matches!(self, ApplicationError::PartialSuccess { .. })
    }
}

/// Steps of a single `create` call, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CreateStage {
    Idle,
    EncodingPayload,
    WritingPayload,
    AppendingIndex,
    Done,
}

impl fmt::Display for CreateStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CreateStage::Idle => "idle",
            CreateStage::EncodingPayload => "encoding payload",
            CreateStage::WritingPayload => "writing payload",
            CreateStage::AppendingIndex => "appending to index",
            CreateStage::Done => "done",
        };
        f.write_str(label)
    }
}

// --- Infrastructure Interfaces (Traits) ---

/// Flat key/value storage. No listing, no transactions.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Returns the stored bytes, or an empty vector when the key was never written.
    async fn get(&self, key: &str) -> Result<Vec<u8>, ApplicationError>;
    /// Unconditionally overwrites the value at `key`.
    async fn set(&self, key: &str, value: &[u8]) -> Result<(), ApplicationError>;
    /// Whether `compare_and_swap` is backed by the store.
    fn supports_compare_and_swap(&self) -> bool {
        false
    }
    /// Writes `value` only if the current value equals `expected` (empty = absent).
    /// Returns false when another writer got there first.
    async fn compare_and_swap(
        &self,
        key: &str,
        _expected: &[u8],
        _value: &[u8],
    ) -> Result<bool, ApplicationError> {
        Err(ApplicationError::Unsupported(format!(
            "compare-and-swap on key '{}'",
            key
        )))
    }
    /// Whether the store currently answers requests.
    async fn is_available(&self) -> bool {
        true
    }
}

/// Supplies the active writer's identity. Read at call time, never cached.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn current_identity(&self) -> Option<String>;
}

/// Opaque encoding (encryption) of submitted fields.
pub trait PayloadEncoder: Send + Sync {
    fn encode(&self, fields: &RecordFields) -> Result<String, DomainError>;
    fn decode(&self, payload: &str) -> Result<RecordFields, DomainError>;
}

pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;
}

/// Source of the random part of a record id.
pub trait RecordIdGenerator: Send + Sync {
    fn suffix(&self) -> String;
}

// --- Configuration ---

pub const DEFAULT_INDEX_KEY: &str = "record_keys";
pub const DEFAULT_RECORD_KEY_PREFIX: &str = "record_";
pub const DEFAULT_MAX_CAS_ATTEMPTS: u32 = 8;

/// Where things live in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLayout {
    pub index_key: String,
    pub record_key_prefix: String,
}

impl Default for StoreLayout {
    fn default() -> Self {
        Self {
            index_key: DEFAULT_INDEX_KEY.to_string(),
            record_key_prefix: DEFAULT_RECORD_KEY_PREFIX.to_string(),
        }
    }
}

impl StoreLayout {
    pub fn record_key(&self, id: &RecordId) -> String {
        format!("{}{}", self.record_key_prefix, id.as_str())
    }

    /// True when the record key for `id` is the index key itself (e.g. `keys`
    /// under the default layout). Such an id can never name a record.
    pub fn aliases_index(&self, id: &RecordId) -> bool {
        self.record_key(id) == self.index_key
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexConfig {
    /// Upper bound on compare-and-swap retries for one append.
    pub max_cas_attempts: u32,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            max_cas_attempts: DEFAULT_MAX_CAS_ATTEMPTS,
        }
    }
}

// --- Request/Response Models (Data Transfer Objects - DTOs) ---

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RecordResponse {
    pub id: String,
    pub encrypted_data: String,
    pub timestamp: u64,
    pub owner: String,
    pub category: String,
    pub attention_level: u8,
}

impl From<&Record> for RecordResponse {
    fn from(record: &Record) -> Self {
        Self {
            id: record.id().to_string(),
            encrypted_data: record.payload().to_string(),
            timestamp: record.created_at(),
            owner: record.owner().to_string(),
            category: record.category().to_string(),
            attention_level: record.attention_level().value(),
        }
    }
}

#[derive(Serialize, Debug)]
pub struct ListRecordsResponse {
    pub records: Vec<RecordResponse>,
    pub total: usize,
}

impl ListRecordsResponse {
    pub fn from_records(records: &[Record]) -> Self {
        Self {
            records: records.iter().map(RecordResponse::from).collect(),
            total: records.len(),
        }
    }
}

#[derive(Serialize, Debug)]
pub struct FetchReportResponse {
    pub records: Vec<RecordResponse>,
    pub skipped: Vec<SkippedRecord>,
}

impl From<&FetchReport> for FetchReportResponse {
    fn from(report: &FetchReport) -> Self {
        Self {
            records: report.records.iter().map(RecordResponse::from).collect(),
            skipped: report.skipped.clone(),
        }
    }
}

#[derive(Serialize, Debug)]
pub struct AvailabilityResponse {
    pub available: bool,
}
