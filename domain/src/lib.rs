use serde::{Deserialize, Deserializer, Serialize}; // For the stored record & index wire formats
use serde_json::Value; // To read loosely-typed attention levels
use std::collections::HashSet;
use std::fmt;
use thiserror::Error; // For domain-specific errors

// --- Domain Errors ---
#[derive(Error, Debug, PartialEq)]
pub enum DomainError {
    #[error("Invalid record id: {0}")]
    InvalidRecordId(String),
    #[error("Malformed record payload: {0}")]
    MalformedRecord(String),
    #[error("Malformed record index: {0}")]
    MalformedIndex(String),
    #[error("Payload encoding failed: {0}")]
    Encoding(String),
}

// --- Record ID ---

/// Opaque identifier of a record. Also the suffix of the record's storage key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(id: String) -> Self {
        Self(id)
    }

    /// Validates an id coming from outside the store (e.g. a URL path).
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(DomainError::InvalidRecordId(
                "Record id cannot be empty.".to_string(),
            ));
        }
        if trimmed.chars().any(|c| c.is_whitespace() || c == '/') {
            return Err(DomainError::InvalidRecordId(format!(
                "Record id '{}' contains whitespace or '/'",
                trimmed
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RecordId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

impl From<RecordId> for String {
    fn from(id: RecordId) -> Self {
        id.0
    }
}

// --- Attention Level ---

pub const DEFAULT_ATTENTION_LEVEL: u8 = 50;
pub const MAX_ATTENTION_LEVEL: u8 = 100;
/// Number of buckets in the attention histogram (0-19, 20-39, 40-59, 60-79, 80-100).
pub const ATTENTION_BUCKETS: usize = 5;

/// Attention score in `[0, 100]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct AttentionLevel(u8);

impl AttentionLevel {
    /// Clamps any integer into range.
    pub fn clamped(value: i64) -> Self {
        Self(value.clamp(0, MAX_ATTENTION_LEVEL as i64) as u8)
    }

    /// Parses the free-text score typed by a user. Unparsable input falls back to the default.
    pub fn from_score_input(raw: &str) -> Self {
        match raw.trim().parse::<i64>() {
            Ok(value) => Self::clamped(value),
            Err(_) => Self::default(),
        }
    }

    /// Reads a stored value: absent or non-integer values yield the default.
    fn from_stored(value: Option<&Value>) -> Self {
        match value.and_then(Value::as_i64) {
            Some(n) => Self::clamped(n),
            None => match value.and_then(Value::as_u64) {
                Some(_) => Self(MAX_ATTENTION_LEVEL), // beyond i64
                None => Self::default(),
            },
        }
    }

    pub fn value(&self) -> u8 {
        self.0
    }

    /// Histogram bucket index for this level.
    pub fn bucket(&self) -> usize {
        (self.0 as usize / 20).min(ATTENTION_BUCKETS - 1)
    }
}

impl Default for AttentionLevel {
    fn default() -> Self {
        Self(DEFAULT_ATTENTION_LEVEL)
    }
}

impl<'de> Deserialize<'de> for AttentionLevel {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(Self::from_stored(value.as_ref()))
    }
}

// --- Record Fields (user input, pre-encoding) ---

/// What a writer submits. The whole set is encoded into the opaque payload;
/// `category` and the score are also kept in clear on the record.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RecordFields {
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_attention_score")]
    pub attention_score: String,
}

fn default_attention_score() -> String {
    DEFAULT_ATTENTION_LEVEL.to_string()
}

impl Default for RecordFields {
    fn default() -> Self {
        Self {
            category: String::new(),
            description: String::new(),
            attention_score: default_attention_score(),
        }
    }
}

// --- Record ---

/// A stored, immutable record.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    id: RecordId,
    payload: String,
    created_at: u64,
    owner: String,
    category: String,
    attention_level: AttentionLevel,
}

/// On-store shape of a record. The id is not part of it; it lives in the key.
#[derive(Serialize, Deserialize)]
struct StoredRecord {
    data: String,
    timestamp: u64,
    owner: String,
    category: String,
    #[serde(rename = "attentionLevel", default)]
    attention_level: AttentionLevel,
}

impl Record {
    pub fn new(
        id: RecordId,
        payload: String,
        created_at: u64,
        owner: String,
        category: String,
        attention_level: AttentionLevel,
    ) -> Self {
        Self {
            id,
            payload,
            created_at,
            owner,
            category,
            attention_level,
        }
    }

    pub fn id(&self) -> &RecordId {
        &self.id
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn attention_level(&self) -> AttentionLevel {
        self.attention_level
    }

    /// Serializes into the stored JSON shape.
    pub fn to_bytes(&self) -> Result<Vec<u8>, DomainError> {
        let stored = StoredRecord {
            data: self.payload.clone(),
            timestamp: self.created_at,
            owner: self.owner.clone(),
            category: self.category.clone(),
            attention_level: self.attention_level,
        };
        serde_json::to_vec(&stored).map_err(|e| DomainError::MalformedRecord(e.to_string()))
    }

    /// Parses a stored value read from the record's key.
    pub fn from_bytes(id: RecordId, bytes: &[u8]) -> Result<Self, DomainError> {
        let malformed =
            |reason: String| DomainError::MalformedRecord(format!("record '{}': {}", id, reason));
        let value: serde_json::Value =
            serde_json::from_slice(bytes).map_err(|e| malformed(e.to_string()))?;
        // serde also accepts a struct as a positional array; only the keyed form is stored.
        if !value.is_object() {
            return Err(malformed("expected a JSON object".to_string()));
        }
        let stored: StoredRecord =
            serde_json::from_value(value).map_err(|e| malformed(e.to_string()))?;
        Ok(Self {
            id,
            payload: stored.data,
            created_at: stored.timestamp,
            owner: stored.owner,
            category: stored.category,
            attention_level: stored.attention_level,
        })
    }

    /// Case-insensitive substring match on category or owner. A blank term matches everything.
    pub fn matches(&self, term: &str) -> bool {
        let term = term.trim().to_lowercase();
        if term.is_empty() {
            return true;
        }
        self.category.to_lowercase().contains(&term) || self.owner.to_lowercase().contains(&term)
    }
}

/// Orders by `created_at` descending. Stable, so equal timestamps keep index order.
pub fn sort_most_recent_first(records: &mut [Record]) {
    records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

/// Pure in-memory filter over an already-fetched set.
pub fn filter_records(records: &[Record], term: &str) -> Vec<Record> {
    records
        .iter()
        .filter(|record| record.matches(term))
        .cloned()
        .collect()
}

// --- Index wire format ---

/// Decodes the index value. Empty input is an empty index; repeated ids keep their first position.
pub fn decode_index(bytes: &[u8]) -> Result<Vec<RecordId>, DomainError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    let ids: Vec<RecordId> =
        serde_json::from_slice(bytes).map_err(|e| DomainError::MalformedIndex(e.to_string()))?;
    let mut seen = HashSet::with_capacity(ids.len());
    Ok(ids.into_iter().filter(|id| seen.insert(id.clone())).collect())
}

pub fn encode_index(ids: &[RecordId]) -> Result<Vec<u8>, DomainError> {
    serde_json::to_vec(ids).map_err(|e| DomainError::MalformedIndex(e.to_string()))
}

// --- Statistics ---

/// Aggregates over a fetched record set.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct RecordStats {
    pub total_records: usize,
    pub average_attention: f64,
    pub attention_histogram: [u32; ATTENTION_BUCKETS],
}

impl RecordStats {
    pub fn from_records(records: &[Record]) -> Self {
        let mut histogram = [0u32; ATTENTION_BUCKETS];
        let mut sum: u64 = 0;
        for record in records {
            histogram[record.attention_level.bucket()] += 1;
            sum += record.attention_level.value() as u64;
        }
        let average_attention = if records.is_empty() {
            0.0
        } else {
            sum as f64 / records.len() as f64
        };
        Self {
            total_records: records.len(),
            average_attention,
            attention_histogram: histogram,
        }
    }
}
