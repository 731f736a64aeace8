//! Test doubles for the collaborator traits.

use crate::{
    ApplicationError, Clock, IdentityProvider, KeyValueStore, PayloadEncoder, RecordIdGenerator,
};
use async_trait::async_trait;
use domain::{DomainError, RecordFields};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tokio::sync::Barrier;

struct ReadGate {
    key: String,
    parties: usize,
    arrived: AtomicUsize,
    barrier: Barrier,
}

/// In-memory store with fault injection.
#[derive(Default)]
pub struct FakeStore {
    values: Mutex<HashMap<String, Vec<u8>>>,
    fail_get: Mutex<HashSet<String>>,
    fail_set: Mutex<HashSet<String>>,
    cas: bool,
    lose_cas: AtomicBool,
    sets: AtomicUsize,
    gate: Mutex<Option<std::sync::Arc<ReadGate>>>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_compare_and_swap() -> Self {
        Self {
            cas: true,
            ..Self::default()
        }
    }

    pub fn put(&self, key: &str, value: &[u8]) {
        self.values
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_vec());
    }

    pub fn raw(&self, key: &str) -> Vec<u8> {
        self.values
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.lock().unwrap().contains_key(key)
    }

    pub fn fail_get_on(&self, key: &str) {
        self.fail_get.lock().unwrap().insert(key.to_string());
    }

    pub fn fail_set_on(&self, key: &str) {
        self.fail_set.lock().unwrap().insert(key.to_string());
    }

    pub fn heal(&self) {
        self.fail_get.lock().unwrap().clear();
        self.fail_set.lock().unwrap().clear();
    }

    pub fn always_lose_cas(&self) {
        self.lose_cas.store(true, Ordering::SeqCst);
    }

    pub fn set_count(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }

    /// The first `parties` reads of `key` each capture the value and then wait
    /// until all of them have read, forcing a read-read-write-write interleaving.
    pub fn gate_reads_of(&self, key: &str, parties: usize) {
        *self.gate.lock().unwrap() = Some(std::sync::Arc::new(ReadGate {
            key: key.to_string(),
            parties,
            arrived: AtomicUsize::new(0),
            barrier: Barrier::new(parties),
        }));
    }

    fn check(&self, failing: &Mutex<HashSet<String>>, key: &str) -> Result<(), ApplicationError> {
        if failing.lock().unwrap().contains(key) {
            return Err(ApplicationError::StoreUnavailable {
                key: key.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FakeStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>, ApplicationError> {
        self.check(&self.fail_get, key)?;
        let value = self.raw(key);
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            if gate.key == key && gate.arrived.fetch_add(1, Ordering::SeqCst) < gate.parties {
                gate.barrier.wait().await;
            }
        }
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), ApplicationError> {
        self.check(&self.fail_set, key)?;
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.put(key, value);
        Ok(())
    }

    fn supports_compare_and_swap(&self) -> bool {
        self.cas
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &[u8],
        value: &[u8],
    ) -> Result<bool, ApplicationError> {
        self.check(&self.fail_set, key)?;
        if self.lose_cas.load(Ordering::SeqCst) {
            return Ok(false);
        }
        let mut values = self.values.lock().unwrap();
        let current = values.get(key).map(Vec::as_slice).unwrap_or_default();
        if current != expected {
            return Ok(false);
        }
        values.insert(key.to_string(), value.to_vec());
        self.sets.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }
}

pub struct FixedIdentity(pub Option<String>);

#[async_trait]
impl IdentityProvider for FixedIdentity {
    async fn current_identity(&self) -> Option<String> {
        self.0.clone()
    }
}

pub struct FixedClock(pub AtomicU64);

impl FixedClock {
    pub fn at_secs(secs: u64) -> Self {
        Self(AtomicU64::new(secs * 1000))
    }

    pub fn set_secs(&self, secs: u64) {
        self.0.store(secs * 1000, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_millis(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Hands out queued suffixes, then numbered ones.
#[derive(Default)]
pub struct ScriptedIds {
    queued: Mutex<VecDeque<String>>,
    counter: AtomicUsize,
}

impl ScriptedIds {
    pub fn queue(suffixes: &[&str]) -> Self {
        Self {
            queued: Mutex::new(suffixes.iter().map(|s| s.to_string()).collect()),
            counter: AtomicUsize::new(0),
        }
    }
}

impl RecordIdGenerator for ScriptedIds {
    fn suffix(&self) -> String {
        if let Some(next) = self.queued.lock().unwrap().pop_front() {
            return next;
        }
        format!("s{:06}", self.counter.fetch_add(1, Ordering::SeqCst))
    }
}

/// Reversible "encoding" with a switch to make it fail.
#[derive(Default)]
pub struct TaggedJsonEncoder {
    pub broken: bool,
}

impl PayloadEncoder for TaggedJsonEncoder {
    fn encode(&self, fields: &RecordFields) -> Result<String, DomainError> {
        if self.broken {
            return Err(DomainError::Encoding("encoder offline".to_string()));
        }
        let json = serde_json::to_string(fields).map_err(|e| DomainError::Encoding(e.to_string()))?;
        Ok(format!("ENC-{}", json))
    }

    fn decode(&self, payload: &str) -> Result<RecordFields, DomainError> {
        let json = payload
            .strip_prefix("ENC-")
            .ok_or_else(|| DomainError::Encoding("missing ENC- prefix".to_string()))?;
        serde_json::from_str(json).map_err(|e| DomainError::Encoding(e.to_string()))
    }
}
