use application::PayloadEncoder;
use base64::{Engine, engine::general_purpose::STANDARD};
use domain::{DomainError, RecordFields};

const ENVELOPE_PREFIX: &str = "FHE-";

/// Stand-in for homomorphic encryption: `FHE-` + base64(JSON fields).
/// Reversible and provides no confidentiality.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedFheEncoder;

impl SimulatedFheEncoder {
    pub fn new() -> Self {
        Self
    }
}

impl PayloadEncoder for SimulatedFheEncoder {
    fn encode(&self, fields: &RecordFields) -> Result<String, DomainError> {
        let json = serde_json::to_vec(fields).map_err(|e| DomainError::Encoding(e.to_string()))?;
        Ok(format!("{}{}", ENVELOPE_PREFIX, STANDARD.encode(json)))
    }

    fn decode(&self, payload: &str) -> Result<RecordFields, DomainError> {
        let body = payload.strip_prefix(ENVELOPE_PREFIX).ok_or_else(|| {
            DomainError::Encoding(format!("payload lacks the '{}' envelope", ENVELOPE_PREFIX))
        })?;
        let json = STANDARD
            .decode(body)
            .map_err(|e| DomainError::Encoding(e.to_string()))?;
        serde_json::from_slice(&json).map_err(|e| DomainError::Encoding(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RecordFields {
        RecordFields {
            category: "Reading".to_string(),
            description: "Lost focus after 10 minutes".to_string(),
            attention_score: "80".to_string(),
        }
    }

    #[test]
    fn envelope_roundtrip() {
        let encoder = SimulatedFheEncoder::new();
        let payload = encoder.encode(&sample()).unwrap();
        assert!(payload.starts_with("FHE-"));
        assert!(!payload.contains("Reading"));
        assert_eq!(encoder.decode(&payload).unwrap(), sample());
    }

    #[test]
    fn decode_rejects_foreign_payloads() {
        let encoder = SimulatedFheEncoder::new();
        assert!(matches!(
            encoder.decode("plain text"),
            Err(DomainError::Encoding(_))
        ));
        assert!(matches!(
            encoder.decode("FHE-***"),
            Err(DomainError::Encoding(_))
        ));
    }
}
