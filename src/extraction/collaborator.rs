use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CollaboratorError;
use crate::model::{Evidence, Field, QualityProfile, VerifierStatus};

pub const DEFAULT_BASE_CONFIDENCE: f64 = 0.65;
pub const DEFAULT_EXTRACTION_SUMMARY: &str = "LLM extracted value from retrieved legal evidence.";
pub const DEFAULT_VERIFIER_REASON: &str = "Verifier returned no specific reason.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractorOutput {
    pub value: String,
    pub raw_text: String,
    pub evidence_summary: String,
    pub candidate_index: usize,
    pub confidence: f64,
    pub model_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifierOutput {
    pub status: VerifierStatus,
    pub reason: String,
    pub best_candidate_index: Option<usize>,
    pub model_name: Option<String>,
}

#[async_trait]
pub trait Extractor: Send + Sync {
    fn model_name(&self) -> &str;

    async fn extract(
        &self,
        field: &Field,
        evidence: &[Evidence],
        profile: QualityProfile,
    ) -> Result<ExtractorOutput, CollaboratorError>;
}

#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(
        &self,
        field: &Field,
        value: &str,
        raw_text: &str,
        evidence: &[Evidence],
        profile: QualityProfile,
    ) -> Result<VerifierOutput, CollaboratorError>;
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn batch_size(&self) -> usize {
        32
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CollaboratorError>;
}

#[derive(Clone)]
pub struct LlmCollaborators {
    pub extractor: Arc<dyn Extractor>,
    pub verifier: Arc<dyn Verifier>,
}

impl std::fmt::Debug for LlmCollaborators {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("LlmCollaborators")
            .field("extractor_model", &self.extractor.model_name())
            .finish()
    }
}

pub async fn embed_in_batches(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
) -> Result<Vec<Vec<f32>>, CollaboratorError> {
    let batch_size = provider.batch_size().max(1);
    let mut vectors = Vec::with_capacity(texts.len());
    for batch in texts.chunks(batch_size) {
        let embedded = provider.embed(batch).await?;
        if embedded.len() != batch.len() {
            return Err(CollaboratorError::InvalidPayload(format!(
                "embedding provider returned {} vectors for {} texts",
                embedded.len(),
                batch.len()
            )));
        }
        vectors.extend(embedded);
    }
    Ok(vectors)
}

pub fn extract_json_object(text: &str) -> Map<String, Value> {
    let raw = text.trim();
    if raw.is_empty() {
        return Map::new();
    }

    if let Ok(Value::Object(object)) = serde_json::from_str::<Value>(raw) {
        return object;
    }

    match (raw.find('{'), raw.rfind('}')) {
        (Some(start), Some(end)) if end > start => {
            match serde_json::from_str::<Value>(&raw[start..=end]) {
                Ok(Value::Object(object)) => object,
                _ => Map::new(),
            }
        }
        _ => Map::new(),
    }
}

impl ExtractorOutput {
    pub fn from_model_text(text: &str, evidence_len: usize, model_name: Option<&str>) -> Self {
        let payload = extract_json_object(text);
        let value = string_field(&payload, "value");
        let raw_text = string_field(&payload, "raw_text");
        let evidence_summary = string_field(&payload, "evidence_summary");
        let confidence = number_field(&payload, "confidence").unwrap_or(DEFAULT_BASE_CONFIDENCE);

        Self {
            raw_text: if raw_text.is_empty() {
                value.clone()
            } else {
                raw_text
            },
            value,
            evidence_summary: if evidence_summary.is_empty() {
                DEFAULT_EXTRACTION_SUMMARY.to_string()
            } else {
                evidence_summary
            },
            candidate_index: clamp_index(
                index_field(&payload, "candidate_index").unwrap_or(0),
                evidence_len,
            ),
            confidence: confidence.clamp(0.0, 1.0),
            model_name: model_name.map(str::to_string),
        }
    }
}

impl VerifierOutput {
    pub fn from_model_text(text: &str, evidence_len: usize, model_name: Option<&str>) -> Self {
        let payload = extract_json_object(text);
        let status = payload
            .get("verifier_status")
            .and_then(Value::as_str)
            .map(VerifierStatus::parse_lenient)
            .unwrap_or(VerifierStatus::Partial);
        let reason = string_field(&payload, "reason");

        Self {
            status,
            reason: if reason.is_empty() {
                DEFAULT_VERIFIER_REASON.to_string()
            } else {
                reason
            },
            best_candidate_index: index_field(&payload, "best_candidate_index")
                .map(|index| clamp_index(index, evidence_len)),
            model_name: model_name.map(str::to_string),
        }
    }
}

pub fn clamp_index(index: i64, len: usize) -> usize {
    let upper = len.saturating_sub(1);
    usize::try_from(index.max(0)).map_or(upper, |index| index.min(upper))
}

fn string_field(payload: &Map<String, Value>, key: &str) -> String {
    match payload.get(key) {
        Some(Value::String(text)) => text.trim().to_string(),
        Some(Value::Number(number)) => number.to_string(),
        Some(Value::Bool(flag)) => flag.to_string(),
        _ => String::new(),
    }
}

fn number_field(payload: &Map<String, Value>, key: &str) -> Option<f64> {
    match payload.get(key)? {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn index_field(payload: &Map<String, Value>, key: &str) -> Option<i64> {
    match payload.get(key)? {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|value| value as i64)),
        Value::String(text) => text.trim().parse::<i64>().ok(),
        _ => None,
    }
}
