use std::sync::Arc;

use tracing::{info, warn};

use crate::config::{EXPANDED_TOP_K, RuntimeSettings};
use crate::error::CollaboratorError;
use crate::model::{
    Block, Candidate, DocumentArtifact, Evidence, ExtractionMode, ExtractionResult,
    FallbackReason, Field, QualityProfile, RetrievalContextEntry, VerifierStatus,
};
use crate::retrieval::expand::expand_field_query;
use crate::retrieval::text::{normalize_space, truncate_chars};
use crate::retrieval::{
    DenseInput, RetrievalRequest, SegmentOptions, assemble_segments, retrieve_candidates,
};

use super::citations::{CitationClaim, prioritize_citations};
use super::collaborator::{
    DEFAULT_BASE_CONFIDENCE, EmbeddingProvider, ExtractorOutput, LlmCollaborators,
    VerifierOutput, embed_in_batches,
};
use super::confidence::{ConfidenceSignals, calibrate, self_consistent};
use super::deterministic::{
    MAX_RAW_TEXT_CHARS, extract_deterministic, normalize_value_by_type, value_from_block,
};
use super::retry::with_rate_limit_retry;

const CONTEXT_PREVIEW_CHARS: usize = 500;
const CONTEXT_CITATIONS: usize = 2;
const HYBRID_FALLBACK_REASON: &str = "Hybrid mode fell back to deterministic extraction.";

#[derive(Debug, Clone)]
pub struct DenseVectors {
    pub query: Vec<f32>,
    pub blocks: Vec<Option<Vec<f32>>>,
}

impl DenseVectors {
    pub fn as_input(&self) -> DenseInput<'_> {
        DenseInput {
            query: &self.query,
            blocks: &self.blocks,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RetrievedEvidence {
    pub candidates: Vec<Candidate>,
    pub evidence: Vec<Evidence>,
}

impl RetrievedEvidence {
    pub fn context(&self) -> Vec<RetrievalContextEntry> {
        self.evidence
            .iter()
            .map(|item| RetrievalContextEntry {
                block_id: item.block_id().to_string(),
                block_type: item.block_type(),
                final_score: item.final_score(),
                text_preview: truncate_chars(item.text(), CONTEXT_PREVIEW_CHARS).to_string(),
                citations: item
                    .citations()
                    .iter()
                    .take(CONTEXT_CITATIONS)
                    .cloned()
                    .collect(),
            })
            .collect()
    }
}

#[derive(Clone)]
pub struct Orchestrator {
    settings: RuntimeSettings,
    llm: Option<LlmCollaborators>,
    embeddings: Option<Arc<dyn EmbeddingProvider>>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Orchestrator")
            .field("settings", &self.settings)
            .field("llm", &self.llm)
            .field("embeddings", &self.embeddings.is_some())
            .finish()
    }
}

impl Orchestrator {
    pub fn new(settings: RuntimeSettings) -> Self {
        Self {
            settings,
            llm: None,
            embeddings: None,
        }
    }

    pub fn with_llm(mut self, llm: LlmCollaborators) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_embeddings(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embeddings = Some(provider);
        self
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    pub async fn dense_vectors(&self, field: &Field, blocks: &[Block]) -> Option<DenseVectors> {
        let provider = self.embeddings.as_ref()?;

        let mut texts = vec![expand_field_query(field)];
        let mut positions = Vec::<usize>::new();
        for (index, block) in blocks.iter().enumerate() {
            let text = normalize_space(&block.text);
            if !text.is_empty() {
                positions.push(index);
                texts.push(text);
            }
        }

        let mut vectors = match embed_in_batches(provider.as_ref(), &texts).await {
            Ok(vectors) => vectors,
            Err(err) => {
                warn!(field_key = %field.key, error = %err, "embedding_provider_failed_using_local_fallback");
                return None;
            }
        };

        let block_vectors = vectors.split_off(1);
        let query = vectors.pop()?;
        let mut by_position = vec![None; blocks.len()];
        for (position, vector) in positions.into_iter().zip(block_vectors) {
            by_position[position] = Some(vector);
        }

        Some(DenseVectors {
            query,
            blocks: by_position,
        })
    }

    pub fn retrieve(
        &self,
        field: &Field,
        artifact: &DocumentArtifact,
        dense: Option<&DenseVectors>,
        top_k: usize,
    ) -> RetrievedEvidence {
        let retrieval = &self.settings.retrieval;
        let candidates = retrieve_candidates(RetrievalRequest {
            blocks: &artifact.blocks,
            field,
            doc_version_id: &artifact.doc_version_id,
            dense: dense.map(DenseVectors::as_input),
            rrf_k: retrieval.rrf_k,
            top_k,
            embedding_dim: retrieval.embedding_dim,
        });

        let options = SegmentOptions {
            max_segments: top_k.max(1),
            ..SegmentOptions::from(retrieval)
        };
        let segments =
            assemble_segments(&artifact.blocks, &candidates, &artifact.doc_version_id, options);

        let evidence = if segments.is_empty() {
            candidates.iter().cloned().map(Evidence::Block).collect()
        } else {
            segments.into_iter().map(Evidence::Segment).collect()
        };

        RetrievedEvidence {
            candidates,
            evidence,
        }
    }

    pub async fn extract_field(
        &self,
        field: &Field,
        artifact: &DocumentArtifact,
        mode: ExtractionMode,
        profile: QualityProfile,
    ) -> ExtractionResult {
        if mode == ExtractionMode::Deterministic {
            return extract_deterministic(field, &artifact.blocks, &artifact.doc_version_id);
        }

        let dense = self.dense_vectors(field, &artifact.blocks).await;
        let retrieved = self.retrieve(field, artifact, dense.as_ref(), profile.top_k());
        let model_name = self
            .llm
            .as_ref()
            .map(|llm| llm.extractor.model_name().to_string());

        if retrieved.evidence.is_empty() {
            let mut result = ExtractionResult::empty(
                mode.method(),
                FallbackReason::NotFound,
                0.1,
                VerifierStatus::Fail,
                "No legal evidence candidates found by retrieval.",
                "Retriever found no evidence candidates.",
            );
            result.model_name = model_name;
            return result;
        }

        let Some(llm) = self.llm.as_ref() else {
            return match mode {
                ExtractionMode::LlmReasoning => {
                    let mut result = ExtractionResult::empty(
                        mode.method(),
                        FallbackReason::ModelError,
                        0.05,
                        VerifierStatus::Fail,
                        "LLM reasoning mode failed before producing a supported extraction.",
                        "LLM unavailable or returned invalid payload.",
                    );
                    result.retrieval_context = retrieved.context();
                    result
                }
                _ => self.hybrid_fallback(field, artifact, HYBRID_FALLBACK_REASON.to_string()),
            };
        };

        let context = retrieved.context();
        match self
            .extract_with_llm(llm, field, artifact, dense.as_ref(), retrieved, mode, profile)
            .await
        {
            Ok(result) => result,
            Err(err) if mode == ExtractionMode::LlmReasoning => {
                warn!(field_key = %field.key, error = %err, "llm_reasoning_extraction_failed");
                let mut result = ExtractionResult::empty(
                    mode.method(),
                    FallbackReason::ModelError,
                    0.05,
                    VerifierStatus::Fail,
                    "LLM reasoning extraction failed.",
                    &err.to_string(),
                );
                result.model_name = model_name;
                result.retrieval_context = context;
                result
            }
            Err(err) => {
                warn!(field_key = %field.key, error = %err, "llm_hybrid_fell_back_to_deterministic");
                self.hybrid_fallback(
                    field,
                    artifact,
                    format!("{HYBRID_FALLBACK_REASON} Collaborator error: {err}"),
                )
            }
        }
    }

    fn hybrid_fallback(
        &self,
        field: &Field,
        artifact: &DocumentArtifact,
        reason: String,
    ) -> ExtractionResult {
        let mut result = extract_deterministic(field, &artifact.blocks, &artifact.doc_version_id);
        if result.uncertainty_reason.is_none() {
            result.uncertainty_reason = Some(reason);
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn extract_with_llm(
        &self,
        llm: &LlmCollaborators,
        field: &Field,
        artifact: &DocumentArtifact,
        dense: Option<&DenseVectors>,
        mut retrieved: RetrievedEvidence,
        mode: ExtractionMode,
        profile: QualityProfile,
    ) -> Result<ExtractionResult, CollaboratorError> {
        let (mut primary, mut verdict) = self
            .extract_and_verify(llm, field, &retrieved.evidence, profile)
            .await?;

        if verdict.status == VerifierStatus::Fail {
            let expanded = self.retrieve(field, artifact, dense, EXPANDED_TOP_K);
            if !expanded.evidence.is_empty() {
                info!(
                    field_key = %field.key,
                    reason = %verdict.reason,
                    evidence_count = expanded.evidence.len(),
                    "extraction_retry_with_expanded_evidence"
                );
                retrieved = expanded;
                (primary, verdict) = self
                    .extract_and_verify(llm, field, &retrieved.evidence, profile)
                    .await?;
            }
        }

        let mut consistent = true;
        if profile == QualityProfile::High {
            let reversed = retrieved.evidence.iter().rev().cloned().collect::<Vec<Evidence>>();
            let reversed = reversed.as_slice();
            let extractor = llm.extractor.as_ref();
            let alternative = with_rate_limit_retry(&self.settings.retry, "extract", move || {
                extractor.extract(field, reversed, profile)
            })
            .await?;
            consistent = self_consistent(&primary.value, &alternative.value);
        }

        let evidence = &retrieved.evidence;
        let selected_index = verdict
            .best_candidate_index
            .unwrap_or(primary.candidate_index);
        let selected = &evidence[selected_index.min(evidence.len() - 1)];

        let mut raw_text = normalize_space(&primary.raw_text);
        if raw_text.is_empty() {
            raw_text = normalize_space(selected.text());
        }
        let mut value = primary.value.trim().to_string();
        if value.is_empty() && !raw_text.is_empty() {
            value = value_from_block(field.field_type, &raw_text);
        }
        let (normalized_value, normalization_valid) =
            normalize_value_by_type(field.field_type, &value);

        let base_confidence = if primary.confidence > 0.0 {
            primary.confidence
        } else {
            DEFAULT_BASE_CONFIDENCE
        };
        let confidence_score = calibrate(ConfidenceSignals {
            base_confidence,
            retrieval_score: selected.final_score(),
            verifier_status: verdict.status,
            self_consistent: consistent,
        });

        let (fallback_reason, uncertainty_reason) = match verdict.status {
            VerifierStatus::Fail => (Some(FallbackReason::Ambiguous), Some(verdict.reason.clone())),
            VerifierStatus::Partial if profile == QualityProfile::High && !consistent => (
                Some(FallbackReason::Ambiguous),
                Some("High-quality mode detected inconsistent LLM answers.".to_string()),
            ),
            VerifierStatus::Partial => (None, Some(verdict.reason.clone())),
            _ => (None, None),
        };

        let prioritized = prioritize_citations(
            selected,
            &artifact.blocks,
            CitationClaim {
                field,
                value: &value,
                raw_text: &raw_text,
            },
            &artifact.doc_version_id,
        );

        info!(
            field_key = %field.key,
            doc_version_id = %artifact.doc_version_id,
            selected_block_id = %selected.block_id(),
            verifier_status = verdict.status.as_str(),
            self_consistent = consistent,
            confidence_score,
            anchor_mode = ?prioritized.anchor_mode,
            chosen_block_id = prioritized.chosen_block_id.as_deref().unwrap_or(""),
            "field_extraction_finalized"
        );

        Ok(ExtractionResult {
            raw_text: truncate_chars(&raw_text, MAX_RAW_TEXT_CHARS).to_string(),
            value,
            normalized_value,
            normalization_valid,
            confidence_score,
            citations: prioritized.citations,
            evidence_summary: primary.evidence_summary.clone(),
            fallback_reason,
            extraction_method: mode.method(),
            model_name: primary
                .model_name
                .clone()
                .or_else(|| Some(llm.extractor.model_name().to_string())),
            retrieval_context: retrieved.context(),
            verifier_status: verdict.status,
            uncertainty_reason,
        })
    }

    async fn extract_and_verify(
        &self,
        llm: &LlmCollaborators,
        field: &Field,
        evidence: &[Evidence],
        profile: QualityProfile,
    ) -> Result<(ExtractorOutput, VerifierOutput), CollaboratorError> {
        let extractor = llm.extractor.as_ref();
        let verifier = llm.verifier.as_ref();
        let retry = &self.settings.retry;

        let primary = with_rate_limit_retry(retry, "extract", move || {
            extractor.extract(field, evidence, profile)
        })
        .await?;

        let (value, raw_text) = (primary.value.as_str(), primary.raw_text.as_str());
        let verdict = with_rate_limit_retry(retry, "verify", move || {
            verifier.verify(field, value, raw_text, evidence, profile)
        })
        .await?;

        Ok((primary, verdict))
    }
}
