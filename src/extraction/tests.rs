use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use proptest::prelude::*;

use super::citations::{AnchorMode, CitationClaim, prioritize_citations};
use super::collaborator::{ExtractorOutput, VerifierOutput, extract_json_object};
use super::confidence::{ConfidenceSignals, calibrate, self_consistent};
use super::deterministic::{
    MAX_RAW_TEXT_CHARS, extract_deterministic, first_sentence, normalize_value_by_type,
    parse_date,
};
use super::*;
use crate::config::{RetryPolicy, RuntimeSettings};
use crate::error::CollaboratorError;
use crate::model::{
    Block, BlockType, Citation, DocumentArtifact, Evidence, ExtractionMethod, ExtractionMode,
    FallbackReason, Field, FieldType, QualityProfile, Segment, SegmentScores, VerifierStatus,
};
use crate::retrieval::dense::embed_text_local;
use crate::retrieval::text::{normalize_space, truncate_chars};

fn citation(snippet: &str, page: u32) -> Citation {
    Citation {
        source: "pdf".to_string(),
        snippet: snippet.to_string(),
        page: Some(page),
        bbox: None,
        selector: None,
        start_char: None,
        end_char: None,
        doc_version_id: Some("dv_demo".to_string()),
    }
}

fn block(id: &str, text: &str, citations: Vec<Citation>) -> Block {
    Block {
        id: id.to_string(),
        block_type: BlockType::Paragraph,
        text: text.to_string(),
        citations,
    }
}

fn field(key: &str, name: &str, field_type: FieldType, prompt: &str) -> Field {
    Field {
        key: key.to_string(),
        name: name.to_string(),
        field_type,
        prompt: prompt.to_string(),
    }
}

fn segment(
    block_id: &str,
    segment_block_ids: &[&str],
    source_block_ids: &[&str],
    citations: Vec<Citation>,
) -> Evidence {
    Evidence::Segment(Segment {
        block_id: block_id.to_string(),
        text: String::new(),
        citations,
        scores: SegmentScores::default(),
        segment_block_ids: segment_block_ids.iter().map(|id| id.to_string()).collect(),
        source_block_ids: source_block_ids.iter().map(|id| id.to_string()).collect(),
        start_index: 0,
        end_index: segment_block_ids.len().saturating_sub(1),
    })
}

fn contract_artifact() -> DocumentArtifact {
    let mut blocks = vec![
        block("b0", "MASTER SUPPLY AGREEMENT", vec![citation("MASTER SUPPLY AGREEMENT", 1)]),
        block(
            "b1",
            "This Agreement is effective as of October 1, 2014. It binds both parties.",
            vec![citation("effective as of October 1, 2014", 1)],
        ),
        block(
            "b2",
            "The Seller shall deliver goods within 30 days of written notice.",
            vec![citation("deliver goods within 30 days", 2)],
        ),
        block(
            "b3",
            "This Agreement is governed by the laws of the State of Delaware.",
            vec![citation("governed by the laws of Delaware", 3)],
        ),
    ];
    for index in 4..16 {
        blocks.push(block(
            &format!("b{index}"),
            &format!("Schedule {index} lists pricing tiers and delivery windows."),
            vec![citation("Schedule", index as u32)],
        ));
    }
    DocumentArtifact {
        doc_version_id: "dv_demo".to_string(),
        blocks,
        markdown: String::new(),
        auxiliary: serde_json::Value::Null,
    }
}

fn effective_date_field() -> Field {
    field(
        "effective_date",
        "Effective Date",
        FieldType::Date,
        "What is the effective date of the agreement",
    )
}

fn fast_settings() -> RuntimeSettings {
    RuntimeSettings {
        retry: RetryPolicy {
            rate_limit_retries: 2,
            base_delay_ms: 0,
            jitter_ms: 0,
        },
        ..RuntimeSettings::default()
    }
}

fn extractor_output(value: &str) -> ExtractorOutput {
    ExtractorOutput {
        value: value.to_string(),
        raw_text: "This Agreement is effective as of October 1, 2014.".to_string(),
        evidence_summary: "Effective date stated in the preamble.".to_string(),
        candidate_index: 0,
        confidence: 0.8,
        model_name: Some("mock-extractor".to_string()),
    }
}

fn verdict(status: VerifierStatus, reason: &str) -> VerifierOutput {
    VerifierOutput {
        status,
        reason: reason.to_string(),
        best_candidate_index: Some(0),
        model_name: Some("mock-verifier".to_string()),
    }
}

struct ScriptedExtractor {
    responses: Mutex<VecDeque<Result<ExtractorOutput, CollaboratorError>>>,
    fallback: ExtractorOutput,
    evidence_lens: Mutex<Vec<usize>>,
}

impl ScriptedExtractor {
    fn new(responses: Vec<Result<ExtractorOutput, CollaboratorError>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            fallback: extractor_output("2014-10-01"),
            evidence_lens: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.evidence_lens.lock().len()
    }
}

#[async_trait]
impl Extractor for ScriptedExtractor {
    fn model_name(&self) -> &str {
        "mock-extractor"
    }

    async fn extract(
        &self,
        _field: &Field,
        evidence: &[Evidence],
        _profile: QualityProfile,
    ) -> Result<ExtractorOutput, CollaboratorError> {
        self.evidence_lens.lock().push(evidence.len());
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(self.fallback.clone()))
    }
}

struct ScriptedVerifier {
    responses: Mutex<VecDeque<Result<VerifierOutput, CollaboratorError>>>,
    calls: Mutex<usize>,
}

impl ScriptedVerifier {
    fn new(responses: Vec<Result<VerifierOutput, CollaboratorError>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            calls: Mutex::new(0),
        })
    }

    fn calls(&self) -> usize {
        *self.calls.lock()
    }
}

#[async_trait]
impl Verifier for ScriptedVerifier {
    async fn verify(
        &self,
        _field: &Field,
        _value: &str,
        _raw_text: &str,
        _evidence: &[Evidence],
        _profile: QualityProfile,
    ) -> Result<VerifierOutput, CollaboratorError> {
        *self.calls.lock() += 1;
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(verdict(VerifierStatus::Pass, "Supported by evidence.")))
    }
}

struct LocalEmbeddings;

#[async_trait]
impl EmbeddingProvider for LocalEmbeddings {
    fn batch_size(&self) -> usize {
        5
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CollaboratorError> {
        Ok(texts.iter().map(|text| embed_text_local(text, 64)).collect())
    }
}

struct BrokenEmbeddings;

#[async_trait]
impl EmbeddingProvider for BrokenEmbeddings {
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, CollaboratorError> {
        Err(CollaboratorError::Failed("embedding backend offline".to_string()))
    }
}

fn orchestrator(extractor: &Arc<ScriptedExtractor>, verifier: &Arc<ScriptedVerifier>) -> Orchestrator {
    Orchestrator::new(fast_settings()).with_llm(LlmCollaborators {
        extractor: extractor.clone(),
        verifier: verifier.clone(),
    })
}

#[test]
fn parse_date_supports_iso_slash_and_month_name_forms() {
    assert_eq!(parse_date("Signed 2014-10-01."), Some("2014-10-01".to_string()));
    assert_eq!(parse_date("on 3/7/21 at noon"), Some("2021-03-07".to_string()));
    assert_eq!(parse_date("on 12/31/1999"), Some("1999-12-31".to_string()));
    assert_eq!(
        parse_date("Dated as of August 17, 2017 among"),
        Some("2017-08-17".to_string())
    );
    assert_eq!(parse_date("no date here"), None);
    assert_eq!(parse_date("   "), None);
}

#[test]
fn normalize_value_by_type_applies_type_rules() {
    assert_eq!(
        normalize_value_by_type(FieldType::Number, "Fee of $1,250,000.50 per year"),
        ("1250000.50".to_string(), true)
    );
    assert_eq!(
        normalize_value_by_type(FieldType::Boolean, "Seller shall indemnify"),
        ("true".to_string(), true)
    );
    assert_eq!(
        normalize_value_by_type(FieldType::Boolean, "None"),
        ("false".to_string(), true)
    );
    assert_eq!(
        normalize_value_by_type(FieldType::List, "Tesla; Panasonic,\nTFL"),
        ("Tesla, Panasonic, TFL".to_string(), true)
    );
    assert_eq!(
        normalize_value_by_type(FieldType::Date, "sometime soon"),
        (String::new(), false)
    );
    assert_eq!(
        normalize_value_by_type(FieldType::Text, "  spaced   out "),
        ("spaced out".to_string(), true)
    );
    assert_eq!(normalize_value_by_type(FieldType::Text, "   "), (String::new(), false));
}

#[test]
fn first_sentence_splits_after_terminal_punctuation() {
    assert_eq!(first_sentence("One. Two! Three?"), "One.");
    assert_eq!(first_sentence("Version 1.5 applies. Next"), "Version 1.5 applies.");
    assert_eq!(first_sentence("No terminal punctuation"), "No terminal punctuation");
}

#[test]
fn deterministic_extraction_finds_effective_date() {
    let artifact = contract_artifact();
    let result = extract_deterministic(
        &effective_date_field(),
        &artifact.blocks,
        &artifact.doc_version_id,
    );

    assert_eq!(result.value, "2014-10-01");
    assert_eq!(result.normalized_value, "2014-10-01");
    assert!(result.normalization_valid);
    assert_eq!(result.fallback_reason, None);
    assert_eq!(result.extraction_method, ExtractionMethod::Deterministic);
    assert_eq!(result.verifier_status, VerifierStatus::Skipped);
    assert_eq!(
        result.evidence_summary,
        "Selected best matching block from page 1 using field prompt keywords."
    );
    assert!((0.2..=0.95).contains(&result.confidence_score));
    assert_eq!(result.citations[0].doc_version_id.as_deref(), Some("dv_demo"));
}

#[test]
fn deterministic_extraction_reports_not_found() {
    let blocks = vec![block("b0", "Unrelated schedule of rates", Vec::new())];
    let result = extract_deterministic(
        &field("renewal", "Renewal", FieldType::Text, "automatic renewal clause"),
        &blocks,
        "dv_demo",
    );

    assert_eq!(result.fallback_reason, Some(FallbackReason::NotFound));
    assert_eq!(result.confidence_score, 0.1);
    assert_eq!(result.verifier_status, VerifierStatus::Skipped);
    assert_eq!(
        result.uncertainty_reason.as_deref(),
        Some("No candidate block matched field keywords.")
    );
}

#[test]
fn calibrate_blends_signals_and_clamps() {
    let signals = ConfidenceSignals {
        base_confidence: 0.72,
        retrieval_score: 1.0,
        verifier_status: VerifierStatus::Pass,
        self_consistent: true,
    };
    assert_eq!(calibrate(signals), 0.904);
    assert_eq!(
        calibrate(ConfidenceSignals {
            base_confidence: 1.0,
            ..signals
        }),
        0.98
    );
    assert_eq!(
        calibrate(ConfidenceSignals {
            base_confidence: 0.0,
            retrieval_score: 0.0,
            verifier_status: VerifierStatus::Fail,
            self_consistent: false,
        }),
        0.05
    );
    assert_eq!(
        calibrate(ConfidenceSignals {
            verifier_status: VerifierStatus::Skipped,
            self_consistent: false,
            ..signals
        }),
        0.474
    );
}

#[test]
fn self_consistency_ignores_case_and_whitespace() {
    assert!(self_consistent("Tesla,  Inc.", "tesla, inc."));
    assert!(!self_consistent("Tesla", "Panasonic"));
}

#[test]
fn payload_helpers_recover_json_from_model_text() {
    let text = "Here you go:\n```json\n{\"value\": \"2014-10-01\", \"candidate_index\": 9, \"confidence\": 1.7}\n```";
    assert_eq!(extract_json_object(text).len(), 3);

    let output = ExtractorOutput::from_model_text(text, 3, Some("model-x"));
    assert_eq!(output.value, "2014-10-01");
    assert_eq!(output.raw_text, "2014-10-01");
    assert_eq!(output.candidate_index, 2);
    assert_eq!(output.confidence, 1.0);
    assert_eq!(output.model_name.as_deref(), Some("model-x"));

    let fallback = ExtractorOutput::from_model_text("not json at all", 3, None);
    assert_eq!(fallback.value, "");
    assert_eq!(fallback.confidence, 0.65);
    assert_eq!(fallback.candidate_index, 0);

    let verdict = VerifierOutput::from_model_text(
        "{\"verifier_status\": \"maybe\", \"best_candidate_index\": -4}",
        2,
        None,
    );
    assert_eq!(verdict.status, VerifierStatus::Partial);
    assert_eq!(verdict.reason, "Verifier returned no specific reason.");
    assert_eq!(verdict.best_candidate_index, Some(0));

    let passed = VerifierOutput::from_model_text("{\"verifier_status\": \"pass\"}", 2, None);
    assert_eq!(passed.status, VerifierStatus::Pass);
    assert_eq!(passed.best_candidate_index, None);

    let pointed = VerifierOutput::from_model_text(
        "{\"verifier_status\": \"pass\", \"best_candidate_index\": \"7\"}",
        3,
        None,
    );
    assert_eq!(pointed.best_candidate_index, Some(2));
}

#[test]
fn segment_citations_put_primary_evidence_first() {
    let boilerplate = citation("Standard notice and waiver language.", 12);
    let parties = citation(
        "The parties are Tesla, Inc. and Panasonic Corporation as Seller.",
        1,
    );
    let blocks = vec![
        block("block_0", "Standard notice and waiver language.", vec![boilerplate.clone()]),
        block(
            "block_1",
            "The parties are Tesla, Inc. and Panasonic Corporation as Seller.",
            vec![parties.clone()],
        ),
        block("block_2", "Miscellaneous and governing law.", Vec::new()),
    ];
    let selected = segment(
        "segment_0_2",
        &["block_0", "block_1", "block_2"],
        &["block_1"],
        vec![boilerplate, parties],
    );
    let field = field("parties_entities", "Parties", FieldType::Text, "");

    let details = prioritize_citations(
        &selected,
        &blocks,
        CitationClaim {
            field: &field,
            value: "Tesla; Panasonic (as \"Seller\")",
            raw_text: "The parties are Tesla, Inc. and Panasonic Corporation as Seller.",
        },
        "dv_demo",
    );

    assert_eq!(details.chosen_block_id.as_deref(), Some("block_1"));
    assert!(details.chosen_score > 0.0);
    assert_eq!(details.citations[0].page, Some(1));
    assert!(details.citations[0].snippet.contains("Tesla"));
    assert_eq!(details.citations.len(), 2);
    assert_eq!(details.anchor_mode, AnchorMode::Segment);
}

#[test]
fn non_segment_evidence_keeps_citation_order() {
    let selected = Evidence::Block(crate::model::Candidate {
        block_id: "block_10".to_string(),
        block_type: BlockType::Paragraph,
        text: "Sample".to_string(),
        citations: vec![citation("First citation", 8), citation("Second citation", 9)],
        scores: Default::default(),
    });
    let field = field("document_title", "Document Title", FieldType::Text, "");

    let details = prioritize_citations(
        &selected,
        &[],
        CitationClaim {
            field: &field,
            value: "Sample",
            raw_text: "Sample",
        },
        "dv_demo",
    );

    assert_eq!(details.chosen_block_id, None);
    assert_eq!(details.chosen_score, 0.0);
    assert_eq!(details.citations[0].snippet, "First citation");
    assert_eq!(details.citations[1].snippet, "Second citation");
    assert_eq!(details.anchor_mode, AnchorMode::Segment);
}

#[test]
fn single_block_segment_keeps_citation_order() {
    let generic = citation("Confidential Treatment Requested by Tesla, Inc.", 68);
    let blocks = vec![
        block(
            "block_2",
            "Loan and Security Agreement dated as of August 17, 2017 among Tesla and TFL.",
            vec![citation("Dated as of August 17, 2017", 1)],
        ),
        block(
            "block_66",
            "Confidential Treatment Requested by Tesla, Inc. rights and waivers.",
            vec![generic.clone()],
        ),
    ];
    let selected = segment(
        "segment_1_1",
        &["block_66"],
        &["block_66"],
        vec![generic, citation("Exhibit index", 70)],
    );
    let field = field("effective_date", "Effective Date", FieldType::Date, "");

    let details = prioritize_citations(
        &selected,
        &blocks,
        CitationClaim {
            field: &field,
            value: "2017-08-17",
            raw_text: "dated as of August 17, 2017",
        },
        "dv_demo",
    );

    assert_eq!(details.anchor_mode, AnchorMode::Segment);
    assert_eq!(details.chosen_block_id, None);
    assert_eq!(details.citations.len(), 2);
    assert_eq!(details.citations[0].page, Some(68));
    assert_eq!(details.citations[1].snippet, "Exhibit index");
}

#[test]
fn global_rescue_reanchors_generic_segment_to_explicit_date_block() {
    let generic = citation("Confidential Treatment Requested by Tesla, Inc.", 68);
    let dated = citation("Dated as of August 17, 2017", 1);
    let blocks = vec![
        block(
            "block_2",
            "Loan and Security Agreement dated as of August 17, 2017 among Tesla and TFL.",
            vec![dated],
        ),
        block(
            "block_66",
            "Confidential Treatment Requested by Tesla, Inc. rights and waivers.",
            vec![generic.clone()],
        ),
        block(
            "block_67",
            "Confidential Treatment Requested by Tesla, Inc. representations.",
            vec![generic.clone()],
        ),
        block(
            "block_68",
            "Confidential Treatment Requested by Tesla, Inc. obligations.",
            vec![generic.clone()],
        ),
    ];
    let selected = segment(
        "segment_66_70",
        &["block_66", "block_67", "block_68"],
        &["block_66"],
        vec![generic],
    );
    let field = field("effective_date_term", "Effective Date / Term", FieldType::Text, "");

    let details = prioritize_citations(
        &selected,
        &blocks,
        CitationClaim {
            field: &field,
            value: "2017-08-17",
            raw_text: "dated as of August 17, 2017",
        },
        "dv_demo",
    );

    assert_eq!(details.anchor_mode, AnchorMode::GlobalRescue);
    assert_eq!(details.chosen_block_id.as_deref(), Some("block_2"));
    assert!(details.global_best_score > details.segment_best_score);
    assert_eq!(details.citations[0].page, Some(1));
    assert!(details.citations[0].snippet.contains("August 17, 2017"));
}

#[test]
fn early_page_bias_applies_for_header_fields() {
    let late = citation("Loan and Security Agreement title text with weak fit.", 168);
    let early = citation("AMENDED AND RESTATED LOAN AND SECURITY AGREEMENT", 1);
    let blocks = vec![
        block(
            "block_late",
            "Loan and Security Agreement title text with weak fit and generic context.",
            vec![late.clone()],
        ),
        block(
            "block_early",
            "AMENDED AND RESTATED LOAN AND SECURITY AGREEMENT",
            vec![early],
        ),
    ];
    let selected = segment("segment_1_2", &["block_late", "block_early"], &[], vec![late]);
    let field = field("document_title", "Document Title", FieldType::Text, "");

    let details = prioritize_citations(
        &selected,
        &blocks,
        CitationClaim {
            field: &field,
            value: "Amended and Restated Loan and Security Agreement",
            raw_text: "Amended and Restated Loan and Security Agreement",
        },
        "dv_demo",
    );

    assert_eq!(details.citations[0].page, Some(1));
}

#[test]
fn early_page_bias_breaks_near_ties_toward_earlier_pages() {
    let blocks = vec![
        block("block_a", "Supply Agreement", vec![citation("Supply Agreement", 9)]),
        block("block_b", "Supply Agreement", vec![citation("Supply Agreement", 2)]),
    ];
    let selected = segment("segment_0_1", &["block_a", "block_b"], &[], Vec::new());
    let title = field("document_title", "Title", FieldType::Text, "");
    let claim = CitationClaim {
        field: &title,
        value: "Supply Agreement",
        raw_text: "Supply Agreement",
    };

    let details = prioritize_citations(&selected, &blocks, claim, "dv_demo");
    assert_eq!(details.chosen_block_id.as_deref(), Some("block_b"));

    let plain = field("supply_terms", "Supply Terms", FieldType::Text, "");
    let details = prioritize_citations(
        &selected,
        &blocks,
        CitationClaim {
            field: &plain,
            ..claim
        },
        "dv_demo",
    );
    assert_eq!(details.chosen_block_id.as_deref(), Some("block_a"));
}

#[tokio::test]
async fn hybrid_extraction_passes_with_verified_value() {
    let extractor = ScriptedExtractor::new(Vec::new());
    let verifier = ScriptedVerifier::new(Vec::new());
    let orchestrator = orchestrator(&extractor, &verifier);

    let result = orchestrator
        .extract_field(
            &effective_date_field(),
            &contract_artifact(),
            ExtractionMode::Hybrid,
            QualityProfile::High,
        )
        .await;

    assert_eq!(result.extraction_method, ExtractionMethod::LlmHybrid);
    assert_eq!(result.verifier_status, VerifierStatus::Pass);
    assert_eq!(result.normalized_value, "2014-10-01");
    assert!(result.normalization_valid);
    assert_eq!(result.fallback_reason, None);
    assert!((0.05..=0.98).contains(&result.confidence_score));
    assert!(!result.retrieval_context.is_empty());
    assert!(!result.citations.is_empty());
    assert_eq!(extractor.calls(), 2, "primary plus self-consistency pass");
    assert_eq!(verifier.calls(), 1);
}

#[tokio::test]
async fn verifier_without_index_keeps_extractor_choice() {
    let artifact = contract_artifact();
    let field = effective_date_field();
    let extractor = ScriptedExtractor::new(vec![Ok(ExtractorOutput {
        value: String::new(),
        raw_text: String::new(),
        candidate_index: 1,
        ..extractor_output("")
    })]);
    let verifier = ScriptedVerifier::new(vec![Ok(VerifierOutput {
        best_candidate_index: None,
        ..verdict(VerifierStatus::Pass, "Supported by evidence.")
    })]);
    let orchestrator = orchestrator(&extractor, &verifier);

    let retrieved = orchestrator.retrieve(&field, &artifact, None, QualityProfile::Balanced.top_k());
    assert!(retrieved.evidence.len() >= 2);
    let chosen = normalize_space(retrieved.evidence[1].text());
    let first = normalize_space(retrieved.evidence[0].text());

    let result = orchestrator
        .extract_field(&field, &artifact, ExtractionMode::Hybrid, QualityProfile::Balanced)
        .await;

    assert_ne!(chosen, first);
    assert_eq!(result.raw_text, truncate_chars(&chosen, MAX_RAW_TEXT_CHARS));
}

#[tokio::test]
async fn verifier_failure_retries_with_expanded_evidence() {
    let extractor = ScriptedExtractor::new(Vec::new());
    let verifier = ScriptedVerifier::new(vec![
        Ok(verdict(VerifierStatus::Fail, "Value not in evidence.")),
        Ok(verdict(VerifierStatus::Pass, "Supported.")),
    ]);
    let orchestrator = orchestrator(&extractor, &verifier);

    let result = orchestrator
        .extract_field(
            &effective_date_field(),
            &contract_artifact(),
            ExtractionMode::Hybrid,
            QualityProfile::Balanced,
        )
        .await;

    assert_eq!(verifier.calls(), 2);
    assert_eq!(*extractor.evidence_lens.lock(), vec![6, 12]);
    assert_eq!(result.verifier_status, VerifierStatus::Pass);
    assert_eq!(result.fallback_reason, None);
    assert_eq!(result.retrieval_context.len(), 12);
}

#[tokio::test]
async fn persistent_verifier_failure_is_ambiguous() {
    let extractor = ScriptedExtractor::new(Vec::new());
    let verifier = ScriptedVerifier::new(vec![
        Ok(verdict(VerifierStatus::Fail, "Value not in evidence.")),
        Ok(verdict(VerifierStatus::Fail, "Still unsupported.")),
    ]);
    let orchestrator = orchestrator(&extractor, &verifier);

    let result = orchestrator
        .extract_field(
            &effective_date_field(),
            &contract_artifact(),
            ExtractionMode::LlmReasoning,
            QualityProfile::Fast,
        )
        .await;

    assert_eq!(result.fallback_reason, Some(FallbackReason::Ambiguous));
    assert_eq!(result.uncertainty_reason.as_deref(), Some("Still unsupported."));
    assert_eq!(result.verifier_status, VerifierStatus::Fail);
}

#[tokio::test]
async fn inconsistent_high_profile_answers_are_ambiguous() {
    let extractor = ScriptedExtractor::new(vec![
        Ok(extractor_output("October 1, 2014")),
        Ok(extractor_output("January 5, 2015")),
    ]);
    let verifier = ScriptedVerifier::new(vec![Ok(verdict(VerifierStatus::Partial, "Partly supported."))]);
    let orchestrator = orchestrator(&extractor, &verifier);

    let result = orchestrator
        .extract_field(
            &effective_date_field(),
            &contract_artifact(),
            ExtractionMode::Hybrid,
            QualityProfile::High,
        )
        .await;

    assert_eq!(result.fallback_reason, Some(FallbackReason::Ambiguous));
    assert_eq!(
        result.uncertainty_reason.as_deref(),
        Some("High-quality mode detected inconsistent LLM answers.")
    );
    assert_eq!(result.normalized_value, "2014-10-01");
}

#[tokio::test]
async fn rate_limited_calls_are_retried() {
    let extractor = ScriptedExtractor::new(vec![Err(CollaboratorError::classify(
        Some(429),
        "slow down",
    ))]);
    let verifier = ScriptedVerifier::new(Vec::new());
    let orchestrator = orchestrator(&extractor, &verifier);

    let result = orchestrator
        .extract_field(
            &effective_date_field(),
            &contract_artifact(),
            ExtractionMode::LlmReasoning,
            QualityProfile::Fast,
        )
        .await;

    assert_eq!(extractor.calls(), 2);
    assert_eq!(result.fallback_reason, None);
    assert_eq!(result.extraction_method, ExtractionMethod::LlmReasoning);
}

#[tokio::test]
async fn exhausted_rate_limit_surfaces_model_error_in_reasoning_mode() {
    let extractor = ScriptedExtractor::new(
        (0..3)
            .map(|_| {
                Err(CollaboratorError::classify(
                    None,
                    "RESOURCE_EXHAUSTED: quota exceeded",
                ))
            })
            .collect(),
    );
    let verifier = ScriptedVerifier::new(Vec::new());
    let orchestrator = orchestrator(&extractor, &verifier);

    let result = orchestrator
        .extract_field(
            &effective_date_field(),
            &contract_artifact(),
            ExtractionMode::LlmReasoning,
            QualityProfile::Fast,
        )
        .await;

    assert_eq!(extractor.calls(), 3);
    assert_eq!(verifier.calls(), 0);
    assert_eq!(result.fallback_reason, Some(FallbackReason::ModelError));
    assert_eq!(result.confidence_score, 0.05);
    assert!(!result.retrieval_context.is_empty());
    assert!(result.uncertainty_reason.is_some_and(|reason| reason.contains("quota")));
}

#[tokio::test]
async fn hybrid_collaborator_error_falls_back_to_deterministic() {
    let extractor = ScriptedExtractor::new(vec![Err(CollaboratorError::Failed(
        "upstream 500".to_string(),
    ))]);
    let verifier = ScriptedVerifier::new(Vec::new());
    let orchestrator = orchestrator(&extractor, &verifier);

    let result = orchestrator
        .extract_field(
            &effective_date_field(),
            &contract_artifact(),
            ExtractionMode::Hybrid,
            QualityProfile::High,
        )
        .await;

    assert_eq!(extractor.calls(), 1, "non rate-limit errors fail fast");
    assert_eq!(result.extraction_method, ExtractionMethod::Deterministic);
    assert_eq!(result.normalized_value, "2014-10-01");
    let reason = result.uncertainty_reason.expect("annotated fallback");
    assert!(reason.starts_with("Hybrid mode fell back to deterministic extraction."));
    assert!(reason.contains("upstream 500"));
}

#[tokio::test]
async fn missing_collaborators_follow_mode_rules() {
    let orchestrator = Orchestrator::new(fast_settings());
    let artifact = contract_artifact();
    let field = effective_date_field();

    let hybrid = orchestrator
        .extract_field(&field, &artifact, ExtractionMode::Hybrid, QualityProfile::High)
        .await;
    assert_eq!(hybrid.extraction_method, ExtractionMethod::Deterministic);
    assert_eq!(
        hybrid.uncertainty_reason.as_deref(),
        Some("Hybrid mode fell back to deterministic extraction.")
    );

    let reasoning = orchestrator
        .extract_field(&field, &artifact, ExtractionMode::LlmReasoning, QualityProfile::High)
        .await;
    assert_eq!(reasoning.fallback_reason, Some(FallbackReason::ModelError));
    assert_eq!(reasoning.verifier_status, VerifierStatus::Fail);
    assert_eq!(reasoning.confidence_score, 0.05);
}

#[tokio::test]
async fn empty_document_is_not_found() {
    let orchestrator = Orchestrator::new(fast_settings());
    let artifact = DocumentArtifact {
        doc_version_id: "dv_empty".to_string(),
        blocks: vec![block("b0", "   ", Vec::new())],
        markdown: String::new(),
        auxiliary: serde_json::Value::Null,
    };

    let result = orchestrator
        .extract_field(
            &effective_date_field(),
            &artifact,
            ExtractionMode::Hybrid,
            QualityProfile::Balanced,
        )
        .await;

    assert_eq!(result.fallback_reason, Some(FallbackReason::NotFound));
    assert_eq!(result.confidence_score, 0.1);
}

#[tokio::test]
async fn embedding_provider_vectors_feed_dense_ranking() {
    let orchestrator = Orchestrator::new(fast_settings()).with_embeddings(Arc::new(LocalEmbeddings));
    let artifact = contract_artifact();
    let field = effective_date_field();

    let dense = orchestrator
        .dense_vectors(&field, &artifact.blocks)
        .await
        .expect("provider vectors");
    assert_eq!(dense.query.len(), 64);
    assert_eq!(dense.blocks.len(), artifact.blocks.len());
    assert!(dense.blocks.iter().all(Option::is_some));

    let broken = Orchestrator::new(fast_settings()).with_embeddings(Arc::new(BrokenEmbeddings));
    assert!(broken.dense_vectors(&field, &artifact.blocks).await.is_none());
    let retrieved = broken.retrieve(&field, &artifact, None, 4);
    assert_eq!(retrieved.candidates.len(), 4);
}

proptest! {
    #[test]
    fn calibrated_confidence_stays_in_bounds(
        base in -2.0_f64..3.0,
        retrieval in -1.0_f64..2.0,
        status in prop::sample::select(vec![
            VerifierStatus::Pass,
            VerifierStatus::Partial,
            VerifierStatus::Fail,
            VerifierStatus::Skipped,
        ]),
        consistent in any::<bool>(),
    ) {
        let score = calibrate(ConfidenceSignals {
            base_confidence: base,
            retrieval_score: retrieval,
            verifier_status: status,
            self_consistent: consistent,
        });
        prop_assert!((0.05..=0.98).contains(&score));
    }
}
