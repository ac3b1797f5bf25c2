use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BlockType {
    #[default]
    Paragraph,
    Table,
    Segment,
}

impl BlockType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Paragraph => "paragraph",
            Self::Table => "table",
            Self::Segment => "segment",
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl BBox {
    pub fn normalized(self) -> Self {
        Self {
            x0: self.x0.min(self.x1),
            y0: self.y0.min(self.y1),
            x1: self.x0.max(self.x1),
            y1: self.y0.max(self.y1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub source: String,
    #[serde(default)]
    pub snippet: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BBox>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_char: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_char: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_version_id: Option<String>,
}

impl Citation {
    pub fn with_doc_version(&self, doc_version_id: &str) -> Self {
        let mut tagged = self.clone();
        tagged.doc_version_id = Some(doc_version_id.to_string());
        tagged.bbox = tagged.bbox.map(BBox::normalized);
        tagged
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: String,
    #[serde(rename = "type", default)]
    pub block_type: BlockType,
    pub text: String,
    #[serde(default)]
    pub citations: Vec<Citation>,
}

impl Block {
    pub fn first_page(&self) -> Option<u32> {
        self.citations.iter().filter_map(|citation| citation.page).min()
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    #[default]
    Text,
    Date,
    Number,
    Boolean,
    List,
}

impl FieldType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Date => "date",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::List => "list",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub key: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub field_type: FieldType,
    #[serde(default)]
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentArtifact {
    pub doc_version_id: String,
    pub blocks: Vec<Block>,
    #[serde(default)]
    pub markdown: String,
    #[serde(default)]
    pub auxiliary: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct CandidateScores {
    pub semantic: f64,
    pub lexical: f64,
    pub structure: f64,
    #[serde(rename = "final")]
    pub final_score: f64,
    pub lexical_raw: f64,
    pub rrf_raw: f64,
    pub rrf_k: u32,
    pub rank_dense: usize,
    pub rank_lexical: usize,
    pub rank_structure: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub block_id: String,
    pub block_type: BlockType,
    pub text: String,
    pub citations: Vec<Citation>,
    pub scores: CandidateScores,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct SegmentScores {
    pub semantic: f64,
    pub lexical: f64,
    pub structure: f64,
    pub coverage: f64,
    #[serde(rename = "final")]
    pub final_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub block_id: String,
    pub text: String,
    pub citations: Vec<Citation>,
    pub scores: SegmentScores,
    pub segment_block_ids: Vec<String>,
    pub source_block_ids: Vec<String>,
    pub start_index: usize,
    pub end_index: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Evidence {
    Block(Candidate),
    Segment(Segment),
}

impl Evidence {
    pub fn block_id(&self) -> &str {
        match self {
            Self::Block(candidate) => &candidate.block_id,
            Self::Segment(segment) => &segment.block_id,
        }
    }

    pub fn block_type(&self) -> BlockType {
        match self {
            Self::Block(candidate) => candidate.block_type,
            Self::Segment(_) => BlockType::Segment,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Self::Block(candidate) => &candidate.text,
            Self::Segment(segment) => &segment.text,
        }
    }

    pub fn citations(&self) -> &[Citation] {
        match self {
            Self::Block(candidate) => &candidate.citations,
            Self::Segment(segment) => &segment.citations,
        }
    }

    pub fn final_score(&self) -> f64 {
        match self {
            Self::Block(candidate) => candidate.scores.final_score,
            Self::Segment(segment) => segment.scores.final_score,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerifierStatus {
    Pass,
    Partial,
    Fail,
    Skipped,
}

impl VerifierStatus {
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PASS" => Self::Pass,
            "FAIL" => Self::Fail,
            _ => Self::Partial,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Partial => "PARTIAL",
            Self::Fail => "FAIL",
            Self::Skipped => "SKIPPED",
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FallbackReason {
    NotFound,
    Ambiguous,
    ModelError,
    ParserError,
}

impl FallbackReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::Ambiguous => "AMBIGUOUS",
            Self::ModelError => "MODEL_ERROR",
            Self::ParserError => "PARSER_ERROR",
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    Deterministic,
    LlmHybrid,
    LlmReasoning,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMode {
    Deterministic,
    #[default]
    Hybrid,
    LlmReasoning,
}

impl ExtractionMode {
    pub fn method(self) -> ExtractionMethod {
        match self {
            Self::Deterministic => ExtractionMethod::Deterministic,
            Self::Hybrid => ExtractionMethod::LlmHybrid,
            Self::LlmReasoning => ExtractionMethod::LlmReasoning,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QualityProfile {
    #[default]
    High,
    Balanced,
    Fast,
}

impl QualityProfile {
    pub fn top_k(self) -> usize {
        match self {
            Self::High => 8,
            Self::Balanced => 6,
            Self::Fast => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Balanced => "balanced",
            Self::Fast => "fast",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalContextEntry {
    pub block_id: String,
    pub block_type: BlockType,
    pub final_score: f64,
    pub text_preview: String,
    pub citations: Vec<Citation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub value: String,
    pub raw_text: String,
    pub normalized_value: String,
    pub normalization_valid: bool,
    pub confidence_score: f64,
    pub citations: Vec<Citation>,
    pub evidence_summary: String,
    pub fallback_reason: Option<FallbackReason>,
    pub extraction_method: ExtractionMethod,
    pub model_name: Option<String>,
    pub retrieval_context: Vec<RetrievalContextEntry>,
    pub verifier_status: VerifierStatus,
    pub uncertainty_reason: Option<String>,
}

impl ExtractionResult {
    pub(crate) fn empty(
        method: ExtractionMethod,
        fallback_reason: FallbackReason,
        confidence_score: f64,
        verifier_status: VerifierStatus,
        evidence_summary: &str,
        uncertainty_reason: &str,
    ) -> Self {
        Self {
            value: String::new(),
            raw_text: String::new(),
            normalized_value: String::new(),
            normalization_valid: false,
            confidence_score,
            citations: Vec::new(),
            evidence_summary: evidence_summary.to_string(),
            fallback_reason: Some(fallback_reason),
            extraction_method: method,
            model_name: None,
            retrieval_context: Vec::new(),
            verifier_status,
            uncertainty_reason: Some(uncertainty_reason.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldExtraction {
    pub document_version_id: String,
    pub field_key: String,
    pub result: ExtractionResult,
}
