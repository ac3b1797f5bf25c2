use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::error::ParserError;
use crate::model::{Block, BlockType, Citation, DocumentArtifact};
use crate::retrieval::text::truncate_chars;
use crate::runtime::breaker::{CircuitBreaker, EffectiveMode};
use crate::runtime::pdf_lock::PdfResourceLock;
use crate::util::doc_version_id;

const SNIPPET_CHARS: usize = 240;
const WORKER_DISABLED: &str = "structure_worker_disabled";
const WORKER_NOT_CONFIGURED: &str = "structure_worker_not_configured";
pub const NO_PAGE_CITATIONS: &str = "docling_returned_blocks_without_page_citations";

static PARAGRAPH_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\s*\n+").expect("valid paragraph regex"));

#[derive(Debug, Clone, Default)]
pub struct ParserOutput {
    pub blocks: Vec<Block>,
    pub markdown: String,
    pub structure: Value,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParserKind {
    Worker,
    Fallback,
}

#[derive(Debug, Clone)]
pub struct ParsedDocument {
    pub artifact: DocumentArtifact,
    pub parser: ParserKind,
    pub worker_error: Option<String>,
    pub effective_mode: EffectiveMode,
    pub disable_reason: Option<String>,
}

pub trait StructureWorker: Send + Sync {
    fn run(&self, bytes: &[u8]) -> Result<ParserOutput, String>;
}

pub trait FallbackExtractor: Send + Sync {
    fn extract(&self, bytes: &[u8]) -> Result<ParserOutput, ParserError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextExtractor;

impl FallbackExtractor for PlainTextExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<ParserOutput, ParserError> {
        let text = String::from_utf8_lossy(bytes).replace("\r\n", "\n");
        let mut blocks = Vec::new();
        let mut offset = 0;

        for raw in PARAGRAPH_BREAK.split(&text) {
            let paragraph = raw.trim();
            if paragraph.is_empty() {
                continue;
            }
            let start = text[offset..]
                .find(paragraph)
                .map_or(offset, |found| offset + found);
            let end = start + paragraph.len();
            offset = end;

            blocks.push(Block {
                id: format!("block_{}", blocks.len() + 1),
                block_type: BlockType::Paragraph,
                text: paragraph.to_string(),
                citations: vec![Citation {
                    source: "txt".to_string(),
                    snippet: truncate_chars(paragraph, SNIPPET_CHARS).to_string(),
                    page: None,
                    bbox: None,
                    selector: None,
                    start_char: Some(text[..start].chars().count()),
                    end_char: Some(text[..end].chars().count()),
                    doc_version_id: None,
                }],
            });
        }

        if blocks.is_empty() {
            return Err(ParserError::Empty("document contains no text".to_string()));
        }

        Ok(ParserOutput {
            blocks,
            markdown: text,
            structure: json!({ "schema_name": "plain_text" }),
        })
    }
}

pub struct DocumentParser {
    worker: Option<Arc<dyn StructureWorker>>,
    fallback: Arc<dyn FallbackExtractor>,
    breaker: Arc<CircuitBreaker>,
    pdf_lock: Arc<PdfResourceLock>,
}

impl std::fmt::Debug for DocumentParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentParser")
            .field("worker", &self.worker.is_some())
            .field("breaker", &self.breaker)
            .finish_non_exhaustive()
    }
}

impl DocumentParser {
    pub fn new(
        fallback: Arc<dyn FallbackExtractor>,
        breaker: Arc<CircuitBreaker>,
        pdf_lock: Arc<PdfResourceLock>,
    ) -> Self {
        Self {
            worker: None,
            fallback,
            breaker,
            pdf_lock,
        }
    }

    pub fn with_worker(mut self, worker: Arc<dyn StructureWorker>) -> Self {
        self.worker = Some(worker);
        self
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn parse(&self, bytes: &[u8]) -> Result<ParsedDocument, ParserError> {
        let mut state = self.breaker.snapshot();
        let mut worker_error = None;
        let mut worker_output = None;

        match &self.worker {
            Some(worker) if state.worker_enabled => match worker.run(bytes) {
                Ok(output) => worker_output = Some(output),
                Err(message) => {
                    warn!(error = %message, "structure_worker_failed");
                    self.breaker.record_worker_error(&message);
                    state = self.breaker.snapshot();
                    worker_error = Some(message);
                }
            },
            Some(_) => {
                worker_error = Some(
                    state
                        .disable_reason
                        .clone()
                        .unwrap_or_else(|| WORKER_DISABLED.to_string()),
                );
            }
            None => worker_error = Some(WORKER_NOT_CONFIGURED.to_string()),
        }

        let (output, parser) = match worker_output {
            Some(output) if !output.blocks.is_empty() => {
                let has_pages = output
                    .blocks
                    .iter()
                    .flat_map(|block| block.citations.iter())
                    .any(|citation| citation.page.is_some());
                if has_pages {
                    (output, ParserKind::Worker)
                } else {
                    worker_error = Some(NO_PAGE_CITATIONS.to_string());
                    (self.run_fallback(bytes)?, ParserKind::Fallback)
                }
            }
            _ => (self.run_fallback(bytes)?, ParserKind::Fallback),
        };

        let artifact = DocumentArtifact {
            doc_version_id: doc_version_id(bytes),
            blocks: output.blocks,
            markdown: output.markdown,
            auxiliary: output.structure,
        };
        info!(
            doc_version_id = %artifact.doc_version_id,
            blocks = artifact.blocks.len(),
            parser = ?parser,
            "document_parsed"
        );

        Ok(ParsedDocument {
            artifact,
            parser,
            worker_error,
            effective_mode: state.effective_mode,
            disable_reason: state.disable_reason,
        })
    }

    fn run_fallback(&self, bytes: &[u8]) -> Result<ParserOutput, ParserError> {
        self.pdf_lock.with_lock(|| self.fallback.extract(bytes))
    }
}

pub async fn parse_blocking(
    parser: Arc<DocumentParser>,
    bytes: Vec<u8>,
) -> Result<ParsedDocument, ParserError> {
    tokio::task::spawn_blocking(move || parser.parse(&bytes))
        .await
        .map_err(|err| ParserError::Join(err.to_string()))?
}
