use std::sync::LazyLock;

use regex::Regex;

use crate::model::{
    Block, BlockType, Citation, ExtractionMethod, ExtractionResult, FallbackReason, Field,
    FieldType, VerifierStatus,
};
use crate::retrieval::text::{normalize_space, truncate_chars};
use crate::util::round_places;

const MAX_KEYWORDS: usize = 24;
const MIN_KEYWORD_LEN: usize = 4;
const MAX_SENTENCE_CHARS: usize = 320;
pub const MAX_RAW_TEXT_CHARS: usize = 5_000;

const MONTHS: [&str; 12] = [
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];
const TRUE_MARKERS: [&str; 6] = ["yes", "true", "shall", "must", "agrees", "required"];
const FALSE_MARKERS: [&str; 5] = ["no", "false", "not", "none", "does not"];

static ISO_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})\b").expect("valid iso date regex")
});
static SLASH_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{1,2})/(\d{1,2})/(\d{2,4})\b").expect("valid slash date regex")
});
static NAMED_DATE: LazyLock<Regex> = LazyLock::new(|| {
    let pattern = format!(r"\b({})\s+(\d{{1,2}}),\s*(\d{{4}})\b", MONTHS.join("|"));
    Regex::new(&pattern).expect("valid month name date regex")
});
static NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[-+]?\d[\d,]*(?:\.\d+)?").expect("valid number regex")
});
static LIST_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\n;,]+").expect("valid list separator regex"));

pub fn parse_date(value: &str) -> Option<String> {
    let text = value.trim();
    if text.is_empty() {
        return None;
    }

    if let Some(captures) = ISO_DATE.captures(text) {
        return Some(format!("{}-{}-{}", &captures[1], &captures[2], &captures[3]));
    }

    if let Some(captures) = SLASH_DATE.captures(text) {
        let month = captures[1].parse::<u32>().ok()?;
        let day = captures[2].parse::<u32>().ok()?;
        let mut year = captures[3].parse::<u32>().ok()?;
        if year < 100 {
            year += 2000;
        }
        return Some(format!("{year:04}-{month:02}-{day:02}"));
    }

    let lowered = text.to_lowercase();
    let captures = NAMED_DATE.captures(&lowered)?;
    let month = MONTHS.iter().position(|month| *month == &captures[1])? + 1;
    let day = captures[2].parse::<u32>().ok()?;
    let year = captures[3].parse::<u32>().ok()?;
    Some(format!("{year:04}-{month:02}-{day:02}"))
}

pub fn normalize_value_by_type(field_type: FieldType, value: &str) -> (String, bool) {
    let text = normalize_space(value);
    if text.is_empty() {
        return (String::new(), false);
    }

    match field_type {
        FieldType::Date => match parse_date(&text) {
            Some(parsed) => (parsed, true),
            None => (String::new(), false),
        },
        FieldType::Number => match NUMBER.find(&text) {
            Some(found) => (found.as_str().replace(',', ""), true),
            None => (String::new(), false),
        },
        FieldType::Boolean => {
            let lowered = text.to_lowercase();
            if TRUE_MARKERS.iter().any(|marker| lowered.contains(marker)) {
                ("true".to_string(), true)
            } else if FALSE_MARKERS.iter().any(|marker| lowered.contains(marker)) {
                ("false".to_string(), true)
            } else {
                (String::new(), false)
            }
        }
        FieldType::List => {
            let items = LIST_SEPARATOR
                .split(&text)
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .collect::<Vec<&str>>();
            if items.is_empty() {
                (String::new(), false)
            } else {
                (items.join(", "), true)
            }
        }
        FieldType::Text => (text, true),
    }
}

pub fn extract_keywords(field: &Field) -> Vec<String> {
    let raw = format!("{} {}", field.name, field.prompt);
    let mut keywords = Vec::<String>::new();
    for token in raw
        .split(|character: char| !character.is_ascii_alphanumeric())
        .filter(|token| token.len() >= MIN_KEYWORD_LEN)
    {
        let token = token.to_ascii_lowercase();
        if !keywords.contains(&token) {
            keywords.push(token);
        }
    }
    keywords.truncate(MAX_KEYWORDS);
    keywords
}

pub fn pick_best_block<'a>(blocks: &'a [Block], field: &Field) -> Option<(&'a Block, f64)> {
    let keywords = extract_keywords(field);
    if keywords.is_empty() {
        return blocks
            .iter()
            .find(|block| !block.text.trim().is_empty())
            .map(|block| (block, 0.2));
    }

    let mut best: Option<(&Block, f64)> = None;
    for block in blocks {
        let text = block.text.to_lowercase();
        if text.trim().is_empty() {
            continue;
        }
        let mut score = keywords
            .iter()
            .filter(|keyword| text.contains(keyword.as_str()))
            .count() as f64;
        if block.block_type == BlockType::Table {
            score += 0.2;
        }
        if score > best.map_or(0.0, |(_, best_score)| best_score) {
            best = Some((block, score));
        }
    }
    best
}

pub fn first_sentence(text: &str) -> &str {
    let mut previous = None;
    for (index, character) in text.char_indices() {
        if character.is_whitespace() && matches!(previous, Some('.' | '!' | '?')) {
            return &text[..index];
        }
        previous = Some(character);
    }
    text
}

pub fn value_from_block(field_type: FieldType, block_text: &str) -> String {
    let text = normalize_space(block_text);
    if text.is_empty() {
        return String::new();
    }

    if field_type != FieldType::Text {
        let (normalized, valid) = normalize_value_by_type(field_type, &text);
        if valid {
            return normalized;
        }
    }

    truncate_chars(first_sentence(&text), MAX_SENTENCE_CHARS).to_string()
}

pub fn citation_location(citations: &[Citation]) -> String {
    match citations.first() {
        Some(Citation {
            page: Some(page), ..
        }) if *page > 0 => format!("page {page}"),
        Some(Citation {
            selector: Some(selector),
            ..
        }) if !selector.is_empty() => format!("selector {selector}"),
        _ => "document".to_string(),
    }
}

pub fn extract_deterministic(
    field: &Field,
    blocks: &[Block],
    doc_version_id: &str,
) -> ExtractionResult {
    let Some((block, score)) = pick_best_block(blocks, field) else {
        return ExtractionResult::empty(
            ExtractionMethod::Deterministic,
            FallbackReason::NotFound,
            0.1,
            VerifierStatus::Skipped,
            "No reliable evidence found for this field in the parsed document.",
            "No candidate block matched field keywords.",
        );
    };

    let raw_text = normalize_space(&block.text);
    let value = value_from_block(field.field_type, &raw_text);
    let (normalized_value, normalization_valid) =
        normalize_value_by_type(field.field_type, &value);
    let citations = block
        .citations
        .iter()
        .map(|citation| citation.with_doc_version(doc_version_id))
        .collect::<Vec<Citation>>();
    let confidence = (0.35 + score.min(4.0) * 0.12).clamp(0.2, 0.95);
    let location = citation_location(&citations);

    ExtractionResult {
        raw_text: truncate_chars(&raw_text, MAX_RAW_TEXT_CHARS).to_string(),
        value,
        normalized_value,
        normalization_valid,
        confidence_score: round_places(confidence, 3),
        citations,
        evidence_summary: format!(
            "Selected best matching block from {location} using field prompt keywords."
        ),
        fallback_reason: None,
        extraction_method: ExtractionMethod::Deterministic,
        model_name: None,
        retrieval_context: Vec::new(),
        verifier_status: VerifierStatus::Skipped,
        uncertainty_reason: None,
    }
}
