use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::model::{Block, Citation, Evidence, Field, FieldType, Segment};
use crate::retrieval::segments::{block_key, dedupe_citations};
use crate::retrieval::text::token_set;

use super::deterministic::{normalize_value_by_type, parse_date};

pub const RESCUE_THRESHOLD: f64 = 0.5;
const SEED_BOOST: f64 = 1.15;
const PATTERN_BONUS: f64 = 0.5;
const EARLY_PAGE_EPSILON: f64 = 0.05;
const MAX_PRIORITIZED_CITATIONS: usize = 64;

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "in", "is", "it", "of", "on",
    "or", "that", "the", "this", "to", "with",
];
const HEADER_MARKERS: &[&str] = &["title", "parties", "party", "entities", "name"];

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorMode {
    Segment,
    GlobalRescue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrioritizedCitations {
    pub citations: Vec<Citation>,
    pub chosen_block_id: Option<String>,
    pub chosen_score: f64,
    pub anchor_mode: AnchorMode,
    pub segment_best_score: f64,
    pub global_best_score: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct CitationClaim<'a> {
    pub field: &'a Field,
    pub value: &'a str,
    pub raw_text: &'a str,
}

#[derive(Debug, Clone, Copy)]
struct Scored<'a> {
    block_id: &'a str,
    block: &'a Block,
    score: f64,
}

struct ClaimProfile {
    tokens: BTreeSet<String>,
    date: Option<String>,
    number: Option<String>,
    header_like: bool,
}

impl ClaimProfile {
    fn new(claim: CitationClaim<'_>) -> Self {
        let field = claim.field;
        let tokens = token_set(&format!("{} {}", claim.value, claim.raw_text))
            .into_iter()
            .filter(|token| !STOPWORDS.contains(&token.as_str()))
            .collect::<BTreeSet<String>>();

        let key_and_name = format!("{} {}", field.key, field.name).to_lowercase();
        let date = if field.field_type == FieldType::Date || key_and_name.contains("date") {
            parse_date(claim.value).or_else(|| parse_date(claim.raw_text))
        } else {
            None
        };
        let number = if field.field_type == FieldType::Number {
            let (normalized, valid) = normalize_value_by_type(FieldType::Number, claim.value);
            valid.then_some(normalized)
        } else {
            None
        };

        Self {
            tokens,
            date,
            number,
            header_like: HEADER_MARKERS
                .iter()
                .any(|marker| key_and_name.contains(marker)),
        }
    }

    fn score(&self, block: &Block, seed: bool) -> f64 {
        let mut score = 0.0;
        if !self.tokens.is_empty() {
            let block_tokens = token_set(&block.text);
            let hits = self
                .tokens
                .iter()
                .filter(|token| block_tokens.contains(*token))
                .count();
            score = hits as f64 / self.tokens.len() as f64;
            if seed {
                score *= SEED_BOOST;
            }
        }

        let date_hit = self
            .date
            .as_ref()
            .is_some_and(|date| parse_date(&block.text).as_ref() == Some(date));
        let number_hit = self.number.as_ref().is_some_and(|number| {
            normalize_value_by_type(FieldType::Number, &block.text).0 == *number
                || block.text.replace(',', "").contains(number.as_str())
        });
        if date_hit || number_hit {
            score += PATTERN_BONUS;
        }
        score
    }
}

pub fn prioritize_citations(
    selected: &Evidence,
    blocks: &[Block],
    claim: CitationClaim<'_>,
    doc_version_id: &str,
) -> PrioritizedCitations {
    let segment = match selected {
        Evidence::Segment(segment) if segment.segment_block_ids.len() > 1 => segment,
        _ => return PrioritizedCitations {
            citations: selected.citations().to_vec(),
            chosen_block_id: None,
            chosen_score: 0.0,
            anchor_mode: AnchorMode::Segment,
            segment_best_score: 0.0,
            global_best_score: 0.0,
        },
    };

    let profile = ClaimProfile::new(claim);
    let keyed = blocks
        .iter()
        .enumerate()
        .map(|(index, block)| (block_key(block, index), block))
        .collect::<Vec<(String, &Block)>>();
    let by_id = keyed
        .iter()
        .map(|(block_id, block)| (block_id.as_str(), *block))
        .collect::<HashMap<&str, &Block>>();

    let segment_scores = score_segment_members(segment, &by_id, &profile);
    let segment_best = pick_best(&segment_scores, profile.header_like);
    let segment_best_score = segment_best.map_or(0.0, |scored| scored.score);

    let mut chosen = segment_best;
    let mut anchor_mode = AnchorMode::Segment;
    let mut global_best_score = 0.0;

    if segment_best_score < RESCUE_THRESHOLD {
        let global_scores = keyed
            .iter()
            .map(|(block_id, block)| Scored {
                block_id: block_id.as_str(),
                block: *block,
                score: profile.score(block, false),
            })
            .collect::<Vec<Scored<'_>>>();
        let global_best = pick_best(&global_scores, profile.header_like);
        global_best_score = global_best.map_or(0.0, |scored| scored.score);
        if global_best_score > segment_best_score {
            chosen = global_best;
            anchor_mode = AnchorMode::GlobalRescue;
        }
    }

    let Some(chosen) = chosen.filter(|scored| scored.score > 0.0) else {
        return PrioritizedCitations {
            citations: segment.citations.clone(),
            chosen_block_id: None,
            chosen_score: 0.0,
            anchor_mode: AnchorMode::Segment,
            segment_best_score,
            global_best_score,
        };
    };

    let ordered = chosen
        .block
        .citations
        .iter()
        .map(|citation| citation.with_doc_version(doc_version_id))
        .chain(segment.citations.iter().cloned())
        .collect::<Vec<Citation>>();

    PrioritizedCitations {
        citations: dedupe_citations(ordered, MAX_PRIORITIZED_CITATIONS),
        chosen_block_id: Some(chosen.block_id.to_string()),
        chosen_score: chosen.score,
        anchor_mode,
        segment_best_score,
        global_best_score,
    }
}

fn score_segment_members<'a>(
    segment: &'a Segment,
    by_id: &HashMap<&str, &'a Block>,
    profile: &ClaimProfile,
) -> Vec<Scored<'a>> {
    segment
        .segment_block_ids
        .iter()
        .filter_map(|block_id| {
            let block = *by_id.get(block_id.as_str())?;
            let seed = segment.source_block_ids.contains(block_id);
            Some(Scored {
                block_id: block_id.as_str(),
                block,
                score: profile.score(block, seed),
            })
        })
        .collect()
}

fn pick_best<'a>(scored: &[Scored<'a>], header_like: bool) -> Option<Scored<'a>> {
    let mut best: Option<Scored<'a>> = None;
    for candidate in scored {
        if best.is_none_or(|current| candidate.score > current.score) {
            best = Some(*candidate);
        }
    }
    let best = best?;
    if !header_like || best.score <= 0.0 {
        return Some(best);
    }

    let earliest = scored
        .iter()
        .filter(|candidate| best.score - candidate.score <= EARLY_PAGE_EPSILON)
        .filter_map(|candidate| candidate.block.first_page().map(|page| (page, *candidate)))
        .min_by_key(|(page, _)| *page)
        .map(|(_, candidate)| candidate);

    match (earliest, best.block.first_page()) {
        (Some(candidate), Some(best_page)) if candidate.block.first_page() < Some(best_page) => {
            Some(candidate)
        }
        (Some(candidate), None) => Some(candidate),
        _ => Some(best),
    }
}
