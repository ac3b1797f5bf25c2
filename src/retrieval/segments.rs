use std::collections::HashMap;

use crate::config::RetrievalConfig;
use crate::model::{Block, Candidate, Citation, Segment, SegmentScores};

use super::text::{normalize_space, truncate_chars};

const SEED_WEIGHT: f64 = 0.7;
const OBSERVED_WEIGHT: f64 = 0.2;
const COVERAGE_WEIGHT: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentOptions {
    pub window_radius: usize,
    pub max_segments: usize,
    pub max_chars: usize,
    pub max_citations: usize,
}

impl Default for SegmentOptions {
    fn default() -> Self {
        Self::from(&RetrievalConfig::default())
    }
}

impl From<&RetrievalConfig> for SegmentOptions {
    fn from(config: &RetrievalConfig) -> Self {
        Self {
            window_radius: config.window_radius,
            max_segments: config.max_segments,
            max_chars: config.max_chars,
            max_citations: config.max_citations,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct ObservedScores {
    semantic: f64,
    lexical: f64,
    structure: f64,
    final_score: f64,
}

#[derive(Debug)]
struct SpanState {
    start: usize,
    end: usize,
    source_block_ids: Vec<String>,
    max_seed: ObservedScores,
}

pub fn block_key(block: &Block, index: usize) -> String {
    if block.id.trim().is_empty() {
        format!("idx_{index}")
    } else {
        block.id.clone()
    }
}

pub fn assemble_segments(
    blocks: &[Block],
    candidates: &[Candidate],
    doc_version_id: &str,
    options: SegmentOptions,
) -> Vec<Segment> {
    if blocks.is_empty() || candidates.is_empty() || options.max_segments == 0 {
        return Vec::new();
    }

    let radius = options.window_radius;
    let char_limit = options.max_chars.max(1);
    let citation_limit = options.max_citations.max(1);

    let index_by_block_id = blocks
        .iter()
        .enumerate()
        .map(|(index, block)| (block_key(block, index), index))
        .collect::<HashMap<String, usize>>();

    let mut scores_by_block_id = HashMap::<String, ObservedScores>::new();
    let mut spans = Vec::<SpanState>::new();
    let mut span_index = HashMap::<(usize, usize), usize>::new();

    for candidate in candidates {
        let Some(center) = index_by_block_id.get(&candidate.block_id).copied() else {
            continue;
        };

        let observed = ObservedScores {
            semantic: candidate.scores.semantic,
            lexical: candidate.scores.lexical,
            structure: candidate.scores.structure,
            final_score: candidate.scores.final_score,
        };
        let keep_new = scores_by_block_id
            .get(&candidate.block_id)
            .is_none_or(|previous| observed.final_score > previous.final_score);
        if keep_new {
            scores_by_block_id.insert(candidate.block_id.clone(), observed);
        }

        let start = center.saturating_sub(radius);
        let end = (center + radius).min(blocks.len() - 1);
        let slot = *span_index.entry((start, end)).or_insert_with(|| {
            spans.push(SpanState {
                start,
                end,
                source_block_ids: Vec::new(),
                max_seed: ObservedScores::default(),
            });
            spans.len() - 1
        });

        let span = &mut spans[slot];
        if !span.source_block_ids.contains(&candidate.block_id) {
            span.source_block_ids.push(candidate.block_id.clone());
        }
        if observed.final_score >= span.max_seed.final_score {
            span.max_seed = observed;
        }
    }

    let mut segments = Vec::<Segment>::new();
    for span in spans {
        let window = &blocks[span.start..=span.end];
        let mut segment_block_ids = Vec::<String>::with_capacity(window.len());
        let mut citations = Vec::<Citation>::new();
        let mut observed = Vec::<ObservedScores>::new();

        for (offset, block) in window.iter().enumerate() {
            let block_id = block_key(block, span.start + offset);
            citations.extend(
                block
                    .citations
                    .iter()
                    .map(|citation| citation.with_doc_version(doc_version_id)),
            );
            if let Some(scores) = scores_by_block_id.get(&block_id) {
                observed.push(*scores);
            }
            segment_block_ids.push(block_id);
        }

        let text = merge_segment_text(window, span.start, char_limit);
        if text.is_empty() {
            continue;
        }

        let mean = |pick: fn(&ObservedScores) -> f64, fallback: f64| {
            if observed.is_empty() {
                fallback
            } else {
                observed.iter().map(pick).sum::<f64>() / observed.len() as f64
            }
        };
        let observed_final = mean(|scores| scores.final_score, span.max_seed.final_score);
        let coverage = observed.len() as f64 / window.len().max(1) as f64;

        segments.push(Segment {
            block_id: format!("segment_{}_{}", span.start, span.end),
            text,
            citations: dedupe_citations(citations, citation_limit),
            scores: SegmentScores {
                semantic: mean(|scores| scores.semantic, span.max_seed.semantic),
                lexical: mean(|scores| scores.lexical, span.max_seed.lexical),
                structure: mean(|scores| scores.structure, span.max_seed.structure),
                coverage,
                final_score: SEED_WEIGHT * span.max_seed.final_score
                    + OBSERVED_WEIGHT * observed_final
                    + COVERAGE_WEIGHT * coverage,
            },
            segment_block_ids,
            source_block_ids: span.source_block_ids,
            start_index: span.start,
            end_index: span.end,
        });
    }

    segments.sort_by(|left, right| right.scores.final_score.total_cmp(&left.scores.final_score));
    segments.truncate(options.max_segments);
    segments
}

pub fn dedupe_citations(citations: Vec<Citation>, max_items: usize) -> Vec<Citation> {
    let limit = max_items.max(1);
    let mut output = Vec::<Citation>::new();
    for citation in citations {
        if output.contains(&citation) {
            continue;
        }
        output.push(citation);
        if output.len() >= limit {
            break;
        }
    }
    output
}

fn merge_segment_text(window: &[Block], start_index: usize, max_chars: usize) -> String {
    let parts = window
        .iter()
        .enumerate()
        .filter_map(|(offset, block)| {
            let text = normalize_space(&block.text);
            if text.is_empty() {
                return None;
            }
            let block_id = block_key(block, start_index + offset);
            Some(format!("[{}:{}] {}", block_id, block.block_type.as_str(), text))
        })
        .collect::<Vec<String>>();

    let merged = parts.join("\n\n");
    let merged = merged.trim();
    truncate_chars(merged, max_chars).trim_end().to_string()
}
