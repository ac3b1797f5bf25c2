use std::cmp::Ordering;

use tracing::info;

use crate::model::{Block, BlockType, Candidate, CandidateScores, Citation, Field};

use super::dense::{cosine_similarity, embed_text_local};
use super::expand::expand_field_query;
use super::lexical::{bm25_like_scores, normalize_by_max};
use super::text::{normalize_space, tokenize, truncate_chars};

pub const TABLE_STRUCTURE_BONUS: f64 = 0.1;
const MAX_BLOCK_TEXT_CHARS: usize = 8_000;

#[derive(Debug, Clone, Copy)]
pub struct DenseInput<'a> {
    pub query: &'a [f32],
    pub blocks: &'a [Option<Vec<f32>>],
}

#[derive(Debug, Clone, Copy)]
pub struct RetrievalRequest<'a> {
    pub blocks: &'a [Block],
    pub field: &'a Field,
    pub doc_version_id: &'a str,
    pub dense: Option<DenseInput<'a>>,
    pub rrf_k: u32,
    pub top_k: usize,
    pub embedding_dim: usize,
}

#[derive(Debug, Clone)]
struct BlockRow {
    block_id: String,
    block_type: BlockType,
    text: String,
    citations: Vec<Citation>,
    semantic: f64,
    lexical_raw: f64,
    lexical: f64,
    structure: f64,
}

impl BlockRow {
    fn is_table(&self) -> bool {
        self.block_type == BlockType::Table
    }
}

pub fn rrf_contribution(rank: usize, k: u32) -> f64 {
    if rank == 0 {
        return 0.0;
    }
    1.0 / (f64::from(k) + rank as f64)
}

/// Sums reciprocal-rank contributions per row. A rank of 0 means "not ranked".
pub fn fuse_rrf(rankings: &[Vec<usize>], row_count: usize, k: u32) -> Vec<f64> {
    let rrf_k = k.max(1);
    (0..row_count)
        .map(|row| {
            rankings
                .iter()
                .filter_map(|ranking| ranking.get(row).copied())
                .map(|rank| rrf_contribution(rank, rrf_k))
                .sum::<f64>()
        })
        .collect::<Vec<f64>>()
}

pub fn retrieve_candidates(request: RetrievalRequest<'_>) -> Vec<Candidate> {
    let query = expand_field_query(request.field);
    let query_tokens = tokenize(&query);
    let mut hash_query_embedding: Option<Vec<f32>> = None;

    let mut rows = Vec::<BlockRow>::new();
    let mut lexical_documents = Vec::<Vec<String>>::new();

    for (index, block) in request.blocks.iter().enumerate() {
        let text = normalize_space(&block.text);
        if text.is_empty() {
            continue;
        }

        let block_id = if block.id.trim().is_empty() {
            format!("idx_{index}")
        } else {
            block.id.clone()
        };

        let provided = request.dense.and_then(|dense| {
            dense
                .blocks
                .get(index)
                .and_then(Option::as_ref)
                .filter(|vector| !vector.is_empty() && !dense.query.is_empty())
                .map(|vector| (dense.query, vector.as_slice()))
        });
        let semantic = match provided {
            Some((query_vector, block_vector)) => cosine_similarity(query_vector, block_vector),
            None => {
                let query_vector = hash_query_embedding
                    .get_or_insert_with(|| embed_text_local(&query, request.embedding_dim));
                cosine_similarity(
                    query_vector,
                    &embed_text_local(&text, request.embedding_dim),
                )
            }
        };

        let citations = block
            .citations
            .iter()
            .map(|citation| citation.with_doc_version(request.doc_version_id))
            .collect::<Vec<Citation>>();

        lexical_documents.push(tokenize(&text));
        rows.push(BlockRow {
            block_id,
            block_type: block.block_type,
            text: truncate_chars(&text, MAX_BLOCK_TEXT_CHARS).to_string(),
            citations,
            semantic,
            lexical_raw: 0.0,
            lexical: 0.0,
            structure: if block.block_type == BlockType::Table {
                TABLE_STRUCTURE_BONUS
            } else {
                0.0
            },
        });
    }

    if rows.is_empty() {
        return Vec::new();
    }

    let lexical_raw_scores = bm25_like_scores(&query_tokens, &lexical_documents);
    let lexical_scores = normalize_by_max(&lexical_raw_scores);
    for (row, (raw, normalized)) in rows
        .iter_mut()
        .zip(lexical_raw_scores.iter().zip(lexical_scores.iter()))
    {
        row.lexical_raw = *raw;
        row.lexical = *normalized;
    }

    let dense_ranks = rank_rows(&rows, |left, right| {
        right
            .semantic
            .total_cmp(&left.semantic)
            .then(right.lexical_raw.total_cmp(&left.lexical_raw))
    });
    let lexical_ranks = rank_rows(&rows, |left, right| {
        right
            .lexical_raw
            .total_cmp(&left.lexical_raw)
            .then(right.semantic.total_cmp(&left.semantic))
    });
    let structure_ranks = rank_rows(&rows, |left, right| {
        right
            .is_table()
            .cmp(&left.is_table())
            .then(right.lexical_raw.total_cmp(&left.lexical_raw))
            .then(right.semantic.total_cmp(&left.semantic))
    });

    let rrf_k = request.rrf_k.max(1);
    let rankings = vec![dense_ranks, lexical_ranks, structure_ranks];
    let rrf_raw = fuse_rrf(&rankings, rows.len(), rrf_k);
    let max_rrf_raw = rrf_raw.iter().copied().fold(0.0_f64, f64::max);

    let mut candidates = rows
        .into_iter()
        .enumerate()
        .map(|(index, row)| {
            let raw = rrf_raw[index];
            Candidate {
                block_id: row.block_id,
                block_type: row.block_type,
                text: row.text,
                citations: row.citations,
                scores: CandidateScores {
                    semantic: row.semantic,
                    lexical: row.lexical,
                    structure: row.structure,
                    final_score: if max_rrf_raw > 0.0 {
                        raw / max_rrf_raw
                    } else {
                        0.0
                    },
                    lexical_raw: row.lexical_raw,
                    rrf_raw: raw,
                    rrf_k,
                    rank_dense: rankings[0][index],
                    rank_lexical: rankings[1][index],
                    rank_structure: rankings[2][index],
                },
            }
        })
        .collect::<Vec<Candidate>>();

    sort_candidates(&mut candidates);

    if let Some(top) = candidates.first() {
        info!(
            scoring_mode = "rrf",
            rrf_k,
            field_key = %request.field.key,
            doc_version_id = %request.doc_version_id,
            candidate_count = candidates.len(),
            requested_top_k = request.top_k.max(1),
            top_block_id = %top.block_id,
            top_final = top.scores.final_score,
            top_rrf_raw = top.scores.rrf_raw,
            top_rank_dense = top.scores.rank_dense,
            top_rank_lexical = top.scores.rank_lexical,
            top_rank_structure = top.scores.rank_structure,
            "retrieve_candidates_ranked"
        );
    }

    candidates.truncate(request.top_k.max(1));
    candidates
}

pub fn sort_candidates(candidates: &mut [Candidate]) {
    candidates.sort_by(|left, right| {
        right
            .scores
            .final_score
            .total_cmp(&left.scores.final_score)
            .then(right.scores.rrf_raw.total_cmp(&left.scores.rrf_raw))
            .then(left.scores.rank_dense.cmp(&right.scores.rank_dense))
            .then(left.block_id.cmp(&right.block_id))
    });
}

fn rank_rows<F>(rows: &[BlockRow], compare: F) -> Vec<usize>
where
    F: Fn(&BlockRow, &BlockRow) -> Ordering,
{
    let mut order = (0..rows.len()).collect::<Vec<usize>>();
    order.sort_by(|left, right| {
        compare(&rows[*left], &rows[*right])
            .then(rows[*left].block_id.cmp(&rows[*right].block_id))
    });

    let mut ranks = vec![0_usize; rows.len()];
    for (position, row_index) in order.into_iter().enumerate() {
        ranks[row_index] = position + 1;
    }
    ranks
}
