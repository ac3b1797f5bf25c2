use std::collections::HashMap;

pub const BM25_K1: f64 = 1.2;
pub const BM25_B: f64 = 0.75;

pub fn bm25_like_scores(query_tokens: &[String], documents_tokens: &[Vec<String>]) -> Vec<f64> {
    bm25_like_scores_with(query_tokens, documents_tokens, BM25_K1, BM25_B)
}

pub fn bm25_like_scores_with(
    query_tokens: &[String],
    documents_tokens: &[Vec<String>],
    k1: f64,
    b: f64,
) -> Vec<f64> {
    if documents_tokens.is_empty() {
        return Vec::new();
    }

    let mut query_term_counts = HashMap::<&str, usize>::new();
    for token in query_tokens.iter().filter(|token| !token.is_empty()) {
        *query_term_counts.entry(token.as_str()).or_insert(0) += 1;
    }
    if query_term_counts.is_empty() {
        return vec![0.0; documents_tokens.len()];
    }

    let doc_term_counts = documents_tokens
        .iter()
        .map(|tokens| {
            let mut counts = HashMap::<&str, usize>::new();
            for token in tokens {
                *counts.entry(token.as_str()).or_insert(0) += 1;
            }
            counts
        })
        .collect::<Vec<HashMap<&str, usize>>>();

    let total_docs = documents_tokens.len() as f64;
    let total_length = documents_tokens.iter().map(Vec::len).sum::<usize>() as f64;
    let avg_doc_length = (total_length / total_docs).max(1.0);

    let doc_freq_by_term = query_term_counts
        .keys()
        .map(|term| {
            let df = doc_term_counts
                .iter()
                .filter(|counts| counts.contains_key(term))
                .count();
            (*term, df as f64)
        })
        .collect::<HashMap<&str, f64>>();

    doc_term_counts
        .iter()
        .zip(documents_tokens.iter())
        .map(|(counts, tokens)| {
            let doc_length = tokens.len() as f64;
            let mut score = 0.0;
            for (term, query_tf) in &query_term_counts {
                let term_tf = counts.get(term).copied().unwrap_or(0) as f64;
                if term_tf <= 0.0 {
                    continue;
                }
                let df = doc_freq_by_term.get(term).copied().unwrap_or(0.0);
                let idf = (1.0 + (total_docs - df + 0.5) / (df + 0.5)).ln();
                let denominator = term_tf + k1 * (1.0 - b + b * (doc_length / avg_doc_length));
                if denominator <= 0.0 {
                    continue;
                }
                score += *query_tf as f64 * idf * ((term_tf * (k1 + 1.0)) / denominator);
            }
            score
        })
        .collect::<Vec<f64>>()
}

pub fn normalize_by_max(raw_scores: &[f64]) -> Vec<f64> {
    let max_raw = raw_scores.iter().copied().fold(0.0_f64, f64::max);
    raw_scores
        .iter()
        .map(|value| if max_raw > 0.0 { value / max_raw } else { 0.0 })
        .collect::<Vec<f64>>()
}
