use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::model::FieldExtraction;
use crate::retrieval::text::normalize_space;
use crate::util::round_places;

const MAX_MISMATCH_NOTES: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundTruthLabel {
    pub document_version_id: String,
    pub field_key: String,
    pub expected_value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_normalized_value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EvaluationMetrics {
    pub total_labels: usize,
    pub matched_labels: usize,
    pub field_level_accuracy: f64,
    pub coverage: f64,
    pub normalization_validity: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub qualitative_notes: Vec<String>,
}

fn same_value(left: &str, right: &str) -> bool {
    normalize_space(left).to_lowercase() == normalize_space(right).to_lowercase()
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

pub fn evaluate(labels: &[GroundTruthLabel], extractions: &[FieldExtraction]) -> EvaluationMetrics {
    evaluate_until(labels, extractions, |_| false).unwrap_or_default()
}

/// Scores labels against extractions, calling `should_stop` with the number
/// of labels scored so far before each label. Returns `None` when stopped early.
pub fn evaluate_until(
    labels: &[GroundTruthLabel],
    extractions: &[FieldExtraction],
    mut should_stop: impl FnMut(usize) -> bool,
) -> Option<EvaluationMetrics> {
    let by_key = extractions
        .iter()
        .map(|item| {
            (
                (item.document_version_id.as_str(), item.field_key.as_str()),
                item,
            )
        })
        .collect::<HashMap<_, _>>();

    let total = labels.len();
    let mut matched = 0;
    let mut covered = 0;
    let mut normalization_valid = 0;
    let mut notes = Vec::new();

    for (scored, label) in labels.iter().enumerate() {
        if should_stop(scored) {
            return None;
        }

        let extracted = by_key
            .get(&(label.document_version_id.as_str(), label.field_key.as_str()))
            .map(|item| &item.result);
        if extracted.is_some_and(|result| !normalize_space(&result.value).is_empty()) {
            covered += 1;
        }
        if extracted.is_some_and(|result| result.normalization_valid) {
            normalization_valid += 1;
        }

        let expected = label
            .expected_normalized_value
            .as_deref()
            .filter(|value| !value.is_empty())
            .unwrap_or(&label.expected_value);
        let got = extracted
            .map(|result| {
                if result.normalized_value.is_empty() {
                    result.value.as_str()
                } else {
                    result.normalized_value.as_str()
                }
            })
            .unwrap_or_default();

        if same_value(expected, got) {
            matched += 1;
        } else if notes.len() < MAX_MISMATCH_NOTES {
            notes.push(format!(
                "{} ({}): expected `{expected}` got `{got}`",
                label.field_key, label.document_version_id
            ));
        }
    }

    let precision = ratio(matched, covered);
    let recall = ratio(matched, total);
    let f1 = if precision > 0.0 && recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };

    Some(EvaluationMetrics {
        total_labels: total,
        matched_labels: matched,
        field_level_accuracy: round_places(ratio(matched, total), 4),
        coverage: round_places(ratio(covered, total), 4),
        normalization_validity: round_places(ratio(normalization_valid, covered), 4),
        precision: round_places(precision, 4),
        recall: round_places(recall, 4),
        f1: round_places(f1, 4),
        qualitative_notes: notes,
    })
}
