use crate::model::VerifierStatus;
use crate::retrieval::text::normalize_space;
use crate::util::round_places;

pub const MIN_CONFIDENCE: f64 = 0.05;
pub const MAX_CONFIDENCE: f64 = 0.98;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceSignals {
    pub base_confidence: f64,
    pub retrieval_score: f64,
    pub verifier_status: VerifierStatus,
    pub self_consistent: bool,
}

pub fn calibrate(signals: ConfidenceSignals) -> f64 {
    let mut score = 0.45 * signals.base_confidence + 0.35 * signals.retrieval_score;
    score += match signals.verifier_status {
        VerifierStatus::Pass => 0.15,
        VerifierStatus::Partial => 0.03,
        VerifierStatus::Fail | VerifierStatus::Skipped => -0.20,
    };
    if signals.self_consistent {
        score += 0.08;
    }
    round_places(score, 3).clamp(MIN_CONFIDENCE, MAX_CONFIDENCE)
}

pub fn self_consistent(left: &str, right: &str) -> bool {
    normalize_space(left).to_lowercase() == normalize_space(right).to_lowercase()
}
