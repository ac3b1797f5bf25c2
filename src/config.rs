use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::runtime::breaker::BreakerMode;

pub const DEFAULT_RRF_K: u32 = 60;
pub const EXPANDED_TOP_K: usize = 12;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub rrf_k: u32,
    pub window_radius: usize,
    pub max_segments: usize,
    pub max_chars: usize,
    pub max_citations: usize,
    pub embedding_dim: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            rrf_k: DEFAULT_RRF_K,
            window_radius: 2,
            max_segments: 8,
            max_chars: 12_000,
            max_citations: 32,
            embedding_dim: crate::retrieval::dense::DEFAULT_EMBEDDING_DIM,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub rate_limit_retries: usize,
    pub base_delay_ms: u64,
    pub jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            rate_limit_retries: 2,
            base_delay_ms: 1_000,
            jitter_ms: 1_000,
        }
    }
}

impl RetryPolicy {
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16) as u32;
        let backoff = self.base_delay_ms.saturating_mul(1_u64 << exponent);
        Duration::from_millis(backoff.max(self.base_delay_ms))
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub retrieval: RetrievalConfig,
    pub retry: RetryPolicy,
    pub parse_max_concurrency: usize,
    pub worker_mode: BreakerMode,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            retrieval: RetrievalConfig::default(),
            retry: RetryPolicy::default(),
            parse_max_concurrency: 1,
            worker_mode: BreakerMode::Auto,
        }
    }
}

impl RuntimeSettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let retrieval = RetrievalConfig {
            rrf_k: env_usize("LEGAL_RRF_K", DEFAULT_RRF_K as usize, 1, Some(10_000)) as u32,
            ..defaults.retrieval
        };
        let retry = RetryPolicy {
            rate_limit_retries: env_usize(
                "LEGAL_RATE_LIMIT_RETRIES",
                defaults.retry.rate_limit_retries,
                0,
                Some(10),
            ),
            base_delay_ms: env_usize(
                "LEGAL_RATE_LIMIT_BASE_DELAY_MS",
                defaults.retry.base_delay_ms as usize,
                100,
                None,
            ) as u64,
            ..defaults.retry
        };

        Self {
            retrieval,
            retry,
            parse_max_concurrency: env_usize("LEGAL_PARSE_MAX_CONCURRENCY", 1, 1, None),
            worker_mode: BreakerMode::parse_lenient(
                std::env::var("LEGAL_PDF_DOCLING_MODE").ok().as_deref(),
            ),
        }
    }
}

pub fn env_usize(name: &str, default: usize, minimum: usize, maximum: Option<usize>) -> usize {
    let value = std::env::var(name)
        .ok()
        .and_then(|raw| raw.trim().parse::<usize>().ok())
        .unwrap_or(default)
        .max(minimum);
    match maximum {
        Some(maximum) => value.min(maximum),
        None => value,
    }
}
