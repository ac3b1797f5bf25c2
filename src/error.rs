use thiserror::Error;

const RATE_LIMIT_MARKERS: &[&str] = &[
    "429",
    "resource_exhausted",
    "quota",
    "rate limit",
    "too many requests",
];

#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("request failed: {0}")]
    Failed(String),
}

impl CollaboratorError {
    pub fn classify(status: Option<u16>, message: impl Into<String>) -> Self {
        let message = message.into();
        if status == Some(429) || is_rate_limit_message(&message) {
            Self::RateLimited(message)
        } else {
            Self::Failed(message)
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }
}

pub fn is_rate_limit_message(message: &str) -> bool {
    let lowered = message.split_whitespace().collect::<Vec<&str>>().join(" ");
    let lowered = lowered.to_ascii_lowercase();
    RATE_LIMIT_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}

#[derive(Debug, Error)]
pub enum ParserError {
    #[error("parser produced no output: {0}")]
    Empty(String),

    #[error("fallback extraction failed: {0}")]
    Fallback(String),

    #[error("parse worker panicked or was aborted: {0}")]
    Join(String),

    #[error("parse slots are closed")]
    SlotsClosed,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("payload encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown task status in store: {0}")]
    UnknownStatus(String),

    #[error("unknown task kind in store: {0}")]
    UnknownKind(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
