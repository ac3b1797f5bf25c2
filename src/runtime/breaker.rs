use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::retrieval::text::truncate_chars;

const FATAL_MARKERS: &[&str] = &[
    "nsrangeexception",
    "libmlx",
    "metal",
    "abort trap",
    "pure virtual function",
];
const MAX_REASON_CHARS: usize = 240;
pub const DISABLED_BY_ENV_REASON: &str = "disabled_by_env: LEGAL_PDF_DOCLING_MODE=disabled";

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BreakerMode {
    #[default]
    Auto,
    Enabled,
    Disabled,
}

impl BreakerMode {
    pub fn parse_lenient(raw: Option<&str>) -> Self {
        match raw.map(|value| value.trim().to_ascii_lowercase()).as_deref() {
            Some("enabled") => Self::Enabled,
            Some("disabled") => Self::Disabled,
            _ => Self::Auto,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Enabled => "enabled",
            Self::Disabled => "disabled",
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectiveMode {
    Auto,
    AutoDisabled,
    Enabled,
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub configured_mode: BreakerMode,
    pub effective_mode: EffectiveMode,
    pub worker_enabled: bool,
    pub disable_reason: Option<String>,
}

#[derive(Debug)]
struct BreakerState {
    mode: BreakerMode,
    disable_reason: Option<String>,
}

impl BreakerState {
    fn new(mode: BreakerMode) -> Self {
        Self {
            mode,
            disable_reason: (mode == BreakerMode::Disabled)
                .then(|| DISABLED_BY_ENV_REASON.to_string()),
        }
    }
}

/// Process-wide switch for the external structure worker. Trips at most once,
/// only in `auto` mode, and only on crash signatures.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: Mutex<BreakerState>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerMode::Auto)
    }
}

impl CircuitBreaker {
    pub fn new(mode: BreakerMode) -> Self {
        Self {
            state: Mutex::new(BreakerState::new(mode)),
        }
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let state = self.state.lock();
        let effective_mode = match (state.mode, state.disable_reason.is_some()) {
            (BreakerMode::Auto, true) => EffectiveMode::AutoDisabled,
            (BreakerMode::Auto, false) => EffectiveMode::Auto,
            (BreakerMode::Enabled, _) => EffectiveMode::Enabled,
            (BreakerMode::Disabled, _) => EffectiveMode::Disabled,
        };
        BreakerSnapshot {
            configured_mode: state.mode,
            effective_mode,
            worker_enabled: state.mode == BreakerMode::Enabled
                || (state.mode == BreakerMode::Auto && state.disable_reason.is_none()),
            disable_reason: state.disable_reason.clone(),
        }
    }

    pub fn worker_enabled(&self) -> bool {
        self.snapshot().worker_enabled
    }

    pub fn record_worker_error(&self, message: &str) -> bool {
        if !is_fatal_worker_error(message) {
            return false;
        }

        let mut state = self.state.lock();
        if state.mode != BreakerMode::Auto || state.disable_reason.is_some() {
            return false;
        }

        let reason = format!(
            "auto_disabled_after_fatal_worker_error: {}",
            truncate_chars(message.trim(), MAX_REASON_CHARS)
        );
        warn!(reason = %reason, "pdf_worker_auto_disabled");
        state.disable_reason = Some(reason);
        true
    }

    pub fn reset_for_tests(&self, mode: BreakerMode) {
        *self.state.lock() = BreakerState::new(mode);
    }
}

pub fn is_fatal_worker_error(message: &str) -> bool {
    let lowered = message.to_lowercase();
    !lowered.is_empty() && FATAL_MARKERS.iter().any(|marker| lowered.contains(marker))
}
