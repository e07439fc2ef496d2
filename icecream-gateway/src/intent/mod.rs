//! Intent classification and routing
//!
//! [`IntentClassifier`] produces a [`ClassificationResult`] from three tiers
//! (keywords, image heuristic, reasoning model); [`IntentGate`] turns it into
//! a dispatch or a confirmation request under the configured threshold.

pub mod classifier;
pub mod gate;

pub use classifier::IntentClassifier;
pub use gate::{ConfirmationOption, Decision, IntentGate};

use icecream_common::Intent;
use serde::Serialize;

/// Which tier produced a classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationSource {
    Keyword,
    ImageHeuristic,
    Model,
    /// Classifier switched off in configuration
    Disabled,
    /// Model call failed; degraded default
    ApiError,
    /// Model replied without a usable JSON object; degraded default
    ParseError,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClassificationResult {
    pub intent: Intent,
    /// Always within `[0, 1]`
    pub confidence: f32,
    pub source: ClassificationSource,
}

impl ClassificationResult {
    /// Create a result with clamped confidence; NaN counts as 0.5
    pub fn new(intent: Intent, confidence: f32, source: ClassificationSource) -> Self {
        let confidence = if confidence.is_nan() {
            0.5
        } else {
            confidence.clamp(0.0, 1.0)
        };
        Self {
            intent,
            confidence,
            source,
        }
    }

    /// Conservative default after a model failure
    pub(crate) fn degraded(source: ClassificationSource) -> Self {
        Self::new(Intent::Chat, 0.5, source)
    }
}
