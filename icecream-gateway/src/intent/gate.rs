//! Confidence-threshold routing

use super::{ClassificationResult, IntentClassifier};
use icecream_common::Intent;
use serde::Serialize;
use tracing::info;

/// One entry of the confirmation menu
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfirmationOption {
    pub intent: Intent,
    pub label: &'static str,
    pub description: &'static str,
}

impl ConfirmationOption {
    fn for_intent(intent: Intent) -> Self {
        let (label, description) = match intent {
            Intent::Chat => ("💬 聊一聊", "普通对话"),
            Intent::Animation => ("🎬 生成动画", "数学可视化"),
            Intent::Solver => ("📐 解这道题", "智能解题"),
        };
        Self {
            intent,
            label,
            description,
        }
    }

    /// Fixed menu covering every intent
    pub fn menu() -> Vec<Self> {
        Intent::ALL.into_iter().map(Self::for_intent).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Route straight to the service; no classification for explicit modes
    Dispatch {
        intent: Intent,
        classification: Option<ClassificationResult>,
    },
    /// Below threshold: let the user pick
    NeedConfirmation {
        classification: ClassificationResult,
        options: Vec<ConfirmationOption>,
    },
}

pub struct IntentGate {
    classifier: IntentClassifier,
    threshold: f32,
}

impl IntentGate {
    pub fn new(classifier: IntentClassifier, threshold: f32) -> Self {
        Self { classifier, threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Dispatch when `confidence >= threshold`, otherwise ask
    pub fn route(&self, classification: ClassificationResult) -> Decision {
        if classification.confidence >= self.threshold {
            Decision::Dispatch {
                intent: classification.intent,
                classification: Some(classification),
            }
        } else {
            Decision::NeedConfirmation {
                classification,
                options: ConfirmationOption::menu(),
            }
        }
    }

    /// Explicit mode bypasses classification entirely
    pub async fn decide(&self, message: &str, has_image: bool, explicit: Option<Intent>) -> Decision {
        if let Some(intent) = explicit {
            info!(intent = %intent, "Explicit mode, skipping classification");
            return Decision::Dispatch {
                intent,
                classification: None,
            };
        }

        let classification = self.classifier.classify(message, has_image).await;
        let decision = self.route(classification);
        match &decision {
            Decision::Dispatch { intent, .. } => info!(intent = %intent, "Routing automatically"),
            Decision::NeedConfirmation { classification, .. } => info!(
                confidence = classification.confidence,
                threshold = self.threshold,
                "Confidence below threshold, asking user"
            ),
        }
        decision
    }
}
