//! Tiered document recognition
//!
//! Tries an ordered list of recognition providers, primary first:
//! 1. **mineru** - layout-aware cloud parser (asynchronous job, see [`cloud_job`])
//! 2. **vision** - vision-language model fallback
//!
//! Tiers run strictly sequentially; a later tier only starts after the prior
//! tier's failure is observed. No tier is retried here.

pub mod cloud_job;

use crate::types::{with_timeout, ImageInput, ProviderError, RecognitionProvider};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Successful recognition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recognition {
    pub text: String,
    /// 1-based tier index that produced the text
    pub tier: usize,
    pub provider: String,
}

/// Why one tier did not produce text
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierFailure {
    pub tier: usize,
    pub provider: String,
    pub reason: String,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RecognitionError {
    /// Every tier failed; terminal for the request
    #[error("All {} recognition tiers exhausted", failures.len())]
    AllTiersExhausted { failures: Vec<TierFailure> },
}

impl RecognitionError {
    pub fn failures(&self) -> &[TierFailure] {
        match self {
            RecognitionError::AllTiersExhausted { failures } => failures,
        }
    }
}

/// Ordered fallback across recognition providers
pub struct TieredRecognizer {
    tiers: Vec<Arc<dyn RecognitionProvider>>,
    call_timeout: Duration,
}

impl TieredRecognizer {
    /// `tiers` in priority order; `call_timeout` bounds each synchronous call
    pub fn new(tiers: Vec<Arc<dyn RecognitionProvider>>, call_timeout: Duration) -> Self {
        Self {
            tiers,
            call_timeout,
        }
    }

    pub fn tier_names(&self) -> Vec<&'static str> {
        self.tiers.iter().map(|t| t.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    /// Recognise text, falling back tier by tier
    pub async fn recognize(&self, image: &ImageInput) -> Result<Recognition, RecognitionError> {
        let mut failures = Vec::new();

        for (index, provider) in self.tiers.iter().enumerate() {
            let tier = index + 1;
            let name = provider.name();
            let budget = provider.time_budget(self.call_timeout);

            debug!(tier, provider = name, budget_secs = budget.as_secs(), "Trying recognition tier");

            let result = with_timeout(budget, provider.recognize(image)).await;
            let reason = match result {
                Ok(text) if !text.trim().is_empty() => {
                    info!(tier, provider = name, chars = text.chars().count(), "Recognition succeeded");
                    return Ok(Recognition {
                        text,
                        tier,
                        provider: name.to_string(),
                    });
                }
                Ok(_) => ProviderError::EmptyResponse.to_string(),
                Err(e) => e.to_string(),
            };

            warn!(tier, provider = name, reason = %reason, "Recognition tier failed, falling back");
            failures.push(TierFailure {
                tier,
                provider: name.to_string(),
                reason,
            });
        }

        warn!(tiers = failures.len(), "All recognition tiers exhausted");
        Err(RecognitionError::AllTiersExhausted { failures })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FakeProvider {
        name: &'static str,
        result: Result<String, ProviderError>,
        delay: Option<Duration>,
        calls: AtomicU32,
    }

    impl FakeProvider {
        fn ok(name: &'static str, text: &str) -> Arc<Self> {
            Arc::new(Self {
                name,
                result: Ok(text.to_string()),
                delay: None,
                calls: AtomicU32::new(0),
            })
        }

        fn err(name: &'static str, err: ProviderError) -> Arc<Self> {
            Arc::new(Self {
                name,
                result: Err(err),
                delay: None,
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl RecognitionProvider for FakeProvider {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn recognize(&self, _image: &ImageInput) -> Result<String, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.result.clone()
        }
    }

    fn tiers(providers: &[Arc<FakeProvider>]) -> Vec<Arc<dyn RecognitionProvider>> {
        providers
            .iter()
            .map(|p| p.clone() as Arc<dyn RecognitionProvider>)
            .collect()
    }

    fn image() -> ImageInput {
        ImageInput::new(vec![0xFF, 0xD8, 0xFF, 0xE0], "roster.jpg")
    }

    #[tokio::test]
    async fn test_first_tier_wins() {
        let first = FakeProvider::ok("mineru", "张三 男 90");
        let second = FakeProvider::ok("vision", "unused");
        let recognizer = TieredRecognizer::new(tiers(&[first.clone(), second.clone()]), Duration::from_secs(1));

        let result = recognizer.recognize(&image()).await.unwrap();
        assert_eq!(result.tier, 1);
        assert_eq!(result.provider, "mineru");
        assert_eq!(second.calls(), 0);
    }

    #[tokio::test]
    async fn test_falls_back_without_retrying() {
        let first = FakeProvider::err("mineru", ProviderError::Unavailable("job failed".into()));
        let second = FakeProvider::ok("vision", "李四 女");
        let recognizer = TieredRecognizer::new(tiers(&[first.clone(), second.clone()]), Duration::from_secs(1));

        let result = recognizer.recognize(&image()).await.unwrap();
        assert_eq!(result.text, "李四 女");
        assert_eq!(result.tier, 2);
        assert_eq!(first.calls(), 1);
        assert_eq!(second.calls(), 1);
    }

    #[tokio::test]
    async fn test_empty_text_counts_as_failure() {
        let first = FakeProvider::ok("mineru", "   ");
        let second = FakeProvider::ok("vision", "text");
        let recognizer = TieredRecognizer::new(tiers(&[first, second]), Duration::from_secs(1));

        assert_eq!(recognizer.recognize(&image()).await.unwrap().tier, 2);
    }

    #[tokio::test]
    async fn test_all_tiers_exhausted_preserves_reasons() {
        let recognizer = TieredRecognizer::new(
            tiers(&[
                FakeProvider::err("mineru", ProviderError::NotConfigured("no key".into())),
                FakeProvider::err(
                    "vision",
                    ProviderError::Api {
                        status: 503,
                        body: "overloaded".into(),
                    },
                ),
            ]),
            Duration::from_secs(1),
        );

        let err = recognizer.recognize(&image()).await.unwrap_err();
        let failures = err.failures();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].tier, 1);
        assert!(failures[0].reason.contains("no key"));
        assert_eq!(failures[1].provider, "vision");
        assert!(failures[1].reason.contains("503"));
    }

    #[tokio::test]
    async fn test_slow_tier_is_abandoned() {
        let slow = Arc::new(FakeProvider {
            name: "mineru",
            result: Ok("too late".to_string()),
            delay: Some(Duration::from_secs(10)),
            calls: AtomicU32::new(0),
        });
        let fast = FakeProvider::ok("vision", "in time");
        let recognizer = TieredRecognizer::new(tiers(&[slow, fast]), Duration::from_millis(20));

        let result = recognizer.recognize(&image()).await.unwrap();
        assert_eq!(result.tier, 2);
    }

    #[tokio::test]
    async fn test_no_tiers_is_exhausted() {
        let recognizer = TieredRecognizer::new(Vec::new(), Duration::from_secs(1));
        assert!(recognizer.is_empty());
        assert!(recognizer.recognize(&image()).await.is_err());
    }
}
