//! Three-tier intent classifier
//!
//! 1. Keyword match on the lowercased message (animation 0.95, solver 0.9)
//! 2. Image attached and no animation wording → solver 0.95
//! 3. Reasoning model with a fixed instruction; the first `{...}` span of the
//!    reply is parsed as `{intent, confidence}`
//!
//! Tier 3 never fails the request: a failed call degrades to
//! `{chat, 0.5, api_error}`, an unusable reply to `{chat, 0.5, parse_error}`.

use super::{ClassificationResult, ClassificationSource};
use crate::types::{with_timeout, ChatMessage, CompletionRequest, ReasoningProvider};
use icecream_common::config::IntentConfig;
use icecream_common::Intent;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const ANIMATION_KEYWORDS: &[&str] = &["画一个", "画个", "动画", "可视化", "manim", "演示", "视频展示", "图形"];
const SOLVER_KEYWORDS: &[&str] = &["解题", "求解", "证明", "计算", "答案", "怎么做", "怎么算", "这道题"];
/// Wording that keeps an image-bearing message away from the solver shortcut
const IMAGE_ANIMATION_KEYWORDS: &[&str] = &["动画", "可视化", "manim", "视频", "演示"];

const INTENT_PROMPT: &str = r#"你是一个意图分类器。请根据用户消息判断其最可能的意图。

## 意图类型
1. **chat**: 普通闲聊、问答、知识咨询、日常对话
2. **manim**: 想生成数学动画、可视化图形、Manim 代码
3. **solver**: 想解题、求解数学问题、上传了题目图片

## 判断规则
- 包含"画"、"动画"、"可视化"、"演示"、"Manim"、"视频" → 大概率 manim
- 包含"解题"、"求解"、"证明"、"计算"、"答案"、"怎么做" → 大概率 solver
- 上传了图片 → 大概率 solver（除非明确说要做动画）
- 问候语、闲聊、知识问答 → chat
- 其他不明确的 → chat

## 输出格式
只返回一个 JSON，不要有其他内容：
{"intent": "chat|manim|solver", "confidence": 0.0~1.0}

---

用户消息："{USER_MESSAGE}"
是否上传图片：{HAS_IMAGE}"#;

/// Model reply schema; both fields optional, anything else ignored
#[derive(Debug, Deserialize)]
struct ModelVerdict {
    #[serde(default)]
    intent: Option<String>,
    #[serde(default)]
    confidence: Option<Value>,
}

pub struct IntentClassifier {
    enabled: bool,
    model: Arc<dyn ReasoningProvider>,
    timeout: Duration,
}

impl IntentClassifier {
    pub fn new(config: &IntentConfig, model: Arc<dyn ReasoningProvider>, timeout: Duration) -> Self {
        Self {
            enabled: config.enabled,
            model,
            timeout,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub async fn classify(&self, message: &str, has_image: bool) -> ClassificationResult {
        if !self.enabled {
            return ClassificationResult::new(Intent::Chat, 1.0, ClassificationSource::Disabled);
        }

        if let Some(result) = keyword_match(message) {
            debug!(intent = %result.intent, "Intent matched by keyword");
            return result;
        }

        if let Some(result) = image_heuristic(message, has_image) {
            debug!("Image attached without animation wording, routing to solver");
            return result;
        }

        let result = self.ask_model(message, has_image).await;
        info!(
            intent = %result.intent,
            confidence = result.confidence,
            source = ?result.source,
            "Intent classified"
        );
        result
    }

    async fn ask_model(&self, message: &str, has_image: bool) -> ClassificationResult {
        let prompt = INTENT_PROMPT
            .replace("{USER_MESSAGE}", message)
            .replace("{HAS_IMAGE}", if has_image { "是" } else { "否" });
        let request = CompletionRequest::new(vec![ChatMessage::user(prompt)], 0.0).max_tokens(50);

        match with_timeout(self.timeout, self.model.complete(request)).await {
            Ok(reply) => parse_verdict(&reply),
            Err(e) => {
                warn!(error = %e, "Intent model call failed, defaulting to chat");
                ClassificationResult::degraded(ClassificationSource::ApiError)
            }
        }
    }
}

/// Tier 1
pub fn keyword_match(message: &str) -> Option<ClassificationResult> {
    let lower = message.to_lowercase();
    if ANIMATION_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        return Some(ClassificationResult::new(Intent::Animation, 0.95, ClassificationSource::Keyword));
    }
    if SOLVER_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        return Some(ClassificationResult::new(Intent::Solver, 0.9, ClassificationSource::Keyword));
    }
    None
}

/// Tier 2
pub fn image_heuristic(message: &str, has_image: bool) -> Option<ClassificationResult> {
    if !has_image {
        return None;
    }
    let lower = message.to_lowercase();
    if IMAGE_ANIMATION_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        return None;
    }
    Some(ClassificationResult::new(Intent::Solver, 0.95, ClassificationSource::ImageHeuristic))
}

/// Parse the first `{` .. last `}` span of a free-form model reply
fn parse_verdict(reply: &str) -> ClassificationResult {
    let span = match (reply.find('{'), reply.rfind('}')) {
        (Some(start), Some(end)) if start < end => &reply[start..=end],
        _ => {
            warn!(reply = %reply, "Intent model reply has no JSON object");
            return ClassificationResult::degraded(ClassificationSource::ParseError);
        }
    };

    let verdict: ModelVerdict = match serde_json::from_str(span) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "Intent model reply is not valid JSON");
            return ClassificationResult::degraded(ClassificationSource::ParseError);
        }
    };

    let intent = verdict
        .intent
        .as_deref()
        .and_then(Intent::parse)
        .unwrap_or(Intent::Chat);
    let confidence = match verdict.confidence {
        Some(Value::Number(n)) => n.as_f64().map(|c| c as f32).unwrap_or(0.5),
        Some(Value::String(s)) => s.trim().parse::<f32>().unwrap_or(0.5),
        _ => 0.5,
    };

    ClassificationResult::new(intent, confidence, ClassificationSource::Model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProviderError;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScriptedModel {
        reply: Result<String, ProviderError>,
        calls: AtomicU32,
    }

    impl ScriptedModel {
        fn new(reply: Result<&str, ProviderError>) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.map(str::to_string),
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait::async_trait]
    impl ReasoningProvider for ScriptedModel {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn complete(&self, request: CompletionRequest) -> Result<String, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(request.max_tokens, Some(50));
            assert_eq!(request.temperature, 0.0);
            self.reply.clone()
        }
    }

    fn classifier(enabled: bool, model: Arc<ScriptedModel>) -> IntentClassifier {
        let config = IntentConfig {
            enabled,
            confidence_threshold: 0.75,
        };
        IntentClassifier::new(&config, model, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_disabled_short_circuits_to_chat() {
        let model = ScriptedModel::new(Ok(r#"{"intent":"solver","confidence":0.99}"#));
        let result = classifier(false, model.clone()).classify("证明勾股定理", true).await;
        assert_eq!(result, ClassificationResult::new(Intent::Chat, 1.0, ClassificationSource::Disabled));
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_animation_keyword_scenario() {
        let model = ScriptedModel::new(Ok("unused"));
        let result = classifier(true, model.clone()).classify("帮我画一个正弦函数动画", false).await;
        assert_eq!(result.intent, Intent::Animation);
        assert_eq!(result.confidence, 0.95);
        assert_eq!(result.source, ClassificationSource::Keyword);
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_keyword_match_is_case_insensitive() {
        let result = keyword_match("Make a MANIM scene").unwrap();
        assert_eq!(result.intent, Intent::Animation);
        let result = keyword_match("这道题怎么算").unwrap();
        assert_eq!(result.intent, Intent::Solver);
        assert_eq!(result.confidence, 0.9);
    }

    #[tokio::test]
    async fn test_image_heuristic() {
        let model = ScriptedModel::new(Ok(r#"{"intent":"chat","confidence":0.9}"#));
        let c = classifier(true, model.clone());

        let result = c.classify("看看这个", true).await;
        assert_eq!(result, ClassificationResult::new(Intent::Solver, 0.95, ClassificationSource::ImageHeuristic));

        // Animation wording outside the tier-1 list still blocks the shortcut
        let result = c.classify("做成视频", true).await;
        assert_eq!(result.source, ClassificationSource::Model);
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_greeting_with_non_json_reply_degrades() {
        let model = ScriptedModel::new(Ok("你好！有什么可以帮你？"));
        let result = classifier(true, model).classify("你好", false).await;
        assert_eq!(result, ClassificationResult::new(Intent::Chat, 0.5, ClassificationSource::ParseError));
    }

    #[tokio::test]
    async fn test_model_failure_degrades() {
        let model = ScriptedModel::new(Err(ProviderError::Api {
            status: 500,
            body: "boom".into(),
        }));
        let result = classifier(true, model).classify("你好", false).await;
        assert_eq!(result, ClassificationResult::new(Intent::Chat, 0.5, ClassificationSource::ApiError));
    }

    #[test]
    fn test_model_confidence_is_clamped() {
        let result = parse_verdict(r#"当然：{"intent": "manim", "confidence": 1.5} 以上"#);
        assert_eq!(result.intent, Intent::Animation);
        assert_eq!(result.confidence, 1.0);
        assert_eq!(result.source, ClassificationSource::Model);
    }

    #[test]
    fn test_model_verdict_defaults() {
        let result = parse_verdict(r#"{"intent": "weather"}"#);
        assert_eq!(result.intent, Intent::Chat);
        assert_eq!(result.confidence, 0.5);

        let result = parse_verdict(r#"{"intent": "solver", "confidence": "0.8"}"#);
        assert_eq!(result.intent, Intent::Solver);
        assert!((result.confidence - 0.8).abs() < 1e-6);

        assert_eq!(parse_verdict("} oops {").source, ClassificationSource::ParseError);
        assert_eq!(parse_verdict("{not json}").source, ClassificationSource::ParseError);
    }
}
