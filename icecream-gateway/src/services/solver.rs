//! Homework solving
//!
//! An attached image goes through the tiered recognizer first; the recognised
//! text (plus any typed message) is then solved by the reasoning provider.
//! When every recognition tier fails the typed message is solved instead and
//! the reply carries a warning.

use super::{IntentHandler, ServiceError, ServiceReply, ServiceRequest};
use crate::recognition::{TierFailure, TieredRecognizer};
use crate::types::{with_timeout, ChatMessage, CompletionRequest, ReasoningProvider};
use icecream_common::Intent;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

const SOLVER_PROMPT: &str = "你是一位耐心、严谨的数学老师。请解答学生给出的题目：
1. 先简要分析题意和已知条件
2. 给出完整的解题步骤
3. 最后明确写出答案
所有数学公式使用 LaTeX 格式书写（行内用 $...$，独立公式用 $$...$$）。
如果题目文字来自图片识别，可能存在识别错误，请结合上下文合理推断。";

const UNRECOGNISED_WARNING: &str = "图片识别失败，已根据输入的文字解题";

#[derive(Debug, Clone, Serialize)]
pub struct RecognitionSummary {
    pub tier: usize,
    pub provider: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SolverReply {
    pub intent: Intent,
    /// Question text the solution is based on
    pub extracted_text: String,
    pub solution: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recognition: Option<RecognitionSummary>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub recognition_failures: Vec<TierFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FollowUpReply {
    pub reply: String,
}

pub struct SolverService {
    recognizer: Arc<TieredRecognizer>,
    provider: Arc<dyn ReasoningProvider>,
    timeout: Duration,
}

impl SolverService {
    pub fn new(recognizer: Arc<TieredRecognizer>, provider: Arc<dyn ReasoningProvider>, timeout: Duration) -> Self {
        Self {
            recognizer,
            provider,
            timeout,
        }
    }

    pub async fn solve(&self, request: ServiceRequest) -> Result<SolverReply, ServiceError> {
        let started = Instant::now();
        if request.image.is_none() && !request.has_message() {
            return Err(ServiceError::BadRequest("请上传题目图片或输入题目内容".to_string()));
        }

        let mut recognition = None;
        let mut failures = Vec::new();
        let mut warning = None;

        let question = match &request.image {
            Some(image) => match self.recognizer.recognize(image).await {
                Ok(result) => {
                    recognition = Some(RecognitionSummary {
                        tier: result.tier,
                        provider: result.provider,
                    });
                    if request.has_message() {
                        format!("{}\n\n补充说明：{}", result.text.trim(), request.message)
                    } else {
                        result.text
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Recognition failed, solving the typed message");
                    failures = e.failures().to_vec();
                    warning = Some(UNRECOGNISED_WARNING.to_string());
                    request.message.clone()
                }
            },
            None => request.message.clone(),
        };

        // Unreadable image and nothing typed: degrade to an empty solution
        if question.trim().is_empty() {
            return Ok(SolverReply {
                intent: Intent::Solver,
                extracted_text: String::new(),
                solution: String::new(),
                recognition,
                recognition_failures: failures,
                warning: Some("图片识别失败，请输入题目文字".to_string()),
                elapsed_ms: elapsed_ms(started),
            });
        }

        let completion = CompletionRequest::new(
            vec![ChatMessage::system(SOLVER_PROMPT), ChatMessage::user(question.clone())],
            0.3,
        )
        .max_tokens(4096);
        let solution = with_timeout(self.timeout, self.provider.complete(completion)).await?;

        let elapsed = elapsed_ms(started);
        info!(
            from_image = recognition.is_some(),
            elapsed_ms = elapsed,
            "Problem solved"
        );

        Ok(SolverReply {
            intent: Intent::Solver,
            extracted_text: question,
            solution,
            recognition,
            recognition_failures: failures,
            warning,
            elapsed_ms: elapsed,
        })
    }

    /// Follow-up question about a previously solved problem
    pub async fn follow_up(&self, message: &str, context: Option<&str>) -> Result<FollowUpReply, ServiceError> {
        if message.trim().is_empty() {
            return Err(ServiceError::BadRequest("问题不能为空".to_string()));
        }

        let system = format!(
            "你是一个数学老师，正在帮助学生解答问题。\n之前的题目上下文：\n{}\n\n请针对学生的追问给出解答。使用 LaTeX 格式书写数学公式。",
            context.filter(|c| !c.trim().is_empty()).unwrap_or("无")
        );
        let completion = CompletionRequest::new(vec![ChatMessage::system(system), ChatMessage::user(message)], 0.5);
        let reply = with_timeout(self.timeout, self.provider.complete(completion)).await?;

        Ok(FollowUpReply { reply })
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis().min(u64::MAX as u128) as u64
}

#[async_trait::async_trait]
impl IntentHandler for SolverService {
    fn intent(&self) -> Intent {
        Intent::Solver
    }

    async fn handle(&self, request: ServiceRequest) -> Result<ServiceReply, ServiceError> {
        self.solve(request).await.map(ServiceReply::Solver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ImageInput, MessageContent, ProviderError, RecognitionProvider};
    use std::sync::Mutex;

    struct OneShotOcr(Result<String, ProviderError>);

    #[async_trait::async_trait]
    impl RecognitionProvider for OneShotOcr {
        fn name(&self) -> &'static str {
            "vision"
        }

        async fn recognize(&self, _image: &ImageInput) -> Result<String, ProviderError> {
            self.0.clone()
        }
    }

    #[derive(Default)]
    struct Tutor {
        questions: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl ReasoningProvider for Tutor {
        fn name(&self) -> &'static str {
            "tutor"
        }

        async fn complete(&self, request: CompletionRequest) -> Result<String, ProviderError> {
            if let Some(ChatMessage {
                content: MessageContent::Text(q),
                ..
            }) = request.messages.last()
            {
                self.questions.lock().unwrap().push(q.clone());
            }
            Ok("$x = 2$".to_string())
        }
    }

    fn service(ocr: Result<String, ProviderError>, tutor: Arc<Tutor>) -> SolverService {
        let recognizer = TieredRecognizer::new(
            vec![Arc::new(OneShotOcr(ocr)) as Arc<dyn RecognitionProvider>],
            Duration::from_secs(1),
        );
        SolverService::new(Arc::new(recognizer), tutor, Duration::from_secs(1))
    }

    fn with_image(message: &str) -> ServiceRequest {
        let mut request = ServiceRequest::text(message);
        request.image = Some(ImageInput::new(vec![0xFF, 0xD8, 0xFF], "q.jpg"));
        request
    }

    #[tokio::test]
    async fn test_image_question_is_recognised_then_solved() {
        let tutor = Arc::new(Tutor::default());
        let reply = service(Ok("解方程 x+1=3".into()), tutor.clone())
            .solve(with_image("用两种方法"))
            .await
            .unwrap();

        assert_eq!(reply.solution, "$x = 2$");
        assert_eq!(reply.recognition.as_ref().map(|r| r.tier), Some(1));
        assert!(reply.warning.is_none());
        let questions = tutor.questions.lock().unwrap();
        assert!(questions[0].starts_with("解方程 x+1=3"));
        assert!(questions[0].contains("用两种方法"));
    }

    #[tokio::test]
    async fn test_exhausted_recognition_falls_back_to_message() {
        let tutor = Arc::new(Tutor::default());
        let reply = service(Err(ProviderError::EmptyResponse), tutor.clone())
            .solve(with_image("x+1=3 求 x"))
            .await
            .unwrap();

        assert_eq!(reply.extracted_text, "x+1=3 求 x");
        assert_eq!(reply.recognition_failures.len(), 1);
        assert!(reply.warning.is_some());
        assert_eq!(tutor.questions.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unreadable_image_without_message_degrades() {
        let tutor = Arc::new(Tutor::default());
        let reply = service(Err(ProviderError::EmptyResponse), tutor.clone())
            .solve(with_image(""))
            .await
            .unwrap();

        assert!(reply.solution.is_empty());
        assert!(reply.warning.is_some());
        assert!(tutor.questions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_nothing_to_solve_is_bad_request() {
        let err = service(Ok("unused".into()), Arc::new(Tutor::default()))
            .solve(ServiceRequest::text(""))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_follow_up_requires_message() {
        let s = service(Ok("unused".into()), Arc::new(Tutor::default()));
        assert!(s.follow_up("  ", None).await.is_err());
        assert_eq!(s.follow_up("为什么？", Some("x+1=3")).await.unwrap().reply, "$x = 2$");
    }
}
