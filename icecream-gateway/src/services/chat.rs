//! Conversational replies

use super::{IntentHandler, ServiceError, ServiceReply, ServiceRequest};
use crate::types::{with_timeout, ChatMessage, CompletionRequest, ReasoningProvider};
use icecream_common::Intent;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Longest accepted user message, in characters
pub const MAX_MESSAGE_CHARS: usize = 10_000;

const SYSTEM_PROMPT: &str = "你是 ICeCream，一个友好、智能的 AI 助手。你擅长：
1. 日常对话和问答
2. 知识咨询和解释
3. 代码帮助和技术讨论
4. 数学和科学问题

请用中文回复，保持友好和专业。如果用户想要生成动画或解题，建议他们使用对应的模式。";

#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub intent: Intent,
    pub reply: String,
}

pub struct ChatService {
    provider: Arc<dyn ReasoningProvider>,
    timeout: Duration,
}

impl ChatService {
    pub fn new(provider: Arc<dyn ReasoningProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    pub async fn reply(&self, request: ServiceRequest) -> Result<ChatReply, ServiceError> {
        if !request.has_message() && request.history.is_empty() {
            return Err(ServiceError::BadRequest("消息不能为空".to_string()));
        }
        if request.message.chars().count() > MAX_MESSAGE_CHARS {
            return Err(ServiceError::BadRequest(format!(
                "消息过长，请限制在 {} 字符以内",
                MAX_MESSAGE_CHARS
            )));
        }

        let mut messages = Vec::with_capacity(request.history.len() + 2);
        messages.push(ChatMessage::system(SYSTEM_PROMPT));
        messages.extend(request.history);
        if !request.message.is_empty() {
            messages.push(ChatMessage::user(request.message));
        }

        debug!(turns = messages.len(), "Chat completion");
        let completion = CompletionRequest::new(messages, 0.7).max_tokens(2048);
        let reply = with_timeout(self.timeout, self.provider.complete(completion)).await?;

        Ok(ChatReply {
            intent: Intent::Chat,
            reply,
        })
    }
}

#[async_trait::async_trait]
impl IntentHandler for ChatService {
    fn intent(&self) -> Intent {
        Intent::Chat
    }

    async fn handle(&self, request: ServiceRequest) -> Result<ServiceReply, ServiceError> {
        self.reply(request).await.map(ServiceReply::Chat)
    }
}
