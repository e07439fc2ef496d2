//! Animation generation
//!
//! Scene code comes from the reasoning provider and is handed to the render
//! service. A failed render still returns the code so the user can edit it.

use super::{IntentHandler, ServiceError, ServiceReply, ServiceRequest};
use crate::providers::manim::{RenderedVideo, SceneRenderer};
use crate::types::{with_timeout, ChatMessage, CompletionRequest, ReasoningProvider};
use icecream_common::Intent;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const SYSTEM_PROMPT: &str = "你是一个 Manim 动画代码生成专家。用户会告诉你想要可视化什么数学概念，你需要生成对应的 Manim 代码。

规则：
1. 只生成 Manim Community 版本兼容的代码
2. 类名必须是 MainScene，继承自 Scene
3. 主方法是 construct(self)
4. 代码要简洁、运行效率高
5. 注释用中文

示例输出格式：
```python
from manim import *

class MainScene(Scene):
    def construct(self):
        # 创建正弦函数图像
        axes = Axes(x_range=[-3, 3], y_range=[-2, 2])
        graph = axes.plot(lambda x: np.sin(x), color=BLUE)
        self.play(Create(axes), Create(graph))
        self.wait()
```";

const RENDER_FALLBACK_WARNING: &str = "Manim 服务渲染失败，已为您载入代码";

#[derive(Debug, Clone, Serialize)]
pub struct AnimationReply {
    pub intent: Intent,
    pub code: String,
    pub rendered: bool,
    #[serde(flatten)]
    pub video: RenderedVideo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

pub struct AnimationService {
    provider: Arc<dyn ReasoningProvider>,
    renderer: Arc<dyn SceneRenderer>,
    timeout: Duration,
}

impl AnimationService {
    pub fn new(provider: Arc<dyn ReasoningProvider>, renderer: Arc<dyn SceneRenderer>, timeout: Duration) -> Self {
        Self {
            provider,
            renderer,
            timeout,
        }
    }

    pub fn renderer(&self) -> &Arc<dyn SceneRenderer> {
        &self.renderer
    }

    pub async fn animate(&self, request: ServiceRequest) -> Result<AnimationReply, ServiceError> {
        let prior = request.code.filter(|c| !c.trim().is_empty());

        if request.message.is_empty() {
            return match prior {
                Some(code) => Ok(self.render(code).await),
                None => Err(ServiceError::BadRequest("请描述您想要的动画效果".to_string())),
            };
        }

        let prompt = match &prior {
            Some(code) => format!(
                "用户指令: {}\n\n当前代码 (请基于此修改):\n```python\n{}\n```",
                request.message, code
            ),
            None => request.message,
        };

        let completion = CompletionRequest::new(
            vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt)],
            0.3,
        )
        .max_tokens(2048);
        let generated = with_timeout(self.timeout, self.provider.complete(completion)).await?;
        let code = extract_python_block(&generated);

        info!(code_len = code.len(), editing = prior.is_some(), "Scene code generated");
        Ok(self.render(code).await)
    }

    /// Render `code`; failures degrade to an unrendered reply with a warning
    pub async fn render(&self, code: String) -> AnimationReply {
        match self.renderer.render(&code).await {
            Ok(video) => AnimationReply {
                intent: Intent::Animation,
                code,
                rendered: true,
                video,
                warning: None,
            },
            Err(e) => {
                warn!(error = %e, "Render failed, returning code only");
                let warning = match e {
                    crate::types::ProviderError::Api { body, .. } if !body.trim().is_empty() => body,
                    _ => RENDER_FALLBACK_WARNING.to_string(),
                };
                AnimationReply {
                    intent: Intent::Animation,
                    code,
                    rendered: false,
                    video: RenderedVideo::default(),
                    warning: Some(warning),
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl IntentHandler for AnimationService {
    fn intent(&self) -> Intent {
        Intent::Animation
    }

    async fn handle(&self, request: ServiceRequest) -> Result<ServiceReply, ServiceError> {
        self.animate(request).await.map(ServiceReply::Animation)
    }
}

/// Body of the first ```python fence, else the whole reply
pub fn extract_python_block(reply: &str) -> String {
    const FENCE: &str = "```python\n";
    if let Some(start) = reply.find(FENCE) {
        let body = &reply[start + FENCE.len()..];
        if let Some(end) = body.find("```") {
            return body[..end].trim().to_string();
        }
    }
    reply.to_string()
}
