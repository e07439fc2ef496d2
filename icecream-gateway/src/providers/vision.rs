//! Vision-language model recognition tier
//!
//! Sends the image as a data URL to a multimodal chat-completions endpoint
//! (PaddleOCR-VL on SiliconFlow) and returns whatever text the model reads.

use super::chat_completions::ChatCompletionsClient;
use crate::types::{ChatMessage, CompletionRequest, ImageInput, ProviderError, RecognitionProvider};

const VISION_INSTRUCTION: &str = "请识别图片中的表格内容，提取所有学生信息（姓名、性别、成绩等），\
并直接以 JSON 格式输出，格式为：[{\"name\": \"...\", \"gender\": \"...\", \"grade\": ...}]。不要输出其他废话。";

/// Recognition provider backed by a vision-language model
pub struct VisionRecognizer {
    client: ChatCompletionsClient,
}

impl VisionRecognizer {
    pub fn new(client: ChatCompletionsClient) -> Self {
        Self { client }
    }

    fn request_for(&self, image: &ImageInput) -> CompletionRequest {
        CompletionRequest::new(
            vec![ChatMessage::user_with_image(VISION_INSTRUCTION, image)],
            0.1,
        )
        .max_tokens(4096)
    }
}

#[async_trait::async_trait]
impl RecognitionProvider for VisionRecognizer {
    fn name(&self) -> &'static str {
        "vision"
    }

    async fn recognize(&self, image: &ImageInput) -> Result<String, ProviderError> {
        let text = self.client.chat(&self.request_for(image)).await?;
        if text.trim().is_empty() {
            return Err(ProviderError::EmptyResponse);
        }
        Ok(text)
    }
}
