//! Roster extraction from recognised text
//!
//! The reasoning provider does the semantic work (which lines are students,
//! which column is the gender). This module only guarantees the output
//! contract: every student has a non-empty name and a fresh id assigned in
//! emission order (`s01`, `s02`, ...). Output that cannot be parsed yields an
//! empty roster rather than an error.

use crate::types::{
    strip_code_fences, truncate_chars, with_timeout, ChatMessage, CompletionRequest, ProviderError,
    ReasoningProvider,
};
use icecream_common::{Gender, Roster, Student};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Recognised text beyond this many characters is not sent to the model
const MAX_INPUT_CHARS: usize = 5000;

const EXTRACTION_PROMPT: &str = "你是一个数据提取助手。请从以下文本中提取学生名单。
文本可能包含OCR错误、乱码或无关表头。
请提取：姓名(name)、性别(gender, M/F)、成绩(grade, 数字)。
如果性别未知，默认为M。如果成绩未知，不填。
忽略非学生信息的文字。

文本内容：
{TEXT}

输出严格的JSON对象，不要Markdown标记：
{\"students\": [{\"name\": \"张三\", \"gender\": \"M\", \"grade\": 85}, ...]}";

pub struct RosterExtractor {
    provider: Arc<dyn ReasoningProvider>,
    timeout: Duration,
}

impl RosterExtractor {
    pub fn new(provider: Arc<dyn ReasoningProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    /// Extract a roster from raw recognised text
    ///
    /// # Errors
    /// Only when the provider call itself fails. Unparseable output is an
    /// empty roster.
    pub async fn extract(&self, raw_text: &str) -> Result<Roster, ProviderError> {
        if raw_text.trim().is_empty() {
            debug!("No recognised text, skipping roster extraction");
            return Ok(Roster::empty());
        }

        let prompt = EXTRACTION_PROMPT.replace("{TEXT}", truncate_chars(raw_text, MAX_INPUT_CHARS));
        let request = CompletionRequest::new(vec![ChatMessage::user(prompt)], 0.1).json();

        let content = with_timeout(self.timeout, self.provider.complete(request)).await?;
        let roster = parse_students(&content);

        info!(
            provider = self.provider.name(),
            students = roster.len(),
            "Roster extraction complete"
        );
        Ok(roster)
    }
}

/// Parse provider output into a roster, assigning ids in emission order
///
/// Accepts a bare array or an object with a `students` array. Entries may be
/// objects with at least `name`, or plain name strings; anything else is
/// skipped.
pub fn parse_students(content: &str) -> Roster {
    let cleaned = strip_code_fences(content);
    let value: Value = match serde_json::from_str(&cleaned) {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "Roster extraction output is not JSON");
            return Roster::empty();
        }
    };

    let entries = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("students") {
            Some(Value::Array(items)) => items,
            _ => {
                warn!("Roster extraction output has no students array");
                return Roster::empty();
            }
        },
        _ => return Roster::empty(),
    };

    let students: Vec<Student> = entries
        .iter()
        .filter_map(student_fields)
        .enumerate()
        .map(|(index, (name, gender, grade))| Student {
            id: format!("s{:02}", index + 1),
            name,
            gender,
            grade,
        })
        .collect();

    // Ids are generated, so they are unique by construction
    Roster::new(students).unwrap_or_default()
}

fn student_fields(entry: &Value) -> Option<(String, Option<Gender>, Option<f64>)> {
    match entry {
        Value::String(name) if !name.trim().is_empty() => Some((name.trim().to_string(), None, None)),
        Value::Object(map) => {
            let name = map.get("name")?.as_str()?.trim();
            if name.is_empty() {
                return None;
            }
            let gender = map
                .get("gender")
                .and_then(Value::as_str)
                .and_then(Gender::parse_loose);
            let grade = match map.get("grade") {
                Some(Value::Number(n)) => n.as_f64(),
                Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
                _ => None,
            };
            Some((name.to_string(), gender, grade))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct CannedProvider {
        reply: Result<String, ProviderError>,
        prompts: Mutex<Vec<String>>,
    }

    impl CannedProvider {
        fn new(reply: Result<String, ProviderError>) -> Arc<Self> {
            Arc::new(Self {
                reply,
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait::async_trait]
    impl ReasoningProvider for CannedProvider {
        fn name(&self) -> &'static str {
            "canned"
        }

        async fn complete(&self, request: CompletionRequest) -> Result<String, ProviderError> {
            let prompt = match &request.messages[0].content {
                crate::types::MessageContent::Text(t) => t.clone(),
                _ => String::new(),
            };
            self.prompts.lock().unwrap().push(prompt);
            self.reply.clone()
        }
    }

    #[test]
    fn test_parse_array_assigns_sequential_ids() {
        let roster = parse_students(
            r#"[{"name":"张三","gender":"M","grade":85},{"name":"李四","gender":"女"},{"name":"王五","grade":"72.5"}]"#,
        );
        let students = roster.students();
        assert_eq!(students.len(), 3);
        assert_eq!(students[0].id, "s01");
        assert_eq!(students[1].id, "s02");
        assert_eq!(students[2].id, "s03");
        assert_eq!(students[0].grade, Some(85.0));
        assert_eq!(students[1].gender, Some(Gender::Female));
        assert_eq!(students[2].grade, Some(72.5));
    }

    #[test]
    fn test_parse_students_object_with_fences() {
        let roster = parse_students("```json\n{\"students\":[{\"name\":\"赵六\"}]}\n```");
        assert_eq!(roster.len(), 1);
        assert_eq!(roster.students()[0].name, "赵六");
    }

    #[test]
    fn test_nameless_entries_do_not_consume_ids() {
        let roster = parse_students(r#"[{"name":""},{"gender":"M"},{"name":"A"},42,"B"]"#);
        let ids: Vec<&str> = roster.ids().collect();
        assert_eq!(ids, vec!["s01", "s02"]);
        assert_eq!(roster.students()[1].name, "B");
    }

    #[test]
    fn test_unparseable_output_is_empty() {
        assert!(parse_students("抱歉，我无法识别").is_empty());
        assert!(parse_students(r#"{"result":"none"}"#).is_empty());
        assert!(parse_students("123").is_empty());
    }

    #[tokio::test]
    async fn test_extract_empty_text_skips_provider() {
        let provider = CannedProvider::new(Ok("[]".to_string()));
        let extractor = RosterExtractor::new(provider.clone(), Duration::from_secs(1));

        let roster = extractor.extract("   ").await.unwrap();
        assert!(roster.is_empty());
        assert!(provider.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_extract_truncates_long_input() {
        let provider = CannedProvider::new(Ok(r#"[{"name":"张三"}]"#.to_string()));
        let extractor = RosterExtractor::new(provider.clone(), Duration::from_secs(1));

        let long_text = "名".repeat(MAX_INPUT_CHARS + 100);
        let roster = extractor.extract(&long_text).await.unwrap();
        assert_eq!(roster.len(), 1);

        let prompts = provider.prompts.lock().unwrap();
        let sent = prompts[0].matches('名').count();
        assert_eq!(sent, MAX_INPUT_CHARS);
    }

    #[tokio::test]
    async fn test_extract_provider_failure_propagates() {
        let provider = CannedProvider::new(Err(ProviderError::Network("down".to_string())));
        let extractor = RosterExtractor::new(provider, Duration::from_secs(1));
        assert!(extractor.extract("张三 男").await.is_err());
    }
}
