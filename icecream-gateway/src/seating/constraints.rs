//! Natural-language constraint extraction
//!
//! "张三视力不好要坐前排，李四和王五不能坐一起" becomes a list of typed
//! constraints via the reasoning provider. Entries that do not fit the schema
//! are dropped individually; output that is not JSON at all yields an empty
//! list together with the raw reply.

use super::SeatingError;
use crate::types::{strip_code_fences, with_timeout, ChatMessage, CompletionRequest, ReasoningProvider};
use icecream_common::Student;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const CONSTRAINT_PROMPT: &str = r#"你是座位安排约束解析助手。从老师的话中提取约束条件。

输出格式 (严格JSON，不要markdown):
{
  "constraints": [
    {"type": "front_row", "target": "张三", "reason": "视力不好", "priority": "hard"},
    {"type": "avoid", "target": "李四", "related": "王五", "reason": "爱讲话", "priority": "hard"},
    {"type": "prefer", "target": "赵六", "related": "钱七", "reason": "学生心愿", "priority": "soft"}
  ]
}

约束类型:
- front_row: 必须坐前排 (视力/身高等硬需求)
- back_row: 必须坐后排 (个子高)
- avoid: 两人不能相邻 (纪律问题)
- prefer: 希望相邻 (软约束/心愿)
- pair: 必须相邻 (学习互助等硬约束)

priority: hard=必须满足, soft=尽量满足

如果没有识别到约束，返回空数组: {"constraints": []}"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    FrontRow,
    BackRow,
    Avoid,
    Prefer,
    Pair,
}

impl ConstraintKind {
    /// Whether the constraint names a second student
    pub fn is_pairwise(&self) -> bool {
        matches!(self, ConstraintKind::Avoid | ConstraintKind::Prefer | ConstraintKind::Pair)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Hard,
    #[default]
    Soft,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeatingConstraint {
    #[serde(rename = "type")]
    pub kind: ConstraintKind,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub priority: Priority,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedConstraints {
    pub constraints: Vec<SeatingConstraint>,
    /// Provider reply as received
    pub raw: String,
}

pub struct ConstraintParser {
    provider: Arc<dyn ReasoningProvider>,
    timeout: Duration,
}

impl ConstraintParser {
    pub fn new(provider: Arc<dyn ReasoningProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    /// Extract constraints from a free-text classroom description
    ///
    /// `students` only supplies names so the model can resolve references.
    pub async fn parse(&self, text: &str, students: &[Student]) -> Result<ParsedConstraints, SeatingError> {
        let mut user = format!("老师说：{}", text);
        if !students.is_empty() {
            let names: Vec<&str> = students.iter().map(|s| s.name.as_str()).collect();
            user.push_str(&format!("\n\n学生名单：{}", names.join("、")));
        }

        let request = CompletionRequest::new(
            vec![ChatMessage::system(CONSTRAINT_PROMPT), ChatMessage::user(user)],
            0.3,
        )
        .max_tokens(1024)
        .json();

        let raw = with_timeout(self.timeout, self.provider.complete(request)).await?;
        let constraints = parse_constraints(&raw);
        info!(count = constraints.len(), "Seating constraints parsed");

        Ok(ParsedConstraints { constraints, raw })
    }
}

/// Lenient parse of `{"constraints": [...]}` or a bare array
pub fn parse_constraints(raw: &str) -> Vec<SeatingConstraint> {
    let value: Value = match serde_json::from_str(&strip_code_fences(raw)) {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "Constraint output is not JSON");
            return Vec::new();
        }
    };

    let entries = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("constraints") {
            Some(Value::Array(items)) => items,
            _ => return Vec::new(),
        },
        _ => return Vec::new(),
    };

    entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value::<SeatingConstraint>(entry) {
            Ok(c) if !c.target.trim().is_empty() => Some(c),
            Ok(_) => None,
            Err(e) => {
                debug!(error = %e, "Skipping constraint that does not fit the schema");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProviderError;

    struct Reply(&'static str);

    #[async_trait::async_trait]
    impl ReasoningProvider for Reply {
        fn name(&self) -> &'static str {
            "reply"
        }

        async fn complete(&self, request: CompletionRequest) -> Result<String, ProviderError> {
            assert!(request.json_mode);
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn test_parse_constraints_typed() {
        let constraints = parse_constraints(
            r#"{"constraints":[
                {"type":"front_row","target":"张三","reason":"视力不好","priority":"hard"},
                {"type":"avoid","target":"李四","related":"王五"}
            ]}"#,
        );
        assert_eq!(constraints.len(), 2);
        assert_eq!(constraints[0].kind, ConstraintKind::FrontRow);
        assert_eq!(constraints[0].priority, Priority::Hard);
        assert_eq!(constraints[1].related.as_deref(), Some("王五"));
        assert_eq!(constraints[1].priority, Priority::Soft);
        assert!(constraints[1].kind.is_pairwise());
    }

    #[test]
    fn test_unknown_kinds_are_dropped_individually() {
        let constraints = parse_constraints(
            r#"[{"type":"teleport","target":"A"},{"type":"back_row","target":"B"},{"type":"pair","target":""}]"#,
        );
        assert_eq!(constraints.len(), 1);
        assert_eq!(constraints[0].target, "B");
    }

    #[test]
    fn test_non_json_is_empty() {
        assert!(parse_constraints("没有约束").is_empty());
        assert!(parse_constraints(r#"{"other": 1}"#).is_empty());
    }

    #[tokio::test]
    async fn test_parser_keeps_raw_reply() {
        let parser = ConstraintParser::new(Arc::new(Reply("无法解析")), Duration::from_secs(1));
        let parsed = parser.parse("随便坐", &[]).await.unwrap();
        assert!(parsed.constraints.is_empty());
        assert_eq!(parsed.raw, "无法解析");
    }
}
