//! Seating plan generation
//!
//! Checks the request locally (roster ids, dimensions, capacity), asks the
//! layout generator for `{layout, stats, unsatisfied}` and reconciles the
//! returned layout against the roster.

use super::constraints::SeatingConstraint;
use super::grid::{AisleSpec, Classroom, SeatGrid, AISLE_MARKER};
use super::repair::{reconcile, RepairReport};
use super::SeatingError;
use crate::types::{strip_code_fences, with_timeout, ChatMessage, CompletionRequest, ReasoningProvider};
use icecream_common::{Roster, Student};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Deserialize)]
pub struct PlanRequest {
    pub students: Vec<Student>,
    #[serde(default)]
    pub constraints: Vec<SeatingConstraint>,
    /// Free-form strategy flags (`genderBalance`, `gradeBalance`, ...)
    #[serde(default)]
    pub strategy: Value,
    pub rows: usize,
    pub cols: usize,
    /// Aisle column indices
    #[serde(default)]
    pub aisles: Vec<usize>,
    #[serde(default)]
    pub aisle_rows: Vec<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanOutcome {
    pub layout: SeatGrid,
    pub stats: Value,
    pub unsatisfied: Vec<Value>,
    pub repair: RepairReport,
}

/// What the generator must return; everything but `layout` is optional
#[derive(Debug, Deserialize)]
struct GeneratorOutput {
    layout: Value,
    #[serde(default)]
    stats: Value,
    #[serde(default)]
    unsatisfied: Value,
}

pub struct SeatingPlanner {
    generator: Arc<dyn ReasoningProvider>,
    timeout: Duration,
}

impl SeatingPlanner {
    pub fn new(generator: Arc<dyn ReasoningProvider>, timeout: Duration) -> Self {
        Self { generator, timeout }
    }

    /// Generate and reconcile a seating plan
    ///
    /// # Errors
    /// - `InvalidRoster` / `InvalidDimensions` / `InsufficientSeats` before
    ///   the generator is called
    /// - `Provider` when the generator call fails
    /// - `GeneratorMalformed` when the reply is not the mandated JSON object
    pub async fn plan(&self, request: PlanRequest) -> Result<PlanOutcome, SeatingError> {
        let roster = Roster::new(request.students.clone())
            .map_err(|e| SeatingError::InvalidRoster(e.to_string()))?;
        // The aisle marker is indistinguishable from an aisle cell on the wire
        if roster.contains(AISLE_MARKER) {
            return Err(SeatingError::InvalidRoster(format!(
                "student id {:?} is reserved for aisles",
                AISLE_MARKER
            )));
        }
        let classroom = Classroom::new(
            request.rows,
            request.cols,
            AisleSpec::new(request.aisles.iter().copied(), request.aisle_rows.iter().copied()),
        )?;

        let seats = classroom.seat_count();
        if seats < roster.len() {
            return Err(SeatingError::InsufficientSeats {
                seats,
                students: roster.len(),
            });
        }

        let generation = CompletionRequest::new(
            vec![
                ChatMessage::system(generator_prompt(&roster, &classroom)),
                ChatMessage::user(generator_input(&request)),
            ],
            0.2,
        )
        .max_tokens(2048)
        .json();

        let raw = with_timeout(self.timeout, self.generator.complete(generation)).await?;
        let output: GeneratorOutput = serde_json::from_str(&strip_code_fences(&raw)).map_err(|e| {
            warn!(error = %e, "Layout generator reply is not the expected JSON object");
            SeatingError::GeneratorMalformed(e.to_string())
        })?;

        let generated = SeatGrid::from_value(&output.layout)?;
        let unsatisfied = match output.unsatisfied {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            other => {
                warn!(unsatisfied = %other, "Generator returned a non-list unsatisfied value, keeping it as one entry");
                vec![other]
            }
        };
        let stats = match output.stats {
            Value::Object(map) => Value::Object(map),
            _ => Value::Object(Map::new()),
        };

        let outcome = reconcile(&roster, generated, &classroom, unsatisfied);
        info!(
            students = roster.len(),
            rows = classroom.rows,
            cols = classroom.cols,
            repaired = outcome.report.repaired,
            "Seating plan ready"
        );

        Ok(PlanOutcome {
            layout: outcome.layout,
            stats,
            unsatisfied: outcome.unsatisfied,
            repair: outcome.report,
        })
    }
}

fn join_indices(indices: impl Iterator<Item = usize>) -> String {
    indices.map(|i| i.to_string()).collect::<Vec<_>>().join(",")
}

fn generator_prompt(roster: &Roster, classroom: &Classroom) -> String {
    let count = roster.len();
    let mut aisle_rule = format!(
        "索引 [{}] 的列是过道，用 \"_aisle_\" 标记",
        join_indices(classroom.aisles.columns())
    );
    let aisle_rows = join_indices(classroom.aisles.rows());
    if !aisle_rows.is_empty() {
        aisle_rule.push_str(&format!("；索引 [{}] 的行也是过道", aisle_rows));
    }

    format!(
        r#"你是座位规划算法专家。

【任务】将 {count} 名学生填入 {rows}×{cols} 网格。

【规则】
1. 完整性: 输出必须恰好包含所有学生ID，不能多也不能少
2. 空座: 位置多于学生时用 null 填充
3. 过道: {aisle_rule}
4. 优先级: 硬约束 > 避嫌 > 策略 > 心愿

【策略说明】
- genderBalance: 男女尽量交替
- gradeBalance: 成绩好坏搭配
- heightOrder: 按身高从前到后

【输出格式 (Strict JSON，不要markdown)】
{{
  "layout": [["s01","s02",null],["s03","s04","s05"]],
  "stats": {{"total": {count}, "gender_mix": 0.85}},
  "unsatisfied": [{{"target": "s05", "constraint": "front_row", "reason": "前排已满"}}]
}}"#,
        count = count,
        rows = classroom.rows,
        cols = classroom.cols,
        aisle_rule = aisle_rule,
    )
}

fn generator_input(request: &PlanRequest) -> String {
    let students = serde_json::to_string(&request.students).unwrap_or_else(|_| "[]".to_string());
    let constraints = serde_json::to_string(&request.constraints).unwrap_or_else(|_| "[]".to_string());
    let strategy = match &request.strategy {
        Value::Null => "{}".to_string(),
        other => other.to_string(),
    };
    format!(
        "学生列表: {}\n约束条件: {}\n策略: {}\n教室: {}行 × {}列",
        students, constraints, strategy, request.rows, request.cols
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProviderError;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FakeGenerator {
        reply: String,
        calls: AtomicU32,
    }

    impl FakeGenerator {
        fn new(reply: Value) -> Arc<Self> {
            Self::raw(reply.to_string())
        }

        fn raw(reply: String) -> Arc<Self> {
            Arc::new(Self {
                reply,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait::async_trait]
    impl ReasoningProvider for FakeGenerator {
        fn name(&self) -> &'static str {
            "generator"
        }

        async fn complete(&self, request: CompletionRequest) -> Result<String, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert!(request.json_mode);
            assert_eq!(request.max_tokens, Some(2048));
            Ok(self.reply.clone())
        }
    }

    fn request(ids: &[&str], rows: usize, cols: usize, aisles: Vec<usize>) -> PlanRequest {
        PlanRequest {
            students: ids.iter().map(|id| Student::new(*id, id.to_uppercase())).collect(),
            constraints: Vec::new(),
            strategy: json!({"genderBalance": true}),
            rows,
            cols,
            aisles,
            aisle_rows: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_plan_repairs_generator_output() {
        let generator = FakeGenerator::new(json!({
            "layout": [["s01", "s01"], [null, "s02"]],
            "stats": {"total": 3},
            "unsatisfied": [{"target": "s02", "constraint": "front_row"}]
        }));
        let planner = SeatingPlanner::new(generator.clone(), Duration::from_secs(1));

        let outcome = planner.plan(request(&["s01", "s02", "s03"], 2, 2, vec![])).await.unwrap();
        assert!(outcome.repair.repaired);
        assert_eq!(serde_json::to_value(&outcome.layout).unwrap(), json!([["s01", "s03"], [null, "s02"]]));
        assert_eq!(outcome.stats, json!({"total": 3}));
        assert_eq!(outcome.unsatisfied.len(), 1);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_capacity_checked_before_generation() {
        let generator = FakeGenerator::new(json!({"layout": []}));
        let planner = SeatingPlanner::new(generator.clone(), Duration::from_secs(1));

        // 2×2 with one aisle column leaves 2 seats
        let err = planner.plan(request(&["a", "b", "c"], 2, 2, vec![0])).await.unwrap_err();
        assert!(matches!(err, SeatingError::InsufficientSeats { seats: 2, students: 3 }));
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalid_roster_and_dimensions() {
        let planner = SeatingPlanner::new(FakeGenerator::new(json!({})), Duration::from_secs(1));

        let err = planner.plan(request(&[], 2, 2, vec![])).await.unwrap_err();
        assert!(matches!(err, SeatingError::InvalidRoster(_)));

        let err = planner.plan(request(&["a", "a"], 2, 2, vec![])).await.unwrap_err();
        assert!(matches!(err, SeatingError::InvalidRoster(_)));

        let err = planner.plan(request(&["a"], 0, 2, vec![])).await.unwrap_err();
        assert!(matches!(err, SeatingError::InvalidDimensions(_)));
    }

    #[tokio::test]
    async fn test_aisle_marker_id_rejected() {
        let generator = FakeGenerator::new(json!({"layout": [["_aisle_", "s02"]]}));
        let planner = SeatingPlanner::new(generator.clone(), Duration::from_secs(1));

        let err = planner.plan(request(&["_aisle_", "s02"], 1, 2, vec![])).await.unwrap_err();
        assert!(matches!(err, SeatingError::InvalidRoster(ref msg) if msg.contains("_aisle_")));
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_oversized_classroom_rejected_before_generation() {
        let generator = FakeGenerator::new(json!({"layout": []}));
        let planner = SeatingPlanner::new(generator.clone(), Duration::from_secs(1));

        let err = planner.plan(request(&["a"], 20_000, 20_000, vec![])).await.unwrap_err();
        assert!(matches!(err, SeatingError::InvalidDimensions(_)));
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_non_list_unsatisfied_is_kept() {
        let generator = FakeGenerator::new(json!({
            "layout": [["a"]],
            "unsatisfied": "前排座位不足"
        }));
        let planner = SeatingPlanner::new(generator, Duration::from_secs(1));

        let outcome = planner.plan(request(&["a"], 1, 1, vec![])).await.unwrap();
        assert_eq!(outcome.unsatisfied, vec![json!("前排座位不足")]);
    }

    #[tokio::test]
    async fn test_non_json_generator_output_is_malformed() {
        let planner = SeatingPlanner::new(FakeGenerator::raw("座位表如下……".into()), Duration::from_secs(1));
        let err = planner.plan(request(&["a"], 1, 1, vec![])).await.unwrap_err();
        assert!(matches!(err, SeatingError::GeneratorMalformed(_)));

        let planner = SeatingPlanner::new(FakeGenerator::new(json!({"layout": "a"})), Duration::from_secs(1));
        let err = planner.plan(request(&["a"], 1, 1, vec![])).await.unwrap_err();
        assert!(matches!(err, SeatingError::GeneratorMalformed(_)));
    }

    #[tokio::test]
    async fn test_missing_optional_fields_default() {
        let planner = SeatingPlanner::new(FakeGenerator::new(json!({"layout": [["a"]], "stats": null})), Duration::from_secs(1));
        let outcome = planner.plan(request(&["a"], 1, 1, vec![])).await.unwrap();
        assert!(!outcome.repair.repaired);
        assert_eq!(outcome.stats, json!({}));
        assert!(outcome.unsatisfied.is_empty());
    }

    #[test]
    fn test_prompt_mentions_aisle_rows_only_when_present() {
        let roster = Roster::new(vec![Student::new("a", "A")]).unwrap();
        let plain = Classroom::new(2, 3, AisleSpec::from_columns([1])).unwrap();
        let prompt = generator_prompt(&roster, &plain);
        assert!(prompt.contains("索引 [1] 的列是过道"));
        assert!(!prompt.contains("的行也是过道"));

        let with_rows = Classroom::new(2, 3, AisleSpec::new([1], [0])).unwrap();
        assert!(generator_prompt(&roster, &with_rows).contains("索引 [0] 的行也是过道"));
    }
}
