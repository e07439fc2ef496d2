//! Seating tool endpoints
//!
//! - `POST /api/tools/seating/parse-image` - roster photo → students
//! - `POST /api/tools/seating/parse-students` - pasted list → students
//! - `POST /api/tools/seating/parse` - description → planning constraints
//! - `POST /api/tools/seating/plan` - students + classroom → repaired layout

use axum::{
    extract::{rejection::JsonRejection, State},
    routing::{get, post},
    Json, Router,
};
use icecream_common::{Roster, Student};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::api::ApiResponse;
use crate::error::{ApiError, ApiResult};
use crate::recognition::TierFailure;
use crate::roster::parse_pasted_roster;
use crate::seating::{ParsedConstraints, PlanOutcome, PlanRequest};
use crate::types::ImageInput;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct ToolsHealth {
    pub status: &'static str,
    pub service: &'static str,
    /// Recognition providers in tier order
    pub recognition_tiers: Vec<&'static str>,
    pub intent_classifier_enabled: bool,
}

/// GET /api/tools/health
pub async fn tools_health(State(state): State<AppState>) -> Json<ToolsHealth> {
    Json(ToolsHealth {
        status: "ok",
        service: "tools",
        recognition_tiers: state.recognizer.tier_names(),
        intent_classifier_enabled: state.config.intent.enabled,
    })
}

#[derive(Debug, Deserialize)]
pub struct ParseImageRequest {
    #[serde(default)]
    pub image_base64: String,
    #[serde(default)]
    pub filename: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ParsedRoster {
    pub students: Roster,
    pub count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_tier: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub recognition_failures: Vec<TierFailure>,
}

/// POST /api/tools/seating/parse-image
///
/// Exhausted recognition is a degraded success: empty roster plus the
/// per-tier failure reasons.
pub async fn parse_image(
    State(state): State<AppState>,
    payload: Result<Json<ParseImageRequest>, JsonRejection>,
) -> ApiResult<Json<ApiResponse<ParsedRoster>>> {
    let Json(request) = payload?;
    if request.image_base64.trim().is_empty() {
        return Err(ApiError::BadRequest("请上传名单图片".to_string()));
    }
    let filename = request.filename.unwrap_or_else(|| "roster.jpg".to_string());
    let image = ImageInput::from_base64(&request.image_base64, filename).map_err(ApiError::BadRequest)?;

    let recognition = match state.recognizer.recognize(&image).await {
        Ok(recognition) => recognition,
        Err(e) => {
            warn!(error = %e, "Roster image could not be recognised");
            return Ok(Json(ApiResponse::ok(ParsedRoster {
                students: Roster::empty(),
                count: 0,
                source_tier: None,
                provider: None,
                recognition_failures: e.failures().to_vec(),
            })));
        }
    };

    let students = state.roster_extractor.extract(&recognition.text).await?;
    info!(
        tier = recognition.tier,
        provider = %recognition.provider,
        students = students.len(),
        "Roster parsed from image"
    );

    Ok(Json(ApiResponse::ok(ParsedRoster {
        count: students.len(),
        students,
        source_tier: Some(recognition.tier),
        provider: Some(recognition.provider),
        recognition_failures: Vec::new(),
    })))
}

#[derive(Debug, Deserialize)]
pub struct ParseStudentsRequest {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct PastedRosterResponse {
    pub students: Roster,
    pub count: usize,
    pub has_gender: bool,
    pub has_grade: bool,
}

/// POST /api/tools/seating/parse-students
pub async fn parse_students(
    payload: Result<Json<ParseStudentsRequest>, JsonRejection>,
) -> ApiResult<Json<ApiResponse<PastedRosterResponse>>> {
    let Json(request) = payload?;
    if request.text.trim().is_empty() {
        return Err(ApiError::BadRequest("请输入学生名单".to_string()));
    }

    let parsed = parse_pasted_roster(&request.text);
    info!(students = parsed.students.len(), "Pasted roster parsed");

    Ok(Json(ApiResponse::ok(PastedRosterResponse {
        count: parsed.students.len(),
        students: parsed.students,
        has_gender: parsed.has_gender,
        has_grade: parsed.has_grade,
    })))
}

#[derive(Debug, Deserialize)]
pub struct ParseConstraintsRequest {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub students: Vec<Student>,
}

/// POST /api/tools/seating/parse
pub async fn parse_constraints(
    State(state): State<AppState>,
    payload: Result<Json<ParseConstraintsRequest>, JsonRejection>,
) -> ApiResult<Json<ApiResponse<ParsedConstraints>>> {
    let Json(request) = payload?;
    if request.text.trim().is_empty() {
        return Err(ApiError::BadRequest("请描述排座要求".to_string()));
    }

    let parsed = state
        .constraint_parser
        .parse(request.text.trim(), &request.students)
        .await?;
    Ok(Json(ApiResponse::ok(parsed)))
}

/// POST /api/tools/seating/plan
pub async fn plan_seating(
    State(state): State<AppState>,
    payload: Result<Json<PlanRequest>, JsonRejection>,
) -> ApiResult<Json<ApiResponse<PlanOutcome>>> {
    let Json(request) = payload?;
    let outcome = state.planner.plan(request).await?;
    Ok(Json(ApiResponse::ok(outcome)))
}

/// Build seating tool routes
pub fn tool_routes() -> Router<AppState> {
    Router::new()
        .route("/api/tools/health", get(tools_health))
        .route("/api/tools/seating/parse-image", post(parse_image))
        .route("/api/tools/seating/parse-students", post(parse_students))
        .route("/api/tools/seating/parse", post(parse_constraints))
        .route("/api/tools/seating/plan", post(plan_seating))
}
