//! Message routing and intent service endpoints
//!
//! `POST /api/message` classifies (unless a mode is given) and dispatches
//! through the service registry. The direct endpoints skip classification.

use axum::{
    extract::{rejection::JsonRejection, State},
    routing::{get, post},
    Json, Router,
};
use icecream_common::Intent;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::api::ApiResponse;
use crate::error::{ApiError, ApiResult};
use crate::intent::{ClassificationResult, ConfirmationOption, Decision};
use crate::services::{AnimationReply, ChatReply, ServiceReply, ServiceRequest, SolverReply};
use crate::services::solver::FollowUpReply;
use crate::types::{ChatMessage, ImageInput};
use crate::AppState;

const CONFIRMATION_PROMPT: &str = "我不太确定您想做什么，请选择：";
const DEFAULT_UPLOAD_NAME: &str = "upload.jpg";

/// Body shared by `/api/message` and the direct service endpoints
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct MessageRequest {
    pub message: String,
    /// `chat` / `animation` (`manim`) / `solver`; absent or `auto` classifies
    pub mode: Option<String>,
    pub image_base64: Option<String>,
    pub filename: Option<String>,
    /// Prior conversation turns
    pub messages: Vec<ChatMessage>,
    /// Existing scene code to edit or render
    pub code: Option<String>,
}

impl MessageRequest {
    fn explicit_mode(&self) -> ApiResult<Option<Intent>> {
        match self.mode.as_deref().map(str::trim) {
            None | Some("") | Some("auto") => Ok(None),
            Some(raw) => Intent::parse(raw)
                .map(Some)
                .ok_or_else(|| ApiError::BadRequest(format!("Unknown mode: {}", raw))),
        }
    }

    fn into_service_request(self) -> ApiResult<ServiceRequest> {
        let filename = self.filename.unwrap_or_else(|| DEFAULT_UPLOAD_NAME.to_string());
        let image = self
            .image_base64
            .filter(|b| !b.trim().is_empty())
            .map(|encoded| ImageInput::from_base64(&encoded, filename))
            .transpose()
            .map_err(ApiError::BadRequest)?;

        let mut request = ServiceRequest::text(self.message);
        request.history = self.messages;
        request.image = image;
        request.code = self.code;
        Ok(request)
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum MessageResponse {
    Dispatched {
        success: bool,
        intent: Intent,
        #[serde(skip_serializing_if = "Option::is_none")]
        classification: Option<ClassificationResult>,
        data: ServiceReply,
    },
    NeedConfirmation {
        success: bool,
        #[serde(rename = "needConfirmation")]
        need_confirmation: bool,
        classification: ClassificationResult,
        message: &'static str,
        options: Vec<ConfirmationOption>,
    },
}

/// POST /api/message
pub async fn handle_message(
    State(state): State<AppState>,
    payload: Result<Json<MessageRequest>, JsonRejection>,
) -> ApiResult<Json<MessageResponse>> {
    let Json(request) = payload?;
    let explicit = request.explicit_mode()?;
    let service_request = request.into_service_request()?;

    if !service_request.has_message()
        && service_request.image.is_none()
        && service_request.code.is_none()
        && service_request.history.is_empty()
    {
        return Err(ApiError::BadRequest("消息不能为空".to_string()));
    }

    let decision = state
        .gate
        .decide(&service_request.message, service_request.image.is_some(), explicit)
        .await;

    match decision {
        Decision::Dispatch { intent, classification } => {
            let data = state.services.dispatch(intent, service_request).await?;
            Ok(Json(MessageResponse::Dispatched {
                success: true,
                intent,
                classification,
                data,
            }))
        }
        Decision::NeedConfirmation { classification, options } => Ok(Json(MessageResponse::NeedConfirmation {
            success: true,
            need_confirmation: true,
            classification,
            message: CONFIRMATION_PROMPT,
            options,
        })),
    }
}

/// POST /api/chat
pub async fn handle_chat(
    State(state): State<AppState>,
    payload: Result<Json<MessageRequest>, JsonRejection>,
) -> ApiResult<Json<ApiResponse<ChatReply>>> {
    let Json(request) = payload?;
    let reply = state.chat.reply(request.into_service_request()?).await?;
    Ok(Json(ApiResponse::ok(reply)))
}

/// POST /api/manim
pub async fn handle_animation(
    State(state): State<AppState>,
    payload: Result<Json<MessageRequest>, JsonRejection>,
) -> ApiResult<Json<ApiResponse<AnimationReply>>> {
    let Json(request) = payload?;
    let reply = state.animation.animate(request.into_service_request()?).await?;
    Ok(Json(ApiResponse::ok(reply)))
}

#[derive(Debug, Deserialize)]
pub struct RenderRequest {
    #[serde(default)]
    pub code: String,
}

/// POST /api/manim/render
///
/// Render user-edited code without calling the reasoning provider.
pub async fn handle_render(
    State(state): State<AppState>,
    payload: Result<Json<RenderRequest>, JsonRejection>,
) -> ApiResult<Json<ApiResponse<AnimationReply>>> {
    let Json(request) = payload?;
    if request.code.trim().is_empty() {
        return Err(ApiError::BadRequest("代码不能为空".to_string()));
    }
    let reply = state.animation.render(request.code).await;
    Ok(Json(ApiResponse::ok(reply)))
}

#[derive(Debug, Serialize)]
pub struct RendererStatus {
    pub available: bool,
    pub endpoint: String,
}

/// GET /api/manim/status
pub async fn renderer_status(State(state): State<AppState>) -> Json<RendererStatus> {
    let renderer = state.animation.renderer();
    let available = renderer.is_available().await;
    info!(available, endpoint = renderer.endpoint(), "Render service status checked");

    Json(RendererStatus {
        available,
        endpoint: renderer.endpoint().to_string(),
    })
}

/// POST /api/solver
pub async fn handle_solver(
    State(state): State<AppState>,
    payload: Result<Json<MessageRequest>, JsonRejection>,
) -> ApiResult<Json<ApiResponse<SolverReply>>> {
    let Json(request) = payload?;
    let reply = state.solver.solve(request.into_service_request()?).await?;
    Ok(Json(ApiResponse::ok(reply)))
}

#[derive(Debug, Deserialize)]
pub struct FollowUpRequest {
    #[serde(default)]
    pub message: String,
    /// Previously solved problem
    #[serde(default)]
    pub context: Option<String>,
}

/// POST /api/solver/chat
pub async fn handle_solver_follow_up(
    State(state): State<AppState>,
    payload: Result<Json<FollowUpRequest>, JsonRejection>,
) -> ApiResult<Json<ApiResponse<FollowUpReply>>> {
    let Json(request) = payload?;
    let reply = state
        .solver
        .follow_up(&request.message, request.context.as_deref())
        .await?;
    Ok(Json(ApiResponse::ok(reply)))
}

/// Build message and intent service routes
pub fn message_routes() -> Router<AppState> {
    Router::new()
        .route("/api/message", post(handle_message))
        .route("/api/chat", post(handle_chat))
        .route("/api/manim", post(handle_animation))
        .route("/api/manim/render", post(handle_render))
        .route("/api/manim/status", get(renderer_status))
        .route("/api/solver", post(handle_solver))
        .route("/api/solver/chat", post(handle_solver_follow_up))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parsing() {
        let mut request = MessageRequest::default();
        assert_eq!(request.explicit_mode().unwrap(), None);

        request.mode = Some("auto".into());
        assert_eq!(request.explicit_mode().unwrap(), None);

        request.mode = Some("manim".into());
        assert_eq!(request.explicit_mode().unwrap(), Some(Intent::Animation));

        request.mode = Some("karaoke".into());
        assert!(request.explicit_mode().is_err());
    }

    #[test]
    fn test_bad_image_is_rejected() {
        let request = MessageRequest {
            message: "看图".into(),
            image_base64: Some("***".into()),
            ..MessageRequest::default()
        };
        assert!(matches!(request.into_service_request(), Err(ApiError::BadRequest(_))));
    }
}
