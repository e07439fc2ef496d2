//! HTTP API handlers for the gateway
//!
//! - `/api/health` - liveness
//! - `/api/message`, `/api/chat`, `/api/manim*`, `/api/solver*` - intent services
//! - `/api/tools/...` - seating tools

pub mod health;
pub mod message;
pub mod tools;

pub use health::health_routes;
pub use message::message_routes;
pub use tools::tool_routes;

use axum::http::Uri;
use serde::Serialize;

use crate::error::ApiError;

/// `{"success": true, "data": ...}` envelope shared by the JSON endpoints
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self { success: true, data }
    }
}

/// Fallback for unmatched routes: JSON 404 in the standard error envelope
pub async fn route_not_found(uri: Uri) -> ApiError {
    ApiError::NotFound(uri.path().to_string())
}
