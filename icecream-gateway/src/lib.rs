//! icecream-gateway library interface
//!
//! Reconciliation core (tiered recognition, roster extraction, layout repair,
//! intent routing) plus the HTTP surface that exposes it.

pub mod api;
pub mod error;
pub mod intent;
pub mod providers;
pub mod recognition;
pub mod roster;
pub mod seating;
pub mod services;
pub mod types;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use icecream_common::GatewayConfig;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::intent::{IntentClassifier, IntentGate};
use crate::providers::SceneRenderer;
use crate::recognition::TieredRecognizer;
use crate::roster::RosterExtractor;
use crate::seating::{ConstraintParser, SeatingPlanner};
use crate::services::{AnimationService, ChatService, IntentHandler, ServiceRegistry, SolverService};
use crate::types::ReasoningProvider;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub gate: Arc<IntentGate>,
    /// Dispatch table behind `/api/message`
    pub services: Arc<ServiceRegistry>,
    pub chat: Arc<ChatService>,
    pub animation: Arc<AnimationService>,
    pub solver: Arc<SolverService>,
    pub recognizer: Arc<TieredRecognizer>,
    pub roster_extractor: Arc<RosterExtractor>,
    pub constraint_parser: Arc<ConstraintParser>,
    pub planner: Arc<SeatingPlanner>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    /// Wire every component from one resolved configuration
    ///
    /// `reasoning` backs chat, classification, extraction and layout
    /// generation; `recognizer` holds the recognition tiers in order.
    pub fn new(
        config: GatewayConfig,
        reasoning: Arc<dyn ReasoningProvider>,
        recognizer: TieredRecognizer,
        renderer: Arc<dyn SceneRenderer>,
    ) -> icecream_common::Result<Self> {
        let call = config.timeouts.provider_call;
        let generation = config.timeouts.generation;

        let classifier = IntentClassifier::new(&config.intent, reasoning.clone(), call);
        let gate = Arc::new(IntentGate::new(classifier, config.intent.confidence_threshold));

        let recognizer = Arc::new(recognizer);
        let chat = Arc::new(ChatService::new(reasoning.clone(), call));
        let animation = Arc::new(AnimationService::new(reasoning.clone(), renderer, generation));
        let solver = Arc::new(SolverService::new(recognizer.clone(), reasoning.clone(), generation));

        let services = Arc::new(ServiceRegistry::new(vec![
            chat.clone() as Arc<dyn IntentHandler>,
            animation.clone() as Arc<dyn IntentHandler>,
            solver.clone() as Arc<dyn IntentHandler>,
        ])?);

        Ok(Self {
            gate,
            services,
            chat,
            animation,
            solver,
            recognizer,
            roster_extractor: Arc::new(RosterExtractor::new(reasoning.clone(), call)),
            constraint_parser: Arc::new(ConstraintParser::new(reasoning.clone(), call)),
            planner: Arc::new(SeatingPlanner::new(reasoning, generation)),
            config: Arc::new(config),
            startup_time: Utc::now(),
        })
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .merge(api::message_routes())
        .merge(api::tool_routes())
        .fallback(api::route_not_found)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
