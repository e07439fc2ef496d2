//! Intent services
//!
//! Thin delegates behind the routing decision. The set of services is fixed
//! at startup in a [`ServiceRegistry`] keyed by [`Intent`].

pub mod animation;
pub mod chat;
pub mod solver;

pub use animation::{AnimationReply, AnimationService};
pub use chat::{ChatReply, ChatService};
pub use solver::{SolverReply, SolverService};

use crate::types::{ChatMessage, ImageInput, ProviderError};
use icecream_common::Intent;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Everything a service may need from one user turn
#[derive(Debug, Clone, Default)]
pub struct ServiceRequest {
    /// Trimmed user text; may be empty
    pub message: String,
    pub history: Vec<ChatMessage>,
    pub image: Option<ImageInput>,
    /// Existing scene code to edit or render
    pub code: Option<String>,
}

impl ServiceRequest {
    pub fn text(message: impl Into<String>) -> Self {
        Self {
            message: message.into().trim().to_string(),
            ..Self::default()
        }
    }

    pub fn has_message(&self) -> bool {
        !self.message.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ServiceReply {
    Chat(ChatReply),
    Animation(AnimationReply),
    Solver(SolverReply),
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("No service registered for intent {0}")]
    NotRegistered(Intent),
}

/// One destination service
#[async_trait::async_trait]
pub trait IntentHandler: Send + Sync {
    fn intent(&self) -> Intent;

    async fn handle(&self, request: ServiceRequest) -> Result<ServiceReply, ServiceError>;
}

/// Static dispatch table `{chat, animation, solver}` → handler
pub struct ServiceRegistry {
    handlers: HashMap<Intent, Arc<dyn IntentHandler>>,
}

impl ServiceRegistry {
    /// Build the table; every intent must be covered exactly once
    pub fn new(handlers: Vec<Arc<dyn IntentHandler>>) -> icecream_common::Result<Self> {
        let mut table = HashMap::new();
        for handler in handlers {
            let intent = handler.intent();
            if table.insert(intent, handler).is_some() {
                return Err(icecream_common::Error::Internal(format!(
                    "duplicate handler for intent {}",
                    intent
                )));
            }
        }

        if let Some(missing) = Intent::ALL.iter().find(|i| !table.contains_key(*i)) {
            return Err(icecream_common::Error::Internal(format!(
                "no handler for intent {}",
                missing
            )));
        }

        Ok(Self { handlers: table })
    }

    pub async fn dispatch(&self, intent: Intent, request: ServiceRequest) -> Result<ServiceReply, ServiceError> {
        let handler = self
            .handlers
            .get(&intent)
            .ok_or(ServiceError::NotRegistered(intent))?;
        handler.handle(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo(Intent);

    #[async_trait::async_trait]
    impl IntentHandler for Echo {
        fn intent(&self) -> Intent {
            self.0
        }

        async fn handle(&self, request: ServiceRequest) -> Result<ServiceReply, ServiceError> {
            Ok(ServiceReply::Chat(ChatReply {
                intent: self.0,
                reply: request.message,
            }))
        }
    }

    fn echo(intent: Intent) -> Arc<dyn IntentHandler> {
        Arc::new(Echo(intent))
    }

    #[tokio::test]
    async fn test_dispatch_reaches_the_named_handler() {
        let registry = ServiceRegistry::new(vec![echo(Intent::Chat), echo(Intent::Animation), echo(Intent::Solver)]).unwrap();
        match registry.dispatch(Intent::Solver, ServiceRequest::text(" hi ")).await.unwrap() {
            ServiceReply::Chat(reply) => {
                assert_eq!(reply.intent, Intent::Solver);
                assert_eq!(reply.reply, "hi");
            }
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[test]
    fn test_registry_must_cover_every_intent() {
        assert!(ServiceRegistry::new(vec![echo(Intent::Chat), echo(Intent::Solver)]).is_err());
        assert!(ServiceRegistry::new(vec![
            echo(Intent::Chat),
            echo(Intent::Chat),
            echo(Intent::Animation),
            echo(Intent::Solver)
        ])
        .is_err());
    }
}
