//! # ICeCream Common Library
//!
//! Shared code for the ICeCream gateway:
//! - Error type
//! - Configuration loading (environment + TOML)
//! - Domain model (students, rosters, intents)

pub mod config;
pub mod error;
pub mod model;

pub use config::GatewayConfig;
pub use error::{Error, Result};
pub use model::{Gender, Intent, Roster, Student};
