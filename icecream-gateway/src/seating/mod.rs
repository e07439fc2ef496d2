//! Seating planner
//!
//! Turns a roster plus classroom constraints into a seating chart. The layout
//! itself comes from an external generator and is treated as hostile input:
//! [`validator`] checks it against the roster and [`repair`] restores the
//! bijection invariant (every roster id seated exactly once, nothing else
//! seated, aisles empty) without calling the generator again.

pub mod constraints;
pub mod grid;
pub mod planner;
pub mod repair;
pub mod validator;

pub use constraints::{ConstraintKind, ConstraintParser, ParsedConstraints, Priority, SeatingConstraint};
pub use grid::{AisleSpec, Cell, Classroom, SeatGrid, AISLE_MARKER};
pub use planner::{PlanOutcome, PlanRequest, SeatingPlanner};
pub use repair::{reconcile, ReconcileOutcome, RepairReport};
pub use validator::{LayoutIssue, LayoutValidator};

use crate::types::ProviderError;
use thiserror::Error;

/// Seating planner errors
#[derive(Debug, Error)]
pub enum SeatingError {
    /// Roster empty or with duplicate ids
    #[error("Invalid roster: {0}")]
    InvalidRoster(String),

    #[error("Invalid classroom dimensions: {0}")]
    InvalidDimensions(String),

    /// Checked before the generator is called
    #[error("Not enough seats: {seats} seats for {students} students")]
    InsufficientSeats { seats: usize, students: usize },

    /// Generator output is not the mandated JSON structure
    #[error("Layout generator returned malformed output: {0}")]
    GeneratorMalformed(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}
