//! Roster construction
//!
//! Two ways to obtain a [`Roster`](icecream_common::Roster):
//! - **extractor** - semantic extraction from noisy recognised text via a
//!   reasoning provider
//! - **manual** - deterministic parsing of a pasted spreadsheet/text list

pub mod extractor;
pub mod manual;

pub use extractor::RosterExtractor;
pub use manual::{parse_pasted_roster, PastedRoster};
