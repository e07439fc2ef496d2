//! Layout validation against the roster
//!
//! A generated layout is valid when it has the classroom's exact dimensions,
//! seats every roster id exactly once, seats nothing outside the roster and
//! leaves every aisle coordinate free of students.

use super::grid::{Classroom, SeatGrid};
use icecream_common::Roster;
use serde::Serialize;
use std::collections::HashSet;

/// One reason a layout fails validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LayoutIssue {
    WrongDimensions { rows: usize, cols: usize },
    Duplicate { id: String, row: usize, col: usize },
    Foreign { id: String, row: usize, col: usize },
    AisleOccupied { id: String, row: usize, col: usize },
    Missing { id: String },
}

pub struct LayoutValidator<'a> {
    roster: &'a Roster,
    classroom: &'a Classroom,
}

impl<'a> LayoutValidator<'a> {
    pub fn new(roster: &'a Roster, classroom: &'a Classroom) -> Self {
        Self { roster, classroom }
    }

    /// All issues in row-major scan order, missing ids last in roster order
    pub fn issues(&self, grid: &SeatGrid) -> Vec<LayoutIssue> {
        let mut issues = Vec::new();

        if !grid.has_dimensions(self.classroom.rows, self.classroom.cols) {
            issues.push(LayoutIssue::WrongDimensions {
                rows: self.classroom.rows,
                cols: self.classroom.cols,
            });
        }

        let mut seen: HashSet<&str> = HashSet::new();
        for (row, col, cell) in grid.cells() {
            let Some(id) = cell.student_id() else {
                continue;
            };
            if !self.roster.contains(id) {
                issues.push(LayoutIssue::Foreign {
                    id: id.to_string(),
                    row,
                    col,
                });
            } else if self.classroom.is_aisle(row, col) {
                issues.push(LayoutIssue::AisleOccupied {
                    id: id.to_string(),
                    row,
                    col,
                });
            } else if !seen.insert(id) {
                issues.push(LayoutIssue::Duplicate {
                    id: id.to_string(),
                    row,
                    col,
                });
            }
        }

        issues.extend(
            self.roster
                .ids()
                .filter(|id| !seen.contains(id))
                .map(|id| LayoutIssue::Missing { id: id.to_string() }),
        );

        issues
    }

    pub fn is_valid(&self, grid: &SeatGrid) -> bool {
        self.issues(grid).is_empty()
    }
}
