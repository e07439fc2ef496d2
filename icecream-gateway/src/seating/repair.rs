//! Deterministic layout repair
//!
//! Single pass over a generated layout that restores the bijection between
//! roster ids and non-aisle seats:
//! 1. Normalise to `rows × cols`, mark aisle coordinates
//! 2. Row-major: clear foreign ids, students on aisles, and every repeat of an
//!    id already seen (first occurrence wins)
//! 3. Place missing ids, in roster order, into empty non-aisle cells row-major
//!
//! A layout that already validates is returned untouched. Repaired placements
//! are not re-scored against the planning constraints; they are listed in the
//! [`RepairReport`] so callers can re-check them.

use super::grid::{Cell, Classroom, SeatGrid};
use super::validator::LayoutValidator;
use icecream_common::Roster;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use tracing::{error, info, warn};

/// Coordinate plus the id it held or received
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeatRef {
    pub row: usize,
    pub col: usize,
    pub id: String,
}

/// What repair changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    pub repaired: bool,
    pub dimensions_adjusted: bool,
    pub duplicates_cleared: Vec<SeatRef>,
    pub foreign_cleared: Vec<SeatRef>,
    pub aisle_violations_cleared: Vec<SeatRef>,
    pub placed: Vec<SeatRef>,
    /// Roster ids that found no free seat
    pub shortfall: Vec<String>,
}

impl RepairReport {
    pub fn has_shortfall(&self) -> bool {
        !self.shortfall.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileOutcome {
    pub layout: SeatGrid,
    pub report: RepairReport,
    /// Generator's advisory list, passed through unchanged
    pub unsatisfied: Vec<Value>,
}

/// Validate `generated` against `roster` and repair it when needed
pub fn reconcile(
    roster: &Roster,
    generated: SeatGrid,
    classroom: &Classroom,
    unsatisfied: Vec<Value>,
) -> ReconcileOutcome {
    let validator = LayoutValidator::new(roster, classroom);
    let issues = validator.issues(&generated);
    if issues.is_empty() {
        return ReconcileOutcome {
            layout: generated,
            report: RepairReport::default(),
            unsatisfied,
        };
    }

    warn!(issues = issues.len(), "Generated layout failed validation, repairing");
    let (layout, report) = repair(roster, generated, classroom);

    if report.has_shortfall() {
        error!(
            unplaced = report.shortfall.len(),
            "Layout repair could not seat every student"
        );
    } else if !validator.is_valid(&layout) {
        error!("Repaired layout still fails validation");
    } else {
        info!(
            duplicates = report.duplicates_cleared.len(),
            foreign = report.foreign_cleared.len(),
            aisle = report.aisle_violations_cleared.len(),
            placed = report.placed.len(),
            "Layout repaired"
        );
    }

    ReconcileOutcome {
        layout,
        report,
        unsatisfied,
    }
}

fn repair(roster: &Roster, mut grid: SeatGrid, classroom: &Classroom) -> (SeatGrid, RepairReport) {
    let mut report = RepairReport {
        repaired: true,
        dimensions_adjusted: !grid.has_dimensions(classroom.rows, classroom.cols),
        ..RepairReport::default()
    };
    grid.resize(classroom.rows, classroom.cols);

    let mut seen: HashSet<String> = HashSet::new();
    let mut free: Vec<(usize, usize)> = Vec::new();

    for row in 0..classroom.rows {
        for col in 0..classroom.cols {
            let cell = grid.get(row, col).cloned().unwrap_or(Cell::Empty);

            if classroom.is_aisle(row, col) {
                if let Cell::Student(id) = cell {
                    report.aisle_violations_cleared.push(SeatRef { row, col, id });
                }
                grid.set(row, col, Cell::Aisle);
                continue;
            }

            match cell {
                Cell::Student(id) if !roster.contains(&id) => {
                    report.foreign_cleared.push(SeatRef { row, col, id });
                }
                Cell::Student(id) if seen.contains(&id) => {
                    report.duplicates_cleared.push(SeatRef { row, col, id });
                }
                Cell::Student(id) => {
                    seen.insert(id);
                    continue;
                }
                // Stray marker outside a declared aisle is a free seat
                Cell::Aisle | Cell::Empty => {}
            }
            grid.set(row, col, Cell::Empty);
            free.push((row, col));
        }
    }

    let mut missing: VecDeque<String> = roster
        .ids()
        .filter(|id| !seen.contains(*id))
        .map(str::to_string)
        .collect();

    for (row, col) in free {
        let Some(id) = missing.pop_front() else {
            break;
        };
        grid.set(row, col, Cell::Student(id.clone()));
        report.placed.push(SeatRef { row, col, id });
    }

    report.shortfall = missing.into_iter().collect();
    (grid, report)
}
