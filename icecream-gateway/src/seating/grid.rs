//! Seat grid model
//!
//! On the wire a layout is a `rows × cols` array whose cells are a student id,
//! `null` (empty seat) or the `"_aisle_"` marker. Generated layouts are parsed
//! without trusting their shape: rows may be ragged and cells may hold any
//! JSON value.

use super::SeatingError;
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeSet;

/// Wire marker for an aisle cell
pub const AISLE_MARKER: &str = "_aisle_";

/// Largest accepted row or column count
pub const MAX_DIMENSION: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cell {
    Student(String),
    Aisle,
    Empty,
}

impl Cell {
    /// Interpret one generated cell
    ///
    /// Non-string scalars become (foreign) ids so that they are counted and
    /// cleared by repair rather than silently dropped.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Null => Cell::Empty,
            Value::String(s) if s == AISLE_MARKER => Cell::Aisle,
            Value::String(s) if s.trim().is_empty() => Cell::Empty,
            Value::String(s) => Cell::Student(s.clone()),
            other => Cell::Student(other.to_string()),
        }
    }

    pub fn student_id(&self) -> Option<&str> {
        match self {
            Cell::Student(id) => Some(id),
            _ => None,
        }
    }
}

impl Serialize for Cell {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Cell::Student(id) => serializer.serialize_str(id),
            Cell::Aisle => serializer.serialize_str(AISLE_MARKER),
            Cell::Empty => serializer.serialize_none(),
        }
    }
}

/// Row-major grid of cells; may be ragged until normalised
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SeatGrid {
    rows: Vec<Vec<Cell>>,
}

impl SeatGrid {
    pub fn new(rows: Vec<Vec<Cell>>) -> Self {
        Self { rows }
    }

    /// Parse a generated `layout` value
    ///
    /// # Errors
    /// [`SeatingError::GeneratorMalformed`] when the value is not an array.
    /// A row that is not an array is kept as an empty row.
    pub fn from_value(value: &Value) -> Result<Self, SeatingError> {
        let rows = value.as_array().ok_or_else(|| {
            SeatingError::GeneratorMalformed("layout is not an array of rows".to_string())
        })?;

        Ok(Self {
            rows: rows
                .iter()
                .map(|row| {
                    row.as_array()
                        .map(|cells| cells.iter().map(Cell::from_value).collect())
                        .unwrap_or_default()
                })
                .collect(),
        })
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn get(&self, row: usize, col: usize) -> Option<&Cell> {
        self.rows.get(row).and_then(|r| r.get(col))
    }

    pub(crate) fn set(&mut self, row: usize, col: usize, cell: Cell) {
        if let Some(slot) = self.rows.get_mut(row).and_then(|r| r.get_mut(col)) {
            *slot = cell;
        }
    }

    /// Whether the grid is exactly `rows × cols`
    pub fn has_dimensions(&self, rows: usize, cols: usize) -> bool {
        self.rows.len() == rows && self.rows.iter().all(|r| r.len() == cols)
    }

    /// Truncate or pad with empty cells to exactly `rows × cols`
    pub(crate) fn resize(&mut self, rows: usize, cols: usize) {
        self.rows.resize_with(rows, Vec::new);
        for row in &mut self.rows {
            row.resize(cols, Cell::Empty);
        }
    }

    /// `(row, col, cell)` in row-major order
    pub fn cells(&self) -> impl Iterator<Item = (usize, usize, &Cell)> {
        self.rows
            .iter()
            .enumerate()
            .flat_map(|(r, row)| row.iter().enumerate().map(move |(c, cell)| (r, c, cell)))
    }

    /// Seated ids in row-major order, duplicates included
    pub fn student_ids(&self) -> impl Iterator<Item = &str> {
        self.cells().filter_map(|(_, _, cell)| cell.student_id())
    }
}

/// Aisle declaration: whole columns, plus optionally whole rows
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AisleSpec {
    columns: BTreeSet<usize>,
    rows: BTreeSet<usize>,
}

impl AisleSpec {
    pub fn new(columns: impl IntoIterator<Item = usize>, rows: impl IntoIterator<Item = usize>) -> Self {
        Self {
            columns: columns.into_iter().collect(),
            rows: rows.into_iter().collect(),
        }
    }

    pub fn from_columns(columns: impl IntoIterator<Item = usize>) -> Self {
        Self {
            columns: columns.into_iter().collect(),
            rows: BTreeSet::new(),
        }
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn columns(&self) -> impl Iterator<Item = usize> + '_ {
        self.columns.iter().copied()
    }

    pub fn rows(&self) -> impl Iterator<Item = usize> + '_ {
        self.rows.iter().copied()
    }

    /// Number of aisle cells inside a `rows × cols` grid
    fn cell_count(&self, rows: usize, cols: usize) -> usize {
        let aisle_cols = self.columns.range(..cols).count();
        let aisle_rows = self.rows.range(..rows).count();
        (aisle_cols * rows + aisle_rows * cols).saturating_sub(aisle_cols * aisle_rows)
    }

    pub fn is_aisle(&self, row: usize, col: usize) -> bool {
        self.columns.contains(&col) || self.rows.contains(&row)
    }
}

/// Classroom shape the layout must fit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classroom {
    pub rows: usize,
    pub cols: usize,
    pub aisles: AisleSpec,
}

impl Classroom {
    /// # Errors
    /// [`SeatingError::InvalidDimensions`] for a zero row or column count, or
    /// one above [`MAX_DIMENSION`].
    pub fn new(rows: usize, cols: usize, aisles: AisleSpec) -> Result<Self, SeatingError> {
        if rows == 0 || cols == 0 {
            return Err(SeatingError::InvalidDimensions(format!(
                "{} rows × {} cols; both must be at least 1",
                rows, cols
            )));
        }
        if rows > MAX_DIMENSION || cols > MAX_DIMENSION {
            return Err(SeatingError::InvalidDimensions(format!(
                "{} rows × {} cols; at most {} of each",
                rows, cols, MAX_DIMENSION
            )));
        }
        Ok(Self { rows, cols, aisles })
    }

    pub fn is_aisle(&self, row: usize, col: usize) -> bool {
        self.aisles.is_aisle(row, col)
    }

    /// Number of non-aisle cells
    ///
    /// Aisle indices outside the grid do not reduce capacity.
    pub fn seat_count(&self) -> usize {
        self.rows
            .saturating_mul(self.cols)
            .saturating_sub(self.aisles.cell_count(self.rows, self.cols))
    }
}
