//! Domain model shared across the gateway
//!
//! Students and rosters live only for the duration of one planning session;
//! nothing here is persisted.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Student gender as used by the seating strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gender {
    #[serde(rename = "M")]
    Male,
    #[serde(rename = "F")]
    Female,
}

impl Gender {
    /// Interpret a loosely formatted gender field ("M", "女", "female", ...)
    pub fn parse_loose(raw: &str) -> Option<Self> {
        let value = raw.trim().to_lowercase();
        if value.is_empty() {
            return None;
        }
        // "female" contains "male", so the female forms are checked first
        if value.contains('女') || value == "f" || value.starts_with("female") {
            Some(Gender::Female)
        } else if value.contains('男') || value == "m" || value.starts_with("male") {
            Some(Gender::Male)
        } else {
            None
        }
    }
}

/// A single student. Identity is `id`; the other fields are display attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<Gender>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grade: Option<f64>,
}

impl Student {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            gender: None,
            grade: None,
        }
    }
}

/// Ordered list of students with unique, non-empty ids
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Student>", into = "Vec<Student>")]
pub struct Roster {
    students: Vec<Student>,
}

impl Roster {
    /// Build a roster, rejecting empty or duplicate ids
    pub fn new(students: Vec<Student>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(students.len());
        for student in &students {
            if student.id.trim().is_empty() {
                return Err(Error::InvalidInput(format!(
                    "Student '{}' has an empty id",
                    student.name
                )));
            }
            if !seen.insert(student.id.as_str()) {
                return Err(Error::InvalidInput(format!(
                    "Duplicate student id: {}",
                    student.id
                )));
            }
        }
        Ok(Self { students })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn students(&self) -> &[Student] {
        &self.students
    }

    /// Student ids in roster order
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.students.iter().map(|s| s.id.as_str())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.students.iter().any(|s| s.id == id)
    }

    pub fn len(&self) -> usize {
        self.students.len()
    }

    pub fn is_empty(&self) -> bool {
        self.students.is_empty()
    }

    pub fn into_students(self) -> Vec<Student> {
        self.students
    }
}

impl TryFrom<Vec<Student>> for Roster {
    type Error = Error;

    fn try_from(students: Vec<Student>) -> Result<Self> {
        Roster::new(students)
    }
}

impl From<Roster> for Vec<Student> {
    fn from(roster: Roster) -> Self {
        roster.students
    }
}

/// Destination service for a user message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Chat,
    #[serde(alias = "manim")]
    Animation,
    Solver,
}

impl Intent {
    /// Every intent, in the order offered to the user for confirmation
    pub const ALL: [Intent; 3] = [Intent::Chat, Intent::Animation, Intent::Solver];

    /// Parse an intent name, accepting the legacy "manim" spelling
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "chat" => Some(Intent::Chat),
            "animation" | "manim" => Some(Intent::Animation),
            "solver" | "solve" => Some(Intent::Solver),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Chat => "chat",
            Intent::Animation => "animation",
            Intent::Solver => "solver",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
