//! Pasted roster parsing
//!
//! Deterministic fallback for users who paste a list from a spreadsheet or
//! type one student per line. Field separators are tried in order: tab, a run
//! of two or more spaces, then ASCII or full-width comma. A line with no
//! separator is a bare name.

use icecream_common::{Gender, Roster, Student};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PastedRoster {
    pub students: Roster,
    pub has_gender: bool,
    pub has_grade: bool,
}

/// Parse pasted text into a roster with ids `s001`, `s002`, ... in line order
pub fn parse_pasted_roster(text: &str) -> PastedRoster {
    let students: Vec<Student> = text
        .split(['\n', '\r'])
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(parse_line)
        .enumerate()
        .map(|(index, mut student)| {
            student.id = format!("s{:03}", index + 1);
            student
        })
        .collect();

    let has_gender = students.iter().any(|s| s.gender.is_some());
    let has_grade = students.iter().any(|s| s.grade.is_some());

    PastedRoster {
        students: Roster::new(students).unwrap_or_default(),
        has_gender,
        has_grade,
    }
}

fn parse_line(line: &str) -> Option<Student> {
    let fields = split_fields(line);
    let name = fields.first()?.trim();
    if name.is_empty() {
        return None;
    }

    let mut student = Student::new(String::new(), name);
    student.gender = fields.get(1).and_then(|g| Gender::parse_loose(g));
    student.grade = fields.get(2).and_then(|g| g.trim().parse::<f64>().ok());
    Some(student)
}

fn split_fields(line: &str) -> Vec<&str> {
    if line.contains('\t') {
        return line.split('\t').map(str::trim).collect();
    }
    if line.contains("  ") {
        return split_on_space_runs(line);
    }
    if line.contains([',', '，']) {
        return line.split([',', '，']).map(str::trim).collect();
    }
    vec![line]
}

/// Split on runs of two or more spaces; single spaces stay inside a field
fn split_on_space_runs(line: &str) -> Vec<&str> {
    let mut fields = Vec::new();
    let mut rest = line;
    while let Some(idx) = rest.find("  ") {
        fields.push(rest[..idx].trim());
        rest = rest[idx..].trim_start_matches(' ');
    }
    fields.push(rest.trim());
    fields
}
