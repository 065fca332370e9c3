//! Result aggregation pipeline: scheme resolution, mark normalization,
//! aggregation and report formatting. Each stage consumes the previous
//! stage's output and produces a new value; nothing is mutated in place.

pub mod aggregate;
pub mod format;
pub mod grading;
pub mod normalize;
pub mod pipeline;
pub mod scheme;

use crate::error::{CalcResult, ResultError};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Attendance code recorded with a mark. Anything but `P` exempts the
/// component for that student.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Attendance {
    #[serde(rename = "P")]
    Present,
    #[serde(rename = "A")]
    Absent,
    #[serde(rename = "L")]
    Leave,
    #[serde(rename = "ACT")]
    Alternate,
    #[serde(rename = "LA")]
    LongAbsence,
    #[serde(rename = "ML")]
    MedicalLeave,
    #[serde(rename = "X")]
    Exempt,
}

impl Attendance {
    pub fn parse(code: &str) -> CalcResult<Self> {
        match code.trim().to_ascii_uppercase().as_str() {
            "P" => Ok(Self::Present),
            "A" => Ok(Self::Absent),
            "L" => Ok(Self::Leave),
            "ACT" => Ok(Self::Alternate),
            "LA" => Ok(Self::LongAbsence),
            "ML" => Ok(Self::MedicalLeave),
            "X" => Ok(Self::Exempt),
            _ => Err(ResultError::validation(
                "attendance must be one of: P, A, L, ACT, LA, ML, X",
            )
            .with_details(json!({ "attendance": code }))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Present => "P",
            Self::Absent => "A",
            Self::Leave => "L",
            Self::Alternate => "ACT",
            Self::LongAbsence => "LA",
            Self::MedicalLeave => "ML",
            Self::Exempt => "X",
        }
    }

    pub fn is_present(self) -> bool {
        self == Self::Present
    }
}

impl Default for Attendance {
    fn default() -> Self {
        Self::Present
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradingComponent {
    pub component_id: String,
    pub subject_id: String,
    pub term_id: Option<String>,
    pub name: String,
    pub abbreviation: String,
    pub max_marks: f64,
    pub weightage_percent: f64,
    pub is_locked: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkEntry {
    pub student_id: String,
    pub component_id: String,
    #[serde(default)]
    pub marks_obtained: Option<f64>,
    #[serde(default)]
    pub attendance: Attendance,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentInfo {
    pub student_id: String,
    pub roll_number: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubjectInfo {
    pub subject_id: String,
    pub name: String,
}

/// A grading period. `weight_share` is the percent this term contributes to
/// a multi-term final result; it must be set explicitly to be combined.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TermInfo {
    pub term_id: String,
    pub name: String,
    pub weight_share: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct CalcContext<'a> {
    pub conn: &'a Connection,
    pub class_id: &'a str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attendance_parse_accepts_known_codes_case_insensitively() {
        assert_eq!(Attendance::parse("p").expect("p"), Attendance::Present);
        assert_eq!(Attendance::parse("ACT").expect("act"), Attendance::Alternate);
        assert_eq!(Attendance::parse(" ml ").expect("ml"), Attendance::MedicalLeave);
        assert!(Attendance::parse("Z").is_err());
        assert!(!Attendance::Absent.is_present());
    }

    #[test]
    fn mark_entry_defaults_to_present_with_no_mark() {
        let entry: MarkEntry = serde_json::from_value(json!({
            "student_id": "s1",
            "component_id": "c1"
        }))
        .expect("deserialize");
        assert_eq!(entry.attendance, Attendance::Present);
        assert_eq!(entry.marks_obtained, None);

        let absent: MarkEntry = serde_json::from_value(json!({
            "student_id": "s1",
            "component_id": "c1",
            "marks_obtained": 12,
            "attendance": "A"
        }))
        .expect("deserialize");
        assert_eq!(absent.attendance, Attendance::Absent);
    }
}
