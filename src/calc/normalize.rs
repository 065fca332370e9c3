use super::{Attendance, GradingComponent, MarkEntry, StudentInfo};
use crate::error::{CalcResult, ResultError};
use serde::Serialize;
use serde_json::json;
use std::collections::{HashMap, HashSet};

/// Working value of one (student, component) cell.
///
/// `Missing` is a present student with no mark yet: it contributes zero but
/// still counts toward the maximum. `Exempt` counts toward neither.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum MarkValue {
    Scored(f64),
    Missing,
    Exempt(Attendance),
}

impl MarkValue {
    pub fn from_entry(entry: &MarkEntry) -> Self {
        if !entry.attendance.is_present() {
            return MarkValue::Exempt(entry.attendance);
        }
        match entry.marks_obtained {
            Some(v) => MarkValue::Scored(v),
            None => MarkValue::Missing,
        }
    }

    pub fn is_exempt(&self) -> bool {
        matches!(self, MarkValue::Exempt(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedEntry {
    pub student_id: String,
    pub component_id: String,
    pub value: MarkValue,
}

/// Entry-boundary checks for a single mark. Marks of non-present entries are
/// ignored downstream, so only present marks are range-checked.
pub fn validate_entry(entry: &MarkEntry, component: &GradingComponent) -> CalcResult<()> {
    if !entry.attendance.is_present() {
        return Ok(());
    }
    let Some(v) = entry.marks_obtained else {
        return Ok(());
    };
    let at = json!({
        "studentId": entry.student_id,
        "componentId": entry.component_id,
        "marksObtained": v,
        "maxMarks": component.max_marks
    });
    if !v.is_finite() {
        return Err(ResultError::validation("marks must be a finite number").with_details(at));
    }
    if v < 0.0 {
        return Err(ResultError::validation("negative marks are not allowed").with_details(at));
    }
    if v > component.max_marks {
        return Err(ResultError::validation("marks exceed component maximum").with_details(at));
    }
    Ok(())
}

/// Produces one entry per (roster student, component), in roster order then
/// component order. Pairs without a stored entry become `Missing`; entries
/// outside the roster or the component list are ignored.
pub fn normalize(
    raw_entries: &[MarkEntry],
    components: &[GradingComponent],
    roster: &[StudentInfo],
) -> CalcResult<Vec<NormalizedEntry>> {
    let by_component: HashMap<&str, &GradingComponent> = components
        .iter()
        .map(|c| (c.component_id.as_str(), c))
        .collect();
    let on_roster: HashSet<&str> = roster.iter().map(|s| s.student_id.as_str()).collect();

    let mut by_pair: HashMap<(&str, &str), MarkValue> = HashMap::new();
    for entry in raw_entries {
        let Some(component) = by_component.get(entry.component_id.as_str()) else {
            continue;
        };
        if !on_roster.contains(entry.student_id.as_str()) {
            continue;
        }
        validate_entry(entry, component)?;
        let key = (entry.student_id.as_str(), entry.component_id.as_str());
        if by_pair.insert(key, MarkValue::from_entry(entry)).is_some() {
            return Err(ResultError::validation("duplicate mark entry").with_details(json!({
                "studentId": entry.student_id,
                "componentId": entry.component_id
            })));
        }
    }

    let mut out = Vec::with_capacity(roster.len() * components.len());
    for student in roster {
        for component in components {
            let value = by_pair
                .get(&(student.student_id.as_str(), component.component_id.as_str()))
                .copied()
                .unwrap_or(MarkValue::Missing);
            out.push(NormalizedEntry {
                student_id: student.student_id.clone(),
                component_id: component.component_id.clone(),
                value,
            });
        }
    }
    tracing::debug!(
        students = roster.len(),
        components = components.len(),
        stored = by_pair.len(),
        "normalized marks"
    );
    Ok(out)
}
