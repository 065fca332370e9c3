use crate::calc::aggregate::{SummaryCell, SummaryInput};
use crate::calc::normalize::{validate_entry, MarkValue};
use crate::calc::scheme::load_component;
use crate::calc::{Attendance, GradingComponent, MarkEntry, StudentInfo, SubjectInfo, TermInfo};
use crate::error::{CalcResult, ResultError};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::json;
use std::collections::{BTreeMap, HashMap, HashSet};

fn placeholders(n: usize) -> String {
    std::iter::repeat("?").take(n).collect::<Vec<_>>().join(",")
}

pub fn class_name(conn: &Connection, class_id: &str) -> CalcResult<String> {
    conn.query_row("SELECT name FROM classes WHERE id = ?", [class_id], |r| {
        r.get(0)
    })
    .optional()?
    .ok_or_else(|| {
        ResultError::not_found("class not found").with_details(json!({ "classId": class_id }))
    })
}

/// Active students of a class (optionally one section), by roll number.
pub fn load_roster(
    conn: &Connection,
    class_id: &str,
    section_id: Option<&str>,
) -> CalcResult<Vec<StudentInfo>> {
    class_name(conn, class_id)?;
    if let Some(section_id) = section_id {
        let exists: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM sections WHERE id = ? AND class_id = ?",
                (section_id, class_id),
                |r| r.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(ResultError::not_found("section not found")
                .with_details(json!({ "classId": class_id, "sectionId": section_id })));
        }
    }

    let mut stmt = conn.prepare(
        "SELECT id, roll_number, display_name
         FROM students
         WHERE class_id = ?1 AND active = 1 AND (?2 IS NULL OR section_id = ?2)
         ORDER BY roll_number, display_name, id",
    )?;
    let roster = stmt
        .query_map((class_id, section_id), |r| {
            Ok(StudentInfo {
                student_id: r.get(0)?,
                roll_number: r.get(1)?,
                name: r.get(2)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(roster)
}

pub fn load_subject(conn: &Connection, subject_id: &str) -> CalcResult<SubjectInfo> {
    conn.query_row(
        "SELECT id, name FROM subjects WHERE id = ?",
        [subject_id],
        |r| {
            Ok(SubjectInfo {
                subject_id: r.get(0)?,
                name: r.get(1)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| {
        ResultError::not_found("subject not found").with_details(json!({ "subjectId": subject_id }))
    })
}

pub fn load_terms(conn: &Connection, term_ids: &[String]) -> CalcResult<Vec<TermInfo>> {
    if term_ids.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT id, name, weight_share FROM terms WHERE id IN ({}) ORDER BY sort_order, id",
        placeholders(term_ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let terms = stmt
        .query_map(params_from_iter(term_ids.iter()), |r| {
            Ok(TermInfo {
                term_id: r.get(0)?,
                name: r.get(1)?,
                weight_share: r.get(2)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    if let Some(missing) = term_ids
        .iter()
        .find(|id| !terms.iter().any(|t| &t.term_id == *id))
    {
        return Err(ResultError::not_found("term not found").with_details(json!({ "termId": missing })));
    }
    Ok(terms)
}

fn attendance_from_store(
    code: &str,
    student_id: &str,
    component_id: &str,
) -> CalcResult<Attendance> {
    Attendance::parse(code).map_err(|_| {
        ResultError::validation("stored attendance code is malformed").with_details(json!({
            "studentId": student_id,
            "componentId": component_id,
            "attendance": code
        }))
    })
}

/// Stored marks for the given students x components. Pairs never entered are
/// simply absent from the result.
pub fn load_marks(
    conn: &Connection,
    student_ids: &[String],
    component_ids: &[String],
) -> CalcResult<Vec<MarkEntry>> {
    if student_ids.is_empty() || component_ids.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT student_id, component_id, marks_obtained, attendance
         FROM marks
         WHERE component_id IN ({}) AND student_id IN ({})
         ORDER BY student_id, component_id",
        placeholders(component_ids.len()),
        placeholders(student_ids.len())
    );
    let mut bind_values: Vec<Value> = Vec::with_capacity(component_ids.len() + student_ids.len());
    for id in component_ids {
        bind_values.push(Value::Text(id.clone()));
    }
    for id in student_ids {
        bind_values.push(Value::Text(id.clone()));
    }

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(bind_values), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, Option<f64>>(2)?,
                r.get::<_, String>(3)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;

    rows.into_iter()
        .map(|(student_id, component_id, marks_obtained, code)| {
            let attendance = attendance_from_store(&code, &student_id, &component_id)?;
            Ok(MarkEntry {
                student_id,
                component_id,
                marks_obtained,
                attendance,
            })
        })
        .collect()
}

/// Writes a batch of marks, all or nothing. Lock state and maxima are read
/// fresh from the store inside the write transaction, right before the
/// batch is applied.
pub fn save_marks(conn: &Connection, entries: &[MarkEntry]) -> CalcResult<usize> {
    let tx = conn.unchecked_transaction()?;

    let mut components: HashMap<&str, GradingComponent> = HashMap::new();
    let mut component_classes: HashMap<&str, String> = HashMap::new();
    for entry in entries {
        if !components.contains_key(entry.component_id.as_str()) {
            let component = load_component(&tx, &entry.component_id)?;
            let class_id: String = tx.query_row(
                "SELECT s.class_id FROM components c JOIN schemes s ON s.id = c.scheme_id
                 WHERE c.id = ?",
                [&entry.component_id],
                |r| r.get(0),
            )?;
            components.insert(entry.component_id.as_str(), component);
            component_classes.insert(entry.component_id.as_str(), class_id);
        }
    }
    if let Some(locked) = components.values().find(|c| c.is_locked) {
        return Err(ResultError::locked("component is locked; unlock it before editing marks")
            .with_details(json!({
                "componentId": locked.component_id,
                "subjectId": locked.subject_id
            })));
    }

    let mut seen: HashSet<(&str, &str)> = HashSet::new();
    let mut student_classes: HashMap<&str, String> = HashMap::new();
    for entry in entries {
        if !seen.insert((entry.student_id.as_str(), entry.component_id.as_str())) {
            return Err(ResultError::validation("duplicate mark entry in batch").with_details(
                json!({ "studentId": entry.student_id, "componentId": entry.component_id }),
            ));
        }
        if !student_classes.contains_key(entry.student_id.as_str()) {
            let class_id: Option<String> = tx
                .query_row(
                    "SELECT class_id FROM students WHERE id = ?",
                    [&entry.student_id],
                    |r| r.get(0),
                )
                .optional()?;
            let Some(class_id) = class_id else {
                return Err(ResultError::not_found("student not found")
                    .with_details(json!({ "studentId": entry.student_id })));
            };
            student_classes.insert(entry.student_id.as_str(), class_id);
        }
        let student_class = student_classes.get(entry.student_id.as_str());
        let component_class = component_classes.get(entry.component_id.as_str());
        if student_class != component_class {
            return Err(ResultError::validation(
                "component belongs to a different class than the student",
            )
            .with_details(json!({
                "studentId": entry.student_id,
                "componentId": entry.component_id,
                "studentClassId": student_class,
                "componentClassId": component_class
            })));
        }
        if let Some(component) = components.get(entry.component_id.as_str()) {
            validate_entry(entry, component)?;
        }
    }

    let now = chrono::Utc::now().to_rfc3339();
    for entry in entries {
        tx.execute(
            "INSERT INTO marks(student_id, component_id, marks_obtained, attendance, updated_at)
             VALUES(?, ?, ?, ?, ?)
             ON CONFLICT(student_id, component_id) DO UPDATE SET
               marks_obtained = excluded.marks_obtained,
               attendance = excluded.attendance,
               updated_at = excluded.updated_at",
            (
                &entry.student_id,
                &entry.component_id,
                entry.marks_obtained,
                entry.attendance.as_str(),
                &now,
            ),
        )?;
    }
    tx.commit()?;
    tracing::info!(entries = entries.len(), "marks saved");
    Ok(entries.len())
}

/// Class totals per component over the roster, for the footer row. A
/// roster student without a stored entry counts as present with no mark.
pub fn class_summary(
    conn: &Connection,
    label: &str,
    roster: &[StudentInfo],
    components: &[GradingComponent],
) -> CalcResult<SummaryInput> {
    let student_ids: Vec<String> = roster.iter().map(|s| s.student_id.clone()).collect();
    let component_ids: Vec<String> = components.iter().map(|c| c.component_id.clone()).collect();
    let marks = load_marks(conn, &student_ids, &component_ids)?;

    let mut totals: BTreeMap<String, (f64, u32)> = components
        .iter()
        .map(|c| (c.component_id.clone(), (0.0, 0)))
        .collect();
    for m in &marks {
        let Some(entry) = totals.get_mut(&m.component_id) else {
            continue;
        };
        if MarkValue::from_entry(m).is_exempt() {
            entry.1 += 1;
        } else {
            entry.0 += m.marks_obtained.unwrap_or(0.0);
        }
    }
    let roster_len = u32::try_from(roster.len()).unwrap_or(u32::MAX);
    let cells = totals
        .into_iter()
        .map(|(id, (total, exempt))| {
            (
                id,
                SummaryCell {
                    total,
                    count: roster_len.saturating_sub(exempt),
                },
            )
        })
        .collect();
    Ok(SummaryInput {
        label: label.to_string(),
        cells,
    })
}
