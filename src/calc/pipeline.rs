use super::aggregate::{aggregate, AggregateInput, AggregateResult};
use super::grading::load_scale;
use super::normalize::normalize;
use super::scheme::{resolve_selection, SubjectSelection};
use super::{CalcContext, GradingComponent};
use crate::error::{CalcResult, ResultError};
use crate::store;
use serde_json::json;
use std::collections::{BTreeSet, HashSet};

pub const SUMMARY_LABEL: &str = "Class Total";

#[derive(Debug, Clone, PartialEq)]
pub struct ReportRequest {
    pub section_id: Option<String>,
    pub selections: Vec<SubjectSelection>,
    pub include_summary: bool,
}

/// Resolves, normalizes and aggregates one classwise report. Reads only;
/// every stage works on its own copy of the data.
pub fn compute_report_model(
    ctx: &CalcContext<'_>,
    request: &ReportRequest,
) -> CalcResult<AggregateResult> {
    if request.selections.is_empty() {
        return Err(ResultError::validation("select at least one subject"));
    }
    let mut seen: HashSet<&str> = HashSet::new();
    for selection in &request.selections {
        if !seen.insert(selection.subject_id()) {
            return Err(ResultError::validation("subject selected more than once")
                .with_details(json!({ "subjectId": selection.subject_id() })));
        }
    }

    let roster = store::load_roster(ctx.conn, ctx.class_id, request.section_id.as_deref())?;

    let mut subjects = Vec::with_capacity(request.selections.len());
    let mut components: Vec<GradingComponent> = Vec::new();
    for selection in &request.selections {
        subjects.push(store::load_subject(ctx.conn, selection.subject_id())?);
        components.extend(resolve_selection(ctx.conn, ctx.class_id, selection)?);
    }

    let student_ids: Vec<String> = roster.iter().map(|s| s.student_id.clone()).collect();
    let component_ids: Vec<String> = components.iter().map(|c| c.component_id.clone()).collect();
    let raw = store::load_marks(ctx.conn, &student_ids, &component_ids)?;
    let entries = normalize(&raw, &components, &roster)?;

    let term_ids: Vec<String> = components
        .iter()
        .filter_map(|c| c.term_id.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let terms = store::load_terms(ctx.conn, &term_ids)?;
    let scale = load_scale(ctx.conn)?;

    let summary = if request.include_summary {
        Some(store::class_summary(
            ctx.conn,
            SUMMARY_LABEL,
            &roster,
            &components,
        )?)
    } else {
        None
    };

    let result = aggregate(&AggregateInput {
        subjects: &subjects,
        components: &components,
        roster: &roster,
        entries: &entries,
        terms: &terms,
        scale: &scale,
        summary: summary.as_ref(),
    })?;
    tracing::info!(
        class_id = ctx.class_id,
        students = result.students.len(),
        subjects = subjects.len(),
        components = components.len(),
        "report model computed"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calc::scheme::{define_scheme, ComponentDraft, SchemeScope, SelectionScope};
    use crate::calc::{Attendance, MarkEntry};
    use crate::db;
    use rusqlite::Connection;
    use std::collections::BTreeMap;

    fn draft(id: &str, max: f64, weight: f64) -> ComponentDraft {
        ComponentDraft {
            component_id: Some(id.to_string()),
            name: id.to_uppercase(),
            abbreviation: None,
            max_marks: max,
            weightage_percent: weight,
        }
    }

    fn mark(student: &str, comp: &str, marks: Option<f64>, att: Attendance) -> MarkEntry {
        MarkEntry {
            student_id: student.to_string(),
            component_id: comp.to_string(),
            marks_obtained: marks,
            attendance: att,
        }
    }

    fn seeded() -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        db::init_schema(&conn).expect("schema");
        conn.execute_batch(
            "INSERT INTO classes(id, name) VALUES('c10', 'Class 10');
             INSERT INTO students(id, class_id, roll_number, display_name, active)
               VALUES('s1', 'c10', 1, 'Arun', 1), ('s2', 'c10', 2, 'Bina', 1);
             INSERT INTO subjects(id, name) VALUES('math', 'Mathematics'), ('sci', 'Science');
             INSERT INTO class_subjects(class_id, subject_id) VALUES('c10', 'math'), ('c10', 'sci');
             INSERT INTO exams(id, name) VALUES('ut1', 'Unit Test 1');
             INSERT INTO terms(id, name, weight_share, sort_order)
               VALUES('t1', 'Term 1', 40, 1), ('t2', 'Term 2', 60, 2);",
        )
        .expect("seed");
        define_scheme(
            &conn,
            "c10",
            "math",
            &SchemeScope::Exam("ut1".into()),
            &[draft("u1", 20.0, 40.0), draft("u2", 80.0, 60.0)],
        )
        .expect("math scheme");
        define_scheme(
            &conn,
            "c10",
            "sci",
            &SchemeScope::Term("t1".into()),
            &[draft("t1p", 50.0, 100.0)],
        )
        .expect("t1 scheme");
        define_scheme(
            &conn,
            "c10",
            "sci",
            &SchemeScope::Term("t2".into()),
            &[draft("t2p", 50.0, 100.0)],
        )
        .expect("t2 scheme");
        conn
    }

    fn math_exam() -> SubjectSelection {
        SubjectSelection::new(
            "math",
            SelectionScope::Exam {
                exam_id: "ut1".into(),
                component_ids: BTreeSet::new(),
            },
        )
        .expect("selection")
    }

    fn sci_terms() -> SubjectSelection {
        let mut map = BTreeMap::new();
        map.insert("t1".to_string(), BTreeSet::new());
        map.insert("t2".to_string(), BTreeSet::new());
        SubjectSelection::new("sci", SelectionScope::Terms(map)).expect("selection")
    }

    #[test]
    fn end_to_end_single_exam_and_multi_term() {
        let conn = seeded();
        store::save_marks(
            &conn,
            &[
                mark("s1", "u1", Some(18.0), Attendance::Present),
                mark("s1", "u2", Some(60.0), Attendance::Present),
                mark("s1", "t1p", Some(35.0), Attendance::Present),
                mark("s1", "t2p", Some(25.0), Attendance::Present),
                mark("s2", "u2", None, Attendance::Absent),
            ],
        )
        .expect("marks");

        let ctx = CalcContext {
            conn: &conn,
            class_id: "c10",
        };
        let result = compute_report_model(
            &ctx,
            &ReportRequest {
                section_id: None,
                selections: vec![math_exam(), sci_terms()],
                include_summary: true,
            },
        )
        .expect("report");

        assert_eq!(result.students.len(), 2);
        let s1 = &result.students[0];
        assert_eq!(s1.subjects[0].raw_total, 78.0);
        assert!((s1.subjects[0].weighted_total - 81.0).abs() < 1e-9);
        // 0.4 * 70 + 0.6 * 50
        assert!((s1.subjects[1].weighted_total - 58.0).abs() < 1e-9);
        assert_eq!(s1.subjects[1].term_breakdown.len(), 2);

        let s2 = &result.students[1];
        assert_eq!(s2.subjects[0].effective_max_raw, 20.0);
        assert_eq!(s2.subjects[0].effective_max_weightage, 40.0);

        let summary = result.summary.expect("summary");
        assert_eq!(summary.name, SUMMARY_LABEL);
    }

    #[test]
    fn computing_twice_gives_the_same_model() {
        let conn = seeded();
        store::save_marks(&conn, &[mark("s1", "u1", Some(7.5), Attendance::Present)])
            .expect("marks");
        let ctx = CalcContext {
            conn: &conn,
            class_id: "c10",
        };
        let request = ReportRequest {
            section_id: None,
            selections: vec![math_exam()],
            include_summary: false,
        };
        let a = compute_report_model(&ctx, &request).expect("first");
        let b = compute_report_model(&ctx, &request).expect("second");
        assert_eq!(a, b);
    }

    #[test]
    fn unassigned_subject_and_duplicates_are_rejected() {
        let conn = seeded();
        let ctx = CalcContext {
            conn: &conn,
            class_id: "c10",
        };
        let dup = ReportRequest {
            section_id: None,
            selections: vec![math_exam(), math_exam()],
            include_summary: false,
        };
        assert_eq!(
            compute_report_model(&ctx, &dup).expect_err("dup").code(),
            "validation_failed"
        );

        conn.execute("INSERT INTO subjects(id, name) VALUES('art', 'Art')", [])
            .expect("art");
        let art = SubjectSelection::new(
            "art",
            SelectionScope::Exam {
                exam_id: "ut1".into(),
                component_ids: BTreeSet::new(),
            },
        )
        .expect("selection");
        let unassigned = ReportRequest {
            section_id: None,
            selections: vec![art],
            include_summary: false,
        };
        assert_eq!(
            compute_report_model(&ctx, &unassigned).expect_err("art").code(),
            "not_found"
        );
    }

    #[test]
    fn missing_term_share_surfaces_as_configuration_error() {
        let conn = seeded();
        conn.execute("UPDATE terms SET weight_share = NULL WHERE id = 't2'", [])
            .expect("clear share");
        let ctx = CalcContext {
            conn: &conn,
            class_id: "c10",
        };
        let request = ReportRequest {
            section_id: None,
            selections: vec![sci_terms()],
            include_summary: false,
        };
        assert_eq!(
            compute_report_model(&ctx, &request).expect_err("share").code(),
            "configuration_error"
        );
    }
}
