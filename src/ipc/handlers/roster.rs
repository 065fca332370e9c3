use crate::error::ResultError;
use crate::ipc::error::err;
use crate::ipc::helpers::{calc_err, db_err, optional_bool, optional_str, required_str, with_conn};
use crate::ipc::types::{AppState, Request};
use crate::store;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn new_id(req: &Request) -> Result<String, serde_json::Value> {
    Ok(optional_str(req, "id")?.unwrap_or_else(|| Uuid::new_v4().to_string()))
}

fn insert_err(req: &Request, table: &str, e: rusqlite::Error) -> serde_json::Value {
    if let rusqlite::Error::SqliteFailure(f, _) = &e {
        if f.code == rusqlite::ErrorCode::ConstraintViolation {
            return err(
                &req.id,
                "validation_failed",
                "record conflicts with an existing one",
                Some(json!({ "table": table, "error": e.to_string() })),
            );
        }
    }
    db_err(req, e)
}

fn row_exists(conn: &Connection, sql: &str, id: &str) -> rusqlite::Result<bool> {
    Ok(conn
        .query_row(sql, [id], |r| r.get::<_, i64>(0))
        .optional()?
        .is_some())
}

fn require(
    req: &Request,
    conn: &Connection,
    sql: &str,
    id: &str,
    what: &str,
    key: &str,
) -> Result<(), serde_json::Value> {
    if row_exists(conn, sql, id).map_err(|e| db_err(req, e))? {
        return Ok(());
    }
    Err(calc_err(
        req,
        ResultError::not_found(format!("{} not found", what)).with_details(json!({ key: id })),
    ))
}

fn classes_create(conn: &Connection, req: &Request) -> Result<serde_json::Value, serde_json::Value> {
    let name = required_str(req, "name")?.trim().to_string();
    let class_id = new_id(req)?;
    conn.execute(
        "INSERT INTO classes(id, name) VALUES(?, ?)",
        (&class_id, &name),
    )
    .map_err(|e| insert_err(req, "classes", e))?;
    Ok(json!({ "classId": class_id, "name": name }))
}

fn classes_list(conn: &Connection, req: &Request) -> Result<serde_json::Value, serde_json::Value> {
    let mut stmt = conn
        .prepare(
            "SELECT
               c.id,
               c.name,
               (SELECT COUNT(*) FROM students s WHERE s.class_id = c.id AND s.active = 1),
               (SELECT COUNT(*) FROM sections x WHERE x.class_id = c.id),
               (SELECT COUNT(*) FROM class_subjects cs WHERE cs.class_id = c.id)
             FROM classes c
             ORDER BY c.name, c.id",
        )
        .map_err(|e| db_err(req, e))?;
    let classes = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let student_count: i64 = row.get(2)?;
            let section_count: i64 = row.get(3)?;
            let subject_count: i64 = row.get(4)?;
            Ok(json!({
                "id": id,
                "name": name,
                "studentCount": student_count,
                "sectionCount": section_count,
                "subjectCount": subject_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| db_err(req, e))?;
    Ok(json!({ "classes": classes }))
}

fn sections_create(conn: &Connection, req: &Request) -> Result<serde_json::Value, serde_json::Value> {
    let class_id = required_str(req, "classId")?;
    let name = required_str(req, "name")?.trim().to_string();
    require(req, conn, "SELECT 1 FROM classes WHERE id = ?", &class_id, "class", "classId")?;
    let section_id = new_id(req)?;
    conn.execute(
        "INSERT INTO sections(id, class_id, name) VALUES(?, ?, ?)",
        (&section_id, &class_id, &name),
    )
    .map_err(|e| insert_err(req, "sections", e))?;
    Ok(json!({ "sectionId": section_id, "classId": class_id, "name": name }))
}

fn students_create(conn: &Connection, req: &Request) -> Result<serde_json::Value, serde_json::Value> {
    let class_id = required_str(req, "classId")?;
    let display_name = required_str(req, "displayName")?.trim().to_string();
    let roll_number = req
        .params
        .get("rollNumber")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| err(&req.id, "bad_params", "missing rollNumber", None))?;
    let section_id = optional_str(req, "sectionId")?;
    let active = optional_bool(req, "active", true)?;

    require(req, conn, "SELECT 1 FROM classes WHERE id = ?", &class_id, "class", "classId")?;
    if let Some(section_id) = &section_id {
        let in_class: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM sections WHERE id = ? AND class_id = ?",
                (section_id, &class_id),
                |r| r.get(0),
            )
            .optional()
            .map_err(|e| db_err(req, e))?;
        if in_class.is_none() {
            return Err(calc_err(
                req,
                ResultError::not_found("section not found")
                    .with_details(json!({ "classId": class_id, "sectionId": section_id })),
            ));
        }
    }

    let student_id = new_id(req)?;
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO students(id, class_id, section_id, roll_number, display_name, active, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &student_id,
            &class_id,
            &section_id,
            roll_number,
            &display_name,
            i64::from(active),
            &now,
        ),
    )
    .map_err(|e| insert_err(req, "students", e))?;
    Ok(json!({
        "studentId": student_id,
        "classId": class_id,
        "sectionId": section_id,
        "rollNumber": roll_number,
        "displayName": display_name,
        "active": active
    }))
}

fn students_list(conn: &Connection, req: &Request) -> Result<serde_json::Value, serde_json::Value> {
    let class_id = required_str(req, "classId")?;
    let section_id = optional_str(req, "sectionId")?;
    let roster = store::load_roster(conn, &class_id, section_id.as_deref())
        .map_err(|e| calc_err(req, e))?;
    let students: Vec<_> = roster
        .iter()
        .map(|s| {
            json!({
                "id": s.student_id,
                "rollNumber": s.roll_number,
                "displayName": s.name
            })
        })
        .collect();
    Ok(json!({ "students": students }))
}

fn subjects_create(conn: &Connection, req: &Request) -> Result<serde_json::Value, serde_json::Value> {
    let name = required_str(req, "name")?.trim().to_string();
    let code = optional_str(req, "code")?;
    let subject_id = new_id(req)?;
    conn.execute(
        "INSERT INTO subjects(id, name, code) VALUES(?, ?, ?)",
        (&subject_id, &name, &code),
    )
    .map_err(|e| insert_err(req, "subjects", e))?;
    Ok(json!({ "subjectId": subject_id, "name": name, "code": code }))
}

fn classes_assign_subject(
    conn: &Connection,
    req: &Request,
) -> Result<serde_json::Value, serde_json::Value> {
    let class_id = required_str(req, "classId")?;
    let subject_id = required_str(req, "subjectId")?;
    require(req, conn, "SELECT 1 FROM classes WHERE id = ?", &class_id, "class", "classId")?;
    require(
        req,
        conn,
        "SELECT 1 FROM subjects WHERE id = ?",
        &subject_id,
        "subject",
        "subjectId",
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO class_subjects(class_id, subject_id) VALUES(?, ?)",
        (&class_id, &subject_id),
    )
    .map_err(|e| db_err(req, e))?;
    Ok(json!({ "classId": class_id, "subjectId": subject_id }))
}

fn terms_create(conn: &Connection, req: &Request) -> Result<serde_json::Value, serde_json::Value> {
    let name = required_str(req, "name")?.trim().to_string();
    let weight_share = match req.params.get("weightShare") {
        None | Some(serde_json::Value::Null) => None,
        Some(v) => Some(v.as_f64().ok_or_else(|| {
            err(&req.id, "bad_params", "weightShare must be a number", None)
        })?),
    };
    if let Some(share) = weight_share {
        if !share.is_finite() || !(0.0..=100.0).contains(&share) {
            return Err(calc_err(
                req,
                ResultError::validation("weightShare must be between 0 and 100")
                    .with_details(json!({ "weightShare": share })),
            ));
        }
    }
    let sort_order = req
        .params
        .get("sortOrder")
        .and_then(|v| v.as_i64())
        .unwrap_or(0);
    let term_id = new_id(req)?;
    conn.execute(
        "INSERT INTO terms(id, name, weight_share, sort_order) VALUES(?, ?, ?, ?)",
        (&term_id, &name, weight_share, sort_order),
    )
    .map_err(|e| insert_err(req, "terms", e))?;
    Ok(json!({
        "termId": term_id,
        "name": name,
        "weightShare": weight_share,
        "sortOrder": sort_order
    }))
}

fn exams_create(conn: &Connection, req: &Request) -> Result<serde_json::Value, serde_json::Value> {
    let name = required_str(req, "name")?.trim().to_string();
    let term_id = optional_str(req, "termId")?;
    if let Some(term_id) = &term_id {
        require(req, conn, "SELECT 1 FROM terms WHERE id = ?", term_id, "term", "termId")?;
    }
    let exam_id = new_id(req)?;
    conn.execute(
        "INSERT INTO exams(id, name, term_id) VALUES(?, ?, ?)",
        (&exam_id, &name, &term_id),
    )
    .map_err(|e| insert_err(req, "exams", e))?;
    Ok(json!({ "examId": exam_id, "name": name, "termId": term_id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: fn(&Connection, &Request) -> Result<serde_json::Value, serde_json::Value> =
        match req.method.as_str() {
            "classes.create" => classes_create,
            "classes.list" => classes_list,
            "classes.assignSubject" => classes_assign_subject,
            "sections.create" => sections_create,
            "students.create" => students_create,
            "students.list" => students_list,
            "subjects.create" => subjects_create,
            "terms.create" => terms_create,
            "exams.create" => exams_create,
            _ => return None,
        };
    Some(with_conn(state, req, |conn| f(conn, req)))
}
