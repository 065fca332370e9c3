use crate::calc::{Attendance, MarkEntry};
use crate::ipc::helpers::{calc_err, optional_str, parse_param, required_str, with_conn};
use crate::ipc::types::{AppState, Request};
use crate::store;
use rusqlite::Connection;
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
struct MarkParam {
    #[serde(alias = "studentId")]
    student_id: String,
    #[serde(alias = "componentId")]
    component_id: String,
    #[serde(default, alias = "marksObtained")]
    marks_obtained: Option<f64>,
    #[serde(default)]
    attendance: Option<String>,
}

fn marks_save(conn: &Connection, req: &Request) -> Result<serde_json::Value, serde_json::Value> {
    let params: Vec<MarkParam> = parse_param(req, "entries")?;
    let mut entries = Vec::with_capacity(params.len());
    for p in params {
        let attendance = match p.attendance.as_deref() {
            None => Attendance::Present,
            Some(code) => Attendance::parse(code).map_err(|e| calc_err(req, e))?,
        };
        entries.push(MarkEntry {
            student_id: p.student_id,
            component_id: p.component_id,
            marks_obtained: p.marks_obtained,
            attendance,
        });
    }
    let saved = store::save_marks(conn, &entries).map_err(|e| calc_err(req, e))?;
    Ok(json!({ "saved": saved }))
}

fn marks_list(conn: &Connection, req: &Request) -> Result<serde_json::Value, serde_json::Value> {
    let class_id = required_str(req, "classId")?;
    let section_id = optional_str(req, "sectionId")?;
    let component_ids: Vec<String> = parse_param(req, "componentIds")?;

    let roster = store::load_roster(conn, &class_id, section_id.as_deref())
        .map_err(|e| calc_err(req, e))?;
    let student_ids: Vec<String> = roster.iter().map(|s| s.student_id.clone()).collect();
    let marks = store::load_marks(conn, &student_ids, &component_ids)
        .map_err(|e| calc_err(req, e))?;
    Ok(json!({ "marks": marks }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "marks.save" => Some(with_conn(state, req, |conn| marks_save(conn, req))),
        "marks.list" => Some(with_conn(state, req, |conn| marks_list(conn, req))),
        _ => None,
    }
}
