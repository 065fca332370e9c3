use crate::calc::scheme::{
    define_scheme, resolve_components, set_component_locked, ComponentDraft, ExamSelector,
    SchemeScope,
};
use crate::ipc::error::err;
use crate::ipc::helpers::{calc_err, optional_str, parse_param, required_str, with_conn};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeSet;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ComponentParam {
    #[serde(default)]
    component_id: Option<String>,
    name: String,
    #[serde(default)]
    abbreviation: Option<String>,
    max_marks: f64,
    weightage_percent: f64,
}

impl From<ComponentParam> for ComponentDraft {
    fn from(p: ComponentParam) -> Self {
        ComponentDraft {
            component_id: p.component_id,
            name: p.name,
            abbreviation: p.abbreviation,
            max_marks: p.max_marks,
            weightage_percent: p.weightage_percent,
        }
    }
}

fn parse_scope(req: &Request) -> Result<SchemeScope, serde_json::Value> {
    match (optional_str(req, "examId")?, optional_str(req, "termId")?) {
        (Some(exam_id), None) => Ok(SchemeScope::Exam(exam_id)),
        (None, Some(term_id)) => Ok(SchemeScope::Term(term_id)),
        _ => Err(err(
            &req.id,
            "bad_params",
            "exactly one of examId or termId is required",
            None,
        )),
    }
}

fn parse_selector(req: &Request) -> Result<ExamSelector, serde_json::Value> {
    let exam_id = optional_str(req, "examId")?;
    let term_ids: Option<Vec<String>> = match req.params.get("termIds") {
        None | Some(serde_json::Value::Null) => None,
        Some(_) => Some(parse_param(req, "termIds")?),
    };
    match (exam_id, term_ids) {
        (Some(exam_id), None) => Ok(ExamSelector::Exam(exam_id)),
        (None, Some(ids)) => Ok(ExamSelector::Terms(ids.into_iter().collect::<BTreeSet<_>>())),
        _ => Err(err(
            &req.id,
            "bad_params",
            "exactly one of examId or termIds is required",
            None,
        )),
    }
}

fn schemes_define(conn: &Connection, req: &Request) -> Result<serde_json::Value, serde_json::Value> {
    let class_id = required_str(req, "classId")?;
    let subject_id = required_str(req, "subjectId")?;
    let scope = parse_scope(req)?;
    let params: Vec<ComponentParam> = parse_param(req, "components")?;
    let drafts: Vec<ComponentDraft> = params.into_iter().map(ComponentDraft::from).collect();

    let defined = define_scheme(conn, &class_id, &subject_id, &scope, &drafts)
        .map_err(|e| calc_err(req, e))?;
    Ok(json!({
        "schemeId": defined.scheme_id,
        "version": defined.version,
        "components": defined.components
    }))
}

fn schemes_resolve(conn: &Connection, req: &Request) -> Result<serde_json::Value, serde_json::Value> {
    let class_id = required_str(req, "classId")?;
    let subject_id = required_str(req, "subjectId")?;
    let selector = parse_selector(req)?;
    let components = resolve_components(conn, &class_id, &subject_id, &selector)
        .map_err(|e| calc_err(req, e))?;
    Ok(json!({ "components": components }))
}

fn components_set_locked(
    conn: &Connection,
    req: &Request,
    locked: bool,
) -> Result<serde_json::Value, serde_json::Value> {
    let component_id = required_str(req, "componentId")?;
    set_component_locked(conn, &component_id, locked).map_err(|e| calc_err(req, e))?;
    Ok(json!({ "componentId": component_id, "isLocked": locked }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "schemes.define" => Some(with_conn(state, req, |conn| schemes_define(conn, req))),
        "schemes.resolve" => Some(with_conn(state, req, |conn| schemes_resolve(conn, req))),
        "components.lock" => Some(with_conn(state, req, |conn| {
            components_set_locked(conn, req, true)
        })),
        "components.unlock" => Some(with_conn(state, req, |conn| {
            components_set_locked(conn, req, false)
        })),
        _ => None,
    }
}
