use crate::calc::aggregate::AggregateResult;
use crate::calc::format::{format, DisplayMode, DisplayPreferences, NumberFormat, Rounding};
use crate::calc::pipeline::{compute_report_model, ReportRequest};
use crate::calc::scheme::{SelectionScope, SubjectSelection};
use crate::calc::CalcContext;
use crate::export::{export_request, write_bundle, ReportMeta};
use crate::ipc::error::err;
use crate::ipc::helpers::{
    calc_err, optional_bool, optional_param, optional_str, parse_param, required_str, with_conn,
};
use crate::ipc::types::{AppState, Request};
use crate::store;
use rusqlite::Connection;
use serde::Deserialize;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubjectParam {
    subject_id: String,
    #[serde(default)]
    exam_id: Option<String>,
    #[serde(default)]
    component_ids: Option<Vec<String>>,
    #[serde(default)]
    term_component_map: Option<BTreeMap<String, Vec<String>>>,
}

fn selection_from_param(
    req: &Request,
    p: SubjectParam,
) -> Result<SubjectSelection, serde_json::Value> {
    let scope = match (p.exam_id, p.term_component_map) {
        (Some(exam_id), None) => SelectionScope::Exam {
            exam_id,
            component_ids: p.component_ids.unwrap_or_default().into_iter().collect(),
        },
        (None, Some(map)) => {
            if p.component_ids.is_some() {
                return Err(err(
                    &req.id,
                    "bad_params",
                    "componentIds is only valid with examId",
                    Some(json!({ "subjectId": p.subject_id })),
                ));
            }
            SelectionScope::Terms(
                map.into_iter()
                    .map(|(term, ids)| (term, ids.into_iter().collect::<BTreeSet<_>>()))
                    .collect(),
            )
        }
        _ => {
            return Err(err(
                &req.id,
                "bad_params",
                "each subject needs exactly one of examId or termComponentMap",
                Some(json!({ "subjectId": p.subject_id })),
            ))
        }
    };
    SubjectSelection::new(p.subject_id, scope).map_err(|e| calc_err(req, e))
}

fn parse_report_request(req: &Request) -> Result<(String, ReportRequest), serde_json::Value> {
    let class_id = required_str(req, "classId")?;
    let section_id = optional_str(req, "sectionId")?;
    let params: Vec<SubjectParam> = parse_param(req, "subjectComponents")?;
    let selections = params
        .into_iter()
        .map(|p| selection_from_param(req, p))
        .collect::<Result<Vec<_>, _>>()?;
    let include_summary = optional_bool(req, "includeSummary", false)?;
    Ok((
        class_id,
        ReportRequest {
            section_id,
            selections,
            include_summary,
        },
    ))
}

fn parse_preferences(req: &Request) -> Result<DisplayPreferences, serde_json::Value> {
    let display_mode: DisplayMode = optional_param(req, "displayMode")?.unwrap_or_default();
    let rounding: Rounding = optional_param(req, "rounding")?.unwrap_or_default();
    let decimal_points: u8 = optional_param(req, "decimalPoints")?
        .unwrap_or_else(|| NumberFormat::default().decimal_points());
    let per_page: usize = optional_param(req, "studentsPerPage")?
        .unwrap_or(DisplayPreferences::DEFAULT_STUDENTS_PER_PAGE);
    let number = NumberFormat::new(decimal_points, rounding).map_err(|e| calc_err(req, e))?;
    DisplayPreferences::new(
        display_mode,
        number,
        optional_bool(req, "sum", true)?,
        optional_bool(req, "includeGrades", true)?,
        per_page,
    )
    .map_err(|e| calc_err(req, e))
}

fn compute(
    conn: &Connection,
    req: &Request,
) -> Result<(String, ReportRequest, AggregateResult), serde_json::Value> {
    let (class_id, request) = parse_report_request(req)?;
    let ctx = CalcContext {
        conn,
        class_id: &class_id,
    };
    let result = compute_report_model(&ctx, &request).map_err(|e| calc_err(req, e))?;
    Ok((class_id, request, result))
}

fn report_meta(
    conn: &Connection,
    req: &Request,
    class_id: &str,
    request: &ReportRequest,
    prefs: &DisplayPreferences,
) -> Result<ReportMeta, serde_json::Value> {
    let title = match optional_str(req, "title")? {
        Some(t) => t,
        None => {
            let class_name = store::class_name(conn, class_id).map_err(|e| calc_err(req, e))?;
            format!("{} Result", class_name)
        }
    };
    let subjects: Vec<&str> = request.selections.iter().map(|s| s.subject_id()).collect();
    Ok(ReportMeta {
        title,
        filters: json!({
            "classId": class_id,
            "sectionId": request.section_id,
            "subjects": subjects,
            "displayMode": prefs.display_mode,
            "decimalPoints": prefs.number.decimal_points(),
            "rounding": prefs.number.rounding(),
        }),
    })
}

fn reports_aggregate(conn: &Connection, req: &Request) -> Result<serde_json::Value, serde_json::Value> {
    let (_, _, result) = compute(conn, req)?;
    Ok(result.to_response())
}

fn reports_format(conn: &Connection, req: &Request) -> Result<serde_json::Value, serde_json::Value> {
    let prefs = parse_preferences(req)?;
    let (_, _, result) = compute(conn, req)?;
    Ok(json!(format(&result, &prefs)))
}

fn reports_export_html(
    conn: &Connection,
    req: &Request,
) -> Result<serde_json::Value, serde_json::Value> {
    let prefs = parse_preferences(req)?;
    let (class_id, request, result) = compute(conn, req)?;
    let meta = report_meta(conn, req, &class_id, &request, &prefs)?;
    let report = format(&result, &prefs);
    Ok(json!(export_request(&report, &meta)))
}

fn reports_export_bundle(
    conn: &Connection,
    req: &Request,
) -> Result<serde_json::Value, serde_json::Value> {
    let out_path = PathBuf::from(required_str(req, "outPath")?);
    let prefs = parse_preferences(req)?;
    let (class_id, request, result) = compute(conn, req)?;
    let meta = report_meta(conn, req, &class_id, &request, &prefs)?;
    let report = format(&result, &prefs);
    let export = export_request(&report, &meta);
    let summary = write_bundle(&export, &out_path).map_err(|e| {
        err(
            &req.id,
            "export_failed",
            format!("{e:?}"),
            Some(json!({ "outPath": out_path.to_string_lossy() })),
        )
    })?;
    Ok(json!({
        "outPath": out_path.to_string_lossy(),
        "bundleFormat": summary.bundle_format,
        "entryCount": summary.entry_count,
        "htmlSha256": summary.html_sha256,
        "fileName": export.file_name,
        "orientation": export.orientation,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: fn(&Connection, &Request) -> Result<serde_json::Value, serde_json::Value> =
        match req.method.as_str() {
            "reports.aggregate" => reports_aggregate,
            "reports.format" => reports_format,
            "reports.exportHtml" => reports_export_html,
            "reports.exportBundle" => reports_export_bundle,
            _ => return None,
        };
    Some(with_conn(state, req, |conn| f(conn, req)))
}
