use crate::calc::grading::{load_scale, save_scale, GradeBand, GradingScale};
use crate::ipc::helpers::{calc_err, parse_param, with_conn};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

fn get_scale(conn: &Connection, req: &Request) -> Result<serde_json::Value, serde_json::Value> {
    let scale = load_scale(conn).map_err(|e| calc_err(req, e))?;
    Ok(json!({ "bands": scale.bands() }))
}

fn set_scale(conn: &Connection, req: &Request) -> Result<serde_json::Value, serde_json::Value> {
    let bands: Vec<GradeBand> = parse_param(req, "bands")?;
    let scale = GradingScale::new(bands).map_err(|e| calc_err(req, e))?;
    save_scale(conn, &scale).map_err(|e| calc_err(req, e))?;
    tracing::info!(bands = scale.bands().len(), "grading scale updated");
    Ok(json!({ "bands": scale.bands() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grading.getScale" => Some(with_conn(state, req, |conn| get_scale(conn, req))),
        "grading.setScale" => Some(with_conn(state, req, |conn| set_scale(conn, req))),
        _ => None,
    }
}
