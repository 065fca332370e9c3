use crate::error::ResultError;
use crate::ipc::error::{err, from_calc, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde_json::json;

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn optional_str(req: &Request, key: &str) -> Result<Option<String>, serde_json::Value> {
    match req.params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(err(
            &req.id,
            "bad_params",
            format!("{} must be a string", key),
            Some(json!({ key: other })),
        )),
    }
}

pub fn optional_bool(req: &Request, key: &str, default: bool) -> Result<bool, serde_json::Value> {
    match req.params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(default),
        Some(serde_json::Value::Bool(b)) => Ok(*b),
        Some(other) => Err(err(
            &req.id,
            "bad_params",
            format!("{} must be a boolean", key),
            Some(json!({ key: other })),
        )),
    }
}

/// Deserializes `params[key]` into `T`, reporting shape problems as `bad_params`.
pub fn parse_param<T: DeserializeOwned>(req: &Request, key: &str) -> Result<T, serde_json::Value> {
    let raw = req
        .params
        .get(key)
        .cloned()
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))?;
    serde_json::from_value(raw).map_err(|e| {
        err(
            &req.id,
            "bad_params",
            format!("invalid {}", key),
            Some(json!({ "error": e.to_string() })),
        )
    })
}

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn calc_err(req: &Request, e: ResultError) -> serde_json::Value {
    from_calc(&req.id, &e)
}

pub fn db_err(req: &Request, e: rusqlite::Error) -> serde_json::Value {
    calc_err(req, ResultError::from(e))
}

/// Runs `f` against the open workspace and wraps its result as a response.
pub fn with_conn<F>(state: &AppState, req: &Request, f: F) -> serde_json::Value
where
    F: FnOnce(&Connection) -> Result<serde_json::Value, serde_json::Value>,
{
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    match f(conn) {
        Ok(result) => ok(&req.id, result),
        Err(e) => e,
    }
}

pub fn optional_param<T: DeserializeOwned>(
    req: &Request,
    key: &str,
) -> Result<Option<T>, serde_json::Value> {
    match req.params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(_) => parse_param(req, key).map(Some),
    }
}
