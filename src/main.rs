mod calc;
mod config;
mod db;
mod error;
mod export;
mod ipc;
mod logging;
mod store;

use clap::Parser;
use serde_json::json;
use std::io::{self, BufRead, Write};

fn main() {
    let cfg = config::Config::parse();
    logging::init_tracing(&cfg.log_level);

    let mut state = ipc::AppState {
        workspace: None,
        db: None,
    };
    if let Some(path) = &cfg.workspace {
        match ipc::open_workspace(&mut state, path) {
            Ok(()) => tracing::info!(workspace = %path.display(), "workspace opened from config"),
            Err(e) => tracing::error!(workspace = %path.display(), error = ?e, "failed to open workspace"),
        }
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(error = %e, "stdin read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // No id to reply to.
                tracing::warn!(error = %e, "unparseable request line");
                let resp = json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                });
                let _ = writeln!(stdout, "{}", resp);
                let _ = stdout.flush();
                continue;
            }
        };

        let span = tracing::info_span!("request", id = %req.id, method = %req.method);
        let resp = span.in_scope(|| {
            let resp = ipc::handle_request(&mut state, req);
            if resp.get("ok").and_then(|v| v.as_bool()) == Some(false) {
                let code = resp
                    .pointer("/error/code")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown");
                tracing::warn!(code, "request failed");
            }
            resp
        });
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
}
