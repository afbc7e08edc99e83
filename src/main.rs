mod attempts;
mod backup;
mod config;
mod db;
mod ipc;
mod model;
mod ordering;
mod rubric;
mod session;
mod slug;

use std::io::{self, BufRead, Write};
use tracing::{metadata::LevelFilter, warn};
use tracing_subscriber::{fmt, prelude::*, util::SubscriberInitExt};

fn main() {
    let cfg = match config::Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("lsvcoded: {e:#}");
            std::process::exit(2);
        }
    };

    // stdout carries the protocol; logs go to stderr.
    let fmt = fmt::layer()
        .with_writer(io::stderr)
        .with_target(false)
        .with_file(false)
        .with_line_number(false);
    tracing_subscriber::registry()
        .with(fmt)
        .with(LevelFilter::from_level(cfg.log_level))
        .init();

    let mut state = ipc::AppState {
        workspace: None,
        db: None,
        sessions: session::SessionStore::new(cfg.session_ttl_minutes),
    };
    if let Some(path) = cfg.workspace.clone() {
        // Logged inside; the daemon still starts without a workspace.
        let _ = ipc::open_workspace(&mut state, path);
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "undecodable request line");
                let resp = serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() },
                });
                let _ = writeln!(stdout, "{}", resp);
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
}
