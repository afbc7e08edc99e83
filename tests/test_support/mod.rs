#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub const ADMIN_USER: &str = "admin";
pub const ADMIN_PASSWORD: &str = "admin-secret";

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_lsvcoded");
    let mut child = Command::new(exe)
        .env_remove("LSVCODED_WORKSPACE")
        .env("LSVCODED_LOG", "error")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn lsvcoded");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

/// Session and CSRF tokens returned by `auth.login`.
#[derive(Debug, Clone)]
pub struct Auth {
    pub session: String,
    pub csrf: String,
    pub user_id: String,
}

fn send(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    payload: serde_json::Value,
) -> serde_json::Value {
    let id = payload
        .get("id")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", payload);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
    value
}

pub fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    send(
        stdin,
        reader,
        json!({ "id": id, "method": method, "params": params }),
    )
}

pub fn request_as(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    auth: &Auth,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    send(
        stdin,
        reader,
        json!({
            "id": id,
            "method": method,
            "params": params,
            "session": auth.session,
            "csrfToken": auth.csrf,
        }),
    )
}

fn expect_ok(method: &str, value: serde_json::Value) -> serde_json::Value {
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "expected ok response for {}, got {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    expect_ok(method, request(stdin, reader, id, method, params))
}

pub fn request_ok_as(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    auth: &Auth,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    expect_ok(method, request_as(stdin, reader, auth, id, method, params))
}

pub fn error_code(value: &serde_json::Value) -> Option<&str> {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
}

pub fn str_field(value: &serde_json::Value, key: &str) -> String {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| panic!("missing string field {} in {}", key, value))
        .to_string()
}

pub fn login(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    username: &str,
    password: &str,
) -> Auth {
    let res = request_ok(
        stdin,
        reader,
        id,
        "auth.login",
        json!({ "username": username, "password": password }),
    );
    Auth {
        session: str_field(&res, "sessionToken"),
        csrf: str_field(&res, "csrfToken"),
        user_id: str_field(&res["user"], "id"),
    }
}

/// Opens a fresh workspace, creates the first administrator and signs in.
pub fn open_as_admin(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &std::path::Path,
) -> Auth {
    let _ = request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "boot",
        "setup.bootstrapAdmin",
        json!({
            "username": ADMIN_USER,
            "password": ADMIN_PASSWORD,
            "fullName": "Administración",
        }),
    );
    login(stdin, reader, "login-admin", ADMIN_USER, ADMIN_PASSWORD)
}

/// Creates a user through `users.create` and signs them in.
pub fn create_and_login(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    admin: &Auth,
    username: &str,
    role: &str,
    section: Option<&str>,
) -> Auth {
    let password = format!("{}-pass", username);
    let _ = request_ok_as(
        stdin,
        reader,
        admin,
        &format!("create-{}", username),
        "users.create",
        json!({
            "username": username,
            "fullName": username.to_uppercase(),
            "role": role,
            "section": section,
            "password": password,
        }),
    );
    login(stdin, reader, &format!("login-{}", username), username, &password)
}

/// Unit plus one topic, created by `author`. Returns (unitId, topicId).
pub fn seed_unit_topic(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    author: &Auth,
    title: &str,
) -> (String, String) {
    let unit = request_ok_as(
        stdin,
        reader,
        author,
        "seed-unit",
        "units.create",
        json!({ "title": title, "trimester": 1 }),
    );
    let unit_id = str_field(&unit, "unitId");
    let topic = request_ok_as(
        stdin,
        reader,
        author,
        "seed-topic",
        "topics.create",
        json!({ "unitId": unit_id, "name": "Variables" }),
    );
    (unit_id, str_field(&topic, "topicId"))
}
