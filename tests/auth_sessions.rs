mod test_support;

use serde_json::json;
use test_support::{
    create_and_login, error_code, open_as_admin, request, request_as, request_ok, request_ok_as,
    spawn_sidecar, temp_dir, Auth, ADMIN_PASSWORD, ADMIN_USER,
};

#[test]
fn bootstrap_only_works_once() {
    let workspace = temp_dir("lsvcode-bootstrap-once");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _admin = open_as_admin(&mut stdin, &mut reader, &workspace);

    let again = request(
        &mut stdin,
        &mut reader,
        "2",
        "setup.bootstrapAdmin",
        json!({ "username": "otro", "password": "123456", "fullName": "Otro" }),
    );
    assert_eq!(error_code(&again), Some("already_initialized"));
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn login_rejects_bad_credentials_and_inactive_users() {
    let workspace = temp_dir("lsvcode-login");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let admin = open_as_admin(&mut stdin, &mut reader, &workspace);

    let wrong = request(
        &mut stdin,
        &mut reader,
        "1",
        "auth.login",
        json!({ "username": ADMIN_USER, "password": "nope-nope" }),
    );
    assert_eq!(error_code(&wrong), Some("invalid_credentials"));
    let unknown = request(
        &mut stdin,
        &mut reader,
        "2",
        "auth.login",
        json!({ "username": "ghost", "password": ADMIN_PASSWORD }),
    );
    assert_eq!(error_code(&unknown), Some("invalid_credentials"));

    let student = create_and_login(&mut stdin, &mut reader, &admin, "ana", "Usuario", Some("A"));
    let _ = request_ok_as(
        &mut stdin,
        &mut reader,
        &admin,
        "3",
        "users.update",
        json!({ "userId": student.user_id, "patch": { "active": false } }),
    );
    // Deactivation revokes the live session too.
    let who = request_as(&mut stdin, &mut reader, &student, "4", "auth.whoami", json!({}));
    assert_eq!(error_code(&who), Some("unauthorized"));
    let relog = request(
        &mut stdin,
        &mut reader,
        "5",
        "auth.login",
        json!({ "username": "ana", "password": "ana-pass" }),
    );
    assert_eq!(error_code(&relog), Some("invalid_credentials"));
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn session_csrf_and_role_gates() {
    let workspace = temp_dir("lsvcode-gates");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let admin = open_as_admin(&mut stdin, &mut reader, &workspace);

    let anonymous = request(&mut stdin, &mut reader, "1", "units.list", json!({}));
    assert_eq!(error_code(&anonymous), Some("unauthorized"));

    let forged = Auth {
        session: "not-a-session".to_string(),
        csrf: "x".to_string(),
        user_id: String::new(),
    };
    let resp = request_as(&mut stdin, &mut reader, &forged, "2", "units.list", json!({}));
    assert_eq!(error_code(&resp), Some("unauthorized"));

    let no_csrf = Auth {
        csrf: "stale".to_string(),
        ..admin.clone()
    };
    let resp = request_as(
        &mut stdin,
        &mut reader,
        &no_csrf,
        "3",
        "units.create",
        json!({ "title": "Sin token" }),
    );
    assert_eq!(error_code(&resp), Some("csrf_mismatch"));
    // Reads do not need the CSRF token.
    let listed = request_ok_as(&mut stdin, &mut reader, &no_csrf, "4", "units.list", json!({}));
    assert_eq!(listed["units"].as_array().map(|a| a.len()), Some(0));

    let student = create_and_login(&mut stdin, &mut reader, &admin, "luis", "Usuario", Some("B"));
    let teacher = create_and_login(&mut stdin, &mut reader, &admin, "marta", "Docente", None);

    let resp = request_as(
        &mut stdin,
        &mut reader,
        &student,
        "5",
        "units.create",
        json!({ "title": "No permitido" }),
    );
    assert_eq!(error_code(&resp), Some("forbidden"));
    let resp = request_as(&mut stdin, &mut reader, &student, "6", "users.list", json!({}));
    assert_eq!(error_code(&resp), Some("forbidden"));

    let created = request_ok_as(
        &mut stdin,
        &mut reader,
        &teacher,
        "7",
        "units.create",
        json!({ "title": "Unidad docente" }),
    );
    assert_eq!(created["slug"], json!("unidad-docente"));
    let resp = request_as(
        &mut stdin,
        &mut reader,
        &teacher,
        "8",
        "users.create",
        json!({ "username": "x", "fullName": "X", "role": "Usuario", "password": "123456" }),
    );
    assert_eq!(error_code(&resp), Some("forbidden"));
    let roster = request_ok_as(&mut stdin, &mut reader, &teacher, "9", "users.list", json!({}));
    let roster = roster["users"].as_array().expect("users").clone();
    assert_eq!(roster.len(), 1);
    assert_eq!(roster[0]["username"], json!("luis"));

    let closed = request_ok_as(&mut stdin, &mut reader, &student, "10", "auth.logout", json!({}));
    assert_eq!(closed["closed"], json!(true));
    let resp = request_as(&mut stdin, &mut reader, &student, "11", "auth.whoami", json!({}));
    assert_eq!(error_code(&resp), Some("unauthorized"));

    let who = request_ok_as(&mut stdin, &mut reader, &admin, "12", "auth.whoami", json!({}));
    assert_eq!(who["user"]["role"], json!("Administrador"));
    let _ = request_ok(&mut stdin, &mut reader, "13", "health", json!({}));

    // Surrounding whitespace on the token is ignored by logout as well.
    let padded = test_support::Auth {
        session: format!("  {}\t", admin.session),
        ..admin.clone()
    };
    let who = request_ok_as(&mut stdin, &mut reader, &padded, "14", "auth.whoami", json!({}));
    assert_eq!(who["user"]["role"], json!("Administrador"));
    let closed = request_ok_as(&mut stdin, &mut reader, &padded, "15", "auth.logout", json!({}));
    assert_eq!(closed["closed"], json!(true));
    let resp = request_as(&mut stdin, &mut reader, &admin, "16", "auth.whoami", json!({}));
    assert_eq!(error_code(&resp), Some("unauthorized"));
    let _ = std::fs::remove_dir_all(workspace);
}
