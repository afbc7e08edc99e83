use super::handlers::{auth, backup, contents, core, evaluations, exercises, topics, units, users};
use super::types::{Access, AppState, Caller, Method, Request};
use crate::ipc::error::err;
use tracing::{debug, warn};

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    let Some(method) = Method::parse(&req.method) else {
        return err(
            &req.id,
            "not_implemented",
            format!("unknown method: {}", req.method),
            None,
        );
    };
    debug!(id = %req.id, method = method.as_str(), "dispatch");

    let caller = match authorize(state, &req, method) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    dispatch(state, &req, method, caller.as_ref())
}

fn authorize(
    state: &mut AppState,
    req: &Request,
    method: Method,
) -> Result<Option<Caller>, serde_json::Value> {
    let access = method.access();
    if access == Access::Public {
        return Ok(None);
    }

    let token = req.session.as_deref().unwrap_or("").trim();
    if token.is_empty() {
        return Err(err(&req.id, "unauthorized", "sign in first", None));
    }
    let Some(session) = state.sessions.get(token, chrono::Utc::now()) else {
        return Err(err(&req.id, "unauthorized", "session expired or unknown", None));
    };

    if !access.allows(session.role) {
        warn!(
            user = %session.username,
            role = session.role.as_str(),
            method = method.as_str(),
            "role not allowed"
        );
        return Err(err(
            &req.id,
            "forbidden",
            format!("{} may not call {}", session.role.as_str(), method.as_str()),
            None,
        ));
    }

    if method.is_mutating() && req.csrf_token.as_deref() != Some(session.csrf_token.as_str()) {
        warn!(user = %session.username, method = method.as_str(), "csrf token mismatch");
        return Err(err(&req.id, "csrf_mismatch", "missing or stale csrfToken", None));
    }

    Ok(Some(Caller {
        user_id: session.user_id,
        role: session.role,
        section: session.section,
    }))
}

fn dispatch(
    state: &mut AppState,
    req: &Request,
    method: Method,
    caller: Option<&Caller>,
) -> serde_json::Value {
    match (method, caller) {
        (Method::Health, _) => core::health(state, req),
        (Method::WorkspaceSelect, _) => core::workspace_select(state, req),
        (Method::SetupBootstrapAdmin, _) => auth::bootstrap_admin(state, req),
        (Method::AuthLogin, _) => auth::login(state, req),

        (_, None) => err(&req.id, "unauthorized", "sign in first", None),

        (Method::AuthLogout, Some(_)) => auth::logout(state, req),
        (Method::AuthWhoami, Some(c)) => auth::whoami(state, req, c),

        (Method::UsersList, Some(c)) => users::list(state, req, c),
        (Method::UsersCreate, Some(_)) => users::create(state, req),
        (Method::UsersUpdate, Some(c)) => users::update(state, req, c),
        (Method::UsersDelete, Some(c)) => users::delete(state, req, c),

        (Method::UnitsList, Some(c)) => units::list(state, req, c),
        (Method::UnitsOpen, Some(c)) => units::open(state, req, c),
        (Method::UnitsCreate, Some(_)) => units::create(state, req),
        (Method::UnitsUpdate, Some(_)) => units::update(state, req),
        (Method::UnitsReorder, Some(_)) => units::reorder(state, req),
        (Method::UnitsDelete, Some(_)) => units::delete(state, req),

        (Method::TopicsList, Some(c)) => topics::list(state, req, c),
        (Method::TopicsCreate, Some(_)) => topics::create(state, req),
        (Method::TopicsUpdate, Some(_)) => topics::update(state, req),
        (Method::TopicsReorder, Some(_)) => topics::reorder(state, req),
        (Method::TopicsDelete, Some(_)) => topics::delete(state, req),

        (Method::ContentsList, Some(c)) => contents::list(state, req, c),
        (Method::ContentsCreate, Some(_)) => contents::create(state, req),
        (Method::ContentsUpdate, Some(_)) => contents::update(state, req),
        (Method::ContentsDelete, Some(_)) => contents::delete(state, req),

        (Method::ExercisesList, Some(c)) => exercises::list(state, req, c),
        (Method::ExercisesOpen, Some(c)) => exercises::open(state, req, c),
        (Method::ExercisesCreate, Some(_)) => exercises::create(state, req),
        (Method::ExercisesUpdate, Some(_)) => exercises::update(state, req),
        (Method::ExercisesDelete, Some(_)) => exercises::delete(state, req),
        (Method::ExercisesComplete, Some(c)) => exercises::complete(state, req, c),
        (Method::ExercisesCheckCode, Some(c)) => exercises::check_code(state, req, c),

        (Method::EvaluationsList, Some(c)) => evaluations::list(state, req, c),
        (Method::EvaluationsOpen, Some(c)) => evaluations::open(state, req, c),
        (Method::EvaluationsCreate, Some(_)) => evaluations::create(state, req),
        (Method::EvaluationsUpdate, Some(_)) => evaluations::update(state, req),
        (Method::EvaluationsDelete, Some(_)) => evaluations::delete(state, req),
        (Method::EvaluationsPreviewRubric, Some(_)) => evaluations::preview_rubric(state, req),
        (Method::EvaluationsSubmit, Some(c)) => evaluations::submit(state, req, c),
        (Method::EvaluationsReset, Some(_)) => evaluations::reset(state, req),
        (Method::EvaluationsResults, Some(_)) => evaluations::results(state, req),

        (Method::BackupExport, Some(_)) => backup::export(state, req),
        (Method::BackupImport, Some(_)) => backup::import(state, req),
    }
}
