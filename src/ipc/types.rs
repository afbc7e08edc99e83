use std::path::PathBuf;

use crate::model::Role;
use crate::session::SessionStore;
use rusqlite::Connection;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default)]
    pub session: Option<String>,
    #[serde(default, rename = "csrfToken")]
    pub csrf_token: Option<String>,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub sessions: SessionStore,
}

/// The authenticated user a request runs as.
#[derive(Debug, Clone)]
pub struct Caller {
    pub user_id: String,
    pub role: Role,
    pub section: Option<String>,
}

impl Caller {
    pub fn is_student(&self) -> bool {
        self.role == Role::Student
    }
}

/// Who may call a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// No session needed.
    Public,
    /// Any signed-in role.
    Signed,
    /// Docente or Administrador.
    Author,
    Admin,
}

macro_rules! methods {
    ($($variant:ident => $name:literal, $access:ident, $mutating:literal;)+) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum Method {
            $($variant,)+
        }

        impl Method {
            pub const ALL: &'static [Method] = &[$(Method::$variant,)+];

            pub fn parse(name: &str) -> Option<Method> {
                match name {
                    $($name => Some(Method::$variant),)+
                    _ => None,
                }
            }

            pub fn as_str(self) -> &'static str {
                match self {
                    $(Method::$variant => $name,)+
                }
            }

            pub fn access(self) -> Access {
                match self {
                    $(Method::$variant => Access::$access,)+
                }
            }

            /// Mutating methods must carry the session's CSRF token.
            pub fn is_mutating(self) -> bool {
                match self {
                    $(Method::$variant => $mutating,)+
                }
            }
        }
    };
}

methods! {
    Health => "health", Public, false;
    WorkspaceSelect => "workspace.select", Public, false;

    SetupBootstrapAdmin => "setup.bootstrapAdmin", Public, false;
    AuthLogin => "auth.login", Public, false;
    AuthLogout => "auth.logout", Signed, true;
    AuthWhoami => "auth.whoami", Signed, false;

    UsersList => "users.list", Author, false;
    UsersCreate => "users.create", Admin, true;
    UsersUpdate => "users.update", Admin, true;
    UsersDelete => "users.delete", Admin, true;

    UnitsList => "units.list", Signed, false;
    UnitsOpen => "units.open", Signed, false;
    UnitsCreate => "units.create", Author, true;
    UnitsUpdate => "units.update", Author, true;
    UnitsReorder => "units.reorder", Author, true;
    UnitsDelete => "units.delete", Author, true;

    TopicsList => "topics.list", Signed, false;
    TopicsCreate => "topics.create", Author, true;
    TopicsUpdate => "topics.update", Author, true;
    TopicsReorder => "topics.reorder", Author, true;
    TopicsDelete => "topics.delete", Author, true;

    ContentsList => "contents.list", Signed, false;
    ContentsCreate => "contents.create", Author, true;
    ContentsUpdate => "contents.update", Author, true;
    ContentsDelete => "contents.delete", Author, true;

    ExercisesList => "exercises.list", Signed, false;
    ExercisesOpen => "exercises.open", Signed, false;
    ExercisesCreate => "exercises.create", Author, true;
    ExercisesUpdate => "exercises.update", Author, true;
    ExercisesDelete => "exercises.delete", Author, true;
    ExercisesComplete => "exercises.complete", Signed, true;
    ExercisesCheckCode => "exercises.checkCode", Signed, true;

    EvaluationsList => "evaluations.list", Signed, false;
    EvaluationsOpen => "evaluations.open", Signed, false;
    EvaluationsCreate => "evaluations.create", Author, true;
    EvaluationsUpdate => "evaluations.update", Author, true;
    EvaluationsDelete => "evaluations.delete", Author, true;
    EvaluationsPreviewRubric => "evaluations.previewRubric", Author, false;
    EvaluationsSubmit => "evaluations.submit", Signed, true;
    EvaluationsReset => "evaluations.reset", Author, true;
    EvaluationsResults => "evaluations.results", Author, false;

    BackupExport => "backup.export", Admin, true;
    BackupImport => "backup.import", Admin, true;
}

impl Access {
    pub fn allows(self, role: Role) -> bool {
        match self {
            Access::Public | Access::Signed => true,
            Access::Author => role.can_author(),
            Access::Admin => role == Role::Admin,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_method_name_parses_back() {
        for m in Method::ALL {
            assert_eq!(Method::parse(m.as_str()), Some(*m));
        }
        assert_eq!(Method::parse("manage"), None);
    }

    #[test]
    fn public_methods_never_mutate_under_a_session() {
        for m in Method::ALL {
            if m.access() == Access::Public {
                assert!(!m.is_mutating(), "{} is public but mutating", m.as_str());
            }
        }
    }

    #[test]
    fn access_levels_follow_roles() {
        assert!(Access::Author.allows(Role::Teacher));
        assert!(!Access::Author.allows(Role::Student));
        assert!(!Access::Admin.allows(Role::Teacher));
        assert!(Access::Signed.allows(Role::Student));
    }
}
