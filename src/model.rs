use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "Usuario")]
    Student,
    #[serde(rename = "Docente")]
    Teacher,
    #[serde(rename = "Administrador")]
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Student => "Usuario",
            Role::Teacher => "Docente",
            Role::Admin => "Administrador",
        }
    }

    pub fn parse(raw: &str) -> Option<Role> {
        match raw.trim() {
            "Usuario" => Some(Role::Student),
            "Docente" => Some(Role::Teacher),
            "Administrador" => Some(Role::Admin),
            _ => None,
        }
    }

    /// Teachers and administrators author content.
    pub fn can_author(self) -> bool {
        matches!(self, Role::Teacher | Role::Admin)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Text,
    Document,
    Video,
    Link,
    Image,
}

impl ContentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentKind::Text => "text",
            ContentKind::Document => "document",
            ContentKind::Video => "video",
            ContentKind::Link => "link",
            ContentKind::Image => "image",
        }
    }

    pub fn parse(raw: &str) -> Option<ContentKind> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "text" => Some(ContentKind::Text),
            "document" => Some(ContentKind::Document),
            "video" => Some(ContentKind::Video),
            "link" => Some(ContentKind::Link),
            "image" => Some(ContentKind::Image),
            _ => None,
        }
    }

    pub fn validate_body(self, body: &str) -> Result<(), &'static str> {
        let body = body.trim();
        if body.is_empty() {
            return Err("body must not be empty");
        }
        match self {
            ContentKind::Link | ContentKind::Video => {
                if body.starts_with("http://") || body.starts_with("https://") {
                    Ok(())
                } else {
                    Err("body must be an http(s) URL")
                }
            }
            _ => Ok(()),
        }
    }
}
