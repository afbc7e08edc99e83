use crate::model::Role;
use anyhow::anyhow;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use uuid::Uuid;

pub const MIN_PASSWORD_LEN: usize = 6;
/// One year.
pub const MAX_SESSION_TTL_MINUTES: i64 = 525_600;

#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub csrf_token: String,
    pub user_id: String,
    pub username: String,
    pub role: Role,
    pub section: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// In-memory sessions keyed by token. Use slides the expiry forward.
pub struct SessionStore {
    sessions: HashMap<String, Session>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl_minutes: i64) -> Self {
        SessionStore {
            sessions: HashMap::new(),
            ttl: Duration::minutes(ttl_minutes.clamp(1, MAX_SESSION_TTL_MINUTES)),
        }
    }

    pub fn open(
        &mut self,
        user_id: &str,
        username: &str,
        role: Role,
        section: Option<String>,
        now: DateTime<Utc>,
    ) -> Session {
        self.sessions.retain(|_, s| s.expires_at > now);
        let session = Session {
            token: Uuid::new_v4().simple().to_string(),
            csrf_token: Uuid::new_v4().simple().to_string(),
            user_id: user_id.to_string(),
            username: username.to_string(),
            role,
            section,
            expires_at: expiry(now, self.ttl),
        };
        self.sessions
            .insert(session.token.clone(), session.clone());
        session
    }

    pub fn get(&mut self, token: &str, now: DateTime<Utc>) -> Option<Session> {
        let expired = match self.sessions.get(token) {
            None => return None,
            Some(s) => s.expires_at <= now,
        };
        if expired {
            self.sessions.remove(token);
            return None;
        }
        let ttl = self.ttl;
        self.sessions.get_mut(token).map(|s| {
            s.expires_at = expiry(now, ttl);
            s.clone()
        })
    }

    pub fn close(&mut self, token: &str) -> bool {
        self.sessions.remove(token).is_some()
    }

    /// Drops every session of `user_id`; returns how many were dropped.
    pub fn close_user(&mut self, user_id: &str) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, s| s.user_id != user_id);
        before - self.sessions.len()
    }

    pub fn clear(&mut self) {
        self.sessions.clear();
    }
}

fn expiry(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

pub fn hash_password(plain: &str) -> anyhow::Result<String> {
    let salt = SaltString::encode_b64(Uuid::new_v4().as_bytes())
        .map_err(|e| anyhow!("failed to build password salt: {e}"))?;
    let hash = Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| anyhow!("password hashing failed: {e}"))?;
    Ok(hash.to_string())
}

pub fn verify_password(plain: &str, stored: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored) else {
        return false;
    };
    Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sessions_expire_and_slide() {
        let mut store = SessionStore::new(10);
        let t0 = Utc::now();
        let s = store.open("u1", "ana", Role::Student, None, t0);
        assert_ne!(s.token, s.csrf_token);

        let later = t0 + Duration::minutes(9);
        assert!(store.get(&s.token, later).is_some());
        // Expiry moved to later + 10.
        assert!(store.get(&s.token, later + Duration::minutes(9)).is_some());
        assert!(store
            .get(&s.token, later + Duration::minutes(30))
            .is_none());
        assert!(store.get(&s.token, later).is_none());
    }

    #[test]
    fn close_user_drops_all_their_sessions() {
        let mut store = SessionStore::new(10);
        let now = Utc::now();
        let a = store.open("u1", "ana", Role::Student, None, now);
        let _ = store.open("u1", "ana", Role::Student, None, now);
        let b = store.open("u2", "beto", Role::Teacher, None, now);
        assert_eq!(store.close_user("u1"), 2);
        assert!(store.get(&a.token, now).is_none());
        assert!(store.get(&b.token, now).is_some());
        assert!(store.close(&b.token));
        assert!(!store.close(&b.token));
    }

    #[test]
    fn opening_a_session_sweeps_expired_ones() {
        let mut store = SessionStore::new(10);
        let t0 = Utc::now();
        let stale = store.open("u1", "ana", Role::Student, None, t0);
        let fresh = store.open("u2", "beto", Role::Teacher, None, t0 + Duration::minutes(30));
        assert_eq!(store.sessions.len(), 1);
        assert!(!store.sessions.contains_key(&stale.token));
        assert!(store.sessions.contains_key(&fresh.token));
    }

    #[test]
    fn huge_ttl_is_clamped_and_never_overflows() {
        let mut store = SessionStore::new(i64::MAX);
        assert_eq!(store.ttl, Duration::minutes(MAX_SESSION_TTL_MINUTES));
        let s = store.open("u1", "ana", Role::Student, None, DateTime::<Utc>::MAX_UTC);
        assert_eq!(s.expires_at, DateTime::<Utc>::MAX_UTC);
        assert!(store.get(&s.token, Utc::now()).is_some());
    }

    #[test]
    fn password_hash_verifies() {
        let h = hash_password("secreto1").expect("hash");
        assert!(h.starts_with("$argon2"));
        assert!(verify_password("secreto1", &h));
        assert!(!verify_password("otro", &h));
        assert!(!verify_password("secreto1", "not-a-hash"));
    }
}
