use crate::session::MAX_SESSION_TTL_MINUTES;
use anyhow::{anyhow, Context};
use std::path::PathBuf;
use tracing::Level;

const ENV_WORKSPACE: &str = "LSVCODED_WORKSPACE";
const ENV_LOG: &str = "LSVCODED_LOG";
const ENV_SESSION_TTL: &str = "LSVCODED_SESSION_TTL_MINUTES";

const DEFAULT_SESSION_TTL_MINUTES: i64 = 480;

#[derive(Debug, Clone)]
pub struct Config {
    pub workspace: Option<PathBuf>,
    pub log_level: Level,
    pub session_ttl_minutes: i64,
}

impl Config {
    /// Reads `.env` (if any) and then the process environment.
    pub fn from_env() -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let workspace = lookup(ENV_WORKSPACE)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        let log_level = match lookup(ENV_LOG) {
            Some(raw) if !raw.trim().is_empty() => parse_level(&raw)?,
            _ => Level::INFO,
        };

        let session_ttl_minutes = match lookup(ENV_SESSION_TTL) {
            Some(raw) if !raw.trim().is_empty() => {
                let v: i64 = raw
                    .trim()
                    .parse()
                    .with_context(|| format!("{} must be an integer", ENV_SESSION_TTL))?;
                if v <= 0 {
                    return Err(anyhow!("{} must be positive", ENV_SESSION_TTL));
                }
                if v > MAX_SESSION_TTL_MINUTES {
                    return Err(anyhow!(
                        "{} must be at most {}",
                        ENV_SESSION_TTL,
                        MAX_SESSION_TTL_MINUTES
                    ));
                }
                v
            }
            _ => DEFAULT_SESSION_TTL_MINUTES,
        };

        Ok(Config {
            workspace,
            log_level,
            session_ttl_minutes,
        })
    }
}

fn parse_level(raw: &str) -> anyhow::Result<Level> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "error" => Ok(Level::ERROR),
        "warn" | "warning" => Ok(Level::WARN),
        "info" => Ok(Level::INFO),
        "debug" => Ok(Level::DEBUG),
        "trace" => Ok(Level::TRACE),
        other => Err(anyhow!("{}: unknown log level '{}'", ENV_LOG, other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> anyhow::Result<Config> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = config_from(&[]).expect("config");
        assert!(cfg.workspace.is_none());
        assert_eq!(cfg.log_level, Level::INFO);
        assert_eq!(cfg.session_ttl_minutes, DEFAULT_SESSION_TTL_MINUTES);
    }

    #[test]
    fn values_are_read_and_trimmed() {
        let cfg = config_from(&[
            (ENV_WORKSPACE, " /tmp/ws "),
            (ENV_LOG, "DEBUG"),
            (ENV_SESSION_TTL, "15"),
        ])
        .expect("config");
        assert_eq!(cfg.workspace, Some(PathBuf::from("/tmp/ws")));
        assert_eq!(cfg.log_level, Level::DEBUG);
        assert_eq!(cfg.session_ttl_minutes, 15);
    }

    #[test]
    fn invalid_values_are_errors() {
        assert!(config_from(&[(ENV_LOG, "loud")]).is_err());
        assert!(config_from(&[(ENV_SESSION_TTL, "abc")]).is_err());
        assert!(config_from(&[(ENV_SESSION_TTL, "0")]).is_err());
    }

    #[test]
    fn session_ttl_has_an_upper_bound() {
        let max = MAX_SESSION_TTL_MINUTES.to_string();
        let cfg = config_from(&[(ENV_SESSION_TTL, max.as_str())]).expect("config");
        assert_eq!(cfg.session_ttl_minutes, MAX_SESSION_TTL_MINUTES);

        let over = (MAX_SESSION_TTL_MINUTES + 1).to_string();
        assert!(config_from(&[(ENV_SESSION_TTL, over.as_str())]).is_err());
        assert!(config_from(&[(ENV_SESSION_TTL, "1000000000000")]).is_err());
        let huge = i64::MAX.to_string();
        assert!(config_from(&[(ENV_SESSION_TTL, huge.as_str())]).is_err());
    }
}
