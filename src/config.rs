//! Environment-driven configuration (§6 "Environment", SPEC_FULL §A.3).
//!
//! Mirrors `continuum-core`'s `get_call_server_port` pattern — env var,
//! parse, fall back to a default — but collects *every* missing required
//! variable before failing, so the diagnostic is complete in one shot
//! rather than whack-a-mole.

use crate::error::ConfigError;

const DEFAULT_WORKER_COUNT: usize = 16;
const DEFAULT_HISTORY_BATCH_SIZE: usize = 10;
const DEFAULT_RATE_LIMIT_MS: u64 = 100;
const DEFAULT_WORKER_INIT_TIMEOUT_MS: u64 = 5000;

#[derive(Debug, Clone)]
pub struct Config {
    pub document_id: String,
    pub sheet_title: String,
    pub worker_count: usize,
    pub history_batch_size: usize,
    pub worker_rate_limit_ms: u64,
    pub worker_init_timeout_ms: u64,
    pub folder_map_path: String,
    pub recipient_cache_path: String,
    pub history_path: String,
    pub results_path: String,
    pub credentials_path: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut missing = Vec::new();

        let document_id = require_var("SHARE_DOCUMENT_ID", &mut missing);
        let sheet_title = require_var("SHARE_SHEET_TITLE", &mut missing);

        if !missing.is_empty() {
            return Err(ConfigError::MissingEnvVars(missing.join(", ")));
        }

        Ok(Self {
            document_id: document_id.unwrap(),
            sheet_title: sheet_title.unwrap(),
            worker_count: parse_env_or("SHARE_WORKER_COUNT", DEFAULT_WORKER_COUNT)?,
            history_batch_size: parse_env_or(
                "SHARE_HISTORY_BATCH_SIZE",
                DEFAULT_HISTORY_BATCH_SIZE,
            )?,
            worker_rate_limit_ms: parse_env_or(
                "SHARE_WORKER_RATE_LIMIT_MS",
                DEFAULT_RATE_LIMIT_MS,
            )?,
            worker_init_timeout_ms: parse_env_or(
                "SHARE_WORKER_INIT_TIMEOUT_MS",
                DEFAULT_WORKER_INIT_TIMEOUT_MS,
            )?,
            folder_map_path: string_env_or("SHARE_FOLDER_MAP_PATH", "folder-map.json"),
            recipient_cache_path: string_env_or(
                "SHARE_RECIPIENT_CACHE_PATH",
                "recipient-cache.json",
            ),
            history_path: string_env_or("SHARE_HISTORY_PATH", ".share-engine-history.json"),
            results_path: string_env_or("SHARE_RESULTS_PATH", "share-results.json"),
            credentials_path: string_env_or(
                "SHARE_CREDENTIALS_PATH",
                "credentials.json",
            ),
        })
    }
}

fn require_var(name: &'static str, missing: &mut Vec<String>) -> Option<String> {
    match std::env::var(name) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => {
            missing.push(name.to_string());
            None
        }
    }
}

fn string_env_or(name: &'static str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_env_or<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    match std::env::var(name) {
        Ok(value) => value.parse().map_err(|_| ConfigError::InvalidValue {
            name,
            value,
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-global; serialize tests that touch them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear() {
        for var in [
            "SHARE_DOCUMENT_ID",
            "SHARE_SHEET_TITLE",
            "SHARE_WORKER_COUNT",
            "SHARE_HISTORY_BATCH_SIZE",
            "SHARE_WORKER_RATE_LIMIT_MS",
            "SHARE_WORKER_INIT_TIMEOUT_MS",
        ] {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn missing_required_vars_lists_both() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear();
        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::MissingEnvVars(msg) => {
                assert!(msg.contains("SHARE_DOCUMENT_ID"));
                assert!(msg.contains("SHARE_SHEET_TITLE"));
            }
            other => panic!("expected MissingEnvVars, got {other:?}"),
        }
    }

    #[test]
    fn defaults_apply_when_optional_vars_unset() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear();
        std::env::set_var("SHARE_DOCUMENT_ID", "doc1");
        std::env::set_var("SHARE_SHEET_TITLE", "Sheet1");
        let cfg = Config::from_env().unwrap();
        assert_eq!(cfg.worker_count, DEFAULT_WORKER_COUNT);
        assert_eq!(cfg.history_batch_size, DEFAULT_HISTORY_BATCH_SIZE);
        clear();
    }
}
