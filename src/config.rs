use std::{str::FromStr, time::Duration};

use crate::models::Language;

/// Runtime settings, read from the environment (and `.env` via dotenvy).
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_addr: String,
    pub database_url: String,
    /// Language for rooms created without one.
    pub default_language: Language,
    /// Upper bound for one outbound frame to reach a peer before it is dropped.
    pub send_timeout: Duration,
    /// Frames queued per connection before sends start waiting.
    pub outbound_queue: usize,
    /// Largest accepted buffer, in bytes. Also the HTTP body limit.
    pub max_code_bytes: usize,
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("{key}: invalid value {value:?}")]
    Invalid { key: &'static str, value: String },
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8000".into(),
            database_url: "sqlite://pair.db?mode=rwc".into(),
            default_language: Language::Python,
            send_timeout: Duration::from_millis(5_000),
            outbound_queue: 64,
            max_code_bytes: 1024 * 1024,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = Self::default();
        let send_timeout_ms: u64 = parse(&lookup, "WS_SEND_TIMEOUT_MS", 5_000)?;
        let outbound_queue: usize = parse(&lookup, "WS_OUTBOUND_QUEUE", d.outbound_queue)?;
        if outbound_queue == 0 {
            return Err(ConfigError::Invalid { key: "WS_OUTBOUND_QUEUE", value: "0".into() });
        }

        Ok(Self {
            bind_addr: lookup("BIND_ADDR").unwrap_or(d.bind_addr),
            database_url: lookup("DATABASE_URL").unwrap_or(d.database_url),
            default_language: lookup("DEFAULT_LANGUAGE")
                .filter(|s| !s.trim().is_empty())
                .map(|s| Language::from(s.as_str()))
                .unwrap_or(d.default_language),
            send_timeout: Duration::from_millis(send_timeout_ms),
            outbound_queue,
            max_code_bytes: parse(&lookup, "MAX_CODE_BYTES", d.max_code_bytes)?,
        })
    }
}

fn parse<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}
