//! Typed environment variable lookups
//!
//! Unset variables fall back to a default; set-but-unparseable variables are
//! an error rather than being silently replaced by the default.

use std::fmt::Display;
use std::str::FromStr;

use crate::error::{CdpError, Result};

/// Read `key` and parse it, returning `default` when the variable is unset.
pub fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    Ok(env_opt(key)?.unwrap_or(default))
}

/// Read `key` and parse it, returning `None` when unset or empty.
pub fn env_opt<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    match std::env::var(key) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| CdpError::InvalidEnv {
                key: key.to_string(),
                value: raw.clone(),
                reason: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}

/// Read `key` as a string, returning `default` when unset.
pub fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
