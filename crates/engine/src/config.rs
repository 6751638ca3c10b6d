//! Engine configuration loaded from environment variables.

use std::time::Duration;

use roleshift_core::error::CoreError;
use roleshift_core::governor::{
    GovernorLimits, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_BATCH_USERS, DEFAULT_MAX_CONCURRENCY, DEFAULT_PER_USER_CEILING_MS,
    DEFAULT_PER_USER_COST_MS, DEFAULT_THROTTLE_MS,
};
use roleshift_core::snapshot::{RetentionPolicy, DEFAULT_RETENTION_DAYS};
use roleshift_core::user::DEFAULT_DISPLAY_NAME;

const DEFAULT_RATE_LIMIT: u32 = 60;
const DEFAULT_RATE_WINDOW_SECS: u64 = 60;
const DEFAULT_PURGE_INTERVAL_SECS: u64 = 3600;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub limits: GovernorLimits,
    pub retention: RetentionPolicy,
    /// Role changes one operator may request per window.
    pub rate_limit: u32,
    pub rate_window: Duration,
    pub default_display_name: String,
    /// AES-256 key for encrypted backups.
    pub backup_key: Option<[u8; 32]>,
    pub purge_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            limits: GovernorLimits::default(),
            retention: RetentionPolicy::default(),
            rate_limit: DEFAULT_RATE_LIMIT,
            rate_window: Duration::from_secs(DEFAULT_RATE_WINDOW_SECS),
            default_display_name: DEFAULT_DISPLAY_NAME.to_string(),
            backup_key: None,
            purge_interval: Duration::from_secs(DEFAULT_PURGE_INTERVAL_SECS),
        }
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl EngineConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable                        | Default          |
    /// |---------------------------------|------------------|
    /// | `MIGRATION_CHUNK_SIZE`          | `10`             |
    /// | `MIGRATION_MAX_CONCURRENCY`     | `4`              |
    /// | `MIGRATION_THROTTLE_MS`         | `50`             |
    /// | `MIGRATION_MAX_BATCH_USERS`     | `10000`          |
    /// | `MIGRATION_PER_USER_COST_MS`    | `5`              |
    /// | `MIGRATION_PER_USER_CEILING_MS` | `100`            |
    /// | `SNAPSHOT_RETENTION_DAYS`       | `90`             |
    /// | `SNAPSHOT_PURGE_INTERVAL_SECS`  | `3600`           |
    /// | `ROLE_CHANGE_RATE_LIMIT`        | `60`             |
    /// | `ROLE_CHANGE_RATE_WINDOW_SECS`  | `60`             |
    /// | `DEFAULT_DISPLAY_NAME`          | `Anonymous User` |
    /// | `BACKUP_ENCRYPTION_KEY`         | unset (64 hex)   |
    ///
    /// Fails only if `BACKUP_ENCRYPTION_KEY` is set but is not 32 hex-encoded bytes.
    pub fn from_env() -> Result<Self, CoreError> {
        let backup_key = match std::env::var("BACKUP_ENCRYPTION_KEY") {
            Ok(hex) if !hex.trim().is_empty() => Some(decode_key(hex.trim())?),
            _ => None,
        };

        Ok(Self {
            limits: GovernorLimits {
                chunk_size: env_or("MIGRATION_CHUNK_SIZE", DEFAULT_CHUNK_SIZE).max(1),
                max_concurrency: env_or("MIGRATION_MAX_CONCURRENCY", DEFAULT_MAX_CONCURRENCY).max(1),
                throttle_interval_ms: env_or("MIGRATION_THROTTLE_MS", DEFAULT_THROTTLE_MS),
                max_batch_users: env_or("MIGRATION_MAX_BATCH_USERS", DEFAULT_MAX_BATCH_USERS),
                per_user_cost_ms: env_or("MIGRATION_PER_USER_COST_MS", DEFAULT_PER_USER_COST_MS),
                per_user_ceiling_ms: env_or("MIGRATION_PER_USER_CEILING_MS", DEFAULT_PER_USER_CEILING_MS),
            },
            retention: RetentionPolicy {
                days: env_or("SNAPSHOT_RETENTION_DAYS", DEFAULT_RETENTION_DAYS).max(1),
            },
            rate_limit: env_or("ROLE_CHANGE_RATE_LIMIT", DEFAULT_RATE_LIMIT).max(1),
            rate_window: Duration::from_secs(env_or("ROLE_CHANGE_RATE_WINDOW_SECS", DEFAULT_RATE_WINDOW_SECS).max(1)),
            default_display_name: std::env::var("DEFAULT_DISPLAY_NAME")
                .unwrap_or_else(|_| DEFAULT_DISPLAY_NAME.to_string()),
            backup_key,
            purge_interval: Duration::from_secs(
                env_or("SNAPSHOT_PURGE_INTERVAL_SECS", DEFAULT_PURGE_INTERVAL_SECS).max(1),
            ),
        })
    }
}

/// Decode a 64-character hex string into an AES-256 key.
pub fn decode_key(hex: &str) -> Result<[u8; 32], CoreError> {
    let invalid = || CoreError::Validation("BACKUP_ENCRYPTION_KEY must be 64 hex characters".into());
    if hex.len() != 64 || !hex.is_ascii() {
        return Err(invalid());
    }
    let mut key = [0u8; 32];
    for (i, byte) in key.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).map_err(|_| invalid())?;
    }
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.limits.chunk_size, 10);
        assert_eq!(config.retention.days, 90);
        assert_eq!(config.default_display_name, "Anonymous User");
        assert!(config.backup_key.is_none());
    }

    #[test]
    fn decode_key_accepts_64_hex_chars() {
        let key = decode_key(&"ab".repeat(32)).unwrap();
        assert!(key.iter().all(|b| *b == 0xab));
    }

    #[test]
    fn decode_key_rejects_bad_input() {
        assert!(decode_key("abcd").is_err());
        assert!(decode_key(&"zz".repeat(32)).is_err());
    }
}
