use std::str::FromStr;

use crate::auth::jwt::JwtConfig;

/// HTTP server settings. Engine tuning lives in `roleshift_engine::EngineConfig`.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Parsed from comma-separated `CORS_ORIGINS`.
    pub cors_origins: Vec<String>,
    /// Applies to synchronous batches too, so keep it above the longest
    /// batch you expect to run inline.
    pub request_timeout_secs: u64,
    /// How long to wait for background jobs after shutdown.
    pub shutdown_timeout_secs: u64,
    pub jwt: JwtConfig,
}

impl ServerConfig {
    /// | Env Var                 | Default                    |
    /// |-------------------------|----------------------------|
    /// | `HOST`                  | `0.0.0.0`                  |
    /// | `PORT`                  | `3000`                     |
    /// | `CORS_ORIGINS`          | `http://localhost:5173`    |
    /// | `REQUEST_TIMEOUT_SECS`  | `30`                       |
    /// | `SHUTDOWN_TIMEOUT_SECS` | `10`                       |
    ///
    /// Plus the `JWT_*` variables read by [`JwtConfig::from_env`].
    pub fn from_env() -> Self {
        let cors_origins = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();

        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: parse_env("PORT", 3000),
            cors_origins,
            request_timeout_secs: parse_env("REQUEST_TIMEOUT_SECS", 30),
            shutdown_timeout_secs: parse_env("SHUTDOWN_TIMEOUT_SECS", 10),
            jwt: JwtConfig::from_env(),
        }
    }
}

/// Read and parse an environment variable, falling back to `default` when
/// it is unset.
///
/// # Panics
///
/// Panics at startup if the variable is set but does not parse.
pub(crate) fn parse_env<T: FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .unwrap_or_else(|_| panic!("{name} must be a valid {}", std::any::type_name::<T>())),
        Err(_) => default,
    }
}
