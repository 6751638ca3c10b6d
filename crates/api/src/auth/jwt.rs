//! Operator bearer tokens.
//!
//! Role changes are performed by operators holding HS256 tokens minted by the
//! identity service that fronts this API. The subject is the operator's user
//! id and ends up in `performed_by` on every audit entry, so a token without
//! a usable subject or role is refused outright.
//!
//! [`generate_access_token`] exists for tests and local tooling.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use roleshift_core::types::DbId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Operator user id.
    pub sub: DbId,
    /// Role name as stored on the user (e.g. `"ADMIN"`).
    pub role: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
    /// Issuing service, checked when `JwtConfig::issuer` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub access_token_expiry_mins: i64,
    /// Expected `iss` claim. `None` accepts tokens from any issuer.
    pub issuer: Option<String>,
    /// Clock skew tolerated on `exp`, in seconds.
    pub leeway_secs: u64,
}

const DEFAULT_ACCESS_EXPIRY_MINS: i64 = 15;
const DEFAULT_LEEWAY_SECS: u64 = 60;

impl JwtConfig {
    /// | Env Var                    | Required | Default |
    /// |----------------------------|----------|---------|
    /// | `JWT_SECRET`               | **yes**  | --      |
    /// | `JWT_ACCESS_EXPIRY_MINS`   | no       | `15`    |
    /// | `JWT_ISSUER`               | no       | --      |
    /// | `JWT_LEEWAY_SECS`          | no       | `60`    |
    ///
    /// # Panics
    ///
    /// Panics if `JWT_SECRET` is missing or empty, or a number fails to parse.
    pub fn from_env() -> Self {
        let secret = std::env::var("JWT_SECRET").unwrap_or_default();
        assert!(!secret.is_empty(), "JWT_SECRET must be set to a non-empty value");

        Self {
            secret,
            access_token_expiry_mins: crate::config::parse_env(
                "JWT_ACCESS_EXPIRY_MINS",
                DEFAULT_ACCESS_EXPIRY_MINS,
            ),
            issuer: std::env::var("JWT_ISSUER").ok().filter(|s| !s.trim().is_empty()),
            leeway_secs: crate::config::parse_env("JWT_LEEWAY_SECS", DEFAULT_LEEWAY_SECS),
        }
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = self.leeway_secs;
        if let Some(issuer) = &self.issuer {
            validation.set_issuer(&[issuer]);
        }
        validation
    }
}

/// Mint an operator token.
pub fn generate_access_token(
    user_id: DbId,
    role: &str,
    config: &JwtConfig,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = chrono::Utc::now().timestamp();
    let claims = Claims {
        sub: user_id,
        role: role.to_string(),
        exp: now + config.access_token_expiry_mins * 60,
        iat: now,
        jti: Uuid::new_v4().to_string(),
        iss: config.issuer.clone(),
    };

    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(config.secret.as_bytes()),
    )
}

/// Verify signature, expiry, and issuer, then return the claims.
pub fn validate_token(token: &str, config: &JwtConfig) -> Result<Claims, jsonwebtoken::errors::Error> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.secret.as_bytes()),
        &config.validation(),
    )?;
    if data.claims.role.trim().is_empty() {
        return Err(jsonwebtoken::errors::ErrorKind::InvalidToken.into());
    }
    Ok(data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> JwtConfig {
        JwtConfig {
            secret: "test-secret-that-is-long-enough-for-hs256".to_string(),
            access_token_expiry_mins: 15,
            issuer: None,
            leeway_secs: DEFAULT_LEEWAY_SECS,
        }
    }

    #[test]
    fn operator_token_carries_id_and_role() {
        let config = test_config();
        let token = generate_access_token(42, "ADMIN", &config).unwrap();
        let claims = validate_token(&token, &config).unwrap();

        assert_eq!(claims.sub, 42);
        assert_eq!(claims.role, "ADMIN");
        assert!(claims.exp > claims.iat);
        assert!(claims.iss.is_none());
    }

    #[test]
    fn expired_token_is_refused() {
        let config = JwtConfig {
            access_token_expiry_mins: -5,
            ..test_config()
        };
        let token = generate_access_token(1, "ADMIN", &config).unwrap();
        assert!(validate_token(&token, &config).is_err());
    }

    #[test]
    fn foreign_secret_is_refused() {
        let token = generate_access_token(1, "ADMIN", &test_config()).unwrap();
        let other = JwtConfig {
            secret: "a-completely-different-secret-value".to_string(),
            ..test_config()
        };
        assert!(validate_token(&token, &other).is_err());
    }

    #[test]
    fn issuer_is_enforced_when_configured() {
        let identity = JwtConfig {
            issuer: Some("identity".to_string()),
            ..test_config()
        };
        let token = generate_access_token(7, "ADMIN", &identity).unwrap();
        assert_eq!(validate_token(&token, &identity).unwrap().iss.as_deref(), Some("identity"));

        let unissued = generate_access_token(7, "ADMIN", &test_config()).unwrap();
        assert!(validate_token(&unissued, &identity).is_err());
    }

    #[test]
    fn blank_role_is_refused() {
        let config = test_config();
        let token = generate_access_token(7, "  ", &config).unwrap();
        assert!(validate_token(&token, &config).is_err());
    }
}
