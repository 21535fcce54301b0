//! Session tokens
//!
//! HS256 JWTs carrying identity only. Roles are never embedded: every request
//! reloads the user and recomputes its authority from live memberships.

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::model::User;
use crate::types::GatekeeperError;

const DEV_SECRET: &str = "gatekeeper-dev-mode-secret-not-for-production";
const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    pub username: String,
    /// Issued at (Unix timestamp)
    pub iat: u64,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
}

impl Claims {
    pub fn user_id(&self) -> Result<Uuid, GatekeeperError> {
        Uuid::parse_str(&self.sub)
            .map_err(|_| GatekeeperError::Unauthorized("Malformed session subject".into()))
    }
}

#[derive(Debug)]
pub struct TokenValidationResult {
    pub valid: bool,
    pub claims: Option<Claims>,
    pub error: Option<String>,
}

impl TokenValidationResult {
    pub fn valid(claims: Claims) -> Self {
        Self {
            valid: true,
            claims: Some(claims),
            error: None,
        }
    }

    pub fn invalid(error: impl Into<String>) -> Self {
        Self {
            valid: false,
            claims: None,
            error: Some(error.into()),
        }
    }

    pub fn into_claims(self) -> Result<Claims, GatekeeperError> {
        match self.claims {
            Some(claims) if self.valid => Ok(claims),
            _ => Err(GatekeeperError::Unauthorized(
                self.error.unwrap_or_else(|| "Invalid token".into()),
            )),
        }
    }
}

fn now_secs() -> Result<u64, GatekeeperError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|e| GatekeeperError::Internal(format!("System time error: {e}")))
}

#[derive(Clone)]
pub struct SessionIssuer {
    secret: String,
    expiry_seconds: u64,
}

impl SessionIssuer {
    /// Fails when the secret is empty or shorter than 32 characters
    pub fn new(secret: String, expiry_seconds: u64) -> Result<Self, GatekeeperError> {
        if secret.is_empty() {
            return Err(GatekeeperError::Config(
                "JWT_SECRET is required outside dev mode".into(),
            ));
        }
        if secret.len() < MIN_SECRET_LEN {
            return Err(GatekeeperError::Config(format!(
                "JWT_SECRET must be at least {MIN_SECRET_LEN} characters"
            )));
        }
        Ok(Self {
            secret,
            expiry_seconds,
        })
    }

    /// Issuer with a fixed, publicly known secret
    pub fn new_dev(expiry_seconds: u64) -> Self {
        Self {
            secret: DEV_SECRET.into(),
            expiry_seconds,
        }
    }

    pub fn expiry_seconds(&self) -> u64 {
        self.expiry_seconds
    }

    pub fn issue(&self, user: &User) -> Result<String, GatekeeperError> {
        let now = now_secs()?;
        let claims = Claims {
            sub: user.id.to_string(),
            username: user.username.clone(),
            iat: now,
            exp: now + self.expiry_seconds,
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| GatekeeperError::Internal(format!("Failed to issue session: {e}")))
    }

    pub fn verify(&self, token: &str) -> TokenValidationResult {
        match decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        ) {
            Ok(data) => TokenValidationResult::valid(data.claims),
            Err(err) => {
                use jsonwebtoken::errors::ErrorKind;
                let message = match err.kind() {
                    ErrorKind::ExpiredSignature => "Session expired",
                    ErrorKind::InvalidSignature => "Invalid signature",
                    ErrorKind::InvalidToken => "Invalid token",
                    _ => "Token validation failed",
                };
                TokenValidationResult::invalid(message)
            }
        }
    }
}

/// Token from an `Authorization` header: `Bearer <token>` or a bare token
pub fn extract_token_from_header(auth_header: Option<&str>) -> Option<&str> {
    let header = auth_header?;

    if let Some(token) = header.strip_prefix("Bearer ") {
        let token = token.trim();
        return (!token.is_empty()).then_some(token);
    }

    if !header.contains(' ') {
        let token = header.trim();
        if !token.is_empty() {
            return Some(token);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::UserStatus;

    fn issuer() -> SessionIssuer {
        SessionIssuer::new("test-secret-that-is-at-least-32-characters-long".into(), 3600).unwrap()
    }

    #[test]
    fn test_issue_and_verify() {
        let user = User::new("alice", "Alice", String::new(), UserStatus::Active);
        let token = issuer().issue(&user).unwrap();

        let claims = issuer().verify(&token).into_claims().unwrap();
        assert_eq!(claims.username, "alice");
        assert_eq!(claims.user_id().unwrap(), user.id);
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn test_wrong_secret() {
        let user = User::new("alice", "Alice", String::new(), UserStatus::Active);
        let token = issuer().issue(&user).unwrap();
        let other =
            SessionIssuer::new("different-secret-that-is-at-least-32-characters".into(), 3600)
                .unwrap();

        let result = other.verify(&token);
        assert!(!result.valid);
        assert!(matches!(
            result.into_claims(),
            Err(GatekeeperError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_garbage_token() {
        assert!(!issuer().verify("not-a-jwt").valid);
    }

    #[test]
    fn test_secret_validation() {
        assert!(SessionIssuer::new("short".into(), 3600).is_err());
        assert!(SessionIssuer::new(String::new(), 3600).is_err());
        assert!(SessionIssuer::new("this-secret-is-at-least-32-chars-long".into(), 3600).is_ok());
    }

    #[test]
    fn test_extract_token_from_header() {
        assert_eq!(extract_token_from_header(Some("Bearer abc123")), Some("abc123"));
        assert_eq!(extract_token_from_header(Some("abc123")), Some("abc123"));
        assert_eq!(extract_token_from_header(None), None);
        assert_eq!(extract_token_from_header(Some("")), None);
        assert_eq!(extract_token_from_header(Some("Bearer ")), None);
        assert_eq!(extract_token_from_header(Some("Basic abc123")), None);
    }
}
