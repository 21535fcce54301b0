//! Credential collaborator
//!
//! Provides:
//! - Password hashing with Argon2
//! - JWT session issuing and verification
//! - One-time password reset tokens

pub mod jwt;
pub mod password;
pub mod reset;

pub use jwt::{extract_token_from_header, Claims, SessionIssuer, TokenValidationResult};
pub use password::{hash_password, validate_new_password, verify_password, MIN_PASSWORD_LEN};
pub use reset::ResetTokens;
