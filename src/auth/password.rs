//! Password hashing and verification using Argon2id

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

use crate::types::GatekeeperError;

pub const MIN_PASSWORD_LEN: usize = 8;

/// Hash a password, returning the PHC string (salt and parameters included)
pub fn hash_password(password: &str) -> Result<String, GatekeeperError> {
    let salt = SaltString::generate(&mut OsRng);

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| GatekeeperError::Dependency(format!("Failed to hash password: {e}")))
}

/// Check `password` against a stored PHC hash
pub fn verify_password(password: &str, hash: &str) -> Result<bool, GatekeeperError> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|e| GatekeeperError::Dependency(format!("Invalid password hash format: {e}")))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

/// Checks shared by signup, admin creation and reset: present, confirmed,
/// and at least `MIN_PASSWORD_LEN` characters.
pub fn validate_new_password(password: &str, confirm: &str) -> Result<(), GatekeeperError> {
    if password.is_empty() {
        return Err(GatekeeperError::Validation("Password is required".into()));
    }
    if password != confirm {
        return Err(GatekeeperError::Validation(
            "Password and confirmation do not match".into(),
        ));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(GatekeeperError::Validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}
