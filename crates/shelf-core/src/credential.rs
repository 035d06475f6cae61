//! Password hashing and verification.
//!
//! Digests are Argon2id PHC strings (`$argon2id$v=19$m=...,t=...,p=...$salt$hash`).
//! The algorithm tag travels with the digest, so stored hashes keep verifying
//! if the default parameters change later.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;

use crate::error::{Result, ShelfError};

/// Salt length in bytes.
const SALT_LENGTH: usize = 16;

/// Hash a password for storage.
///
/// # Errors
///
/// Returns `ShelfError::Validation` for an empty password and
/// `ShelfError::Crypto` if salt generation or hashing fails.
pub fn hash_password(password: &str) -> Result<String> {
    validate_password(password)?;

    let mut salt_bytes = [0u8; SALT_LENGTH];
    getrandom::getrandom(&mut salt_bytes)
        .map_err(|e| ShelfError::Crypto(format!("Failed to generate salt: {}", e)))?;
    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| ShelfError::Crypto(format!("Failed to encode salt: {}", e)))?;

    let digest = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| ShelfError::Crypto(format!("Failed to hash password: {}", e)))?;
    Ok(digest.to_string())
}

/// Check a password against a stored digest.
///
/// A digest that does not parse verifies as `false`. The hash comparison
/// itself is constant-time.
pub fn verify_password(password: &str, digest: &str) -> bool {
    let parsed = match PasswordHash::new(digest) {
        Ok(parsed) => parsed,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Reject empty or whitespace-only passwords.
pub fn validate_password(password: &str) -> Result<()> {
    if password.trim().is_empty() {
        return Err(ShelfError::Validation(
            "Password cannot be empty".to_string(),
        ));
    }
    Ok(())
}
