use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use thiserror::Error;

/// Retry bound for API key generation. With 256-bit keys a collision is
/// effectively unreachable; the bound exists so a misconfigured key space
/// fails loudly instead of looping forever.
pub const KEY_RETRY_LIMIT: usize = 100;

const API_KEY_BYTES: usize = 32;
const ANON_LABEL_LEN: usize = 20;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("exhausted retry bound generating a unique API key")]
    KeySpaceExhausted,
    #[error("password hashing failed: {0}")]
    Hash(String),
}

/// Hash a password with argon2id and a fresh random salt. Output is a PHC
/// string carrying the salt and cost parameters.
pub fn hash_password(password: &str) -> Result<String, IdentityError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| IdentityError::Hash(e.to_string()))?;
    Ok(hash.to_string())
}

/// Check a password against a stored PHC hash. A malformed stored hash
/// verifies false rather than erroring; the caller treats both the same way.
pub fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// One API key candidate: 32 bytes from the OS RNG, hex-encoded (URL-safe).
pub fn new_api_key() -> String {
    let mut bytes = [0u8; API_KEY_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Generate an API key not present in `existing`. The storage-backed path
/// (`store::rotate_api_key`) enforces the same invariant via the unique
/// index; this form serves callers holding a key-space snapshot.
pub fn generate_api_key(existing: &HashSet<String>) -> Result<String, IdentityError> {
    generate_api_key_with(new_api_key, existing)
}

fn generate_api_key_with(
    mut gen: impl FnMut() -> String,
    existing: &HashSet<String>,
) -> Result<String, IdentityError> {
    for _ in 0..KEY_RETRY_LIMIT {
        let key = gen();
        if !existing.contains(&key) {
            return Ok(key);
        }
    }
    Err(IdentityError::KeySpaceExhausted)
}

/// Fixed-length pseudonym for a username: the first 20 hex chars of its
/// SHA-256 digest. Deterministic, so anonymized exports stay internally
/// consistent for a given user across runs.
pub fn anonymize(username: &str) -> String {
    let digest = Sha256::digest(username.as_bytes());
    let mut label = hex::encode(digest);
    label.truncate(ANON_LABEL_LEN);
    label
}
