use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use lazy_static::lazy_static;
use rand::rngs::OsRng;
use thiserror::Error;
use tracing::{error, warn};

#[derive(Debug, Error)]
#[error("password hashing failed: {0}")]
pub struct PasswordError(String);

/// Hashes `plain` with Argon2id and a fresh OS-random salt.
///
/// The result is a PHC string carrying algorithm, version, cost parameters,
/// salt and digest, so it can be verified without any other state.
pub fn hash_password(plain: &[u8]) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(plain, &salt)
        .map_err(|e| {
            error!(error = %e, "argon2 hash_password error");
            PasswordError(e.to_string())
        })?
        .to_string();
    Ok(hash)
}

fn is_bcrypt(hash: &str) -> bool {
    ["$2a$", "$2b$", "$2y$"].iter().any(|p| hash.starts_with(p))
}

/// Checks `plain` against a stored hash. Argon2 PHC strings are the default;
/// bcrypt modular-crypt strings written by the earlier site are still
/// accepted. Malformed hashes never match.
pub fn verify_password(plain: &[u8], hash: &str) -> bool {
    if is_bcrypt(hash) {
        return match bcrypt::verify(plain, hash) {
            Ok(ok) => ok,
            Err(e) => {
                warn!(error = %e, "stored bcrypt hash is malformed");
                false
            }
        };
    }

    let parsed = match PasswordHash::new(hash) {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "stored password hash is malformed");
            return false;
        }
    };
    Argon2::default().verify_password(plain, &parsed).is_ok()
}

lazy_static! {
    // Verified against when the username is unknown, so a failed login costs
    // the same whether or not the account exists.
    static ref DUMMY_HASH: Option<String> = hash_password(b"dummy-password").ok();
}

pub fn burn_verification(plain: &[u8]) {
    if let Some(hash) = DUMMY_HASH.as_deref() {
        let _ = verify_password(plain, hash);
    }
}
