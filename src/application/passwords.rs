//! Password verification against stored PHC-format argon2 hashes.

use argon2::password_hash::{Error as HashError, PasswordHash, PasswordVerifier};
use argon2::Argon2;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("stored password hash is malformed: {0}")]
    MalformedHash(String),
}

/// Check `password` against a PHC hash. A wrong password is `Ok(false)` —
/// only an unparseable stored hash is an error.
pub fn verify_password(password: &str, phc_hash: &str) -> Result<bool, PasswordError> {
    let parsed =
        PasswordHash::new(phc_hash).map_err(|err| PasswordError::MalformedHash(err.to_string()))?;
    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(HashError::Password) => Ok(false),
        Err(err) => Err(PasswordError::MalformedHash(err.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use argon2::password_hash::rand_core::OsRng;
    use argon2::password_hash::{PasswordHasher, SaltString};

    use super::*;

    fn hash(password: &str) -> String {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .expect("hashing succeeds")
            .to_string()
    }

    #[test]
    fn correct_password_verifies() {
        let stored = hash("grid-operator-9");
        assert!(verify_password("grid-operator-9", &stored).expect("verification runs"));
    }

    #[test]
    fn wrong_password_is_false_not_error() {
        let stored = hash("grid-operator-9");
        assert!(!verify_password("wrong", &stored).expect("verification runs"));
    }

    #[test]
    fn malformed_hash_is_an_error() {
        assert!(verify_password("anything", "not-a-phc-string").is_err());
    }
}
