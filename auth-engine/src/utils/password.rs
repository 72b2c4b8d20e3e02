use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use std::fmt;

/// Plaintext password. `Debug` is redacted so it never reaches a log line.
#[derive(Clone)]
pub struct Password(String);

impl Password {
    pub fn new(password: impl Into<String>) -> Self {
        Self(password.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(***)")
    }
}

/// Hash a password with Argon2id and a fresh random salt (PHC string format).
pub fn hash_password(password: &Password) -> Result<String, anyhow::Error> {
    let salt = SaltString::generate(&mut OsRng);

    let password_hash = Argon2::default()
        .hash_password(password.as_str().as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?
        .to_string();

    Ok(password_hash)
}

/// Check a password against a stored PHC hash.
///
/// Passwordless accounts (`None`) and unparsable hashes never match. The
/// comparison itself is constant-time inside `argon2`.
pub fn password_matches(password: &Password, stored_hash: Option<&str>) -> bool {
    let Some(stored_hash) = stored_hash else {
        return false;
    };

    let parsed_hash = match PasswordHash::new(stored_hash) {
        Ok(hash) => hash,
        Err(e) => {
            tracing::warn!(error = %e, "Stored password hash is not a valid PHC string");
            return false;
        }
    };

    Argon2::default()
        .verify_password(password.as_str().as_bytes(), &parsed_hash)
        .is_ok()
}

/// Run [`hash_password`] on the blocking pool.
pub async fn hash_password_blocking(password: Password) -> Result<String, anyhow::Error> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| anyhow::anyhow!("Password hashing task failed: {}", e))?
}

/// Run [`password_matches`] on the blocking pool.
pub async fn password_matches_blocking(
    password: Password,
    stored_hash: Option<String>,
) -> Result<bool, anyhow::Error> {
    tokio::task::spawn_blocking(move || password_matches(&password, stored_hash.as_deref()))
        .await
        .map_err(|e| anyhow::anyhow!("Password verification task failed: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_argon2_phc() {
        let hash = hash_password(&Password::new("Sup3r$ecret")).expect("Failed to hash password");
        assert!(hash.starts_with("$argon2id$"));
    }

    #[test]
    fn test_matches_correct_and_rejects_wrong() {
        let password = Password::new("Sup3r$ecret");
        let hash = hash_password(&password).expect("Failed to hash password");

        assert!(password_matches(&password, Some(&hash)));
        assert!(!password_matches(&Password::new("wrong"), Some(&hash)));
    }

    #[test]
    fn test_passwordless_account_never_matches() {
        assert!(!password_matches(&Password::new("anything"), None));
    }

    #[test]
    fn test_garbage_hash_never_matches() {
        assert!(!password_matches(&Password::new("anything"), Some("not-a-hash")));
    }

    #[test]
    fn test_debug_is_redacted() {
        let rendered = format!("{:?}", Password::new("Sup3r$ecret"));
        assert!(!rendered.contains("Sup3r"));
    }

    #[tokio::test]
    async fn test_blocking_helpers_round_trip() {
        let hash = hash_password_blocking(Password::new("Sup3r$ecret"))
            .await
            .expect("Failed to hash password");
        let matched = password_matches_blocking(Password::new("Sup3r$ecret"), Some(hash))
            .await
            .expect("verification task failed");
        assert!(matched);
    }
}
