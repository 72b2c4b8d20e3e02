use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Generate `byte_len` random bytes from the OS CSPRNG, hex encoded.
pub fn generate_secret(byte_len: usize) -> String {
    let mut bytes = vec![0u8; byte_len];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// One-way SHA-256 digest of a token, hex encoded.
///
/// Only digests are ever persisted; the raw token goes back to the caller once.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Compare two strings without short-circuiting on the first differing byte.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Hash `candidate` and compare it against a stored digest in constant time.
pub fn verify_token_hash(candidate: &str, stored_hash: &str) -> bool {
    constant_time_eq(&hash_token(candidate), stored_hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_secret_length_and_uniqueness() {
        let a = generate_secret(40);
        let b = generate_secret(40);

        assert_eq!(a.len(), 80);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_hash_token_is_deterministic_and_not_identity() {
        let digest = hash_token("refresh-secret");
        assert_eq!(digest, hash_token("refresh-secret"));
        assert_ne!(digest, "refresh-secret");
        assert_eq!(digest.len(), 64);
    }

    #[test]
    fn test_verify_token_hash() {
        let stored = hash_token("abc");
        assert!(verify_token_hash("abc", &stored));
        assert!(!verify_token_hash("abd", &stored));
        assert!(!verify_token_hash("", &stored));
    }

    #[test]
    fn test_constant_time_eq_length_mismatch() {
        assert!(!constant_time_eq("abc", "abcd"));
        assert!(constant_time_eq("abc", "abc"));
    }
}
