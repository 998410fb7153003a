use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// One-way hash of a guestbook password: lowercase hex SHA-256.
///
/// Must stay byte-compatible with the hosted delete routine, which computes
/// `encode(digest(entry_password, 'sha256'), 'hex')`.
pub fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

/// Server-side comparison used by the local backend's delete routine.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    let stored = stored_hash.trim().to_ascii_lowercase();
    secrets_match(&hash_password(password), &stored)
}

/// Constant-time equality for secrets. Unequal lengths never match.
pub fn secrets_match(presented: &str, expected: &str) -> bool {
    presented.as_bytes().ct_eq(expected.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_matches_known_vector() {
        assert_eq!(
            hash_password("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn verify_accepts_uppercase_stored_hash() {
        let stored = hash_password("pw1").to_ascii_uppercase();
        assert!(verify_password("pw1", &stored));
        assert!(!verify_password("wrong", &stored));
        assert!(!verify_password("pw1", "short"));
    }

    #[test]
    fn secrets_match_requires_exact_bytes() {
        assert!(secrets_match("admin-token", "admin-token"));
        assert!(!secrets_match("admin-tokem", "admin-token"));
        assert!(!secrets_match("admin", "admin-token"));
        assert!(!secrets_match("", "admin-token"));
    }
}
