//! Password hashing and verification.
//!
//! Single-round SHA-256, base64-encoded. The surrounding contracts do not
//! depend on the scheme; a KDF can replace this without touching callers.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use sha2::{Digest, Sha256};

pub fn hash_secret(secret: &str) -> String {
    BASE64.encode(Sha256::digest(secret.as_bytes()))
}

pub fn verify_secret(secret: &str, stored_hash: &str) -> bool {
    hash_secret(secret) == stored_hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic_base64_sha256() {
        // Known vector: SHA-256("123456"), base64.
        assert_eq!(hash_secret("123456"), "jGl25bVBBBW96Qi9Te4V37Fnqchz/Eu4qB9vKrRIqRg=");
    }

    #[test]
    fn verify_accepts_matching_secret() {
        let stored = hash_secret("s3cret!");
        assert!(verify_secret("s3cret!", &stored));
    }

    #[test]
    fn verify_rejects_wrong_secret() {
        let stored = hash_secret("s3cret!");
        assert!(!verify_secret("s3cret?", &stored));
        assert!(!verify_secret("", &stored));
    }
}
