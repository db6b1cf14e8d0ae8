use sha2::{Digest, Sha256};

/// Signature the platform attaches to every webhook call: the shared token,
/// timestamp and nonce sorted lexicographically, concatenated, and hashed.
pub fn compute_signature(token: &str, timestamp: &str, nonce: &str) -> String {
    let mut parts = [token, timestamp, nonce];
    parts.sort_unstable();

    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<String>()
}

pub fn authenticate(signature: &str, timestamp: &str, nonce: &str, token: &str) -> bool {
    if signature.is_empty() || token.is_empty() {
        return false;
    }
    compute_signature(token, timestamp, nonce) == signature.to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_order_independent() {
        let a = compute_signature("token", "1700000000", "nonce");
        let b = compute_signature("nonce", "token", "1700000000");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn authenticate_accepts_matching_signature_in_any_case() {
        let sig = compute_signature("secret", "1700000000", "abc");
        assert!(authenticate(&sig, "1700000000", "abc", "secret"));
        assert!(authenticate(&sig.to_uppercase(), "1700000000", "abc", "secret"));
    }

    #[test]
    fn authenticate_rejects_wrong_inputs() {
        let sig = compute_signature("secret", "1700000000", "abc");
        assert!(!authenticate(&sig, "1700000001", "abc", "secret"));
        assert!(!authenticate(&sig, "1700000000", "abc", "other"));
        assert!(!authenticate("", "1700000000", "abc", "secret"));
        assert!(!authenticate(&compute_signature("", "1", "2"), "1", "2", ""));
    }
}
