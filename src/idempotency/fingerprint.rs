use sha2::{Digest, Sha256};

use crate::idempotency::model::IdempotencyFingerprint;

/// Derives a content fingerprint from a request body.
///
/// `None` for the body means the transport could not provide it; strategies
/// return `None` in that case and conflict detection is skipped.
pub trait FingerprintStrategy: Send + Sync {
    fn create(&self, request_body: Option<&[u8]>) -> Option<IdempotencyFingerprint>;
}

/// Hex-encoded SHA-256 of the whole request body.
#[derive(Debug, Clone, Copy, Default)]
pub struct DigestFingerprintStrategy;

impl DigestFingerprintStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl FingerprintStrategy for DigestFingerprintStrategy {
    fn create(&self, request_body: Option<&[u8]>) -> Option<IdempotencyFingerprint> {
        let body = request_body?;
        let mut hasher = Sha256::new();
        hasher.update(body);
        IdempotencyFingerprint::from_digest(hex::encode(hasher.finalize()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_is_deterministic() {
        let strategy = DigestFingerprintStrategy::new();
        let f1 = strategy.create(Some(br#"{"amount":100}"#));
        let f2 = strategy.create(Some(br#"{"amount":100}"#));
        assert!(f1.is_some());
        assert_eq!(f1, f2);
    }

    #[test]
    fn test_different_bodies_differ() {
        let strategy = DigestFingerprintStrategy::new();
        let f1 = strategy.create(Some(br#"{"amount":100}"#));
        let f2 = strategy.create(Some(br#"{"amount":200}"#));
        assert_ne!(f1, f2);
    }

    #[test]
    fn test_empty_body_has_fingerprint() {
        let strategy = DigestFingerprintStrategy::new();
        let fingerprint = strategy.create(Some(b"")).unwrap();
        assert_eq!(
            fingerprint.as_str(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_unavailable_body_has_no_fingerprint() {
        let strategy = DigestFingerprintStrategy::new();
        assert!(strategy.create(None).is_none());
    }
}
