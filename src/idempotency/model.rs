use std::collections::BTreeMap;
use std::fmt;

/// Content digest of a request body. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyFingerprint(String);

impl IdempotencyFingerprint {
    /// Wraps a digest string; an empty digest carries no information and yields `None`.
    pub fn from_digest(value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        if value.is_empty() {
            None
        } else {
            Some(Self(value))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Captured response headers: lowercase header name to its values in wire order.
pub type CapturedHeaders = BTreeMap<String, Vec<String>>;

/// Outcome of a handler execution, as stored and replayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyResponse {
    status: u16,
    headers: CapturedHeaders,
    body: Option<Vec<u8>>,
}

impl IdempotencyResponse {
    /// An empty body is stored as absent.
    pub fn new(status: u16, headers: CapturedHeaders, body: Option<Vec<u8>>) -> Self {
        Self {
            status,
            headers,
            body: body.filter(|b| !b.is_empty()),
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn headers(&self) -> &CapturedHeaders {
        &self.headers
    }

    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }
}

/// The record kept per idempotency key.
///
/// An entry without a response is a claim held by an in-flight first attempt.
/// Once a response is present the entry is terminal until deleted or expired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyEntry {
    pub idempotency_key: String,
    pub fingerprint: Option<IdempotencyFingerprint>,
    pub response: Option<IdempotencyResponse>,
}

impl IdempotencyEntry {
    /// A fresh claim for a key seen for the first time.
    pub fn claimed(
        idempotency_key: impl Into<String>,
        fingerprint: Option<IdempotencyFingerprint>,
    ) -> Self {
        Self {
            idempotency_key: idempotency_key.into(),
            fingerprint,
            response: None,
        }
    }

    pub fn completed(
        idempotency_key: impl Into<String>,
        fingerprint: Option<IdempotencyFingerprint>,
        response: IdempotencyResponse,
    ) -> Self {
        Self {
            idempotency_key: idempotency_key.into(),
            fingerprint,
            response: Some(response),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.response.is_some()
    }

    /// Two fingerprints conflict only when both are known and differ.
    pub fn conflicts_with(&self, fingerprint: Option<&IdempotencyFingerprint>) -> bool {
        match (self.fingerprint.as_ref(), fingerprint) {
            (Some(stored), Some(incoming)) => stored != incoming,
            _ => false,
        }
    }
}
