//! Flat string encoding of idempotency entries for string-valued backends.
//!
//! Layout: `<status>.<headers-b64>.<body-b64>.<fingerprint>`. Any absent field is
//! written as an empty segment; an empty status segment marks a pending claim.

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::error::{AppError, Result};
use crate::idempotency::model::{
    CapturedHeaders, IdempotencyEntry, IdempotencyFingerprint, IdempotencyResponse,
};

const SEPARATOR: char = '.';

/// Encodes and decodes entries to and from the packed wire format.
#[derive(Debug, Clone, Copy, Default)]
pub struct EntryCodec;

impl EntryCodec {
    pub fn new() -> Self {
        Self
    }

    pub fn encode(&self, entry: &IdempotencyEntry) -> Result<String> {
        let (status, headers, body) = match &entry.response {
            Some(response) => {
                let headers_json = serde_json::to_vec(response.headers()).map_err(|e| {
                    AppError::Internal(anyhow::anyhow!("Failed to serialize headers: {}", e))
                })?;
                (
                    response.status().to_string(),
                    STANDARD.encode(headers_json),
                    response.body().map(|b| STANDARD.encode(b)).unwrap_or_default(),
                )
            }
            None => (String::new(), String::new(), String::new()),
        };

        let fingerprint = entry
            .fingerprint
            .as_ref()
            .map(IdempotencyFingerprint::as_str)
            .unwrap_or_default();

        Ok(format!(
            "{status}{SEPARATOR}{headers}{SEPARATOR}{body}{SEPARATOR}{fingerprint}"
        ))
    }

    pub fn decode(&self, idempotency_key: &str, encoded: &str) -> Result<IdempotencyEntry> {
        // The fingerprint is last so that it may itself contain separators.
        let segments: Vec<&str> = encoded.splitn(4, SEPARATOR).collect();
        let [status, headers, body, fingerprint] = segments[..] else {
            return Err(AppError::Decode(format!(
                "expected 4 segments for key {}, found {}",
                idempotency_key,
                segments.len()
            )));
        };

        let fingerprint = IdempotencyFingerprint::from_digest(fingerprint);

        if status.is_empty() {
            if !headers.is_empty() || !body.is_empty() {
                return Err(AppError::Decode(format!(
                    "pending entry for key {} carries response data",
                    idempotency_key
                )));
            }
            return Ok(IdempotencyEntry::claimed(idempotency_key, fingerprint));
        }

        let status: u16 = status.parse().map_err(|_| {
            AppError::Decode(format!("invalid status {:?} for key {}", status, idempotency_key))
        })?;

        let headers: CapturedHeaders = if headers.is_empty() {
            CapturedHeaders::new()
        } else {
            let raw = STANDARD.decode(headers).map_err(|e| {
                AppError::Decode(format!("headers of key {}: {}", idempotency_key, e))
            })?;
            serde_json::from_slice(&raw).map_err(|e| {
                AppError::Decode(format!("headers of key {}: {}", idempotency_key, e))
            })?
        };

        let body = if body.is_empty() {
            None
        } else {
            Some(STANDARD.decode(body).map_err(|e| {
                AppError::Decode(format!("body of key {}: {}", idempotency_key, e))
            })?)
        };

        Ok(IdempotencyEntry::completed(
            idempotency_key,
            fingerprint,
            IdempotencyResponse::new(status, headers, body),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fingerprint(value: &str) -> Option<IdempotencyFingerprint> {
        IdempotencyFingerprint::from_digest(value)
    }

    fn json_headers() -> CapturedHeaders {
        let mut headers = CapturedHeaders::new();
        headers.insert("content-type".to_string(), vec!["application/json".to_string()]);
        headers.insert(
            "x-trace".to_string(),
            vec!["b".to_string(), "a".to_string(), "c".to_string()],
        );
        headers
    }

    #[test]
    fn test_pending_claim_layout() {
        let codec = EntryCodec::new();
        let entry = IdempotencyEntry::claimed("order-1", fingerprint("abc123"));

        let encoded = codec.encode(&entry).unwrap();
        assert_eq!(encoded, "...abc123");
        assert_eq!(codec.decode("order-1", &encoded).unwrap(), entry);
    }

    #[test]
    fn test_pending_claim_without_fingerprint() {
        let codec = EntryCodec::new();
        let entry = IdempotencyEntry::claimed("order-1", None);

        let encoded = codec.encode(&entry).unwrap();
        assert_eq!(encoded, "...");
        assert_eq!(codec.decode("order-1", &encoded).unwrap(), entry);
    }

    #[test]
    fn test_completed_entry_survives_storage() {
        let codec = EntryCodec::new();
        let entry = IdempotencyEntry::completed(
            "order-1",
            fingerprint("f1"),
            IdempotencyResponse::new(201, json_headers(), Some(br#"{"id":42}"#.to_vec())),
        );

        let encoded = codec.encode(&entry).unwrap();
        assert!(encoded.starts_with("201."));
        assert!(encoded.ends_with(".f1"));

        let decoded = codec.decode("order-1", &encoded).unwrap();
        assert_eq!(decoded, entry);
        assert_eq!(
            decoded.response.unwrap().headers()["x-trace"],
            vec!["b", "a", "c"]
        );
    }

    #[test]
    fn test_empty_headers_and_body() {
        let codec = EntryCodec::new();
        let entry = IdempotencyEntry::completed(
            "k",
            None,
            IdempotencyResponse::new(204, CapturedHeaders::new(), Some(Vec::new())),
        );

        let decoded = codec.decode("k", &codec.encode(&entry).unwrap()).unwrap();
        assert_eq!(decoded, entry);
        assert!(decoded.response.unwrap().body().is_none());
    }

    #[test]
    fn test_body_with_binary_and_dots() {
        let codec = EntryCodec::new();
        let body = vec![0u8, 46, 46, 255, 10, 46];
        let entry = IdempotencyEntry::completed(
            "k",
            fingerprint("with.dots.inside"),
            IdempotencyResponse::new(200, CapturedHeaders::new(), Some(body)),
        );

        let decoded = codec.decode("k", &codec.encode(&entry).unwrap()).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn test_decode_rejects_truncated_value() {
        let codec = EntryCodec::new();
        let err = codec.decode("k", "200.e30=").unwrap_err();
        assert!(matches!(err, AppError::Decode(_)));
    }

    #[test]
    fn test_decode_rejects_bad_status() {
        let codec = EntryCodec::new();
        let err = codec.decode("k", "ok...").unwrap_err();
        assert!(matches!(err, AppError::Decode(_)));
    }

    #[test]
    fn test_decode_rejects_corrupt_base64() {
        let codec = EntryCodec::new();
        let err = codec.decode("k", "200.!!!!..").unwrap_err();
        assert!(matches!(err, AppError::Decode(_)));

        let err = codec.decode("k", "200..%%%.").unwrap_err();
        assert!(matches!(err, AppError::Decode(_)));
    }

    #[test]
    fn test_decode_rejects_response_data_without_status() {
        let codec = EntryCodec::new();
        let err = codec.decode("k", ".e30=..").unwrap_err();
        assert!(err.is_storage_error());
    }
}
