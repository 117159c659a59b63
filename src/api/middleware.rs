use std::sync::Arc;

use axum::body::{to_bytes, Body, Bytes};
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderName, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use futures::StreamExt;

use crate::config::IdempotencySettings;
use crate::error::{AppError, Result};
use crate::idempotency::IdempotencyCoordinator;
use crate::observability::mask_key;

/// State for [`idempotency_middleware`].
#[derive(Clone)]
pub struct IdempotencyState {
    pub coordinator: Arc<IdempotencyCoordinator>,
    pub key_header: HeaderName,
    pub max_body_bytes: usize,
}

impl IdempotencyState {
    pub fn new(coordinator: Arc<IdempotencyCoordinator>, settings: &IdempotencySettings) -> Result<Self> {
        let key_header = HeaderName::from_bytes(settings.key_header_name.as_bytes()).map_err(|e| {
            AppError::Config(config::ConfigError::Message(format!(
                "invalid idempotency key header name {:?}: {}",
                settings.key_header_name, e
            )))
        })?;

        Ok(Self {
            coordinator,
            key_header,
            max_body_bytes: settings.max_body_bytes,
        })
    }
}

fn idempotency_key(headers: &HeaderMap, key_header: &HeaderName) -> Result<Option<String>> {
    match headers.get(key_header) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .map(|key| Some(key.to_string()))
            .map_err(|_| AppError::InvalidKey("idempotency key must be visible ASCII".to_string())),
    }
}

fn declared_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

/// Request body after an attempt to buffer it for fingerprinting.
enum RequestBody {
    Buffered(Bytes),
    /// Larger than the buffer limit; forwarded as a stream, never fingerprinted.
    Streaming(Body),
}

/// Reads up to `limit` bytes. A body that turns out larger is handed back as a
/// stream that replays the chunks already read before the unread remainder.
async fn buffer_request_body(
    body: Body,
    declared: Option<usize>,
    limit: usize,
) -> std::result::Result<RequestBody, axum::Error> {
    if declared.is_some_and(|len| len > limit) {
        return Ok(RequestBody::Streaming(body));
    }

    let mut stream = body.into_data_stream();
    let mut chunks: Vec<Bytes> = Vec::new();
    let mut total = 0usize;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        total += chunk.len();
        chunks.push(chunk);

        if total > limit {
            let read = futures::stream::iter(chunks.into_iter().map(Ok::<_, axum::Error>));
            return Ok(RequestBody::Streaming(Body::from_stream(read.chain(stream))));
        }
    }

    Ok(RequestBody::Buffered(Bytes::from(chunks.concat())))
}

/// Applies the idempotency protocol to the wrapped routes.
///
/// The request body is buffered so it can be fingerprinted and still reach the
/// handler; the handler's response is buffered so it can be captured and still
/// reach the client unchanged. A request body over `max_body_bytes` is passed
/// through unbuffered and claims the key without a fingerprint.
pub async fn idempotency_middleware(
    State(state): State<IdempotencyState>,
    request: Request,
    next: Next,
) -> Response {
    let key = match idempotency_key(request.headers(), &state.key_header) {
        Ok(Some(key)) => key,
        Ok(None) => return state.coordinator.passthrough(|| next.run(request)).await,
        Err(e) => return e.into_response(),
    };

    let declared = declared_length(request.headers());
    let (parts, body) = request.into_parts();
    let buffered = buffer_request_body(body, declared, state.max_body_bytes).await;
    let (body, fingerprint_source) = match buffered {
        Ok(RequestBody::Buffered(bytes)) => (Body::from(bytes.clone()), Some(bytes)),
        Ok(RequestBody::Streaming(body)) => {
            tracing::debug!(
                idempotency_key = %mask_key(&key),
                "Request body exceeds {} bytes, skipping fingerprint",
                state.max_body_bytes
            );
            (body, None)
        }
        Err(e) => {
            tracing::warn!(idempotency_key = %mask_key(&key), "Failed to read request body: {}", e);
            return StatusCode::BAD_REQUEST.into_response();
        }
    };
    let request = Request::from_parts(parts, body);

    let result = state
        .coordinator
        .process(Some(&key), fingerprint_source.as_deref(), move || async move {
            let response = next.run(request).await;
            let (parts, body) = response.into_parts();
            match to_bytes(body, usize::MAX).await {
                Ok(bytes) => Ok::<_, AppError>(Response::from_parts(parts, bytes)),
                Err(e) => Err(AppError::Internal(anyhow::anyhow!(
                    "Failed to buffer response body: {}",
                    e
                ))),
            }
        })
        .await;

    match result {
        Ok(response) => response.map(Body::from),
        Err(e) => e.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idempotency::InMemoryKeyStore;

    #[test]
    fn test_state_rejects_bad_header_name() {
        let coordinator = Arc::new(IdempotencyCoordinator::new(Arc::new(InMemoryKeyStore::default())));
        let settings = IdempotencySettings {
            key_header_name: "bad header".to_string(),
            ..IdempotencySettings::default()
        };

        assert!(matches!(
            IdempotencyState::new(coordinator, &settings),
            Err(AppError::Config(_))
        ));
    }

    #[test]
    fn test_key_header_lookup_is_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.insert("idempotency-key", "order-1".parse().unwrap());
        let key_header = HeaderName::from_static("idempotency-key");

        assert_eq!(
            idempotency_key(&headers, &key_header).unwrap(),
            Some("order-1".to_string())
        );
        assert_eq!(idempotency_key(&HeaderMap::new(), &key_header).unwrap(), None);
    }

    #[tokio::test]
    async fn test_small_body_is_buffered() {
        let body = buffer_request_body(Body::from("{\"a\":1}"), Some(7), 16).await.unwrap();
        match body {
            RequestBody::Buffered(bytes) => assert_eq!(bytes.as_ref(), b"{\"a\":1}"),
            RequestBody::Streaming(_) => panic!("expected a buffered body"),
        }
    }

    #[tokio::test]
    async fn test_overrunning_body_streams_every_byte() {
        let chunks = vec![
            Ok::<_, std::io::Error>(Bytes::from_static(b"0123456789")),
            Ok(Bytes::from_static(b"abcdefghij")),
            Ok(Bytes::from_static(b"KLMNOPQRST")),
        ];
        let body = Body::from_stream(futures::stream::iter(chunks));

        match buffer_request_body(body, None, 16).await.unwrap() {
            RequestBody::Streaming(body) => {
                let bytes = to_bytes(body, usize::MAX).await.unwrap();
                assert_eq!(bytes.as_ref(), b"0123456789abcdefghijKLMNOPQRST");
            }
            RequestBody::Buffered(_) => panic!("expected a streaming body"),
        }
    }

    #[tokio::test]
    async fn test_declared_oversize_body_is_not_read() {
        match buffer_request_body(Body::from("0123456789"), Some(10), 4).await.unwrap() {
            RequestBody::Streaming(body) => {
                assert_eq!(to_bytes(body, usize::MAX).await.unwrap().as_ref(), b"0123456789");
            }
            RequestBody::Buffered(_) => panic!("expected a streaming body"),
        }
    }

    #[test]
    fn test_declared_length() {
        let mut headers = HeaderMap::new();
        assert_eq!(declared_length(&headers), None);
        headers.insert(header::CONTENT_LENGTH, "12".parse().unwrap());
        assert_eq!(declared_length(&headers), Some(12));
    }
}
