use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::body::Bytes;
use http::{Response, StatusCode};
use serde::{Deserialize, Serialize};

use crate::config::IdempotencySettings;
use crate::error::{AppError, Result};
use crate::idempotency::fingerprint::{DigestFingerprintStrategy, FingerprintStrategy};
use crate::idempotency::model::{
    CapturedHeaders, IdempotencyEntry, IdempotencyFingerprint, IdempotencyResponse,
};
use crate::idempotency::storage::KeyStore;
use crate::idempotency::validator::{ResponseValidator, SuccessStatusValidator};
use crate::observability::{get_metrics, mask_key, LatencyTimer};

/// Counters for coordinator outcomes.
#[derive(Debug, Default)]
pub struct IdempotencyMetrics {
    pub total_requests: AtomicU64,
    pub passthrough_requests: AtomicU64,
    pub first_attempts: AtomicU64,
    pub replayed_requests: AtomicU64,
    pub conflicts: AtomicU64,
    pub fingerprint_mismatches: AtomicU64,
    pub completed_entries: AtomicU64,
    pub discarded_entries: AtomicU64,
}

impl IdempotencyMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            passthrough_requests: self.passthrough_requests.load(Ordering::Relaxed),
            first_attempts: self.first_attempts.load(Ordering::Relaxed),
            replayed_requests: self.replayed_requests.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            fingerprint_mismatches: self.fingerprint_mismatches.load(Ordering::Relaxed),
            completed_entries: self.completed_entries.load(Ordering::Relaxed),
            discarded_entries: self.discarded_entries.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub passthrough_requests: u64,
    pub first_attempts: u64,
    pub replayed_requests: u64,
    pub conflicts: u64,
    pub fingerprint_mismatches: u64,
    pub completed_entries: u64,
    pub discarded_entries: u64,
}

impl MetricsSnapshot {
    pub fn replay_rate(&self) -> f64 {
        // The counters are loaded independently, so passthrough can briefly lead.
        let keyed = self.total_requests.saturating_sub(self.passthrough_requests);
        if keyed == 0 {
            0.0
        } else {
            self.replayed_requests as f64 / keyed as f64
        }
    }
}

/// What to do with a request whose key was already claimed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Same key, different body.
    FingerprintMismatch,
    /// The first attempt has not stored a response yet.
    InFlight,
    Replay(IdempotencyResponse),
}

impl RetryDecision {
    pub fn for_entry(entry: IdempotencyEntry, fingerprint: Option<&IdempotencyFingerprint>) -> Self {
        if entry.conflicts_with(fingerprint) {
            return RetryDecision::FingerprintMismatch;
        }
        match entry.response {
            Some(response) => RetryDecision::Replay(response),
            None => RetryDecision::InFlight,
        }
    }
}

/// Configuration for the coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Lowercase response header names captured for replay.
    pub header_allow_list: HashSet<String>,
    pub release_on_handler_error: bool,
}

impl CoordinatorConfig {
    pub fn with_header_allow_list<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.header_allow_list = names
            .into_iter()
            .map(|name| name.as_ref().to_ascii_lowercase())
            .collect();
        self
    }

    pub fn with_release_on_handler_error(mut self, release: bool) -> Self {
        self.release_on_handler_error = release;
        self
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            header_allow_list: HashSet::from(["content-type".to_string()]),
            release_on_handler_error: false,
        }
    }
}

impl From<&IdempotencySettings> for CoordinatorConfig {
    fn from(settings: &IdempotencySettings) -> Self {
        CoordinatorConfig::default()
            .with_header_allow_list(&settings.header_allow_list)
            .with_release_on_handler_error(settings.release_on_handler_error)
    }
}

/// Runs a single request through claim, first attempt or replay, and persistence.
///
/// Holds no per-key lock of its own: mutual exclusion for a key comes entirely
/// from [`KeyStore::claim`].
pub struct IdempotencyCoordinator {
    store: Arc<dyn KeyStore>,
    fingerprint_strategy: Arc<dyn FingerprintStrategy>,
    response_validator: Arc<dyn ResponseValidator>,
    config: CoordinatorConfig,
    metrics: Arc<IdempotencyMetrics>,
}

impl IdempotencyCoordinator {
    pub fn new(store: Arc<dyn KeyStore>) -> Self {
        Self {
            store,
            fingerprint_strategy: Arc::new(DigestFingerprintStrategy::new()),
            response_validator: Arc::new(SuccessStatusValidator::new()),
            config: CoordinatorConfig::default(),
            metrics: Arc::new(IdempotencyMetrics::new()),
        }
    }

    pub fn with_fingerprint_strategy(mut self, strategy: Arc<dyn FingerprintStrategy>) -> Self {
        self.fingerprint_strategy = strategy;
        self
    }

    pub fn with_response_validator(mut self, validator: Arc<dyn ResponseValidator>) -> Self {
        self.response_validator = validator;
        self
    }

    pub fn with_config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn metrics(&self) -> Arc<IdempotencyMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn store(&self) -> Arc<dyn KeyStore> {
        Arc::clone(&self.store)
    }

    /// Runs a request that carries no idempotency key. Nothing is read or written.
    pub async fn passthrough<F, Fut, T>(&self, handler: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.metrics.record(&self.metrics.total_requests);
        self.metrics.record(&self.metrics.passthrough_requests);
        get_metrics().record_request("passthrough");
        handler().await
    }

    /// Processes one request.
    ///
    /// `request_body` is `None` when the transport could not buffer the body,
    /// which disables conflict detection for this request. `handler` runs at
    /// most once, and only for a request without a key or for the first attempt
    /// of a key.
    pub async fn process<F, Fut>(
        &self,
        idempotency_key: Option<&str>,
        request_body: Option<&[u8]>,
        handler: F,
    ) -> Result<Response<Bytes>>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<Response<Bytes>>> + Send,
    {
        let Some(idempotency_key) = idempotency_key else {
            return self.passthrough(handler).await;
        };

        self.metrics.record(&self.metrics.total_requests);

        if idempotency_key.is_empty() {
            return Err(AppError::InvalidKey("idempotency key must not be empty".to_string()));
        }

        let fingerprint = self.fingerprint_strategy.create(request_body);

        let timer = LatencyTimer::new();
        let claimed = self.store.claim(idempotency_key, fingerprint.clone()).await;
        get_metrics().record_store_operation(self.store.backend_name(), "claim", timer.elapsed_ms());

        match claimed? {
            None => self.first_attempt(idempotency_key, fingerprint, handler).await,
            Some(entry) => self.retry(idempotency_key, entry, fingerprint.as_ref()),
        }
    }

    async fn first_attempt<F, Fut>(
        &self,
        idempotency_key: &str,
        fingerprint: Option<IdempotencyFingerprint>,
        handler: F,
    ) -> Result<Response<Bytes>>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<Response<Bytes>>> + Send,
    {
        self.metrics.record(&self.metrics.first_attempts);
        get_metrics().record_request("first_attempt");
        tracing::debug!(idempotency_key = %mask_key(idempotency_key), "Claimed idempotency key");

        let response = match handler().await {
            Ok(response) => response,
            Err(e) => {
                if self.config.release_on_handler_error {
                    if let Err(delete_err) = self.delete(idempotency_key).await {
                        tracing::error!(
                            idempotency_key = %mask_key(idempotency_key),
                            "Failed to release idempotency key after handler error: {}",
                            delete_err
                        );
                    }
                } else {
                    tracing::warn!(
                        idempotency_key = %mask_key(idempotency_key),
                        "Handler failed, idempotency key stays claimed until expiry: {}",
                        e
                    );
                }
                return Err(e);
            }
        };

        let captured = self.capture(&response);

        // A failed write fails the request even though the handler already ran.
        if self.response_validator.validate(&captured) {
            let status = captured.status();
            let entry = IdempotencyEntry::completed(idempotency_key, fingerprint, captured);
            self.save(&entry).await.map_err(|e| {
                tracing::error!(
                    idempotency_key = %mask_key(idempotency_key),
                    "Failed to store idempotent response: {}",
                    e
                );
                e
            })?;

            self.metrics.record(&self.metrics.completed_entries);
            get_metrics().record_entry_completed();
            tracing::debug!(
                idempotency_key = %mask_key(idempotency_key),
                status = status,
                "Stored response for replay"
            );
        } else {
            self.delete(idempotency_key).await.map_err(|e| {
                tracing::error!(
                    idempotency_key = %mask_key(idempotency_key),
                    "Failed to release idempotency key: {}",
                    e
                );
                e
            })?;

            self.metrics.record(&self.metrics.discarded_entries);
            get_metrics().record_entry_discarded();
            tracing::debug!(
                idempotency_key = %mask_key(idempotency_key),
                status = captured.status(),
                "Response not eligible for replay, released key"
            );
        }

        Ok(response)
    }

    fn retry(
        &self,
        idempotency_key: &str,
        entry: IdempotencyEntry,
        fingerprint: Option<&IdempotencyFingerprint>,
    ) -> Result<Response<Bytes>> {
        match RetryDecision::for_entry(entry, fingerprint) {
            RetryDecision::FingerprintMismatch => {
                self.metrics.record(&self.metrics.fingerprint_mismatches);
                get_metrics().record_request("fingerprint_mismatch");
                tracing::info!(
                    idempotency_key = %mask_key(idempotency_key),
                    "Idempotency key reused with a different request body"
                );
                Err(AppError::FingerprintMismatch)
            }
            RetryDecision::InFlight => {
                self.metrics.record(&self.metrics.conflicts);
                get_metrics().record_request("conflict");
                tracing::info!(
                    idempotency_key = %mask_key(idempotency_key),
                    "Retry while the first attempt is still in flight"
                );
                Err(AppError::Conflict)
            }
            RetryDecision::Replay(stored) => {
                self.metrics.record(&self.metrics.replayed_requests);
                get_metrics().record_request("replayed");
                tracing::debug!(
                    idempotency_key = %mask_key(idempotency_key),
                    status = stored.status(),
                    "Replaying stored response"
                );
                replay(idempotency_key, &stored)
            }
        }
    }

    /// Copies status, allow-listed headers and body out of a handler response.
    pub fn capture(&self, response: &Response<Bytes>) -> IdempotencyResponse {
        let mut headers = CapturedHeaders::new();
        for (name, value) in response.headers() {
            if self.config.header_allow_list.contains(name.as_str()) {
                headers
                    .entry(name.as_str().to_string())
                    .or_default()
                    .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
            }
        }

        IdempotencyResponse::new(
            response.status().as_u16(),
            headers,
            Some(response.body().to_vec()),
        )
    }

    async fn save(&self, entry: &IdempotencyEntry) -> Result<()> {
        let timer = LatencyTimer::new();
        let result = self.store.save(entry).await;
        get_metrics().record_store_operation(self.store.backend_name(), "save", timer.elapsed_ms());
        result
    }

    async fn delete(&self, idempotency_key: &str) -> Result<()> {
        let timer = LatencyTimer::new();
        let result = self.store.delete(idempotency_key).await;
        get_metrics().record_store_operation(self.store.backend_name(), "delete", timer.elapsed_ms());
        result
    }
}

/// Rebuilds a stored response. Invalid stored status or headers are corrupt data.
pub fn replay(idempotency_key: &str, stored: &IdempotencyResponse) -> Result<Response<Bytes>> {
    let status = StatusCode::from_u16(stored.status()).map_err(|e| {
        AppError::Decode(format!("stored status for key {}: {}", idempotency_key, e))
    })?;

    let mut builder = Response::builder().status(status);
    for (name, values) in stored.headers() {
        for value in values {
            builder = builder.header(name.as_str(), value.as_str());
        }
    }

    let body = stored
        .body()
        .map(Bytes::copy_from_slice)
        .unwrap_or_default();

    builder.body(body).map_err(|e| {
        AppError::Decode(format!("stored headers for key {}: {}", idempotency_key, e))
    })
}
