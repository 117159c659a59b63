pub mod memory;
pub mod postgres_store;
pub mod redis_store;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;

use crate::config::{BackendKind, Settings};
use crate::error::Result;
use crate::idempotency::model::{IdempotencyEntry, IdempotencyFingerprint};

pub use memory::InMemoryKeyStore;
pub use postgres_store::PostgresKeyStore;
pub use redis_store::RedisKeyStore;

/// Atomic claim/save/delete protocol over idempotency entries.
///
/// Every operation must be atomic on its own. An expired entry behaves exactly
/// like a missing one.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Creates a pending entry and returns `None` if the key is unclaimed,
    /// otherwise returns the existing entry untouched.
    async fn claim(
        &self,
        idempotency_key: &str,
        fingerprint: Option<IdempotencyFingerprint>,
    ) -> Result<Option<IdempotencyEntry>>;

    /// Overwrites the entry for its key and refreshes the time-to-live.
    async fn save(&self, entry: &IdempotencyEntry) -> Result<()>;

    async fn delete(&self, idempotency_key: &str) -> Result<()>;

    /// Actively removes expired entries, returning how many were dropped.
    /// Backends that expire natively have nothing to do.
    async fn purge_expired(&self) -> Result<u64> {
        Ok(0)
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str;
}

/// How long entries stay visible after their last write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpirationPolicy {
    Never,
    /// A zero duration expires entries (nearly) immediately.
    ConstantTimeToLive(Duration),
}

impl ExpirationPolicy {
    /// Zero seconds means entries never expire, matching the configuration surface.
    pub fn from_ttl_secs(ttl_secs: u64) -> Self {
        if ttl_secs == 0 {
            ExpirationPolicy::Never
        } else {
            ExpirationPolicy::ConstantTimeToLive(Duration::from_secs(ttl_secs))
        }
    }

    pub fn time_to_live(&self) -> Option<Duration> {
        match self {
            ExpirationPolicy::Never => None,
            ExpirationPolicy::ConstantTimeToLive(ttl) => Some(*ttl),
        }
    }

    /// `None` when entries never expire, including a TTL too large to represent.
    pub fn deadline(&self, now: Instant) -> Option<Instant> {
        self.time_to_live().and_then(|ttl| now.checked_add(ttl))
    }

    /// TTL in whole milliseconds, at least 1 so backends never see a zero expiry.
    pub fn ttl_millis(&self) -> Option<u64> {
        self.time_to_live()
            .map(|ttl| u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1))
    }
}

impl Default for ExpirationPolicy {
    fn default() -> Self {
        ExpirationPolicy::ConstantTimeToLive(Duration::from_secs(86400))
    }
}

/// Builds the key store selected in configuration.
pub async fn build_key_store(settings: &Settings) -> Result<Arc<dyn KeyStore>> {
    let policy = ExpirationPolicy::from_ttl_secs(settings.idempotency.time_to_live_secs);

    let store: Arc<dyn KeyStore> = match settings.idempotency.backend {
        BackendKind::Memory => Arc::new(InMemoryKeyStore::new(policy)),
        BackendKind::Redis => {
            tracing::info!("Connecting to Redis at {}...", settings.redis.url);
            let client = redis::Client::open(settings.redis.url.as_str())?;
            let store =
                RedisKeyStore::new(client, settings.idempotency.key_prefix.clone(), policy);
            store.health_check().await?;
            Arc::new(store)
        }
        BackendKind::Postgres => {
            tracing::info!("Connecting to database at {}...", settings.database.url);
            let pool = PgPoolOptions::new()
                .max_connections(settings.database.pool_size)
                .acquire_timeout(Duration::from_secs(5))
                .connect(&settings.database.url)
                .await?;
            let store = PostgresKeyStore::new(pool, policy);
            store.run_migrations().await?;
            Arc::new(store)
        }
    };

    tracing::info!(backend = store.backend_name(), "Idempotency key store ready");
    Ok(store)
}
