use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;

use crate::error::{AppError, Result};
use crate::idempotency::codec::EntryCodec;
use crate::idempotency::model::{IdempotencyEntry, IdempotencyFingerprint};
use crate::idempotency::storage::{ExpirationPolicy, KeyStore};

/// A key can expire or be deleted between the failed `SET NX` and the `GET`
/// that follows it; the claim is retried this many times before giving up.
const CLAIM_ATTEMPTS: usize = 3;

/// Redis-backed key store. Values use the packed string codec and expiry is
/// delegated to Redis via `PX`.
pub struct RedisKeyStore {
    client: redis::Client,
    key_prefix: String,
    policy: ExpirationPolicy,
    codec: EntryCodec,
}

impl RedisKeyStore {
    pub fn new(client: redis::Client, key_prefix: impl Into<String>, policy: ExpirationPolicy) -> Self {
        Self {
            client,
            key_prefix: key_prefix.into(),
            policy,
            codec: EntryCodec::new(),
        }
    }

    fn make_key(&self, idempotency_key: &str) -> String {
        format!("{}:{}", self.key_prefix, idempotency_key)
    }

    async fn connection(&self) -> Result<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(AppError::Redis)
    }

    fn set_options(&self) -> redis::SetOptions {
        let options = redis::SetOptions::default();
        match self.policy.ttl_millis() {
            Some(ttl_ms) => options.with_expiration(redis::SetExpiry::PX(ttl_ms as usize)),
            None => options,
        }
    }
}

#[async_trait]
impl KeyStore for RedisKeyStore {
    async fn claim(
        &self,
        idempotency_key: &str,
        fingerprint: Option<IdempotencyFingerprint>,
    ) -> Result<Option<IdempotencyEntry>> {
        let mut conn = self.connection().await?;
        let key = self.make_key(idempotency_key);
        let encoded = self
            .codec
            .encode(&IdempotencyEntry::claimed(idempotency_key, fingerprint))?;

        for _ in 0..CLAIM_ATTEMPTS {
            let claimed: Option<String> = conn
                .set_options(
                    &key,
                    &encoded,
                    self.set_options()
                        .conditional_set(redis::ExistenceCheck::NX),
                )
                .await
                .map_err(AppError::Redis)?;

            if claimed.is_some() {
                return Ok(None);
            }

            let existing: Option<String> = conn.get(&key).await.map_err(AppError::Redis)?;
            if let Some(value) = existing {
                return self.codec.decode(idempotency_key, &value).map(Some);
            }

            tracing::debug!(key = %key, "Idempotency key vanished between SET NX and GET, retrying claim");
        }

        Err(AppError::Internal(anyhow::anyhow!(
            "Could not claim idempotency key after {} attempts",
            CLAIM_ATTEMPTS
        )))
    }

    async fn save(&self, entry: &IdempotencyEntry) -> Result<()> {
        let mut conn = self.connection().await?;
        let key = self.make_key(&entry.idempotency_key);
        let encoded = self.codec.encode(entry)?;

        let _: Option<String> = conn
            .set_options(&key, encoded, self.set_options())
            .await
            .map_err(AppError::Redis)?;

        Ok(())
    }

    async fn delete(&self, idempotency_key: &str) -> Result<()> {
        let mut conn = self.connection().await?;
        let key = self.make_key(idempotency_key);
        let _: i64 = conn.del(&key).await.map_err(AppError::Redis)?;

        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(AppError::Redis)?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
