use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::idempotency::codec::EntryCodec;
use crate::idempotency::model::{IdempotencyEntry, IdempotencyFingerprint};
use crate::idempotency::storage::{ExpirationPolicy, KeyStore};

#[derive(Debug, sqlx::FromRow)]
struct ClaimRow {
    claim_id: Uuid,
    entry: String,
}

/// PostgreSQL-backed key store.
///
/// Each row carries the claim id of whoever wrote it last. A claim inserts a row
/// with a fresh id, or takes over an expired row; any live row is left alone.
/// Reading back our own id means the claim succeeded.
pub struct PostgresKeyStore {
    pool: PgPool,
    policy: ExpirationPolicy,
    codec: EntryCodec,
}

impl PostgresKeyStore {
    pub fn new(pool: PgPool, policy: ExpirationPolicy) -> Self {
        Self {
            pool,
            policy,
            codec: EntryCodec::new(),
        }
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::Database(e.into()))?;
        Ok(())
    }

    fn ttl_millis(&self) -> Option<i64> {
        self.policy
            .ttl_millis()
            .map(|ms| i64::try_from(ms).unwrap_or(i64::MAX))
    }
}

#[async_trait]
impl KeyStore for PostgresKeyStore {
    async fn claim(
        &self,
        idempotency_key: &str,
        fingerprint: Option<IdempotencyFingerprint>,
    ) -> Result<Option<IdempotencyEntry>> {
        let claim_id = Uuid::new_v4();
        let encoded = self
            .codec
            .encode(&IdempotencyEntry::claimed(idempotency_key, fingerprint))?;

        let row = sqlx::query_as::<_, ClaimRow>(
            r#"
            INSERT INTO idempotency_entries (idempotency_key, claim_id, entry, expires_at, updated_at)
            VALUES ($1, $2, $3, NOW() + ($4::BIGINT * INTERVAL '1 millisecond'), NOW())
            ON CONFLICT (idempotency_key) DO UPDATE SET
                claim_id = CASE WHEN idempotency_entries.expires_at <= NOW()
                    THEN EXCLUDED.claim_id ELSE idempotency_entries.claim_id END,
                entry = CASE WHEN idempotency_entries.expires_at <= NOW()
                    THEN EXCLUDED.entry ELSE idempotency_entries.entry END,
                updated_at = CASE WHEN idempotency_entries.expires_at <= NOW()
                    THEN EXCLUDED.updated_at ELSE idempotency_entries.updated_at END,
                expires_at = CASE WHEN idempotency_entries.expires_at <= NOW()
                    THEN EXCLUDED.expires_at ELSE idempotency_entries.expires_at END
            RETURNING claim_id, entry
            "#,
        )
        .bind(idempotency_key)
        .bind(claim_id)
        .bind(&encoded)
        .bind(self.ttl_millis())
        .fetch_one(&self.pool)
        .await
        .map_err(AppError::Database)?;

        if row.claim_id == claim_id {
            Ok(None)
        } else {
            self.codec.decode(idempotency_key, &row.entry).map(Some)
        }
    }

    async fn save(&self, entry: &IdempotencyEntry) -> Result<()> {
        let encoded = self.codec.encode(entry)?;

        sqlx::query(
            r#"
            INSERT INTO idempotency_entries (idempotency_key, claim_id, entry, expires_at, updated_at)
            VALUES ($1, $2, $3, NOW() + ($4::BIGINT * INTERVAL '1 millisecond'), NOW())
            ON CONFLICT (idempotency_key) DO UPDATE SET
                entry = EXCLUDED.entry,
                expires_at = EXCLUDED.expires_at,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&entry.idempotency_key)
        .bind(Uuid::new_v4())
        .bind(&encoded)
        .bind(self.ttl_millis())
        .execute(&self.pool)
        .await
        .map_err(AppError::Database)?;

        Ok(())
    }

    async fn delete(&self, idempotency_key: &str) -> Result<()> {
        sqlx::query(
            r#"
            DELETE FROM idempotency_entries
            WHERE idempotency_key = $1
            "#,
        )
        .bind(idempotency_key)
        .execute(&self.pool)
        .await
        .map_err(AppError::Database)?;

        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM idempotency_entries
            WHERE expires_at <= NOW()
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(AppError::Database)?;

        Ok(result.rows_affected())
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(AppError::Database)?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}
