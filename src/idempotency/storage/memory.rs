use std::time::Instant;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::error::Result;
use crate::idempotency::codec::EntryCodec;
use crate::idempotency::model::{IdempotencyEntry, IdempotencyFingerprint};
use crate::idempotency::storage::{ExpirationPolicy, KeyStore};

#[derive(Debug, Clone)]
struct StoredValue {
    encoded: String,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| now >= deadline)
    }
}

/// Process-local key store with passive expiry.
///
/// Each shard of the map is locked while a claim inspects and writes it, which
/// makes claim a single check-and-set. Expired values are dropped lazily when
/// touched, or in bulk by [`KeyStore::purge_expired`].
#[derive(Debug)]
pub struct InMemoryKeyStore {
    entries: DashMap<String, StoredValue>,
    policy: ExpirationPolicy,
    codec: EntryCodec,
}

impl InMemoryKeyStore {
    pub fn new(policy: ExpirationPolicy) -> Self {
        Self {
            entries: DashMap::new(),
            policy,
            codec: EntryCodec::new(),
        }
    }

    pub fn policy(&self) -> ExpirationPolicy {
        self.policy
    }

    /// Number of live (unexpired) entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|v| !v.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn stored(&self, encoded: String, now: Instant) -> StoredValue {
        StoredValue {
            encoded,
            expires_at: self.policy.deadline(now),
        }
    }
}

impl Default for InMemoryKeyStore {
    fn default() -> Self {
        Self::new(ExpirationPolicy::default())
    }
}

#[async_trait]
impl KeyStore for InMemoryKeyStore {
    async fn claim(
        &self,
        idempotency_key: &str,
        fingerprint: Option<IdempotencyFingerprint>,
    ) -> Result<Option<IdempotencyEntry>> {
        let encoded = self
            .codec
            .encode(&IdempotencyEntry::claimed(idempotency_key, fingerprint))?;
        let now = Instant::now();

        match self.entries.entry(idempotency_key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(self.stored(encoded, now));
                    Ok(None)
                } else {
                    self.codec
                        .decode(idempotency_key, &occupied.get().encoded)
                        .map(Some)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(self.stored(encoded, now));
                Ok(None)
            }
        }
    }

    async fn save(&self, entry: &IdempotencyEntry) -> Result<()> {
        let encoded = self.codec.encode(entry)?;
        let value = self.stored(encoded, Instant::now());
        self.entries.insert(entry.idempotency_key.clone(), value);
        Ok(())
    }

    async fn delete(&self, idempotency_key: &str) -> Result<()> {
        self.entries.remove(idempotency_key);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64> {
        let now = Instant::now();
        let mut purged = 0u64;
        self.entries.retain(|_, value| {
            let keep = !value.is_expired(now);
            if !keep {
                purged += 1;
            }
            keep
        });
        Ok(purged)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
