use std::sync::Arc;

use crate::error::Result;
use crate::idempotency::storage::KeyStore;
use crate::observability::get_metrics;

/// Background task that actively evicts expired entries.
pub struct ExpiredEntrySweeper {
    store: Arc<dyn KeyStore>,
    interval_seconds: u64,
}

impl ExpiredEntrySweeper {
    pub fn new(store: Arc<dyn KeyStore>, interval_seconds: u64) -> Self {
        Self {
            store,
            interval_seconds,
        }
    }

    /// Runs the sweep once.
    pub async fn run_once(&self) -> Result<u64> {
        let count = self.store.purge_expired().await?;
        if count > 0 {
            get_metrics().record_entries_purged(self.store.backend_name(), count);
        }
        Ok(count)
    }

    /// Starts the sweeper in a background task.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(
                self.interval_seconds.max(1),
            ));

            loop {
                interval.tick().await;

                match self.run_once().await {
                    Ok(count) => {
                        if count > 0 {
                            tracing::info!("Purged {} expired idempotency entries", count);
                        }
                    }
                    Err(e) => {
                        tracing::error!("Failed to purge expired idempotency entries: {}", e);
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idempotency::storage::{ExpirationPolicy, InMemoryKeyStore};
    use std::time::Duration;

    #[tokio::test]
    async fn test_run_once_purges_memory_store() {
        let store = Arc::new(InMemoryKeyStore::new(ExpirationPolicy::ConstantTimeToLive(
            Duration::from_millis(1),
        )));
        store.claim("a", None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let sweeper = ExpiredEntrySweeper::new(store.clone(), 60);
        assert_eq!(sweeper.run_once().await.unwrap(), 1);
        assert_eq!(sweeper.run_once().await.unwrap(), 0);
    }
}
