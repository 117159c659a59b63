pub mod codec;
pub mod coordinator;
pub mod fingerprint;
pub mod model;
pub mod storage;
pub mod sweeper;
pub mod validator;

pub use codec::EntryCodec;
pub use coordinator::{
    replay, CoordinatorConfig, IdempotencyCoordinator, IdempotencyMetrics, MetricsSnapshot,
    RetryDecision,
};
pub use fingerprint::{DigestFingerprintStrategy, FingerprintStrategy};
pub use model::{CapturedHeaders, IdempotencyEntry, IdempotencyFingerprint, IdempotencyResponse};
pub use storage::{
    build_key_store, ExpirationPolicy, InMemoryKeyStore, KeyStore, PostgresKeyStore,
    RedisKeyStore,
};
pub use sweeper::ExpiredEntrySweeper;
pub use validator::{ResponseValidator, SuccessStatusValidator};
