use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::idempotency::KeyStore;

/// Latency above which a responsive key store is reported as degraded.
const DEGRADED_LATENCY_MS: f64 = 100.0;

/// Health status of a service or dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    pub fn is_unhealthy(&self) -> bool {
        matches!(self, HealthStatus::Unhealthy)
    }
}

/// Health status of a single dependency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyHealth {
    pub name: String,
    pub status: HealthStatus,
    pub latency_ms: Option<f64>,
    pub message: Option<String>,
}

impl DependencyHealth {
    pub fn healthy(name: impl Into<String>, latency_ms: f64) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Healthy,
            latency_ms: Some(latency_ms),
            message: None,
        }
    }

    pub fn unhealthy(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Unhealthy,
            latency_ms: None,
            message: Some(message.into()),
        }
    }
}

/// Aggregated health check result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedHealth {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub dependencies: Vec<DependencyHealth>,
}

impl AggregatedHealth {
    pub fn new(version: String, uptime_seconds: u64, dependencies: Vec<DependencyHealth>) -> Self {
        let status = if dependencies.iter().any(|d| d.status.is_unhealthy()) {
            HealthStatus::Unhealthy
        } else if dependencies.iter().all(|d| d.status.is_healthy()) {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };

        Self {
            status,
            version,
            uptime_seconds,
            dependencies,
        }
    }
}

/// Health checker for the configured key store.
pub struct HealthChecker {
    store: Arc<dyn KeyStore>,
    start_time: Instant,
}

impl HealthChecker {
    pub fn new(store: Arc<dyn KeyStore>) -> Self {
        Self {
            store,
            start_time: Instant::now(),
        }
    }

    pub async fn check_all(&self) -> AggregatedHealth {
        AggregatedHealth::new(
            env!("CARGO_PKG_VERSION").to_string(),
            self.start_time.elapsed().as_secs(),
            vec![self.check_key_store().await],
        )
    }

    pub async fn check_key_store(&self) -> DependencyHealth {
        let name = self.store.backend_name();
        let start = Instant::now();

        match tokio::time::timeout(Duration::from_secs(5), self.store.health_check()).await {
            Ok(Ok(())) => {
                let latency = start.elapsed().as_secs_f64() * 1000.0;
                if latency > DEGRADED_LATENCY_MS {
                    DependencyHealth {
                        name: name.to_string(),
                        status: HealthStatus::Degraded,
                        latency_ms: Some(latency),
                        message: Some("High latency detected".to_string()),
                    }
                } else {
                    DependencyHealth::healthy(name, latency)
                }
            }
            Ok(Err(e)) => DependencyHealth::unhealthy(name, format!("Health check failed: {}", e)),
            Err(_) => DependencyHealth::unhealthy(name, "Health check timeout"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idempotency::InMemoryKeyStore;

    #[test]
    fn test_aggregated_health_status() {
        let health = AggregatedHealth::new(
            "1.0.0".to_string(),
            10,
            vec![DependencyHealth::healthy("memory", 0.1)],
        );
        assert_eq!(health.status, HealthStatus::Healthy);

        let health = AggregatedHealth::new(
            "1.0.0".to_string(),
            10,
            vec![DependencyHealth::unhealthy("redis", "down")],
        );
        assert_eq!(health.status, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_memory_store_is_healthy() {
        let checker = HealthChecker::new(Arc::new(InMemoryKeyStore::default()));
        let health = checker.check_all().await;

        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.dependencies[0].name, "memory");
    }
}
