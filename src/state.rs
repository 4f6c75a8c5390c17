use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use nonzero_ext::nonzero;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

use crate::config::Config;
use crate::container::ContainerRuntime;
use crate::error::ErrorKind;
use crate::executor::ExecutionService;
use crate::models::ExecutionResult;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub service: Arc<ExecutionService>,
    /// Runtime queried for daemon health.
    pub health_runtime: Arc<dyn ContainerRuntime>,
    pub rate_limiter: Arc<DefaultDirectRateLimiter>,
    pub stats: Arc<RwLock<ServiceStats>>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        config: Config,
        service: Arc<ExecutionService>,
        health_runtime: Arc<dyn ContainerRuntime>,
    ) -> Self {
        let per_minute = NonZeroU32::new(config.rate_limit_per_minute).unwrap_or(nonzero!(1u32));
        let burst = NonZeroU32::new(config.rate_limit_burst).unwrap_or(nonzero!(1u32));
        let quota = Quota::per_minute(per_minute).allow_burst(burst);

        Self {
            config,
            service,
            health_runtime,
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
            stats: Arc::new(RwLock::new(ServiceStats::default())),
            start_time: Instant::now(),
        }
    }

    /// Reserve an execution slot; `false` when the concurrency cap is reached.
    pub async fn try_begin_execution(&self) -> bool {
        let mut stats = self.stats.write().await;
        if stats.active_executions >= self.config.max_concurrent_executions {
            return false;
        }
        stats.total_executions += 1;
        stats.active_executions += 1;
        true
    }

    pub async fn finish_execution(&self, result: &ExecutionResult) {
        let mut stats = self.stats.write().await;
        stats.active_executions = stats.active_executions.saturating_sub(1);
        match result.error_kind() {
            None => stats.successful_executions += 1,
            Some(ErrorKind::Timeout) => {
                stats.timeout_executions += 1;
                stats.failed_executions += 1;
            }
            Some(_) => stats.failed_executions += 1,
        }
    }

    pub async fn get_stats(&self) -> ServiceStats {
        self.stats.read().await.clone()
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ServiceStats {
    pub total_executions: u64,
    pub active_executions: usize,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub timeout_executions: u64,
}
