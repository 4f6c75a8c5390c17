use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::container::{ContainerHandle, ContainerRuntime};
use crate::error::{ExecError, ExecResult};
use crate::models::{CompletedRun, Language, WORKDIR};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResourceUsage {
    pub cpu_usage: Option<u64>,
    pub mem_usage: Option<u64>,
}

/// Source of the resource figures attached to a completed run.
#[async_trait]
pub trait StatsSampler: Send + Sync {
    async fn sample(
        &self,
        runtime: &dyn ContainerRuntime,
        container_id: &str,
    ) -> ExecResult<ResourceUsage>;
}

/// One stats query right after the command finishes.
///
/// This is a snapshot, not an integral over the run: the CPU figure is the
/// container's cumulative counter and memory is current usage, so short runs
/// are undercounted.
pub struct SnapshotSampler;

#[async_trait]
impl StatsSampler for SnapshotSampler {
    async fn sample(
        &self,
        runtime: &dyn ContainerRuntime,
        container_id: &str,
    ) -> ExecResult<ResourceUsage> {
        let snapshot = runtime.stats(container_id).await?;
        Ok(ResourceUsage {
            cpu_usage: snapshot.cpu_total,
            mem_usage: snapshot.memory_usage,
        })
    }
}

/// Runs a language's entry command inside an already running container.
pub struct Executor {
    sampler: Arc<dyn StatsSampler>,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new(Arc::new(SnapshotSampler))
    }
}

impl Executor {
    pub fn new(sampler: Arc<dyn StatsSampler>) -> Self {
        Self { sampler }
    }

    /// Exit codes are data: a non-zero code is still `Ok`. Errors are
    /// reserved for timeouts and runtime faults, after which the caller must
    /// destroy the handle.
    pub async fn execute(
        &self,
        runtime: &dyn ContainerRuntime,
        handle: &ContainerHandle,
        language: Language,
        timeout_seconds: u64,
    ) -> ExecResult<CompletedRun> {
        let container_id = handle.container_id();
        let command = language.entry_command();
        debug!("Executing {:?} in container {}", command, container_id);

        let start_time = Instant::now();
        let output = match timeout(
            Duration::from_secs(timeout_seconds),
            runtime.exec(container_id, command, WORKDIR),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                warn!(
                    "Execution timeout after {}s in container {}",
                    timeout_seconds, container_id
                );
                return Err(ExecError::Timeout {
                    seconds: timeout_seconds,
                });
            }
        };
        let duration_ms = start_time.elapsed().as_millis() as u64;

        let usage = self.sampler.sample(runtime, container_id).await?;

        let mut logs = output.stdout;
        logs.push_str(&output.stderr);

        Ok(CompletedRun {
            logs,
            duration_ms,
            exit_code: output.exit_code,
            cpu_usage: usage.cpu_usage,
            mem_usage: usage.mem_usage,
        })
    }
}
