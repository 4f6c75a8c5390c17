/// Capability interface over a container control plane.
///
/// The pool, injector, executor and image builder only talk to containers
/// through this trait, so each isolation backend is one implementation.
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;

use crate::error::ExecResult;
use crate::models::Backend;

/// What a cold start needs to launch a keep-alive container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub cmd: Vec<String>,
    pub working_dir: String,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
}

/// Point-in-time resource usage of a container.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StatsSnapshot {
    /// Cumulative CPU counter in nanoseconds.
    pub cpu_total: Option<u64>,
    /// Current memory usage in bytes.
    pub memory_usage: Option<u64>,
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    fn backend(&self) -> Backend;

    /// Build `context` (a tar archive with a Dockerfile at its root) as `tag`.
    async fn build_image(&self, context: Vec<u8>, tag: &str) -> ExecResult<()>;

    /// Create and start a detached container, returning its id.
    async fn create_container(&self, spec: &ContainerSpec) -> ExecResult<String>;

    async fn exec(
        &self,
        container_id: &str,
        cmd: Vec<String>,
        working_dir: &str,
    ) -> ExecResult<ExecOutput>;

    async fn stats(&self, container_id: &str) -> ExecResult<StatsSnapshot>;

    async fn copy_file_in(
        &self,
        container_id: &str,
        local_path: &Path,
        remote_path: &str,
    ) -> ExecResult<()>;

    async fn kill(&self, container_id: &str) -> ExecResult<()>;

    async fn remove(&self, container_id: &str) -> ExecResult<()>;

    async fn health_check(&self) -> ExecResult<String>;
}
