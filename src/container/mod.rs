pub mod docker;
pub mod pool;
pub mod runtime;

#[cfg(test)]
pub(crate) mod fake;

pub use docker::DockerRuntime;
pub use pool::{ContainerHandle, HandleState, PoolKey, PoolManager, PoolSettings, PoolStats};
pub use runtime::{ContainerRuntime, ContainerSpec, ExecOutput, StatsSnapshot};
