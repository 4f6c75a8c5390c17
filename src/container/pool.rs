use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::container::runtime::{ContainerRuntime, ContainerSpec};
use crate::error::{ExecError, ExecResult};
use crate::models::{Backend, WORKDIR};

/// Command that keeps a blank container alive between executions.
const KEEP_ALIVE_CMD: [&str; 3] = ["tail", "-f", "/dev/null"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum HandleState {
    WarmIdle,
    CheckedOut,
    Dead,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolKey {
    pub function_id: String,
    pub backend: Backend,
}

impl PoolKey {
    pub fn new(function_id: impl Into<String>, backend: Backend) -> Self {
        Self {
            function_id: function_id.into(),
            backend,
        }
    }
}

/// A pooled container. Not `Clone`: whoever holds the value owns the
/// container, either a pool queue or exactly one execution.
#[derive(Debug)]
pub struct ContainerHandle {
    handle_id: Uuid,
    container_id: String,
    key: PoolKey,
    image_tag: String,
    state: HandleState,
    created_at: Instant,
    last_used: Instant,
    execution_count: u32,
}

impl ContainerHandle {
    pub fn handle_id(&self) -> Uuid {
        self.handle_id
    }

    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    pub fn key(&self) -> &PoolKey {
        &self.key
    }

    pub fn backend(&self) -> Backend {
        self.key.backend
    }

    pub fn image_tag(&self) -> &str {
        &self.image_tag
    }

    pub fn state(&self) -> HandleState {
        self.state
    }

    pub fn execution_count(&self) -> u32 {
        self.execution_count
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn idle_for(&self) -> Duration {
        self.last_used.elapsed()
    }

    fn check_out(&mut self) {
        self.state = HandleState::CheckedOut;
        self.execution_count += 1;
    }
}

impl Drop for ContainerHandle {
    fn drop(&mut self) {
        if self.state == HandleState::CheckedOut {
            warn!(
                "Handle {} dropped while checked out, container {} is orphaned",
                self.handle_id, self.container_id
            );
        }
    }
}

#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub enabled: bool,
    pub max_idle_per_key: Option<usize>,
    pub idle_ttl: Option<Duration>,
    pub max_reuse: Option<u32>,
    pub reaper_interval: Duration,
    pub destroy_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl PoolSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            enabled: config.pool_enabled,
            max_idle_per_key: (config.pool_max_idle_per_key > 0)
                .then_some(config.pool_max_idle_per_key),
            idle_ttl: (config.pool_idle_ttl_seconds > 0)
                .then(|| Duration::from_secs(config.pool_idle_ttl_seconds)),
            max_reuse: (config.pool_max_container_reuse > 0)
                .then_some(config.pool_max_container_reuse),
            reaper_interval: Duration::from_secs(config.pool_reaper_interval_seconds.max(1)),
            destroy_timeout: Duration::from_secs(config.destroy_timeout_seconds.max(1)),
        }
    }
}

#[derive(Debug, Default)]
struct PoolCounters {
    cold_starts: AtomicU64,
    reuses: AtomicU64,
    releases: AtomicU64,
    destroys: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyStats {
    pub function_id: String,
    pub backend: Backend,
    pub idle: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub keys: Vec<KeyStats>,
    pub total_idle: usize,
    pub cold_starts: u64,
    pub reuses: u64,
    pub releases: u64,
    pub destroys: u64,
}

type Queue = Arc<Mutex<Vec<ContainerHandle>>>;

/// Warm container pools, one LIFO queue per (function, backend).
///
/// The outer map is only locked long enough to find or insert a queue;
/// pops and pushes hold the per-key lock alone, so keys never contend.
pub struct PoolManager {
    runtimes: HashMap<Backend, Arc<dyn ContainerRuntime>>,
    settings: PoolSettings,
    queues: RwLock<HashMap<PoolKey, Queue>>,
    counters: PoolCounters,
    closed: AtomicBool,
}

impl PoolManager {
    pub fn new(runtimes: Vec<Arc<dyn ContainerRuntime>>, settings: PoolSettings) -> Self {
        let runtimes = runtimes
            .into_iter()
            .map(|runtime| (runtime.backend(), runtime))
            .collect();

        Self {
            runtimes,
            settings,
            queues: RwLock::new(HashMap::new()),
            counters: PoolCounters::default(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> ExecResult<()> {
        if self.is_closed() {
            return Err(ExecError::Infra("Container pool is shut down".to_string()));
        }
        Ok(())
    }

    pub fn supports(&self, backend: Backend) -> bool {
        self.runtimes.contains_key(&backend)
    }

    pub fn runtime(&self, backend: Backend) -> ExecResult<Arc<dyn ContainerRuntime>> {
        self.runtimes.get(&backend).cloned().ok_or_else(|| {
            ExecError::Validation(format!("Backend '{}' is not enabled", backend))
        })
    }

    async fn queue(&self, key: &PoolKey) -> Queue {
        if let Some(queue) = self.queues.read().await.get(key) {
            return queue.clone();
        }
        self.queues
            .write()
            .await
            .entry(key.clone())
            .or_default()
            .clone()
    }

    /// Check out a warm handle for `key`, cold-starting one when none is idle.
    pub async fn acquire(&self, key: &PoolKey, image_tag: &str) -> ExecResult<ContainerHandle> {
        self.ensure_open()?;
        let queue = self.queue(key).await;

        loop {
            // Pop under the key lock; discarded handles are destroyed after it is released
            let candidate = queue.lock().await.pop();
            let Some(mut handle) = candidate else {
                break;
            };

            match self.stale_reason(&handle, image_tag) {
                None => {
                    handle.check_out();
                    self.counters.reuses.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        "Reusing warm container {} for {}/{} (uses: {})",
                        handle.container_id, key.function_id, key.backend, handle.execution_count
                    );
                    return Ok(handle);
                }
                Some(reason) => {
                    debug!(
                        "Discarding container {} (age {:?}): {}",
                        handle.container_id,
                        handle.age(),
                        reason
                    );
                    self.destroy(handle).await;
                }
            }
        }

        self.cold_start(key, image_tag).await
    }

    /// Launch a blank keep-alive container from `image_tag`, already checked out.
    pub async fn cold_start(&self, key: &PoolKey, image_tag: &str) -> ExecResult<ContainerHandle> {
        self.ensure_open()?;
        let runtime = self.runtime(key.backend)?;
        let handle_id = Uuid::new_v4();

        let spec = ContainerSpec {
            name: format!("faas-{}-{}-{}", key.function_id, key.backend, handle_id.simple()),
            image: image_tag.to_string(),
            cmd: KEEP_ALIVE_CMD.iter().map(|s| s.to_string()).collect(),
            working_dir: WORKDIR.to_string(),
            labels: HashMap::from([
                ("faas.function".to_string(), key.function_id.clone()),
                ("faas.backend".to_string(), key.backend.to_string()),
                ("faas.handle".to_string(), handle_id.to_string()),
            ]),
        };

        info!(
            "Cold starting container for {}/{} from '{}'",
            key.function_id, key.backend, image_tag
        );
        let container_id = runtime.create_container(&spec).await?;
        self.counters.cold_starts.fetch_add(1, Ordering::Relaxed);

        let now = Instant::now();
        let mut handle = ContainerHandle {
            handle_id,
            container_id,
            key: key.clone(),
            image_tag: image_tag.to_string(),
            state: HandleState::WarmIdle,
            created_at: now,
            last_used: now,
            execution_count: 0,
        };
        handle.check_out();
        Ok(handle)
    }

    /// Return a checked-out handle to its queue, or destroy it when the pool
    /// is disabled or shut down, the handle is worn out or the queue is full.
    pub async fn release(&self, mut handle: ContainerHandle) {
        if handle.state != HandleState::CheckedOut {
            warn!(
                "Refusing to release container {} in state {:?}",
                handle.container_id, handle.state
            );
            self.destroy(handle).await;
            return;
        }

        if !self.settings.enabled || self.is_closed() {
            self.destroy(handle).await;
            return;
        }
        if let Some(max_reuse) = self.settings.max_reuse {
            if handle.execution_count >= max_reuse {
                debug!(
                    "Container {} reached max reuse count ({})",
                    handle.container_id, max_reuse
                );
                self.destroy(handle).await;
                return;
            }
        }

        let queue = self.queue(&handle.key).await;
        let overflow = {
            let mut idle = queue.lock().await;
            // Rechecked under the key lock: shutdown closes the pool before it
            // drains, so a push made while still open is drained by shutdown.
            match self.settings.max_idle_per_key {
                _ if self.is_closed() => Some(handle),
                Some(max) if idle.len() >= max => Some(handle),
                _ => {
                    handle.state = HandleState::WarmIdle;
                    handle.last_used = Instant::now();
                    debug!(
                        "Returned container {} to {}/{} pool (size: {})",
                        handle.container_id,
                        handle.key.function_id,
                        handle.key.backend,
                        idle.len() + 1
                    );
                    idle.push(handle);
                    None
                }
            }
        };

        match overflow {
            Some(handle) => {
                debug!("Pool for {} is full or closed", handle.key.function_id);
                self.destroy(handle).await;
            }
            None => {
                self.counters.releases.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Kill and remove the container behind `handle`. Failures are logged and
    /// each runtime call is bounded so a wedged daemon cannot stall the caller.
    pub async fn destroy(&self, mut handle: ContainerHandle) {
        handle.state = HandleState::Dead;
        self.counters.destroys.fetch_add(1, Ordering::Relaxed);

        let runtime = match self.runtime(handle.key.backend) {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!("Cannot destroy container {}: {}", handle.container_id, e);
                return;
            }
        };

        let limit = self.settings.destroy_timeout;
        match tokio::time::timeout(limit, runtime.kill(&handle.container_id)).await {
            Ok(Ok(())) => {}
            // Already stopped containers refuse a kill; the forced remove still applies
            Ok(Err(e)) => debug!("Kill of {} failed: {}", handle.container_id, e),
            Err(_) => warn!("Kill of {} timed out after {:?}", handle.container_id, limit),
        }
        match tokio::time::timeout(limit, runtime.remove(&handle.container_id)).await {
            Ok(Ok(())) => debug!("Destroyed container {}", handle.container_id),
            Ok(Err(e)) => warn!("Failed to remove container {}: {}", handle.container_id, e),
            Err(_) => warn!("Remove of {} timed out after {:?}", handle.container_id, limit),
        }
    }

    fn stale_reason(&self, handle: &ContainerHandle, image_tag: &str) -> Option<String> {
        if handle.image_tag != image_tag {
            return Some(format!(
                "image '{}' does not match requested '{}'",
                handle.image_tag, image_tag
            ));
        }
        if let Some(ttl) = self.settings.idle_ttl {
            if handle.idle_for() > ttl {
                return Some(format!("idle longer than {:?}", ttl));
            }
        }
        if let Some(max_reuse) = self.settings.max_reuse {
            if handle.execution_count >= max_reuse {
                return Some(format!("reached max reuse count ({})", max_reuse));
            }
        }
        None
    }

    /// Destroy idle handles older than the TTL, then drop queues left empty.
    /// Returns how many handles were evicted.
    pub async fn reap_expired(&self) -> usize {
        let mut count = 0;
        if let Some(ttl) = self.settings.idle_ttl {
            let queues: Vec<Queue> = self.queues.read().await.values().cloned().collect();
            let mut expired = Vec::new();
            for queue in queues {
                let mut idle = queue.lock().await;
                let (old, fresh): (Vec<_>, Vec<_>) =
                    idle.drain(..).partition(|handle| handle.idle_for() > ttl);
                *idle = fresh;
                expired.extend(old);
            }

            count = expired.len();
            for handle in expired {
                debug!("Evicting idle container {}", handle.container_id);
                self.destroy(handle).await;
            }
            if count > 0 {
                info!("Pool reaper evicted {} idle containers", count);
            }
        }

        let pruned = self.prune_empty_queues().await;
        if pruned > 0 {
            debug!("Pruned {} empty pool queues", pruned);
        }
        count
    }

    /// Remove queues that are empty and not held by any caller. Runs under the
    /// map write lock, so no new reference to a queue can appear meanwhile.
    async fn prune_empty_queues(&self) -> usize {
        let mut queues = self.queues.write().await;
        let before = queues.len();
        queues.retain(|_, queue| {
            Arc::strong_count(queue) > 1
                || !queue.try_lock().map(|idle| idle.is_empty()).unwrap_or(false)
        });
        before - queues.len()
    }

    /// Spawn the background reaper when an idle TTL is configured.
    pub fn spawn_reaper(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        self.settings.idle_ttl?;

        let pool = Arc::downgrade(self);
        let period = self.settings.reaper_interval;
        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(pool) = pool.upgrade() else {
                    break;
                };
                pool.reap_expired().await;
            }
        }))
    }

    pub async fn stats(&self) -> PoolStats {
        let queues: Vec<(PoolKey, Queue)> = self
            .queues
            .read()
            .await
            .iter()
            .map(|(key, queue)| (key.clone(), queue.clone()))
            .collect();

        let mut keys = Vec::with_capacity(queues.len());
        for (key, queue) in queues {
            keys.push(KeyStats {
                function_id: key.function_id,
                backend: key.backend,
                idle: queue.lock().await.len(),
            });
        }
        keys.sort_by(|a, b| {
            (a.function_id.as_str(), a.backend.as_str())
                .cmp(&(b.function_id.as_str(), b.backend.as_str()))
        });

        PoolStats {
            total_idle: keys.iter().map(|k| k.idle).sum(),
            keys,
            cold_starts: self.counters.cold_starts.load(Ordering::Relaxed),
            reuses: self.counters.reuses.load(Ordering::Relaxed),
            releases: self.counters.releases.load(Ordering::Relaxed),
            destroys: self.counters.destroys.load(Ordering::Relaxed),
        }
    }

    /// Close the pool, then drain every queue and destroy all idle containers.
    /// Handles still checked out are destroyed when they are released.
    pub async fn shutdown(&self) {
        info!("Shutting down container pool...");
        self.closed.store(true, Ordering::SeqCst);

        let queues: Vec<Queue> = self.queues.write().await.drain().map(|(_, q)| q).collect();
        let mut drained = Vec::new();
        for queue in queues {
            drained.append(&mut *queue.lock().await);
        }

        let count = drained.len();
        for handle in drained {
            self.destroy(handle).await;
        }

        info!("Container pool shutdown complete ({} containers removed)", count);
    }
}
