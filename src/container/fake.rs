//! In-memory runtime used by unit tests.
//!
//! "Runs" sources with a tiny line interpreter: `print("x")` and
//! `console.log("x")` write to stdout, `error("x")` writes to stderr,
//! `sleep(n)` sleeps n seconds and `exit(n)` sets the exit code.
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::container::runtime::{ContainerRuntime, ContainerSpec, ExecOutput, StatsSnapshot};
use crate::error::{ExecError, ExecResult};
use crate::models::Backend;

#[derive(Debug, Clone)]
struct FakeContainer {
    image: String,
    source: Option<String>,
    alive: bool,
    execs: u64,
}

pub struct FakeRuntime {
    backend: Backend,
    next_id: AtomicUsize,
    images: Mutex<HashMap<String, String>>,
    containers: Mutex<HashMap<String, FakeContainer>>,
    created: Mutex<Vec<String>>,
    killed: Mutex<Vec<String>>,
    removed: Mutex<Vec<String>>,
    copies: Mutex<Vec<(String, String, String)>>,
    builds: Mutex<Vec<String>>,
    overwrite_on_copy: Mutex<Option<(String, String)>>,
    fail_builds: AtomicUsize,
    fail_creates: AtomicUsize,
    fail_copies: AtomicUsize,
    fail_execs: AtomicUsize,
    fail_stats: AtomicUsize,
}

fn take_failure(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn quoted_arg<'a>(line: &'a str, call: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(call)?.strip_prefix('(')?.strip_suffix(')')?;
    Some(rest.trim_matches(|c| c == '"' || c == '\''))
}

impl FakeRuntime {
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            next_id: AtomicUsize::new(0),
            images: Mutex::new(HashMap::new()),
            containers: Mutex::new(HashMap::new()),
            created: Mutex::new(Vec::new()),
            killed: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
            copies: Mutex::new(Vec::new()),
            builds: Mutex::new(Vec::new()),
            overwrite_on_copy: Mutex::new(None),
            fail_builds: AtomicUsize::new(0),
            fail_creates: AtomicUsize::new(0),
            fail_copies: AtomicUsize::new(0),
            fail_execs: AtomicUsize::new(0),
            fail_stats: AtomicUsize::new(0),
        }
    }

    pub fn fail_builds(&self, n: usize) {
        self.fail_builds.store(n, Ordering::SeqCst);
    }

    pub fn fail_creates(&self, n: usize) {
        self.fail_creates.store(n, Ordering::SeqCst);
    }

    pub fn fail_copies(&self, n: usize) {
        self.fail_copies.store(n, Ordering::SeqCst);
    }

    pub fn fail_execs(&self, n: usize) {
        self.fail_execs.store(n, Ordering::SeqCst);
    }

    pub fn fail_stats(&self, n: usize) {
        self.fail_stats.store(n, Ordering::SeqCst);
    }

    /// Replace the source behind `tag` when the next copy starts, as a
    /// concurrent build of the same function would.
    pub fn overwrite_image_on_next_copy(&self, tag: &str, source: &str) {
        *self.overwrite_on_copy.lock().unwrap() = Some((tag.to_string(), source.to_string()));
    }

    pub fn created(&self) -> Vec<String> {
        self.created.lock().unwrap().clone()
    }

    pub fn killed(&self) -> Vec<String> {
        self.killed.lock().unwrap().clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.removed.lock().unwrap().clone()
    }

    pub fn builds(&self) -> Vec<String> {
        self.builds.lock().unwrap().clone()
    }

    /// (container id, remote path, content) for every successful copy.
    pub fn copies(&self) -> Vec<(String, String, String)> {
        self.copies.lock().unwrap().clone()
    }

    pub fn image_source(&self, tag: &str) -> Option<String> {
        self.images.lock().unwrap().get(tag).cloned()
    }

    pub fn is_alive(&self, container_id: &str) -> bool {
        self.containers
            .lock()
            .unwrap()
            .get(container_id)
            .map(|c| c.alive)
            .unwrap_or(false)
    }

    fn source_of(&self, container_id: &str) -> ExecResult<String> {
        let containers = self.containers.lock().unwrap();
        let container = containers
            .get(container_id)
            .filter(|c| c.alive)
            .ok_or_else(|| ExecError::Infra(format!("No such container: {}", container_id)))?;
        if let Some(source) = &container.source {
            return Ok(source.clone());
        }
        Ok(self.image_source(&container.image).unwrap_or_default())
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    fn backend(&self) -> Backend {
        self.backend
    }

    async fn build_image(&self, context: Vec<u8>, tag: &str) -> ExecResult<()> {
        if take_failure(&self.fail_builds) {
            return Err(ExecError::Build("base image not found".to_string()));
        }

        let mut archive = tar::Archive::new(context.as_slice());
        let mut dockerfile = None;
        let mut source = None;
        for entry in archive.entries()? {
            let mut entry = entry?;
            let name = entry.path()?.to_string_lossy().into_owned();
            let mut content = String::new();
            entry.read_to_string(&mut content)?;
            if name.ends_with("Dockerfile") {
                dockerfile = Some(content);
            } else if name.contains("function.") {
                source = Some(content);
            }
        }

        if dockerfile.is_none() {
            return Err(ExecError::Build("build context has no Dockerfile".to_string()));
        }
        self.images
            .lock()
            .unwrap()
            .insert(tag.to_string(), source.unwrap_or_default());
        self.builds.lock().unwrap().push(tag.to_string());
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> ExecResult<String> {
        tokio::task::yield_now().await;
        if take_failure(&self.fail_creates) {
            return Err(ExecError::ContainerStart("no space left on device".to_string()));
        }

        let id = format!("fake-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.containers.lock().unwrap().insert(
            id.clone(),
            FakeContainer {
                image: spec.image.clone(),
                source: None,
                alive: true,
                execs: 0,
            },
        );
        self.created.lock().unwrap().push(id.clone());
        Ok(id)
    }

    async fn exec(
        &self,
        container_id: &str,
        _cmd: Vec<String>,
        _working_dir: &str,
    ) -> ExecResult<ExecOutput> {
        if take_failure(&self.fail_execs) {
            return Err(ExecError::Infra("exec create failed".to_string()));
        }

        let source = self.source_of(container_id)?;
        let mut output = ExecOutput::default();
        for line in source.lines().map(str::trim) {
            if let Some(text) = quoted_arg(line, "print").or_else(|| quoted_arg(line, "console.log")) {
                output.stdout.push_str(text);
                output.stdout.push('\n');
            } else if let Some(text) = quoted_arg(line, "error") {
                output.stderr.push_str(text);
                output.stderr.push('\n');
            } else if let Some(secs) = quoted_arg(line, "sleep") {
                let secs: u64 = secs.parse().unwrap_or(0);
                tokio::time::sleep(Duration::from_secs(secs)).await;
            } else if let Some(code) = quoted_arg(line, "exit") {
                output.exit_code = code.parse().unwrap_or(1);
                break;
            }
        }

        if let Some(container) = self.containers.lock().unwrap().get_mut(container_id) {
            container.execs += 1;
        }
        Ok(output)
    }

    async fn stats(&self, container_id: &str) -> ExecResult<StatsSnapshot> {
        if take_failure(&self.fail_stats) {
            return Err(ExecError::Infra("stats unavailable".to_string()));
        }
        let containers = self.containers.lock().unwrap();
        let container = containers
            .get(container_id)
            .ok_or_else(|| ExecError::Infra(format!("No such container: {}", container_id)))?;
        Ok(StatsSnapshot {
            cpu_total: Some(1_000_000 * container.execs),
            memory_usage: Some(8 * 1024 * 1024),
        })
    }

    async fn copy_file_in(
        &self,
        container_id: &str,
        local_path: &Path,
        remote_path: &str,
    ) -> ExecResult<()> {
        if let Some((tag, source)) = self.overwrite_on_copy.lock().unwrap().take() {
            self.images.lock().unwrap().insert(tag, source);
        }
        if take_failure(&self.fail_copies) {
            return Err(ExecError::Injection("copy rejected by daemon".to_string()));
        }
        let content = std::fs::read_to_string(local_path)
            .map_err(|e| ExecError::Injection(e.to_string()))?;

        let mut containers = self.containers.lock().unwrap();
        let container = containers
            .get_mut(container_id)
            .filter(|c| c.alive)
            .ok_or_else(|| ExecError::Injection(format!("No such container: {}", container_id)))?;
        container.source = Some(content.clone());
        self.copies.lock().unwrap().push((
            container_id.to_string(),
            remote_path.to_string(),
            content,
        ));
        Ok(())
    }

    async fn kill(&self, container_id: &str) -> ExecResult<()> {
        if let Some(container) = self.containers.lock().unwrap().get_mut(container_id) {
            container.alive = false;
        }
        self.killed.lock().unwrap().push(container_id.to_string());
        Ok(())
    }

    async fn remove(&self, container_id: &str) -> ExecResult<()> {
        self.containers.lock().unwrap().remove(container_id);
        self.removed.lock().unwrap().push(container_id.to_string());
        Ok(())
    }

    async fn health_check(&self) -> ExecResult<String> {
        Ok(format!("fake {}", self.backend))
    }
}
