use async_trait::async_trait;
use bollard::container::LogOutput;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::query_parameters::{BuildImageOptionsBuilder, UploadToContainerOptionsBuilder};
use bollard::service::ContainerCreateBody;
use bollard::Docker;
use bytes::Bytes;
use futures::StreamExt;
use std::path::Path;
use tracing::{debug, error, info, warn};

use crate::config::Config as AppConfig;
use crate::container::runtime::{ContainerRuntime, ContainerSpec, ExecOutput, StatsSnapshot};
use crate::error::{ExecError, ExecResult};
use crate::models::Backend;
use crate::security::SecurityConfig;

/// Connect to the Docker daemon named in the config and verify it answers.
pub async fn connect(config: &AppConfig) -> ExecResult<Docker> {
    let docker = if config.docker_host.starts_with("unix://") {
        Docker::connect_with_unix(
            config.docker_host.trim_start_matches("unix://"),
            120,
            bollard::API_DEFAULT_VERSION,
        )
    } else {
        Docker::connect_with_http(&config.docker_host, 120, bollard::API_DEFAULT_VERSION)
    }
    .map_err(|e| ExecError::DockerConnection(e.to_string()))?;

    match docker.ping().await {
        Ok(_) => info!("Docker connection established"),
        Err(e) => {
            error!("Docker connection failed: {}", e);
            return Err(ExecError::DockerConnection(e.to_string()));
        }
    }

    Ok(docker)
}

/// Docker-backed runtime. The standard and sandboxed backends share a daemon
/// and differ only in the host OCI runtime their containers start under.
pub struct DockerRuntime {
    docker: Docker,
    security: SecurityConfig,
    backend: Backend,
}

impl DockerRuntime {
    pub fn standard(docker: Docker, config: &AppConfig) -> Self {
        Self {
            docker,
            security: SecurityConfig::from_config(config),
            backend: Backend::Standard,
        }
    }

    pub fn sandboxed(docker: Docker, config: &AppConfig) -> Self {
        Self {
            docker,
            security: SecurityConfig::from_config(config).with_runtime(&config.sandbox_runtime),
            backend: Backend::Sandboxed,
        }
    }

    fn single_file_tar(name: &str, content: &[u8]) -> ExecResult<Vec<u8>> {
        let mut header = tar::Header::new_gnu();
        header.set_path(name)?;
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();

        let mut archive = tar::Builder::new(Vec::new());
        archive.append(&header, content)?;
        Ok(archive.into_inner()?)
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    fn backend(&self) -> Backend {
        self.backend
    }

    async fn build_image(&self, context: Vec<u8>, tag: &str) -> ExecResult<()> {
        let options = BuildImageOptionsBuilder::default()
            .dockerfile("Dockerfile")
            .t(tag)
            .rm(true)
            .forcerm(true)
            .build();

        let mut build_stream =
            self.docker
                .build_image(options, None, Some(bollard::body_full(Bytes::from(context))));

        while let Some(msg) = build_stream.next().await {
            match msg {
                Ok(info) => {
                    if let Some(err) = info.error {
                        return Err(ExecError::Build(err));
                    }
                    if let Some(stream) = info.stream {
                        let line = stream.trim();
                        if !line.is_empty() {
                            debug!("[build {}] {}", tag, line);
                        }
                    }
                }
                Err(e) => return Err(ExecError::Build(e.to_string())),
            }
        }

        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> ExecResult<String> {
        let mut container_config = ContainerCreateBody::default();
        container_config.image = Some(spec.image.clone());
        container_config.cmd = Some(spec.cmd.clone());
        container_config.working_dir = Some(spec.working_dir.clone());
        container_config.labels = Some(spec.labels.clone());
        container_config.attach_stdout = Some(false);
        container_config.attach_stderr = Some(false);
        container_config.tty = Some(false);
        container_config.open_stdin = Some(false);
        container_config.host_config = Some(self.security.to_host_config());

        let response = self
            .docker
            .create_container(
                Some(bollard::container::CreateContainerOptions {
                    name: spec.name.clone(),
                    platform: None,
                }),
                container_config,
            )
            .await
            .map_err(|e| ExecError::ContainerStart(e.to_string()))?;

        for warning in response.warnings {
            warn!("Container creation warning: {}", warning);
        }

        if let Err(e) = self
            .docker
            .start_container(
                &response.id,
                None::<bollard::container::StartContainerOptions<String>>,
            )
            .await
        {
            // Never leave a created-but-unstarted container behind
            if let Err(remove_err) = self.remove(&response.id).await {
                warn!(
                    "Failed to remove unstarted container {}: {}",
                    response.id, remove_err
                );
            }
            return Err(ExecError::ContainerStart(e.to_string()));
        }

        debug!("Container {} started ({} backend)", response.id, self.backend);
        Ok(response.id)
    }

    async fn exec(
        &self,
        container_id: &str,
        cmd: Vec<String>,
        working_dir: &str,
    ) -> ExecResult<ExecOutput> {
        let exec_config = CreateExecOptions {
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            cmd: Some(cmd),
            working_dir: Some(working_dir.to_string()),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(container_id, exec_config)
            .await
            .map_err(|e| ExecError::Infra(format!("Failed to create exec: {}", e)))?;

        let start_result = self
            .docker
            .start_exec(&exec.id, None::<bollard::exec::StartExecOptions>)
            .await
            .map_err(|e| ExecError::Infra(format!("Failed to start exec: {}", e)))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        if let StartExecResults::Attached { mut output, .. } = start_result {
            while let Some(msg) = output.next().await {
                match msg {
                    Ok(LogOutput::StdOut { message }) => stdout.extend_from_slice(&message),
                    Ok(LogOutput::StdErr { message }) => stderr.extend_from_slice(&message),
                    Ok(_) => {}
                    Err(e) => {
                        return Err(ExecError::Infra(format!("Error reading output: {}", e)));
                    }
                }
            }
        }

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| ExecError::Infra(format!("Failed to inspect exec: {}", e)))?;
        let exit_code = inspect.exit_code.ok_or_else(|| {
            ExecError::Infra(format!("Exec in {} finished without an exit code", container_id))
        })?;

        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_code,
        })
    }

    async fn stats(&self, container_id: &str) -> ExecResult<StatsSnapshot> {
        let stats = self
            .docker
            .stats(
                container_id,
                Some(bollard::container::StatsOptions {
                    stream: false,
                    one_shot: true,
                }),
            )
            .next()
            .await
            .ok_or_else(|| ExecError::Infra(format!("No stats returned for {}", container_id)))?
            .map_err(|e| ExecError::Infra(format!("Failed to query stats: {}", e)))?;

        Ok(StatsSnapshot {
            cpu_total: stats
                .cpu_stats
                .as_ref()
                .and_then(|cpu| cpu.cpu_usage.as_ref())
                .and_then(|usage| usage.total_usage),
            memory_usage: stats.memory_stats.as_ref().and_then(|mem| mem.usage),
        })
    }

    async fn copy_file_in(
        &self,
        container_id: &str,
        local_path: &Path,
        remote_path: &str,
    ) -> ExecResult<()> {
        let remote = Path::new(remote_path);
        let (dir, name) = match (remote.parent(), remote.file_name()) {
            (Some(dir), Some(name)) => (dir.to_string_lossy(), name.to_string_lossy()),
            _ => {
                return Err(ExecError::Injection(format!(
                    "Invalid remote path: {}",
                    remote_path
                )))
            }
        };

        let content = tokio::fs::read(local_path).await.map_err(|e| {
            ExecError::Injection(format!("Failed to read {}: {}", local_path.display(), e))
        })?;
        let archive = Self::single_file_tar(&name, &content)
            .map_err(|e| ExecError::Injection(e.to_string()))?;

        let options = UploadToContainerOptionsBuilder::default()
            .path(&dir)
            .build();

        self.docker
            .upload_to_container(
                container_id,
                Some(options),
                bollard::body_full(Bytes::from(archive)),
            )
            .await
            .map_err(|e| ExecError::Injection(e.to_string()))?;

        debug!("Copied {} into {}:{}", local_path.display(), container_id, remote_path);
        Ok(())
    }

    async fn kill(&self, container_id: &str) -> ExecResult<()> {
        self.docker
            .kill_container(
                container_id,
                None::<bollard::container::KillContainerOptions<String>>,
            )
            .await
            .map_err(|e| ExecError::Infra(format!("Failed to kill {}: {}", container_id, e)))
    }

    async fn remove(&self, container_id: &str) -> ExecResult<()> {
        let options = bollard::container::RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };

        self.docker
            .remove_container(container_id, Some(options))
            .await
            .map_err(|e| ExecError::Infra(format!("Failed to remove {}: {}", container_id, e)))
    }

    async fn health_check(&self) -> ExecResult<String> {
        match self.docker.version().await {
            Ok(version) => Ok(format!("Docker {}", version.version.unwrap_or_default())),
            Err(e) => Err(ExecError::DockerConnection(e.to_string())),
        }
    }
}
