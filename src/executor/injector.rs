use std::io::Write;
use std::path::PathBuf;
use tracing::debug;

use crate::config::Config;
use crate::container::{ContainerHandle, ContainerRuntime};
use crate::error::{ExecError, ExecResult};
use crate::models::Language;

/// Overwrites the source file inside a checked-out container.
pub struct CodeInjector {
    scratch_dir: PathBuf,
}

impl CodeInjector {
    pub fn new(config: &Config) -> Self {
        Self {
            scratch_dir: config.scratch_dir(),
        }
    }

    pub async fn inject(
        &self,
        runtime: &dyn ContainerRuntime,
        handle: &ContainerHandle,
        code: &str,
        language: Language,
    ) -> ExecResult<()> {
        let scratch_dir = self.scratch_dir.clone();
        let source = code.as_bytes().to_vec();
        let scratch = tokio::task::spawn_blocking(move || {
            let mut scratch = tempfile::Builder::new()
                .prefix("inject_")
                .suffix(language.source_file())
                .tempfile_in(&scratch_dir)?;
            scratch.write_all(&source)?;
            scratch.flush()?;
            Ok::<_, std::io::Error>(scratch)
        })
        .await
        .map_err(|e| ExecError::Injection(format!("Scratch file task failed: {}", e)))?
        .map_err(|e| ExecError::Injection(format!("Failed to write scratch file: {}", e)))?;

        let remote_path = language.source_path();
        debug!(
            "Injecting {} bytes into {}:{}",
            code.len(),
            handle.container_id(),
            remote_path
        );

        runtime
            .copy_file_in(handle.container_id(), scratch.path(), &remote_path)
            .await
            .map_err(|e| match e {
                ExecError::Injection(_) => e,
                other => ExecError::Injection(other.to_string()),
            })
    }
}
