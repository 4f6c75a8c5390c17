use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::config::Config;
use crate::container::ContainerRuntime;
use crate::error::{ExecError, ExecResult};
use crate::models::{Language, WORKDIR};
use crate::security::validate_function_id;

/// Tag for a function's image. One tag per (function, language); a rebuild
/// overwrites it.
pub fn image_tag(function_id: &str, language: Language) -> String {
    format!("function_{}_{}:latest", function_id, language)
}

/// Builds per-function images from a single-file build context.
pub struct ImageBuilder {
    runtime: Arc<dyn ContainerRuntime>,
    scratch_dir: PathBuf,
    python_base_image: String,
    javascript_base_image: String,
}

impl ImageBuilder {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: &Config) -> Self {
        Self {
            runtime,
            scratch_dir: config.scratch_dir(),
            python_base_image: config.python_base_image.clone(),
            javascript_base_image: config.javascript_base_image.clone(),
        }
    }

    pub fn base_image(&self, language: Language) -> &str {
        match language {
            Language::Python => &self.python_base_image,
            Language::Javascript => &self.javascript_base_image,
        }
    }

    pub fn dockerfile(&self, language: Language) -> String {
        let source = language.source_file();
        format!(
            "FROM {base}\nWORKDIR {dir}\nCOPY {source} {dir}/{source}\nCMD [\"{interpreter}\", \"{source}\"]\n",
            base = self.base_image(language),
            dir = WORKDIR,
            source = source,
            interpreter = language.interpreter(),
        )
    }

    /// Build the image for `function_id` and return its tag.
    ///
    /// The build context lives in a temporary directory under the scratch
    /// dir and is removed on every exit path, failed builds included.
    pub async fn build(
        &self,
        function_id: &str,
        language: Language,
        code: &str,
    ) -> ExecResult<String> {
        validate_function_id(function_id)?;
        let tag = image_tag(function_id, language);

        let context_dir = tempfile::Builder::new()
            .prefix(&format!("function_{}_", function_id))
            .tempdir_in(&self.scratch_dir)
            .map_err(|e| ExecError::Build(format!("Failed to create build context: {}", e)))?;

        // File writes and tar packing block, so they stay off the async workers
        let dir = context_dir.path().to_path_buf();
        let dockerfile = self.dockerfile(language);
        let code = code.to_string();
        let context = tokio::task::spawn_blocking(move || {
            pack_context(&dir, language, &dockerfile, &code)
        })
        .await
        .map_err(|e| ExecError::Build(format!("Build context task failed: {}", e)))?
        .map_err(|e| ExecError::Build(format!("Failed to pack build context: {}", e)))?;

        info!("Building image '{}' for function {}", tag, function_id);
        self.runtime.build_image(context, &tag).await?;
        info!("Built image '{}'", tag);

        Ok(tag)
    }
}

fn pack_context(
    dir: &Path,
    language: Language,
    dockerfile: &str,
    code: &str,
) -> std::io::Result<Vec<u8>> {
    let source_path = dir.join(language.source_file());
    let dockerfile_path = dir.join("Dockerfile");
    fs::write(&source_path, code)?;
    fs::write(&dockerfile_path, dockerfile)?;

    let mut archive = tar::Builder::new(Vec::new());
    archive.append_path_with_name(&dockerfile_path, "Dockerfile")?;
    archive.append_path_with_name(&source_path, language.source_file())?;
    archive.into_inner()
}
