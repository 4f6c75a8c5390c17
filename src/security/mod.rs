pub mod limits;

use bollard::models::HostConfig;
use regex::Regex;
use std::sync::LazyLock;

use crate::config::Config;
use crate::error::{ExecError, ExecResult};

// Function ids end up in image tags, which must be lowercase.
static FUNCTION_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9_.-]{0,63}$").expect("valid function id regex"));

pub struct SecurityConfig {
    pub memory_limit: i64, // bytes
    pub cpu_quota: i64,
    pub cpu_period: i64,
    pub pids_limit: i64,
    pub drop_capabilities: bool,
    /// Host OCI runtime, set only for the sandboxed backend.
    pub oci_runtime: Option<String>,
}

impl SecurityConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            memory_limit: (config.max_memory_mb * 1024 * 1024) as i64,
            cpu_quota: config.max_cpu_quota as i64,
            cpu_period: 100000,
            pids_limit: config.pids_limit,
            drop_capabilities: true,
            oci_runtime: None,
        }
    }

    pub fn with_runtime(mut self, runtime: impl Into<String>) -> Self {
        self.oci_runtime = Some(runtime.into());
        self
    }

    pub fn to_host_config(&self) -> HostConfig {
        let mut host_config = HostConfig::default();

        // No swap beyond the memory limit
        host_config.memory = Some(self.memory_limit);
        host_config.memory_swap = Some(self.memory_limit);

        host_config.cpu_quota = Some(self.cpu_quota);
        host_config.cpu_period = Some(self.cpu_period);
        host_config.pids_limit = Some(self.pids_limit);

        if self.drop_capabilities {
            host_config.cap_drop = Some(vec!["ALL".to_string()]);
        }
        host_config.security_opt = Some(vec!["no-new-privileges".to_string()]);
        host_config.privileged = Some(false);
        host_config.runtime = self.oci_runtime.clone();

        host_config
    }
}

pub fn validate_function_id(id: &str) -> ExecResult<()> {
    if FUNCTION_ID_RE.is_match(id) {
        Ok(())
    } else {
        Err(ExecError::Validation(format!(
            "Invalid function id '{}': expected lowercase letters, digits, '_', '.' or '-'",
            id
        )))
    }
}

/// Reject source that cannot be written into a container verbatim.
pub fn validate_code(code: &str) -> ExecResult<()> {
    if code.trim().is_empty() {
        return Err(ExecError::Validation("Code must not be empty".to_string()));
    }
    if code.contains('\0') {
        return Err(ExecError::Validation("Code contains null bytes".to_string()));
    }
    Ok(())
}
