/// Per-request limit validation
use crate::config::Config;
use crate::error::{ExecError, ExecResult};

#[derive(Debug, Clone)]
pub struct ResourceLimits {
    pub default_timeout_seconds: u64,
    pub max_timeout_seconds: u64,
    pub max_code_bytes: usize,
}

impl ResourceLimits {
    pub fn from_config(config: &Config) -> Self {
        Self {
            default_timeout_seconds: config.default_timeout_seconds,
            max_timeout_seconds: config.max_timeout_seconds,
            max_code_bytes: config.max_code_bytes,
        }
    }

    /// Resolve the effective timeout for a request.
    pub fn resolve_timeout(&self, requested: Option<u64>) -> ExecResult<u64> {
        let timeout = requested.unwrap_or(self.default_timeout_seconds);
        if timeout == 0 {
            return Err(ExecError::Validation(
                "timeoutSeconds must be at least 1".to_string(),
            ));
        }
        if timeout > self.max_timeout_seconds {
            return Err(ExecError::Validation(format!(
                "Timeout limit exceeded: requested {}s, max {}s",
                timeout, self.max_timeout_seconds
            )));
        }
        Ok(timeout)
    }

    pub fn validate_code_size(&self, code_size: usize) -> ExecResult<()> {
        if code_size > self.max_code_bytes {
            return Err(ExecError::Validation(format!(
                "Code size {} bytes exceeds maximum of {} bytes",
                code_size, self.max_code_bytes
            )));
        }
        Ok(())
    }
}
