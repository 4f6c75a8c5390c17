use serde::{Deserialize, Serialize};
use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{ExecError, ExecResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub docker_host: String,

    // Backends
    pub enable_sandboxed_backend: bool,
    pub sandbox_runtime: String, // OCI runtime name, e.g. runsc for gVisor

    // Container pool
    pub pool_enabled: bool,
    pub pool_max_idle_per_key: usize, // 0 = unbounded
    pub pool_idle_ttl_seconds: u64,   // 0 = no TTL
    pub pool_max_container_reuse: u32, // 0 = unlimited
    pub pool_reaper_interval_seconds: u64,
    pub destroy_timeout_seconds: u64,

    // Execution limits
    pub default_timeout_seconds: u64,
    pub max_timeout_seconds: u64,
    pub max_code_bytes: usize,
    pub max_concurrent_executions: usize,

    // Container resources
    pub max_memory_mb: u64,
    pub max_cpu_quota: u64, // 100000 = 1 CPU
    pub pids_limit: i64,

    // Rate limiting
    pub rate_limit_per_minute: u32,
    pub rate_limit_burst: u32,

    // Images
    pub python_base_image: String,
    pub javascript_base_image: String,
    pub scratch_dir: Option<PathBuf>,

    // Audit & logging
    pub enable_audit_log: bool,
    pub audit_log_path: String,
    pub log_level: String,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            docker_host: "unix:///var/run/docker.sock".to_string(),

            enable_sandboxed_backend: true,
            sandbox_runtime: "runsc".to_string(),

            // Unbounded pool without eviction unless configured
            pool_enabled: true,
            pool_max_idle_per_key: 0,
            pool_idle_ttl_seconds: 0,
            pool_max_container_reuse: 0,
            pool_reaper_interval_seconds: 30,
            destroy_timeout_seconds: 10,

            default_timeout_seconds: 30,
            max_timeout_seconds: 300,
            max_code_bytes: 100_000,
            max_concurrent_executions: 64,

            max_memory_mb: 512,
            max_cpu_quota: 100000,
            pids_limit: 128,

            rate_limit_per_minute: 600,
            rate_limit_burst: 50,

            python_base_image: "python:3.8-slim".to_string(),
            javascript_base_image: "node:14-slim".to_string(),
            scratch_dir: None,

            enable_audit_log: false,
            audit_log_path: "./logs/audit.log".to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

fn parse_var<T>(name: &str) -> ExecResult<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| ExecError::Configuration(format!("Invalid {}: {}", name, e))),
        Err(_) => Ok(None),
    }
}

impl Config {
    pub fn from_env() -> ExecResult<Self> {
        dotenvy::dotenv().ok();

        let mut config = Config::default();

        if let Ok(host) = env::var("FAAS_HOST") {
            config.host = host;
        }
        if let Some(port) = parse_var("FAAS_PORT")? {
            config.port = port;
        }
        if let Ok(docker_host) = env::var("DOCKER_HOST") {
            config.docker_host = docker_host;
        }

        // Backends
        if let Some(enabled) = parse_var("ENABLE_SANDBOXED_BACKEND")? {
            config.enable_sandboxed_backend = enabled;
        }
        if let Ok(runtime) = env::var("SANDBOX_RUNTIME") {
            config.sandbox_runtime = runtime;
        }

        // Container pool
        if let Some(enabled) = parse_var("POOL_ENABLED")? {
            config.pool_enabled = enabled;
        }
        if let Some(max_idle) = parse_var("POOL_MAX_IDLE_PER_KEY")? {
            config.pool_max_idle_per_key = max_idle;
        }
        if let Some(ttl) = parse_var("POOL_IDLE_TTL_SECONDS")? {
            config.pool_idle_ttl_seconds = ttl;
        }
        if let Some(max_reuse) = parse_var("POOL_MAX_CONTAINER_REUSE")? {
            config.pool_max_container_reuse = max_reuse;
        }
        if let Some(interval) = parse_var("POOL_REAPER_INTERVAL_SECONDS")? {
            config.pool_reaper_interval_seconds = interval;
        }
        if let Some(destroy_timeout) = parse_var("DESTROY_TIMEOUT_SECONDS")? {
            config.destroy_timeout_seconds = destroy_timeout;
        }

        // Execution limits
        if let Some(timeout) = parse_var("DEFAULT_TIMEOUT_SECONDS")? {
            config.default_timeout_seconds = timeout;
        }
        if let Some(max_timeout) = parse_var("MAX_TIMEOUT_SECONDS")? {
            config.max_timeout_seconds = max_timeout;
        }
        if let Some(max_code) = parse_var("MAX_CODE_BYTES")? {
            config.max_code_bytes = max_code;
        }
        if let Some(concurrent) = parse_var("MAX_CONCURRENT_EXECUTIONS")? {
            config.max_concurrent_executions = concurrent;
        }

        // Container resources
        if let Some(max_mem) = parse_var("MAX_MEMORY_MB")? {
            config.max_memory_mb = max_mem;
        }
        if let Some(max_cpu) = parse_var("MAX_CPU_QUOTA")? {
            config.max_cpu_quota = max_cpu;
        }
        if let Some(pids) = parse_var("PIDS_LIMIT")? {
            config.pids_limit = pids;
        }

        // Rate limiting
        if let Some(rate) = parse_var("RATE_LIMIT_PER_MINUTE")? {
            config.rate_limit_per_minute = rate;
        }
        if let Some(burst) = parse_var("RATE_LIMIT_BURST")? {
            config.rate_limit_burst = burst;
        }

        // Images
        if let Ok(image) = env::var("PYTHON_BASE_IMAGE") {
            config.python_base_image = image;
        }
        if let Ok(image) = env::var("JAVASCRIPT_BASE_IMAGE") {
            config.javascript_base_image = image;
        }
        if let Ok(dir) = env::var("SCRATCH_DIR") {
            config.scratch_dir = Some(PathBuf::from(dir));
        }

        // Audit & logging
        if let Some(audit) = parse_var("ENABLE_AUDIT_LOG")? {
            config.enable_audit_log = audit;
        }
        if let Ok(audit_path) = env::var("AUDIT_LOG_PATH") {
            config.audit_log_path = audit_path;
        }
        if let Ok(level) = env::var("LOG_LEVEL") {
            config.log_level = level;
        }
        if let Ok(format) = env::var("LOG_FORMAT") {
            config.log_format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "pretty" | "text" => LogFormat::Pretty,
                _ => {
                    return Err(ExecError::Configuration(format!(
                        "Invalid LOG_FORMAT: {}",
                        format
                    )))
                }
            };
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ExecResult<()> {
        if self.default_timeout_seconds == 0 || self.max_timeout_seconds == 0 {
            return Err(ExecError::Configuration(
                "timeouts must be at least one second".to_string(),
            ));
        }
        if self.default_timeout_seconds > self.max_timeout_seconds {
            return Err(ExecError::Configuration(format!(
                "DEFAULT_TIMEOUT_SECONDS ({}) exceeds MAX_TIMEOUT_SECONDS ({})",
                self.default_timeout_seconds, self.max_timeout_seconds
            )));
        }
        if self.max_concurrent_executions == 0 {
            return Err(ExecError::Configuration(
                "MAX_CONCURRENT_EXECUTIONS must be positive".to_string(),
            ));
        }
        if self.rate_limit_per_minute == 0 || self.rate_limit_burst == 0 {
            return Err(ExecError::Configuration(
                "rate limit values must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.scratch_dir.clone().unwrap_or_else(env::temp_dir)
    }
}
