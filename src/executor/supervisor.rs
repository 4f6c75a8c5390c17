use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::container::{ContainerHandle, ContainerRuntime, PoolKey, PoolManager};
use crate::error::{ExecError, ExecResult};
use crate::executor::audit::AuditLogger;
use crate::executor::engine::Executor;
use crate::executor::image::ImageBuilder;
use crate::executor::injector::CodeInjector;
use crate::models::{
    Backend, CompletedRun, ExecuteRequest, ExecutionOutcome, ExecutionResult, FunctionSpec,
    Language,
};
use crate::security::{limits::ResourceLimits, validate_code, validate_function_id};

/// Drives one execution through build, checkout, injection and run, and
/// decides whether the container goes back to the pool or is destroyed.
///
/// Every checked-out handle leaves `run` either released or destroyed.
pub struct ExecutionService {
    pool: Arc<PoolManager>,
    builder: ImageBuilder,
    injector: CodeInjector,
    executor: Executor,
    limits: ResourceLimits,
    audit_logger: Option<AuditLogger>,
}

impl ExecutionService {
    pub fn new(
        pool: Arc<PoolManager>,
        builder: ImageBuilder,
        injector: CodeInjector,
        executor: Executor,
        config: &Config,
    ) -> Self {
        let audit_logger = if config.enable_audit_log {
            match AuditLogger::new(&config.audit_log_path) {
                Ok(logger) => Some(logger),
                Err(e) => {
                    error!("Failed to initialize audit logger: {}", e);
                    None
                }
            }
        } else {
            None
        };

        Self {
            pool,
            builder,
            injector,
            executor,
            limits: ResourceLimits::from_config(config),
            audit_logger,
        }
    }

    /// Wire the default components: images are built through `build_runtime`.
    pub fn from_config(
        config: &Config,
        pool: Arc<PoolManager>,
        build_runtime: Arc<dyn ContainerRuntime>,
    ) -> Self {
        Self::new(
            pool,
            ImageBuilder::new(build_runtime, config),
            CodeInjector::new(config),
            Executor::default(),
            config,
        )
    }

    pub fn pool(&self) -> &Arc<PoolManager> {
        &self.pool
    }

    /// Turn a raw API request into a typed function spec and backend.
    pub fn prepare(&self, request: ExecuteRequest) -> ExecResult<(FunctionSpec, Backend)> {
        let language = Language::parse(&request.language)?;
        let backend = match request.backend.as_deref() {
            Some(name) => Backend::parse(name)?,
            None => Backend::default(),
        };
        let timeout_seconds = self.limits.resolve_timeout(request.timeout_seconds)?;

        Ok((
            FunctionSpec {
                id: request.function_id,
                language,
                code: request.code,
                timeout_seconds,
            },
            backend,
        ))
    }

    pub async fn execute_request(&self, request: ExecuteRequest) -> ExecutionResult {
        let function_id = request.function_id.clone();
        let fallback_backend = request
            .backend
            .as_deref()
            .and_then(|name| Backend::parse(name).ok())
            .unwrap_or_default();

        match self.prepare(request) {
            Ok((spec, backend)) => self.execute(spec, backend).await,
            Err(e) => {
                warn!("Rejected execution request for {}: {}", function_id, e);
                let now = Utc::now();
                ExecutionResult {
                    execution_id: Uuid::new_v4(),
                    function_id,
                    backend: fallback_backend,
                    handle_id: None,
                    outcome: e.into(),
                    created_at: now,
                    completed_at: now,
                }
            }
        }
    }

    /// Execute `spec` on `backend`. Always yields exactly one of a completed
    /// run or an error.
    pub async fn execute(&self, spec: FunctionSpec, backend: Backend) -> ExecutionResult {
        let execution_id = Uuid::new_v4();
        let created_at = Utc::now();

        info!(
            "Starting execution {} for function {} ({}, {} backend)",
            execution_id, spec.id, spec.language, backend
        );
        if let Some(ref logger) = self.audit_logger {
            logger
                .log_execution_start(&execution_id.to_string(), &spec, backend)
                .await;
        }

        let (handle_id, outcome) = self.run(&spec, backend).await;

        let outcome = match outcome {
            Ok(run) => {
                info!(
                    "Execution {} finished in {}ms with exit code {}",
                    execution_id, run.duration_ms, run.exit_code
                );
                ExecutionOutcome::Completed(run)
            }
            Err(e) => {
                error!("Execution {} failed: {}", execution_id, e);
                e.into()
            }
        };

        let result = ExecutionResult {
            execution_id,
            function_id: spec.id.clone(),
            backend,
            handle_id,
            outcome,
            created_at,
            completed_at: Utc::now(),
        };

        if let Some(ref logger) = self.audit_logger {
            logger.log_execution_finished(&spec, &result).await;
        }

        result
    }

    fn validate(&self, spec: &FunctionSpec, backend: Backend) -> ExecResult<()> {
        validate_function_id(&spec.id)?;
        validate_code(&spec.code)?;
        self.limits.validate_code_size(spec.code.len())?;
        self.limits.resolve_timeout(Some(spec.timeout_seconds))?;
        if !self.pool.supports(backend) {
            return Err(ExecError::Validation(format!(
                "Backend '{}' is not enabled",
                backend
            )));
        }
        Ok(())
    }

    async fn run(
        &self,
        spec: &FunctionSpec,
        backend: Backend,
    ) -> (Option<Uuid>, ExecResult<CompletedRun>) {
        let prepared = async {
            self.validate(spec, backend)?;
            let tag = self.builder.build(&spec.id, spec.language, &spec.code).await?;
            let runtime = self.pool.runtime(backend)?;
            let key = PoolKey::new(spec.id.clone(), backend);
            let handle = self.checkout(runtime.as_ref(), &key, &tag, spec).await?;
            Ok::<_, ExecError>((runtime, handle))
        }
        .await;

        let (runtime, handle) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => return (None, Err(e)),
        };
        let handle_id = handle.handle_id();

        let result = self
            .executor
            .execute(runtime.as_ref(), &handle, spec.language, spec.timeout_seconds)
            .await;

        match result {
            Ok(run) => {
                self.pool.release(handle).await;
                (Some(handle_id), Ok(run))
            }
            Err(e) => {
                // Timed-out or faulted containers are never reused; destroy
                // kills whatever is still running before we report.
                warn!("Destroying container {} after failure: {}", handle.container_id(), e);
                self.pool.destroy(handle).await;
                (Some(handle_id), Err(e))
            }
        }
    }

    /// Acquire a handle and inject the source. An injection failure destroys
    /// the handle and cold-starts exactly one replacement, which is injected
    /// too: the shared image tag may already hold another request's build.
    async fn checkout(
        &self,
        runtime: &dyn ContainerRuntime,
        key: &PoolKey,
        image_tag: &str,
        spec: &FunctionSpec,
    ) -> ExecResult<ContainerHandle> {
        let handle = self.pool.acquire(key, image_tag).await?;

        let inject_err = match self
            .injector
            .inject(runtime, &handle, &spec.code, spec.language)
            .await
        {
            Ok(()) => return Ok(handle),
            Err(e) => e,
        };

        warn!(
            "Injection into container {} failed, replacing it: {}",
            handle.container_id(),
            inject_err
        );
        self.pool.destroy(handle).await;

        let replacement = self.pool.cold_start(key, image_tag).await.map_err(|start_err| {
            ExecError::Injection(format!(
                "{}; replacement cold start failed: {}",
                inject_err, start_err
            ))
        })?;

        match self
            .injector
            .inject(runtime, &replacement, &spec.code, spec.language)
            .await
        {
            Ok(()) => Ok(replacement),
            Err(retry_err) => {
                error!(
                    "Injection into replacement container {} failed: {}",
                    replacement.container_id(),
                    retry_err
                );
                self.pool.destroy(replacement).await;
                Err(ExecError::Injection(format!(
                    "{}; replacement injection failed: {}",
                    inject_err, retry_err
                )))
            }
        }
    }
}
