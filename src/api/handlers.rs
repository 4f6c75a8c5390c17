use actix_web::{web, HttpResponse, ResponseError, Result};
use tracing::{error, info, warn};
use validator::Validate;

use crate::error::{ErrorKind, ExecError};
use crate::models::{ExecuteRequest, HealthResponse};
use crate::state::AppState;

pub async fn health_check(state: web::Data<AppState>) -> Result<HttpResponse> {
    let stats = state.get_stats().await;

    let docker_status = match state.health_runtime.health_check().await {
        Ok(version) => version,
        Err(e) => format!("Error: {}", e),
    };

    let response = HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime_seconds(),
        active_executions: stats.active_executions,
        total_executions: stats.total_executions,
        docker_status,
    };

    Ok(HttpResponse::Ok().json(response))
}

pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse> {
    let mut backends = vec!["standard"];
    if state.config.enable_sandboxed_backend {
        backends.push("sandboxed");
    }

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "supported_languages": ["python", "javascript"],
        "backends": backends,
        "default_timeout_seconds": state.config.default_timeout_seconds,
        "max_timeout_seconds": state.config.max_timeout_seconds,
        "max_code_bytes": state.config.max_code_bytes,
        "pool_enabled": state.config.pool_enabled,
        "rate_limit_per_minute": state.config.rate_limit_per_minute,
    })))
}

pub async fn execute_code(
    state: web::Data<AppState>,
    request: web::Json<ExecuteRequest>,
) -> Result<HttpResponse> {
    if let Err(e) = request.validate() {
        error!("Invalid request: {}", e);
        return Ok(ExecError::Validation(format!("Invalid request: {}", e)).error_response());
    }

    if state.rate_limiter.check().is_err() {
        warn!("Rate limit exceeded for function {}", request.function_id);
        return Ok(ExecError::RateLimited.error_response());
    }

    if !state.try_begin_execution().await {
        return Ok(HttpResponse::TooManyRequests().json(serde_json::json!({
            "error": "TooManyRequests",
            "message": format!(
                "Maximum concurrent executions ({}) reached",
                state.config.max_concurrent_executions
            ),
        })));
    }

    info!(
        "Received execution request for function {} ({})",
        request.function_id, request.language
    );

    // The execution owns a pool checkout, so it runs to completion on its own
    // task even if the client goes away.
    let task_state = state.clone();
    let request = request.into_inner();
    let task = tokio::spawn(async move {
        let result = task_state.service.execute_request(request).await;
        task_state.finish_execution(&result).await;
        result
    });

    match task.await {
        Ok(result) => {
            let report = result.to_report();
            if result.error_kind() == Some(ErrorKind::Validation) {
                Ok(HttpResponse::BadRequest().json(report))
            } else {
                Ok(HttpResponse::Ok().json(report))
            }
        }
        Err(e) => {
            error!("Execution task failed: {}", e);
            Ok(ExecError::Internal(e.to_string()).error_response())
        }
    }
}

pub async fn get_stats(state: web::Data<AppState>) -> Result<HttpResponse> {
    let stats = state.get_stats().await;
    let pool = state.service.pool().stats().await;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "total_executions": stats.total_executions,
        "active_executions": stats.active_executions,
        "successful_executions": stats.successful_executions,
        "failed_executions": stats.failed_executions,
        "timeout_executions": stats.timeout_executions,
        "uptime_seconds": state.uptime_seconds(),
        "success_rate": if stats.total_executions > 0 {
            (stats.successful_executions as f64 / stats.total_executions as f64) * 100.0
        } else {
            0.0
        },
        "pool": pool,
    })))
}
