use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecError {
    // Request errors
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Rate limit exceeded, please try again later")]
    RateLimited,

    // Pipeline errors
    #[error("Image build failed: {0}")]
    Build(String),

    #[error("Code injection failed: {0}")]
    Injection(String),

    #[error("Execution exceeded timeout of {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("Runtime failure: {0}")]
    Infra(String),

    #[error("Failed to start container: {0}")]
    ContainerStart(String),

    // Service errors
    #[error("Docker connection failed: {0}")]
    DockerConnection(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error kinds visible to callers of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Validation,
    Build,
    Injection,
    Timeout,
    Infra,
}

impl ExecError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExecError::Validation(_) | ExecError::RateLimited => ErrorKind::Validation,
            ExecError::Build(_) => ErrorKind::Build,
            ExecError::Injection(_) => ErrorKind::Injection,
            ExecError::Timeout { .. } => ErrorKind::Timeout,
            ExecError::Infra(_)
            | ExecError::ContainerStart(_)
            | ExecError::DockerConnection(_)
            | ExecError::Configuration(_)
            | ExecError::Internal(_) => ErrorKind::Infra,
        }
    }
}

impl ResponseError for ExecError {
    fn status_code(&self) -> StatusCode {
        match self {
            ExecError::Validation(_) => StatusCode::BAD_REQUEST,
            ExecError::RateLimited => StatusCode::TOO_MANY_REQUESTS,

            ExecError::Build(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ExecError::Injection(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ExecError::Timeout { .. } => StatusCode::REQUEST_TIMEOUT,
            ExecError::Infra(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ExecError::ContainerStart(_) => StatusCode::INTERNAL_SERVER_ERROR,

            ExecError::DockerConnection(_) => StatusCode::SERVICE_UNAVAILABLE,
            ExecError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ExecError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorResponse {
            error: format!("{:?}", self.kind()).to_lowercase(),
            message: self.to_string(),
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl From<bollard::errors::Error> for ExecError {
    fn from(err: bollard::errors::Error) -> Self {
        ExecError::Infra(err.to_string())
    }
}

impl From<std::io::Error> for ExecError {
    fn from(err: std::io::Error) -> Self {
        ExecError::Internal(err.to_string())
    }
}

pub type ExecResult<T> = Result<T, ExecError>;
