use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use uuid::Uuid;
use validator::Validate;

use crate::error::{ErrorKind, ExecError};

/// Directory inside every function image where the source lives.
pub const WORKDIR: &str = "/app";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Javascript,
}

impl Language {
    pub fn parse(s: &str) -> Result<Self, ExecError> {
        match s.trim().to_lowercase().as_str() {
            "python" | "py" => Ok(Language::Python),
            "javascript" | "js" | "node" => Ok(Language::Javascript),
            _ => Err(ExecError::Validation(format!(
                "Unsupported language '{}'. Only 'python' and 'javascript' are supported.",
                s
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Javascript => "javascript",
        }
    }

    pub fn source_file(&self) -> &'static str {
        match self {
            Language::Python => "function.py",
            Language::Javascript => "function.js",
        }
    }

    pub fn interpreter(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Javascript => "node",
        }
    }

    /// Command run inside the container for every execution.
    pub fn entry_command(&self) -> Vec<String> {
        vec![
            self.interpreter().to_string(),
            self.source_file().to_string(),
        ]
    }

    /// Absolute path of the source file the entry command expects.
    pub fn source_path(&self) -> String {
        format!("{}/{}", WORKDIR, self.source_file())
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Isolation runtime a container runs under. Each backend has its own pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Standard,
    Sandboxed,
}

impl Backend {
    pub fn parse(s: &str) -> Result<Self, ExecError> {
        match s.trim().to_lowercase().as_str() {
            "standard" | "docker" => Ok(Backend::Standard),
            "sandboxed" | "gvisor" => Ok(Backend::Sandboxed),
            _ => Err(ExecError::Validation(format!("Unknown backend '{}'", s))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Standard => "standard",
            Backend::Sandboxed => "sandboxed",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One function as supplied for a single execution.
#[derive(Debug, Clone)]
pub struct FunctionSpec {
    pub id: String,
    pub language: Language,
    pub code: String,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    #[serde(deserialize_with = "string_or_number")]
    #[validate(length(min = 1, max = 64))]
    pub function_id: String,

    pub language: String,

    #[validate(length(min = 1))]
    pub code: String,

    #[validate(range(min = 1))]
    pub timeout_seconds: Option<u64>,

    pub backend: Option<String>,
}

// Function ids were integers in the metadata store; accept both forms.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(u64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Number(n) => n.to_string(),
    })
}

/// Output of a command that ran to completion, whatever its exit code.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedRun {
    pub logs: String,
    pub duration_ms: u64,
    pub exit_code: i64,
    pub cpu_usage: Option<u64>,
    pub mem_usage: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Completed(CompletedRun),
    Failed { kind: ErrorKind, message: String },
}

impl From<ExecError> for ExecutionOutcome {
    fn from(err: ExecError) -> Self {
        ExecutionOutcome::Failed {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub execution_id: Uuid,
    pub function_id: String,
    pub backend: Backend,
    /// Pool handle the code ran on, when one was checked out.
    pub handle_id: Option<Uuid>,
    pub outcome: ExecutionOutcome,
    pub created_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ExecutionOutcome::Completed(_))
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match &self.outcome {
            ExecutionOutcome::Completed(_) => None,
            ExecutionOutcome::Failed { kind, .. } => Some(*kind),
        }
    }

    /// Flattened form handed back to the API layer.
    pub fn to_report(&self) -> ExecutionReport {
        let mut report = ExecutionReport {
            execution_id: self.execution_id.to_string(),
            function_id: self.function_id.clone(),
            backend: self.backend,
            logs: None,
            duration_ms: None,
            exit_code: None,
            cpu_usage: None,
            mem_usage: None,
            error: None,
            error_kind: None,
            created_at: self.created_at,
            completed_at: self.completed_at,
        };

        match &self.outcome {
            ExecutionOutcome::Completed(run) => {
                report.logs = Some(run.logs.clone());
                report.duration_ms = Some(run.duration_ms);
                report.exit_code = Some(run.exit_code);
                report.cpu_usage = run.cpu_usage;
                report.mem_usage = run.mem_usage;
            }
            ExecutionOutcome::Failed { kind, message } => {
                report.error = Some(message.clone());
                report.error_kind = Some(*kind);
            }
        }

        report
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    pub execution_id: String,
    pub function_id: String,
    pub backend: Backend,
    pub logs: Option<String>,
    pub duration_ms: Option<u64>,
    pub exit_code: Option<i64>,
    pub cpu_usage: Option<u64>,
    pub mem_usage: Option<u64>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub created_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub active_executions: usize,
    pub total_executions: u64,
    pub docker_status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_language() {
        assert_eq!(Language::parse("Python").unwrap(), Language::Python);
        assert_eq!(Language::parse("node").unwrap(), Language::Javascript);
        assert!(matches!(
            Language::parse("ruby"),
            Err(ExecError::Validation(_))
        ));
    }

    #[test]
    fn test_entry_command() {
        assert_eq!(Language::Python.entry_command(), vec!["python", "function.py"]);
        assert_eq!(Language::Javascript.source_path(), "/app/function.js");
    }

    #[test]
    fn test_request_accepts_numeric_function_id() {
        let req: ExecuteRequest = serde_json::from_str(
            r#"{"functionId": 1, "language": "python", "code": "print('hi')", "timeoutSeconds": 5}"#,
        )
        .unwrap();
        assert_eq!(req.function_id, "1");
        assert_eq!(req.timeout_seconds, Some(5));
        assert!(req.backend.is_none());
    }

    #[test]
    fn test_report_never_mixes_result_and_error() {
        let now = Utc::now();
        let failed = ExecutionResult {
            execution_id: Uuid::new_v4(),
            function_id: "7".to_string(),
            backend: Backend::Standard,
            handle_id: None,
            outcome: ExecError::Timeout { seconds: 1 }.into(),
            created_at: now,
            completed_at: now,
        };
        let report = failed.to_report();
        assert_eq!(report.error_kind, Some(ErrorKind::Timeout));
        assert!(report.exit_code.is_none());
        assert!(report.logs.is_none());

        let completed = ExecutionResult {
            outcome: ExecutionOutcome::Completed(CompletedRun {
                logs: "hi\n".to_string(),
                duration_ms: 12,
                exit_code: 1,
                cpu_usage: Some(10),
                mem_usage: None,
            }),
            ..failed
        };
        let report = completed.to_report();
        assert_eq!(report.exit_code, Some(1));
        assert!(report.error.is_none());
    }
}
