use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tokio::sync::Mutex;
use tracing::error;

use crate::error::ErrorKind;
use crate::models::{Backend, ExecutionOutcome, ExecutionResult, FunctionSpec};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub timestamp: String,
    pub execution_id: String,
    pub event_type: AuditEventType,
    pub function_id: String,
    pub backend: Backend,
    pub language: String,
    pub code_length: usize,
    pub duration_ms: Option<u64>,
    pub exit_code: Option<i64>,
    pub error_kind: Option<ErrorKind>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    ExecutionStart,
    ExecutionComplete,
    ExecutionError,
    ExecutionTimeout,
}

/// Append-only JSON-lines record of executions.
pub struct AuditLogger {
    log_file: Mutex<std::fs::File>,
}

impl AuditLogger {
    pub fn new(log_path: &str) -> Result<Self, std::io::Error> {
        if let Some(parent) = Path::new(log_path).parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;

        Ok(Self {
            log_file: Mutex::new(file),
        })
    }

    pub async fn log_execution_start(
        &self,
        execution_id: &str,
        spec: &FunctionSpec,
        backend: Backend,
    ) {
        let entry = AuditLogEntry {
            timestamp: Utc::now().to_rfc3339(),
            execution_id: execution_id.to_string(),
            event_type: AuditEventType::ExecutionStart,
            function_id: spec.id.clone(),
            backend,
            language: spec.language.to_string(),
            code_length: spec.code.len(),
            duration_ms: None,
            exit_code: None,
            error_kind: None,
            error: None,
        };

        self.write_log_entry(entry).await;
    }

    pub async fn log_execution_finished(&self, spec: &FunctionSpec, result: &ExecutionResult) {
        let mut entry = AuditLogEntry {
            timestamp: Utc::now().to_rfc3339(),
            execution_id: result.execution_id.to_string(),
            event_type: AuditEventType::ExecutionComplete,
            function_id: spec.id.clone(),
            backend: result.backend,
            language: spec.language.to_string(),
            code_length: spec.code.len(),
            duration_ms: None,
            exit_code: None,
            error_kind: None,
            error: None,
        };

        match &result.outcome {
            ExecutionOutcome::Completed(run) => {
                entry.duration_ms = Some(run.duration_ms);
                entry.exit_code = Some(run.exit_code);
            }
            ExecutionOutcome::Failed { kind, message } => {
                entry.event_type = if *kind == ErrorKind::Timeout {
                    AuditEventType::ExecutionTimeout
                } else {
                    AuditEventType::ExecutionError
                };
                entry.error_kind = Some(*kind);
                entry.error = Some(message.clone());
            }
        }

        self.write_log_entry(entry).await;
    }

    async fn write_log_entry(&self, entry: AuditLogEntry) {
        if let Ok(json) = serde_json::to_string(&entry) {
            let mut file = self.log_file.lock().await;
            if let Err(e) = writeln!(file, "{}", json) {
                error!("Failed to write audit log: {}", e);
            }
            let _ = file.flush();
        }
    }
}
