//! Remote execution service client.
//!
//! The service is an external collaborator: it takes program source text,
//! compiles it, runs it, and returns a statistics payload whose key names and
//! nesting are not stable across versions. The `ExecutionService` trait is
//! the seam: the runner drives the trait, the HTTP implementation talks to
//! the real service, and tests substitute doubles.
//!
//! Statistics come back as raw `serde_json::Value`; only the parser module
//! interprets them.

use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Remote-assigned project identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectId(pub String);

/// Remote-assigned compile identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileId(pub String);

/// Remote-assigned backtest identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BacktestId(pub String);

/// Errors from the service boundary, classified for the retry policy.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("network error: {0}")]
    Network(String),

    #[error("service rate limit rejected the request")]
    RateLimited,

    #[error("service error {status}")]
    Server { status: u16 },

    #[error("request rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("program failed remote compilation: {message}")]
    CompileRejected { message: String },

    #[error("service response is not in a recognizable shape: {0}")]
    MalformedResponse(String),
}

impl ServiceError {
    /// Transient errors are retried; the rest indicate a defect in the
    /// request or the generated program and must surface immediately.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ServiceError::Network(_) | ServiceError::RateLimited | ServiceError::Server { .. }
        )
    }
}

/// Progress of a remote compile.
#[derive(Debug, Clone, PartialEq)]
pub enum CompileState {
    InProgress,
    Success,
    Error { message: String },
}

/// Progress of a remote backtest.
#[derive(Debug, Clone, PartialEq)]
pub enum BacktestState {
    InProgress { progress: f64 },
    Completed { statistics: Value },
    Error { message: String },
}

/// The remote execution service seam. One method per remote call; every call
/// costs one rate-limiter permit at the call site in the runner.
pub trait ExecutionService {
    fn create_project(&self, name: &str) -> Result<ProjectId, ServiceError>;
    fn upload_program(
        &self,
        project: &ProjectId,
        filename: &str,
        source: &str,
    ) -> Result<(), ServiceError>;
    fn start_compile(&self, project: &ProjectId) -> Result<CompileId, ServiceError>;
    fn read_compile(
        &self,
        project: &ProjectId,
        compile: &CompileId,
    ) -> Result<CompileState, ServiceError>;
    fn start_backtest(
        &self,
        project: &ProjectId,
        compile: &CompileId,
        name: &str,
    ) -> Result<BacktestId, ServiceError>;
    fn read_backtest(
        &self,
        project: &ProjectId,
        backtest: &BacktestId,
    ) -> Result<BacktestState, ServiceError>;
}

// ─── HTTP implementation ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    success: bool,
    #[serde(default)]
    errors: Vec<String>,
    #[serde(flatten)]
    body: Value,
}

/// Blocking HTTP client for the real service.
pub struct HttpExecutionService {
    client: reqwest::blocking::Client,
    base_url: String,
    token: String,
}

impl HttpExecutionService {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client");
        Self {
            client,
            base_url: base_url.into(),
            token: token.into(),
        }
    }

    fn post(&self, path: &str, body: Value) -> Result<ApiEnvelope, ServiceError> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), path);
        tracing::debug!(%url, "service call");
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .map_err(|e| ServiceError::Network(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ServiceError::RateLimited);
        }
        if status.is_server_error() {
            return Err(ServiceError::Server { status: status.as_u16() });
        }
        if !status.is_success() {
            let message = response.text().unwrap_or_default();
            return Err(ServiceError::Rejected { status: status.as_u16(), message });
        }

        let envelope: ApiEnvelope = response
            .json()
            .map_err(|e| ServiceError::MalformedResponse(e.to_string()))?;
        if !envelope.success {
            return Err(ServiceError::Rejected {
                status: status.as_u16(),
                message: envelope.errors.join("; "),
            });
        }
        Ok(envelope)
    }

    fn str_field(body: &Value, path: &[&str]) -> Result<String, ServiceError> {
        let mut node = body;
        for key in path {
            node = node
                .get(key)
                .ok_or_else(|| ServiceError::MalformedResponse(format!("missing '{key}'")))?;
        }
        match node {
            Value::String(s) => Ok(s.clone()),
            Value::Number(n) => Ok(n.to_string()),
            other => Err(ServiceError::MalformedResponse(format!(
                "expected scalar at {:?}, got {other}",
                path
            ))),
        }
    }
}

impl ExecutionService for HttpExecutionService {
    fn create_project(&self, name: &str) -> Result<ProjectId, ServiceError> {
        let envelope = self.post(
            "projects/create",
            serde_json::json!({ "name": name, "language": "Py" }),
        )?;
        // Older versions return { projects: [{ projectId }] }, newer ones a
        // flat { projectId }.
        let nested = envelope
            .body
            .get("projects")
            .and_then(Value::as_array)
            .and_then(|projects| projects.first())
            .cloned();
        match nested {
            Some(project) => Self::str_field(&project, &["projectId"]).map(ProjectId),
            None => Self::str_field(&envelope.body, &["projectId"]).map(ProjectId),
        }
    }

    fn upload_program(
        &self,
        project: &ProjectId,
        filename: &str,
        source: &str,
    ) -> Result<(), ServiceError> {
        self.post(
            "files/update",
            serde_json::json!({
                "projectId": project.0,
                "name": filename,
                "content": source,
            }),
        )?;
        Ok(())
    }

    fn start_compile(&self, project: &ProjectId) -> Result<CompileId, ServiceError> {
        let envelope = self.post(
            "compile/create",
            serde_json::json!({ "projectId": project.0 }),
        )?;
        Self::str_field(&envelope.body, &["compileId"]).map(CompileId)
    }

    fn read_compile(
        &self,
        project: &ProjectId,
        compile: &CompileId,
    ) -> Result<CompileState, ServiceError> {
        let envelope = self.post(
            "compile/read",
            serde_json::json!({ "projectId": project.0, "compileId": compile.0 }),
        )?;
        match Self::str_field(&envelope.body, &["state"])?.as_str() {
            "InQueue" | "BuildQueued" => Ok(CompileState::InProgress),
            "BuildSuccess" => Ok(CompileState::Success),
            "BuildError" => Ok(CompileState::Error {
                message: envelope.errors.join("; "),
            }),
            other => Err(ServiceError::MalformedResponse(format!(
                "unknown compile state '{other}'"
            ))),
        }
    }

    fn start_backtest(
        &self,
        project: &ProjectId,
        compile: &CompileId,
        name: &str,
    ) -> Result<BacktestId, ServiceError> {
        let envelope = self.post(
            "backtests/create",
            serde_json::json!({
                "projectId": project.0,
                "compileId": compile.0,
                "backtestName": name,
            }),
        )?;
        Self::str_field(&envelope.body, &["backtest", "backtestId"])
            .or_else(|_| Self::str_field(&envelope.body, &["backtestId"]))
            .map(BacktestId)
    }

    fn read_backtest(
        &self,
        project: &ProjectId,
        backtest: &BacktestId,
    ) -> Result<BacktestState, ServiceError> {
        let envelope = self.post(
            "backtests/read",
            serde_json::json!({ "projectId": project.0, "backtestId": backtest.0 }),
        )?;
        let body = envelope
            .body
            .get("backtest")
            .unwrap_or(&envelope.body)
            .clone();

        if let Some(error) = body.get("error").and_then(Value::as_str) {
            if !error.is_empty() {
                return Ok(BacktestState::Error { message: error.to_string() });
            }
        }

        let completed = body
            .get("completed")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if completed {
            let statistics = body
                .get("statistics")
                .cloned()
                .ok_or_else(|| ServiceError::MalformedResponse("no statistics".into()))?;
            return Ok(BacktestState::Completed { statistics });
        }

        let progress = body
            .get("progress")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        Ok(BacktestState::InProgress { progress })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(ServiceError::Network("reset".into()).is_transient());
        assert!(ServiceError::RateLimited.is_transient());
        assert!(ServiceError::Server { status: 503 }.is_transient());
        assert!(!ServiceError::Rejected { status: 400, message: String::new() }.is_transient());
        assert!(!ServiceError::CompileRejected { message: String::new() }.is_transient());
        assert!(!ServiceError::MalformedResponse(String::new()).is_transient());
    }
}
