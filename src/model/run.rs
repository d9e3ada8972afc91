use crate::model::{generate_id, now_rfc3339, Id};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Running,
    Completed,
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "RUNNING",
            RunStatus::Completed => "COMPLETED",
            RunStatus::Error => "ERROR",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "RUNNING" => Some(RunStatus::Running),
            "COMPLETED" => Some(RunStatus::Completed),
            "ERROR" => Some(RunStatus::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Running,
    Passed,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "RUNNING",
            ExecutionStatus::Passed => "PASSED",
            ExecutionStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "RUNNING" => Some(ExecutionStatus::Running),
            "PASSED" => Some(ExecutionStatus::Passed),
            "FAILED" => Some(ExecutionStatus::Failed),
            _ => None,
        }
    }
}

/// One orchestrated run of a project's dependency graph. `project_id` is
/// nullable so run history survives project deletion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRun {
    pub id: Id,
    pub project_id: Option<Id>,
    pub environment: String,
    pub trigger_source: String,
    pub status: RunStatus,
    pub started_at: String, // ISO 8601 timestamp
    pub completed_at: Option<String>,
}

impl TestRun {
    pub fn new(project_id: Id, environment: String, trigger_source: String) -> Self {
        Self {
            id: generate_id(),
            project_id: Some(project_id),
            environment,
            trigger_source,
            status: RunStatus::Running,
            started_at: now_rfc3339(),
            completed_at: None,
        }
    }
}

/// One endpoint's execution within a run. `(run_id, api_id)` is unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestExecution {
    pub id: Id,
    pub run_id: Id,
    pub api_id: Option<Id>,
    pub status: ExecutionStatus,
    pub retry_count: u32,
    pub error_message: Option<String>,
}

impl TestExecution {
    pub fn new(run_id: Id, api_id: Id) -> Self {
        Self {
            id: generate_id(),
            run_id,
            api_id: Some(api_id),
            status: ExecutionStatus::Running,
            retry_count: 0,
            error_message: None,
        }
    }
}

/// Captured request/response material for one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionArtifact {
    pub id: Id,
    pub execution_id: Id,
    pub request_data: Option<Value>,
    pub response_data: Option<Value>,
    pub response_time_ms: i64,
    pub created_at: String, // ISO 8601 timestamp
}

impl ExecutionArtifact {
    pub fn new(
        execution_id: Id,
        request_data: Option<Value>,
        response_data: Option<Value>,
        response_time_ms: i64,
    ) -> Self {
        Self {
            id: generate_id(),
            execution_id,
            request_data,
            response_data,
            response_time_ms,
            created_at: now_rfc3339(),
        }
    }
}
