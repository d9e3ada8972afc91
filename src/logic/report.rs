//! Read-side projection of a run: executions joined with endpoint summaries
//! and their captured artifacts.

use crate::model::{ExecutionArtifact, ExecutionStatus, Id, TestExecution, TestRun};
use crate::store::traits::Store;
use anyhow::Result;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct EndpointSummary {
    pub id: Id,
    pub method: String,
    pub path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub execution: TestExecution,
    pub api: Option<EndpointSummary>,
    pub artifacts: Vec<ExecutionArtifact>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub running: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run: TestRun,
    pub summary: RunSummary,
    pub executions: Vec<ExecutionReport>,
}

pub struct RunReporter;

impl RunReporter {
    pub async fn project_run<S: Store>(store: &S, run_id: &Id) -> Result<Option<RunReport>> {
        let Some(run) = store.get_run(run_id).await? else {
            return Ok(None);
        };

        let executions = store.list_executions_for_run(run_id).await?;
        let mut reports = Vec::with_capacity(executions.len());
        let mut summary = RunSummary {
            total: executions.len(),
            passed: 0,
            failed: 0,
            running: 0,
        };

        for execution in executions {
            match execution.status {
                ExecutionStatus::Passed => summary.passed += 1,
                ExecutionStatus::Failed => summary.failed += 1,
                ExecutionStatus::Running => summary.running += 1,
            }

            let api = match &execution.api_id {
                Some(api_id) => store.get_api(api_id).await?.map(|api| EndpointSummary {
                    id: api.id,
                    method: api.method,
                    path: api.path,
                }),
                None => None,
            };
            let artifacts = store.list_artifacts_for_execution(&execution.id).await?;
            reports.push(ExecutionReport {
                execution,
                api,
                artifacts,
            });
        }

        // Stable presentation order: rows without an endpoint first, then by
        // endpoint path and method.
        reports.sort_by(|a, b| {
            let key = |r: &ExecutionReport| r.api.as_ref().map(|a| (a.path.clone(), a.method.clone()));
            key(a).cmp(&key(b))
        });

        Ok(Some(RunReport {
            run,
            summary,
            executions: reports,
        }))
    }
}
