//! Run execution: layer-parallel HTTP invocation with variable resolution,
//! artifact capture and status tagging. Individual endpoint failures land on
//! their execution rows; only planner or bookkeeping failures abort the run.

use crate::logic::planner::ExecutionPlanner;
use crate::model::{
    now_rfc3339, Api, ExecutionArtifact, ExecutionStatus, Id, RunStatus, TestExecution, TestRun,
    VarLocation,
};
use crate::store::traits::Store;
use anyhow::{Context, Result};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

/// What one endpoint publishes for its downstream consumers.
#[derive(Debug, Clone)]
pub struct ContextEntry {
    pub response: Value,
    pub http_status: u16,
}

/// Per-run shared context keyed by api id. One writer per key; layers are
/// separated by a barrier, so later layers always observe earlier entries.
type RunContext = Arc<RwLock<HashMap<Id, ContextEntry>>>;

pub struct RunExecutor<S> {
    store: Arc<S>,
    client: reqwest::Client,
}

impl<S: Store + 'static> RunExecutor<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            client: reqwest::Client::new(),
        }
    }

    /// Execute a project's dependency graph against an environment base URL.
    /// Returns the finished run row: `COMPLETED` unless planning or run
    /// bookkeeping failed.
    pub async fn execute_run(&self, project_id: &Id, environment: &str) -> Result<TestRun> {
        let mut run = self
            .store
            .create_run(TestRun::new(
                project_id.clone(),
                environment.to_string(),
                "system".to_string(),
            ))
            .await
            .context("Failed to create run")?;

        let apis = self.store.list_apis_for_project(project_id).await?;
        let dependencies = self.store.list_dependencies_for_project(project_id).await?;

        let plan = match ExecutionPlanner::plan(&apis, &dependencies) {
            Ok(plan) => plan,
            Err(err) => {
                log::error!("run {} aborted: {}", run.id, err);
                let completed_at = now_rfc3339();
                self.store
                    .finish_run(&run.id, RunStatus::Error, &completed_at)
                    .await?;
                run.status = RunStatus::Error;
                run.completed_at = Some(completed_at);
                return Ok(run);
            }
        };

        let api_index: HashMap<Id, Api> =
            apis.into_iter().map(|api| (api.id.clone(), api)).collect();
        let context: RunContext = Arc::new(RwLock::new(HashMap::new()));

        for layer in &plan.execution_levels {
            let mut handles = Vec::with_capacity(layer.len());
            for api_id in layer {
                let Some(api) = api_index.get(api_id).cloned() else {
                    continue;
                };
                let store = Arc::clone(&self.store);
                let client = self.client.clone();
                let run_id = run.id.clone();
                let environment = environment.to_string();
                let context = Arc::clone(&context);
                handles.push(tokio::spawn(async move {
                    if let Err(err) =
                        run_endpoint(store, client, run_id, environment, api, context).await
                    {
                        log::error!("endpoint execution errored: {:#}", err);
                    }
                }));
            }
            // Barrier: the next layer starts only when every sibling settled.
            for handle in handles {
                if let Err(err) = handle.await {
                    log::error!("execution task aborted: {}", err);
                }
            }
        }

        let completed_at = now_rfc3339();
        self.store
            .finish_run(&run.id, RunStatus::Completed, &completed_at)
            .await?;
        run.status = RunStatus::Completed;
        run.completed_at = Some(completed_at);
        Ok(run)
    }
}

async fn run_endpoint<S: Store>(
    store: Arc<S>,
    client: reqwest::Client,
    run_id: Id,
    environment: String,
    api: Api,
    context: RunContext,
) -> Result<()> {
    let execution = store
        .create_execution(TestExecution::new(run_id, api.id.clone()))
        .await
        .context("Failed to create execution row")?;

    // Resolve inputs from upstream context entries. A missing or failed
    // source fails this execution; anything further downstream fails the
    // same way once its own resolution misses.
    let dependencies = store.list_dependencies_for_target(&api.id).await?;
    let mut resolved: HashMap<String, Value> = HashMap::new();
    {
        let ctx = context.read().await;
        for dependency in &dependencies {
            let entry = ctx
                .get(&dependency.source_api_id)
                .filter(|e| e.http_status < 300);
            let Some(entry) = entry else {
                store
                    .update_execution_status(
                        &execution.id,
                        ExecutionStatus::Failed,
                        Some(format!(
                            "Dependency failed: Source {} not ready or failed.",
                            dependency.source_api_id
                        )),
                    )
                    .await?;
                return Ok(());
            };
            for (variable, selector) in &dependency.mapping {
                resolved.insert(variable.clone(), select_path(&entry.response, selector));
            }
        }
    }

    let variables = store.list_variables_for_api(&api.id).await?;

    // Hydrate the request from resolved values by variable location.
    let mut url = format!("{}{}", environment.trim_end_matches('/'), api.path);
    for (name, value) in &resolved {
        let placeholder = format!("{{{}}}", name);
        if url.contains(&placeholder) {
            url = url.replace(&placeholder, &value_to_string(value));
        }
    }

    let mut query: Vec<(String, String)> = Vec::new();
    let mut headers: Vec<(String, String)> = Vec::new();
    let mut body = Value::Null;
    for variable in &variables {
        let Some(value) = resolved.get(&variable.name) else {
            continue;
        };
        if value.is_null() {
            continue;
        }
        match variable.location {
            VarLocation::Query => query.push((variable.name.clone(), value_to_string(value))),
            VarLocation::Header => {
                let raw = value_to_string(value);
                let rendered = if variable.name == "Authorization" {
                    ensure_bearer(&raw)
                } else {
                    raw
                };
                headers.push((variable.name.clone(), rendered));
            }
            VarLocation::Body => insert_path(&mut body, &variable.name, value.clone()),
            VarLocation::Path => {}
        }
    }

    let Ok(method) = reqwest::Method::from_bytes(api.method.as_bytes()) else {
        store
            .update_execution_status(
                &execution.id,
                ExecutionStatus::Failed,
                Some(format!("unsupported HTTP method '{}'", api.method)),
            )
            .await?;
        return Ok(());
    };

    let mut request = client.request(method, &url);
    if !query.is_empty() {
        request = request.query(&query);
    }
    for (name, value) in &headers {
        request = request.header(name.as_str(), value.as_str());
    }
    if !body.is_null() {
        request = request.json(&body);
    }

    let request_data = json!({
        "method": api.method,
        "url": url,
        "query": Value::Object(query.iter().map(|(k, v)| (k.clone(), json!(v))).collect::<Map<_, _>>()),
        "headers": Value::Object(headers.iter().map(|(k, v)| (k.clone(), json!(v))).collect::<Map<_, _>>()),
        "body": body,
    });

    let started = Instant::now();
    match request.send().await {
        Ok(response) => {
            // 4xx/5xx are normal responses; classification happens here.
            let http_status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            let response_body: Value = serde_json::from_str(&text).unwrap_or_else(|_| {
                if text.is_empty() {
                    Value::Null
                } else {
                    Value::String(text)
                }
            });
            let elapsed_ms = started.elapsed().as_millis() as i64;

            store
                .create_artifact(ExecutionArtifact::new(
                    execution.id.clone(),
                    Some(request_data),
                    Some(response_body.clone()),
                    elapsed_ms,
                ))
                .await?;

            let passed = (200..400).contains(&http_status);
            store
                .update_execution_status(
                    &execution.id,
                    if passed {
                        ExecutionStatus::Passed
                    } else {
                        ExecutionStatus::Failed
                    },
                    (!passed).then(|| format!("HTTP status {}", http_status)),
                )
                .await?;

            context.write().await.insert(
                api.id.clone(),
                ContextEntry {
                    response: response_body,
                    http_status,
                },
            );
        }
        Err(err) => {
            let elapsed_ms = started.elapsed().as_millis() as i64;
            store
                .create_artifact(ExecutionArtifact::new(
                    execution.id.clone(),
                    Some(request_data),
                    None,
                    elapsed_ms,
                ))
                .await?;
            store
                .update_execution_status(
                    &execution.id,
                    ExecutionStatus::Failed,
                    Some(err.to_string()),
                )
                .await?;
            // No context entry: downstream resolutions miss and fail.
        }
    }

    Ok(())
}

/// Dot-path selector: split on `.`, step through object keys, null on any
/// missing step.
pub fn select_path(value: &Value, selector: &str) -> Value {
    let mut current = value;
    for step in selector.split('.') {
        match current.get(step) {
            Some(next) => current = next,
            None => return Value::Null,
        }
    }
    current.clone()
}

/// Template/header rendering of a resolved value.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Token values become bearer credentials unless they already carry a scheme.
pub fn ensure_bearer(value: &str) -> String {
    if value.contains(' ') {
        value.to_string()
    } else {
        format!("Bearer {}", value)
    }
}

/// Assemble a nested body object from a dot-joined variable name.
pub fn insert_path(root: &mut Value, path: &str, value: Value) {
    if !root.is_object() {
        *root = Value::Object(Map::new());
    }
    let mut current = root;
    let mut steps = path.split('.').peekable();
    while let Some(step) = steps.next() {
        let map = current.as_object_mut().expect("current is an object");
        if steps.peek().is_none() {
            map.insert(step.to_string(), value);
            return;
        }
        let next = map
            .entry(step.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !next.is_object() {
            *next = Value::Object(Map::new());
        }
        current = next;
    }
}
