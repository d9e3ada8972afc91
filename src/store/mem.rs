use crate::model::{
    generate_id, Api, ApiDependency, ApiRequest, ApiResponse, ApiSpec, CatalogImport,
    DependencyCandidate, ExecutionArtifact, ExecutionStatus, Id, Project, RunStatus, TestExecution,
    TestRun, VarType, Variable,
};
use crate::store::traits::{CatalogStore, DependencyStore, ProjectStore, RunStore, Store};
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// All tables behind one lock so multi-table operations (catalog import,
/// cascade delete, candidate replacement) are atomic.
#[derive(Debug, Default)]
struct Tables {
    projects: HashMap<Id, Project>,
    specs: HashMap<Id, ApiSpec>,
    apis: HashMap<Id, Api>,
    requests: HashMap<Id, ApiRequest>,
    responses: HashMap<Id, Vec<ApiResponse>>,
    variables: HashMap<Id, Vec<Variable>>,
    candidates: Vec<DependencyCandidate>,
    dependencies: HashMap<Id, ApiDependency>,
    runs: HashMap<Id, TestRun>,
    executions: Vec<TestExecution>,
    artifacts: Vec<ExecutionArtifact>,
}

impl Tables {
    fn project_of_api(&self, api_id: &Id) -> Option<&Id> {
        self.apis.get(api_id).map(|api| &api.project_id)
    }
}

/// In-memory backend used by tests and local single-process runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ProjectStore for MemoryStore {
    async fn create_project(&self, project: Project) -> Result<Project> {
        let mut tables = self.tables.write().await;
        if tables.projects.values().any(|p| p.name == project.name) {
            return Err(anyhow!("project name '{}' already exists", project.name));
        }
        tables.projects.insert(project.id.clone(), project.clone());
        Ok(project)
    }

    async fn get_project(&self, id: &Id) -> Result<Option<Project>> {
        let tables = self.tables.read().await;
        Ok(tables.projects.get(id).cloned())
    }

    async fn list_projects(&self) -> Result<Vec<Project>> {
        let tables = self.tables.read().await;
        let mut projects: Vec<Project> = tables.projects.values().cloned().collect();
        projects.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(projects)
    }

    async fn delete_project(&self, id: &Id) -> Result<bool> {
        let mut tables = self.tables.write().await;
        if tables.projects.remove(id).is_none() {
            return Ok(false);
        }

        tables.specs.retain(|_, spec| spec.project_id != *id);

        let api_ids: Vec<Id> = tables
            .apis
            .values()
            .filter(|api| api.project_id == *id)
            .map(|api| api.id.clone())
            .collect();
        for api_id in &api_ids {
            tables.apis.remove(api_id);
            tables.requests.remove(api_id);
            tables.responses.remove(api_id);
            tables.variables.remove(api_id);
        }
        tables.candidates.retain(|c| {
            !api_ids.contains(&c.source_api_id) && !api_ids.contains(&c.target_api_id)
        });
        tables.dependencies.retain(|_, d| {
            !api_ids.contains(&d.source_api_id) && !api_ids.contains(&d.target_api_id)
        });

        // Run history is detached, not deleted.
        for run in tables.runs.values_mut() {
            if run.project_id.as_deref() == Some(id.as_str()) {
                run.project_id = None;
            }
        }

        Ok(true)
    }
}

#[async_trait::async_trait]
impl CatalogStore for MemoryStore {
    async fn find_spec_by_hash(
        &self,
        project_id: &Id,
        spec_hash: &str,
    ) -> Result<Option<ApiSpec>> {
        let tables = self.tables.read().await;
        Ok(tables
            .specs
            .values()
            .find(|spec| spec.project_id == *project_id && spec.spec_hash == spec_hash)
            .cloned())
    }

    async fn import_catalog(&self, import: CatalogImport) -> Result<Vec<(String, String)>> {
        let mut tables = self.tables.write().await;

        if tables.projects.get(&import.project_id).is_none() {
            return Err(anyhow!("project '{}' not found", import.project_id));
        }

        if !import.reuse_existing_spec {
            let duplicate = tables.specs.values().any(|spec| {
                spec.project_id == import.project_id && spec.spec_hash == import.spec.spec_hash
            });
            if duplicate {
                return Err(anyhow!(
                    "spec with hash '{}' already exists for project",
                    import.spec.spec_hash
                ));
            }
            tables.specs.insert(import.spec.id.clone(), import.spec);
        }

        let mut written = Vec::with_capacity(import.apis.len());
        for api_import in import.apis {
            let existing_id = tables
                .apis
                .values()
                .find(|api| {
                    api.project_id == import.project_id
                        && api.method == api_import.method
                        && api.path == api_import.path
                })
                .map(|api| api.id.clone());

            let api_id = match existing_id {
                Some(api_id) => {
                    if let Some(api) = tables.apis.get_mut(&api_id) {
                        api.operation_id = api_import.operation_id;
                        api.summary = api_import.summary;
                        api.auth_scheme = api_import.auth_scheme;
                    }
                    api_id
                }
                None => {
                    let api = Api {
                        id: generate_id(),
                        project_id: import.project_id.clone(),
                        method: api_import.method.clone(),
                        path: api_import.path.clone(),
                        operation_id: api_import.operation_id,
                        summary: api_import.summary,
                        auth_scheme: api_import.auth_scheme,
                    };
                    let api_id = api.id.clone();
                    tables.apis.insert(api_id.clone(), api);
                    api_id
                }
            };

            // Erase children before rewriting so a re-ingest never leaves
            // stale rows behind.
            tables.requests.remove(&api_id);
            tables.responses.remove(&api_id);
            tables.variables.remove(&api_id);

            let to_map = |map: &std::collections::BTreeMap<String, serde_json::Value>| {
                if map.is_empty() {
                    None
                } else {
                    Some(serde_json::Value::Object(
                        map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                    ))
                }
            };
            tables.requests.insert(
                api_id.clone(),
                ApiRequest {
                    api_id: api_id.clone(),
                    body_schema: api_import.body_schema,
                    query_params: to_map(&api_import.query_params),
                    path_params: to_map(&api_import.path_params),
                    headers: to_map(&api_import.headers),
                },
            );

            let mut responses: Vec<ApiResponse> = api_import
                .responses
                .into_iter()
                .map(|(status_code, schema)| ApiResponse {
                    api_id: api_id.clone(),
                    status_code,
                    schema,
                })
                .collect();
            responses.sort_by_key(|r| r.status_code);
            responses.dedup_by_key(|r| r.status_code);
            tables.responses.insert(api_id.clone(), responses);

            // Upsert semantics within the import: last seed for a
            // (name, location) pair wins.
            let mut variables: Vec<Variable> = Vec::new();
            for seed in api_import.variables {
                let variable = seed.into_variable(api_id.clone());
                if let Some(existing) = variables
                    .iter_mut()
                    .find(|v| v.name == variable.name && v.location == variable.location)
                {
                    existing.var_type = variable.var_type;
                    existing.data_type = variable.data_type;
                    existing.required = variable.required;
                } else {
                    variables.push(variable);
                }
            }
            tables.variables.insert(api_id.clone(), variables);

            written.push((api_import.method, api_import.path));
        }

        Ok(written)
    }

    async fn get_api(&self, id: &Id) -> Result<Option<Api>> {
        let tables = self.tables.read().await;
        Ok(tables.apis.get(id).cloned())
    }

    async fn list_apis_for_project(&self, project_id: &Id) -> Result<Vec<Api>> {
        let tables = self.tables.read().await;
        let mut apis: Vec<Api> = tables
            .apis
            .values()
            .filter(|api| api.project_id == *project_id)
            .cloned()
            .collect();
        apis.sort_by(|a, b| a.path.cmp(&b.path).then(a.method.cmp(&b.method)));
        Ok(apis)
    }

    async fn get_request_for_api(&self, api_id: &Id) -> Result<Option<ApiRequest>> {
        let tables = self.tables.read().await;
        Ok(tables.requests.get(api_id).cloned())
    }

    async fn list_responses_for_api(&self, api_id: &Id) -> Result<Vec<ApiResponse>> {
        let tables = self.tables.read().await;
        Ok(tables.responses.get(api_id).cloned().unwrap_or_default())
    }

    async fn list_variables_for_api(&self, api_id: &Id) -> Result<Vec<Variable>> {
        let tables = self.tables.read().await;
        Ok(tables.variables.get(api_id).cloned().unwrap_or_default())
    }

    async fn set_variable_type(
        &self,
        api_id: &Id,
        name: &str,
        var_type: VarType,
        ai_confidence: Option<f64>,
    ) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let Some(variables) = tables.variables.get_mut(api_id) else {
            return Ok(false);
        };
        let mut matched = false;
        for variable in variables.iter_mut().filter(|v| v.name == name) {
            variable.var_type = var_type;
            if ai_confidence.is_some() {
                variable.ai_confidence = ai_confidence;
            }
            matched = true;
        }
        Ok(matched)
    }
}

#[async_trait::async_trait]
impl DependencyStore for MemoryStore {
    async fn replace_candidates_for_project(
        &self,
        project_id: &Id,
        candidates: Vec<DependencyCandidate>,
    ) -> Result<()> {
        let mut tables = self.tables.write().await;
        let project_api_ids: Vec<Id> = tables
            .apis
            .values()
            .filter(|api| api.project_id == *project_id)
            .map(|api| api.id.clone())
            .collect();
        tables
            .candidates
            .retain(|c| !project_api_ids.contains(&c.target_api_id));
        tables.candidates.extend(candidates);
        Ok(())
    }

    async fn list_candidates_for_project(
        &self,
        project_id: &Id,
    ) -> Result<Vec<DependencyCandidate>> {
        let tables = self.tables.read().await;
        let mut candidates: Vec<DependencyCandidate> = tables
            .candidates
            .iter()
            .filter(|c| tables.project_of_api(&c.target_api_id) == Some(project_id))
            .cloned()
            .collect();
        candidates.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(candidates)
    }

    async fn list_candidates_for_target(&self, api_id: &Id) -> Result<Vec<DependencyCandidate>> {
        let tables = self.tables.read().await;
        Ok(tables
            .candidates
            .iter()
            .filter(|c| c.target_api_id == *api_id)
            .cloned()
            .collect())
    }

    async fn upsert_dependency(&self, dependency: ApiDependency) -> Result<ApiDependency> {
        let mut tables = self.tables.write().await;
        let existing = tables.dependencies.values_mut().find(|d| {
            d.source_api_id == dependency.source_api_id
                && d.target_api_id == dependency.target_api_id
        });
        match existing {
            Some(row) => {
                row.mapping = dependency.mapping;
                row.is_required = dependency.is_required;
                Ok(row.clone())
            }
            None => {
                tables
                    .dependencies
                    .insert(dependency.id.clone(), dependency.clone());
                Ok(dependency)
            }
        }
    }

    async fn get_dependency(&self, id: &Id) -> Result<Option<ApiDependency>> {
        let tables = self.tables.read().await;
        Ok(tables.dependencies.get(id).cloned())
    }

    async fn list_dependencies_for_project(&self, project_id: &Id) -> Result<Vec<ApiDependency>> {
        let tables = self.tables.read().await;
        let mut dependencies: Vec<ApiDependency> = tables
            .dependencies
            .values()
            .filter(|d| tables.project_of_api(&d.target_api_id) == Some(project_id))
            .cloned()
            .collect();
        dependencies.sort_by(|a, b| {
            a.source_api_id
                .cmp(&b.source_api_id)
                .then(a.target_api_id.cmp(&b.target_api_id))
        });
        Ok(dependencies)
    }

    async fn list_dependencies_for_target(&self, api_id: &Id) -> Result<Vec<ApiDependency>> {
        let tables = self.tables.read().await;
        let mut dependencies: Vec<ApiDependency> = tables
            .dependencies
            .values()
            .filter(|d| d.target_api_id == *api_id)
            .cloned()
            .collect();
        dependencies.sort_by(|a, b| a.source_api_id.cmp(&b.source_api_id));
        Ok(dependencies)
    }

    async fn delete_dependency(&self, id: &Id) -> Result<bool> {
        let mut tables = self.tables.write().await;
        Ok(tables.dependencies.remove(id).is_some())
    }
}

#[async_trait::async_trait]
impl RunStore for MemoryStore {
    async fn create_run(&self, run: TestRun) -> Result<TestRun> {
        let mut tables = self.tables.write().await;
        tables.runs.insert(run.id.clone(), run.clone());
        Ok(run)
    }

    async fn get_run(&self, id: &Id) -> Result<Option<TestRun>> {
        let tables = self.tables.read().await;
        Ok(tables.runs.get(id).cloned())
    }

    async fn finish_run(&self, id: &Id, status: RunStatus, completed_at: &str) -> Result<()> {
        let mut tables = self.tables.write().await;
        let run = tables
            .runs
            .get_mut(id)
            .ok_or_else(|| anyhow!("run '{}' not found", id))?;
        run.status = status;
        run.completed_at = Some(completed_at.to_string());
        Ok(())
    }

    async fn create_execution(&self, execution: TestExecution) -> Result<TestExecution> {
        let mut tables = self.tables.write().await;
        let duplicate = tables
            .executions
            .iter()
            .any(|e| e.run_id == execution.run_id && e.api_id == execution.api_id);
        if duplicate {
            return Err(anyhow!(
                "execution already exists for run '{}' and api {:?}",
                execution.run_id,
                execution.api_id
            ));
        }
        tables.executions.push(execution.clone());
        Ok(execution)
    }

    async fn update_execution_status(
        &self,
        id: &Id,
        status: ExecutionStatus,
        error_message: Option<String>,
    ) -> Result<()> {
        let mut tables = self.tables.write().await;
        let execution = tables
            .executions
            .iter_mut()
            .find(|e| e.id == *id)
            .ok_or_else(|| anyhow!("execution '{}' not found", id))?;
        execution.status = status;
        execution.error_message = error_message;
        Ok(())
    }

    async fn list_executions_for_run(&self, run_id: &Id) -> Result<Vec<TestExecution>> {
        let tables = self.tables.read().await;
        Ok(tables
            .executions
            .iter()
            .filter(|e| e.run_id == *run_id)
            .cloned()
            .collect())
    }

    async fn create_artifact(&self, artifact: ExecutionArtifact) -> Result<ExecutionArtifact> {
        let mut tables = self.tables.write().await;
        tables.artifacts.push(artifact.clone());
        Ok(artifact)
    }

    async fn list_artifacts_for_execution(
        &self,
        execution_id: &Id,
    ) -> Result<Vec<ExecutionArtifact>> {
        let tables = self.tables.read().await;
        Ok(tables
            .artifacts
            .iter()
            .filter(|a| a.execution_id == *execution_id)
            .cloned()
            .collect())
    }
}

impl Store for MemoryStore {}
