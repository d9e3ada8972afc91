use crate::model::{
    Api, ApiDependency, ApiRequest, ApiResponse, ApiSpec, CatalogImport, DependencyCandidate,
    ExecutionArtifact, ExecutionStatus, Id, Project, RunStatus, TestExecution, TestRun, VarType,
    Variable,
};
use anyhow::Result;

#[async_trait::async_trait]
pub trait ProjectStore: Send + Sync {
    /// Create a project. Fails if the name is already taken (names are
    /// globally unique).
    async fn create_project(&self, project: Project) -> Result<Project>;
    async fn get_project(&self, id: &Id) -> Result<Option<Project>>;
    async fn list_projects(&self) -> Result<Vec<Project>>;
    /// Delete a project and cascade to its Apis, ApiSpecs, candidates and
    /// dependencies. Test runs are detached (project_id set to null), not
    /// deleted.
    async fn delete_project(&self, id: &Id) -> Result<bool>;
}

#[async_trait::async_trait]
pub trait CatalogStore: Send + Sync {
    async fn find_spec_by_hash(&self, project_id: &Id, spec_hash: &str)
        -> Result<Option<ApiSpec>>;
    /// Apply one ingested document atomically: upsert the ApiSpec row (unless
    /// it is being reused), upsert each Api keyed by (project, method, path),
    /// and erase + rewrite every touched Api's request, responses and
    /// variables. Any failure leaves the catalog untouched. Returns the
    /// (method, path) pairs written.
    async fn import_catalog(&self, import: CatalogImport) -> Result<Vec<(String, String)>>;
    async fn get_api(&self, id: &Id) -> Result<Option<Api>>;
    async fn list_apis_for_project(&self, project_id: &Id) -> Result<Vec<Api>>;
    async fn get_request_for_api(&self, api_id: &Id) -> Result<Option<ApiRequest>>;
    async fn list_responses_for_api(&self, api_id: &Id) -> Result<Vec<ApiResponse>>;
    async fn list_variables_for_api(&self, api_id: &Id) -> Result<Vec<Variable>>;
    /// Re-tag a variable by (api, name) across locations. Returns whether a
    /// row matched.
    async fn set_variable_type(
        &self,
        api_id: &Id,
        name: &str,
        var_type: VarType,
        ai_confidence: Option<f64>,
    ) -> Result<bool>;
}

#[async_trait::async_trait]
pub trait DependencyStore: Send + Sync {
    /// Delete all prior candidates for the project and insert the new set in
    /// one atomic step.
    async fn replace_candidates_for_project(
        &self,
        project_id: &Id,
        candidates: Vec<DependencyCandidate>,
    ) -> Result<()>;
    async fn list_candidates_for_project(&self, project_id: &Id)
        -> Result<Vec<DependencyCandidate>>;
    async fn list_candidates_for_target(&self, api_id: &Id) -> Result<Vec<DependencyCandidate>>;
    /// Upsert on (source, target); an existing row keeps its id but has its
    /// mapping and is_required replaced.
    async fn upsert_dependency(&self, dependency: ApiDependency) -> Result<ApiDependency>;
    async fn get_dependency(&self, id: &Id) -> Result<Option<ApiDependency>>;
    async fn list_dependencies_for_project(&self, project_id: &Id) -> Result<Vec<ApiDependency>>;
    async fn list_dependencies_for_target(&self, api_id: &Id) -> Result<Vec<ApiDependency>>;
    async fn delete_dependency(&self, id: &Id) -> Result<bool>;
}

#[async_trait::async_trait]
pub trait RunStore: Send + Sync {
    async fn create_run(&self, run: TestRun) -> Result<TestRun>;
    async fn get_run(&self, id: &Id) -> Result<Option<TestRun>>;
    async fn finish_run(&self, id: &Id, status: RunStatus, completed_at: &str) -> Result<()>;
    async fn create_execution(&self, execution: TestExecution) -> Result<TestExecution>;
    async fn update_execution_status(
        &self,
        id: &Id,
        status: ExecutionStatus,
        error_message: Option<String>,
    ) -> Result<()>;
    async fn list_executions_for_run(&self, run_id: &Id) -> Result<Vec<TestExecution>>;
    async fn create_artifact(&self, artifact: ExecutionArtifact) -> Result<ExecutionArtifact>;
    async fn list_artifacts_for_execution(
        &self,
        execution_id: &Id,
    ) -> Result<Vec<ExecutionArtifact>>;
}

pub trait Store: ProjectStore + CatalogStore + DependencyStore + RunStore + Send + Sync {}
