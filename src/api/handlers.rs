use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::error::CoreError;
use crate::llm::ChatClient;
use crate::logic::{
    DependencyAnalyzer, DependencyRegistry, RunExecutor, RunReporter, SpecIngestor, SpecSource,
};
use crate::model::{
    Api, ApiDependency, ApiRequest, ApiResponse, DependencyCandidate, Id, NewDependency,
    NewProject, Project, TestRun, Variable,
};
use crate::store::traits::Store;

/// Shared handler state: the store plus the chat client the analyzer uses.
pub struct AppState<S> {
    pub store: Arc<S>,
    pub chat: Arc<dyn ChatClient>,
    pub llm_model: String,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            chat: Arc::clone(&self.chat),
            llm_model: self.llm_model.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

#[derive(Debug, Serialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    pub total: usize,
}

impl<T> ListResponse<T> {
    fn new(items: Vec<T>) -> Self {
        let total = items.len();
        Self { items, total }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: &str) -> Self {
        Self {
            error: message.to_string(),
        }
    }
}

type HandlerError = (StatusCode, Json<ErrorResponse>);

/// Core error kinds carry their own status codes; everything else is a 500.
fn map_error(err: anyhow::Error) -> HandlerError {
    let status = match err.downcast_ref::<CoreError>() {
        Some(CoreError::InvalidSpec(_))
        | Some(CoreError::UnsupportedVersion(_))
        | Some(CoreError::UnserializableSchema(_))
        | Some(CoreError::SelfDependency(_)) => StatusCode::BAD_REQUEST,
        Some(CoreError::CycleDetected) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(ErrorResponse::new(&format!("{:#}", err))))
}

fn not_found(what: &str) -> HandlerError {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse::new(&format!("{} not found", what))),
    )
}

// ---------------------------------------------------------------------------
// Projects
// ---------------------------------------------------------------------------

pub async fn create_project<S: Store>(
    State(state): State<AppState<S>>,
    Json(new_project): Json<NewProject>,
) -> Result<Json<Project>, HandlerError> {
    let project = state
        .store
        .create_project(new_project.into_project())
        .await
        .map_err(map_error)?;
    Ok(Json(project))
}

pub async fn list_projects<S: Store>(
    State(state): State<AppState<S>>,
) -> Result<Json<ListResponse<Project>>, HandlerError> {
    let projects = state.store.list_projects().await.map_err(map_error)?;
    Ok(Json(ListResponse::new(projects)))
}

pub async fn delete_project<S: Store>(
    State(state): State<AppState<S>>,
    Path(project_id): Path<Id>,
) -> Result<Json<Value>, HandlerError> {
    let deleted = state
        .store
        .delete_project(&project_id)
        .await
        .map_err(map_error)?;
    if !deleted {
        return Err(not_found("project"));
    }
    Ok(Json(serde_json::json!({ "deleted": true })))
}

// ---------------------------------------------------------------------------
// Ingest & catalog
// ---------------------------------------------------------------------------

/// Exactly one of `url`, `file_path` and `document` must be set.
#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub project_id: Id,
    pub url: Option<String>,
    pub file_path: Option<String>,
    pub document: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub written: Vec<WrittenEndpoint>,
}

#[derive(Debug, Serialize)]
pub struct WrittenEndpoint {
    pub method: String,
    pub path: String,
}

pub async fn ingest_spec<S: Store>(
    State(state): State<AppState<S>>,
    Json(request): Json<IngestRequest>,
) -> Result<Json<IngestResponse>, HandlerError> {
    let source = match (request.url, request.file_path, request.document) {
        (Some(url), None, None) => SpecSource::Url(url),
        (None, Some(path), None) => SpecSource::Path(path.into()),
        (None, None, Some(document)) => SpecSource::Inline(document),
        _ => {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new(
                    "exactly one of url, file_path or document is required",
                )),
            ))
        }
    };

    if state
        .store
        .get_project(&request.project_id)
        .await
        .map_err(map_error)?
        .is_none()
    {
        return Err(not_found("project"));
    }

    let written = SpecIngestor::ingest(state.store.as_ref(), &request.project_id, source)
        .await
        .map_err(map_error)?;
    Ok(Json(IngestResponse {
        written: written
            .into_iter()
            .map(|(method, path)| WrittenEndpoint { method, path })
            .collect(),
    }))
}

pub async fn list_project_apis<S: Store>(
    State(state): State<AppState<S>>,
    Path(project_id): Path<Id>,
) -> Result<Json<ListResponse<Api>>, HandlerError> {
    if state
        .store
        .get_project(&project_id)
        .await
        .map_err(map_error)?
        .is_none()
    {
        return Err(not_found("project"));
    }
    let apis = state
        .store
        .list_apis_for_project(&project_id)
        .await
        .map_err(map_error)?;
    Ok(Json(ListResponse::new(apis)))
}

#[derive(Debug, Serialize)]
pub struct ApiDetailResponse {
    pub api: Api,
    pub request: Option<ApiRequest>,
    pub responses: Vec<ApiResponse>,
    pub variables: Vec<Variable>,
    pub candidates: Vec<DependencyCandidate>,
}

/// Catalog detail. Variables are enriched with the best candidate confidence
/// targeting them.
pub async fn get_api_detail<S: Store>(
    State(state): State<AppState<S>>,
    Path(api_id): Path<Id>,
) -> Result<Json<ApiDetailResponse>, HandlerError> {
    let Some(api) = state.store.get_api(&api_id).await.map_err(map_error)? else {
        return Err(not_found("api"));
    };
    let request = state
        .store
        .get_request_for_api(&api_id)
        .await
        .map_err(map_error)?;
    let responses = state
        .store
        .list_responses_for_api(&api_id)
        .await
        .map_err(map_error)?;
    let mut variables = state
        .store
        .list_variables_for_api(&api_id)
        .await
        .map_err(map_error)?;
    let candidates = state
        .store
        .list_candidates_for_target(&api_id)
        .await
        .map_err(map_error)?;

    for variable in &mut variables {
        let best = candidates
            .iter()
            .filter(|c| c.mapping.contains_key(&variable.name))
            .map(|c| c.confidence)
            .fold(None::<f64>, |best, c| {
                Some(best.map(|b| b.max(c)).unwrap_or(c))
            });
        if best.is_some() {
            variable.ai_confidence = best;
        }
    }

    Ok(Json(ApiDetailResponse {
        api,
        request,
        responses,
        variables,
        candidates,
    }))
}

// ---------------------------------------------------------------------------
// Analysis & dependencies
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub candidates: Vec<DependencyCandidate>,
    pub failed_batches: usize,
}

pub async fn analyze_project<S: Store>(
    State(state): State<AppState<S>>,
    Path(project_id): Path<Id>,
) -> Result<Json<AnalyzeResponse>, HandlerError> {
    if state
        .store
        .get_project(&project_id)
        .await
        .map_err(map_error)?
        .is_none()
    {
        return Err(not_found("project"));
    }
    let outcome = DependencyAnalyzer::analyze_project(
        state.store.as_ref(),
        state.chat.as_ref(),
        &state.llm_model,
        &project_id,
    )
    .await
    .map_err(map_error)?;
    Ok(Json(AnalyzeResponse {
        candidates: outcome.candidates,
        failed_batches: outcome.failed_batches,
    }))
}

pub async fn list_candidates<S: Store>(
    State(state): State<AppState<S>>,
    Path(project_id): Path<Id>,
) -> Result<Json<ListResponse<DependencyCandidate>>, HandlerError> {
    let candidates = state
        .store
        .list_candidates_for_project(&project_id)
        .await
        .map_err(map_error)?;
    Ok(Json(ListResponse::new(candidates)))
}

pub async fn list_dependencies<S: Store>(
    State(state): State<AppState<S>>,
    Path(project_id): Path<Id>,
) -> Result<Json<ListResponse<ApiDependency>>, HandlerError> {
    let dependencies = state
        .store
        .list_dependencies_for_project(&project_id)
        .await
        .map_err(map_error)?;
    Ok(Json(ListResponse::new(dependencies)))
}

pub async fn create_dependency<S: Store>(
    State(state): State<AppState<S>>,
    Json(new_dependency): Json<NewDependency>,
) -> Result<Json<ApiDependency>, HandlerError> {
    let dependency = DependencyRegistry::confirm(state.store.as_ref(), new_dependency)
        .await
        .map_err(map_error)?;
    Ok(Json(dependency))
}

pub async fn delete_dependency<S: Store>(
    State(state): State<AppState<S>>,
    Path(dependency_id): Path<Id>,
) -> Result<Json<Value>, HandlerError> {
    let deleted = DependencyRegistry::remove(state.store.as_ref(), &dependency_id)
        .await
        .map_err(map_error)?;
    if !deleted {
        return Err(not_found("dependency"));
    }
    Ok(Json(serde_json::json!({ "deleted": true })))
}

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct RunRequest {
    pub environment: String,
}

pub async fn run_project<S: Store + 'static>(
    State(state): State<AppState<S>>,
    Path(project_id): Path<Id>,
    Json(request): Json<RunRequest>,
) -> Result<Json<TestRun>, HandlerError> {
    if state
        .store
        .get_project(&project_id)
        .await
        .map_err(map_error)?
        .is_none()
    {
        return Err(not_found("project"));
    }
    let executor = RunExecutor::new(Arc::clone(&state.store));
    let run = executor
        .execute_run(&project_id, &request.environment)
        .await
        .map_err(map_error)?;
    Ok(Json(run))
}

pub async fn get_run_report<S: Store>(
    State(state): State<AppState<S>>,
    Path(run_id): Path<Id>,
) -> Result<Json<crate::logic::RunReport>, HandlerError> {
    let report = RunReporter::project_run(state.store.as_ref(), &run_id)
        .await
        .map_err(map_error)?;
    match report {
        Some(report) => Ok(Json(report)),
        None => Err(not_found("run")),
    }
}
