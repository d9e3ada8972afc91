use axum::{
    routing::{delete, get, post},
    Router,
};

use crate::api::handlers::{self, AppState};
use crate::store::traits::Store;

pub fn create_router<S: Store + 'static>() -> Router<AppState<S>> {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Project management
        .route("/projects", post(handlers::create_project::<S>))
        .route("/projects", get(handlers::list_projects::<S>))
        .route("/projects/:id", delete(handlers::delete_project::<S>))
        // Spec ingestion and catalog
        .route("/ingest", post(handlers::ingest_spec::<S>))
        .route("/projects/:id/apis", get(handlers::list_project_apis::<S>))
        .route("/apis/:id", get(handlers::get_api_detail::<S>))
        // Dependency analysis
        .route("/projects/:id/analyze", post(handlers::analyze_project::<S>))
        .route(
            "/projects/:id/candidates",
            get(handlers::list_candidates::<S>),
        )
        .route(
            "/projects/:id/dependencies",
            get(handlers::list_dependencies::<S>),
        )
        .route("/dependencies", post(handlers::create_dependency::<S>))
        .route(
            "/dependencies/:id",
            delete(handlers::delete_dependency::<S>),
        )
        // Runs and reporting
        .route("/projects/:id/run", post(handlers::run_project::<S>))
        .route("/runs/:id", get(handlers::get_run_report::<S>))
}
