use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};

use crate::model::{
    Api, ApiDependency, ApiRequest, ApiResponse, ApiSpec, CandidateOrigin, CatalogImport,
    DependencyCandidate, ExecutionArtifact, ExecutionStatus, Id, Mapping, Project, RunStatus,
    TestExecution, TestRun, VarLocation, VarType, Variable,
};
use crate::store::traits::{CatalogStore, DependencyStore, ProjectStore, RunStore, Store};

const MIGRATION_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS projects (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    owner_ref TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS api_specs (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    version TEXT NOT NULL,
    spec_hash TEXT NOT NULL,
    src_ref TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE (project_id, spec_hash)
);

CREATE TABLE IF NOT EXISTS apis (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    method TEXT NOT NULL,
    path TEXT NOT NULL,
    operation_id TEXT,
    summary TEXT,
    auth_scheme TEXT,
    UNIQUE (project_id, method, path)
);

CREATE TABLE IF NOT EXISTS api_requests (
    api_id TEXT PRIMARY KEY REFERENCES apis(id) ON DELETE CASCADE,
    body_schema JSONB,
    query_params JSONB,
    path_params JSONB,
    headers JSONB
);

CREATE TABLE IF NOT EXISTS api_responses (
    api_id TEXT NOT NULL REFERENCES apis(id) ON DELETE CASCADE,
    status_code INT NOT NULL,
    schema JSONB NOT NULL,
    PRIMARY KEY (api_id, status_code)
);

CREATE TABLE IF NOT EXISTS variables (
    api_id TEXT NOT NULL REFERENCES apis(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    location TEXT NOT NULL,
    var_type TEXT NOT NULL,
    data_type TEXT NOT NULL,
    required BOOLEAN NOT NULL,
    ai_confidence DOUBLE PRECISION,
    PRIMARY KEY (api_id, name, location)
);

CREATE TABLE IF NOT EXISTS dependency_candidates (
    id TEXT PRIMARY KEY,
    source_api_id TEXT NOT NULL REFERENCES apis(id) ON DELETE CASCADE,
    target_api_id TEXT NOT NULL REFERENCES apis(id) ON DELETE CASCADE,
    mapping JSONB NOT NULL,
    confidence DOUBLE PRECISION NOT NULL,
    reason TEXT,
    origin TEXT NOT NULL,
    structural_type TEXT,
    dependency_type TEXT
);

CREATE TABLE IF NOT EXISTS api_dependencies (
    id TEXT PRIMARY KEY,
    source_api_id TEXT NOT NULL REFERENCES apis(id) ON DELETE CASCADE,
    target_api_id TEXT NOT NULL REFERENCES apis(id) ON DELETE CASCADE,
    mapping JSONB NOT NULL,
    is_required BOOLEAN NOT NULL,
    UNIQUE (source_api_id, target_api_id)
);

CREATE TABLE IF NOT EXISTS test_runs (
    id TEXT PRIMARY KEY,
    project_id TEXT REFERENCES projects(id) ON DELETE SET NULL,
    environment TEXT NOT NULL,
    trigger_source TEXT NOT NULL,
    status TEXT NOT NULL,
    started_at TEXT NOT NULL,
    completed_at TEXT
);

CREATE TABLE IF NOT EXISTS test_executions (
    id TEXT PRIMARY KEY,
    run_id TEXT NOT NULL REFERENCES test_runs(id) ON DELETE CASCADE,
    api_id TEXT,
    status TEXT NOT NULL,
    retry_count INT NOT NULL,
    error_message TEXT,
    UNIQUE (run_id, api_id)
);

CREATE TABLE IF NOT EXISTS execution_artifacts (
    id TEXT PRIMARY KEY,
    execution_id TEXT NOT NULL REFERENCES test_executions(id) ON DELETE CASCADE,
    request_data JSONB,
    response_data JSONB,
    response_time_ms BIGINT NOT NULL,
    created_at TEXT NOT NULL
);
"#;

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store with the given database URL
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .connect(database_url)
            .await
            .context("Failed to create PostgreSQL connection pool")?;

        Ok(Self { pool })
    }

    /// Create the schema if it does not exist yet
    pub async fn migrate(&self) -> Result<()> {
        for statement in MIGRATION_DDL.split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("Failed to run schema migration")?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn project_from_row(row: &PgRow) -> Project {
    Project {
        id: row.get("id"),
        name: row.get("name"),
        owner_ref: row.get("owner_ref"),
        created_at: row.get("created_at"),
    }
}

fn spec_from_row(row: &PgRow) -> ApiSpec {
    ApiSpec {
        id: row.get("id"),
        project_id: row.get("project_id"),
        version: row.get("version"),
        spec_hash: row.get("spec_hash"),
        src_ref: row.get("src_ref"),
        created_at: row.get("created_at"),
    }
}

fn api_from_row(row: &PgRow) -> Api {
    Api {
        id: row.get("id"),
        project_id: row.get("project_id"),
        method: row.get("method"),
        path: row.get("path"),
        operation_id: row.get("operation_id"),
        summary: row.get("summary"),
        auth_scheme: row.get("auth_scheme"),
    }
}

fn variable_from_row(row: &PgRow) -> Variable {
    let location: String = row.get("location");
    let var_type: String = row.get("var_type");
    Variable {
        api_id: row.get("api_id"),
        name: row.get("name"),
        location: VarLocation::parse(&location).unwrap_or(VarLocation::Body), // Default fallback
        var_type: VarType::parse(&var_type).unwrap_or(VarType::UserInput), // Default fallback
        data_type: row.get("data_type"),
        required: row.get("required"),
        ai_confidence: row.get("ai_confidence"),
    }
}

fn mapping_from_value(value: Value) -> Mapping {
    serde_json::from_value(value).unwrap_or_default()
}

fn candidate_from_row(row: &PgRow) -> DependencyCandidate {
    let origin: String = row.get("origin");
    DependencyCandidate {
        id: row.get("id"),
        source_api_id: row.get("source_api_id"),
        target_api_id: row.get("target_api_id"),
        mapping: mapping_from_value(row.get("mapping")),
        confidence: row.get("confidence"),
        reason: row.get("reason"),
        origin: CandidateOrigin::parse(&origin).unwrap_or(CandidateOrigin::Inferred), // Default fallback
        structural_type: row.get("structural_type"),
        dependency_type: row.get("dependency_type"),
    }
}

fn dependency_from_row(row: &PgRow) -> ApiDependency {
    ApiDependency {
        id: row.get("id"),
        source_api_id: row.get("source_api_id"),
        target_api_id: row.get("target_api_id"),
        mapping: mapping_from_value(row.get("mapping")),
        is_required: row.get("is_required"),
    }
}

fn run_from_row(row: &PgRow) -> TestRun {
    let status: String = row.get("status");
    TestRun {
        id: row.get("id"),
        project_id: row.get("project_id"),
        environment: row.get("environment"),
        trigger_source: row.get("trigger_source"),
        status: RunStatus::parse(&status).unwrap_or(RunStatus::Error), // Default fallback
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
    }
}

fn execution_from_row(row: &PgRow) -> TestExecution {
    let status: String = row.get("status");
    TestExecution {
        id: row.get("id"),
        run_id: row.get("run_id"),
        api_id: row.get("api_id"),
        status: ExecutionStatus::parse(&status).unwrap_or(ExecutionStatus::Failed), // Default fallback
        retry_count: row.get::<i32, _>("retry_count") as u32,
        error_message: row.get("error_message"),
    }
}

fn artifact_from_row(row: &PgRow) -> ExecutionArtifact {
    ExecutionArtifact {
        id: row.get("id"),
        execution_id: row.get("execution_id"),
        request_data: row.get("request_data"),
        response_data: row.get("response_data"),
        response_time_ms: row.get("response_time_ms"),
        created_at: row.get("created_at"),
    }
}

#[async_trait::async_trait]
impl ProjectStore for PostgresStore {
    async fn create_project(&self, project: Project) -> Result<Project> {
        sqlx::query(
            "INSERT INTO projects (id, name, owner_ref, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(&project.id)
        .bind(&project.name)
        .bind(&project.owner_ref)
        .bind(&project.created_at)
        .execute(&self.pool)
        .await
        .context("Failed to create project")?;

        Ok(project)
    }

    async fn get_project(&self, id: &Id) -> Result<Option<Project>> {
        let row = sqlx::query("SELECT id, name, owner_ref, created_at FROM projects WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch project")?;

        Ok(row.as_ref().map(project_from_row))
    }

    async fn list_projects(&self) -> Result<Vec<Project>> {
        let rows = sqlx::query(
            "SELECT id, name, owner_ref, created_at FROM projects ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list projects")?;

        Ok(rows.iter().map(project_from_row).collect())
    }

    async fn delete_project(&self, id: &Id) -> Result<bool> {
        // Foreign keys do the cascading: specs/apis and their children go,
        // test runs detach via ON DELETE SET NULL.
        let result = sqlx::query("DELETE FROM projects WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to delete project")?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait::async_trait]
impl CatalogStore for PostgresStore {
    async fn find_spec_by_hash(
        &self,
        project_id: &Id,
        spec_hash: &str,
    ) -> Result<Option<ApiSpec>> {
        let row = sqlx::query(
            "SELECT id, project_id, version, spec_hash, src_ref, created_at
             FROM api_specs WHERE project_id = $1 AND spec_hash = $2",
        )
        .bind(project_id)
        .bind(spec_hash)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch api spec by hash")?;

        Ok(row.as_ref().map(spec_from_row))
    }

    async fn import_catalog(&self, import: CatalogImport) -> Result<Vec<(String, String)>> {
        let mut tx = self.pool.begin().await.context("Failed to begin import")?;

        // Large specs need the full window.
        sqlx::query("SET LOCAL statement_timeout = '20s'")
            .execute(&mut *tx)
            .await
            .context("Failed to set import timeout")?;

        if !import.reuse_existing_spec {
            sqlx::query(
                "INSERT INTO api_specs (id, project_id, version, spec_hash, src_ref, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(&import.spec.id)
            .bind(&import.spec.project_id)
            .bind(&import.spec.version)
            .bind(&import.spec.spec_hash)
            .bind(&import.spec.src_ref)
            .bind(&import.spec.created_at)
            .execute(&mut *tx)
            .await
            .context("Failed to insert api spec")?;
        }

        let mut written = Vec::with_capacity(import.apis.len());
        for api in import.apis {
            let row = sqlx::query(
                "INSERT INTO apis (id, project_id, method, path, operation_id, summary, auth_scheme)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)
                 ON CONFLICT (project_id, method, path) DO UPDATE SET
                     operation_id = EXCLUDED.operation_id,
                     summary = EXCLUDED.summary,
                     auth_scheme = EXCLUDED.auth_scheme
                 RETURNING id",
            )
            .bind(crate::model::generate_id())
            .bind(&import.project_id)
            .bind(&api.method)
            .bind(&api.path)
            .bind(&api.operation_id)
            .bind(&api.summary)
            .bind(&api.auth_scheme)
            .fetch_one(&mut *tx)
            .await
            .context("Failed to upsert api")?;
            let api_id: Id = row.get("id");

            // Erase children before rewriting so a re-ingest never leaves
            // stale rows behind.
            for table in ["api_requests", "api_responses", "variables"] {
                sqlx::query(&format!("DELETE FROM {} WHERE api_id = $1", table))
                    .bind(&api_id)
                    .execute(&mut *tx)
                    .await
                    .context("Failed to erase api children")?;
            }

            let to_json = |map: &std::collections::BTreeMap<String, Value>| -> Option<Value> {
                if map.is_empty() {
                    None
                } else {
                    Some(Value::Object(
                        map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                    ))
                }
            };
            sqlx::query(
                "INSERT INTO api_requests (api_id, body_schema, query_params, path_params, headers)
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(&api_id)
            .bind(&api.body_schema)
            .bind(to_json(&api.query_params))
            .bind(to_json(&api.path_params))
            .bind(to_json(&api.headers))
            .execute(&mut *tx)
            .await
            .context("Failed to insert api request")?;

            for (status_code, schema) in &api.responses {
                sqlx::query(
                    "INSERT INTO api_responses (api_id, status_code, schema)
                     VALUES ($1, $2, $3)
                     ON CONFLICT (api_id, status_code) DO UPDATE SET schema = EXCLUDED.schema",
                )
                .bind(&api_id)
                .bind(*status_code as i32)
                .bind(schema)
                .execute(&mut *tx)
                .await
                .context("Failed to insert api response")?;
            }

            for seed in &api.variables {
                sqlx::query(
                    "INSERT INTO variables (api_id, name, location, var_type, data_type, required)
                     VALUES ($1, $2, $3, $4, $5, $6)
                     ON CONFLICT (api_id, name, location) DO UPDATE SET
                         var_type = EXCLUDED.var_type,
                         data_type = EXCLUDED.data_type,
                         required = EXCLUDED.required",
                )
                .bind(&api_id)
                .bind(&seed.name)
                .bind(seed.location.as_str())
                .bind(seed.var_type.as_str())
                .bind(&seed.data_type)
                .bind(seed.required)
                .execute(&mut *tx)
                .await
                .context("Failed to insert variable")?;
            }

            written.push((api.method, api.path));
        }

        tx.commit().await.context("Failed to commit import")?;
        Ok(written)
    }

    async fn get_api(&self, id: &Id) -> Result<Option<Api>> {
        let row = sqlx::query(
            "SELECT id, project_id, method, path, operation_id, summary, auth_scheme
             FROM apis WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch api")?;

        Ok(row.as_ref().map(api_from_row))
    }

    async fn list_apis_for_project(&self, project_id: &Id) -> Result<Vec<Api>> {
        let rows = sqlx::query(
            "SELECT id, project_id, method, path, operation_id, summary, auth_scheme
             FROM apis WHERE project_id = $1 ORDER BY path, method",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list apis")?;

        Ok(rows.iter().map(api_from_row).collect())
    }

    async fn get_request_for_api(&self, api_id: &Id) -> Result<Option<ApiRequest>> {
        let row = sqlx::query(
            "SELECT api_id, body_schema, query_params, path_params, headers
             FROM api_requests WHERE api_id = $1",
        )
        .bind(api_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch api request")?;

        Ok(row.map(|row| ApiRequest {
            api_id: row.get("api_id"),
            body_schema: row.get("body_schema"),
            query_params: row.get("query_params"),
            path_params: row.get("path_params"),
            headers: row.get("headers"),
        }))
    }

    async fn list_responses_for_api(&self, api_id: &Id) -> Result<Vec<ApiResponse>> {
        let rows = sqlx::query(
            "SELECT api_id, status_code, schema FROM api_responses
             WHERE api_id = $1 ORDER BY status_code",
        )
        .bind(api_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list api responses")?;

        Ok(rows
            .iter()
            .map(|row| ApiResponse {
                api_id: row.get("api_id"),
                status_code: row.get::<i32, _>("status_code") as u16,
                schema: row.get("schema"),
            })
            .collect())
    }

    async fn list_variables_for_api(&self, api_id: &Id) -> Result<Vec<Variable>> {
        let rows = sqlx::query(
            "SELECT api_id, name, location, var_type, data_type, required, ai_confidence
             FROM variables WHERE api_id = $1 ORDER BY location, name",
        )
        .bind(api_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list variables")?;

        Ok(rows.iter().map(variable_from_row).collect())
    }

    async fn set_variable_type(
        &self,
        api_id: &Id,
        name: &str,
        var_type: VarType,
        ai_confidence: Option<f64>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE variables SET var_type = $3, ai_confidence = COALESCE($4, ai_confidence)
             WHERE api_id = $1 AND name = $2",
        )
        .bind(api_id)
        .bind(name)
        .bind(var_type.as_str())
        .bind(ai_confidence)
        .execute(&self.pool)
        .await
        .context("Failed to update variable type")?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait::async_trait]
impl DependencyStore for PostgresStore {
    async fn replace_candidates_for_project(
        &self,
        project_id: &Id,
        candidates: Vec<DependencyCandidate>,
    ) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin candidate replacement")?;

        sqlx::query(
            "DELETE FROM dependency_candidates USING apis
             WHERE dependency_candidates.target_api_id = apis.id AND apis.project_id = $1",
        )
        .bind(project_id)
        .execute(&mut *tx)
        .await
        .context("Failed to delete prior candidates")?;

        for candidate in candidates {
            let mapping =
                serde_json::to_value(&candidate.mapping).context("Failed to encode mapping")?;
            sqlx::query(
                "INSERT INTO dependency_candidates
                     (id, source_api_id, target_api_id, mapping, confidence, reason, origin,
                      structural_type, dependency_type)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            )
            .bind(&candidate.id)
            .bind(&candidate.source_api_id)
            .bind(&candidate.target_api_id)
            .bind(mapping)
            .bind(candidate.confidence)
            .bind(&candidate.reason)
            .bind(candidate.origin.as_str())
            .bind(&candidate.structural_type)
            .bind(&candidate.dependency_type)
            .execute(&mut *tx)
            .await
            .context("Failed to insert candidate")?;
        }

        tx.commit().await.context("Failed to commit candidates")?;
        Ok(())
    }

    async fn list_candidates_for_project(
        &self,
        project_id: &Id,
    ) -> Result<Vec<DependencyCandidate>> {
        let rows = sqlx::query(
            "SELECT c.id, c.source_api_id, c.target_api_id, c.mapping, c.confidence, c.reason,
                    c.origin, c.structural_type, c.dependency_type
             FROM dependency_candidates c
             JOIN apis a ON a.id = c.target_api_id
             WHERE a.project_id = $1
             ORDER BY c.confidence DESC",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list candidates")?;

        Ok(rows.iter().map(candidate_from_row).collect())
    }

    async fn list_candidates_for_target(&self, api_id: &Id) -> Result<Vec<DependencyCandidate>> {
        let rows = sqlx::query(
            "SELECT id, source_api_id, target_api_id, mapping, confidence, reason, origin,
                    structural_type, dependency_type
             FROM dependency_candidates WHERE target_api_id = $1 ORDER BY confidence DESC",
        )
        .bind(api_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list candidates for target")?;

        Ok(rows.iter().map(candidate_from_row).collect())
    }

    async fn upsert_dependency(&self, dependency: ApiDependency) -> Result<ApiDependency> {
        let mapping =
            serde_json::to_value(&dependency.mapping).context("Failed to encode mapping")?;
        let row = sqlx::query(
            "INSERT INTO api_dependencies (id, source_api_id, target_api_id, mapping, is_required)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (source_api_id, target_api_id) DO UPDATE SET
                 mapping = EXCLUDED.mapping,
                 is_required = EXCLUDED.is_required
             RETURNING id, source_api_id, target_api_id, mapping, is_required",
        )
        .bind(&dependency.id)
        .bind(&dependency.source_api_id)
        .bind(&dependency.target_api_id)
        .bind(mapping)
        .bind(dependency.is_required)
        .fetch_one(&self.pool)
        .await
        .context("Failed to upsert dependency")?;

        Ok(dependency_from_row(&row))
    }

    async fn get_dependency(&self, id: &Id) -> Result<Option<ApiDependency>> {
        let row = sqlx::query(
            "SELECT id, source_api_id, target_api_id, mapping, is_required
             FROM api_dependencies WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch dependency")?;

        Ok(row.as_ref().map(dependency_from_row))
    }

    async fn list_dependencies_for_project(&self, project_id: &Id) -> Result<Vec<ApiDependency>> {
        let rows = sqlx::query(
            "SELECT d.id, d.source_api_id, d.target_api_id, d.mapping, d.is_required
             FROM api_dependencies d
             JOIN apis a ON a.id = d.target_api_id
             WHERE a.project_id = $1
             ORDER BY d.source_api_id, d.target_api_id",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list dependencies")?;

        Ok(rows.iter().map(dependency_from_row).collect())
    }

    async fn list_dependencies_for_target(&self, api_id: &Id) -> Result<Vec<ApiDependency>> {
        let rows = sqlx::query(
            "SELECT id, source_api_id, target_api_id, mapping, is_required
             FROM api_dependencies WHERE target_api_id = $1 ORDER BY source_api_id",
        )
        .bind(api_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list dependencies for target")?;

        Ok(rows.iter().map(dependency_from_row).collect())
    }

    async fn delete_dependency(&self, id: &Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM api_dependencies WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to delete dependency")?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait::async_trait]
impl RunStore for PostgresStore {
    async fn create_run(&self, run: TestRun) -> Result<TestRun> {
        sqlx::query(
            "INSERT INTO test_runs
                 (id, project_id, environment, trigger_source, status, started_at, completed_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(&run.id)
        .bind(&run.project_id)
        .bind(&run.environment)
        .bind(&run.trigger_source)
        .bind(run.status.as_str())
        .bind(&run.started_at)
        .bind(&run.completed_at)
        .execute(&self.pool)
        .await
        .context("Failed to create run")?;

        Ok(run)
    }

    async fn get_run(&self, id: &Id) -> Result<Option<TestRun>> {
        let row = sqlx::query(
            "SELECT id, project_id, environment, trigger_source, status, started_at, completed_at
             FROM test_runs WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch run")?;

        Ok(row.as_ref().map(run_from_row))
    }

    async fn finish_run(&self, id: &Id, status: RunStatus, completed_at: &str) -> Result<()> {
        let result =
            sqlx::query("UPDATE test_runs SET status = $2, completed_at = $3 WHERE id = $1")
                .bind(id)
                .bind(status.as_str())
                .bind(completed_at)
                .execute(&self.pool)
                .await
                .context("Failed to finish run")?;

        if result.rows_affected() == 0 {
            return Err(anyhow!("run '{}' not found", id));
        }
        Ok(())
    }

    async fn create_execution(&self, execution: TestExecution) -> Result<TestExecution> {
        sqlx::query(
            "INSERT INTO test_executions (id, run_id, api_id, status, retry_count, error_message)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&execution.id)
        .bind(&execution.run_id)
        .bind(&execution.api_id)
        .bind(execution.status.as_str())
        .bind(execution.retry_count as i32)
        .bind(&execution.error_message)
        .execute(&self.pool)
        .await
        .context("Failed to create execution")?;

        Ok(execution)
    }

    async fn update_execution_status(
        &self,
        id: &Id,
        status: ExecutionStatus,
        error_message: Option<String>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE test_executions SET status = $2, error_message = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(&error_message)
        .execute(&self.pool)
        .await
        .context("Failed to update execution")?;

        if result.rows_affected() == 0 {
            return Err(anyhow!("execution '{}' not found", id));
        }
        Ok(())
    }

    async fn list_executions_for_run(&self, run_id: &Id) -> Result<Vec<TestExecution>> {
        let rows = sqlx::query(
            "SELECT id, run_id, api_id, status, retry_count, error_message
             FROM test_executions WHERE run_id = $1 ORDER BY id",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list executions")?;

        Ok(rows.iter().map(execution_from_row).collect())
    }

    async fn create_artifact(&self, artifact: ExecutionArtifact) -> Result<ExecutionArtifact> {
        sqlx::query(
            "INSERT INTO execution_artifacts
                 (id, execution_id, request_data, response_data, response_time_ms, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&artifact.id)
        .bind(&artifact.execution_id)
        .bind(&artifact.request_data)
        .bind(&artifact.response_data)
        .bind(artifact.response_time_ms)
        .bind(&artifact.created_at)
        .execute(&self.pool)
        .await
        .context("Failed to create artifact")?;

        Ok(artifact)
    }

    async fn list_artifacts_for_execution(
        &self,
        execution_id: &Id,
    ) -> Result<Vec<ExecutionArtifact>> {
        let rows = sqlx::query(
            "SELECT id, execution_id, request_data, response_data, response_time_ms, created_at
             FROM execution_artifacts WHERE execution_id = $1 ORDER BY created_at",
        )
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list artifacts")?;

        Ok(rows.iter().map(artifact_from_row).collect())
    }
}

impl Store for PostgresStore {}
