use anyhow::Result;
use apichain::llm::{ChatClient, ChatRequest, ChatResponse, ChatResponseMessage};
use apichain::logic::{
    DependencyRegistry, ExecutionPlanner, RunExecutor, RunReporter, SpecIngestor, SpecSource,
};
use apichain::model::{
    Api, CandidateOrigin, ExecutionStatus, Mapping, NewDependency, NewProject, Project, RunStatus,
    VarLocation, VarType,
};
use apichain::store::mem::MemoryStore;
use apichain::store::traits::{CatalogStore, DependencyStore, ProjectStore, RunStore};
use axum::extract::Path;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::Json;
use serde_json::{json, Value};
use std::sync::Arc;

// Chat client double that always answers with the same canned content.
struct ScriptedChat {
    content: String,
}

impl ScriptedChat {
    fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }

    fn empty() -> Self {
        Self::new(r#"{"candidates": []}"#)
    }
}

#[async_trait::async_trait]
impl ChatClient for ScriptedChat {
    async fn chat(&self, _request: ChatRequest) -> Result<ChatResponse> {
        Ok(ChatResponse {
            message: ChatResponseMessage {
                content: self.content.clone(),
            },
        })
    }
}

struct FailingChat;

#[async_trait::async_trait]
impl ChatClient for FailingChat {
    async fn chat(&self, _request: ChatRequest) -> Result<ChatResponse> {
        Err(anyhow::anyhow!("model unavailable"))
    }
}

async fn analyze(
    store: &MemoryStore,
    chat: &dyn ChatClient,
    project: &Project,
) -> apichain::logic::AnalysisOutcome {
    apichain::logic::DependencyAnalyzer::analyze_project(store, chat, "test-model", &project.id)
        .await
        .unwrap()
}

// A small live environment the executor can call.
async fn spawn_target_server() -> String {
    let app = axum::Router::new()
        .route(
            "/login",
            post(|| async { Json(json!({"accessToken": "X"})) }),
        )
        .route(
            "/me",
            get(|headers: HeaderMap| async move {
                let authorized = headers
                    .get("authorization")
                    .and_then(|value| value.to_str().ok())
                    == Some("Bearer X");
                if authorized {
                    (StatusCode::OK, Json(json!({"ok": true})))
                } else {
                    (StatusCode::UNAUTHORIZED, Json(json!({"error": "unauthorized"})))
                }
            }),
        )
        .route(
            "/orders",
            post(|| async { (StatusCode::CREATED, Json(json!({"id": "o1"}))) }),
        )
        .route(
            "/orders/:id",
            get(|Path(id): Path<String>| async move { Json(json!({"id": id, "total": 9})) }),
        )
        .route(
            "/payments",
            post(|| async {
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"error": "boom"})),
                )
            }),
        )
        .route(
            "/receipts/:id",
            get(|Path(id): Path<String>| async move { Json(json!({"id": id})) }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

async fn create_project(store: &MemoryStore, name: &str) -> Project {
    store
        .create_project(
            NewProject {
                name: name.to_string(),
                owner_ref: None,
            }
            .into_project(),
        )
        .await
        .unwrap()
}

fn find_api<'a>(apis: &'a [Api], method: &str, path: &str) -> &'a Api {
    apis.iter()
        .find(|api| api.method == method && api.path == path)
        .unwrap_or_else(|| panic!("no api {} {}", method, path))
}

fn auth_spec() -> Value {
    json!({
        "openapi": "3.0.3",
        "info": {"title": "auth demo", "version": "1.0.0"},
        "components": {
            "securitySchemes": {
                "bearerAuth": {"type": "http", "scheme": "bearer"}
            }
        },
        "paths": {
            "/login": {
                "post": {
                    "operationId": "login",
                    "requestBody": {
                        "content": {
                            "application/json": {
                                "schema": {
                                    "type": "object",
                                    "properties": {
                                        "username": {"type": "string"},
                                        "password": {"type": "string"}
                                    },
                                    "required": ["username", "password"]
                                }
                            }
                        }
                    },
                    "responses": {
                        "200": {
                            "content": {
                                "application/json": {
                                    "schema": {
                                        "type": "object",
                                        "properties": {"accessToken": {"type": "string"}}
                                    }
                                }
                            }
                        }
                    }
                }
            },
            "/me": {
                "get": {
                    "operationId": "me",
                    "security": [{"bearerAuth": []}],
                    "responses": {
                        "200": {
                            "content": {
                                "application/json": {
                                    "schema": {
                                        "type": "object",
                                        "properties": {"ok": {"type": "boolean"}}
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
    })
}

fn orders_spec() -> Value {
    json!({
        "openapi": "3.0.3",
        "info": {"title": "orders demo", "version": "1.0.0"},
        "paths": {
            "/orders": {
                "post": {
                    "operationId": "createOrder",
                    "requestBody": {
                        "content": {
                            "application/json": {
                                "schema": {
                                    "type": "object",
                                    "properties": {"total": {"type": "number"}},
                                    "required": ["total"]
                                }
                            }
                        }
                    },
                    "responses": {
                        "201": {
                            "content": {
                                "application/json": {
                                    "schema": {
                                        "type": "object",
                                        "properties": {"id": {"type": "string"}}
                                    }
                                }
                            }
                        }
                    }
                }
            },
            "/orders/{id}": {
                "get": {
                    "operationId": "getOrder",
                    "parameters": [
                        {"name": "id", "in": "path", "required": true, "schema": {"type": "string"}}
                    ],
                    "responses": {
                        "200": {
                            "content": {
                                "application/json": {
                                    "schema": {
                                        "type": "object",
                                        "properties": {"id": {"type": "string"}}
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
    })
}

#[tokio::test]
async fn auth_chain_end_to_end() {
    let store = MemoryStore::new();
    let project = create_project(&store, "auth-chain").await;

    // Step 1: ingest the spec
    let written = SpecIngestor::ingest(&store, &project.id, SpecSource::Inline(auth_spec()))
        .await
        .unwrap();
    assert_eq!(written.len(), 2);

    let apis = store.list_apis_for_project(&project.id).await.unwrap();
    let login = find_api(&apis, "POST", "/login").clone();
    let me = find_api(&apis, "GET", "/me").clone();
    assert_eq!(me.auth_scheme.as_deref(), Some("bearer"));

    // The synthetic Authorization variable exists on the secured endpoint.
    let me_vars = store.list_variables_for_api(&me.id).await.unwrap();
    let auth_var = me_vars
        .iter()
        .find(|v| v.name == "Authorization" && v.location == VarLocation::Header)
        .unwrap();
    assert_eq!(auth_var.var_type, VarType::Synthetic);
    assert!(auth_var.required);

    // Step 2: analyze; the deterministic auth chain needs no LLM help
    let outcome = analyze(&store, &ScriptedChat::empty(), &project).await;
    let auth_candidates: Vec<_> = outcome
        .candidates
        .iter()
        .filter(|c| c.mapping.contains_key("Authorization"))
        .collect();
    assert_eq!(auth_candidates.len(), 1);
    let candidate = auth_candidates[0];
    assert_eq!(candidate.source_api_id, login.id);
    assert_eq!(candidate.target_api_id, me.id);
    assert_eq!(candidate.mapping.get("Authorization").unwrap(), "accessToken");
    assert_eq!(candidate.confidence, 1.0);
    assert_eq!(candidate.origin, CandidateOrigin::Deterministic);

    // Step 3: promote the candidate
    DependencyRegistry::confirm(
        &store,
        NewDependency {
            source_api_id: candidate.source_api_id.clone(),
            target_api_id: candidate.target_api_id.clone(),
            mapping: candidate.mapping.clone(),
            is_required: true,
        },
    )
    .await
    .unwrap();

    let me_vars = store.list_variables_for_api(&me.id).await.unwrap();
    let auth_var = me_vars.iter().find(|v| v.name == "Authorization").unwrap();
    assert_eq!(auth_var.var_type, VarType::Dependent);

    // Step 4: run against a live environment
    let environment = spawn_target_server().await;
    let store = Arc::new(store);
    let run = RunExecutor::new(Arc::clone(&store))
        .execute_run(&project.id, &environment)
        .await
        .unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert!(run.completed_at.is_some());

    let executions = store.list_executions_for_run(&run.id).await.unwrap();
    assert_eq!(executions.len(), 2);
    assert!(executions
        .iter()
        .all(|e| e.status == ExecutionStatus::Passed));

    // The resolved token is visible on the /me request artifact.
    let me_execution = executions
        .iter()
        .find(|e| e.api_id.as_deref() == Some(me.id.as_str()))
        .unwrap();
    let artifacts = store
        .list_artifacts_for_execution(&me_execution.id)
        .await
        .unwrap();
    assert_eq!(artifacts.len(), 1);
    let request_data = artifacts[0].request_data.as_ref().unwrap();
    assert_eq!(request_data["headers"]["Authorization"], "Bearer X");
}

#[tokio::test]
async fn id_producer_flow() {
    let store = MemoryStore::new();
    let project = create_project(&store, "id-producer").await;

    SpecIngestor::ingest(&store, &project.id, SpecSource::Inline(orders_spec()))
        .await
        .unwrap();
    let apis = store.list_apis_for_project(&project.id).await.unwrap();
    let create_order = find_api(&apis, "POST", "/orders").clone();
    let get_order = find_api(&apis, "GET", "/orders/{id}").clone();

    let outcome = analyze(&store, &ScriptedChat::empty(), &project).await;
    let candidate = outcome
        .candidates
        .iter()
        .find(|c| c.target_api_id == get_order.id)
        .expect("producer-map candidate for GET /orders/{id}");
    assert_eq!(candidate.source_api_id, create_order.id);
    assert_eq!(candidate.mapping.get("id").unwrap(), "id");
    assert!(candidate.confidence <= 0.6);
    assert_eq!(candidate.origin, CandidateOrigin::Deterministic);

    DependencyRegistry::confirm(
        &store,
        NewDependency {
            source_api_id: candidate.source_api_id.clone(),
            target_api_id: candidate.target_api_id.clone(),
            mapping: candidate.mapping.clone(),
            is_required: true,
        },
    )
    .await
    .unwrap();

    // The plan layers the producer strictly before the consumer.
    let dependencies = store
        .list_dependencies_for_project(&project.id)
        .await
        .unwrap();
    let plan = ExecutionPlanner::plan(&apis, &dependencies).unwrap();
    assert_eq!(plan.execution_levels.len(), 2);
    assert_eq!(plan.execution_levels[0], vec![create_order.id.clone()]);
    assert_eq!(plan.execution_levels[1], vec![get_order.id.clone()]);

    let environment = spawn_target_server().await;
    let store = Arc::new(store);
    let run = RunExecutor::new(Arc::clone(&store))
        .execute_run(&project.id, &environment)
        .await
        .unwrap();
    assert_eq!(run.status, RunStatus::Completed);

    let executions = store.list_executions_for_run(&run.id).await.unwrap();
    assert!(executions
        .iter()
        .all(|e| e.status == ExecutionStatus::Passed));

    // The consumer's URL was hydrated with the produced id.
    let get_execution = executions
        .iter()
        .find(|e| e.api_id.as_deref() == Some(get_order.id.as_str()))
        .unwrap();
    let artifacts = store
        .list_artifacts_for_execution(&get_execution.id)
        .await
        .unwrap();
    let url = artifacts[0].request_data.as_ref().unwrap()["url"]
        .as_str()
        .unwrap()
        .to_string();
    assert!(url.ends_with("/orders/o1"), "url was {}", url);
}

#[tokio::test]
async fn cycle_yields_error_run_without_executions() {
    let store = MemoryStore::new();
    let project = create_project(&store, "cyclic").await;

    SpecIngestor::ingest(&store, &project.id, SpecSource::Inline(orders_spec()))
        .await
        .unwrap();
    let apis = store.list_apis_for_project(&project.id).await.unwrap();
    let a = apis[0].clone();
    let b = apis[1].clone();

    for (source, target) in [(&a, &b), (&b, &a)] {
        DependencyRegistry::confirm(
            &store,
            NewDependency {
                source_api_id: source.id.clone(),
                target_api_id: target.id.clone(),
                mapping: Mapping::new(),
                is_required: true,
            },
        )
        .await
        .unwrap();
    }

    let store = Arc::new(store);
    let run = RunExecutor::new(Arc::clone(&store))
        .execute_run(&project.id, "http://127.0.0.1:9")
        .await
        .unwrap();
    assert_eq!(run.status, RunStatus::Error);
    assert!(run.completed_at.is_some());

    // Only the bookkeeping row exists; no endpoint was attempted.
    let executions = store.list_executions_for_run(&run.id).await.unwrap();
    assert!(executions.is_empty());
}

#[tokio::test]
async fn dependency_failure_propagates_lazily() {
    let store = MemoryStore::new();
    let project = create_project(&store, "failing-upstream").await;

    let spec = json!({
        "openapi": "3.0.3",
        "info": {"title": "payments demo", "version": "1.0.0"},
        "paths": {
            "/payments": {
                "post": {
                    "responses": {
                        "201": {
                            "content": {
                                "application/json": {
                                    "schema": {
                                        "type": "object",
                                        "properties": {"id": {"type": "string"}}
                                    }
                                }
                            }
                        }
                    }
                }
            },
            "/receipts/{id}": {
                "get": {
                    "parameters": [
                        {"name": "id", "in": "path", "required": true, "schema": {"type": "string"}}
                    ],
                    "responses": {"200": {"description": "ok"}}
                }
            }
        }
    });
    SpecIngestor::ingest(&store, &project.id, SpecSource::Inline(spec))
        .await
        .unwrap();
    let apis = store.list_apis_for_project(&project.id).await.unwrap();
    let payments = find_api(&apis, "POST", "/payments").clone();
    let receipts = find_api(&apis, "GET", "/receipts/{id}").clone();

    let mut mapping = Mapping::new();
    mapping.insert("id".to_string(), "id".to_string());
    DependencyRegistry::confirm(
        &store,
        NewDependency {
            source_api_id: payments.id.clone(),
            target_api_id: receipts.id.clone(),
            mapping,
            is_required: true,
        },
    )
    .await
    .unwrap();

    let environment = spawn_target_server().await;
    let store = Arc::new(store);
    let run = RunExecutor::new(Arc::clone(&store))
        .execute_run(&project.id, &environment)
        .await
        .unwrap();

    // The run itself completes; failures live on the execution rows.
    assert_eq!(run.status, RunStatus::Completed);

    let executions = store.list_executions_for_run(&run.id).await.unwrap();
    let payment_execution = executions
        .iter()
        .find(|e| e.api_id.as_deref() == Some(payments.id.as_str()))
        .unwrap();
    assert_eq!(payment_execution.status, ExecutionStatus::Failed);

    let receipt_execution = executions
        .iter()
        .find(|e| e.api_id.as_deref() == Some(receipts.id.as_str()))
        .unwrap();
    assert_eq!(receipt_execution.status, ExecutionStatus::Failed);
    assert_eq!(
        receipt_execution.error_message.as_deref(),
        Some(format!("Dependency failed: Source {} not ready or failed.", payments.id).as_str())
    );

    // The reporting projection aggregates the same picture.
    let report = RunReporter::project_run(store.as_ref(), &run.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.summary.total, 2);
    assert_eq!(report.summary.failed, 2);
    assert_eq!(report.summary.passed, 0);
}

#[tokio::test]
async fn hallucinated_variables_are_filtered_out() {
    let store = MemoryStore::new();
    let project = create_project(&store, "hallucination").await;

    SpecIngestor::ingest(&store, &project.id, SpecSource::Inline(orders_spec()))
        .await
        .unwrap();
    let apis = store.list_apis_for_project(&project.id).await.unwrap();
    let create_order = find_api(&apis, "POST", "/orders").clone();
    let get_order = find_api(&apis, "GET", "/orders/{id}").clone();

    // Reply arrives fenced, with one hallucinated variable and one valid one.
    let reply = format!(
        "```json\n{{\"candidates\": [\
         {{\"source_api_id\": \"{src}\", \"target_api_id\": \"{dst}\", \
          \"variable\": \"randomField\", \"source_path\": \"id\", \"confidence\": 0.9}},\
         {{\"source_api_id\": \"{src}\", \"target_api_id\": \"{dst}\", \
          \"variable\": \"id\", \"source_path\": \"id\", \"confidence\": 0.9}}\
         ]}}\n```",
        src = create_order.id,
        dst = get_order.id,
    );
    let outcome = analyze(&store, &ScriptedChat::new(reply), &project).await;

    assert!(outcome
        .candidates
        .iter()
        .all(|c| !c.mapping.contains_key("randomField")));
    // The valid proposal survived, capped by the path-id override.
    let kept = outcome
        .candidates
        .iter()
        .find(|c| c.mapping.contains_key("id"))
        .unwrap();
    assert!(kept.confidence <= 0.6);

    let persisted = store
        .list_candidates_for_project(&project.id)
        .await
        .unwrap();
    assert!(persisted
        .iter()
        .all(|c| !c.mapping.contains_key("randomField")));
}

#[tokio::test]
async fn llm_failure_keeps_deterministic_candidates() {
    let store = MemoryStore::new();
    let project = create_project(&store, "llm-down").await;

    SpecIngestor::ingest(&store, &project.id, SpecSource::Inline(orders_spec()))
        .await
        .unwrap();

    let outcome = analyze(&store, &FailingChat, &project).await;
    assert!(outcome.failed_batches >= 1);
    assert!(
        !outcome.candidates.is_empty(),
        "deterministic candidates must survive LLM failures"
    );
}

#[tokio::test]
async fn reingest_is_idempotent() {
    let store = MemoryStore::new();
    let project = create_project(&store, "reingest").await;

    let first = SpecIngestor::ingest(&store, &project.id, SpecSource::Inline(orders_spec()))
        .await
        .unwrap();
    let apis_before = store.list_apis_for_project(&project.id).await.unwrap();
    let mut variable_counts_before = Vec::new();
    for api in &apis_before {
        variable_counts_before.push(store.list_variables_for_api(&api.id).await.unwrap().len());
    }

    let second = SpecIngestor::ingest(&store, &project.id, SpecSource::Inline(orders_spec()))
        .await
        .unwrap();

    let mut first_sorted = first.clone();
    first_sorted.sort();
    let mut second_sorted = second.clone();
    second_sorted.sort();
    assert_eq!(first_sorted, second_sorted);

    let apis_after = store.list_apis_for_project(&project.id).await.unwrap();
    assert_eq!(apis_before.len(), apis_after.len());
    for (api_before, api_after) in apis_before.iter().zip(apis_after.iter()) {
        // Same catalog rows, no duplicated children.
        assert_eq!(api_before.id, api_after.id);
    }
    let mut variable_counts_after = Vec::new();
    for api in &apis_after {
        variable_counts_after.push(store.list_variables_for_api(&api.id).await.unwrap().len());
    }
    assert_eq!(variable_counts_before, variable_counts_after);

    for api in &apis_after {
        let responses = store.list_responses_for_api(&api.id).await.unwrap();
        let mut codes: Vec<u16> = responses.iter().map(|r| r.status_code).collect();
        codes.dedup();
        assert_eq!(codes.len(), responses.len(), "duplicate status codes");
        assert!(store.get_request_for_api(&api.id).await.unwrap().is_some());
    }
}

#[tokio::test]
async fn project_deletion_detaches_run_history() {
    let store = MemoryStore::new();
    let project = create_project(&store, "cascade").await;

    SpecIngestor::ingest(&store, &project.id, SpecSource::Inline(orders_spec()))
        .await
        .unwrap();

    let environment = spawn_target_server().await;
    let store = Arc::new(store);
    let run = RunExecutor::new(Arc::clone(&store))
        .execute_run(&project.id, &environment)
        .await
        .unwrap();
    assert_eq!(run.status, RunStatus::Completed);

    assert!(store.delete_project(&project.id).await.unwrap());
    assert!(store.get_project(&project.id).await.unwrap().is_none());
    assert!(store
        .list_apis_for_project(&project.id)
        .await
        .unwrap()
        .is_empty());
    assert!(store
        .list_candidates_for_project(&project.id)
        .await
        .unwrap()
        .is_empty());

    // Run history survives with a detached project reference.
    let detached = store.get_run(&run.id).await.unwrap().unwrap();
    assert_eq!(detached.project_id, None);
}
