use thiserror::Error;

/// Domain failures of the orchestration core. Ingest and registry errors
/// propagate to the caller atomically; analyzer and executor failures are
/// absorbed per item and recorded on the owning rows.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("invalid spec: {0}")]
    InvalidSpec(String),

    #[error("unsupported OpenAPI version: {0}")]
    UnsupportedVersion(String),

    #[error("schema is not JSON-serializable: {0}")]
    UnserializableSchema(String),

    #[error("dependency graph contains a cycle")]
    CycleDetected,

    #[error("dependency source and target are the same endpoint: {0}")]
    SelfDependency(String),

    #[error("LLM batch failed: {0}")]
    LlmBatchFailed(String),
}
