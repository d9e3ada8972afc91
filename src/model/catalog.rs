use crate::model::{generate_id, now_rfc3339, Id, VarLocation, VarType};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// One ingested OpenAPI document. `(project_id, spec_hash)` is unique; a
/// re-ingest of the same document reuses the existing row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiSpec {
    pub id: Id,
    pub project_id: Id,
    pub version: String,
    pub spec_hash: String,
    pub src_ref: String,
    pub created_at: String, // ISO 8601 timestamp
}

impl ApiSpec {
    pub fn new(project_id: Id, version: String, spec_hash: String, src_ref: String) -> Self {
        Self {
            id: generate_id(),
            project_id,
            version,
            spec_hash,
            src_ref,
            created_at: now_rfc3339(),
        }
    }
}

/// A single (method, path) endpoint within a project's catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Api {
    pub id: Id,
    pub project_id: Id,
    pub method: String, // always upper-case
    pub path: String,
    pub operation_id: Option<String>,
    pub summary: Option<String>,
    pub auth_scheme: Option<String>,
}

impl Api {
    pub fn route(&self) -> String {
        format!("{} {}", self.method, self.path)
    }
}

/// Exactly one per Api. Parameter maps are keyed by parameter name with the
/// OpenAPI schema as value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiRequest {
    pub api_id: Id,
    pub body_schema: Option<Value>,
    pub query_params: Option<Value>,
    pub path_params: Option<Value>,
    pub headers: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub api_id: Id,
    pub status_code: u16,
    pub schema: Value,
}

/// A typed input element of an endpoint. `(api_id, name, location)` is unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub api_id: Id,
    pub name: String,
    pub location: VarLocation,
    pub var_type: VarType,
    pub data_type: String,
    pub required: bool,
    pub ai_confidence: Option<f64>,
}

/// Everything the ingestor writes for one endpoint. Applied atomically as
/// part of a [`CatalogImport`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiImport {
    pub method: String,
    pub path: String,
    pub operation_id: Option<String>,
    pub summary: Option<String>,
    pub auth_scheme: Option<String>,
    pub body_schema: Option<Value>,
    pub query_params: BTreeMap<String, Value>,
    pub path_params: BTreeMap<String, Value>,
    pub headers: BTreeMap<String, Value>,
    pub responses: Vec<(u16, Value)>,
    pub variables: Vec<VariableSeed>,
}

/// Variable row before it is bound to an api id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableSeed {
    pub name: String,
    pub location: VarLocation,
    pub var_type: VarType,
    pub data_type: String,
    pub required: bool,
}

impl VariableSeed {
    pub fn into_variable(self, api_id: Id) -> Variable {
        Variable {
            api_id,
            name: self.name,
            location: self.location,
            var_type: self.var_type,
            data_type: self.data_type,
            required: self.required,
            ai_confidence: None,
        }
    }
}

/// The complete catalog write for one ingested document. The store applies it
/// all-or-nothing: spec upsert, api upserts keyed by (project, method, path),
/// child erase + rewrite per api.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogImport {
    pub project_id: Id,
    pub spec: ApiSpec,
    pub reuse_existing_spec: bool,
    pub apis: Vec<ApiImport>,
}
