//! Spec ingestion: load, validate and dereference an OpenAPI 3.x document,
//! then write the normalized catalog in one atomic store operation.

use crate::error::CoreError;
use crate::logic::extract::VariableExtractor;
use crate::model::{ApiImport, ApiSpec, CatalogImport, Id, VarLocation};
use crate::store::traits::Store;
use anyhow::{anyhow, Context, Result};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Where an OpenAPI document comes from.
#[derive(Debug, Clone)]
pub enum SpecSource {
    Url(String),
    Path(PathBuf),
    Inline(Value),
}

impl SpecSource {
    fn describe(&self) -> String {
        match self {
            SpecSource::Url(url) => url.clone(),
            SpecSource::Path(path) => path.display().to_string(),
            SpecSource::Inline(_) => "inline".to_string(),
        }
    }
}

/// Path-item keys that are not operations.
const NON_OPERATION_KEYS: [&str; 5] = ["parameters", "servers", "summary", "description", "$ref"];

const MAX_REF_DEPTH: usize = 64;

pub struct SpecIngestor;

impl SpecIngestor {
    /// Ingest a document into the project catalog. Returns the (method, path)
    /// pairs written; on any failure nothing is written.
    pub async fn ingest<S: Store>(
        store: &S,
        project_id: &Id,
        source: SpecSource,
    ) -> Result<Vec<(String, String)>> {
        let src_ref = source.describe();
        let document = load_document(&source).await?;
        validate_document(&document)?;
        let document = dereference(&document)?;

        let spec_hash = spec_hash(&document);
        let reuse_existing_spec = match store.find_spec_by_hash(project_id, &spec_hash).await? {
            Some(existing) => {
                log::warn!(
                    "spec {} already ingested for project {}; performing idempotent update",
                    existing.spec_hash,
                    project_id
                );
                true
            }
            None => false,
        };

        let version = document
            .pointer("/info/version")
            .and_then(Value::as_str)
            .or_else(|| document.get("openapi").and_then(Value::as_str))
            .unwrap_or("unknown")
            .to_string();

        let apis = collect_operations(&document)?;
        let import = CatalogImport {
            project_id: project_id.clone(),
            spec: ApiSpec::new(project_id.clone(), version, spec_hash, src_ref),
            reuse_existing_spec,
            apis,
        };

        let written = store
            .import_catalog(import)
            .await
            .context("Catalog import failed")?;
        log::info!(
            "ingested {} endpoints into project {}",
            written.len(),
            project_id
        );
        Ok(written)
    }
}

async fn load_document(source: &SpecSource) -> Result<Value> {
    match source {
        SpecSource::Inline(value) => Ok(value.clone()),
        SpecSource::Path(path) => {
            let text = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read spec file {}", path.display()))?;
            parse_document(&text)
        }
        SpecSource::Url(url) => {
            let text = reqwest::Client::new()
                .get(url)
                .send()
                .await
                .with_context(|| format!("Failed to fetch spec from {}", url))?
                .error_for_status()
                .with_context(|| format!("Spec fetch from {} failed", url))?
                .text()
                .await
                .context("Failed to read spec response body")?;
            parse_document(&text)
        }
    }
}

/// JSON first, YAML second; both failing is an invalid spec.
pub fn parse_document(text: &str) -> Result<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return Ok(value);
    }
    serde_yaml::from_str::<Value>(text)
        .map_err(|err| CoreError::InvalidSpec(format!("not JSON or YAML: {}", err)).into())
}

pub fn validate_document(document: &Value) -> Result<()> {
    let Some(obj) = document.as_object() else {
        return Err(CoreError::InvalidSpec("document is not an object".to_string()).into());
    };
    let Some(openapi) = obj.get("openapi").and_then(Value::as_str) else {
        return Err(CoreError::InvalidSpec("missing 'openapi' field".to_string()).into());
    };
    if !openapi.starts_with("3.") {
        return Err(CoreError::UnsupportedVersion(openapi.to_string()).into());
    }
    if !obj.get("paths").map(Value::is_object).unwrap_or(false) {
        return Err(CoreError::InvalidSpec("missing 'paths' object".to_string()).into());
    }
    Ok(())
}

/// Fully resolve internal `$ref`s. A ref that is already being resolved
/// (a cycle) is left in place; the extractor treats it as unknown. External
/// refs are rejected.
pub fn dereference(document: &Value) -> Result<Value> {
    let mut stack = Vec::new();
    resolve_node(document, document, &mut stack, 0)
}

fn resolve_node(
    node: &Value,
    root: &Value,
    stack: &mut Vec<String>,
    depth: usize,
) -> Result<Value> {
    if depth > MAX_REF_DEPTH {
        return Err(CoreError::InvalidSpec("$ref nesting too deep".to_string()).into());
    }

    if let Some(reference) = node.get("$ref").and_then(Value::as_str) {
        let Some(pointer) = reference.strip_prefix('#') else {
            return Err(
                CoreError::InvalidSpec(format!("external $ref '{}' unsupported", reference))
                    .into(),
            );
        };
        if stack.iter().any(|seen| seen == reference) {
            // Cyclic reference: keep the node unresolved.
            return Ok(node.clone());
        }
        let Some(target) = root.pointer(pointer) else {
            return Err(CoreError::InvalidSpec(format!("unresolvable $ref '{}'", reference)).into());
        };
        stack.push(reference.to_string());
        let resolved = resolve_node(target, root, stack, depth + 1)?;
        stack.pop();
        return Ok(resolved);
    }

    match node {
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, value) in map {
                out.insert(key.clone(), resolve_node(value, root, stack, depth + 1)?);
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(resolve_node(item, root, stack, depth + 1)?);
            }
            Ok(Value::Array(out))
        }
        other => Ok(other.clone()),
    }
}

/// Sha256 over a canonical serialization (object keys sorted recursively) so
/// semantically identical documents hash identically.
pub fn spec_hash(document: &Value) -> String {
    let mut hasher = Sha256::new();
    let mut buffer = String::new();
    write_canonical(document, &mut buffer);
    hasher.update(buffer.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            out.push('{');
            for (i, (key, value)) in sorted.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).unwrap_or_default());
                out.push(':');
                write_canonical(value, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

fn collect_operations(document: &Value) -> Result<Vec<ApiImport>> {
    let paths = document
        .get("paths")
        .and_then(Value::as_object)
        .ok_or_else(|| anyhow!("paths disappeared after dereferencing"))?;

    let mut imports = Vec::new();
    for (path, path_item) in paths {
        let Some(path_item_obj) = path_item.as_object() else {
            continue;
        };
        let path_level_params: Vec<Value> = path_item_obj
            .get("parameters")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        for (key, operation) in path_item_obj {
            if NON_OPERATION_KEYS.contains(&key.as_str()) || key.starts_with("x-") {
                continue;
            }
            let Some(op) = operation.as_object() else {
                continue;
            };
            imports.push(build_operation_import(
                document,
                path,
                path_item,
                key,
                op,
                &path_level_params,
            )?);
        }
    }
    Ok(imports)
}

fn build_operation_import(
    document: &Value,
    path: &str,
    path_item: &Value,
    method_key: &str,
    op: &Map<String, Value>,
    path_level_params: &[Value],
) -> Result<ApiImport> {
    let method = method_key.to_uppercase();

    // Path-item parameters apply to every operation beneath it; an
    // operation-level parameter with the same (name, in) wins.
    let mut parameters: Vec<Value> = path_level_params.to_vec();
    if let Some(op_params) = op.get("parameters").and_then(Value::as_array) {
        for param in op_params {
            let key = param_key(param);
            parameters.retain(|existing| param_key(existing) != key);
            parameters.push(param.clone());
        }
    }

    let mut query_params = BTreeMap::new();
    let mut path_params = BTreeMap::new();
    let mut headers = BTreeMap::new();
    for param in &parameters {
        let Some(name) = param.get("name").and_then(Value::as_str) else {
            continue;
        };
        let schema = param.get("schema").cloned().unwrap_or_else(|| json!({}));
        match param.get("in").and_then(Value::as_str) {
            Some("query") => {
                query_params.insert(name.to_string(), schema);
            }
            Some("path") => {
                path_params.insert(name.to_string(), schema);
            }
            Some("header") => {
                headers.insert(name.to_string(), schema);
            }
            _ => {}
        }
    }

    let body_schema = op
        .get("requestBody")
        .and_then(|body| body.get("content"))
        .and_then(Value::as_object)
        .and_then(pick_content_schema);

    let mut responses = Vec::new();
    if let Some(declared) = op.get("responses").and_then(Value::as_object) {
        for (code, response) in declared {
            // Non-numeric keys like `default` are skipped.
            let Ok(status_code) = code.parse::<u16>() else {
                continue;
            };
            let schema = response
                .get("content")
                .and_then(Value::as_object)
                .and_then(pick_content_schema)
                .unwrap_or_else(|| json!({}));
            serde_json::to_string(&schema)
                .map_err(|err| CoreError::UnserializableSchema(err.to_string()))?;
            responses.push((status_code, schema));
        }
    }

    let auth_scheme = effective_auth_scheme(document, op, path_item);
    if auth_scheme.is_some() && !headers.contains_key("Authorization") {
        headers.insert("Authorization".to_string(), json!({"type": "string"}));
    }

    let mut variables = VariableExtractor::parameter_variables(&parameters);
    if let Some(schema) = &body_schema {
        variables.extend(VariableExtractor::body_input_variables(schema));
    }
    if auth_scheme.is_some() {
        let already_declared = variables
            .iter()
            .any(|v| v.name == "Authorization" && v.location == VarLocation::Header);
        if !already_declared {
            variables.push(VariableExtractor::auth_header_seed());
        }
    }

    Ok(ApiImport {
        method,
        path: path.to_string(),
        operation_id: op
            .get("operationId")
            .and_then(Value::as_str)
            .map(str::to_string),
        summary: op.get("summary").and_then(Value::as_str).map(str::to_string),
        auth_scheme,
        body_schema,
        query_params,
        path_params,
        headers,
        responses,
        variables,
    })
}

fn param_key(param: &Value) -> (String, String) {
    (
        param
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        param
            .get("in")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    )
}

/// Content-type preference: json, then multipart, then urlencoded, then
/// whatever comes first.
fn pick_content_schema(content: &Map<String, Value>) -> Option<Value> {
    let pick = |needle: &str| {
        content
            .iter()
            .find(|(key, _)| key.contains(needle))
            .map(|(_, media)| media)
    };
    let media = pick("json")
        .or_else(|| pick("multipart"))
        .or_else(|| pick("urlencoded"))
        .or_else(|| content.values().next())?;
    media.get("schema").cloned()
}

/// The effective security is the first non-null of the operation's, the path
/// item's and the document's `security`. Returns the scheme kind when any
/// referenced scheme is http+bearer or oauth2.
fn effective_auth_scheme(
    document: &Value,
    op: &Map<String, Value>,
    path_item: &Value,
) -> Option<String> {
    let security = op
        .get("security")
        .or_else(|| path_item.get("security"))
        .or_else(|| document.get("security"))?
        .as_array()?;

    let schemes = document.pointer("/components/securitySchemes")?;
    for requirement in security {
        let Some(names) = requirement.as_object() else {
            continue;
        };
        for name in names.keys() {
            let Some(scheme) = schemes.get(name) else {
                continue;
            };
            let kind = scheme.get("type").and_then(Value::as_str);
            match kind {
                Some("http") => {
                    if scheme.get("scheme").and_then(Value::as_str) == Some("bearer") {
                        return Some("bearer".to_string());
                    }
                }
                Some("oauth2") => return Some("oauth2".to_string()),
                _ => {}
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_3x_versions() {
        let swagger = json!({"openapi": "2.0", "paths": {}});
        let err = validate_document(&swagger).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CoreError>(),
            Some(CoreError::UnsupportedVersion(_))
        ));

        let future = json!({"openapi": "4.0.0", "paths": {}});
        assert!(validate_document(&future).is_err());

        let ok = json!({"openapi": "3.0.3", "paths": {}});
        assert!(validate_document(&ok).is_ok());
    }

    #[test]
    fn rejects_documents_without_paths() {
        let doc = json!({"openapi": "3.1.0"});
        let err = validate_document(&doc).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CoreError>(),
            Some(CoreError::InvalidSpec(_))
        ));
    }

    #[test]
    fn parses_yaml_documents() {
        let doc = parse_document("openapi: 3.0.0\npaths: {}\n").unwrap();
        assert_eq!(doc["openapi"], "3.0.0");
    }

    #[test]
    fn resolves_refs_and_leaves_cycles_alone() {
        let doc = json!({
            "openapi": "3.0.0",
            "paths": {},
            "components": {
                "schemas": {
                    "Node": {
                        "type": "object",
                        "properties": {
                            "name": {"type": "string"},
                            "next": {"$ref": "#/components/schemas/Node"}
                        }
                    },
                    "Wrapper": {"$ref": "#/components/schemas/Node"}
                }
            }
        });

        let resolved = dereference(&doc).unwrap();
        let wrapper = resolved.pointer("/components/schemas/Wrapper").unwrap();
        assert_eq!(wrapper.pointer("/properties/name/type").unwrap(), "string");
        // The self-reference stays an unresolved $ref.
        assert!(wrapper.pointer("/properties/next/$ref").is_some());
    }

    #[test]
    fn hash_is_stable_under_key_order() {
        let a = json!({"b": 1, "a": {"y": 2, "x": 3}});
        let b = json!({"a": {"x": 3, "y": 2}, "b": 1});
        assert_eq!(spec_hash(&a), spec_hash(&b));
        assert_ne!(spec_hash(&a), spec_hash(&json!({"a": 1})));
    }

    #[test]
    fn content_type_preference_favors_json() {
        let both = json!({
            "application/json": {"schema": {"type": "object", "properties": {"a": {}}}},
            "multipart/form-data": {"schema": {"type": "object", "properties": {"f": {}}}}
        });
        let picked = pick_content_schema(both.as_object().unwrap()).unwrap();
        assert!(picked.pointer("/properties/a").is_some());

        let multipart_only = json!({
            "multipart/form-data": {"schema": {"type": "object", "properties": {"f": {}}}}
        });
        let picked = pick_content_schema(multipart_only.as_object().unwrap()).unwrap();
        assert!(picked.pointer("/properties/f").is_some());
    }

    #[test]
    fn operation_security_falls_through_to_document() {
        let doc = json!({
            "openapi": "3.0.0",
            "security": [{"bearerAuth": []}],
            "components": {
                "securitySchemes": {
                    "bearerAuth": {"type": "http", "scheme": "bearer"}
                }
            },
            "paths": {}
        });
        let op = Map::new();
        let path_item = json!({});
        assert_eq!(
            effective_auth_scheme(&doc, &op, &path_item),
            Some("bearer".to_string())
        );

        // An operation-level override takes precedence.
        let mut op_with_security = Map::new();
        op_with_security.insert("security".to_string(), json!([]));
        assert_eq!(
            effective_auth_scheme(&doc, &op_with_security, &path_item),
            None
        );
    }

    #[test]
    fn collects_operations_and_skips_path_item_keys() {
        let doc = json!({
            "openapi": "3.0.0",
            "paths": {
                "/orders": {
                    "summary": "orders collection",
                    "parameters": [
                        {"name": "tenant", "in": "query", "schema": {"type": "string"}}
                    ],
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
                            },
                            "default": {"description": "error"}
                        }
                    }
                }
            }
        });

        let imports = collect_operations(&doc).unwrap();
        assert_eq!(imports.len(), 1);
        let import = &imports[0];
        assert_eq!(import.method, "POST");
        assert_eq!(import.path, "/orders");
        assert_eq!(import.operation_id.as_deref(), Some("createOrder"));
        // Path-item query parameter was merged in.
        assert!(import.query_params.contains_key("tenant"));
        // `default` response is skipped.
        assert_eq!(import.responses.len(), 1);
        assert_eq!(import.responses[0].0, 201);
        let names: Vec<&str> = import.variables.iter().map(|v| v.name.as_str()).collect();
        assert!(names.contains(&"tenant"));
        assert!(names.contains(&"total"));
    }
}
