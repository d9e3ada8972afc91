//! Variable extraction: decomposes request schemas and parameter lists into
//! typed variable rows, and flattens response schemas into output fields.

use crate::model::{
    composite_variants, data_type_of, SchemaShape, VarLocation, VarType, VariableSeed,
};
use serde_json::Value;

/// Recursion guard for pathological or cyclic schema graphs. Unresolved
/// cyclic refs classify as Unknown and stop on their own; the bound catches
/// everything else.
const MAX_SCHEMA_DEPTH: usize = 32;

/// A reachable leaf (or intermediate node) of a response schema.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputField {
    pub name: String,
    pub data_type: String,
}

pub struct VariableExtractor;

impl VariableExtractor {
    /// One variable per reachable node of a request body schema, qualified
    /// names dot-joined. `readOnly` properties are response-only and are
    /// excluded from input variables.
    pub fn body_input_variables(schema: &Value) -> Vec<VariableSeed> {
        let mut nodes = Vec::new();
        walk(schema, "", false, true, true, 0, &mut Vec::new(), &mut nodes);
        nodes
            .into_iter()
            .map(|node| VariableSeed {
                name: node.name,
                location: VarLocation::Body,
                var_type: VarType::UserInput,
                data_type: node.data_type,
                required: node.required,
            })
            .collect()
    }

    /// Flattened fields of a response schema, `readOnly` included.
    pub fn output_fields(schema: &Value) -> Vec<OutputField> {
        let mut nodes = Vec::new();
        walk(schema, "", false, true, false, 0, &mut Vec::new(), &mut nodes);
        nodes
            .into_iter()
            .map(|node| OutputField {
                name: node.name,
                data_type: node.data_type,
            })
            .collect()
    }

    /// One variable per OpenAPI parameter object. Path parameters are always
    /// required regardless of what the document claims.
    pub fn parameter_variables(parameters: &[Value]) -> Vec<VariableSeed> {
        let mut seeds = Vec::new();
        for param in parameters {
            let Some(name) = param.get("name").and_then(Value::as_str) else {
                continue;
            };
            let Some(location) = param
                .get("in")
                .and_then(Value::as_str)
                .and_then(VarLocation::parse)
            else {
                continue;
            };
            let declared_required = param
                .get("required")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            let data_type = param
                .get("schema")
                .map(data_type_of)
                .unwrap_or_else(|| "unknown".to_string());
            seeds.push(VariableSeed {
                name: name.to_string(),
                location,
                var_type: VarType::UserInput,
                data_type,
                required: location == VarLocation::Path || declared_required,
            });
        }
        seeds
    }

    /// The `Authorization` variable implied by a bearer/oauth2 security
    /// scheme.
    pub fn auth_header_seed() -> VariableSeed {
        VariableSeed {
            name: "Authorization".to_string(),
            location: VarLocation::Header,
            var_type: VarType::Synthetic,
            data_type: "string".to_string(),
            required: true,
        }
    }
}

#[derive(Debug)]
struct SchemaNode {
    name: String,
    data_type: String,
    required: bool,
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

#[allow(clippy::too_many_arguments)]
fn walk(
    schema: &Value,
    prefix: &str,
    required: bool,
    emit_self: bool,
    skip_read_only: bool,
    depth: usize,
    visiting: &mut Vec<*const Value>,
    out: &mut Vec<SchemaNode>,
) {
    if depth > MAX_SCHEMA_DEPTH {
        return;
    }
    let identity = schema as *const Value;
    if visiting.contains(&identity) {
        return;
    }
    if skip_read_only
        && schema
            .get("readOnly")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    {
        return;
    }
    visiting.push(identity);

    match SchemaShape::classify(schema) {
        SchemaShape::Object {
            properties,
            required: required_names,
        } => {
            if emit_self && !prefix.is_empty() {
                out.push(SchemaNode {
                    name: prefix.to_string(),
                    data_type: "object".to_string(),
                    required,
                });
            }
            for (name, prop) in properties {
                let child_required = required_names.contains(&name);
                walk(
                    prop,
                    &join(prefix, name),
                    child_required,
                    true,
                    skip_read_only,
                    depth + 1,
                    visiting,
                    out,
                );
            }
            // A schema may carry properties and allOf/oneOf/anyOf at once.
            if let Some(variants) = composite_variants(schema) {
                for variant in variants {
                    walk(
                        variant,
                        prefix,
                        required,
                        false,
                        skip_read_only,
                        depth + 1,
                        visiting,
                        out,
                    );
                }
            }
        }
        SchemaShape::Array { items } => {
            if emit_self && !prefix.is_empty() {
                out.push(SchemaNode {
                    name: prefix.to_string(),
                    data_type: data_type_of(schema),
                    required,
                });
            }
            // Item fields surface under the array's own name.
            walk(
                items,
                prefix,
                false,
                false,
                skip_read_only,
                depth + 1,
                visiting,
                out,
            );
        }
        SchemaShape::Composite { variants } => {
            if emit_self && !prefix.is_empty() {
                out.push(SchemaNode {
                    name: prefix.to_string(),
                    data_type: data_type_of(schema),
                    required,
                });
            }
            for variant in variants {
                walk(
                    variant,
                    prefix,
                    required,
                    false,
                    skip_read_only,
                    depth + 1,
                    visiting,
                    out,
                );
            }
        }
        SchemaShape::Primitive { .. } | SchemaShape::Unknown => {
            if emit_self && !prefix.is_empty() {
                out.push(SchemaNode {
                    name: prefix.to_string(),
                    data_type: data_type_of(schema),
                    required,
                });
            }
        }
    }

    visiting.pop();
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn names(seeds: &[VariableSeed]) -> Vec<&str> {
        seeds.iter().map(|s| s.name.as_str()).collect()
    }

    #[test]
    fn extracts_nested_body_variables() {
        let schema = json!({
            "type": "object",
            "properties": {
                "user": {
                    "type": "object",
                    "properties": {
                        "name": {"type": "string"},
                        "age": {"type": "integer", "format": "int32"}
                    },
                    "required": ["name"]
                },
                "tags": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["user"]
        });

        let seeds = VariableExtractor::body_input_variables(&schema);
        assert_eq!(names(&seeds), vec!["user", "user.name", "user.age", "tags"]);

        let user = &seeds[0];
        assert_eq!(user.data_type, "object");
        assert!(user.required);
        let name = &seeds[1];
        assert!(name.required);
        assert_eq!(name.data_type, "string");
        let age = &seeds[2];
        assert!(!age.required);
        assert_eq!(age.data_type, "integer(int32)");
    }

    #[test]
    fn read_only_properties_are_not_inputs() {
        let schema = json!({
            "type": "object",
            "properties": {
                "id": {"type": "string", "readOnly": true},
                "name": {"type": "string"}
            }
        });

        let seeds = VariableExtractor::body_input_variables(&schema);
        assert_eq!(names(&seeds), vec!["name"]);

        // Output flattening keeps readOnly fields.
        let fields = VariableExtractor::output_fields(&schema);
        let field_names: Vec<&str> = fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(field_names, vec!["id", "name"]);
    }

    #[test]
    fn descends_composites() {
        let schema = json!({
            "allOf": [
                {"type": "object", "properties": {"a": {"type": "string"}}},
                {"type": "object", "properties": {"b": {"type": "number"}}}
            ]
        });

        let seeds = VariableExtractor::body_input_variables(&schema);
        assert_eq!(names(&seeds), vec!["a", "b"]);
    }

    #[test]
    fn array_item_fields_surface_under_array_name() {
        let schema = json!({
            "type": "object",
            "properties": {
                "items": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {"sku": {"type": "string"}}
                    }
                }
            }
        });

        let seeds = VariableExtractor::body_input_variables(&schema);
        assert_eq!(names(&seeds), vec!["items", "items.sku"]);
        assert_eq!(seeds[0].data_type, "array");
    }

    #[test]
    fn parameter_variables_force_required_paths() {
        let params = vec![
            json!({"name": "id", "in": "path", "required": false, "schema": {"type": "string"}}),
            json!({"name": "limit", "in": "query", "schema": {"type": "integer"}}),
            json!({"name": "X-Trace", "in": "header", "required": true, "schema": {"type": "string"}}),
        ];

        let seeds = VariableExtractor::parameter_variables(&params);
        assert_eq!(seeds.len(), 3);
        assert!(seeds[0].required, "path params are always required");
        assert_eq!(seeds[0].location, VarLocation::Path);
        assert!(!seeds[1].required);
        assert_eq!(seeds[1].location, VarLocation::Query);
        assert!(seeds[2].required);
        assert_eq!(seeds[2].location, VarLocation::Header);
    }
}
