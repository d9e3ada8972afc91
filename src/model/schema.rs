use serde_json::Value;

/// Classification of an OpenAPI schema fragment. The extractor's descent is a
/// total function over this sum; anything it cannot place is `Unknown` and
/// produces no variables beneath it.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaShape<'a> {
    Object {
        properties: Vec<(&'a str, &'a Value)>,
        required: Vec<&'a str>,
    },
    Array {
        items: &'a Value,
    },
    Composite {
        variants: Vec<&'a Value>,
    },
    Primitive {
        type_name: &'a str,
        format: Option<&'a str>,
    },
    Unknown,
}

impl<'a> SchemaShape<'a> {
    pub fn classify(schema: &'a Value) -> Self {
        let Some(obj) = schema.as_object() else {
            return SchemaShape::Unknown;
        };

        let type_name = obj.get("type").and_then(Value::as_str);

        if type_name == Some("object") || obj.contains_key("properties") {
            let properties = obj
                .get("properties")
                .and_then(Value::as_object)
                .map(|props| props.iter().map(|(k, v)| (k.as_str(), v)).collect())
                .unwrap_or_default();
            let required = obj
                .get("required")
                .and_then(Value::as_array)
                .map(|names| names.iter().filter_map(Value::as_str).collect())
                .unwrap_or_default();
            return SchemaShape::Object {
                properties,
                required,
            };
        }

        if type_name == Some("array") || obj.contains_key("items") {
            if let Some(items) = obj.get("items") {
                return SchemaShape::Array { items };
            }
            return SchemaShape::Unknown;
        }

        if let Some(variants) = composite_variants(schema) {
            return SchemaShape::Composite { variants };
        }

        if let Some(type_name) = type_name {
            return SchemaShape::Primitive {
                type_name,
                format: obj.get("format").and_then(Value::as_str),
            };
        }

        SchemaShape::Unknown
    }
}

/// Variants under `allOf`/`oneOf`/`anyOf`, regardless of how the rest of the
/// schema classifies. A schema may carry both `properties` and `allOf`; the
/// extractor descends both.
pub fn composite_variants(schema: &Value) -> Option<Vec<&Value>> {
    let obj = schema.as_object()?;
    let mut variants = Vec::new();
    for key in ["allOf", "oneOf", "anyOf"] {
        if let Some(list) = obj.get(key).and_then(Value::as_array) {
            variants.extend(list.iter());
        }
    }
    if variants.is_empty() {
        None
    } else {
        Some(variants)
    }
}

/// `type` when present, `type(format)` when format is present, `unknown`
/// otherwise.
pub fn data_type_of(schema: &Value) -> String {
    let type_name = schema.get("type").and_then(Value::as_str);
    let format = schema.get("format").and_then(Value::as_str);
    match (type_name, format) {
        (Some(t), Some(f)) => format!("{}({})", t, f),
        (Some(t), None) => t.to_string(),
        (None, _) => "unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classifies_object_with_required() {
        let schema = json!({
            "type": "object",
            "properties": {"id": {"type": "string"}},
            "required": ["id"]
        });
        match SchemaShape::classify(&schema) {
            SchemaShape::Object {
                properties,
                required,
            } => {
                assert_eq!(properties.len(), 1);
                assert_eq!(required, vec!["id"]);
            }
            other => panic!("expected object, got {:?}", other),
        }
    }

    #[test]
    fn classifies_primitive_with_format() {
        let schema = json!({"type": "string", "format": "date-time"});
        assert_eq!(
            SchemaShape::classify(&schema),
            SchemaShape::Primitive {
                type_name: "string",
                format: Some("date-time"),
            }
        );
        assert_eq!(data_type_of(&schema), "string(date-time)");
    }

    #[test]
    fn classifies_composite_and_unknowns() {
        let composite = json!({"oneOf": [{"type": "string"}, {"type": "integer"}]});
        match SchemaShape::classify(&composite) {
            SchemaShape::Composite { variants } => assert_eq!(variants.len(), 2),
            other => panic!("expected composite, got {:?}", other),
        }

        assert_eq!(SchemaShape::classify(&json!(true)), SchemaShape::Unknown);
        assert_eq!(SchemaShape::classify(&json!({})), SchemaShape::Unknown);
        assert_eq!(data_type_of(&json!({})), "unknown");
    }
}
