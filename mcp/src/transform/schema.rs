//! JSON Schema sanitizer for model function-calling parameters.
//!
//! Provider schemas often carry keywords that function-calling APIs reject
//! (`$schema`, `$ref`, `$defs`, vendor extensions). The sanitizer keeps an
//! allow-listed subset, recursing through every place a subschema can appear.
//! Property names are data and pass through untouched.

use serde_json::{Map, Value};

/// Keywords kept at every schema level.
const ALLOWED_KEYWORDS: &[&str] = &[
    "type",
    "properties",
    "required",
    "items",
    "enum",
    "const",
    "description",
    "title",
    "default",
    "format",
    "examples",
    "anyOf",
    "oneOf",
    "allOf",
    "not",
    "minimum",
    "maximum",
    "exclusiveMinimum",
    "exclusiveMaximum",
    "multipleOf",
    "minLength",
    "maxLength",
    "pattern",
    "minItems",
    "maxItems",
    "uniqueItems",
    "minProperties",
    "maxProperties",
    "additionalProperties",
    "nullable",
];

/// Sanitize a tool input schema for use as function parameters.
///
/// The root always comes out as an object schema with a `properties` map.
/// Sanitizing an already sanitized schema returns it unchanged.
pub fn sanitize_schema(schema: &Value) -> Value {
    let mut root = match schema {
        Value::Object(map) => sanitize_object(map),
        _ => Map::new(),
    };
    root.entry("type")
        .or_insert_with(|| Value::String("object".to_string()));
    ensure_properties(&mut root);
    Value::Object(root)
}

/// Convenience for rmcp's `input_schema` map.
pub fn sanitize_input_schema(schema: &Map<String, Value>) -> Value {
    let mut root = sanitize_object(schema);
    root.entry("type")
        .or_insert_with(|| Value::String("object".to_string()));
    ensure_properties(&mut root);
    Value::Object(root)
}

fn sanitize_node(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut cleaned = sanitize_object(map);
            ensure_properties(&mut cleaned);
            Value::Object(cleaned)
        }
        other => other.clone(),
    }
}

fn sanitize_object(map: &Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    for (key, value) in map {
        if key.starts_with('$') || !ALLOWED_KEYWORDS.contains(&key.as_str()) {
            continue;
        }
        let cleaned = match key.as_str() {
            "properties" => match value {
                Value::Object(props) => Value::Object(
                    props
                        .iter()
                        .map(|(name, schema)| (name.clone(), sanitize_node(schema)))
                        .collect(),
                ),
                _ => continue,
            },
            "items" => match value {
                Value::Array(items) => Value::Array(items.iter().map(sanitize_node).collect()),
                Value::Object(_) => sanitize_node(value),
                _ => continue,
            },
            "anyOf" | "oneOf" | "allOf" => match value {
                Value::Array(variants) => {
                    Value::Array(variants.iter().map(sanitize_node).collect())
                }
                _ => continue,
            },
            "not" => match value {
                Value::Object(_) => sanitize_node(value),
                _ => continue,
            },
            "additionalProperties" => match value {
                Value::Object(_) => sanitize_node(value),
                Value::Bool(_) => value.clone(),
                _ => continue,
            },
            "required" => match value {
                Value::Array(names) => Value::Array(dedup_required(names)),
                _ => continue,
            },
            _ => value.clone(),
        };
        out.insert(key.clone(), cleaned);
    }
    out
}

/// String entries only, first occurrence wins.
fn dedup_required(names: &[Value]) -> Vec<Value> {
    let mut seen: Vec<&str> = Vec::with_capacity(names.len());
    for name in names {
        if let Value::String(name) = name {
            if !seen.contains(&name.as_str()) {
                seen.push(name);
            }
        }
    }
    seen.into_iter()
        .map(|name| Value::String(name.to_string()))
        .collect()
}

fn is_object_type(schema: &Map<String, Value>) -> bool {
    match schema.get("type") {
        Some(Value::String(t)) => t == "object",
        Some(Value::Array(types)) => types.iter().any(|t| t == "object"),
        _ => false,
    }
}

fn ensure_properties(schema: &mut Map<String, Value>) {
    if is_object_type(schema) && !schema.contains_key("properties") {
        schema.insert("properties".to_string(), Value::Object(Map::new()));
    }
}
