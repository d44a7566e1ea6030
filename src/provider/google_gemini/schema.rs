use serde_json::{Map, Value};

use crate::schema::{SchemaDescription, visit_schema_mut};

/// Keywords of the OpenAPI subset accepted by `responseSchema`.
const ALLOWED_KEYS: [&str; 13] = [
    "type",
    "description",
    "nullable",
    "enum",
    "properties",
    "required",
    "items",
    "minItems",
    "maxItems",
    "minimum",
    "maximum",
    "anyOf",
    "propertyOrdering",
];

/// Rewrites a draft-07 schema into Gemini's `responseSchema` dialect.
///
/// References are inlined, `["T", "null"]` becomes `type: T, nullable: true`, null
/// branches of `anyOf` collapse the same way, and unsupported keywords are dropped.
pub(crate) fn response_schema(schema: &SchemaDescription) -> Value {
    let mut shaped = schema.resolved();
    visit_schema_mut(&mut shaped, &mut shape_node);
    shaped
}

fn shape_node(node: &mut Map<String, Value>) {
    if let Some(Value::Array(branches)) = node.remove("oneOf") {
        node.insert("anyOf".to_string(), Value::Array(branches));
    }
    collapse_all_of(node);
    collapse_null_branches(node);
    collapse_type_list(node);
    node.retain(|key, _| ALLOWED_KEYS.contains(&key.as_str()));
}

fn merge_into(node: &mut Map<String, Value>, branch: Value) {
    if let Value::Object(branch) = branch {
        for (key, value) in branch {
            node.entry(key).or_insert(value);
        }
    }
}

fn collapse_all_of(node: &mut Map<String, Value>) {
    let single = matches!(node.get("allOf"), Some(Value::Array(branches)) if branches.len() == 1);
    if single {
        if let Some(Value::Array(mut branches)) = node.remove("allOf") {
            if let Some(branch) = branches.pop() {
                merge_into(node, branch);
            }
        }
    }
}

fn is_null_branch(branch: &Value) -> bool {
    branch.get("type").and_then(Value::as_str) == Some("null")
}

fn collapse_null_branches(node: &mut Map<String, Value>) {
    let Some(Value::Array(branches)) = node.remove("anyOf") else {
        return;
    };
    let before = branches.len();
    let mut branches: Vec<Value> = branches.into_iter().filter(|b| !is_null_branch(b)).collect();
    if branches.len() != before {
        node.insert("nullable".to_string(), Value::Bool(true));
    }
    match branches.len() {
        0 => {}
        1 => {
            if let Some(branch) = branches.pop() {
                merge_into(node, branch);
            }
        }
        _ => {
            node.insert("anyOf".to_string(), Value::Array(branches));
        }
    }
}

fn collapse_type_list(node: &mut Map<String, Value>) {
    let Some(Value::Array(types)) = node.get("type") else {
        return;
    };
    let mut names: Vec<String> = types
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect();
    let nullable = names.iter().any(|name| name == "null");
    names.retain(|name| name != "null");
    node.remove("type");
    if nullable {
        node.insert("nullable".to_string(), Value::Bool(true));
    }
    match names.len() {
        0 => {}
        1 => {
            node.insert("type".to_string(), Value::String(names.remove(0)));
        }
        _ => {
            let branches = names
                .into_iter()
                .map(|name| serde_json::json!({ "type": name }))
                .collect();
            node.insert("anyOf".to_string(), Value::Array(branches));
        }
    }
}
