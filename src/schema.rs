//! Structured-output contract.
//!
//! A [`SchemaDescription`] is derived once from a Rust type, handed to the vendor in
//! whichever dialect it understands, and then used again to validate what came back.
//! Vendors differ in how strictly they honor the requested shape, so every structured
//! response goes through [`parse`] or [`parse_value`] before reaching the caller.

use jsonschema::error::ValidationErrorKind;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::LLMError;

/// Named JSON Schema describing the shape a structured call must produce.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaDescription {
    /// Schema title, normally the Rust type name.
    pub name: String,
    /// Draft-07 JSON Schema as produced by `schemars`, `definitions` included.
    pub schema: Value,
}

/// Top-level field summary of a schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    /// JSON type name, `a|b` for unions, `any` when unconstrained.
    pub type_name: String,
    pub required: bool,
}

impl SchemaDescription {
    pub fn new(name: impl Into<String>, schema: Value) -> Self {
        Self {
            name: name.into(),
            schema,
        }
    }

    /// Returns the schema with every local `$ref` replaced by its definition.
    pub fn resolved(&self) -> Value {
        inline_refs(&self.schema)
    }

    /// Lists the top-level properties with their JSON type and required-ness.
    ///
    /// # Examples
    ///
    /// ```
    /// use llmify::schema::schema_of;
    ///
    /// #[derive(schemars::JsonSchema)]
    /// #[allow(dead_code)]
    /// struct Person {
    ///     name: String,
    ///     nickname: Option<String>,
    /// }
    ///
    /// let fields = schema_of::<Person>().fields();
    /// assert_eq!(fields[0].name, "name");
    /// assert!(fields[0].required);
    /// assert!(!fields[1].required);
    /// ```
    pub fn fields(&self) -> Vec<FieldSpec> {
        let resolved = self.resolved();
        let required = required_names(&resolved);
        let Some(properties) = resolved.get("properties").and_then(Value::as_object) else {
            return Vec::new();
        };
        properties
            .iter()
            .map(|(name, property)| FieldSpec {
                name: name.clone(),
                type_name: describe_type(property),
                required: required.iter().any(|r| r == name),
            })
            .collect()
    }

    /// Checks `value` against the schema, reporting every offending field at once.
    ///
    /// Every keyword the draft-07 schema carries is enforced, including bounds,
    /// lengths, patterns and `additionalProperties`.
    ///
    /// # Errors
    ///
    /// Returns [`LLMError::Validation`] whose `fields` lists each offending field path once.
    pub fn validate(&self, value: &Value) -> Result<(), LLMError> {
        let validator = jsonschema::validator_for(&self.schema).map_err(|err| {
            LLMError::validation(format!("schema for {} does not compile: {err}", self.name))
        })?;

        let mut details = Vec::new();
        let mut fields = Vec::new();
        for err in validator.iter_errors(value) {
            let field = match &err.kind {
                ValidationErrorKind::Required { property } => {
                    let parent = pointer_to_field(&err.instance_path.to_string());
                    match property.as_str() {
                        Some(name) if parent == ROOT => name.to_string(),
                        Some(name) => format!("{parent}.{name}"),
                        None => parent,
                    }
                }
                _ => pointer_to_field(&err.instance_path.to_string()),
            };
            details.push(format!("{field}: {err}"));
            fields.push(field);
        }
        if details.is_empty() {
            return Ok(());
        }

        fields.sort();
        fields.dedup();
        Err(LLMError::Validation {
            message: format!(
                "structured output does not match {}: {}",
                self.name,
                details.join("; ")
            ),
            fields,
        })
    }
}

/// Derives the schema description for `T`.
///
/// # Examples
///
/// ```
/// use llmify::schema::schema_of;
///
/// #[derive(schemars::JsonSchema)]
/// #[allow(dead_code)]
/// struct Person {
///     name: String,
///     age: u32,
/// }
///
/// let description = schema_of::<Person>();
/// assert_eq!(description.name, "Person");
/// assert_eq!(description.schema["type"], "object");
/// ```
pub fn schema_of<T: JsonSchema>() -> SchemaDescription {
    let root = schemars::schema_for!(T);
    let schema = serde_json::to_value(&root).unwrap_or_else(|_| Value::Object(Map::new()));
    let name = schema
        .get("title")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(T::schema_name);
    SchemaDescription::new(name, schema)
}

/// Decodes raw JSON, validates it against `schema`, then deserializes it into `T`.
///
/// Nothing is coerced: a missing or mistyped field fails the whole call.
///
/// # Errors
///
/// Returns [`LLMError::Validation`] for malformed JSON, schema mismatches, or values
/// that `T`'s `Deserialize` implementation rejects.
pub fn parse<T: DeserializeOwned>(
    raw: impl AsRef<[u8]>,
    schema: &SchemaDescription,
) -> Result<T, LLMError> {
    let value = decode_json(raw.as_ref())?;
    parse_value(value, schema)
}

/// Same as [`parse`] for an already-decoded value.
pub fn parse_value<T: DeserializeOwned>(
    value: Value,
    schema: &SchemaDescription,
) -> Result<T, LLMError> {
    schema.validate(&value)?;
    serde_json::from_value(value).map_err(|err| {
        let message = err.to_string();
        LLMError::Validation {
            fields: serde_field_hint(&message).into_iter().collect(),
            message: format!("structured output does not match {}: {message}", schema.name),
        }
    })
}

/// Decodes vendor text that is supposed to be a JSON document.
pub(crate) fn decode_json(raw: &[u8]) -> Result<Value, LLMError> {
    serde_json::from_slice(raw)
        .map_err(|err| LLMError::validation(format!("structured output is not valid JSON: {err}")))
}

/// Replaces local `$ref`s with their definitions and drops the definition table.
///
/// Recursive references are replaced by an unconstrained schema.
pub(crate) fn inline_refs(schema: &Value) -> Value {
    let mut root = schema.clone();
    let mut definitions = Map::new();
    if let Value::Object(map) = &mut root {
        for key in ["definitions", "$defs"] {
            if let Some(Value::Object(defs)) = map.remove(key) {
                definitions.extend(defs);
            }
        }
    }
    let mut stack = Vec::new();
    resolve_node(&root, &definitions, &mut stack)
}

fn resolve_node(node: &Value, definitions: &Map<String, Value>, stack: &mut Vec<String>) -> Value {
    match node {
        Value::Object(map) => {
            if let Some(reference) = map.get("$ref").and_then(Value::as_str) {
                let name = reference.rsplit('/').next().unwrap_or(reference).to_string();
                if stack.contains(&name) {
                    return Value::Object(Map::new());
                }
                let Some(target) = definitions.get(&name) else {
                    return node.clone();
                };
                stack.push(name);
                let mut inlined = resolve_node(target, definitions, stack);
                if let Value::Object(target_map) = &mut inlined {
                    for (key, value) in map.iter().filter(|(key, _)| *key != "$ref") {
                        target_map.insert(key.clone(), resolve_node(value, definitions, stack));
                    }
                }
                stack.pop();
                return inlined;
            }
            Value::Object(
                map.iter()
                    .map(|(key, value)| (key.clone(), resolve_node(value, definitions, stack)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| resolve_node(item, definitions, stack))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Calls `visit` on every schema node, parents before children.
///
/// Only structural positions are walked (`properties`, `items`, `definitions`,
/// combinators, `additionalProperties`), so a property that happens to be named
/// `format` or `title` is never mistaken for a keyword.
pub(crate) fn visit_schema_mut(node: &mut Value, visit: &mut dyn FnMut(&mut Map<String, Value>)) {
    let Value::Object(map) = node else {
        return;
    };
    visit(map);
    for key in ["properties", "definitions", "$defs"] {
        if let Some(Value::Object(children)) = map.get_mut(key) {
            for child in children.values_mut() {
                visit_schema_mut(child, visit);
            }
        }
    }
    for key in ["anyOf", "allOf", "oneOf"] {
        if let Some(Value::Array(children)) = map.get_mut(key) {
            for child in children {
                visit_schema_mut(child, visit);
            }
        }
    }
    match map.get_mut("items") {
        Some(Value::Array(children)) => {
            for child in children {
                visit_schema_mut(child, visit);
            }
        }
        Some(child) => visit_schema_mut(child, visit),
        None => {}
    }
    if let Some(child) = map.get_mut("additionalProperties") {
        visit_schema_mut(child, visit);
    }
}

/// Returns the schema's declared type names, empty when unconstrained.
pub(crate) fn type_names(schema: &Value) -> Vec<&str> {
    match schema.get("type") {
        Some(Value::String(name)) => vec![name.as_str()],
        Some(Value::Array(names)) => names.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    }
}

fn required_names(schema: &Value) -> Vec<String> {
    schema
        .get("required")
        .and_then(Value::as_array)
        .map(|names| {
            names
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn describe_type(schema: &Value) -> String {
    let names = type_names(schema);
    if !names.is_empty() {
        return names.join("|");
    }
    for key in ["anyOf", "oneOf", "allOf"] {
        if let Some(branches) = schema.get(key).and_then(Value::as_array) {
            let joined = branches
                .iter()
                .map(describe_type)
                .collect::<Vec<_>>()
                .join("|");
            if !joined.is_empty() {
                return joined;
            }
        }
    }
    "any".to_string()
}

const ROOT: &str = "$";

/// Turns a JSON pointer such as `/addresses/1/city` into `addresses[1].city`.
fn pointer_to_field(pointer: &str) -> String {
    let mut field = String::new();
    for segment in pointer.split('/').skip(1) {
        let segment = segment.replace("~1", "/").replace("~0", "~");
        if segment.parse::<usize>().is_ok() {
            if field.is_empty() {
                field.push_str(ROOT);
            }
            field.push('[');
            field.push_str(&segment);
            field.push(']');
        } else {
            if !field.is_empty() {
                field.push('.');
            }
            field.push_str(&segment);
        }
    }
    if field.is_empty() {
        ROOT.to_string()
    } else {
        field
    }
}

/// Pulls the field name out of serde's "missing field `x`" style messages.
fn serde_field_hint(message: &str) -> Option<String> {
    let start = message.find('`')? + 1;
    let end = message[start..].find('`')? + start;
    Some(message[start..end].to_string())
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::*;

    #[derive(Debug, Deserialize, JsonSchema, PartialEq)]
    struct Person {
        name: String,
        age: u32,
        occupation: String,
    }

    #[derive(Debug, Deserialize, JsonSchema, PartialEq)]
    struct Address {
        city: String,
        zip: Option<String>,
    }

    #[derive(Debug, Deserialize, JsonSchema, PartialEq)]
    struct Contact {
        person: Person,
        addresses: Vec<Address>,
    }

    #[test]
    fn parse_accepts_matching_document() {
        let schema = schema_of::<Person>();
        let person: Person = parse(
            r#"{"name":"Anna","age":28,"occupation":"Software Engineer"}"#,
            &schema,
        )
        .expect("valid person");
        assert_eq!(
            person,
            Person {
                name: "Anna".to_string(),
                age: 28,
                occupation: "Software Engineer".to_string(),
            }
        );
    }

    #[test]
    fn parse_reports_missing_required_field() {
        let schema = schema_of::<Person>();
        let err = parse::<Person>(r#"{"name":"Anna","occupation":"Software Engineer"}"#, &schema)
            .unwrap_err();
        match err {
            LLMError::Validation { fields, message } => {
                assert_eq!(fields, vec!["age".to_string()]);
                assert!(message.contains("required"), "{message}");
            }
            other => panic!("unexpected error type: {other:?}"),
        }
    }

    #[test]
    fn validate_collects_every_offending_field() {
        let schema = schema_of::<Person>();
        let err = schema
            .validate(&json!({"name": 7, "age": "twenty-eight"}))
            .unwrap_err();
        match err {
            LLMError::Validation { fields, .. } => {
                assert!(fields.contains(&"name".to_string()));
                assert!(fields.contains(&"age".to_string()));
                assert!(fields.contains(&"occupation".to_string()));
            }
            other => panic!("unexpected error type: {other:?}"),
        }
    }

    #[test]
    fn validate_descends_into_refs_and_arrays() {
        let schema = schema_of::<Contact>();
        let value = json!({
            "person": {"name": "Anna", "age": 28, "occupation": "Engineer"},
            "addresses": [{"city": "Oslo", "zip": null}, {"zip": "0150"}]
        });
        let err = schema.validate(&value).unwrap_err();
        match err {
            LLMError::Validation { fields, .. } => {
                assert_eq!(fields, vec!["addresses[1].city".to_string()]);
            }
            other => panic!("unexpected error type: {other:?}"),
        }

        let ok = json!({
            "person": {"name": "Anna", "age": 28, "occupation": "Engineer"},
            "addresses": [{"city": "Oslo"}]
        });
        let contact: Contact = parse_value(ok, &schema).expect("valid contact");
        assert_eq!(contact.addresses[0].city, "Oslo");
    }

    #[derive(Debug, Deserialize, JsonSchema, PartialEq)]
    struct Ticket {
        #[schemars(range(max = 150))]
        age: u32,
        #[schemars(length(max = 3), regex(pattern = r"^[a-z]+$"))]
        code: String,
    }

    #[test]
    fn bounds_and_patterns_are_enforced() {
        let schema = schema_of::<Ticket>();
        let err = parse::<Ticket>(r#"{"age":999,"code":"TOO-LONG"}"#, &schema).unwrap_err();
        match err {
            LLMError::Validation { fields, message } => {
                // code breaks both maxLength and pattern but is listed once
                assert_eq!(fields, vec!["age".to_string(), "code".to_string()]);
                assert!(message.contains("150"), "{message}");
            }
            other => panic!("unexpected error type: {other:?}"),
        }

        let ticket: Ticket = parse(r#"{"age":40,"code":"abc"}"#, &schema).expect("valid ticket");
        assert_eq!(ticket.code, "abc");
    }

    #[test]
    fn pointer_paths_become_field_paths() {
        assert_eq!(pointer_to_field(""), "$");
        assert_eq!(pointer_to_field("/age"), "age");
        assert_eq!(pointer_to_field("/addresses/1/city"), "addresses[1].city");
        assert_eq!(pointer_to_field("/0/a~1b"), "$[0].a/b");
    }

    #[test]
    fn parse_rejects_malformed_json() {
        let schema = schema_of::<Person>();
        let err = parse::<Person>("{\"name\": \"Anna\"", &schema).unwrap_err();
        assert!(matches!(err, LLMError::Validation { .. }));
    }

    #[test]
    fn fractional_numbers_are_not_integers() {
        let schema = schema_of::<Person>();
        let err = schema
            .validate(&json!({"name": "Anna", "age": 28.5, "occupation": "x"}))
            .unwrap_err();
        match err {
            LLMError::Validation { fields, .. } => assert_eq!(fields, vec!["age".to_string()]),
            other => panic!("unexpected error type: {other:?}"),
        }
    }

    #[test]
    fn inline_refs_removes_definitions() {
        let schema = schema_of::<Contact>();
        assert!(schema.schema.get("definitions").is_some());

        let resolved = schema.resolved();
        assert!(resolved.get("definitions").is_none());
        assert_eq!(resolved["properties"]["person"]["type"], "object");
        assert_eq!(
            resolved["properties"]["addresses"]["items"]["properties"]["city"]["type"],
            "string"
        );
    }

    #[test]
    fn fields_summarize_top_level_properties() {
        let fields = schema_of::<Person>().fields();
        let names: Vec<_> = fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["age", "name", "occupation"]);
        assert!(fields.iter().all(|f| f.required));
        assert_eq!(fields[0].type_name, "integer");
    }
}
