use serde_json::{Map, Value, json};

use crate::config::GenerationParams;
use crate::schema::{SchemaDescription, visit_schema_mut};
use crate::types::Message;

/// 构建 Chat Completions 请求体
///
/// Messages keep their order and role; system turns stay inline. Passthrough extras
/// are written first so they can never replace a field the adapter owns.
pub(crate) fn build_openai_body(
    messages: &[Message],
    params: &GenerationParams,
    model: &str,
    stream: bool,
    schema: Option<&SchemaDescription>,
) -> Value {
    let mut body: Map<String, Value> = params
        .extra
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    body.remove("stream");
    body.insert("model".to_string(), Value::String(model.to_string()));
    body.insert(
        "messages".to_string(),
        Value::Array(messages.iter().map(convert_message).collect()),
    );
    if let Some(max_tokens) = params.max_tokens {
        body.insert("max_tokens".to_string(), Value::from(max_tokens));
    }
    if let Some(temperature) = params.temperature {
        body.insert("temperature".to_string(), Value::from(temperature));
    }
    if let Some(top_p) = params.top_p {
        body.insert("top_p".to_string(), Value::from(top_p));
    }
    if let Some(stop) = &params.stop {
        body.insert("stop".to_string(), json!(stop));
    }
    if let Some(schema) = schema {
        body.insert("response_format".to_string(), response_format(schema));
    }
    if stream {
        body.insert("stream".to_string(), Value::Bool(true));
    }
    Value::Object(body)
}

fn convert_message(message: &Message) -> Value {
    let content = match &message.image {
        None => Value::String(message.content.clone()),
        Some(image) => {
            let mut parts = Vec::new();
            if message.has_text() {
                parts.push(json!({"type": "text", "text": message.content}));
            }
            parts.push(json!({
                "type": "image_url",
                "image_url": {"url": image.data_url()}
            }));
            Value::Array(parts)
        }
    };
    json!({"role": message.role.as_str(), "content": content})
}

/// `response_format` binding the reply to the schema.
///
/// Strict mode is only requested when every object lists all of its properties as
/// required, because the vendor rejects strict schemas with optional fields.
pub(crate) fn response_format(schema: &SchemaDescription) -> Value {
    let mut shaped = schema.schema.clone();
    if let Value::Object(root) = &mut shaped {
        root.remove("$schema");
    }

    let strict = all_properties_required(&shaped);
    if strict {
        visit_schema_mut(&mut shaped, &mut |node| {
            node.remove("format");
            if node.contains_key("properties") {
                node.insert("additionalProperties".to_string(), Value::Bool(false));
            }
        });
    }

    json!({
        "type": "json_schema",
        "json_schema": {
            "name": format_name(&schema.name),
            "schema": shaped,
            "strict": strict
        }
    })
}

fn all_properties_required(schema: &Value) -> bool {
    let mut scratch = schema.clone();
    let mut complete = true;
    visit_schema_mut(&mut scratch, &mut |node| {
        let Some(Value::Object(properties)) = node.get("properties") else {
            return;
        };
        let required: Vec<&str> = node
            .get("required")
            .and_then(Value::as_array)
            .map(|names| names.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        if properties.keys().any(|name| !required.contains(&name.as_str())) {
            complete = false;
        }
    });
    complete
}

/// The vendor only accepts `[a-zA-Z0-9_-]{1,64}` as a format name.
fn format_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .take(64)
        .collect();
    if cleaned.is_empty() {
        "output".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CallOptions, ProviderConfig};
    use crate::schema::schema_of;
    use crate::types::Image;

    #[derive(schemars::JsonSchema)]
    #[allow(dead_code)]
    struct Person {
        name: String,
        age: u32,
        occupation: String,
    }

    #[derive(schemars::JsonSchema)]
    #[allow(dead_code)]
    struct Draft {
        title: String,
        subtitle: Option<String>,
    }

    #[test]
    fn messages_pass_through_in_order() {
        let messages = vec![
            Message::system("Be terse."),
            Message::user("Hi"),
            Message::assistant("Hello."),
            Message::user("Bye"),
        ];
        let body = build_openai_body(&messages, &GenerationParams::default(), "gpt-4o", false, None);

        assert_eq!(
            body["messages"],
            json!([
                {"role": "system", "content": "Be terse."},
                {"role": "user", "content": "Hi"},
                {"role": "assistant", "content": "Hello."},
                {"role": "user", "content": "Bye"}
            ])
        );
        assert!(body.get("stream").is_none());
        assert!(body.get("response_format").is_none());
    }

    #[test]
    fn images_become_multipart_content() {
        let messages = vec![
            Message::image("What is this?", Image::new("AAAA", "image/png")),
            Message::image("", Image::new("BBBB", "image/jpeg")),
        ];
        let body = build_openai_body(&messages, &GenerationParams::default(), "gpt-4o", false, None);

        assert_eq!(
            body["messages"][0]["content"],
            json!([
                {"type": "text", "text": "What is this?"},
                {"type": "image_url", "image_url": {"url": "data:image/png;base64,AAAA"}}
            ])
        );
        assert_eq!(
            body["messages"][1]["content"],
            json!([{"type": "image_url", "image_url": {"url": "data:image/jpeg;base64,BBBB"}}])
        );
    }

    #[test]
    fn params_and_extras_are_mapped_without_nulls() {
        let params = ProviderConfig::new("gpt-4o")
            .with_max_tokens(64)
            .with_stop(["\n\n"])
            .with_extra("seed", json!(42))
            .merge(&CallOptions::new().with_temperature(0.5).with_extra("user", Value::Null));
        let body = build_openai_body(&[Message::user("x")], &params, "gpt-4o", true, None);

        assert_eq!(body["max_tokens"], 64);
        assert_eq!(body["temperature"], 0.5);
        assert_eq!(body["stop"], json!(["\n\n"]));
        assert_eq!(body["seed"], 42);
        assert_eq!(body["stream"], true);
        assert!(body.get("top_p").is_none());
        assert!(body.get("user").is_none());
    }

    #[test]
    fn strict_response_format_for_fully_required_schema() {
        let format = response_format(&schema_of::<Person>());
        assert_eq!(format["type"], "json_schema");
        assert_eq!(format["json_schema"]["name"], "Person");
        assert_eq!(format["json_schema"]["strict"], true);

        let schema = &format["json_schema"]["schema"];
        assert!(schema.get("$schema").is_none());
        assert_eq!(schema["additionalProperties"], false);
        assert!(schema["properties"]["age"].get("format").is_none());
        assert_eq!(schema["properties"]["age"]["type"], "integer");
    }

    #[test]
    fn optional_fields_disable_strict_mode() {
        let format = response_format(&schema_of::<Draft>());
        assert_eq!(format["json_schema"]["strict"], false);
        assert!(format["json_schema"]["schema"].get("additionalProperties").is_none());
    }

    #[test]
    fn format_name_is_sanitized() {
        assert_eq!(format_name("Wrapper<Person>"), "Wrapper_Person_");
        assert_eq!(format_name(""), "output");
    }

    #[test]
    fn extras_cannot_replace_owned_fields() {
        let params = ProviderConfig::new("gpt-4o").merge(
            &CallOptions::new()
                .with_extra("model", json!("other-model"))
                .with_extra("messages", json!([]))
                .with_extra("response_format", json!({"type": "text"}))
                .with_extra("stream", json!(true))
                .with_extra("seed", json!(7)),
        );
        let schema = schema_of::<Person>();
        let body = build_openai_body(&[Message::user("Hi")], &params, "gpt-4o", false, Some(&schema));

        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["messages"], json!([{"role": "user", "content": "Hi"}]));
        assert_eq!(body["response_format"]["type"], "json_schema");
        assert!(body.get("stream").is_none());
        assert_eq!(body["seed"], 7);
    }
}
