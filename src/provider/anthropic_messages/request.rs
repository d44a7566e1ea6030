use serde_json::{Map, Value, json};

use crate::config::{GenerationParams, SystemPromptPolicy};
use crate::error::LLMError;
use crate::schema::SchemaDescription;
use crate::types::{Message, Role};

/// Name of the forced tool used to obtain structured output.
pub(crate) const OUTPUT_TOOL: &str = "output";

/// 构建 Anthropic Messages 请求体
///
/// # Errors
///
/// Returns [`LLMError::Validation`] when nothing but system messages remain, or when a
/// system message carries an image (the top-level `system` field is text only).
pub(crate) fn build_anthropic_body(
    messages: &[Message],
    params: &GenerationParams,
    model: &str,
    policy: SystemPromptPolicy,
    default_max_tokens: u32,
    stream: bool,
    schema: Option<&SchemaDescription>,
) -> Result<Value, LLMError> {
    let (system, conversation) = split_system(messages, policy)?;
    if conversation.is_empty() {
        return Err(LLMError::validation(
            "anthropic requires at least one user or assistant message besides system prompts",
        ));
    }

    // 透传参数先写入 适配器自有字段随后覆盖
    let mut body: Map<String, Value> = params
        .extra
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    body.remove("stream");
    body.insert("model".to_string(), Value::String(model.to_string()));
    body.insert("messages".to_string(), Value::Array(conversation));
    if let Some(system) = system {
        body.insert("system".to_string(), Value::String(system));
    }
    // max_tokens 为必填字段
    body.insert(
        "max_tokens".to_string(),
        Value::from(params.max_tokens.unwrap_or(default_max_tokens)),
    );
    if let Some(temperature) = params.temperature {
        body.insert("temperature".to_string(), Value::from(temperature));
    }
    if let Some(top_p) = params.top_p {
        body.insert("top_p".to_string(), Value::from(top_p));
    }
    if let Some(stop) = &params.stop {
        body.insert("stop_sequences".to_string(), json!(stop));
    }
    if let Some(schema) = schema {
        body.insert("tools".to_string(), json!([output_tool(schema)]));
        body.insert(
            "tool_choice".to_string(),
            json!({"type": "tool", "name": OUTPUT_TOOL}),
        );
    }
    if stream {
        body.insert("stream".to_string(), Value::Bool(true));
    }
    Ok(Value::Object(body))
}

/// Separates system text from the turns sent in `messages`.
fn split_system(
    messages: &[Message],
    policy: SystemPromptPolicy,
) -> Result<(Option<String>, Vec<Value>), LLMError> {
    let mut system: Vec<&str> = Vec::new();
    let mut conversation = Vec::new();
    for (index, message) in messages.iter().enumerate() {
        match message.role {
            Role::System if message.image.is_some() => {
                return Err(LLMError::Validation {
                    message: format!(
                        "anthropic cannot attach an image to the system prompt (message {index})"
                    ),
                    fields: vec![format!("messages[{index}].image")],
                });
            }
            Role::System => system.push(&message.content),
            Role::User | Role::Assistant => conversation.push(convert_message(message)),
        }
    }

    let system = match policy {
        SystemPromptPolicy::LastWins => system.last().map(|text| text.to_string()),
        SystemPromptPolicy::Concatenate if system.is_empty() => None,
        SystemPromptPolicy::Concatenate => Some(system.join("\n\n")),
    };
    Ok((system, conversation))
}

fn convert_message(message: &Message) -> Value {
    let content = match &message.image {
        None => Value::String(message.content.clone()),
        Some(image) => {
            let mut blocks = Vec::new();
            if message.has_text() {
                blocks.push(json!({"type": "text", "text": message.content}));
            }
            blocks.push(json!({
                "type": "image",
                "source": {
                    "type": "base64",
                    "media_type": image.media_type,
                    "data": image.data
                }
            }));
            Value::Array(blocks)
        }
    };
    json!({"role": message.role.as_str(), "content": content})
}

fn output_tool(schema: &SchemaDescription) -> Value {
    let mut input_schema = schema.schema.clone();
    if let Value::Object(root) = &mut input_schema {
        root.remove("$schema");
    }
    json!({
        "name": OUTPUT_TOOL,
        "description": format!("Record the answer as a {} object", schema.name),
        "input_schema": input_schema
    })
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
    }

    fn params() -> GenerationParams {
        ProviderConfig::new("claude").merge(&CallOptions::default())
    }

    fn build(messages: &[Message], policy: SystemPromptPolicy) -> Value {
        build_anthropic_body(messages, &params(), "claude", policy, 4096, false, None)
            .expect("body")
    }

    #[test]
    fn system_messages_are_lifted_last_wins() {
        let messages = [
            Message::system("A"),
            Message::user("hi"),
            Message::system("B"),
        ];
        let body = build(&messages, SystemPromptPolicy::LastWins);
        assert_eq!(body["system"], "B");
        assert_eq!(body["messages"], json!([{"role": "user", "content": "hi"}]));
        assert_eq!(body["max_tokens"], 4096);
        assert!(body.get("stream").is_none());
    }

    #[test]
    fn system_messages_can_be_concatenated() {
        let messages = [
            Message::system("A"),
            Message::user("hi"),
            Message::system("B"),
        ];
        let body = build(&messages, SystemPromptPolicy::Concatenate);
        assert_eq!(body["system"], "A\n\nB");
    }

    #[test]
    fn system_only_conversation_is_rejected() {
        let result = build_anthropic_body(
            &[Message::system("only")],
            &params(),
            "claude",
            SystemPromptPolicy::LastWins,
            4096,
            false,
            None,
        );
        assert!(matches!(result, Err(LLMError::Validation { .. })));
    }

    #[test]
    fn images_become_base64_blocks() {
        let messages = [Message::image("what is this?", Image::new("AAAA", "image/png"))];
        let body = build(&messages, SystemPromptPolicy::LastWins);
        assert_eq!(
            body["messages"][0]["content"],
            json!([
                {"type": "text", "text": "what is this?"},
                {"type": "image", "source": {"type": "base64", "media_type": "image/png", "data": "AAAA"}}
            ])
        );
        assert!(body.get("system").is_none());
    }

    #[test]
    fn generation_params_and_schema_map_to_tool_call() {
        let params = ProviderConfig::new("claude").with_temperature(0.2).merge(
            &CallOptions::new()
                .with_max_tokens(256)
                .with_stop(["END"])
                .with_extra("metadata", json!({"user_id": "u1"})),
        );
        let schema = schema_of::<Person>();
        let body = build_anthropic_body(
            &[Message::user("extract")],
            &params,
            "claude",
            SystemPromptPolicy::LastWins,
            4096,
            true,
            Some(&schema),
        )
        .expect("body");
        assert_eq!(body["max_tokens"], 256);
        assert_eq!(body["temperature"], 0.2);
        assert_eq!(body["stop_sequences"], json!(["END"]));
        assert_eq!(body["metadata"]["user_id"], "u1");
        assert_eq!(body["stream"], true);
        assert_eq!(body["tool_choice"], json!({"type": "tool", "name": "output"}));
        let tool = &body["tools"][0];
        assert_eq!(tool["name"], "output");
        assert!(tool["input_schema"].get("$schema").is_none());
        assert_eq!(tool["input_schema"]["required"], json!(["age", "name"]));
    }

    #[test]
    fn extras_cannot_replace_the_forced_tool() {
        let params = ProviderConfig::new("claude").merge(
            &CallOptions::new()
                .with_extra("tools", json!([{"name": "a"}, {"name": "b"}]))
                .with_extra("tool_choice", json!({"type": "auto"}))
                .with_extra("model", json!("other-model"))
                .with_extra("stream", json!(true)),
        );
        let schema = schema_of::<Person>();
        let body = build_anthropic_body(
            &[Message::user("extract")],
            &params,
            "claude",
            SystemPromptPolicy::LastWins,
            4096,
            false,
            Some(&schema),
        )
        .expect("body");
        assert_eq!(body["model"], "claude");
        assert_eq!(body["tools"].as_array().map(Vec::len), Some(1));
        assert_eq!(body["tools"][0]["name"], "output");
        assert_eq!(body["tool_choice"], json!({"type": "tool", "name": "output"}));
        assert!(body.get("stream").is_none());
    }

    #[test]
    fn system_images_are_rejected() {
        let messages = [
            Message::system("Describe").with_image(Image::new("AAAA", "image/png")),
            Message::user("go"),
        ];
        let result = build_anthropic_body(
            &messages,
            &params(),
            "claude",
            SystemPromptPolicy::Concatenate,
            4096,
            false,
            None,
        );
        match result {
            Err(LLMError::Validation { fields, .. }) => {
                assert_eq!(fields, vec!["messages[0].image".to_string()])
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
