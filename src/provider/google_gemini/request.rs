use serde_json::{Map, Value, json};

use crate::config::{GeminiSystemPolicy, GenerationParams};
use crate::error::LLMError;
use crate::schema::SchemaDescription;
use crate::types::{Image, Message, Role};

use super::schema::response_schema;

/// Extra keys that belong at the top level of the request rather than in
/// `generationConfig`.
const TOP_LEVEL_EXTRAS: [&str; 6] = [
    "safetySettings",
    "cachedContent",
    "tools",
    "toolConfig",
    "labels",
    "systemInstruction",
];

/// 构建 Google Gemini GenerateContent 请求体
///
/// Gemini 使用路径参数携带模型名称 因此 `model` 不会出现在 body 中
///
/// Extras are routed first (vendor top-level keys to the body, the rest into
/// `generationConfig`); the conversation, system instruction, sampling fields and
/// response schema are written afterwards and always win.
///
/// # Errors
///
/// Returns [`LLMError::Validation`] when a system message carries an image under
/// [`GeminiSystemPolicy::SystemInstruction`], which only accepts text.
pub(crate) fn build_gemini_body(
    messages: &[Message],
    params: &GenerationParams,
    policy: &GeminiSystemPolicy,
    schema: Option<&SchemaDescription>,
) -> Result<Value, LLMError> {
    let mut body = Map::new();
    let mut generation = Map::new();
    for (k, v) in &params.extra {
        if TOP_LEVEL_EXTRAS.contains(&k.as_str()) {
            body.insert(k.clone(), v.clone());
        } else {
            generation.insert(k.clone(), v.clone());
        }
    }

    let mut system_texts = Vec::new();
    let mut contents = Vec::new();
    for (index, message) in messages.iter().enumerate() {
        match (message.role, policy) {
            (Role::System, GeminiSystemPolicy::SystemInstruction) if message.image.is_some() => {
                return Err(LLMError::Validation {
                    message: format!(
                        "gemini systemInstruction cannot carry an image (message {index})"
                    ),
                    fields: vec![format!("messages[{index}].image")],
                });
            }
            (Role::System, GeminiSystemPolicy::SystemInstruction) => {
                system_texts.push(message.content.as_str());
            }
            (Role::System, GeminiSystemPolicy::UserMarker { marker }) => {
                let mut parts = vec![json!({"text": format!("{marker}{}", message.content)})];
                if let Some(image) = &message.image {
                    parts.push(inline_data(image));
                }
                contents.push(json!({"role": "user", "parts": parts}));
            }
            _ => contents.push(convert_message(message)),
        }
    }
    body.insert("contents".to_string(), Value::Array(contents));
    if !system_texts.is_empty() {
        body.insert(
            "systemInstruction".to_string(),
            json!({"parts": [{"text": system_texts.join("\n\n")}]}),
        );
    }

    if let Some(max_tokens) = params.max_tokens {
        generation.insert("maxOutputTokens".to_string(), Value::from(max_tokens));
    }
    if let Some(temperature) = params.temperature {
        generation.insert("temperature".to_string(), Value::from(temperature));
    }
    if let Some(top_p) = params.top_p {
        generation.insert("topP".to_string(), Value::from(top_p));
    }
    if let Some(stop) = &params.stop {
        generation.insert("stopSequences".to_string(), json!(stop));
    }
    if let Some(schema) = schema {
        generation.insert(
            "responseMimeType".to_string(),
            Value::String("application/json".to_string()),
        );
        generation.insert("responseSchema".to_string(), response_schema(schema));
    }
    if !generation.is_empty() {
        body.insert("generationConfig".to_string(), Value::Object(generation));
    }

    Ok(Value::Object(body))
}

fn inline_data(image: &Image) -> Value {
    json!({"inlineData": {"mimeType": image.media_type, "data": image.data}})
}

/// 将 Message 转换为 Gemini Content assistant 映射为 model
fn convert_message(message: &Message) -> Value {
    let role = match message.role {
        Role::User | Role::System => "user",
        Role::Assistant => "model",
    };
    let mut parts = Vec::new();
    if message.has_text() || message.image.is_none() {
        parts.push(json!({"text": message.content}));
    }
    if let Some(image) = &message.image {
        parts.push(inline_data(image));
    }
    json!({"role": role, "parts": parts})
}
