use tracing::debug;

use crate::error::{CallContext, LLMError};

use super::types::OpenAiChatResponse;

/// Pulls the text of the first choice, or explains why there is none.
pub(crate) fn extract_text(
    resp: &OpenAiChatResponse,
    context: &CallContext,
) -> Result<String, LLMError> {
    if let Some(usage) = &resp.usage {
        debug!(
            provider = context.provider,
            model = resp.model.as_deref().unwrap_or(&context.model),
            id = resp.id.as_deref().unwrap_or_default(),
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            total_tokens = usage.total_tokens,
            "chat completion usage"
        );
    }

    let Some(choice) = resp.choices.first() else {
        return Err(LLMError::empty_response(context, "response contained no choices"));
    };

    let message = choice.message.as_ref();
    let text = message
        .and_then(|message| message.content.as_ref())
        .map(|content| content.text())
        .unwrap_or_default();
    if !text.is_empty() {
        return Ok(text);
    }

    let reason = match (
        message.and_then(|message| message.refusal.as_deref()),
        choice.finish_reason.as_deref(),
    ) {
        (Some(refusal), _) => format!("model refused: {refusal}"),
        (None, Some("content_filter")) => "content was filtered".to_string(),
        (None, Some(finish)) => format!("empty content (finish_reason {finish})"),
        (None, None) => "empty content".to_string(),
    };
    Err(LLMError::empty_response(context, reason))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Operation;

    fn context() -> CallContext {
        CallContext::new("openai", "gpt-4o", Operation::Invoke)
    }

    fn parse(body: &str) -> OpenAiChatResponse {
        serde_json::from_str(body).expect("response")
    }

    #[test]
    fn extracts_string_and_part_content() {
        let resp = parse(
            r#"{"id":"chatcmpl-1","object":"chat.completion","model":"gpt-4o","choices":[{"index":0,"message":{"role":"assistant","content":"Hello there"},"finish_reason":"stop"}],"usage":{"prompt_tokens":5,"completion_tokens":2,"total_tokens":7}}"#,
        );
        assert_eq!(extract_text(&resp, &context()).expect("text"), "Hello there");

        let resp = parse(
            r#"{"choices":[{"index":0,"message":{"role":"assistant","content":[{"type":"text","text":"Hel"},{"type":"text","text":"lo"}]}}]}"#,
        );
        assert_eq!(extract_text(&resp, &context()).expect("text"), "Hello");
    }

    #[test]
    fn filtered_and_refused_responses_are_empty() {
        let resp = parse(
            r#"{"choices":[{"index":0,"message":{"role":"assistant","content":null},"finish_reason":"content_filter"}]}"#,
        );
        match extract_text(&resp, &context()) {
            Err(LLMError::EmptyResponse {
                provider,
                model,
                operation,
                reason,
            }) => {
                assert_eq!(provider, "openai");
                assert_eq!(model, "gpt-4o");
                assert_eq!(operation, Operation::Invoke);
                assert!(reason.contains("filtered"));
            }
            other => panic!("unexpected result: {other:?}"),
        }

        let resp = parse(
            r#"{"choices":[{"index":0,"message":{"role":"assistant","content":null,"refusal":"I can't help with that."},"finish_reason":"stop"}]}"#,
        );
        match extract_text(&resp, &context()) {
            Err(LLMError::EmptyResponse { reason, .. }) => assert!(reason.contains("can't help")),
            other => panic!("unexpected result: {other:?}"),
        }

        let resp = parse(r#"{"choices":[]}"#);
        assert!(matches!(
            extract_text(&resp, &context()),
            Err(LLMError::EmptyResponse { .. })
        ));
    }
}
