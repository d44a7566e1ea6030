use tracing::debug;

use crate::error::{CallContext, LLMError};

use super::types::GeminiGenerateContentResponse;

/// Returns the first candidate's text, or why the vendor produced none.
pub(crate) fn extract_text(
    resp: &GeminiGenerateContentResponse,
    context: &CallContext,
) -> Result<String, LLMError> {
    if let Some(usage) = &resp.usage_metadata {
        debug!(
            provider = context.provider,
            model = resp.model_version.as_deref().unwrap_or(&context.model),
            prompt_tokens = usage.prompt_token_count,
            candidates_tokens = usage.candidates_token_count,
            total_tokens = usage.total_token_count,
            "generate content usage"
        );
    }

    if let Some(reason) = resp
        .prompt_feedback
        .as_ref()
        .and_then(|feedback| feedback.block_reason.as_deref())
    {
        return Err(LLMError::empty_response(context, format!("prompt blocked: {reason}")));
    }

    let Some(candidate) = resp.candidates.first() else {
        return Err(LLMError::empty_response(context, "response contained no candidates"));
    };

    let text = resp.text();
    if !text.is_empty() {
        return Ok(text);
    }
    let reason = match candidate.finish_reason.as_deref() {
        Some(reason @ ("SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT")) => {
            format!("candidate blocked: {reason}")
        }
        Some(reason) => format!("empty candidate (finishReason {reason})"),
        None => "empty candidate".to_string(),
    };
    Err(LLMError::empty_response(context, reason))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Operation;
    use serde_json::json;

    fn context() -> CallContext {
        CallContext::new("gemini", "gemini-2.0-flash", Operation::Invoke)
    }

    fn parse(value: serde_json::Value) -> GeminiGenerateContentResponse {
        serde_json::from_value(value).expect("response")
    }

    #[test]
    fn concatenates_candidate_parts() {
        let resp = parse(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "Hello "}, {"text": "there"}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 2, "totalTokenCount": 6},
            "modelVersion": "gemini-2.0-flash-001"
        }));
        assert_eq!(extract_text(&resp, &context()).expect("text"), "Hello there");
    }

    #[test]
    fn blocked_prompts_and_candidates_are_empty_responses() {
        let resp = parse(json!({"promptFeedback": {"blockReason": "SAFETY"}}));
        match extract_text(&resp, &context()) {
            Err(LLMError::EmptyResponse { reason, .. }) => assert_eq!(reason, "prompt blocked: SAFETY"),
            other => panic!("unexpected result: {other:?}"),
        }

        let resp = parse(json!({"candidates": [{"finishReason": "SAFETY"}]}));
        match extract_text(&resp, &context()) {
            Err(LLMError::EmptyResponse { reason, .. }) => assert!(reason.contains("SAFETY")),
            other => panic!("unexpected result: {other:?}"),
        }

        let resp = parse(json!({"candidates": []}));
        assert!(matches!(
            extract_text(&resp, &context()),
            Err(LLMError::EmptyResponse { .. })
        ));
    }
}
