use serde_json::Value;
use tracing::debug;

use crate::error::{CallContext, LLMError};

use super::request::OUTPUT_TOOL;
use super::types::AnthropicMessageResponse;

fn log_usage(resp: &AnthropicMessageResponse, context: &CallContext) {
    if let Some(usage) = &resp.usage {
        debug!(
            provider = context.provider,
            model = resp.model.as_deref().unwrap_or(&context.model),
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            stop_reason = resp.stop_reason.as_deref(),
            "messages usage"
        );
    }
}

fn empty_reason(resp: &AnthropicMessageResponse) -> String {
    match resp.stop_reason.as_deref() {
        Some("refusal") => "model refused to answer".to_string(),
        Some(reason) => format!("no text content (stop_reason {reason})"),
        None => "no text content".to_string(),
    }
}

/// Concatenates all text blocks in order.
pub(crate) fn extract_text(
    resp: &AnthropicMessageResponse,
    context: &CallContext,
) -> Result<String, LLMError> {
    log_usage(resp, context);
    let text: String = resp
        .content
        .iter()
        .filter(|block| block.kind == "text")
        .filter_map(|block| block.text.as_deref())
        .collect();
    if text.is_empty() {
        return Err(LLMError::empty_response(context, empty_reason(resp)));
    }
    Ok(text)
}

/// Returns the input of the forced output tool call.
pub(crate) fn extract_tool_input(
    resp: &AnthropicMessageResponse,
    context: &CallContext,
) -> Result<Value, LLMError> {
    log_usage(resp, context);
    resp.content
        .iter()
        .find(|block| block.kind == "tool_use" && block.name.as_deref() == Some(OUTPUT_TOOL))
        .and_then(|block| block.input.clone())
        .ok_or_else(|| {
            let reason = format!("no {OUTPUT_TOOL} tool call; {}", empty_reason(resp));
            LLMError::empty_response(context, reason)
        })
}
