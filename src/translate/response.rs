use super::anthropic_types::{
    ErrorResponse, MessagesResponse, ResponseContentBlock, StopReason, Usage,
};
use super::openai_types::{ChatCompletionResponse, ChatErrorResponse, ChatUsage};

/// Translate an OpenAI Chat Completion response into a unified Messages response.
/// Pure function: `original_model` is what the client originally requested.
pub fn from_wire_response(
    resp: &ChatCompletionResponse,
    original_model: &str,
) -> MessagesResponse {
    let choice = resp.choices.first();

    let mut content: Vec<ResponseContentBlock> = Vec::new();

    if let Some(c) = choice {
        if let Some(ref reasoning) = c.message.reasoning_content {
            if !reasoning.is_empty() {
                content.push(ResponseContentBlock::Thinking {
                    thinking: reasoning.clone(),
                    signature: String::new(),
                });
            }
        }

        if let Some(ref text) = c.message.content {
            if !text.is_empty() {
                content.push(ResponseContentBlock::Text { text: text.clone() });
            }
        }

        if let Some(ref tool_calls) = c.message.tool_calls {
            for tc in tool_calls {
                content.push(ResponseContentBlock::ToolUse {
                    id: tool_use_id(&tc.id),
                    name: tc.function.name.clone(),
                    input: parse_tool_input(&tc.function.arguments),
                });
            }
        }
    }

    // Ensure at least one content block (clients expect non-empty content)
    if content.is_empty() {
        content.push(ResponseContentBlock::Text {
            text: String::new(),
        });
    }

    let stop_reason = choice
        .and_then(|c| c.finish_reason.as_deref())
        .map_or(StopReason::EndTurn, map_finish_reason);

    let usage = resp.usage.as_ref().map_or_else(Usage::default, map_usage);

    // Use the OpenAI response ID, prefixed to look like an Anthropic ID
    let id = if resp.id.is_empty() {
        super::anthropic_types::new_message_id()
    } else {
        format!("msg_{}", resp.id.trim_start_matches("chatcmpl-"))
    };

    MessagesResponse {
        id,
        response_type: "message".to_string(),
        role: "assistant".to_string(),
        content,
        model: original_model.to_string(),
        stop_reason: Some(stop_reason),
        stop_sequence: None,
        usage,
    }
}

/// Stamp `model` on a native Messages body. `None` when the body is not a JSON
/// object, in which case it should be forwarded untouched.
pub fn relabel_native_body(body: &[u8], model: &str) -> Option<Vec<u8>> {
    let mut value: serde_json::Value = serde_json::from_slice(body).ok()?;
    let obj = value.as_object_mut()?;
    obj.insert(
        "model".to_string(),
        serde_json::Value::String(model.to_string()),
    );
    serde_json::to_vec(&value).ok()
}

/// Map OpenAI `finish_reason` to a unified stop reason.
pub fn map_finish_reason(reason: &str) -> StopReason {
    match reason {
        "length" => StopReason::MaxTokens,
        "tool_calls" | "function_call" => StopReason::ToolUse,
        _ => StopReason::EndTurn,
    }
}

pub fn map_usage(u: &ChatUsage) -> Usage {
    Usage {
        input_tokens: u.prompt_tokens,
        output_tokens: u.completion_tokens,
        cache_creation_input_tokens: None,
        cache_read_input_tokens: u
            .prompt_tokens_details
            .as_ref()
            .and_then(|d| d.cached_tokens),
        reasoning_tokens: u
            .completion_tokens_details
            .as_ref()
            .and_then(|d| d.reasoning_tokens),
    }
}

/// Parse a tool-argument string. Empty means no arguments; unparseable input is
/// kept verbatim as a JSON string rather than lost.
pub fn parse_tool_input(arguments: &str) -> serde_json::Value {
    if arguments.trim().is_empty() {
        return serde_json::Value::Object(serde_json::Map::new());
    }
    serde_json::from_str(arguments)
        .unwrap_or_else(|_| serde_json::Value::String(arguments.to_string()))
}

/// Some servers omit tool-call ids; clients need one to send results back.
pub fn tool_use_id(upstream_id: &str) -> String {
    if upstream_id.is_empty() {
        format!("toolu_{}", uuid::Uuid::new_v4().simple())
    } else {
        upstream_id.to_string()
    }
}

/// Translate an OpenAI error into an Anthropic error response
pub fn openai_error_to_anthropic(err: &ChatErrorResponse) -> ErrorResponse {
    let error_type = match err.error.error_type.as_str() {
        "invalid_request_error" => "invalid_request_error",
        "authentication_error" => "authentication_error",
        "rate_limit_error" | "rate_limit_exceeded" => "rate_limit_error",
        _ => "api_error",
    };

    ErrorResponse::new(error_type, &err.error.message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::openai_types::*;

    fn make_response(content: Option<String>, finish_reason: Option<String>) -> ChatCompletionResponse {
        ChatCompletionResponse {
            id: "chatcmpl-abc123".to_string(),
            object: "chat.completion".to_string(),
            created: 0,
            model: "gpt-4o".to_string(),
            choices: vec![Choice {
                index: 0,
                message: ChoiceMessage {
                    role: "assistant".to_string(),
                    content,
                    reasoning_content: None,
                    tool_calls: None,
                },
                finish_reason,
            }],
            usage: Some(ChatUsage {
                prompt_tokens: 10,
                completion_tokens: 20,
                total_tokens: 30,
                completion_tokens_details: Some(CompletionTokensDetails {
                    reasoning_tokens: Some(7),
                }),
                prompt_tokens_details: None,
            }),
        }
    }

    #[test]
    fn test_simple_text_response() {
        let resp = make_response(Some("Hello!".to_string()), Some("stop".to_string()));
        let result = from_wire_response(&resp, "or:gpt-4o");

        assert_eq!(result.id, "msg_abc123");
        assert_eq!(result.role, "assistant");
        assert_eq!(result.model, "or:gpt-4o");
        assert_eq!(result.stop_reason, Some(StopReason::EndTurn));
        assert_eq!(
            result.content,
            vec![ResponseContentBlock::Text {
                text: "Hello!".to_string()
            }]
        );
        assert_eq!(result.usage.input_tokens, 10);
        assert_eq!(result.usage.output_tokens, 20);
        assert_eq!(result.usage.reasoning_tokens, Some(7));
    }

    #[test]
    fn test_tool_call_response() {
        let resp: ChatCompletionResponse = serde_json::from_value(serde_json::json!({
            "id": "chatcmpl-xyz",
            "object": "chat.completion",
            "model": "gpt-4o",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": "Let me check.",
                    "tool_calls": [
                        {"id": "call_abc", "type": "function",
                         "function": {"name": "get_weather", "arguments": "{\"city\":\"London\"}"}},
                        {"id": "call_bad", "type": "function",
                         "function": {"name": "broken", "arguments": "{\"city\":"}}
                    ]
                },
                "finish_reason": "tool_calls"
            }]
        }))
        .unwrap();

        let result = from_wire_response(&resp, "test-model");

        assert_eq!(result.content.len(), 3);
        assert_eq!(result.stop_reason, Some(StopReason::ToolUse));

        if let ResponseContentBlock::ToolUse { id, name, input } = &result.content[1] {
            assert_eq!(id, "call_abc");
            assert_eq!(name, "get_weather");
            assert_eq!(input["city"], "London");
        } else {
            panic!("Expected tool_use content block");
        }

        if let ResponseContentBlock::ToolUse { input, .. } = &result.content[2] {
            assert_eq!(input, &serde_json::json!("{\"city\":"));
        } else {
            panic!("Expected tool_use content block");
        }
    }

    #[test]
    fn test_reasoning_content_becomes_thinking_block() {
        let resp: ChatCompletionResponse = serde_json::from_value(serde_json::json!({
            "id": "x",
            "choices": [{
                "message": {"role": "assistant", "content": "42", "reasoning_content": "6*7"},
                "finish_reason": "stop"
            }]
        }))
        .unwrap();

        let result = from_wire_response(&resp, "vllm:qwen");
        assert!(matches!(&result.content[0], ResponseContentBlock::Thinking { thinking, .. } if thinking == "6*7"));
        assert!(matches!(&result.content[1], ResponseContentBlock::Text { text } if text == "42"));
    }

    #[test]
    fn test_empty_choice_yields_empty_text_block() {
        let resp = make_response(None, None);
        let result = from_wire_response(&resp, "m");
        assert_eq!(result.content.len(), 1);
        assert_eq!(result.stop_reason, Some(StopReason::EndTurn));
    }

    #[test]
    fn test_finish_reason_mapping() {
        assert_eq!(map_finish_reason("stop"), StopReason::EndTurn);
        assert_eq!(map_finish_reason("length"), StopReason::MaxTokens);
        assert_eq!(map_finish_reason("tool_calls"), StopReason::ToolUse);
        assert_eq!(map_finish_reason("content_filter"), StopReason::EndTurn);
        assert_eq!(map_finish_reason("unknown"), StopReason::EndTurn);
    }

    #[test]
    fn test_parse_tool_input() {
        assert_eq!(parse_tool_input(""), serde_json::json!({}));
        assert_eq!(parse_tool_input(r#"{"query":"hello"}"#), serde_json::json!({"query": "hello"}));
        assert_eq!(parse_tool_input("{oops"), serde_json::json!("{oops"));
    }

    #[test]
    fn test_relabel_native_body() {
        let body = br#"{"id":"msg_1","type":"message","model":"claude-sonnet-4-5","content":[]}"#;
        let out = relabel_native_body(body, "vllm:llama").unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["model"], "vllm:llama");
        assert_eq!(value["id"], "msg_1");

        assert!(relabel_native_body(b"not json", "x").is_none());
        assert!(relabel_native_body(b"[1,2]", "x").is_none());
    }
}
