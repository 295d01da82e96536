//! Translate unified (Anthropic Messages) requests into the wire shape of the chosen backend.
//!
//! The native path only swaps the model and strips gateway-only fields. The
//! OpenAI-compatible path handles system messages, multi-part content (text, images),
//! tool use, tool results and tool choice mapping. A single Anthropic message can expand
//! into multiple `OpenAI` messages (e.g. a user message with `tool_result` blocks becomes
//! separate `tool`-role messages). Fields without a counterpart are dropped.

use super::anthropic_types::{
    ContentBlock, Message, MessagesRequest, Role, ThinkingConfig, ToolChoice, ToolChoiceAuto,
    ToolChoiceSpecific, ToolResultContent, GATEWAY_ONLY_FIELDS,
};
use super::openai_types::{
    ChatCompletionRequest, ChatContent, ChatFunction, ChatMessage, ChatTool, ChatToolCall,
    ChatToolCallFunction, ChatToolChoice, ChatToolChoiceFunction, ChatToolChoiceSpecific,
    ContentPart, ImageUrlDetail, Plugin, ReasoningConfig, StreamOptions,
};
use crate::providers::Provider;
use crate::routing::{classify_tool, ToolKind};

/// Extension key whose object entries are merged into OpenAI-compatible bodies.
pub const OPENAI_COMPAT_EXTENSION: &str = "openai_compat";

/// Target-specific knobs for the OpenAI-compatible translation.
#[derive(Debug, Clone, Copy)]
pub struct WireExtras {
    pub provider: Provider,
}

/// Native pass-through body: the client's JSON with the wire model substituted.
pub fn to_native_body(mut raw: serde_json::Value, wire_model: &str) -> serde_json::Value {
    if let Some(obj) = raw.as_object_mut() {
        obj.insert(
            "model".to_string(),
            serde_json::Value::String(wire_model.to_string()),
        );
        for field in GATEWAY_ONLY_FIELDS {
            obj.remove(*field);
        }
    }
    raw
}

/// Translate a unified request into an `OpenAI` Chat Completions request.
/// Pure function: takes the request + wire model, returns the translated request.
pub fn to_wire_request(
    req: &MessagesRequest,
    wire_model: &str,
    extras: WireExtras,
) -> ChatCompletionRequest {
    let mut messages = Vec::new();

    if let Some(ref system) = req.system {
        messages.push(ChatMessage {
            role: "system".to_string(),
            content: Some(ChatContent::Text(system.as_text())),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        });
    }

    for msg in &req.messages {
        let mut translated = translate_message(msg);
        messages.append(&mut translated);
    }

    let tools: Vec<ChatTool> = req
        .tools
        .iter()
        .flatten()
        .filter(|t| classify_tool(t) == ToolKind::Client)
        .map(|t| ChatTool {
            tool_type: "function".to_string(),
            function: ChatFunction {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t
                    .input_schema
                    .clone()
                    .unwrap_or_else(|| serde_json::json!({"type": "object", "properties": {}})),
            },
        })
        .collect();
    let has_tools = !tools.is_empty();

    let tool_choice = req
        .tool_choice
        .as_ref()
        .filter(|_| has_tools)
        .map(translate_tool_choice);

    let stream_options = req.stream.filter(|s| *s).map(|_| StreamOptions {
        include_usage: true,
    });

    let user = req.metadata.as_ref().and_then(|m| m.user_id.clone());

    let (reasoning, reasoning_effort) = translate_reasoning(
        extras.provider,
        req.thinking.as_ref(),
        req.reasoning_effort.as_deref(),
    );

    let plugins = req
        .web_search_options
        .as_ref()
        .filter(|_| extras.provider.supports_web_search())
        .map(|opts| {
            vec![Plugin {
                id: "web".to_string(),
                max_results: opts.max_results,
                search_prompt: opts.search_prompt.clone(),
            }]
        });

    let mut wire = ChatCompletionRequest {
        model: wire_model.to_string(),
        messages,
        max_tokens: Some(req.max_tokens),
        temperature: req.temperature,
        top_p: req.top_p,
        stream: req.stream,
        stream_options,
        tools: has_tools.then_some(tools),
        tool_choice,
        stop: req.stop_sequences.clone(),
        user,
        reasoning_effort,
        reasoning,
        plugins,
        extra: serde_json::Map::new(),
    };
    wire.extra = compat_fields(req, &wire);
    wire
}

/// `extensions.openai_compat` entries, minus any key the translated request
/// already sets. Translated fields win so each key is serialized once.
fn compat_fields(
    req: &MessagesRequest,
    wire: &ChatCompletionRequest,
) -> serde_json::Map<String, serde_json::Value> {
    let Some(compat) = req
        .extensions
        .as_ref()
        .and_then(|ext| ext.get(OPENAI_COMPAT_EXTENSION))
        .and_then(serde_json::Value::as_object)
    else {
        return serde_json::Map::new();
    };

    let typed = serde_json::to_value(wire).unwrap_or_default();
    compat
        .iter()
        .filter(|(key, _)| {
            let taken = typed.get(key.as_str()).is_some();
            if taken {
                tracing::debug!(field = %key, "Ignoring openai_compat field set by translation");
            }
            !taken
        })
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// OpenRouter takes a `reasoning` object; vLLM and SGLang take `reasoning_effort`.
fn translate_reasoning(
    provider: Provider,
    thinking: Option<&ThinkingConfig>,
    effort: Option<&str>,
) -> (Option<ReasoningConfig>, Option<String>) {
    let budget = thinking
        .filter(|t| t.thinking_type == "enabled")
        .and_then(|t| t.budget_tokens);

    if budget.is_none() && effort.is_none() {
        return (None, None);
    }

    match provider {
        Provider::OpenRouter => {
            let config = match budget {
                Some(max_tokens) => ReasoningConfig {
                    effort: None,
                    max_tokens: Some(max_tokens),
                },
                None => ReasoningConfig {
                    effort: effort.map(str::to_string),
                    max_tokens: None,
                },
            };
            (Some(config), None)
        }
        Provider::Vllm | Provider::Sglang => {
            let effort = effort
                .map(str::to_string)
                .or_else(|| budget.map(|b| effort_for_budget(b).to_string()));
            (None, effort)
        }
        Provider::Anthropic => (None, None),
    }
}

fn effort_for_budget(budget_tokens: u64) -> &'static str {
    match budget_tokens {
        0..=2048 => "low",
        2049..=8192 => "medium",
        _ => "high",
    }
}

/// A single Anthropic message can expand to multiple `OpenAI` messages
/// (e.g. a user message with `tool_results` becomes separate tool-role messages).
fn translate_message(msg: &Message) -> Vec<ChatMessage> {
    let blocks = msg.content.blocks();

    match msg.role {
        Role::User => translate_user_message(&blocks),
        Role::Assistant => translate_assistant_message(&blocks),
    }
}

fn translate_user_message(blocks: &[ContentBlock]) -> Vec<ChatMessage> {
    let mut messages = Vec::new();
    let mut content_parts: Vec<ContentPart> = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::Text { text } => {
                content_parts.push(ContentPart::Text { text: text.clone() });
            }
            ContentBlock::Image { source } => {
                let url = match (&source.url, &source.data) {
                    (Some(url), _) => url.clone(),
                    (None, Some(data)) => format!(
                        "data:{};base64,{}",
                        source.media_type.as_deref().unwrap_or("image/png"),
                        data
                    ),
                    (None, None) => continue,
                };
                content_parts.push(ContentPart::ImageUrl {
                    image_url: ImageUrlDetail { url, detail: None },
                });
            }
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                // Flush any accumulated content parts as a user message first
                if !content_parts.is_empty() {
                    messages.push(user_message(collapse_content_parts(&content_parts)));
                    content_parts.clear();
                }

                messages.push(ChatMessage {
                    role: "tool".to_string(),
                    content: Some(ChatContent::Text(tool_result_to_string(
                        content.as_ref(),
                        *is_error,
                    ))),
                    tool_calls: None,
                    tool_call_id: Some(tool_use_id.clone()),
                    name: None,
                });
            }
            ContentBlock::Thinking { .. } | ContentBlock::ToolUse { .. } | ContentBlock::Unsupported => {}
        }
    }

    if !content_parts.is_empty() {
        messages.push(user_message(collapse_content_parts(&content_parts)));
    }

    // If nothing was produced (empty message), emit an empty user message
    if messages.is_empty() {
        messages.push(user_message(ChatContent::Text(String::new())));
    }

    messages
}

fn user_message(content: ChatContent) -> ChatMessage {
    ChatMessage {
        role: "user".to_string(),
        content: Some(content),
        tool_calls: None,
        tool_call_id: None,
        name: None,
    }
}

fn translate_assistant_message(blocks: &[ContentBlock]) -> Vec<ChatMessage> {
    let mut text_parts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<ChatToolCall> = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::Text { text } => {
                text_parts.push(text.clone());
            }
            ContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(ChatToolCall {
                    id: id.clone(),
                    call_type: "function".to_string(),
                    function: ChatToolCallFunction {
                        name: name.clone(),
                        arguments: serde_json::to_string(input).unwrap_or_default(),
                    },
                });
            }
            ContentBlock::Thinking { .. }
            | ContentBlock::Image { .. }
            | ContentBlock::ToolResult { .. }
            | ContentBlock::Unsupported => {}
        }
    }

    let content = if text_parts.is_empty() {
        None
    } else {
        Some(ChatContent::Text(text_parts.join("")))
    };

    vec![ChatMessage {
        role: "assistant".to_string(),
        content,
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        tool_call_id: None,
        name: None,
    }]
}

fn collapse_content_parts(parts: &[ContentPart]) -> ChatContent {
    if let [ContentPart::Text { text }] = parts {
        return ChatContent::Text(text.clone());
    }
    ChatContent::Parts(parts.to_vec())
}

fn tool_result_to_string(content: Option<&ToolResultContent>, is_error: Option<bool>) -> String {
    let prefix = if is_error == Some(true) {
        "ERROR: "
    } else {
        ""
    };

    match content {
        Some(ToolResultContent::Text(t)) => format!("{prefix}{t}"),
        Some(ToolResultContent::Blocks(blocks)) => {
            let text: String = blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n");
            format!("{prefix}{text}")
        }
        None => format!("{prefix}(no content)"),
    }
}

fn translate_tool_choice(tc: &ToolChoice) -> ChatToolChoice {
    match tc {
        ToolChoice::Auto(ToolChoiceAuto { choice_type }) => match choice_type.as_str() {
            "any" => ChatToolChoice::String("required".to_string()),
            "none" => ChatToolChoice::String("none".to_string()),
            _ => ChatToolChoice::String("auto".to_string()),
        },
        ToolChoice::Specific(ToolChoiceSpecific { name, .. }) => {
            ChatToolChoice::Specific(ChatToolChoiceSpecific {
                choice_type: "function".to_string(),
                function: ChatToolChoiceFunction { name: name.clone() },
            })
        }
    }
}
