//! Rebuild a complete Messages response from a unified SSE stream.
//!
//! Works on loosely-typed JSON rather than [`StreamEvent`](super::anthropic_types::StreamEvent)
//! so native streams carrying event or delta kinds the gateway has no type for
//! (citations, signatures, server tool results) never derail reassembly.

use super::anthropic_types::{
    new_message_id, MessagesResponse, ResponseContentBlock, StopReason, Usage,
};
use super::response::parse_tool_input;

use eventsource_stream::Eventsource;
use futures::stream::{Stream, StreamExt};
use serde_json::Value;
use std::collections::BTreeMap;

/// Per-index content accumulator.
#[derive(Debug, Clone, PartialEq)]
enum BlockAccumulator {
    Text(String),
    Thinking {
        thinking: String,
        signature: String,
    },
    ToolUse {
        id: String,
        name: String,
        arguments: String,
        initial: Value,
    },
}

impl BlockAccumulator {
    fn from_start(block: &Value) -> Option<Self> {
        let text_field = |key: &str| {
            block
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        match block.get("type").and_then(Value::as_str)? {
            "text" => Some(Self::Text(text_field("text"))),
            "thinking" => Some(Self::Thinking {
                thinking: text_field("thinking"),
                signature: text_field("signature"),
            }),
            "tool_use" => Some(Self::ToolUse {
                id: text_field("id"),
                name: text_field("name"),
                arguments: String::new(),
                initial: block
                    .get("input")
                    .cloned()
                    .unwrap_or_else(|| Value::Object(serde_json::Map::new())),
            }),
            _ => None,
        }
    }

    /// Append a delta; kinds that do not match the block are ignored.
    fn apply(&mut self, delta: &Value) {
        let field = |key: &str| delta.get(key).and_then(Value::as_str);
        let kind = field("type").unwrap_or_default();

        match (self, kind) {
            (Self::Text(text), "text_delta") => {
                text.push_str(field("text").unwrap_or_default());
            }
            (Self::Thinking { thinking, .. }, "thinking_delta") => {
                thinking.push_str(field("thinking").unwrap_or_default());
            }
            (Self::Thinking { signature, .. }, "signature_delta") => {
                signature.push_str(field("signature").unwrap_or_default());
            }
            (Self::ToolUse { arguments, .. }, "input_json_delta") => {
                arguments.push_str(field("partial_json").unwrap_or_default());
            }
            _ => {}
        }
    }

    fn finish(self) -> ResponseContentBlock {
        match self {
            Self::Text(text) => ResponseContentBlock::Text { text },
            Self::Thinking {
                thinking,
                signature,
            } => ResponseContentBlock::Thinking {
                thinking,
                signature,
            },
            Self::ToolUse {
                id,
                name,
                arguments,
                initial,
            } => {
                let input = if arguments.trim().is_empty() {
                    initial
                } else {
                    parse_tool_input(&arguments)
                };
                ResponseContentBlock::ToolUse { id, name, input }
            }
        }
    }
}

/// Accumulator state machine for one unified stream.
#[derive(Debug, Default)]
pub struct Reassembler {
    id: Option<String>,
    model: Option<String>,
    blocks: BTreeMap<usize, BlockAccumulator>,
    stop_reason: Option<StopReason>,
    stop_sequence: Option<String>,
    usage: Usage,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one SSE event. `event_name` is the `event:` field, if any; `data` the
    /// joined `data:` lines. Malformed payloads are skipped.
    pub fn apply(&mut self, event_name: Option<&str>, data: &str) {
        let data = data.trim();
        if data.is_empty() || data == "[DONE]" {
            return;
        }

        let payload: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(error = %e, "Skipping malformed stream event");
                return;
            }
        };

        let kind = event_name
            .filter(|name| !name.is_empty())
            .or_else(|| payload.get("type").and_then(Value::as_str));

        if let Some(kind) = kind {
            self.apply_event(kind, &payload);
        }
    }

    fn apply_event(&mut self, kind: &str, payload: &Value) {
        match kind {
            "message_start" => {
                let Some(message) = payload.get("message") else {
                    return;
                };
                if self.id.is_none() {
                    self.id = message.get("id").and_then(Value::as_str).map(String::from);
                }
                if self.model.is_none() {
                    self.model = message
                        .get("model")
                        .and_then(Value::as_str)
                        .map(String::from);
                }
                if let Some(usage) = message.get("usage") {
                    merge_usage(&mut self.usage, usage);
                }
            }
            "content_block_start" => {
                let (Some(index), Some(block)) = (block_index(payload), payload.get("content_block"))
                else {
                    return;
                };
                if self.blocks.contains_key(&index) {
                    return;
                }
                if let Some(acc) = BlockAccumulator::from_start(block) {
                    self.blocks.insert(index, acc);
                }
            }
            "content_block_delta" => {
                let (Some(index), Some(delta)) = (block_index(payload), payload.get("delta")) else {
                    return;
                };
                if let Some(acc) = self.blocks.get_mut(&index) {
                    acc.apply(delta);
                }
            }
            "message_delta" => {
                if let Some(delta) = payload.get("delta") {
                    self.capture_stop(delta);
                }
                let usage = payload
                    .get("delta")
                    .and_then(|d| d.get("usage"))
                    .or_else(|| payload.get("usage"));
                if let Some(usage) = usage {
                    merge_usage(&mut self.usage, usage);
                }
            }
            "message_stop" => self.capture_stop(payload),
            // content_block_stop, ping, error: nothing to accumulate
            _ => {}
        }
    }

    fn capture_stop(&mut self, source: &Value) {
        if let Some(reason) = source
            .get("stop_reason")
            .filter(|v| !v.is_null())
            .and_then(|v| serde_json::from_value::<StopReason>(v.clone()).ok())
        {
            self.stop_reason = Some(reason);
        }
        if let Some(seq) = source.get("stop_sequence").and_then(Value::as_str) {
            self.stop_sequence = Some(seq.to_string());
        }
    }

    /// Produce the final response. Unclosed blocks are included as accumulated.
    pub fn finish(self) -> MessagesResponse {
        MessagesResponse {
            id: self.id.unwrap_or_else(new_message_id),
            response_type: "message".to_string(),
            role: "assistant".to_string(),
            content: self
                .blocks
                .into_values()
                .map(BlockAccumulator::finish)
                .collect(),
            model: self.model.unwrap_or_default(),
            stop_reason: self.stop_reason,
            stop_sequence: self.stop_sequence,
            usage: self.usage,
        }
    }
}

fn block_index(payload: &Value) -> Option<usize> {
    payload
        .get("index")
        .and_then(Value::as_u64)
        .and_then(|i| usize::try_from(i).ok())
}

fn merge_usage(usage: &mut Usage, source: &Value) {
    let get = |key: &str| source.get(key).and_then(Value::as_u64);

    if let Some(v) = get("input_tokens") {
        usage.input_tokens = v;
    }
    if let Some(v) = get("output_tokens") {
        usage.output_tokens = v;
    }
    if let Some(v) = get("cache_creation_input_tokens") {
        usage.cache_creation_input_tokens = Some(v);
    }
    if let Some(v) = get("cache_read_input_tokens") {
        usage.cache_read_input_tokens = Some(v);
    }
    if let Some(v) = get("reasoning_tokens") {
        usage.reasoning_tokens = Some(v);
    }
}

/// Drain a unified SSE byte stream into a [`MessagesResponse`].
///
/// A transport error ends reassembly early; whatever was accumulated is returned.
pub async fn reassemble<S, B, E>(stream: S) -> MessagesResponse
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut state = Reassembler::new();
    let events = stream.eventsource();
    tokio::pin!(events);

    while let Some(item) = events.next().await {
        match item {
            Ok(event) => {
                // eventsource-stream reports a missing `event:` field as "message"
                let name = Some(event.event.as_str()).filter(|n| *n != "message");
                state.apply(name, &event.data);
            }
            Err(e) => {
                tracing::debug!(error = %e, "Stream read failed, reassembly truncated");
                break;
            }
        }
    }

    state.finish()
}
