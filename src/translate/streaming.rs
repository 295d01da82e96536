//! State machine for transcoding OpenAI streaming chunks into unified SSE events.
//!
//! The [`StreamTranslator`] processes `ChatCompletionChunk`s one at a time,
//! maintaining state about which content blocks are open, and emitting the
//! corresponding Anthropic stream events (`message_start`, `content_block_delta`, etc.).
//! [`transcode_stream`] drives it from a raw upstream byte stream.

use super::anthropic_types::{
    new_message_id, Delta, DeltaUsage, MessageDeltaBody, MessagesResponse, ResponseContentBlock,
    StopReason, StreamEvent, Usage,
};
use super::openai_types::{ChatCompletionChunk, ChatErrorResponse};
use super::response::{map_finish_reason, map_usage, tool_use_id};

use bytes::Bytes;
use eventsource_stream::Eventsource;
use futures::stream::{Stream, StreamExt};
use std::collections::BTreeMap;

/// A streamed tool call, keyed by the upstream tool-call index.
#[derive(Debug, Clone, Copy)]
struct ToolBlock {
    index: usize,
    open: bool,
}

/// State machine that translates OpenAI streaming chunks into unified SSE events.
///
/// Usage:
///   let mut translator = StreamTranslator::new("or:gpt-5-mini");
///   for chunk in openai_chunks {
///       let events = translator.process_chunk(&chunk);
///       // send each event as SSE
///   }
///   let final_events = translator.finish(true);
#[derive(Debug)]
pub struct StreamTranslator {
    model: String,
    msg_id: String,
    started: bool,
    finished: bool,
    next_index: usize,
    text_block: Option<usize>,
    thinking_block: Option<usize>,
    tool_blocks: BTreeMap<u64, ToolBlock>,
    stop_reason: Option<StopReason>,
    usage: Option<Usage>,
}

impl StreamTranslator {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            msg_id: new_message_id(),
            started: false,
            finished: false,
            next_index: 0,
            text_block: None,
            thinking_block: None,
            tool_blocks: BTreeMap::new(),
            stop_reason: None,
            usage: None,
        }
    }

    /// Process a single OpenAI streaming chunk, returning zero or more unified events.
    pub fn process_chunk(&mut self, chunk: &ChatCompletionChunk) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }

        let mut events = Vec::new();

        // Usage may arrive on any chunk, usually a trailing one with no choices
        if let Some(ref usage) = chunk.usage {
            self.usage = Some(map_usage(usage));
        }

        if !self.started {
            events.push(self.make_message_start());
            events.push(StreamEvent::Ping);
            self.started = true;
        }

        let Some(choice) = chunk.choices.first() else {
            return events;
        };

        if let Some(reasoning) = choice.delta.reasoning_content.as_deref() {
            if !reasoning.is_empty() {
                let index = self.ensure_thinking_block(&mut events);
                events.push(StreamEvent::ContentBlockDelta {
                    index,
                    delta: Delta::ThinkingDelta {
                        thinking: reasoning.to_string(),
                    },
                });
            }
        }

        if let Some(content) = choice.delta.content.as_deref() {
            if !content.is_empty() {
                let index = self.ensure_text_block(&mut events);
                events.push(StreamEvent::ContentBlockDelta {
                    index,
                    delta: Delta::TextDelta {
                        text: content.to_string(),
                    },
                });
            }
        }

        for tc in choice.delta.tool_calls.iter().flatten() {
            let block = match self.tool_blocks.get(&tc.index) {
                Some(block) => *block,
                None => {
                    // First delta for this tool call: open a tool_use block
                    self.close_text_like(&mut events);

                    let index = self.next_index;
                    self.next_index += 1;

                    let name = tc
                        .function
                        .as_ref()
                        .and_then(|f| f.name.clone())
                        .unwrap_or_default();
                    events.push(StreamEvent::ContentBlockStart {
                        index,
                        content_block: ResponseContentBlock::ToolUse {
                            id: tool_use_id(tc.id.as_deref().unwrap_or_default()),
                            name,
                            input: serde_json::Value::Object(serde_json::Map::new()),
                        },
                    });

                    let block = ToolBlock { index, open: true };
                    self.tool_blocks.insert(tc.index, block);
                    block
                }
            };

            if !block.open {
                continue;
            }

            if let Some(args) = tc.function.as_ref().and_then(|f| f.arguments.as_deref()) {
                if !args.is_empty() {
                    events.push(StreamEvent::ContentBlockDelta {
                        index: block.index,
                        delta: Delta::InputJsonDelta {
                            partial_json: args.to_string(),
                        },
                    });
                }
            }
        }

        // The segment is over; message_delta waits for trailing usage or [DONE]
        if let Some(ref reason) = choice.finish_reason {
            self.stop_reason = Some(map_finish_reason(reason));
            self.close_all(&mut events);
        }

        events
    }

    /// Close the unified stream. `clean` is true when the upstream signalled `[DONE]`.
    ///
    /// Emits exactly one `message_delta` + `message_stop` pair over the translator's
    /// lifetime; later calls return nothing.
    pub fn finish(&mut self, clean: bool) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;

        let mut events = Vec::new();

        if !self.started {
            events.push(self.make_message_start());
            self.started = true;
        }

        self.close_all(&mut events);

        let stop_reason = self.stop_reason.or_else(|| {
            clean.then(|| {
                if self.tool_blocks.is_empty() {
                    StopReason::EndTurn
                } else {
                    StopReason::ToolUse
                }
            })
        });

        let usage = self.usage.clone().unwrap_or_default();
        events.push(StreamEvent::MessageDelta {
            delta: MessageDeltaBody {
                stop_reason,
                stop_sequence: None,
            },
            usage: DeltaUsage {
                input_tokens: self.usage.as_ref().map(|u| u.input_tokens),
                output_tokens: usage.output_tokens,
                cache_read_input_tokens: usage.cache_read_input_tokens,
                reasoning_tokens: usage.reasoning_tokens,
            },
        });

        events.push(StreamEvent::MessageStop);

        events
    }

    fn ensure_text_block(&mut self, events: &mut Vec<StreamEvent>) -> usize {
        if let Some(index) = self.text_block {
            return index;
        }
        if let Some(index) = self.thinking_block.take() {
            events.push(StreamEvent::ContentBlockStop { index });
        }
        let index = self.start_block(
            events,
            ResponseContentBlock::Text {
                text: String::new(),
            },
        );
        self.text_block = Some(index);
        index
    }

    fn ensure_thinking_block(&mut self, events: &mut Vec<StreamEvent>) -> usize {
        if let Some(index) = self.thinking_block {
            return index;
        }
        if let Some(index) = self.text_block.take() {
            events.push(StreamEvent::ContentBlockStop { index });
        }
        let index = self.start_block(
            events,
            ResponseContentBlock::Thinking {
                thinking: String::new(),
                signature: String::new(),
            },
        );
        self.thinking_block = Some(index);
        index
    }

    fn start_block(&mut self, events: &mut Vec<StreamEvent>, block: ResponseContentBlock) -> usize {
        let index = self.next_index;
        self.next_index += 1;
        events.push(StreamEvent::ContentBlockStart {
            index,
            content_block: block,
        });
        index
    }

    fn close_text_like(&mut self, events: &mut Vec<StreamEvent>) {
        for index in [self.thinking_block.take(), self.text_block.take()]
            .into_iter()
            .flatten()
        {
            events.push(StreamEvent::ContentBlockStop { index });
        }
    }

    fn close_all(&mut self, events: &mut Vec<StreamEvent>) {
        self.close_text_like(events);
        for block in self.tool_blocks.values_mut() {
            if block.open {
                events.push(StreamEvent::ContentBlockStop { index: block.index });
                block.open = false;
            }
        }
    }

    fn make_message_start(&self) -> StreamEvent {
        StreamEvent::MessageStart {
            message: MessagesResponse {
                id: self.msg_id.clone(),
                response_type: "message".to_string(),
                role: "assistant".to_string(),
                content: Vec::new(),
                model: self.model.clone(),
                stop_reason: None,
                stop_sequence: None,
                usage: Usage {
                    input_tokens: self.usage.as_ref().map_or(0, |u| u.input_tokens),
                    ..Usage::default()
                },
            },
        }
    }
}

/// Serialize one event in the unified SSE framing.
pub fn encode_event(event: &StreamEvent) -> Option<Bytes> {
    let json = serde_json::to_string(event).ok()?;
    Some(Bytes::from(format!(
        "event: {}\ndata: {}\n\n",
        event.event_name(),
        json
    )))
}

/// Transcode an OpenAI-compatible SSE byte stream into a unified SSE byte stream.
///
/// Chunks may split lines anywhere. The output always ends with `message_delta` +
/// `message_stop`, also when the upstream dies mid-stream.
pub fn transcode_stream<S, B, E>(
    upstream: S,
    original_model: String,
) -> impl Stream<Item = std::result::Result<Bytes, std::io::Error>> + Send + 'static
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    async_stream::stream! {
        let mut translator = StreamTranslator::new(&original_model);
        let events = upstream.eventsource();
        tokio::pin!(events);

        let mut clean = false;

        while let Some(item) = events.next().await {
            let event = match item {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!(error = %e, "Upstream stream failed, closing early");
                    break;
                }
            };

            let data = event.data.trim();
            if data.is_empty() {
                continue;
            }
            if data == "[DONE]" {
                clean = true;
                break;
            }

            if let Ok(err) = serde_json::from_str::<ChatErrorResponse>(data) {
                tracing::warn!(message = %err.error.message, "Upstream sent an error mid-stream");
                break;
            }

            let chunk: ChatCompletionChunk = match serde_json::from_str(data) {
                Ok(c) => c,
                Err(e) => {
                    tracing::debug!(error = %e, "Skipping unparseable chunk");
                    continue;
                }
            };

            for event in translator.process_chunk(&chunk) {
                if let Some(bytes) = encode_event(&event) {
                    yield Ok::<Bytes, std::io::Error>(bytes);
                }
            }
        }

        for event in translator.finish(clean) {
            if let Some(bytes) = encode_event(&event) {
                yield Ok(bytes);
            }
        }

        tracing::debug!(clean, "Transcoded stream completed");
    }
}

/// Pass a native unified stream through with `message_start` relabelled to
/// `model`. Other events are re-framed unchanged. A read failure is forwarded
/// and ends the stream.
pub fn relabel_native_stream<S, B, E>(
    upstream: S,
    model: String,
) -> impl Stream<Item = std::result::Result<Bytes, std::io::Error>> + Send + 'static
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    async_stream::stream! {
        let events = upstream.eventsource();
        tokio::pin!(events);

        while let Some(item) = events.next().await {
            let event = match item {
                Ok(e) => e,
                Err(e) => {
                    yield Err(std::io::Error::other(e.to_string()));
                    break;
                }
            };

            let mut data = event.data;
            if event.event == "message_start" {
                if let Ok(mut payload) = serde_json::from_str::<serde_json::Value>(&data) {
                    if let Some(message) = payload.get_mut("message").and_then(|m| m.as_object_mut()) {
                        message.insert("model".to_string(), serde_json::Value::String(model.clone()));
                    }
                    data = payload.to_string();
                }
            }

            let framed = if event.event.is_empty() || event.event == "message" {
                format!("data: {data}\n\n")
            } else {
                format!("event: {}\ndata: {data}\n\n", event.event)
            };
            yield Ok::<Bytes, std::io::Error>(Bytes::from(framed));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::openai_types::*;

    fn text_chunk(content: &str, finish: Option<&str>) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: "c1".to_string(),
            object: "chat.completion.chunk".to_string(),
            created: 0,
            model: "test".to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: ChunkDelta {
                    role: None,
                    content: Some(content.to_string()),
                    reasoning_content: None,
                    tool_calls: None,
                },
                finish_reason: finish.map(String::from),
            }],
            usage: None,
        }
    }

    fn tool_chunk(index: u64, id: Option<&str>, name: Option<&str>, args: &str) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: "c1".to_string(),
            object: "chat.completion.chunk".to_string(),
            created: 0,
            model: "test".to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: ChunkDelta {
                    tool_calls: Some(vec![ChunkToolCall {
                        index,
                        id: id.map(String::from),
                        call_type: Some("function".to_string()),
                        function: Some(ChunkToolCallFunction {
                            name: name.map(String::from),
                            arguments: Some(args.to_string()),
                        }),
                    }]),
                    ..ChunkDelta::default()
                },
                finish_reason: None,
            }],
            usage: None,
        }
    }

    fn names(events: &[StreamEvent]) -> Vec<&'static str> {
        events.iter().map(StreamEvent::event_name).collect()
    }

    #[test]
    fn test_simple_text_stream() {
        let mut translator = StreamTranslator::new("or:gpt-5-mini");

        let events = translator.process_chunk(&text_chunk("Hello", None));
        assert_eq!(
            names(&events),
            vec!["message_start", "ping", "content_block_start", "content_block_delta"]
        );
        if let StreamEvent::MessageStart { message } = &events[0] {
            assert_eq!(message.model, "or:gpt-5-mini");
            assert!(message.id.starts_with("msg_"));
        } else {
            panic!("expected message_start");
        }

        let events = translator.process_chunk(&text_chunk(" world", None));
        assert_eq!(names(&events), vec!["content_block_delta"]);

        let events = translator.process_chunk(&text_chunk("", Some("stop")));
        assert_eq!(names(&events), vec!["content_block_stop"]);

        let events = translator.finish(true);
        assert_eq!(names(&events), vec!["message_delta", "message_stop"]);
        if let StreamEvent::MessageDelta { delta, .. } = &events[0] {
            assert_eq!(delta.stop_reason, Some(StopReason::EndTurn));
        }

        assert!(translator.finish(true).is_empty());
    }

    #[test]
    fn test_tool_call_stream() {
        let mut translator = StreamTranslator::new("test-model");

        let _ = translator.process_chunk(&text_chunk("Checking...", None));

        let events = translator.process_chunk(&tool_chunk(0, Some("call_abc"), Some("search"), "{\"q\""));
        assert_eq!(
            names(&events),
            vec!["content_block_stop", "content_block_start", "content_block_delta"]
        );
        assert!(matches!(events[1], StreamEvent::ContentBlockStart { index: 1, .. }));

        let events = translator.process_chunk(&tool_chunk(0, None, None, ":\"x\"}"));
        assert!(matches!(
            &events[0],
            StreamEvent::ContentBlockDelta { index: 1, delta: Delta::InputJsonDelta { partial_json } }
                if partial_json == ":\"x\"}"
        ));

        let events = translator.process_chunk(&tool_chunk(1, Some("call_def"), Some("fetch"), "{}"));
        assert!(matches!(events[0], StreamEvent::ContentBlockStart { index: 2, .. }));

        let events = translator.finish(true);
        assert_eq!(
            names(&events),
            vec!["content_block_stop", "content_block_stop", "message_delta", "message_stop"]
        );
        if let StreamEvent::MessageDelta { delta, .. } = &events[2] {
            assert_eq!(delta.stop_reason, Some(StopReason::ToolUse));
        }
    }

    #[test]
    fn test_trailing_usage_reported_in_message_delta() {
        let mut translator = StreamTranslator::new("m");
        let _ = translator.process_chunk(&text_chunk("hi", Some("length")));

        let usage_chunk: ChatCompletionChunk = serde_json::from_value(serde_json::json!({
            "id": "c1", "object": "chat.completion.chunk", "model": "m", "choices": [],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15}
        }))
        .unwrap();
        assert!(translator.process_chunk(&usage_chunk).is_empty());

        let events = translator.finish(true);
        if let StreamEvent::MessageDelta { delta, usage } = &events[0] {
            assert_eq!(delta.stop_reason, Some(StopReason::MaxTokens));
            assert_eq!(usage.input_tokens, Some(12));
            assert_eq!(usage.output_tokens, 3);
        } else {
            panic!("expected message_delta");
        }
    }

    #[test]
    fn test_finish_without_chunks() {
        let mut translator = StreamTranslator::new("test-model");
        let events = translator.finish(false);
        assert_eq!(names(&events), vec!["message_start", "message_delta", "message_stop"]);
        if let StreamEvent::MessageDelta { delta, .. } = &events[1] {
            assert_eq!(delta.stop_reason, None);
        }
    }

    #[test]
    fn test_reasoning_then_text_blocks() {
        let mut translator = StreamTranslator::new("m");
        let reasoning: ChatCompletionChunk = serde_json::from_value(serde_json::json!({
            "choices": [{"index": 0, "delta": {"reasoning_content": "thinking..."}}]
        }))
        .unwrap();

        let events = translator.process_chunk(&reasoning);
        assert!(matches!(
            &events[2],
            StreamEvent::ContentBlockStart { index: 0, content_block: ResponseContentBlock::Thinking { .. } }
        ));

        let events = translator.process_chunk(&text_chunk("answer", None));
        assert_eq!(
            names(&events),
            vec!["content_block_stop", "content_block_start", "content_block_delta"]
        );
    }

    #[test]
    fn test_encode_event_framing() {
        let bytes = encode_event(&StreamEvent::MessageStop).unwrap();
        assert_eq!(&bytes[..], b"event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n");
    }

    async fn collect_text(chunks: Vec<&'static str>) -> String {
        let upstream = futures::stream::iter(
            chunks
                .into_iter()
                .map(|c| Ok::<_, std::io::Error>(Bytes::from_static(c.as_bytes()))),
        );
        let out: Vec<_> = transcode_stream(upstream, "vllm:llama".to_string())
            .collect()
            .await;
        out.into_iter()
            .map(|r| String::from_utf8(r.unwrap().to_vec()).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_transcode_handles_split_chunks() {
        let body = collect_text(vec![
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hel",
            "lo\"}}]}\n\ndata: {\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n",
            "\ndata: [DONE]\n\n",
        ])
        .await;

        assert!(body.starts_with("event: message_start\n"));
        assert!(body.contains("\"text\":\"Hello\""));
        assert!(body.contains("\"stop_reason\":\"end_turn\""));
        assert!(body.ends_with("event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n"));
        assert_eq!(body.matches("event: message_stop").count(), 1);
    }

    #[tokio::test]
    async fn test_transcode_abrupt_end_still_closes() {
        let body = collect_text(vec![
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"partial\"}}]}\n\n",
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"cut",
        ])
        .await;

        assert!(body.contains("\"text\":\"partial\""));
        assert!(!body.contains("cut"));
        assert!(body.contains("event: content_block_stop"));
        assert!(body.contains("\"stop_reason\":null"));
        assert_eq!(body.matches("event: message_stop").count(), 1);
    }

    #[tokio::test]
    async fn test_relabel_native_stream_rewrites_message_start_only() {
        let upstream = concat!(
            "event: message_start\n",
            "data: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_1\",\"model\":\"claude-sonnet-4-5\"}}\n\n",
            "event: content_block_delta\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"claude-sonnet-4-5\"}}\n\n",
            "event: message_stop\n",
            "data: {\"type\":\"message_stop\"}\n\n",
        );
        let pieces: Vec<Result<Bytes, std::io::Error>> = upstream
            .as_bytes()
            .chunks(11)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();

        let out: Vec<u8> = relabel_native_stream(futures::stream::iter(pieces), "vllm:llama".to_string())
            .map(|r| r.unwrap().to_vec())
            .concat()
            .await;
        let text = String::from_utf8(out).unwrap();

        assert!(text.starts_with("event: message_start\n"));
        assert!(text.contains("\"model\":\"vllm:llama\""));
        assert!(text.contains("\"text\":\"claude-sonnet-4-5\""));
        assert!(text.ends_with("event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n"));
    }
}
