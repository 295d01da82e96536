//! Demonstrate the routing and translation layers without a server.
//!
//! Usage:
//!   `cargo run --example translate_only`

use claude_gateway::config::GatewayConfig;
use claude_gateway::routing;
use claude_gateway::translate::anthropic_types::MessagesRequest;
use claude_gateway::translate::openai_types::ChatCompletionResponse;
use claude_gateway::translate::reassemble::Reassembler;
use claude_gateway::translate::request::{to_wire_request, WireExtras};
use claude_gateway::translate::response::from_wire_response;
use claude_gateway::translate::streaming::{encode_event, StreamTranslator};

use axum::http::HeaderMap;

fn main() -> anyhow::Result<()> {
    let config = GatewayConfig::default();

    // What an Anthropic SDK client sends
    let req: MessagesRequest = serde_json::from_value(serde_json::json!({
        "model": "or:gpt-5-mini",
        "max_tokens": 1024,
        "stream": true,
        "system": "You are a geography expert. Be concise.",
        "thinking": {"type": "enabled", "budget_tokens": 4096},
        "messages": [
            {"role": "user", "content": "What is the capital of France?"},
            {"role": "assistant", "content": "The capital of France is Paris."},
            {"role": "user", "content": "And Germany?"}
        ]
    }))?;

    let route = routing::resolve(&HeaderMap::new(), &req, &config);
    println!("=== Route ===");
    println!(
        "provider={} wire_model={} turn={}",
        route.provider,
        route.wire_model,
        routing::turn_index(&req.messages)
    );

    let wire = to_wire_request(
        &req,
        &route.wire_model,
        WireExtras {
            provider: route.provider,
        },
    );
    println!();
    println!("=== Translated Request (OpenAI-compatible) ===");
    println!("{}", serde_json::to_string_pretty(&wire)?);

    let wire_resp: ChatCompletionResponse = serde_json::from_value(serde_json::json!({
        "id": "chatcmpl-demo",
        "model": "openai/gpt-5-mini",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": "The capital of Germany is Berlin."},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 42, "completion_tokens": 8, "total_tokens": 50}
    }))?;

    println!();
    println!("=== Translated Response (unified) ===");
    println!(
        "{}",
        serde_json::to_string_pretty(&from_wire_response(&wire_resp, &route.original_model))?
    );

    // Transcode a few chunks and rebuild the message from the emitted events
    println!();
    println!("=== Streaming Transcode + Reassembly ===");

    let mut translator = StreamTranslator::new(&route.original_model);
    let mut reassembler = Reassembler::new();

    let chunks = [
        serde_json::json!({"choices": [{"index": 0, "delta": {"role": "assistant", "content": "The"}}]}),
        serde_json::json!({"choices": [{"index": 0, "delta": {"content": " capital is Berlin."}}]}),
        serde_json::json!({"choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}]}),
    ];

    let mut events = Vec::new();
    for chunk in chunks {
        events.extend(translator.process_chunk(&serde_json::from_value(chunk)?));
    }
    events.extend(translator.finish(true));

    for event in &events {
        if let Some(bytes) = encode_event(event) {
            print!("{}", String::from_utf8_lossy(&bytes));
        }
        reassembler.apply(Some(event.event_name()), &serde_json::to_string(event)?);
    }

    println!("=== Reassembled ===");
    println!("{}", serde_json::to_string_pretty(&reassembler.finish())?);

    Ok(())
}
