use crate::audit::{truncate_chars, AuditRecord, AuditWriter};
use crate::auth::{upstream_credential, Credential};
use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::routing::{self, Route};
use crate::tee::{tee, ByteStream};
use crate::translate::anthropic_types::MessagesRequest;
use crate::translate::openai_types::{ChatCompletionResponse, ChatErrorResponse};
use crate::translate::request::{to_native_body, to_wire_request, WireExtras};
use crate::translate::response::{
    from_wire_response, openai_error_to_anthropic, relabel_native_body,
};
use crate::translate::streaming::{relabel_native_stream, transcode_stream};

use axum::http::HeaderMap;
use bytes::Bytes;
use futures::StreamExt;
use std::time::Instant;

const DEFAULT_ANTHROPIC_VERSION: &str = "2023-06-01";

/// What the HTTP layer should send back.
pub enum Outcome {
    /// A complete JSON body with its status.
    Json { status: u16, body: Bytes },
    /// A unified SSE stream; upstream already confirmed success.
    Stream(ByteStream),
}

impl std::fmt::Debug for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Json { status, body } => f
                .debug_struct("Json")
                .field("status", status)
                .field("len", &body.len())
                .finish(),
            Outcome::Stream(_) => f.write_str("Stream"),
        }
    }
}

/// Per-request facts shared by the audit record and the upstream call.
struct RequestContext<'a> {
    request_id: &'a str,
    session_id: String,
    turn_index: u32,
    streaming: bool,
    raw: serde_json::Value,
    started: Instant,
}

impl RequestContext<'_> {
    fn record(&self, route: &Route) -> AuditRecord {
        AuditRecord::new(
            self.request_id,
            self.session_id.clone(),
            self.turn_index,
            route,
            self.raw.clone(),
            self.streaming,
        )
    }
}

/// Handle one `/v1/messages` body: resolve, apply policy, call upstream, translate,
/// and schedule the audit record.
///
/// Errors returned here have not been sent upstream successfully; errors after
/// routing is known are audited before they are returned.
pub async fn dispatch(
    config: &GatewayConfig,
    client: &reqwest::Client,
    audit: &AuditWriter,
    headers: &HeaderMap,
    body: &[u8],
    request_id: &str,
) -> Result<Outcome> {
    let started = Instant::now();

    let raw: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| GatewayError::invalid_request(format!("Invalid request body: {e}")))?;
    let mut req: MessagesRequest = serde_json::from_value(raw.clone())
        .map_err(|e| GatewayError::invalid_request(format!("Invalid request body: {e}")))?;

    let ctx = RequestContext {
        request_id,
        session_id: routing::session_id(headers, &req),
        turn_index: routing::turn_index(&req.messages),
        streaming: req.stream.unwrap_or(false),
        raw,
        started,
    };

    let resolved = routing::resolve(headers, &req, config);
    let route = match routing::apply_policy(resolved.clone(), &mut req, config) {
        Ok(route) => route,
        Err(e) => {
            tracing::warn!(request_id, provider = %resolved.provider, error = %e, "Request rejected by routing policy");
            audit.write(audit_error(&ctx, &resolved, &e));
            return Err(e);
        }
    };

    tracing::info!(
        request_id,
        provider = %route.provider,
        model = %route.wire_model,
        streaming = ctx.streaming,
        turn = ctx.turn_index,
        "Routing request"
    );

    let result = forward(&ctx, &route, &req, headers, config, client, audit).await;
    if let Err(ref e) = result {
        tracing::warn!(request_id, provider = %route.provider, status = e.status(), error = %e, "Request failed");
        audit.write(audit_error(&ctx, &route, e));
    }
    result
}

fn audit_error(ctx: &RequestContext<'_>, route: &Route, e: &GatewayError) -> AuditRecord {
    ctx.record(route)
        .with_error(e.status(), &e.to_string())
        .with_latency(ctx.started)
}

async fn forward(
    ctx: &RequestContext<'_>,
    route: &Route,
    req: &MessagesRequest,
    headers: &HeaderMap,
    config: &GatewayConfig,
    client: &reqwest::Client,
    audit: &AuditWriter,
) -> Result<Outcome> {
    let credential = upstream_credential(route.provider, headers, config)?;
    let base_url = config.effective_base_url(route.provider)?;
    let native = route.provider.is_native();
    // Native bodies carry the upstream model; relabel only when it was rewritten
    let relabel = native && route.wire_model != route.original_model;

    let request = if native {
        let url = format!("{base_url}/v1/messages");
        tracing::debug!(url = %url, "POST native");
        native_request(client, &url, credential.as_ref(), headers)
            .json(&to_native_body(ctx.raw.clone(), &route.wire_model))
    } else {
        let url = format!("{base_url}/chat/completions");
        tracing::debug!(url = %url, "POST openai-compatible");
        let wire = to_wire_request(
            req,
            &route.wire_model,
            WireExtras {
                provider: route.provider,
            },
        );
        let mut builder = client.post(&url);
        if let Some(cred) = credential.as_ref() {
            builder = builder.bearer_auth(cred.secret());
        }
        builder.json(&wire)
    };

    let response = request
        .send()
        .await
        .map_err(|e| GatewayError::provider(format!("Upstream request failed: {e}")))?;

    let status = response.status().as_u16();

    if !response.status().is_success() {
        let body = response.bytes().await.unwrap_or_default();
        let text = String::from_utf8_lossy(&body);
        tracing::warn!(status, body = %truncate_chars(&text, 300), "Upstream returned an error");

        if ctx.streaming {
            return Err(upstream_stream_error(status, &body, native));
        }

        // Non-streaming upstream errors go back exactly as received
        audit.write(
            ctx.record(route)
                .with_error(status, &text)
                .with_latency(ctx.started),
        );
        return Ok(Outcome::Json { status, body });
    }

    if ctx.streaming {
        let source: Option<ByteStream> = if response.content_length() == Some(0) {
            None
        } else if relabel {
            Some(Box::pin(relabel_native_stream(
                response.bytes_stream(),
                route.original_model.clone(),
            )))
        } else if native {
            Some(Box::pin(response.bytes_stream().map(|r| r.map_err(std::io::Error::other))))
        } else {
            Some(Box::pin(transcode_stream(
                response.bytes_stream(),
                route.original_model.clone(),
            )))
        };

        let (client_branch, reassembled) = tee(source, &route.original_model);
        audit.write_after(ctx.record(route), ctx.started, reassembled);
        return Ok(Outcome::Stream(client_branch));
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| GatewayError::provider(format!("Failed to read upstream response: {e}")))?;

    if native {
        let body = if relabel {
            relabel_native_body(&body, &route.original_model).map_or(body, Bytes::from)
        } else {
            body
        };
        let logged = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
        audit.write(
            ctx.record(route)
                .with_raw_response(logged)
                .with_latency(ctx.started),
        );
        return Ok(Outcome::Json { status, body });
    }

    let wire: ChatCompletionResponse = serde_json::from_slice(&body).map_err(|e| {
        GatewayError::translation(format!(
            "Failed to parse provider response: {}. Body: {}",
            e,
            truncate_chars(&String::from_utf8_lossy(&body), 300)
        ))
    })?;

    let unified = from_wire_response(&wire, &route.original_model);
    tracing::info!(
        request_id = ctx.request_id,
        input_tokens = unified.usage.input_tokens,
        output_tokens = unified.usage.output_tokens,
        "Completed"
    );

    let out = Bytes::from(serde_json::to_vec(&unified)?);
    audit.write(
        ctx.record(route)
            .with_response(&unified)
            .with_latency(ctx.started),
    );
    Ok(Outcome::Json { status, body: out })
}

fn native_request(
    client: &reqwest::Client,
    url: &str,
    credential: Option<&Credential>,
    headers: &HeaderMap,
) -> reqwest::RequestBuilder {
    let mut builder = client.post(url);

    builder = match credential {
        Some(Credential::ApiKey(key)) => builder.header("x-api-key", key),
        Some(Credential::Bearer(token)) => builder.bearer_auth(token),
        None => builder,
    };

    let version = headers
        .get("anthropic-version")
        .and_then(|v| v.to_str().ok())
        .unwrap_or(DEFAULT_ANTHROPIC_VERSION);
    builder = builder.header("anthropic-version", version);

    if let Some(beta) = headers.get("anthropic-beta").and_then(|v| v.to_str().ok()) {
        builder = builder.header("anthropic-beta", beta);
    }

    builder
}

/// A failed streaming call becomes an invalid-request error; nothing has been
/// streamed to the client yet.
fn upstream_stream_error(status: u16, body: &[u8], native: bool) -> GatewayError {
    let detail = serde_json::from_slice::<serde_json::Value>(body)
        .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(body).into_owned()));

    let message = if native {
        detail
            .pointer("/error/message")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
    } else {
        serde_json::from_slice::<ChatErrorResponse>(body)
            .ok()
            .map(|err| openai_error_to_anthropic(&err).error.message)
    }
    .unwrap_or_else(|| format!("Upstream returned status {status}"));

    GatewayError::invalid_request_with(status, message, detail)
}
