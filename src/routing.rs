//! Provider and model resolution.
//!
//! Decides which backend serves a request and which model identifier is sent to it,
//! then applies the routing policy for server-side tools and MCP connections.
//! Resolution itself never fails; only the policy step can reject a request.

use crate::config::{GatewayConfig, ServerToolMode};
use crate::error::{GatewayError, Result};
use crate::providers::Provider;
use crate::translate::anthropic_types::{Message, MessagesRequest, Role, Tool, WebSearchOptions};

use axum::http::HeaderMap;

/// Trusted header naming the provider to use.
pub const PROVIDER_HEADER: &str = "x-gateway-provider";
/// Trusted header naming the wire model, honoured together with [`PROVIDER_HEADER`].
pub const MODEL_HEADER: &str = "x-gateway-model";
pub const SESSION_HEADER: &str = "x-session-id";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

const OPENROUTER_PREFIX: &str = "or:";
const VLLM_PREFIXES: [&str; 2] = ["vllm:", "vllm/"];
const SGLANG_PREFIXES: [&str; 2] = ["sglang:", "sglang/"];

/// Where a request goes and under which name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub provider: Provider,
    /// Model identifier sent upstream.
    pub wire_model: String,
    /// Model identifier exactly as the client sent it.
    pub original_model: String,
}

/// Resolve the provider and wire model for a request.
///
/// Priority: model prefix, then the routing headers, then the native provider
/// with the model sent verbatim.
pub fn resolve(headers: &HeaderMap, req: &MessagesRequest, config: &GatewayConfig) -> Route {
    let original_model = req.model.clone();

    if let Some((provider, wire_model)) =
        resolve_prefix(&original_model, &config.routing.default_vendor)
    {
        return Route {
            provider,
            wire_model,
            original_model,
        };
    }

    if let Some(provider) = header_str(headers, PROVIDER_HEADER).and_then(|v| v.parse().ok()) {
        let wire_model = header_str(headers, MODEL_HEADER)
            .filter(|m| !m.is_empty())
            .map_or_else(|| original_model.clone(), str::to_string);
        return Route {
            provider,
            wire_model,
            original_model,
        };
    }

    Route {
        provider: Provider::Anthropic,
        wire_model: original_model.clone(),
        original_model,
    }
}

fn resolve_prefix(model: &str, default_vendor: &str) -> Option<(Provider, String)> {
    if let Some(rest) = model.strip_prefix(OPENROUTER_PREFIX) {
        let wire_model = if rest.contains('/') || default_vendor.is_empty() {
            rest.to_string()
        } else {
            format!("{default_vendor}/{rest}")
        };
        return Some((Provider::OpenRouter, wire_model));
    }

    let strip_any = |prefixes: &[&str]| {
        prefixes
            .iter()
            .find_map(|p| model.strip_prefix(p))
            .map(str::to_string)
    };

    if let Some(rest) = strip_any(&VLLM_PREFIXES[..]) {
        return Some((Provider::Vllm, rest));
    }
    if let Some(rest) = strip_any(&SGLANG_PREFIXES[..]) {
        return Some((Provider::Sglang, rest));
    }

    None
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
}

/// Number of completed assistant turns in the conversation so far.
#[must_use]
pub fn turn_index(messages: &[Message]) -> u32 {
    let count = messages
        .iter()
        .filter(|m| m.role == Role::Assistant)
        .count();
    u32::try_from(count).unwrap_or(u32::MAX)
}

/// How a declared tool is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    /// Executed by the client (custom tools and Anthropic-defined client tools).
    Client,
    /// Provider-hosted web search.
    WebSearch,
    /// Any other provider-hosted tool (code execution, web fetch, ...).
    OtherServer,
}

const WEB_SEARCH_TYPE_PREFIX: &str = "web_search_";
const OTHER_SERVER_TYPE_PREFIXES: &[&str] = &["code_execution_", "web_fetch_"];

#[must_use]
pub fn classify_tool(tool: &Tool) -> ToolKind {
    let Some(tool_type) = tool.tool_type.as_deref() else {
        return ToolKind::Client;
    };
    if tool_type.starts_with(WEB_SEARCH_TYPE_PREFIX) {
        ToolKind::WebSearch
    } else if OTHER_SERVER_TYPE_PREFIXES
        .iter()
        .any(|p| tool_type.starts_with(p))
    {
        ToolKind::OtherServer
    } else {
        ToolKind::Client
    }
}

/// Server-side tools found in a request, grouped by category.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerTools {
    pub web_search: Vec<String>,
    pub other: Vec<String>,
}

impl ServerTools {
    pub fn scan(tools: Option<&[Tool]>) -> Self {
        let mut found = Self::default();
        for tool in tools.unwrap_or_default() {
            let label = tool
                .tool_type
                .clone()
                .unwrap_or_else(|| tool.name.clone());
            match classify_tool(tool) {
                ToolKind::WebSearch => found.web_search.push(label),
                ToolKind::OtherServer => found.other.push(label),
                ToolKind::Client => {}
            }
        }
        found
    }

    /// Server tools that the routing policy must handle for `provider`.
    ///
    /// Web search never counts: translated backends get a synthesized search
    /// configuration instead, which only OpenRouter acts on.
    #[must_use]
    pub fn unsupported_by(&self, provider: Provider) -> Vec<String> {
        if provider.is_native() {
            return Vec::new();
        }
        self.other.clone()
    }
}

/// Apply the routing policy to a resolved route.
///
/// May force-route to the native provider, may synthesize a web-search
/// configuration on the request, and rejects what the chosen backend cannot serve.
pub fn apply_policy(
    mut route: Route,
    req: &mut MessagesRequest,
    config: &GatewayConfig,
) -> Result<Route> {
    let server_tools = ServerTools::scan(req.tools.as_deref());

    let unsupported = server_tools.unsupported_by(route.provider);
    if !unsupported.is_empty() {
        match config.routing.server_tools {
            ServerToolMode::Error => {
                return Err(GatewayError::invalid_request_with(
                    400,
                    format!(
                        "Server tools are not supported by provider '{}'",
                        route.provider
                    ),
                    serde_json::json!({
                        "provider": route.provider,
                        "server_tools": unsupported,
                    }),
                ));
            }
            ServerToolMode::EnforceAnthropic => {
                tracing::info!(
                    from = %route.provider,
                    tools = ?unsupported,
                    "Force-routing request with server tools to anthropic"
                );
                route.provider = Provider::Anthropic;
                if let Some(ref model) = config.routing.enforce_model {
                    route.wire_model = model.clone();
                }
            }
            ServerToolMode::Emulate => {
                return Err(GatewayError::invalid_request_with(
                    501,
                    "Server tool emulation is not implemented",
                    serde_json::json!({
                        "provider": route.provider,
                        "server_tools": unsupported,
                    }),
                ));
            }
        }
    }

    if !route.provider.is_native()
        && !server_tools.web_search.is_empty()
        && req.web_search_options.is_none()
    {
        req.web_search_options = Some(WebSearchOptions::default());
    }

    let has_mcp = req.mcp_servers.as_ref().is_some_and(|s| !s.is_empty());
    if has_mcp && !route.provider.is_native() && !config.routing.mcp_bridge {
        return Err(GatewayError::invalid_request_with(
            400,
            format!(
                "mcp_servers are not supported by provider '{}'",
                route.provider
            ),
            serde_json::json!({ "provider": route.provider }),
        ));
    }

    Ok(route)
}

/// Client-chosen request id, or a freshly generated one.
pub fn request_id(headers: &HeaderMap) -> String {
    header_str(headers, REQUEST_ID_HEADER)
        .filter(|v| !v.is_empty())
        .map_or_else(
            || format!("req_{}", uuid::Uuid::new_v4().simple()),
            str::to_string,
        )
}

/// Session id from the session header, else from the `_session_` suffix of
/// `metadata.user_id`.
pub fn session_id(headers: &HeaderMap, req: &MessagesRequest) -> String {
    if let Some(id) = header_str(headers, SESSION_HEADER).filter(|v| !v.is_empty()) {
        return id.to_string();
    }

    req.metadata
        .as_ref()
        .and_then(|m| m.user_id.as_deref())
        .and_then(|uid| uid.rsplit_once("_session_"))
        .map(|(_, session)| session)
        .filter(|s| !s.is_empty())
        .unwrap_or("no-session")
        .to_string()
}
