//! Upstream credential selection.

use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::providers::Provider;

use axum::http::HeaderMap;

/// Placeholder key clients send to self-hosted backends that need none.
pub const NO_AUTH_SENTINEL: &str = "no-auth";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// Sent as `x-api-key` to native backends.
    ApiKey(String),
    /// Sent as `Authorization: Bearer` (OAuth tokens, OpenAI-compatible keys).
    Bearer(String),
}

impl Credential {
    pub fn secret(&self) -> &str {
        match self {
            Credential::ApiKey(s) | Credential::Bearer(s) => s,
        }
    }
}

/// Pick the credential to send upstream.
///
/// A key configured on the gateway wins over whatever the client sent. Providers
/// that require auth fail with an authentication error when none is available;
/// the others get `None`, and for them the `no-auth` sentinel also means `None`.
pub fn upstream_credential(
    provider: Provider,
    headers: &HeaderMap,
    config: &GatewayConfig,
) -> Result<Option<Credential>> {
    let credential = config
        .configured_api_key(provider)
        .map(Credential::ApiKey)
        .or_else(|| client_credential(headers));

    let credential = match credential {
        Some(c) if !provider.requires_auth() && c.secret() == NO_AUTH_SENTINEL => None,
        other => other,
    };

    if credential.is_none() && provider.requires_auth() {
        return Err(GatewayError::authentication(format!(
            "Provider '{provider}' requires an API key (x-api-key or Authorization header)"
        )));
    }

    Ok(credential)
}

fn client_credential(headers: &HeaderMap) -> Option<Credential> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    if let Some(key) = header("x-api-key") {
        return Some(Credential::ApiKey(key.to_string()));
    }

    header("authorization")
        .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|token| Credential::Bearer(token.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_static(v));
        }
        map
    }

    #[test]
    fn test_required_provider_without_key_fails() {
        let err =
            upstream_credential(Provider::Anthropic, &HeaderMap::new(), &GatewayConfig::default())
                .unwrap_err();
        assert_eq!(err.status(), 401);
    }

    #[test]
    fn test_client_api_key_forwarded() {
        let cred = upstream_credential(
            Provider::Anthropic,
            &headers(&[("x-api-key", "sk-ant-123")]),
            &GatewayConfig::default(),
        )
        .unwrap();
        assert_eq!(cred, Some(Credential::ApiKey("sk-ant-123".to_string())));
    }

    #[test]
    fn test_bearer_token_forwarded() {
        let cred = upstream_credential(
            Provider::OpenRouter,
            &headers(&[("authorization", "Bearer sk-or-xyz")]),
            &GatewayConfig::default(),
        )
        .unwrap();
        assert_eq!(cred, Some(Credential::Bearer("sk-or-xyz".to_string())));
    }

    #[test]
    fn test_no_auth_sentinel_for_optional_providers() {
        let config = GatewayConfig::default();
        let sentinel = headers(&[("x-api-key", NO_AUTH_SENTINEL)]);

        assert_eq!(upstream_credential(Provider::Vllm, &sentinel, &config).unwrap(), None);
        assert_eq!(upstream_credential(Provider::Sglang, &HeaderMap::new(), &config).unwrap(), None);

        // Only the self-hosted providers treat the sentinel as absent.
        assert_eq!(
            upstream_credential(Provider::OpenRouter, &sentinel, &config).unwrap(),
            Some(Credential::ApiKey(NO_AUTH_SENTINEL.to_string()))
        );
    }

    #[test]
    fn test_configured_key_wins() {
        let var = "CLAUDE_GATEWAY_TEST_VLLM_KEY";
        std::env::set_var(var, "server-key");
        let mut config = GatewayConfig::default();
        config.providers.vllm.api_key_env = Some(var.to_string());

        let cred =
            upstream_credential(Provider::Vllm, &headers(&[("x-api-key", "client")]), &config)
                .unwrap();
        assert_eq!(cred, Some(Credential::ApiKey("server-key".to_string())));
        std::env::remove_var(var);
    }
}
