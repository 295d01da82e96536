//! The closed set of backends the gateway can route to.
//!
//! Each provider knows its default base URL (if it has a public one), whether it
//! speaks the Anthropic Messages protocol natively or needs the OpenAI-compatible
//! adapter, whether it insists on a credential, and which environment variable
//! conventionally holds its API key.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Anthropic,
    OpenRouter,
    Vllm,
    Sglang,
}

/// How a request reaches the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    /// Anthropic Messages pass-through.
    Native,
    /// OpenAI chat-completions via the translation adapter.
    OpenAiCompatible,
}

impl Provider {
    pub const ALL: [Provider; 4] = [
        Provider::Anthropic,
        Provider::OpenRouter,
        Provider::Vllm,
        Provider::Sglang,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Provider::Anthropic => "anthropic",
            Provider::OpenRouter => "openrouter",
            Provider::Vllm => "vllm",
            Provider::Sglang => "sglang",
        }
    }

    #[must_use]
    pub fn wire_format(self) -> WireFormat {
        match self {
            Provider::Anthropic => WireFormat::Native,
            Provider::OpenRouter | Provider::Vllm | Provider::Sglang => {
                WireFormat::OpenAiCompatible
            }
        }
    }

    #[must_use]
    pub fn is_native(self) -> bool {
        self.wire_format() == WireFormat::Native
    }

    /// Self-hosted inference servers accept unauthenticated requests.
    #[must_use]
    pub fn requires_auth(self) -> bool {
        match self {
            Provider::Anthropic | Provider::OpenRouter => true,
            Provider::Vllm | Provider::Sglang => false,
        }
    }

    /// Whether the backend can run a web search itself.
    #[must_use]
    pub fn supports_web_search(self) -> bool {
        matches!(self, Provider::Anthropic | Provider::OpenRouter)
    }

    #[must_use]
    pub fn default_base_url(self) -> Option<&'static str> {
        match self {
            Provider::Anthropic => Some("https://api.anthropic.com"),
            Provider::OpenRouter => Some("https://openrouter.ai/api/v1"),
            Provider::Vllm | Provider::Sglang => None,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Provider::ALL
            .into_iter()
            .find(|p| p.name() == lower)
            .ok_or_else(|| format!("unknown provider '{s}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_providers() {
        assert_eq!("anthropic".parse::<Provider>(), Ok(Provider::Anthropic));
        assert_eq!("OpenRouter".parse::<Provider>(), Ok(Provider::OpenRouter)); // case-insensitive
        assert_eq!(" vllm ".parse::<Provider>(), Ok(Provider::Vllm));
        assert!("fireworks".parse::<Provider>().is_err());
    }

    #[test]
    fn test_only_anthropic_is_native() {
        for provider in Provider::ALL {
            assert_eq!(
                provider.is_native(),
                provider == Provider::Anthropic,
                "Provider {provider} has the wrong wire format"
            );
        }
    }

    #[test]
    fn test_self_hosted_providers_have_no_default_url_or_auth() {
        for provider in [Provider::Vllm, Provider::Sglang] {
            assert!(provider.default_base_url().is_none());
            assert!(!provider.requires_auth());
        }
        assert!(Provider::Anthropic.requires_auth());
        assert!(Provider::OpenRouter.requires_auth());
    }

    #[test]
    fn test_serde_names_match_display() {
        let json = serde_json::to_string(&Provider::OpenRouter).unwrap();
        assert_eq!(json, "\"openrouter\"");
    }
}
