use crate::error::{GatewayError, Result};
use crate::providers::Provider;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub audit: AuditConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Vendor namespace prepended to unqualified `or:` model names.
    #[serde(default = "default_vendor")]
    pub default_vendor: String,
    #[serde(default)]
    pub server_tools: ServerToolMode,
    /// Wire model used when a request is force-routed to the native provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enforce_model: Option<String>,
    /// Side-channel bridge for `mcp_servers` on non-native providers.
    #[serde(default)]
    pub mcp_bridge: bool,
}

/// What to do when server-executed tools are sent to a backend that cannot run them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ServerToolMode {
    #[default]
    Error,
    EnforceAnthropic,
    /// Recognised but not implemented; requests hitting it are rejected.
    Emulate,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub anthropic: ProviderConfig,
    #[serde(default)]
    pub openrouter: ProviderConfig,
    #[serde(default)]
    pub vllm: ProviderConfig,
    #[serde(default)]
    pub sglang: ProviderConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Environment variable holding a gateway-side key. Client credentials are used when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_audit_dir")]
    pub dir: PathBuf,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            routing: RoutingConfig::default(),
            providers: ProvidersConfig::default(),
            audit: AuditConfig::default(),
        }
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            default_vendor: default_vendor(),
            server_tools: ServerToolMode::default(),
            enforce_model: None,
            mcp_bridge: false,
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: default_audit_dir(),
        }
    }
}

fn default_port() -> u16 {
    4222
}

fn default_vendor() -> String {
    "openai".to_string()
}

fn default_true() -> bool {
    true
}

fn default_audit_dir() -> PathBuf {
    PathBuf::from("gateway-audit")
}

impl GatewayConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Search standard locations for a config file.
    /// Priority: CLI arg > CWD > XDG config > home dir > built-in defaults
    pub fn find_and_load(explicit_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit_path {
            return Self::load(path);
        }

        for candidate in &config_search_paths() {
            if candidate.exists() {
                tracing::info!(path = %candidate.display(), "Loading config");
                return Self::load(candidate);
            }
        }

        tracing::info!("No config file found, using built-in defaults");
        Ok(Self::default())
    }

    pub fn provider(&self, provider: Provider) -> &ProviderConfig {
        match provider {
            Provider::Anthropic => &self.providers.anthropic,
            Provider::OpenRouter => &self.providers.openrouter,
            Provider::Vllm => &self.providers.vllm,
            Provider::Sglang => &self.providers.sglang,
        }
    }

    /// Resolve the effective base URL (config override or provider preset default).
    /// A provider without one is unusable.
    pub fn effective_base_url(&self, provider: Provider) -> Result<String> {
        if let Some(ref url) = self.provider(provider).base_url {
            return Ok(url.trim_end_matches('/').to_string());
        }

        provider
            .default_base_url()
            .map(str::to_string)
            .ok_or_else(|| {
                GatewayError::config(format!(
                    "Provider '{provider}' has no base_url configured. \
                     Set [providers.{provider}] base_url in the config file."
                ))
            })
    }

    /// Gateway-held API key for the provider, if one is configured and present.
    pub fn configured_api_key(&self, provider: Provider) -> Option<String> {
        let var = self.provider(provider).api_key_env.as_deref()?;
        std::env::var(var).ok().filter(|v| !v.is_empty())
    }
}

/// Config file locations in search order.
pub fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    paths.push(PathBuf::from("claude-gateway.toml"));

    if cfg!(target_os = "macos") {
        if let Some(home) = home_dir() {
            paths.push(
                home.join("Library")
                    .join("Application Support")
                    .join("claude-gateway")
                    .join("config.toml"),
            );
        }
    } else {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            paths.push(PathBuf::from(xdg).join("claude-gateway").join("config.toml"));
        }
        if let Some(home) = home_dir() {
            paths.push(home.join(".config").join("claude-gateway").join("config.toml"));
        }
    }

    if let Some(home) = home_dir() {
        paths.push(home.join(".claude-gateway.toml"));
    }

    paths
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
