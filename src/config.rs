//! Provider configuration model.

use crate::error::{GenStudioError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default request timeout for every provider.
pub const DEFAULT_TIMEOUT_MS: u64 = 120_000;

/// Default fal.ai endpoint.
pub const FAL_DEFAULT_BASE_URL: &str = "https://fal.run";

/// Default Google Generative Language endpoint.
pub const GOOGLE_DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Remote image-generation provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// fal.ai hosted models.
    Fal,
    /// Google Gemini image models.
    Google,
    /// Self-hosted or third-party endpoint speaking the fal protocol.
    Custom,
}

impl ProviderKind {
    /// All providers, in display order.
    pub const ALL: [ProviderKind; 3] = [Self::Fal, Self::Google, Self::Custom];

    /// Returns the tag used in persisted documents and on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fal => "fal",
            Self::Google => "google",
            Self::Custom => "custom",
        }
    }

    /// Environment variable consulted when no key is stored.
    pub fn api_key_env_var(&self) -> Option<&'static str> {
        match self {
            Self::Fal => Some("FAL_KEY"),
            Self::Google => Some("GOOGLE_API_KEY"),
            Self::Custom => None,
        }
    }

    /// Returns the trimmed key, or `MissingCredential` for a blank one.
    /// Checked locally, before any request is sent.
    pub fn require_api_key(self, api_key: &str) -> Result<&str> {
        match api_key.trim() {
            "" => Err(GenStudioError::MissingCredential(self.to_string())),
            key => Ok(key),
        }
    }

    /// Base URL used when the config leaves it unset.
    pub fn default_base_url(&self) -> Option<&'static str> {
        match self {
            Self::Fal => Some(FAL_DEFAULT_BASE_URL),
            Self::Google => Some(GOOGLE_DEFAULT_BASE_URL),
            Self::Custom => None,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = GenStudioError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fal" => Ok(Self::Fal),
            "google" | "gemini" => Ok(Self::Google),
            "custom" => Ok(Self::Custom),
            _ => Err(GenStudioError::UnknownProvider(s.to_string())),
        }
    }
}

/// Credentials and endpoint for one provider.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    /// Which provider this config targets.
    pub provider: ProviderKind,
    /// API key. Empty means not configured.
    #[serde(default)]
    pub api_key: String,
    /// Endpoint override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// HTTP(S) proxy URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    /// Request timeout in milliseconds.
    #[serde(default, rename = "timeout", skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl ProviderConfig {
    /// Creates a config with the given key and no overrides.
    pub fn new(provider: ProviderKind, api_key: impl Into<String>) -> Self {
        Self {
            provider,
            api_key: api_key.into(),
            base_url: None,
            proxy: None,
            timeout_ms: None,
        }
    }

    /// The config a fresh installation starts with: no key, default endpoint.
    pub fn defaults(provider: ProviderKind) -> Self {
        Self {
            provider,
            api_key: String::new(),
            base_url: provider.default_base_url().map(str::to_string),
            proxy: None,
            timeout_ms: Some(DEFAULT_TIMEOUT_MS),
        }
    }

    /// Sets the endpoint override.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Sets the proxy.
    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Returns true if a non-blank key is configured.
    pub fn has_api_key(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    /// Effective request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS))
    }

    /// Effective base URL: the override if non-blank, else the provider default.
    pub fn effective_base_url(&self) -> Option<&str> {
        self.base_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .or_else(|| self.provider.default_base_url())
    }

    /// Fills a blank key from the provider's environment variable.
    pub fn with_env_fallback(mut self) -> Self {
        if !self.has_api_key() {
            if let Some(key) = self
                .provider
                .api_key_env_var()
                .and_then(|var| std::env::var(var).ok())
            {
                self.api_key = key;
            }
        }
        self
    }

    /// Applies a partial update.
    pub fn merge(&mut self, update: ProviderConfigUpdate) {
        if let Some(key) = update.api_key {
            self.api_key = key;
        }
        if let Some(url) = update.base_url {
            self.base_url = url;
        }
        if let Some(proxy) = update.proxy {
            self.proxy = proxy;
        }
        if let Some(timeout) = update.timeout_ms {
            self.timeout_ms = timeout;
        }
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("provider", &self.provider)
            .field("api_key", &if self.has_api_key() { "***" } else { "" })
            .field("base_url", &self.base_url)
            .field("proxy", &self.proxy)
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

/// Partial update for a [`ProviderConfig`]. `None` leaves a field untouched;
/// `Some(None)` clears an optional field.
#[derive(Debug, Clone, Default)]
pub struct ProviderConfigUpdate {
    /// New API key.
    pub api_key: Option<String>,
    /// New endpoint override.
    pub base_url: Option<Option<String>>,
    /// New proxy.
    pub proxy: Option<Option<String>>,
    /// New timeout.
    pub timeout_ms: Option<Option<u64>>,
}
