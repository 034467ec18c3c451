//! Model Registry
//!
//! Static catalogue of named model configurations. Populated once from the
//! fixed production table (plus any caller registrations made before first
//! use) and read-only thereafter.
//!
//! Credentials are attached at registry construction: a provider that needs
//! them but has none is a configuration error surfaced up front, never a
//! runtime failure inside the pipeline.

use super::RoutingError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Credential bundle for a hosted provider endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Endpoint base URL, e.g. "https://my-resource.openai.azure.com"
    pub api_base: String,
    /// API key
    pub api_key: String,
    /// API version, e.g. "2025-01-01-preview"
    pub api_version: Option<String>,
}

impl Credentials {
    /// Create a new credential bundle
    pub fn new(api_base: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
            api_key: api_key.into(),
            api_version: None,
        }
    }

    /// Set the API version
    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = Some(version.into());
        self
    }
}

/// Configuration for a single model. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider-side model identifier, e.g. "gpt-4o"
    pub name: String,
    /// Provider tag, e.g. "azure"
    pub provider: String,
    /// Sampling temperature, clamped to 0.0–2.0
    pub temperature: f64,
    /// Optional completion token ceiling
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,
    /// Whether the provider may cache identical requests
    #[serde(default = "default_cache")]
    pub cache: bool,
    /// Credential bundle for hosted providers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
}

fn default_cache() -> bool {
    true
}

impl ModelConfig {
    /// Create a new model config with default temperature
    pub fn new(name: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            provider: provider.into(),
            temperature: 0.7,
            max_tokens: None,
            cache: true,
            credentials: None,
        }
    }

    /// Set the sampling temperature (clamped to 0.0–2.0)
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature.clamp(0.0, 2.0);
        self
    }

    /// Set the completion token ceiling
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set the caching flag
    pub fn with_cache(mut self, cache: bool) -> Self {
        self.cache = cache;
        self
    }

    /// Attach credentials
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }
}

/// Catalogue of named model configurations
///
/// Construct with [`ModelRegistry::with_defaults`] for the curated production
/// table, or [`ModelRegistry::empty`] and [`ModelRegistry::register`] for a
/// custom catalogue (useful for tests with mock factories).
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: HashMap<String, ModelConfig>,
}

impl ModelRegistry {
    /// Create an empty registry
    pub fn empty() -> Self {
        Self {
            models: HashMap::new(),
        }
    }

    /// Create a registry seeded with the default catalogue
    ///
    /// Mirrors the curated production table: two reasoning models, two fast
    /// models, and one code specialist, all behind the same credential bundle.
    pub fn with_defaults(credentials: Option<Credentials>) -> Self {
        let mut registry = Self::empty();

        let with_creds = |config: ModelConfig| match &credentials {
            Some(c) => config.with_credentials(c.clone()),
            None => config,
        };

        // Reasoning models
        registry.register(
            "gpt5-chat",
            with_creds(
                ModelConfig::new("gpt-5-chat", "azure")
                    .with_temperature(1.0)
                    .with_max_tokens(16_000),
            ),
        );
        registry.register(
            "deepseek-r1",
            with_creds(
                ModelConfig::new("DeepSeek-R1-0528", "azure")
                    .with_temperature(0.4)
                    .with_max_tokens(250_000),
            ),
        );

        // Fast models
        registry.register(
            "gpt4o",
            with_creds(ModelConfig::new("gpt-4o", "azure").with_temperature(0.7)),
        );
        registry.register(
            "grok-fast",
            with_creds(
                ModelConfig::new("grok-4-fast-reasoning", "azure")
                    .with_temperature(0.6)
                    .with_max_tokens(250_000),
            ),
        );

        // Specialized
        registry.register(
            "codestral",
            with_creds(ModelConfig::new("Codestral-2501", "azure").with_temperature(0.3)),
        );

        registry
    }

    /// Register a model configuration under a key
    ///
    /// Intended for use before the registry is handed to a router; later
    /// registrations are not observed by already-cached clients.
    pub fn register(&mut self, key: impl Into<String>, config: ModelConfig) {
        self.models.insert(key.into(), config);
    }

    /// Look up a model configuration by key
    pub fn lookup(&self, key: &str) -> Result<&ModelConfig, RoutingError> {
        self.models
            .get(key)
            .ok_or_else(|| RoutingError::UnknownModelKey {
                key: key.to_string(),
            })
    }

    /// Whether a key is present
    pub fn contains(&self, key: &str) -> bool {
        self.models.contains_key(key)
    }

    /// All registered keys
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    /// Number of registered models
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}
