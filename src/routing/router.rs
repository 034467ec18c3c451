//! Model Router
//!
//! Resolves hint triples to model keys via the [`RoutingPolicy`] and hands
//! out shared backend clients, constructing each at most once.
//!
//! # Caching
//!
//! Clients are cached per model key. Each key owns a `tokio::sync::OnceCell`
//! so concurrent first requests for the same key race to a single
//! construction; the map lock is held only long enough to fetch the cell.
//! A failed construction leaves the cell empty and is retried on the next
//! request.

use super::{ModelConfig, ModelRegistry, RoutingError, RoutingKey, RoutingPolicy};
use crate::backend::{ChatCompletionsBackend, LmBackend};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;

/// Constructs backend clients from model configurations
///
/// The router is generic over construction so tests can swap in mock
/// factories without touching the cache or resolution logic.
pub trait BackendFactory: Send + Sync {
    /// Build a client for the given key and configuration
    fn create(&self, key: &str, config: &ModelConfig)
        -> Result<Arc<dyn LmBackend>, RoutingError>;
}

/// Default factory producing [`ChatCompletionsBackend`] clients
#[derive(Debug, Default)]
pub struct HttpBackendFactory;

impl BackendFactory for HttpBackendFactory {
    fn create(
        &self,
        key: &str,
        config: &ModelConfig,
    ) -> Result<Arc<dyn LmBackend>, RoutingError> {
        let backend = ChatCompletionsBackend::from_config(key, config)?;
        Ok(Arc::new(backend))
    }
}

type CachedClient = Arc<OnceCell<Arc<dyn LmBackend>>>;

/// Routes hint triples to shared backend clients
pub struct ModelRouter {
    registry: ModelRegistry,
    policy: RoutingPolicy,
    factory: Arc<dyn BackendFactory>,
    cache: Mutex<HashMap<String, CachedClient>>,
}

impl ModelRouter {
    /// Create a router with the default HTTP factory
    pub fn new(registry: ModelRegistry, policy: RoutingPolicy) -> Self {
        Self::with_factory(registry, policy, Arc::new(HttpBackendFactory))
    }

    /// Create a router with a custom backend factory
    pub fn with_factory(
        registry: ModelRegistry,
        policy: RoutingPolicy,
        factory: Arc<dyn BackendFactory>,
    ) -> Self {
        Self {
            registry,
            policy,
            factory,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve a hint triple to a model key without constructing a client
    pub fn resolve_key(&self, key: RoutingKey) -> &str {
        self.policy.resolve(key.complexity, key.priority, key.domain)
    }

    /// Resolve a hint triple and return the shared client for it
    pub async fn get_model(&self, key: RoutingKey) -> Result<Arc<dyn LmBackend>, RoutingError> {
        let resolved = self.resolve_key(key).to_string();
        tracing::debug!(
            complexity = ?key.complexity,
            priority = ?key.priority,
            domain = ?key.domain,
            model_key = %resolved,
            "routing resolved"
        );
        self.get_by_key(&resolved).await
    }

    /// Return the shared client for an explicit model key
    ///
    /// The first caller for a key constructs the client; concurrent callers
    /// for the same key await that construction and share the result.
    pub async fn get_by_key(&self, key: &str) -> Result<Arc<dyn LmBackend>, RoutingError> {
        // Validate up front so unknown keys never occupy a cache slot
        let config = self.registry.lookup(key)?.clone();

        let cell = {
            let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            cache.entry(key.to_string()).or_default().clone()
        };

        let client = cell
            .get_or_try_init(|| async { self.factory.create(key, &config) })
            .await?;

        Ok(client.clone())
    }

    /// The registry backing this router
    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Number of constructed clients currently cached
    pub fn cached_count(&self) -> usize {
        let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.values().filter(|cell| cell.initialized()).count()
    }
}

impl std::fmt::Debug for ModelRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRouter")
            .field("registry", &self.registry)
            .field("policy", &self.policy)
            .field("cached", &self.cached_count())
            .finish()
    }
}
