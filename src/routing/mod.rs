//! Model Routing for the ROMA Pipeline
//!
//! Selects which LM configuration serves each pipeline stage based on
//! (complexity, priority, domain) hints. The layers, bottom up:
//!
//! ```text
//! ModelRegistry  — static catalogue of named model configurations
//!       ↓
//! RoutingPolicy  — (complexity, priority, domain) → model key, layered fallback
//!       ↓
//! ModelRouter    — lazy per-key client cache over a BackendFactory
//! ```
//!
//! Routing is deterministic and total: every hint triple resolves to a key,
//! degrading toward the balanced general-purpose model rather than erroring.

pub mod policy;
pub mod registry;
pub mod router;

use serde::{Deserialize, Serialize};

pub use policy::{RoutingMatrix, RoutingPolicy, DEFAULT_MODEL_KEY};
pub use registry::{Credentials, ModelConfig, ModelRegistry};
pub use router::{BackendFactory, HttpBackendFactory, ModelRouter};

/// Task complexity level used as a routing hint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskComplexity {
    Trivial,
    Low,
    Medium,
    High,
    Ultra,
}

impl TaskComplexity {
    /// All complexity levels, for exhaustive iteration
    pub const ALL: [TaskComplexity; 5] = [
        TaskComplexity::Trivial,
        TaskComplexity::Low,
        TaskComplexity::Medium,
        TaskComplexity::High,
        TaskComplexity::Ultra,
    ];
}

/// Execution priority used as a routing hint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Quality,
    Speed,
    Balanced,
    Cost,
    Reasoning,
}

impl TaskPriority {
    /// All priorities, for exhaustive iteration
    pub const ALL: [TaskPriority; 5] = [
        TaskPriority::Quality,
        TaskPriority::Speed,
        TaskPriority::Balanced,
        TaskPriority::Cost,
        TaskPriority::Reasoning,
    ];
}

/// Specialized task domain used as a routing hint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskDomain {
    Code,
    Document,
    Creative,
    Analysis,
    General,
    Realtime,
}

impl TaskDomain {
    /// All domains, for exhaustive iteration
    pub const ALL: [TaskDomain; 6] = [
        TaskDomain::Code,
        TaskDomain::Document,
        TaskDomain::Creative,
        TaskDomain::Analysis,
        TaskDomain::General,
        TaskDomain::Realtime,
    ];
}

/// A complete routing hint triple
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoutingKey {
    pub complexity: TaskComplexity,
    pub priority: TaskPriority,
    pub domain: TaskDomain,
}

impl RoutingKey {
    /// Create a new routing key
    pub fn new(complexity: TaskComplexity, priority: TaskPriority, domain: TaskDomain) -> Self {
        Self {
            complexity,
            priority,
            domain,
        }
    }
}

impl Default for RoutingKey {
    fn default() -> Self {
        Self {
            complexity: TaskComplexity::Medium,
            priority: TaskPriority::Balanced,
            domain: TaskDomain::General,
        }
    }
}

/// Errors from registry lookup or client construction
#[derive(Debug, Clone, PartialEq)]
pub enum RoutingError {
    /// The resolved model key is not present in the registry
    UnknownModelKey { key: String },
    /// The model's provider requires credentials that were not supplied
    MissingCredentials { key: String, provider: String },
    /// The backend factory could not construct a client
    ClientConstruction { key: String, message: String },
}

impl std::fmt::Display for RoutingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownModelKey { key } => {
                write!(f, "Unknown model key: '{}'", key)
            }
            Self::MissingCredentials { key, provider } => {
                write!(
                    f,
                    "Model '{}' requires credentials for provider '{}'",
                    key, provider
                )
            }
            Self::ClientConstruction { key, message } => {
                write!(f, "Failed to construct client for '{}': {}", key, message)
            }
        }
    }
}

impl std::error::Error for RoutingError {}
