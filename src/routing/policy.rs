//! Routing Policy
//!
//! Pure decision function mapping (complexity, priority, domain) to a model
//! key. The matrix is sparse: only curated combinations are populated, and
//! lookup degrades through three levels:
//!
//! 1. `matrix[complexity][priority][domain]`
//! 2. `matrix[complexity][priority][General]`
//! 3. [`DEFAULT_MODEL_KEY`]
//!
//! Resolution is deterministic and total — it returns a key for every
//! possible triple.

use super::{TaskComplexity, TaskDomain, TaskPriority};
use std::collections::HashMap;

/// The balanced general-purpose fallback model
pub const DEFAULT_MODEL_KEY: &str = "gpt4o";

/// Sparse routing matrix: complexity → priority → domain → model key
///
/// Built once at startup and read-only thereafter.
#[derive(Debug, Clone, Default)]
pub struct RoutingMatrix {
    entries: HashMap<(TaskComplexity, TaskPriority), HashMap<TaskDomain, String>>,
}

impl RoutingMatrix {
    /// Create an empty matrix
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Add an entry, builder style
    pub fn with_entry(
        mut self,
        complexity: TaskComplexity,
        priority: TaskPriority,
        domain: TaskDomain,
        key: impl Into<String>,
    ) -> Self {
        self.entries
            .entry((complexity, priority))
            .or_default()
            .insert(domain, key.into());
        self
    }

    /// The curated production matrix
    pub fn curated() -> Self {
        use TaskComplexity::*;
        use TaskDomain::*;
        use TaskPriority::*;

        Self::empty()
            // Ultra complexity
            .with_entry(Ultra, Quality, Code, "codestral")
            .with_entry(Ultra, Quality, Analysis, "gpt5-chat")
            .with_entry(Ultra, Quality, General, "gpt5-chat")
            .with_entry(Ultra, Reasoning, Code, "deepseek-r1")
            .with_entry(Ultra, Reasoning, Analysis, "deepseek-r1")
            .with_entry(Ultra, Reasoning, General, "gpt5-chat")
            // High complexity
            .with_entry(High, Quality, Code, "codestral")
            .with_entry(High, Quality, Analysis, "gpt4o")
            .with_entry(High, Quality, General, "gpt4o")
            .with_entry(High, Speed, General, "grok-fast")
            // Medium complexity
            .with_entry(Medium, Balanced, General, "gpt4o")
    }

    /// Look up the exact (complexity, priority, domain) cell
    fn get(
        &self,
        complexity: TaskComplexity,
        priority: TaskPriority,
        domain: TaskDomain,
    ) -> Option<&str> {
        self.entries
            .get(&(complexity, priority))
            .and_then(|by_domain| by_domain.get(&domain))
            .map(String::as_str)
    }

    /// Number of populated cells
    pub fn len(&self) -> usize {
        self.entries.values().map(HashMap::len).sum()
    }

    /// Whether the matrix has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Routing policy over a matrix with a fixed default key
#[derive(Debug, Clone)]
pub struct RoutingPolicy {
    matrix: RoutingMatrix,
    default_key: String,
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        Self::new(RoutingMatrix::curated(), DEFAULT_MODEL_KEY)
    }
}

impl RoutingPolicy {
    /// Create a policy from a matrix and a fallback key
    pub fn new(matrix: RoutingMatrix, default_key: impl Into<String>) -> Self {
        Self {
            matrix,
            default_key: default_key.into(),
        }
    }

    /// Resolve a hint triple to a model key
    ///
    /// Falls back from the exact domain to [`TaskDomain::General`], then to
    /// the policy's default key. Never fails.
    pub fn resolve(
        &self,
        complexity: TaskComplexity,
        priority: TaskPriority,
        domain: TaskDomain,
    ) -> &str {
        self.matrix
            .get(complexity, priority, domain)
            .or_else(|| self.matrix.get(complexity, priority, TaskDomain::General))
            .unwrap_or(&self.default_key)
    }

    /// The fallback key
    pub fn default_key(&self) -> &str {
        &self.default_key
    }
}
