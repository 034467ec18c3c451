//! ROMA Core - Recursive Task Decomposition Engine
//!
//! A library-level orchestration engine for resolving open-ended goals with
//! LM backends through recursive decomposition:
//!
//! - **Atomizer/Planner/Executor/Aggregator/Verifier pipeline**: a goal is
//!   either answered directly or split into subtasks, resolved recursively,
//!   and synthesized bottom-up
//! - **Model routing**: (complexity, priority, domain) hints select which
//!   model serves each stage, with deterministic layered fallback
//! - **Bounded recursion**: a depth limit forces runaway decompositions to
//!   execute directly rather than recurse forever
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use roma_core::pipeline::Orchestrator;
//! use roma_core::routing::{Credentials, ModelRegistry, ModelRouter, RoutingPolicy};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let credentials = Credentials::new("https://my-resource.openai.azure.com", "key")
//!     .with_api_version("2025-01-01-preview");
//! let router = Arc::new(ModelRouter::new(
//!     ModelRegistry::with_defaults(Some(credentials)),
//!     RoutingPolicy::default(),
//! ));
//!
//! let orchestrator = Orchestrator::new(router);
//! let outcome = orchestrator.run("Write a market report on EV adoption").await?;
//! println!("{} (verified: {})", outcome.result, outcome.verified);
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod events;
pub mod pipeline;
pub mod routing;

// Re-export commonly used items at crate root
pub use backend::{BackendError, FieldMap, LmBackend, RetryConfig, StageSignature};
pub use events::observers::LoggingObserver;
pub use events::{EventBus, PipelineEvent};
pub use pipeline::{
    CancellationToken, Orchestrator, OrchestratorConfig, Outcome, PipelineError, TaskArena,
    TaskNode, TaskState,
};
pub use routing::{
    Credentials, ModelConfig, ModelRegistry, ModelRouter, RoutingError, RoutingKey, RoutingPolicy,
    TaskComplexity, TaskDomain, TaskPriority,
};
