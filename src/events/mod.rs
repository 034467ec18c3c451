//! Event-Driven Observability for the Pipeline
//!
//! Provides structured events for monitoring recursive resolution,
//! including:
//! - Node creation and stage invocations
//! - Atomizer and planner decisions
//! - Node resolution, failure, and verification outcomes
//!
//! # Architecture
//!
//! Events are emitted via an `EventBus` which uses a broadcast channel.
//! Multiple observers can subscribe to receive all events:
//!
//! ```text
//! Orchestrator → EventBus → [LoggingObserver, ...]
//! ```

pub mod bus;
pub mod observers;

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// All events emitted during recursive resolution
///
/// Events are tagged with their type for JSON serialization and include
/// timestamps for latency tracking. Nodes are identified by their arena
/// index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    /// A task node was added to the tree
    NodeCreated {
        /// Arena index of the node
        node: usize,
        /// Goal text
        goal: String,
        /// Depth in the tree (root = 0)
        depth: usize,
        /// When the node was created
        #[serde(with = "system_time_serde")]
        timestamp: SystemTime,
    },

    /// A stage invocation started for a node
    StageStarted {
        /// Arena index of the node
        node: usize,
        /// Stage name (atomize, plan, execute, aggregate, verify)
        stage: String,
        /// Model key the router resolved for this stage
        model_key: String,
        /// When the invocation started
        #[serde(with = "system_time_serde")]
        timestamp: SystemTime,
    },

    /// A stage invocation completed
    StageCompleted {
        /// Arena index of the node
        node: usize,
        /// Stage name
        stage: String,
        /// Latency in milliseconds
        latency_ms: u64,
        /// When the invocation completed
        #[serde(with = "system_time_serde")]
        timestamp: SystemTime,
    },

    /// The atomizer decided whether a node is directly answerable
    NodeAtomized {
        /// Arena index of the node
        node: usize,
        /// The atomizer's decision
        is_atomic: bool,
        /// When the decision was recorded
        #[serde(with = "system_time_serde")]
        timestamp: SystemTime,
    },

    /// The planner produced subtasks for a node
    NodePlanned {
        /// Arena index of the node
        node: usize,
        /// Number of subtasks produced
        subtask_count: usize,
        /// When the plan was recorded
        #[serde(with = "system_time_serde")]
        timestamp: SystemTime,
    },

    /// A node reached a resolved state with a result
    NodeResolved {
        /// Arena index of the node
        node: usize,
        /// Terminal state name (executed, aggregated, verified)
        state: String,
        /// When the node resolved
        #[serde(with = "system_time_serde")]
        timestamp: SystemTime,
    },

    /// A node failed
    NodeFailed {
        /// Arena index of the node
        node: usize,
        /// Failure description
        error: String,
        /// When the failure was recorded
        #[serde(with = "system_time_serde")]
        timestamp: SystemTime,
    },

    /// The verifier checked a result against its goal
    VerificationCompleted {
        /// Arena index of the node
        node: usize,
        /// Whether the result passed
        is_valid: bool,
        /// When verification completed
        #[serde(with = "system_time_serde")]
        timestamp: SystemTime,
    },
}

impl PipelineEvent {
    /// Create a NodeCreated event
    pub fn node_created(node: usize, goal: &str, depth: usize) -> Self {
        Self::NodeCreated {
            node,
            goal: goal.to_string(),
            depth,
            timestamp: SystemTime::now(),
        }
    }

    /// Create a StageStarted event
    pub fn stage_started(node: usize, stage: &str, model_key: &str) -> Self {
        Self::StageStarted {
            node,
            stage: stage.to_string(),
            model_key: model_key.to_string(),
            timestamp: SystemTime::now(),
        }
    }

    /// Create a StageCompleted event
    pub fn stage_completed(node: usize, stage: &str, latency_ms: u64) -> Self {
        Self::StageCompleted {
            node,
            stage: stage.to_string(),
            latency_ms,
            timestamp: SystemTime::now(),
        }
    }

    /// Create a NodeAtomized event
    pub fn node_atomized(node: usize, is_atomic: bool) -> Self {
        Self::NodeAtomized {
            node,
            is_atomic,
            timestamp: SystemTime::now(),
        }
    }

    /// Create a NodePlanned event
    pub fn node_planned(node: usize, subtask_count: usize) -> Self {
        Self::NodePlanned {
            node,
            subtask_count,
            timestamp: SystemTime::now(),
        }
    }

    /// Create a NodeResolved event
    pub fn node_resolved(node: usize, state: &str) -> Self {
        Self::NodeResolved {
            node,
            state: state.to_string(),
            timestamp: SystemTime::now(),
        }
    }

    /// Create a NodeFailed event
    pub fn node_failed(node: usize, error: &str) -> Self {
        Self::NodeFailed {
            node,
            error: error.to_string(),
            timestamp: SystemTime::now(),
        }
    }

    /// Create a VerificationCompleted event
    pub fn verification_completed(node: usize, is_valid: bool) -> Self {
        Self::VerificationCompleted {
            node,
            is_valid,
            timestamp: SystemTime::now(),
        }
    }

    /// Get the event type name
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::NodeCreated { .. } => "NodeCreated",
            Self::StageStarted { .. } => "StageStarted",
            Self::StageCompleted { .. } => "StageCompleted",
            Self::NodeAtomized { .. } => "NodeAtomized",
            Self::NodePlanned { .. } => "NodePlanned",
            Self::NodeResolved { .. } => "NodeResolved",
            Self::NodeFailed { .. } => "NodeFailed",
            Self::VerificationCompleted { .. } => "VerificationCompleted",
        }
    }

    /// Get the timestamp of the event
    pub fn timestamp(&self) -> SystemTime {
        match self {
            Self::NodeCreated { timestamp, .. }
            | Self::StageStarted { timestamp, .. }
            | Self::StageCompleted { timestamp, .. }
            | Self::NodeAtomized { timestamp, .. }
            | Self::NodePlanned { timestamp, .. }
            | Self::NodeResolved { timestamp, .. }
            | Self::NodeFailed { timestamp, .. }
            | Self::VerificationCompleted { timestamp, .. } => *timestamp,
        }
    }

    /// Arena index of the node this event concerns
    pub fn node(&self) -> usize {
        match self {
            Self::NodeCreated { node, .. }
            | Self::StageStarted { node, .. }
            | Self::StageCompleted { node, .. }
            | Self::NodeAtomized { node, .. }
            | Self::NodePlanned { node, .. }
            | Self::NodeResolved { node, .. }
            | Self::NodeFailed { node, .. }
            | Self::VerificationCompleted { node, .. } => *node,
        }
    }
}

/// Serde module for SystemTime serialization
mod system_time_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    pub fn serialize<S>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let duration = time.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SystemTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(UNIX_EPOCH + Duration::from_millis(millis))
    }
}

// Re-exports
pub use bus::EventBus;
pub use observers::LoggingObserver;
