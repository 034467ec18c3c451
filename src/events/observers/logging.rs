//! Logging Observer for the Pipeline
//!
//! Provides structured logging for all pipeline events using the `tracing`
//! crate. Events are logged at appropriate levels:
//! - INFO: NodeResolved, VerificationCompleted
//! - WARN: NodeFailed
//! - DEBUG: NodeCreated, StageStarted, StageCompleted, NodeAtomized, NodePlanned

use crate::events::{EventBus, PipelineEvent};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Observer that logs pipeline events using tracing
///
/// Maps events to appropriate log levels:
/// - `NodeResolved` → INFO (progress tracking)
/// - `VerificationCompleted` → INFO (final outcomes)
/// - `NodeFailed` → WARN (node-level faults)
/// - everything else → DEBUG (high-volume)
pub struct LoggingObserver {
    receiver: broadcast::Receiver<PipelineEvent>,
}

impl LoggingObserver {
    /// Create a new logging observer subscribed to the event bus
    pub fn new(bus: &EventBus) -> Self {
        Self {
            receiver: bus.subscribe(),
        }
    }

    /// Run the observer, logging events until the channel closes
    ///
    /// This should be spawned as a tokio task:
    /// ```rust,ignore
    /// tokio::spawn(observer.run());
    /// ```
    pub async fn run(mut self) {
        loop {
            match self.receiver.recv().await {
                Ok(event) => Self::log_event(&event),
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("EventBus closed, logging observer stopping");
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    warn!(
                        skipped = count,
                        "Logging observer lagged, skipped {} events", count
                    );
                }
            }
        }
    }

    /// Log a single event at the appropriate level
    pub fn log_event(event: &PipelineEvent) {
        match event {
            PipelineEvent::NodeCreated {
                node, goal, depth, ..
            } => {
                debug!(node = node, depth = depth, goal = %goal, "Node created");
            }

            PipelineEvent::StageStarted {
                node,
                stage,
                model_key,
                ..
            } => {
                debug!(
                    node = node,
                    stage = %stage,
                    model_key = %model_key,
                    "Stage started"
                );
            }

            PipelineEvent::StageCompleted {
                node,
                stage,
                latency_ms,
                ..
            } => {
                debug!(
                    node = node,
                    stage = %stage,
                    latency_ms = latency_ms,
                    "Stage completed"
                );
            }

            PipelineEvent::NodeAtomized {
                node, is_atomic, ..
            } => {
                debug!(node = node, is_atomic = is_atomic, "Node atomized");
            }

            PipelineEvent::NodePlanned {
                node,
                subtask_count,
                ..
            } => {
                debug!(node = node, subtasks = subtask_count, "Node planned");
            }

            PipelineEvent::NodeResolved { node, state, .. } => {
                info!(node = node, state = %state, "Node resolved");
            }

            PipelineEvent::NodeFailed { node, error, .. } => {
                warn!(node = node, error = %error, "Node failed");
            }

            PipelineEvent::VerificationCompleted {
                node, is_valid, ..
            } => {
                info!(node = node, is_valid = is_valid, "Verification completed");
            }
        }
    }
}
