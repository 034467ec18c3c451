//! Recursive Resolution Orchestrator
//!
//! Drives the Atomize → (Execute | Plan + recurse) → Aggregate → Verify
//! loop over a task arena. The router is consulted independently at every
//! stage invocation, so different nodes and stages may use different
//! backends.
//!
//! # Guarantees
//!
//! - Recursion is bounded: past `max_depth` a node is forced atomic and
//!   executed directly, regardless of what the atomizer would say.
//! - Siblings fan out concurrently but Aggregate receives their results
//!   in planning order, never completion order.
//! - A failing subtree does not abort siblings already in flight; the
//!   parent fails afterwards with the failures attributed per child.

use super::task::{NodeId, TaskArena, TaskState};
use super::{
    AggregatorOutput, AtomizerOutput, ExecutorOutput, MissingField, PlannerOutput, VerifierOutput,
    AGGREGATE, ATOMIZE, EXECUTE, PLAN, VERIFY,
};
use crate::backend::{
    fields, invoke_with_retry, BackendError, FieldMap, RetryConfig, StageSignature,
};
use crate::events::{EventBus, PipelineEvent};
use crate::routing::{ModelRouter, RoutingError, RoutingKey};
use serde_json::{json, Value};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Cooperative cancellation flag shared across a resolution run
///
/// Cancelling aborts pending stage invocations and unstarted children;
/// stages already in flight finish their current backend call.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a fresh, uncancelled token
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Routing hints per pipeline stage
///
/// Defaults to the balanced general-purpose triple for every stage;
/// callers tune individual stages toward reasoning or code models.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StagePolicy {
    pub atomize: RoutingKey,
    pub plan: RoutingKey,
    pub execute: RoutingKey,
    pub aggregate: RoutingKey,
    pub verify: RoutingKey,
}

impl StagePolicy {
    /// Set the atomize stage hint
    pub fn with_atomize(mut self, key: RoutingKey) -> Self {
        self.atomize = key;
        self
    }

    /// Set the plan stage hint
    pub fn with_plan(mut self, key: RoutingKey) -> Self {
        self.plan = key;
        self
    }

    /// Set the execute stage hint
    pub fn with_execute(mut self, key: RoutingKey) -> Self {
        self.execute = key;
        self
    }

    /// Set the aggregate stage hint
    pub fn with_aggregate(mut self, key: RoutingKey) -> Self {
        self.aggregate = key;
        self
    }

    /// Set the verify stage hint
    pub fn with_verify(mut self, key: RoutingKey) -> Self {
        self.verify = key;
        self
    }
}

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Depth at which nodes are forced atomic (root = 0)
    pub max_depth: usize,
    /// Per-stage-call timeout, covering all retry attempts
    pub call_timeout: Option<Duration>,
    /// Retry policy for transient backend faults
    pub retry: RetryConfig,
    /// Routing hints per stage
    pub stage_policy: StagePolicy,
    /// Verify every node's result, not just the root's
    pub verify_every_node: bool,
    /// Resolve siblings concurrently
    pub parallel_siblings: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_depth: 3,
            call_timeout: None,
            retry: RetryConfig::default(),
            stage_policy: StagePolicy::default(),
            verify_every_node: false,
            parallel_siblings: true,
        }
    }
}

impl OrchestratorConfig {
    /// Set the maximum recursion depth
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Set the per-stage-call timeout
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    /// Set the retry policy
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Set the per-stage routing hints
    pub fn with_stage_policy(mut self, policy: StagePolicy) -> Self {
        self.stage_policy = policy;
        self
    }

    /// Verify every node instead of only the root
    pub fn with_verify_every_node(mut self, enabled: bool) -> Self {
        self.verify_every_node = enabled;
        self
    }

    /// Toggle concurrent sibling resolution
    pub fn with_parallel_siblings(mut self, enabled: bool) -> Self {
        self.parallel_siblings = enabled;
        self
    }
}

/// A single child's failure, attributed for the parent's error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeFailure {
    pub node: NodeId,
    pub goal: String,
    pub error: String,
}

/// Errors surfaced by a resolution run
#[derive(Debug, Clone)]
pub enum PipelineError {
    /// Routing or credential problem, fatal and not retried
    Configuration(RoutingError),
    /// A backend call failed after retries were exhausted
    Backend {
        stage: &'static str,
        node: NodeId,
        source: BackendError,
    },
    /// A stage's output was missing a required field
    MalformedStageOutput { node: NodeId, source: MissingField },
    /// The planner produced zero subtasks
    DecompositionFailure { node: NodeId, goal: String },
    /// One or more children of a node failed, so its aggregate is undefined
    ChildrenFailed {
        node: NodeId,
        failures: Vec<NodeFailure>,
    },
    /// A stage call exceeded the configured timeout
    Timeout { stage: &'static str, node: NodeId },
    /// The run was cancelled
    Cancelled,
    /// A spawned child task was aborted or panicked
    Internal { message: String },
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Configuration(err) => write!(f, "Configuration error: {}", err),
            Self::Backend { stage, node, source } => {
                write!(f, "Stage '{}' failed at node {}: {}", stage, node, source)
            }
            Self::MalformedStageOutput { node, source } => {
                write!(f, "Malformed stage output at node {}: {}", node, source)
            }
            Self::DecompositionFailure { node, goal } => {
                write!(
                    f,
                    "Planner produced no subtasks at node {} for goal '{}'",
                    node, goal
                )
            }
            Self::ChildrenFailed { node, failures } => {
                write!(f, "{} child(ren) of node {} failed: ", failures.len(), node)?;
                for (i, failure) in failures.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{} '{}': {}", failure.node, failure.goal, failure.error)?;
                }
                Ok(())
            }
            Self::Timeout { stage, node } => {
                write!(f, "Stage '{}' timed out at node {}", stage, node)
            }
            Self::Cancelled => write!(f, "Resolution cancelled"),
            Self::Internal { message } => write!(f, "Internal error: {}", message),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Configuration(err) => Some(err),
            Self::Backend { source, .. } => Some(source),
            Self::MalformedStageOutput { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<RoutingError> for PipelineError {
    fn from(err: RoutingError) -> Self {
        Self::Configuration(err)
    }
}

/// Counters accumulated over a resolution run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineMetrics {
    /// Total nodes allocated in the tree
    pub nodes: usize,
    /// Total stage invocations (excluding retries)
    pub stage_calls: usize,
    /// Nodes forced atomic by the depth bound
    pub forced_atomic: usize,
    /// Deepest level reached (root = 0)
    pub max_depth_reached: usize,
    /// Wall-clock duration of the run in milliseconds
    pub elapsed_ms: u64,
}

/// Result of a completed resolution run
#[derive(Debug, Clone)]
pub struct Outcome {
    /// Root node id
    pub root: NodeId,
    /// The synthesized answer for the root goal
    pub result: String,
    /// The verifier's verdict on the root result
    pub verified: bool,
    /// The verifier's feedback text
    pub feedback: String,
    /// The full decomposition tree, for inspection
    pub tree: TaskArena,
    /// Run counters
    pub metrics: PipelineMetrics,
}

struct Counters {
    stage_calls: AtomicUsize,
    forced_atomic: AtomicUsize,
}

struct RunContext {
    router: Arc<ModelRouter>,
    config: OrchestratorConfig,
    arena: Mutex<TaskArena>,
    bus: Option<EventBus>,
    token: CancellationToken,
    counters: Counters,
}

impl RunContext {
    fn emit(&self, event: PipelineEvent) {
        if let Some(bus) = &self.bus {
            bus.emit(event);
        }
    }

    fn arena(&self) -> std::sync::MutexGuard<'_, TaskArena> {
        self.arena.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a node failure and pass the error through
    fn fail_node(&self, id: NodeId, error: PipelineError) -> PipelineError {
        let message = error.to_string();
        self.arena().set_failed(id, &message);
        self.emit(PipelineEvent::node_failed(id.0, &message));
        error
    }

    /// Invoke one stage for one node, with retry and timeout applied
    async fn invoke_stage(
        &self,
        id: NodeId,
        signature: StageSignature,
        key: RoutingKey,
        inputs: FieldMap,
    ) -> Result<FieldMap, PipelineError> {
        if self.token.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let backend = self.router.get_model(key).await?;
        self.emit(PipelineEvent::stage_started(
            id.0,
            signature.name,
            self.router.resolve_key(key),
        ));
        self.counters.stage_calls.fetch_add(1, Ordering::SeqCst);

        let start = Instant::now();
        let call = invoke_with_retry(|| backend.invoke(signature, inputs.clone()), &self.config.retry);

        let outcome = match self.config.call_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(PipelineError::Timeout {
                        stage: signature.name,
                        node: id,
                    })
                }
            },
            None => call.await,
        };

        let output = outcome.map_err(|source| PipelineError::Backend {
            stage: signature.name,
            node: id,
            source,
        })?;

        self.emit(PipelineEvent::stage_completed(
            id.0,
            signature.name,
            start.elapsed().as_millis() as u64,
        ));
        Ok(output)
    }

    /// Run the verifier for a node and record the verdict
    async fn verify_node(&self, id: NodeId, result: &str) -> Result<VerifierOutput, PipelineError> {
        let goal = self.arena().get(id).goal.clone();
        let output = self
            .invoke_stage(
                id,
                VERIFY,
                self.config.stage_policy.verify,
                fields(&[("goal", json!(goal)), ("result", json!(result))]),
            )
            .await?;

        let verdict = VerifierOutput::from_fields(&output)
            .map_err(|source| PipelineError::MalformedStageOutput { node: id, source })?;

        self.emit(PipelineEvent::verification_completed(id.0, verdict.is_valid));
        if verdict.is_valid {
            self.arena().set_state(id, TaskState::Verified);
            self.emit(PipelineEvent::node_resolved(id.0, "verified"));
        } else {
            // The result is still returned, flagged by the caller
            let message = if verdict.feedback.is_empty() {
                "verification rejected result".to_string()
            } else {
                verdict.feedback.clone()
            };
            self.arena().get_mut(id).error = Some(message.clone());
            self.arena().set_state(id, TaskState::Failed);
            self.emit(PipelineEvent::node_failed(id.0, &message));
        }
        Ok(verdict)
    }
}

/// Drives recursive resolution over a task tree
///
/// # Example
///
/// ```rust,ignore
/// use roma_core::pipeline::Orchestrator;
/// use roma_core::routing::{ModelRegistry, ModelRouter, RoutingPolicy};
/// use std::sync::Arc;
///
/// let router = Arc::new(ModelRouter::new(
///     ModelRegistry::with_defaults(Some(credentials)),
///     RoutingPolicy::default(),
/// ));
/// let orchestrator = Orchestrator::new(router);
/// let outcome = orchestrator.run("Write a market report").await?;
/// println!("{}", outcome.result);
/// ```
pub struct Orchestrator {
    router: Arc<ModelRouter>,
    config: OrchestratorConfig,
    bus: Option<EventBus>,
}

impl Orchestrator {
    /// Create an orchestrator with default configuration
    pub fn new(router: Arc<ModelRouter>) -> Self {
        Self {
            router,
            config: OrchestratorConfig::default(),
            bus: None,
        }
    }

    /// Set the configuration
    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Attach an event bus for observability
    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Resolve a root goal to a verified outcome
    pub async fn run(&self, goal: impl Into<String>) -> Result<Outcome, PipelineError> {
        self.run_with_token(goal, CancellationToken::new()).await
    }

    /// Resolve a root goal under an external cancellation token
    pub async fn run_with_token(
        &self,
        goal: impl Into<String>,
        token: CancellationToken,
    ) -> Result<Outcome, PipelineError> {
        let goal = goal.into();
        let start = Instant::now();

        let mut arena = TaskArena::new();
        let root = arena.alloc_root(&goal);

        let ctx = Arc::new(RunContext {
            router: self.router.clone(),
            config: self.config.clone(),
            arena: Mutex::new(arena),
            bus: self.bus.clone(),
            token,
            counters: Counters {
                stage_calls: AtomicUsize::new(0),
                forced_atomic: AtomicUsize::new(0),
            },
        });
        ctx.emit(PipelineEvent::node_created(root.0, &goal, 0));

        tracing::info!(goal = %goal, "resolution started");
        let result = resolve_node(ctx.clone(), root).await?;

        // The root is always verified; inner nodes only per policy
        let verdict = ctx.verify_node(root, &result).await?;

        let arena = {
            let guard = ctx.arena();
            guard.clone()
        };
        let metrics = PipelineMetrics {
            nodes: arena.len(),
            stage_calls: ctx.counters.stage_calls.load(Ordering::SeqCst),
            forced_atomic: ctx.counters.forced_atomic.load(Ordering::SeqCst),
            max_depth_reached: arena.max_depth(),
            elapsed_ms: start.elapsed().as_millis() as u64,
        };
        tracing::info!(
            nodes = metrics.nodes,
            stage_calls = metrics.stage_calls,
            verified = verdict.is_valid,
            "resolution finished"
        );

        Ok(Outcome {
            root,
            result,
            verified: verdict.is_valid,
            feedback: verdict.feedback,
            tree: arena,
            metrics,
        })
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("events", &self.bus.is_some())
            .finish()
    }
}

/// Recursively resolve one node to its result text
///
/// Boxed for recursion; the context is shared by reference count so
/// sibling subtrees can run on separate tasks.
fn resolve_node(
    ctx: Arc<RunContext>,
    id: NodeId,
) -> Pin<Box<dyn Future<Output = Result<String, PipelineError>> + Send>> {
    Box::pin(async move {
        if ctx.token.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let (goal, depth) = {
            let arena = ctx.arena();
            let node = arena.get(id);
            (node.goal.clone(), node.depth)
        };

        // Depth bound: force atomic instead of consulting the atomizer.
        // This is a policy fallback, not a fault.
        let is_atomic = if depth >= ctx.config.max_depth {
            ctx.counters.forced_atomic.fetch_add(1, Ordering::SeqCst);
            tracing::debug!(node = id.0, depth, "depth limit reached, forcing atomic");
            true
        } else {
            let output = match ctx
                .invoke_stage(
                    id,
                    ATOMIZE,
                    ctx.config.stage_policy.atomize,
                    fields(&[("goal", json!(goal))]),
                )
                .await
            {
                Ok(output) => output,
                Err(err) => return Err(ctx.fail_node(id, err)),
            };
            match AtomizerOutput::from_fields(&output) {
                Ok(parsed) => parsed.is_atomic,
                Err(source) => {
                    return Err(
                        ctx.fail_node(id, PipelineError::MalformedStageOutput { node: id, source })
                    )
                }
            }
        };

        ctx.arena().set_atomic(id, is_atomic);
        ctx.emit(PipelineEvent::node_atomized(id.0, is_atomic));

        let result = if is_atomic {
            execute_leaf(&ctx, id, &goal).await?
        } else {
            resolve_branch(ctx.clone(), id, &goal).await?
        };

        if ctx.config.verify_every_node && depth > 0 {
            ctx.verify_node(id, &result).await?;
        }

        Ok(result)
    })
}

/// Execute an atomic node directly
async fn execute_leaf(ctx: &RunContext, id: NodeId, goal: &str) -> Result<String, PipelineError> {
    ctx.arena().set_state(id, TaskState::Executing);

    let output = match ctx
        .invoke_stage(
            id,
            EXECUTE,
            ctx.config.stage_policy.execute,
            fields(&[("task", json!(goal))]),
        )
        .await
    {
        Ok(output) => output,
        Err(err) => return Err(ctx.fail_node(id, err)),
    };

    let executed = ExecutorOutput::from_fields(&output).map_err(|source| {
        ctx.fail_node(id, PipelineError::MalformedStageOutput { node: id, source })
    })?;

    ctx.arena()
        .set_result(id, &executed.result, TaskState::Executed);
    ctx.emit(PipelineEvent::node_resolved(id.0, "executed"));
    Ok(executed.result)
}

/// Plan a composite node, resolve its children, and aggregate their results
async fn resolve_branch(
    ctx: Arc<RunContext>,
    id: NodeId,
    goal: &str,
) -> Result<String, PipelineError> {
    let output = match ctx
        .invoke_stage(
            id,
            PLAN,
            ctx.config.stage_policy.plan,
            fields(&[("goal", json!(goal))]),
        )
        .await
    {
        Ok(output) => output,
        Err(err) => return Err(ctx.fail_node(id, err)),
    };

    let plan = PlannerOutput::from_fields(&output).map_err(|source| {
        ctx.fail_node(id, PipelineError::MalformedStageOutput { node: id, source })
    })?;

    // Zero subtasks means aggregation would be ill-defined
    if plan.subtasks.is_empty() {
        return Err(ctx.fail_node(
            id,
            PipelineError::DecompositionFailure {
                node: id,
                goal: goal.to_string(),
            },
        ));
    }

    let children: Vec<NodeId> = {
        let mut arena = ctx.arena();
        plan.subtasks
            .iter()
            .map(|subtask| arena.alloc_child(id, subtask))
            .collect()
    };
    for &child in &children {
        let (child_goal, child_depth) = {
            let arena = ctx.arena();
            let node = arena.get(child);
            (node.goal.clone(), node.depth)
        };
        ctx.emit(PipelineEvent::node_created(child.0, &child_goal, child_depth));
    }
    ctx.arena().set_state(id, TaskState::Planned);
    ctx.emit(PipelineEvent::node_planned(id.0, children.len()));

    // Fan out, then join in planning order. Every child runs to a terminal
    // state before the parent decides; one child's failure never aborts a
    // sibling already in flight.
    let results: Vec<Result<String, PipelineError>> = if ctx.config.parallel_siblings {
        let handles: Vec<_> = children
            .iter()
            .map(|&child| tokio::spawn(resolve_node(ctx.clone(), child)))
            .collect();
        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(handle.await.unwrap_or_else(|e| {
                Err(PipelineError::Internal {
                    message: format!("child task aborted: {}", e),
                })
            }));
        }
        results
    } else {
        let mut results = Vec::with_capacity(children.len());
        for &child in &children {
            results.push(resolve_node(ctx.clone(), child).await);
        }
        results
    };

    let mut ordered = Vec::with_capacity(children.len());
    let mut failures = Vec::new();
    let mut cancelled = false;
    for (&child, result) in children.iter().zip(results) {
        match result {
            Ok(result) => {
                let child_goal = ctx.arena().get(child).goal.clone();
                ordered.push(json!({ "task": child_goal, "result": result }));
            }
            Err(PipelineError::Cancelled) => cancelled = true,
            Err(err) => {
                let child_goal = ctx.arena().get(child).goal.clone();
                failures.push(NodeFailure {
                    node: child,
                    goal: child_goal,
                    error: err.to_string(),
                });
            }
        }
    }

    if cancelled {
        return Err(ctx.fail_node(id, PipelineError::Cancelled));
    }
    if !failures.is_empty() {
        return Err(ctx.fail_node(id, PipelineError::ChildrenFailed { node: id, failures }));
    }

    let output = match ctx
        .invoke_stage(
            id,
            AGGREGATE,
            ctx.config.stage_policy.aggregate,
            fields(&[
                ("original_goal", json!(goal)),
                ("subtask_results", Value::Array(ordered)),
            ]),
        )
        .await
    {
        Ok(output) => output,
        Err(err) => return Err(ctx.fail_node(id, err)),
    };

    let aggregated = AggregatorOutput::from_fields(&output).map_err(|source| {
        ctx.fail_node(id, PipelineError::MalformedStageOutput { node: id, source })
    })?;

    ctx.arena()
        .set_result(id, &aggregated.synthesized_result, TaskState::Aggregated);
    ctx.emit(PipelineEvent::node_resolved(id.0, "aggregated"));
    Ok(aggregated.synthesized_result)
}
