//! Task Tree Arena
//!
//! The decomposition tree is stored as an arena: nodes live in a flat
//! vector and refer to each other by [`NodeId`] index. Parent/child links
//! are plain index lists, which keeps concurrent fan-out bookkeeping simple
//! and sidesteps ownership cycles.
//!
//! Node ids are never reused; the arena only grows for the lifetime of a
//! resolution run.

use serde::{Deserialize, Serialize};

/// Index of a node within a [`TaskArena`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle of a task node
///
/// `Executed` and `Aggregated` are the terminal success states a parent
/// waits on before aggregating; `Verified` applies only where verification
/// runs (the root by default).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Atomized,
    Planned,
    Executing,
    Executed,
    Aggregated,
    Verified,
    Failed,
}

impl TaskState {
    /// Whether a parent may consume this node's result
    pub fn is_resolved(self) -> bool {
        matches!(
            self,
            TaskState::Executed | TaskState::Aggregated | TaskState::Verified
        )
    }

    /// Whether the node has reached an end state
    pub fn is_terminal(self) -> bool {
        self.is_resolved() || self == TaskState::Failed
    }
}

/// A node in the decomposition tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskNode {
    pub id: NodeId,
    pub goal: String,
    pub state: TaskState,
    /// Set by the atomizer; `None` until then
    pub is_atomic: Option<bool>,
    pub parent: Option<NodeId>,
    /// Children in planning order
    pub children: Vec<NodeId>,
    /// Resolved answer, present after Execute (leaf) or Aggregate (branch)
    pub result: Option<String>,
    /// Failure description when `state == Failed`
    pub error: Option<String>,
    /// Root = 0
    pub depth: usize,
}

impl TaskNode {
    fn new(id: NodeId, goal: String, parent: Option<NodeId>, depth: usize) -> Self {
        Self {
            id,
            goal,
            state: TaskState::Pending,
            is_atomic: None,
            parent,
            children: Vec::new(),
            result: None,
            error: None,
            depth,
        }
    }
}

/// Flat storage for a decomposition tree
#[derive(Debug, Clone, Default)]
pub struct TaskArena {
    nodes: Vec<TaskNode>,
}

impl TaskArena {
    /// Create an empty arena
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    /// Allocate a root node at depth 0
    pub fn alloc_root(&mut self, goal: impl Into<String>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(TaskNode::new(id, goal.into(), None, 0));
        id
    }

    /// Allocate a child of `parent`, appended to its child list
    ///
    /// Depth always increments, even when the subtask repeats the parent
    /// goal verbatim; the depth bound is what guarantees termination.
    pub fn alloc_child(&mut self, parent: NodeId, goal: impl Into<String>) -> NodeId {
        let depth = self.nodes[parent.0].depth + 1;
        let id = NodeId(self.nodes.len());
        self.nodes
            .push(TaskNode::new(id, goal.into(), Some(parent), depth));
        self.nodes[parent.0].children.push(id);
        id
    }

    /// Borrow a node
    pub fn get(&self, id: NodeId) -> &TaskNode {
        &self.nodes[id.0]
    }

    /// Mutably borrow a node
    pub fn get_mut(&mut self, id: NodeId) -> &mut TaskNode {
        &mut self.nodes[id.0]
    }

    /// Transition a node's state
    pub fn set_state(&mut self, id: NodeId, state: TaskState) {
        self.nodes[id.0].state = state;
    }

    /// Record the atomizer's decision
    pub fn set_atomic(&mut self, id: NodeId, is_atomic: bool) {
        let node = &mut self.nodes[id.0];
        node.is_atomic = Some(is_atomic);
        node.state = TaskState::Atomized;
    }

    /// Record a resolved result with its success state
    pub fn set_result(&mut self, id: NodeId, result: impl Into<String>, state: TaskState) {
        let node = &mut self.nodes[id.0];
        node.result = Some(result.into());
        node.state = state;
    }

    /// Mark a node failed with a description
    pub fn set_failed(&mut self, id: NodeId, error: impl Into<String>) {
        let node = &mut self.nodes[id.0];
        node.error = Some(error.into());
        node.state = TaskState::Failed;
    }

    /// Total nodes allocated
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the arena holds no nodes
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterate over all nodes in allocation order
    pub fn iter(&self) -> impl Iterator<Item = &TaskNode> {
        self.nodes.iter()
    }

    /// The deepest depth allocated so far
    pub fn max_depth(&self) -> usize {
        self.nodes.iter().map(|n| n.depth).max().unwrap_or(0)
    }
}
