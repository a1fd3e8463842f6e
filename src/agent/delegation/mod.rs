//! Graph-edit requests ("delegation") emitted by agents mid-run.
//!
//! An agent may append one `json:delegation` block to its answer asking the
//! scheduler to insert new nodes, overwrite ("graft") pending ones, or prune
//! pending ones. This module parses and checks such requests; applying them
//! to the DAG is the scheduler's job.

use crate::agent::parsers::{BlockType, extract_blocks};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use thiserror::Error;
use tracing::warn;

/// Prefix reserved for root and administrative nodes.
pub const RESERVED_PREFIX: &str = "master_";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityPrefix {
    Research,
    Analyze,
    Coder,
    Writer,
}

impl IdentityPrefix {
    pub const ALL: [Self; 4] = [Self::Research, Self::Analyze, Self::Coder, Self::Writer];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Research => "research_",
            Self::Analyze => "analyze_",
            Self::Coder => "coder_",
            Self::Writer => "writer_",
        }
    }

    pub fn of(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| id.starts_with(p.as_str()))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DelegationStrategy {
    /// New nodes run between the delegating node and its original children.
    #[default]
    Child,
    /// New nodes run in parallel without blocking the dependent flow.
    Sibling,
}

fn default_role() -> String {
    "worker".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: String,
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegationRequest {
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub strategy: DelegationStrategy,
    #[serde(default)]
    pub new_nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub prune_nodes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DelegationError {
    #[error("delegation request has no new nodes and nothing to prune")]
    Empty,
    #[error("node id must not be empty")]
    EmptyId,
    #[error("node id '{0}' uses the reserved master_ prefix")]
    ReservedPrefix(String),
    #[error("node id '{0}' lacks an approved prefix (research_, analyze_, coder_, writer_)")]
    UnapprovedPrefix(String),
    #[error("node id '{0}' appears more than once")]
    DuplicateId(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub status: NodeStatus,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// Snapshot of the workflow graph as the scheduler reports it to an agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphView {
    #[serde(default)]
    pub nodes: Vec<GraphNode>,
}

impl GraphView {
    pub fn status_of(&self, id: &str) -> Option<NodeStatus> {
        self.nodes.iter().find(|n| n.id == id).map(|n| n.status)
    }

    /// One line per node, for the system instruction.
    pub fn render(&self) -> String {
        self.nodes
            .iter()
            .map(|n| {
                if n.depends_on.is_empty() {
                    format!("- {} [{}]", n.id, n.status)
                } else {
                    format!("- {} [{}] <- {}", n.id, n.status, n.depends_on.join(", "))
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub id: String,
    pub reason: String,
}

/// How a request maps onto the current graph.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraftPlan {
    /// New nodes whose id matches a pending node; they overwrite it in place.
    pub grafts: Vec<NodeSpec>,
    /// New nodes with novel ids.
    pub inserts: Vec<NodeSpec>,
    pub prunes: Vec<String>,
    pub rejected: Vec<Rejection>,
}

impl DelegationRequest {
    pub fn validate(&self) -> Result<(), DelegationError> {
        if self.new_nodes.is_empty() && self.prune_nodes.is_empty() {
            return Err(DelegationError::Empty);
        }
        let mut seen = HashSet::new();
        for node in &self.new_nodes {
            let id = node.id.trim();
            if id.is_empty() {
                return Err(DelegationError::EmptyId);
            }
            if id.starts_with(RESERVED_PREFIX) {
                return Err(DelegationError::ReservedPrefix(id.to_string()));
            }
            if IdentityPrefix::of(id).is_none() {
                return Err(DelegationError::UnapprovedPrefix(id.to_string()));
            }
            if !seen.insert(id) {
                return Err(DelegationError::DuplicateId(id.to_string()));
            }
        }
        Ok(())
    }

    pub fn plan(&self, graph: &GraphView) -> GraftPlan {
        let mut plan = GraftPlan::default();
        for node in &self.new_nodes {
            match graph.status_of(&node.id) {
                None => plan.inserts.push(node.clone()),
                Some(NodeStatus::Pending) => plan.grafts.push(node.clone()),
                Some(status) => plan.rejected.push(Rejection {
                    id: node.id.clone(),
                    reason: format!("cannot overwrite {status} node"),
                }),
            }
        }
        for id in &self.prune_nodes {
            match graph.status_of(id) {
                Some(NodeStatus::Pending) => plan.prunes.push(id.clone()),
                Some(status) => plan.rejected.push(Rejection {
                    id: id.clone(),
                    reason: format!("cannot prune {status} node"),
                }),
                None => plan.rejected.push(Rejection {
                    id: id.clone(),
                    reason: "cannot prune unknown node".to_string(),
                }),
            }
        }
        plan
    }
}

const RESEARCH_KEYWORDS: &[&str] = &["search", "find", "web", "lookup", "research", "browse"];
const CODER_KEYWORDS: &[&str] = &["code", "script", "file", "save", "python", "write_file"];

/// Give `id` an approved identity prefix, chosen from keywords in the id and
/// prompt. Ids that already carry one are returned unchanged; a `master_`
/// prefix is stripped first.
pub fn coerce_identity(id: &str, prompt: &str) -> String {
    if IdentityPrefix::of(id).is_some() {
        return id.to_string();
    }
    let bare = id.strip_prefix(RESERVED_PREFIX).unwrap_or(id);
    let haystack = format!("{} {}", bare, prompt).to_lowercase();
    let hit = |words: &[&str]| words.iter().any(|w| haystack.contains(w));

    let prefix = if hit(RESEARCH_KEYWORDS) {
        IdentityPrefix::Research
    } else if hit(CODER_KEYWORDS) {
        IdentityPrefix::Coder
    } else {
        // Analysis keywords and the no-match case share a prefix
        IdentityPrefix::Analyze
    };
    format!("{}{}", prefix.as_str(), bare)
}

/// Parse the delegation request in `text`, if any.
///
/// Malformed or invalid requests are logged and treated as absent. With a
/// graph view, overwrites and prunes aimed at nodes that are no longer
/// pending are dropped before the request is returned.
pub fn extract_delegation(text: &str, graph: Option<&GraphView>) -> Option<DelegationRequest> {
    let mut blocks = extract_blocks(text, BlockType::Delegation);
    if blocks.is_empty() {
        return None;
    }
    if blocks.len() > 1 {
        warn!(
            "found {} delegation blocks, using the first",
            blocks.len()
        );
    }
    let block = blocks.swap_remove(0);

    let mut request: DelegationRequest = match serde_json::from_value(Value::Object(block.data)) {
        Ok(r) => r,
        Err(e) => {
            warn!("delegation block does not match request shape: {}", e);
            return None;
        }
    };
    if let Err(e) = request.validate() {
        warn!("rejected delegation request: {}", e);
        return None;
    }

    if let Some(graph) = graph {
        let before = (request.new_nodes.len(), request.prune_nodes.len());
        request
            .new_nodes
            .retain(|n| matches!(graph.status_of(&n.id), None | Some(NodeStatus::Pending)));
        request
            .prune_nodes
            .retain(|id| graph.status_of(id) == Some(NodeStatus::Pending));
        let dropped = before.0 - request.new_nodes.len() + before.1 - request.prune_nodes.len();
        if dropped > 0 {
            warn!(
                "dropped {} delegation edits targeting non-pending nodes",
                dropped
            );
        }
        if request.new_nodes.is_empty() && request.prune_nodes.is_empty() {
            return None;
        }
    }

    Some(request)
}
