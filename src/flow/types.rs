//! Core flow type definitions
//!
//! Defines nodes, edges, and the persisted flow document. These types are
//! serialized to JSON for storage and for the HTTP API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single step in a flow graph
///
/// The id is an opaque stable string (a UUID for nodes created through
/// [`crate::flow::FlowGraph::add_node`]). The placement is owned by whatever
/// renders the graph and is carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique node identifier within the flow
    pub id: String,
    /// What the node does when the flow runs
    pub kind: NodeKind,
    /// Optional visual placement, opaque to the engine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

/// Node payload, tagged by kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NodeKind {
    /// Shell command step
    Instruction(InstructionData),
    /// Free text, never executed
    Note(NoteData),
}

/// Payload of an instruction node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstructionData {
    /// Command string passed to the shell. Empty commands are skipped.
    #[serde(default)]
    pub command: String,
    /// When this node last finished running
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
    /// Combined, human-readable output of the last run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

/// Payload of a note node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NoteData {
    #[serde(default)]
    pub text: String,
}

/// Node placement on the canvas
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Directed connection between two nodes
///
/// The source must run before the target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    /// Source node ID
    pub source: String,
    /// Target node ID
    pub target: String,
}

impl Edge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// Kind selector used when creating nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Instruction,
    Note,
}

impl NodeType {
    /// Empty payload for a freshly created node of this type
    pub fn empty_kind(self) -> NodeKind {
        match self {
            NodeType::Instruction => NodeKind::Instruction(InstructionData::default()),
            NodeType::Note => NodeKind::Note(NoteData::default()),
        }
    }
}

/// Persisted form of a flow: the graph plus the committed schedule
///
/// `scheduled_at` records the instant the committed expression resolved to,
/// so a restart re-arms at that instant instead of re-parsing relative text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowDocument {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
}

/// Outcome of running a single instruction node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    /// Failure message reported by the command runner
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

impl RunResult {
    /// Combine the captured streams into the single string shown to users
    pub fn summary(&self) -> String {
        let mut text = String::new();
        if self.success {
            text.push_str(&self.stdout);
            if !self.stderr.is_empty() {
                if !text.is_empty() {
                    text.push_str("\n\n");
                }
                text.push_str("STDERR:\n");
                text.push_str(&self.stderr);
            }
        } else {
            text.push_str("ERROR: ");
            text.push_str(self.error.as_deref().unwrap_or("command failed"));
            if !self.stdout.is_empty() {
                text.push_str("\n\nSTDOUT:\n");
                text.push_str(&self.stdout);
            }
            if !self.stderr.is_empty() {
                text.push_str("\n\nSTDERR:\n");
                text.push_str(&self.stderr);
            }
        }
        text
    }
}
