//! Minimal document model the scanner works against
//!
//! `Document` covers just the element operations the enrichment pipeline
//! needs. `MemoryDocument` is an arena-backed implementation that also
//! reports added nodes to observers, the way a browser mutation observer
//! would.

pub mod fixture;
pub mod memory;

pub use fixture::{FeedBuilder, FeedPost};
pub use memory::MemoryDocument;

use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Document shared between the host page and the enrichment loop
///
/// The lock is only ever held for synchronous DOM work, never across an
/// await point.
pub type SharedDocument<D> = Arc<Mutex<D>>;

/// Wrap a document for sharing
pub fn shared<D: Document>(doc: D) -> SharedDocument<D> {
    Arc::new(Mutex::new(doc))
}

/// Handle to a node inside one document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub(crate) fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(&self) -> usize {
        self.0
    }
}

/// Structural errors from document mutation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomError {
    #[error("Unknown node {0:?}")]
    UnknownNode(NodeId),

    #[error("Node {reference:?} is not a child of {parent:?}")]
    NotAChild { parent: NodeId, reference: NodeId },

    #[error("Inserting {node:?} under {parent:?} would create a cycle")]
    Cycle { parent: NodeId, node: NodeId },
}

/// Nodes added to an observed subtree since the previous batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationBatch {
    pub added: Vec<NodeId>,
}

/// Stream of mutation batches for one observed subtree
pub type MutationStream = mpsc::UnboundedReceiver<MutationBatch>;

/// Element tree operations used by the scanner
pub trait Document: Send + 'static {
    fn root(&self) -> NodeId;

    /// Tag name, `None` for an unknown node
    fn tag(&self, node: NodeId) -> Option<&str>;

    fn attribute(&self, node: NodeId, name: &str) -> Option<&str>;

    fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) -> Result<(), DomError>;

    fn parent(&self, node: NodeId) -> Option<NodeId>;

    fn children(&self, node: NodeId) -> Vec<NodeId>;

    /// Concatenated text of the node and its descendants
    fn text_content(&self, node: NodeId) -> String;

    fn set_text(&mut self, node: NodeId, text: &str) -> Result<(), DomError>;

    /// Create a detached element
    fn create_element(&mut self, tag: &str) -> NodeId;

    /// Insert `node` into `parent` before `reference`, or last when `None`
    ///
    /// A node that already has a parent is moved.
    fn insert_before(
        &mut self,
        parent: NodeId,
        node: NodeId,
        reference: Option<NodeId>,
    ) -> Result<(), DomError>;

    /// Subscribe to nodes added anywhere under `target`
    fn observe(&mut self, target: NodeId) -> MutationStream;

    fn append_child(&mut self, parent: NodeId, node: NodeId) -> Result<(), DomError> {
        self.insert_before(parent, node, None)
    }

    /// Whether the node is attached under the document root
    fn is_connected(&self, node: NodeId) -> bool {
        let root = self.root();
        let mut current = Some(node);
        while let Some(n) = current {
            if n == root {
                return true;
            }
            current = self.parent(n);
        }
        false
    }

    fn next_sibling(&self, node: NodeId) -> Option<NodeId> {
        let parent = self.parent(node)?;
        let siblings = self.children(parent);
        let pos = siblings.iter().position(|&n| n == node)?;
        siblings.get(pos + 1).copied()
    }

    fn has_class(&self, node: NodeId, class: &str) -> bool {
        self.attribute(node, "class")
            .map(|classes| classes.split_whitespace().any(|c| c == class))
            .unwrap_or(false)
    }

    /// All descendants in document order, excluding `node` itself
    fn descendants(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(node).into_iter().rev().collect();
        while let Some(n) = stack.pop() {
            out.push(n);
            stack.extend(self.children(n).into_iter().rev());
        }
        out
    }

    fn query_all<P>(&self, node: NodeId, pred: P) -> Vec<NodeId>
    where
        P: Fn(&Self, NodeId) -> bool,
        Self: Sized,
    {
        self.descendants(node)
            .into_iter()
            .filter(|&n| pred(self, n))
            .collect()
    }

    fn query_first<P>(&self, node: NodeId, pred: P) -> Option<NodeId>
    where
        P: Fn(&Self, NodeId) -> bool,
        Self: Sized,
    {
        self.descendants(node).into_iter().find(|&n| pred(self, n))
    }

    /// Nearest inclusive ancestor matching `pred`
    fn closest<P>(&self, node: NodeId, pred: P) -> Option<NodeId>
    where
        P: Fn(&Self, NodeId) -> bool,
        Self: Sized,
    {
        let mut current = Some(node);
        while let Some(n) = current {
            if pred(self, n) {
                return Some(n);
            }
            current = self.parent(n);
        }
        None
    }
}
