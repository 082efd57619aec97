//! Arena-backed in-memory document

use super::{Document, DomError, MutationBatch, MutationStream, NodeId};
use std::collections::BTreeMap;
use std::fmt::Write;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
struct NodeData {
    tag: String,
    attrs: BTreeMap<String, String>,
    text: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl NodeData {
    fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            attrs: BTreeMap::new(),
            text: String::new(),
            parent: None,
            children: Vec::new(),
        }
    }
}

#[derive(Debug)]
struct Observer {
    target: NodeId,
    tx: mpsc::UnboundedSender<MutationBatch>,
}

/// In-memory element tree
///
/// Nodes are never freed; a removed node is simply detached.
#[derive(Debug)]
pub struct MemoryDocument {
    nodes: Vec<NodeData>,
    root: NodeId,
    observers: Vec<Observer>,
}

impl Default for MemoryDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDocument {
    /// Empty document with a `body` root
    pub fn new() -> Self {
        Self {
            nodes: vec![NodeData::new("body")],
            root: NodeId::new(0),
            observers: Vec::new(),
        }
    }

    /// Create a detached element with attributes and own text
    pub fn element(&mut self, tag: &str, attrs: &[(&str, &str)], text: &str) -> NodeId {
        let id = self.create_element(tag);
        let data = &mut self.nodes[id.index()];
        for (name, value) in attrs {
            data.attrs.insert(name.to_string(), value.to_string());
        }
        data.text = text.to_string();
        id
    }

    /// Append several nodes, reported to observers as one batch
    pub fn append_all(&mut self, parent: NodeId, nodes: &[NodeId]) -> Result<(), DomError> {
        for &node in nodes {
            self.attach(parent, node, None)?;
        }
        self.notify(parent, nodes.to_vec());
        Ok(())
    }

    /// Detach a node (and its subtree) from its parent
    pub fn remove(&mut self, node: NodeId) -> Result<(), DomError> {
        self.check(node)?;
        self.detach(node);
        Ok(())
    }

    /// Serialize a subtree as HTML-like markup
    pub fn outer_html(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.write_html(node, &mut out);
        out
    }

    fn write_html(&self, node: NodeId, out: &mut String) {
        let Some(data) = self.nodes.get(node.index()) else {
            return;
        };
        let _ = write!(out, "<{}", data.tag);
        for (name, value) in &data.attrs {
            let _ = write!(out, " {}=\"{}\"", name, value);
        }
        out.push('>');
        out.push_str(&data.text);
        for &child in &data.children {
            self.write_html(child, out);
        }
        let _ = write!(out, "</{}>", data.tag);
    }

    fn check(&self, node: NodeId) -> Result<(), DomError> {
        if node.index() < self.nodes.len() {
            Ok(())
        } else {
            Err(DomError::UnknownNode(node))
        }
    }

    fn is_inclusive_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(n) = current {
            if n == ancestor {
                return true;
            }
            current = self.nodes[n.index()].parent;
        }
        false
    }

    fn detach(&mut self, node: NodeId) {
        if let Some(parent) = self.nodes[node.index()].parent.take() {
            self.nodes[parent.index()].children.retain(|&c| c != node);
        }
    }

    fn attach(
        &mut self,
        parent: NodeId,
        node: NodeId,
        reference: Option<NodeId>,
    ) -> Result<(), DomError> {
        self.check(parent)?;
        self.check(node)?;
        if self.is_inclusive_ancestor(node, parent) {
            return Err(DomError::Cycle { parent, node });
        }
        if let Some(reference) = reference {
            self.check(reference)?;
            if self.nodes[reference.index()].parent != Some(parent) || reference == node {
                return Err(DomError::NotAChild { parent, reference });
            }
        }

        self.detach(node);
        let children = &mut self.nodes[parent.index()].children;
        let pos = match reference {
            Some(reference) => children
                .iter()
                .position(|&c| c == reference)
                .unwrap_or(children.len()),
            None => children.len(),
        };
        children.insert(pos, node);
        self.nodes[node.index()].parent = Some(parent);
        Ok(())
    }

    fn notify(&mut self, parent: NodeId, added: Vec<NodeId>) {
        if added.is_empty() {
            return;
        }
        let targets: Vec<bool> = self
            .observers
            .iter()
            .map(|o| self.is_inclusive_ancestor(o.target, parent))
            .collect();

        let mut index = 0;
        self.observers.retain(|observer| {
            let interested = targets[index];
            index += 1;
            if !interested {
                return !observer.tx.is_closed();
            }
            observer
                .tx
                .send(MutationBatch {
                    added: added.clone(),
                })
                .is_ok()
        });
    }
}

impl Document for MemoryDocument {
    fn root(&self) -> NodeId {
        self.root
    }

    fn tag(&self, node: NodeId) -> Option<&str> {
        self.nodes.get(node.index()).map(|n| n.tag.as_str())
    }

    fn attribute(&self, node: NodeId, name: &str) -> Option<&str> {
        self.nodes
            .get(node.index())
            .and_then(|n| n.attrs.get(name))
            .map(String::as_str)
    }

    fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) -> Result<(), DomError> {
        let data = self
            .nodes
            .get_mut(node.index())
            .ok_or(DomError::UnknownNode(node))?;
        data.attrs.insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(node.index()).and_then(|n| n.parent)
    }

    fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.nodes
            .get(node.index())
            .map(|n| n.children.clone())
            .unwrap_or_default()
    }

    fn text_content(&self, node: NodeId) -> String {
        let Some(data) = self.nodes.get(node.index()) else {
            return String::new();
        };
        let mut text = data.text.clone();
        for child in self.descendants(node) {
            text.push_str(&self.nodes[child.index()].text);
        }
        text
    }

    fn set_text(&mut self, node: NodeId, text: &str) -> Result<(), DomError> {
        let data = self
            .nodes
            .get_mut(node.index())
            .ok_or(DomError::UnknownNode(node))?;
        data.text = text.to_string();
        Ok(())
    }

    fn create_element(&mut self, tag: &str) -> NodeId {
        self.nodes.push(NodeData::new(tag));
        NodeId::new(self.nodes.len() - 1)
    }

    fn insert_before(
        &mut self,
        parent: NodeId,
        node: NodeId,
        reference: Option<NodeId>,
    ) -> Result<(), DomError> {
        self.attach(parent, node, reference)?;
        self.notify(parent, vec![node]);
        Ok(())
    }

    fn observe(&mut self, target: NodeId) -> MutationStream {
        let (tx, rx) = mpsc::unbounded_channel();
        self.observers.push(Observer { target, tx });
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_before_and_siblings() {
        let mut doc = MemoryDocument::new();
        let root = doc.root();
        let a = doc.element("div", &[("id", "a")], "");
        let c = doc.element("div", &[("id", "c")], "");
        doc.append_child(root, a).unwrap();
        doc.append_child(root, c).unwrap();

        let b = doc.element("div", &[("id", "b")], "");
        doc.insert_before(root, b, Some(c)).unwrap();

        assert_eq!(doc.children(root), vec![a, b, c]);
        assert_eq!(doc.next_sibling(a), Some(b));
        assert_eq!(doc.next_sibling(c), None);
    }

    #[test]
    fn test_insert_rejects_foreign_reference_and_cycles() {
        let mut doc = MemoryDocument::new();
        let root = doc.root();
        let outer = doc.element("div", &[], "");
        let inner = doc.element("div", &[], "");
        doc.append_child(root, outer).unwrap();
        doc.append_child(outer, inner).unwrap();

        let stray = doc.element("span", &[], "");
        assert!(matches!(
            doc.insert_before(root, stray, Some(inner)),
            Err(DomError::NotAChild { .. })
        ));
        assert!(matches!(
            doc.append_child(inner, outer),
            Err(DomError::Cycle { .. })
        ));
        assert!(matches!(
            doc.append_child(root, NodeId::new(999)),
            Err(DomError::UnknownNode(_))
        ));
    }

    #[test]
    fn test_queries() {
        let mut doc = MemoryDocument::new();
        let root = doc.root();
        let list = doc.element("ul", &[("class", "feed items")], "");
        let first = doc.element("li", &[], "one");
        let second = doc.element("li", &[], "two");
        doc.append_child(root, list).unwrap();
        doc.append_child(list, first).unwrap();
        doc.append_child(list, second).unwrap();

        let items = doc.query_all(root, |d, n| d.tag(n) == Some("li"));
        assert_eq!(items, vec![first, second]);
        assert_eq!(doc.closest(second, |d, n| d.has_class(n, "feed")), Some(list));
        assert_eq!(doc.text_content(list), "onetwo");
        assert!(doc.is_connected(second));

        doc.remove(list).unwrap();
        assert!(!doc.is_connected(second));
    }

    #[test]
    fn test_observer_sees_additions_under_target_only() {
        let mut doc = MemoryDocument::new();
        let root = doc.root();
        let watched = doc.element("main", &[], "");
        let other = doc.element("aside", &[], "");
        doc.append_child(root, watched).unwrap();
        doc.append_child(root, other).unwrap();

        let mut stream = doc.observe(watched);

        let inside = doc.element("article", &[], "");
        doc.append_child(watched, inside).unwrap();
        let deep = doc.element("p", &[], "");
        doc.append_child(inside, deep).unwrap();
        let outside = doc.element("article", &[], "");
        doc.append_child(other, outside).unwrap();

        assert_eq!(stream.try_recv().unwrap().added, vec![inside]);
        assert_eq!(stream.try_recv().unwrap().added, vec![deep]);
        assert!(stream.try_recv().is_err());
    }

    #[test]
    fn test_append_all_is_one_batch() {
        let mut doc = MemoryDocument::new();
        let root = doc.root();
        let mut stream = doc.observe(root);

        let a = doc.element("div", &[], "");
        let b = doc.element("div", &[], "");
        doc.append_all(root, &[a, b]).unwrap();

        assert_eq!(stream.try_recv().unwrap().added, vec![a, b]);
    }

    #[test]
    fn test_dropped_observer_is_pruned() {
        let mut doc = MemoryDocument::new();
        let root = doc.root();
        drop(doc.observe(root));

        let a = doc.element("div", &[], "");
        doc.append_child(root, a).unwrap();
        assert!(doc.observers.is_empty());
    }

    #[test]
    fn test_outer_html() {
        let mut doc = MemoryDocument::new();
        let root = doc.root();
        let span = doc.element("span", &[("class", "x")], " . Paris");
        doc.append_child(root, span).unwrap();
        assert_eq!(
            doc.outer_html(root),
            "<body><span class=\"x\"> . Paris</span></body>"
        );
    }
}
