//! In-memory host tree.
//!
//! The renderer never touches a real DOM. It drives a [`HostTree`]: an arena
//! of elements and text nodes that records every mutation as a [`HostOp`], so
//! tests can assert on both the resulting markup and the work it took.

use std::fmt::Write as _;
use std::mem;

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use slotmap::{new_key_type, SlotMap};
use tracing::trace;

new_key_type! {
    /// Handle to a node in the [`HostTree`].
    pub struct HostId;
}

#[derive(Debug, Clone, PartialEq)]
enum HostKind {
    Element { tag: String, props: IndexMap<String, Value> },
    Text(String),
}

#[derive(Debug)]
struct HostNode {
    kind: HostKind,
    parent: Option<HostId>,
    children: Vec<HostId>,
}

/// One mutation of the host tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum HostOp {
    CreateElement { tag: String },
    CreateText { text: String },
    SetText { text: String },
    SetProp { key: String, value: Value },
    RemoveProp { key: String },
    Insert,
    Remove,
}

/// An arena of host nodes plus the log of operations applied to it.
#[derive(Debug, Default)]
pub struct HostTree {
    nodes: SlotMap<HostId, HostNode>,
    ops: Vec<HostOp>,
}

impl HostTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_element(&mut self, tag: &str) -> HostId {
        self.ops.push(HostOp::CreateElement { tag: tag.to_string() });
        self.alloc(HostKind::Element {
            tag: tag.to_string(),
            props: IndexMap::new(),
        })
    }

    pub fn create_text(&mut self, text: &str) -> HostId {
        self.ops.push(HostOp::CreateText { text: text.to_string() });
        self.alloc(HostKind::Text(text.to_string()))
    }

    fn alloc(&mut self, kind: HostKind) -> HostId {
        self.nodes.insert(HostNode {
            kind,
            parent: None,
            children: Vec::new(),
        })
    }

    pub fn set_text(&mut self, id: HostId, text: &str) {
        if let Some(HostKind::Text(current)) = self.nodes.get_mut(id).map(|n| &mut n.kind) {
            *current = text.to_string();
            self.ops.push(HostOp::SetText { text: text.to_string() });
        }
    }

    pub fn set_prop(&mut self, id: HostId, key: &str, value: &Value) {
        if let Some(HostKind::Element { props, .. }) = self.nodes.get_mut(id).map(|n| &mut n.kind) {
            props.insert(key.to_string(), value.clone());
            self.ops.push(HostOp::SetProp {
                key: key.to_string(),
                value: value.clone(),
            });
        }
    }

    pub fn remove_prop(&mut self, id: HostId, key: &str) {
        if let Some(HostKind::Element { props, .. }) = self.nodes.get_mut(id).map(|n| &mut n.kind) {
            if props.shift_remove(key).is_some() {
                self.ops.push(HostOp::RemoveProp { key: key.to_string() });
            }
        }
    }

    /// Insert `child` into `parent` before `anchor`, or at the end. A child
    /// that already has a parent is moved.
    pub fn insert(&mut self, child: HostId, parent: HostId, anchor: Option<HostId>) {
        if !self.nodes.contains_key(child) || !self.nodes.contains_key(parent) {
            return;
        }
        self.detach(child);

        let siblings = &mut self.nodes[parent].children;
        let index = anchor
            .and_then(|anchor| siblings.iter().position(|&c| c == anchor))
            .unwrap_or(siblings.len());
        siblings.insert(index, child);
        self.nodes[child].parent = Some(parent);

        trace!(?child, ?parent, index, "host insert");
        self.ops.push(HostOp::Insert);
    }

    /// Remove `id` and its whole subtree.
    pub fn remove(&mut self, id: HostId) {
        if !self.nodes.contains_key(id) {
            return;
        }
        self.detach(id);

        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if let Some(node) = self.nodes.remove(next) {
                stack.extend(node.children);
            }
        }
        self.ops.push(HostOp::Remove);
    }

    fn detach(&mut self, id: HostId) {
        if let Some(parent) = self.nodes[id].parent.take() {
            if let Some(node) = self.nodes.get_mut(parent) {
                node.children.retain(|&c| c != id);
            }
        }
    }

    pub fn parent(&self, id: HostId) -> Option<HostId> {
        self.nodes.get(id)?.parent
    }

    pub fn next_sibling(&self, id: HostId) -> Option<HostId> {
        let parent = self.parent(id)?;
        let siblings = &self.nodes[parent].children;
        let index = siblings.iter().position(|&c| c == id)?;
        siblings.get(index + 1).copied()
    }

    pub fn children(&self, id: HostId) -> &[HostId] {
        self.nodes.get(id).map_or(&[][..], |n| n.children.as_slice())
    }

    pub fn text(&self, id: HostId) -> Option<&str> {
        match &self.nodes.get(id)?.kind {
            HostKind::Text(text) => Some(text),
            HostKind::Element { .. } => None,
        }
    }

    pub fn prop(&self, id: HostId, key: &str) -> Option<&Value> {
        match &self.nodes.get(id)?.kind {
            HostKind::Element { props, .. } => props.get(key),
            HostKind::Text(_) => None,
        }
    }

    pub fn contains(&self, id: HostId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Drain the operation log.
    pub fn take_ops(&mut self) -> Vec<HostOp> {
        mem::take(&mut self.ops)
    }

    /// Render `id` as markup. Props are written in insertion order and text
    /// is not escaped.
    pub fn to_html(&self, id: HostId) -> String {
        let mut out = String::new();
        self.write_html(id, &mut out);
        out
    }

    /// Render only the children of `id`.
    pub fn inner_html(&self, id: HostId) -> String {
        let mut out = String::new();
        for &child in self.children(id) {
            self.write_html(child, &mut out);
        }
        out
    }

    fn write_html(&self, id: HostId, out: &mut String) {
        let Some(node) = self.nodes.get(id) else {
            return;
        };
        match &node.kind {
            HostKind::Text(text) => out.push_str(text),
            HostKind::Element { tag, props } => {
                out.push('<');
                out.push_str(tag);
                for (key, value) in props {
                    match value {
                        Value::String(s) => {
                            let _ = write!(out, " {key}=\"{s}\"");
                        }
                        Value::Bool(true) => {
                            let _ = write!(out, " {key}");
                        }
                        Value::Bool(false) | Value::Null => {}
                        other => {
                            let _ = write!(out, " {key}=\"{other}\"");
                        }
                    }
                }
                out.push('>');
                for &child in &node.children {
                    self.write_html(child, out);
                }
                let _ = write!(out, "</{tag}>");
            }
        }
    }
}

// ---- Tests ----
