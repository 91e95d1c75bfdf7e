#![forbid(unsafe_code)]

//! In-memory [`Host`]: a plain node table with an operation log.
//!
//! Used by tests and headless embedders. [`MemoryHost::to_markup`] renders a
//! subtree as compact markup (`<div id="a">text</div>`), and every mutation
//! is recorded as a [`HostOp`] so callers can assert exactly which host calls
//! a commit made.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;

use tracing::trace;

use crate::element::PropValue;
use crate::host::{Host, HostError, HostHandle};

/// A recorded host call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostOp {
    CreateElement { handle: HostHandle, tag: String },
    CreateText { handle: HostHandle, text: String },
    SetProperty { handle: HostHandle, key: String, value: String },
    RemoveProperty { handle: HostHandle, key: String },
    SetText { handle: HostHandle, text: String },
    Append { parent: HostHandle, child: HostHandle },
    InsertBefore { parent: HostHandle, child: HostHandle, before: HostHandle },
    Remove { parent: HostHandle, child: HostHandle },
}

impl HostOp {
    /// Whether the op changes tree structure (append, insert, remove).
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::Append { .. } | Self::InsertBefore { .. } | Self::Remove { .. }
        )
    }
}

#[derive(Debug, Default)]
struct MemoryNode {
    /// `None` for text nodes.
    tag: Option<String>,
    text: String,
    attrs: BTreeMap<String, PropValue>,
    children: Vec<HostHandle>,
    parent: Option<HostHandle>,
}

/// Host keeping its objects in a map.
#[derive(Debug, Default)]
pub struct MemoryHost {
    nodes: HashMap<HostHandle, MemoryNode>,
    next_handle: u64,
    ops: Vec<HostOp>,
    fail_next: Option<&'static str>,
}

fn prop_text(value: &PropValue) -> String {
    match value {
        PropValue::Null => String::new(),
        PropValue::Bool(b) => b.to_string(),
        PropValue::Int(n) => n.to_string(),
        PropValue::Float(x) => x.to_string(),
        PropValue::Str(s) => s.to_string(),
        PropValue::Callback(_) => "[callback]".to_string(),
        PropValue::Any(_) => "[value]".to_string(),
    }
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a detached `<root>` element to mount a tree into.
    pub fn create_container(&mut self) -> HostHandle {
        self.allocate(MemoryNode {
            tag: Some("root".to_string()),
            ..MemoryNode::default()
        })
    }

    /// Make the next call to primitive `op` fail.
    pub fn fail_next(&mut self, op: &'static str) {
        self.fail_next = Some(op);
    }

    pub fn ops(&self) -> &[HostOp] {
        &self.ops
    }

    /// Return and clear the operation log.
    pub fn take_ops(&mut self) -> Vec<HostOp> {
        std::mem::take(&mut self.ops)
    }

    /// Live host objects, detached ones included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn children(&self, handle: HostHandle) -> &[HostHandle] {
        self.nodes.get(&handle).map_or(&[], |node| node.children.as_slice())
    }

    pub fn parent(&self, handle: HostHandle) -> Option<HostHandle> {
        self.nodes.get(&handle).and_then(|node| node.parent)
    }

    pub fn attribute(&self, handle: HostHandle, key: &str) -> Option<&PropValue> {
        self.nodes.get(&handle).and_then(|node| node.attrs.get(key))
    }

    /// Invoke the callback stored under `key` on `handle`, as an event
    /// dispatcher would. Returns `false` when there is none.
    pub fn dispatch(&self, handle: HostHandle, key: &str, arg: &PropValue) -> bool {
        match self.attribute(handle, key).and_then(PropValue::as_callback) {
            Some(callback) => {
                let callback = callback.clone();
                callback.call(arg);
                true
            }
            None => false,
        }
    }

    /// First element below `root` (inclusive, pre-order) whose `id`
    /// attribute equals `id`.
    pub fn find_by_id(&self, root: HostHandle, id: &str) -> Option<HostHandle> {
        let node = self.nodes.get(&root)?;
        if node.attrs.get("id").and_then(PropValue::as_str) == Some(id) {
            return Some(root);
        }
        node.children.iter().find_map(|&child| self.find_by_id(child, id))
    }

    /// Concatenated text of the subtree.
    pub fn text_content(&self, handle: HostHandle) -> String {
        let mut out = String::new();
        self.collect_text(handle, &mut out);
        out
    }

    fn collect_text(&self, handle: HostHandle, out: &mut String) {
        let Some(node) = self.nodes.get(&handle) else {
            return;
        };
        out.push_str(&node.text);
        for &child in &node.children {
            self.collect_text(child, out);
        }
    }

    /// Compact markup of the subtree rooted at `handle`.
    pub fn to_markup(&self, handle: HostHandle) -> String {
        let mut out = String::new();
        self.write_markup(handle, &mut out);
        out
    }

    fn write_markup(&self, handle: HostHandle, out: &mut String) {
        let Some(node) = self.nodes.get(&handle) else {
            return;
        };
        let Some(tag) = &node.tag else {
            out.push_str(&node.text);
            return;
        };
        let _ = write!(out, "<{tag}");
        for (key, value) in &node.attrs {
            let _ = write!(out, " {key}=\"{}\"", prop_text(value));
        }
        out.push('>');
        out.push_str(&node.text);
        for &child in &node.children {
            self.write_markup(child, out);
        }
        let _ = write!(out, "</{tag}>");
    }

    fn allocate(&mut self, node: MemoryNode) -> HostHandle {
        self.next_handle += 1;
        let handle = HostHandle(self.next_handle);
        self.nodes.insert(handle, node);
        handle
    }

    fn check(&mut self, op: &'static str) -> Result<(), HostError> {
        if self.fail_next == Some(op) {
            self.fail_next = None;
            return Err(HostError::new(op, "injected failure"));
        }
        Ok(())
    }

    fn node_mut(&mut self, op: &'static str, handle: HostHandle) -> Result<&mut MemoryNode, HostError> {
        self.nodes
            .get_mut(&handle)
            .ok_or_else(|| HostError::new(op, format!("unknown handle {handle}")))
    }

    fn detach(&mut self, child: HostHandle) {
        let Some(parent) = self.nodes.get_mut(&child).and_then(|node| node.parent.take()) else {
            return;
        };
        if let Some(parent) = self.nodes.get_mut(&parent) {
            parent.children.retain(|&c| c != child);
        }
    }

    fn attach(
        &mut self,
        op: &'static str,
        parent: HostHandle,
        child: HostHandle,
        before: Option<HostHandle>,
    ) -> Result<(), HostError> {
        if parent == child {
            return Err(HostError::new(op, "cannot attach a node to itself"));
        }
        if self.node_mut(op, parent)?.tag.is_none() {
            return Err(HostError::new(op, format!("text node {parent} cannot have children")));
        }
        self.node_mut(op, child)?;
        self.detach(child);
        let parent_node = self.node_mut(op, parent)?;
        let position = match before {
            Some(before) => Some(
                parent_node
                    .children
                    .iter()
                    .position(|&c| c == before)
                    .ok_or_else(|| HostError::new(op, format!("{before} is not a child of {parent}")))?,
            ),
            None => None,
        };
        match position {
            Some(index) => parent_node.children.insert(index, child),
            None => parent_node.children.push(child),
        }
        self.node_mut(op, child)?.parent = Some(parent);
        Ok(())
    }

    /// Drop `handle` and everything below it from the table.
    fn release(&mut self, handle: HostHandle) {
        if let Some(node) = self.nodes.remove(&handle) {
            for child in node.children {
                self.release(child);
            }
        }
    }
}

impl Host for MemoryHost {
    fn create_host_object(&mut self, tag: &str) -> Result<HostHandle, HostError> {
        self.check("create_host_object")?;
        let handle = self.allocate(MemoryNode {
            tag: Some(tag.to_string()),
            ..MemoryNode::default()
        });
        self.ops.push(HostOp::CreateElement {
            handle,
            tag: tag.to_string(),
        });
        Ok(handle)
    }

    fn create_text_object(&mut self, content: &str) -> Result<HostHandle, HostError> {
        self.check("create_text_object")?;
        let handle = self.allocate(MemoryNode {
            text: content.to_string(),
            ..MemoryNode::default()
        });
        self.ops.push(HostOp::CreateText {
            handle,
            text: content.to_string(),
        });
        Ok(handle)
    }

    fn set_property(&mut self, handle: HostHandle, key: &str, value: &PropValue) -> Result<(), HostError> {
        const OP: &str = "set_property";
        self.check(OP)?;
        let node = self.node_mut(OP, handle)?;
        if value.is_null() {
            node.attrs.remove(key);
            self.ops.push(HostOp::RemoveProperty {
                handle,
                key: key.to_string(),
            });
        } else {
            node.attrs.insert(key.to_string(), value.clone());
            self.ops.push(HostOp::SetProperty {
                handle,
                key: key.to_string(),
                value: prop_text(value),
            });
        }
        Ok(())
    }

    fn set_text_content(&mut self, handle: HostHandle, content: &str) -> Result<(), HostError> {
        const OP: &str = "set_text_content";
        self.check(OP)?;
        let node = self.node_mut(OP, handle)?;
        node.text = content.to_string();
        let orphans = if node.tag.is_some() {
            std::mem::take(&mut node.children)
        } else {
            Vec::new()
        };
        for orphan in orphans {
            self.release(orphan);
        }
        self.ops.push(HostOp::SetText {
            handle,
            text: content.to_string(),
        });
        Ok(())
    }

    fn append_child(&mut self, parent: HostHandle, child: HostHandle) -> Result<(), HostError> {
        const OP: &str = "append_child";
        self.check(OP)?;
        self.attach(OP, parent, child, None)?;
        trace!(%parent, %child, "append");
        self.ops.push(HostOp::Append { parent, child });
        Ok(())
    }

    fn insert_before(
        &mut self,
        parent: HostHandle,
        child: HostHandle,
        before: HostHandle,
    ) -> Result<(), HostError> {
        const OP: &str = "insert_before";
        self.check(OP)?;
        self.attach(OP, parent, child, Some(before))?;
        trace!(%parent, %child, %before, "insert");
        self.ops.push(HostOp::InsertBefore { parent, child, before });
        Ok(())
    }

    fn remove_child(&mut self, parent: HostHandle, child: HostHandle) -> Result<(), HostError> {
        const OP: &str = "remove_child";
        self.check(OP)?;
        if self.parent(child) != Some(parent) {
            return Err(HostError::new(OP, format!("{child} is not a child of {parent}")));
        }
        self.detach(child);
        self.release(child);
        self.ops.push(HostOp::Remove { parent, child });
        Ok(())
    }
}
