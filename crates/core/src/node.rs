//! Parse tree storage.
//!
//! Nodes are allocated from a [`NodePool`] for one parse session and linked
//! through parent / first-child / next-sibling handles. Nodes built by a
//! failed attempt are simply never attached; the whole pool is dropped at
//! once when the session ends.

use crate::error::ParseFatal;
use crate::rules::{RuleId, TypeOp};
use crate::source::{DocRange, SourceSet};
use serde::Serialize;
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct NodeFlags(pub u16);

impl NodeFlags {
    pub const NAMED: NodeFlags = NodeFlags(1);
    pub const ERROR_INCOMPLETE: NodeFlags = NodeFlags(1 << 1);
    pub const LAZY_TYPENAME: NodeFlags = NodeFlags(1 << 2);
    pub const LAZY_TYPE_REFERENCE: NodeFlags = NodeFlags(1 << 3);
    pub const DELAY_LOAD: NodeFlags = NodeFlags(1 << 4);
    pub const SKIPPED: NodeFlags = NodeFlags(1 << 5);
    pub const DIRECTIVE: NodeFlags = NodeFlags(1 << 6);
    pub const DUPLICATE_NAME: NodeFlags = NodeFlags(1 << 7);

    const NAMES: [(NodeFlags, &'static str); 8] = [
        (NodeFlags::NAMED, "named"),
        (NodeFlags::ERROR_INCOMPLETE, "error_incomplete"),
        (NodeFlags::LAZY_TYPENAME, "lazy_typename"),
        (NodeFlags::LAZY_TYPE_REFERENCE, "lazy_type_reference"),
        (NodeFlags::DELAY_LOAD, "delay_load"),
        (NodeFlags::SKIPPED, "skipped"),
        (NodeFlags::DIRECTIVE, "directive"),
        (NodeFlags::DUPLICATE_NAME, "duplicate_name"),
    ];

    pub fn contains(self, other: NodeFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: NodeFlags) {
        self.0 |= other.0;
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn names(self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .filter(|(f, _)| self.contains(*f))
            .map(|(_, n)| *n)
            .collect()
    }
}

/// Payload some nodes carry besides their text.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeAux {
    FileReference {
        path: String,
        resolved: Option<String>,
        output: bool,
    },
    /// Position of a delay-load definition among all recorded ones.
    DelayLoadOrder(u32),
    TypeInfo {
        op: TypeOp,
        path: Vec<String>,
        save: Option<Vec<String>>,
        renamed: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParseNode {
    pub rule: Option<RuleId>,
    pub node_type: Option<String>,
    pub range: DocRange,
    /// Text when it differs from the covered source text.
    pub value: Option<String>,
    pub flags: NodeFlags,
    pub aux: Option<NodeAux>,
    pub parent: Option<NodeId>,
    pub first_child: Option<NodeId>,
    pub last_child: Option<NodeId>,
    pub next_sibling: Option<NodeId>,
    pub lexical_index: Option<u32>,
}

impl ParseNode {
    pub fn new(rule: Option<RuleId>, range: DocRange) -> Self {
        ParseNode {
            rule,
            node_type: None,
            range,
            value: None,
            flags: NodeFlags::default(),
            aux: None,
            parent: None,
            first_child: None,
            last_child: None,
            next_sibling: None,
            lexical_index: None,
        }
    }

    pub fn with_type(mut self, node_type: impl Into<String>) -> Self {
        self.node_type = Some(node_type.into());
        self
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_flags(mut self, flags: NodeFlags) -> Self {
        self.flags.insert(flags);
        self
    }

    pub fn with_aux(mut self, aux: NodeAux) -> Self {
        self.aux = Some(aux);
        self
    }
}

#[derive(Debug, Clone)]
pub struct NodePool {
    nodes: Vec<ParseNode>,
    limit: usize,
}

impl NodePool {
    pub fn new(limit: usize) -> Self {
        NodePool {
            nodes: Vec::new(),
            limit,
        }
    }

    pub fn alloc(&mut self, node: ParseNode) -> Result<NodeId, ParseFatal> {
        if self.nodes.len() >= self.limit {
            return Err(ParseFatal::NodePoolExhausted { limit: self.limit });
        }
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        Ok(id)
    }

    pub fn get(&self, id: NodeId) -> &ParseNode {
        &self.nodes[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: NodeId) -> &mut ParseNode {
        &mut self.nodes[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        self.get_mut(child).parent = Some(parent);
        self.get_mut(child).next_sibling = None;
        match self.get(parent).last_child {
            Some(last) => self.get_mut(last).next_sibling = Some(child),
            None => self.get_mut(parent).first_child = Some(child),
        }
        self.get_mut(parent).last_child = Some(child);
    }

    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut cur = self.get(id).first_child;
        while let Some(c) = cur {
            out.push(c);
            cur = self.get(c).next_sibling;
        }
        out
    }

    /// Put `new` where `old` sits in its parent's child list. `old` is left
    /// detached.
    pub fn replace(&mut self, old: NodeId, new: NodeId) {
        let Some(parent) = self.get(old).parent else {
            return;
        };
        let next = self.get(old).next_sibling;
        let prev = self
            .children(parent)
            .into_iter()
            .take_while(|c| *c != old)
            .last();
        {
            let n = self.get_mut(new);
            n.parent = Some(parent);
            n.next_sibling = next;
        }
        match prev {
            Some(p) => self.get_mut(p).next_sibling = Some(new),
            None => self.get_mut(parent).first_child = Some(new),
        }
        if self.get(parent).last_child == Some(old) {
            self.get_mut(parent).last_child = Some(new);
        }
        let o = self.get_mut(old);
        o.parent = None;
        o.next_sibling = None;
    }
}

/// The finished tree of one parse.
#[derive(Debug, Clone)]
pub struct ParseTree {
    pool: NodePool,
    root: NodeId,
    /// Nodes in document order.
    lexical_order: Vec<NodeId>,
    /// Leaves where the source document changes from the previous leaf.
    file_transitions: Vec<NodeId>,
}

impl ParseTree {
    pub(crate) fn finalize(mut pool: NodePool, root: NodeId) -> Self {
        let mut lexical_order = Vec::new();
        let mut file_transitions = Vec::new();
        let mut last_source = None;
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            pool.get_mut(id).lexical_index = Some(lexical_order.len() as u32);
            lexical_order.push(id);
            let children = pool.children(id);
            if children.is_empty() && id != root {
                let source = pool.get(id).range.source;
                if last_source.is_some_and(|s| s != source) {
                    file_transitions.push(id);
                }
                last_source = Some(source);
            }
            stack.extend(children.into_iter().rev());
        }
        ParseTree {
            pool,
            root,
            lexical_order,
            file_transitions,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &ParseNode {
        self.pool.get(id)
    }

    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.pool.children(id)
    }

    pub fn lexical_order(&self) -> &[NodeId] {
        &self.lexical_order
    }

    pub fn file_transitions(&self) -> &[NodeId] {
        &self.file_transitions
    }

    /// Attached nodes with the given type, in document order.
    pub fn find_by_type(&self, node_type: &str) -> Vec<NodeId> {
        self.lexical_order
            .iter()
            .copied()
            .filter(|id| self.node(*id).node_type.as_deref() == Some(node_type))
            .collect()
    }

    /// Node text: its value, else the source text it covers.
    pub fn text<'a>(&'a self, id: NodeId, sources: &'a SourceSet) -> &'a str {
        let node = self.node(id);
        match &node.value {
            Some(v) => v,
            None => sources.slice(&node.range),
        }
    }

    pub fn to_json(&self, sources: &SourceSet) -> Value {
        self.node_json(self.root, sources)
    }

    fn node_json(&self, id: NodeId, sources: &SourceSet) -> Value {
        let node = self.node(id);
        let mut obj = json!({
            "type": node.node_type,
            "text": self.text(id, sources),
        });
        if !node.flags.is_empty() {
            obj["flags"] = json!(node.flags.names());
        }
        let children = self.children(id);
        if !children.is_empty() {
            obj["children"] = Value::Array(
                children
                    .into_iter()
                    .map(|c| self.node_json(c, sources))
                    .collect(),
            );
        }
        obj
    }
}

// ── Tests ──────────────────────────────────────────────────────────────
