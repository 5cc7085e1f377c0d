//! Rule Model.
//!
//! Every grammar construct is one [`Rule`] stored in a [`RuleArena`] and
//! addressed by a stable [`RuleId`]. Children are owned through their ids;
//! references and struct bases point at other rules without owning them.

use crate::action::Action;
use crate::action::ActionPart;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RuleId(pub u32);

/// Cardinality of a recurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Count {
    ZeroOrMore,
    OneOrMore,
    ZeroOrOne,
}

impl Count {
    pub fn min(self) -> usize {
        match self {
            Count::OneOrMore => 1,
            Count::ZeroOrMore | Count::ZeroOrOne => 0,
        }
    }

    pub fn allows_many(self) -> bool {
        !matches!(self, Count::ZeroOrOne)
    }
}

/// Rule flags carried onto the nodes a rule produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct RuleFlags(pub u8);

impl RuleFlags {
    pub const LAZY_TYPENAME: RuleFlags = RuleFlags(1);
    pub const LAZY_TYPE_REFERENCE: RuleFlags = RuleFlags(1 << 1);
    pub const NAMED_NODE: RuleFlags = RuleFlags(1 << 2);
    pub const ERROR_INCOMPLETE: RuleFlags = RuleFlags(1 << 3);

    pub fn contains(self, other: RuleFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: RuleFlags) {
        self.0 |= other.0;
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// One arena slot: the rule plus the bookkeeping every rule carries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleNode {
    pub rule: Rule,
    pub parent: Option<RuleId>,
    /// Explicit node type given in the grammar.
    pub node_type: Option<String>,
    pub flags: RuleFlags,
    pub user_id: Option<i64>,
    /// Highest initialization pass already applied.
    pub init_pass: u8,
    /// Always consumes exactly one word.
    pub single_token: bool,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    Literal {
        text: String,
        case_sensitive: bool,
    },
    Sequence(Sequence),
    Alternate(Alternate),
    Recurrence {
        rule: RuleId,
        count: Count,
    },
    Delimited(Delimited),
    Int,
    Real,
    String,
    QuotedString {
        file_reference: Option<FileReferenceKind>,
    },
    LineString,
    StringExcept {
        exceptions: BTreeSet<String>,
    },
    Named(Named),
    Reference(Reference),
    TypeLoad(TypeLoad),
    Passthrough {
        kind: PassthroughKind,
        rule: RuleId,
    },
}

impl Rule {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Rule::Literal { .. } => "literal",
            Rule::Sequence(_) => "sequence",
            Rule::Alternate(_) => "alternate",
            Rule::Recurrence { .. } => "recurrence",
            Rule::Delimited(_) => "delimited",
            Rule::Int => "int",
            Rule::Real => "real",
            Rule::String => "string",
            Rule::QuotedString { .. } => "quoted-string",
            Rule::LineString => "line-string",
            Rule::StringExcept { .. } => "string-except",
            Rule::Named(n) => n.kind.name(),
            Rule::Reference(_) => "reference",
            Rule::TypeLoad(_) => "type-load",
            Rule::Passthrough { .. } => "passthrough",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Sequence {
    pub elements: Vec<RuleId>,
    /// Slot `i` runs before element `i`; slot `elements.len()` runs last.
    pub actions: BTreeMap<usize, Action>,
}

impl Sequence {
    pub fn has_actions(&self) -> bool {
        self.actions.values().any(|a| !a.is_empty())
    }

    pub fn slot_mut(&mut self, slot: usize) -> &mut Action {
        self.actions.entry(slot).or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Alternate {
    pub branches: Vec<RuleId>,
    pub accelerator: Option<Box<Accelerator>>,
}

/// Per-leading-byte candidate branch lists for an alternation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Accelerator {
    /// 256 ascending lists of branch indices.
    pub by_byte: Vec<Vec<u32>>,
    /// Branches that must be tried whatever the leading byte.
    pub unfiltered: Vec<u32>,
}

impl Accelerator {
    /// Candidate branch indices for a leading byte, ascending.
    pub fn candidates(&self, byte: u8) -> Vec<usize> {
        let filtered = self
            .by_byte
            .get(byte as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        let mut out = Vec::with_capacity(filtered.len() + self.unfiltered.len());
        let (mut i, mut j) = (0, 0);
        while i < filtered.len() || j < self.unfiltered.len() {
            let take_filtered = match (filtered.get(i), self.unfiltered.get(j)) {
                (Some(a), Some(b)) => a < b,
                (Some(_), None) => true,
                _ => false,
            };
            if take_filtered {
                out.push(filtered[i] as usize);
                i += 1;
            } else {
                out.push(self.unfiltered[j] as usize);
                j += 1;
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DelimitedSection {
    /// Literal that must precede the section's text.
    pub delimiter: Option<String>,
    pub rule: Option<RuleId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Delimited {
    pub sections: Vec<DelimitedSection>,
    pub case_sensitive: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileReferenceKind {
    Input,
    Output,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reference {
    pub path: String,
    pub target: Option<RuleId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassthroughKind {
    /// Child's match flagged as an incomplete construct.
    Error,
    /// Definition skimmed on the first pass and parsed on demand.
    DelayLoad { kind: String, terminator: String },
}

// ── Type-load commands ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeOp {
    Load,
    Create,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PathSegment {
    Name(String),
    /// `$N`: text of the Nth element matched so far in the enclosing sequence.
    Word(usize),
    /// `generated_name`: a fresh unique name.
    Generated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypePathSpec {
    pub segments: Vec<PathSegment>,
    /// Relative to the current type instead of the root namespace.
    pub nested: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypeLoad {
    pub op: TypeOp,
    /// Path to load or delete; the clone source for `Create`.
    pub load: TypePathSpec,
    /// Name of the created type.
    pub save: Option<TypePathSpec>,
    /// `new_replace`: replace an existing entry whatever the policy.
    pub allow_replace: bool,
}

// ── Named rules ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Named {
    pub name: String,
    pub kind: NamedKind,
    /// Alternation of the declared bodies.
    pub definition: Option<RuleId>,
    pub nested: BTreeMap<String, RuleId>,
    pub context_parent: Option<RuleId>,
    pub input_type: Option<String>,
    pub output_type: Option<String>,
    pub input_rule: Option<RuleId>,
    pub output_rule: Option<RuleId>,
}

impl Named {
    pub fn new(name: impl Into<String>, kind: NamedKind, context_parent: Option<RuleId>) -> Self {
        Named {
            name: name.into(),
            kind,
            definition: None,
            nested: BTreeMap::new(),
            context_parent,
            input_type: None,
            output_type: None,
            input_rule: None,
            output_rule: None,
        }
    }

    pub fn as_struct(&self) -> Option<&StructDef> {
        match &self.kind {
            NamedKind::Struct(s) => Some(s),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NamedKind {
    Rule,
    Struct(StructDef),
    Value,
    Enumeration(Vec<Enumerator>),
}

impl NamedKind {
    pub fn name(&self) -> &'static str {
        match self {
            NamedKind::Rule => "rule",
            NamedKind::Struct(_) => "struct",
            NamedKind::Value => "value",
            NamedKind::Enumeration(_) => "enumeration",
        }
    }

    pub fn same_kind(&self, other: &NamedKind) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Enumerator {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct StructDef {
    pub attributes: Vec<Attribute>,
    pub base_name: Option<String>,
    pub base: Option<RuleId>,
    pub initially: Vec<ActionPart>,
    pub script_vars: Vec<ScriptVar>,
    /// Grammar-default type paths this struct is registered under.
    pub symbols: Vec<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Attribute {
    pub name: String,
    pub type_name: String,
    pub is_pointer: bool,
    pub default: Option<String>,
    pub fixed: bool,
    pub value_type: Option<ValueType>,
    /// Rule that reads a value of this attribute's type.
    pub type_rule: Option<RuleId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScriptVar {
    pub type_name: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BasicType {
    Int,
    Real,
    String,
    Bool,
}

/// Node of the value-type graph used by the action check.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Basic(BasicType),
    Struct(RuleId),
    Value(RuleId),
    Enumeration(RuleId),
    List(Box<ValueType>),
    ObjectMap(Box<ValueType>),
}

impl ValueType {
    pub fn is_aggregate(&self) -> bool {
        matches!(
            self,
            ValueType::Struct(_) | ValueType::List(_) | ValueType::ObjectMap(_)
        )
    }
}

// ── Arena ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct RuleArena {
    nodes: Vec<RuleNode>,
}

impl RuleArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, rule: Rule, parent: Option<RuleId>, line: u32) -> RuleId {
        let id = RuleId(self.nodes.len() as u32);
        self.nodes.push(RuleNode {
            rule,
            parent,
            node_type: None,
            flags: RuleFlags::default(),
            user_id: None,
            init_pass: 0,
            single_token: false,
            line,
        });
        id
    }

    pub fn node(&self, id: RuleId) -> &RuleNode {
        &self.nodes[id.0 as usize]
    }

    pub fn node_mut(&mut self, id: RuleId) -> &mut RuleNode {
        &mut self.nodes[id.0 as usize]
    }

    pub fn rule(&self, id: RuleId) -> &Rule {
        &self.node(id).rule
    }

    pub fn rule_mut(&mut self, id: RuleId) -> &mut Rule {
        &mut self.node_mut(id).rule
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = RuleId> {
        (0..self.nodes.len() as u32).map(RuleId)
    }

    pub fn named(&self, id: RuleId) -> Option<&Named> {
        match self.rule(id) {
            Rule::Named(n) => Some(n),
            _ => None,
        }
    }

    pub fn named_mut(&mut self, id: RuleId) -> Option<&mut Named> {
        match self.rule_mut(id) {
            Rule::Named(n) => Some(n),
            _ => None,
        }
    }

    pub fn struct_def(&self, id: RuleId) -> Option<&StructDef> {
        self.named(id).and_then(Named::as_struct)
    }

    pub fn struct_def_mut(&mut self, id: RuleId) -> Option<&mut StructDef> {
        match self.named_mut(id).map(|n| &mut n.kind) {
            Some(NamedKind::Struct(s)) => Some(s),
            _ => None,
        }
    }

    /// Owned children, in declaration order.
    pub fn children(&self, id: RuleId) -> Vec<RuleId> {
        match self.rule(id) {
            Rule::Sequence(s) => s.elements.clone(),
            Rule::Alternate(a) => a.branches.clone(),
            Rule::Recurrence { rule, .. } | Rule::Passthrough { rule, .. } => vec![*rule],
            Rule::Delimited(d) => d.sections.iter().filter_map(|s| s.rule).collect(),
            Rule::Named(n) => n.definition.iter().copied().chain(n.nested.values().copied()).collect(),
            _ => Vec::new(),
        }
    }

    /// Rewrite every owned child id through `f`.
    pub fn map_children(&mut self, id: RuleId, mut f: impl FnMut(RuleId) -> RuleId) {
        match self.rule_mut(id) {
            Rule::Sequence(s) => s.elements.iter_mut().for_each(|e| *e = f(*e)),
            Rule::Alternate(a) => a.branches.iter_mut().for_each(|b| *b = f(*b)),
            Rule::Recurrence { rule, .. } | Rule::Passthrough { rule, .. } => *rule = f(*rule),
            Rule::Delimited(d) => {
                for s in &mut d.sections {
                    s.rule = s.rule.map(&mut f);
                }
            }
            Rule::Named(n) => n.definition = n.definition.map(&mut f),
            _ => {}
        }
    }

    /// Nearest enclosing named rule, the rule itself included.
    pub fn enclosing_named(&self, id: RuleId) -> Option<RuleId> {
        let mut cur = Some(id);
        while let Some(c) = cur {
            if self.named(c).is_some() {
                return Some(c);
            }
            cur = self.node(c).parent;
        }
        None
    }

    /// Nearest enclosing struct, the rule itself included.
    pub fn enclosing_struct(&self, id: RuleId) -> Option<RuleId> {
        let mut cur = self.enclosing_named(id);
        while let Some(c) = cur {
            if self.struct_def(c).is_some() {
                return Some(c);
            }
            cur = self.named(c).and_then(|n| n.context_parent);
        }
        None
    }

    /// Dotted name from the global scope, e.g. `platform.body`.
    pub fn full_name(&self, id: RuleId) -> String {
        let mut parts = Vec::new();
        let mut cur = self.enclosing_named(id);
        while let Some(c) = cur {
            let Some(n) = self.named(c) else { break };
            if n.context_parent.is_some() {
                parts.push(n.name.clone());
            }
            cur = n.context_parent;
        }
        parts.reverse();
        parts.join(".")
    }

    /// Resolve a dotted path: the first segment is searched upward through
    /// the enclosing scopes, the rest through nested tables.
    pub fn resolve_path(&self, from: RuleId, path: &str) -> Option<RuleId> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut scope = self.enclosing_named(from);
        let mut found = None;
        while let Some(s) = scope {
            let named = self.named(s)?;
            if let Some(hit) = named.nested.get(first) {
                found = Some(*hit);
                break;
            }
            scope = named.context_parent;
        }
        let mut cur = found?;
        for seg in segments {
            cur = *self.named(cur)?.nested.get(seg)?;
        }
        Some(cur)
    }

    /// Follow references to the rule that actually matches input.
    pub fn deref(&self, mut id: RuleId) -> RuleId {
        let mut hops = 0;
        while let Rule::Reference(Reference {
            target: Some(t), ..
        }) = self.rule(id)
        {
            id = *t;
            hops += 1;
            if hops > self.nodes.len() {
                break;
            }
        }
        id
    }

    /// Base chain of a struct, nearest first, the struct itself excluded.
    pub fn base_chain(&self, id: RuleId) -> Vec<RuleId> {
        let mut chain = Vec::new();
        let mut cur = self.struct_def(id).and_then(|s| s.base);
        while let Some(c) = cur {
            if c == id || chain.contains(&c) {
                break;
            }
            chain.push(c);
            cur = self.struct_def(c).and_then(|s| s.base);
        }
        chain
    }

    /// True when `derived` is `base` or inherits from it.
    pub fn is_type(&self, derived: RuleId, base: RuleId) -> bool {
        derived == base || self.base_chain(derived).contains(&base)
    }

    /// All attributes of a struct, base attributes first.
    pub fn all_attributes(&self, id: RuleId) -> Vec<&Attribute> {
        let mut chain = self.base_chain(id);
        chain.reverse();
        chain.push(id);
        chain
            .into_iter()
            .filter_map(|c| self.struct_def(c))
            .flat_map(|s| s.attributes.iter())
            .collect()
    }
}
