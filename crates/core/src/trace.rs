//! Parse results: the action trace and the sink that receives results.

use crate::error::ParseError;
use crate::index::TypeIndex;
use crate::node::{NodeId, ParseTree};
use crate::rules::RuleId;
use crate::source::{SourceId, SourceSet};
use crate::tokenizer::SourceRecord;
use serde::Serialize;
use std::collections::BTreeMap;

/// One matched sequence that carries actions, in match order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TraceEntry {
    pub node: NodeId,
    pub rule: RuleId,
}

/// A forward reference made by `require(kind, name)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Requirement {
    pub kind: String,
    pub name: String,
}

impl Requirement {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Requirement {
            kind: kind.into(),
            name: name.into(),
        }
    }
}

/// Everything one parse produced.
#[derive(Debug)]
pub struct ParseResult {
    pub tree: ParseTree,
    pub errors: Vec<ParseError>,
    pub trace: Vec<TraceEntry>,
    /// Requirements that could not be satisfied, in the order they failed.
    pub unsatisfied: Vec<Requirement>,
    pub index: TypeIndex,
    pub sources: SourceSet,
    pub records: BTreeMap<SourceId, SourceRecord>,
}

impl ParseResult {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.unsatisfied.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "tree": self.tree.to_json(&self.sources),
            "errors": self.errors,
            "unsatisfied": self.unsatisfied,
        })
    }
}

/// Receives finished parses.
pub trait ResultsSink {
    fn accept(&mut self, result: ParseResult);
}

impl ResultsSink for Vec<ParseResult> {
    fn accept(&mut self, result: ParseResult) {
        self.push(result);
    }
}
