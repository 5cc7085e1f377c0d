//! Action Model: semantic actions attached to sequence slots.
//!
//! Actions are lowered from grammar action blocks by the compiler and their
//! operand addresses are filled in by the action check. The driver executes
//! only the parse-relevant parts (`skip`, `require`); the rest travel with
//! the action trace.

use serde::Serialize;

/// Functions every grammar may call, with their arity.
pub const BUILTIN_FUNCTIONS: &[(&str, usize)] = &[("require", 2)];

/// Actions attached to one slot of a sequence, run in order.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Action {
    pub parts: Vec<ActionPart>,
}

impl Action {
    pub fn new(parts: Vec<ActionPart>) -> Self {
        Action { parts }
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn has_skip(&self) -> bool {
        self.parts.iter().any(|p| matches!(p, ActionPart::Skip))
    }

    /// The last `push` in the slot, which sets the context for the next
    /// element.
    pub fn pushed(&self) -> Option<&Access> {
        self.parts.iter().rev().find_map(|p| match p {
            ActionPart::Push(a) => Some(a),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MapOp {
    New,
    MapSet,
    Get,
    Delete,
    Apply,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionPart {
    Literal(String),
    Access(Access),
    Assign {
        target: Access,
        value: Box<ActionPart>,
    },
    Copy {
        target: Access,
        source: Access,
    },
    Negate(Access),
    PushBack {
        target: Access,
        value: Box<ActionPart>,
    },
    ObjectMap {
        op: MapOp,
        target: Access,
        key: Option<Box<ActionPart>>,
    },
    Skip,
    Push(Access),
    Print(Box<ActionPart>),
    Call {
        function: String,
        args: Vec<ActionPart>,
    },
}

impl ActionPart {
    /// Every operand address of this part, outermost first.
    pub fn accesses_mut(&mut self) -> Vec<&mut Access> {
        let mut out = Vec::new();
        self.collect_accesses(&mut out);
        out
    }

    fn collect_accesses<'a>(&'a mut self, out: &mut Vec<&'a mut Access>) {
        match self {
            ActionPart::Literal(_) | ActionPart::Skip => {}
            ActionPart::Access(a) | ActionPart::Negate(a) | ActionPart::Push(a) => out.push(a),
            ActionPart::Assign { target, value } | ActionPart::PushBack { target, value } => {
                out.push(target);
                value.collect_accesses(out);
            }
            ActionPart::Copy { target, source } => {
                out.push(target);
                out.push(source);
            }
            ActionPart::ObjectMap { target, key, .. } => {
                out.push(target);
                if let Some(k) = key {
                    k.collect_accesses(out);
                }
            }
            ActionPart::Print(v) => v.collect_accesses(out),
            ActionPart::Call { args, .. } => {
                for a in args {
                    a.collect_accesses(out);
                }
            }
        }
    }
}

/// An operand naming a value: `$1`, `$$`, `this`, `..root.attr`, `a.b.0`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Access {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<ActionAddress>,
}

impl Access {
    pub fn new(text: impl Into<String>) -> Self {
        Access {
            text: text.into(),
            address: None,
        }
    }

    /// Split the operand text into syntactic segments.
    pub fn segments(&self) -> Result<Vec<AccessSegment>, String> {
        let mut text = self.text.as_str();
        let mut segs = Vec::new();
        if let Some(rest) = text.strip_prefix("..") {
            segs.push(AccessSegment::Absolute);
            text = rest.strip_prefix('.').unwrap_or(rest);
        }
        if text.is_empty() {
            return Ok(segs);
        }
        for part in text.split('.') {
            let seg = match part {
                "" => return Err(format!("empty segment in '{}'", self.text)),
                "this" => AccessSegment::This,
                "$$" => AccessSegment::Current,
                p if p.starts_with('$') => match p[1..].parse::<usize>() {
                    Ok(n) if n > 0 => AccessSegment::Node(n),
                    _ => return Err(format!("bad node reference '{}'", p)),
                },
                p => AccessSegment::Name(p.to_owned()),
            };
            segs.push(seg);
        }
        Ok(segs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessSegment {
    Absolute,
    This,
    Current,
    /// `$N`, one-based
    Node(usize),
    Name(String),
}

/// Resolved operand location, one step per segment.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ActionAddress {
    pub steps: Vec<AddressStep>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressStep {
    Root,
    Attribute(usize),
    ListIndex(usize),
    MapKey(String),
    /// Zero-based element of the enclosing sequence.
    Node(usize),
    /// Value matched just before the action.
    Current,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_segments() {
        assert_eq!(
            Access::new("..cfg.items").segments().unwrap(),
            vec![
                AccessSegment::Absolute,
                AccessSegment::Name("cfg".into()),
                AccessSegment::Name("items".into())
            ]
        );
        assert_eq!(
            Access::new("$2").segments().unwrap(),
            vec![AccessSegment::Node(2)]
        );
        assert_eq!(Access::new("..").segments().unwrap(), vec![AccessSegment::Absolute]);
        assert!(Access::new("$0").segments().is_err());
        assert!(Access::new("a..b").segments().is_err());
    }

    #[test]
    fn pushed_takes_last_push() {
        let action = Action::new(vec![
            ActionPart::Push(Access::new("a")),
            ActionPart::Skip,
            ActionPart::Push(Access::new("b")),
        ]);
        assert_eq!(action.pushed().map(|a| a.text.as_str()), Some("b"));
        assert!(action.has_skip());
    }

    #[test]
    fn accesses_cover_nested_operands() {
        let mut part = ActionPart::Call {
            function: "f".into(),
            args: vec![
                ActionPart::Access(Access::new("x")),
                ActionPart::Literal("1".into()),
                ActionPart::Assign {
                    target: Access::new("y"),
                    value: Box::new(ActionPart::Access(Access::new("$1"))),
                },
            ],
        };
        let texts: Vec<String> = part.accesses_mut().iter().map(|a| a.text.clone()).collect();
        assert_eq!(texts, vec!["x", "y", "$1"]);
    }
}
