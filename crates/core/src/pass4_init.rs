//! Pass 4: the two guarded initialization passes.
//!
//! Pass 0 wires `:input`/`:output` types onto named rules and marks obvious
//! single-token leaves. Pass 1 finalizes single-token flags, checks delimited
//! sections, and builds alternation accelerators. `RuleNode::init_pass`
//! records the passes already applied, so re-running resolution is a no-op.

use crate::compile::Grammar;
use crate::config::ResolveOptions;
use crate::error::Stage;
use crate::rules::{Accelerator, NamedKind, PassthroughKind, Rule, RuleArena, RuleId};
use std::collections::BTreeSet;
use tracing::debug;

/// Result of the starts-with-byte analysis; `None` means "any byte".
type FirstBytes = Option<BTreeSet<u8>>;

pub fn initialize(g: &mut Grammar, options: &ResolveOptions) {
    let ids: Vec<RuleId> = g.rules.ids().collect();
    for id in &ids {
        if g.rules.node(*id).init_pass < 1 {
            init_pass0(g, *id);
            g.rules.node_mut(*id).init_pass = 1;
        }
    }
    let mut accelerated = 0usize;
    for id in &ids {
        if g.rules.node(*id).init_pass < 2 {
            if init_pass1(g, *id, options) {
                accelerated += 1;
            }
            g.rules.node_mut(*id).init_pass = 2;
        }
    }
    debug!(accelerated, "initialization passes finished");
}

fn init_pass0(g: &mut Grammar, id: RuleId) {
    let Some(named) = g.rules.named(id) else {
        g.rules.node_mut(id).single_token = is_leaf_token(g.rules.rule(id));
        return;
    };
    let input = named.input_type.clone();
    let output = named.output_type.clone();
    let mut wire = |label: &str, name: Option<String>| -> Option<RuleId> {
        let name = name?;
        let found = g.rules.resolve_path(id, &name);
        if found.is_none() {
            g.error(
                Stage::Init,
                Some(id),
                format!("unknown {} type '{}'", label, name),
            );
        }
        found
    };
    let input_rule = wire("input", input);
    let output_rule = wire("output", output);
    if let Some(n) = g.rules.named_mut(id) {
        n.input_rule = input_rule;
        n.output_rule = output_rule;
    }
}

fn is_leaf_token(rule: &Rule) -> bool {
    matches!(
        rule,
        Rule::Literal { .. }
            | Rule::Int
            | Rule::Real
            | Rule::String
            | Rule::StringExcept { .. }
            | Rule::Delimited(_)
    )
}

/// Returns true when an accelerator was built.
fn init_pass1(g: &mut Grammar, id: RuleId, options: &ResolveOptions) -> bool {
    let single = single_token(&g.rules, id, &mut BTreeSet::new());
    g.rules.node_mut(id).single_token = single;

    if let Rule::Delimited(d) = g.rules.rule(id) {
        let unreadable: Vec<RuleId> = d
            .sections
            .iter()
            .filter_map(|s| s.rule)
            .filter(|r| !range_readable(&g.rules, *r, &mut BTreeSet::new()))
            .collect();
        for r in unreadable {
            let kind = g.rules.rule(g.rules.deref(r)).kind_name();
            g.error(
                Stage::Init,
                Some(id),
                format!("delimited section of kind '{}' cannot read part of a word", kind),
            );
        }
    }

    let Rule::Alternate(alt) = g.rules.rule(id) else {
        return false;
    };
    if !options.optimize_parsing || alt.branches.len() < options.accelerator_threshold {
        return false;
    }
    let accelerator = build_accelerator(&g.rules, &alt.branches);
    let built = accelerator.is_some();
    if let Rule::Alternate(alt) = g.rules.rule_mut(id) {
        alt.accelerator = accelerator.map(Box::new);
    }
    built
}

/// Always consumes exactly one word.
pub fn single_token(rules: &RuleArena, id: RuleId, visiting: &mut BTreeSet<RuleId>) -> bool {
    if !visiting.insert(id) {
        return false;
    }
    let single = match rules.rule(id) {
        r if is_leaf_token(r) => true,
        Rule::Reference(r) => r.target.is_some_and(|t| single_token(rules, t, visiting)),
        Rule::Named(n) => match &n.kind {
            NamedKind::Enumeration(_) => n.definition.is_none(),
            _ => n.definition.is_some_and(|d| single_token(rules, d, visiting)),
        },
        Rule::Sequence(s) => {
            let consuming: Vec<RuleId> = s
                .elements
                .iter()
                .copied()
                .filter(|e| !matches!(rules.rule(*e), Rule::TypeLoad(_)))
                .collect();
            consuming.len() == 1 && single_token(rules, consuming[0], visiting)
        }
        Rule::Alternate(a) => {
            !a.branches.is_empty() && a.branches.iter().all(|b| single_token(rules, *b, visiting))
        }
        Rule::Passthrough {
            kind: PassthroughKind::Error,
            rule,
        } => single_token(rules, *rule, visiting),
        _ => false,
    };
    visiting.remove(&id);
    single
}

/// Can validate a sub-range of a word without touching the token stream.
pub fn range_readable(rules: &RuleArena, id: RuleId, visiting: &mut BTreeSet<RuleId>) -> bool {
    if !visiting.insert(id) {
        return false;
    }
    let readable = match rules.rule(id) {
        Rule::Literal { .. }
        | Rule::Int
        | Rule::Real
        | Rule::String
        | Rule::StringExcept { .. }
        | Rule::Delimited(_) => true,
        Rule::Reference(r) => r.target.is_some_and(|t| range_readable(rules, t, visiting)),
        Rule::Named(n) => match &n.kind {
            NamedKind::Enumeration(_) if n.definition.is_none() => true,
            _ => n.definition.is_some_and(|d| range_readable(rules, d, visiting)),
        },
        Rule::Sequence(s) => s.elements.len() == 1 && range_readable(rules, s.elements[0], visiting),
        Rule::Alternate(a) => {
            !a.branches.is_empty() && a.branches.iter().all(|b| range_readable(rules, *b, visiting))
        }
        Rule::Passthrough {
            kind: PassthroughKind::Error,
            rule,
        } => range_readable(rules, *rule, visiting),
        _ => false,
    };
    visiting.remove(&id);
    readable
}

fn with_case(set: &mut BTreeSet<u8>, b: u8, case_sensitive: bool) {
    set.insert(b);
    if !case_sensitive {
        set.insert(b.to_ascii_lowercase());
        set.insert(b.to_ascii_uppercase());
    }
}

/// Bytes a successful match of `id` can start with. Conservative: `None`
/// for rules that may match empty input or any leading byte.
pub fn first_bytes(rules: &RuleArena, id: RuleId, visiting: &mut BTreeSet<RuleId>) -> FirstBytes {
    if !visiting.insert(id) {
        return None;
    }
    let bytes = match rules.rule(id) {
        Rule::Literal {
            text,
            case_sensitive,
        } => text.as_bytes().first().map(|b| {
            let mut set = BTreeSet::new();
            with_case(&mut set, *b, *case_sensitive);
            set
        }),
        Rule::Int => Some(b"0123456789+-".iter().copied().collect()),
        Rule::Real => Some(b"0123456789+-.iInN".iter().copied().collect()),
        Rule::Sequence(s) => s
            .elements
            .iter()
            .find(|e| !matches!(rules.rule(**e), Rule::TypeLoad(_)))
            .and_then(|e| first_bytes(rules, *e, visiting)),
        Rule::Alternate(a) => {
            let mut set = BTreeSet::new();
            let mut all = !a.branches.is_empty();
            for b in &a.branches {
                match first_bytes(rules, *b, visiting) {
                    Some(s) => set.extend(s),
                    None => {
                        all = false;
                        break;
                    }
                }
            }
            all.then_some(set)
        }
        Rule::Recurrence { rule, count } => {
            if count.min() == 0 {
                None
            } else {
                first_bytes(rules, *rule, visiting)
            }
        }
        Rule::Delimited(d) => match d.sections.first() {
            Some(s) => match (&s.delimiter, s.rule) {
                (Some(delim), _) if !delim.is_empty() => {
                    let mut set = BTreeSet::new();
                    with_case(&mut set, delim.as_bytes()[0], d.case_sensitive);
                    Some(set)
                }
                (_, Some(r)) => first_bytes(rules, r, visiting),
                _ => None,
            },
            None => None,
        },
        Rule::Reference(r) => r.target.and_then(|t| first_bytes(rules, t, visiting)),
        Rule::Named(n) => match (&n.kind, n.definition) {
            (NamedKind::Enumeration(values), None) => {
                let mut set = BTreeSet::new();
                let mut all = !values.is_empty();
                for v in values {
                    match v.name.as_bytes().first() {
                        Some(b) => {
                            set.insert(*b);
                        }
                        None => all = false,
                    }
                }
                all.then_some(set)
            }
            (_, Some(d)) => first_bytes(rules, d, visiting),
            (_, None) => None,
        },
        Rule::Passthrough {
            kind: PassthroughKind::Error,
            rule,
        } => first_bytes(rules, *rule, visiting),
        _ => None,
    };
    visiting.remove(&id);
    bytes
}

/// Per-byte candidate lists for `branches`, or `None` when the table
/// could remove at most one branch from any scan.
pub fn build_accelerator(rules: &RuleArena, branches: &[RuleId]) -> Option<Accelerator> {
    let mut by_byte: Vec<Vec<u32>> = vec![Vec::new(); 256];
    let mut unfiltered = Vec::new();
    for (i, b) in branches.iter().enumerate() {
        match first_bytes(rules, *b, &mut BTreeSet::new()) {
            Some(set) => {
                for byte in set {
                    by_byte[byte as usize].push(i as u32);
                }
            }
            None => unfiltered.push(i as u32),
        }
    }
    if branches.len() - unfiltered.len() <= 1 {
        return None;
    }
    Some(Accelerator {
        by_byte,
        unfiltered,
    })
}
