//! Pass 2: rule references, reference shorthands, wrapper elimination.
//!
//! - `<a.b>` resolves to a direct rule id; unresolved paths are reported
//!   and left dangling.
//! - `<:X>` becomes `<X>` preceded by an implicit `skip` action.
//! - `<$attr>` targets the rule of the attribute's type and adds either a
//!   `push(attr)` (aggregate types) or an `attr = $N` assignment.
//! - Action-free single-child sequences and alternations are bypassed.

use crate::action::{Access, ActionPart};
use crate::compile::Grammar;
use crate::error::Stage;
use crate::rules::{Reference, Rule, RuleArena, RuleId};

fn references(g: &Grammar) -> Vec<(RuleId, Reference)> {
    g.rules
        .ids()
        .filter_map(|id| match g.rules.rule(id) {
            Rule::Reference(r) => Some((id, r.clone())),
            _ => None,
        })
        .collect()
}

fn set_target(g: &mut Grammar, id: RuleId, path: Option<String>, target: RuleId) {
    if let Rule::Reference(r) = g.rules.rule_mut(id) {
        if let Some(p) = path {
            r.path = p;
        }
        r.target = Some(target);
    }
}

pub fn resolve_references(g: &mut Grammar) {
    for (id, r) in references(g) {
        if r.target.is_some() || r.path.starts_with('$') {
            continue;
        }
        let lookup = r.path.strip_prefix(':').unwrap_or(&r.path);
        match g.rules.resolve_path(id, lookup) {
            Some(target) => set_target(g, id, None, target),
            None => g.error(
                Stage::Resolve,
                Some(id),
                format!("unresolved reference '<{}>'", r.path),
            ),
        }
    }
}

/// Sequence and slot that own `id` as a direct element.
fn owning_slot(rules: &RuleArena, id: RuleId) -> Option<(RuleId, usize)> {
    let parent = rules.node(id).parent?;
    match rules.rule(parent) {
        Rule::Sequence(s) => s.elements.iter().position(|e| *e == id).map(|i| (parent, i)),
        _ => None,
    }
}

pub fn expand_shorthands(g: &mut Grammar) {
    for (id, r) in references(g) {
        if let Some(name) = r.path.strip_prefix(':') {
            expand_skip(g, id, name.to_owned(), r.target);
        } else if let Some(attr) = r.path.strip_prefix('$') {
            if r.target.is_none() {
                expand_attribute(g, id, attr.to_owned());
            }
        }
    }
}

fn expand_skip(g: &mut Grammar, id: RuleId, name: String, target: Option<RuleId>) {
    let Some((seq, slot)) = owning_slot(&g.rules, id) else {
        g.error(
            Stage::Resolve,
            Some(id),
            format!("'<:{}>' must be a sequence element", name),
        );
        return;
    };
    if let Rule::Sequence(s) = g.rules.rule_mut(seq) {
        s.slot_mut(slot).parts.insert(0, ActionPart::Skip);
    }
    match target {
        Some(t) => set_target(g, id, Some(name), t),
        None => {
            if let Rule::Reference(r) = g.rules.rule_mut(id) {
                r.path = name;
            }
        }
    }
}

fn expand_attribute(g: &mut Grammar, id: RuleId, attr: String) {
    let Some(owner) = g.rules.enclosing_struct(id) else {
        g.error(
            Stage::Resolve,
            Some(id),
            format!("'<${}>' used outside a struct", attr),
        );
        return;
    };
    let found = g
        .rules
        .all_attributes(owner)
        .into_iter()
        .find(|a| a.name == attr)
        .map(|a| (a.type_rule, a.value_type.as_ref().map(|t| t.is_aggregate())));
    let Some((type_rule, aggregate)) = found else {
        let struct_name = g.rules.full_name(owner);
        g.error(
            Stage::Resolve,
            Some(id),
            format!("'{}' has no attribute '{}'", struct_name, attr),
        );
        return;
    };
    // Unresolved attribute types were reported by the type pass.
    let (Some(type_rule), Some(aggregate)) = (type_rule, aggregate) else {
        return;
    };
    let Some((seq, slot)) = owning_slot(&g.rules, id) else {
        g.error(
            Stage::Resolve,
            Some(id),
            format!("'<${}>' must be a sequence element", attr),
        );
        return;
    };
    if let Rule::Sequence(s) = g.rules.rule_mut(seq) {
        if aggregate {
            s.slot_mut(slot).parts.push(ActionPart::Push(Access::new(attr)));
        } else {
            let assign = ActionPart::Assign {
                target: Access::new(attr),
                value: Box::new(ActionPart::Access(Access::new(format!("${}", slot + 1)))),
            };
            s.slot_mut(slot + 1).parts.insert(0, assign);
        }
    }
    set_target(g, id, None, type_rule);
}

/// The single child a wrapper forwards to.
fn wrapper_child(rules: &RuleArena, id: RuleId) -> Option<RuleId> {
    let node = rules.node(id);
    if node.node_type.is_some() || !node.flags.is_empty() {
        return None;
    }
    match &node.rule {
        Rule::Sequence(s) if s.elements.len() == 1 && !s.has_actions() => Some(s.elements[0]),
        Rule::Alternate(a) if a.branches.len() == 1 && a.accelerator.is_none() => {
            Some(a.branches[0])
        }
        _ => None,
    }
}

fn forward(rules: &RuleArena, mut id: RuleId) -> RuleId {
    let mut hops = 0;
    while let Some(child) = wrapper_child(rules, id) {
        id = child;
        hops += 1;
        if hops > rules.len() {
            break;
        }
    }
    id
}

pub fn eliminate_wrappers(g: &mut Grammar) {
    let ids: Vec<RuleId> = g.rules.ids().collect();
    for id in ids {
        if wrapper_child(&g.rules, id).is_some() {
            continue;
        }
        let mut moved = Vec::new();
        let rules = &g.rules;
        let forwarded: Vec<(RuleId, RuleId)> = rules
            .children(id)
            .into_iter()
            .map(|c| (c, forward(rules, c)))
            .filter(|(c, f)| c != f)
            .collect();
        if forwarded.is_empty() {
            continue;
        }
        g.rules.map_children(id, |c| {
            match forwarded.iter().find(|(from, _)| *from == c) {
                Some((_, to)) => {
                    moved.push(*to);
                    *to
                }
                None => c,
            }
        });
        for child in moved {
            g.rules.node_mut(child).parent = Some(id);
        }
    }
    for (id, r) in references(g) {
        if let Some(t) = r.target {
            let f = forward(&g.rules, t);
            if f != t {
                set_target(g, id, None, f);
            }
        }
    }
}
