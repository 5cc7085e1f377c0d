//! Pass 5: action type-check.
//!
//! Walks every rule reachable from `root-command` with the struct whose
//! attributes its actions address. The root struct is the starting context;
//! a struct declaration switches the context to itself and a slot's `push`
//! switches it for the next element. Each operand gets its
//! [`ActionAddress`] filled in.

use crate::action::{
    Access, AccessSegment, Action, ActionAddress, ActionPart, AddressStep, BUILTIN_FUNCTIONS,
};
use crate::compile::Grammar;
use crate::error::Stage;
use crate::rules::{NamedKind, Rule, RuleArena, RuleId, ValueType};
use std::collections::BTreeSet;

pub fn check_actions(g: &mut Grammar) {
    let (Some(root), Some(ctx)) = (g.root_rule, g.root_struct) else {
        return;
    };
    let mut visited = BTreeSet::new();
    let mut errors = Vec::new();
    let mut stack = vec![(root, ctx)];
    while let Some((id, ctx)) = stack.pop() {
        if !visited.insert((id, ctx)) {
            continue;
        }
        visit(g, id, ctx, &mut stack, &mut errors);
    }
    for (id, msg) in errors {
        g.error(Stage::Check, Some(id), msg);
    }
}

fn visit(
    g: &mut Grammar,
    id: RuleId,
    ctx: RuleId,
    stack: &mut Vec<(RuleId, RuleId)>,
    errors: &mut Vec<(RuleId, String)>,
) {
    let sequence = match g.rules.rule(id) {
        Rule::Sequence(s) => Some(s.clone()),
        _ => None,
    };
    let Some(mut seq) = sequence else {
        for (child, child_ctx) in children_in_context(g, id, ctx, errors) {
            stack.push((child, child_ctx));
        }
        return;
    };
    let mut checker = Checker { g: &*g, errors };
    let len = seq.elements.len();
    for slot in 0..=len {
        let mut next_ctx = ctx;
        if let Some(action) = seq.actions.get_mut(&slot) {
            checker.check_action(id, ctx, len, action);
            if let Some(pushed) = action.pushed() {
                if let Some(s) = pushed_struct(&pushed.text, ctx, checker.g) {
                    next_ctx = s;
                }
            }
        }
        if let Some(el) = seq.elements.get(slot) {
            stack.push((*el, next_ctx));
        }
    }
    if let Rule::Sequence(s) = g.rules.rule_mut(id) {
        *s = seq;
    }
}

fn children_in_context(
    g: &mut Grammar,
    id: RuleId,
    ctx: RuleId,
    errors: &mut Vec<(RuleId, String)>,
) -> Vec<(RuleId, RuleId)> {
    match g.rules.rule(id) {
        Rule::Reference(r) => r.target.map(|t| vec![(t, ctx)]).unwrap_or_default(),
        Rule::Named(n) => {
            let mut inner = ctx;
            if matches!(n.kind, NamedKind::Struct(_)) {
                inner = id;
            } else if let Some(input) = n.input_rule {
                if g.rules.struct_def(input).is_some() && !g.rules.is_type(ctx, input) {
                    errors.push((
                        id,
                        format!(
                            "'{}' reads '{}' but is used in context '{}'",
                            g.rules.full_name(id),
                            g.rules.full_name(input),
                            g.rules.full_name(ctx)
                        ),
                    ));
                }
            }
            if inner == id {
                check_initially(g, id, errors);
            }
            n_definition(&g.rules, id).map(|d| vec![(d, inner)]).unwrap_or_default()
        }
        _ => g.rules.children(id).into_iter().map(|c| (c, ctx)).collect(),
    }
}

fn n_definition(rules: &RuleArena, id: RuleId) -> Option<RuleId> {
    rules.named(id).and_then(|n| n.definition)
}

fn check_initially(g: &mut Grammar, id: RuleId, errors: &mut Vec<(RuleId, String)>) {
    let Some(parts) = g.rules.struct_def(id).map(|s| s.initially.clone()) else {
        return;
    };
    if parts.is_empty() {
        return;
    }
    let mut action = Action::new(parts);
    Checker { g: &*g, errors }.check_action(id, id, 0, &mut action);
    if let Some(s) = g.rules.struct_def_mut(id) {
        s.initially = action.parts;
    }
}

/// Struct a `push(attr)` moves the context to.
fn pushed_struct(text: &str, ctx: RuleId, g: &Grammar) -> Option<RuleId> {
    let (_, ty) = resolve_access(g, ctx, &Access::new(text), usize::MAX).ok()?;
    element_struct(ty.as_ref()?)
}

fn element_struct(t: &ValueType) -> Option<RuleId> {
    match t {
        ValueType::Struct(s) => Some(*s),
        ValueType::List(inner) | ValueType::ObjectMap(inner) => element_struct(inner),
        _ => None,
    }
}

struct Checker<'a> {
    g: &'a Grammar,
    errors: &'a mut Vec<(RuleId, String)>,
}

impl<'a> Checker<'a> {
    fn check_action(&mut self, id: RuleId, ctx: RuleId, elements: usize, action: &mut Action) {
        for part in &mut action.parts {
            self.check_part(id, ctx, elements, part);
        }
    }

    fn check_part(&mut self, id: RuleId, ctx: RuleId, elements: usize, part: &mut ActionPart) {
        if let ActionPart::Call { function, args } = part {
            if let Some(expected) = self.arity(function) {
                if args.len() != expected {
                    self.errors.push((
                        id,
                        format!(
                            "'{}' takes {} argument(s), got {}",
                            function,
                            expected,
                            args.len()
                        ),
                    ));
                }
            }
            if function.as_str() == "require" {
                // The kind and a literal name are plain words.
                for arg in args.iter_mut() {
                    if let ActionPart::Access(a) = arg {
                        if a.text.starts_with('$') {
                            self.fill(id, ctx, elements, a);
                        }
                    }
                }
                return;
            }
        }
        for access in part.accesses_mut() {
            self.fill(id, ctx, elements, access);
        }
    }

    fn arity(&self, function: &str) -> Option<usize> {
        BUILTIN_FUNCTIONS
            .iter()
            .find(|(name, _)| *name == function)
            .map(|(_, n)| *n)
            .or_else(|| self.g.functions.get(function).map(|f| f.params.len()))
    }

    fn fill(&mut self, id: RuleId, ctx: RuleId, elements: usize, access: &mut Access) {
        match resolve_access(self.g, ctx, access, elements) {
            Ok((address, _)) => access.address = Some(address),
            Err(msg) => self.errors.push((id, msg)),
        }
    }
}

/// Resolve operand text to an address. The type is `None` past a node
/// reference, where nothing is known statically.
pub fn resolve_access(
    g: &Grammar,
    ctx: RuleId,
    access: &Access,
    elements: usize,
) -> Result<(ActionAddress, Option<ValueType>), String> {
    let mut steps = Vec::new();
    let mut ty: Option<ValueType> = Some(ValueType::Struct(ctx));
    for seg in access.segments()? {
        match seg {
            AccessSegment::Absolute => {
                steps.push(AddressStep::Root);
                ty = g.root_struct.map(ValueType::Struct);
            }
            AccessSegment::This => ty = Some(ValueType::Struct(ctx)),
            AccessSegment::Current => {
                steps.push(AddressStep::Current);
                ty = None;
            }
            AccessSegment::Node(n) => {
                if n > elements {
                    return Err(format!(
                        "'${}' is out of range: the sequence has {} element(s)",
                        n, elements
                    ));
                }
                steps.push(AddressStep::Node(n - 1));
                ty = None;
            }
            AccessSegment::Name(name) => {
                let (step, next) = member(g, ty.as_ref(), &name)?;
                steps.push(step);
                ty = next;
            }
        }
    }
    Ok((ActionAddress { steps }, ty))
}

fn member(
    g: &Grammar,
    ty: Option<&ValueType>,
    name: &str,
) -> Result<(AddressStep, Option<ValueType>), String> {
    match ty {
        None => Ok((AddressStep::MapKey(name.to_owned()), None)),
        Some(ValueType::Struct(s)) => {
            let attrs = g.rules.all_attributes(*s);
            if let Some(i) = attrs.iter().position(|a| a.name == name) {
                return Ok((AddressStep::Attribute(i), attrs[i].value_type.clone()));
            }
            let script_var = std::iter::once(*s)
                .chain(g.rules.base_chain(*s))
                .filter_map(|c| g.rules.struct_def(c))
                .any(|d| d.script_vars.iter().any(|v| v.name == name));
            if script_var {
                return Ok((AddressStep::MapKey(name.to_owned()), None));
            }
            Err(format!(
                "undeclared attribute '{}' in '{}'",
                name,
                g.rules.full_name(*s)
            ))
        }
        Some(ValueType::List(inner)) => match name.parse::<usize>() {
            Ok(i) => Ok((AddressStep::ListIndex(i), Some((**inner).clone()))),
            Err(_) => Err(format!("list index '{}' is not a number", name)),
        },
        Some(ValueType::ObjectMap(inner)) => {
            Ok((AddressStep::MapKey(name.to_owned()), Some((**inner).clone())))
        }
        Some(_) => Err(format!("'{}' is not a member of a plain value", name)),
    }
}
