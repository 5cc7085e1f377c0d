//! Pass 3: struct base chains, attribute types, grammar-default types.
//!
//! Base chains are resolved transitively; a cycle or an unresolved base is
//! reported and the offending link cleared so later passes can walk the
//! chain safely.

use crate::compile::Grammar;
use crate::error::Stage;
use crate::rules::{BasicType, NamedKind, RuleId, ValueType};

pub fn resolve_types(g: &mut Grammar) {
    resolve_bases(g);
    detect_base_cycles(g);
    resolve_attribute_types(g);
    resolve_default_types(g);
}

fn struct_ids(g: &Grammar) -> Vec<RuleId> {
    g.rules
        .ids()
        .filter(|id| g.rules.struct_def(*id).is_some())
        .collect()
}

fn resolve_bases(g: &mut Grammar) {
    for id in struct_ids(g) {
        let Some(base_name) = g.rules.struct_def(id).and_then(|s| s.base_name.clone()) else {
            continue;
        };
        let base = match g.rules.resolve_path(id, &base_name) {
            Some(b) if g.rules.struct_def(b).is_some() => Some(b),
            Some(_) => {
                g.error(
                    Stage::Types,
                    Some(id),
                    format!("base '{}' is not a struct", base_name),
                );
                None
            }
            None => {
                g.error(
                    Stage::Types,
                    Some(id),
                    format!("unresolved base '{}'", base_name),
                );
                None
            }
        };
        if let Some(s) = g.rules.struct_def_mut(id) {
            s.base = base;
        }
    }
}

fn detect_base_cycles(g: &mut Grammar) {
    let mut visited: Vec<RuleId> = Vec::new();
    for id in struct_ids(g) {
        let mut in_stack: Vec<RuleId> = Vec::new();
        let mut cur = Some(id);
        while let Some(c) = cur {
            if visited.contains(&c) {
                break;
            }
            if let Some(pos) = in_stack.iter().position(|x| *x == c) {
                let cycle: Vec<String> = in_stack[pos..]
                    .iter()
                    .chain(std::iter::once(&c))
                    .map(|r| g.rules.full_name(*r))
                    .collect();
                let back_edge = in_stack[in_stack.len() - 1];
                g.error(
                    Stage::Types,
                    Some(back_edge),
                    format!("cyclic base chain: {}", cycle.join(" -> ")),
                );
                if let Some(s) = g.rules.struct_def_mut(back_edge) {
                    s.base = None;
                }
                break;
            }
            in_stack.push(c);
            cur = g.rules.struct_def(c).and_then(|s| s.base);
        }
        visited.extend(in_stack);
    }
}

/// Parse an attribute type name into the value-type graph.
fn value_type(g: &Grammar, scope: RuleId, name: &str) -> Result<(ValueType, Option<RuleId>), String> {
    let basic = |t: BasicType, rule: &str| Ok((ValueType::Basic(t), g.find(rule)));
    match name {
        "int" | "integer" => return basic(BasicType::Int, "integer"),
        "real" | "double" => return basic(BasicType::Real, "real"),
        "string" => return basic(BasicType::String, "string"),
        "bool" => return basic(BasicType::Bool, "string"),
        _ => {}
    }
    if let Some(inner) = name.strip_prefix("List/") {
        let (t, rule) = value_type(g, scope, inner)?;
        return Ok((ValueType::List(Box::new(t)), rule));
    }
    if let Some(inner) = name.strip_prefix("ObjectMap/") {
        let (t, rule) = value_type(g, scope, inner)?;
        return Ok((ValueType::ObjectMap(Box::new(t)), rule));
    }
    let id = g
        .rules
        .resolve_path(scope, name)
        .ok_or_else(|| format!("unknown type '{}'", name))?;
    let named = g
        .rules
        .named(id)
        .ok_or_else(|| format!("unknown type '{}'", name))?;
    let t = match named.kind {
        NamedKind::Struct(_) => ValueType::Struct(id),
        NamedKind::Value => ValueType::Value(id),
        NamedKind::Enumeration(_) => ValueType::Enumeration(id),
        NamedKind::Rule => return Err(format!("'{}' is a rule, not a type", name)),
    };
    Ok((t, Some(id)))
}

fn resolve_attribute_types(g: &mut Grammar) {
    for id in struct_ids(g) {
        let names: Vec<String> = g
            .rules
            .struct_def(id)
            .map(|s| s.attributes.iter().map(|a| a.type_name.clone()).collect())
            .unwrap_or_default();
        let mut resolved = Vec::with_capacity(names.len());
        for type_name in &names {
            match value_type(g, id, type_name) {
                Ok(r) => resolved.push(Some(r)),
                Err(msg) => {
                    g.error(Stage::Types, Some(id), msg);
                    resolved.push(None);
                }
            }
        }
        if let Some(s) = g.rules.struct_def_mut(id) {
            for (attr, r) in s.attributes.iter_mut().zip(resolved) {
                let (value_type, type_rule) = match r {
                    Some((t, rule)) => (Some(t), rule),
                    None => (None, None),
                };
                attr.value_type = value_type;
                attr.type_rule = type_rule;
            }
        }
    }
}

fn resolve_default_types(g: &mut Grammar) {
    let paths: Vec<(Vec<String>, String)> = g
        .default_types
        .iter()
        .map(|(p, d)| (p.clone(), d.struct_name.clone()))
        .collect();
    for (path, struct_name) in paths {
        let found = g.find(&struct_name).filter(|id| g.rules.struct_def(*id).is_some());
        if found.is_none() {
            g.error(
                Stage::Types,
                None,
                format!(
                    "symbol '{}' names unknown struct '{}'",
                    path.join("."),
                    struct_name
                ),
            );
        }
        if let Some(d) = g.default_types.get_mut(&path) {
            d.struct_rule = found;
        }
    }
}
