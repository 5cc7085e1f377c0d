//! Grammar compilation and resolution, checked through the public API.

use pretty_assertions::assert_eq;
use rulegram_core::{
    Grammar, GrammarCompiler, InMemoryProvider, ParseOptions, Parser, ResolveOptions, Rule, Stage,
};

const GRAMMAR: &str = r#"
(struct platform :symbol (type platform) (var string label) (var List/string tags) {
    label <$label>
  | tag <string> [pushBack(tags, $2)]
  | { { wrapped } }
})
(struct root (var int count))
(function scale :return real (var real x) (var real by))
(rule root-command {
    platform <name> (new (type $2) (type platform)) <platform>* end_platform
  | count <integer> [count = $2]
  | apple <integer> | apricot <string> | avocado
  | banana <real> [print(scale($2, 2))]
  | <:string> skipped
})
"#;

fn compiler(optimize: bool) -> GrammarCompiler {
    let mut c = GrammarCompiler::new(ResolveOptions {
        optimize_parsing: optimize,
        accelerator_threshold: 3,
    });
    c.add_grammar(GRAMMAR);
    c
}

#[test]
fn grammar_resolves_cleanly() {
    let mut c = compiler(true);
    c.resolve();
    let g = c.grammar();
    assert!(g.is_usable(), "{:?}", g.errors);
    assert!(g.root_rule.is_some());
    assert!(g
        .rules
        .ids()
        .any(|id| matches!(g.rules.rule(id), Rule::Alternate(a) if a.accelerator.is_some())));
}

#[test]
fn resolving_twice_changes_nothing() {
    for optimize in [true, false] {
        let mut c = compiler(optimize);
        c.resolve();
        let once = c.grammar().clone();
        c.resolve();
        assert_eq!(c.grammar(), &once);
    }
}

#[test]
fn errors_are_reported_once_and_in_order() {
    let mut c = GrammarCompiler::new(ResolveOptions::default());
    c.add_grammar(
        "(rule root-command { a <missing> [nope = $2] } )\n\
         (struct s :base_type s)",
    );
    c.resolve();
    c.resolve();
    let g = c.finish();
    assert!(!g.is_usable());
    let stages: Vec<Stage> = g.errors.iter().map(|e| e.stage).collect();
    let mut sorted = stages.clone();
    sorted.sort();
    assert_eq!(stages, sorted);
    let unresolved = g
        .errors
        .iter()
        .filter(|e| e.message.contains("unresolved reference 'missing'"))
        .count();
    assert_eq!(unresolved, 1);
}

#[test]
fn errors_serialize_for_tooling() {
    let mut c = GrammarCompiler::new(ResolveOptions::default());
    c.add_grammar("(rule root-command { a <missing> })");
    let g = c.resolve().grammar().clone();
    let json = g.errors[0].to_json_value();
    assert_eq!(json["stage"], "resolve");
    assert_eq!(json["rule"], "root-command");
}

#[test]
fn grammars_merge_across_texts() {
    let mut c = GrammarCompiler::new(ResolveOptions::default());
    c.add_grammar("(rule root-command { <extra> })");
    c.add_grammar("(rule extra { x })");
    c.resolve();
    assert!(c.grammar().is_usable(), "{:?}", c.grammar().errors);
}

fn parse_errors(g: &Grammar, input: &str) -> Vec<String> {
    let provider = InMemoryProvider::default();
    let parser = Parser::new(g, &provider, ParseOptions::default()).unwrap();
    let result = parser.parse_text("/input.txt", input).unwrap();
    result.errors.into_iter().map(|e| e.text).collect()
}

#[test]
fn branches_added_after_resolve_are_parsed() {
    let mut c = GrammarCompiler::new(ResolveOptions::default());
    c.add_grammar(r#"(rule root-command { "a" })"#);
    c.resolve();
    c.add_grammar(r#"(rule root-command { "b" })"#);
    let g = c.finish();
    assert!(g.is_usable(), "{:?}", g.errors);
    assert_eq!(parse_errors(&g, "a b a"), Vec::<String>::new());
}

#[test]
fn accelerators_are_rebuilt_when_branches_arrive() {
    let mut c = compiler(true);
    c.resolve();
    c.add_grammar("(rule root-command { aardvark <integer> })");
    let g = c.finish();
    assert!(g.is_usable(), "{:?}", g.errors);
    assert_eq!(parse_errors(&g, "aardvark 3 apple 4 avocado"), Vec::<String>::new());

    let mut fresh = compiler(true);
    fresh.add_grammar("(rule root-command { aardvark <integer> })");
    let fresh = fresh.finish();
    let accelerators = |g: &Grammar| -> Vec<_> {
        g.rules
            .ids()
            .filter_map(|id| match g.rules.rule(id) {
                Rule::Alternate(a) => a.accelerator.clone(),
                _ => None,
            })
            .collect()
    };
    assert_eq!(accelerators(&g), accelerators(&fresh));
}
