//! End-to-end parses: grammar text in, parse results out.

use pretty_assertions::assert_eq;
use proptest::prelude::*;
use rulegram_core::node::NodeAux;
use rulegram_core::{
    compile_grammar, Driver, EngineConfig, Grammar, InMemoryProvider, NameConflictPolicy,
    NodeFlags, Outcome, ParseOptions, ParseResult, Parser, Requirement, ResolveOptions, Rule,
    TypeIndex,
};
use std::path::PathBuf;

fn grammar(src: &str) -> Grammar {
    let g = compile_grammar(src, &ResolveOptions::default());
    assert!(g.is_usable(), "{:?}", g.errors);
    g
}

fn parse_with(g: &Grammar, options: ParseOptions, input: &str) -> ParseResult {
    let provider = InMemoryProvider::default();
    let parser = Parser::new(g, &provider, options).unwrap();
    parser.parse_text("/input.txt", input).unwrap()
}

fn parse(g: &Grammar, input: &str) -> ParseResult {
    parse_with(g, ParseOptions::default(), input)
}

fn texts(result: &ParseResult, node_type: &str) -> Vec<String> {
    result
        .tree
        .find_by_type(node_type)
        .into_iter()
        .map(|n| result.tree.text(n, &result.sources).to_owned())
        .collect()
}

// ──────────────────────────────────────────────
// Block commands
// ──────────────────────────────────────────────

const PLATFORM: &str = r#"(rule root-command { "platform" <name> "end_platform" })"#;

#[test]
fn platform_block_parses_to_one_node() {
    let g = grammar(PLATFORM);
    let result = parse(&g, "platform \"p1\" end_platform");
    assert!(result.is_clean(), "{:?}", result.errors);

    let tree = &result.tree;
    let platforms = tree.find_by_type("platform");
    assert_eq!(platforms.len(), 1);
    let children = tree.children(platforms[0]);
    let name = children[1];
    assert_eq!(tree.text(name, &result.sources), "\"p1\"");
    assert!(tree.node(name).flags.contains(NodeFlags::NAMED));
    assert!(matches!(g.rules.rule(tree.node(name).rule.unwrap()), Rule::String));
}

#[test]
fn platform_without_name_reports_one_error() {
    let g = grammar(PLATFORM);
    let result = parse(&g, "platform end_platform");
    assert!(result.tree.find_by_type("platform").is_empty());
    assert_eq!(result.errors.len(), 1);
    let err = &result.errors[0];
    assert_eq!(err.rule, "root-command");
    assert_eq!(err.text, "end_platform");
    assert_eq!(result.sources.slice(&err.range), "end_platform");
}

#[test]
fn tree_json_lists_commands() {
    let g = grammar(PLATFORM);
    let result = parse(&g, "platform a end_platform");
    let json = result.to_json();
    let command = &json["tree"]["children"][0];
    assert_eq!(command["type"], "platform");
    assert_eq!(command["text"], "platform a end_platform");
    assert_eq!(command["children"][1]["flags"][0], "named");
}

// ──────────────────────────────────────────────
// Alternation and acceleration
// ──────────────────────────────────────────────

const OVERLAPPING: &str = "(rule root-command { \
    apple <integer> | apricot <string> | a <string> | <integer> n \
    | avocado | <string> x | banana <string> | b <integer> })";

fn with_acceleration(optimize: bool) -> Grammar {
    let options = ResolveOptions {
        optimize_parsing: optimize,
        accelerator_threshold: 2,
    };
    let g = compile_grammar(OVERLAPPING, &options);
    assert!(g.is_usable(), "{:?}", g.errors);
    g
}

#[test]
fn accelerator_is_built_only_when_enabled() {
    let has_accelerator = |g: &Grammar| {
        g.rules
            .ids()
            .any(|id| matches!(g.rules.rule(id), Rule::Alternate(a) if a.accelerator.is_some()))
    };
    assert!(has_accelerator(&with_acceleration(true)));
    assert!(!has_accelerator(&with_acceleration(false)));
}

#[test]
fn lowest_index_branch_wins() {
    let g = with_acceleration(true);
    // `7 n` matches `<integer> n` before `<string> x` is ever tried.
    let result = parse(&g, "a b 7 n 7 x");
    assert!(result.is_clean(), "{:?}", result.errors);
    let tree = &result.tree;
    let rules: Vec<_> = tree
        .children(tree.root())
        .into_iter()
        .map(|c| tree.node(c).rule)
        .collect();
    assert_eq!(rules.len(), 3);
    assert_ne!(rules[1], rules[2]);
}

fn vocabulary() -> impl Strategy<Value = Vec<&'static str>> {
    prop::collection::vec(
        prop::sample::select(vec![
            "apple", "apricot", "a", "avocado", "banana", "b", "n", "x", "7", "-3", "Apple",
            "zebra",
        ]),
        0..24,
    )
}

proptest! {
    #[test]
    fn acceleration_never_changes_the_result(words in vocabulary()) {
        let input = words.join(" ");
        let fast = parse(&with_acceleration(true), &input);
        let slow = parse(&with_acceleration(false), &input);
        prop_assert_eq!(fast.tree.to_json(&fast.sources), slow.tree.to_json(&slow.sources));
        prop_assert_eq!(fast.errors, slow.errors);
    }
}

// ──────────────────────────────────────────────
// Undo symmetry
// ──────────────────────────────────────────────

const TYPED: &str = r#"
(struct platform :symbol (type platform) (var string label))
(rule root-command {
    platform <name> (new (type $2) (type platform)) { label <string> }* end_platform
  | edit <string> (load (type $2)) { label <string> }* end_edit
  | drop <string> (delete (type $2))
  | pair (delimited "[" <integer> "," <string> "]")
  | note <line-string>
  | tag <quotable-string>
})
"#;

fn typed_words() -> impl Strategy<Value = Vec<&'static str>> {
    prop::collection::vec(
        prop::sample::select(vec![
            "platform", "end_platform", "edit", "end_edit", "drop", "label", "p1", "p2",
            "pair", "[1,x]", "[x,1]", "note", "tag", "\"q", "w\"", "3",
        ]),
        0..30,
    )
}

proptest! {
    #[test]
    fn failed_reads_leave_no_trace(words in typed_words()) {
        let g = grammar(TYPED);
        let provider = InMemoryProvider::default();
        let options = ParseOptions::default();
        let mut driver = Driver::new(&g, &provider, &options);
        driver.push_text(PathBuf::from("/input.txt"), words.join("\n"));
        let root = g.root_rule.unwrap();

        for _ in 0..words.len() + 1 {
            for id in g.rules.ids() {
                let position = driver.position();
                let stack = driver.index().stack().to_vec();
                let paths = driver.index().paths();
                if driver.read(id).unwrap() == Outcome::Miss {
                    prop_assert_eq!(driver.position(), position);
                    prop_assert_eq!(driver.index().stack(), stack.as_slice());
                    prop_assert_eq!(driver.index().paths(), paths);
                }
            }
            // Move on: a root command, else one word.
            let word = g.find("string").unwrap();
            if driver.read(root).unwrap() == Outcome::Miss
                && driver.read(word).unwrap() == Outcome::Miss
            {
                break;
            }
        }
    }
}

#[test]
fn type_commands_populate_the_index() {
    let g = grammar(TYPED);
    let result = parse(
        &g,
        "platform p1 label a end_platform\n\
         platform p2 end_platform\n\
         edit p1 label b end_edit\n\
         drop p2\n\
         edit p2 end_edit",
    );
    assert_eq!(result.index.paths(), vec!["p1"]);
    // The failed `edit p2` leaves its closing word behind as a second error.
    let rejected: Vec<&str> = result.errors.iter().map(|e| e.text.as_str()).collect();
    assert_eq!(rejected, vec!["p2", "end_edit"]);
    assert!(result.index.stack().is_empty());
    let info: Vec<_> = result
        .tree
        .lexical_order()
        .iter()
        .filter_map(|n| result.tree.node(*n).aux.clone())
        .collect();
    assert!(matches!(&info[0], NodeAux::TypeInfo { path, save: Some(save), .. }
        if path == &vec!["platform".to_string()] && save == &vec!["p1".to_string()]));
}

#[test]
fn conflicting_names_are_renamed_when_configured() {
    let g = grammar(TYPED);
    let options = ParseOptions {
        name_conflict: NameConflictPolicy::GenerateConflictName,
        ..ParseOptions::default()
    };
    let result = parse_with(&g, options, "platform p1 end_platform platform p1 end_platform");
    assert!(result.is_clean(), "{:?}", result.errors);
    assert_eq!(result.index.paths(), vec!["p1", "p1__1"]);
    let duplicates = result
        .tree
        .lexical_order()
        .iter()
        .filter(|n| result.tree.node(**n).flags.contains(NodeFlags::DUPLICATE_NAME))
        .count();
    assert_eq!(duplicates, 1);
}

#[test]
fn conflicting_names_are_rejected_by_default() {
    let g = grammar(TYPED);
    let result = parse(&g, "platform p1 end_platform platform p1 end_platform");
    let rejected: Vec<&str> = result.errors.iter().map(|e| e.text.as_str()).collect();
    assert_eq!(rejected, vec!["p1", "end_platform"]);
    assert_eq!(texts(&result, "platform").len(), 1);
}

// ──────────────────────────────────────────────
// Recurrence and delimited words
// ──────────────────────────────────────────────

#[test]
fn zero_length_recurrence_terminates() {
    let g = grammar("(rule root-command { go { (string-except done)? }* done })");
    let result = parse(&g, "go a b done go done");
    assert!(result.is_clean(), "{:?}", result.errors);
    assert_eq!(texts(&result, "go"), vec!["go a b done", "go done"]);
}

#[test]
fn delimited_accepts_only_complete_words() {
    let g = grammar(r#"(rule root-command { pair (delimited "[" <integer> "," <string> "]") })"#);
    let result = parse(&g, "pair [12,abc] pair [x,abc] pair [12abc] pair [12,abc pair 12,abc]");
    assert_eq!(texts(&result, "pair"), vec!["pair [12,abc]"]);
    let rejected: Vec<&str> = result.errors.iter().map(|e| e.text.as_str()).collect();
    assert_eq!(rejected, vec!["[x,abc]", "[12abc]", "[12,abc", "12,abc]"]);
}

// ──────────────────────────────────────────────
// Forward references
// ──────────────────────────────────────────────

const MACROS: &str = r#"
(rule root-command {
    use <string> [require(macro, $2)]
  | macro (delay-load macro end_macro { <string> (string-except end_macro)* end_macro })
})
"#;

#[test]
fn required_definition_replaces_its_placeholder() {
    let g = grammar(MACROS);
    let result = parse(&g, "use foo use foo macro foo a b end_macro");
    assert!(result.is_clean(), "{:?}", result.errors);

    let tree = &result.tree;
    let macro_node = tree.find_by_type("macro")[0];
    let body = tree.children(macro_node)[1];
    assert!(!tree.node(body).flags.contains(NodeFlags::DELAY_LOAD));
    let parts: Vec<&str> = tree
        .children(body)
        .into_iter()
        .map(|n| tree.text(n, &result.sources))
        .collect();
    assert_eq!(parts, vec!["foo", "a b", "end_macro"]);
    assert!(tree
        .lexical_order()
        .iter()
        .all(|n| !tree.node(*n).flags.contains(NodeFlags::DELAY_LOAD)));
}

#[test]
fn unrequired_definitions_are_still_parsed() {
    let g = grammar(MACROS);
    let result = parse(&g, "macro lonely x end_macro");
    assert!(result.is_clean(), "{:?}", result.errors);
    let tree = &result.tree;
    let body = tree.children(tree.find_by_type("macro")[0])[1];
    assert_eq!(tree.children(body).len(), 3);
}

#[test]
fn missing_definition_is_unsatisfied() {
    let g = grammar(MACROS);
    let result = parse(&g, "use bar");
    assert!(result.errors.is_empty());
    assert_eq!(result.unsatisfied, vec![Requirement::new("macro", "bar")]);
}

#[test]
fn circular_requires_terminate() {
    let g = grammar(
        r#"(rule root-command {
            use <string> [require(macro, $2)]
          | macro (delay-load macro end_macro { <string> uses <string> [require(macro, $3)] end_macro })
        })"#,
    );
    let result = parse(
        &g,
        "use a\nmacro a uses b end_macro\nmacro b uses a end_macro",
    );
    assert!(result.is_clean(), "{:?}", result.unsatisfied);
    let tree = &result.tree;
    for m in tree.find_by_type("macro") {
        let body = tree.children(m)[1];
        assert!(!tree.node(body).flags.contains(NodeFlags::DELAY_LOAD));
    }
}

// ──────────────────────────────────────────────
// Includes and path variables
// ──────────────────────────────────────────────

#[test]
fn self_include_is_bounded() {
    let g = grammar("(rule root-command { show <string> })");
    let provider = InMemoryProvider::default().with_file("/loop.txt", "show x\ninclude loop.txt");
    let options = ParseOptions {
        max_reinclude_count: 3,
        ..ParseOptions::default()
    };
    let parser = Parser::new(&g, &provider, options).unwrap();
    let result = parser.parse_file("/loop.txt").unwrap();
    assert!(result.errors.is_empty(), "{:?}", result.errors);
    assert_eq!(texts(&result, "show").len(), 3);

    let includes = &result.records.values().next().unwrap().includes;
    assert_eq!(includes.len(), 3);
    assert_eq!(includes[2].error.as_deref(), Some("re-include limit reached"));
}

#[test]
fn path_variables_feed_includes() {
    let g = grammar("(rule root-command { show <string> })");
    let provider = InMemoryProvider::default()
        .with_file("/main.txt", "define_path_variable DIR lib\ninclude $(DIR)/part.txt\nshow main")
        .with_file("/lib/part.txt", "show part");
    let parser = Parser::new(&g, &provider, ParseOptions::default()).unwrap();
    let result = parser.parse_file("/main.txt").unwrap();
    assert!(result.is_clean(), "{:?}", result.errors);
    assert_eq!(texts(&result, "show"), vec!["show part", "show main"]);
}

#[test]
fn substitute_path_variables() {
    let mut index = TypeIndex::new(NameConflictPolicy::Reject);
    index.define_path_variable("FOO", "bar");
    assert_eq!(index.substitute_path_variables("$(FOO)/x"), "bar/x");
    assert_eq!(index.substitute_path_variables("${FOO}/x"), "bar/x");
    assert_eq!(
        index.substitute_path_variables("$(RULEGRAM_SURELY_UNSET_BAZ)/x"),
        "/x"
    );
    assert_eq!(index.substitute_path_variables("$$(FOO)"), "$(FOO)");
    assert_eq!(index.substitute_path_variables("$(FOO"), "$(FOO");
}

#[test]
fn file_references_resolve_through_the_provider() {
    let g = grammar("(rule root-command { load (file-reference) | save (output-file-reference) })");
    let provider = InMemoryProvider::default()
        .with_file("/data/in.txt", "load sub/a.dat\nsave out.dat")
        .with_file("/data/sub/a.dat", "");
    let parser = Parser::new(&g, &provider, ParseOptions::default()).unwrap();
    let result = parser.parse_file("/data/in.txt").unwrap();
    assert!(result.is_clean(), "{:?}", result.errors);
    let refs: Vec<NodeAux> = result
        .tree
        .lexical_order()
        .iter()
        .filter_map(|n| result.tree.node(*n).aux.clone())
        .collect();
    assert_eq!(
        refs,
        vec![
            NodeAux::FileReference {
                path: "sub/a.dat".into(),
                resolved: Some("/data/sub/a.dat".into()),
                output: false,
            },
            NodeAux::FileReference {
                path: "out.dat".into(),
                resolved: None,
                output: true,
            },
        ]
    );
}

#[test]
fn comments_and_preprocessor_forms_are_recorded() {
    let g = grammar("(rule root-command { show <string> })");
    let result = parse(
        &g,
        "# heading\nshow a // trailing\n/* block\ncomment */ show b\n$define X 1\nshow $<X:1>$ c",
    );
    assert!(result.is_clean(), "{:?}", result.errors);
    assert_eq!(texts(&result, "show"), vec!["show a", "show b", "show c"]);
    let record = result.records.values().next().unwrap();
    assert_eq!(record.comments.len(), 3);
    assert_eq!(record.preprocessor.len(), 2);
}

// ──────────────────────────────────────────────
// Non-ASCII input
// ──────────────────────────────────────────────

#[test]
fn unicode_spaces_are_part_of_words() {
    let g = grammar(r#"(rule root-command { "show" <string> })"#);
    let result = parse(&g, "show a\u{00A0}b\nshow c");
    assert!(result.is_clean(), "{:?}", result.errors);
    assert_eq!(texts(&result, "show"), vec!["show a\u{00A0}b", "show c"]);
}

fn root_texts(result: &ParseResult) -> Vec<String> {
    let tree = &result.tree;
    tree.children(tree.root())
        .into_iter()
        .map(|n| tree.text(n, &result.sources).to_owned())
        .collect()
}

proptest! {
    #[test]
    fn every_word_becomes_a_command(input in "[ab \n\t\u{00A0}\u{2003}\u{3000}]{0,40}") {
        let g = grammar("(rule root-command { <string> })");
        let result = parse(&g, &input);
        prop_assert!(result.errors.is_empty(), "{:?}", result.errors);
        let words: Vec<String> = input.split_ascii_whitespace().map(str::to_owned).collect();
        prop_assert_eq!(root_texts(&result), words);
    }

    #[test]
    fn arbitrary_text_parses_to_completion(input in any::<String>()) {
        let g = grammar("(rule root-command { <string> })");
        let provider = InMemoryProvider::default();
        let parser = Parser::new(&g, &provider, ParseOptions::default()).unwrap();
        let result = parser.parse_text("/input.txt", &input).unwrap();
        prop_assert!(result.errors.is_empty(), "{:?}", result.errors);
        prop_assert!(root_texts(&result).len() <= input.split_ascii_whitespace().count());
    }
}

// ──────────────────────────────────────────────
// Configuration
// ──────────────────────────────────────────────

#[test]
fn toml_configuration_drives_the_parse() {
    let config = EngineConfig::from_toml_str(
        "[resolve]\noptimize_parsing = false\n\n[parse]\nmax_errors = 1\n",
    )
    .unwrap();
    let g = compile_grammar(PLATFORM, &config.resolve);
    let result = parse_with(&g, config.parse, "x y z");
    assert_eq!(result.errors.len(), 1);
}

// ──────────────────────────────────────────────
// Unspecified behaviour
// ──────────────────────────────────────────────

#[test]
#[ignore = "unspecified: write-back of untraced nodes and traces with no children"]
fn childless_traced_sequences() {
    let g = grammar("(rule root-command { tag <opt> }) (rule opt { <integer>? [skip] })");
    let result = parse(&g, "tag");
    let tree = &result.tree;
    let childless: Vec<_> = result
        .trace
        .iter()
        .filter(|t| tree.children(t.node).is_empty())
        .collect();
    // Kept in the trace for now; what a write-back consumer does with it
    // is open.
    assert_eq!(childless.len(), 1);
}
