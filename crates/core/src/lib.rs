#![allow(clippy::result_large_err)]
//! rulegram-core: runtime grammar engine.
//!
//! Grammars are written in a small S-expression language, compiled into a
//! rule graph at run time, and applied to whitespace-tokenized documents by
//! a backtracking parser.
//!
//! # Public API
//!
//! Key types are re-exported at the crate root for convenience:
//!
//! - [`GrammarCompiler`] / [`compile_grammar()`] -- compile and resolve
//!   grammar text into a [`Grammar`]
//! - [`Parser`] -- apply a grammar to documents, producing a [`ParseResult`]
//! - [`SourceProvider`] -- where documents and includes come from
//! - [`EngineConfig`] -- resolve and parse options, loadable from TOML
//!
//! Resolution runs as numbered passes (`pass1_compile` through
//! `pass5_check`); each is public for selective use and testing.

pub mod action;
pub mod compile;
pub mod config;
pub mod driver;
pub mod error;
pub mod grammar;
pub mod index;
pub mod node;
pub mod pass1_compile;
pub mod pass2_resolve;
pub mod pass3_types;
pub mod pass4_init;
pub mod pass5_check;
pub mod read;
pub mod rules;
pub mod source;
pub mod tokenizer;
pub mod trace;

// ── Convenience re-exports: key types ────────────────────────────────

pub use compile::Grammar;
pub use config::{EngineConfig, NameConflictPolicy, ParseOptions, ResolveOptions};
pub use error::{ConfigError, DefinitionError, ParseError, ParseFatal, Stage};
pub use index::TypeIndex;
pub use node::{NodeFlags, NodeId, ParseNode, ParseTree};
pub use read::Outcome;
pub use rules::{Rule, RuleArena, RuleId};
pub use source::{DocRange, FileSystemProvider, InMemoryProvider, SourceId, SourceProvider, SourceSet};
pub use trace::{ParseResult, Requirement, ResultsSink, TraceEntry};

// ── Convenience re-exports: entry points ─────────────────────────────

pub use compile::{compile_grammar, GrammarCompiler};
pub use driver::{Driver, Parser};
