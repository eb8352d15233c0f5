//! Layersearch: grammar matching over multi-layer annotated text
//!
//! A grammar is a tree of terminals (literal terms or regexes on one
//! annotation layer) and combinators (intersect, union, concat, gap, layer
//! alignment, negation). The same tree is evaluated two ways: exactly,
//! token by token, against one document, and approximately, compiled into
//! a recall-safe boolean query for a search engine.
//! Core implementation in Rust with Python bindings.

// Core modules
pub mod boolean; // Boolean expressions and simplification
pub mod cache; // Caller-owned matcher cache
pub mod combinators; // Positional and logical combinators
pub mod compiler; // Grammar -> boolean query compilation
pub mod error; // Error taxonomy
pub mod grammar; // Grammar tree and validation
pub mod layers; // Per-document layer texts and token indices
pub mod matcher; // Match type and grammar -> matcher construction
pub mod parser; // JSON grammar input
pub mod primitives; // Exact and regex terminal matchers
pub mod query; // Query DSL rendering and evaluation
pub mod searcher; // Two-phase corpus search

// Python bindings
#[cfg(feature = "pyo3")]
pub mod python;

// Re-exports for convenience
pub use cache::MatcherCache;
pub use compiler::{CompilerOptions, GrammarQueryCompiler, MinimumShouldMatch};
pub use error::{GrammarError, Result};
pub use grammar::{Composite, GrammarNode, Operation, Terminal, TerminalMatch};
pub use layers::{LayerDict, LayerKey, TokenIdx};
pub use matcher::{Match, Matcher};
pub use parser::{parse_grammar, parse_grammar_value};
pub use query::{Clause, Query};
pub use searcher::{
    DocumentMatch, InMemoryCorpus, SearchError, SearchOptions, SearchReport, SearchResults,
    search_corpus, search_grammar,
};
