//! Grammar representation
//!
//! A grammar is an immutable tree: terminals are the leaves and carry a
//! layer path plus a primitive matcher definition, composites combine
//! their children. The same tree drives both the exact matcher and the
//! query compiler.

use crate::error::{GrammarError, Result};
use regex::Regex;
use rustc_hash::FxHashMap;
use serde_json::{Value, json};
use std::fmt;

/// Primitive matcher carried by a terminal
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TerminalMatch {
    Exact(Vec<String>),
    Regex(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Terminal {
    pub name: String,
    pub layer: String,
    pub matcher: TerminalMatch,
    pub case_sensitive: bool,
    /// Exact terms only match as whole words
    pub whole_word: bool,
}

/// Composite operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Not,
    Concat,
    Gap,
    Union,
    Intersect,
    LayerMatch,
}

impl Operation {
    pub fn parse(op: &str) -> Result<Self> {
        match op {
            "not" => Ok(Operation::Not),
            "concat" => Ok(Operation::Concat),
            "gap" => Ok(Operation::Gap),
            "union" => Ok(Operation::Union),
            "intersect" => Ok(Operation::Intersect),
            "layer_match" => Ok(Operation::LayerMatch),
            _ => Err(GrammarError::UnsupportedOperation(op.to_string())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Not => "not",
            Operation::Concat => "concat",
            Operation::Gap => "gap",
            Operation::Union => "union",
            Operation::Intersect => "intersect",
            Operation::LayerMatch => "layer_match",
        }
    }

    /// Whether matches are constrained by token positions
    pub fn is_positional(self) -> bool {
        matches!(
            self,
            Operation::Concat | Operation::Gap | Operation::LayerMatch
        )
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Composite {
    pub name: String,
    pub operation: Operation,
    pub children: Vec<GrammarNode>,
    pub slop: Option<usize>,
    pub match_first: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GrammarNode {
    Terminal(Terminal),
    Composite(Composite),
}

impl GrammarNode {
    pub fn exact(name: &str, layer: &str, terms: &[&str]) -> Self {
        GrammarNode::Terminal(Terminal {
            name: name.to_string(),
            layer: layer.to_string(),
            matcher: TerminalMatch::Exact(terms.iter().map(|t| t.to_string()).collect()),
            case_sensitive: false,
            whole_word: false,
        })
    }

    pub fn regex(name: &str, layer: &str, pattern: &str) -> Self {
        GrammarNode::Terminal(Terminal {
            name: name.to_string(),
            layer: layer.to_string(),
            matcher: TerminalMatch::Regex(pattern.to_string()),
            case_sensitive: false,
            whole_word: false,
        })
    }

    pub fn composite(operation: Operation, children: Vec<GrammarNode>) -> Self {
        GrammarNode::Composite(Composite {
            name: String::new(),
            operation,
            children,
            slop: None,
            match_first: false,
        })
    }

    pub fn gap(slop: Option<usize>, children: Vec<GrammarNode>) -> Self {
        let mut node = Self::composite(Operation::Gap, children);
        if let GrammarNode::Composite(c) = &mut node {
            c.slop = slop;
        }
        node
    }

    /// Set `match_first` on a composite node (no-op for terminals)
    pub fn matching_first(mut self) -> Self {
        if let GrammarNode::Composite(c) = &mut self {
            c.match_first = true;
        }
        self
    }

    /// Set `case_sensitive` on a terminal (no-op for composites)
    pub fn case_sensitive(mut self) -> Self {
        if let GrammarNode::Terminal(t) = &mut self {
            t.case_sensitive = true;
        }
        self
    }

    /// Set `whole_word` on a terminal (no-op for composites)
    pub fn whole_word(mut self) -> Self {
        if let GrammarNode::Terminal(t) = &mut self {
            t.whole_word = true;
        }
        self
    }

    pub fn name(&self) -> &str {
        match self {
            GrammarNode::Terminal(t) => &t.name,
            GrammarNode::Composite(c) => &c.name,
        }
    }

    /// Check the whole tree. Regex patterns are compiled here so that bad
    /// patterns fail before any matching or compiling starts.
    pub fn validate(&self) -> Result<()> {
        self.validate_at("root")
    }

    fn validate_at(&self, path: &str) -> Result<()> {
        match self {
            GrammarNode::Terminal(t) => t.validate_at(path),
            GrammarNode::Composite(c) => {
                if c.children.is_empty() {
                    return Err(GrammarError::malformed(
                        path,
                        format!("{} node has no children", c.operation),
                    ));
                }
                if c.operation == Operation::Not && c.children.len() != 1 {
                    return Err(GrammarError::malformed(
                        path,
                        format!("not takes exactly one child, got {}", c.children.len()),
                    ));
                }
                match c.slop {
                    Some(_) if c.operation != Operation::Gap => {
                        return Err(GrammarError::malformed(path, "slop is only valid on gap"));
                    }
                    Some(0) => {
                        return Err(GrammarError::malformed(path, "slop must be at least 1"));
                    }
                    _ => {}
                }
                if c.match_first && !matches!(c.operation, Operation::Intersect | Operation::Gap)
                {
                    return Err(GrammarError::malformed(
                        path,
                        "match_first is only valid on intersect and gap",
                    ));
                }
                for (i, child) in c.children.iter().enumerate() {
                    child.validate_at(&format!("{}.children[{}]", path, i))?;
                }
                Ok(())
            }
        }
    }

    /// Terminals in depth-first order
    pub fn terminals(&self) -> Vec<&Terminal> {
        let mut out = Vec::new();
        self.collect_terminals(&mut out);
        out
    }

    fn collect_terminals<'a>(&'a self, out: &mut Vec<&'a Terminal>) {
        match self {
            GrammarNode::Terminal(t) => out.push(t),
            GrammarNode::Composite(c) => {
                for child in &c.children {
                    child.collect_terminals(out);
                }
            }
        }
    }

    /// Names shared by terminals with different definitions. Unnamed
    /// terminals are not reported.
    ///
    /// Advisory only: terminals are identified by their full definition,
    /// never by name alone.
    pub fn duplicate_names(&self) -> Vec<String> {
        let mut by_name: FxHashMap<&str, Vec<&Terminal>> = FxHashMap::default();
        for t in self.terminals().into_iter().filter(|t| !t.name.is_empty()) {
            let defs = by_name.entry(t.name.as_str()).or_default();
            if !defs.contains(&t) {
                defs.push(t);
            }
        }
        let mut dups: Vec<String> = by_name
            .into_iter()
            .filter(|(_, defs)| defs.len() > 1)
            .map(|(name, _)| name.to_string())
            .collect();
        dups.sort();
        dups
    }

    /// Canonical JSON form, readable by `parser::parse_grammar_value`
    pub fn to_value(&self) -> Value {
        match self {
            GrammarNode::Terminal(t) => {
                let mut obj = json!({
                    "name": t.name,
                    "layer": t.layer,
                    "case_sensitive": t.case_sensitive,
                });
                match &t.matcher {
                    TerminalMatch::Exact(terms) => {
                        obj["op"] = json!("exact");
                        obj["terms"] = json!(terms);
                        obj["whole_word"] = json!(t.whole_word);
                    }
                    TerminalMatch::Regex(pattern) => {
                        obj["op"] = json!("regex");
                        obj["pattern"] = json!(pattern);
                    }
                }
                obj
            }
            GrammarNode::Composite(c) => {
                let mut obj = json!({
                    "name": c.name,
                    "op": c.operation.as_str(),
                    "children": c.children.iter().map(GrammarNode::to_value).collect::<Vec<_>>(),
                });
                if let Some(slop) = c.slop {
                    obj["slop"] = json!(slop);
                }
                if c.match_first {
                    obj["match_first"] = json!(true);
                }
                obj
            }
        }
    }
}

impl Terminal {
    fn validate_at(&self, path: &str) -> Result<()> {
        if self.layer.is_empty() {
            return Err(GrammarError::malformed(path, "terminal has an empty layer"));
        }
        match &self.matcher {
            TerminalMatch::Exact(terms) => {
                if terms.is_empty() {
                    return Err(GrammarError::malformed(path, "exact terminal has no terms"));
                }
                if let Some(blank) = terms.iter().position(|t| t.trim().is_empty()) {
                    return Err(GrammarError::malformed(
                        path,
                        format!("term {} is blank", blank),
                    ));
                }
            }
            TerminalMatch::Regex(pattern) => {
                if self.whole_word {
                    return Err(GrammarError::malformed(
                        path,
                        "whole_word is only valid on exact terminals",
                    ));
                }
                if pattern.is_empty() {
                    return Err(GrammarError::malformed(path, "regex terminal has an empty pattern"));
                }
                Regex::new(pattern)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tere() -> GrammarNode {
        GrammarNode::exact("tere", "text", &["tere"])
    }

    #[test]
    fn test_operation_parse() {
        assert_eq!(Operation::parse("gap").unwrap(), Operation::Gap);
        assert_eq!(Operation::parse("layer_match").unwrap(), Operation::LayerMatch);
        assert!(matches!(
            Operation::parse("xor"),
            Err(GrammarError::UnsupportedOperation(op)) if op == "xor"
        ));
        assert!(Operation::Concat.is_positional());
        assert!(!Operation::Intersect.is_positional());
    }

    #[test]
    fn test_validate_ok() {
        let grammar = GrammarNode::composite(
            Operation::Intersect,
            vec![
                tere(),
                GrammarNode::gap(Some(2), vec![tere(), GrammarNode::regex("p", "text", "p.re")]),
                GrammarNode::composite(Operation::Not, vec![tere()]),
            ],
        )
        .matching_first();
        grammar.validate().unwrap();
    }

    #[test]
    fn test_validate_empty_children() {
        let grammar = GrammarNode::composite(
            Operation::Union,
            vec![tere(), GrammarNode::composite(Operation::Concat, vec![])],
        );
        match grammar.validate() {
            Err(GrammarError::MalformedGrammar { path, .. }) => {
                assert_eq!(path, "root.children[1]")
            }
            other => panic!("Expected MalformedGrammar, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_not_arity() {
        let grammar = GrammarNode::composite(Operation::Not, vec![tere(), tere()]);
        assert!(matches!(
            grammar.validate(),
            Err(GrammarError::MalformedGrammar { .. })
        ));
    }

    #[test]
    fn test_validate_slop() {
        let misplaced = GrammarNode::Composite(Composite {
            name: String::new(),
            operation: Operation::Concat,
            children: vec![tere()],
            slop: Some(2),
            match_first: false,
        });
        assert!(misplaced.validate().is_err());
        assert!(GrammarNode::gap(Some(0), vec![tere()]).validate().is_err());
        assert!(GrammarNode::gap(None, vec![tere()]).validate().is_ok());
    }

    #[test]
    fn test_validate_terminals() {
        let blank = GrammarNode::exact("b", "text", &["tere", "  "]);
        assert!(matches!(
            blank.validate(),
            Err(GrammarError::MalformedGrammar { .. })
        ));
        let no_terms = GrammarNode::exact("n", "text", &[]);
        assert!(no_terms.validate().is_err());
        let no_layer = GrammarNode::exact("n", "", &["tere"]);
        assert!(no_layer.validate().is_err());
        let bad_regex = GrammarNode::regex("r", "text", "(unclosed");
        assert!(matches!(bad_regex.validate(), Err(GrammarError::Pattern(_))));
    }

    #[test]
    fn test_terminals_depth_first() {
        let grammar = GrammarNode::composite(
            Operation::Union,
            vec![
                GrammarNode::composite(
                    Operation::Concat,
                    vec![GrammarNode::exact("a", "text", &["a"]), GrammarNode::exact("b", "text", &["b"])],
                ),
                GrammarNode::exact("c", "text", &["c"]),
            ],
        );
        let names: Vec<_> = grammar.terminals().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_duplicate_names() {
        let grammar = GrammarNode::composite(
            Operation::Union,
            vec![
                GrammarNode::exact("x", "text", &["a"]),
                GrammarNode::exact("x", "text", &["a"]),
                GrammarNode::exact("y", "text", &["b"]),
                GrammarNode::exact("y", "text_mlp.lemmas", &["b"]),
            ],
        );
        // identical redefinitions are fine
        assert_eq!(grammar.duplicate_names(), vec!["y".to_string()]);
    }

    #[test]
    fn test_to_value() {
        let grammar = GrammarNode::gap(Some(3), vec![tere().case_sensitive()]);
        let value = grammar.to_value();
        assert_eq!(value["op"], "gap");
        assert_eq!(value["slop"], 3);
        assert_eq!(value["children"][0]["terms"][0], "tere");
        assert_eq!(value["children"][0]["case_sensitive"], true);
        assert_eq!(value["children"][0]["whole_word"], false);
        assert!(value.get("match_first").is_none());
    }
}
