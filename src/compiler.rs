//! Grammar to boolean query compilation
//!
//! The compiler turns an inclusive and an optional exclusive grammar into a
//! retrieval `Query` that returns a superset of the documents the exact
//! matcher accepts. Positional constraints (adjacency, gap, alignment)
//! cannot be expressed as document-level clauses and are dropped; the
//! caller re-verifies candidates with the matcher.
//!
//! Each grammar node gets two boolean bounds over its terminals:
//!
//! - an upper bound `U`: if the node matches, `U` holds
//! - a lower bound `L`: if `L` holds, the node matches
//!
//! The inclusive branch is rendered from `U` and the exclusive branch from
//! `L`, so neither branch can drop a document the matcher would accept.

use crate::boolean::{Expr, SymbolId};
use crate::error::Result;
use crate::grammar::{GrammarNode, Operation, Terminal, TerminalMatch};
use crate::query::{Clause, Query};
use rustc_hash::FxHashMap;
use serde::Deserialize;
use tracing::{debug, warn};

/// How `minimum_should_match` is chosen for the inclusive branch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MinimumShouldMatch {
    /// Fewest distinct terminals any matching document must contain
    #[default]
    RequiredTerminals,
    /// Every rendered terminal is required. Operators are mapped directly
    /// (`not` to negation, `union` to disjunction, everything else to
    /// conjunction) and both branches are flattened; not recall-safe for
    /// grammars with unions.
    TerminalCount,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CompilerOptions {
    pub minimum_should_match: MinimumShouldMatch,
    /// Largest DNF expansion tried when computing required terminals
    pub dnf_term_limit: usize,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            minimum_should_match: MinimumShouldMatch::RequiredTerminals,
            dnf_term_limit: 256,
        }
    }
}

/// Terminals of one grammar, identified by their full definition
#[derive(Debug, Default)]
struct SymbolTable<'g> {
    terminals: Vec<&'g Terminal>,
    ids: FxHashMap<&'g Terminal, SymbolId>,
}

impl<'g> SymbolTable<'g> {
    fn intern(&mut self, terminal: &'g Terminal) -> SymbolId {
        if let Some(&id) = self.ids.get(terminal) {
            return id;
        }
        let id = self.terminals.len();
        self.terminals.push(terminal);
        self.ids.insert(terminal, id);
        id
    }

    fn clause(&self, id: SymbolId) -> Clause {
        terminal_clause(self.terminals[id])
    }

    fn len(&self) -> usize {
        self.terminals.len()
    }
}

#[derive(Debug, Clone, Default)]
pub struct GrammarQueryCompiler {
    options: CompilerOptions,
}

impl GrammarQueryCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: CompilerOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &CompilerOptions {
        &self.options
    }

    /// Compile an inclusive/exclusive grammar pair into one query.
    ///
    /// Both grammars are validated before anything is rendered. With no
    /// grammars the query matches every document.
    pub fn compile(
        &self,
        inclusive: Option<&GrammarNode>,
        exclusive: Option<&GrammarNode>,
    ) -> Result<Query> {
        for grammar in inclusive.iter().chain(exclusive.iter()) {
            grammar.validate()?;
            for name in grammar.duplicate_names() {
                warn!("Terminal name {:?} is used for different definitions", name);
            }
        }

        let mut query = Query::new();
        if let Some(grammar) = inclusive {
            self.compile_inclusive(grammar, &mut query);
        }
        if let Some(grammar) = exclusive {
            self.compile_exclusive(grammar, &mut query);
        }
        Ok(query)
    }

    fn compile_inclusive(&self, grammar: &GrammarNode, query: &mut Query) {
        let mut table = SymbolTable::default();
        let expr = match self.options.minimum_should_match {
            MinimumShouldMatch::RequiredTerminals => bounds(grammar, &mut table).0,
            MinimumShouldMatch::TerminalCount => direct(grammar, &mut table),
        }
        .simplify();

        if let Some(value) = expr.is_const() {
            debug!("Inclusive grammar simplifies to {}", value);
            query.must.push(if value {
                Clause::MatchAll
            } else {
                Clause::MatchNone
            });
            return;
        }

        let positives = expr.positive_symbols();
        let minimum = match self.options.minimum_should_match {
            MinimumShouldMatch::TerminalCount => positives.len(),
            MinimumShouldMatch::RequiredTerminals => {
                match expr.min_positive_support(self.options.dnf_term_limit) {
                    Some(n) => n,
                    None => {
                        let bound = expr.positive_lower_bound();
                        warn!(
                            "No DNF within {} terms, using lower bound {} for minimum_should_match",
                            self.options.dnf_term_limit, bound
                        );
                        bound
                    }
                }
            }
        };
        debug!(
            "Compiled inclusive grammar: {} terminals, {} rendered, minimum_should_match {}",
            table.len(),
            positives.len(),
            minimum
        );

        if minimum == 0 {
            // nothing is certainly required
            query.must.push(Clause::MatchAll);
            return;
        }
        query.should.extend(positives.into_iter().map(|id| table.clause(id)));
        query.minimum_should_match = Some(minimum);
    }

    fn compile_exclusive(&self, grammar: &GrammarNode, query: &mut Query) {
        let mut table = SymbolTable::default();
        match self.options.minimum_should_match {
            MinimumShouldMatch::RequiredTerminals => {
                let expr = bounds(grammar, &mut table).1.simplify();
                debug!(
                    "Compiled exclusive grammar: {} terminals, lower bound {:?}",
                    table.len(),
                    expr
                );
                match expr {
                    // no document is certainly excluded
                    Expr::Const(false) => {}
                    expr => query.must_not.push(render(&expr, &table)),
                }
            }
            MinimumShouldMatch::TerminalCount => {
                let expr = direct(grammar, &mut table).simplify();
                if expr == Expr::Const(true) {
                    query.must_not.push(Clause::MatchAll);
                }
                query.must_not.extend(
                    expr.positive_symbols()
                        .into_iter()
                        .map(|id| table.clause(id)),
                );
            }
        }
    }
}

/// Upper and lower bound of a node, in that order
fn bounds<'g>(node: &'g GrammarNode, table: &mut SymbolTable<'g>) -> (Expr, Expr) {
    match node {
        GrammarNode::Terminal(t) => {
            let symbol = Expr::Symbol(table.intern(t));
            (symbol.clone(), symbol)
        }
        GrammarNode::Composite(c) => {
            let (upper, lower): (Vec<Expr>, Vec<Expr>) =
                c.children.iter().map(|child| bounds(child, table)).unzip();
            match c.operation {
                Operation::Intersect => (Expr::And(upper), Expr::And(lower)),
                Operation::Union => (Expr::Or(upper), Expr::Or(lower)),
                Operation::Concat | Operation::Gap | Operation::LayerMatch => {
                    // a lone primitive always passes the positional checks
                    let lower = match c.children.as_slice() {
                        [GrammarNode::Terminal(_)] => Expr::And(lower),
                        [_] if c.operation == Operation::LayerMatch => Expr::And(lower),
                        _ => Expr::Const(false),
                    };
                    (Expr::And(upper), lower)
                }
                Operation::Not => (
                    Expr::not(Expr::And(lower)),
                    Expr::not(Expr::And(upper)),
                ),
            }
        }
    }
}

/// Operator-for-operator translation
fn direct<'g>(node: &'g GrammarNode, table: &mut SymbolTable<'g>) -> Expr {
    match node {
        GrammarNode::Terminal(t) => Expr::Symbol(table.intern(t)),
        GrammarNode::Composite(c) => {
            let children: Vec<Expr> = c.children.iter().map(|child| direct(child, table)).collect();
            match c.operation {
                Operation::Not => Expr::not(Expr::And(children)),
                Operation::Union => Expr::Or(children),
                Operation::Intersect
                | Operation::Concat
                | Operation::Gap
                | Operation::LayerMatch => Expr::And(children),
            }
        }
    }
}

/// Structural rendering of a simplified expression
fn render(expr: &Expr, table: &SymbolTable) -> Clause {
    let nested = |query: Query| Clause::Bool(Box::new(query));
    match expr {
        Expr::Const(true) => Clause::MatchAll,
        Expr::Const(false) => Clause::MatchNone,
        Expr::Symbol(id) => table.clause(*id),
        Expr::Not(inner) => nested(Query {
            must_not: vec![render(inner, table)],
            ..Query::default()
        }),
        Expr::And(children) => nested(Query {
            must: children.iter().map(|c| render(c, table)).collect(),
            ..Query::default()
        }),
        Expr::Or(children) => nested(Query {
            should: children.iter().map(|c| render(c, table)).collect(),
            minimum_should_match: Some(1),
            ..Query::default()
        }),
    }
}

/// Clause that holds exactly when the terminal has a match
pub fn terminal_clause(terminal: &Terminal) -> Clause {
    let path = terminal.layer.clone();
    let case_sensitive = terminal.case_sensitive;
    let whole_word = terminal.whole_word;
    match &terminal.matcher {
        TerminalMatch::Exact(terms) => {
            let mut clauses: Vec<Clause> = terms
                .iter()
                .map(|term| Clause::Match {
                    path: path.clone(),
                    query: term.clone(),
                    case_sensitive,
                    whole_word,
                })
                .collect();
            if clauses.len() == 1 {
                clauses.remove(0)
            } else {
                Clause::Bool(Box::new(Query {
                    should: clauses,
                    minimum_should_match: Some(1),
                    ..Query::default()
                }))
            }
        }
        TerminalMatch::Regex(pattern) => Clause::Regexp {
            path,
            pattern: pattern.clone(),
            case_sensitive,
        },
    }
}
