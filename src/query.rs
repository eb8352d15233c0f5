//! Boolean retrieval queries
//!
//! `Query` is the compiler's output: a `bool` container of `should`, `must`
//! and `must_not` clauses with a `minimum_should_match` threshold. It
//! renders to the search-engine DSL with `to_value` and can be evaluated
//! against a single document with the same terminal semantics as the
//! matcher, which is what the in-memory corpus and the recall tests use.

use crate::error::Result;
use crate::layers::LayerDict;
use crate::primitives::{Exact, RegexMatcher};
use serde_json::{Map, Value, json};

/// One clause of a boolean query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Clause {
    /// Literal term on a layer path, matched as a substring unless
    /// `whole_word` is set
    Match {
        path: String,
        query: String,
        case_sensitive: bool,
        whole_word: bool,
    },
    /// Regular expression on a layer path
    Regexp {
        path: String,
        pattern: String,
        case_sensitive: bool,
    },
    Bool(Box<Query>),
    MatchAll,
    MatchNone,
}

/// Boolean query container
///
/// A document matches when every `must` clause matches, no `must_not`
/// clause matches, and at least `minimum_should_match` of the `should`
/// clauses match. Without an explicit threshold, a non-empty `should` list
/// needs one match unless `must` clauses are present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    pub should: Vec<Clause>,
    pub must: Vec<Clause>,
    pub must_not: Vec<Clause>,
    pub minimum_should_match: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Query matching every document
    pub fn match_all() -> Self {
        Query {
            must: vec![Clause::MatchAll],
            ..Query::default()
        }
    }

    /// Query matching no document
    pub fn match_none() -> Self {
        Query {
            must: vec![Clause::MatchNone],
            ..Query::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.should.is_empty() && self.must.is_empty() && self.must_not.is_empty()
    }

    /// Threshold applied to `should` when evaluating
    pub fn effective_minimum_should_match(&self) -> usize {
        match self.minimum_should_match {
            Some(n) => n,
            None if !self.should.is_empty() && self.must.is_empty() => 1,
            None => 0,
        }
    }

    /// Render in the search-engine query DSL
    pub fn to_value(&self) -> Value {
        let mut body = Map::new();
        for (key, clauses) in [
            ("should", &self.should),
            ("must", &self.must),
            ("must_not", &self.must_not),
        ] {
            if !clauses.is_empty() {
                body.insert(
                    key.to_string(),
                    Value::Array(clauses.iter().map(Clause::to_value).collect()),
                );
            }
        }
        if let Some(n) = self.minimum_should_match {
            body.insert("minimum_should_match".to_string(), json!(n));
        }
        json!({ "bool": body })
    }

    pub fn to_json(&self) -> String {
        self.to_value().to_string()
    }

    /// Build the primitive matchers needed to evaluate this query
    pub fn evaluator(&self) -> Result<QueryEvaluator> {
        Ok(QueryEvaluator {
            root: PreparedQuery::prepare(self)?,
        })
    }

    /// Evaluate against one document
    pub fn matches_document(&self, layers: &LayerDict) -> Result<bool> {
        self.evaluator()?.matches(layers)
    }
}

impl Clause {
    pub fn to_value(&self) -> Value {
        match self {
            Clause::Match {
                path,
                query,
                case_sensitive,
                whole_word,
            } => json!({
                "match": {
                    path.as_str(): {
                        "query": query,
                        "case_insensitive": !case_sensitive,
                        "whole_word": whole_word,
                    }
                }
            }),
            Clause::Regexp {
                path,
                pattern,
                case_sensitive,
            } => json!({
                "regexp": {
                    path.as_str(): {
                        "value": pattern,
                        "case_insensitive": !case_sensitive,
                    }
                }
            }),
            Clause::Bool(query) => query.to_value(),
            Clause::MatchAll => json!({ "match_all": {} }),
            Clause::MatchNone => json!({ "match_none": {} }),
        }
    }
}

/// A query with its terminal clauses compiled to primitive matchers
#[derive(Debug, Clone)]
pub struct QueryEvaluator {
    root: PreparedQuery,
}

impl QueryEvaluator {
    /// Whether the document satisfies the query. A clause on a layer the
    /// document does not have is false.
    pub fn matches(&self, layers: &LayerDict) -> Result<bool> {
        self.root.matches(layers)
    }
}

#[derive(Debug, Clone)]
struct PreparedQuery {
    should: Vec<PreparedClause>,
    must: Vec<PreparedClause>,
    must_not: Vec<PreparedClause>,
    minimum_should_match: usize,
}

#[derive(Debug, Clone)]
enum PreparedClause {
    Exact(Exact),
    Regex(RegexMatcher),
    Bool(Box<PreparedQuery>),
    Const(bool),
}

impl PreparedQuery {
    fn prepare(query: &Query) -> Result<Self> {
        let prepare_all = |clauses: &[Clause]| {
            clauses
                .iter()
                .map(PreparedClause::prepare)
                .collect::<Result<Vec<_>>>()
        };
        Ok(Self {
            should: prepare_all(&query.should)?,
            must: prepare_all(&query.must)?,
            must_not: prepare_all(&query.must_not)?,
            minimum_should_match: query.effective_minimum_should_match(),
        })
    }

    fn matches(&self, layers: &LayerDict) -> Result<bool> {
        for clause in &self.must {
            if !clause.matches(layers)? {
                return Ok(false);
            }
        }
        for clause in &self.must_not {
            if clause.matches(layers)? {
                return Ok(false);
            }
        }
        if self.minimum_should_match == 0 {
            return Ok(true);
        }
        let mut hits = 0;
        for clause in &self.should {
            if clause.matches(layers)? {
                hits += 1;
                if hits >= self.minimum_should_match {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}

impl PreparedClause {
    fn prepare(clause: &Clause) -> Result<Self> {
        Ok(match clause {
            Clause::Match {
                path,
                query,
                case_sensitive,
                whole_word,
            } => {
                let terms = vec![query.clone()];
                PreparedClause::Exact(if *whole_word {
                    Exact::whole_words(terms, path, *case_sensitive)?
                } else {
                    Exact::new(terms, path, *case_sensitive)?
                })
            }
            Clause::Regexp {
                path,
                pattern,
                case_sensitive,
            } => PreparedClause::Regex(RegexMatcher::new(pattern, path, *case_sensitive)?),
            Clause::Bool(query) => PreparedClause::Bool(Box::new(PreparedQuery::prepare(query)?)),
            Clause::MatchAll => PreparedClause::Const(true),
            Clause::MatchNone => PreparedClause::Const(false),
        })
    }

    fn matches(&self, layers: &LayerDict) -> Result<bool> {
        match self {
            PreparedClause::Exact(m) => {
                Ok(layers.contains(m.key()) && !m.find_matches(layers)?.is_empty())
            }
            PreparedClause::Regex(m) => {
                Ok(layers.contains(m.key()) && !m.find_matches(layers)?.is_empty())
            }
            PreparedClause::Bool(query) => query.matches(layers),
            PreparedClause::Const(b) => Ok(*b),
        }
    }
}
