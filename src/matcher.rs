//! Exact matching of grammars against one document
//!
//! `Matcher::from_grammar` turns a grammar tree into a tree of primitive
//! matchers and combinators; `find_matches` evaluates it against a
//! document's layers.

use crate::combinators::{Concatenation, Gap, Intersection, LayerMatch, Negation, Union};
use crate::error::{GrammarError, Result};
use crate::grammar::{GrammarNode, Operation, TerminalMatch};
use crate::layers::{LayerDict, TokenIdx};
use crate::primitives::{Exact, RegexMatcher};
use serde::Serialize;
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

/// A matched token sequence
///
/// `features` and `texts` run parallel to `token_idxs`. Equality, hashing
/// and ordering only look at `token_idxs` and `features`, in order;
/// `texts` is informational.
#[derive(Debug, Clone, Serialize)]
pub struct Match {
    pub token_idxs: Vec<TokenIdx>,
    pub features: Vec<String>,
    pub texts: Vec<String>,
}

impl Match {
    pub fn new(token_idxs: Vec<TokenIdx>, features: Vec<String>, texts: Vec<String>) -> Self {
        debug_assert_eq!(token_idxs.len(), features.len());
        debug_assert_eq!(token_idxs.len(), texts.len());
        Self {
            token_idxs,
            features,
            texts,
        }
    }

    /// Match with no tokens. Identity of `merge`.
    pub fn empty() -> Self {
        Self::new(Vec::new(), Vec::new(), Vec::new())
    }

    /// Concatenate matches in order
    pub fn merge(parts: &[&Match]) -> Self {
        let len = parts.iter().map(|m| m.len()).sum();
        let mut merged = Match::new(
            Vec::with_capacity(len),
            Vec::with_capacity(len),
            Vec::with_capacity(len),
        );
        for part in parts {
            merged.token_idxs.extend_from_slice(&part.token_idxs);
            merged.features.extend(part.features.iter().cloned());
            merged.texts.extend(part.texts.iter().cloned());
        }
        merged
    }

    pub fn len(&self) -> usize {
        self.token_idxs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.token_idxs.is_empty()
    }

    /// Smallest and largest token index
    pub fn span(&self) -> Option<(TokenIdx, TokenIdx)> {
        let min = *self.token_idxs.iter().min()?;
        let max = *self.token_idxs.iter().max()?;
        Some((min, max))
    }

    /// Each token directly follows the previous one
    pub fn is_contiguous(&self) -> bool {
        self.token_idxs.windows(2).all(|w| w[1] == w[0] + 1)
    }

    /// Each token follows the previous one by at most `slop` positions
    /// (any distance when `slop` is `None`)
    pub fn within_gap(&self, slop: Option<usize>) -> bool {
        self.token_idxs
            .windows(2)
            .all(|w| w[1] > w[0] && slop.is_none_or(|slop| w[1] - w[0] <= slop))
    }

    /// Sum of pairwise token-index distances
    pub fn dispersion(&self) -> usize {
        let idxs = &self.token_idxs;
        let mut total = 0;
        for (i, a) in idxs.iter().enumerate() {
            for b in &idxs[i + 1..] {
                total += a.abs_diff(*b);
            }
        }
        total
    }
}

impl PartialEq for Match {
    fn eq(&self, other: &Self) -> bool {
        self.token_idxs == other.token_idxs && self.features == other.features
    }
}

impl Eq for Match {}

impl Hash for Match {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.token_idxs.hash(state);
        self.features.hash(state);
    }
}

impl Ord for Match {
    fn cmp(&self, other: &Self) -> Ordering {
        self.token_idxs
            .cmp(&other.token_idxs)
            .then_with(|| self.features.cmp(&other.features))
    }
}

impl PartialOrd for Match {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A compiled grammar node
#[derive(Debug, Clone)]
pub enum Matcher {
    Exact(Exact),
    Regex(RegexMatcher),
    Intersection(Intersection),
    Union(Union),
    Concatenation(Concatenation),
    Gap(Gap),
    LayerMatch(LayerMatch),
    Negation(Negation),
}

impl Matcher {
    /// Validate a grammar and build its matcher tree
    pub fn from_grammar(grammar: &GrammarNode) -> Result<Self> {
        grammar.validate()?;
        Self::build(grammar)
    }

    fn build(node: &GrammarNode) -> Result<Self> {
        match node {
            GrammarNode::Terminal(t) => match &t.matcher {
                TerminalMatch::Exact(terms) if t.whole_word => Ok(Matcher::Exact(
                    Exact::whole_words(terms.clone(), &t.layer, t.case_sensitive)?,
                )),
                TerminalMatch::Exact(terms) => Ok(Matcher::Exact(Exact::new(
                    terms.clone(),
                    &t.layer,
                    t.case_sensitive,
                )?)),
                TerminalMatch::Regex(pattern) => Ok(Matcher::Regex(RegexMatcher::new(
                    pattern,
                    &t.layer,
                    t.case_sensitive,
                )?)),
            },
            GrammarNode::Composite(c) => {
                let components = c
                    .children
                    .iter()
                    .map(Self::build)
                    .collect::<Result<Vec<_>>>()?;
                Ok(match c.operation {
                    Operation::Intersect => {
                        Matcher::Intersection(Intersection::new(components, c.match_first))
                    }
                    Operation::Union => Matcher::Union(Union::new(components)),
                    Operation::Concat => Matcher::Concatenation(Concatenation::new(components)),
                    Operation::Gap => Matcher::Gap(Gap::new(components, c.slop, c.match_first)),
                    Operation::LayerMatch => Matcher::LayerMatch(LayerMatch::new(components)),
                    Operation::Not => {
                        let child = components.into_iter().next().ok_or_else(|| {
                            GrammarError::malformed(&c.name, "not without child")
                        })?;
                        Matcher::Negation(Negation::new(child))
                    }
                })
            }
        }
    }

    /// All matches in the document, in canonical order
    pub fn find_matches(&self, layers: &LayerDict) -> Result<Vec<Match>> {
        match self {
            Matcher::Exact(m) => m.find_matches(layers),
            Matcher::Regex(m) => m.find_matches(layers),
            Matcher::Intersection(m) => m.find_matches(layers),
            Matcher::Union(m) => m.find_matches(layers),
            Matcher::Concatenation(m) => m.find_matches(layers),
            Matcher::Gap(m) => m.find_matches(layers),
            Matcher::LayerMatch(m) => m.find_matches(layers),
            Matcher::Negation(m) => m.find_matches(layers),
        }
    }

    /// Whether the document matches at all
    pub fn is_match(&self, layers: &LayerDict) -> Result<bool> {
        Ok(!self.find_matches(layers)?.is_empty())
    }
}
