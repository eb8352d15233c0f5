//! Primitive matchers over a layer's raw text
//!
//! Both matchers scan the text with one regex and project every match span
//! onto the inclusive range of tokens it touches.

use crate::error::Result;
use crate::layers::{LayerDict, LayerKey};
use crate::matcher::Match;
use regex::{Regex, RegexBuilder};
use std::ops::Range;

/// Match any of a list of literal terms anywhere in the text
#[derive(Debug, Clone)]
pub struct Exact {
    terms: Vec<String>,
    key: LayerKey,
    case_sensitive: bool,
    whole_word: bool,
    regex: Regex,
}

impl Exact {
    pub fn new(terms: Vec<String>, layer_path: &str, case_sensitive: bool) -> Result<Self> {
        Self::build(terms, layer_path, case_sensitive, false)
    }

    /// Like `new`, but a term only matches where it is not glued to
    /// further word characters
    pub fn whole_words(
        terms: Vec<String>,
        layer_path: &str,
        case_sensitive: bool,
    ) -> Result<Self> {
        Self::build(terms, layer_path, case_sensitive, true)
    }

    fn build(
        terms: Vec<String>,
        layer_path: &str,
        case_sensitive: bool,
        whole_word: bool,
    ) -> Result<Self> {
        let regex = build_regex(&exact_pattern(&terms, whole_word), case_sensitive)?;
        Ok(Self {
            terms,
            key: LayerKey::parse(layer_path),
            case_sensitive,
            whole_word,
            regex,
        })
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    pub fn key(&self) -> &LayerKey {
        &self.key
    }

    pub fn case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    pub fn whole_word(&self) -> bool {
        self.whole_word
    }

    pub fn find_matches(&self, layers: &LayerDict) -> Result<Vec<Match>> {
        scan(&self.regex, &self.key, layers)
    }
}

/// Match a regular expression
#[derive(Debug, Clone)]
pub struct RegexMatcher {
    key: LayerKey,
    regex: Regex,
}

impl RegexMatcher {
    pub fn new(pattern: &str, layer_path: &str, case_sensitive: bool) -> Result<Self> {
        Ok(Self {
            key: LayerKey::parse(layer_path),
            regex: build_regex(pattern, case_sensitive)?,
        })
    }

    pub fn key(&self) -> &LayerKey {
        &self.key
    }

    pub fn find_matches(&self, layers: &LayerDict) -> Result<Vec<Match>> {
        scan(&self.regex, &self.key, layers)
    }
}

fn build_regex(pattern: &str, case_sensitive: bool) -> Result<Regex> {
    Ok(RegexBuilder::new(pattern)
        .case_insensitive(!case_sensitive)
        .build()?)
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Alternation of escaped terms, longest first. With `whole_word`, each
/// term gets `\b` on the sides that start or end with a word character.
pub(crate) fn exact_pattern(terms: &[String], whole_word: bool) -> String {
    let mut sorted: Vec<&String> = terms.iter().collect();
    sorted.sort_by_key(|t| std::cmp::Reverse(t.len()));

    let alternatives: Vec<String> = sorted
        .into_iter()
        .map(|term| {
            let starts_word = whole_word && term.chars().next().is_some_and(is_word_char);
            let ends_word = whole_word && term.chars().next_back().is_some_and(is_word_char);
            format!(
                "{}{}{}",
                if starts_word { r"\b" } else { "" },
                regex::escape(term),
                if ends_word { r"\b" } else { "" }
            )
        })
        .collect();
    format!("(?:{})", alternatives.join("|"))
}

/// Shrink a byte span to its non-whitespace core
fn trim_span(text: &str, span: Range<usize>) -> Option<Range<usize>> {
    let slice = &text[span.clone()];
    let start = span.start + (slice.len() - slice.trim_start().len());
    let end = span.start + slice.trim_end().len();
    (start < end).then_some(start..end)
}

fn scan(regex: &Regex, key: &LayerKey, layers: &LayerDict) -> Result<Vec<Match>> {
    let text = layers.text(key)?;
    let mut matches: Vec<Match> = Vec::new();

    for found in regex.find_iter(text) {
        let Some(span) = trim_span(text, found.range()) else {
            continue;
        };
        let first = layers.get_token_index(key, span.start)?;
        let last = layers.get_token_index(key, span.end - 1)?;

        let token_idxs: Vec<usize> = (first..=last).collect();
        let texts = token_idxs
            .iter()
            .map(|&idx| layers.get_token_by_index(idx, key).map(str::to_string))
            .collect::<Result<Vec<_>>>()?;
        let features = vec![key.feature.clone(); token_idxs.len()];

        // spans arrive in text order, so repeats are adjacent
        let candidate = Match::new(token_idxs, features, texts);
        if matches.last() != Some(&candidate) {
            matches.push(candidate);
        }
    }
    Ok(matches)
}
