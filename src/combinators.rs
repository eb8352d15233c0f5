//! Combinators over component matchers
//!
//! Intersection, concatenation, gap and layer alignment enumerate the
//! Cartesian product of their components' matches and merge each
//! combination in component order. Positional checks run on the merged
//! token indices in that order, not sorted. Results are de-duplicated and
//! returned in canonical `Match` order.

use crate::error::Result;
use crate::layers::LayerDict;
use crate::matcher::{Match, Matcher};
use std::collections::BTreeSet;
use tracing::trace;

/// Iterator over the Cartesian product of match lists
struct Product<'a> {
    lists: &'a [Vec<Match>],
    cursor: Vec<usize>,
    done: bool,
}

impl<'a> Product<'a> {
    fn new(lists: &'a [Vec<Match>]) -> Self {
        Self {
            lists,
            cursor: vec![0; lists.len()],
            done: lists.is_empty() || lists.iter().any(Vec::is_empty),
        }
    }

    fn size(&self) -> usize {
        if self.done {
            return 0;
        }
        self.lists
            .iter()
            .fold(1usize, |acc, list| acc.saturating_mul(list.len()))
    }
}

impl<'a> Iterator for Product<'a> {
    type Item = Vec<&'a Match>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let item = self
            .cursor
            .iter()
            .zip(self.lists)
            .map(|(&i, list)| &list[i])
            .collect();

        // odometer: advance the rightmost position that has room
        let mut pos = self.lists.len();
        loop {
            if pos == 0 {
                self.done = true;
                break;
            }
            pos -= 1;
            self.cursor[pos] += 1;
            if self.cursor[pos] < self.lists[pos].len() {
                break;
            }
            self.cursor[pos] = 0;
        }
        Some(item)
    }
}

fn component_matches(components: &[Matcher], layers: &LayerDict) -> Result<Vec<Vec<Match>>> {
    components.iter().map(|c| c.find_matches(layers)).collect()
}

/// Merge every combination that passes `keep`
fn merged_candidates<F>(lists: &[Vec<Match>], keep: F) -> BTreeSet<Match>
where
    F: Fn(&[&Match], &Match) -> bool,
{
    let product = Product::new(lists);
    trace!("Enumerating {} combinations", product.size());
    product
        .filter_map(|combo| {
            let merged = Match::merge(&combo);
            keep(&combo, &merged).then_some(merged)
        })
        .collect()
}

/// Keep, for each cluster of overlapping candidates, the one with the
/// smallest token dispersion.
///
/// Candidates whose `[min, max]` token spans overlap, directly or through
/// other candidates, form a cluster. Ties go to the lower span start, then
/// to the lexicographically smaller token sequence. Candidates without
/// tokens are kept as they are.
pub fn nearest_per_cluster(candidates: impl IntoIterator<Item = Match>) -> Vec<Match> {
    let mut result = BTreeSet::new();
    let mut spanned = Vec::new();
    for candidate in candidates {
        match candidate.span() {
            Some(span) => spanned.push((span, candidate)),
            None => {
                result.insert(candidate);
            }
        }
    }
    spanned.sort_by(|(a, ma), (b, mb)| a.cmp(b).then_with(|| ma.cmp(mb)));

    let mut cluster_end = None;
    let mut best: Option<(usize, usize, Match)> = None;
    for ((start, end), candidate) in spanned {
        if cluster_end.is_some_and(|e| start > e) {
            if let Some((_, _, winner)) = best.take() {
                result.insert(winner);
            }
        }
        cluster_end = Some(cluster_end.map_or(end, |e: usize| e.max(end)));

        let dispersion = candidate.dispersion();
        let better = match &best {
            None => true,
            Some((d, s, m)) => (dispersion, start, &candidate) < (*d, *s, m),
        };
        if better {
            best = Some((dispersion, start, candidate));
        }
    }
    if let Some((_, _, winner)) = best {
        result.insert(winner);
    }
    result.into_iter().collect()
}

fn finish(candidates: BTreeSet<Match>, match_first: bool) -> Vec<Match> {
    if match_first {
        nearest_per_cluster(candidates)
    } else {
        candidates.into_iter().collect()
    }
}

/// Co-occurrence of all components anywhere in the document
#[derive(Debug, Clone)]
pub struct Intersection {
    components: Vec<Matcher>,
    match_first: bool,
}

impl Intersection {
    pub fn new(components: Vec<Matcher>, match_first: bool) -> Self {
        Self {
            components,
            match_first,
        }
    }

    pub fn find_matches(&self, layers: &LayerDict) -> Result<Vec<Match>> {
        let lists = component_matches(&self.components, layers)?;
        let candidates = merged_candidates(&lists, |_, _| true);
        Ok(finish(candidates, self.match_first))
    }
}

/// Matches of any component
#[derive(Debug, Clone)]
pub struct Union {
    components: Vec<Matcher>,
}

impl Union {
    pub fn new(components: Vec<Matcher>) -> Self {
        Self { components }
    }

    pub fn find_matches(&self, layers: &LayerDict) -> Result<Vec<Match>> {
        let mut all = BTreeSet::new();
        for component in &self.components {
            all.extend(component.find_matches(layers)?);
        }
        Ok(all.into_iter().collect())
    }
}

/// Components on directly adjacent tokens, in component order
#[derive(Debug, Clone)]
pub struct Concatenation {
    components: Vec<Matcher>,
}

impl Concatenation {
    pub fn new(components: Vec<Matcher>) -> Self {
        Self { components }
    }

    pub fn find_matches(&self, layers: &LayerDict) -> Result<Vec<Match>> {
        let lists = component_matches(&self.components, layers)?;
        let candidates = merged_candidates(&lists, |_, merged| merged.is_contiguous());
        Ok(candidates.into_iter().collect())
    }
}

/// Components in increasing token order, at most `slop` tokens apart
#[derive(Debug, Clone)]
pub struct Gap {
    components: Vec<Matcher>,
    slop: Option<usize>,
    match_first: bool,
}

impl Gap {
    pub fn new(components: Vec<Matcher>, slop: Option<usize>, match_first: bool) -> Self {
        Self {
            components,
            slop,
            match_first,
        }
    }

    pub fn find_matches(&self, layers: &LayerDict) -> Result<Vec<Match>> {
        let lists = component_matches(&self.components, layers)?;
        let candidates = merged_candidates(&lists, |_, merged| merged.within_gap(self.slop));
        Ok(finish(candidates, self.match_first))
    }
}

/// Components covering exactly the same token positions
///
/// Single-token matches are broadcast to the length of the longer ones;
/// matches without tokens do not take part in the alignment.
#[derive(Debug, Clone)]
pub struct LayerMatch {
    components: Vec<Matcher>,
}

impl LayerMatch {
    pub fn new(components: Vec<Matcher>) -> Self {
        Self { components }
    }

    pub fn find_matches(&self, layers: &LayerDict) -> Result<Vec<Match>> {
        let lists = component_matches(&self.components, layers)?;
        let candidates = merged_candidates(&lists, |combo, _| is_aligned(combo));
        Ok(candidates.into_iter().collect())
    }
}

fn is_aligned(combo: &[&Match]) -> bool {
    let sized: Vec<&Match> = combo.iter().copied().filter(|m| !m.is_empty()).collect();
    let max_tokens = sized.iter().map(|m| m.len()).max().unwrap_or(0);
    if sized.iter().any(|m| m.len() != 1 && m.len() != max_tokens) {
        return false;
    }
    let Some(reference) = sized.iter().find(|m| m.len() == max_tokens) else {
        return true;
    };
    sized.iter().all(|m| {
        if m.len() == max_tokens {
            m.token_idxs == reference.token_idxs
        } else {
            reference.token_idxs.iter().all(|&idx| idx == m.token_idxs[0])
        }
    })
}

/// Document-level absence of the child
///
/// Yields one empty match when the child matches nothing, otherwise no
/// matches. The empty match is neutral when merged by the other combinators.
#[derive(Debug, Clone)]
pub struct Negation {
    child: Box<Matcher>,
}

impl Negation {
    pub fn new(child: Matcher) -> Self {
        Self {
            child: Box::new(child),
        }
    }

    pub fn find_matches(&self, layers: &LayerDict) -> Result<Vec<Match>> {
        if self.child.find_matches(layers)?.is_empty() {
            Ok(vec![Match::empty()])
        } else {
            Ok(Vec::new())
        }
    }
}
