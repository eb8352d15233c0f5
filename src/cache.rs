//! Caller-owned cache of built matchers
//!
//! Building a matcher compiles every terminal's regex, so callers that
//! evaluate the same grammar repeatedly keep the built matcher here.
//! Entries stay until the caller evicts them.

use crate::error::Result;
use crate::grammar::GrammarNode;
use crate::matcher::Matcher;
use rustc_hash::FxHashMap;
use std::borrow::Borrow;
use std::hash::Hash;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct MatcherCache<K = String> {
    matchers: FxHashMap<K, Arc<Matcher>>,
}

impl<K> Default for MatcherCache<K> {
    fn default() -> Self {
        Self {
            matchers: FxHashMap::default(),
        }
    }
}

impl<K: Eq + Hash> MatcherCache<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached matcher for `key`, building it from `grammar` on a miss.
    /// Failed builds are not cached.
    pub fn get_or_build(&mut self, key: K, grammar: &GrammarNode) -> Result<Arc<Matcher>> {
        if let Some(matcher) = self.matchers.get(&key) {
            return Ok(Arc::clone(matcher));
        }
        let matcher = Arc::new(Matcher::from_grammar(grammar)?);
        debug!("Built matcher for grammar {:?}", grammar.name());
        self.matchers.insert(key, Arc::clone(&matcher));
        Ok(matcher)
    }

    pub fn get<Q>(&self, key: &Q) -> Option<Arc<Matcher>>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.matchers.get(key).cloned()
    }

    /// Drop one entry. Returns whether it was present.
    pub fn evict<Q>(&mut self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.matchers.remove(key).is_some()
    }

    pub fn clear(&mut self) {
        self.matchers.clear();
    }

    pub fn len(&self) -> usize {
        self.matchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GrammarError;
    use crate::layers::LayerDict;

    #[test]
    fn test_get_or_build_reuses() {
        let mut cache = MatcherCache::new();
        let grammar = GrammarNode::exact("t", "text", &["tere"]);

        let first = cache.get_or_build("greeting".to_string(), &grammar).unwrap();
        let second = cache.get_or_build("greeting".to_string(), &grammar).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);

        let layers = LayerDict::new().with_layer("text", "tere ohsa");
        assert!(second.is_match(&layers).unwrap());
    }

    #[test]
    fn test_evict_and_clear() {
        let mut cache: MatcherCache = MatcherCache::new();
        let grammar = GrammarNode::regex("r", "text", "p.re");
        cache.get_or_build("a".to_string(), &grammar).unwrap();
        cache.get_or_build("b".to_string(), &grammar).unwrap();

        assert!(cache.evict("a"));
        assert!(!cache.evict("a"));
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_failed_build_not_cached() {
        let mut cache = MatcherCache::new();
        let grammar = GrammarNode::regex("r", "text", "(");
        assert!(matches!(
            cache.get_or_build(1u32, &grammar),
            Err(GrammarError::Pattern(_))
        ));
        assert!(cache.is_empty());
    }
}
