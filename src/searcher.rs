//! Two-phase corpus search
//!
//! The search pipeline:
//! 1. Compile the grammar pair into a recall-safe boolean query
//! 2. Run the query through the search collaborator to get candidates
//! 3. Fetch the candidates' layers, one batch at a time
//! 4. Re-verify exactly with the matcher, dropping documents that match
//!    the exclusive grammar
//!
//! The collaborators are traits so that a host application can plug in a
//! real search engine and document store. `InMemoryCorpus` implements both
//! over documents held in memory.

use crate::compiler::GrammarQueryCompiler;
use crate::error::GrammarError;
use crate::grammar::GrammarNode;
use crate::layers::LayerDict;
use crate::matcher::{Match, Matcher};
use crate::parser::parse_grammar;
use crate::query::Query;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::convert::Infallible;
use thiserror::Error;
use tracing::{debug, warn};

pub type DocumentId = String;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Error during corpus search
#[derive(Debug, Error)]
pub enum SearchError {
    #[error(transparent)]
    Grammar(#[from] GrammarError),

    #[error("Search backend error: {0}")]
    Backend(#[source] BoxError),

    #[error("Layer source error for batch starting at document {first}: {source}")]
    Layers {
        first: DocumentId,
        #[source]
        source: BoxError,
    },
}

/// Runs a compiled query against an indexed corpus
pub trait SearchClient {
    type Error: std::error::Error + Send + Sync + 'static;

    fn search(&self, query: &Query) -> Result<Vec<DocumentId>, Self::Error>;
}

/// Fetches a document's annotation layers. `Ok(None)` when the document
/// no longer exists.
pub trait LayerSource {
    type Error: std::error::Error + Send + Sync + 'static;

    fn get_layers(&self, id: &DocumentId) -> Result<Option<LayerDict>, Self::Error>;

    /// Fetch several documents in one call, one entry per id in order.
    /// Stores with a bulk lookup should override this.
    fn get_layers_batch(&self, ids: &[DocumentId]) -> Result<Vec<Option<LayerDict>>, Self::Error> {
        ids.iter().map(|id| self.get_layers(id)).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SearchOptions {
    /// Candidate ids passed to each `LayerSource::get_layers_batch` call
    pub batch_size: usize,
    /// Skip documents lacking a layer the grammar uses instead of failing
    pub skip_missing_layers: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            batch_size: 100,
            skip_missing_layers: true,
        }
    }
}

/// A verified document with its exact matches
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentMatch {
    pub id: DocumentId,
    pub matches: Vec<Match>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SearchReport {
    /// Documents returned by the search collaborator
    pub candidates: usize,
    /// Candidates confirmed by the matcher
    pub verified: usize,
    /// Candidates dropped for missing documents or layers
    pub skipped: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SearchResults {
    pub matches: Vec<DocumentMatch>,
    pub report: SearchReport,
}

/// Search a corpus with an inclusive and an optional exclusive grammar
pub fn search_corpus<C, S>(
    client: &C,
    source: &S,
    compiler: &GrammarQueryCompiler,
    inclusive: &GrammarNode,
    exclusive: Option<&GrammarNode>,
    options: &SearchOptions,
) -> Result<SearchResults, SearchError>
where
    C: SearchClient,
    S: LayerSource,
{
    let query = compiler.compile(Some(inclusive), exclusive)?;
    let include = Matcher::from_grammar(inclusive)?;
    let exclude = exclusive.map(Matcher::from_grammar).transpose()?;

    let candidates = client
        .search(&query)
        .map_err(|e| SearchError::Backend(Box::new(e)))?;
    debug!("Query returned {} candidates", candidates.len());

    let mut results = SearchResults::default();
    results.report.candidates = candidates.len();

    for (n, batch) in candidates.chunks(options.batch_size.max(1)).enumerate() {
        debug!("Fetching batch {} ({} documents)", n, batch.len());
        let fetched = source
            .get_layers_batch(batch)
            .map_err(|e| SearchError::Layers {
                first: batch[0].clone(),
                source: Box::new(e),
            })?;
        if fetched.len() != batch.len() {
            return Err(SearchError::Layers {
                first: batch[0].clone(),
                source: format!(
                    "expected {} documents, got {}",
                    batch.len(),
                    fetched.len()
                )
                .into(),
            });
        }

        for (id, layers) in batch.iter().zip(fetched) {
            let Some(layers) = layers else {
                warn!("Skipping document {}: not found", id);
                results.report.skipped += 1;
                continue;
            };

            match verify(&include, exclude.as_ref(), &layers) {
                Ok(Some(matches)) => {
                    results.report.verified += 1;
                    results.matches.push(DocumentMatch {
                        id: id.clone(),
                        matches,
                    });
                }
                Ok(None) => {}
                Err(GrammarError::UnknownLayer(layer)) if options.skip_missing_layers => {
                    warn!("Skipping document {}: no layer {}", id, layer);
                    results.report.skipped += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    debug!(
        "Verified {} of {} candidates ({} skipped)",
        results.report.verified, results.report.candidates, results.report.skipped
    );
    Ok(results)
}

/// Search a corpus with JSON grammars
pub fn search_grammar<C, S>(
    client: &C,
    source: &S,
    inclusive: &str,
    exclusive: Option<&str>,
    options: &SearchOptions,
) -> Result<SearchResults, SearchError>
where
    C: SearchClient,
    S: LayerSource,
{
    let inclusive = parse_grammar(inclusive)?;
    let exclusive = exclusive.map(parse_grammar).transpose()?;
    search_corpus(
        client,
        source,
        &GrammarQueryCompiler::new(),
        &inclusive,
        exclusive.as_ref(),
        options,
    )
}

/// Exact matches of a document, or `None` if it does not qualify
fn verify(
    include: &Matcher,
    exclude: Option<&Matcher>,
    layers: &LayerDict,
) -> crate::error::Result<Option<Vec<Match>>> {
    let matches = include.find_matches(layers)?;
    if matches.is_empty() {
        return Ok(None);
    }
    if let Some(exclude) = exclude {
        if exclude.is_match(layers)? {
            return Ok(None);
        }
    }
    Ok(Some(matches))
}

/// Documents held in memory, searchable with the query evaluator
#[derive(Debug, Clone, Default)]
pub struct InMemoryCorpus {
    documents: Vec<(DocumentId, LayerDict)>,
    positions: FxHashMap<DocumentId, usize>,
}

impl InMemoryCorpus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a document
    pub fn insert(&mut self, id: impl Into<DocumentId>, layers: LayerDict) {
        let id = id.into();
        match self.positions.get(&id) {
            Some(&pos) => self.documents[pos].1 = layers,
            None => {
                self.positions.insert(id.clone(), self.documents.len());
                self.documents.push((id, layers));
            }
        }
    }

    /// Add a JSON document (see `LayerDict::from_document`)
    pub fn insert_document(
        &mut self,
        id: impl Into<DocumentId>,
        document: &Value,
    ) -> crate::error::Result<()> {
        self.insert(id, LayerDict::from_document(document)?);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&LayerDict> {
        self.positions.get(id).map(|&pos| &self.documents[pos].1)
    }

    /// Document ids in insertion order
    pub fn ids(&self) -> impl Iterator<Item = &DocumentId> {
        self.documents.iter().map(|(id, _)| id)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

impl SearchClient for InMemoryCorpus {
    type Error = GrammarError;

    fn search(&self, query: &Query) -> Result<Vec<DocumentId>, GrammarError> {
        let evaluator = query.evaluator()?;
        let mut hits = Vec::new();
        for (id, layers) in &self.documents {
            if evaluator.matches(layers)? {
                hits.push(id.clone());
            }
        }
        Ok(hits)
    }
}

impl LayerSource for InMemoryCorpus {
    type Error = Infallible;

    fn get_layers(&self, id: &DocumentId) -> Result<Option<LayerDict>, Infallible> {
        Ok(self.get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::RefCell;

    /// Three short documents:
    /// a: "tere ohsa tere pere"  (lemmas + pos)
    /// b: "pere tere"            (no pos layer)
    /// c: "tere kala"            (lemmas + pos)
    fn create_test_corpus() -> InMemoryCorpus {
        let mut corpus = InMemoryCorpus::new();
        corpus
            .insert_document(
                "a",
                &json!({
                    "text": "tere ohsa tere pere",
                    "text_mlp": {"lemmas": "tere ohe tere pere", "pos_tags": "I S I S"}
                }),
            )
            .unwrap();
        corpus
            .insert_document(
                "b",
                &json!({"text": "pere tere", "text_mlp": {"lemmas": "pere tere"}}),
            )
            .unwrap();
        corpus
            .insert_document(
                "c",
                &json!({
                    "text": "tere kala",
                    "text_mlp": {"lemmas": "tere kala", "pos_tags": "I S"}
                }),
            )
            .unwrap();
        corpus
    }

    fn ids(results: &SearchResults) -> Vec<&str> {
        results.matches.iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn test_two_phase_drops_false_positives() {
        let corpus = create_test_corpus();

        // tere followed by pere: the query admits a and b, only a has the order
        let grammar = r#"{"op": "concat", "children": [
            {"layer": "text", "terms": ["tere"]},
            {"layer": "text", "terms": ["pere"]}
        ]}"#;
        let results =
            search_grammar(&corpus, &corpus, grammar, None, &SearchOptions::default()).unwrap();

        assert_eq!(ids(&results), vec!["a"]);
        assert_eq!(results.matches[0].matches[0].token_idxs, vec![2, 3]);
        assert_eq!(
            results.report,
            SearchReport {
                candidates: 2,
                verified: 1,
                skipped: 0
            }
        );
    }

    #[test]
    fn test_exclusive_grammar() {
        let corpus = create_test_corpus();

        let inclusive = r#"{"layer": "text", "terms": ["tere"]}"#;
        let exclusive = r#"{"layer": "text_mlp.lemmas", "terms": ["kala"]}"#;
        let results = search_grammar(
            &corpus,
            &corpus,
            inclusive,
            Some(exclusive),
            &SearchOptions::default(),
        )
        .unwrap();

        assert_eq!(ids(&results), vec!["a", "b"]);
        // c is excluded by the query itself
        assert_eq!(results.report.candidates, 2);
    }

    #[test]
    fn test_missing_layers_skipped() {
        let corpus = create_test_corpus();

        // union over a layer b lacks: the query admits b, the matcher cannot check it
        let grammar = r#"{"op": "union", "children": [
            {"layer": "text", "terms": ["pere"]},
            {"layer": "text_mlp.pos_tags", "terms": ["S"]}
        ]}"#;
        let results = search_grammar(
            &corpus,
            &corpus,
            grammar,
            None,
            &SearchOptions {
                batch_size: 1,
                ..SearchOptions::default()
            },
        )
        .unwrap();

        assert_eq!(ids(&results), vec!["a", "c"]);
        assert_eq!(results.report.skipped, 1);
        assert_eq!(results.report.candidates, 3);
    }

    #[test]
    fn test_missing_layers_error() {
        let corpus = create_test_corpus();
        let grammar = r#"{"op": "union", "children": [
            {"layer": "text", "terms": ["pere"]},
            {"layer": "text_mlp.pos_tags", "terms": ["S"]}
        ]}"#;
        let options = SearchOptions {
            skip_missing_layers: false,
            ..SearchOptions::default()
        };
        let err = search_grammar(&corpus, &corpus, grammar, None, &options).unwrap_err();
        assert!(matches!(
            err,
            SearchError::Grammar(GrammarError::UnknownLayer(_))
        ));
    }

    #[test]
    fn test_backend_error() {
        struct Offline;

        #[derive(Debug, Error)]
        #[error("offline")]
        struct OfflineError;

        impl SearchClient for Offline {
            type Error = OfflineError;

            fn search(&self, _query: &Query) -> Result<Vec<DocumentId>, OfflineError> {
                Err(OfflineError)
            }
        }

        let corpus = create_test_corpus();
        let grammar = r#"{"layer": "text", "terms": ["tere"]}"#;
        let err =
            search_grammar(&Offline, &corpus, grammar, None, &SearchOptions::default()).unwrap_err();
        assert!(matches!(err, SearchError::Backend(_)));
        assert_eq!(err.to_string(), "Search backend error: offline");
    }

    #[test]
    fn test_vanished_document_skipped() {
        struct Stale(InMemoryCorpus);

        impl SearchClient for Stale {
            type Error = GrammarError;

            fn search(&self, query: &Query) -> Result<Vec<DocumentId>, GrammarError> {
                let mut ids = self.0.search(query)?;
                ids.push("gone".to_string());
                Ok(ids)
            }
        }

        let corpus = create_test_corpus();
        let stale = Stale(corpus.clone());
        let grammar = r#"{"layer": "text", "terms": ["kala"]}"#;
        let results =
            search_grammar(&stale, &corpus, grammar, None, &SearchOptions::default()).unwrap();
        assert_eq!(ids(&results), vec!["c"]);
        assert_eq!(results.report.skipped, 1);
    }

    /// Layer source that records the size of every batch it serves
    struct Batches {
        corpus: InMemoryCorpus,
        sizes: RefCell<Vec<usize>>,
        short: bool,
    }

    impl Batches {
        fn new(short: bool) -> Self {
            Self {
                corpus: create_test_corpus(),
                sizes: RefCell::new(Vec::new()),
                short,
            }
        }
    }

    impl LayerSource for Batches {
        type Error = Infallible;

        fn get_layers(&self, id: &DocumentId) -> Result<Option<LayerDict>, Infallible> {
            self.corpus.get_layers(id)
        }

        fn get_layers_batch(
            &self,
            ids: &[DocumentId],
        ) -> Result<Vec<Option<LayerDict>>, Infallible> {
            self.sizes.borrow_mut().push(ids.len());
            let mut layers: Vec<_> = ids.iter().map(|id| self.corpus.get(id).cloned()).collect();
            if self.short {
                layers.pop();
            }
            Ok(layers)
        }
    }

    #[test]
    fn test_layers_fetched_in_batches() {
        let source = Batches::new(false);
        let grammar = r#"{"layer": "text", "terms": ["tere"]}"#;
        let options = SearchOptions {
            batch_size: 2,
            ..SearchOptions::default()
        };
        let results = search_grammar(&source.corpus, &source, grammar, None, &options).unwrap();

        assert_eq!(ids(&results), vec!["a", "b", "c"]);
        assert_eq!(*source.sizes.borrow(), vec![2, 1]);
    }

    #[test]
    fn test_short_batch_is_an_error() {
        let source = Batches::new(true);
        let grammar = r#"{"layer": "text", "terms": ["tere"]}"#;
        let err = search_grammar(&source.corpus, &source, grammar, None, &SearchOptions::default())
            .unwrap_err();
        assert!(matches!(err, SearchError::Layers { ref first, .. } if first == "a"));
    }

    #[test]
    fn test_invalid_grammar() {
        let corpus = create_test_corpus();
        let err = search_grammar(
            &corpus,
            &corpus,
            r#"{"op": "nope", "children": []}"#,
            None,
            &SearchOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            SearchError::Grammar(GrammarError::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn test_corpus_insert_replaces() {
        let mut corpus = create_test_corpus();
        corpus.insert("b", LayerDict::new().with_layer("text", "uus"));
        assert_eq!(corpus.len(), 3);
        assert_eq!(corpus.ids().collect::<Vec<_>>(), vec!["a", "b", "c"]);
        assert!(corpus.get("b").is_some());
        assert!(corpus.get("z").is_none());
    }

    #[test]
    fn test_options_deserialize() {
        let options: SearchOptions = serde_json::from_str(r#"{"batch_size": 5}"#).unwrap();
        assert_eq!(options.batch_size, 5);
        assert!(options.skip_missing_layers);
    }
}
