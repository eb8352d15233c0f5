//! Per-document annotation layers
//!
//! A document is a set of parallel layers (raw text, lemmas, POS tags, ...),
//! each addressed by a feature name and an optional layer name. Tokens are
//! the runs of non-whitespace in a layer's text. All offsets are byte
//! offsets into that text.

use crate::error::{GrammarError, Result};
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::cell::OnceCell;
use std::fmt;
use std::ops::Range;
use tracing::warn;

/// Unique identifier for a token within one layer
pub type TokenIdx = usize;

/// Address of a layer: `feature` or `feature.layer`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerKey {
    pub feature: String,
    pub layer: Option<String>,
}

impl LayerKey {
    pub fn new(feature: &str, layer: Option<&str>) -> Self {
        Self {
            feature: feature.to_string(),
            layer: layer.map(str::to_string),
        }
    }

    /// Parse a layer path. The first `.` separates feature from layer.
    pub fn parse(path: &str) -> Self {
        match path.split_once('.') {
            Some((feature, layer)) => Self::new(feature, Some(layer)),
            None => Self::new(path, None),
        }
    }
}

impl fmt::Display for LayerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.layer {
            Some(layer) => write!(f, "{}.{}", self.feature, layer),
            None => write!(f, "{}", self.feature),
        }
    }
}

/// Char/token maps for one layer
#[derive(Debug, Clone, PartialEq)]
pub struct TokenIndex {
    /// Token covering each byte offset. Whitespace maps to the following
    /// token, trailing whitespace to the last one.
    pub char_to_token: Vec<TokenIdx>,
    /// Byte span of each token
    pub token_spans: Vec<Range<usize>>,
}

impl TokenIndex {
    pub fn build(text: &str) -> Self {
        let mut token_spans = Vec::new();
        let mut start = None;
        for (offset, c) in text.char_indices() {
            if c.is_whitespace() {
                if let Some(s) = start.take() {
                    token_spans.push(s..offset);
                }
            } else if start.is_none() {
                start = Some(offset);
            }
        }
        if let Some(s) = start {
            token_spans.push(s..text.len());
        }

        let mut char_to_token = Vec::with_capacity(text.len());
        for (idx, span) in token_spans.iter().enumerate() {
            char_to_token.resize(span.end, idx);
        }
        char_to_token.resize(text.len(), token_spans.len().saturating_sub(1));

        Self {
            char_to_token,
            token_spans,
        }
    }

    /// Byte offset where each token starts
    pub fn token_to_char_start(&self) -> impl Iterator<Item = usize> + '_ {
        self.token_spans.iter().map(|span| span.start)
    }
}

/// One layer's text and its index, built on first use and memoized.
#[derive(Debug, Clone)]
struct Layer {
    text: String,
    index: OnceCell<TokenIndex>,
}

impl Layer {
    fn new(text: String) -> Self {
        Self {
            text,
            index: OnceCell::new(),
        }
    }

    fn index(&self) -> &TokenIndex {
        self.index.get_or_init(|| TokenIndex::build(&self.text))
    }

    fn is_indexed(&self) -> bool {
        self.index.get().is_some()
    }
}

/// All layers of one document
///
/// The lazy indices make a `LayerDict` `Send` but not `Sync`: build one per
/// document evaluation and do not share it between threads.
#[derive(Debug, Clone, Default)]
pub struct LayerDict {
    layers: FxHashMap<LayerKey, Layer>,
}

impl LayerDict {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a layer
    pub fn insert(&mut self, key: LayerKey, text: impl Into<String>) {
        self.layers.insert(key, Layer::new(text.into()));
    }

    /// Builder-style `insert` taking a layer path
    pub fn with_layer(mut self, path: &str, text: impl Into<String>) -> Self {
        self.insert(LayerKey::parse(path), text);
        self
    }

    /// Build from a JSON document.
    ///
    /// String fields become `feature` layers and objects of strings become
    /// `feature.layer` layers. Anything else is skipped with a warning.
    pub fn from_document(document: &Value) -> Result<Self> {
        let Value::Object(fields) = document else {
            return Err(GrammarError::malformed(
                "document",
                "expected a JSON object of layers",
            ));
        };

        let mut dict = Self::new();
        for (feature, value) in fields {
            match value {
                Value::String(text) => dict.insert(LayerKey::new(feature, None), text.as_str()),
                Value::Object(layers) => {
                    for (layer, value) in layers {
                        match value {
                            Value::String(text) => {
                                dict.insert(LayerKey::new(feature, Some(layer)), text.as_str())
                            }
                            other => warn!(
                                "Skipping non-text layer {}.{} ({})",
                                feature,
                                layer,
                                json_kind(other)
                            ),
                        }
                    }
                }
                other => warn!("Skipping non-text field {} ({})", feature, json_kind(other)),
            }
        }
        Ok(dict)
    }

    /// Parse a JSON string and build from it
    pub fn from_json(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)?;
        Self::from_document(&value)
    }

    pub fn contains(&self, key: &LayerKey) -> bool {
        self.layers.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &LayerKey> {
        self.layers.keys()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    fn layer(&self, key: &LayerKey) -> Result<&Layer> {
        self.layers
            .get(key)
            .ok_or_else(|| GrammarError::UnknownLayer(key.to_string()))
    }

    /// Raw text of a layer
    pub fn text(&self, key: &LayerKey) -> Result<&str> {
        Ok(&self.layer(key)?.text)
    }

    /// Token index of a layer, building it on first use
    pub fn token_index(&self, key: &LayerKey) -> Result<&TokenIndex> {
        Ok(self.layer(key)?.index())
    }

    /// Whether a layer's index has been built yet
    pub fn is_indexed(&self, key: &LayerKey) -> Result<bool> {
        Ok(self.layer(key)?.is_indexed())
    }

    pub fn token_count(&self, key: &LayerKey) -> Result<usize> {
        Ok(self.token_index(key)?.token_spans.len())
    }

    /// Token covering a byte offset
    pub fn get_token_index(&self, key: &LayerKey, offset: usize) -> Result<TokenIdx> {
        let layer = self.layer(key)?;
        let index = layer.index();
        if index.token_spans.is_empty() {
            return Err(GrammarError::TokenOutOfRange {
                layer: key.to_string(),
                index: 0,
                count: 0,
            });
        }
        index
            .char_to_token
            .get(offset)
            .copied()
            .ok_or_else(|| GrammarError::OffsetOutOfRange {
                layer: key.to_string(),
                offset,
                len: layer.text.len(),
            })
    }

    /// Byte span of a token
    pub fn token_span(&self, idx: TokenIdx, key: &LayerKey) -> Result<Range<usize>> {
        let index = self.token_index(key)?;
        index
            .token_spans
            .get(idx)
            .cloned()
            .ok_or_else(|| GrammarError::TokenOutOfRange {
                layer: key.to_string(),
                index: idx,
                count: index.token_spans.len(),
            })
    }

    /// Text of a token
    pub fn get_token_by_index(&self, idx: TokenIdx, key: &LayerKey) -> Result<&str> {
        let span = self.token_span(idx, key)?;
        Ok(&self.layer(key)?.text[span])
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn text_key() -> LayerKey {
        LayerKey::parse("text")
    }

    #[test]
    fn test_layer_key_parse() {
        assert_eq!(LayerKey::parse("text"), LayerKey::new("text", None));
        assert_eq!(
            LayerKey::parse("text_mlp.lemmas"),
            LayerKey::new("text_mlp", Some("lemmas"))
        );
        assert_eq!(LayerKey::parse("a.b.c").layer.as_deref(), Some("b.c"));
        assert_eq!(LayerKey::parse("text_mlp.lemmas").to_string(), "text_mlp.lemmas");
    }

    #[test]
    fn test_token_index_build() {
        let index = TokenIndex::build("tere ohsa  pere");
        assert_eq!(index.token_spans, vec![0..4, 5..9, 11..15]);
        assert_eq!(index.token_to_char_start().collect::<Vec<_>>(), vec![0, 5, 11]);
        // whitespace belongs to the following token
        assert_eq!(index.char_to_token[4], 1);
        assert_eq!(index.char_to_token[10], 2);
        assert_eq!(index.char_to_token.len(), 15);
    }

    #[test]
    fn test_token_index_edges() {
        let index = TokenIndex::build("  a b ");
        assert_eq!(index.token_spans, vec![2..3, 4..5]);
        assert_eq!(index.char_to_token, vec![0, 0, 0, 1, 1, 1]);

        let empty = TokenIndex::build("");
        assert!(empty.token_spans.is_empty());
        assert!(empty.char_to_token.is_empty());
    }

    #[test]
    fn test_multibyte_offsets() {
        let dict = LayerDict::new().with_layer("text", "õun ära");
        let key = text_key();
        // "õ" is two bytes
        assert_eq!(dict.get_token_index(&key, 3).unwrap(), 0);
        assert_eq!(dict.get_token_index(&key, 5).unwrap(), 1);
        assert_eq!(dict.get_token_by_index(1, &key).unwrap(), "ära");
    }

    #[test]
    fn test_lazy_index() {
        let dict = LayerDict::new().with_layer("text", "tere ohsa");
        let key = text_key();
        assert!(!dict.is_indexed(&key).unwrap());
        assert_eq!(dict.get_token_by_index(1, &key).unwrap(), "ohsa");
        assert!(dict.is_indexed(&key).unwrap());
    }

    #[test]
    fn test_unknown_layer() {
        let dict = LayerDict::new().with_layer("text", "tere");
        let err = dict
            .get_token_index(&LayerKey::parse("text_mlp.lemmas"), 0)
            .unwrap_err();
        assert!(matches!(err, GrammarError::UnknownLayer(ref l) if l == "text_mlp.lemmas"));
    }

    #[test]
    fn test_out_of_range() {
        let dict = LayerDict::new().with_layer("text", "tere").with_layer("blank", "   ");
        let key = text_key();
        assert!(matches!(
            dict.get_token_index(&key, 4),
            Err(GrammarError::OffsetOutOfRange { offset: 4, len: 4, .. })
        ));
        assert!(matches!(
            dict.get_token_by_index(1, &key),
            Err(GrammarError::TokenOutOfRange { index: 1, count: 1, .. })
        ));
        assert!(matches!(
            dict.get_token_index(&LayerKey::parse("blank"), 0),
            Err(GrammarError::TokenOutOfRange { count: 0, .. })
        ));
    }

    #[test]
    fn test_from_document() {
        let doc = json!({
            "text": "Tere ohsa",
            "text_mlp": {"lemmas": "tere ohsa", "pos_tags": "I S", "n_tokens": 2},
            "year": 2021
        });
        let dict = LayerDict::from_document(&doc).unwrap();

        assert_eq!(dict.len(), 3);
        assert_eq!(dict.text(&LayerKey::parse("text")).unwrap(), "Tere ohsa");
        assert_eq!(
            dict.text(&LayerKey::parse("text_mlp.pos_tags")).unwrap(),
            "I S"
        );
        assert!(!dict.contains(&LayerKey::parse("year")));
        assert!(!dict.contains(&LayerKey::parse("text_mlp.n_tokens")));
    }

    #[test]
    fn test_from_document_rejects_non_object() {
        assert!(matches!(
            LayerDict::from_document(&json!(["tere"])),
            Err(GrammarError::MalformedGrammar { .. })
        ));
        assert!(matches!(
            LayerDict::from_json("{not json"),
            Err(GrammarError::Json(_))
        ));
    }
}
