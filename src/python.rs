//! Python bindings for layersearch
//!
//! This module provides PyO3-based Python bindings for the Rust core.
//! Grammars, documents and compiled queries cross the boundary as JSON.

use pyo3::exceptions::{PyKeyError, PyValueError};
use pyo3::prelude::*;
use std::sync::Arc;

use crate::compiler::{CompilerOptions, GrammarQueryCompiler};
use crate::error::GrammarError;
use crate::grammar::GrammarNode;
use crate::layers::LayerDict;
use crate::matcher::{Match, Matcher};
use crate::parser::parse_grammar;

/// Convert GrammarError to Python exception
impl From<GrammarError> for PyErr {
    fn from(err: GrammarError) -> PyErr {
        match err {
            GrammarError::UnknownLayer(_) => PyKeyError::new_err(err.to_string()),
            other => PyValueError::new_err(other.to_string()),
        }
    }
}

fn parse_options(options: Option<&str>) -> PyResult<CompilerOptions> {
    match options {
        Some(json) => serde_json::from_str(json)
            .map_err(|e| PyValueError::new_err(format!("Invalid compiler options: {}", e))),
        None => Ok(CompilerOptions::default()),
    }
}

fn matches_to_json(matches: &[Match]) -> PyResult<String> {
    serde_json::to_string(matches).map_err(|e| PyValueError::new_err(e.to_string()))
}

#[pyclass(name = "Grammar")]
#[derive(Clone)]
pub struct PyGrammar {
    grammar: Arc<GrammarNode>,
    matcher: Arc<Matcher>,
}

#[pymethods]
impl PyGrammar {
    #[new]
    fn new(json: &str) -> PyResult<Self> {
        let grammar = parse_grammar(json)?;
        let matcher = Matcher::from_grammar(&grammar)?;
        Ok(Self {
            grammar: Arc::new(grammar),
            matcher: Arc::new(matcher),
        })
    }

    #[getter]
    fn name(&self) -> String {
        self.grammar.name().to_string()
    }

    /// Matches in a JSON document as (token_idxs, features, texts) tuples
    fn find_matches(&self, document: &str) -> PyResult<Vec<(Vec<usize>, Vec<String>, Vec<String>)>> {
        let layers = LayerDict::from_json(document)?;
        Ok(self
            .matcher
            .find_matches(&layers)?
            .into_iter()
            .map(|m| (m.token_idxs, m.features, m.texts))
            .collect())
    }

    fn is_match(&self, document: &str) -> PyResult<bool> {
        let layers = LayerDict::from_json(document)?;
        Ok(self.matcher.is_match(&layers)?)
    }

    /// Compiled query as a JSON string
    #[pyo3(signature = (exclusive=None, options=None))]
    fn compile(&self, exclusive: Option<&PyGrammar>, options: Option<&str>) -> PyResult<String> {
        let compiler = GrammarQueryCompiler::with_options(parse_options(options)?);
        let query = compiler.compile(
            Some(self.grammar.as_ref()),
            exclusive.map(|g| g.grammar.as_ref()),
        )?;
        Ok(query.to_json())
    }

    fn to_json(&self) -> String {
        self.grammar.to_value().to_string()
    }

    fn __repr__(&self) -> String {
        let terminals = self.grammar.terminals().len();
        match self.grammar.name() {
            "" => format!("<Grammar terminals={}>", terminals),
            name => format!("<Grammar name='{}' terminals={}>", name, terminals),
        }
    }
}

/// Compile JSON grammars into a JSON query
#[pyfunction]
#[pyo3(signature = (inclusive=None, exclusive=None, options=None))]
fn compile_grammar(
    inclusive: Option<&str>,
    exclusive: Option<&str>,
    options: Option<&str>,
) -> PyResult<String> {
    let inclusive = inclusive.map(parse_grammar).transpose()?;
    let exclusive = exclusive.map(parse_grammar).transpose()?;
    let compiler = GrammarQueryCompiler::with_options(parse_options(options)?);
    let query = compiler.compile(inclusive.as_ref(), exclusive.as_ref())?;
    Ok(query.to_json())
}

/// Match a JSON grammar against a JSON document, returning JSON matches
#[pyfunction]
fn match_document(grammar: &str, document: &str) -> PyResult<String> {
    let grammar = parse_grammar(grammar)?;
    let matcher = Matcher::from_grammar(&grammar)?;
    let layers = LayerDict::from_json(document)?;
    matches_to_json(&matcher.find_matches(&layers)?)
}

#[pyfunction]
fn __version__() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[pymodule]
fn layersearch(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyGrammar>()?;

    m.add_function(wrap_pyfunction!(compile_grammar, m)?)?;
    m.add_function(wrap_pyfunction!(match_document, m)?)?;
    m.add_function(wrap_pyfunction!(__version__, m)?)?;
    Ok(())
}
