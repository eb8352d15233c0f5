//! Grammar input parser
//!
//! Parses nested JSON grammars into validated `GrammarNode` trees. A node
//! with a `layer` field is a terminal, anything else is a composite.
//! Accepted field names:
//!
//! - `op` / `operation`: `exact`, `regex` (terminals) or a composite operation
//! - `children` / `components`
//! - `layer`, `terms`, `pattern` / `expression`
//! - `name`, `slop`, `case_sensitive`, `whole_word`, `match_first`

use crate::error::{GrammarError, Result};
use crate::grammar::{Composite, GrammarNode, Operation, Terminal, TerminalMatch};
use serde_json::{Map, Value};

/// Parse a JSON grammar string
pub fn parse_grammar(input: &str) -> Result<GrammarNode> {
    let value: Value = serde_json::from_str(input)?;
    parse_grammar_value(&value)
}

/// Parse and validate an already decoded grammar
pub fn parse_grammar_value(value: &Value) -> Result<GrammarNode> {
    let node = parse_node(value, "root")?;
    node.validate()?;
    Ok(node)
}

fn parse_node(value: &Value, path: &str) -> Result<GrammarNode> {
    let Value::Object(obj) = value else {
        return Err(GrammarError::malformed(path, "expected an object"));
    };

    if obj.contains_key("layer") {
        parse_terminal(obj, path).map(GrammarNode::Terminal)
    } else {
        parse_composite(obj, path).map(GrammarNode::Composite)
    }
}

fn parse_terminal(obj: &Map<String, Value>, path: &str) -> Result<Terminal> {
    let layer = get_str(obj, &["layer"], path)?
        .ok_or_else(|| GrammarError::malformed(path, "missing layer"))?;
    let terms = obj.get("terms");
    let pattern = get_str(obj, &["pattern", "expression"], path)?;

    let op = match get_str(obj, &["op", "operation"], path)? {
        Some(op) => op,
        // infer from the fields present
        None if terms.is_some() => "exact",
        None if pattern.is_some() => "regex",
        None => {
            return Err(GrammarError::malformed(
                path,
                "terminal needs terms or a pattern",
            ));
        }
    };

    let matcher = match op {
        "exact" => {
            let Some(terms) = terms else {
                return Err(GrammarError::malformed(path, "exact terminal missing terms"));
            };
            TerminalMatch::Exact(parse_terms(terms, path)?)
        }
        "regex" => {
            let Some(pattern) = pattern else {
                return Err(GrammarError::malformed(path, "regex terminal missing pattern"));
            };
            TerminalMatch::Regex(pattern.to_string())
        }
        other => return Err(GrammarError::UnsupportedOperation(other.to_string())),
    };

    Ok(Terminal {
        name: get_str(obj, &["name"], path)?.unwrap_or_default().to_string(),
        layer: layer.to_string(),
        matcher,
        case_sensitive: get_bool(obj, "case_sensitive", path)?,
        whole_word: get_bool(obj, "whole_word", path)?,
    })
}

fn parse_terms(value: &Value, path: &str) -> Result<Vec<String>> {
    let Value::Array(items) = value else {
        return Err(GrammarError::malformed(path, "terms must be an array of strings"));
    };
    items
        .iter()
        .map(|item| {
            item.as_str()
                .map(str::to_string)
                .ok_or_else(|| GrammarError::malformed(path, "terms must be an array of strings"))
        })
        .collect()
}

fn parse_composite(obj: &Map<String, Value>, path: &str) -> Result<Composite> {
    let op = get_str(obj, &["op", "operation"], path)?
        .ok_or_else(|| GrammarError::malformed(path, "missing layer or op"))?;
    let operation = Operation::parse(op)?;

    let children = match get_field(obj, &["children", "components"]) {
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(i, child)| parse_node(child, &format!("{}.children[{}]", path, i)))
            .collect::<Result<Vec<_>>>()?,
        Some(_) => return Err(GrammarError::malformed(path, "children must be an array")),
        None => return Err(GrammarError::malformed(path, "missing children")),
    };

    let slop = match obj.get("slop") {
        None | Some(Value::Null) => None,
        Some(value) => match value.as_u64() {
            Some(slop) => Some(slop as usize),
            None => {
                return Err(GrammarError::malformed(
                    path,
                    "slop must be a non-negative integer",
                ));
            }
        },
    };

    Ok(Composite {
        name: get_str(obj, &["name"], path)?.unwrap_or_default().to_string(),
        operation,
        children,
        slop,
        match_first: get_bool(obj, "match_first", path)?,
    })
}

fn get_field<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| obj.get(*key))
}

fn get_str<'a>(obj: &'a Map<String, Value>, keys: &[&str], path: &str) -> Result<Option<&'a str>> {
    match get_field(obj, keys) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(GrammarError::malformed(
            path,
            format!("{} must be a string", keys[0]),
        )),
    }
}

fn get_bool(obj: &Map<String, Value>, key: &str, path: &str) -> Result<bool> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(b)) => Ok(*b),
        Some(_) => Err(GrammarError::malformed(path, format!("{} must be a boolean", key))),
    }
}
