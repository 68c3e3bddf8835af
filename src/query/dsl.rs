//! Typed subset of the search backend's query DSL.
//!
//! Only the clause shapes the compiler emits are modelled. Every type
//! serializes to exactly the JSON the backend expects.

use serde::ser::Serializer;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub enum RangeBound {
    Gte(Value),
    Lte(Value),
    Lt(Value),
}

impl RangeBound {
    fn to_value(&self) -> Value {
        match self {
            RangeBound::Gte(v) => json!({ "gte": v }),
            RangeBound::Lte(v) => json!({ "lte": v }),
            RangeBound::Lt(v) => json!({ "lt": v }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    Term {
        field: &'static str,
        value: Value,
    },
    Match {
        field: &'static str,
        query: String,
    },
    Wildcard {
        field: &'static str,
        pattern: String,
    },
    Range {
        field: &'static str,
        bound: RangeBound,
    },
    SimpleQueryString {
        query: String,
        fields: Vec<&'static str>,
    },
    Nested {
        path: &'static str,
        query: Box<Clause>,
    },
    Bool(BoolQuery),
}

impl Clause {
    pub fn term(field: &'static str, value: impl Into<Value>) -> Self {
        Clause::Term {
            field,
            value: value.into(),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Clause::Term { field, value } => json!({ "term": { *field: value } }),
            Clause::Match { field, query } => json!({ "match": { *field: query } }),
            Clause::Wildcard { field, pattern } => json!({ "wildcard": { *field: pattern } }),
            Clause::Range { field, bound } => json!({ "range": { *field: bound.to_value() } }),
            Clause::SimpleQueryString { query, fields } => json!({
                "simple_query_string": {
                    "query": query,
                    "fields": fields,
                    "default_operator": "and",
                }
            }),
            Clause::Nested { path, query } => json!({
                "nested": { "path": path, "query": query.to_value() }
            }),
            Clause::Bool(b) => json!({ "bool": b.to_value() }),
        }
    }
}

impl Serialize for Clause {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoolQuery {
    pub must: Vec<Clause>,
    pub should: Vec<Clause>,
    pub must_not: Vec<Clause>,
    pub minimum_should_match: Option<u32>,
}

impl BoolQuery {
    /// An OR group: at least one of `should` has to match.
    pub fn any_of(should: Vec<Clause>) -> Self {
        Self {
            should,
            minimum_should_match: Some(1),
            ..Default::default()
        }
    }

    fn to_value(&self) -> Value {
        let mut out = Map::new();
        if !self.must.is_empty() {
            out.insert("must".into(), json!(self.must));
        }
        if !self.should.is_empty() {
            out.insert("should".into(), json!(self.should));
        }
        if !self.must_not.is_empty() {
            out.insert("must_not".into(), json!(self.must_not));
        }
        if let Some(min) = self.minimum_should_match {
            out.insert("minimum_should_match".into(), json!(min));
        }
        Value::Object(out)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HighlightField {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pre_tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub highlight_query: Option<Clause>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub highlighter: Option<&'static str>,
    pub fragment_size: usize,
    pub number_of_fragments: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phrase_limit: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_match_size: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Highlight {
    pub order: &'static str,
    pub fields: BTreeMap<&'static str, HighlightField>,
    pub require_field_match: bool,
}

/// A request body for the backend's `_search` endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchRequest {
    pub from: usize,
    pub size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<Clause>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub highlight: Option<Highlight>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggs: Option<Value>,
}

impl SearchRequest {
    /// Top-level `must` clauses, empty when the request has no bool query.
    pub fn must(&self) -> &[Clause] {
        match &self.query {
            Some(Clause::Bool(b)) => &b.must,
            _ => &[],
        }
    }

    pub fn to_json(&self) -> Value {
        json!(self)
    }
}
