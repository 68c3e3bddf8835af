//! QuerySpec → backend search request.
//!
//! Everything here is pure: the same spec and parameters always produce the
//! same request, and malformed optional input only ever widens the query.

use serde_json::{json, Value};
use std::collections::BTreeMap;

use super::dsl::{BoolQuery, Clause, Highlight, HighlightField, RangeBound, SearchRequest};
use crate::models::QuerySpec;

pub const FRAGMENT_SIZE: usize = 500;
pub const NUMBER_OF_FRAGMENTS: usize = 50;
pub const PHRASE_LIMIT: usize = 1024;
pub const FULL_FILE_FRAGMENT_SIZE: usize = 10 * 1024 * 1024;
pub const LARGE_FILE_SIZE_BYTES: u64 = 50_000_000;
pub const MAX_TAGS_TO_RETRIEVE_IN_AGG: usize = 50;
const TREE_BUCKETS: usize = 200;
/// `(name, type)` buckets fetched per page when counting every indexed tag.
pub const TAG_COUNT_PAGE_SIZE: usize = 1000;

const PROCESSED_STATE: &str = "processed";
const CONTENT_FIELDS: [&str; 4] = [
    "content.text",
    "content.author.analyzed",
    "meta.source_id.analyzed",
    "meta.full_name.analyzed",
];
const METADATA_HIGHLIGHT_FIELDS: [&str; 6] = [
    "content.author",
    "content.author.analyzed",
    "meta.full_name",
    "meta.source_id",
    "meta.full_name.analyzed",
    "meta.source_id.analyzed",
];

/// A keyword field together with its tokenized twin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextField {
    pub raw: &'static str,
    pub analyzed: &'static str,
}

pub const FULL_NAME: TextField = TextField {
    raw: "meta.full_name",
    analyzed: "meta.full_name.analyzed",
};
pub const AUTHOR: TextField = TextField {
    raw: "content.author",
    analyzed: "content.author.analyzed",
};
pub const SOURCE_ID: TextField = TextField {
    raw: "meta.source_id",
    analyzed: "meta.source_id.analyzed",
};

/// How a user term is matched against a [`TextField`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStrategy {
    /// Term carries `*` or `?`: lowercase it and match the raw field.
    Wildcard,
    /// Anything else: full-text match on the analyzed field.
    Analyzed,
}

impl MatchStrategy {
    pub fn for_term(term: &str) -> Self {
        if term.contains(['*', '?']) {
            MatchStrategy::Wildcard
        } else {
            MatchStrategy::Analyzed
        }
    }

    pub fn clause(self, field: TextField, term: &str) -> Clause {
        match self {
            MatchStrategy::Wildcard => Clause::Wildcard {
                field: field.raw,
                pattern: term.to_lowercase(),
            },
            MatchStrategy::Analyzed => Clause::Match {
                field: field.analyzed,
                query: term.to_string(),
            },
        }
    }
}

fn term_clause(field: TextField, term: &str) -> Clause {
    MatchStrategy::for_term(term).clause(field, term)
}

/// Highlight policy, picked by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HighlightMode {
    /// Result pages: small files only, bounded content fragments.
    Listing,
    /// Large files only, no content highlighting at all.
    LargeFile,
    /// One fragment covering the whole document, no phrase limit.
    FullDocument,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContentHighlight {
    Bounded,
    Whole,
}

impl HighlightMode {
    fn content_highlight(self) -> Option<ContentHighlight> {
        match self {
            HighlightMode::Listing => Some(ContentHighlight::Bounded),
            HighlightMode::LargeFile => None,
            HighlightMode::FullDocument => Some(ContentHighlight::Whole),
        }
    }

    fn size_scope(self) -> Option<Clause> {
        match self {
            HighlightMode::Listing => Some(Clause::Range {
                field: "content.size",
                bound: RangeBound::Lt(json!(LARGE_FILE_SIZE_BYTES)),
            }),
            HighlightMode::LargeFile => Some(Clause::Range {
                field: "content.size",
                bound: RangeBound::Gte(json!(LARGE_FILE_SIZE_BYTES)),
            }),
            HighlightMode::FullDocument => None,
        }
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn non_blank_items(items: &[String]) -> impl Iterator<Item = &str> {
    items.iter().map(|s| s.trim()).filter(|s| !s.is_empty())
}

fn nested_tag(name: &str) -> Clause {
    Clause::Nested {
        path: "tags",
        query: Box::new(Clause::term("tags.name", name)),
    }
}

/// The free-text OR group, empty when there is no content term.
fn content_group(spec: &QuerySpec) -> Vec<Clause> {
    non_blank(&spec.content)
        .map(|content| {
            vec![Clause::SimpleQueryString {
                query: content.to_string(),
                fields: CONTENT_FIELDS.to_vec(),
            }]
        })
        .unwrap_or_default()
}

/// The filter list shared by every request variant.
fn must_clauses(spec: &QuerySpec, size_scope: Option<Clause>, file_id: Option<&str>) -> Vec<Clause> {
    let mut must = Vec::new();

    if let Some(file_id) = file_id.map(str::trim).filter(|id| !id.is_empty()) {
        must.push(Clause::term("file_id", file_id));
    }

    must.extend(size_scope);
    must.push(Clause::term("content.state", PROCESSED_STATE));

    if let Some(name) = non_blank(&spec.name) {
        must.push(term_clause(FULL_NAME, name));
    }

    if let Some(author) = non_blank(&spec.author) {
        must.push(term_clause(AUTHOR, author));
    }

    let sources: Vec<Clause> = non_blank_items(&spec.source)
        .map(|source| term_clause(SOURCE_ID, source))
        .collect();
    if !sources.is_empty() {
        must.push(Clause::Bool(BoolQuery::any_of(sources)));
    }

    if let Some(size) = spec.size {
        if let Some(gte) = size.gte {
            must.push(Clause::Range {
                field: "content.size",
                bound: RangeBound::Gte(json!(gte)),
            });
        }
        if let Some(lte) = size.lte {
            must.push(Clause::Range {
                field: "content.size",
                bound: RangeBound::Lte(json!(lte)),
            });
        }
    }

    if let Some(when) = &spec.when {
        if let Some(gte) = non_blank(&when.gte) {
            must.push(Clause::Range {
                field: "meta.updated_datetime",
                bound: RangeBound::Gte(json!(gte)),
            });
        }
        if let Some(lte) = non_blank(&when.lte) {
            must.push(Clause::Range {
                field: "meta.updated_datetime",
                bound: RangeBound::Lte(json!(lte)),
            });
        }
    }

    let required: Vec<Clause> = non_blank_items(&spec.tags).map(nested_tag).collect();
    let forbidden: Vec<Clause> = non_blank_items(&spec.not_tags).map(nested_tag).collect();
    if !required.is_empty() || !forbidden.is_empty() {
        must.push(Clause::Bool(BoolQuery {
            must: required,
            must_not: forbidden,
            ..Default::default()
        }));
    }

    let content = content_group(spec);
    if !content.is_empty() {
        must.push(Clause::Bool(BoolQuery::any_of(content)));
    }

    if spec.hidden_only {
        must.push(Clause::term("hidden", true));
    }
    if spec.visible_only {
        must.push(Clause::term("hidden", false));
    }

    must
}

fn metadata_highlight_field() -> HighlightField {
    HighlightField {
        pre_tags: Some(vec![String::new()]),
        post_tags: Some(vec![String::new()]),
        highlight_query: None,
        highlighter: None,
        fragment_size: FRAGMENT_SIZE,
        number_of_fragments: NUMBER_OF_FRAGMENTS,
        phrase_limit: None,
        no_match_size: None,
    }
}

fn highlight(spec: &QuerySpec, content: Option<ContentHighlight>) -> Highlight {
    let mut fields: BTreeMap<&'static str, HighlightField> = METADATA_HIGHLIGHT_FIELDS
        .iter()
        .map(|field| (*field, metadata_highlight_field()))
        .collect();

    if let Some(content) = content {
        let whole = content == ContentHighlight::Whole;
        let fragment_size = if whole { FULL_FILE_FRAGMENT_SIZE } else { FRAGMENT_SIZE };
        fields.insert(
            "content.text",
            HighlightField {
                pre_tags: None,
                post_tags: None,
                highlight_query: Some(Clause::Bool(BoolQuery::any_of(content_group(spec)))),
                highlighter: Some("fvh"),
                fragment_size,
                number_of_fragments: if whole { 1 } else { NUMBER_OF_FRAGMENTS },
                phrase_limit: (!whole).then_some(PHRASE_LIMIT),
                no_match_size: Some(fragment_size),
            },
        );
    }

    Highlight {
        order: "score",
        fields,
        require_field_match: true,
    }
}

fn paged_request(must: Vec<Clause>, from: usize, size: usize, highlight: Highlight) -> SearchRequest {
    SearchRequest {
        from,
        size,
        query: Some(Clause::Bool(BoolQuery {
            must,
            minimum_should_match: Some(0),
            ..Default::default()
        })),
        highlight: Some(highlight),
        aggs: None,
    }
}

fn aggregation_request(must: Vec<Clause>, aggs: Value) -> SearchRequest {
    SearchRequest {
        from: 0,
        size: 0,
        query: Some(Clause::Bool(BoolQuery {
            must,
            ..Default::default()
        })),
        highlight: None,
        aggs: Some(aggs),
    }
}

/// Compiles a result page request.
pub fn compile(spec: &QuerySpec, from: usize, size: usize, mode: HighlightMode) -> SearchRequest {
    let must = must_clauses(spec, mode.size_scope(), None);
    paged_request(must, from, size, highlight(spec, mode.content_highlight()))
}

/// Compiles a highlight lookup for a single file, regardless of its size.
pub fn compile_file_highlight(spec: &QuerySpec, file_id: &str, mode: HighlightMode) -> SearchRequest {
    let must = must_clauses(spec, None, Some(file_id));
    paged_request(must, 0, 1, highlight(spec, mode.content_highlight()))
}

/// Compiles the folder-tree variant: no hits, one bucket per path segment.
pub fn compile_tree(spec: &QuerySpec) -> SearchRequest {
    let first = |field: &str| json!({ "terms": { "field": field, "size": 1 } });
    aggregation_request(
        must_clauses(spec, None, None),
        json!({
            "full_name_parts": {
                "terms": { "field": "meta.full_name_parts", "size": TREE_BUCKETS },
                "aggs": {
                    "file_id": first("file_id"),
                    "thumb_available": first("content.thumb_available"),
                    "content_type": first("content.type"),
                    "sha256": first("sha256"),
                }
            }
        }),
    )
}

/// Compiles the per-query statistics variant.
pub fn compile_stats(spec: &QuerySpec, max_tags: Option<usize>) -> SearchRequest {
    aggregation_request(
        must_clauses(spec, None, None),
        json!({
            "extensions": {
                "terms": { "field": "meta.extension" },
                "aggs": { "size": { "stats": { "field": "content.size" } } }
            },
            "summary": { "stats": { "field": "content.size" } },
            "tags": {
                "nested": { "path": "tags" },
                "aggs": {
                    "names": {
                        "terms": {
                            "field": "tags.name",
                            "size": max_tags.unwrap_or(MAX_TAGS_TO_RETRIEVE_IN_AGG),
                        },
                        "aggs": { "types": { "terms": { "field": "tags.type", "size": 1 } } }
                    }
                }
            }
        }),
    )
}

/// One page of tag name × type counts over the whole index, used to hydrate
/// the tag cache. Pass the previous page's `after_key` to continue.
pub fn tags_stats_request(after: Option<&Value>) -> SearchRequest {
    let mut composite = json!({
        "size": TAG_COUNT_PAGE_SIZE,
        "sources": [
            { "name": { "terms": { "field": "tags.name" } } },
            { "type": { "terms": { "field": "tags.type" } } }
        ]
    });
    if let Some(after) = after {
        composite["after"] = after.clone();
    }
    SearchRequest {
        from: 0,
        size: 0,
        query: None,
        highlight: None,
        aggs: Some(json!({
            "tags": {
                "nested": { "path": "tags" },
                "aggs": { "tags": { "composite": composite } }
            }
        })),
    }
}

/// Dashboard aggregations consumed by the stats projector.
pub fn dashboard_stats_request() -> SearchRequest {
    SearchRequest {
        from: 0,
        size: 0,
        query: None,
        highlight: None,
        aggs: Some(json!({
            "content_type": {
                "terms": { "field": "content.type" },
                "aggs": { "size": { "stats": { "field": "content.size" } } }
            },
            "proc_rate": {
                "date_histogram": { "field": "indexed_datetime", "calendar_interval": "day" },
                "aggs": { "source": { "terms": { "field": "meta.source_id" } } }
            },
            "proc_total": { "stats": { "field": "content.size" } }
        })),
    }
}

/// Indexed-volume histograms by hour, day and month, newest first.
pub fn processing_stats_request() -> SearchRequest {
    let histogram = |interval: &str, format: &str| {
        json!({
            "date_histogram": {
                "field": "indexed_datetime",
                "calendar_interval": interval,
                "format": format,
                "order": { "_key": "desc" }
            },
            "aggs": { "size": { "sum": { "field": "content.size" } } }
        })
    };
    SearchRequest {
        from: 0,
        size: 0,
        query: None,
        highlight: None,
        aggs: Some(json!({
            "hours": histogram("hour", "HH dd.MM.yyyy"),
            "days": histogram("day", "dd.MM.yyyy"),
            "months": histogram("month", "MM.yyyy"),
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SizeRange, TimeRange};
    use pretty_assertions::assert_eq;

    fn processed() -> Clause {
        Clause::term("content.state", "processed")
    }

    fn spec_with_name(name: &str) -> QuerySpec {
        QuerySpec {
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_match_strategy_tie_break() {
        assert_eq!(MatchStrategy::for_term("report*"), MatchStrategy::Wildcard);
        assert_eq!(MatchStrategy::for_term("rep?rt"), MatchStrategy::Wildcard);
        assert_eq!(MatchStrategy::for_term("report"), MatchStrategy::Analyzed);
    }

    #[test]
    fn test_wildcard_name_targets_raw_field() {
        let req = compile(&spec_with_name("Report*"), 0, 10, HighlightMode::Listing);
        assert!(req.must().contains(&Clause::Wildcard {
            field: "meta.full_name",
            pattern: "report*".into(),
        }));
    }

    #[test]
    fn test_plain_name_targets_analyzed_field() {
        let req = compile(&spec_with_name("report"), 0, 10, HighlightMode::Listing);
        assert!(req.must().contains(&Clause::Match {
            field: "meta.full_name.analyzed",
            query: "report".into(),
        }));
        assert!(!req.must().iter().any(|c| matches!(c, Clause::Wildcard { .. })));
    }

    #[test]
    fn test_processed_filter_always_present() {
        for mode in [HighlightMode::Listing, HighlightMode::LargeFile, HighlightMode::FullDocument] {
            let req = compile(&QuerySpec::default(), 0, 10, mode);
            assert!(req.must().contains(&processed()));
        }
        assert!(compile_tree(&QuerySpec::default()).must().contains(&processed()));
        assert!(compile_stats(&QuerySpec::default(), None).must().contains(&processed()));
        assert!(compile_file_highlight(&QuerySpec::default(), "abc", HighlightMode::Listing)
            .must()
            .contains(&processed()));
    }

    #[test]
    fn test_compile_is_deterministic() {
        let spec = QuerySpec {
            content: Some("budget".into()),
            source: vec!["a*".into(), "b".into()],
            tags: vec!["x".into()],
            size: Some(SizeRange {
                gte: Some(1),
                lte: Some(100),
            }),
            ..Default::default()
        };
        let a = compile(&spec, 10, 20, HighlightMode::Listing);
        let b = compile(&spec, 10, 20, HighlightMode::Listing);
        assert_eq!(a, b);
        assert_eq!(a.to_json(), b.to_json());
    }

    #[test]
    fn test_tags_and_not_tags_combine() {
        let spec = QuerySpec {
            tags: vec!["invoice".into()],
            not_tags: vec!["draft".into()],
            ..Default::default()
        };
        let req = compile(&spec, 0, 10, HighlightMode::Listing);
        let tag_clause = Clause::Bool(BoolQuery {
            must: vec![nested_tag("invoice")],
            must_not: vec![nested_tag("draft")],
            ..Default::default()
        });
        assert!(req.must().contains(&tag_clause));
    }

    #[test]
    fn test_blank_fields_add_nothing() {
        let spec = QuerySpec {
            content: Some("   ".into()),
            name: Some(String::new()),
            author: Some(" ".into()),
            source: vec![" ".into()],
            tags: vec![],
            not_tags: vec![],
            when: Some(TimeRange::default()),
            size: Some(SizeRange::default()),
            ..Default::default()
        };
        let req = compile(&spec, 0, 10, HighlightMode::FullDocument);
        assert_eq!(req.must(), &[processed()]);
    }

    #[test]
    fn test_ranges_are_independent_clauses() {
        let spec = QuerySpec {
            size: Some(SizeRange {
                gte: Some(1024),
                lte: Some(4096),
            }),
            when: Some(TimeRange {
                gte: Some("2024-01-01 00:00:00.000".into()),
                lte: None,
            }),
            ..Default::default()
        };
        let req = compile(&spec, 0, 10, HighlightMode::FullDocument);
        assert!(req.must().contains(&Clause::Range {
            field: "content.size",
            bound: RangeBound::Gte(json!(1024)),
        }));
        assert!(req.must().contains(&Clause::Range {
            field: "content.size",
            bound: RangeBound::Lte(json!(4096)),
        }));
        assert!(req.must().contains(&Clause::Range {
            field: "meta.updated_datetime",
            bound: RangeBound::Gte(json!("2024-01-01 00:00:00.000")),
        }));
        assert_eq!(req.must().len(), 4);
    }

    #[test]
    fn test_hidden_flags_are_not_exclusive() {
        let spec = QuerySpec {
            hidden_only: true,
            visible_only: true,
            ..Default::default()
        };
        let req = compile(&spec, 0, 10, HighlightMode::FullDocument);
        assert!(req.must().contains(&Clause::term("hidden", true)));
        assert!(req.must().contains(&Clause::term("hidden", false)));
    }

    #[test]
    fn test_listing_mode_bounds_fragments() {
        let spec = QuerySpec {
            content: Some("john".into()),
            ..Default::default()
        };
        let req = compile(&spec, 0, 10, HighlightMode::Listing);
        let text = &req.highlight.as_ref().unwrap().fields["content.text"];
        assert_eq!(text.fragment_size, FRAGMENT_SIZE);
        assert_eq!(text.number_of_fragments, NUMBER_OF_FRAGMENTS);
        assert_eq!(text.phrase_limit, Some(PHRASE_LIMIT));
        assert!(req.must().contains(&Clause::Range {
            field: "content.size",
            bound: RangeBound::Lt(json!(LARGE_FILE_SIZE_BYTES)),
        }));
    }

    #[test]
    fn test_large_file_mode_skips_content_highlight() {
        let spec = QuerySpec {
            content: Some("john".into()),
            ..Default::default()
        };
        let req = compile(&spec, 0, 10, HighlightMode::LargeFile);
        let fields = &req.highlight.as_ref().unwrap().fields;
        assert!(!fields.contains_key("content.text"));
        assert_eq!(fields.len(), METADATA_HIGHLIGHT_FIELDS.len());
        assert!(req.must().contains(&Clause::Range {
            field: "content.size",
            bound: RangeBound::Gte(json!(LARGE_FILE_SIZE_BYTES)),
        }));
    }

    #[test]
    fn test_full_document_mode_single_fragment() {
        let spec = QuerySpec {
            content: Some("john".into()),
            ..Default::default()
        };
        let req = compile_file_highlight(&spec, "f1", HighlightMode::FullDocument);
        assert_eq!((req.from, req.size), (0, 1));
        assert!(req.must().contains(&Clause::term("file_id", "f1")));

        let json = req.to_json();
        let text = &json["highlight"]["fields"]["content.text"];
        assert_eq!(text["number_of_fragments"], json!(1));
        assert_eq!(text["fragment_size"], json!(FULL_FILE_FRAGMENT_SIZE));
        assert!(text.get("phrase_limit").is_none());
    }

    #[test]
    fn test_tree_request_shape() {
        let json = compile_tree(&QuerySpec::default()).to_json();
        assert_eq!(json["size"], json!(0));
        assert!(json.get("highlight").is_none());
        let parts = &json["aggs"]["full_name_parts"];
        assert_eq!(parts["terms"]["field"], json!("meta.full_name_parts"));
        for sub in ["file_id", "thumb_available", "content_type", "sha256"] {
            assert_eq!(parts["aggs"][sub]["terms"]["size"], json!(1));
        }
    }

    #[test]
    fn test_stats_request_tag_cardinality() {
        let json = compile_stats(&QuerySpec::default(), None).to_json();
        assert_eq!(json["aggs"]["tags"]["aggs"]["names"]["terms"]["size"], json!(50));

        let json = compile_stats(&QuerySpec::default(), Some(10_000)).to_json();
        assert_eq!(json["aggs"]["tags"]["aggs"]["names"]["terms"]["size"], json!(10_000));
        assert!(json["aggs"]["summary"]["stats"].is_object());
    }

    #[test]
    fn test_end_to_end_scenario() {
        let spec = QuerySpec {
            content: Some("invoice".into()),
            source: vec!["acct-sys".into()],
            tags: vec!["urgent".into()],
            ..Default::default()
        };
        let req = compile(&spec, 0, 10, HighlightMode::FullDocument);
        let must = req.must();

        assert!(must.contains(&processed()));
        assert!(must.contains(&Clause::Bool(BoolQuery::any_of(vec![Clause::Match {
            field: "meta.source_id.analyzed",
            query: "acct-sys".into(),
        }]))));
        assert!(must.contains(&Clause::Bool(BoolQuery {
            must: vec![nested_tag("urgent")],
            ..Default::default()
        })));

        let json = req.to_json();
        let content_group = json["query"]["bool"]["must"]
            .as_array()
            .unwrap()
            .iter()
            .find(|c| c["bool"]["should"][0].get("simple_query_string").is_some())
            .unwrap();
        assert_eq!(content_group["bool"]["minimum_should_match"], json!(1));
        assert_eq!(
            content_group["bool"]["should"][0]["simple_query_string"]["fields"],
            json!(CONTENT_FIELDS)
        );
        assert_eq!(must.len(), 4);
    }

    #[test]
    fn test_tag_counts_request_pages_through_every_tag() {
        let json = tags_stats_request(None).to_json();
        let composite = &json["aggs"]["tags"]["aggs"]["tags"]["composite"];
        assert_eq!(json["aggs"]["tags"]["nested"]["path"], json!("tags"));
        assert_eq!(composite["size"], json!(TAG_COUNT_PAGE_SIZE));
        assert_eq!(composite["sources"][0]["name"]["terms"]["field"], json!("tags.name"));
        assert_eq!(composite["sources"][1]["type"]["terms"]["field"], json!("tags.type"));
        assert!(composite.get("after").is_none());
        assert_eq!(json["size"], json!(0));

        let after = json!({ "name": "pdf", "type": "auto" });
        let json = tags_stats_request(Some(&after)).to_json();
        assert_eq!(json["aggs"]["tags"]["aggs"]["tags"]["composite"]["after"], after);
    }
}
