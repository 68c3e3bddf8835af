//! Elasticsearch REST client.
//!
//! Search goes through `_search`; every write (tags, hidden flag) is an
//! `_update_by_query` keyed on `file_id` so callers never need the internal
//! document id.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;

use super::{FileVisibility, SearchBackend, TagAggregator, TagChange, TagMutator};
use crate::error::{ProviderError, ProviderResult};
use crate::models::{FileHit, SearchResponse, Tag, TagCountEntry, TagType};
use crate::query::compiler::{tags_stats_request, TAG_COUNT_PAGE_SIZE};
use crate::query::SearchRequest;

const ADD_TAG_SCRIPT: &str = "\
if (ctx._source.tags == null) { ctx._source.tags = []; } \
for (t in ctx._source.tags) { \
  if (t.type == params.tag.type && t.name == params.tag.name) { ctx.op = 'noop'; return; } \
} \
ctx._source.tags.add(params.tag);";

const REMOVE_TAG_SCRIPT: &str = "\
if (ctx._source.tags == null || !ctx._source.tags.removeIf(t -> t.type == params.tag.type && t.name == params.tag.name)) { \
  ctx.op = 'noop'; \
}";

const SET_HIDDEN_SCRIPT: &str = "ctx._source.hidden = params.hidden;";

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EsTotal {
    Count(u64),
    Object { value: u64 },
}

impl EsTotal {
    fn value(&self) -> u64 {
        match self {
            EsTotal::Count(v) | EsTotal::Object { value: v } => *v,
        }
    }
}

#[derive(Debug, Deserialize)]
struct EsHit {
    #[serde(rename = "_score")]
    score: Option<f64>,
    #[serde(rename = "_source")]
    source: FileHit,
    #[serde(default)]
    highlight: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct EsHits {
    total: EsTotal,
    #[serde(default)]
    hits: Vec<EsHit>,
}

#[derive(Debug, Deserialize)]
struct EsSearchResponse {
    hits: EsHits,
    #[serde(default)]
    aggregations: Value,
}

#[derive(Debug, Deserialize)]
struct UpdateByQueryResponse {
    #[serde(default)]
    total: u64,
    #[serde(default)]
    updated: u64,
}

impl EsHit {
    fn into_file_hit(self) -> FileHit {
        let mut hit = self.source;
        hit.score = self.score;
        if !self.highlight.is_empty() {
            let highlight = self
                .highlight
                .into_iter()
                .map(|(field, fragments)| {
                    let field = if field == "content.text" { "text".to_string() } else { field };
                    (field, fragments)
                })
                .collect();
            hit.content.highlight = Some(highlight);
        }
        hit
    }
}

/// One page of the composite `tags.tags` aggregation.
#[derive(Debug, Default, PartialEq)]
pub struct TagCountPage {
    pub entries: Vec<TagCountEntry>,
    /// Raw buckets on the page, including ones that were skipped.
    pub bucket_count: usize,
    pub after_key: Option<Value>,
}

/// Reads one `(name, type)` entry per composite bucket.
pub fn tag_counts_from_aggregations(aggregations: &Value) -> TagCountPage {
    let composite = &aggregations["tags"]["tags"];
    let Some(buckets) = composite["buckets"].as_array() else {
        return TagCountPage::default();
    };

    let entries = buckets
        .iter()
        .filter_map(|bucket| {
            let name = bucket["key"]["name"].as_str()?;
            let tag_type: TagType = bucket["key"]["type"].as_str()?.parse().ok()?;
            let files_count = bucket["doc_count"].as_u64()?;
            (files_count > 0 && !name.is_empty()).then(|| TagCountEntry {
                name: name.to_string(),
                tag_type,
                files_count,
            })
        })
        .collect();

    TagCountPage {
        entries,
        bucket_count: buckets.len(),
        after_key: composite.get("after_key").filter(|key| !key.is_null()).cloned(),
    }
}

pub struct ElasticClient {
    http: reqwest::Client,
    base_url: String,
    index: String,
}

impl ElasticClient {
    pub fn new(base_url: &str, index: &str, timeout: Duration) -> ProviderResult<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            index: index.to_string(),
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.index, endpoint)
    }

    async fn post(&self, endpoint: &str, body: &Value) -> ProviderResult<Value> {
        let response = self.http.post(self.url(endpoint)).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Backend {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }

    async fn search_raw(&self, body: &Value) -> ProviderResult<SearchResponse> {
        let raw = self.post("_search", body).await?;
        let parsed: EsSearchResponse = serde_json::from_value(raw)?;
        Ok(SearchResponse {
            total: parsed.hits.total.value(),
            hits: parsed.hits.hits.into_iter().map(EsHit::into_file_hit).collect(),
            aggregations: parsed.aggregations,
        })
    }

    /// Runs a painless script against the document(s) with `file_id`.
    async fn update_file(&self, file_id: &str, script: &str, params: Value) -> ProviderResult<UpdateByQueryResponse> {
        let body = json!({
            "query": { "term": { "file_id": file_id } },
            "script": { "source": script, "lang": "painless", "params": params },
        });
        let raw = self.post("_update_by_query?refresh=true&conflicts=proceed", &body).await?;
        let response: UpdateByQueryResponse = serde_json::from_value(raw)?;
        if response.total == 0 {
            return Err(ProviderError::NotFound(format!("file {}", file_id)));
        }
        Ok(response)
    }

    async fn tag_script(&self, file_id: &str, tag: &Tag, script: &str) -> ProviderResult<TagChange> {
        let response = self.update_file(file_id, script, json!({ "tag": tag })).await?;
        Ok(if response.updated > 0 {
            TagChange::Applied
        } else {
            TagChange::Unchanged
        })
    }
}

#[async_trait]
impl SearchBackend for ElasticClient {
    async fn search(&self, request: &SearchRequest) -> ProviderResult<SearchResponse> {
        tracing::debug!("search request: {}", request.to_json());
        self.search_raw(&request.to_json()).await
    }

    async fn get_file(&self, file_id: &str) -> ProviderResult<Option<FileHit>> {
        let body = json!({
            "from": 0,
            "size": 1,
            "query": { "term": { "file_id": file_id } },
            "_source": { "excludes": ["content.text"] },
        });
        Ok(self.search_raw(&body).await?.hits.into_iter().next())
    }
}

#[async_trait]
impl TagAggregator for ElasticClient {
    async fn tag_stats(&self) -> ProviderResult<Vec<TagCountEntry>> {
        let mut entries = Vec::new();
        let mut after: Option<Value> = None;
        loop {
            let response = self.search(&tags_stats_request(after.as_ref())).await?;
            let page = tag_counts_from_aggregations(&response.aggregations);
            entries.extend(page.entries);
            match page.after_key {
                Some(key) if page.bucket_count >= TAG_COUNT_PAGE_SIZE => after = Some(key),
                _ => break,
            }
        }
        Ok(entries)
    }
}

#[async_trait]
impl TagMutator for ElasticClient {
    async fn add_tag(&self, file_id: &str, tag: &Tag) -> ProviderResult<TagChange> {
        self.tag_script(file_id, tag, ADD_TAG_SCRIPT).await
    }

    async fn remove_tag(&self, file_id: &str, tag: &Tag) -> ProviderResult<TagChange> {
        self.tag_script(file_id, tag, REMOVE_TAG_SCRIPT).await
    }
}

#[async_trait]
impl FileVisibility for ElasticClient {
    async fn hide(&self, file_id: &str) -> ProviderResult<()> {
        self.update_file(file_id, SET_HIDDEN_SCRIPT, json!({ "hidden": true })).await?;
        Ok(())
    }

    async fn unhide(&self, file_id: &str) -> ProviderResult<()> {
        self.update_file(file_id, SET_HIDDEN_SCRIPT, json!({ "hidden": false })).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::QuerySpec;
    use crate::query::{compile, HighlightMode};
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> ElasticClient {
        ElasticClient::new(&server.uri(), "files", Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_tag_counts_from_aggregations() {
        let aggs = json!({
            "tags": {
                "doc_count": 5,
                "tags": {
                    "after_key": { "name": "pdf", "type": "manual" },
                    "buckets": [
                        { "key": { "name": "odd", "type": "unknown" }, "doc_count": 1 },
                        { "key": { "name": "pdf", "type": "auto" }, "doc_count": 2 },
                        { "key": { "name": "pdf", "type": "manual" }, "doc_count": 1 }
                    ]
                }
            }
        });
        let page = tag_counts_from_aggregations(&aggs);
        assert_eq!(
            page.entries,
            vec![
                TagCountEntry {
                    name: "pdf".into(),
                    tag_type: TagType::Auto,
                    files_count: 2
                },
                TagCountEntry {
                    name: "pdf".into(),
                    tag_type: TagType::Manual,
                    files_count: 1
                },
            ]
        );
        assert_eq!(page.bucket_count, 3);
        assert_eq!(page.after_key, Some(json!({ "name": "pdf", "type": "manual" })));
        assert_eq!(tag_counts_from_aggregations(&json!({})), TagCountPage::default());
    }

    fn tag_bucket(i: usize) -> Value {
        json!({ "key": { "name": format!("tag{}", i), "type": "auto" }, "doc_count": 1 })
    }

    #[tokio::test]
    async fn test_tag_stats_follows_after_key_past_one_page() {
        let server = MockServer::start().await;
        let first: Vec<Value> = (0..TAG_COUNT_PAGE_SIZE).map(tag_bucket).collect();
        let last_key = json!({ "name": format!("tag{}", TAG_COUNT_PAGE_SIZE - 1), "type": "auto" });

        Mock::given(method("POST"))
            .and(path("/files/_search"))
            .and(body_partial_json(json!({
                "aggs": { "tags": { "aggs": { "tags": { "composite": { "after": last_key.clone() } } } } }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "hits": { "total": { "value": 0 }, "hits": [] },
                "aggregations": { "tags": { "tags": {
                    "after_key": { "name": "zz", "type": "manual" },
                    "buckets": [ { "key": { "name": "zz", "type": "manual" }, "doc_count": 4 } ]
                } } }
            })))
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/files/_search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "hits": { "total": { "value": 0 }, "hits": [] },
                "aggregations": { "tags": { "tags": { "after_key": last_key, "buckets": first } } }
            })))
            .with_priority(2)
            .mount(&server)
            .await;

        let tags = client(&server).tag_stats().await.unwrap();
        assert_eq!(tags.len(), TAG_COUNT_PAGE_SIZE + 1);
        assert_eq!(tags.last().unwrap().name, "zz");
        assert_eq!(tags.last().unwrap().files_count, 4);
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_search_parses_hits_and_highlight() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/files/_search"))
            .and(body_partial_json(json!({ "from": 0, "size": 10 })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "took": 3,
                "hits": {
                    "total": { "value": 1, "relation": "eq" },
                    "hits": [{
                        "_score": 1.5,
                        "_source": {
                            "file_id": "f1",
                            "sha256": "abc",
                            "meta": { "short_name": "a.pdf", "full_name": "//src/a.pdf", "source_id": "src" },
                            "content": { "size": 42, "type": "application/pdf", "state": "processed" },
                            "tags": [ { "type": "auto", "name": "pdf" } ],
                            "hidden": false
                        },
                        "highlight": { "content.text": ["hello"] }
                    }]
                }
            })))
            .mount(&server)
            .await;

        let spec = QuerySpec {
            content: Some("hello".into()),
            ..Default::default()
        };
        let response = client(&server)
            .search(&compile(&spec, 0, 10, HighlightMode::Listing))
            .await
            .unwrap();

        assert_eq!(response.total, 1);
        let hit = &response.hits[0];
        assert_eq!(hit.file_id, "f1");
        assert_eq!(hit.content.size, 42);
        assert_eq!(hit.score, Some(1.5));
        assert_eq!(hit.content.highlight.as_ref().unwrap()["text"], vec!["hello".to_string()]);
    }

    #[tokio::test]
    async fn test_backend_error_is_propagated() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/files/_search"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .mount(&server)
            .await;

        let err = client(&server).get_file("f1").await.unwrap_err();
        assert!(matches!(err, ProviderError::Backend { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_add_tag_reports_change() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/files/_update_by_query"))
            .and(body_partial_json(json!({
                "query": { "term": { "file_id": "f1" } },
                "script": { "params": { "tag": { "type": "manual", "name": "x" } } }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "total": 1, "updated": 1, "noops": 0 })))
            .mount(&server)
            .await;

        let tag = Tag::new(TagType::Manual, "x").unwrap();
        assert_eq!(client(&server).add_tag("f1", &tag).await.unwrap(), TagChange::Applied);
    }

    #[tokio::test]
    async fn test_unhide_unknown_file_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/files/_update_by_query"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "total": 0, "updated": 0 })))
            .mount(&server)
            .await;

        let err = client(&server).unhide("nope").await.unwrap_err();
        assert!(matches!(err, ProviderError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_hide_unknown_file_is_not_found_in_one_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/files/_update_by_query"))
            .and(body_partial_json(json!({ "script": { "params": { "hidden": true } } })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "total": 0, "updated": 0 })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/files/_search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "hits": { "total": 0, "hits": [] } })))
            .expect(0)
            .mount(&server)
            .await;

        let err = client(&server).hide("nope").await.unwrap_err();
        assert!(matches!(err, ProviderError::NotFound(_)));
    }
}
