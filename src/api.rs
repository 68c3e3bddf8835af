//! HTTP surface.
//!
//! Handlers validate input, hand the parsed query to the compiler and
//! providers, and shape the JSON the UI expects. Validation always happens
//! before any provider call.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use crate::codec::SecureUriCodec;
use crate::error::{ApiError, ValidationError};
use crate::models::{FileHit, QuerySpec, SearchResponse, Tag, TagCountEntry, TagType};
use crate::query::compiler::{dashboard_stats_request, processing_stats_request};
use crate::query::{compile, compile_file_highlight, compile_stats, compile_tree, parse_query, HighlightMode};
use crate::stats::{self, ProcessingStats, StatsSeries};
use crate::storage::{FileVisibility, SearchBackend};
use crate::tag_cache::TagCache;

pub const DEFAULT_PAGE: usize = 0;
pub const DEFAULT_SIZE: usize = 10;
pub const MAX_SIZE: usize = 200;
/// Deepest hit reachable by paging, matching the backend's result window.
pub const MAX_RESULT_WINDOW: usize = 10_000;
/// Tag buckets requested by the combined stats view.
pub const COMBINED_STATS_MAX_TAGS: usize = 10_000;

const UI_TAG_TYPES: &[TagType] = &[TagType::Manual];
const SERVICE_TAG_TYPES: &[TagType] = &[TagType::Auto, TagType::Source];

pub struct AppState {
    pub search: Arc<dyn SearchBackend>,
    pub visibility: Arc<dyn FileVisibility>,
    pub tags: TagCache,
    pub codec: SecureUriCodec,
    pub max_tags: usize,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/search", get(search))
        .route("/api/search/tree", get(search_tree))
        .route("/api/search/stats", get(search_stats))
        .route("/api/search/:file_id", get(file_highlight))
        .route("/api/search/:file_id/full", get(full_file_highlight))
        .route("/api/tags", get(get_tags))
        .route("/api/tags/cache", delete(flush_tag_cache))
        .route("/api/tags/service/:file_id/:tag_type/:tag_name", post(add_service_tag))
        .route("/api/tags/:file_id/:tag_type/:tag_name", post(add_tag).delete(remove_tag))
        .route("/api/files/hide/:file_id", put(hide_file))
        .route("/api/files/unhide/:file_id", put(unhide_file))
        .route("/api/files/:token", get(file_meta))
        .route("/api/stats", get(dashboard_stats))
        .route("/api/stats/combined", get(combined_stats))
        .route("/api/stats/processing", get(processing_stats))
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    pub query: Option<String>,
    pub page: Option<String>,
    pub size: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SearchResults {
    pub total: u64,
    pub hits: Vec<FileHit>,
    pub took: u64,
}

#[derive(Debug, Serialize)]
pub struct AggregationResults {
    pub total: u64,
    pub aggregations: Value,
    pub took: u64,
}

#[derive(Debug, Serialize)]
pub struct HighlightResults {
    pub highlight: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct TagList {
    pub tags: Vec<TagCountEntry>,
}

/// A validated result page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paging {
    pub page: usize,
    pub size: usize,
    /// Offset of the first hit on the page.
    pub from: usize,
}

/// Parses `page`/`size`, falling back to the defaults when absent.
pub fn paging(page: Option<&str>, size: Option<&str>) -> Result<Paging, ValidationError> {
    let page: usize = match page {
        None => DEFAULT_PAGE,
        Some(p) => p.trim().parse().map_err(|_| ValidationError::InvalidPage)?,
    };
    let size: usize = match size {
        None => DEFAULT_SIZE,
        Some(s) => s.trim().parse().map_err(|_| ValidationError::InvalidSize)?,
    };
    if !(1..=MAX_SIZE).contains(&size) {
        return Err(ValidationError::InvalidSize);
    }
    let from = page
        .checked_mul(size)
        .filter(|from| from.checked_add(size).is_some_and(|end| end <= MAX_RESULT_WINDOW))
        .ok_or(ValidationError::InvalidPage)?;
    Ok(Paging { page, size, from })
}

pub fn required_query(query: Option<&str>) -> Result<&str, ValidationError> {
    match query.map(str::trim) {
        Some(q) if !q.is_empty() => Ok(q),
        _ => Err(ValidationError::EmptyQuery),
    }
}

/// Builds a tag from path segments, accepting only the given types.
pub fn tag_from_path(tag_type: &str, tag_name: &str, allowed: &[TagType]) -> Result<Tag, ValidationError> {
    let tag_type: TagType = tag_type.parse()?;
    if !allowed.contains(&tag_type) {
        return Err(ValidationError::TagTypeNotAllowed(tag_type.to_string()));
    }
    Tag::new(tag_type, tag_name)
}

/// Interleaves the regular and large-file results by score and cuts out one
/// page. Each input must hold its class's top `from + size` hits.
pub fn merge_pages(listing: SearchResponse, large: SearchResponse, paging: Paging) -> (u64, Vec<FileHit>) {
    let total = listing.total + large.total;
    let mut hits: Vec<FileHit> = listing.hits.into_iter().chain(large.hits).collect();
    hits.sort_by(|a, b| b.score.unwrap_or(0.0).total_cmp(&a.score.unwrap_or(0.0)));
    let page = hits.into_iter().skip(paging.from).take(paging.size).collect();
    (total, page)
}

fn spec_of(query: Option<&str>) -> QuerySpec {
    parse_query(query.unwrap_or_default())
}

fn took(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

async fn search(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResults>, ApiError> {
    let paging = paging(params.page.as_deref(), params.size.as_deref())?;
    let spec = spec_of(params.query.as_deref());
    let started = Instant::now();

    // Either class may own any slot of the merged page, so both fetch every
    // hit up to its end.
    let depth = paging.from + paging.size;
    let listing = compile(&spec, 0, depth, HighlightMode::Listing);
    let large = compile(&spec, 0, depth, HighlightMode::LargeFile);
    let (listing, large) = tokio::try_join!(state.search.search(&listing), state.search.search(&large))?;

    let (total, mut hits) = merge_pages(listing, large, paging);
    for hit in &mut hits {
        hit.meta.download_uri = Some(state.codec.encode(&hit.file_id)?);
    }

    tracing::debug!("search page {} returned {} of {} hits", paging.page, hits.len(), total);
    Ok(Json(SearchResults {
        total,
        hits,
        took: took(started),
    }))
}

async fn search_tree(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> Result<Json<AggregationResults>, ApiError> {
    let started = Instant::now();
    let response = state.search.search(&compile_tree(&spec_of(params.query.as_deref()))).await?;
    Ok(Json(AggregationResults {
        total: response.total,
        aggregations: response.aggregations,
        took: took(started),
    }))
}

async fn search_stats(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> Result<Json<AggregationResults>, ApiError> {
    let spec = spec_of(params.query.as_deref());
    Ok(Json(stats_by_query(&state, &spec, state.max_tags).await?))
}

async fn stats_by_query(state: &AppState, spec: &QuerySpec, max_tags: usize) -> Result<AggregationResults, ApiError> {
    let started = Instant::now();
    let response = state.search.search(&compile_stats(spec, Some(max_tags))).await?;
    Ok(AggregationResults {
        total: response.total,
        aggregations: response.aggregations,
        took: took(started),
    })
}

async fn file_highlight(
    State(state): State<Arc<AppState>>,
    Path(file_id): Path<String>,
    Query(params): Query<SearchParams>,
) -> Result<Json<HighlightResults>, ApiError> {
    let query = required_query(params.query.as_deref())?;
    let request = compile_file_highlight(&parse_query(query), &file_id, HighlightMode::Listing);
    let response = state.search.search(&request).await?;

    let highlight = response
        .hits
        .into_iter()
        .next()
        .and_then(|hit| hit.content.highlight)
        .unwrap_or_else(|| BTreeMap::from([("text".to_string(), vec![String::new()])]));
    Ok(Json(HighlightResults { highlight }))
}

async fn full_file_highlight(
    State(state): State<Arc<AppState>>,
    Path(file_id): Path<String>,
    Query(params): Query<SearchParams>,
) -> Result<Json<FileHit>, ApiError> {
    let query = required_query(params.query.as_deref())?;
    let request = compile_file_highlight(&parse_query(query), &file_id, HighlightMode::FullDocument);
    let response = state.search.search(&request).await?;
    response
        .hits
        .into_iter()
        .next()
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("File {} not found", file_id)))
}

async fn get_tags(State(state): State<Arc<AppState>>) -> Result<Json<Vec<TagCountEntry>>, ApiError> {
    Ok(Json(state.tags.get_tags().await?))
}

async fn add_tag(
    State(state): State<Arc<AppState>>,
    Path((file_id, tag_type, tag_name)): Path<(String, String, String)>,
) -> Result<Json<TagList>, ApiError> {
    let tag = tag_from_path(&tag_type, &tag_name, UI_TAG_TYPES)?;
    let tags = state.tags.add_tag(&file_id, &tag).await?;
    tracing::info!("Tag '{}' added to {}", tag.cache_field(), file_id);
    Ok(Json(TagList { tags }))
}

async fn remove_tag(
    State(state): State<Arc<AppState>>,
    Path((file_id, tag_type, tag_name)): Path<(String, String, String)>,
) -> Result<Json<TagList>, ApiError> {
    let tag_type: TagType = tag_type.parse()?;
    let tag = Tag::new(tag_type, &tag_name)?;
    let tags = state.tags.remove_tag(&file_id, &tag).await?;
    tracing::info!("Tag '{}' removed from {}", tag.cache_field(), file_id);
    Ok(Json(TagList { tags }))
}

async fn add_service_tag(
    State(state): State<Arc<AppState>>,
    Path((file_id, tag_type, tag_name)): Path<(String, String, String)>,
) -> Result<StatusCode, ApiError> {
    let tag = tag_from_path(&tag_type, &tag_name, SERVICE_TAG_TYPES)?;
    state.tags.add_tag(&file_id, &tag).await?;
    Ok(StatusCode::OK)
}

async fn flush_tag_cache(State(state): State<Arc<AppState>>) -> Result<StatusCode, ApiError> {
    state.tags.flush().await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn file_meta(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Result<Json<FileHit>, ApiError> {
    let file_id = state.codec.decode(&token).map_err(|err| {
        tracing::warn!("Rejected download token: {}", err);
        err
    })?;
    let mut file = state
        .search
        .get_file(&file_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("File meta not found".to_string()))?;
    file.meta.download_uri = Some(token);
    Ok(Json(file))
}

async fn hide_file(
    State(state): State<Arc<AppState>>,
    Path(file_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.visibility.hide(&file_id).await?;
    tracing::info!("File {} hidden", file_id);
    Ok(StatusCode::OK)
}

async fn unhide_file(
    State(state): State<Arc<AppState>>,
    Path(file_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.visibility.unhide(&file_id).await?;
    tracing::info!("File {} unhidden", file_id);
    Ok(StatusCode::OK)
}

async fn dashboard_stats(State(state): State<Arc<AppState>>) -> Result<Json<StatsSeries>, ApiError> {
    let response = state.search.search(&dashboard_stats_request()).await?;
    Ok(Json(stats::project_now(&response.aggregations)))
}

/// Stats over every visible file, with a wide tag breakdown.
async fn combined_stats(State(state): State<Arc<AppState>>) -> Result<Json<AggregationResults>, ApiError> {
    Ok(Json(stats_by_query(&state, &parse_query("*"), COMBINED_STATS_MAX_TAGS).await?))
}

async fn processing_stats(State(state): State<Arc<AppState>>) -> Result<Json<ProcessingStats>, ApiError> {
    let response = state.search.search(&processing_stats_request()).await?;
    Ok(Json(stats::project_processing(&response.aggregations)))
}
