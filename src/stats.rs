//! Dashboard statistics.
//!
//! Reshapes the sparse aggregation buckets of the dashboard request into a
//! dense, zero-filled series the UI can plot directly.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub const DAYS_SPAN: i64 = 30;
pub const MIN_THRESHOLD_CONTENT_TYPE: f64 = 0.05;

#[derive(Debug, Deserialize)]
struct Buckets<T> {
    #[serde(default = "Vec::new")]
    buckets: Vec<T>,
}

impl<T> Default for Buckets<T> {
    fn default() -> Self {
        Self { buckets: Vec::new() }
    }
}

#[derive(Debug, Deserialize)]
struct KeyCount {
    key: String,
    #[serde(default)]
    doc_count: u64,
}

#[derive(Debug, Deserialize)]
struct ContentTypeBucket {
    key: String,
    #[serde(default)]
    doc_count: u64,
    #[serde(default)]
    size: Value,
}

#[derive(Debug, Deserialize)]
struct DateBucket {
    key: i64,
    #[serde(default)]
    source: Buckets<KeyCount>,
}

#[derive(Debug, Default, Deserialize)]
struct StatsAggregation {
    #[serde(default)]
    count: u64,
    sum: Option<f64>,
    avg: Option<f64>,
    min: Option<f64>,
    max: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct DashboardAggregations {
    #[serde(default)]
    content_type: Buckets<ContentTypeBucket>,
    #[serde(default)]
    proc_rate: Buckets<DateBucket>,
    #[serde(default)]
    proc_total: StatsAggregation,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentTypeItem {
    pub name: String,
    pub value: u64,
    pub size_data_in_bytes: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentTypeStats {
    pub total: u64,
    pub min_threshold: f64,
    pub data: Vec<ContentTypeItem>,
}

/// One calendar day with a count for every known source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayEntry {
    pub date: String,
    #[serde(flatten)]
    pub counts: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcRate {
    pub data: Vec<DayEntry>,
    pub names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SizeSummary {
    pub sum: Option<f64>,
    pub avg: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcTotal {
    pub total_count: u64,
    pub size_data_in_bytes: SizeSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSeries {
    pub content_type: ContentTypeStats,
    pub proc_rate: ProcRate,
    pub proc_total: ProcTotal,
}

fn content_type_stats(buckets: Vec<ContentTypeBucket>) -> ContentTypeStats {
    let total: u64 = buckets.iter().map(|b| b.doc_count).sum();
    ContentTypeStats {
        total,
        min_threshold: MIN_THRESHOLD_CONTENT_TYPE * total as f64,
        data: buckets
            .into_iter()
            .map(|b| ContentTypeItem {
                name: b.key,
                value: b.doc_count,
                size_data_in_bytes: b.size,
            })
            .collect(),
    }
}

fn bucket_day(bucket: &DateBucket) -> Option<NaiveDate> {
    DateTime::<Utc>::from_timestamp_millis(bucket.key).map(|t| t.date_naive())
}

/// Key of the day in a flattened `DayEntry`; no source may share it.
const DATE_FIELD: &str = "date";

fn proc_rate(buckets: &[DateBucket], today: NaiveDate) -> ProcRate {
    let mut names: Vec<String> = Vec::new();
    for name in buckets.iter().flat_map(|b| &b.source.buckets).map(|s| &s.key) {
        if name == DATE_FIELD {
            tracing::warn!("Dropping source named '{}' from the processing rate", DATE_FIELD);
            continue;
        }
        if !names.contains(name) {
            names.push(name.clone());
        }
    }

    let data = (0..DAYS_SPAN)
        .rev()
        .map(|offset| today - Duration::days(offset))
        .map(|day| {
            let bucket = buckets.iter().find(|b| bucket_day(b) == Some(day));
            let counts = names
                .iter()
                .map(|name| {
                    let count = bucket
                        .and_then(|b| b.source.buckets.iter().find(|s| &s.key == name))
                        .map_or(0, |s| s.doc_count);
                    (name.clone(), count)
                })
                .collect();
            DayEntry {
                date: day.format("%Y-%m-%d").to_string(),
                counts,
            }
        })
        .collect();

    ProcRate { data, names }
}

/// Projects the dashboard aggregations onto the 30 days ending on `today`.
/// Missing or malformed aggregations yield empty, zero-filled sections.
pub fn project(aggregations: &Value, today: NaiveDate) -> StatsSeries {
    let aggs: DashboardAggregations = serde_json::from_value(aggregations.clone()).unwrap_or_else(|err| {
        tracing::warn!("Unexpected dashboard aggregation shape: {}", err);
        DashboardAggregations::default()
    });

    let total = aggs.proc_total;
    StatsSeries {
        content_type: content_type_stats(aggs.content_type.buckets),
        proc_rate: proc_rate(&aggs.proc_rate.buckets, today),
        proc_total: ProcTotal {
            total_count: total.count,
            size_data_in_bytes: SizeSummary {
                sum: total.sum,
                avg: total.avg,
                min: total.min,
                max: total.max,
            },
        },
    }
}

pub fn project_now(aggregations: &Value) -> StatsSeries {
    project(aggregations, Utc::now().date_naive())
}

#[derive(Debug, Deserialize)]
struct SumValue {
    value: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct HistogramBucket {
    #[serde(default)]
    key_as_string: Option<String>,
    #[serde(default)]
    doc_count: u64,
    size: Option<SumValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingBucket {
    pub period: String,
    pub files_count: u64,
    pub size_in_bytes: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessingStats {
    pub hours: Vec<ProcessingBucket>,
    pub days: Vec<ProcessingBucket>,
    pub months: Vec<ProcessingBucket>,
}

/// Flattens the hour/day/month histograms of the processing request.
pub fn project_processing(aggregations: &Value) -> ProcessingStats {
    let series = |name: &str| -> Vec<ProcessingBucket> {
        let buckets: Buckets<HistogramBucket> =
            serde_json::from_value(aggregations[name].clone()).unwrap_or_default();
        buckets
            .buckets
            .into_iter()
            .map(|b| ProcessingBucket {
                period: b.key_as_string.unwrap_or_default(),
                files_count: b.doc_count,
                size_in_bytes: b.size.and_then(|s| s.value).unwrap_or(0.0),
            })
            .collect()
    };

    ProcessingStats {
        hours: series("hours"),
        days: series("days"),
        months: series("months"),
    }
}
