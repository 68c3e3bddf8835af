use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

/// Inclusive byte-size bounds on `content.size`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeRange {
    pub gte: Option<u64>,
    pub lte: Option<u64>,
}

/// Inclusive bounds on `meta.updated_datetime`, already in the index's date format.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub gte: Option<String>,
    pub lte: Option<String>,
}

/// What the user asked for. Every field is optional; an absent, blank or
/// empty field adds no constraint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuerySpec {
    pub content: Option<String>,
    pub name: Option<String>,
    pub author: Option<String>,
    #[serde(default)]
    pub source: Vec<String>,
    pub size: Option<SizeRange>,
    pub when: Option<TimeRange>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub not_tags: Vec<String>,
    #[serde(default)]
    pub hidden_only: bool,
    #[serde(default)]
    pub visible_only: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagType {
    Auto,
    Source,
    Manual,
}

impl TagType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TagType::Auto => "auto",
            TagType::Source => "source",
            TagType::Manual => "manual",
        }
    }
}

impl fmt::Display for TagType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TagType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(TagType::Auto),
            "source" => Ok(TagType::Source),
            "manual" => Ok(TagType::Manual),
            other => Err(ValidationError::InvalidTagType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    #[serde(rename = "type")]
    pub tag_type: TagType,
    pub name: String,
}

impl Tag {
    /// Builds a tag with its name trimmed and lowercased.
    pub fn new(tag_type: TagType, name: &str) -> Result<Self, ValidationError> {
        let name = name.trim().to_lowercase();
        if name.is_empty() {
            return Err(ValidationError::MissingField("tagName"));
        }
        if name.contains(' ') {
            return Err(ValidationError::InvalidTagName(name));
        }
        Ok(Self { tag_type, name })
    }

    /// Field name of this tag inside the cached counts hash.
    pub fn cache_field(&self) -> String {
        format!("{} {}", self.tag_type, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagCountEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub tag_type: TagType,
    pub files_count: u64,
}

impl TagCountEntry {
    /// Parses one `"{type} {name}" -> count` row of the cache hash.
    pub fn from_cache_row(field: &str, value: &str) -> Option<Self> {
        let (tag_type, name) = field.split_once(' ')?;
        let tag_type = tag_type.parse().ok()?;
        let files_count = value.trim().parse::<i64>().ok()?;
        if files_count <= 0 {
            return None;
        }
        Some(Self {
            name: name.to_string(),
            tag_type,
            files_count: files_count as u64,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileMeta {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub short_name: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub source_id: String,
    #[serde(default)]
    pub extension: String,
    pub created_datetime: Option<String>,
    pub updated_datetime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_uri: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentInfo {
    #[serde(default)]
    pub size: u64,
    #[serde(rename = "type")]
    pub content_type: Option<String>,
    pub state: Option<String>,
    pub author: Option<String>,
    pub thumb_available: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub highlight: Option<BTreeMap<String, Vec<String>>>,
}

/// One indexed file as returned by the search backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileHit {
    pub file_id: String,
    pub sha256: Option<String>,
    #[serde(default)]
    pub meta: FileMeta,
    #[serde(default)]
    pub content: ContentInfo,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub total: u64,
    pub hits: Vec<FileHit>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub aggregations: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_type_parse_is_case_insensitive() {
        assert_eq!("Manual".parse::<TagType>().unwrap(), TagType::Manual);
        assert_eq!(" AUTO ".parse::<TagType>().unwrap(), TagType::Auto);
        assert!("user".parse::<TagType>().is_err());
    }

    #[test]
    fn test_tag_new_normalizes_name() {
        let tag = Tag::new(TagType::Manual, "  Invoice ").unwrap();
        assert_eq!(tag.name, "invoice");
        assert_eq!(tag.cache_field(), "manual invoice");
    }

    #[test]
    fn test_tag_new_rejects_blank_name() {
        assert!(Tag::new(TagType::Manual, "   ").is_err());
    }

    #[test]
    fn test_cache_row_parsing() {
        let entry = TagCountEntry::from_cache_row("source docs", "4").unwrap();
        assert_eq!(entry.tag_type, TagType::Source);
        assert_eq!(entry.name, "docs");
        assert_eq!(entry.files_count, 4);

        assert!(TagCountEntry::from_cache_row("source docs", "0").is_none());
        assert!(TagCountEntry::from_cache_row("nospace", "3").is_none());
        assert!(TagCountEntry::from_cache_row("weird docs", "3").is_none());
    }

    #[test]
    fn test_query_spec_deserializes_camel_case() {
        let spec: QuerySpec = serde_json::from_str(
            r#"{"content":"invoice","notTags":["draft"],"hiddenOnly":true}"#,
        )
        .unwrap();
        assert_eq!(spec.content.as_deref(), Some("invoice"));
        assert_eq!(spec.not_tags, vec!["draft".to_string()]);
        assert!(spec.hidden_only);
        assert!(spec.source.is_empty());
    }
}
