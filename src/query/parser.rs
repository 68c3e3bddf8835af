//! User query string → [`QuerySpec`].
//!
//! Recognised tokens: `filename:`/`name:`, `author:`, `source:a,b`,
//! `tags:a,b`, `!tags:a,b`, `size>10M`, `size<1k`, `when:<period>` and
//! `show:removed|all`. Everything else is free text.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc};

use crate::models::{QuerySpec, SizeRange, TimeRange};

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

pub fn parse_query(query: &str) -> QuerySpec {
    parse_query_at(query, Utc::now())
}

/// Same as [`parse_query`] with `when:` periods resolved against `now`.
pub fn parse_query_at(query: &str, now: DateTime<Utc>) -> QuerySpec {
    let mut spec = QuerySpec {
        visible_only: true,
        ..Default::default()
    };
    let mut content: Vec<&str> = Vec::new();

    for token in query.split_whitespace() {
        let lower = token.to_lowercase();

        if let Some(value) = strip_key(token, &lower, &["filename:", "name:"]) {
            spec.name = Some(value.to_string());
        } else if let Some(value) = strip_key(token, &lower, &["author:"]) {
            spec.author = Some(value.to_string());
        } else if let Some(value) = strip_key(token, &lower, &["source:"]) {
            spec.source.extend(split_list(value, false));
        } else if let Some(value) = strip_key(token, &lower, &["!tags:", "-tags:"]) {
            spec.not_tags.extend(split_list(value, true));
        } else if let Some(value) = strip_key(token, &lower, &["tags:"]) {
            spec.tags.extend(split_list(value, true));
        } else if let Some(value) = strip_key(token, &lower, &["size>"]) {
            if let Some(bytes) = parse_size(value) {
                spec.size.get_or_insert_with(SizeRange::default).gte = Some(bytes);
            }
        } else if let Some(value) = strip_key(token, &lower, &["size<"]) {
            if let Some(bytes) = parse_size(value) {
                spec.size.get_or_insert_with(SizeRange::default).lte = Some(bytes);
            }
        } else if let Some(value) = strip_key(token, &lower, &["when:"]) {
            if let Some(range) = parse_period(value, now) {
                spec.when = Some(range);
            }
        } else if let Some(value) = strip_key(token, &lower, &["show:"]) {
            match value.to_lowercase().as_str() {
                "removed" => {
                    spec.hidden_only = true;
                    spec.visible_only = false;
                }
                "all" => {
                    spec.hidden_only = false;
                    spec.visible_only = false;
                }
                _ => {}
            }
        } else {
            content.push(token);
        }
    }

    let content = content.join(" ");
    if !content.is_empty() && content != "*" {
        spec.content = Some(content);
    }

    spec
}

/// Returns the original-case remainder of `token` after the first matching
/// key, comparing keys case-insensitively.
fn strip_key<'a>(token: &'a str, lower: &str, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find(|key| lower.starts_with(*key))
        .and_then(|key| token.get(key.len()..))
        .filter(|rest| !rest.is_empty())
}

fn split_list(value: &str, lowercase: bool) -> impl Iterator<Item = String> + '_ {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(move |item| {
            if lowercase {
                item.to_lowercase()
            } else {
                item.to_string()
            }
        })
}

/// `10`, `10k`, `1.5M`, `2gb` → bytes (binary multiples).
fn parse_size(value: &str) -> Option<u64> {
    let value = value.trim().to_lowercase();
    let value = value.strip_suffix('b').unwrap_or(&value);
    let (number, multiplier) = match value.chars().last()? {
        'k' => (&value[..value.len() - 1], 1024_f64),
        'm' => (&value[..value.len() - 1], 1024_f64 * 1024.0),
        'g' => (&value[..value.len() - 1], 1024_f64 * 1024.0 * 1024.0),
        _ => (value, 1.0),
    };
    let number: f64 = number.parse().ok()?;
    if !number.is_finite() || number < 0.0 {
        return None;
    }
    Some((number * multiplier).round() as u64)
}

fn format_start(day: NaiveDate) -> String {
    day.and_time(NaiveTime::MIN).format(DATETIME_FORMAT).to_string()
}

fn parse_period(value: &str, now: DateTime<Utc>) -> Option<TimeRange> {
    let today = now.date_naive();
    let start = match value.to_lowercase().as_str() {
        "today" => today,
        "yesterday" => {
            let yesterday = today - Duration::days(1);
            return Some(TimeRange {
                gte: Some(format_start(yesterday)),
                lte: Some(
                    (today.and_time(NaiveTime::MIN) - Duration::milliseconds(1))
                        .format(DATETIME_FORMAT)
                        .to_string(),
                ),
            });
        }
        "thisweek" => today - Duration::days(i64::from(today.weekday().num_days_from_monday())),
        "thismonth" => today.with_day(1)?,
        "thisyear" => NaiveDate::from_ymd_opt(today.year(), 1, 1)?,
        _ => return None,
    };
    Some(TimeRange {
        gte: Some(format_start(start)),
        lte: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn now() -> DateTime<Utc> {
        // Thursday
        Utc.with_ymd_and_hms(2024, 3, 14, 15, 30, 0).unwrap()
    }

    #[test]
    fn test_plain_text_becomes_content() {
        let spec = parse_query_at("quarterly budget", now());
        assert_eq!(spec.content.as_deref(), Some("quarterly budget"));
        assert!(spec.visible_only);
        assert!(!spec.hidden_only);
    }

    #[test]
    fn test_star_means_everything() {
        let spec = parse_query_at("*", now());
        assert_eq!(spec.content, None);
    }

    #[test]
    fn test_keyed_tokens() {
        let spec = parse_query_at(
            "invoice filename:Report*.pdf author:John source:acct-sys,Mail tags:Urgent,q1 !tags:draft",
            now(),
        );
        assert_eq!(spec.content.as_deref(), Some("invoice"));
        assert_eq!(spec.name.as_deref(), Some("Report*.pdf"));
        assert_eq!(spec.author.as_deref(), Some("John"));
        assert_eq!(spec.source, vec!["acct-sys".to_string(), "Mail".to_string()]);
        assert_eq!(spec.tags, vec!["urgent".to_string(), "q1".to_string()]);
        assert_eq!(spec.not_tags, vec!["draft".to_string()]);
    }

    #[test]
    fn test_size_bounds() {
        let spec = parse_query_at("size>1M size<2gb", now());
        assert_eq!(
            spec.size,
            Some(SizeRange {
                gte: Some(1024 * 1024),
                lte: Some(2 * 1024 * 1024 * 1024),
            })
        );
        assert_eq!(parse_size("10"), Some(10));
        assert_eq!(parse_size("1.5k"), Some(1536));
        assert_eq!(parse_size("lots"), None);
    }

    #[test]
    fn test_invalid_size_is_ignored() {
        let spec = parse_query_at("size>huge", now());
        assert_eq!(spec.size, None);
        assert_eq!(spec.content, None);
    }

    #[test]
    fn test_when_periods() {
        let spec = parse_query_at("when:thisweek", now());
        assert_eq!(spec.when.unwrap().gte.as_deref(), Some("2024-03-11 00:00:00.000"));

        let spec = parse_query_at("when:yesterday", now());
        let when = spec.when.unwrap();
        assert_eq!(when.gte.as_deref(), Some("2024-03-13 00:00:00.000"));
        assert_eq!(when.lte.as_deref(), Some("2024-03-13 23:59:59.999"));

        let spec = parse_query_at("when:thisyear", now());
        assert_eq!(spec.when.unwrap().gte.as_deref(), Some("2024-01-01 00:00:00.000"));

        assert_eq!(parse_query_at("when:someday", now()).when, None);
    }

    #[test]
    fn test_show_modes() {
        let spec = parse_query_at("show:removed", now());
        assert!(spec.hidden_only && !spec.visible_only);

        let spec = parse_query_at("show:all", now());
        assert!(!spec.hidden_only && !spec.visible_only);
    }
}
