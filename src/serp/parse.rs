/// Result-set parsing: CSV (preferred) and JSON (fallback, e.g. video
/// searches that expose no CSV) into typed rows.
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use tracing::warn;

use crate::store::models::SerpKind;
use crate::util::domain::domain_of_url;
use crate::util::time::parse_published_date;

/// One parsed provider row, keyed by keyword text until the keyword id is
/// resolved at storage time.
#[derive(Debug, Clone)]
pub(crate) struct ParsedResult {
    pub(crate) keyword: String,
    pub(crate) location: String,
    #[allow(dead_code)]
    pub(crate) kind: SerpKind,
    pub(crate) position: i32,
    pub(crate) url: String,
    pub(crate) title: String,
    pub(crate) snippet: String,
    pub(crate) domain: String,
    pub(crate) source: Option<String>,
    pub(crate) published_date: Option<NaiveDate>,
    pub(crate) video_length: Option<String>,
    pub(crate) total_results: Option<i64>,
    pub(crate) device: Option<String>,
}

/// Strip the site filter appended to video queries.
fn clean_query(query: &str, kind: SerpKind) -> String {
    if kind == SerpKind::Video {
        query.replace(" site:youtube.com", "")
    } else {
        query.to_string()
    }
}

fn result_field<'a>(row: &'a csv::StringRecord, headers: &csv::StringRecord, names: &[String]) -> Option<&'a str> {
    for name in names {
        if let Some(idx) = headers.iter().position(|h| h == name) {
            let value = row.get(idx).unwrap_or("");
            if !value.is_empty() {
                return Some(value);
            }
        }
    }
    None
}

/// Parse one CSV result page.
pub(crate) fn parse_csv_page(content: &str, kind: SerpKind, now: DateTime<Utc>) -> Vec<ParsedResult> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(content.as_bytes());

    let headers = match reader.headers() {
        Ok(headers) => headers.clone(),
        Err(error) => {
            warn!(error = %error, "result CSV has no parseable header");
            return Vec::new();
        }
    };

    let prefix = format!("result.{}_results", kind.as_str());
    let field = |suffix: &str| -> Vec<String> {
        vec![format!("{prefix}.{suffix}"), suffix.to_string()]
    };

    let mut results = Vec::new();
    for row in reader.records() {
        let Ok(row) = row else { continue };

        let Some(keyword) = result_field(&row, &headers, &field("q"))
            .or_else(|| result_field(&row, &headers, &["search.q".to_string(), "search_query".to_string()]))
        else {
            continue;
        };
        let keyword = clean_query(keyword, kind);

        let Some(url) = result_field(&row, &headers, &field("link")) else {
            continue;
        };

        let position = result_field(&row, &headers, &field("position"))
            .and_then(|raw| raw.parse::<f64>().ok())
            .map(|v| v as i32)
            .unwrap_or((results.len() + 1) as i32);

        let published_date = result_field(&row, &headers, &field("date"))
            .and_then(|raw| parse_published_date(raw, now))
            .map(|dt| dt.date_naive());

        results.push(ParsedResult {
            keyword,
            location: result_field(&row, &headers, &["search.gl".to_string(), "gl".to_string(), "location".to_string()])
                .unwrap_or("US")
                .to_uppercase(),
            kind,
            position,
            url: url.to_string(),
            title: result_field(&row, &headers, &field("title"))
                .unwrap_or_default()
                .chars()
                .take(500)
                .collect(),
            snippet: result_field(&row, &headers, &field("snippet"))
                .unwrap_or_default()
                .to_string(),
            domain: result_field(&row, &headers, &field("domain"))
                .map(ToString::to_string)
                .unwrap_or_else(|| domain_of_url(url)),
            source: result_field(&row, &headers, &field("source")).map(ToString::to_string),
            published_date,
            video_length: result_field(&row, &headers, &field("length")).map(ToString::to_string),
            total_results: result_field(&row, &headers, &["search_information.total_results".to_string(), "total_results".to_string()])
                .and_then(|raw| raw.parse().ok()),
            device: result_field(&row, &headers, &["search.device".to_string(), "device".to_string()])
                .map(ToString::to_string),
        });
    }
    results
}

/// Parse one JSON result page: an array of `{result: {...}}` entries, each
/// carrying search parameters and a kind-specific result list.
pub(crate) fn parse_json_page(content: &str, kind: SerpKind, now: DateTime<Utc>) -> Vec<ParsedResult> {
    let parsed: Value = match serde_json::from_str(content) {
        Ok(value) => value,
        Err(error) => {
            warn!(error = %error, "result JSON page failed to parse");
            return Vec::new();
        }
    };

    let entries = match &parsed {
        Value::Array(entries) => entries.clone(),
        Value::Object(map) => map
            .get("searches")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default(),
        _ => Vec::new(),
    };

    let mut results = Vec::new();
    for entry in &entries {
        let search = entry.get("result").unwrap_or(entry);
        let params = search.get("search_parameters").cloned().unwrap_or(Value::Null);
        let info = search.get("search_information").cloned().unwrap_or(Value::Null);

        let Some(query) = params.get("q").and_then(Value::as_str) else {
            continue;
        };
        let keyword = clean_query(query, kind);
        let location = params
            .get("gl")
            .or_else(|| params.get("location"))
            .and_then(Value::as_str)
            .unwrap_or("US")
            .to_uppercase();
        let device = params
            .get("device")
            .and_then(Value::as_str)
            .map(ToString::to_string);
        let total_results = info.get("total_results").and_then(Value::as_i64);

        let list_key = format!("{}_results", kind.as_str());
        let items = search
            .get(&list_key)
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        for (index, item) in items.iter().enumerate() {
            let Some(url) = item.get("link").and_then(Value::as_str) else {
                continue;
            };

            let published_date = item
                .get("date")
                .and_then(Value::as_str)
                .and_then(|raw| parse_published_date(raw, now))
                .map(|dt| dt.date_naive());

            results.push(ParsedResult {
                keyword: keyword.clone(),
                location: location.clone(),
                kind,
                position: item
                    .get("position")
                    .and_then(Value::as_i64)
                    .map(|v| v as i32)
                    .unwrap_or((index + 1) as i32),
                url: url.to_string(),
                title: item
                    .get("title")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .chars()
                    .take(500)
                    .collect(),
                snippet: item
                    .get("snippet")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                domain: item
                    .get("domain")
                    .and_then(Value::as_str)
                    .map(ToString::to_string)
                    .unwrap_or_else(|| domain_of_url(url)),
                source: item
                    .get("source")
                    .and_then(Value::as_str)
                    .map(ToString::to_string),
                published_date,
                video_length: item
                    .get("length")
                    .and_then(Value::as_str)
                    .map(ToString::to_string),
                total_results,
                device: device.clone(),
            });
        }
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn csv_page_parses_organic_rows() {
        let csv = "\
search.q,search.gl,result.organic_results.position,result.organic_results.link,result.organic_results.title,result.organic_results.domain,result.organic_results.snippet
cloud storage,us,1,https://boxcloud.com/storage,Box Cloud,boxcloud.com,Secure storage
cloud storage,us,2,https://drivehub.io/plans,Drive Hub,drivehub.io,Plans and pricing
";
        let results = parse_csv_page(csv, SerpKind::Organic, now());

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].keyword, "cloud storage");
        assert_eq!(results[0].location, "US");
        assert_eq!(results[0].position, 1);
        assert_eq!(results[0].domain, "boxcloud.com");
        assert_eq!(results[1].url, "https://drivehub.io/plans");
    }

    #[test]
    fn csv_rows_without_link_are_skipped() {
        let csv = "\
search.q,result.organic_results.link
cloud storage,
cloud storage,https://a.com/x
";
        let results = parse_csv_page(csv, SerpKind::Organic, now());
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].url, "https://a.com/x");
    }

    #[test]
    fn csv_news_rows_normalize_relative_dates() {
        let csv = "\
search.q,result.news_results.link,result.news_results.source,result.news_results.date
fintech news,https://news.example.com/a,Example News,2 days ago
";
        let results = parse_csv_page(csv, SerpKind::News, now());
        assert_eq!(results.len(), 1);
        assert_eq!(
            results[0].published_date,
            Some(NaiveDate::from_ymd_opt(2026, 7, 13).unwrap())
        );
        assert_eq!(results[0].source.as_deref(), Some("Example News"));
    }

    #[test]
    fn json_page_parses_video_results_and_strips_site_filter() {
        let body = serde_json::json!([
            {"result": {
                "search_parameters": {"q": "crm demo site:youtube.com", "gl": "us", "device": "desktop"},
                "search_information": {"total_results": 1200},
                "video_results": [
                    {"position": 1, "link": "https://youtube.com/watch?v=abc",
                     "title": "CRM Demo", "domain": "youtube.com", "length": "10:02"}
                ]
            }}
        ])
        .to_string();

        let results = parse_json_page(&body, SerpKind::Video, now());
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].keyword, "crm demo");
        assert_eq!(results[0].video_length.as_deref(), Some("10:02"));
        assert_eq!(results[0].total_results, Some(1200));
    }

    #[test]
    fn json_page_missing_domain_falls_back_to_url_host() {
        let body = serde_json::json!([
            {"result": {
                "search_parameters": {"q": "crm", "gl": "uk"},
                "organic_results": [{"link": "https://www.vendor.io/page"}]
            }}
        ])
        .to_string();

        let results = parse_json_page(&body, SerpKind::Organic, now());
        assert_eq!(results[0].domain, "vendor.io");
        assert_eq!(results[0].location, "UK");
        assert_eq!(results[0].position, 1);
    }

    #[test]
    fn garbage_pages_parse_to_empty() {
        assert!(parse_json_page("not json", SerpKind::Organic, now()).is_empty());
        assert!(parse_csv_page("", SerpKind::Organic, now()).is_empty());
    }
}
