//! Comments embedded as JSON in the page's preloaded application state
//!
//! Pages rendered by a client-side app often ship their data as
//! `window.__PRELOADED_STATE__ = {...};`. Comments found there complement
//! the DOM: they fill in fields the markup lacks and cover comments that
//! were not rendered server-side.

use chrono::DateTime;
use scraper::Html;
use serde_json::Value;
use url::Url;

use super::images::resolve_image_url;

const MARKER: &str = "window.__PRELOADED_STATE__";

/// A comment as described by the embedded state, before normalization
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmbeddedComment {
    pub id: String,
    pub author: String,
    pub text: String,
    pub timestamp: String,
    /// `createdAtTs` in Unix seconds
    pub created_ts: Option<i64>,
    pub images: Vec<String>,
}

/// Extract every comment from every preloaded state blob in `html`
///
/// Malformed blobs are skipped.
pub fn extract(html: &str, base: &Url) -> Vec<EmbeddedComment> {
    let mut comments = Vec::new();
    for (pos, _) in html.match_indices(MARKER) {
        let Some(blob) = parse_blob(&html[pos + MARKER.len()..]) else {
            tracing::debug!("Skipping unparsable preloaded state at byte {}", pos);
            continue;
        };
        comments.extend(comments_from_state(&blob, base));
    }
    comments
}

/// Parse `= {...}` at the start of `rest`, ignoring whatever follows the value
fn parse_blob(rest: &str) -> Option<Value> {
    let rest = rest.trim_start().strip_prefix('=')?.trim_start();
    if !rest.starts_with('{') {
        return None;
    }
    serde_json::Deserializer::from_str(rest)
        .into_iter::<Value>()
        .next()?
        .ok()
}

fn comments_from_state(state: &Value, base: &Url) -> Vec<EmbeddedComment> {
    let Some(entities) = state.get("entities") else {
        return Vec::new();
    };
    let raw = entities
        .get("comments")
        .or_else(|| entities.get("comment"));

    let items: Vec<&Value> = match raw {
        Some(Value::Array(list)) => list.iter().collect(),
        Some(Value::Object(map)) => map.values().collect(),
        _ => return Vec::new(),
    };

    items
        .into_iter()
        .filter_map(|item| comment_from_value(item, base))
        .collect()
}

fn comment_from_value(raw: &Value, base: &Url) -> Option<EmbeddedComment> {
    let obj = raw.as_object()?;
    let id = first_string(raw, &["id", "commentId", "commentID"])?;

    let author = first_string(raw, &["authorName", "userName", "username", "name"])
        .or_else(|| {
            obj.get("user")
                .and_then(|user| first_string(user, &["name", "username", "displayName"]))
        })
        .unwrap_or_default();

    let text = ["content", "body", "text"]
        .iter()
        .find_map(|key| obj.get(*key).filter(|v| is_present(v)))
        .map(to_plain_text)
        .unwrap_or_default();

    let created_ts =
        first_string(raw, &["createdAtTs", "createdTs"]).and_then(|ts| ts.parse().ok());
    let timestamp = first_string(raw, &["createdAt", "timestamp", "dateCreated"])
        .or_else(|| {
            created_ts
                .and_then(|ts| DateTime::from_timestamp(ts, 0))
                .map(|dt| dt.to_rfc3339())
        })
        .unwrap_or_default();

    let mut images = Vec::new();
    for key in ["media", "sharedMedia", "attachments", "images"] {
        let Some(value) = obj.get(key).filter(|v| is_present(v)) else {
            continue;
        };
        let entries: Vec<&Value> = match value {
            Value::Array(list) => list.iter().collect(),
            Value::Object(map) => map.values().collect(),
            other => vec![other],
        };
        for entry in entries {
            let Some(candidate) = media_url(entry) else {
                continue;
            };
            if let Some(url) = resolve_image_url(base, &candidate)
                && !images.contains(&url)
            {
                images.push(url);
            }
        }
    }

    Some(EmbeddedComment {
        id,
        author,
        text,
        timestamp,
        created_ts,
        images,
    })
}

fn media_url(entry: &Value) -> Option<String> {
    match entry {
        Value::String(s) => Some(s.clone()),
        Value::Object(_) => first_string(entry, &["url", "src", "image", "imageUrl", "path"]),
        _ => None,
    }
}

/// First key whose value is a non-empty string or a number
fn first_string(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match value.get(*key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        _ => true,
    }
}

/// Reduce an HTML string (or a rich-text object wrapping one) to plain text
fn to_plain_text(value: &Value) -> String {
    let html = match value {
        Value::String(s) => s.clone(),
        Value::Object(_) => first_string(value, &["text", "body", "content", "html", "value"])
            .unwrap_or_else(|| value.to_string()),
        other => other.to_string(),
    };
    let fragment = Html::parse_fragment(&html);
    fragment
        .root_element()
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}
