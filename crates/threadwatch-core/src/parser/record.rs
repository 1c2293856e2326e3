//! The structured unit extracted from the page

use chrono::DateTime;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// One comment's text and images
///
/// `id` is stable across polls of the same page and unique within one
/// parse result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommentRecord {
    /// Stable identifier (site id, or `h-<hash>` when the page has none)
    pub id: String,

    /// Display name of the author, empty when unknown
    pub author: String,

    /// Chronological hint derived from the id, if it is numeric
    pub sequence: Option<u64>,

    /// Timestamp as rendered by the page, empty when unknown
    pub timestamp: String,

    /// Creation time in Unix seconds, when the page states one
    pub created_ts: Option<i64>,

    /// Plain text with collapsed whitespace
    pub text: String,

    /// Absolute image URLs, deduplicated, in first-seen order
    pub images: Vec<String>,

    /// SHA-256 of the normalized text and image list
    pub content_hash: String,
}

impl CommentRecord {
    /// Build a record, deriving the sequence hint and content hash
    pub fn new(
        id: impl Into<String>,
        author: impl Into<String>,
        timestamp: impl Into<String>,
        text: impl Into<String>,
        images: Vec<String>,
    ) -> Self {
        let id = id.into();
        let text = text.into();
        let timestamp = timestamp.into();
        let content_hash = content_hash(&text, &images);
        Self {
            sequence: sequence_hint(&id),
            created_ts: created_ts_hint(&timestamp),
            id,
            author: author.into(),
            timestamp,
            text,
            images,
            content_hash,
        }
    }

    /// Override the creation time derived from `timestamp`
    pub fn with_created_ts(mut self, created_ts: Option<i64>) -> Self {
        if created_ts.is_some() {
            self.created_ts = created_ts;
        }
        self
    }

    /// Recompute the content hash after text or images changed
    pub(crate) fn rehash(&mut self) {
        self.content_hash = content_hash(&self.text, &self.images);
    }
}

/// Numeric value of an all-digit id, e.g. `4711` → 4711
///
/// Hash-derived ids never carry a sequence, even when they happen to end in
/// digits.
pub fn sequence_hint(id: &str) -> Option<u64> {
    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    id.parse().ok()
}

/// Unix seconds of an RFC 3339 timestamp or of a plain epoch number
pub fn created_ts_hint(timestamp: &str) -> Option<i64> {
    let timestamp = timestamp.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(timestamp) {
        return Some(parsed.timestamp());
    }
    if !timestamp.is_empty() && timestamp.bytes().all(|b| b.is_ascii_digit()) {
        return timestamp.parse().ok();
    }
    None
}

/// Hash of the whitespace-normalized text followed by the image URLs
pub fn content_hash(text: &str, images: &[String]) -> String {
    let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");

    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    for image in images {
        hasher.update(b"\n");
        hasher.update(image.as_bytes());
    }
    hex::encode(hasher.finalize())
}
