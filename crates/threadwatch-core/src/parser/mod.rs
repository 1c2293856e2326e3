//! Page parser
//!
//! Turns a fetched discussion page into an ordered list of [`CommentRecord`]s.
//! Parsing is a pure function of the document and the page URL: no I/O, no
//! state. A page that cannot be understood yields an empty list, never an
//! error; the engine never reads an empty list as "comments were deleted".
//!
//! ## Extraction
//!
//! 1. Comment nodes: `article[data-comment-id]`, else any `[data-comment-id]`,
//!    else `div.comment, li.comment`
//! 2. Per node: id, author, timestamp, text and images (see [`images`])
//! 3. Comments from the embedded `__PRELOADED_STATE__` blob fill gaps and
//!    add comments the markup does not render
//! 4. Ordering: by creation time when every record states one, else by
//!    numeric id when every id is numeric, document order otherwise

pub mod images;
pub mod preloaded;
pub mod record;

pub use images::{ImageCollector, ImageRule};
pub use record::CommentRecord;

use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;
use std::sync::LazyLock;
use url::Url;

use crate::error::{Error, Result};

static SEL_COMMENT_NODES: LazyLock<[Selector; 3]> = LazyLock::new(|| {
    [
        Selector::parse("article[data-comment-id]").expect("static selector"),
        Selector::parse("[data-comment-id]").expect("static selector"),
        Selector::parse("div.comment, li.comment").expect("static selector"),
    ]
});
static SEL_AUTHOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".user, .user-name").expect("static selector"));
static SEL_AUTHOR_ATTR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("[data-user-name]").expect("static selector"));
static SEL_BODY: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".comment__body").expect("static selector"));
static SEL_TEXT: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(".content, .text, .comment-body, .comment-content").expect("static selector")
});
static SEL_TIME_ATTR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("time[datetime]").expect("static selector"));
static SEL_TIME: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("time").expect("static selector"));

/// Prefix of hash-derived ids
const HASH_ID_PREFIX: &str = "h-";

/// Extracts comment records from one page shape
#[derive(Debug, Clone)]
pub struct PageParser {
    base: Url,
}

impl PageParser {
    /// Create a parser resolving relative references against `page_url`
    pub fn new(page_url: &str) -> Result<Self> {
        let base = Url::parse(page_url)
            .map_err(|e| Error::config(format!("Invalid page URL '{}': {}", page_url, e)))?;
        Ok(Self { base })
    }

    /// The URL relative references are resolved against
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Parse a document into comment records
    pub fn parse(&self, document: &str) -> Vec<CommentRecord> {
        if document.trim().is_empty() {
            return Vec::new();
        }

        let html = Html::parse_document(document);
        let mut records: Vec<CommentRecord> = Vec::new();
        let mut by_id: HashMap<String, usize> = HashMap::new();
        let mut hash_ids: HashMap<String, usize> = HashMap::new();

        for node in comment_nodes(&html) {
            let mut record = self.parse_node(&node);
            if record.id.is_empty() {
                record.id = unique_hash_id(&record.content_hash, &mut hash_ids);
            }
            match by_id.get(&record.id) {
                Some(&idx) => merge_into(&mut records[idx], record),
                None => {
                    by_id.insert(record.id.clone(), records.len());
                    records.push(record);
                }
            }
        }

        for embedded in preloaded::extract(document, &self.base) {
            let record = CommentRecord::new(
                embedded.id,
                embedded.author,
                embedded.timestamp,
                embedded.text,
                embedded.images,
            )
            .with_created_ts(embedded.created_ts);
            match by_id.get(&record.id) {
                Some(&idx) => merge_into(&mut records[idx], record),
                None => {
                    by_id.insert(record.id.clone(), records.len());
                    records.push(record);
                }
            }
        }

        sort_chronologically(&mut records);

        tracing::trace!("Parsed {} comment records", records.len());
        records
    }

    /// Build a record from one comment node; `id` is empty if the node has none
    fn parse_node(&self, node: &ElementRef<'_>) -> CommentRecord {
        let id = node_id(node).unwrap_or_default();
        let author = node_author(node);
        let timestamp = node_timestamp(node);
        let text = node_text(node);

        let mut collector = ImageCollector::new(&self.base);
        collector.collect_from(node, &text);

        CommentRecord::new(id, author, timestamp, text, collector.finish())
    }
}

/// Comment nodes from the first selector that matches anything
fn comment_nodes(html: &Html) -> Vec<ElementRef<'_>> {
    for selector in SEL_COMMENT_NODES.iter() {
        let nodes: Vec<_> = html.select(selector).collect();
        if !nodes.is_empty() {
            return nodes;
        }
    }
    Vec::new()
}

fn node_id(node: &ElementRef<'_>) -> Option<String> {
    let el = node.value();
    if let Some(id) = el.attr("data-comment-id").map(str::trim).filter(|s| !s.is_empty()) {
        return Some(id.to_string());
    }
    el.attr("id")
        .map(|id| id.trim())
        .map(|id| id.strip_prefix("comment-").unwrap_or(id))
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

fn node_author(node: &ElementRef<'_>) -> String {
    if let Some(el) = node.select(&SEL_AUTHOR).next() {
        let name = collapse(el.text());
        if !name.is_empty() {
            return name;
        }
    }
    node.select(&SEL_AUTHOR_ATTR)
        .next()
        .map(|el| match el.value().attr("data-user-name") {
            Some(name) if !name.trim().is_empty() => name.trim().to_string(),
            _ => collapse(el.text()),
        })
        .unwrap_or_default()
}

fn node_timestamp(node: &ElementRef<'_>) -> String {
    if let Some(datetime) = node
        .select(&SEL_TIME_ATTR)
        .next()
        .and_then(|el| el.value().attr("datetime"))
    {
        return datetime.trim().to_string();
    }
    node.select(&SEL_TIME)
        .next()
        .map(|el| collapse(el.text()))
        .unwrap_or_default()
}

fn node_text(node: &ElementRef<'_>) -> String {
    let body = node.select(&SEL_BODY).next().unwrap_or(*node);
    match body.select(&SEL_TEXT).next() {
        Some(text) => collapse(text.text()),
        None => collapse(body.text()),
    }
}

/// Join text fragments and collapse all whitespace runs to single spaces
fn collapse<'a>(fragments: impl Iterator<Item = &'a str>) -> String {
    fragments
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// `h-<16 hex>`, suffixed `-N` for the N-th identical comment on the page
fn unique_hash_id(content_hash: &str, counts: &mut HashMap<String, usize>) -> String {
    let short = &content_hash[..content_hash.len().min(16)];
    let count = counts.entry(short.to_string()).or_insert(0);
    *count += 1;
    if *count == 1 {
        format!("{}{}", HASH_ID_PREFIX, short)
    } else {
        format!("{}{}-{}", HASH_ID_PREFIX, short, count)
    }
}

/// Stable sort by creation time when every record has one, else by numeric
/// id when every id is numeric; otherwise document order stays
fn sort_chronologically(records: &mut [CommentRecord]) {
    if records.iter().all(|r| r.created_ts.is_some()) {
        records.sort_by_key(|r| (r.created_ts, r.sequence));
    } else if records.iter().all(|r| r.sequence.is_some()) {
        records.sort_by_key(|r| r.sequence);
    }
}

/// Fill gaps in `target` from `other` and union the images
fn merge_into(target: &mut CommentRecord, other: CommentRecord) {
    if target.author.is_empty() {
        target.author = other.author;
    }
    if target.timestamp.is_empty() {
        target.timestamp = other.timestamp;
    }
    if target.created_ts.is_none() {
        target.created_ts = other.created_ts;
    }
    if target.text.is_empty() {
        target.text = other.text;
    }
    images::merge_images(&mut target.images, &other.images);
    target.rehash();
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = "https://www.example.com/deals/widget-deal-2231";

    fn parser() -> PageParser {
        PageParser::new(PAGE).unwrap()
    }

    #[test]
    fn parses_article_comments() {
        let html = r#"<html><body>
            <article data-comment-id="1002">
                <span class="user">bob</span>
                <time datetime="2025-03-01T10:05:00Z">5 min</time>
                <div class="comment__body"><div class="content">Second <b>comment</b></div></div>
            </article>
            <article data-comment-id="1001">
                <span class="user">alice</span>
                <div class="comment__body"><div class="content">First!
                    <img src="/uploads/a.jpg"></div></div>
            </article>
        </body></html>"#;

        let records = parser().parse(html);
        assert_eq!(records.len(), 2);

        // Numeric ids: chronological order
        assert_eq!(records[0].id, "1001");
        assert_eq!(records[0].author, "alice");
        assert_eq!(records[0].text, "First!");
        assert_eq!(records[0].images, vec!["https://www.example.com/uploads/a.jpg"]);

        assert_eq!(records[1].id, "1002");
        assert_eq!(records[1].text, "Second comment");
        assert_eq!(records[1].timestamp, "2025-03-01T10:05:00Z");
        assert!(records[1].images.is_empty());
    }

    #[test]
    fn falls_back_to_generic_comment_blocks() {
        let html = r#"<ul>
            <li class="comment" id="comment-77"><p>hello</p></li>
            <li class="comment" id="comment-78"><p>world</p>
                <a href="//img.example.net/p/cat.gif">cat</a></li>
        </ul>"#;

        let records = parser().parse(html);
        let ids: Vec<_> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["77", "78"]);
        assert_eq!(records[1].images, vec!["https://img.example.net/p/cat.gif"]);
    }

    #[test]
    fn keeps_document_order_for_non_numeric_ids() {
        let html = r#"
            <div data-comment-id="zeta">z</div>
            <div data-comment-id="alpha">a</div>"#;
        let ids: Vec<_> = parser().parse(html).into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["zeta", "alpha"]);
    }

    #[test]
    fn anonymous_comments_get_stable_unique_hash_ids() {
        let html = r#"
            <div class="comment">same text</div>
            <div class="comment">same text</div>
            <div class="comment">other text</div>"#;

        let first = parser().parse(html);
        let second = parser().parse(html);
        assert_eq!(first.len(), 3);
        assert_eq!(first, second);

        assert!(first.iter().all(|r| r.id.starts_with(HASH_ID_PREFIX)));
        assert_ne!(first[0].id, first[1].id);
        assert!(first[1].id.ends_with("-2"));
    }

    #[test]
    fn duplicate_nodes_merge_into_one_record() {
        let html = r#"
            <div data-comment-id="5"><span class="user">eve</span> text
                <img src="/one.png"></div>
            <div data-comment-id="5"><img src="/two.png"></div>"#;

        let records = parser().parse(html);
        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0].images,
            vec![
                "https://www.example.com/one.png",
                "https://www.example.com/two.png"
            ]
        );
    }

    #[test]
    fn preloaded_state_fills_and_extends() {
        let html = r#"<html><body>
            <article data-comment-id="10"><div class="content">rendered</div></article>
            <script>window.__PRELOADED_STATE__ = {"entities": {"comments": [
                {"id": 10, "user": {"name": "dora"}, "content": "ignored", "images": ["/ten.jpg"]},
                {"id": 11, "authorName": "finn", "content": "<p>only in state</p>"}
            ]}};</script>
        </body></html>"#;

        let records = parser().parse(html);
        assert_eq!(records.len(), 2);

        assert_eq!(records[0].id, "10");
        assert_eq!(records[0].author, "dora");
        assert_eq!(records[0].text, "rendered");
        assert_eq!(records[0].images, vec!["https://www.example.com/ten.jpg"]);

        assert_eq!(records[1].id, "11");
        assert_eq!(records[1].author, "finn");
        assert_eq!(records[1].text, "only in state");
    }

    #[test]
    fn creation_time_orders_before_id() {
        let html = r#"
            <article data-comment-id="30"><time datetime="2025-03-01T10:00:00Z">a</time>x</article>
            <article data-comment-id="31"><time datetime="2025-03-01T09:00:00Z">b</time>y</article>
            <article data-comment-id="29"><time datetime="2025-03-01T11:00:00Z">c</time>z</article>"#;
        let ids: Vec<_> = parser().parse(html).into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["31", "30", "29"]);
    }

    #[test]
    fn creation_time_from_preloaded_state_orders_hash_ids() {
        let html = r#"<script>window.__PRELOADED_STATE__ = {"entities": {"comments": [
            {"id": "c-b", "content": "second", "createdAtTs": 200},
            {"id": "c-a", "content": "first", "createdAtTs": 100}
        ]}};</script>"#;
        let ids: Vec<_> = parser().parse(html).into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["c-a", "c-b"]);
    }

    #[test]
    fn missing_creation_time_falls_back_to_numeric_id() {
        let html = r#"
            <article data-comment-id="12"><time datetime="2025-03-01T10:00:00Z">a</time>x</article>
            <article data-comment-id="11"><time>gestern</time>y</article>"#;
        let ids: Vec<_> = parser().parse(html).into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["11", "12"]);
    }

    #[test]
    fn author_from_data_attribute() {
        let html = r#"<article data-comment-id="3">
            <a data-user-name="gus">profile</a><div class="text">yo</div></article>"#;
        let records = parser().parse(html);
        assert_eq!(records[0].author, "gus");
        assert_eq!(records[0].text, "yo");
    }

    #[test]
    fn unparsable_or_empty_input_yields_nothing() {
        let parser = parser();
        assert!(parser.parse("").is_empty());
        assert!(parser.parse("   \n").is_empty());
        assert!(parser.parse("<html><body><p>maintenance</p></body></html>").is_empty());
        assert!(parser.parse("\u{0}\u{1}<<<>>>not html at all").is_empty());
    }

    #[test]
    fn parse_is_deterministic() {
        let html = r#"
            <article data-comment-id="1"><div class="content">a https://x.example.com/i.png</div></article>
            <article><div class="content">anonymous</div></article>"#;
        let parser = parser();
        let ids = |records: Vec<CommentRecord>| {
            records.into_iter().map(|r| r.id).collect::<Vec<_>>()
        };
        assert_eq!(ids(parser.parse(html)), ids(parser.parse(html)));
    }

    #[test]
    fn rejects_invalid_base_url() {
        assert!(PageParser::new("not a url").is_err());
    }
}
