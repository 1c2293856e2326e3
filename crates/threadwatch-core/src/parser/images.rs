//! Image reference extraction
//!
//! A comment can reference images in several ways. Each [`ImageRule`] knows
//! one of them; rules run in a fixed priority order and their results are
//! merged into one ordered, deduplicated list.

use regex::Regex;
use scraper::{ElementRef, Selector};
use std::collections::HashSet;
use std::sync::LazyLock;
use url::Url;

/// Path suffixes accepted as images
pub const IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".gif", ".webp"];

static SEL_IMG_SRC: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("img[src]").expect("static selector"));
static SEL_IMG_DATA_SRC: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("img[data-src]").expect("static selector"));
static SEL_IMG_DATA_LAZY: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("img[data-lazy]").expect("static selector"));
static SEL_IMG_SRCSET: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("img[srcset]").expect("static selector"));
static SEL_ANCHOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("static selector"));
static RE_TEXT_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s<>"']+"#).expect("static regex"));

/// One way a comment can reference an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageRule {
    /// `<img src>`
    Src,
    /// `<img data-src>` (lazy loading)
    DataSrc,
    /// `<img data-lazy>` (lazy loading)
    DataLazy,
    /// First candidate of `<img srcset>`
    SrcSet,
    /// `<a href>` pointing at an image
    Link,
    /// Bare URL in the comment text
    TextUrl,
}

impl ImageRule {
    /// All rules, highest priority first
    pub const ORDERED: [ImageRule; 6] = [
        ImageRule::Src,
        ImageRule::DataSrc,
        ImageRule::DataLazy,
        ImageRule::SrcSet,
        ImageRule::Link,
        ImageRule::TextUrl,
    ];

    /// Raw candidates this rule finds under `node`, in document order
    pub fn candidates(&self, node: &ElementRef<'_>, text: &str) -> Vec<String> {
        match self {
            ImageRule::Src => attr_values(node, &SEL_IMG_SRC, "src"),
            ImageRule::DataSrc => attr_values(node, &SEL_IMG_DATA_SRC, "data-src"),
            ImageRule::DataLazy => attr_values(node, &SEL_IMG_DATA_LAZY, "data-lazy"),
            ImageRule::SrcSet => attr_values(node, &SEL_IMG_SRCSET, "srcset")
                .iter()
                .filter_map(|srcset| first_srcset_candidate(srcset))
                .collect(),
            ImageRule::Link => attr_values(node, &SEL_ANCHOR, "href"),
            ImageRule::TextUrl => text_urls(text),
        }
    }
}

fn attr_values(node: &ElementRef<'_>, selector: &Selector, attr: &str) -> Vec<String> {
    node.select(selector)
        .filter_map(|el| el.value().attr(attr))
        .map(str::to_string)
        .collect()
}

/// `"a.jpg 1x, b.jpg 2x"` → `"a.jpg"`
pub fn first_srcset_candidate(srcset: &str) -> Option<String> {
    srcset
        .split(',')
        .next()
        .and_then(|c| c.split_whitespace().next())
        .map(str::to_string)
}

/// Bare http(s) URLs in free text
pub fn text_urls(text: &str) -> Vec<String> {
    RE_TEXT_URL
        .find_iter(text)
        .map(|m| {
            m.as_str()
                .trim_end_matches(['.', ',', ';', ':', ')', ']', '!', '?'])
                .to_string()
        })
        .collect()
}

/// Resolve `raw` against `base` and keep it only if it points at an image
///
/// Relative and protocol-relative references become absolute. `data:` URIs,
/// non-http schemes and paths without an image extension are rejected.
pub fn resolve_image_url(base: &Url, raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with("data:") {
        return None;
    }
    let url = base.join(raw).ok()?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }
    let path = url.path().to_ascii_lowercase();
    if !IMAGE_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
        return None;
    }
    Some(url.to_string())
}

/// Ordered, deduplicated collection of resolved image URLs
#[derive(Debug)]
pub struct ImageCollector<'a> {
    base: &'a Url,
    seen: HashSet<String>,
    urls: Vec<String>,
}

impl<'a> ImageCollector<'a> {
    /// Start an empty collection resolving against `base`
    pub fn new(base: &'a Url) -> Self {
        Self {
            base,
            seen: HashSet::new(),
            urls: Vec::new(),
        }
    }

    /// Add a raw reference; ignored if it is not an image or already present
    pub fn push(&mut self, raw: &str) {
        if let Some(url) = resolve_image_url(self.base, raw) {
            if self.seen.insert(url.clone()) {
                self.urls.push(url);
            }
        }
    }

    /// Apply every rule to `node` in priority order
    pub fn collect_from(&mut self, node: &ElementRef<'_>, text: &str) {
        for rule in ImageRule::ORDERED {
            for candidate in rule.candidates(node, text) {
                self.push(&candidate);
            }
        }
    }

    /// The collected URLs
    pub fn finish(self) -> Vec<String> {
        self.urls
    }
}

/// Append `extra` to `images`, skipping URLs already present
pub fn merge_images(images: &mut Vec<String>, extra: &[String]) {
    for url in extra {
        if !images.contains(url) {
            images.push(url.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Html;

    fn base() -> Url {
        Url::parse("https://www.example.com/deals/thread-123").unwrap()
    }

    #[test]
    fn resolves_relative_and_protocol_relative() {
        let base = base();
        assert_eq!(
            resolve_image_url(&base, "/img/a.jpg").as_deref(),
            Some("https://www.example.com/img/a.jpg")
        );
        assert_eq!(
            resolve_image_url(&base, "//cdn.example.com/b.PNG").as_deref(),
            Some("https://cdn.example.com/b.PNG")
        );
        assert_eq!(
            resolve_image_url(&base, "c.webp?w=200").as_deref(),
            Some("https://www.example.com/deals/c.webp?w=200")
        );
    }

    #[test]
    fn rejects_non_images() {
        let base = base();
        assert_eq!(resolve_image_url(&base, "https://example.com/page.html"), None);
        assert_eq!(resolve_image_url(&base, "data:image/png;base64,AAAA"), None);
        assert_eq!(resolve_image_url(&base, "mailto:a@b.jpg"), None);
        assert_eq!(resolve_image_url(&base, "   "), None);
    }

    #[test]
    fn srcset_takes_first_candidate() {
        assert_eq!(
            first_srcset_candidate("/s.jpg 1x, /l.jpg 2x").as_deref(),
            Some("/s.jpg")
        );
        assert_eq!(first_srcset_candidate(""), None);
    }

    #[test]
    fn text_urls_strip_trailing_punctuation() {
        let found = text_urls("see https://i.example.com/x.gif, and (https://e.com/y.png).");
        assert_eq!(
            found,
            vec!["https://i.example.com/x.gif", "https://e.com/y.png"]
        );
    }

    #[test]
    fn collector_applies_rules_in_priority_and_dedupes() {
        let html = Html::parse_fragment(
            r#"<div>
                <img data-src="/lazy.jpg" src="data:image/gif;base64,R0lG">
                <img src="/direct.png" srcset="/direct.png 1x, /big.png 2x">
                <a href="/direct.png">same</a>
                <a href="/full.jpeg">full</a>
            </div>"#,
        );
        let root = html.root_element();
        let base = base();
        let mut collector = ImageCollector::new(&base);
        collector.collect_from(&root, "also https://other.example.org/pic.webp");

        assert_eq!(
            collector.finish(),
            vec![
                "https://www.example.com/direct.png",
                "https://www.example.com/lazy.jpg",
                "https://www.example.com/full.jpeg",
                "https://other.example.org/pic.webp",
            ]
        );
    }
}
