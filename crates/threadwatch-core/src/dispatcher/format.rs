//! Notification text layout
//!
//! Messages use the HTML parse mode: every piece of page content is escaped,
//! and length limits are enforced by shortening the comment text rather than
//! cutting through markup.

use crate::parser::CommentRecord;

/// Maximum length of a text message
pub const MESSAGE_LIMIT: usize = 4096;

/// Maximum length of an image caption
pub const CAPTION_LIMIT: usize = 1024;

/// Maximum length of the comment snippet inside a caption
pub const CAPTION_SNIPPET_LIMIT: usize = 900;

const ELLIPSIS: &str = "...";
const UNKNOWN: &str = "Unknown";
const NO_TEXT: &str = "<i>No text in comment</i>";

/// Escape `&`, `<`, `>`, `"` and `'`
pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            c => out.push(c),
        }
    }
    out
}

/// Shorten `text` to at most `limit` characters, ending in `...` when cut
///
/// Never leaves a dangling partial entity such as `&am`.
pub fn trim_text(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    if limit <= ELLIPSIS.len() {
        return text.chars().take(limit).collect();
    }

    let mut cut: String = text.chars().take(limit - ELLIPSIS.len()).collect();
    if let Some(amp) = cut.rfind('&')
        && !cut[amp..].contains(';')
    {
        cut.truncate(amp);
    }
    let mut out = cut.trim_end().to_string();
    out.push_str(ELLIPSIS);
    out
}

/// Deep link to one comment on the page
pub fn comment_link(page_url: &str, comment_id: &str) -> String {
    let base = page_url.split('#').next().unwrap_or(page_url);
    format!("{}#comment-{}", base, comment_id)
}

fn header(record: &CommentRecord, title: &str, page_url: &str) -> String {
    let author = if record.author.is_empty() { UNKNOWN } else { &record.author };
    let time = if record.timestamp.is_empty() { UNKNOWN } else { &record.timestamp };
    format!(
        "<b>{}</b>\nAuthor: {}\nTime: {}\n<a href=\"{}\">Open comment</a>\n",
        escape_html(title),
        escape_html(author),
        escape_html(time),
        escape_html(&comment_link(page_url, &record.id)),
    )
}

/// `header`, `body` and `footer`, shrinking `body` so the result fits `limit`
fn fit(header: &str, body: &str, footer: &str, limit: usize) -> String {
    let fixed = header.chars().count() + footer.chars().count();
    let assembled = if fixed < limit {
        format!("{}{}{}", header, trim_text(body, limit - fixed), footer)
    } else {
        format!("{}{}", header, footer)
    };
    trim_text(&assembled, limit)
}

/// Full text message for one comment
pub fn build_message(record: &CommentRecord, title: &str, page_url: &str) -> String {
    let header = format!("{}\n", header(record, title, page_url));
    let text = record.text.trim();
    if text.is_empty() {
        return trim_text(&format!("{}{}", header, NO_TEXT), MESSAGE_LIMIT);
    }
    let header = format!("{}<b>Comment:</b>\n", header);
    fit(&header, &escape_html(text), "", MESSAGE_LIMIT)
}

/// Caption for image `index` (1-based) of `total`
pub fn build_caption(
    record: &CommentRecord,
    title: &str,
    page_url: &str,
    index: usize,
    total: usize,
) -> String {
    let header = format!("{}\n", header(record, title, page_url));
    let footer = if total > 1 {
        format!("\nImage {}/{}", index, total)
    } else {
        String::new()
    };

    let text = record.text.trim();
    if text.is_empty() {
        return fit(&header, NO_TEXT, &footer, CAPTION_LIMIT);
    }
    let snippet = trim_text(&escape_html(text), CAPTION_SNIPPET_LIMIT);
    fit(&format!("{}<b>Comment:</b>\n", header), &snippet, &footer, CAPTION_LIMIT)
}
