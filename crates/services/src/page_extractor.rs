//! Page text extraction for chat prompts.
//!
//! Mirrors what a reader view does: keep the main article region, drop page
//! chrome (scripts, navigation, headers, footers), render to plain text. If
//! that yields nothing the whole document's text is used instead.

use async_trait::async_trait;
use html2text::from_read;
use regex::Regex;
use reqwest::Client;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

/// Render width for html2text; wide enough that prose is not hard-wrapped.
const RENDER_WIDTH: usize = 1000;

static CHROME_BLOCKS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    ["script", "style", "noscript", "template", "svg", "nav", "header", "footer", "aside", "form"]
        .iter()
        .filter_map(|tag| Regex::new(&format!(r"(?is)<{tag}\b[^>]*>.*?</{tag}\s*>")).ok())
        .collect()
});

static COMMENTS: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").ok());

/// Readable regions in order of preference, each as the region's opening
/// tag plus a pattern for any open or close tag of that element.
static MAIN_REGIONS: LazyLock<Vec<(Regex, Regex)>> = LazyLock::new(|| {
    [
        ("article", r"(?is)<article\b[^>]*>"),
        ("main", r"(?is)<main\b[^>]*>"),
        ("div", r#"(?is)<div\b[^>]*\brole\s*=\s*["']main["'][^>]*>"#),
    ]
    .iter()
    .filter_map(|(tag, opener)| {
        let opener = Regex::new(opener).ok()?;
        let tokens = Regex::new(&format!(r"(?is)<(/?){tag}\b[^>]*>")).ok()?;
        Some((opener, tokens))
    })
    .collect()
});

static TAGS: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").ok());

/// Extracted page text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageContent {
    pub content: String,
    /// Whether `content` was cut to the character limit.
    pub truncated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractError {
    #[error("Could not find active tab to get content from.")]
    NoActivePage,

    #[error("Cannot connect to page content script. Try reloading the page.")]
    Unreachable,

    #[error("Could not get page content: {0}.")]
    Failed(String),

    #[error("Did not receive valid content from the page.")]
    InvalidResponse,
}

/// Returns bounded plain text for the page the user is looking at.
#[async_trait]
pub trait PageExtractor: Send + Sync {
    async fn get_content(&self) -> Result<PageContent, ExtractError>;
}

/// Where the "current page" comes from.
#[derive(Debug, Clone)]
pub enum PageSource {
    /// Nothing open.
    None,
    Url(String),
    File(PathBuf),
    Html(String),
}

/// Extractor over an HTML document.
pub struct HtmlPageExtractor {
    source: PageSource,
    max_chars: usize,
    client: Client,
}

impl HtmlPageExtractor {
    pub fn new(source: PageSource, max_chars: usize) -> Self {
        Self {
            source,
            max_chars,
            client: Client::new(),
        }
    }

    async fn load_html(&self) -> Result<String, ExtractError> {
        match &self.source {
            PageSource::None => Err(ExtractError::NoActivePage),
            PageSource::Html(html) => Ok(html.clone()),
            PageSource::File(path) => tokio::fs::read_to_string(path).await.map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ExtractError::Unreachable
                } else {
                    ExtractError::Failed(e.to_string())
                }
            }),
            PageSource::Url(url) => {
                let response = self
                    .client
                    .get(url)
                    .timeout(Duration::from_secs(20))
                    .send()
                    .await
                    .map_err(|e| {
                        if e.is_connect() {
                            ExtractError::Unreachable
                        } else {
                            ExtractError::Failed(e.to_string())
                        }
                    })?;
                if !response.status().is_success() {
                    return Err(ExtractError::Failed(format!(
                        "page fetch failed with {}",
                        response.status()
                    )));
                }
                response
                    .text()
                    .await
                    .map_err(|e| ExtractError::Failed(e.to_string()))
            }
        }
    }
}

#[async_trait]
impl PageExtractor for HtmlPageExtractor {
    async fn get_content(&self) -> Result<PageContent, ExtractError> {
        let html = self.load_html().await?;
        if html.trim().is_empty() {
            return Err(ExtractError::InvalidResponse);
        }
        let text = extract_readable_text(&html);
        let (content, truncated) = truncate_chars(text, self.max_chars);
        tracing::debug!(chars = content.chars().count(), truncated, "extracted page text");
        Ok(PageContent { content, truncated })
    }
}

/// Main-content text of `html`, falling back to the full document text.
pub fn extract_readable_text(html: &str) -> String {
    let cleaned = strip_chrome(html);

    let article = MAIN_REGIONS
        .iter()
        .filter_map(|(opener, tokens)| region_inner(&cleaned, opener, tokens))
        .map(render_text)
        .find(|text| !text.is_empty());
    if let Some(text) = article {
        return text;
    }

    let full = render_text(html);
    if !full.is_empty() {
        return full;
    }

    // Raw fallback: tags stripped, whitespace collapsed.
    match TAGS.as_ref() {
        Some(re) => re
            .replace_all(html, " ")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" "),
        None => String::new(),
    }
}

/// Inner HTML of the first element matched by `opener`, up to its own
/// closing tag. Nested elements of the same name are skipped over; an
/// unclosed element runs to the end of the document.
fn region_inner<'a>(html: &'a str, opener: &Regex, tokens: &Regex) -> Option<&'a str> {
    let open = opener.find(html)?;
    let rest = &html[open.end()..];
    let mut depth = 1usize;
    for caps in tokens.captures_iter(rest) {
        let (Some(tag), Some(slash)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if !slash.as_str().is_empty() {
            depth -= 1;
            if depth == 0 {
                return Some(&rest[..tag.start()]);
            }
        } else if !tag.as_str().ends_with("/>") {
            depth += 1;
        }
    }
    Some(rest)
}

fn strip_chrome(html: &str) -> String {
    let mut out = match COMMENTS.as_ref() {
        Some(re) => re.replace_all(html, "").into_owned(),
        None => html.to_string(),
    };
    for re in CHROME_BLOCKS.iter() {
        out = re.replace_all(&out, "").into_owned();
    }
    out
}

fn render_text(html: &str) -> String {
    from_read(html.as_bytes(), RENDER_WIDTH).trim().to_string()
}

/// Cut `text` to at most `max_chars` characters.
pub fn truncate_chars(text: String, max_chars: usize) -> (String, bool) {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => {
            let mut text = text;
            text.truncate(byte_idx);
            (text, true)
        }
        None => (text, false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARTICLE_PAGE: &str = r#"<html><head><title>T</title><style>.x{color:red}</style></head>
<body>
<nav><a href="/">Home</a> | <a href="/about">About us</a></nav>
<header>Site banner</header>
<article><h1>Rust ownership</h1><p>Every value has a single owner.</p>
<script>console.log("tracking")</script></article>
<footer>Copyright footer</footer>
</body></html>"#;

    #[test]
    fn test_prefers_article_region() {
        let text = extract_readable_text(ARTICLE_PAGE);
        assert!(text.contains("Rust ownership"));
        assert!(text.contains("Every value has a single owner."));
        assert!(!text.contains("About us"));
        assert!(!text.contains("Copyright footer"));
        assert!(!text.contains("tracking"));
    }

    #[test]
    fn test_main_region_when_no_article() {
        let html = "<body><aside>Sidebar ad</aside><main><p>Main body text</p></main></body>";
        let text = extract_readable_text(html);
        assert!(text.contains("Main body text"));
        assert!(!text.contains("Sidebar ad"));
    }

    #[test]
    fn test_region_stops_at_its_own_closing_tag() {
        let html = r#"<div role="main"><p>Real article</p></div><div class="sidebar"><p>Buy now ads</p></div>"#;
        let text = extract_readable_text(html);
        assert!(text.contains("Real article"));
        assert!(!text.contains("Buy now ads"));

        let html = r#"<body><div role="main"><div><p>Nested part</p></div><p>Tail of main</p></div>
<div><p>Related links</p></div></body>"#;
        let text = extract_readable_text(html);
        assert!(text.contains("Nested part"));
        assert!(text.contains("Tail of main"));
        assert!(!text.contains("Related links"));
    }

    #[test]
    fn test_first_of_several_articles() {
        let html = "<article><p>First story</p></article><p>Between</p><article><p>Second story</p></article>";
        let text = extract_readable_text(html);
        assert!(text.contains("First story"));
        assert!(!text.contains("Between"));
        assert!(!text.contains("Second story"));
    }

    #[test]
    fn test_falls_back_to_whole_document() {
        let html = "<html><body><div><p>Plain page</p></div></body></html>";
        assert!(extract_readable_text(html).contains("Plain page"));

        let html = "<body><article>   </article><p>Outside text</p></body>";
        assert!(extract_readable_text(html).contains("Outside text"));
    }

    #[test]
    fn test_truncate_by_characters() {
        let (text, truncated) = truncate_chars("héllo wörld".to_string(), 5);
        assert_eq!(text, "héllo");
        assert!(truncated);

        let (text, truncated) = truncate_chars("short".to_string(), 5);
        assert_eq!(text, "short");
        assert!(!truncated);
    }

    #[tokio::test]
    async fn test_no_active_page() {
        let extractor = HtmlPageExtractor::new(PageSource::None, 100);
        let err = extractor.get_content().await.unwrap_err();
        assert_eq!(err, ExtractError::NoActivePage);
        assert_eq!(
            err.to_string(),
            "Could not find active tab to get content from."
        );
    }

    #[tokio::test]
    async fn test_empty_document_is_invalid() {
        let extractor = HtmlPageExtractor::new(PageSource::Html("  \n".into()), 100);
        assert_eq!(
            extractor.get_content().await.unwrap_err(),
            ExtractError::InvalidResponse
        );
    }

    #[tokio::test]
    async fn test_missing_file_is_unreachable() {
        let dir = tempfile::tempdir().unwrap();
        let extractor = HtmlPageExtractor::new(PageSource::File(dir.path().join("gone.html")), 100);
        assert_eq!(
            extractor.get_content().await.unwrap_err(),
            ExtractError::Unreachable
        );
    }

    #[tokio::test]
    async fn test_file_source_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page.html");
        let body = "word ".repeat(100);
        std::fs::write(&path, format!("<article><p>{}</p></article>", body)).unwrap();

        let extractor = HtmlPageExtractor::new(PageSource::File(path), 20);
        let page = extractor.get_content().await.unwrap();
        assert_eq!(page.content.chars().count(), 20);
        assert!(page.truncated);
    }
}
