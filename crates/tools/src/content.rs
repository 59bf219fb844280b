//! Page content extraction for `get_page_content`.

use browser_mcp_core::config::ToolsConfig;
use browser_mcp_core::{Error, Result};
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use std::str::FromStr;

/// Number of links and images echoed back in full.
const PREVIEW_ITEMS: usize = 10;
const MAX_LABEL_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentFormat {
    #[default]
    Text,
    Html,
    Markdown,
}

impl FromStr for ContentFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "html" => Ok(Self::Html),
            "markdown" | "md" => Ok(Self::Markdown),
            other => Err(Error::invalid_argument(
                "format",
                format!("expected one of text, html, markdown; got '{}'", other),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ContentLimits {
    pub max_content_length: usize,
    pub max_links: usize,
    pub max_images: usize,
}

impl From<&ToolsConfig> for ContentLimits {
    fn from(config: &ToolsConfig) -> Self {
        Self {
            max_content_length: config.max_content_length,
            max_links: config.max_links,
            max_images: config.max_images,
        }
    }
}

impl Default for ContentLimits {
    fn default() -> Self {
        Self::from(&ToolsConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkInfo {
    pub url: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageInfo {
    pub src: String,
    pub alt: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PageContent {
    pub title: String,
    pub url: String,
    pub format: ContentFormat,
    pub text: String,
    pub links_count: usize,
    pub images_count: usize,
    pub links: Vec<LinkInfo>,
    pub images: Vec<ImageInfo>,
}

/// Build a `PageContent` from serialized page markup.
pub fn extract(
    html: &str,
    title: String,
    url: String,
    format: ContentFormat,
    limits: &ContentLimits,
) -> PageContent {
    let document = Html::parse_document(html);

    let body = match format {
        ContentFormat::Text => visible_text(&document),
        ContentFormat::Html => html.to_string(),
        ContentFormat::Markdown => html_to_markdown(html),
    };

    let links = collect_links(&document, limits.max_links);
    let images = collect_images(&document, limits.max_images);

    PageContent {
        title,
        url,
        format,
        text: truncate_chars(&body, limits.max_content_length),
        links_count: links.len(),
        images_count: images.len(),
        links: links.into_iter().take(PREVIEW_ITEMS).collect(),
        images: images.into_iter().take(PREVIEW_ITEMS).collect(),
    }
}

/// Text of the body with script/style contents dropped and whitespace collapsed.
fn visible_text(document: &Html) -> String {
    let root = Selector::parse("body")
        .ok()
        .and_then(|sel| document.select(&sel).next())
        .unwrap_or_else(|| document.root_element());

    let mut words: Vec<&str> = Vec::new();
    for node in root.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            a.value().as_element().is_some_and(|e| {
                matches!(e.name(), "script" | "style" | "noscript" | "template")
            })
        });
        if !hidden {
            words.extend(text.split_whitespace());
        }
    }
    words.join(" ")
}

fn collect_links(document: &Html, limit: usize) -> Vec<LinkInfo> {
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    document
        .select(&selector)
        .filter_map(|a| {
            let href = a.value().attr("href")?.trim();
            if !(href.starts_with("http://") || href.starts_with("https://")) {
                return None;
            }
            Some(LinkInfo {
                url: href.to_string(),
                text: truncate_plain(&element_text(&a), MAX_LABEL_CHARS),
            })
        })
        .take(limit)
        .collect()
}

fn collect_images(document: &Html, limit: usize) -> Vec<ImageInfo> {
    let Ok(selector) = Selector::parse("img[src]") else {
        return Vec::new();
    };
    document
        .select(&selector)
        .filter_map(|img| {
            let src = img.value().attr("src")?;
            Some(ImageInfo {
                src: src.to_string(),
                alt: truncate_plain(img.value().attr("alt").unwrap_or(""), MAX_LABEL_CHARS),
            })
        })
        .take(limit)
        .collect()
}

fn element_text(element: &ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(|t| t.split_whitespace())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Convert HTML to Markdown with page chrome stripped.
pub fn html_to_markdown(html: &str) -> String {
    use htmd::HtmlToMarkdown;

    let converter = HtmlToMarkdown::builder()
        .skip_tags(vec!["script", "style", "nav", "footer", "header", "aside", "noscript", "iframe"])
        .build();

    match converter.convert(html) {
        Ok(md) => clean_markdown(&md),
        Err(_) => visible_text(&Html::parse_document(html)),
    }
}

/// Collapse runs of blank lines to one.
fn clean_markdown(md: &str) -> String {
    let mut result = String::with_capacity(md.len());
    let mut blank_run = false;

    for line in md.lines() {
        if line.trim().is_empty() {
            blank_run = true;
            continue;
        }
        if !result.is_empty() {
            result.push('\n');
            if blank_run {
                result.push('\n');
            }
        }
        blank_run = false;
        result.push_str(line);
    }
    result
}

/// Truncate to `max` characters, marking the cut with `...`.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

fn truncate_plain(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><head><title>Demo</title><style>body{color:red}</style></head>
        <body>
          <h1>Hello   World</h1>
          <script>var secret = 1;</script>
          <p>First <b>para</b>.</p>
          <a href="https://example.com/a">Link A</a>
          <a href="/relative">Relative</a>
          <a href="mailto:x@y.z">Mail</a>
          <a href="http://example.com/b">   Link
             B </a>
          <img src="/logo.png" alt="Logo">
          <img src="https://cdn.example.com/x.png">
        </body></html>"#;

    #[test]
    fn test_text_extraction_skips_scripts() {
        let content = extract(
            PAGE,
            "Demo".into(),
            "https://example.com".into(),
            ContentFormat::Text,
            &ContentLimits::default(),
        );
        assert!(content.text.starts_with("Hello World First para ."));
        assert!(!content.text.contains("secret"));
        assert!(!content.text.contains("color:red"));
    }

    #[test]
    fn test_links_and_images() {
        let content = extract(
            PAGE,
            String::new(),
            String::new(),
            ContentFormat::Text,
            &ContentLimits::default(),
        );
        assert_eq!(content.links_count, 2);
        assert_eq!(content.links[0].url, "https://example.com/a");
        assert_eq!(content.links[1].text, "Link B");
        assert_eq!(content.images_count, 2);
        assert_eq!(content.images[0].alt, "Logo");
        assert_eq!(content.images[1].alt, "");
    }

    #[test]
    fn test_limits_applied() {
        let limits = ContentLimits {
            max_content_length: 5,
            max_links: 1,
            max_images: 0,
        };
        let content = extract(PAGE, String::new(), String::new(), ContentFormat::Text, &limits);
        assert_eq!(content.text, "Hello...");
        assert_eq!(content.links_count, 1);
        assert!(content.images.is_empty());
    }

    #[test]
    fn test_preview_capped_at_ten() {
        let anchors: String = (0..25)
            .map(|i| format!(r#"<a href="https://e.com/{i}">{i}</a>"#))
            .collect();
        let html = format!("<html><body>{}</body></html>", anchors);
        let content = extract(&html, String::new(), String::new(), ContentFormat::Text, &ContentLimits::default());
        assert_eq!(content.links_count, 25);
        assert_eq!(content.links.len(), 10);
    }

    #[test]
    fn test_markdown_format() {
        let content = extract(
            PAGE,
            String::new(),
            String::new(),
            ContentFormat::Markdown,
            &ContentLimits::default(),
        );
        assert!(content.text.contains("Hello"));
        assert!(content.text.contains("https://example.com/a"));
        assert!(!content.text.contains("secret"));
    }

    #[test]
    fn test_truncate_chars_is_char_safe() {
        assert_eq!(truncate_chars("héllo wörld", 4), "héll...");
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("exact", 5), "exact");
    }

    #[test]
    fn test_format_parse() {
        assert_eq!("MD".parse::<ContentFormat>().unwrap(), ContentFormat::Markdown);
        assert!("pdf".parse::<ContentFormat>().is_err());
    }
}
