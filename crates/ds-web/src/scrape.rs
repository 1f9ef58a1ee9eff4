//! Page scraping: fetch a URL and reduce it to markdown-ish text.

use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::{Client, Url};
use scraper::{ElementRef, Html, Node, Selector};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use ds_core::{run_blocking, Error};

/// Result of scraping one URL. Failures are values, never batch errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapeOutcome {
    pub url: String,
    pub result: Result<String, String>,
}

impl ScrapeOutcome {
    pub fn ok(url: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            result: Ok(content.into()),
        }
    }

    pub fn failed(url: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            result: Err(error.into()),
        }
    }

    /// Content on success, empty string on failure.
    pub fn content(&self) -> &str {
        self.result.as_deref().unwrap_or_default()
    }
}

#[async_trait]
pub trait Scraper: Send + Sync {
    /// Scrape every URL concurrently. Returns one outcome per input URL, in
    /// input order.
    async fn scrape_many(&self, urls: &[String]) -> Vec<ScrapeOutcome>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapeConfig {
    pub timeout_secs: u64,
    pub max_content_chars: usize,
    pub user_agent: String,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_content_chars: 50_000,
            user_agent: concat!("Mozilla/5.0 (compatible; deepsearch/", env!("CARGO_PKG_VERSION"), ")")
                .to_string(),
        }
    }
}

pub struct HttpScraper {
    client: Client,
    config: ScrapeConfig,
}

impl Default for HttpScraper {
    fn default() -> Self {
        Self::new(ScrapeConfig::default())
    }
}

impl HttpScraper {
    pub fn new(config: ScrapeConfig) -> Self {
        Self {
            client: Client::builder()
                .user_agent(config.user_agent.clone())
                .timeout(Duration::from_secs(config.timeout_secs))
                .build()
                .unwrap_or_default(),
            config,
        }
    }

    async fn scrape(&self, url: &str) -> Result<String, Error> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::network(format!("Failed to fetch '{}': {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::api(status.as_u16(), format!("HTTP error {}: {}", status, url)));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("text/html")
            .to_ascii_lowercase();

        let body = response
            .text()
            .await
            .map_err(|e| Error::network(format!("Failed to read response: {}", e)))?;

        let text = if content_type.contains("html") {
            let base = url.to_string();
            run_blocking(move || html_to_markdown(&body, Some(&base))).await?
        } else if content_type.starts_with("text/") || content_type.contains("json") {
            body.trim().to_string()
        } else {
            return Err(Error::invalid_request(format!(
                "Unsupported content type '{}'",
                content_type
            )));
        };

        if text.is_empty() {
            return Err(Error::invalid_request("No text content found on page"));
        }

        Ok(truncate_chars(text, self.config.max_content_chars))
    }
}

#[async_trait]
impl Scraper for HttpScraper {
    async fn scrape_many(&self, urls: &[String]) -> Vec<ScrapeOutcome> {
        let scrapes = urls.iter().map(|url| async move {
            match self.scrape(url).await {
                Ok(content) => {
                    debug!(url = %url, chars = content.len(), "Scraped page");
                    ScrapeOutcome::ok(url.clone(), content)
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "Scrape failed");
                    ScrapeOutcome::failed(url.clone(), e.to_string())
                }
            }
        });
        join_all(scrapes).await
    }
}

fn truncate_chars(text: String, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => {
            let total = text.chars().count();
            format!("{}\n\n... (truncated, {} total characters)", &text[..cut], total)
        }
        None => text,
    }
}

const SKIPPED_TAGS: &[&str] = &[
    "script", "style", "nav", "footer", "header", "aside", "noscript", "form", "svg", "iframe",
    "template", "button",
];

/// Convert an HTML document to markdown-ish text.
///
/// Keeps headings, paragraphs, list items, links and code blocks; drops page
/// chrome such as navigation, scripts and footers. Content is taken from
/// `<main>` or `<article>` when present, the body otherwise. Relative link
/// targets are resolved against `base_url`.
pub fn html_to_markdown(html: &str, base_url: Option<&str>) -> String {
    let document = Html::parse_document(html);
    let mut writer = MarkdownWriter {
        out: String::new(),
        base: base_url.and_then(|u| Url::parse(u).ok()),
        in_pre: false,
    };

    let root = ["main", "article", "[role=\"main\"]", "body"]
        .iter()
        .filter_map(|s| Selector::parse(s).ok())
        .find_map(|selector| document.select(&selector).next())
        .unwrap_or_else(|| document.root_element());

    writer.walk(root);
    clean_text(&writer.out)
}

struct MarkdownWriter {
    out: String,
    base: Option<Url>,
    in_pre: bool,
}

impl MarkdownWriter {
    fn walk(&mut self, element: ElementRef<'_>) {
        for child in element.children() {
            match child.value() {
                Node::Text(text) => self.text(text),
                Node::Element(_) => {
                    if let Some(el) = ElementRef::wrap(child) {
                        self.element(el);
                    }
                }
                _ => {}
            }
        }
    }

    fn element(&mut self, el: ElementRef<'_>) {
        let tag = el.value().name();
        if SKIPPED_TAGS.contains(&tag) {
            return;
        }

        match tag {
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                let level = tag[1..].parse::<usize>().unwrap_or(1);
                self.block_break();
                let heading = self.capture(el);
                if !heading.is_empty() {
                    self.out.push_str(&"#".repeat(level));
                    self.out.push(' ');
                    self.out.push_str(&heading);
                }
                self.block_break();
            }
            "br" => self.out.push('\n'),
            "hr" => {
                self.block_break();
                self.out.push_str("---");
                self.block_break();
            }
            "li" => {
                self.line_break();
                self.out.push_str("- ");
                self.walk(el);
                self.line_break();
            }
            "a" => {
                let text = self.capture(el);
                if text.is_empty() {
                    return;
                }
                match el.value().attr("href").and_then(|href| self.resolve(href)) {
                    Some(href) => {
                        self.space_before_inline();
                        self.out.push_str(&format!("[{}]({})", text, href));
                    }
                    None => {
                        self.space_before_inline();
                        self.out.push_str(&text);
                    }
                }
            }
            "strong" | "b" => {
                let text = self.capture(el);
                if !text.is_empty() {
                    self.space_before_inline();
                    self.out.push_str(&format!("**{}**", text));
                }
            }
            "code" if !self.in_pre => {
                let text = self.capture(el);
                if !text.is_empty() {
                    self.space_before_inline();
                    self.out.push_str(&format!("`{}`", text));
                }
            }
            "pre" => {
                self.block_break();
                self.in_pre = true;
                self.out.push_str("```\n");
                self.walk(el);
                if !self.out.ends_with('\n') {
                    self.out.push('\n');
                }
                self.out.push_str("```");
                self.in_pre = false;
                self.block_break();
            }
            "td" | "th" => {
                self.walk(el);
                self.out.push_str(" | ");
            }
            "p" | "div" | "section" | "article" | "main" | "blockquote" | "ul" | "ol" | "table"
            | "tr" | "dl" | "dt" | "dd" | "figure" | "figcaption" => {
                self.block_break();
                self.walk(el);
                self.block_break();
            }
            _ => self.walk(el),
        }
    }

    /// Render an element's children on their own and return the trimmed text.
    fn capture(&mut self, el: ElementRef<'_>) -> String {
        let start = self.out.len();
        self.walk(el);
        let text = self.out[start..].split_whitespace().collect::<Vec<_>>().join(" ");
        self.out.truncate(start);
        text
    }

    fn text(&mut self, text: &str) {
        if self.in_pre {
            self.out.push_str(text);
            return;
        }

        let words: Vec<&str> = text.split_whitespace().collect();
        if words.is_empty() {
            if !text.is_empty() && !self.ends_with_whitespace() {
                self.out.push(' ');
            }
            return;
        }

        if text.starts_with(char::is_whitespace) && !self.ends_with_whitespace() {
            self.out.push(' ');
        }
        self.out.push_str(&words.join(" "));
        if text.ends_with(char::is_whitespace) {
            self.out.push(' ');
        }
    }

    fn resolve(&self, href: &str) -> Option<String> {
        let href = href.trim();
        if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
            return None;
        }
        let url = match &self.base {
            Some(base) => base.join(href).ok()?,
            None => Url::parse(href).ok()?,
        };
        matches!(url.scheme(), "http" | "https").then(|| url.to_string())
    }

    fn ends_with_whitespace(&self) -> bool {
        self.out.is_empty() || self.out.ends_with(char::is_whitespace)
    }

    fn space_before_inline(&mut self) {
        if !self.ends_with_whitespace() && !self.out.ends_with(['(', '[', '"']) {
            self.out.push(' ');
        }
    }

    fn trim_trailing_spaces(&mut self) {
        let kept = self.out.trim_end_matches([' ', '\t']).len();
        self.out.truncate(kept);
    }

    fn line_break(&mut self) {
        self.trim_trailing_spaces();
        if !self.out.is_empty() && !self.out.ends_with('\n') {
            self.out.push('\n');
        }
    }

    fn block_break(&mut self) {
        self.trim_trailing_spaces();
        if self.out.is_empty() {
            return;
        }
        while !self.out.ends_with("\n\n") {
            self.out.push('\n');
        }
    }
}

/// Strip trailing whitespace and collapse runs of blank lines to one.
fn clean_text(text: &str) -> String {
    let mut result = String::new();
    let mut blank_run = 0;

    for line in text.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            blank_run += 1;
            if blank_run == 1 && !result.is_empty() {
                result.push('\n');
            }
            continue;
        }
        blank_run = 0;
        result.push_str(line);
        result.push('\n');
    }

    result.trim().to_string()
}
