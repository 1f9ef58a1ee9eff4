//! Test doubles for the web capabilities.
//! Only compiled when running tests or with the `testing` feature.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use ds_core::Error;

use crate::scrape::{ScrapeOutcome, Scraper};
use crate::search::{SearchHit, SearchProvider};

/// A search provider with canned results.
///
/// Queries without configured results get `count` generated hits whose links
/// are derived from the query, so distinct queries yield distinct URLs.
#[derive(Default)]
pub struct MockSearch {
    results: Mutex<HashMap<String, Vec<SearchHit>>>,
    failures: Mutex<HashMap<String, String>>,
    calls: Mutex<Vec<String>>,
}

impl MockSearch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_results(&self, query: &str, hits: Vec<SearchHit>) {
        self.results
            .lock()
            .unwrap()
            .insert(query.to_string(), hits);
    }

    pub fn fail_on(&self, query: &str, message: &str) {
        self.failures
            .lock()
            .unwrap()
            .insert(query.to_string(), message.to_string());
    }

    /// Queries searched so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Build a hit with the given title and link.
    pub fn hit(title: &str, link: &str, snippet: &str) -> SearchHit {
        SearchHit {
            title: title.to_string(),
            link: link.to_string(),
            snippet: snippet.to_string(),
            date: None,
        }
    }

    fn generated(query: &str, count: usize) -> Vec<SearchHit> {
        let slug: String = query
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
            .collect();
        (1..=count)
            .map(|i| SearchHit {
                title: format!("Result {} for {}", i, query),
                link: format!("https://example.com/{}/{}", slug, i),
                snippet: format!("Snippet {} about {}", i, query),
                date: Some("2024-01-01".to_string()),
            })
            .collect()
    }
}

#[async_trait]
impl SearchProvider for MockSearch {
    async fn search(
        &self,
        query: &str,
        count: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<SearchHit>, Error> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.calls.lock().unwrap().push(query.to_string());

        if let Some(message) = self.failures.lock().unwrap().get(query) {
            return Err(Error::search(message.clone()));
        }

        let mut hits = self
            .results
            .lock()
            .unwrap()
            .get(query)
            .cloned()
            .unwrap_or_else(|| Self::generated(query, count));
        hits.truncate(count);
        Ok(hits)
    }
}

/// A scraper with canned page content.
///
/// URLs without configured content scrape to `"Content of <url>"`.
#[derive(Default)]
pub struct MockScraper {
    content: Mutex<HashMap<String, String>>,
    failing: Mutex<HashSet<String>>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl MockScraper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_content(&self, url: &str, content: &str) {
        self.content
            .lock()
            .unwrap()
            .insert(url.to_string(), content.to_string());
    }

    pub fn fail_on(&self, url: &str) {
        self.failing.lock().unwrap().insert(url.to_string());
    }

    /// Every `scrape_many` batch, in call order.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    /// Total number of URLs scraped across all batches.
    pub fn url_count(&self) -> usize {
        self.calls.lock().unwrap().iter().map(Vec::len).sum()
    }
}

#[async_trait]
impl Scraper for MockScraper {
    async fn scrape_many(&self, urls: &[String]) -> Vec<ScrapeOutcome> {
        self.calls.lock().unwrap().push(urls.to_vec());

        let failing = self.failing.lock().unwrap();
        let content = self.content.lock().unwrap();
        urls.iter()
            .map(|url| {
                if failing.contains(url) {
                    ScrapeOutcome::failed(url.clone(), "connection refused")
                } else {
                    let page = content
                        .get(url)
                        .cloned()
                        .unwrap_or_else(|| format!("Content of {}", url));
                    ScrapeOutcome::ok(url.clone(), page)
                }
            })
            .collect()
    }
}
