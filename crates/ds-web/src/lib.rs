//! ds-web: web search and page scraping for deepsearch
//!
//! Two capabilities, each a trait with one production implementation:
//! - [`SearchProvider`]: ranked organic results for a query ([`SerperClient`])
//! - [`Scraper`]: page content as markdown-ish text ([`HttpScraper`])

pub mod favicon;
pub mod scrape;
pub mod search;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use favicon::favicon_url;
pub use scrape::{html_to_markdown, HttpScraper, ScrapeConfig, ScrapeOutcome, Scraper};
pub use search::{SearchHit, SearchProvider, SerperClient};
