//! Search one query, scrape every result, summarise every page.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ds_core::{generate_text, Error, Provider};
use ds_web::{SearchHit, SearchProvider, Scraper};

use crate::cache::SummaryCache;
use crate::context::{ResearchContext, ResultItem, SearchRecord, SUMMARY_FAILED};

/// Default number of results fetched per query.
pub const DEFAULT_RESULTS_PER_QUERY: usize = 5;

const SYSTEM_PROMPT: &str = r#"You are a research extraction specialist. Given a research topic and raw web content, create a thoroughly detailed synthesis as a cohesive narrative that flows naturally between key concepts.

Extract the most valuable information related to the research topic, including relevant facts, statistics, methodologies, claims, and contextual information. Preserve technical terminology and domain-specific language from the source material.

Structure your synthesis as a coherent document with natural transitions between ideas. Begin with an introduction that captures the core thesis and purpose of the source material. Develop the narrative by weaving together key findings and their supporting details, ensuring each concept flows logically to the next.

Integrate specific metrics, dates, and quantitative information within their proper context. Explore how concepts interconnect within the source material, highlighting meaningful relationships between ideas. Acknowledge limitations by noting where information related to aspects of the research topic may be missing or incomplete.

Important guidelines:
- Maintain original data context (e.g., "2024 study of 150 patients" rather than generic "recent study")
- Preserve the integrity of information by keeping details anchored to their original context
- Create a cohesive narrative rather than disconnected bullet points or lists
- Use paragraph breaks only when transitioning between major themes

Critical Reminder: If content lacks a specific aspect of the research topic, clearly state that in the synthesis, and you should NEVER make up information and NEVER rely on external knowledge."#;

/// Everything a summary depends on. Doubles as the cache key.
#[derive(Serialize)]
struct SummaryRequest<'a> {
    conversation_history: &'a str,
    scraped_content: &'a str,
    date: &'a str,
    title: &'a str,
    url: &'a str,
    snippet: &'a str,
    query: &'a str,
}

impl SummaryRequest<'_> {
    fn prompt(&self) -> String {
        format!(
            r#"# Research Topic
{query}

# Search Result Metadata
- Title: {title}
- Date: {date}
- URL: {url}
- Snippet: {snippet}

# Conversation History
{history}

# Raw Web Content
<raw_web_content>
{content}
</raw_web_content>

# Instructions
Summarise the above web content as described in the system prompt, focusing on the research topic."#,
            query = self.query,
            title = self.title,
            date = self.date,
            url = self.url,
            snippet = self.snippet,
            history = self.conversation_history,
            content = self.scraped_content,
        )
    }
}

pub struct SearchAndSummarize {
    search: Arc<dyn SearchProvider>,
    scraper: Arc<dyn Scraper>,
    provider: Arc<dyn Provider>,
    model: Option<String>,
    results_per_query: usize,
    cache: Option<Arc<SummaryCache>>,
}

impl SearchAndSummarize {
    pub fn new(
        search: Arc<dyn SearchProvider>,
        scraper: Arc<dyn Scraper>,
        provider: Arc<dyn Provider>,
        model: Option<String>,
    ) -> Self {
        Self {
            search,
            scraper,
            provider,
            model,
            results_per_query: DEFAULT_RESULTS_PER_QUERY,
            cache: None,
        }
    }

    pub fn with_results_per_query(mut self, count: usize) -> Self {
        self.results_per_query = count.max(1);
        self
    }

    pub fn with_cache(mut self, cache: Arc<SummaryCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Research one query.
    ///
    /// A search failure is returned as an error. Scrape and summary failures
    /// are not: the affected result keeps empty content and the
    /// [`SUMMARY_FAILED`] summary.
    pub async fn run(
        &self,
        query: &str,
        ctx: &ResearchContext,
        cancel: &CancellationToken,
    ) -> Result<SearchRecord, Error> {
        let mut hits = self
            .search
            .search(query, self.results_per_query, cancel)
            .await?;
        hits.truncate(self.results_per_query);
        debug!(query, hits = hits.len(), "Search returned");

        let urls: Vec<String> = hits.iter().map(|h| h.link.clone()).collect();
        let pages: HashMap<String, String> = self
            .scraper
            .scrape_many(&urls)
            .await
            .into_iter()
            .map(|outcome| {
                let content = match outcome.result {
                    Ok(content) => content,
                    Err(error) => {
                        warn!(url = %outcome.url, error = %error, "Scrape failed, continuing without content");
                        String::new()
                    }
                };
                (outcome.url, content)
            })
            .collect();

        let history = ctx.message_history();
        let summaries = join_all(hits.iter().map(|hit| {
            let content = pages.get(&hit.link).map(String::as_str).unwrap_or_default();
            self.summarise(query, hit, content, &history)
        }))
        .await;

        let results: Vec<ResultItem> = hits
            .into_iter()
            .zip(summaries)
            .map(|(hit, summary)| ResultItem {
                scraped_content: pages.get(&hit.link).cloned().unwrap_or_default(),
                date: hit.date.unwrap_or_default(),
                title: hit.title,
                url: hit.link,
                snippet: hit.snippet,
                summary,
            })
            .collect();

        let summarised = results.iter().filter(|r| r.is_summarised()).count();
        info!(query, results = results.len(), summarised, "Query researched");

        Ok(SearchRecord {
            query: query.to_string(),
            results,
        })
    }

    async fn summarise(&self, query: &str, hit: &SearchHit, content: &str, history: &str) -> String {
        if content.trim().is_empty() {
            return SUMMARY_FAILED.to_string();
        }

        let request = SummaryRequest {
            conversation_history: history,
            scraped_content: content,
            date: hit.date.as_deref().unwrap_or_default(),
            title: &hit.title,
            url: &hit.link,
            snippet: &hit.snippet,
            query,
        };

        let request = &request;
        let generate = move || async move {
            generate_text(
                self.provider.as_ref(),
                self.model.as_deref(),
                SYSTEM_PROMPT,
                &request.prompt(),
            )
            .await
        };

        let summary = match &self.cache {
            Some(cache) => cache.get_or_insert_with(request, generate).await,
            None => generate().await,
        };

        match summary {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => {
                warn!(url = %hit.link, "Summariser returned empty text");
                SUMMARY_FAILED.to_string()
            }
            Err(e) => {
                warn!(url = %hit.link, error = %e, "Summarisation failed");
                SUMMARY_FAILED.to_string()
            }
        }
    }
}
