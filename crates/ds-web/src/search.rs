//! Web search through the Serper Google Search API.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use ds_core::Error;

const SERPER_BASE_URL: &str = "https://google.serper.dev";

/// One organic search result, in the provider's ranking order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub link: String,
    #[serde(default)]
    pub snippet: String,
    #[serde(default)]
    pub date: Option<String>,
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Return at most `count` organic results for `query`.
    ///
    /// Implementations must give up with [`Error::Cancelled`] once `cancel`
    /// fires.
    async fn search(
        &self,
        query: &str,
        count: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<SearchHit>, Error>;
}

pub struct SerperClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl SerperClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::builder()
                .user_agent(concat!("deepsearch/", env!("CARGO_PKG_VERSION")))
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            api_key: api_key.into(),
            base_url: SERPER_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn request(&self, query: &str, count: usize) -> Result<Vec<SearchHit>, Error> {
        let body = SerperRequest { q: query, num: count };

        let response = self
            .client
            .post(format!("{}/search", self.base_url))
            .header("X-API-KEY", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::network(format!("Serper request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 | 403 => Error::auth(format!("Serper rejected the API key: {}", text)),
                429 => Error::rate_limit(text),
                code => Error::search(format!("Serper returned HTTP {}: {}", code, text)),
            });
        }

        let parsed: SerperResponse = response
            .json()
            .await
            .map_err(|e| Error::search(format!("Failed to parse Serper response: {}", e)))?;

        let mut hits = parsed.organic;
        hits.truncate(count);
        Ok(hits)
    }
}

#[async_trait]
impl SearchProvider for SerperClient {
    async fn search(
        &self,
        query: &str,
        count: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<SearchHit>, Error> {
        debug!(query, count, "Serper search");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = self.request(query, count) => result,
        }
    }
}

#[derive(Serialize)]
struct SerperRequest<'a> {
    q: &'a str,
    num: usize,
}

#[derive(Deserialize)]
struct SerperResponse {
    #[serde(default)]
    organic: Vec<SearchHit>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORGANIC: &str = r#"{
        "searchParameters": {"q": "capital of france"},
        "organic": [
            {"title": "Paris - Wikipedia", "link": "https://en.wikipedia.org/wiki/Paris", "snippet": "Paris is the capital of France.", "date": "2024-05-01", "position": 1},
            {"title": "France facts", "link": "https://example.com/france", "snippet": "Capital: Paris", "position": 2},
            {"title": "Third", "link": "https://example.com/3", "position": 3}
        ]
    }"#;

    #[tokio::test]
    async fn test_search_parses_organic_results() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/search")
            .match_header("x-api-key", "secret")
            .match_body(mockito::Matcher::PartialJson(
                serde_json::json!({"q": "capital of france", "num": 2}),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(ORGANIC)
            .create_async()
            .await;

        let client = SerperClient::new("secret").with_base_url(server.url());
        let hits = client
            .search("capital of france", 2, &CancellationToken::new())
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].link, "https://en.wikipedia.org/wiki/Paris");
        assert_eq!(hits[0].date.as_deref(), Some("2024-05-01"));
        assert_eq!(hits[1].date, None);
    }

    #[tokio::test]
    async fn test_search_missing_organic_is_empty() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/search")
            .with_status(200)
            .with_body(r#"{"searchParameters": {}}"#)
            .create_async()
            .await;

        let client = SerperClient::new("k").with_base_url(server.url());
        let hits = client.search("q", 5, &CancellationToken::new()).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_search_http_errors() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/search")
            .with_status(403)
            .with_body("forbidden")
            .create_async()
            .await;

        let client = SerperClient::new("bad").with_base_url(server.url());
        let err = client
            .search("q", 5, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_auth_error());
    }

    #[tokio::test]
    async fn test_search_honours_cancellation() {
        let client = SerperClient::new("k").with_base_url("http://127.0.0.1:9");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = client.search("q", 5, &cancel).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }
}
