//! Blocking utilities for CPU-intensive operations.
//!
//! HTML parsing of scraped pages is the main customer: a large page can take
//! long enough to stall other in-flight scrapes if parsed on the runtime.

use crate::Error;

/// Execute a CPU-intensive closure on Tokio's blocking threadpool.
///
/// # Example
///
/// ```ignore
/// let markdown = run_blocking(move || html_to_markdown(&html, None)).await?;
/// ```
pub async fn run_blocking<F, T>(f: F) -> Result<T, Error>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Unknown(format!("Blocking task failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_blocking_returns_value() {
        let len = run_blocking(|| "<p>hello</p>".repeat(100).len()).await.unwrap();
        assert_eq!(len, 1200);
    }
}
