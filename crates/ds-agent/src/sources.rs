//! Citation list shown before the answer: one entry per distinct URL.

use std::collections::HashMap;

use ds_web::favicon_url;

use crate::context::SearchRecord;
use crate::events::SearchSource;

/// Build the citation list for a set of search records.
///
/// One entry per distinct URL, ordered by the URL's first appearance. When a
/// URL shows up more than once the last-seen title and snippet win.
pub fn dedupe_sources(records: &[SearchRecord]) -> Vec<SearchSource> {
    let mut sources: Vec<SearchSource> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for item in records.iter().flat_map(|r| &r.results) {
        match index.get(item.url.as_str()) {
            Some(&i) => {
                sources[i].title = item.title.clone();
                sources[i].snippet = item.snippet.clone();
            }
            None => {
                index.insert(item.url.as_str(), sources.len());
                sources.push(SearchSource {
                    title: item.title.clone(),
                    url: item.url.clone(),
                    snippet: item.snippet.clone(),
                    favicon: favicon_url(&item.url),
                });
            }
        }
    }

    sources
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ResultItem;

    fn item(url: &str, title: &str, snippet: &str) -> ResultItem {
        ResultItem {
            date: String::new(),
            title: title.to_string(),
            url: url.to_string(),
            snippet: snippet.to_string(),
            scraped_content: String::new(),
            summary: String::new(),
        }
    }

    #[test]
    fn test_shared_url_keeps_one_entry_with_last_seen_fields() {
        let records = vec![
            SearchRecord {
                query: "first".into(),
                results: vec![
                    item("https://a.example/x", "Old title", "old snippet"),
                    item("https://b.example/y", "B", "b"),
                ],
            },
            SearchRecord {
                query: "second".into(),
                results: vec![
                    item("https://c.example/z", "C", "c"),
                    item("https://a.example/x", "New title", "new snippet"),
                ],
            },
        ];

        let sources = dedupe_sources(&records);
        let urls: Vec<_> = sources.iter().map(|s| s.url.as_str()).collect();
        assert_eq!(
            urls,
            vec!["https://a.example/x", "https://b.example/y", "https://c.example/z"]
        );
        assert_eq!(sources[0].title, "New title");
        assert_eq!(sources[0].snippet, "new snippet");
        assert_eq!(
            sources[0].favicon.as_deref(),
            Some("https://www.google.com/s2/favicons?domain=a.example&sz=32")
        );
    }

    #[test]
    fn test_dedupe_is_idempotent() {
        let records = vec![SearchRecord {
            query: "q".into(),
            results: vec![item("https://a.example", "A", "a"), item("https://a.example", "A2", "a2")],
        }];
        let once = dedupe_sources(&records);
        let again = dedupe_sources(&[records[0].clone(), records[0].clone()]);
        assert_eq!(once, again);
        assert_eq!(once.len(), 1);
    }
}
