//! Research context: the state one research request accumulates.
//!
//! The context is owned by a single [`DeepSearch::run`](crate::DeepSearch::run)
//! invocation. Concurrent research tasks only ever see `&ResearchContext`;
//! every mutation happens in the loop after their results are joined.

use serde::{Deserialize, Serialize};

use ds_core::{Message, Role};

use crate::events::SearchSource;
use crate::sources::dedupe_sources;

/// Number of plan/search/decide cycles before an answer is forced.
pub const STEP_LIMIT: usize = 5;

/// Summary placeholder for results whose page could not be scraped or
/// summarised.
pub const SUMMARY_FAILED: &str = "summarisation failed";

/// Coarse geographic hint about the user. Every part is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserLocation {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub city: Option<String>,
    pub country: Option<String>,
}

impl UserLocation {
    pub fn is_empty(&self) -> bool {
        self.latitude.is_none()
            && self.longitude.is_none()
            && self.city.is_none()
            && self.country.is_none()
    }
}

/// One scraped and summarised search result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultItem {
    /// Publication date as reported by the search provider; may be empty.
    pub date: String,
    pub title: String,
    pub url: String,
    pub snippet: String,
    /// Page content, empty when the scrape failed.
    pub scraped_content: String,
    /// Summary anchored to the research goal, or [`SUMMARY_FAILED`].
    pub summary: String,
}

impl ResultItem {
    pub fn is_summarised(&self) -> bool {
        self.summary != SUMMARY_FAILED
    }
}

/// All results for one planned query, in search ranking order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRecord {
    pub query: String,
    pub results: Vec<ResultItem>,
}

#[derive(Debug, Clone)]
pub struct ResearchContext {
    messages: Vec<Message>,
    step: usize,
    step_limit: usize,
    search_history: Vec<SearchRecord>,
    last_feedback: String,
    location: Option<UserLocation>,
}

impl ResearchContext {
    pub fn new(messages: Vec<Message>, location: Option<UserLocation>) -> Self {
        Self {
            messages,
            step: 0,
            step_limit: STEP_LIMIT,
            search_history: Vec::new(),
            last_feedback: String::new(),
            location: location.filter(|l| !l.is_empty()),
        }
    }

    /// Override the cycle budget. A limit of zero is treated as one so the
    /// loop always researches at least once.
    pub fn with_step_limit(mut self, step_limit: usize) -> Self {
        self.step_limit = step_limit.max(1);
        self
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// The conversation as a role-tagged transcript. System messages are
    /// not part of the transcript.
    pub fn message_history(&self) -> String {
        self.messages
            .iter()
            .filter_map(|message| {
                let tag = match message.role {
                    Role::User => "User",
                    Role::Assistant => "Assistant",
                    Role::System => return None,
                };
                Some(format!("<{tag}>{}</{tag}>", message.content))
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Content of the first user message, empty if there is none.
    pub fn initial_question(&self) -> &str {
        self.messages
            .iter()
            .find(|m| m.is_user())
            .map(|m| m.content.as_str())
            .unwrap_or_default()
    }

    /// Content of the last user message, empty if there is none.
    pub fn latest_user_message(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|m| m.is_user())
            .map(|m| m.content.as_str())
            .unwrap_or_default()
    }

    /// Every search so far, rendered as one section per query.
    pub fn search_history(&self) -> String {
        self.search_history
            .iter()
            .map(render_record)
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Location bullet list, or an empty string when no location is known.
    pub fn user_location(&self) -> String {
        let Some(location) = &self.location else {
            return String::new();
        };

        fn or_unknown<T: ToString>(value: &Option<T>) -> String {
            value
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "unknown".to_string())
        }

        [
            format!("- lat: {}", or_unknown(&location.latitude)),
            format!("- lon: {}", or_unknown(&location.longitude)),
            format!("- city: {}", or_unknown(&location.city)),
            format!("- country: {}", or_unknown(&location.country)),
        ]
        .join("\n")
    }

    pub fn location(&self) -> Option<&UserLocation> {
        self.location.as_ref()
    }

    pub fn report_search(&mut self, record: SearchRecord) {
        self.search_history.push(record);
    }

    pub fn report_searches(&mut self, records: impl IntoIterator<Item = SearchRecord>) {
        self.search_history.extend(records);
    }

    pub fn records(&self) -> &[SearchRecord] {
        &self.search_history
    }

    /// Citation list over every result so far, one entry per URL.
    pub fn sources(&self) -> Vec<SearchSource> {
        dedupe_sources(&self.search_history)
    }

    pub fn increment_step(&mut self) {
        self.step += 1;
    }

    pub fn step(&self) -> usize {
        self.step
    }

    pub fn step_limit(&self) -> usize {
        self.step_limit
    }

    pub fn should_stop(&self) -> bool {
        self.step >= self.step_limit
    }

    pub fn set_last_feedback(&mut self, feedback: impl Into<String>) {
        self.last_feedback = feedback.into();
    }

    pub fn last_feedback(&self) -> &str {
        &self.last_feedback
    }
}

fn render_record(record: &SearchRecord) -> String {
    let mut sections = vec![format!("## Query: \"{}\"", record.query)];
    sections.extend(record.results.iter().map(|item| {
        [
            format!("### {} - {}", item.date, item.title),
            item.url.clone(),
            item.snippet.clone(),
            format!("<summary>\n{}\n</summary>", item.summary),
        ]
        .join("\n\n")
    }));
    sections.join("\n\n")
}

/// Today's date for prompts, e.g. `2025-03-14 (Friday, March 14, 2025 09:30 UTC)`.
pub(crate) fn current_date() -> String {
    let now = chrono::Utc::now();
    format!(
        "{} ({})",
        now.format("%Y-%m-%d"),
        now.format("%A, %B %-d, %Y %H:%M UTC")
    )
}
