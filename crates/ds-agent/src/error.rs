use thiserror::Error;

use ds_core::Error;

/// Why a research request was aborted. Each variant names the stage that
/// failed and carries the underlying error.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Safety check failed: {0}")]
    Safety(#[source] Error),

    #[error("Query planning failed: {0}")]
    Planner(#[source] Error),

    #[error("Search for \"{query}\" failed: {source}")]
    Search {
        query: String,
        #[source]
        source: Error,
    },

    #[error("Action selection failed: {0}")]
    ActionSelector(#[source] Error),

    #[error("Answer generation failed: {0}")]
    Answer(#[source] Error),

    #[error("Research cancelled")]
    Cancelled,
}

impl AgentError {
    pub fn search(query: impl Into<String>, source: Error) -> Self {
        match source {
            Error::Cancelled => Self::Cancelled,
            source => Self::Search {
                query: query.into(),
                source,
            },
        }
    }

    /// The model returned output that did not fit its schema.
    pub fn is_schema_violation(&self) -> bool {
        match self {
            Self::Safety(e) | Self::Planner(e) | Self::ActionSelector(e) | Self::Answer(e) => {
                e.is_schema_violation()
            }
            Self::Search { source, .. } => source.is_schema_violation(),
            Self::Cancelled => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_error_display() {
        let err = AgentError::search("rust news", Error::search("quota exceeded"));
        assert_eq!(
            err.to_string(),
            "Search for \"rust news\" failed: Search error: quota exceeded"
        );
    }

    #[test]
    fn test_cancelled_search_becomes_cancelled() {
        assert!(matches!(
            AgentError::search("q", Error::Cancelled),
            AgentError::Cancelled
        ));
    }

    #[test]
    fn test_schema_violation_passthrough() {
        let err = AgentError::Planner(Error::schema("query_plan", "got 6"));
        assert!(err.is_schema_violation());
        assert!(!AgentError::Cancelled.is_schema_violation());
    }
}
