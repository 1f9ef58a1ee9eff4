use serde::{Deserialize, Serialize};

use crate::cache::DEFAULT_TTL;
use crate::context::STEP_LIMIT;
use crate::research::DEFAULT_RESULTS_PER_QUERY;

/// Tunables for one [`DeepSearch`](crate::DeepSearch) instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Plan/search/decide cycles before an answer is forced.
    pub step_limit: usize,
    /// Search results fetched, scraped and summarised per query.
    pub results_per_query: usize,
    /// Summary cache lifetime in seconds. 0 disables the cache.
    pub cache_ttl_secs: u64,
    pub models: ModelRoles,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            step_limit: STEP_LIMIT,
            results_per_query: DEFAULT_RESULTS_PER_QUERY,
            cache_ttl_secs: DEFAULT_TTL.as_secs(),
            models: ModelRoles::default(),
        }
    }
}

/// Per-role model overrides. `None` uses the provider's default model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelRoles {
    pub safety: Option<String>,
    pub planner: Option<String>,
    pub summarizer: Option<String>,
    pub action: Option<String>,
    pub answer: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.step_limit, 5);
        assert_eq!(config.results_per_query, 5);
        assert_eq!(config.cache_ttl_secs, 21_600);
        assert_eq!(config.models, ModelRoles::default());
    }

    #[test]
    fn test_partial_deserialize() {
        let config: AgentConfig = serde_json::from_str(
            r#"{"step_limit": 3, "models": {"summarizer": "gpt-4o-mini"}}"#,
        )
        .unwrap();
        assert_eq!(config.step_limit, 3);
        assert_eq!(config.results_per_query, 5);
        assert_eq!(config.models.summarizer.as_deref(), Some("gpt-4o-mini"));
        assert_eq!(config.models.answer, None);
    }
}
