use anyhow::{Context, Result};
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use ds_agent::{AgentConfig, ModelRoles};
use ds_web::ScrapeConfig;

const ENV_PREFIX: &str = "DEEPSEARCH_";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub provider: ProviderSection,

    /// Per-role model overrides (safety, planner, summarizer, action, answer)
    pub models: ModelRoles,

    pub search: SearchSection,

    pub scrape: ScrapeSection,

    pub agent: AgentSection,
}

/// OpenAI-compatible chat completions endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSection {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub default_model: Option<String>,
}

/// Serper web search
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSection {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub results_per_query: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapeSection {
    pub timeout_secs: Option<u64>,
    pub max_content_chars: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub step_limit: Option<usize>,
    pub cache_ttl_secs: Option<u64>,
}

impl Config {
    /// Load `~/.config/deepsearch/config.toml`, then `DEEPSEARCH_*` env
    /// overrides, then the conventional API key variables.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// A missing file is not an error: env and flags may carry everything.
    pub fn load_from(path: &Path) -> Result<Self> {
        let figment = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));
        let config = Self::from_figment(figment)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
        Ok(config.with_key_fallbacks(|name| std::env::var(name).ok()))
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        Ok(figment.extract()?)
    }

    /// Fill missing API keys from `OPENAI_API_KEY` and `SERPER_API_KEY`.
    pub fn with_key_fallbacks(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if self.provider.api_key.is_none() {
            self.provider.api_key = lookup("OPENAI_API_KEY").filter(|k| !k.is_empty());
        }
        if self.search.api_key.is_none() {
            self.search.api_key = lookup("SERPER_API_KEY").filter(|k| !k.is_empty());
        }
        self
    }

    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        Ok(config_dir.join("deepsearch"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    pub fn provider_api_key(&self) -> Result<&str> {
        self.provider.api_key.as_deref().ok_or_else(|| {
            anyhow::anyhow!(
                "No model provider API key. Set OPENAI_API_KEY or [provider] api_key in {}",
                display_path()
            )
        })
    }

    pub fn search_api_key(&self) -> Result<&str> {
        self.search.api_key.as_deref().ok_or_else(|| {
            anyhow::anyhow!(
                "No search API key. Set SERPER_API_KEY or [search] api_key in {}",
                display_path()
            )
        })
    }

    /// Agent tunables with unset values left at their defaults.
    pub fn agent_config(&self) -> AgentConfig {
        let defaults = AgentConfig::default();
        AgentConfig {
            step_limit: self.agent.step_limit.unwrap_or(defaults.step_limit),
            results_per_query: self
                .search
                .results_per_query
                .unwrap_or(defaults.results_per_query),
            cache_ttl_secs: self.agent.cache_ttl_secs.unwrap_or(defaults.cache_ttl_secs),
            models: self.models.clone(),
        }
    }

    pub fn scrape_config(&self) -> ScrapeConfig {
        let defaults = ScrapeConfig::default();
        ScrapeConfig {
            timeout_secs: self.scrape.timeout_secs.unwrap_or(defaults.timeout_secs),
            max_content_chars: self
                .scrape
                .max_content_chars
                .unwrap_or(defaults.max_content_chars),
            user_agent: defaults.user_agent,
        }
    }
}

fn display_path() -> String {
    Config::config_path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| "~/.config/deepsearch/config.toml".to_string())
}

/// Show only the first four characters of a secret.
pub fn mask_secret(secret: &str) -> String {
    let prefix: String = secret.chars().take(4).collect();
    if secret.chars().count() <= 8 {
        "****".to_string()
    } else {
        format!("{}****", prefix)
    }
}
