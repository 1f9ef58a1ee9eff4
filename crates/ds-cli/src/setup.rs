use anyhow::{Context, Result};
use std::path::Path;

use crate::config::Config;

pub const CONFIG_TEMPLATE: &str = r#"# deepsearch configuration
#
# API keys are read from environment variables by default:
#   OPENAI_API_KEY, SERPER_API_KEY
# Any value below can also be overridden with DEEPSEARCH_<SECTION>__<KEY>,
# e.g. DEEPSEARCH_AGENT__STEP_LIMIT=3

# ── Model provider ───────────────────────────────────────────────
# Any OpenAI-compatible chat completions endpoint.

[provider]
# api_key = "sk-..."              # or set OPENAI_API_KEY env var
# base_url = "https://api.openai.com/v1"
default_model = "gpt-4o"

# ── Per-role models ──────────────────────────────────────────────
# Unset roles use provider.default_model.

[models]
# safety = "gpt-4o-mini"
# planner = "gpt-4o"
# summarizer = "gpt-4o-mini"
# action = "gpt-4o"
# answer = "gpt-4o"

# ── Web search ───────────────────────────────────────────────────

[search]
# api_key = "..."                 # or set SERPER_API_KEY env var
results_per_query = 5

# ── Scraping ─────────────────────────────────────────────────────

[scrape]
timeout_secs = 30
max_content_chars = 50000

# ── Research loop ────────────────────────────────────────────────

[agent]
step_limit = 5
cache_ttl_secs = 21600            # 0 disables the summary cache
"#;

pub fn run() -> Result<()> {
    let config_dir = Config::config_dir()?;
    let config_path = config_dir.join("config.toml");

    std::fs::create_dir_all(&config_dir)
        .with_context(|| format!("Failed to create config directory: {}", config_dir.display()))?;

    if config_path.exists() {
        println!("Existing config file found:");
        println!("  {}", config_path.display());
        print!("\nOverwrite? (The existing file will be backed up) [y/N] ");

        use std::io::Write;
        std::io::stdout().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Setup cancelled.");
            return Ok(());
        }

        backup_file(&config_path)?;
    }

    std::fs::write(&config_path, CONFIG_TEMPLATE)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;
    println!("Created {}", config_path.display());

    println!("\nNext steps:");
    println!("  1. Set your API keys:  export OPENAI_API_KEY=\"sk-...\" SERPER_API_KEY=\"...\"");
    println!("  2. Ask a question:     deepsearch \"What changed in Rust 1.80?\"");

    Ok(())
}

/// Back up a file to <name>.bak, appending a timestamp if .bak already exists.
fn backup_file(path: &Path) -> Result<()> {
    let mut backup = path.with_extension("toml.bak");

    if backup.exists() {
        let timestamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        backup = path.with_extension(format!("toml.bak.{}", timestamp));
    }

    std::fs::rename(path, &backup)
        .with_context(|| format!("Failed to back up {} to {}", path.display(), backup.display()))?;
    println!("  Backed up to {}", backup.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_parses() {
        let config: Config = toml::from_str(CONFIG_TEMPLATE).unwrap();
        assert_eq!(config.provider.default_model.as_deref(), Some("gpt-4o"));
        assert_eq!(config.provider.api_key, None);

        let agent = config.agent_config();
        assert_eq!(agent, ds_agent::AgentConfig::default());
    }

    #[test]
    fn test_backup_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        std::fs::write(&path, "first").unwrap();
        backup_file(&path).unwrap();
        assert!(!path.exists());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("config.toml.bak")).unwrap(),
            "first"
        );

        std::fs::write(&path, "second").unwrap();
        backup_file(&path).unwrap();
        let backups = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(backups, 2);
    }
}
