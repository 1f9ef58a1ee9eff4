use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use futures::StreamExt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ds_agent::{
    run_eval, with_on_finish, Action, AgentConfig, Annotation, CollectingSink, DeepSearch,
    EvalCase, Outcome, ProgressSink, ResearchRequest, UserLocation, DEFAULT_SCORERS,
};
use ds_core::Message;
use ds_providers::OpenAIProvider;
use ds_web::{HttpScraper, SerperClient};

mod config;
mod setup;

use config::{mask_secret, Config};

/// Log level for tracing output
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    /// Everything, including streamed deltas
    Trace,
    /// Prompt sizes, request shapes, per-query search details
    Debug,
    /// One line per stage: plan, query researched, action selected
    Info,
    /// Only degraded scrapes, failed summaries and errors
    Warn,
    Error,
}

impl LogLevel {
    fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Parser)]
#[command(name = "deepsearch")]
#[command(author, version, about = "Deep research agent: plans searches, reads the web, answers with citations", long_about = None)]
pub struct Cli {
    /// Question to research
    pub question: Option<String>,

    /// Model to use for every role (overrides config)
    #[arg(short, long)]
    pub model: Option<String>,

    /// Base URL of the OpenAI-compatible API (overrides config)
    #[arg(long)]
    pub base_url: Option<String>,

    /// Maximum research cycles before answering
    #[arg(long)]
    pub steps: Option<usize>,

    /// Search results to read per query
    #[arg(long)]
    pub results: Option<usize>,

    /// Scrape timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// City hint for location-sensitive questions
    #[arg(long)]
    pub city: Option<String>,

    /// Country hint for location-sensitive questions
    #[arg(long)]
    pub country: Option<String>,

    /// Latitude hint
    #[arg(long, allow_hyphen_values = true)]
    pub lat: Option<f64>,

    /// Longitude hint
    #[arg(long, allow_hyphen_values = true)]
    pub lon: Option<f64>,

    /// JSON file with earlier conversation turns ([{"role": "user", "content": "..."}])
    #[arg(long)]
    pub history: Option<PathBuf>,

    /// Print one JSON document (annotations, outcome, answer) instead of streaming text
    #[arg(long)]
    pub json: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, value_enum, default_value = "warn")]
    pub log_level: LogLevel,

    /// Enable debug logging (shorthand for --log-level debug)
    #[arg(short, long)]
    pub debug: bool,

    /// Write debug logs to file (JSON-lines format)
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the effective configuration (secrets masked)
    Config,
    /// Write a configuration template to ~/.config/deepsearch
    Setup,
    /// Run every case in a dataset file and score the answers
    Eval {
        /// JSON array of {"id", "input": [messages], "expected"} cases
        dataset: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.debug {
        LogLevel::Debug
    } else {
        cli.log_level
    };

    // RUST_LOG wins over the flags when set
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_filter()));

    if let Some(log_path) = &cli.log_file {
        let file = std::fs::File::create(log_path)
            .with_context(|| format!("Failed to create log file: {}", log_path.display()))?;
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::sync::Mutex::new(file))
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    // Handle setup before config is required
    if matches!(&cli.command, Some(Commands::Setup)) {
        return setup::run();
    }

    let config = Config::load()?;

    match &cli.command {
        Some(Commands::Config) => show_config(&config),
        Some(Commands::Setup) => unreachable!(),
        Some(Commands::Eval { dataset }) => eval_mode(&cli, &config, dataset).await,
        None => research_mode(&cli, &config).await,
    }
}

async fn research_mode(cli: &Cli, config: &Config) -> Result<()> {
    let messages = build_messages(cli.history.as_deref(), cli.question.as_deref())?;
    let mut request = ResearchRequest::new(messages);
    if let Some(location) = location_from_flags(cli) {
        request = request.with_location(location);
    }

    let agent = build_agent(cli, config)?;

    let cancel = cancel_on_ctrl_c();

    if cli.json {
        run_json(&agent, request, cancel).await
    } else {
        run_streaming(&agent, request, cancel).await
    }
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancelling...");
            on_signal.cancel();
        }
    });
    cancel
}

async fn eval_mode(cli: &Cli, config: &Config, dataset: &Path) -> Result<()> {
    let cases = load_dataset(dataset)?;
    let agent = build_agent(cli, config)?;
    let cancel = cancel_on_ctrl_c();

    let report = run_eval(&agent, &cases, DEFAULT_SCORERS, &cancel)
        .await
        .context("Evaluation cancelled")?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    for result in &report.results {
        let id = result.id.as_deref().unwrap_or("?");
        match (&result.error, result.outcome) {
            (Some(error), _) => println!("FAIL  {}  {}", id, first_line(error)),
            (None, outcome) => {
                let scores: Vec<String> = result
                    .scores
                    .iter()
                    .map(|(name, score)| format!("{}={:.0}", name, score))
                    .collect();
                println!(
                    "{:<5} {}  {}  {}",
                    outcome.unwrap_or("?"),
                    id,
                    scores.join(" "),
                    result.question
                );
            }
        }
    }

    println!();
    for scorer in DEFAULT_SCORERS {
        println!("{}: {:.2}", scorer.name, report.mean(scorer.name));
    }
    if report.failures() > 0 {
        println!("failed: {}/{}", report.failures(), report.results.len());
    }
    Ok(())
}

fn load_dataset(path: &Path) -> Result<Vec<EvalCase>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read dataset: {}", path.display()))?;
    let cases: Vec<EvalCase> = serde_json::from_str(&content)
        .with_context(|| format!("Invalid dataset: {}", path.display()))?;
    if cases.is_empty() {
        anyhow::bail!("Dataset {} has no cases", path.display());
    }
    Ok(cases)
}

/// Earlier turns from `--history`, then the question as the latest user turn.
fn build_messages(history: Option<&Path>, question: Option<&str>) -> Result<Vec<Message>> {
    let mut messages: Vec<Message> = match history {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read history file: {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Invalid history file: {}", path.display()))?
        }
        None => Vec::new(),
    };

    if let Some(question) = question.map(str::trim).filter(|q| !q.is_empty()) {
        messages.push(Message::user(question));
    }

    if !messages.iter().any(Message::is_user) {
        anyhow::bail!("Nothing to research. Pass a question, e.g. deepsearch \"What is the tallest building in Europe?\"");
    }
    Ok(messages)
}

fn location_from_flags(cli: &Cli) -> Option<UserLocation> {
    let location = UserLocation {
        latitude: cli.lat,
        longitude: cli.lon,
        city: cli.city.clone(),
        country: cli.country.clone(),
    };
    (!location.is_empty()).then_some(location)
}

/// Flags override the config file, which overrides built-in defaults.
fn resolve_agent_config(cli: &Cli, config: &Config) -> AgentConfig {
    let mut agent = config.agent_config();
    if let Some(steps) = cli.steps {
        agent.step_limit = steps;
    }
    if let Some(results) = cli.results {
        agent.results_per_query = results;
    }
    if let Some(model) = &cli.model {
        agent.models.safety = Some(model.clone());
        agent.models.planner = Some(model.clone());
        agent.models.summarizer = Some(model.clone());
        agent.models.action = Some(model.clone());
        agent.models.answer = Some(model.clone());
    }
    agent
}

fn build_agent(cli: &Cli, config: &Config) -> Result<DeepSearch> {
    let mut provider = OpenAIProvider::new(config.provider_api_key()?);
    if let Some(base_url) = cli.base_url.as_ref().or(config.provider.base_url.as_ref()) {
        provider = provider.with_base_url(base_url);
    }
    if let Some(model) = &config.provider.default_model {
        provider = provider.with_default_model(model);
    }

    let mut search = SerperClient::new(config.search_api_key()?);
    if let Some(base_url) = &config.search.base_url {
        search = search.with_base_url(base_url);
    }

    let mut scrape_config = config.scrape_config();
    if let Some(timeout) = cli.timeout {
        scrape_config.timeout_secs = timeout;
    }

    let agent_config = resolve_agent_config(cli, config);
    tracing::debug!(
        step_limit = agent_config.step_limit,
        results_per_query = agent_config.results_per_query,
        cache_ttl_secs = agent_config.cache_ttl_secs,
        "Agent configured"
    );

    Ok(DeepSearch::new(
        Arc::new(provider),
        Arc::new(search),
        Arc::new(HttpScraper::new(scrape_config)),
        agent_config,
    ))
}

/// Progress to stderr, answer text to stdout as it arrives.
async fn run_streaming(
    agent: &DeepSearch,
    request: ResearchRequest,
    cancel: CancellationToken,
) -> Result<()> {
    let interactive = atty::is(atty::Stream::Stderr);
    let printer = move |annotation: Annotation| print_annotation(&annotation, interactive);

    let response = agent
        .run(request, &printer, cancel)
        .await
        .context("Research failed")?;

    match &response.outcome {
        Outcome::BestEffort => eprintln!("\nStep limit reached; answering with what was found.\n"),
        Outcome::Refused { reason } => tracing::info!(reason = %reason, "Request refused"),
        Outcome::Answered => {}
    }
    if interactive {
        eprintln!();
    }

    let mut stream = with_on_finish(response.stream, |answer| {
        tracing::info!(answer_chars = answer.chars().count(), "Answer complete");
    });
    let mut stdout = std::io::stdout();
    while let Some(chunk) = stream.next().await {
        let text = chunk.context("Answer stream failed")?;
        write!(stdout, "{}", text)?;
        stdout.flush()?;
    }
    writeln!(stdout)?;

    Ok(())
}

fn print_annotation(annotation: &Annotation, interactive: bool) {
    let bullet = if interactive { "›" } else { "-" };
    match annotation {
        Annotation::QueryPlan { plan, queries } => {
            eprintln!("{} Plan: {}", bullet, first_line(plan));
            for query in queries {
                eprintln!("    search: {}", query);
            }
        }
        Annotation::NewAction { action } => match action {
            Action::Continue { title, feedback, .. } => {
                eprintln!("{} Continue: {}", bullet, title);
                eprintln!("    missing: {}", first_line(feedback));
            }
            Action::Answer { title, .. } => eprintln!("{} Answer: {}", bullet, title),
        },
        Annotation::Sources { sources } => {
            eprintln!("{} Sources:", bullet);
            for (i, source) in sources.iter().enumerate() {
                eprintln!("    [{}] {} <{}>", i + 1, source.title, source.url);
            }
        }
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default()
}

/// Collect everything and print a single JSON document.
async fn run_json(
    agent: &DeepSearch,
    request: ResearchRequest,
    cancel: CancellationToken,
) -> Result<()> {
    let sink = CollectingSink::new();
    let response = agent
        .run(request, &sink as &dyn ProgressSink, cancel)
        .await
        .context("Research failed")?;

    let answer = ds_core::collect_text(response.stream)
        .await
        .context("Answer stream failed")?;

    let reason = match &response.outcome {
        Outcome::Refused { reason } => Some(reason.clone()),
        _ => None,
    };

    let document = serde_json::json!({
        "outcome": response.outcome.label(),
        "refusal_reason": reason,
        "steps": response.context.step(),
        "annotations": sink.annotations(),
        "answer": answer,
    });
    println!("{}", serde_json::to_string_pretty(&document)?);

    Ok(())
}

fn show_config(config: &Config) -> Result<()> {
    let path = Config::config_path()?;
    println!("Configuration ({}):", path.display());

    println!("\nProvider:");
    match &config.provider.api_key {
        Some(key) => println!("  API key: {}", mask_secret(key)),
        None => println!("  API key: (not set)"),
    }
    if let Some(base_url) = &config.provider.base_url {
        println!("  Base URL: {}", base_url);
    }
    if let Some(model) = &config.provider.default_model {
        println!("  Default model: {}", model);
    }

    let agent = config.agent_config();
    println!("\nModels:");
    for (role, model) in [
        ("safety", &agent.models.safety),
        ("planner", &agent.models.planner),
        ("summarizer", &agent.models.summarizer),
        ("action", &agent.models.action),
        ("answer", &agent.models.answer),
    ] {
        println!("  {}: {}", role, model.as_deref().unwrap_or("(provider default)"));
    }

    println!("\nSearch:");
    match &config.search.api_key {
        Some(key) => println!("  API key: {}", mask_secret(key)),
        None => println!("  API key: (not set)"),
    }
    if let Some(base_url) = &config.search.base_url {
        println!("  Base URL: {}", base_url);
    }
    println!("  Results per query: {}", agent.results_per_query);

    let scrape = config.scrape_config();
    println!("\nScrape:");
    println!("  Timeout: {}s", scrape.timeout_secs);
    println!("  Max content chars: {}", scrape.max_content_chars);

    println!("\nAgent:");
    println!("  Step limit: {}", agent.step_limit);
    if agent.cache_ttl_secs == 0 {
        println!("  Summary cache: disabled");
    } else {
        println!("  Summary cache TTL: {}s", agent.cache_ttl_secs);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("deepsearch").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_parse_question_and_flags() {
        let cli = parse(&["--steps", "2", "--lat", "-33.9", "--city", "Cape Town", "Is it raining?"]);
        assert_eq!(cli.question.as_deref(), Some("Is it raining?"));
        assert_eq!(cli.steps, Some(2));

        let location = location_from_flags(&cli).unwrap();
        assert_eq!(location.latitude, Some(-33.9));
        assert_eq!(location.city.as_deref(), Some("Cape Town"));
        assert_eq!(location.country, None);

        assert!(location_from_flags(&parse(&["q"])).is_none());
    }

    #[test]
    fn test_flags_override_config() {
        let config = Config::default();
        let cli = parse(&["--steps", "3", "--results", "2", "--model", "gpt-4o-mini", "q"]);

        let agent = resolve_agent_config(&cli, &config);
        assert_eq!(agent.step_limit, 3);
        assert_eq!(agent.results_per_query, 2);
        assert_eq!(agent.models.planner.as_deref(), Some("gpt-4o-mini"));
        assert_eq!(agent.models.answer.as_deref(), Some("gpt-4o-mini"));

        let defaults = resolve_agent_config(&parse(&["q"]), &config);
        assert_eq!(defaults, AgentConfig::default());
    }

    #[test]
    fn test_build_messages() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        std::fs::write(
            &path,
            r#"[{"role": "user", "content": "Who won in 2022?"}, {"role": "assistant", "content": "Argentina."}]"#,
        )
        .unwrap();

        let messages = build_messages(Some(&path), Some("And in 2018?")).unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[2], Message::user("And in 2018?"));

        assert!(build_messages(None, Some("  ")).is_err());
        assert!(build_messages(None, None).is_err());
    }

    #[test]
    fn test_invalid_history_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        std::fs::write(&path, "not json").unwrap();

        let err = build_messages(Some(&path), Some("q")).unwrap_err();
        assert!(err.to_string().contains("Invalid history file"));
    }

    #[test]
    fn test_parse_eval_subcommand() {
        let cli = parse(&["--json", "eval", "evals/regression.json"]);
        assert!(cli.json);
        match cli.command {
            Some(Commands::Eval { dataset }) => {
                assert_eq!(dataset, PathBuf::from("evals/regression.json"))
            }
            _ => panic!("expected eval subcommand"),
        }
    }

    #[test]
    fn test_load_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dataset.json");
        std::fs::write(
            &path,
            r#"[{"id": "sqrt", "input": [{"role": "user", "content": "What is the square root of 144?"}], "expected": "12"}]"#,
        )
        .unwrap();

        let cases = load_dataset(&path).unwrap();
        assert_eq!(cases.len(), 1);
        assert_eq!(cases[0].question(), "What is the square root of 144?");

        std::fs::write(&path, "[]").unwrap();
        assert!(load_dataset(&path).unwrap_err().to_string().contains("no cases"));

        std::fs::write(&path, r#"[{"id": "x"}]"#).unwrap();
        assert!(load_dataset(&path).unwrap_err().to_string().contains("Invalid dataset"));
    }

    #[test]
    fn test_bundled_datasets_parse() {
        let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../evals");
        for name in ["initial.json", "dev.json", "regression.json"] {
            let cases = load_dataset(&root.join(name)).unwrap();
            assert!(cases.iter().all(|c| !c.question().is_empty()), "{name}");
        }
    }
}
