//! Offline evaluation: run a dataset of conversations through the agent and
//! score the answers.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use ds_core::{collect_text, Message};

use crate::agent_loop::{DeepSearch, ResearchRequest};
use crate::error::AgentError;
use crate::events::NoopSink;

static MARKDOWN_LINK: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\(([^)]+)\)").ok());

/// One dataset entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalCase {
    #[serde(default)]
    pub id: Option<String>,
    pub input: Vec<Message>,
    /// Reference answer, kept for human review.
    #[serde(default)]
    pub expected: Option<String>,
}

impl EvalCase {
    /// The latest user turn.
    pub fn question(&self) -> &str {
        self.input
            .iter()
            .rev()
            .find(|m| m.is_user())
            .map(|m| m.content.as_str())
            .unwrap_or_default()
    }
}

/// A named answer metric in `[0, 1]`.
#[derive(Clone, Copy)]
pub struct Scorer {
    pub name: &'static str,
    pub score: fn(&EvalCase, &str) -> f64,
}

/// 1 when the answer carries at least one markdown link.
pub const CONTAINS_LINKS: Scorer = Scorer {
    name: "contains_links",
    score: |_, answer| {
        if MARKDOWN_LINK.as_ref().is_some_and(|re| re.is_match(answer)) {
            1.0
        } else {
            0.0
        }
    },
};

pub const DEFAULT_SCORERS: &[Scorer] = &[CONTAINS_LINKS];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvalResult {
    pub id: Option<String>,
    pub question: String,
    /// `answered`, `best_effort` or `refused`; `None` when the run failed.
    pub outcome: Option<&'static str>,
    pub answer: String,
    pub scores: BTreeMap<&'static str, f64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EvalReport {
    pub results: Vec<EvalResult>,
}

impl EvalReport {
    /// Mean of one scorer over every case. Failed cases count as zero.
    pub fn mean(&self, scorer: &str) -> f64 {
        if self.results.is_empty() {
            return 0.0;
        }
        let total: f64 = self
            .results
            .iter()
            .map(|r| r.scores.get(scorer).copied().unwrap_or(0.0))
            .sum();
        total / self.results.len() as f64
    }

    pub fn failures(&self) -> usize {
        self.results.iter().filter(|r| r.error.is_some()).count()
    }
}

/// Run every case in order and score the answers.
///
/// A case that fails is recorded with its error and zero scores; only
/// cancellation stops the run.
pub async fn run_eval(
    agent: &DeepSearch,
    cases: &[EvalCase],
    scorers: &[Scorer],
    cancel: &CancellationToken,
) -> Result<EvalReport, AgentError> {
    let mut report = EvalReport::default();

    for (i, case) in cases.iter().enumerate() {
        let id = case.id.clone().unwrap_or_else(|| format!("case-{}", i + 1));
        let question = case.question().to_string();
        info!(case = %id, "Evaluating");

        let mut result = EvalResult {
            id: Some(id.clone()),
            question,
            outcome: None,
            answer: String::new(),
            scores: scorers.iter().map(|s| (s.name, 0.0)).collect(),
            error: None,
        };

        match run_case(agent, case, cancel).await {
            Ok((outcome, answer)) => {
                for scorer in scorers {
                    result.scores.insert(scorer.name, (scorer.score)(case, &answer));
                }
                result.outcome = Some(outcome);
                result.answer = answer;
            }
            Err(AgentError::Cancelled) => return Err(AgentError::Cancelled),
            Err(e) => {
                warn!(case = %id, error = %e, "Case failed");
                result.error = Some(e.to_string());
            }
        }

        report.results.push(result);
    }

    Ok(report)
}

async fn run_case(
    agent: &DeepSearch,
    case: &EvalCase,
    cancel: &CancellationToken,
) -> Result<(&'static str, String), AgentError> {
    let request = ResearchRequest::new(case.input.clone());
    let response = agent.run(request, &NoopSink, cancel.clone()).await?;
    let answer = collect_text(response.stream)
        .await
        .map_err(AgentError::Answer)?;
    Ok((response.outcome.label(), answer))
}
