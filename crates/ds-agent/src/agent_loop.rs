//! The research loop: safety check, then plan -> search -> decide until the
//! model answers or the step budget runs out.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use ds_core::{Message, Provider, TextStream};
use ds_web::{Scraper, SearchProvider};

use crate::action::ActionSelector;
use crate::answer::{AnswerGenerator, AnswerOptions};
use crate::cache::SummaryCache;
use crate::config::AgentConfig;
use crate::context::{ResearchContext, UserLocation};
use crate::error::AgentError;
use crate::events::{Annotation, ProgressSink};
use crate::planner::QueryPlanner;
use crate::research::SearchAndSummarize;
use crate::safety::SafetyGate;

/// Input to one research run.
#[derive(Debug, Clone, Default)]
pub struct ResearchRequest {
    pub messages: Vec<Message>,
    pub location: Option<UserLocation>,
}

impl ResearchRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            location: None,
        }
    }

    /// A single-question conversation.
    pub fn question(question: impl Into<String>) -> Self {
        Self::new(vec![Message::user(question)])
    }

    pub fn with_location(mut self, location: UserLocation) -> Self {
        self.location = Some(location);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The model decided it had enough information.
    Answered,
    /// The step budget ran out; the answer says it may be incomplete.
    BestEffort,
    /// The safety gate turned the request down. No research was done.
    Refused { reason: String },
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Answered => "answered",
            Self::BestEffort => "best_effort",
            Self::Refused { .. } => "refused",
        }
    }
}

pub struct AgentResponse {
    pub outcome: Outcome,
    /// Final research state, for callers that want the evidence.
    pub context: ResearchContext,
    /// The answer (or refusal) text.
    pub stream: TextStream,
}

pub struct DeepSearch {
    safety: SafetyGate,
    planner: QueryPlanner,
    research: SearchAndSummarize,
    selector: ActionSelector,
    answerer: AnswerGenerator,
    step_limit: usize,
}

impl DeepSearch {
    pub fn new(
        provider: Arc<dyn Provider>,
        search: Arc<dyn SearchProvider>,
        scraper: Arc<dyn Scraper>,
        config: AgentConfig,
    ) -> Self {
        let models = config.models;

        let mut research =
            SearchAndSummarize::new(search, scraper, provider.clone(), models.summarizer)
                .with_results_per_query(config.results_per_query);
        if config.cache_ttl_secs > 0 {
            research = research.with_cache(Arc::new(SummaryCache::new(
                "summarise_url",
                Duration::from_secs(config.cache_ttl_secs),
            )));
        }

        Self {
            safety: SafetyGate::new(provider.clone(), models.safety, models.answer.clone()),
            planner: QueryPlanner::new(provider.clone(), models.planner),
            research,
            selector: ActionSelector::new(provider.clone(), models.action),
            answerer: AnswerGenerator::new(provider, models.answer),
            step_limit: config.step_limit,
        }
    }

    /// Run one research request to completion.
    ///
    /// Annotations reach `sink` in order: `QueryPlan` and `NewAction` for
    /// each cycle, then `Sources` once. The returned stream carries the
    /// answer. `cancel` is checked before every cycle and raced against
    /// every search.
    #[instrument(skip_all, fields(step_limit = self.step_limit))]
    pub async fn run(
        &self,
        request: ResearchRequest,
        sink: &dyn ProgressSink,
        cancel: CancellationToken,
    ) -> Result<AgentResponse, AgentError> {
        let mut ctx = ResearchContext::new(request.messages, request.location)
            .with_step_limit(self.step_limit);

        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }

        let verdict = self.safety.check(&ctx).await.map_err(AgentError::Safety)?;
        if verdict.is_refused() {
            let reason = verdict.reason_or_default().to_string();
            let stream = self
                .safety
                .refusal(Some(&reason))
                .await
                .map_err(AgentError::Answer)?;
            return Ok(AgentResponse {
                outcome: Outcome::Refused { reason },
                context: ctx,
                stream,
            });
        }

        let outcome = loop {
            if cancel.is_cancelled() {
                warn!(step = ctx.step(), "Research cancelled");
                return Err(AgentError::Cancelled);
            }

            let plan = self.planner.plan(&ctx).await.map_err(AgentError::Planner)?;
            sink.emit(Annotation::QueryPlan {
                plan: plan.plan.clone(),
                queries: plan.queries.clone(),
            });

            // Every query settles before anything is written to the context.
            let results = join_all(
                plan.queries
                    .iter()
                    .map(|query| self.research.run(query, &ctx, &cancel)),
            )
            .await;
            let records = plan
                .queries
                .iter()
                .zip(results)
                .map(|(query, result)| result.map_err(|e| AgentError::search(query.as_str(), e)))
                .collect::<Result<Vec<_>, _>>()?;
            ctx.report_searches(records);

            let action = self
                .selector
                .next_action(&ctx)
                .await
                .map_err(AgentError::ActionSelector)?;
            ctx.set_last_feedback(action.feedback().unwrap_or_default());
            sink.emit(Annotation::NewAction {
                action: action.clone(),
            });

            if action.is_answer() {
                break Outcome::Answered;
            }

            ctx.increment_step();
            if ctx.should_stop() {
                info!(steps = ctx.step(), "Step limit reached, forcing an answer");
                break Outcome::BestEffort;
            }
        };

        sink.emit(Annotation::Sources {
            sources: ctx.sources(),
        });

        let options = AnswerOptions {
            is_final: outcome == Outcome::BestEffort,
        };
        let stream = self
            .answerer
            .answer(&ctx, options)
            .await
            .map_err(AgentError::Answer)?;

        info!(
            outcome = ?outcome,
            steps = ctx.step(),
            searches = ctx.records().len(),
            "Research complete"
        );
        Ok(AgentResponse {
            outcome,
            context: ctx,
            stream,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ds_core::collect_text;
    use ds_core::testing::MockProvider;
    use ds_web::testing::{MockScraper, MockSearch};
    use regex::Regex;

    use crate::context::STEP_LIMIT;
    use crate::events::CollectingSink;

    // Distinctive phrases from each stage's system prompt.
    const SAFETY: &str = "safety classifier";
    const REFUSAL: &str = "flagged as unsafe";
    const PLANNER: &str = "strategic research planner";
    const SUMMARISER: &str = "research extraction specialist";
    const SELECTOR: &str = "decide the next action";
    const ANSWER: &str = "answers questions based on information gathered";
    const FINAL_NOTICE: &str = "may not have all the information";

    const ALLOW: &str = r#"{"classification": "allow"}"#;
    const ANSWER_NOW: &str = r#"{"type": "answer", "title": "Ready", "reasoning": "Enough evidence"}"#;

    fn plan(queries: &[&str]) -> String {
        serde_json::json!({"plan": "Search the basics first", "queries": queries}).to_string()
    }

    fn keep_going(feedback: &str) -> String {
        serde_json::json!({
            "type": "continue",
            "title": "Keep looking",
            "reasoning": "Not enough yet",
            "feedback": feedback,
        })
        .to_string()
    }

    struct Harness {
        provider: Arc<MockProvider>,
        search: Arc<MockSearch>,
        scraper: Arc<MockScraper>,
        sink: CollectingSink,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                provider: Arc::new(MockProvider::new()),
                search: Arc::new(MockSearch::new()),
                scraper: Arc::new(MockScraper::new()),
                sink: CollectingSink::new(),
            }
        }

        fn agent(&self) -> DeepSearch {
            self.agent_with(AgentConfig {
                results_per_query: 2,
                cache_ttl_secs: 0,
                ..Default::default()
            })
        }

        fn agent_with(&self, config: AgentConfig) -> DeepSearch {
            DeepSearch::new(
                self.provider.clone(),
                self.search.clone(),
                self.scraper.clone(),
                config,
            )
        }

        async fn run(&self, request: ResearchRequest) -> Result<AgentResponse, AgentError> {
            self.agent()
                .run(request, &self.sink, CancellationToken::new())
                .await
        }

        fn prompt_of(&self, marker: &str, index: usize) -> String {
            self.provider.requests_matching(marker)[index].messages[1]
                .content
                .clone()
        }
    }

    #[tokio::test]
    async fn test_always_continue_stops_after_step_limit() {
        let h = Harness::new();
        h.provider.respond_when(SAFETY, ALLOW);
        h.provider.respond_when(PLANNER, &plan(&["rust async runtimes"]));
        h.provider.respond_when(SELECTOR, &keep_going("Need benchmark numbers"));
        h.provider.respond_when(ANSWER, "Here is what I found so far.");

        let response = h.run(ResearchRequest::question("Which async runtime is fastest?")).await.unwrap();

        assert_eq!(response.outcome, Outcome::BestEffort);
        assert_eq!(response.context.step(), STEP_LIMIT);
        assert_eq!(h.provider.count_matching(PLANNER), STEP_LIMIT);
        assert_eq!(h.provider.count_matching(SELECTOR), STEP_LIMIT);
        assert_eq!(h.search.call_count(), STEP_LIMIT);

        let answers = h.provider.requests_matching(ANSWER);
        assert_eq!(answers.len(), 1);
        assert!(answers[0].system_prompt().unwrap().contains(FINAL_NOTICE));

        let mut expected = Vec::new();
        for _ in 0..STEP_LIMIT {
            expected.extend(["QUERY_PLAN", "NEW_ACTION"]);
        }
        expected.push("SOURCES");
        assert_eq!(h.sink.kinds(), expected);

        let text = collect_text(response.stream).await.unwrap();
        assert_eq!(text, "Here is what I found so far.");
    }

    #[tokio::test]
    async fn test_custom_step_limit() {
        let h = Harness::new();
        h.provider.respond_when(SAFETY, ALLOW);
        h.provider.respond_when(PLANNER, &plan(&["q"]));
        h.provider.respond_when(SELECTOR, &keep_going("more"));
        h.provider.respond_when(ANSWER, "ok");

        let agent = h.agent_with(AgentConfig {
            step_limit: 2,
            cache_ttl_secs: 0,
            ..Default::default()
        });
        let response = agent
            .run(ResearchRequest::question("q?"), &h.sink, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(response.outcome, Outcome::BestEffort);
        assert_eq!(h.provider.count_matching(PLANNER), 2);
    }

    #[tokio::test]
    async fn test_search_history_accumulates_across_cycles() {
        let h = Harness::new();
        h.provider.respond_when(SAFETY, ALLOW);
        h.provider.respond_when(PLANNER, &plan(&["a", "b"]));
        h.provider.respond_when(SUMMARISER, "A summary of the page.");
        h.provider.respond_when(PLANNER, &plan(&["c", "d"]));
        h.provider.respond_when(SELECTOR, &keep_going("Need more on c and d"));
        h.provider.respond_when(SELECTOR, ANSWER_NOW);
        h.provider.respond_when(ANSWER, "Done.");

        let response = h.run(ResearchRequest::question("Tell me about a, b, c, d")).await.unwrap();
        assert_eq!(response.outcome, Outcome::Answered);

        let queries: Vec<_> = response.context.records().iter().map(|r| r.query.as_str()).collect();
        assert_eq!(queries, vec!["a", "b", "c", "d"]);
        assert!(response.context.records().iter().all(|r| r.results.len() == 2));

        // The second round sees the first round's evidence and feedback.
        let second_plan = h.prompt_of(PLANNER, 1);
        assert!(second_plan.contains("## Query: \"a\""));
        assert!(second_plan.contains("Need more on c and d"));
        let second_decision = h.prompt_of(SELECTOR, 1);
        assert!(second_decision.contains("## Query: \"d\""));
        assert!(second_decision.contains("<summary>\nA summary of the page.\n</summary>"));

        // Explicit answers are not marked as best effort.
        let answer = &h.provider.requests_matching(ANSWER)[0];
        assert!(!answer.system_prompt().unwrap().contains(FINAL_NOTICE));
    }

    #[tokio::test]
    async fn test_unsafe_request_is_refused_without_research() {
        let h = Harness::new();
        h.provider
            .respond_when(SAFETY, r#"{"classification": "refuse", "reason": "X"}"#);
        h.provider
            .respond_when(REFUSAL, "I can't help with this request because of X.");

        let response = h.run(ResearchRequest::question("Something dangerous")).await.unwrap();

        assert_eq!(response.outcome, Outcome::Refused { reason: "X".to_string() });
        let text = collect_text(response.stream).await.unwrap();
        assert!(text.contains('X'));
        assert!(h.prompt_of(REFUSAL, 0).starts_with("Reason: X"));

        assert_eq!(h.provider.count_matching(REFUSAL), 1);
        assert_eq!(h.search.call_count(), 0);
        assert!(h.scraper.calls().is_empty());
        assert_eq!(h.provider.count_matching(PLANNER), 0);
        assert_eq!(h.provider.count_matching(SUMMARISER), 0);
        assert_eq!(h.provider.count_matching(ANSWER), 0);
        assert!(h.sink.annotations().is_empty());
        assert!(response.context.records().is_empty());
    }

    #[tokio::test]
    async fn test_capital_of_france() {
        let h = Harness::new();
        h.provider.respond_when(SAFETY, ALLOW);
        h.provider.respond_when(
            PLANNER,
            &plan(&["capital of France", "Paris population 2024"]),
        );
        h.provider.respond_when(SUMMARISER, "Paris is the capital and largest city of France.");
        h.provider.respond_when(SELECTOR, ANSWER_NOW);
        h.provider.respond_when(
            ANSWER,
            "The capital of France is **Paris** [Paris - Wikipedia](https://en.wikipedia.org/wiki/Paris) (2024-05-01).",
        );
        h.search.set_results(
            "capital of France",
            vec![MockSearch::hit(
                "Paris - Wikipedia",
                "https://en.wikipedia.org/wiki/Paris",
                "Paris is the capital of France.",
            )],
        );
        h.scraper.set_content(
            "https://en.wikipedia.org/wiki/Paris",
            "Paris is the capital and most populous city of France.",
        );

        let response = h.run(ResearchRequest::question("What is the capital of France?")).await.unwrap();
        assert_eq!(response.outcome, Outcome::Answered);

        let summaries: Vec<_> = response.context.records()[0]
            .results
            .iter()
            .map(|r| r.summary.as_str())
            .collect();
        assert_eq!(summaries, vec!["Paris is the capital and largest city of France."]);

        let text = collect_text(response.stream).await.unwrap();
        assert!(text.contains("Paris"));
        let citation = Regex::new(r"\[[^\]]+\]\(https?://[^)\s]+\)").unwrap();
        assert!(citation.is_match(&text));

        match h.sink.annotations().last() {
            Some(Annotation::Sources { sources }) => {
                assert_eq!(sources[0].url, "https://en.wikipedia.org/wiki/Paris");
                assert_eq!(sources.len(), 3);
            }
            other => panic!("expected sources last, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_safety_failure_is_fatal() {
        let h = Harness::new();
        h.provider.fail_when(SAFETY, "classifier down");

        let err = h.run(ResearchRequest::question("q")).await.err().unwrap();
        assert!(matches!(err, AgentError::Safety(_)));
        assert_eq!(h.search.call_count(), 0);
    }

    #[tokio::test]
    async fn test_search_failure_aborts_after_all_queries_settle() {
        let h = Harness::new();
        h.provider.respond_when(SAFETY, ALLOW);
        h.provider.respond_when(PLANNER, &plan(&["good", "bad"]));
        h.search.fail_on("bad", "quota exceeded");

        let err = h.run(ResearchRequest::question("q")).await.err().unwrap();
        match err {
            AgentError::Search { query, .. } => assert_eq!(query, "bad"),
            other => panic!("unexpected error: {other}"),
        }
        let mut searched = h.search.calls();
        searched.sort();
        assert_eq!(searched, vec!["bad", "good"]);
        assert_eq!(h.provider.count_matching(SELECTOR), 0);
    }

    #[tokio::test]
    async fn test_planner_schema_violation_is_fatal() {
        let h = Harness::new();
        h.provider.respond_when(SAFETY, ALLOW);
        h.provider
            .respond_when(PLANNER, &plan(&["1", "2", "3", "4", "5", "6"]));

        let err = h.run(ResearchRequest::question("q")).await.err().unwrap();
        assert!(matches!(err, AgentError::Planner(_)));
        assert!(err.is_schema_violation());
        assert_eq!(h.search.call_count(), 0);
    }

    #[tokio::test]
    async fn test_continue_without_feedback_is_fatal() {
        let h = Harness::new();
        h.provider.respond_when(SAFETY, ALLOW);
        h.provider.respond_when(PLANNER, &plan(&["q"]));
        h.provider.respond_when(
            SELECTOR,
            r#"{"type": "continue", "title": "More", "reasoning": "Thin"}"#,
        );

        let err = h.run(ResearchRequest::question("q")).await.err().unwrap();
        assert!(matches!(err, AgentError::ActionSelector(_)));
        assert!(err.is_schema_violation());
        assert_eq!(h.sink.kinds(), vec!["QUERY_PLAN"]);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let h = Harness::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = h
            .agent()
            .run(ResearchRequest::question("q"), &h.sink, cancel)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, AgentError::Cancelled));
        assert_eq!(h.provider.request_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_between_cycles_stops_research() {
        let h = Harness::new();
        h.provider.respond_when(SAFETY, ALLOW);
        h.provider.respond_when(PLANNER, &plan(&["rust async runtimes"]));
        h.provider.respond_when(SUMMARISER, "A summary of the page.");
        h.provider.respond_when(SELECTOR, &keep_going("Need benchmark numbers"));

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let kinds = std::sync::Mutex::new(Vec::new());
        let sink = |annotation: Annotation| {
            if annotation.kind() == "NEW_ACTION" {
                token.cancel();
            }
            kinds.lock().unwrap().push(annotation.kind());
        };

        let err = h
            .agent()
            .run(ResearchRequest::question("Which async runtime is fastest?"), &sink, cancel)
            .await
            .err()
            .unwrap();

        assert!(matches!(err, AgentError::Cancelled));
        assert_eq!(h.search.call_count(), 1);
        assert_eq!(h.provider.count_matching(PLANNER), 1);
        assert_eq!(h.provider.count_matching(ANSWER), 0);
        assert_eq!(*kinds.lock().unwrap(), vec!["QUERY_PLAN", "NEW_ACTION"]);
    }

    #[tokio::test]
    async fn test_location_reaches_prompts() {
        let h = Harness::new();
        h.provider.respond_when(SAFETY, ALLOW);
        h.provider.respond_when(PLANNER, &plan(&["weather today"]));
        h.provider.respond_when(SELECTOR, ANSWER_NOW);
        h.provider.respond_when(ANSWER, "Sunny.");

        let request = ResearchRequest::question("What's the weather?").with_location(UserLocation {
            city: Some("Lyon".to_string()),
            country: Some("FR".to_string()),
            ..Default::default()
        });
        h.run(request).await.unwrap();

        assert!(h.prompt_of(PLANNER, 0).contains("- city: Lyon\n- country: FR"));
        assert!(h.prompt_of(SELECTOR, 0).contains("- lat: unknown"));
    }
}
