//! ds-agent: the deep research agent
//!
//! Given a conversation, [`DeepSearch`] checks the request for safety, then
//! runs bounded research cycles:
//!
//! 1. [`QueryPlanner`] writes a plan and up to five search queries
//! 2. [`SearchAndSummarize`] searches every query concurrently, scrapes every
//!    result and summarises each page against the research goal
//! 3. [`ActionSelector`] decides to continue (with feedback) or answer
//!
//! When the model answers, or the step budget runs out, [`AnswerGenerator`]
//! streams a cited answer. Progress reaches the caller as [`Annotation`]s.

pub mod action;
pub mod agent_loop;
pub mod answer;
pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod eval;
pub mod events;
pub mod markdown;
pub mod planner;
pub mod research;
pub mod safety;
pub mod sources;
pub mod stream;

pub use action::{Action, ActionKind, ActionReply, ActionSelector};
pub use agent_loop::{AgentResponse, DeepSearch, Outcome, ResearchRequest};
pub use answer::{AnswerGenerator, AnswerOptions};
pub use cache::SummaryCache;
pub use config::{AgentConfig, ModelRoles};
pub use context::{
    ResearchContext, ResultItem, SearchRecord, UserLocation, STEP_LIMIT, SUMMARY_FAILED,
};
pub use error::AgentError;
pub use eval::{run_eval, EvalCase, EvalReport, EvalResult, Scorer, CONTAINS_LINKS, DEFAULT_SCORERS};
pub use events::{Annotation, ChannelSink, CollectingSink, NoopSink, ProgressSink, SearchSource};
pub use markdown::{join_markdown, MarkdownJoiner};
pub use planner::{QueryPlan, QueryPlanner};
pub use research::SearchAndSummarize;
pub use safety::{Classification, SafetyGate, SafetyVerdict};
pub use sources::dedupe_sources;
pub use stream::with_on_finish;
