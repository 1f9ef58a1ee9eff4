//! Query planning: a research plan and the search queries that follow from it.

use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use ds_core::{generate_structured, Error, Provider, StructuredOutput};

use crate::context::{current_date, ResearchContext};

/// Upper bound on queries per plan.
pub const MAX_QUERIES: usize = 5;

const SYSTEM_PROMPT: &str = r#"You are a strategic research planner with expertise in breaking down complex questions into logical search steps. Your primary role is to create a detailed research plan before generating any search queries.

First, analyze the question thoroughly:
- Break down the core components and key concepts
- Identify any implicit assumptions or context needed
- Consider what foundational knowledge might be required
- Think about potential information gaps that need filling

Then, develop a strategic research plan that:
- Outlines the logical progression of information needed
- Identifies dependencies between different pieces of information
- Considers multiple angles or perspectives that might be relevant
- Anticipates potential dead-ends or areas needing clarification

Finally, translate this plan into a list of 1-5 sequential search queries that:
- Are specific and focused (avoid broad queries that return general information)
- Are written in natural language without Boolean operators (no AND/OR)
- Progress logically from foundational to specific information
- Build upon each other in a meaningful way

Write the plan first, then the queries, so the queries follow from the plan. If earlier searches already answered part of the question, plan only for what is still missing."#;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct QueryPlan {
    /// The research plan, written before choosing queries.
    pub plan: String,
    /// Search queries in natural language, from foundational to specific.
    #[schemars(length(min = 1, max = 5))]
    pub queries: Vec<String>,
}

impl StructuredOutput for QueryPlan {
    const NAME: &'static str = "query_plan";

    fn validate(&self) -> Result<(), String> {
        if self.plan.trim().is_empty() {
            return Err("plan is empty".to_string());
        }
        if self.queries.is_empty() || self.queries.len() > MAX_QUERIES {
            return Err(format!(
                "expected 1 to {} queries, got {}",
                MAX_QUERIES,
                self.queries.len()
            ));
        }
        if self.queries.iter().any(|q| q.trim().is_empty()) {
            return Err("queries must not be blank".to_string());
        }
        Ok(())
    }
}

pub struct QueryPlanner {
    provider: Arc<dyn Provider>,
    model: Option<String>,
}

impl QueryPlanner {
    pub fn new(provider: Arc<dyn Provider>, model: Option<String>) -> Self {
        Self { provider, model }
    }

    pub async fn plan(&self, ctx: &ResearchContext) -> Result<QueryPlan, Error> {
        let prompt = build_prompt(ctx);
        debug!(step = ctx.step(), prompt_len = prompt.len(), "Planning queries");

        let mut plan: QueryPlan =
            generate_structured(self.provider.as_ref(), self.model.as_deref(), SYSTEM_PROMPT, &prompt)
                .await?;
        for query in &mut plan.queries {
            *query = query.trim().to_string();
        }

        info!(step = ctx.step(), queries = ?plan.queries, "Query plan ready");
        Ok(plan)
    }
}

fn build_prompt(ctx: &ResearchContext) -> String {
    let mut prompt = format!(
        r#"## Current Information Available:
{}

## User Location:
{}

## Current Date:
{}

## Message History:
{}

## Latest User Message:
{}
"#,
        ctx.search_history(),
        ctx.user_location(),
        current_date(),
        ctx.message_history(),
        ctx.latest_user_message(),
    );

    if !ctx.last_feedback().is_empty() {
        prompt.push_str(&format!(
            "\n## Feedback From The Previous Round:\n{}\n",
            ctx.last_feedback()
        ));
    }

    prompt.push_str(
        "\nBased on the available information and conversation context, create a research plan and generate the appropriate search queries.",
    );
    prompt
}
