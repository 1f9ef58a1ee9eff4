//! Streaming, cited answers.

use std::sync::Arc;

use tracing::info;

use ds_core::{stream_text, Error, Provider, TextStream};

use crate::context::{current_date, ResearchContext};
use crate::markdown::join_markdown;

const SYSTEM_PROMPT: &str = r#"You are a helpful assistant that answers questions based on information gathered from web searches and scraped content.

Your task is to provide a comprehensive and accurate answer to the user's question using the information available.

Citation rules:
- Cite every factual claim inline as a markdown link: [Title](URL)
- If the source has a publication date, you may follow the link with it in parentheses: [Title](URL) (YYYY-MM-DD)
- Never write a bare URL
- Never use footnote-style references such as [1] or a references section at the end
- When several citations would follow each other, put them in a bulleted list instead of running them together
- Only cite sources from the search results; skip results whose summary reads "summarisation failed" unless the snippet alone supports the claim

Guidelines:
- Be comprehensive but concise
- If information is conflicting, acknowledge the conflicts
- If you don't have enough information, say so clearly"#;

const FINAL_NOTICE: &str = "IMPORTANT: You may not have all the information needed to answer the question completely. Make your best effort to provide a helpful answer based on the available information, and clearly indicate any limitations or uncertainties. Do not present a partial answer as definitive.";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnswerOptions {
    /// The research budget ran out before the model chose to answer.
    pub is_final: bool,
}

pub struct AnswerGenerator {
    provider: Arc<dyn Provider>,
    model: Option<String>,
}

impl AnswerGenerator {
    pub fn new(provider: Arc<dyn Provider>, model: Option<String>) -> Self {
        Self { provider, model }
    }

    pub async fn answer(
        &self,
        ctx: &ResearchContext,
        options: AnswerOptions,
    ) -> Result<TextStream, Error> {
        let system = system_prompt(options);
        let prompt = format!(
            r#"## Search Results:
{}

## User Location:
{}

## Current Date:
{}

## Message History:
{}

## User Question:
{}

Answer the user's question using the search results above, following the citation rules."#,
            ctx.search_history(),
            ctx.user_location(),
            current_date(),
            ctx.message_history(),
            ctx.latest_user_message(),
        );

        info!(
            is_final = options.is_final,
            records = ctx.records().len(),
            "Generating answer"
        );
        let stream = stream_text(self.provider.as_ref(), self.model.as_deref(), &system, &prompt).await?;
        Ok(join_markdown(stream))
    }
}

fn system_prompt(options: AnswerOptions) -> String {
    if options.is_final {
        format!("{}\n\n{}", SYSTEM_PROMPT, FINAL_NOTICE)
    } else {
        SYSTEM_PROMPT.to_string()
    }
}
