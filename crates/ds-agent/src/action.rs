//! Action selection: keep researching or answer now.

use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use ds_core::{generate_structured, Error, Provider, StructuredOutput};

use crate::context::{current_date, ResearchContext};

const SYSTEM_PROMPT: &str = r#"You are a research assistant.

You are given a user's question, and a list of search results, each with a summary of the page it came from.

You must decide the next action to take, based on the information available so far. Choose only one of the following actions:

1. **continue** - Continue searching for more information about the user's question
2. **answer** - Provide a final answer to the user's question

Every action needs a short `title` and your `reasoning`.

When you choose **continue** you must also write `feedback` that will guide the next round of searching:
- Which specific pieces of information are still missing
- Which kinds of sources would help (official statistics, news, primary documents, reviews)
- Whether the search direction itself needs to change, and how

Choose **answer** as soon as the available information is sufficient to answer the question well. Do not keep searching for marginal improvements."#;

/// The next control-flow step chosen by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Action {
    /// Keep researching.
    Continue {
        title: String,
        reasoning: String,
        /// The information gap: what is missing, which sources would help,
        /// and whether the search direction should change.
        feedback: String,
    },
    /// Answer the question with the information gathered so far.
    Answer {
        title: String,
        reasoning: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        feedback: Option<String>,
    },
}

impl Action {
    pub fn title(&self) -> &str {
        match self {
            Action::Continue { title, .. } | Action::Answer { title, .. } => title,
        }
    }

    pub fn reasoning(&self) -> &str {
        match self {
            Action::Continue { reasoning, .. } | Action::Answer { reasoning, .. } => reasoning,
        }
    }

    pub fn feedback(&self) -> Option<&str> {
        match self {
            Action::Continue { feedback, .. } => Some(feedback),
            Action::Answer { feedback, .. } => feedback.as_deref(),
        }
    }

    pub fn is_answer(&self) -> bool {
        matches!(self, Action::Answer { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Action::Continue { .. } => "continue",
            Action::Answer { .. } => "answer",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Continue,
    Answer,
}

/// The flat object the model fills in. Chat APIs require an object at the
/// schema root, so the tagged [`Action`] is recovered with `TryFrom`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ActionReply {
    /// `continue` to keep searching, `answer` to answer now.
    #[serde(rename = "type")]
    pub kind: ActionKind,
    /// Short label for the decision, shown to the user.
    pub title: String,
    /// Why this action was chosen.
    pub reasoning: String,
    /// Required for `continue`: what is missing, which sources would help,
    /// and whether the search direction should change.
    #[serde(default)]
    pub feedback: Option<String>,
}

impl TryFrom<ActionReply> for Action {
    type Error = String;

    fn try_from(reply: ActionReply) -> Result<Self, Self::Error> {
        if reply.title.trim().is_empty() {
            return Err(format!(
                "{} action is missing a title",
                match reply.kind {
                    ActionKind::Continue => "continue",
                    ActionKind::Answer => "answer",
                }
            ));
        }
        match reply.kind {
            ActionKind::Continue => match reply.feedback {
                Some(feedback) if !feedback.trim().is_empty() => Ok(Action::Continue {
                    title: reply.title,
                    reasoning: reply.reasoning,
                    feedback,
                }),
                _ => Err("continue action is missing feedback".to_string()),
            },
            ActionKind::Answer => Ok(Action::Answer {
                title: reply.title,
                reasoning: reply.reasoning,
                feedback: reply.feedback.filter(|f| !f.trim().is_empty()),
            }),
        }
    }
}

impl StructuredOutput for ActionReply {
    const NAME: &'static str = "next_action";

    fn validate(&self) -> Result<(), String> {
        Action::try_from(self.clone()).map(|_| ())
    }
}

pub struct ActionSelector {
    provider: Arc<dyn Provider>,
    model: Option<String>,
}

impl ActionSelector {
    pub fn new(provider: Arc<dyn Provider>, model: Option<String>) -> Self {
        Self { provider, model }
    }

    pub async fn next_action(&self, ctx: &ResearchContext) -> Result<Action, Error> {
        let prompt = build_prompt(ctx);
        debug!(step = ctx.step(), prompt_len = prompt.len(), "Selecting next action");

        let reply: ActionReply =
            generate_structured(self.provider.as_ref(), self.model.as_deref(), SYSTEM_PROMPT, &prompt)
                .await?;
        let action =
            Action::try_from(reply).map_err(|msg| Error::schema(ActionReply::NAME, msg))?;

        info!(
            step = ctx.step(),
            action = action.kind(),
            title = action.title(),
            "Action selected"
        );
        Ok(action)
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
            "\n## Previous Feedback:\n{}\n",
            ctx.last_feedback()
        ));
    }

    prompt.push_str(
        "\nBased on the available information and conversation context, what should be the next action?",
    );
    prompt
}
