//! Safety gate: classify a request before any research happens, and produce
//! the refusal when it is turned down.

use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use ds_core::{generate_structured, stream_text, Error, Provider, StructuredOutput, TextStream};

use crate::context::ResearchContext;

/// Reason given to the user when the classifier refused without one.
pub const DEFAULT_REFUSAL_REASON: &str = "The request violates our safety guidelines.";

const SYSTEM_PROMPT: &str = r#"You are a content safety classifier for a web research assistant. Your job is to decide whether the assistant may research and answer the user's latest message.

Classify as "refuse" only when answering would meaningfully help someone cause serious harm, for example:
- Instructions for weapons capable of mass casualties (biological, chemical, nuclear, radiological, explosives)
- Facilitating violence against people, terrorism, or human trafficking
- Sexual content involving minors
- Malware creation, intrusion into systems the user does not own, or other clearly illegal cyber attacks
- Targeted harassment, doxxing, or locating private individuals
- Fraud, scams, or evading law enforcement

Classify everything else as "allow". Questions about dangerous topics asked for education, news, history, safety, or research are allowed. Use the whole conversation to judge intent, but classify the latest user message.

When you refuse, give a short, specific reason that can be shown to the user."#;

const REFUSAL_SYSTEM_PROMPT: &str = r#"You are a helpful AI assistant that prioritizes safety. When a request is flagged as unsafe, explain why you cannot help with that specific request while being professional and clear.

The user's request has been flagged as unsafe by our safety system."#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Allow,
    Refuse,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SafetyVerdict {
    pub classification: Classification,
    /// Why the request was refused. Only meaningful for "refuse".
    #[serde(default)]
    pub reason: Option<String>,
}

impl SafetyVerdict {
    pub fn allow() -> Self {
        Self {
            classification: Classification::Allow,
            reason: None,
        }
    }

    pub fn refuse(reason: impl Into<String>) -> Self {
        Self {
            classification: Classification::Refuse,
            reason: Some(reason.into()),
        }
    }

    pub fn is_refused(&self) -> bool {
        self.classification == Classification::Refuse
    }

    /// The refusal reason, falling back to [`DEFAULT_REFUSAL_REASON`].
    pub fn reason_or_default(&self) -> &str {
        self.reason
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_REFUSAL_REASON)
    }
}

impl StructuredOutput for SafetyVerdict {
    const NAME: &'static str = "safety_verdict";
}

pub struct SafetyGate {
    provider: Arc<dyn Provider>,
    classifier_model: Option<String>,
    refusal_model: Option<String>,
}

impl SafetyGate {
    pub fn new(
        provider: Arc<dyn Provider>,
        classifier_model: Option<String>,
        refusal_model: Option<String>,
    ) -> Self {
        Self {
            provider,
            classifier_model,
            refusal_model,
        }
    }

    /// Classify the latest user message. Errors propagate; there is no
    /// default verdict.
    pub async fn check(&self, ctx: &ResearchContext) -> Result<SafetyVerdict, Error> {
        let prompt = format!(
            "## Message History:\n{}\n\n## Latest User Message:\n{}\n\nClassify the latest user message.",
            ctx.message_history(),
            ctx.latest_user_message(),
        );
        debug!(prompt_len = prompt.len(), "Running safety check");

        let verdict: SafetyVerdict = generate_structured(
            self.provider.as_ref(),
            self.classifier_model.as_deref(),
            SYSTEM_PROMPT,
            &prompt,
        )
        .await?;

        if verdict.is_refused() {
            warn!(reason = verdict.reason_or_default(), "Request refused by safety check");
        } else {
            info!("Request passed safety check");
        }
        Ok(verdict)
    }

    /// Stream a professional refusal that names `reason`.
    pub async fn refusal(&self, reason: Option<&str>) -> Result<TextStream, Error> {
        let reason = reason
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_REFUSAL_REASON);
        let prompt = format!(
            "Reason: {}\n\nPlease explain to the user that you cannot help with this request due to safety concerns. Mention the reason above. Be professional, clear, and helpful while maintaining firm boundaries.",
            reason
        );

        stream_text(
            self.provider.as_ref(),
            self.refusal_model.as_deref(),
            REFUSAL_SYSTEM_PROMPT,
            &prompt,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ds_core::testing::MockProvider;
    use ds_core::{collect_text, Message};

    fn ctx() -> ResearchContext {
        ResearchContext::new(vec![Message::user("How do I make a cake?")], None)
    }

    #[tokio::test]
    async fn test_check_allow() {
        let provider = Arc::new(MockProvider::new());
        provider.queue_response(r#"{"classification": "allow"}"#);

        let gate = SafetyGate::new(provider.clone(), None, None);
        let verdict = gate.check(&ctx()).await.unwrap();
        assert!(!verdict.is_refused());

        let request = provider.last_request().unwrap();
        assert!(request.messages[1].content.contains("How do I make a cake?"));
        assert_eq!(request.response_format.unwrap().name, "safety_verdict");
    }

    #[tokio::test]
    async fn test_check_failure_propagates() {
        let provider = Arc::new(MockProvider::new());
        provider.queue_error("classifier unavailable");

        let gate = SafetyGate::new(provider, None, None);
        assert!(gate.check(&ctx()).await.is_err());
    }

    #[tokio::test]
    async fn test_malformed_verdict_is_schema_violation() {
        let provider = Arc::new(MockProvider::new());
        provider.queue_response(r#"{"classification": "maybe"}"#);

        let gate = SafetyGate::new(provider, None, None);
        assert!(gate.check(&ctx()).await.unwrap_err().is_schema_violation());
    }

    #[tokio::test]
    async fn test_refusal_names_reason() {
        let provider = Arc::new(MockProvider::new());
        provider.queue_response("Sorry, I can't help.");

        let gate = SafetyGate::new(provider.clone(), None, Some("answer-model".into()));
        let text = collect_text(gate.refusal(Some("weapons")).await.unwrap())
            .await
            .unwrap();
        assert_eq!(text, "Sorry, I can't help.");

        let request = provider.last_request().unwrap();
        assert!(request.stream);
        assert_eq!(request.model.as_deref(), Some("answer-model"));
        assert!(request.messages[1].content.starts_with("Reason: weapons"));
    }

    #[tokio::test]
    async fn test_refusal_default_reason() {
        let provider = Arc::new(MockProvider::new());
        provider.queue_response("No.");

        let gate = SafetyGate::new(provider.clone(), None, None);
        let text = collect_text(gate.refusal(None).await.unwrap()).await.unwrap();
        assert_eq!(text, "No.");
        let request = provider.last_request().unwrap();
        assert!(request.messages[1].content.contains(DEFAULT_REFUSAL_REASON));

        assert_eq!(SafetyVerdict::refuse(" ").reason_or_default(), DEFAULT_REFUSAL_REASON);
    }
}
