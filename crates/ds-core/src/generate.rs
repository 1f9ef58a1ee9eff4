//! Black-box generation capabilities built on top of [`Provider`].
//!
//! Every research stage talks to the model through one of three calls:
//! - [`generate_text`]: system + prompt in, text out
//! - [`generate_structured`]: system + prompt in, a value of `T` out, where
//!   `T`'s JSON schema is sent as the response format and the reply is
//!   validated before it is returned
//! - [`stream_text`]: system + prompt in, a stream of text deltas out

use std::pin::Pin;

use futures::{Stream, StreamExt};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::Error;
use crate::message::StreamChunk;
use crate::provider::{CompletionRequest, Provider, ResponseFormat};

/// A stream of answer text fragments.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, Error>> + Send>>;

/// A value the model can be asked to produce directly.
///
/// The JSON schema derived from the type is sent with the request; after
/// deserialisation `validate` enforces the constraints serde cannot express
/// (array bounds, non-blank strings). Any failure is an [`Error::Schema`].
pub trait StructuredOutput: JsonSchema + DeserializeOwned {
    /// Schema name reported to the API and in errors.
    const NAME: &'static str;

    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

pub async fn generate_text(
    provider: &dyn Provider,
    model: Option<&str>,
    system: &str,
    prompt: &str,
) -> Result<String, Error> {
    let request = CompletionRequest::prompt(system, prompt).with_model(model);
    let response = provider.complete(request).await?;
    Ok(response.message.content)
}

pub async fn generate_structured<T: StructuredOutput>(
    provider: &dyn Provider,
    model: Option<&str>,
    system: &str,
    prompt: &str,
) -> Result<T, Error> {
    let schema = serde_json::to_value(schemars::schema_for!(T))?;
    let request = CompletionRequest::prompt(system, prompt)
        .with_model(model)
        .with_response_format(ResponseFormat::json_schema(T::NAME, schema));

    let response = provider.complete(request).await?;
    debug!(
        schema = T::NAME,
        reply_len = response.message.content.len(),
        "Structured reply received"
    );
    parse_structured(&response.message.content)
}

/// Parse and validate a structured reply.
///
/// Tolerates a surrounding markdown code fence or prose around a single JSON
/// object, which some OpenAI-compatible servers emit despite the schema.
pub fn parse_structured<T: StructuredOutput>(raw: &str) -> Result<T, Error> {
    let json = extract_json_object(raw)
        .ok_or_else(|| Error::schema(T::NAME, "reply contained no JSON object"))?;
    let value: T =
        serde_json::from_str(json).map_err(|e| Error::schema(T::NAME, e.to_string()))?;
    value.validate().map_err(|msg| Error::schema(T::NAME, msg))?;
    Ok(value)
}

fn extract_json_object(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed);

    let start = unfenced.find('{')?;
    let end = unfenced.rfind('}')?;
    (start < end).then(|| &unfenced[start..=end])
}

pub async fn stream_text(
    provider: &dyn Provider,
    model: Option<&str>,
    system: &str,
    prompt: &str,
) -> Result<TextStream, Error> {
    let request = CompletionRequest::prompt(system, prompt)
        .with_model(model)
        .with_stream(true);
    let chunks = provider.stream(request).await?;

    let text = chunks.filter_map(|chunk| async move {
        match chunk {
            Ok(StreamChunk::Delta { content }) => Some(Ok(content)),
            Ok(StreamChunk::ThinkingDelta { .. }) | Ok(StreamChunk::Done { .. }) => None,
            Err(e) => Some(Err(e)),
        }
    });
    Ok(Box::pin(text))
}

/// Drain a text stream into one string.
pub async fn collect_text(mut stream: TextStream) -> Result<String, Error> {
    let mut text = String::new();
    while let Some(fragment) = stream.next().await {
        text.push_str(&fragment?);
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockProvider;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, JsonSchema)]
    struct Verdict {
        label: String,
        scores: Vec<u8>,
    }

    impl StructuredOutput for Verdict {
        const NAME: &'static str = "verdict";

        fn validate(&self) -> Result<(), String> {
            if self.scores.is_empty() {
                return Err("scores must not be empty".to_string());
            }
            Ok(())
        }
    }

    #[test]
    fn test_parse_plain_json() {
        let v: Verdict = parse_structured(r#"{"label":"ok","scores":[1,2]}"#).unwrap();
        assert_eq!(v.label, "ok");
        assert_eq!(v.scores, vec![1, 2]);
    }

    #[test]
    fn test_parse_fenced_json() {
        let raw = "```json\n{\"label\":\"fenced\",\"scores\":[3]}\n```";
        let v: Verdict = parse_structured(raw).unwrap();
        assert_eq!(v.label, "fenced");
    }

    #[test]
    fn test_missing_field_is_schema_error() {
        let err = parse_structured::<Verdict>(r#"{"scores":[1]}"#).unwrap_err();
        assert!(err.is_schema_violation());
        assert!(err.to_string().contains("label"));
    }

    #[test]
    fn test_validation_failure_is_schema_error() {
        let err = parse_structured::<Verdict>(r#"{"label":"x","scores":[]}"#).unwrap_err();
        assert!(err.to_string().contains("scores must not be empty"));
    }

    #[test]
    fn test_no_json_is_schema_error() {
        let err = parse_structured::<Verdict>("I cannot help with that").unwrap_err();
        assert!(err.is_schema_violation());
    }

    #[tokio::test]
    async fn test_generate_structured_sends_schema() {
        let provider = MockProvider::new();
        provider.queue_response(r#"{"label":"ok","scores":[9]}"#);

        let v: Verdict = generate_structured(&provider, Some("small"), "sys", "prompt")
            .await
            .unwrap();
        assert_eq!(v.scores, vec![9]);

        let request = provider.last_request().unwrap();
        assert_eq!(request.model.as_deref(), Some("small"));
        let format = request.response_format.unwrap();
        assert_eq!(format.name, "verdict");
        assert!(format.schema["properties"]["label"].is_object());
    }

    #[tokio::test]
    async fn test_stream_text_yields_deltas_only() {
        let provider = MockProvider::new();
        provider.queue_response("The capital is Paris.");

        let stream = stream_text(&provider, None, "sys", "prompt").await.unwrap();
        let text = collect_text(stream).await.unwrap();
        assert_eq!(text, "The capital is Paris.");
        assert!(provider.last_request().unwrap().stream);
    }
}
