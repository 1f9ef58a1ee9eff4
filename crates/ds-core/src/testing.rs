//! Test utilities shared across the workspace.
//! Only compiled when running tests or with the `testing` feature.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::Error;
use crate::message::{Message, StreamChunk, Usage};
use crate::provider::{CompletionRequest, CompletionResponse, FinishReason, Provider, StreamResult};

type Reply = Result<String, String>;

struct Route {
    marker: String,
    replies: VecDeque<Reply>,
}

/// A mock provider that returns pre-configured responses.
///
/// Two sources of replies, consulted in order:
/// 1. Routes: replies bound to a marker string. A request whose system
///    prompt contains the marker takes the route's next reply. The last
///    reply of a route repeats forever, so a single `respond_when` answers
///    every matching call.
/// 2. The FIFO queue filled by `queue_response`.
pub struct MockProvider {
    routes: Mutex<Vec<Route>>,
    responses: Mutex<VecDeque<Reply>>,
    /// Captured requests (for assertion).
    pub captured_requests: Mutex<Vec<CompletionRequest>>,
    pub name: String,
    pub default_model: Option<String>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            routes: Mutex::new(Vec::new()),
            responses: Mutex::new(VecDeque::new()),
            captured_requests: Mutex::new(Vec::new()),
            name: "mock".to_string(),
            default_model: None,
        }
    }

    /// Queue a response to be returned by the next unrouted call.
    /// Responses are returned in FIFO order (first queued = first returned).
    pub fn queue_response(&self, content: &str) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Ok(content.to_string()));
    }

    /// Queue a failure for the next unrouted call.
    pub fn queue_error(&self, message: &str) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Err(message.to_string()));
    }

    /// Reply with `content` to requests whose system prompt contains `marker`.
    pub fn respond_when(&self, marker: &str, content: &str) {
        self.push_route(marker, Ok(content.to_string()));
    }

    /// Fail requests whose system prompt contains `marker`.
    pub fn fail_when(&self, marker: &str, message: &str) {
        self.push_route(marker, Err(message.to_string()));
    }

    fn push_route(&self, marker: &str, reply: Reply) {
        let mut routes = self.routes.lock().unwrap();
        if let Some(route) = routes.iter_mut().find(|r| r.marker == marker) {
            route.replies.push_back(reply);
        } else {
            routes.push(Route {
                marker: marker.to_string(),
                replies: VecDeque::from([reply]),
            });
        }
    }

    /// Get the number of captured requests.
    pub fn request_count(&self) -> usize {
        self.captured_requests.lock().unwrap().len()
    }

    /// Number of captured requests whose system prompt contains `marker`.
    pub fn count_matching(&self, marker: &str) -> usize {
        self.captured_requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.system_prompt().is_some_and(|s| s.contains(marker)))
            .count()
    }

    /// Captured requests whose system prompt contains `marker`.
    pub fn requests_matching(&self, marker: &str) -> Vec<CompletionRequest> {
        self.captured_requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.system_prompt().is_some_and(|s| s.contains(marker)))
            .cloned()
            .collect()
    }

    /// Get the last captured request.
    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.captured_requests.lock().unwrap().last().cloned()
    }

    fn next_reply(&self, request: &CompletionRequest) -> Result<String, Error> {
        self.captured_requests.lock().unwrap().push(request.clone());

        let system = request.system_prompt().unwrap_or_default();
        let routed = {
            let mut routes = self.routes.lock().unwrap();
            routes
                .iter_mut()
                .find(|r| system.contains(r.marker.as_str()))
                .and_then(|route| {
                    if route.replies.len() > 1 {
                        route.replies.pop_front()
                    } else {
                        route.replies.front().cloned()
                    }
                })
        };

        let reply = match routed {
            Some(reply) => reply,
            None => self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| "No mock response queued".to_string())
                .and_then(|r| r),
        };
        reply.map_err(|message| Error::api(500, message))
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_model(&self) -> Option<&str> {
        self.default_model.as_deref()
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, Error> {
        let content = self.next_reply(&request)?;
        Ok(CompletionResponse {
            message: Message::assistant(content),
            thinking: None,
            usage: Usage::new(0, 0),
            model: "mock-model".to_string(),
            finish_reason: FinishReason::Stop,
        })
    }

    /// Streams the reply word by word; concatenating the deltas restores it.
    async fn stream(&self, request: CompletionRequest) -> Result<StreamResult, Error> {
        let content = self.next_reply(&request)?;
        let mut chunks: Vec<Result<StreamChunk, Error>> = content
            .split_inclusive(' ')
            .map(|word| {
                Ok(StreamChunk::Delta {
                    content: word.to_string(),
                })
            })
            .collect();
        chunks.push(Ok(StreamChunk::Done { usage: None }));
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}
