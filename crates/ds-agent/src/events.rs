//! Progress annotations emitted while a research request runs.
//!
//! The loop emits, in order: one `QueryPlan` and one `NewAction` per cycle,
//! then a single `Sources` list once research ends. Sinks are called
//! sequentially from the loop and must not block.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::action::Action;

/// A citable source shown to the user before the answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchSource {
    pub title: String,
    pub url: String,
    pub snippet: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub favicon: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Annotation {
    QueryPlan { plan: String, queries: Vec<String> },
    NewAction { action: Action },
    Sources { sources: Vec<SearchSource> },
}

impl Annotation {
    pub fn kind(&self) -> &'static str {
        match self {
            Annotation::QueryPlan { .. } => "QUERY_PLAN",
            Annotation::NewAction { .. } => "NEW_ACTION",
            Annotation::Sources { .. } => "SOURCES",
        }
    }
}

/// One-way, ordered, fire-and-forget progress channel.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, annotation: Annotation);
}

impl<F> ProgressSink for F
where
    F: Fn(Annotation) + Send + Sync,
{
    fn emit(&self, annotation: Annotation) {
        self(annotation)
    }
}

/// Discards every annotation.
pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn emit(&self, _annotation: Annotation) {}
}

/// Forwards annotations into an unbounded channel.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Annotation>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Annotation>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressSink for ChannelSink {
    fn emit(&self, annotation: Annotation) {
        // A dropped receiver just means nobody is watching.
        let _ = self.tx.send(annotation);
    }
}

/// Keeps every annotation in memory.
#[derive(Default)]
pub struct CollectingSink {
    annotations: Mutex<Vec<Annotation>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn annotations(&self) -> Vec<Annotation> {
        self.annotations
            .lock()
            .map(|a| a.clone())
            .unwrap_or_default()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.annotations().iter().map(Annotation::kind).collect()
    }
}

impl ProgressSink for CollectingSink {
    fn emit(&self, annotation: Annotation) {
        if let Ok(mut annotations) = self.annotations.lock() {
            annotations.push(annotation);
        }
    }
}
