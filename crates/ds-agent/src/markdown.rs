//! Hold back partial markdown while an answer streams.
//!
//! A link or emphasis that arrives split across deltas (`[Par` + `is](ht` +
//! `tps://...)`) would render as broken markdown until the rest arrives.
//! [`MarkdownJoiner`] buffers from a `[`, `*` or `_` until the element is
//! complete or clearly not markdown, then releases it in one piece. Nothing
//! is ever dropped: the concatenated output always equals the input.

use std::sync::LazyLock;

use futures::StreamExt;
use regex::Regex;

use ds_core::TextStream;

static COMPLETE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"^\[.*?\]\(.*?\)$",     // [text](url)
        r"^\*\*.*?\*\*$",        // **bold**
        r"^\*[^*].*?\*$",        // *italic*
        r"^\*\*\*.*?\*\*\*$",    // ***bold italic***
        r"^\*\*_.*?_\*\*$",      // **_bold italic_**
        r"^_\*.*?\*_$",          // _*italic bold*_
        r"^_.*?_$",              // _italic_
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

#[derive(Debug, Default)]
pub struct MarkdownJoiner {
    buffer: String,
    buffering: bool,
}

impl MarkdownJoiner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one delta; returns the text that is safe to emit now.
    pub fn process(&mut self, text: &str) -> String {
        let mut output = String::new();

        for c in text.chars() {
            if !self.buffering {
                if matches!(c, '[' | '*' | '_') {
                    self.buffer.push(c);
                    self.buffering = true;
                } else {
                    output.push(c);
                }
                continue;
            }

            self.buffer.push(c);
            if self.is_complete() || self.is_false_positive(c) {
                output.push_str(&self.buffer);
                self.clear();
            }
        }

        output
    }

    /// Release whatever is still buffered.
    pub fn flush(&mut self) -> String {
        let remaining = std::mem::take(&mut self.buffer);
        self.buffering = false;
        remaining
    }

    fn clear(&mut self) {
        self.buffer.clear();
        self.buffering = false;
    }

    fn is_complete(&self) -> bool {
        COMPLETE.iter().any(|re| re.is_match(&self.buffer))
    }

    /// `c` has already been appended to the buffer.
    fn is_false_positive(&self, c: char) -> bool {
        let buffer = self.buffer.as_str();
        // Opener directly followed by whitespace: a list bullet or arithmetic.
        let opener_then_space = buffer.chars().count() == 2 && c.is_whitespace();

        if buffer.starts_with('[') {
            return c == '\n' || c == '[';
        }
        if buffer.starts_with('*') {
            return opener_then_space || c == '\n' || buffer.starts_with("****");
        }
        if buffer.starts_with('_') {
            return opener_then_space || c == '\n';
        }
        false
    }
}

/// Pass a text stream through a [`MarkdownJoiner`]. Errors are forwarded
/// unchanged; the buffered tail is released when the source ends.
pub fn join_markdown(stream: TextStream) -> TextStream {
    let state = (stream, MarkdownJoiner::new(), false);
    Box::pin(futures::stream::unfold(
        state,
        |(mut stream, mut joiner, finished)| async move {
            if finished {
                return None;
            }
            loop {
                match stream.next().await {
                    Some(Ok(fragment)) => {
                        let ready = joiner.process(&fragment);
                        if !ready.is_empty() {
                            return Some((Ok(ready), (stream, joiner, false)));
                        }
                    }
                    Some(Err(e)) => return Some((Err(e), (stream, joiner, false))),
                    None => {
                        let rest = joiner.flush();
                        if rest.is_empty() {
                            return None;
                        }
                        return Some((Ok(rest), (stream, joiner, true)));
                    }
                }
            }
        },
    ))
}
