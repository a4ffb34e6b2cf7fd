//! Assistant transcript assembly
//!
//! Accumulates incrementally streamed assistant text into a single logical
//! message. The message opens on the first delta of a turn and is flushed into
//! the conversation history by the `end_of_llm` marker.
//!
//! At most one message is open at a time, and a message is flushed at most once.

use crate::agent_api::ChatMessage;

/// Accumulates assistant text deltas for the current turn
#[derive(Debug, Clone, Default)]
pub struct TranscriptAssembler {
    /// Text of the open message; `None` when no message is open
    open: Option<String>,
    /// Count of deltas appended to the open message
    delta_count: u64,
}

impl TranscriptAssembler {
    /// Create an assembler with no open message
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a delta, opening a message if none is open.
    ///
    /// Returns the accumulated text of the open message.
    pub fn append(&mut self, delta: &str) -> &str {
        let text = self.open.get_or_insert_with(|| {
            log::debug!("TranscriptAssembler: opening assistant message");
            String::new()
        });

        if !delta.is_empty() {
            text.push_str(delta);
            self.delta_count += 1;

            if self.delta_count % 10 == 0 {
                log::debug!(
                    "TranscriptAssembler: {} deltas, {} chars accumulated",
                    self.delta_count,
                    text.len()
                );
            }
        }
        text
    }

    /// Close the open message and hand it over for the history.
    ///
    /// Returns `None` if no message is open, so repeated end markers cannot
    /// duplicate a message.
    pub fn flush(&mut self) -> Option<ChatMessage> {
        let text = self.open.take()?;
        log::info!(
            "TranscriptAssembler: flushed assistant message ({} deltas, {} chars)",
            self.delta_count,
            text.len()
        );
        self.delta_count = 0;
        Some(ChatMessage::assistant(text))
    }

    /// Drop the open message without flushing it
    pub fn discard(&mut self) {
        self.open = None;
        self.delta_count = 0;
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    /// Text of the open message, or "" if none is open
    pub fn current_text(&self) -> &str {
        self.open.as_deref().unwrap_or("")
    }

    pub fn delta_count(&self) -> u64 {
        self.delta_count
    }
}
