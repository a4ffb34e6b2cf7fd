//! Inbound message routing
//!
//! Every inbound message is handled to completion before the next one, in
//! arrival order. Routing never blocks: audio goes into the playback queue,
//! and draining is left to the session loop.

use super::protocol::{decode_text_frame, DecodeError, InboundEvent};
use super::transcript_assembler::TranscriptAssembler;
use crate::agent_api::ChatMessage;
use crate::playback::PlaybackQueue;
use crate::session::Session;

/// What a routed message changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// User transcript appended to the history
    UserMessage(ChatMessage),
    /// Assistant text so far for the open message
    AssistantText(String),
    /// `end_of_llm`: the flushed message, or `None` if nothing was open
    AssistantFinished(Option<ChatMessage>),
    /// Chunk queued; `drain` if it scheduled a drain
    AudioQueued { drain: bool },
    /// `end_of_audio`; `drain` if it scheduled a drain
    AudioComplete { drain: bool },
    /// History replaced with the server's snapshot
    HistoryReplaced(Vec<ChatMessage>),
    /// Message dropped
    Dropped(DecodeError),
}

/// Where routed messages land
pub struct RouteTargets<'a> {
    pub session: &'a mut Session,
    pub assembler: &'a mut TranscriptAssembler,
    pub queue: &'a mut PlaybackQueue,
}

#[derive(Debug, Default)]
pub struct InboundMessageRouter {
    routed: u64,
    dropped: u64,
}

impl InboundMessageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn routed(&self) -> u64 {
        self.routed
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Parse and route one raw text frame
    pub fn route_text(&mut self, raw: &str, targets: RouteTargets<'_>) -> RouteOutcome {
        match decode_text_frame(raw) {
            Ok(event) => self.dispatch(event, targets),
            Err(e) => {
                self.dropped += 1;
                match &e {
                    DecodeError::UnknownType => {
                        log::debug!("Router: ignoring message of unknown type: {}", truncate(raw))
                    }
                    _ => log::warn!("Router: dropping message ({}): {}", e, truncate(raw)),
                }
                RouteOutcome::Dropped(e)
            }
        }
    }

    /// Route one decoded event
    pub fn dispatch(&mut self, event: InboundEvent, targets: RouteTargets<'_>) -> RouteOutcome {
        self.routed += 1;
        let RouteTargets {
            session,
            assembler,
            queue,
        } = targets;

        match event {
            InboundEvent::UserTranscript(text) => {
                let message = ChatMessage::user(text);
                session.push(message.clone());
                RouteOutcome::UserMessage(message)
            }
            InboundEvent::AssistantDelta(delta) => {
                RouteOutcome::AssistantText(assembler.append(&delta).to_string())
            }
            InboundEvent::AudioChunk(bytes) => RouteOutcome::AudioQueued {
                drain: queue.enqueue(bytes),
            },
            InboundEvent::EndOfAudio => RouteOutcome::AudioComplete {
                drain: queue.mark_producer_complete(),
            },
            InboundEvent::EndOfLlm => {
                let flushed = assembler.flush();
                if let Some(message) = &flushed {
                    session.push(message.clone());
                }
                RouteOutcome::AssistantFinished(flushed)
            }
            InboundEvent::History(history) => {
                // The snapshot already holds whatever was streaming
                assembler.discard();
                session.replace_history(history.clone());
                RouteOutcome::HistoryReplaced(history)
            }
        }
    }
}

fn truncate(raw: &str) -> &str {
    const MAX: usize = 120;
    if raw.len() <= MAX {
        return raw;
    }
    let mut end = MAX;
    while !raw.is_char_boundary(end) {
        end -= 1;
    }
    &raw[..end]
}
