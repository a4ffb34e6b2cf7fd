//! Data structures for the agent HTTP API.

use serde::{Deserialize, Serialize};

/// Author of a conversation message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One entry of the conversation history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

// ============================================================================
// Agent API Response Types
// ============================================================================

/// Response from GET /agent/chat/{session_id}/history
#[derive(Debug, Default, Deserialize)]
pub struct HistoryResponse {
    #[serde(default)]
    pub history: Vec<ChatMessage>,
}

/// Response from POST /agent/chat/{session_id}
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ChatReply {
    /// What the agent heard; empty when recognition failed
    #[serde(default)]
    pub transcript: String,
    /// The assistant's full reply text
    #[serde(default)]
    pub response: String,
    /// Synthesized speech segments, in playback order
    #[serde(default, deserialize_with = "one_or_many")]
    pub audio_urls: Vec<String>,
    /// Full history after this turn
    #[serde(default)]
    pub history: Vec<ChatMessage>,
}

/// Response from POST /generate-voice
#[derive(Debug, Clone, Deserialize)]
pub struct VoiceResponse {
    pub audio_url: String,
}

/// Request body for POST /generate-voice
#[derive(Debug, Serialize)]
pub struct VoiceRequest<'a> {
    pub text: &'a str,
}

/// Older servers return a single URL instead of a list
fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
        Null(()),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(url) => vec![url],
        OneOrMany::Many(urls) => urls,
        OneOrMany::Null(()) => Vec::new(),
    })
}
