//! Voice agent streaming protocol types
//!
//! # Protocol Overview
//!
//! Client → server, on one WebSocket:
//! - Binary frames: raw PCM16 LE mono audio at 16kHz
//! - Text frames: control sentinels `stop` (end of utterance) and `end` (end of session)
//!
//! Server → client, JSON text frames discriminated by `type`:
//! - `{"type": "transcript", "userType": "user"|"assistant", "transcript"|"text": "..."}`
//! - `{"type": "audio_chunk", "data": "<base64>"}`
//! - `{"type": "end_of_audio"}`
//! - `{"type": "end_of_llm"}`

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};

use crate::agent_api::ChatMessage;

/// Who produced a transcript
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    #[default]
    User,
    Assistant,
}

// ============================================================================
// Client Messages (sent TO the agent)
// ============================================================================

/// Out-of-band control sentinel, sent as a text frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMarker {
    /// End of the current utterance
    Stop,
    /// End of the chat session
    End,
}

impl ControlMarker {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlMarker::Stop => "stop",
            ControlMarker::End => "end",
        }
    }
}

/// A payload for the channel. Audio and control are distinguished by frame type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundPayload {
    /// PCM16 LE bytes, sent as a binary frame
    Audio(Vec<u8>),
    /// Control sentinel, sent as a text frame
    Control(ControlMarker),
}

// ============================================================================
// Server Messages (received FROM the agent)
// ============================================================================

/// Wire format of inbound JSON messages
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum InboundMessage {
    /// Recognized user speech, or an incremental piece of assistant text
    #[serde(rename = "transcript")]
    Transcript {
        #[serde(rename = "userType", default)]
        user_type: Speaker,
        #[serde(alias = "text", default)]
        transcript: String,
    },

    /// One segment of synthesized speech
    #[serde(rename = "audio_chunk")]
    AudioChunk {
        /// Base64-encoded audio bytes
        data: String,
    },

    /// Server finished sending audio for this turn
    #[serde(rename = "end_of_audio")]
    EndOfAudio,

    /// Server finished streaming assistant text for this turn
    #[serde(rename = "end_of_llm")]
    EndOfLlm,

    /// Catch-all for message types we don't handle
    #[serde(other)]
    Unknown,
}

/// Decoded inbound event, independent of how it arrived
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    UserTranscript(String),
    AssistantDelta(String),
    AudioChunk(Vec<u8>),
    EndOfAudio,
    EndOfLlm,
    /// The server's full copy of the conversation, replacing ours
    History(Vec<ChatMessage>),
}

/// Why an inbound text frame was dropped
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("undecodable audio chunk: {0}")]
    BadAudio(String),
    #[error("unknown message type")]
    UnknownType,
}

impl InboundMessage {
    /// Parse a raw JSON text frame
    pub fn parse(raw: &str) -> Result<Self, DecodeError> {
        serde_json::from_str(raw).map_err(|e| DecodeError::Malformed(e.to_string()))
    }

    /// Decode into a transport-independent event, base64-decoding audio
    pub fn into_event(self) -> Result<InboundEvent, DecodeError> {
        match self {
            InboundMessage::Transcript {
                user_type: Speaker::User,
                transcript,
            } => Ok(InboundEvent::UserTranscript(transcript)),
            InboundMessage::Transcript {
                user_type: Speaker::Assistant,
                transcript,
            } => Ok(InboundEvent::AssistantDelta(transcript)),
            InboundMessage::AudioChunk { data } => STANDARD
                .decode(data.trim())
                .map(InboundEvent::AudioChunk)
                .map_err(|e| DecodeError::BadAudio(e.to_string())),
            InboundMessage::EndOfAudio => Ok(InboundEvent::EndOfAudio),
            InboundMessage::EndOfLlm => Ok(InboundEvent::EndOfLlm),
            InboundMessage::Unknown => Err(DecodeError::UnknownType),
        }
    }
}

/// Parse and decode one text frame
pub fn decode_text_frame(raw: &str) -> Result<InboundEvent, DecodeError> {
    InboundMessage::parse(raw)?.into_event()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_marker_text() {
        assert_eq!(ControlMarker::Stop.as_str(), "stop");
        assert_eq!(ControlMarker::End.as_str(), "end");
    }

    #[test]
    fn test_user_transcript() {
        let event =
            decode_text_frame(r#"{"type":"transcript","userType":"user","transcript":"hi there"}"#)
                .unwrap();
        assert_eq!(event, InboundEvent::UserTranscript("hi there".to_string()));
    }

    #[test]
    fn test_assistant_transcript_uses_text_alias() {
        let event =
            decode_text_frame(r#"{"type":"transcript","userType":"assistant","text":"Hel"}"#)
                .unwrap();
        assert_eq!(event, InboundEvent::AssistantDelta("Hel".to_string()));
    }

    #[test]
    fn test_audio_chunk_is_base64_decoded() {
        let encoded = STANDARD.encode([1u8, 2, 3, 250]);
        let raw = format!(r#"{{"type":"audio_chunk","data":"{}"}}"#, encoded);
        let event = decode_text_frame(&raw).unwrap();
        assert_eq!(event, InboundEvent::AudioChunk(vec![1, 2, 3, 250]));
    }

    #[test]
    fn test_end_markers() {
        assert_eq!(
            decode_text_frame(r#"{"type":"end_of_audio"}"#).unwrap(),
            InboundEvent::EndOfAudio
        );
        assert_eq!(
            decode_text_frame(r#"{"type":"end_of_llm"}"#).unwrap(),
            InboundEvent::EndOfLlm
        );
    }

    #[test]
    fn test_unknown_type() {
        let err = decode_text_frame(r#"{"type":"some.future.type","data":1}"#).unwrap_err();
        assert_eq!(err, DecodeError::UnknownType);
    }

    #[test]
    fn test_bad_base64_is_rejected() {
        let err = decode_text_frame(r#"{"type":"audio_chunk","data":"***"}"#).unwrap_err();
        assert!(matches!(err, DecodeError::BadAudio(_)));
    }

    #[test]
    fn test_not_json_is_malformed() {
        assert!(matches!(
            decode_text_frame("Echo: hello").unwrap_err(),
            DecodeError::Malformed(_)
        ));
        // Legacy untyped frame
        assert!(matches!(
            decode_text_frame(r#"{"Transcript":"hello"}"#).unwrap_err(),
            DecodeError::Malformed(_)
        ));
    }
}
