//! Streaming protocol client for the voice agent
//!
//! One persistent channel per session carries microphone audio out and
//! transcripts plus synthesized speech back.
//!
//! # Architecture
//!
//! ```text
//! AudioFrame ──▶ Transmitter ──▶ Channel ──▶ agent
//!                                   │
//!            ChannelEvent::Message ◀┘
//!                     │
//!                     ▼
//!          InboundMessageRouter ──▶ Session history
//!                     ├───────────▶ TranscriptAssembler
//!                     └───────────▶ PlaybackQueue
//! ```
//!
//! # Failure Strategy
//!
//! - No automatic reconnection; the next user start opens a fresh channel
//! - Sending on a channel that is not Open is a silent no-op
//! - Malformed inbound messages are logged and dropped

pub mod channel;
pub mod connection;
pub mod protocol;
pub mod router;
pub mod transcript_assembler;
pub mod transmitter;

pub use channel::{Channel, ChannelEvent, ConnectionState};
pub use connection::ConnectionManager;
pub use protocol::{ControlMarker, DecodeError, InboundEvent, InboundMessage, OutboundPayload};
pub use router::{InboundMessageRouter, RouteOutcome, RouteTargets};
pub use transcript_assembler::TranscriptAssembler;
pub use transmitter::{RecordingState, Transmitter};

/// Errors that can occur on the streaming channel
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamingError {
    /// Failed to establish the WebSocket connection
    #[error("Failed to connect to voice agent: {0}")]
    ConnectionFailed(String),
    /// WebSocket protocol error
    #[error("WebSocket protocol error: {0}")]
    ProtocolError(String),
    /// Connection was closed unexpectedly
    #[error("Connection closed: {0}")]
    Disconnected(String),
    /// Failed to send a frame
    #[error("Failed to send: {0}")]
    SendFailed(String),
}

/// Build the WebSocket endpoint from the HTTP base URL and stream path
pub fn stream_endpoint(server_url: &str, stream_path: &str) -> String {
    let base = server_url.trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        base.to_string()
    };

    if stream_path.starts_with('/') {
        format!("{}{}", base, stream_path)
    } else {
        format!("{}/{}", base, stream_path)
    }
}
