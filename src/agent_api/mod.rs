//! Agent HTTP API
//!
//! History fetch, one-shot audio upload, text-to-speech and audio download.

mod client;
mod types;

pub use client::AgentApi;
pub use types::{ChatMessage, ChatReply, HistoryResponse, Role, VoiceResponse};

/// Errors that can occur talking to the agent over HTTP
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Agent API error ({status}): {message}")]
    Status { status: u16, message: String },
    #[error("Failed to parse agent response: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_display() {
        let err = ApiError::Status {
            status: 500,
            message: "boom".to_string(),
        };
        assert!(err.to_string().contains("500"));
        assert!(err.to_string().contains("boom"));
    }
}
