//! Agent HTTP API client.
//!
//! Thin wrappers over the agent's request/response endpoints. The streaming
//! channel does not go through here.

use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use std::time::Duration;

use super::types::{ChatMessage, ChatReply, HistoryResponse, VoiceRequest, VoiceResponse};
use super::ApiError;

/// Upload + LLM + TTS can take a while on the server side
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Client for one agent server
#[derive(Debug, Clone)]
pub struct AgentApi {
    client: Client,
    base_url: String,
}

impl AgentApi {
    /// Create a client for `base_url` (e.g. `http://localhost:8000`)
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Resolve a server-relative URL against the base
    pub fn resolve(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else if url.starts_with('/') {
            format!("{}{}", self.base_url, url)
        } else {
            format!("{}/{}", self.base_url, url)
        }
    }

    /// Fetch the conversation history for a session.
    pub async fn fetch_history(&self, session_id: &str) -> Result<Vec<ChatMessage>, ApiError> {
        let url = format!("{}/agent/chat/{}/history", self.base_url, session_id);
        log::debug!("AgentApi: GET {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ApiError::Network(format!("fetching history: {}", e)))?;

        let history: HistoryResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| ApiError::Parse(format!("history response: {}", e)))?;

        Ok(history.history)
    }

    /// Upload one recorded utterance (WAV) and get the agent's reply.
    pub async fn post_chat_audio(
        &self,
        session_id: &str,
        wav: Vec<u8>,
    ) -> Result<ChatReply, ApiError> {
        let url = format!("{}/agent/chat/{}", self.base_url, session_id);
        log::info!("AgentApi: uploading {} bytes to {}", wav.len(), url);

        let part = Part::bytes(wav)
            .file_name("recording.wav")
            .mime_str("audio/wav")
            .map_err(|e| ApiError::Network(e.to_string()))?;
        let form = Form::new().part("audio", part);

        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ApiError::Network(format!("uploading audio: {}", e)))?;

        check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| ApiError::Parse(format!("chat response: {}", e)))
    }

    /// One-shot text-to-speech. Returns the URL of the generated audio.
    pub async fn generate_voice(&self, text: &str) -> Result<String, ApiError> {
        let url = format!("{}/generate-voice", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&VoiceRequest { text })
            .send()
            .await
            .map_err(|e| ApiError::Network(format!("generating voice: {}", e)))?;

        let voice: VoiceResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| ApiError::Parse(format!("voice response: {}", e)))?;

        Ok(voice.audio_url)
    }

    /// Download an audio file (absolute or server-relative URL).
    pub async fn fetch_audio(&self, url: &str) -> Result<Vec<u8>, ApiError> {
        let url = self.resolve(url);
        log::debug!("AgentApi: GET {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ApiError::Network(format!("fetching audio: {}", e)))?;

        let bytes = check_status(response)
            .await?
            .bytes()
            .await
            .map_err(|e| ApiError::Network(format!("reading audio body: {}", e)))?;

        Ok(bytes.to_vec())
    }
}

async fn check_status(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ApiError::Status {
        status: status.as_u16(),
        message: body,
    })
}
