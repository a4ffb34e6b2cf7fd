//! Transport strategies
//!
//! Both transports sit behind [`Channel`], so the transmitter, router and
//! state machine don't care which one is in use.
//!
//! - `StreamingDuplex`: a WebSocket carrying PCM frames out and JSON events back
//! - `RequestResponse`: each utterance is buffered, uploaded as one WAV when
//!   the stop marker is sent, and the reply is replayed as inbound events

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::agent_api::AgentApi;
use crate::audio::pcm16_to_wav;
use crate::streaming::channel::{Channel, ChannelEvent, ChannelStatus, ConnectionState};
use crate::streaming::{ConnectionManager, ControlMarker, InboundEvent, OutboundPayload};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum TransportMode {
    #[default]
    StreamingDuplex,
    RequestResponse,
}

impl TransportMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportMode::StreamingDuplex => "streaming-duplex",
            TransportMode::RequestResponse => "request-response",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "streaming-duplex" | "streaming" | "duplex" => Some(TransportMode::StreamingDuplex),
            "request-response" | "upload" => Some(TransportMode::RequestResponse),
            _ => None,
        }
    }
}

/// Create the session's channel for `mode`
pub fn build_channel(
    mode: TransportMode,
    events: mpsc::UnboundedSender<ChannelEvent>,
    api: AgentApi,
    session_id: &str,
    sample_rate: u32,
) -> Box<dyn Channel> {
    match mode {
        TransportMode::StreamingDuplex => Box::new(ConnectionManager::new(events)),
        TransportMode::RequestResponse => {
            Box::new(UploadChannel::new(events, api, session_id, sample_rate))
        }
    }
}

/// One-shot upload transport: an HTTP round trip per utterance
pub struct UploadChannel {
    status: ChannelStatus,
    events: mpsc::UnboundedSender<ChannelEvent>,
    api: AgentApi,
    session_id: String,
    sample_rate: u32,
    /// PCM16 of the utterance being recorded
    utterance: Vec<u8>,
    uploads: Vec<JoinHandle<()>>,
}

impl UploadChannel {
    pub fn new(
        events: mpsc::UnboundedSender<ChannelEvent>,
        api: AgentApi,
        session_id: &str,
        sample_rate: u32,
    ) -> Self {
        Self {
            status: ChannelStatus::default(),
            events,
            api,
            session_id: session_id.to_string(),
            sample_rate,
            utterance: Vec::new(),
            uploads: Vec::new(),
        }
    }

    /// Bytes buffered for the current utterance
    pub fn buffered_bytes(&self) -> usize {
        self.utterance.len()
    }

    fn finish_utterance(&mut self, channel_id: Uuid) {
        let pcm = std::mem::take(&mut self.utterance);

        if pcm.is_empty() {
            log::warn!("Upload: nothing recorded, skipping upload");
            for event in [InboundEvent::EndOfLlm, InboundEvent::EndOfAudio] {
                let _ = self.events.send(ChannelEvent::Inbound { channel_id, event });
            }
            return;
        }

        self.uploads.retain(|task| !task.is_finished());
        self.uploads.push(tokio::spawn(run_upload(
            channel_id,
            self.api.clone(),
            self.session_id.clone(),
            self.sample_rate,
            pcm,
            self.events.clone(),
        )));
    }
}

impl Channel for UploadChannel {
    fn open(&mut self, _endpoint: &str) -> Uuid {
        if let Some(id) = self.status.live_channel() {
            return id;
        }
        let channel_id = self.status.begin_connecting();
        self.utterance.clear();
        log::info!("Upload: channel {} ready ({})", channel_id, self.api.base_url());
        let _ = self.events.send(ChannelEvent::Opened { channel_id });
        channel_id
    }

    fn apply(&mut self, event: &ChannelEvent) -> bool {
        let current = self.status.apply(event);
        if current {
            if let ChannelEvent::Errored { err, .. } = event {
                log::warn!("Upload: {}", err);
            }
        }
        current
    }

    fn state(&self) -> ConnectionState {
        self.status.state()
    }

    fn send(&mut self, payload: OutboundPayload) -> bool {
        if self.status.state() != ConnectionState::Open {
            return false;
        }
        let Some(channel_id) = self.status.channel_id() else {
            return false;
        };

        match payload {
            OutboundPayload::Audio(pcm) => self.utterance.extend_from_slice(&pcm),
            OutboundPayload::Control(ControlMarker::Stop) => self.finish_utterance(channel_id),
            // The HTTP API has no session end; the chat just stops posting
            OutboundPayload::Control(ControlMarker::End) => {}
        }
        true
    }

    fn close(&mut self) {
        if self.status.channel_id().is_none() {
            return;
        }
        for task in self.uploads.drain(..) {
            task.abort();
        }
        self.utterance.clear();
        self.status.mark_closed();
    }
}

impl Drop for UploadChannel {
    fn drop(&mut self) {
        for task in self.uploads.drain(..) {
            task.abort();
        }
    }
}

/// Upload one utterance and replay the reply as inbound events
async fn run_upload(
    channel_id: Uuid,
    api: AgentApi,
    session_id: String,
    sample_rate: u32,
    pcm: Vec<u8>,
    events: mpsc::UnboundedSender<ChannelEvent>,
) {
    let emit = |event: InboundEvent| {
        events
            .send(ChannelEvent::Inbound { channel_id, event })
            .is_ok()
    };
    let fail = |err: String| {
        let _ = events.send(ChannelEvent::Errored { channel_id, err });
    };

    let wav = match pcm16_to_wav(&pcm, sample_rate) {
        Ok(wav) => wav,
        Err(e) => return fail(e.to_string()),
    };

    let reply = match api.post_chat_audio(&session_id, wav).await {
        Ok(reply) => reply,
        Err(e) => return fail(e.to_string()),
    };

    log::info!(
        "Upload: reply with {} chars and {} audio segments",
        reply.response.len(),
        reply.audio_urls.len()
    );

    // The server's history already holds this turn; show it instead of the
    // separate transcript and response fields
    let text_emitted = if !reply.history.is_empty() {
        emit(InboundEvent::History(reply.history))
    } else {
        (reply.transcript.is_empty() || emit(InboundEvent::UserTranscript(reply.transcript)))
            && (reply.response.is_empty() || emit(InboundEvent::AssistantDelta(reply.response)))
    };
    if !text_emitted || !emit(InboundEvent::EndOfLlm) {
        return;
    }

    for url in &reply.audio_urls {
        match api.fetch_audio(url).await {
            Ok(bytes) => {
                if !emit(InboundEvent::AudioChunk(bytes)) {
                    return;
                }
            }
            Err(e) => log::warn!("Upload: skipping audio segment {}: {}", url, e),
        }
    }

    emit(InboundEvent::EndOfAudio);
}
