//! Ordered playback of agent audio
//!
//! ```text
//! audio_chunk ──▶ PlaybackQueue (FIFO) ──drain──▶ one batch ──▶ AudioPlayer
//!                      ▲                                           │
//!                      └────────── finish_drain(batch id) ◀────────┘
//! ```
//!
//! The queue is plain state owned by the session loop. Only one batch plays
//! at a time; chunks arriving during playback wait for the next drain.

pub mod decoder;
pub mod player;
pub mod queue;

pub use decoder::{decode_audio, decode_batch, DecodedAudio};
pub use player::{AudioPlayer, CpalPlayer};
pub use queue::{PlaybackBatch, PlaybackQueue, PlaybackState};

/// Errors that can occur while playing a batch
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlaybackError {
    #[error("Failed to decode audio: {0}")]
    Decode(String),
    #[error("No audio output device found")]
    NoOutputDevice,
    #[error("Audio output failed: {0}")]
    Output(String),
}
