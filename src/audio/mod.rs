//! Audio capture and encoding
//!
//! Microphone capture through CPAL, conversion to 16kHz mono PCM16 frames,
//! and WAV wrapping (hound) for the one-shot upload transport.

pub mod encoder;
pub mod recorder;
pub mod resample;
pub mod wav;

pub use encoder::{decode_sample, encode_pcm16, encode_sample, AudioFrame, FrameAssembler};
pub use recorder::{CaptureConfig, CapturePipeline, CpalMicrophone, MicrophoneCapture};
pub use wav::pcm16_to_wav;

/// Errors that can occur during audio capture or encoding.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AudioError {
    #[error("No audio input device found")]
    NoInputDevice,
    #[error("Microphone is unavailable or access was denied")]
    DeviceUnavailable,
    #[error("No supported audio configuration")]
    NoSupportedConfig,
    #[error("Failed to create audio stream: {0}")]
    StreamCreationFailed(String),
    #[error("Failed to encode audio: {0}")]
    EncodeFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_error_display() {
        assert!(AudioError::DeviceUnavailable
            .to_string()
            .contains("denied"));
        assert!(AudioError::StreamCreationFailed("busy".to_string())
            .to_string()
            .contains("busy"));
    }
}
