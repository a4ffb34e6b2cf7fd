//! PCM16 encoding for captured audio
//!
//! Converts floating point capture samples into little-endian signed 16-bit
//! frames. The conversion is asymmetric so that -1.0 maps to `i16::MIN` and
//! 1.0 maps to `i16::MAX`, covering the full signed range.
//!
//! # Frame Budget
//!
//! At 16kHz mono PCM16 with 4096-sample frames:
//! - Frame size: 4096 samples × 2 bytes = 8,192 bytes
//! - Frame duration: 256 ms

use uuid::Uuid;

/// Scale for non-negative samples
const POSITIVE_SCALE: f32 = 32767.0;
/// Scale for negative samples
const NEGATIVE_SCALE: f32 = 32768.0;

/// One fixed-size block of encoded audio produced from one capture buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    /// Recording that produced this frame (frames from older recordings are stale)
    pub capture_id: Uuid,
    /// Capture order within the recording, starting at 0
    pub sequence: u64,
    /// Little-endian PCM16 mono bytes
    pub pcm: Vec<u8>,
}

impl AudioFrame {
    /// Number of samples carried by this frame
    pub fn sample_count(&self) -> usize {
        self.pcm.len() / 2
    }

    /// Duration of this frame in milliseconds
    pub fn duration_ms(&self, sample_rate: u32) -> u64 {
        if sample_rate == 0 {
            return 0;
        }
        (self.sample_count() as u64 * 1000) / sample_rate as u64
    }
}

/// Encode one floating point sample to PCM16.
///
/// Input is clamped to [-1.0, 1.0]; NaN encodes as silence.
pub fn encode_sample(sample: f32) -> i16 {
    if sample.is_nan() {
        return 0;
    }
    let clamped = sample.clamp(-1.0, 1.0);
    if clamped >= 0.0 {
        (clamped * POSITIVE_SCALE).round() as i16
    } else {
        (clamped * NEGATIVE_SCALE).round() as i16
    }
}

/// Decode one PCM16 sample back to floating point (inverse of [`encode_sample`])
pub fn decode_sample(sample: i16) -> f32 {
    if sample >= 0 {
        sample as f32 / POSITIVE_SCALE
    } else {
        sample as f32 / NEGATIVE_SCALE
    }
}

/// Encode a buffer of samples into little-endian PCM16 bytes
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|&s| encode_sample(s).to_le_bytes())
        .collect()
}

/// Decode little-endian PCM16 bytes into samples. A trailing odd byte is ignored.
pub fn decode_pcm16(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Accumulates resampled mono samples and cuts them into fixed-size frames
///
/// Thread-safety: This struct is NOT internally synchronized. It lives on the
/// audio thread that owns the capture stream.
#[derive(Debug)]
pub struct FrameAssembler {
    capture_id: Uuid,
    frame_samples: usize,
    pending: Vec<f32>,
    next_sequence: u64,
}

impl FrameAssembler {
    /// Create an assembler producing frames of `frame_samples` samples
    pub fn new(capture_id: Uuid, frame_samples: usize) -> Self {
        let frame_samples = frame_samples.max(1);
        Self {
            capture_id,
            frame_samples,
            pending: Vec::with_capacity(frame_samples * 2),
            next_sequence: 0,
        }
    }

    /// Push samples and return every complete frame, in capture order
    pub fn push(&mut self, samples: &[f32]) -> Vec<AudioFrame> {
        self.pending.extend_from_slice(samples);

        let mut frames = Vec::new();
        while self.pending.len() >= self.frame_samples {
            let block: Vec<f32> = self.pending.drain(..self.frame_samples).collect();
            frames.push(AudioFrame {
                capture_id: self.capture_id,
                sequence: self.next_sequence,
                pcm: encode_pcm16(&block),
            });
            self.next_sequence += 1;
        }
        frames
    }

    /// Samples waiting for a full frame
    pub fn pending_samples(&self) -> usize {
        self.pending.len()
    }

    /// Sequence number that will be assigned to the next frame
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }
}
