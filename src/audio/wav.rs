//! In-memory WAV encoding for one-shot utterance uploads

use std::io::Cursor;

use hound::{SampleFormat, WavSpec, WavWriter};

use super::encoder::decode_pcm16;
use super::AudioError;

/// Wrap little-endian PCM16 mono bytes in a WAV container
pub fn pcm16_to_wav(pcm: &[u8], sample_rate: u32) -> Result<Vec<u8>, AudioError> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(pcm.len() + 44));
    {
        let mut writer = WavWriter::new(&mut cursor, spec)
            .map_err(|e| AudioError::EncodeFailed(e.to_string()))?;
        for sample in decode_pcm16(pcm) {
            writer
                .write_sample(sample)
                .map_err(|e| AudioError::EncodeFailed(e.to_string()))?;
        }
        writer
            .finalize()
            .map_err(|e| AudioError::EncodeFailed(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
