//! Decoding of drained audio batches
//!
//! Agent audio arrives either as a container (WAV, MP3, Ogg) or as bare
//! PCM16 LE. Containers go through symphonia; anything without a recognized
//! header is treated as raw mono PCM16 at the configured rate.

use std::io::ErrorKind;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};

use super::PlaybackError;
use crate::audio::decode_sample;
use crate::audio::resample::LinearResampler;

/// Mono f32 samples ready for output
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1000 / self.sample_rate as u64
    }
}

/// Container kinds we sniff by magic bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Container {
    Wav,
    Mp3,
    Ogg,
}

impl Container {
    fn sniff(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [b'R', b'I', b'F', b'F', ..] => Some(Container::Wav),
            [b'O', b'g', b'g', b'S', ..] => Some(Container::Ogg),
            [b'I', b'D', b'3', ..] => Some(Container::Mp3),
            [0xFF, second, ..] if second & 0xE0 == 0xE0 => Some(Container::Mp3),
            _ => None,
        }
    }

    fn extension(self) -> &'static str {
        match self {
            Container::Wav => "wav",
            Container::Mp3 => "mp3",
            Container::Ogg => "ogg",
        }
    }
}

/// Decode one playable unit to mono f32.
///
/// `raw_pcm_rate` is the sample rate assumed for headerless PCM16.
pub fn decode_audio(bytes: &[u8], raw_pcm_rate: u32) -> Result<DecodedAudio, PlaybackError> {
    if bytes.is_empty() {
        return Err(PlaybackError::Decode("empty audio batch".to_string()));
    }

    match Container::sniff(bytes) {
        Some(container) => decode_container(bytes, container),
        None => decode_raw_pcm16(bytes, raw_pcm_rate),
    }
}

/// Decode a drained batch chunk by chunk and join the samples at the rate of
/// the first decoded chunk.
///
/// Each container chunk is decoded on its own; adjacent headerless chunks are
/// joined first so a sample split across chunk boundaries survives. A chunk
/// that fails to decode is skipped; the batch fails only if nothing decodes.
pub fn decode_batch(chunks: &[Vec<u8>], raw_pcm_rate: u32) -> Result<DecodedAudio, PlaybackError> {
    let mut joined: Option<DecodedAudio> = None;
    let mut last_err = None;
    let mut raw = Vec::new();

    for chunk in chunks.iter().filter(|c| !c.is_empty()) {
        if Container::sniff(chunk).is_none() {
            raw.extend_from_slice(chunk);
            continue;
        }
        if !raw.is_empty() {
            let part = decode_raw_pcm16(&std::mem::take(&mut raw), raw_pcm_rate);
            append_part(&mut joined, &mut last_err, part);
        }
        append_part(&mut joined, &mut last_err, decode_audio(chunk, raw_pcm_rate));
    }
    if !raw.is_empty() {
        append_part(&mut joined, &mut last_err, decode_raw_pcm16(&raw, raw_pcm_rate));
    }

    joined.ok_or_else(|| {
        last_err.unwrap_or_else(|| PlaybackError::Decode("empty audio batch".to_string()))
    })
}

fn append_part(
    joined: &mut Option<DecodedAudio>,
    last_err: &mut Option<PlaybackError>,
    part: Result<DecodedAudio, PlaybackError>,
) {
    let part = match part {
        Ok(part) => part,
        Err(e) => {
            log::warn!("Decoder: skipping chunk: {}", e);
            *last_err = Some(e);
            return;
        }
    };

    match joined {
        None => *joined = Some(part),
        Some(acc) if acc.sample_rate == part.sample_rate => acc.samples.extend(part.samples),
        Some(acc) => {
            let mut resampler = LinearResampler::new(part.sample_rate, acc.sample_rate);
            acc.samples.extend(resampler.process(&part.samples));
        }
    }
}

fn decode_raw_pcm16(bytes: &[u8], sample_rate: u32) -> Result<DecodedAudio, PlaybackError> {
    if bytes.len() % 2 != 0 {
        log::debug!("Decoder: odd-length PCM batch, dropping trailing byte");
    }
    let samples = bytes
        .chunks_exact(2)
        .map(|pair| decode_sample(i16::from_le_bytes([pair[0], pair[1]])))
        .collect::<Vec<_>>();

    if samples.is_empty() {
        return Err(PlaybackError::Decode("no PCM samples in batch".to_string()));
    }
    Ok(DecodedAudio {
        samples,
        sample_rate,
    })
}

fn decode_container(bytes: &[u8], container: Container) -> Result<DecodedAudio, PlaybackError> {
    let mut hint = Hint::new();
    hint.with_extension(container.extension());

    let source = std::io::Cursor::new(bytes.to_vec());
    let mss = MediaSourceStream::new(Box::new(source), Default::default());
    let probe = get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| PlaybackError::Decode(format!("unsupported or invalid audio: {}", e)))?;

    let mut format = probe.format;
    let track = format
        .default_track()
        .ok_or_else(|| PlaybackError::Decode("audio has no default track".to_string()))?;
    if track.codec_params.codec == CODEC_TYPE_NULL {
        return Err(PlaybackError::Decode("audio codec is not supported".to_string()));
    }

    let mut decoder = get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| PlaybackError::Decode(format!("failed to initialize decoder: {}", e)))?;
    let target_track = track.id;
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
    let mut samples = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(err)) if err.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(PlaybackError::Decode(format!("demux failed: {}", e))),
        };

        if packet.track_id() != target_track {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(audio) => audio,
            Err(SymphoniaError::IoError(err)) if err.kind() == ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(e) => return Err(PlaybackError::Decode(format!("decode failed: {}", e))),
        };

        let spec = *decoded.spec();
        let channels = spec.channels.count().max(1);
        sample_rate = spec.rate;

        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buffer.copy_interleaved_ref(decoded);
        for frame in buffer.samples().chunks(channels) {
            samples.push(frame.iter().sum::<f32>() / channels as f32);
        }
    }

    if samples.is_empty() || sample_rate == 0 {
        return Err(PlaybackError::Decode("no decodable audio found".to_string()));
    }

    Ok(DecodedAudio {
        samples,
        sample_rate,
    })
}
