//! Audio output
//!
//! `play` blocks until the batch has been played or the cancel token fires.
//! Callers run it on a blocking thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Sample, SampleFormat, Stream, StreamConfig};
use tokio_util::sync::CancellationToken;

use super::decoder::decode_batch;
use super::PlaybackError;
use crate::audio::resample::LinearResampler;

/// How often the blocking wait checks for completion or cancellation
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Grace period for the device to flush its last buffer
const TAIL_FLUSH: Duration = Duration::from_millis(120);

/// Sink for drained audio batches
pub trait AudioPlayer: Send + Sync {
    /// Play one batch of chunks, in order, as a single unit (blocking).
    /// Returns early and successfully if `cancel` fires.
    fn play(&self, chunks: &[Vec<u8>], cancel: &CancellationToken) -> Result<(), PlaybackError>;
}

/// Plays through the default output device
pub struct CpalPlayer {
    raw_pcm_rate: u32,
}

impl CpalPlayer {
    /// `raw_pcm_rate` is used for batches that carry no container header
    pub fn new(raw_pcm_rate: u32) -> Self {
        Self { raw_pcm_rate }
    }
}

impl AudioPlayer for CpalPlayer {
    fn play(&self, chunks: &[Vec<u8>], cancel: &CancellationToken) -> Result<(), PlaybackError> {
        let decoded = decode_batch(chunks, self.raw_pcm_rate)?;

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(PlaybackError::NoOutputDevice)?;
        let supported = device
            .default_output_config()
            .map_err(|e| PlaybackError::Output(e.to_string()))?;
        let sample_format = supported.sample_format();
        let config: StreamConfig = supported.into();

        let mut resampler = LinearResampler::new(decoded.sample_rate, config.sample_rate.0);
        let samples = resampler.process(&decoded.samples);

        log::debug!(
            "Player: {} ms of audio at {} Hz -> {} Hz, {} channels",
            decoded.duration_ms(),
            decoded.sample_rate,
            config.sample_rate.0,
            config.channels
        );

        let finished = Arc::new(AtomicBool::new(false));
        let stream = match sample_format {
            SampleFormat::F32 => build_output_typed::<f32>(&device, &config, samples, finished.clone()),
            SampleFormat::I16 => build_output_typed::<i16>(&device, &config, samples, finished.clone()),
            SampleFormat::U16 => build_output_typed::<u16>(&device, &config, samples, finished.clone()),
            other => Err(PlaybackError::Output(format!(
                "unsupported output sample format {:?}",
                other
            ))),
        }?;

        stream
            .play()
            .map_err(|e| PlaybackError::Output(format!("failed to start output: {}", e)))?;

        while !finished.load(Ordering::SeqCst) {
            if cancel.is_cancelled() {
                log::info!("Player: playback cancelled");
                return Ok(());
            }
            std::thread::sleep(POLL_INTERVAL);
        }

        std::thread::sleep(TAIL_FLUSH);
        Ok(())
    }
}

fn build_output_typed<T>(
    device: &Device,
    config: &StreamConfig,
    samples: Vec<f32>,
    finished: Arc<AtomicBool>,
) -> Result<Stream, PlaybackError>
where
    T: cpal::SizedSample + cpal::FromSample<f32> + Send + 'static,
{
    let channels = (config.channels as usize).max(1);
    let mut position = 0usize;
    let err_fn = |err| log::error!("Player: output stream error: {}", err);

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                for frame in data.chunks_mut(channels) {
                    let value = samples.get(position).copied().unwrap_or(0.0);
                    position += 1;
                    for out in frame.iter_mut() {
                        *out = T::from_sample(value);
                    }
                }
                if position >= samples.len() {
                    finished.store(true, Ordering::SeqCst);
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| PlaybackError::Output(e.to_string()))
}
