//! Microphone capture using CPAL
//!
//! The capture stream lives on a dedicated audio thread. Each hardware buffer
//! is converted to f32, downmixed, resampled to the session rate, cut into
//! fixed-size frames and handed to the session loop with `try_send`. A full
//! channel drops the frame rather than queueing without bound.
//!
//! ```text
//! Audio Thread (sync)                         Session loop (async)
//! ┌──────────────────────────────┐            ┌─────────────────────┐
//! │ CPAL callback                │            │ Transmitter         │
//! │  ├─ downmix + resample       │──channel──▶│  send_frame()       │
//! │  └─ FrameAssembler (4096)    │ try_send   └─────────────────────┘
//! └──────────────────────────────┘
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc};
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BuildStreamError, Device, Sample, SampleFormat, SampleRate, Stream, StreamConfig};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::encoder::{AudioFrame, FrameAssembler};
use super::resample::{downmix_to_mono, LinearResampler};
use super::AudioError;

/// Target capture format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Session sample rate in Hz (16000)
    pub sample_rate: u32,
    /// Samples per emitted frame (4096)
    pub frame_samples: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            frame_samples: 4096,
        }
    }
}

/// Source of encoded microphone frames.
///
/// `start` must report failure synchronously (permission denied, no device)
/// and `stop` must not return until the device is released; no frame may be
/// produced after `stop` returns.
pub trait MicrophoneCapture: Send {
    fn start(&mut self, capture_id: Uuid, frames: mpsc::Sender<AudioFrame>)
        -> Result<(), AudioError>;
    fn stop(&mut self);
    fn is_capturing(&self) -> bool;
}

/// Converts raw hardware buffers into frames and forwards them
pub struct CapturePipeline {
    channels: usize,
    resampler: LinearResampler,
    assembler: FrameAssembler,
    frames: mpsc::Sender<AudioFrame>,
    frames_sent: u64,
    frames_dropped: u64,
}

impl CapturePipeline {
    pub fn new(
        capture_id: Uuid,
        device_rate: u32,
        channels: usize,
        config: CaptureConfig,
        frames: mpsc::Sender<AudioFrame>,
    ) -> Self {
        Self {
            channels: channels.max(1),
            resampler: LinearResampler::new(device_rate, config.sample_rate),
            assembler: FrameAssembler::new(capture_id, config.frame_samples),
            frames,
            frames_sent: 0,
            frames_dropped: 0,
        }
    }

    /// Process one interleaved hardware buffer
    pub fn process(&mut self, interleaved: &[f32]) {
        let mono = downmix_to_mono(interleaved, self.channels);
        let resampled = self.resampler.process(&mono);

        for frame in self.assembler.push(&resampled) {
            match self.frames.try_send(frame) {
                Ok(()) => self.frames_sent += 1,
                Err(mpsc::error::TrySendError::Full(frame)) => {
                    self.frames_dropped += 1;
                    if self.frames_dropped % 10 == 1 {
                        log::debug!(
                            "Capture: frame channel full, dropped frame {} ({} dropped total)",
                            frame.sequence,
                            self.frames_dropped
                        );
                    }
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    self.frames_dropped += 1;
                }
            }
        }
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped
    }
}

/// Running capture: the audio thread plus its stop signal
struct ActiveCapture {
    capture_id: Uuid,
    is_capturing: Arc<AtomicBool>,
    stop_tx: std_mpsc::Sender<()>,
    thread: JoinHandle<()>,
}

/// Microphone capture from the default input device
pub struct CpalMicrophone {
    config: CaptureConfig,
    active: Option<ActiveCapture>,
}

impl CpalMicrophone {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            active: None,
        }
    }
}

impl MicrophoneCapture for CpalMicrophone {
    fn start(
        &mut self,
        capture_id: Uuid,
        frames: mpsc::Sender<AudioFrame>,
    ) -> Result<(), AudioError> {
        if self.active.is_some() {
            log::warn!("Capture: start requested while already capturing, restarting");
            self.stop();
        }

        let is_capturing = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), AudioError>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let config = self.config;
        let flag = is_capturing.clone();

        let thread = std::thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || {
                let stream = match open_input_stream(capture_id, config, frames, flag) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::StreamCreationFailed(format!(
                        "Failed to start stream: {}",
                        e
                    ))));
                    return;
                }

                let _ = ready_tx.send(Ok(()));

                // Park until stop() (or the handle is dropped)
                let _ = stop_rx.recv();
                let _ = stream.pause();
                drop(stream);
                log::debug!("Capture: audio thread released device for {}", capture_id);
            })
            .map_err(|e| AudioError::StreamCreationFailed(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                log::info!("Capture: started {}", capture_id);
                self.active = Some(ActiveCapture {
                    capture_id,
                    is_capturing,
                    stop_tx,
                    thread,
                });
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(AudioError::StreamCreationFailed(
                    "Audio thread exited before reporting status".to_string(),
                ))
            }
        }
    }

    fn stop(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };

        active.is_capturing.store(false, Ordering::SeqCst);
        let _ = active.stop_tx.send(());
        if active.thread.join().is_err() {
            log::error!("Capture: audio thread panicked for {}", active.capture_id);
        }
        log::info!("Capture: stopped {}", active.capture_id);
    }

    fn is_capturing(&self) -> bool {
        self.active.is_some()
    }
}

impl Drop for CpalMicrophone {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Pick the input device and format, preferring a native mono config at the session rate
fn select_input(config: CaptureConfig) -> Result<(Device, StreamConfig, SampleFormat), AudioError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or(AudioError::NoInputDevice)?;

    log::info!("Capture: using input device {:?}", device.name());

    let native = device.supported_input_configs().ok().and_then(|mut ranges| {
        ranges.find(|r| {
            r.channels() == 1
                && r.min_sample_rate().0 <= config.sample_rate
                && r.max_sample_rate().0 >= config.sample_rate
        })
    });

    let supported = match native {
        Some(range) => range.with_sample_rate(SampleRate(config.sample_rate)),
        None => device
            .default_input_config()
            .map_err(|_| AudioError::NoSupportedConfig)?,
    };

    log::info!(
        "Capture: device config {} Hz, {} channels, {:?} (target {} Hz mono)",
        supported.sample_rate().0,
        supported.channels(),
        supported.sample_format(),
        config.sample_rate
    );

    let sample_format = supported.sample_format();
    Ok((device, supported.into(), sample_format))
}

fn open_input_stream(
    capture_id: Uuid,
    config: CaptureConfig,
    frames: mpsc::Sender<AudioFrame>,
    is_capturing: Arc<AtomicBool>,
) -> Result<Stream, AudioError> {
    let (device, stream_config, sample_format) = select_input(config)?;
    let pipeline = CapturePipeline::new(
        capture_id,
        stream_config.sample_rate.0,
        stream_config.channels as usize,
        config,
        frames,
    );

    match sample_format {
        SampleFormat::I16 => build_stream_typed::<i16>(&device, &stream_config, pipeline, is_capturing),
        SampleFormat::U16 => build_stream_typed::<u16>(&device, &stream_config, pipeline, is_capturing),
        SampleFormat::F32 => build_stream_typed::<f32>(&device, &stream_config, pipeline, is_capturing),
        _ => Err(AudioError::NoSupportedConfig),
    }
}

fn build_stream_typed<T>(
    device: &Device,
    config: &StreamConfig,
    mut pipeline: CapturePipeline,
    is_capturing: Arc<AtomicBool>,
) -> Result<Stream, AudioError>
where
    T: cpal::SizedSample + Send + 'static,
    f32: cpal::FromSample<T>,
{
    let err_fn = |err| log::error!("Capture: audio stream error: {}", err);

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                if !is_capturing.load(Ordering::SeqCst) {
                    return;
                }
                let samples: Vec<f32> = data.iter().map(|&s| f32::from_sample(s)).collect();
                pipeline.process(&samples);
            },
            err_fn,
            None,
        )
        .map_err(|e| match e {
            BuildStreamError::DeviceNotAvailable => AudioError::DeviceUnavailable,
            other => AudioError::StreamCreationFailed(other.to_string()),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::encoder::decode_pcm16;

    #[test]
    fn test_capture_config_default() {
        let config = CaptureConfig::default();
        assert_eq!(config.sample_rate, 16000);
        assert_eq!(config.frame_samples, 4096);
    }

    #[tokio::test]
    async fn test_pipeline_three_buffers_three_frames() {
        let (tx, mut rx) = mpsc::channel(8);
        let id = Uuid::new_v4();
        let mut pipeline = CapturePipeline::new(id, 16000, 1, CaptureConfig::default(), tx);

        for level in [0.1f32, -0.2, 0.3] {
            pipeline.process(&vec![level; 4096]);
        }
        assert_eq!(pipeline.frames_sent(), 3);

        for expected_seq in 0..3u64 {
            let frame = rx.recv().await.unwrap();
            assert_eq!(frame.capture_id, id);
            assert_eq!(frame.sequence, expected_seq);
            assert_eq!(frame.pcm.len(), 8192);
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_pipeline_downmixes_stereo() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut pipeline =
            CapturePipeline::new(Uuid::new_v4(), 16000, 2, CaptureConfig::default(), tx);

        // 4096 stereo frames of (1.0, 0.0) -> 4096 mono samples of 0.5
        let interleaved: Vec<f32> = (0..8192).map(|i| if i % 2 == 0 { 1.0 } else { 0.0 }).collect();
        pipeline.process(&interleaved);

        let frame = rx.recv().await.unwrap();
        let samples = decode_pcm16(&frame.pcm);
        assert_eq!(samples.len(), 4096);
        assert!(samples.iter().all(|&s| s == 16384));
    }

    #[test]
    fn test_pipeline_drops_when_channel_full() {
        let (tx, _rx) = mpsc::channel(1);
        let mut pipeline =
            CapturePipeline::new(Uuid::new_v4(), 16000, 1, CaptureConfig::default(), tx);

        pipeline.process(&vec![0.0; 4096 * 3]);
        assert_eq!(pipeline.frames_sent(), 1);
        assert_eq!(pipeline.frames_dropped(), 2);
    }
}
