//! Channel downmix and sample-rate conversion for the capture path
//!
//! Capture devices rarely run at 16kHz mono natively, so each hardware buffer
//! is downmixed and linearly resampled before framing. The resampler keeps its
//! phase and last sample across buffers so consecutive callbacks join without
//! clicks.

/// Average interleaved frames down to a single channel
pub fn downmix_to_mono(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }

    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Streaming linear-interpolation resampler
#[derive(Debug, Clone)]
pub struct LinearResampler {
    source_rate: u32,
    target_rate: u32,
    /// Source-rate step per output sample
    step: f64,
    /// Position of the next output sample, relative to `last`
    position: f64,
    /// Final sample of the previous buffer (index -1 of the next one)
    last: Option<f32>,
}

impl LinearResampler {
    /// Create a resampler. Zero rates are treated as passthrough.
    pub fn new(source_rate: u32, target_rate: u32) -> Self {
        if source_rate == 0 || target_rate == 0 {
            log::warn!(
                "Invalid sample rate (source: {}, target: {}), resampler will pass through",
                source_rate,
                target_rate
            );
        }
        let step = if source_rate == 0 || target_rate == 0 {
            1.0
        } else {
            source_rate as f64 / target_rate as f64
        };

        Self {
            source_rate,
            target_rate,
            step,
            position: 0.0,
            last: None,
        }
    }

    /// True if no conversion is performed
    pub fn is_passthrough(&self) -> bool {
        self.source_rate == self.target_rate || self.source_rate == 0 || self.target_rate == 0
    }

    /// Resample one buffer, carrying state into the next call
    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        if self.is_passthrough() || input.is_empty() {
            return input.to_vec();
        }

        // Logical stream: [last, input[0], input[1], ...] where `last` sits at
        // index 0 once the first buffer has been seen.
        let (offset, prev) = match self.last {
            Some(last) => (1usize, last),
            None => (0usize, input[0]),
        };
        let sample_at = |idx: usize| -> f32 {
            if idx < offset {
                prev
            } else {
                input[idx - offset]
            }
        };
        let stream_len = input.len() + offset;

        let capacity = ((input.len() as f64) / self.step).ceil() as usize + 1;
        let mut output = Vec::with_capacity(capacity);

        while self.position + 1.0 < stream_len as f64 {
            let left_idx = self.position.floor() as usize;
            let frac = (self.position - left_idx as f64) as f32;
            let left = sample_at(left_idx);
            let right = sample_at(left_idx + 1);
            output.push(left + (right - left) * frac);
            self.position += self.step;
        }

        // Rebase so the final input sample becomes index 0 of the next call
        self.position -= (stream_len - 1) as f64;
        self.last = input.last().copied();

        output
    }

    /// Forget stream state (used between recordings)
    pub fn reset(&mut self) {
        self.position = 0.0;
        self.last = None;
    }
}
