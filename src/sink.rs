//! AudioSink: the boundary between the engine's rendered blocks and an
//! actual output device.
//!
//! Grounded on `soul-audio-desktop`'s `cpal` usage pattern: a lock-free
//! ring buffer handed to the device callback, with the engine's own
//! thread pushing rendered blocks into it rather than rendering inside
//! the device callback itself (the device callback can run at a
//! different block size than the engine's, and must never block).

use crate::error::BinSimError;

/// Receives interleaved stereo blocks rendered by [`crate::engine::
/// Engine`]. `push_block` must not block for long — a sink backed by a
/// real device should buffer internally and drop or underrun rather than
/// stall the render thread.
pub trait AudioSink: Send {
    fn push_block(&mut self, left: &[f32], right: &[f32]);
    fn sample_rate(&self) -> u32;
}

/// A sink that discards everything it's given. Used by tests and by
/// headless/offline runs.
pub struct NullSink {
    sample_rate: u32,
}

impl NullSink {
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }
}

impl AudioSink for NullSink {
    fn push_block(&mut self, _left: &[f32], _right: &[f32]) {}

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

#[cfg(feature = "cpal-sink")]
pub use cpal_backend::CpalSink;

#[cfg(feature = "cpal-sink")]
mod cpal_backend {
    use super::*;
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{SampleFormat, Stream};
    use std::sync::{Arc, Mutex};
    use std::collections::VecDeque;

    /// Bridges the engine's block-at-a-time output to a `cpal` output
    /// stream via a small interleaved ring buffer.
    pub struct CpalSink {
        _stream: Stream,
        queue: Arc<Mutex<VecDeque<f32>>>,
        sample_rate: u32,
    }

    impl CpalSink {
        pub fn open_default(requested_sample_rate: u32) -> Result<Self, BinSimError> {
            let host = cpal::default_host();
            let device = host.default_output_device().ok_or(BinSimError::NoOutputDevice)?;
            let supported = device
                .default_output_config()
                .map_err(|_| BinSimError::NoOutputDevice)?;
            let sample_format = supported.sample_format();
            let config: cpal::StreamConfig = supported.into();
            let sample_rate = config.sample_rate.0;
            if sample_rate != requested_sample_rate {
                tracing::warn!(
                    requested = requested_sample_rate,
                    device = sample_rate,
                    "output device sample rate differs from configured rate"
                );
            }

            let queue = Arc::new(Mutex::new(VecDeque::<f32>::new()));
            let stream_queue = Arc::clone(&queue);
            let channels = config.channels as usize;

            let err_fn = |err| tracing::error!(error = %err, "audio output stream error");

            let stream = match sample_format {
                SampleFormat::F32 => device.build_output_stream(
                    &config,
                    move |data: &mut [f32], _| fill_from_queue(data, channels, &stream_queue),
                    err_fn,
                    None,
                ),
                _ => return Err(BinSimError::NoOutputDevice),
            }
            .map_err(|_| BinSimError::NoOutputDevice)?;

            stream.play().map_err(|_| BinSimError::NoOutputDevice)?;

            Ok(Self {
                _stream: stream,
                queue,
                sample_rate,
            })
        }
    }

    fn fill_from_queue(data: &mut [f32], channels: usize, queue: &Arc<Mutex<VecDeque<f32>>>) {
        let mut queue = queue.lock().unwrap();
        for frame in data.chunks_mut(channels) {
            let left = queue.pop_front().unwrap_or(0.0);
            let right = queue.pop_front().unwrap_or(left);
            frame[0] = left;
            if channels > 1 {
                frame[1] = right;
            }
            for sample in frame.iter_mut().skip(2) {
                *sample = 0.0;
            }
        }
    }

    impl AudioSink for CpalSink {
        fn push_block(&mut self, left: &[f32], right: &[f32]) {
            let mut queue = self.queue.lock().unwrap();
            for (l, r) in left.iter().zip(right.iter()) {
                queue.push_back(*l);
                queue.push_back(*r);
            }
            // Bound the queue so a stalled device doesn't grow it forever.
            let max_len = self.sample_rate as usize * 2;
            while queue.len() > max_len {
                queue.pop_front();
            }
        }

        fn sample_rate(&self) -> u32 {
            self.sample_rate
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_sink_accepts_blocks_without_panicking() {
        let mut sink = NullSink::new(44100);
        sink.push_block(&[0.1, 0.2], &[0.1, 0.2]);
        assert_eq!(sink.sample_rate(), 44100);
    }
}
