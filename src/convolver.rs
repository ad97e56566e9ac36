//! ConvolverFFTW (component C): uniformly-partitioned overlap-save
//! convolution with dual-filter crossfade on IR switch.
//!
//! Grounded on `original_source/pybinsim/convolver.py`'s `ConvolverFFTW`.
//! The frequency-domain delay line (FDL) for each ear holds `K` partitions
//! of `B+1` bins; each `process()` call rolls the FDL right by one
//! partition (§4.C / original `np.roll(FDL, (blockSize+1))`) so slot `0`
//! always holds the most recently transformed input block and partition
//! `i` holds the input from `i` blocks ago, matching up with filter
//! partition `i`.

use std::sync::Arc;

use num_complex::Complex;
use realfft::{ComplexToReal, RealToComplex};

use crate::fft::FftKernel;
use crate::filter_storage::Filter;

/// Number of samples a crossfade spans: exactly one block, per §4.C.
fn crossfade_windows(block_size: usize) -> (Vec<f32>, Vec<f32>) {
    let b = block_size as f32;
    let fade_out: Vec<f32> = (0..block_size)
        .map(|n| {
            let x = (n as f32 / (b - 1.0)) * std::f32::consts::FRAC_PI_2;
            x.cos().powi(2)
        })
        .collect();
    let fade_in: Vec<f32> = fade_out.iter().rev().copied().collect();
    (fade_out, fade_in)
}

/// One ear's persistent convolution state: an FDL of `K` partitions and the
/// 2B-sample overlap-save input buffer feeding it.
struct EarState {
    fdl: Vec<Complex<f32>>,
    input_buffer: Vec<f32>,
}

impl EarState {
    fn new(ir_blocks: usize, bins: usize, block_size: usize) -> Self {
        Self {
            fdl: vec![Complex::new(0.0, 0.0); ir_blocks * bins],
            input_buffer: vec![0.0f32; block_size * 2],
        }
    }

    /// Shifts in a new block at the tail of the 2B time-domain buffer,
    /// transforms it, and rolls it into partition 0 of the FDL — the
    /// overlap-save "shift and append" step plus `transform_filter`, fused.
    fn push_block(&mut self, block: &[f32], kernel: &FftKernel, bins: usize, scratch_in: &mut [f32]) {
        let block_size = block.len();
        self.input_buffer.copy_within(block_size.., 0);
        self.input_buffer[block_size..].copy_from_slice(block);

        scratch_in.copy_from_slice(&self.input_buffer);
        let mut output = vec![Complex::new(0.0, 0.0); bins];
        let mut fft_scratch = kernel.forward().make_scratch_vec();
        kernel
            .forward()
            .process_with_scratch(scratch_in, &mut output, &mut fft_scratch)
            .expect("forward FFT of fixed-size audio block failed");

        self.fdl.copy_within(0..self.fdl.len() - bins, bins);
        self.fdl[..bins].copy_from_slice(&output);
    }

    /// Multiplies the FDL against a filter's transfer function, partition
    /// by partition, accumulating into `acc`.
    fn multiply_and_add(&self, tf: &[Complex<f32>], bins: usize, acc: &mut [Complex<f32>]) {
        let ir_blocks = tf.len() / bins;
        for k in 0..ir_blocks {
            let fdl_part = &self.fdl[k * bins..(k + 1) * bins];
            let tf_part = &tf[k * bins..(k + 1) * bins];
            for i in 0..bins {
                acc[i] += fdl_part[i] * tf_part[i];
            }
        }
    }
}

/// Per-ear, per-filter-generation convolution engine. Holds two filter
/// slots (`current`/`previous`) so a filter switch can crossfade between
/// the old and new impulse response over exactly one block.
pub struct ConvolverFFTW {
    kernel: FftKernel,
    block_size: usize,
    bins: usize,
    ir_blocks: usize,

    left: EarState,
    right: EarState,

    current: Arc<Filter>,
    previous: Option<Arc<Filter>>,
    crossfade_remaining: bool,

    fade_out: Vec<f32>,
    fade_in: Vec<f32>,

    acc_left: Vec<Complex<f32>>,
    acc_right: Vec<Complex<f32>>,
    ifft_scratch: Vec<Complex<f32>>,
    ifft_time: Vec<f32>,
    fft_time_scratch: Vec<f32>,

    out_left: Vec<f32>,
    out_right: Vec<f32>,
}

impl ConvolverFFTW {
    pub fn new(block_size: usize, ir_blocks: usize) -> Self {
        let kernel = FftKernel::new(block_size);
        let bins = kernel.bins();
        let (fade_out, fade_in) = crossfade_windows(block_size);
        let silence = Arc::new(Filter::silence(ir_blocks, bins));

        Self {
            left: EarState::new(ir_blocks, bins, block_size),
            right: EarState::new(ir_blocks, bins, block_size),
            current: silence,
            previous: None,
            crossfade_remaining: false,
            fade_out,
            fade_in,
            acc_left: vec![Complex::new(0.0, 0.0); bins],
            acc_right: vec![Complex::new(0.0, 0.0); bins],
            ifft_scratch: kernel.inverse().make_scratch_vec(),
            ifft_time: kernel.inverse().make_output_vec(),
            fft_time_scratch: vec![0.0f32; block_size * 2],
            out_left: vec![0.0f32; block_size],
            out_right: vec![0.0f32; block_size],
            kernel,
            block_size,
            bins,
            ir_blocks,
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Installs a new impulse response. If `do_crossfade` is set and a
    /// filter is already active, the previous filter keeps contributing,
    /// fading out over the next block while the new one fades in —
    /// matching `setIR(..., callback=True)` in the original.
    pub fn set_ir(&mut self, filter: Arc<Filter>, do_crossfade: bool) {
        assert_eq!(
            filter.ir_blocks, self.ir_blocks,
            "filter partition count must match the convolver it's installed into"
        );
        if do_crossfade {
            self.previous = Some(std::mem::replace(&mut self.current, filter));
            self.crossfade_remaining = true;
        } else {
            self.current = filter;
            self.previous = None;
            self.crossfade_remaining = false;
        }
    }

    /// Convolves one stereo input block against the active filter(s),
    /// writing `block_size` output samples into `out_left`/`out_right`.
    pub fn process(&mut self, input: &[f32], out_left: &mut [f32], out_right: &mut [f32]) {
        debug_assert_eq!(input.len(), self.block_size);
        debug_assert_eq!(out_left.len(), self.block_size);
        debug_assert_eq!(out_right.len(), self.block_size);

        self.left
            .push_block(input, &self.kernel, self.bins, &mut self.fft_time_scratch);
        self.right
            .push_block(input, &self.kernel, self.bins, &mut self.fft_time_scratch);

        self.acc_left.iter_mut().for_each(|c| *c = Complex::new(0.0, 0.0));
        self.acc_right.iter_mut().for_each(|c| *c = Complex::new(0.0, 0.0));

        self.left.multiply_and_add(&self.current.tf_left, self.bins, &mut self.acc_left);
        self.right
            .multiply_and_add(&self.current.tf_right, self.bins, &mut self.acc_right);

        let current_time = self.inverse_transform(&self.acc_left.clone(), &self.acc_right.clone());
        self.out_left.copy_from_slice(&current_time.0);
        self.out_right.copy_from_slice(&current_time.1);

        if let Some(previous) = self.previous.clone() {
            self.acc_left.iter_mut().for_each(|c| *c = Complex::new(0.0, 0.0));
            self.acc_right.iter_mut().for_each(|c| *c = Complex::new(0.0, 0.0));
            self.left.multiply_and_add(&previous.tf_left, self.bins, &mut self.acc_left);
            self.right
                .multiply_and_add(&previous.tf_right, self.bins, &mut self.acc_right);
            let (prev_left, prev_right) =
                self.inverse_transform(&self.acc_left.clone(), &self.acc_right.clone());

            for n in 0..self.block_size {
                self.out_left[n] = self.out_left[n] * self.fade_in[n] + prev_left[n] * self.fade_out[n];
                self.out_right[n] = self.out_right[n] * self.fade_in[n] + prev_right[n] * self.fade_out[n];
            }
            self.previous = None;
            self.crossfade_remaining = false;
        }

        out_left.copy_from_slice(&self.out_left);
        out_right.copy_from_slice(&self.out_right);
    }

    /// Overlap-save: inverse-transform the accumulated spectrum and keep
    /// only the second half of the `2B` time-domain result.
    fn inverse_transform(&self, left: &[Complex<f32>], right: &[Complex<f32>]) -> (Vec<f32>, Vec<f32>) {
        let mut left_time = self.run_ifft(left);
        let mut right_time = self.run_ifft(right);
        left_time.drain(..self.block_size);
        right_time.drain(..self.block_size);
        (left_time, right_time)
    }

    fn run_ifft(&self, spectrum: &[Complex<f32>]) -> Vec<f32> {
        let mut spectrum = spectrum.to_vec();
        let mut output = self.kernel.inverse().make_output_vec();
        let mut scratch = self.kernel.inverse().make_scratch_vec();
        self.kernel
            .inverse()
            .process_with_scratch(&mut spectrum, &mut output, &mut scratch)
            .expect("inverse FFT failed");
        let scale = 1.0 / (self.block_size as f32 * 2.0);
        output.iter_mut().for_each(|s| *s *= scale);
        output
    }

    /// Releases convolver state. A no-op beyond `Drop`, kept so the
    /// lifecycle mirrors `FilterStorage::close`.
    pub fn close(self) {
        drop(self);
    }
}

/// A single-channel, non-crossfading overlap-save convolver used for the
/// optional headphone-equalization stage: one static filter applied
/// independently to one signal (left ear's mix through the left-ear EQ,
/// right ear's mix through the right-ear EQ), with no cross-mixing and
/// no filter switching.
pub struct MonoConvolver {
    kernel: FftKernel,
    block_size: usize,
    bins: usize,
    tf: Vec<Complex<f32>>,
    input_buffer: Vec<f32>,
    fdl: Vec<Complex<f32>>,
}

impl MonoConvolver {
    pub fn new(block_size: usize, tf: Arc<Vec<Complex<f32>>>) -> Self {
        let kernel = FftKernel::new(block_size);
        let bins = kernel.bins();
        Self {
            fdl: vec![Complex::new(0.0, 0.0); tf.len()],
            input_buffer: vec![0.0f32; block_size * 2],
            tf: (*tf).clone(),
            kernel,
            block_size,
            bins,
        }
    }

    pub fn process(&mut self, input: &[f32], out: &mut [f32]) {
        debug_assert_eq!(input.len(), self.block_size);

        self.input_buffer.copy_within(self.block_size.., 0);
        self.input_buffer[self.block_size..].copy_from_slice(input);

        let mut scratch_in = self.input_buffer.clone();
        let mut spectrum = vec![Complex::new(0.0, 0.0); self.bins];
        let mut fft_scratch = self.kernel.forward().make_scratch_vec();
        self.kernel
            .forward()
            .process_with_scratch(&mut scratch_in, &mut spectrum, &mut fft_scratch)
            .expect("forward FFT failed in headphone stage");

        self.fdl.copy_within(0..self.fdl.len() - self.bins, self.bins);
        self.fdl[..self.bins].copy_from_slice(&spectrum);

        let ir_blocks = self.tf.len() / self.bins;
        let mut acc = vec![Complex::new(0.0, 0.0); self.bins];
        for k in 0..ir_blocks {
            let fdl_part = &self.fdl[k * self.bins..(k + 1) * self.bins];
            let tf_part = &self.tf[k * self.bins..(k + 1) * self.bins];
            for i in 0..self.bins {
                acc[i] += fdl_part[i] * tf_part[i];
            }
        }

        let mut output = self.kernel.inverse().make_output_vec();
        let mut ifft_scratch = self.kernel.inverse().make_scratch_vec();
        self.kernel
            .inverse()
            .process_with_scratch(&mut acc, &mut output, &mut ifft_scratch)
            .expect("inverse FFT failed in headphone stage");

        let scale = 1.0 / (self.block_size as f32 * 2.0);
        out.copy_from_slice(&output[self.block_size..]);
        out.iter_mut().for_each(|s| *s *= scale);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn impulse_filter(ir_blocks: usize, bins: usize, block_size: usize, gain_left: f32, gain_right: f32) -> Filter {
        let kernel = FftKernel::new(block_size);
        let mut left_block = vec![0.0f32; block_size];
        left_block[0] = gain_left;
        let mut right_block = vec![0.0f32; block_size];
        right_block[0] = gain_right;

        let mut tf_left = kernel.transform_block(&left_block);
        let mut tf_right = kernel.transform_block(&right_block);
        for _ in 1..ir_blocks {
            tf_left.extend(vec![Complex::new(0.0, 0.0); bins]);
            tf_right.extend(vec![Complex::new(0.0, 0.0); bins]);
        }
        Filter {
            ir_blocks,
            tf_left: Arc::new(tf_left),
            tf_right: Arc::new(tf_right),
        }
    }

    #[test]
    fn unit_impulse_passes_signal_through_unchanged() {
        let block_size = 8;
        let bins = block_size + 1;
        let ir_blocks = 2;
        let mut convolver = ConvolverFFTW::new(block_size, ir_blocks);
        convolver.set_ir(Arc::new(impulse_filter(ir_blocks, bins, block_size, 1.0, 1.0)), false);

        let input = vec![0.1, 0.2, -0.3, 0.4, 0.0, -0.1, 0.2, 0.05];
        let mut out_left = vec![0.0f32; block_size];
        let mut out_right = vec![0.0f32; block_size];

        // first block only shows the tail of the zero-history buffer
        convolver.process(&input, &mut out_left, &mut out_right);
        // second block of silence brings the unit-impulse response through
        convolver.process(&vec![0.0; block_size], &mut out_left, &mut out_right);

        for (a, b) in out_left.iter().zip(input.iter()) {
            assert!((a - b).abs() < 1e-4, "left channel mismatch: {a} vs {b}");
        }
        for (a, b) in out_right.iter().zip(input.iter()) {
            assert!((a - b).abs() < 1e-4, "right channel mismatch: {a} vs {b}");
        }
    }

    #[test]
    fn zero_filter_silences_output() {
        let block_size = 8;
        let bins = block_size + 1;
        let ir_blocks = 1;
        let mut convolver = ConvolverFFTW::new(block_size, ir_blocks);

        let input = vec![1.0; block_size];
        let mut out_left = vec![0.0f32; block_size];
        let mut out_right = vec![0.0f32; block_size];
        convolver.process(&input, &mut out_left, &mut out_right);

        assert!(out_left.iter().all(|s| s.abs() < 1e-6));
        assert!(out_right.iter().all(|s| s.abs() < 1e-6));
    }

    #[test]
    fn crossfade_blends_previous_and_current_filters_over_one_block() {
        let block_size = 16;
        let bins = block_size + 1;
        let ir_blocks = 1;
        let mut convolver = ConvolverFFTW::new(block_size, ir_blocks);
        convolver.set_ir(Arc::new(impulse_filter(ir_blocks, bins, block_size, 1.0, 1.0)), false);

        // prime the buffer so the unit impulse output is stable
        let input = vec![1.0f32; block_size];
        let mut out_left = vec![0.0f32; block_size];
        let mut out_right = vec![0.0f32; block_size];
        convolver.process(&input, &mut out_left, &mut out_right);

        convolver.set_ir(Arc::new(impulse_filter(ir_blocks, bins, block_size, 0.0, 0.0)), true);
        convolver.process(&input, &mut out_left, &mut out_right);

        // first sample of the crossfaded block should be close to the old
        // (gain 1.0) filter's contribution, the last sample close to the
        // new (gain 0.0) filter's contribution.
        assert!(out_left[0] > out_left[block_size - 1]);
    }
}
