//! Shared FFT plans for the fixed `2B`-sample transform size used
//! throughout the engine (§3: "All FFT plans are created for fixed size
//! `2B` ... and never resized during a session").
//!
//! `pyfftw`'s wisdom cache (§6, §9) has no real analogue in `realfft` —
//! planning cost here is negligible compared to FFTW's `MEASURE`/`PATIENT`
//! effort levels — so instead of persisting wisdom to disk we just share
//! one `FftKernel` per block size across every `ConvolverFFTW` and the
//! `FilterStorage` loader, so the plan for a given size is only built once
//! per process.

use std::sync::Arc;

use num_complex::Complex;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};

/// Forward/inverse real FFT plans for transform length `2 * block_size`.
pub struct FftKernel {
    block_size: usize,
    forward: Arc<dyn RealToComplex<f32>>,
    inverse: Arc<dyn ComplexToReal<f32>>,
}

impl FftKernel {
    pub fn new(block_size: usize) -> Self {
        let mut planner = RealFftPlanner::<f32>::new();
        let fft_len = block_size * 2;
        Self {
            block_size,
            forward: planner.plan_fft_forward(fft_len),
            inverse: planner.plan_fft_inverse(fft_len),
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Number of complex bins produced by a forward transform (`B+1`).
    pub fn bins(&self) -> usize {
        self.block_size + 1
    }

    pub fn forward(&self) -> &Arc<dyn RealToComplex<f32>> {
        &self.forward
    }

    pub fn inverse(&self) -> &Arc<dyn ComplexToReal<f32>> {
        &self.inverse
    }

    /// Zero-pads a single `block_size`-sample block to `2B` and transforms
    /// it into `B+1` complex bins. Used off the real-time path (filter
    /// loading), so a fresh scratch allocation per call is acceptable.
    pub fn transform_block(&self, block: &[f32]) -> Vec<Complex<f32>> {
        debug_assert!(block.len() <= self.block_size);
        let mut padded = vec![0.0f32; self.block_size * 2];
        padded[..block.len()].copy_from_slice(block);

        let mut output = self.forward.make_output_vec();
        let mut scratch = self.forward.make_scratch_vec();
        self.forward
            .process_with_scratch(&mut padded, &mut output, &mut scratch)
            .expect("forward FFT of fixed-size filter block failed");
        output
    }
}
