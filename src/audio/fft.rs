//! Streaming spectral analysis
//!
//! Samples are written into a ring buffer of `nfft` samples. Once the window
//! is full, one spectrum is computed every `stride` samples: the most recent
//! `nfft` samples are Hann windowed, transformed, and the positive-frequency
//! half is converted to dB.

use super::stream::SampleBlock;
use crate::error::{PipelineError, Result};
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Smallest linear magnitude converted to dB; anything below reads as [`DB_FLOOR`].
pub const MAGNITUDE_FLOOR: f32 = 1e-10;

/// dB value of [`MAGNITUDE_FLOOR`].
pub const DB_FLOOR: f32 = -200.0;

/// Fixed analyzer parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    /// FFT window size
    pub nfft: usize,

    /// Samples between successive frames (overlap is `nfft - stride`)
    pub stride: usize,

    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl AnalyzerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.nfft < 2 || self.nfft % 2 != 0 {
            return Err(PipelineError::InvalidConfig(format!(
                "nfft must be an even number >= 2, got {}",
                self.nfft
            )));
        }
        if self.stride == 0 || self.stride > self.nfft {
            return Err(PipelineError::InvalidConfig(format!(
                "stride must be in 1..={}, got {}",
                self.nfft, self.stride
            )));
        }
        if self.sample_rate == 0 {
            return Err(PipelineError::InvalidConfig(
                "sample rate must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Number of bins kept per frame.
    pub fn bins(&self) -> usize {
        self.nfft / 2
    }

    /// Frequency of bin `k` in Hz.
    pub fn bin_frequency(&self, k: usize) -> f32 {
        (k as f64 * self.sample_rate as f64 / self.nfft as f64) as f32
    }

    /// Frames emitted after `total_samples` samples have been pushed.
    pub fn frame_count_for(&self, total_samples: usize) -> usize {
        if total_samples < self.nfft {
            0
        } else {
            (total_samples - self.nfft) / self.stride + 1
        }
    }
}

/// One power spectrum and its frequency axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectrumFrame {
    /// Bin centre frequencies in Hz (`k * sample_rate / nfft`)
    pub scale: Vec<f32>,

    /// Power per bin in dB, never below [`DB_FLOOR`]
    pub magnitude: Vec<f32>,

    /// Offset of the window's first sample from the start of the run
    pub window_start: Duration,

    /// Time-domain peak level of the window in dBFS
    pub peak_dbfs: f32,
}

impl SpectrumFrame {
    pub fn len(&self) -> usize {
        self.magnitude.len()
    }

    pub fn is_empty(&self) -> bool {
        self.magnitude.is_empty()
    }

    /// Index of the strongest bin.
    pub fn peak_bin(&self) -> Option<usize> {
        self.magnitude
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
    }

    /// Largest magnitude in the frame.
    pub fn max_magnitude(&self) -> Option<f32> {
        self.peak_bin().map(|i| self.magnitude[i])
    }
}

fn to_db(magnitude: f32) -> f32 {
    // Also catches NaN.
    if !(magnitude > MAGNITUDE_FLOOR) {
        return DB_FLOOR;
    }
    20.0 * magnitude.log10()
}

fn hann_window(n: usize) -> Vec<f32> {
    let n_minus_1 = (n - 1) as f32;
    (0..n)
        .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / n_minus_1).cos()))
        .collect()
}

/// Turns a stream of sample blocks into overlapping spectrum frames.
///
/// Single-threaded by construction: it is only ever driven by the capture
/// loop right after a block arrives.
pub struct SpectralAnalyzer {
    config: AnalyzerConfig,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    /// Coherent gain of the window, so a full-scale sine reads about 0 dB
    window_gain: f32,
    scale: Vec<f32>,

    ring: Vec<f32>,
    write_pos: usize,
    /// Samples still needed before the next frame is due
    until_next: usize,
    samples_seen: u64,

    buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl SpectralAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Result<Self> {
        config.validate()?;

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(config.nfft);
        let scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];

        let window = hann_window(config.nfft);
        let window_gain = (window.iter().sum::<f32>() / 2.0).max(MAGNITUDE_FLOOR);
        let scale = (0..config.bins()).map(|k| config.bin_frequency(k)).collect();

        log::debug!(
            "Spectral analyzer: nfft={} stride={} fs={} Hz",
            config.nfft,
            config.stride,
            config.sample_rate
        );

        Ok(Self {
            config,
            fft,
            window,
            window_gain,
            scale,
            ring: vec![0.0; config.nfft],
            write_pos: 0,
            until_next: config.nfft,
            samples_seen: 0,
            buffer: vec![Complex::new(0.0, 0.0); config.nfft],
            scratch,
        })
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Total samples consumed since construction or the last reset.
    pub fn samples_seen(&self) -> u64 {
        self.samples_seen
    }

    /// Consumes a block, returning every frame that became due.
    pub fn push(&mut self, block: SampleBlock) -> Vec<SpectrumFrame> {
        if block.sample_rate != self.config.sample_rate {
            log::warn!(
                "Block captured at {} Hz fed to analyzer configured for {} Hz",
                block.sample_rate,
                self.config.sample_rate
            );
        }
        self.push_samples(&block.samples)
    }

    pub fn push_samples(&mut self, samples: &[f32]) -> Vec<SpectrumFrame> {
        let mut frames = Vec::new();
        let mut remaining = samples;

        while !remaining.is_empty() {
            let take = self.until_next.min(remaining.len());
            self.write(&remaining[..take]);
            remaining = &remaining[take..];
            self.until_next -= take;

            if self.until_next == 0 {
                frames.push(self.compute_frame());
                self.until_next = self.config.stride;
            }
        }

        frames
    }

    /// Drops buffered samples, including any partial window.
    pub fn reset(&mut self) {
        self.ring.iter_mut().for_each(|s| *s = 0.0);
        self.write_pos = 0;
        self.until_next = self.config.nfft;
        self.samples_seen = 0;
    }

    fn write(&mut self, samples: &[f32]) {
        let nfft = self.config.nfft;
        for &sample in samples {
            self.ring[self.write_pos] = sample;
            self.write_pos = (self.write_pos + 1) % nfft;
        }
        self.samples_seen += samples.len() as u64;
    }

    fn compute_frame(&mut self) -> SpectrumFrame {
        let nfft = self.config.nfft;

        // The ring is full here, so the oldest sample sits at write_pos.
        let mut peak = 0.0_f32;
        for i in 0..nfft {
            let sample = self.ring[(self.write_pos + i) % nfft];
            peak = peak.max(sample.abs());
            self.buffer[i] = Complex::new(sample * self.window[i], 0.0);
        }

        self.fft.process_with_scratch(&mut self.buffer, &mut self.scratch);

        let magnitude = self.buffer[..self.config.bins()]
            .iter()
            .map(|c| to_db(c.norm() / self.window_gain))
            .collect();

        let start_sample = self.samples_seen - nfft as u64;
        let window_start =
            Duration::from_secs_f64(start_sample as f64 / self.config.sample_rate as f64);

        SpectrumFrame {
            scale: self.scale.clone(),
            magnitude,
            window_start,
            peak_dbfs: to_db(peak),
        }
    }
}
