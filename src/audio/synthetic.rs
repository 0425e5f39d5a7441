//! Synthetic sine-tone backend for running the pipeline without hardware

use super::sources::validate_format;
use super::stream::{AudioBackend, BlockChannel, CloseHandle, SampleBlock, SampleSource};
use super::AudioSource;
use crate::error::{PipelineError, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Generates a sine tone, paced at the block rate of a real device.
#[derive(Debug)]
pub struct ToneBackend {
    sources: Vec<AudioSource>,
    frequency: f32,
    amplitude: f32,
    fail_after: Option<usize>,
    opened: AtomicUsize,
}

impl ToneBackend {
    /// A backend with a single `tone` device supporting the standard rates.
    pub fn new(frequency: f32) -> Self {
        Self::with_sources(
            frequency,
            vec![AudioSource {
                id: "tone".to_string(),
                name: format!("Test Tone ({} Hz)", frequency),
                supported_sample_rates: super::STANDARD_SAMPLE_RATES.to_vec(),
            }],
        )
    }

    pub fn with_sources(frequency: f32, sources: Vec<AudioSource>) -> Self {
        Self {
            sources,
            frequency,
            amplitude: 0.5,
            fail_after: None,
            opened: AtomicUsize::new(0),
        }
    }

    pub fn amplitude(mut self, amplitude: f32) -> Self {
        self.amplitude = amplitude;
        self
    }

    /// Simulates the device disappearing after `blocks` reads.
    pub fn fail_after(mut self, blocks: usize) -> Self {
        self.fail_after = Some(blocks);
        self
    }

    /// Number of sources successfully opened so far.
    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl AudioBackend for ToneBackend {
    fn list_sources(&self) -> Result<Vec<AudioSource>> {
        Ok(self.sources.clone())
    }

    fn open(
        &self,
        device_id: &str,
        sample_rate: u32,
        block_size: usize,
    ) -> Result<Box<dyn SampleSource>> {
        validate_format(&self.sources, device_id, sample_rate)?;
        if block_size == 0 {
            return Err(PipelineError::UnsupportedFormat(
                "block size must be non-zero".to_string(),
            ));
        }

        self.opened.fetch_add(1, Ordering::SeqCst);
        log::debug!("Opened synthetic source {} at {} Hz", device_id, sample_rate);

        Ok(Box::new(ToneSource {
            channel: BlockChannel::new(sample_rate, block_size),
            block_period: Duration::from_secs_f64(block_size as f64 / sample_rate as f64),
            phase: 0.0,
            phase_step: 2.0 * std::f64::consts::PI * self.frequency as f64 / sample_rate as f64,
            amplitude: self.amplitude,
            remaining: self.fail_after,
        }))
    }
}

struct ToneSource {
    channel: Arc<BlockChannel>,
    block_period: Duration,
    phase: f64,
    phase_step: f64,
    amplitude: f32,
    remaining: Option<usize>,
}

impl SampleSource for ToneSource {
    fn sample_rate(&self) -> u32 {
        self.channel.sample_rate()
    }

    fn block_size(&self) -> usize {
        self.channel.block_size()
    }

    fn read_blocking(&mut self) -> Result<SampleBlock> {
        if self.channel.wait_closed(self.block_period) {
            return Err(PipelineError::StreamClosed);
        }

        if let Some(remaining) = self.remaining.as_mut() {
            if *remaining == 0 {
                return Err(PipelineError::Stream("synthetic device removed".to_string()));
            }
            *remaining -= 1;
        }

        let samples = (0..self.channel.block_size())
            .map(|_| {
                let sample = self.amplitude * self.phase.sin() as f32;
                self.phase = (self.phase + self.phase_step) % std::f64::consts::TAU;
                sample
            })
            .collect();

        Ok(SampleBlock::new(samples, self.channel.sample_rate()))
    }

    fn close_handle(&self) -> CloseHandle {
        CloseHandle::new(self.channel.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn open_validates_against_enumeration() {
        let backend = ToneBackend::new(1000.0);

        assert!(matches!(
            backend.open("missing", 48000, 256),
            Err(PipelineError::DeviceUnavailable(_))
        ));
        assert!(matches!(
            backend.open("tone", 12345, 256),
            Err(PipelineError::UnsupportedFormat(_))
        ));
        assert_eq!(backend.open_count(), 0);
    }

    #[test]
    fn reads_paced_blocks_of_requested_size() {
        let backend = ToneBackend::new(1000.0);
        let mut source = backend.open("tone", 8000, 80).unwrap();

        let started = Instant::now();
        let block = source.read_blocking().unwrap();

        assert_eq!(block.len(), 80);
        assert_eq!(block.sample_rate, 8000);
        assert!(started.elapsed() >= Duration::from_millis(9));
        assert!(block.samples.iter().all(|s| s.abs() <= 0.5 + 1e-6));
        assert_eq!(backend.open_count(), 1);
    }

    #[test]
    fn fail_after_reports_stream_error() {
        let backend = ToneBackend::new(1000.0).fail_after(1);
        let mut source = backend.open("tone", 8000, 8).unwrap();

        assert!(source.read_blocking().is_ok());
        assert!(matches!(
            source.read_blocking(),
            Err(PipelineError::Stream(_))
        ));
    }

    #[test]
    fn close_handle_interrupts_pending_read() {
        let backend = ToneBackend::new(1000.0);
        // One block lasts ten seconds at this rate.
        let mut source = backend.open("tone", 8000, 80_000).unwrap();
        let handle = source.close_handle();

        let closer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            handle.close();
        });

        let started = Instant::now();
        assert_eq!(source.read_blocking(), Err(PipelineError::StreamClosed));
        assert!(started.elapsed() < Duration::from_secs(2));
        closer.join().unwrap();
    }
}
