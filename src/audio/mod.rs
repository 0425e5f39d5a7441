//! Audio capture and analysis module

mod capture;
mod device;
mod fft;
mod sources;
mod stream;
mod synthetic;

pub(crate) use capture::{run_capture_loop, CaptureContext};
pub use device::CpalBackend;
pub use fft::{AnalyzerConfig, SpectralAnalyzer, SpectrumFrame, DB_FLOOR, MAGNITUDE_FLOOR};
pub use sources::{validate_format, AudioSource, DEFAULT_DEVICE_ID, STANDARD_SAMPLE_RATES};
pub use stream::{AudioBackend, BlockChannel, CloseHandle, SampleBlock, SampleSource};
pub use synthetic::ToneBackend;

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};

/// Audio processing configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Device identifier as reported by [`AudioBackend::list_sources`]
    pub device_id: String,

    /// Sample rate in Hz
    pub sample_rate: u32,

    /// Samples per block handed from the device to the analyzer
    pub block_size: usize,

    /// FFT window size
    pub nfft: usize,

    /// Samples between successive spectrum frames
    pub stride: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device_id: DEFAULT_DEVICE_ID.to_string(),
            sample_rate: 48000,
            block_size: 4096,
            nfft: 8192,
            stride: 4096,
        }
    }
}

impl AudioConfig {
    /// Checks the parameters the core is responsible for.
    ///
    /// Device-specific support (rates, buffer sizes) is checked by the
    /// backend when the source is opened.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(PipelineError::InvalidConfig(
                "sample rate must be non-zero".to_string(),
            ));
        }
        if self.block_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "block size must be non-zero".to_string(),
            ));
        }
        self.analyzer_config().validate()
    }

    pub fn analyzer_config(&self) -> AnalyzerConfig {
        AnalyzerConfig {
            nfft: self.nfft,
            stride: self.stride,
            sample_rate: self.sample_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_reference_wiring() {
        let config = AudioConfig::default();

        assert_eq!(config.device_id, "default");
        assert_eq!(config.sample_rate, 48000);
        assert_eq!(config.nfft, 8192);
        assert_eq!(config.stride, 4096);
        assert_eq!(config.block_size, config.stride);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_rate_and_block_size() {
        let zero_rate = AudioConfig {
            sample_rate: 0,
            ..Default::default()
        };
        let zero_block = AudioConfig {
            block_size: 0,
            ..Default::default()
        };

        assert!(matches!(
            zero_rate.validate(),
            Err(PipelineError::InvalidConfig(_))
        ));
        assert!(matches!(
            zero_block.validate(),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn validate_rejects_stride_larger_than_window() {
        let config = AudioConfig {
            nfft: 1024,
            stride: 2048,
            ..Default::default()
        };

        assert!(matches!(
            config.validate(),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let config: AudioConfig =
            serde_json::from_str(r#"{"device_id": "input:USB Audio", "sample_rate": 44100}"#)
                .unwrap();

        assert_eq!(config.device_id, "input:USB Audio");
        assert_eq!(config.sample_rate, 44100);
        assert_eq!(config.nfft, 8192);
        assert_eq!(config.stride, 4096);
    }
}
