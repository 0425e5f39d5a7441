//! Audio source enumeration

use crate::error::{PipelineError, Result};
use cpal::traits::{DeviceTrait, HostTrait};
use serde::{Deserialize, Serialize};

/// Identifier that always resolves to the host's default input device.
pub const DEFAULT_DEVICE_ID: &str = "default";

/// Rates probed against each device's supported ranges.
pub const STANDARD_SAMPLE_RATES: [u32; 10] = [
    8000, 11025, 16000, 22050, 32000, 44100, 48000, 88200, 96000, 192000,
];

/// Audio source information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioSource {
    /// Unique identifier for the source
    pub id: String,

    /// Display name
    pub name: String,

    /// Standard sample rates the device can capture at
    pub supported_sample_rates: Vec<u32>,
}

/// Checks a requested device and rate against an enumeration list.
pub fn validate_format<'a>(
    sources: &'a [AudioSource],
    device_id: &str,
    sample_rate: u32,
) -> Result<&'a AudioSource> {
    let source = sources
        .iter()
        .find(|s| s.id == device_id)
        .ok_or_else(|| PipelineError::DeviceUnavailable(device_id.to_string()))?;

    if !source.supported_sample_rates.contains(&sample_rate) {
        return Err(PipelineError::UnsupportedFormat(format!(
            "{} does not support {} Hz (supported: {:?})",
            source.name, sample_rate, source.supported_sample_rates
        )));
    }

    Ok(source)
}

/// Standard rates falling inside any of the given `(min, max)` ranges.
pub(crate) fn standard_rates_within(ranges: &[(u32, u32)]) -> Vec<u32> {
    STANDARD_SAMPLE_RATES
        .iter()
        .copied()
        .filter(|rate| ranges.iter().any(|(min, max)| rate >= min && rate <= max))
        .collect()
}

fn describe_input(device: &cpal::Device, id: String, name: String) -> AudioSource {
    let ranges: Vec<(u32, u32)> = match device.supported_input_configs() {
        Ok(configs) => configs
            .map(|c| (c.min_sample_rate().0, c.max_sample_rate().0))
            .collect(),
        Err(e) => {
            log::warn!("Failed to query input configs for {}: {}", name, e);
            Vec::new()
        }
    };

    AudioSource {
        id,
        name,
        supported_sample_rates: standard_rates_within(&ranges),
    }
}

/// List available input devices on the default host
pub fn list_sources() -> Result<Vec<AudioSource>> {
    let mut sources = Vec::new();

    let host = cpal::default_host();

    if let Some(device) = host.default_input_device() {
        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        sources.push(describe_input(
            &device,
            DEFAULT_DEVICE_ID.to_string(),
            format!("Default Input ({})", device_name),
        ));
    }

    let devices = host
        .input_devices()
        .map_err(|e| PipelineError::DeviceUnavailable(format!("enumeration failed: {}", e)))?;

    for device in devices {
        if let Ok(name) = device.name() {
            sources.push(describe_input(&device, format!("input:{}", name), name));
        }
    }

    log::debug!("Enumerated {} audio input sources", sources.len());
    Ok(sources)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sources() -> Vec<AudioSource> {
        vec![AudioSource {
            id: "input:USB Audio".to_string(),
            name: "USB Audio".to_string(),
            supported_sample_rates: vec![44100, 48000],
        }]
    }

    #[test]
    fn validate_format_accepts_listed_device_and_rate() {
        let list = sources();
        let source = validate_format(&list, "input:USB Audio", 48000).unwrap();

        assert_eq!(source.name, "USB Audio");
    }

    #[test]
    fn validate_format_rejects_unknown_device() {
        assert_eq!(
            validate_format(&sources(), "input:Missing", 48000),
            Err(PipelineError::DeviceUnavailable("input:Missing".to_string()))
        );
    }

    #[test]
    fn validate_format_rejects_unlisted_rate() {
        assert!(matches!(
            validate_format(&sources(), "input:USB Audio", 96000),
            Err(PipelineError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn standard_rates_within_merges_ranges() {
        let rates = standard_rates_within(&[(8000, 16000), (48000, 48000)]);

        assert_eq!(rates, vec![8000, 11025, 16000, 48000]);
    }

    #[test]
    fn standard_rates_within_empty_ranges_is_empty() {
        assert!(standard_rates_within(&[]).is_empty());
    }
}
