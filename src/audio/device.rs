//! Hardware sample source backed by cpal

use super::sources::{self, DEFAULT_DEVICE_ID, STANDARD_SAMPLE_RATES};
use super::stream::{AudioBackend, BlockChannel, CloseHandle, SampleBlock, SampleSource};
use super::AudioSource;
use crate::error::{PipelineError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    BufferSize, BuildStreamError, Device, SampleFormat, SampleRate, StreamConfig,
    SupportedBufferSize, SupportedStreamConfigRange,
};
use std::sync::Arc;

/// Captures from input devices of the default cpal host.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalBackend;

impl CpalBackend {
    pub fn new() -> Self {
        Self
    }
}

impl AudioBackend for CpalBackend {
    fn list_sources(&self) -> Result<Vec<AudioSource>> {
        sources::list_sources()
    }

    fn open(
        &self,
        device_id: &str,
        sample_rate: u32,
        block_size: usize,
    ) -> Result<Box<dyn SampleSource>> {
        check_request(sample_rate, block_size)?;

        let host = cpal::default_host();
        let device = find_input_device(&host, device_id)?;
        let device_name = device.name().unwrap_or_else(|_| device_id.to_string());

        let configs: Vec<SupportedStreamConfigRange> = device
            .supported_input_configs()
            .map_err(|e| PipelineError::DeviceUnavailable(format!("{}: {}", device_name, e)))?
            .collect();

        let range = select_config(configs, sample_rate).ok_or_else(|| {
            PipelineError::UnsupportedFormat(format!(
                "{} has no f32/i16/u16 input at {} Hz",
                device_name, sample_rate
            ))
        })?;

        let buffer_size = match range.buffer_size() {
            SupportedBufferSize::Range { min, max } => {
                let frames = u32::try_from(block_size).unwrap_or(u32::MAX);
                if frames < *min || frames > *max {
                    return Err(PipelineError::UnsupportedFormat(format!(
                        "{} supports buffers of {}..={} frames, requested {}",
                        device_name, min, max, block_size
                    )));
                }
                BufferSize::Fixed(frames)
            }
            SupportedBufferSize::Unknown => BufferSize::Default,
        };

        let supported = range.with_sample_rate(SampleRate(sample_rate));
        let sample_format = supported.sample_format();
        let mut config: StreamConfig = supported.config();
        config.buffer_size = buffer_size;
        let channels = config.channels as usize;

        log::info!(
            "Opening {}: {} Hz, {} channels, {:?}, blocks of {}",
            device_name,
            sample_rate,
            channels,
            sample_format,
            block_size
        );

        let channel = BlockChannel::new(sample_rate, block_size);

        let stream = match sample_format {
            SampleFormat::F32 => build_stream::<f32>(&device, &config, channel.clone(), channels),
            SampleFormat::I16 => build_stream::<i16>(&device, &config, channel.clone(), channels),
            SampleFormat::U16 => build_stream::<u16>(&device, &config, channel.clone(), channels),
            other => {
                return Err(PipelineError::UnsupportedFormat(format!(
                    "sample format {:?}",
                    other
                )))
            }
        }
        .map_err(|e| match e {
            BuildStreamError::StreamConfigNotSupported => PipelineError::UnsupportedFormat(
                format!("{} rejected {} Hz / {} frames", device_name, sample_rate, block_size),
            ),
            other => PipelineError::DeviceUnavailable(format!("{}: {}", device_name, other)),
        })?;

        stream
            .play()
            .map_err(|e| PipelineError::DeviceUnavailable(format!("{}: {}", device_name, e)))?;

        Ok(Box::new(CpalSource { stream, channel }))
    }
}

/// A running cpal input stream. Not `Send`: it lives on the capture thread.
struct CpalSource {
    stream: cpal::Stream,
    channel: Arc<BlockChannel>,
}

impl SampleSource for CpalSource {
    fn sample_rate(&self) -> u32 {
        self.channel.sample_rate()
    }

    fn block_size(&self) -> usize {
        self.channel.block_size()
    }

    fn read_blocking(&mut self) -> Result<SampleBlock> {
        self.channel.read_blocking()
    }

    fn close_handle(&self) -> CloseHandle {
        CloseHandle::new(self.channel.clone())
    }

    fn close(&mut self) {
        self.channel.close();
        if let Err(e) = self.stream.pause() {
            log::debug!("Pausing input stream on close failed: {}", e);
        }
    }
}

/// Rejects requests no enumerated source can satisfy, before touching the host.
///
/// Enumeration only ever advertises standard rates, so anything else is
/// refused even if a device range happens to cover it.
fn check_request(sample_rate: u32, block_size: usize) -> Result<()> {
    if block_size == 0 {
        return Err(PipelineError::UnsupportedFormat(
            "block size must be non-zero".to_string(),
        ));
    }
    if !STANDARD_SAMPLE_RATES.contains(&sample_rate) {
        return Err(PipelineError::UnsupportedFormat(format!(
            "{} Hz is not a standard sample rate",
            sample_rate
        )));
    }
    Ok(())
}

fn find_input_device(host: &cpal::Host, device_id: &str) -> Result<Device> {
    if device_id == DEFAULT_DEVICE_ID {
        return host
            .default_input_device()
            .ok_or_else(|| PipelineError::DeviceUnavailable("no default input device".to_string()));
    }

    let device_name = device_id.strip_prefix("input:").ok_or_else(|| {
        PipelineError::DeviceUnavailable(format!("unrecognised device id: {}", device_id))
    })?;

    host.input_devices()
        .map_err(|e| PipelineError::DeviceUnavailable(e.to_string()))?
        .find(|d| d.name().map(|n| n == device_name).unwrap_or(false))
        .ok_or_else(|| PipelineError::DeviceUnavailable(device_id.to_string()))
}

/// Picks the range covering `sample_rate` with the fewest channels,
/// preferring f32 samples.
fn select_config(
    configs: Vec<SupportedStreamConfigRange>,
    sample_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    configs
        .into_iter()
        .filter(|c| c.min_sample_rate().0 <= sample_rate && sample_rate <= c.max_sample_rate().0)
        .filter_map(|c| {
            let rank = match c.sample_format() {
                SampleFormat::F32 => 0,
                SampleFormat::I16 => 1,
                SampleFormat::U16 => 2,
                _ => return None,
            };
            Some((c.channels(), rank, c))
        })
        .min_by_key(|(channels, rank, _)| (*channels, *rank))
        .map(|(_, _, c)| c)
}

/// Build audio stream for given sample type
fn build_stream<T: cpal::Sample + cpal::SizedSample>(
    device: &Device,
    config: &StreamConfig,
    channel: Arc<BlockChannel>,
    channels: usize,
) -> std::result::Result<cpal::Stream, BuildStreamError>
where
    f32: cpal::FromSample<T>,
{
    let error_channel = channel.clone();
    let channels = channels.max(1);

    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let mono: Vec<f32> = data
                .chunks(channels)
                .map(|frame| {
                    let sum: f32 = frame
                        .iter()
                        .map(|s| -> f32 { cpal::Sample::from_sample(*s) })
                        .sum();
                    sum / channels as f32
                })
                .collect();

            channel.push_samples(&mono);
        },
        move |err| {
            log::error!("Audio stream error: {}", err);
            error_channel.fail(err.to_string());
        },
        None,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(channels: u16, min: u32, max: u32, format: SampleFormat) -> SupportedStreamConfigRange {
        SupportedStreamConfigRange::new(
            channels,
            SampleRate(min),
            SampleRate(max),
            SupportedBufferSize::Unknown,
            format,
        )
    }

    #[test]
    fn select_config_prefers_mono_float() {
        let configs = vec![
            range(2, 8000, 96000, SampleFormat::F32),
            range(1, 8000, 96000, SampleFormat::I16),
            range(1, 8000, 96000, SampleFormat::F32),
        ];

        let chosen = select_config(configs, 48000).unwrap();

        assert_eq!(chosen.channels(), 1);
        assert_eq!(chosen.sample_format(), SampleFormat::F32);
    }

    #[test]
    fn select_config_never_substitutes_rate() {
        let configs = vec![range(1, 44100, 44100, SampleFormat::F32)];

        assert!(select_config(configs, 48000).is_none());
    }

    #[test]
    fn select_config_skips_unhandled_formats() {
        let configs = vec![range(1, 8000, 48000, SampleFormat::I32)];

        assert!(select_config(configs, 48000).is_none());
    }

    #[test]
    fn open_rejects_zero_block_size_without_touching_host() {
        let result = CpalBackend::new().open(DEFAULT_DEVICE_ID, 48000, 0);

        assert!(matches!(result, Err(PipelineError::UnsupportedFormat(_))));
    }

    #[test]
    fn open_rejects_rates_enumeration_never_lists() {
        let result = CpalBackend::new().open(DEFAULT_DEVICE_ID, 12345, 256);

        assert!(matches!(result, Err(PipelineError::UnsupportedFormat(_))));
    }

    #[test]
    fn standard_rates_pass_request_check() {
        for rate in STANDARD_SAMPLE_RATES {
            assert_eq!(check_request(rate, 4096), Ok(()));
        }
        assert!(check_request(44100, 0).is_err());
    }
}
