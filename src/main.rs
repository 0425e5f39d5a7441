//! Headless spectrum monitor
//!
//! Usage: `horus-spectrum [JSON options]`, e.g.
//! `horus-spectrum '{"device_id": "input:USB Audio", "sample_rate": 44100}'`.
//! Set `synthetic_tone_hz` to run against a generated tone instead of hardware.

use horus_spectrum::audio::AudioBackend;
use horus_spectrum::consumer::{self, AutoRange, POLL_INTERVAL};
use horus_spectrum::{AudioConfig, CpalBackend, SpectrumPipeline, StatusEvent, ToneBackend};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Deserialize)]
#[serde(default)]
struct MonitorOptions {
    #[serde(flatten)]
    audio: AudioConfig,

    /// How long to monitor before stopping
    duration_secs: u64,

    synthetic_tone_hz: Option<f32>,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            audio: AudioConfig::default(),
            duration_secs: 10,
            synthetic_tone_hz: None,
        }
    }
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut options = match std::env::args().nth(1) {
        Some(json) => serde_json::from_str::<MonitorOptions>(&json)?,
        None => MonitorOptions::default(),
    };

    let backend: Arc<dyn AudioBackend> = match options.synthetic_tone_hz {
        Some(frequency) => {
            options.audio.device_id = "tone".to_string();
            Arc::new(ToneBackend::new(frequency))
        }
        None => Arc::new(CpalBackend::new()),
    };

    let pipeline = SpectrumPipeline::new(backend);
    for source in pipeline.list_sources()? {
        log::info!(
            "Source {} ({}): {:?} Hz",
            source.id,
            source.name,
            source.supported_sample_rates
        );
    }

    pipeline.start(&options.audio)?;
    let queues = pipeline.queues();
    let mut range = AutoRange::default();
    let deadline = Instant::now() + Duration::from_secs(options.duration_secs);

    'poll: while Instant::now() < deadline {
        std::thread::sleep(POLL_INTERVAL);
        let drained = consumer::drain(&queues);

        for frame in &drained.frames {
            range.update(frame);
        }
        if let Some(frame) = drained.latest_frame() {
            if let Some(bin) = frame.peak_bin() {
                let (min, max) = range.range();
                println!(
                    "{:>8.3}s  peak {:>8.1} Hz  {:>7.1} dB  level {:>6.1} dBFS  axis [{:.0}, {:.0}]",
                    frame.window_start.as_secs_f64(),
                    frame.scale[bin],
                    frame.magnitude[bin],
                    frame.peak_dbfs,
                    min,
                    max
                );
            }
        }

        for event in drained.events {
            log::info!("Status: {:?}", event);
            if let StatusEvent::DeviceLost { .. } = event {
                break 'poll;
            }
        }
    }

    pipeline.stop();
    for event in queues.drain_status() {
        log::info!("Status: {:?}", event);
    }
    log::info!("{} frames dropped by the spectrum queue", queues.dropped_frames());

    Ok(())
}
