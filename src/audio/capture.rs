//! Capture loop run on the dedicated audio thread
//!
//! The thread owns the sample source and the analyzer for the whole run:
//! it blocks in the device read, analyzes the block, and enqueues the
//! resulting frames without ever waiting on the consumer.

use super::stream::{AudioBackend, CloseHandle};
use super::{AudioConfig, SpectralAnalyzer};
use crate::error::{PipelineError, Result};
use crate::queue::{DeliveryQueues, StatusEvent};
use crate::state::{PipelineState, StateCell};
use std::sync::mpsc::SyncSender;
use std::sync::Arc;
use std::thread;

/// Everything the capture thread needs, moved onto it at spawn.
pub(crate) struct CaptureContext {
    pub backend: Arc<dyn AudioBackend>,
    pub config: AudioConfig,
    pub queues: Arc<DeliveryQueues>,
    pub state: Arc<StateCell>,
}

/// Marks the pipeline stopped when the thread exits, panics included.
struct StoppedOnExit {
    state: Arc<StateCell>,
    queues: Arc<DeliveryQueues>,
}

impl Drop for StoppedOnExit {
    fn drop(&mut self) {
        if thread::panicking() {
            log::error!("Audio capture thread panicked");
            self.queues.push_status(StatusEvent::DeviceLost {
                reason: "capture thread panicked".to_string(),
            });
        }
        self.state.finish();
    }
}

/// Decides how a finished run is reported.
///
/// A run ending while `Running` (or `Starting`) is a device failure and this
/// thread claims the teardown. If a stop got there first the claim fails and
/// the run is reported as stopped.
fn settle_exit(state: &StateCell, outcome: &PipelineError) -> StatusEvent {
    let claimed = state.transition(PipelineState::Running, PipelineState::Stopping)
        || state.transition(PipelineState::Starting, PipelineState::Stopping);
    if claimed {
        StatusEvent::DeviceLost {
            reason: outcome.to_string(),
        }
    } else {
        StatusEvent::Stopped
    }
}

/// Opens the source, reports the outcome through `ready`, then runs until the
/// source is closed or fails.
///
/// On an open failure nothing is touched besides `ready`: the controller
/// owns the state until the handshake succeeds.
pub(crate) fn run_capture_loop(ctx: CaptureContext, ready: SyncSender<Result<CloseHandle>>) {
    let CaptureContext {
        backend,
        config,
        queues,
        state,
    } = ctx;

    state.set_capture_thread(thread::current().id());

    let mut analyzer = match SpectralAnalyzer::new(config.analyzer_config()) {
        Ok(analyzer) => analyzer,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    let mut source = match backend.open(&config.device_id, config.sample_rate, config.block_size)
    {
        Ok(source) => source,
        Err(e) => {
            log::error!("Failed to open {}: {}", config.device_id, e);
            let _ = ready.send(Err(e));
            return;
        }
    };

    let _finish = StoppedOnExit {
        state: state.clone(),
        queues: queues.clone(),
    };

    queues.push_status(StatusEvent::Started {
        device_id: config.device_id.clone(),
        sample_rate: source.sample_rate(),
    });

    if ready.send(Ok(source.close_handle())).is_err() {
        log::warn!("Pipeline controller went away during start");
        source.close();
        return;
    }
    drop(ready);

    log::info!(
        "Audio capture started on {} ({} Hz, nfft={}, stride={})",
        config.device_id,
        source.sample_rate(),
        config.nfft,
        config.stride
    );

    let mut frames_emitted: u64 = 0;
    let outcome = loop {
        let block = match source.read_blocking() {
            Ok(block) => block,
            Err(e) => break e,
        };

        let frames = analyzer.push(block);

        // Frames analyzed after a stop request are discarded.
        if state.get() == PipelineState::Stopping {
            break PipelineError::StreamClosed;
        }

        for frame in frames {
            queues.push_frame(frame);
            frames_emitted += 1;
        }
    };

    // Claim before releasing anything.
    let event = settle_exit(&state, &outcome);

    source.close();
    drop(source);
    analyzer.reset();
    drop(analyzer);

    match &event {
        StatusEvent::Stopped => {
            log::info!("Audio capture stopped after {} frames", frames_emitted)
        }
        _ => log::error!("Audio capture ended unexpectedly: {}", outcome),
    }
    queues.push_status(event);
}
