//! Pipeline controller: start/stop lifecycle of one capture run at a time

use crate::audio::{
    run_capture_loop, AudioBackend, AudioConfig, AudioSource, CaptureContext, CloseHandle,
};
use crate::error::{PipelineError, Result};
use crate::queue::DeliveryQueues;
use crate::state::{PipelineState, StateCell};
use parking_lot::Mutex;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// A live capture run: the thread that owns the source and a way to close it.
struct CaptureRun {
    close: CloseHandle,
    thread: JoinHandle<()>,
}

impl CaptureRun {
    /// Closes the source and waits for the capture thread to exit.
    fn shutdown(self) {
        self.close.close();

        if self.thread.thread().id() == thread::current().id() {
            // Called from the capture thread itself; it exits on its next read.
            log::debug!("Stop requested from the capture thread, not joining");
            return;
        }

        if self.thread.join().is_err() {
            log::error!("Audio capture thread panicked during teardown");
        }
    }
}

/// Owns the capture thread and the queues it delivers into.
///
/// All lifecycle changes go through [`start`](Self::start) and
/// [`stop`](Self::stop), both of which may be called from any thread.
pub struct SpectrumPipeline {
    backend: Arc<dyn AudioBackend>,
    queues: Arc<DeliveryQueues>,
    state: Arc<StateCell>,
    /// Also serialises `start` calls.
    run: Mutex<Option<CaptureRun>>,
}

impl SpectrumPipeline {
    pub fn new(backend: Arc<dyn AudioBackend>) -> Self {
        Self::with_queues(backend, Arc::new(DeliveryQueues::default()))
    }

    pub fn with_queues(backend: Arc<dyn AudioBackend>, queues: Arc<DeliveryQueues>) -> Self {
        Self {
            backend,
            queues,
            state: Arc::new(StateCell::new()),
            run: Mutex::new(None),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state.get()
    }

    /// Queues the consumer drains.
    pub fn queues(&self) -> Arc<DeliveryQueues> {
        self.queues.clone()
    }

    pub fn list_sources(&self) -> Result<Vec<AudioSource>> {
        self.backend.list_sources()
    }

    /// Opens the configured device and starts capturing.
    ///
    /// Fails with [`PipelineError::AlreadyRunning`] unless the pipeline is
    /// stopped. Any other failure leaves the pipeline stopped with nothing
    /// open.
    pub fn start(&self, config: &AudioConfig) -> Result<()> {
        let mut run = self.run.lock();

        if !self
            .state
            .transition(PipelineState::Stopped, PipelineState::Starting)
        {
            return Err(PipelineError::AlreadyRunning);
        }

        // A run that ended on its own leaves a finished thread behind.
        if let Some(previous) = run.take() {
            previous.shutdown();
        }

        match self.launch(config) {
            Ok(capture) => {
                *run = Some(capture);
                if self
                    .state
                    .transition(PipelineState::Starting, PipelineState::Running)
                {
                    log::info!("Pipeline running on {}", config.device_id);
                }
                Ok(())
            }
            Err(e) => {
                log::error!("Pipeline failed to start: {}", e);
                self.state
                    .transition(PipelineState::Starting, PipelineState::Stopped);
                Err(e)
            }
        }
    }

    fn launch(&self, config: &AudioConfig) -> Result<CaptureRun> {
        config.validate()?;

        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let ctx = CaptureContext {
            backend: self.backend.clone(),
            config: config.clone(),
            queues: self.queues.clone(),
            state: self.state.clone(),
        };

        let thread = thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || run_capture_loop(ctx, ready_tx))
            .map_err(|e| PipelineError::Thread(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(close)) => Ok(CaptureRun { close, thread }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(PipelineError::Thread(
                    "capture thread exited before opening the source".to_string(),
                ))
            }
        }
    }

    /// Stops capturing. Idempotent; concurrent callers wait for the single
    /// teardown to finish. Once this returns no more frames from the run
    /// are enqueued.
    ///
    /// Called from the capture thread (for instance by a source) while
    /// another stop is tearing down, this returns at once: the capture loop
    /// exits after the current read.
    pub fn stop(&self) {
        if !self.state.begin_stop() {
            return;
        }

        log::info!("Pipeline stopping");
        let capture = self.run.lock().take();
        match capture {
            Some(capture) => capture.shutdown(),
            None => {
                log::warn!("Pipeline was running without a capture thread");
                self.state.finish();
            }
        }
    }
}

impl Drop for SpectrumPipeline {
    fn drop(&mut self) {
        self.stop();
        if let Some(capture) = self.run.get_mut().take() {
            capture.shutdown();
        }
    }
}
