//! Sample sources and the block hand-off between device and reader

use super::AudioSource;
use crate::error::{PipelineError, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Blocks buffered between the device callback and the reader before the
/// oldest is discarded.
const MAX_BACKLOG_BLOCKS: usize = 32;

/// A fixed-length run of mono samples captured at `sample_rate`.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBlock {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl SampleBlock {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// An opened audio input.
///
/// A source is owned by exactly one thread. Only the [`CloseHandle`] it hands
/// out may cross threads, and closing through it unblocks a pending
/// [`read_blocking`](SampleSource::read_blocking).
pub trait SampleSource {
    fn sample_rate(&self) -> u32;

    fn block_size(&self) -> usize;

    /// Blocks until the next full block is available.
    ///
    /// Returns [`PipelineError::StreamClosed`] once the source has been closed
    /// and [`PipelineError::Stream`] if the device failed.
    fn read_blocking(&mut self) -> Result<SampleBlock>;

    fn close_handle(&self) -> CloseHandle;

    fn close(&mut self) {
        self.close_handle().close();
    }
}

/// Enumerates and opens audio inputs.
pub trait AudioBackend: Send + Sync {
    fn list_sources(&self) -> Result<Vec<AudioSource>>;

    /// Opens `device_id` at exactly `sample_rate` delivering `block_size`
    /// sample blocks. Unsupported combinations fail with
    /// [`PipelineError::UnsupportedFormat`] rather than being substituted.
    fn open(
        &self,
        device_id: &str,
        sample_rate: u32,
        block_size: usize,
    ) -> Result<Box<dyn SampleSource>>;
}

struct ChannelState {
    pending: Vec<f32>,
    blocks: VecDeque<Vec<f32>>,
    closed: bool,
    failure: Option<String>,
    dropped_blocks: u64,
}

/// Hands blocks from a producer (device callback) to a single blocking reader.
pub struct BlockChannel {
    sample_rate: u32,
    block_size: usize,
    state: Mutex<ChannelState>,
    available: Condvar,
}

impl BlockChannel {
    pub fn new(sample_rate: u32, block_size: usize) -> Arc<Self> {
        assert!(block_size > 0, "BlockChannel block size must be greater than zero");
        Arc::new(Self {
            sample_rate,
            block_size,
            state: Mutex::new(ChannelState {
                pending: Vec::with_capacity(block_size),
                blocks: VecDeque::with_capacity(MAX_BACKLOG_BLOCKS),
                closed: false,
                failure: None,
                dropped_blocks: 0,
            }),
            available: Condvar::new(),
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Appends mono samples, completing as many blocks as they fill.
    pub fn push_samples(&self, samples: &[f32]) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }

        let mut completed = false;
        let mut remaining = samples;
        while !remaining.is_empty() {
            let take = (self.block_size - state.pending.len()).min(remaining.len());
            state.pending.extend_from_slice(&remaining[..take]);
            remaining = &remaining[take..];

            if state.pending.len() == self.block_size {
                let block = std::mem::replace(
                    &mut state.pending,
                    Vec::with_capacity(self.block_size),
                );
                if state.blocks.len() == MAX_BACKLOG_BLOCKS {
                    state.blocks.pop_front();
                    state.dropped_blocks += 1;
                    if state.dropped_blocks == 1 || state.dropped_blocks % 100 == 0 {
                        log::warn!(
                            "Reader lagging, discarded {} audio blocks so far",
                            state.dropped_blocks
                        );
                    }
                }
                state.blocks.push_back(block);
                completed = true;
            }
        }

        if completed {
            self.available.notify_one();
        }
    }

    /// Marks the stream as failed; the reader sees the error after draining
    /// blocks that were already complete.
    pub fn fail(&self, reason: impl Into<String>) {
        let mut state = self.state.lock();
        if state.failure.is_none() {
            state.failure = Some(reason.into());
        }
        self.available.notify_all();
    }

    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.pending.clear();
        state.blocks.clear();
        self.available.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn dropped_blocks(&self) -> u64 {
        self.state.lock().dropped_blocks
    }

    pub fn read_blocking(&self) -> Result<SampleBlock> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(PipelineError::StreamClosed);
            }
            if let Some(samples) = state.blocks.pop_front() {
                return Ok(SampleBlock::new(samples, self.sample_rate));
            }
            if let Some(reason) = &state.failure {
                return Err(PipelineError::Stream(reason.clone()));
            }
            self.available.wait(&mut state);
        }
    }

    /// Sleeps for up to `timeout`, returning early (with `true`) if the
    /// channel is closed meanwhile.
    pub fn wait_closed(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while !state.closed {
            if self.available.wait_until(&mut state, deadline).timed_out() {
                return state.closed;
            }
        }
        true
    }
}

/// Thread-safe handle that closes a source from outside its owning thread.
#[derive(Clone)]
pub struct CloseHandle(Arc<BlockChannel>);

impl CloseHandle {
    pub fn new(channel: Arc<BlockChannel>) -> Self {
        Self(channel)
    }

    /// Idempotent.
    pub fn close(&self) {
        self.0.close();
    }

    pub fn is_closed(&self) -> bool {
        self.0.is_closed()
    }
}
