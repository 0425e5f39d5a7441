//! Pipeline lifecycle state

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::thread::{self, ThreadId};

/// Lifecycle of a [`SpectrumPipeline`](crate::pipeline::SpectrumPipeline).
///
/// `Stopped -> Starting -> Running -> Stopping -> Stopped`; a failed start
/// goes straight back from `Starting` to `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl PipelineState {
    /// Whether a capture thread may be alive in this state.
    pub fn is_active(self) -> bool {
        self != PipelineState::Stopped
    }
}

/// The single shared copy of a pipeline's state.
///
/// Every change goes through a guarded transition and wakes waiters.
#[derive(Debug, Default)]
pub(crate) struct StateCell {
    state: Mutex<PipelineState>,
    changed: Condvar,
    capture_thread: Mutex<Option<ThreadId>>,
}

impl StateCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> PipelineState {
        *self.state.lock()
    }

    /// Moves `from -> to`; returns false (and changes nothing) if the current
    /// state is not `from`.
    pub fn transition(&self, from: PipelineState, to: PipelineState) -> bool {
        let mut state = self.state.lock();
        if *state != from {
            return false;
        }
        *state = to;
        log::debug!("Pipeline state {:?} -> {:?}", from, to);
        self.changed.notify_all();
        true
    }

    /// Moves any state except `Stopped` to `Stopped`.
    pub fn finish(&self) {
        let mut state = self.state.lock();
        if *state != PipelineState::Stopped {
            log::debug!("Pipeline state {:?} -> Stopped", *state);
            *state = PipelineState::Stopped;
            self.changed.notify_all();
        }
    }

    /// Records the thread running the current capture loop.
    pub fn set_capture_thread(&self, id: ThreadId) {
        *self.capture_thread.lock() = Some(id);
    }

    pub fn on_capture_thread(&self) -> bool {
        *self.capture_thread.lock() == Some(thread::current().id())
    }

    /// Claims the teardown of a running pipeline.
    ///
    /// Waits out `Starting` and `Stopping`. Returns true if this caller moved
    /// `Running -> Stopping` and must tear down; false if the pipeline ended
    /// up `Stopped`, or if the capture thread asks while a teardown is
    /// already under way. That teardown is waiting on the capture thread to
    /// exit, so it must not wait in turn.
    pub fn begin_stop(&self) -> bool {
        let on_capture_thread = self.on_capture_thread();
        let mut state = self.state.lock();
        loop {
            match *state {
                PipelineState::Stopping if on_capture_thread => return false,
                PipelineState::Starting | PipelineState::Stopping => {
                    self.changed.wait(&mut state);
                }
                PipelineState::Stopped => return false,
                PipelineState::Running => {
                    *state = PipelineState::Stopping;
                    log::debug!("Pipeline state Running -> Stopping");
                    self.changed.notify_all();
                    return true;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn default_state_is_stopped() {
        let cell = StateCell::new();

        assert_eq!(cell.get(), PipelineState::Stopped);
        assert!(!PipelineState::Stopped.is_active());
        assert!(PipelineState::Stopping.is_active());
    }

    #[test]
    fn transition_requires_expected_state() {
        let cell = StateCell::new();

        assert!(!cell.transition(PipelineState::Running, PipelineState::Stopping));
        assert!(cell.transition(PipelineState::Stopped, PipelineState::Starting));
        assert!(!cell.transition(PipelineState::Stopped, PipelineState::Starting));
        assert_eq!(cell.get(), PipelineState::Starting);
    }

    #[test]
    fn begin_stop_on_stopped_is_noop() {
        let cell = StateCell::new();

        assert!(!cell.begin_stop());
        assert_eq!(cell.get(), PipelineState::Stopped);
    }

    #[test]
    fn only_one_caller_claims_teardown() {
        let cell = Arc::new(StateCell::new());
        cell.transition(PipelineState::Stopped, PipelineState::Starting);
        cell.transition(PipelineState::Starting, PipelineState::Running);

        assert!(cell.begin_stop());

        let waiter_cell = cell.clone();
        let waiter = thread::spawn(move || waiter_cell.begin_stop());
        thread::sleep(Duration::from_millis(30));
        assert!(!waiter.is_finished());

        cell.finish();
        assert!(!waiter.join().unwrap());
        assert_eq!(cell.get(), PipelineState::Stopped);
    }

    #[test]
    fn begin_stop_waits_for_start_to_settle() {
        let cell = Arc::new(StateCell::new());
        cell.transition(PipelineState::Stopped, PipelineState::Starting);

        let stopper_cell = cell.clone();
        let stopper = thread::spawn(move || stopper_cell.begin_stop());
        thread::sleep(Duration::from_millis(30));
        cell.transition(PipelineState::Starting, PipelineState::Running);

        assert!(stopper.join().unwrap());
        assert_eq!(cell.get(), PipelineState::Stopping);
    }

    #[test]
    fn capture_thread_does_not_wait_for_teardown_in_progress() {
        let cell = StateCell::new();
        cell.transition(PipelineState::Stopped, PipelineState::Starting);
        cell.transition(PipelineState::Starting, PipelineState::Running);
        assert!(cell.begin_stop());

        cell.set_capture_thread(thread::current().id());

        assert!(cell.on_capture_thread());
        assert!(!cell.begin_stop());
        assert_eq!(cell.get(), PipelineState::Stopping);
    }

    #[test]
    fn other_threads_are_not_the_capture_thread() {
        let cell = Arc::new(StateCell::new());
        cell.set_capture_thread(thread::current().id());

        let other = cell.clone();
        assert!(!thread::spawn(move || other.on_capture_thread())
            .join()
            .unwrap());
    }
}
