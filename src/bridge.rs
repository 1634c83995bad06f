//! Cooperative event-loop bridge: pumps a foreign toolkit's queue from inside
//! the host's per-frame timer callbacks.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::{Rc, Weak};
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::error::{panic_message, BridgeError, IntegrationFailure, ToolkitError};
use crate::host::{TimerControl, TimerId, TimerRegistrar};

/// Work a toolkit defers until its event pass has finished.
pub struct PostedTask {
    pub label: String,
    run: Box<dyn FnOnce() -> Result<()>>,
}

impl PostedTask {
    pub fn new(label: impl Into<String>, run: impl FnOnce() -> Result<()> + 'static) -> Self {
        Self { label: label.into(), run: Box::new(run) }
    }

    pub fn run(self) -> Result<()> {
        (self.run)()
    }
}

impl fmt::Debug for PostedTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostedTask").field("label", &self.label).finish_non_exhaustive()
    }
}

/// A GUI toolkit that does not own the main loop and is advanced one event
/// at a time.
pub trait ForeignToolkit {
    fn queued(&self) -> usize;

    /// Processes the oldest queued event. `None` when the queue is empty.
    fn dispatch_next(&mut self) -> Option<Result<(), ToolkitError>>;

    fn take_posted(&mut self) -> Vec<PostedTask>;

    /// Drops queued events and posted work without running them.
    fn discard_pending(&mut self);

    fn wants_shutdown(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Stopped,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeCommand {
    Start,
    Stop,
}

impl BridgeState {
    pub fn next(self, command: BridgeCommand) -> Result<BridgeState, BridgeError> {
        match (self, command) {
            (BridgeState::Stopped, BridgeCommand::Start) => Ok(BridgeState::Running),
            (BridgeState::Running, BridgeCommand::Start) => Err(BridgeError::AlreadyRunning),
            (_, BridgeCommand::Stop) => Ok(BridgeState::Stopped),
        }
    }
}

/// The timer registration owned by a running bridge.
pub struct BridgeHandle {
    pub timer: TimerId,
    registrar: Rc<dyn TimerRegistrar>,
}

impl BridgeHandle {
    fn release(self) -> bool {
        self.registrar.deregister(self.timer)
    }
}

impl fmt::Debug for BridgeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeHandle").field("timer", &self.timer).finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub queued: usize,
    pub processed: usize,
    pub dropped: usize,
    pub posted_failures: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub ticks: u64,
    pub skipped_ticks: u64,
    pub processed: u64,
    pub dropped: u64,
    pub posted_run: u64,
    pub posted_failures: u64,
    pub starts: u64,
}

struct Shared<T> {
    toolkit: Rc<RefCell<T>>,
    state: Cell<BridgeState>,
    handle: RefCell<Option<BridgeHandle>>,
    stats: Cell<BridgeStats>,
    last_tick: Cell<Option<TickReport>>,
}

impl<T: ForeignToolkit> Shared<T> {
    fn update_stats(&self, apply: impl FnOnce(&mut BridgeStats)) {
        let mut stats = self.stats.get();
        apply(&mut stats);
        self.stats.set(stats);
    }

    fn stop(&self) -> bool {
        if self.state.get() != BridgeState::Running {
            return false;
        }
        if let Ok(next) = self.state.get().next(BridgeCommand::Stop) {
            self.state.set(next);
        }
        let handle = self.handle.borrow_mut().take();
        if let Some(handle) = handle {
            let timer = handle.timer;
            let removed = handle.release();
            debug!(?timer, removed, "[bridge] timer released");
        }
        match self.toolkit.try_borrow_mut() {
            Ok(mut toolkit) => toolkit.discard_pending(),
            Err(_) => debug!("[bridge] toolkit busy during stop; pending work left in place"),
        }
        true
    }

    fn tick(&self) -> TimerControl {
        if self.state.get() != BridgeState::Running {
            return TimerControl::Stop;
        }
        let mut report = TickReport::default();
        let posted = {
            let Ok(mut toolkit) = self.toolkit.try_borrow_mut() else {
                self.update_stats(|stats| stats.skipped_ticks += 1);
                debug!("[bridge] toolkit busy; tick skipped");
                return TimerControl::Continue;
            };
            if toolkit.wants_shutdown() {
                drop(toolkit);
                info!("[bridge] toolkit requested shutdown");
                self.stop();
                return TimerControl::Stop;
            }
            report.queued = toolkit.queued();
            for _ in 0..report.queued {
                match catch_unwind(AssertUnwindSafe(|| toolkit.dispatch_next())) {
                    Ok(None) => break,
                    Ok(Some(Ok(()))) => report.processed += 1,
                    Ok(Some(Err(err))) => {
                        report.dropped += 1;
                        warn!(failure = %IntegrationFailure::BridgeTickFailure, "[bridge] event dropped: {err}");
                    }
                    Err(payload) => {
                        report.dropped += 1;
                        warn!(
                            failure = %IntegrationFailure::BridgeTickFailure,
                            "[bridge] event dropped: toolkit panicked: {}",
                            panic_message(&*payload)
                        );
                    }
                }
            }
            toolkit.take_posted()
        };
        let posted_count = posted.len();
        for task in posted {
            let label = task.label.clone();
            let outcome = match catch_unwind(AssertUnwindSafe(move || task.run())) {
                Ok(result) => result,
                Err(payload) => Err(anyhow::anyhow!("panicked: {}", panic_message(&*payload))),
            };
            if let Err(err) = outcome {
                report.posted_failures += 1;
                warn!(failure = %IntegrationFailure::BridgeTickFailure, task = %label, "[bridge] posted task failed: {err:#}");
            }
        }
        self.update_stats(|stats| {
            stats.ticks += 1;
            stats.processed += report.processed as u64;
            stats.dropped += report.dropped as u64;
            stats.posted_run += posted_count as u64;
            stats.posted_failures += report.posted_failures as u64;
        });
        self.last_tick.set(Some(report));
        if self.state.get() == BridgeState::Running {
            TimerControl::Continue
        } else {
            TimerControl::Stop
        }
    }
}

/// Drives `T` from a host timer. Dropping the bridge stops it.
pub struct EventLoopBridge<T: ForeignToolkit + 'static> {
    shared: Rc<Shared<T>>,
}

impl<T: ForeignToolkit + 'static> EventLoopBridge<T> {
    pub fn new(toolkit: Rc<RefCell<T>>) -> Self {
        Self {
            shared: Rc::new(Shared {
                toolkit,
                state: Cell::new(BridgeState::Stopped),
                handle: RefCell::new(None),
                stats: Cell::new(BridgeStats::default()),
                last_tick: Cell::new(None),
            }),
        }
    }

    pub fn toolkit(&self) -> &Rc<RefCell<T>> {
        &self.shared.toolkit
    }

    pub fn state(&self) -> BridgeState {
        self.shared.state.get()
    }

    pub fn is_running(&self) -> bool {
        self.state() == BridgeState::Running
    }

    pub fn stats(&self) -> BridgeStats {
        self.shared.stats.get()
    }

    pub fn last_tick(&self) -> Option<TickReport> {
        self.shared.last_tick.get()
    }

    pub fn timer(&self) -> Option<TimerId> {
        self.shared.handle.borrow().as_ref().map(|handle| handle.timer)
    }

    pub fn start(&self, registrar: Rc<dyn TimerRegistrar>, tick_interval_hint: Duration) -> Result<(), BridgeError> {
        let next = self.shared.state.get().next(BridgeCommand::Start)?;
        self.shared.state.set(next);
        let weak: Weak<Shared<T>> = Rc::downgrade(&self.shared);
        let timer = registrar.register(
            tick_interval_hint,
            Box::new(move || match weak.upgrade() {
                Some(shared) => shared.tick(),
                None => TimerControl::Stop,
            }),
        );
        *self.shared.handle.borrow_mut() = Some(BridgeHandle { timer, registrar });
        self.shared.update_stats(|stats| stats.starts += 1);
        info!(?timer, interval_ms = tick_interval_hint.as_millis() as u64, "[bridge] started");
        Ok(())
    }

    /// Returns whether the bridge was running. Safe to call repeatedly.
    pub fn stop(&self) -> bool {
        let was_running = self.shared.stop();
        if was_running {
            info!("[bridge] stopped");
        }
        was_running
    }

    /// Runs one tick directly, as the host timer would.
    pub fn pump_once(&self) -> Option<TickReport> {
        let before = self.shared.stats.get().ticks;
        self.shared.tick();
        (self.shared.stats.get().ticks > before).then(|| self.shared.last_tick.get()).flatten()
    }
}

impl<T: ForeignToolkit + 'static> Drop for EventLoopBridge<T> {
    fn drop(&mut self) {
        self.shared.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostTimers;

    #[test]
    fn transition_table() {
        assert_eq!(BridgeState::Stopped.next(BridgeCommand::Start), Ok(BridgeState::Running));
        assert_eq!(BridgeState::Running.next(BridgeCommand::Start), Err(BridgeError::AlreadyRunning));
        assert_eq!(BridgeState::Running.next(BridgeCommand::Stop), Ok(BridgeState::Stopped));
        assert_eq!(BridgeState::Stopped.next(BridgeCommand::Stop), Ok(BridgeState::Stopped));
    }

    #[derive(Default)]
    struct Counter {
        queue: usize,
        handled: usize,
        discarded: bool,
    }

    impl ForeignToolkit for Counter {
        fn queued(&self) -> usize {
            self.queue
        }

        fn dispatch_next(&mut self) -> Option<Result<(), ToolkitError>> {
            if self.queue == 0 {
                return None;
            }
            self.queue -= 1;
            self.handled += 1;
            Some(Ok(()))
        }

        fn take_posted(&mut self) -> Vec<PostedTask> {
            Vec::new()
        }

        fn discard_pending(&mut self) {
            self.queue = 0;
            self.discarded = true;
        }
    }

    #[test]
    fn dropping_the_bridge_releases_the_timer() {
        let timers = HostTimers::new();
        let toolkit = Rc::new(RefCell::new(Counter { queue: 2, ..Counter::default() }));
        let bridge = EventLoopBridge::new(toolkit.clone());
        bridge.start(Rc::new(timers.clone()), Duration::from_millis(10)).expect("start");
        let timer = bridge.timer().expect("timer");
        assert_eq!(timers.interval_hint(timer), Some(Duration::from_millis(10)));
        drop(bridge);
        assert_eq!(timers.active(), 0);
        assert!(toolkit.borrow().discarded);
        timers.run_frame();
        assert_eq!(toolkit.borrow().handled, 0);
    }
}
