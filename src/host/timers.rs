use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Duration;

use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerControl {
    Continue,
    Stop,
}

pub type TimerCallback = Box<dyn FnMut() -> TimerControl>;

/// The host's recurring-callback mechanism. Callbacks run on the host thread,
/// at least once per redraw cycle while registered.
pub trait TimerRegistrar {
    fn register(&self, interval_hint: Duration, callback: TimerCallback) -> TimerId;
    fn deregister(&self, id: TimerId) -> bool;
}

struct TimerSlot {
    interval_hint: Duration,
    callback: Option<TimerCallback>,
    invocations: u64,
}

#[derive(Default)]
struct TimerTable {
    next_id: u64,
    frame: u64,
    slots: BTreeMap<TimerId, TimerSlot>,
}

/// Frame-driven timer table. `run_frame` is what the host calls once per
/// redraw; callbacks may register or deregister timers (their own included)
/// while running.
#[derive(Clone, Default)]
pub struct HostTimers {
    inner: Rc<RefCell<TimerTable>>,
}

impl HostTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invokes every timer registered before the frame started. Returns the
    /// number of callbacks run.
    pub fn run_frame(&self) -> usize {
        let ids: Vec<TimerId> = {
            let mut table = self.inner.borrow_mut();
            table.frame += 1;
            table.slots.keys().copied().collect()
        };
        let mut ran = 0;
        for id in ids {
            let callback = self.inner.borrow_mut().slots.get_mut(&id).and_then(|slot| slot.callback.take());
            let Some(mut callback) = callback else { continue };
            let control = callback();
            ran += 1;
            let mut table = self.inner.borrow_mut();
            match control {
                TimerControl::Continue => {
                    if let Some(slot) = table.slots.get_mut(&id) {
                        slot.callback = Some(callback);
                        slot.invocations += 1;
                    }
                }
                TimerControl::Stop => {
                    if table.slots.remove(&id).is_some() {
                        trace!(timer = id.0, "[host] timer finished");
                    }
                }
            }
        }
        ran
    }

    pub fn frame(&self) -> u64 {
        self.inner.borrow().frame
    }

    pub fn active(&self) -> usize {
        self.inner.borrow().slots.len()
    }

    pub fn is_registered(&self, id: TimerId) -> bool {
        self.inner.borrow().slots.contains_key(&id)
    }

    pub fn invocations(&self, id: TimerId) -> Option<u64> {
        self.inner.borrow().slots.get(&id).map(|slot| slot.invocations)
    }

    pub fn interval_hint(&self, id: TimerId) -> Option<Duration> {
        self.inner.borrow().slots.get(&id).map(|slot| slot.interval_hint)
    }
}

impl TimerRegistrar for HostTimers {
    fn register(&self, interval_hint: Duration, callback: TimerCallback) -> TimerId {
        let mut table = self.inner.borrow_mut();
        table.next_id += 1;
        let id = TimerId(table.next_id);
        table.slots.insert(id, TimerSlot { interval_hint, callback: Some(callback), invocations: 0 });
        id
    }

    fn deregister(&self, id: TimerId) -> bool {
        self.inner.borrow_mut().slots.remove(&id).is_some()
    }
}
