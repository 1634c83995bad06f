use anyhow::bail;
use menu_bridge::bridge::{BridgeState, EventLoopBridge, ForeignToolkit, PostedTask, TickReport};
use menu_bridge::error::{BridgeError, ToolkitError};
use menu_bridge::host::{HostTimers, TimerRegistrar};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    Ok(&'static str),
    Fail(&'static str),
    /// Queues another event while being dispatched.
    Spawn(&'static str),
    /// Posts a task that runs after the event pass.
    Post(&'static str),
    PostFailing,
    PostPanicking,
    /// The toolkit itself panics while handling the event.
    Panic,
}

#[derive(Default)]
struct Scripted {
    queue: VecDeque<Step>,
    handled: Vec<&'static str>,
    posted: Vec<PostedTask>,
    discards: usize,
    shutdown: bool,
    ran: Rc<RefCell<Vec<String>>>,
}

impl Scripted {
    fn with(steps: Vec<Step>) -> Self {
        Self { queue: steps.into(), ..Self::default() }
    }
}

impl ForeignToolkit for Scripted {
    fn queued(&self) -> usize {
        self.queue.len()
    }

    fn dispatch_next(&mut self) -> Option<Result<(), ToolkitError>> {
        let step = self.queue.pop_front()?;
        let outcome = match step {
            Step::Ok(name) => {
                self.handled.push(name);
                Ok(())
            }
            Step::Fail(name) => Err(ToolkitError::UnknownCommand(name.to_string())),
            Step::Spawn(name) => {
                self.handled.push(name);
                self.queue.push_back(Step::Ok("spawned"));
                Ok(())
            }
            Step::Post(name) => {
                let ran = self.ran.clone();
                self.posted.push(PostedTask::new(name, move || {
                    ran.borrow_mut().push(name.to_string());
                    Ok(())
                }));
                Ok(())
            }
            Step::PostFailing => {
                self.posted.push(PostedTask::new("failing", || bail!("callback failed")));
                Ok(())
            }
            Step::PostPanicking => {
                self.posted.push(PostedTask::new("panicking", || panic!("callback panicked")));
                Ok(())
            }
            Step::Panic => panic!("toolkit crashed mid-dispatch"),
        };
        Some(outcome)
    }

    fn take_posted(&mut self) -> Vec<PostedTask> {
        std::mem::take(&mut self.posted)
    }

    fn discard_pending(&mut self) {
        self.queue.clear();
        self.posted.clear();
        self.discards += 1;
    }

    fn wants_shutdown(&self) -> bool {
        self.shutdown
    }
}

fn running(steps: Vec<Step>) -> (HostTimers, Rc<RefCell<Scripted>>, EventLoopBridge<Scripted>) {
    let timers = HostTimers::new();
    let toolkit = Rc::new(RefCell::new(Scripted::with(steps)));
    let bridge = EventLoopBridge::new(toolkit.clone());
    bridge.start(Rc::new(timers.clone()), Duration::from_millis(10)).expect("bridge starts");
    (timers, toolkit, bridge)
}

#[test]
fn one_tick_processes_exactly_the_queued_events() {
    let (timers, toolkit, bridge) = running(vec![Step::Ok("a"), Step::Ok("b"), Step::Ok("c")]);
    assert_eq!(timers.run_frame(), 1);
    assert_eq!(toolkit.borrow().handled, vec!["a", "b", "c"]);
    assert_eq!(bridge.last_tick(), Some(TickReport { queued: 3, processed: 3, dropped: 0, posted_failures: 0 }));
}

#[test]
fn empty_queue_returns_immediately() {
    let (timers, toolkit, bridge) = running(Vec::new());
    timers.run_frame();
    assert_eq!(bridge.last_tick(), Some(TickReport::default()));
    assert!(toolkit.borrow().handled.is_empty());
    assert_eq!(bridge.stats().ticks, 1);
}

#[test]
fn events_queued_during_a_tick_wait_for_the_next() {
    let (timers, toolkit, bridge) = running(vec![Step::Spawn("first"), Step::Ok("second")]);
    timers.run_frame();
    assert_eq!(toolkit.borrow().handled, vec!["first", "second"]);
    assert_eq!(toolkit.borrow().queue.len(), 1);
    timers.run_frame();
    assert_eq!(toolkit.borrow().handled, vec!["first", "second", "spawned"]);
    assert_eq!(bridge.stats().processed, 3);
}

#[test]
fn failed_events_are_dropped_and_the_tick_continues() {
    let (timers, toolkit, bridge) = running(vec![Step::Fail("missing"), Step::Ok("after")]);
    timers.run_frame();
    assert_eq!(toolkit.borrow().handled, vec!["after"]);
    assert_eq!(bridge.last_tick(), Some(TickReport { queued: 2, processed: 1, dropped: 1, posted_failures: 0 }));
    assert!(bridge.is_running());
}

#[test]
fn toolkit_panic_drops_the_event_and_keeps_the_timer() {
    let (timers, toolkit, bridge) = running(vec![Step::Panic, Step::Ok("after")]);
    assert_eq!(timers.run_frame(), 1);
    assert_eq!(toolkit.borrow().handled, vec!["after"]);
    assert_eq!(bridge.last_tick(), Some(TickReport { queued: 2, processed: 1, dropped: 1, posted_failures: 0 }));
    assert!(bridge.is_running());
    assert_eq!(timers.active(), 1);

    toolkit.borrow_mut().queue.push_back(Step::Ok("next frame"));
    assert_eq!(timers.run_frame(), 1);
    assert_eq!(toolkit.borrow().handled, vec!["after", "next frame"]);
    assert_eq!(bridge.stats().dropped, 1);
}

#[test]
fn posted_tasks_run_after_the_pass_and_failures_are_contained() {
    let (timers, toolkit, bridge) =
        running(vec![Step::Post("open"), Step::PostFailing, Step::PostPanicking, Step::Post("save")]);
    let ran = toolkit.borrow().ran.clone();
    timers.run_frame();
    assert_eq!(*ran.borrow(), vec!["open".to_string(), "save".to_string()]);
    let report = bridge.last_tick().expect("tick report");
    assert_eq!(report.processed, 4);
    assert_eq!(report.posted_failures, 2);
    assert_eq!(bridge.stats().posted_run, 4);
    assert!(bridge.is_running());
}

#[test]
fn posted_tasks_may_touch_the_toolkit() {
    let timers = HostTimers::new();
    let toolkit = Rc::new(RefCell::new(Scripted::default()));
    let handle = toolkit.clone();
    toolkit.borrow_mut().posted.push(PostedTask::new("requeue", move || {
        handle.borrow_mut().queue.push_back(Step::Ok("from_task"));
        Ok(())
    }));
    let bridge = EventLoopBridge::new(toolkit.clone());
    bridge.start(Rc::new(timers.clone()), Duration::ZERO).expect("start");

    timers.run_frame();
    assert!(toolkit.borrow().handled.is_empty());
    timers.run_frame();
    assert_eq!(toolkit.borrow().handled, vec!["from_task"]);
}

#[test]
fn stop_halts_processing_whatever_is_queued() {
    let (timers, toolkit, bridge) = running(vec![Step::Ok("a")]);
    let timer = bridge.timer().expect("timer registered");
    assert!(bridge.stop());
    assert!(!bridge.stop());
    assert_eq!(bridge.state(), BridgeState::Stopped);
    assert!(!timers.is_registered(timer));

    toolkit.borrow_mut().queue.push_back(Step::Ok("late"));
    timers.run_frame();
    assert!(bridge.pump_once().is_none());
    assert!(toolkit.borrow().handled.is_empty());
    assert_eq!(toolkit.borrow().discards, 1);
}

#[test]
fn start_while_running_is_rejected_and_restart_works() {
    let (timers, toolkit, bridge) = running(Vec::new());
    let registrar: Rc<dyn TimerRegistrar> = Rc::new(timers.clone());
    assert_eq!(bridge.start(registrar.clone(), Duration::ZERO), Err(BridgeError::AlreadyRunning));
    assert_eq!(timers.active(), 1);

    bridge.stop();
    bridge.start(registrar, Duration::ZERO).expect("restart");
    toolkit.borrow_mut().queue.push_back(Step::Ok("again"));
    timers.run_frame();
    assert_eq!(toolkit.borrow().handled, vec!["again"]);
    assert_eq!(bridge.stats().starts, 2);
}

#[test]
fn toolkit_shutdown_stops_the_bridge_from_inside_the_tick() {
    let (timers, toolkit, bridge) = running(vec![Step::Ok("never")]);
    toolkit.borrow_mut().shutdown = true;
    timers.run_frame();
    assert_eq!(bridge.state(), BridgeState::Stopped);
    assert_eq!(timers.active(), 0);
    assert!(toolkit.borrow().handled.is_empty());
}

#[test]
fn busy_toolkit_skips_the_tick() {
    let (timers, toolkit, bridge) = running(vec![Step::Ok("a")]);
    let guard = toolkit.borrow_mut();
    timers.run_frame();
    drop(guard);
    assert_eq!(bridge.stats().skipped_ticks, 1);
    timers.run_frame();
    assert_eq!(toolkit.borrow().handled, vec!["a"]);
}

#[test]
fn one_tick_per_host_frame() {
    let (timers, _toolkit, bridge) = running(Vec::new());
    for _ in 0..5 {
        timers.run_frame();
    }
    let timer = bridge.timer().expect("timer");
    assert_eq!(bridge.stats().ticks, 5);
    assert_eq!(timers.invocations(timer), Some(5));
}
