// Copyright 2024-2025 Golem Cloud
//
// Licensed under the Golem Source License v1.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://license.golem.cloud/LICENSE
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

pub mod thread;

use crate::error::{DriverError, TaskError};
use crate::scheduler;
use crate::task::suspend;
use lazy_static::lazy_static;
use std::rc::Rc;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Identifies a timer owned by the event driver of one thread.
pub type TimerId = u64;

/// Identifies a registered resume callback owned by the event driver of one
/// thread.
pub type WaiterId = u64;

/// Callback invoked on the driver thread each time a timer fires.
pub type TimerCallback = Rc<dyn Fn()>;

/// Outcome of one event-loop run or iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// `exit` was requested.
    Exited,
    /// Nothing is left that could ever produce an event.
    OutOfWaiters,
    /// Events were processed (or none were due); more waiters remain.
    Idle,
}

/// Contract between the scheduler and the per-thread I/O readiness driver.
///
/// Drivers are per-thread singletons; the runtime lazily creates one through
/// the factory installed with [`set_event_driver_factory`] (falling back to
/// the built-in [`thread::ThreadEventDriver`]). All methods are called from
/// the owning thread only; cross-thread wakeups go through [`RemoteWakeup`].
pub trait EventDriver {
    /// Runs the event loop until exit is requested or no waiters remain.
    fn run(&self) -> Result<LoopExit, DriverError>;

    /// Runs a single (possibly blocking) event-loop iteration.
    fn run_once(&self) -> Result<LoopExit, DriverError>;

    /// Non-blocking drain of due timers and posted wakeups.
    ///
    /// Returns `false` iff exit was requested.
    fn process_events(&self) -> bool;

    /// Requests the event loop to exit. Idempotent.
    fn exit(&self);

    /// Installs the scheduler's idle callback, invoked once per loop
    /// iteration after events were processed. A `false` return means exit
    /// was requested during idle processing.
    fn set_idle_callback(&self, callback: Option<Box<dyn FnMut() -> bool>>);

    fn timer_create(&self, callback: Option<TimerCallback>) -> TimerId;
    fn timer_rearm(&self, id: TimerId, timeout: Duration, periodic: bool);
    fn timer_stop(&self, id: TimerId);
    fn timer_pending(&self, id: TimerId) -> bool;
    /// A timer with keep-alive disabled does not prevent `run` from
    /// returning [`LoopExit::OutOfWaiters`].
    fn timer_set_keep_alive(&self, id: TimerId, keep_alive: bool);
    /// Attaches a previously created waiter to the timer's next firing (or
    /// its `stop`).
    fn timer_wait(&self, id: TimerId, waiter: WaiterId);
    fn timer_release(&self, id: TimerId);

    /// Registers a one-shot resume callback and returns its id. The callback
    /// runs on this driver's thread once the waiter is triggered or posted.
    fn waiter_create(&self, resume: Box<dyn FnOnce()>) -> WaiterId;
    /// Drops a registered waiter without running it.
    fn waiter_cancel(&self, id: WaiterId);

    /// A thread-safe handle that posts waiter ids back to this driver.
    fn remote(&self) -> RemoteWakeup;

    /// Creates a manual-reset event usable across threads.
    fn create_manual_event(&self) -> ManualEvent {
        ManualEvent::new()
    }
}

/// Thread-safe handle delivering waiter wakeups to a specific driver thread.
#[derive(Clone)]
pub struct RemoteWakeup {
    post: Arc<dyn Fn(WaiterId) + Send + Sync>,
}

impl RemoteWakeup {
    pub fn new(post: Arc<dyn Fn(WaiterId) + Send + Sync>) -> Self {
        Self { post }
    }

    pub fn post(&self, id: WaiterId) {
        (self.post)(id)
    }
}

type DriverFactory = Arc<dyn Fn() -> Rc<dyn EventDriver> + Send + Sync>;

lazy_static! {
    static ref DRIVER_FACTORY: Mutex<Option<DriverFactory>> = Mutex::new(None);
}

/// Overrides how per-thread event drivers are created. Must be called before
/// the first runtime operation on any thread whose driver it should affect.
pub fn set_event_driver_factory(factory: Option<DriverFactory>) {
    *DRIVER_FACTORY.lock().unwrap() = factory;
}

pub(crate) fn new_event_driver() -> Rc<dyn EventDriver> {
    let factory = DRIVER_FACTORY.lock().unwrap().clone();
    match factory {
        Some(factory) => factory(),
        None => Rc::new(thread::ThreadEventDriver::new()),
    }
}

/// The event driver of the current thread, created on first use.
pub fn current_event_driver() -> Rc<dyn EventDriver> {
    scheduler::scheduler().driver()
}

struct ManualEventState {
    count: u64,
    waiters: Vec<(RemoteWakeup, WaiterId)>,
}

struct ManualEventShared {
    state: Mutex<ManualEventState>,
    condvar: Condvar,
}

/// Cross-thread manual-reset event with a monotonically increasing emit
/// count.
///
/// Waiters pass a previously observed count so an emit between observing the
/// count and calling `wait` is never lost.
#[derive(Clone)]
pub struct ManualEvent {
    shared: Arc<ManualEventShared>,
}

impl Default for ManualEvent {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualEvent {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(ManualEventShared {
                state: Mutex::new(ManualEventState {
                    count: 0,
                    waiters: Vec::new(),
                }),
                condvar: Condvar::new(),
            }),
        }
    }

    /// Wakes all current waiters and increments the emit count. Callable from
    /// any thread.
    pub fn emit(&self) {
        let waiters = {
            let mut state = self.shared.state.lock().unwrap();
            state.count += 1;
            std::mem::take(&mut state.waiters)
        };
        self.shared.condvar.notify_all();
        for (remote, waiter) in waiters {
            remote.post(waiter);
        }
    }

    pub fn emit_count(&self) -> u64 {
        self.shared.state.lock().unwrap().count
    }

    /// Suspends the current task until the emit count exceeds `last`,
    /// returning the observed count.
    pub async fn wait(&self, last: u64) -> Result<u64, TaskError> {
        loop {
            let count = self.emit_count();
            if count > last {
                return Ok(count);
            }
            let shared = self.shared.clone();
            suspend(move |handle, epoch| {
                let driver = current_event_driver();
                let waiter = driver.waiter_create(Box::new(move || {
                    scheduler::resume_waiting(&handle, epoch);
                }));
                let mut state = shared.state.lock().unwrap();
                if state.count > last {
                    drop(state);
                    driver.waiter_cancel(waiter);
                    false
                } else {
                    state.waiters.push((driver.remote(), waiter));
                    true
                }
            })
            .await?;
        }
    }

    /// Blocking variant of [`wait`](Self::wait) for threads that do not run
    /// an event loop (used by worker shutdown).
    pub fn wait_blocking(&self, last: u64) -> u64 {
        let mut state = self.shared.state.lock().unwrap();
        while state.count <= last {
            state = self.shared.condvar.wait(state).unwrap();
        }
        state.count
    }
}
