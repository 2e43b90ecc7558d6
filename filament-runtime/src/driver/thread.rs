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

use crate::driver::{EventDriver, LoopExit, RemoteWakeup, TimerCallback, TimerId, WaiterId};
use crate::error::DriverError;
use crate::process;
use std::cell::{Cell, RefCell};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};
use tracing::trace;

/// Upper bound on one park interval while signal handlers are installed, so
/// a shutdown flag set from a signal handler is observed promptly.
const SIGNAL_PARK_CAP: Duration = Duration::from_millis(500);

struct TimerState {
    deadline: Option<Instant>,
    period: Option<Duration>,
    // invalidates stale heap entries after rearm/stop
    generation: u64,
    keep_alive: bool,
    callback: Option<TimerCallback>,
    waiters: Vec<WaiterId>,
}

#[derive(Default)]
struct DriverLocal {
    timers: HashMap<TimerId, TimerState>,
    deadlines: BinaryHeap<Reverse<(Instant, TimerId, u64)>>,
    waiters: HashMap<WaiterId, Box<dyn FnOnce()>>,
    next_timer: TimerId,
    next_waiter: WaiterId,
    armed_keep_alive: usize,
}

#[derive(Default)]
struct PostQueue {
    posted: Vec<WaiterId>,
    notified: bool,
}

#[derive(Default)]
struct DriverShared {
    queue: Mutex<PostQueue>,
    condvar: Condvar,
}

impl DriverShared {
    fn post(&self, id: WaiterId) {
        let mut queue = self.queue.lock().unwrap();
        queue.posted.push(id);
        queue.notified = true;
        drop(queue);
        self.condvar.notify_one();
    }
}

/// Built-in event driver: a timer heap plus a condvar-parked loop with a
/// cross-thread post queue for remote wakeups. One instance per thread.
pub struct ThreadEventDriver {
    local: RefCell<DriverLocal>,
    idle: RefCell<Option<Box<dyn FnMut() -> bool>>>,
    exit_requested: Cell<bool>,
    running: Cell<bool>,
    shared: Arc<DriverShared>,
}

impl Default for ThreadEventDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadEventDriver {
    pub fn new() -> Self {
        Self {
            local: RefCell::new(DriverLocal::default()),
            idle: RefCell::new(None),
            exit_requested: Cell::new(false),
            running: Cell::new(false),
            shared: Arc::new(DriverShared::default()),
        }
    }

    /// Fires all due timers; returns whether any fired.
    fn fire_due_timers(&self) -> bool {
        let now = Instant::now();
        let mut fired = Vec::new();
        {
            let mut guard = self.local.borrow_mut();
            let local = &mut *guard;
            while let Some(&Reverse((deadline, id, generation))) = local.deadlines.peek() {
                if deadline > now {
                    break;
                }
                local.deadlines.pop();
                let Some(timer) = local.timers.get_mut(&id) else {
                    continue;
                };
                if timer.generation != generation || timer.deadline != Some(deadline) {
                    continue;
                }
                let callback = timer.callback.clone();
                let waiters = std::mem::take(&mut timer.waiters);
                let mut rearmed = None;
                let mut disarmed_keep_alive = false;
                match timer.period {
                    Some(period) => {
                        let next = deadline + period;
                        timer.deadline = Some(next);
                        timer.generation += 1;
                        rearmed = Some((next, timer.generation));
                    }
                    None => {
                        timer.deadline = None;
                        disarmed_keep_alive = timer.keep_alive;
                    }
                }
                if let Some((next, generation)) = rearmed {
                    local.deadlines.push(Reverse((next, id, generation)));
                }
                if disarmed_keep_alive {
                    local.armed_keep_alive -= 1;
                }
                fired.push((callback, waiters));
            }
        }
        let any = !fired.is_empty();
        for (callback, waiters) in fired {
            if let Some(callback) = callback {
                callback();
            }
            for waiter in waiters {
                self.run_waiter(waiter);
            }
        }
        any
    }

    fn run_waiter(&self, id: WaiterId) {
        let resume = self.local.borrow_mut().waiters.remove(&id);
        if let Some(resume) = resume {
            resume();
        }
    }

    fn drain_posted(&self) -> bool {
        let posted = std::mem::take(&mut self.shared.queue.lock().unwrap().posted);
        let any = !posted.is_empty();
        for id in posted {
            self.run_waiter(id);
        }
        any
    }

    /// Runs the scheduler idle callback; `false` means exit was requested.
    fn run_idle(&self) -> bool {
        let idle = self.idle.borrow_mut().take();
        match idle {
            Some(mut callback) => {
                let keep_running = callback();
                // the callback slot may have been replaced during the call
                let mut slot = self.idle.borrow_mut();
                if slot.is_none() {
                    *slot = Some(callback);
                }
                keep_running
            }
            None => true,
        }
    }

    fn out_of_waiters(&self) -> bool {
        let local = self.local.borrow();
        local.armed_keep_alive == 0 && local.waiters.is_empty()
    }

    fn next_deadline(&self) -> Option<Instant> {
        let local = self.local.borrow();
        local
            .deadlines
            .peek()
            .map(|&Reverse((deadline, _, _))| deadline)
    }

    fn park(&self) {
        let deadline = self.next_deadline();
        let mut timeout = deadline.map(|d| d.saturating_duration_since(Instant::now()));
        if process::signal_handlers_installed() {
            timeout = Some(match timeout {
                Some(t) => t.min(SIGNAL_PARK_CAP),
                None => SIGNAL_PARK_CAP,
            });
        }
        let mut queue = self.shared.queue.lock().unwrap();
        if queue.notified || !queue.posted.is_empty() {
            queue.notified = false;
            return;
        }
        let mut queue = match timeout {
            Some(timeout) => self.shared.condvar.wait_timeout(queue, timeout).unwrap().0,
            None => self.shared.condvar.wait(queue).unwrap(),
        };
        queue.notified = false;
    }

    fn observe_shutdown(&self) {
        if process::shutdown_requested() {
            self.exit_requested.set(true);
        }
    }

    /// One loop iteration: process, idle, optionally park, process again.
    fn cycle(&self, blocking: bool) -> Result<LoopExit, DriverError> {
        self.observe_shutdown();
        if self.exit_requested.get() {
            return Ok(LoopExit::Exited);
        }
        let mut progress = self.fire_due_timers();
        progress |= self.drain_posted();
        if !self.run_idle() || self.exit_requested.get() {
            return Ok(LoopExit::Exited);
        }
        if progress {
            return Ok(LoopExit::Idle);
        }
        if self.out_of_waiters() {
            return Ok(LoopExit::OutOfWaiters);
        }
        if !blocking {
            return Ok(LoopExit::Idle);
        }
        self.park();
        self.observe_shutdown();
        if self.exit_requested.get() {
            return Ok(LoopExit::Exited);
        }
        self.fire_due_timers();
        self.drain_posted();
        if !self.run_idle() || self.exit_requested.get() {
            return Ok(LoopExit::Exited);
        }
        Ok(LoopExit::Idle)
    }
}

impl EventDriver for ThreadEventDriver {
    fn run(&self) -> Result<LoopExit, DriverError> {
        if self.running.replace(true) {
            return Err(DriverError::AlreadyRunning);
        }
        let result = loop {
            match self.cycle(true) {
                Ok(LoopExit::Idle) => continue,
                other => break other,
            }
        };
        self.running.set(false);
        self.exit_requested.set(false);
        result
    }

    fn run_once(&self) -> Result<LoopExit, DriverError> {
        let result = self.cycle(true);
        if matches!(result, Ok(LoopExit::Exited)) {
            self.exit_requested.set(false);
        }
        result
    }

    fn process_events(&self) -> bool {
        self.observe_shutdown();
        self.fire_due_timers();
        self.drain_posted();
        !self.exit_requested.get()
    }

    fn exit(&self) {
        trace!("event loop exit requested");
        self.exit_requested.set(true);
        self.shared.post(WaiterId::MAX); // unpark; the id is never registered
    }

    fn set_idle_callback(&self, callback: Option<Box<dyn FnMut() -> bool>>) {
        *self.idle.borrow_mut() = callback;
    }

    fn timer_create(&self, callback: Option<TimerCallback>) -> TimerId {
        let mut local = self.local.borrow_mut();
        let id = local.next_timer;
        local.next_timer += 1;
        local.timers.insert(
            id,
            TimerState {
                deadline: None,
                period: None,
                generation: 0,
                keep_alive: true,
                callback,
                waiters: Vec::new(),
            },
        );
        id
    }

    fn timer_rearm(&self, id: TimerId, timeout: Duration, periodic: bool) {
        let mut guard = self.local.borrow_mut();
        let local = &mut *guard;
        let Some(timer) = local.timers.get_mut(&id) else {
            return;
        };
        let newly_armed = timer.deadline.is_none() && timer.keep_alive;
        timer.generation += 1;
        let deadline = Instant::now() + timeout;
        timer.deadline = Some(deadline);
        timer.period = periodic.then_some(timeout);
        let generation = timer.generation;
        local.deadlines.push(Reverse((deadline, id, generation)));
        if newly_armed {
            local.armed_keep_alive += 1;
        }
    }

    fn timer_stop(&self, id: TimerId) {
        let waiters = {
            let mut guard = self.local.borrow_mut();
            let local = &mut *guard;
            let Some(timer) = local.timers.get_mut(&id) else {
                return;
            };
            if timer.deadline.take().is_none() {
                return;
            }
            timer.generation += 1;
            timer.period = None;
            let keep_alive = timer.keep_alive;
            let waiters = std::mem::take(&mut timer.waiters);
            if keep_alive {
                local.armed_keep_alive -= 1;
            }
            waiters
        };
        for waiter in waiters {
            self.run_waiter(waiter);
        }
    }

    fn timer_pending(&self, id: TimerId) -> bool {
        self.local
            .borrow()
            .timers
            .get(&id)
            .is_some_and(|t| t.deadline.is_some())
    }

    fn timer_set_keep_alive(&self, id: TimerId, keep_alive: bool) {
        let mut guard = self.local.borrow_mut();
        let local = &mut *guard;
        let Some(timer) = local.timers.get_mut(&id) else {
            return;
        };
        if timer.keep_alive == keep_alive {
            return;
        }
        let armed = timer.deadline.is_some();
        timer.keep_alive = keep_alive;
        if armed {
            if keep_alive {
                local.armed_keep_alive += 1;
            } else {
                local.armed_keep_alive -= 1;
            }
        }
    }

    fn timer_wait(&self, id: TimerId, waiter: WaiterId) {
        let mut guard = self.local.borrow_mut();
        let local = &mut *guard;
        if local.timers.contains_key(&id) {
            local.timers.get_mut(&id).unwrap().waiters.push(waiter);
        } else {
            local.waiters.remove(&waiter);
        }
    }

    fn timer_release(&self, id: TimerId) {
        let mut guard = self.local.borrow_mut();
        let local = &mut *guard;
        if let Some(timer) = local.timers.remove(&id) {
            if timer.deadline.is_some() && timer.keep_alive {
                local.armed_keep_alive -= 1;
            }
            for waiter in timer.waiters {
                local.waiters.remove(&waiter);
            }
        }
    }

    fn waiter_create(&self, resume: Box<dyn FnOnce()>) -> WaiterId {
        let mut local = self.local.borrow_mut();
        let id = local.next_waiter;
        local.next_waiter += 1;
        local.waiters.insert(id, resume);
        id
    }

    fn waiter_cancel(&self, id: WaiterId) {
        self.local.borrow_mut().waiters.remove(&id);
    }

    fn remote(&self) -> RemoteWakeup {
        let shared = self.shared.clone();
        RemoteWakeup::new(Arc::new(move |id| shared.post(id)))
    }
}
