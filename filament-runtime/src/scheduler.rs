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

use crate::config::RuntimeConfig;
use crate::driver::{EventDriver, LoopExit, TimerId};
use crate::error::{DriverError, TaskError};
use crate::task::{run_task, Fiber, FiberState, TaskEvent, TaskHandle};
use futures::future::LocalBoxFuture;
use futures::task::noop_waker_ref;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;
use std::task::{Context, Poll};
use tracing::{error, trace};

pub(crate) struct Scheduler {
    driver: Rc<dyn EventDriver>,
    config: RuntimeConfig,
    yielded: RefCell<VecDeque<(TaskHandle, u64)>>,
    resume_stack: RefCell<Vec<TaskHandle>>,
    pool: RefCell<Vec<Rc<Fiber>>>,
    idle_handler: RefCell<Option<Box<dyn FnMut() -> bool>>>,
    event_callback: RefCell<Option<Box<dyn FnMut(TaskEvent, &TaskHandle)>>>,
    exit_requested: Cell<bool>,
    running: Cell<bool>,
    next_fiber_id: Cell<u64>,
    maintenance_timer: Cell<Option<TimerId>>,
    suppress_rearm: Cell<bool>,
}

thread_local! {
    static SCHEDULER: RefCell<Option<Rc<Scheduler>>> = const { RefCell::new(None) };
}

/// The scheduler of the current thread, created on first use together with
/// its event driver.
pub(crate) fn scheduler() -> Rc<Scheduler> {
    SCHEDULER.with(|slot| {
        let existing = slot.borrow().clone();
        match existing {
            Some(scheduler) => scheduler,
            None => {
                let scheduler = Rc::new(Scheduler::new(
                    crate::driver::new_event_driver(),
                    crate::config::global(),
                ));
                *slot.borrow_mut() = Some(scheduler.clone());
                scheduler.install();
                scheduler
            }
        }
    })
}

impl Scheduler {
    fn new(driver: Rc<dyn EventDriver>, config: RuntimeConfig) -> Self {
        Self {
            driver,
            config,
            yielded: RefCell::new(VecDeque::new()),
            resume_stack: RefCell::new(Vec::new()),
            pool: RefCell::new(Vec::new()),
            idle_handler: RefCell::new(None),
            event_callback: RefCell::new(None),
            exit_requested: Cell::new(false),
            running: Cell::new(false),
            next_fiber_id: Cell::new(0),
            maintenance_timer: Cell::new(None),
            suppress_rearm: Cell::new(false),
        }
    }

    /// Registers the idle callback and the maintenance timer with the
    /// driver. Called once, right after the scheduler is stored in its
    /// thread-local slot.
    fn install(self: &Rc<Self>) {
        let weak = Rc::downgrade(self);
        self.driver.set_idle_callback(Some(Box::new(move || {
            match weak.upgrade() {
                Some(scheduler) => scheduler.notify_idle(),
                None => true,
            }
        })));
        let weak = Rc::downgrade(self);
        let timer = self.driver.timer_create(Some(Rc::new(move || {
            if let Some(scheduler) = weak.upgrade() {
                scheduler.on_maintenance();
            }
        })));
        self.driver.timer_set_keep_alive(timer, false);
        self.driver
            .timer_rearm(timer, self.config.maintenance_interval, false);
        self.maintenance_timer.set(Some(timer));
    }

    pub(crate) fn driver(&self) -> Rc<dyn EventDriver> {
        self.driver.clone()
    }

    pub(crate) fn current(&self) -> Option<TaskHandle> {
        self.resume_stack.borrow().last().cloned()
    }

    pub(crate) fn set_event_callback(
        &self,
        callback: Option<Box<dyn FnMut(TaskEvent, &TaskHandle)>>,
    ) {
        *self.event_callback.borrow_mut() = callback;
    }

    pub(crate) fn set_idle_handler(&self, handler: Option<Box<dyn FnMut() -> bool>>) {
        *self.idle_handler.borrow_mut() = handler;
    }

    pub(crate) fn enqueue_yielded(&self, handle: TaskHandle, epoch: u64) {
        self.yielded.borrow_mut().push_back((handle, epoch));
    }

    fn emit_event(&self, event: TaskEvent, handle: &TaskHandle) {
        trace!(task = handle.id(), run = handle.run_count(), ?event, "task event");
        let callback = self.event_callback.borrow_mut().take();
        if let Some(mut callback) = callback {
            callback(event, handle);
            let mut slot = self.event_callback.borrow_mut();
            if slot.is_none() {
                *slot = Some(callback);
            }
        }
    }

    fn reserve_fiber(&self) -> Rc<Fiber> {
        if let Some(fiber) = self.pool.borrow_mut().pop() {
            debug_assert_eq!(fiber.state.get(), FiberState::Hold);
            debug_assert!(fiber.body.borrow().is_none());
            return fiber;
        }
        let id = self.next_fiber_id.get();
        self.next_fiber_id.set(id + 1);
        Fiber::new(id)
    }

    /// Assigns a body to a fiber and resumes it synchronously; returns once
    /// the body completed or suspended for the first time.
    pub(crate) fn spawn(
        &self,
        body: LocalBoxFuture<'static, anyhow::Result<()>>,
    ) -> TaskHandle {
        let fiber = self.reserve_fiber();
        fiber.run_count.set(fiber.run_count.get() + 1);
        *fiber.body.borrow_mut() = Some(body);
        let handle = TaskHandle {
            run_count: fiber.run_count.get(),
            fiber,
        };
        self.resume_task(&handle, None, true);
        handle
    }

    /// Performs one coroutine call on the target task.
    ///
    /// The target must be suspended. After the call the task is either
    /// suspended again or has completed and was returned to the pool; an
    /// unhandled body error never propagates to the caller.
    pub(crate) fn resume_task(
        &self,
        handle: &TaskHandle,
        injected: Option<TaskError>,
        initial: bool,
    ) {
        let fiber = handle.fiber.clone();
        if fiber.run_count.get() != handle.run_count {
            return;
        }
        assert_eq!(
            fiber.state.get(),
            FiberState::Hold,
            "a resumed task must be suspended"
        );
        if let Some(err) = injected {
            *fiber.injected.borrow_mut() = Some(err);
        }
        let Some(mut body) = fiber.body.borrow_mut().take() else {
            return;
        };
        if initial {
            fiber.running.set(true);
            self.emit_event(TaskEvent::Start, handle);
        } else {
            self.emit_event(TaskEvent::Resume, handle);
        }
        fiber.state.set(FiberState::Exec);
        self.resume_stack.borrow_mut().push(handle.clone());
        let mut cx = Context::from_waker(noop_waker_ref());
        let poll = catch_unwind(AssertUnwindSafe(|| body.as_mut().poll(&mut cx)));
        self.resume_stack.borrow_mut().pop();
        match poll {
            Ok(Poll::Pending) => {
                fiber.state.set(FiberState::Hold);
                *fiber.body.borrow_mut() = Some(body);
                self.emit_event(TaskEvent::Yield, handle);
            }
            Ok(Poll::Ready(Ok(()))) => self.finish_task(handle, None),
            Ok(Poll::Ready(Err(err))) => self.finish_task(handle, Some(err)),
            Err(panic) => self.finish_task(
                handle,
                Some(anyhow::anyhow!("task body panicked: {}", panic_message(&panic))),
            ),
        }
    }

    /// Resumes a suspended task if the handle and wait epoch are still
    /// current. Returns whether the task was resumed.
    pub(crate) fn resume_if_waiting(&self, handle: &TaskHandle, epoch: u64) -> bool {
        let fiber = &handle.fiber;
        if fiber.run_count.get() != handle.run_count
            || fiber.wait_epoch.get() != epoch
            || fiber.state.get() != FiberState::Hold
            || fiber.body.borrow().is_none()
        {
            return false;
        }
        self.resume_task(handle, None, false);
        true
    }

    fn finish_task(&self, handle: &TaskHandle, failure: Option<anyhow::Error>) {
        let fiber = &handle.fiber;
        fiber.state.set(FiberState::Term);
        fiber.running.set(false);
        fiber.injected.borrow_mut().take();
        match failure {
            None => self.emit_event(TaskEvent::End, handle),
            Some(err) => {
                error!(
                    task = handle.id(),
                    error = %format!("{err:#}"),
                    "task terminated with an unhandled error"
                );
                self.emit_event(TaskEvent::Fail, handle);
            }
        }
        fiber.reset_locals();
        let joiners = std::mem::take(&mut *fiber.joiners.borrow_mut());
        self.yielded.borrow_mut().extend(joiners);
        fiber.wait_epoch.set(fiber.wait_epoch.get() + 1);
        fiber.state.set(FiberState::Hold);
        self.pool.borrow_mut().push(fiber.clone());
    }

    fn run_idle_handler(&self) -> bool {
        let handler = self.idle_handler.borrow_mut().take();
        match handler {
            Some(mut handler) => {
                let more = handler();
                let mut slot = self.idle_handler.borrow_mut();
                if slot.is_none() {
                    *slot = Some(handler);
                }
                more
            }
            None => false,
        }
    }

    fn drain_yielded(&self) -> usize {
        let pending = self.yielded.borrow().len();
        let mut resumed = 0;
        for _ in 0..pending {
            let Some((handle, epoch)) = self.yielded.borrow_mut().pop_front() else {
                break;
            };
            if self.resume_if_waiting(&handle, epoch) {
                resumed += 1;
            }
        }
        resumed
    }

    /// The idle tick, registered as the driver's idle callback.
    ///
    /// Drains the yielded-task queue until quiescent, then lets the driver
    /// process pending events; a `false` return means exit was requested.
    pub(crate) fn notify_idle(&self) -> bool {
        loop {
            if crate::process::shutdown_requested() {
                self.exit_requested.set(true);
            }
            if self.exit_requested.get() {
                break;
            }
            let handler_wants_more = self.run_idle_handler();
            if self.drain_yielded() > 0 {
                continue;
            }
            if !self.driver.process_events() {
                self.exit_requested.set(true);
                break;
            }
            if !handler_wants_more {
                break;
            }
        }
        if self.exit_requested.get() {
            false
        } else {
            self.rearm_maintenance();
            true
        }
    }

    /// Rearms the maintenance timer for one interval past the current idle
    /// tick, unless the previous firing suppressed exactly this rearm.
    fn rearm_maintenance(&self) {
        if self.suppress_rearm.replace(false) {
            return;
        }
        if let Some(timer) = self.maintenance_timer.get() {
            self.driver
                .timer_rearm(timer, self.config.maintenance_interval, false);
        }
    }

    /// Opportunistic housekeeping, run when the loop has been idle for one
    /// full maintenance interval: trims the fiber pool to its low-water
    /// mark. Suppresses the rearm of the next idle tick so the firing does
    /// not immediately re-schedule itself.
    fn on_maintenance(&self) {
        let trimmed = {
            let mut pool = self.pool.borrow_mut();
            let before = pool.len();
            pool.truncate(self.config.pool_low_water);
            pool.shrink_to_fit();
            before - pool.len()
        };
        if trimmed > 0 {
            trace!(trimmed, "idle maintenance trimmed the fiber pool");
        }
        self.suppress_rearm.set(true);
    }

    #[cfg(test)]
    pub(crate) fn pooled_fibers(&self) -> usize {
        self.pool.borrow().len()
    }

    pub(crate) fn run(&self) -> i32 {
        self.running.set(true);
        let code = if !self.notify_idle() {
            0
        } else {
            match self.driver.run() {
                Ok(_) => 0,
                Err(err) => {
                    error!(error = %err, "event loop failed");
                    1
                }
            }
        };
        self.running.set(false);
        self.exit_requested.set(false);
        code
    }

    pub(crate) fn exit(&self, shutdown_workers: bool) {
        if shutdown_workers {
            crate::workers::shutdown_worker_threads();
        }
        self.exit_requested.set(true);
        self.driver.exit();
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Resumes a task waiting on an external event if its handle and wait epoch
/// are still current. Used by resume callbacks registered with the driver.
pub(crate) fn resume_waiting(handle: &TaskHandle, epoch: u64) {
    scheduler().resume_if_waiting(handle, epoch);
}

/// Runs the event loop of the current thread until `exit_event_loop` is
/// called or no events remain. Returns 0 on clean exit and 1 on a driver
/// error.
pub fn run_event_loop() -> i32 {
    scheduler().run()
}

/// Runs a single blocking event-loop iteration.
pub fn run_event_loop_once() -> Result<LoopExit, DriverError> {
    scheduler().driver().run_once()
}

/// Non-blocking drain of pending events; `false` iff exit was requested.
pub fn process_events() -> bool {
    scheduler().driver().process_events()
}

/// Requests the event loop of the current thread to exit. With
/// `shutdown_workers`, worker threads are signalled and waited for first.
pub fn exit_event_loop(shutdown_workers: bool) {
    scheduler().exit(shutdown_workers)
}

/// Installs the user idle handler, invoked at the start of every idle tick.
/// Returning `true` asks to be called again on the same tick.
pub fn set_idle_handler(handler: Option<Box<dyn FnMut() -> bool>>) {
    scheduler().set_idle_handler(handler)
}

/// Runs `future` as a task and drives the event loop until it completes.
///
/// This is the entry point for code that is not yet on the event loop; it
/// fails when the loop runs out of events while the task is still pending.
pub fn block_on<F, T>(future: F) -> anyhow::Result<T>
where
    F: Future<Output = T> + 'static,
    T: 'static,
{
    let result: Rc<RefCell<Option<T>>> = Rc::new(RefCell::new(None));
    let slot = result.clone();
    let handle = run_task(async move {
        let value = future.await;
        *slot.borrow_mut() = Some(value);
        Ok(())
    });
    loop {
        if result.borrow().is_some() || !handle.is_running() {
            break;
        }
        match run_event_loop_once() {
            Ok(LoopExit::Idle) => {}
            Ok(LoopExit::Exited) => break,
            Ok(LoopExit::OutOfWaiters) => {
                if result.borrow().is_none() {
                    anyhow::bail!("no events registered: the task can never be resumed");
                }
                break;
            }
            Err(err) => return Err(err.into()),
        }
    }
    let value = result.borrow_mut().take();
    value.ok_or_else(|| anyhow::anyhow!("task exited before producing a result"))
}
