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

use crate::error::TaskError;
use crate::scheduler::scheduler;
use futures::future::LocalBoxFuture;
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

/// Execution state of a fiber.
///
/// A fiber in `Term` is never resumed; `Hold` means suspended (or pooled,
/// when it has no body); `Exec` means its body is currently on the call
/// stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FiberState {
    Hold,
    Exec,
    Term,
}

/// Lifecycle events of a task, observable through
/// [`set_task_event_callback`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskEvent {
    /// A task body started executing.
    Start,
    /// A task body completed normally.
    End,
    /// A task body completed with an unhandled error or panic.
    Fail,
    /// A task voluntarily gave up control.
    Yield,
    /// A suspended task was resumed.
    Resume,
}

pub(crate) struct Fiber {
    pub(crate) id: u64,
    pub(crate) state: Cell<FiberState>,
    pub(crate) running: Cell<bool>,
    // incremented each time a new body is assigned; handles capture it
    pub(crate) run_count: Cell<u64>,
    // incremented when a suspension completes; stale resumes compare it
    pub(crate) wait_epoch: Cell<u64>,
    pub(crate) body: RefCell<Option<LocalBoxFuture<'static, anyhow::Result<()>>>>,
    pub(crate) joiners: RefCell<Vec<(TaskHandle, u64)>>,
    pub(crate) injected: RefCell<Option<TaskError>>,
    pub(crate) slots: RefCell<Vec<Option<Box<dyn Any>>>>,
    pub(crate) named: RefCell<HashMap<String, Box<dyn Any>>>,
}

impl Fiber {
    pub(crate) fn new(id: u64) -> Rc<Self> {
        Rc::new(Self {
            id,
            state: Cell::new(FiberState::Hold),
            running: Cell::new(false),
            run_count: Cell::new(0),
            wait_epoch: Cell::new(0),
            body: RefCell::new(None),
            joiners: RefCell::new(Vec::new()),
            injected: RefCell::new(None),
            slots: RefCell::new(Vec::new()),
            named: RefCell::new(HashMap::new()),
        })
    }

    pub(crate) fn reset_locals(&self) {
        self.slots.borrow_mut().clear();
        self.named.borrow_mut().clear();
    }
}

/// A reference to a task that stays valid across fiber reuse.
///
/// The handle captures the fiber's run counter at spawn time; once the task
/// body completes, the handle goes stale and `join`/`interrupt` become
/// no-ops, even if the fiber has been reused for another task since.
///
/// Handles are deliberately not `Send`: joining or interrupting a task from
/// another thread is a compile error.
#[derive(Clone)]
pub struct TaskHandle {
    pub(crate) fiber: Rc<Fiber>,
    pub(crate) run_count: u64,
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("fiber", &self.fiber.id)
            .field("run_count", &self.run_count)
            .finish()
    }
}

impl PartialEq for TaskHandle {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.fiber, &other.fiber) && self.run_count == other.run_count
    }
}

impl Eq for TaskHandle {}

impl TaskHandle {
    /// The id of the underlying fiber. Only unique together with
    /// [`run_count`](Self::run_count).
    pub fn id(&self) -> u64 {
        self.fiber.id
    }

    pub fn run_count(&self) -> u64 {
        self.run_count
    }

    /// Whether the task body this handle refers to has not yet completed.
    pub fn is_running(&self) -> bool {
        self.fiber.run_count.get() == self.run_count
            && (self.fiber.body.borrow().is_some() || self.fiber.state.get() == FiberState::Exec)
    }

    /// Suspends the caller until this task completes. See [`join`].
    pub async fn join(&self) -> Result<(), TaskError> {
        join(self).await
    }

    /// Schedules an [`TaskError::Interrupted`] for this task. See
    /// [`interrupt`].
    pub fn interrupt(&self) {
        interrupt(self)
    }
}

/// Starts a new task and resumes it synchronously: this returns only once
/// the body has completed or suspended for the first time.
///
/// An `Err` returned by the body (or a panic inside it) is logged and never
/// propagates past the task boundary.
pub fn run_task<F>(body: F) -> TaskHandle
where
    F: Future<Output = anyhow::Result<()>> + 'static,
{
    scheduler().spawn(Box::pin(body))
}

/// The task executing on the current thread, if any.
pub fn current_task() -> Option<TaskHandle> {
    scheduler().current()
}

/// Suspends the current task and schedules it to be resumed no later than
/// the next scheduler idle tick. Off-task this is a no-op.
pub async fn yield_now() -> Result<(), TaskError> {
    if current_task().is_none() {
        return Ok(());
    }
    suspend(|handle, epoch| {
        scheduler().enqueue_yielded(handle, epoch);
        true
    })
    .await
}

/// Suspends the current task without scheduling a resume. The task will not
/// run again unless something explicitly resumes it (an interrupt, or a
/// waiter registered before the suspension).
pub async fn raw_yield() -> Result<(), TaskError> {
    suspend(|_, _| true).await
}

/// Suspends the caller until the target task has completed its current body.
///
/// A stale handle (the target already completed) returns immediately.
/// Panics when a task joins itself.
pub async fn join(handle: &TaskHandle) -> Result<(), TaskError> {
    let target = handle.clone();
    suspend(move |current, epoch| {
        if !target.is_running() {
            return false;
        }
        assert!(
            !Rc::ptr_eq(&target.fiber, &current.fiber),
            "a task cannot join itself"
        );
        target.fiber.joiners.borrow_mut().push((current, epoch));
        true
    })
    .await
}

/// Schedules a [`TaskError::Interrupted`] to be delivered at the target
/// task's next resume, and resumes it immediately when it is suspended.
///
/// A stale handle is a no-op. Panics when a task interrupts itself.
pub fn interrupt(handle: &TaskHandle) {
    if !handle.is_running() {
        return;
    }
    if let Some(current) = current_task() {
        assert!(
            !Rc::ptr_eq(&current.fiber, &handle.fiber),
            "a task cannot interrupt itself"
        );
    }
    *handle.fiber.injected.borrow_mut() = Some(TaskError::Interrupted);
    if handle.fiber.state.get() == FiberState::Hold {
        scheduler().resume_task(handle, None, false);
    }
}

/// Installs a callback observing [`TaskEvent`]s on the current thread.
pub fn set_task_event_callback(callback: Option<Box<dyn FnMut(TaskEvent, &TaskHandle)>>) {
    scheduler().set_event_callback(callback);
}

/// The common suspension primitive.
///
/// `register` runs at the first poll with the current task's handle and wait
/// epoch; it records a resume path (yield queue, timer waiter, joiner list)
/// and returns whether the task should actually suspend. A pending injected
/// error is consumed before registering and delivered as `Err`.
pub(crate) fn suspend<F>(register: F) -> Suspend<F>
where
    F: FnOnce(TaskHandle, u64) -> bool + Unpin,
{
    Suspend {
        register: Some(register),
        suspended: false,
    }
}

pub(crate) struct Suspend<F> {
    register: Option<F>,
    suspended: bool,
}

impl<F> Future for Suspend<F>
where
    F: FnOnce(TaskHandle, u64) -> bool + Unpin,
{
    type Output = Result<(), TaskError>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let handle = current_task().expect("suspension point used outside of a task");
        let fiber = &handle.fiber;
        if !this.suspended {
            if let Some(err) = fiber.injected.borrow_mut().take() {
                return Poll::Ready(Err(err));
            }
            let epoch = fiber.wait_epoch.get();
            let register = this.register.take().expect("suspension polled after completion");
            if !register(handle.clone(), epoch) {
                return Poll::Ready(Ok(()));
            }
            this.suspended = true;
            Poll::Pending
        } else {
            this.suspended = false;
            fiber.wait_epoch.set(fiber.wait_epoch.get() + 1);
            match fiber.injected.borrow_mut().take() {
                Some(err) => Poll::Ready(Err(err)),
                None => Poll::Ready(Ok(())),
            }
        }
    }
}
