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

use crate::driver::ManualEvent;
use crate::task::run_task;
use futures::future::LocalBoxFuture;
use futures::FutureExt;
use lazy_static::lazy_static;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle, ThreadId};
use tracing::{debug, warn};

/// A submitted body: a `Send` closure producing the (thread-local) task
/// future on the worker thread that picked it up. The `Send` bound is what
/// makes cross-thread submission safe; nothing else is shared with the
/// submitter.
type WorkerBody = Box<dyn FnOnce() -> LocalBoxFuture<'static, anyhow::Result<()>> + Send>;

#[derive(Default)]
struct WorkerContext {
    queue: VecDeque<WorkerBody>,
    exit: bool,
}

struct WorkerPool {
    contexts: HashMap<ThreadId, WorkerContext>,
    shared: VecDeque<WorkerBody>,
    signal: ManualEvent,
    handles: Vec<JoinHandle<()>>,
}

lazy_static! {
    static ref WORKER_POOL: Mutex<Option<WorkerPool>> = Mutex::new(None);
}

/// Starts the worker threads (one per logical CPU by default). Idempotent;
/// must be called before tasks are submitted with [`run_worker_task`] for
/// them to run off the current thread.
pub fn enable_worker_threads() {
    let count = crate::config::global().worker_threads.max(1);
    {
        let mut guard = WORKER_POOL.lock().unwrap();
        if guard.is_some() {
            return;
        }
        *guard = Some(WorkerPool {
            contexts: HashMap::new(),
            shared: VecDeque::new(),
            signal: ManualEvent::new(),
            handles: Vec::new(),
        });
    }
    for index in 0..count {
        let handle = thread::Builder::new()
            .name(format!("flmt-worker-{index}"))
            .spawn(worker_main)
            .expect("failed to spawn worker thread");
        if let Some(pool) = WORKER_POOL.lock().unwrap().as_mut() {
            pool.handles.push(handle);
        }
    }
    debug!(count, "worker threads enabled");
}

/// Submits a body to the shared queue; some worker executes it exactly once.
/// Falls back to a task on the current thread when workers are not enabled.
pub fn run_worker_task<F, Fut>(body: F)
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + 'static,
{
    let job: WorkerBody = Box::new(move || body().boxed_local());
    let mut guard = WORKER_POOL.lock().unwrap();
    if let Some(pool) = guard.as_mut() {
        pool.shared.push_back(job);
        let signal = pool.signal.clone();
        drop(guard);
        signal.emit();
    } else {
        drop(guard);
        run_task(job());
    }
}

/// Submits a copy of the body to every worker's private queue; each worker
/// executes it exactly once. Falls back to a single task on the current
/// thread when workers are not enabled.
pub fn run_worker_task_dist<F, Fut>(body: F)
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + 'static,
{
    let body = Arc::new(body);
    let mut guard = WORKER_POOL.lock().unwrap();
    if let Some(pool) = guard.as_mut() {
        for context in pool.contexts.values_mut() {
            let body = body.clone();
            context
                .queue
                .push_back(Box::new(move || (*body)().boxed_local()));
        }
        let signal = pool.signal.clone();
        drop(guard);
        signal.emit();
    } else {
        drop(guard);
        run_task((*body)());
    }
}

/// Signals all workers to exit and waits until every one has deregistered,
/// then joins the threads. A no-op when workers were never enabled.
pub fn shutdown_worker_threads() {
    let signal = {
        let mut guard = WORKER_POOL.lock().unwrap();
        let Some(pool) = guard.as_mut() else {
            return;
        };
        if pool.contexts.contains_key(&thread::current().id()) {
            warn!("shutdown_worker_threads called from a worker thread; ignoring");
            return;
        }
        for context in pool.contexts.values_mut() {
            context.exit = true;
        }
        pool.signal.clone()
    };
    signal.emit();
    loop {
        let last = signal.emit_count();
        let empty = WORKER_POOL
            .lock()
            .unwrap()
            .as_ref()
            .map(|pool| pool.contexts.is_empty())
            .unwrap_or(true);
        if empty {
            break;
        }
        signal.wait_blocking(last);
    }
    let handles = WORKER_POOL
        .lock()
        .unwrap()
        .take()
        .map(|pool| pool.handles)
        .unwrap_or_default();
    for handle in handles {
        let _ = handle.join();
    }
    debug!("worker threads stopped");
}

fn worker_main() {
    let signal = {
        let mut guard = WORKER_POOL.lock().unwrap();
        let Some(pool) = guard.as_mut() else {
            return;
        };
        pool.contexts
            .insert(thread::current().id(), WorkerContext::default());
        pool.signal.clone()
    };
    run_task(worker_dispatch(signal));
    let _ = crate::scheduler::run_event_loop();
}

enum Dispatch {
    Job(WorkerBody),
    Empty,
    Exit(usize),
}

/// The single dispatch task of a worker thread: drains the private queue
/// first, then the shared queue, and sleeps on the worker signal when both
/// are empty.
async fn worker_dispatch(signal: ManualEvent) -> anyhow::Result<()> {
    let me = thread::current().id();
    loop {
        let last = signal.emit_count();
        let next = {
            let mut guard = WORKER_POOL.lock().unwrap();
            match guard.as_mut() {
                None => Dispatch::Exit(0),
                Some(pool) => match pool.contexts.get(&me).map(|context| context.exit) {
                    None => Dispatch::Exit(0),
                    Some(true) => {
                        let context = pool.contexts.remove(&me).unwrap();
                        Dispatch::Exit(context.queue.len() + pool.shared.len())
                    }
                    Some(false) => {
                        let mut job =
                            pool.contexts.get_mut(&me).unwrap().queue.pop_front();
                        if job.is_none() {
                            job = pool.shared.pop_front();
                        }
                        match job {
                            Some(job) => Dispatch::Job(job),
                            None => Dispatch::Empty,
                        }
                    }
                },
            }
        };
        match next {
            Dispatch::Job(job) => {
                run_task(job());
            }
            Dispatch::Empty => {
                signal.wait(last).await?;
            }
            Dispatch::Exit(pending) => {
                if pending > 0 {
                    warn!(pending, "worker thread exiting with queued tasks");
                }
                crate::scheduler::exit_event_loop(false);
                signal.emit();
                return Ok(());
            }
        }
    }
}
