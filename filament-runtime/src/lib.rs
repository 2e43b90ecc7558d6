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

//! Cooperative task runtime.
//!
//! Lightweight tasks are multiplexed onto one scheduler per OS thread; a
//! task runs until it voluntarily suspends (`yield_now`, `sleep`, a timer or
//! event wait, `join`) and tasks never migrate between threads. Worker
//! threads run independent event loops and pull submitted bodies from a
//! shared queue and per-worker queues.

pub mod config;
pub mod driver;
pub mod error;
pub mod local;
pub mod process;
pub mod scheduler;
pub mod task;
pub mod timer;
pub mod workers;

pub use config::RuntimeConfig;
pub use driver::{
    set_event_driver_factory, EventDriver, LoopExit, ManualEvent, RemoteWakeup, TimerCallback,
};
pub use error::{DriverError, TaskError};
pub use local::{get_task_local, is_task_local_set, set_task_local, TaskLocal};
pub use process::{
    lower_privileges, run_application, setup_signal_handlers, shutdown_requested, RuntimeArgs,
};
pub use scheduler::{
    block_on, exit_event_loop, process_events, run_event_loop, run_event_loop_once,
    set_idle_handler,
};
pub use task::{
    current_task, interrupt, join, raw_yield, run_task, set_task_event_callback, yield_now,
    TaskEvent, TaskHandle,
};
pub use timer::{create_timer, set_timer, sleep, Timer};
pub use workers::{
    enable_worker_threads, run_worker_task, run_worker_task_dist, shutdown_worker_threads,
};

#[cfg(test)]
test_r::enable!();

use std::future::Future;

/// Owner of the runtime's process-wide configuration.
///
/// The scheduler, worker registry and driver slots are per-thread or
/// process-wide state; `Runtime` is the explicit value that configures them
/// at startup instead of spreading configuration across ambient globals.
pub struct Runtime {
    config: RuntimeConfig,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Installs `config` for all schedulers created after this call.
    pub fn with_config(config: RuntimeConfig) -> Self {
        config::set_global(config.clone());
        Self { config }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Runs the event loop of the current thread to completion.
    pub fn run(&self) -> i32 {
        scheduler::run_event_loop()
    }

    /// Runs `future` as a task, driving the event loop until it completes.
    pub fn block_on<F, T>(&self, future: F) -> anyhow::Result<T>
    where
        F: Future<Output = T> + 'static,
        T: 'static,
    {
        scheduler::block_on(future)
    }

    pub fn enable_worker_threads(&self) {
        workers::enable_worker_threads()
    }
}
