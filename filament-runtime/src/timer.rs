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

use crate::driver::{current_event_driver, EventDriver, TimerCallback, TimerId};
use crate::error::TaskError;
use crate::scheduler::resume_waiting;
use crate::task::suspend;
use std::rc::Rc;
use std::time::Duration;

/// A timer owned by the event driver of the current thread.
pub struct Timer {
    driver: Rc<dyn EventDriver>,
    id: TimerId,
}

impl Timer {
    /// (Re)arms the timer to fire after `timeout`, optionally repeating with
    /// the same period.
    pub fn rearm(&self, timeout: Duration, periodic: bool) {
        self.driver.timer_rearm(self.id, timeout, periodic);
    }

    /// Disarms the timer. Tasks blocked in [`wait`](Self::wait) are resumed.
    pub fn stop(&self) {
        self.driver.timer_stop(self.id);
    }

    /// Whether the timer is armed.
    pub fn pending(&self) -> bool {
        self.driver.timer_pending(self.id)
    }

    /// Suspends the current task until the timer next fires or is stopped.
    pub async fn wait(&self) -> Result<(), TaskError> {
        let driver = self.driver.clone();
        let id = self.id;
        suspend(move |handle, epoch| {
            let waiter = driver.waiter_create(Box::new(move || {
                resume_waiting(&handle, epoch);
            }));
            driver.timer_wait(id, waiter);
            true
        })
        .await
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.driver.timer_release(self.id);
    }
}

/// Creates an unarmed timer; `callback` runs on each firing.
pub fn create_timer(callback: Option<TimerCallback>) -> Timer {
    let driver = current_event_driver();
    let id = driver.timer_create(callback);
    Timer { driver, id }
}

/// Creates and arms a timer in one step.
pub fn set_timer<F>(timeout: Duration, callback: F, periodic: bool) -> Timer
where
    F: Fn() + 'static,
{
    let timer = create_timer(Some(Rc::new(callback)));
    timer.rearm(timeout, periodic);
    timer
}

/// Suspends the current task for the given duration.
pub async fn sleep(timeout: Duration) -> Result<(), TaskError> {
    let timer = create_timer(None);
    timer.rearm(timeout, false);
    timer.wait().await
}
