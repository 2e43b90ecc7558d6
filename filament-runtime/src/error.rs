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

/// Error delivered to a suspended task when it is resumed.
///
/// Suspension points (`yield_now`, `sleep`, `Timer::wait`, `ManualEvent::wait`,
/// `join`) return `Err` when the task was resumed exceptionally instead of by
/// the event it was waiting for.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    /// The task was interrupted via `TaskHandle::interrupt`.
    #[error("task was interrupted")]
    Interrupted,
    /// The event driver failed while the task was blocked on it.
    #[error("event driver failure: {0}")]
    Resume(String),
}

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("event loop is already running on this thread")]
    AlreadyRunning,
    #[error("event driver failure: {0}")]
    Internal(String),
}
