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

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;

/// Tunables of the task runtime.
///
/// Applied through [`Runtime::with_config`](crate::Runtime::with_config)
/// before the first runtime operation; schedulers snapshot the configuration
/// when their thread first touches the runtime.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// How long the event loop must stay idle before the maintenance pass
    /// runs.
    #[serde(with = "humantime_serde")]
    pub maintenance_interval: Duration,
    /// Number of pooled fibers retained across maintenance passes.
    pub pool_low_water: usize,
    /// Number of worker threads started by `enable_worker_threads`.
    pub worker_threads: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            maintenance_interval: Duration::from_secs(2),
            pool_low_water: 16,
            worker_threads: num_cpus::get(),
        }
    }
}

lazy_static! {
    static ref GLOBAL_CONFIG: Mutex<RuntimeConfig> = Mutex::new(RuntimeConfig::default());
}

pub(crate) fn global() -> RuntimeConfig {
    GLOBAL_CONFIG.lock().unwrap().clone()
}

pub(crate) fn set_global(config: RuntimeConfig) {
    *GLOBAL_CONFIG.lock().unwrap() = config;
}
