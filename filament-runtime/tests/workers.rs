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

use filament_runtime::{
    enable_worker_threads, run_worker_task, run_worker_task_dist, shutdown_worker_threads,
    Runtime, RuntimeConfig,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::ThreadId;
use std::time::Duration;
use test_r::test;

test_r::enable!();

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    panic!("condition not reached within 5s");
}

// the worker registry is process-wide, so the whole lifecycle is exercised
// by a single test
#[test]
fn worker_pool_lifecycle() {
    init_tracing();
    let _runtime = Runtime::with_config(RuntimeConfig {
        worker_threads: 3,
        ..RuntimeConfig::default()
    });
    enable_worker_threads();

    // a distributed body runs on every worker exactly once
    let dist_threads: Arc<Mutex<Vec<ThreadId>>> = Arc::new(Mutex::new(Vec::new()));
    let recorded = dist_threads.clone();
    run_worker_task_dist(move || {
        let recorded = recorded.clone();
        async move {
            recorded.lock().unwrap().push(std::thread::current().id());
            Ok(())
        }
    });
    wait_until(|| dist_threads.lock().unwrap().len() == 3);
    {
        let threads = dist_threads.lock().unwrap();
        let distinct: HashSet<ThreadId> = threads.iter().copied().collect();
        assert_eq!(distinct.len(), 3, "each worker runs the body once");
    }

    // a shared-queue body runs on some worker, not the submitter
    let executions = Arc::new(AtomicUsize::new(0));
    let submitter = std::thread::current().id();
    let shared_thread: Arc<Mutex<Option<ThreadId>>> = Arc::new(Mutex::new(None));
    for _ in 0..5 {
        let executions = executions.clone();
        let shared_thread = shared_thread.clone();
        run_worker_task(move || async move {
            *shared_thread.lock().unwrap() = Some(std::thread::current().id());
            executions.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
    }
    wait_until(|| executions.load(Ordering::SeqCst) == 5);
    assert_ne!(shared_thread.lock().unwrap().unwrap(), submitter);

    shutdown_worker_threads();

    // without workers both entry points fall back to a local task
    let fallback = Arc::new(AtomicUsize::new(0));
    let counted = fallback.clone();
    run_worker_task(move || async move {
        counted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    let counted = fallback.clone();
    run_worker_task_dist(move || {
        let counted = counted.clone();
        async move {
            counted.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    });
    assert_eq!(fallback.load(Ordering::SeqCst), 2);
}
