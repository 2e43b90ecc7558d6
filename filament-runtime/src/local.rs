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

use crate::task::current_task;
use lazy_static::lazy_static;
use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

// process-wide so slots stay distinct across threads
static NEXT_SLOT: AtomicUsize = AtomicUsize::new(0);

lazy_static! {
    static ref GLOBAL_LOCALS: Mutex<HashMap<String, Box<dyn Any + Send>>> =
        Mutex::new(HashMap::new());
}

/// A typed per-task storage slot.
///
/// Each `TaskLocal` owns one slot id for the lifetime of the process; every
/// task sees its own value in that slot. The first read of an unset slot
/// materializes `T::default()`. Storage is reset when the task body
/// completes.
pub struct TaskLocal<T> {
    slot: usize,
    _ty: PhantomData<fn() -> T>,
}

impl<T: Default + 'static> Default for TaskLocal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Default + 'static> TaskLocal<T> {
    pub fn new() -> Self {
        Self {
            slot: NEXT_SLOT.fetch_add(1, Ordering::Relaxed),
            _ty: PhantomData,
        }
    }

    /// Runs `f` with mutable access to the current task's value, creating it
    /// from `T::default()` on first access. Panics off-task.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let handle = current_task().expect("task-local storage accessed outside of a task");
        let mut boxed = {
            let mut slots = handle.fiber.slots.borrow_mut();
            if slots.len() <= self.slot {
                slots.resize_with(self.slot + 1, || None);
            }
            slots[self.slot].take()
        }
        .unwrap_or_else(|| Box::new(T::default()) as Box<dyn Any>);
        let value = boxed
            .downcast_mut::<T>()
            .expect("task-local slot holds a value of a different type");
        let result = f(value);
        handle.fiber.slots.borrow_mut()[self.slot] = Some(boxed);
        result
    }

    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.with(|value| value.clone())
    }

    pub fn set(&self, value: T) {
        let handle = current_task().expect("task-local storage accessed outside of a task");
        let mut slots = handle.fiber.slots.borrow_mut();
        if slots.len() <= self.slot {
            slots.resize_with(self.slot + 1, || None);
        }
        slots[self.slot] = Some(Box::new(value));
    }

    /// Whether the current task has initialized this slot.
    pub fn is_set(&self) -> bool {
        let handle = current_task().expect("task-local storage accessed outside of a task");
        let slots = handle.fiber.slots.borrow();
        slots.get(self.slot).is_some_and(|slot| slot.is_some())
    }
}

/// Stores a value under a string key: in the current task's storage when
/// called on a task, otherwise in the process-wide map. Off-task callers
/// accessing the process-wide map from multiple threads must synchronize
/// externally beyond the map's own lock.
pub fn set_task_local<T: Any + Send>(key: &str, value: T) {
    match current_task() {
        Some(handle) => {
            handle
                .fiber
                .named
                .borrow_mut()
                .insert(key.to_string(), Box::new(value));
        }
        None => {
            GLOBAL_LOCALS
                .lock()
                .unwrap()
                .insert(key.to_string(), Box::new(value));
        }
    }
}

/// Reads a value stored with [`set_task_local`]. Panics when the key is not
/// set or holds a value of a different type.
pub fn get_task_local<T: Any + Clone>(key: &str) -> T {
    match current_task() {
        Some(handle) => {
            let named = handle.fiber.named.borrow();
            named
                .get(key)
                .and_then(|value| value.downcast_ref::<T>())
                .cloned()
                .unwrap_or_else(|| panic!("task-local '{key}' is not set for the current task"))
        }
        None => {
            let globals = GLOBAL_LOCALS.lock().unwrap();
            globals
                .get(key)
                .and_then(|value| (value.as_ref() as &dyn Any).downcast_ref::<T>())
                .cloned()
                .unwrap_or_else(|| panic!("task-local '{key}' is not set"))
        }
    }
}

pub fn is_task_local_set(key: &str) -> bool {
    match current_task() {
        Some(handle) => handle.fiber.named.borrow().contains_key(key),
        None => GLOBAL_LOCALS.lock().unwrap().contains_key(key),
    }
}
