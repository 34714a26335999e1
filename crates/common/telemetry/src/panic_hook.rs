// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Panic hook that reports through `tracing` with a backtrace, plus optional
//! deadlock detection for the queue's `parking_lot` locks.

#[cfg(feature = "deadlock_detection")]
use std::time::Duration;
use std::panic;

use backtrace::Backtrace;

/// Replaces the panic handler with one that logs the panic, its location
/// and a backtrace as an `error!` event before running the default hook.
pub fn set_panic_hook() {
    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic| {
        let backtrace = Backtrace::new();
        let backtrace = format!("{backtrace:?}");
        if let Some(location) = panic.location() {
            tracing::error!(
                message = %panic,
                backtrace = %backtrace,
                panic.file = location.file(),
                panic.line = location.line(),
                panic.column = location.column(),
            );
        } else {
            tracing::error!(message = %panic, backtrace = %backtrace);
        }
        default_hook(panic);
    }));

    #[cfg(feature = "deadlock_detection")]
    let _ = std::thread::spawn(move || {
        loop {
            std::thread::sleep(Duration::from_secs(5));
            let deadlocks = parking_lot::deadlock::check_deadlock();
            if deadlocks.is_empty() {
                continue;
            }

            tracing::warn!("{} deadlocks detected", deadlocks.len());
            for (i, threads) in deadlocks.iter().enumerate() {
                tracing::warn!("Deadlock #{}", i);
                for t in threads {
                    tracing::warn!("Thread Id {:#?}", t.thread_id());
                    tracing::warn!("{:#?}", t.backtrace());
                }
            }
        }
    });
}
