// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Conductor agent thread and idle strategy.
//!
//! In agent-thread mode the client owns a thread that invokes the
//! conductor's duty cycle in a loop, backing off through spin, yield, and
//! park states while no work is done. In invoker mode no thread exists and
//! the embedder calls the duty cycle on its own cadence.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::conductor::ClientConductor;

/// Backoff idle strategy: spin, then yield, then park with doubling pauses.
pub struct BackoffIdleStrategy {
    max_spins: u64,
    max_yields: u64,
    min_park_ns: u64,
    max_park_ns: u64,
    spins: u64,
    yields: u64,
    park_ns: u64,
}

impl BackoffIdleStrategy {
    #[must_use]
    pub fn new(max_spins: u64, max_yields: u64, min_park_ns: u64, max_park_ns: u64) -> Self {
        Self {
            max_spins,
            max_yields,
            min_park_ns,
            max_park_ns,
            spins: 0,
            yields: 0,
            park_ns: min_park_ns,
        }
    }

    /// Idle according to the current backoff state; any work resets it.
    pub fn idle(&mut self, work_count: usize) {
        if work_count > 0 {
            self.reset();
            return;
        }

        if self.spins < self.max_spins {
            self.spins += 1;
            std::hint::spin_loop();
        } else if self.yields < self.max_yields {
            self.yields += 1;
            thread::yield_now();
        } else {
            thread::sleep(Duration::from_nanos(self.park_ns));
            self.park_ns = (self.park_ns * 2).min(self.max_park_ns);
        }
    }

    fn reset(&mut self) {
        self.spins = 0;
        self.yields = 0;
        self.park_ns = self.min_park_ns;
    }
}

impl Default for BackoffIdleStrategy {
    fn default() -> Self {
        Self::new(10, 20, 1_000, 1_000_000)
    }
}

/// Owns the conductor thread in agent-thread mode.
pub(crate) struct AgentRunner {
    running: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl AgentRunner {
    /// Spawn the conductor duty-cycle thread.
    pub fn start(conductor: Arc<Mutex<ClientConductor>>) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = Arc::clone(&running);

        let thread = thread::Builder::new()
            .name("conduit-conductor".to_string())
            .spawn(move || {
                let mut idle = BackoffIdleStrategy::default();
                while thread_running.load(Ordering::Acquire) {
                    let work_count = match conductor.lock().do_work() {
                        Ok(count) => count,
                        Err(e) => {
                            log::error!("[AgentRunner] duty cycle failed: {e}");
                            0
                        }
                    };
                    idle.idle(work_count);
                }
            })
            .expect("failed to spawn conductor thread");

        Self {
            running,
            thread: Some(thread),
        }
    }

    /// Signal the thread to stop and join it.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("[AgentRunner] conductor thread panicked");
            }
        }
    }
}

impl Drop for AgentRunner {
    fn drop(&mut self) {
        self.stop();
    }
}
