// Copyright 2024-2026 MSCORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Graceful shutdown coordination.
//!
//! `Running -> Draining -> Stopped`. While draining no new work is accepted
//! and shutdown waits for tracked operations to finish or the timeout.

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShutdownState {
    Running,
    Draining,
    Stopped,
}

impl ShutdownState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Running,
            1 => Self::Draining,
            _ => Self::Stopped,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownResult {
    Complete,
    Timeout { remaining: u32 },
}

/// Coordinates graceful shutdown across runtime components.
pub struct ShutdownCoordinator {
    state: AtomicU8,
    in_flight: Arc<AtomicU32>,
    notify: Arc<Notify>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(ShutdownState::Running as u8),
            in_flight: Arc::new(AtomicU32::new(0)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn state(&self) -> ShutdownState {
        ShutdownState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_accepting(&self) -> bool {
        self.state() == ShutdownState::Running
    }

    /// Track one operation. Returns None once shutdown has begun.
    pub fn track(&self) -> Option<ShutdownGuard> {
        if !self.is_accepting() {
            return None;
        }
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        // Re-check: shutdown may have started between the check and the increment.
        if !self.is_accepting() {
            self.release();
            return None;
        }
        Some(ShutdownGuard {
            counter: self.in_flight.clone(),
            notify: self.notify.clone(),
        })
    }

    pub fn in_flight_count(&self) -> u32 {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn release(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// Stop accepting and wait for tracked operations to drain.
    pub async fn initiate(&self, timeout: Duration) -> ShutdownResult {
        self.state.store(ShutdownState::Draining as u8, Ordering::Release);
        let result = self.wait_for_drain(timeout).await;
        self.state.store(ShutdownState::Stopped as u8, Ordering::Release);
        result
    }

    async fn wait_for_drain(&self, timeout: Duration) -> ShutdownResult {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let count = self.in_flight_count();
            if count == 0 {
                return ShutdownResult::Complete;
            }
            tokio::select! {
                _ = self.notify.notified() => continue,
                _ = tokio::time::sleep_until(deadline) => {
                    return match self.in_flight_count() {
                        0 => ShutdownResult::Complete,
                        remaining => ShutdownResult::Timeout { remaining },
                    };
                }
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for one tracked operation.
pub struct ShutdownGuard {
    counter: Arc<AtomicU32>,
    notify: Arc<Notify>,
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
        self.notify.notify_one();
    }
}
